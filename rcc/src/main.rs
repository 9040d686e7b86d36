use args::Args;
use axum::routing::get;
use clap::Parser;

mod args;
mod logger;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let toggles = config::Toggles::from_env();

    logger::init(&args, &toggles);

    let config = config::Config::load(&args.config)?;
    config.validate()?;

    let mut address = config.server.listen_address();
    if let Some(port) = args.port {
        address.set_port(port);
    }

    // Per-port state lives in the registry; the frame hands coordinators
    // their handle by looking the port back up.
    let registry = broker::PortRegistry::new();
    registry.register(address.port(), broker::build_server(&config, toggles, address.port())?);

    let Some(server) = registry.get(address.port()) else {
        anyhow::bail!("no broker state registered for port {}", address.port());
    };

    let app = broker::routes(server).route("/health", get(health));

    let listener = tokio::net::TcpListener::bind(address).await?;
    log::info!("rcc listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        log::error!("failed to install ctrl-c handler");
        return;
    }

    log::info!("shutting down");
}
