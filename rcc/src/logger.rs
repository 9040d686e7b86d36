use config::Toggles;
use log::LevelFilter;
use logforth::append;

use crate::args::Args;

/// Initialize stderr logging. `RCC_DEBUG` and `RCC_VERBOSE` raise the
/// level past whatever --log-level asks for.
pub fn init(args: &Args, toggles: &Toggles) {
    let base = match args.log_level.to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let level = if toggles.verbose {
        LevelFilter::Trace
    } else if toggles.debug {
        base.max(LevelFilter::Debug)
    } else {
        base
    };

    logforth::builder()
        .dispatch(|dispatch| dispatch.filter(level).append(append::Stderr::default()))
        .apply();
}
