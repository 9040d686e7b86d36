//! Credential storage and Qwen OAuth2 refresh.
//!
//! The store maps an auth file name to a valid bearer token. Records live
//! in memory and in one JSON file per record under the auth directory.
//! A token within 30 seconds of expiry is refreshed before use; refreshes
//! are single-flight per auth file, so concurrent callers share one
//! upstream POST and its result. Cancelling the request that initiated a
//! refresh aborts that POST without disturbing the waiters behind it.
//!
//! Refresh tokens and access tokens never appear in logs; the sanitizer
//! in `error` guards the error paths that carry upstream text.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{BrokerError, BrokerResult, sanitize};

/// Qwen OAuth2 token endpoint.
const QWEN_TOKEN_ENDPOINT: &str = "https://chat.qwen.ai/api/v1/oauth2/token";

/// Fixed OAuth2 client id of the Qwen CLI integration.
const QWEN_CLIENT_ID: &str = "f0304373b74a44d2b584a3fb70ca9e56";

/// Stable user agent expected by the Qwen services.
pub(crate) const QWEN_USER_AGENT: &str = "google-api-nodejs-client/9.15.1";

/// Refresh when the wall clock is within this margin of expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// One persisted credential record.
///
/// Matches the on-disk JSON layout:
/// `{access_token, refresh_token, resource_url, expires_at, created_at, account_index}`
/// with `expires_at` in milliseconds since the epoch and `created_at` as an
/// ISO timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Current bearer token.
    pub access_token: String,
    /// Long-lived refresh token.
    pub refresh_token: String,
    /// Account-specific API host, when the service assigns one.
    #[serde(default)]
    pub resource_url: Option<String>,
    /// Absolute expiry instant, milliseconds since the epoch.
    pub expires_at: i64,
    /// When the record was first created.
    #[serde(default)]
    pub created_at: Option<String>,
    /// Which account slot this record belongs to.
    #[serde(default)]
    pub account_index: Option<u32>,
}

impl CredentialRecord {
    fn is_fresh(&self, now_ms: i64) -> bool {
        self.expires_at - now_ms > EXPIRY_MARGIN.as_millis() as i64
    }
}

/// A usable access token plus the host it is valid for.
#[derive(Debug, Clone)]
pub struct QwenAccess {
    /// Bearer token for upstream calls.
    pub access_token: String,
    /// Account-specific API host.
    pub resource_url: Option<String>,
}

impl QwenAccess {
    /// The chat-completions base URL for this account.
    pub fn base_url(&self) -> String {
        match self.resource_url.as_deref().filter(|url| !url.is_empty()) {
            Some(resource) => format!("https://{resource}/v1"),
            None => "https://portal.qwen.ai/v1".to_string(),
        }
    }
}

/// Fields returned by the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    /// The new bearer token.
    pub access_token: String,
    /// Optionally rotated refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Optionally updated API host.
    #[serde(default)]
    pub resource_url: Option<String>,
    /// Validity in seconds.
    pub expires_in: u64,
}

/// Transport performing the actual refresh POST. Separated from the store
/// so the single-flight discipline is testable without the network.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchange a refresh token for a new access token.
    async fn refresh(&self, refresh_token: &str) -> BrokerResult<RefreshResponse>;
}

/// Production refresher talking to the Qwen token endpoint.
pub struct HttpRefresher {
    client: reqwest::Client,
}

impl HttpRefresher {
    /// Build a refresher over a shared HTTP client.
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TokenRefresher for HttpRefresher {
    async fn refresh(&self, refresh_token: &str) -> BrokerResult<RefreshResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", QWEN_CLIENT_ID),
        ];

        let response = self
            .client
            .post(QWEN_TOKEN_ENDPOINT)
            .header(reqwest::header::USER_AGENT, QWEN_USER_AGENT)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|error| BrokerError::Connection(format!("token refresh failed: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| BrokerError::Connection(format!("token refresh read failed: {error}")))?;

        if status == reqwest::StatusCode::BAD_REQUEST || body.contains("invalid_grant") {
            // The caller maps this to refresh-token-expired with the file
            // name attached.
            return Err(BrokerError::RefreshTokenExpired(String::new()));
        }

        if !status.is_success() {
            return Err(BrokerError::RefreshFailed(format!(
                "token endpoint returned {status}: {}",
                sanitize(&body)
            )));
        }

        sonic_rs::from_str(&body)
            .map_err(|error| BrokerError::RefreshFailed(format!("unparseable token response: {error}")))
    }
}

/// The Qwen OAuth2 credential store.
pub struct QwenCredentialStore {
    auth_dir: PathBuf,
    refresher: Box<dyn TokenRefresher>,
    refresh_timeout: Duration,
    cache: Mutex<HashMap<String, CredentialRecord>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// One entry of the cache status report.
#[derive(Debug, Clone, Serialize)]
pub struct CacheEntryStatus {
    /// Auth file name.
    pub auth_file: String,
    /// Absolute expiry, milliseconds since the epoch.
    pub expires_at: i64,
    /// Whether the token is outside the refresh margin.
    pub fresh: bool,
}

impl QwenCredentialStore {
    /// Create a store over the given auth directory with the production
    /// HTTP refresher.
    pub fn new(auth_dir: PathBuf, client: reqwest::Client, refresh_timeout: Duration) -> Self {
        Self::with_refresher(auth_dir, Box::new(HttpRefresher::new(client)), refresh_timeout)
    }

    /// Create a store with a custom refresh transport.
    pub fn with_refresher(auth_dir: PathBuf, refresher: Box<dyn TokenRefresher>, refresh_timeout: Duration) -> Self {
        Self {
            auth_dir,
            refresher,
            refresh_timeout,
            cache: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an auth file name to a valid access token, refreshing if
    /// the cached record is within 30 seconds of expiry.
    ///
    /// `cancellation` is the requesting context's signal: cancelling the
    /// initiator aborts its in-flight refresh POST. Waiters blocked on the
    /// same auth file are unaffected; they re-acquire the lock and refresh
    /// on their own behalf.
    pub async fn get(&self, auth_file: &str, cancellation: &CancellationToken) -> BrokerResult<QwenAccess> {
        let now_ms_initial = now_ms();

        if let Some(access) = self.cached_access(auth_file, now_ms_initial) {
            return Ok(access);
        }

        // Single-flight: one refresh per auth file; everyone else waits on
        // the same lock and re-reads the cache once it frees up.
        let lock = self.refresh_lock(auth_file);

        let _guard = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                return Err(BrokerError::Connection("request cancelled".into()));
            }
            acquired = tokio::time::timeout(self.refresh_timeout, lock.lock()) => acquired
                .map_err(|_| BrokerError::RefreshFailed(format!("timed out waiting for refresh of '{auth_file}'")))?,
        };

        let now_ms = now_ms();

        if let Some(access) = self.cached_access(auth_file, now_ms) {
            return Ok(access);
        }

        let record = match self.cached_record(auth_file) {
            Some(record) => record,
            None => {
                let record = self.load_record(auth_file).await?;

                self.cache
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .insert(auth_file.to_string(), record.clone());

                // A record freshly read from disk may still be valid.
                if record.is_fresh(now_ms) {
                    return Ok(QwenAccess {
                        access_token: record.access_token,
                        resource_url: record.resource_url,
                    });
                }

                record
            }
        };

        // Racing against the initiator's cancellation drops the refresh
        // future and with it the upstream POST. The lock frees on return,
        // so a waiter behind it performs the next refresh itself.
        let outcome = tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                log::debug!("refresh of '{auth_file}' cancelled by its initiator");
                return Err(BrokerError::Connection("request cancelled".into()));
            }
            outcome = self.refresher.refresh(&record.refresh_token) => outcome,
        };

        let refreshed = match outcome {
            Ok(refreshed) => refreshed,
            Err(BrokerError::RefreshTokenExpired(_)) => {
                self.evict(auth_file);
                return Err(BrokerError::RefreshTokenExpired(auth_file.to_string()));
            }
            Err(error) => return Err(error),
        };

        let updated = CredentialRecord {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(record.refresh_token),
            resource_url: refreshed.resource_url.or(record.resource_url),
            expires_at: now_ms + (refreshed.expires_in * 1000) as i64,
            created_at: record.created_at,
            account_index: record.account_index,
        };

        self.persist_record(auth_file, &updated).await?;

        let access = QwenAccess {
            access_token: updated.access_token.clone(),
            resource_url: updated.resource_url.clone(),
        };

        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(auth_file.to_string(), updated);

        log::info!("refreshed Qwen credentials for '{auth_file}'");

        Ok(access)
    }

    /// Drop every cached record; the next `get` re-reads from disk.
    pub fn clear_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Report cache contents without exposing token material.
    pub fn cache_status(&self) -> Vec<CacheEntryStatus> {
        let now_ms = now_ms();

        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .map(|(auth_file, record)| CacheEntryStatus {
                auth_file: auth_file.clone(),
                expires_at: record.expires_at,
                fresh: record.is_fresh(now_ms),
            })
            .collect()
    }

    fn cached_access(&self, auth_file: &str, now_ms: i64) -> Option<QwenAccess> {
        let cache = self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let record = cache.get(auth_file)?;

        record.is_fresh(now_ms).then(|| QwenAccess {
            access_token: record.access_token.clone(),
            resource_url: record.resource_url.clone(),
        })
    }

    fn cached_record(&self, auth_file: &str) -> Option<CredentialRecord> {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(auth_file)
            .cloned()
    }

    fn evict(&self, auth_file: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(auth_file);
    }

    fn refresh_lock(&self, auth_file: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(auth_file.to_string())
            .or_default()
            .clone()
    }

    fn record_path(&self, auth_file: &str) -> PathBuf {
        self.auth_dir.join(format!("{auth_file}.json"))
    }

    async fn load_record(&self, auth_file: &str) -> BrokerResult<CredentialRecord> {
        let path = self.record_path(auth_file);

        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                return Err(BrokerError::AuthFileMissing(auth_file.to_string()));
            }
            Err(error) => {
                return Err(BrokerError::RefreshFailed(format!(
                    "failed to read auth file '{auth_file}': {error}"
                )));
            }
        };

        serde_json::from_str(&raw)
            .map_err(|error| BrokerError::RefreshFailed(format!("corrupt auth file '{auth_file}': {error}")))
    }

    /// Write the record atomically: temp file in the same directory, then
    /// rename over the target.
    async fn persist_record(&self, auth_file: &str, record: &CredentialRecord) -> BrokerResult<()> {
        let path = self.record_path(auth_file);
        let temp = self.auth_dir.join(format!(".{auth_file}.json.tmp"));

        let serialized = serde_json::to_vec_pretty(record)
            .map_err(|error| BrokerError::RefreshFailed(format!("failed to serialize credentials: {error}")))?;

        tokio::fs::create_dir_all(&self.auth_dir)
            .await
            .map_err(|error| BrokerError::RefreshFailed(format!("failed to create auth dir: {error}")))?;

        tokio::fs::write(&temp, &serialized)
            .await
            .map_err(|error| BrokerError::RefreshFailed(format!("failed to write credentials: {error}")))?;

        tokio::fs::rename(&temp, &path)
            .await
            .map_err(|error| BrokerError::RefreshFailed(format!("failed to commit credentials: {error}")))?;

        Ok(())
    }
}

fn now_ms() -> i64 {
    jiff::Timestamp::now().as_millisecond()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingRefresher {
        calls: AtomicU32,
        delay: Duration,
        fail_with: Option<fn() -> BrokerError>,
    }

    impl CountingRefresher {
        fn new(delay: Duration) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay,
                fail_with: None,
            }
        }

        fn failing(builder: fn() -> BrokerError) -> Self {
            Self {
                calls: AtomicU32::new(0),
                delay: Duration::ZERO,
                fail_with: Some(builder),
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _refresh_token: &str) -> BrokerResult<RefreshResponse> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            if let Some(builder) = self.fail_with {
                return Err(builder());
            }

            Ok(RefreshResponse {
                access_token: format!("token-{call}"),
                refresh_token: Some("rotated-refresh".to_string()),
                resource_url: Some("api.qwen.example".to_string()),
                expires_in: 3600,
            })
        }
    }

    fn seed_record(dir: &std::path::Path, name: &str, expires_at: i64) {
        let record = CredentialRecord {
            access_token: "stale-token".to_string(),
            refresh_token: "refresh-1".to_string(),
            resource_url: None,
            expires_at,
            created_at: Some("2025-01-01T00:00:00Z".to_string()),
            account_index: Some(0),
        };

        std::fs::write(
            dir.join(format!("{name}.json")),
            serde_json::to_vec_pretty(&record).unwrap(),
        )
        .unwrap();
    }

    fn store_with(dir: &std::path::Path, refresher: Box<dyn TokenRefresher>) -> Arc<QwenCredentialStore> {
        Arc::new(QwenCredentialStore::with_refresher(
            dir.to_path_buf(),
            refresher,
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn concurrent_getters_share_one_refresh() {
        let dir = tempfile::tempdir().unwrap();
        // Ten seconds from expiry: inside the 30-second margin.
        seed_record(dir.path(), "qwen-auth-1", now_ms() + 10_000);

        let store = store_with(dir.path(), Box::new(CountingRefresher::new(Duration::from_millis(50))));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get("qwen-auth-1", &CancellationToken::new()).await
            }));
        }

        let mut tokens = Vec::new();
        for handle in handles {
            tokens.push(handle.await.unwrap().unwrap().access_token);
        }

        // All ten observed the same token from a single upstream POST.
        assert!(tokens.iter().all(|token| token == "token-0"));

        // The refreshed record hit the disk with a future expiry.
        let raw = std::fs::read_to_string(dir.path().join("qwen-auth-1.json")).unwrap();
        let record: CredentialRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(record.access_token, "token-0");
        assert_eq!(record.refresh_token, "rotated-refresh");
        assert!(record.expires_at > now_ms() + 3_000_000);
    }

    #[tokio::test]
    async fn fresh_tokens_skip_the_refresh() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path(), "qwen-auth-1", now_ms() + 3_600_000);

        let store = store_with(dir.path(), Box::new(CountingRefresher::new(Duration::ZERO)));

        // Prime the cache via a first read: the record is fresh, but it is
        // not cached yet, so the store loads it from disk without
        // refreshing.
        let access = store.get("qwen-auth-1", &CancellationToken::new()).await.unwrap();
        assert_eq!(access.access_token, "stale-token");
    }

    #[tokio::test]
    async fn missing_auth_file_reports_reauth_hint() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(dir.path(), Box::new(CountingRefresher::new(Duration::ZERO)));

        let error = store.get("nope", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(error.code(), "auth-file-missing");
        assert!(error.to_string().contains("rcc auth qwen"));
    }

    #[tokio::test]
    async fn invalid_grant_evicts_and_reports_expired() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path(), "qwen-auth-1", now_ms() - 1000);

        let store = store_with(
            dir.path(),
            Box::new(CountingRefresher::failing(|| BrokerError::RefreshTokenExpired(String::new()))),
        );

        let error = store.get("qwen-auth-1", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(error.code(), "refresh-token-expired");
        assert!(error.to_string().contains("qwen-auth-1"));
        assert!(store.cache_status().is_empty());
    }

    #[tokio::test]
    async fn transient_failures_surface_as_refresh_failed() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path(), "qwen-auth-1", now_ms() - 1000);

        let store = store_with(
            dir.path(),
            Box::new(CountingRefresher::failing(|| {
                BrokerError::Connection("connection reset".to_string())
            })),
        );

        let error = store.get("qwen-auth-1", &CancellationToken::new()).await.unwrap_err();
        assert_eq!(error.code(), "upstream-error");
    }

    #[tokio::test]
    async fn cancelled_initiator_aborts_its_refresh() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path(), "qwen-auth-1", now_ms() - 1000);

        // A refresh that would outlive the test by far: only cancellation
        // can end the call promptly.
        let store = store_with(dir.path(), Box::new(CountingRefresher::new(Duration::from_secs(30))));

        let cancellation = CancellationToken::new();
        let initiator = {
            let store = store.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move { store.get("qwen-auth-1", &cancellation).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancellation.cancel();

        let error = initiator.await.unwrap().unwrap_err();
        assert_eq!(error.code(), "upstream-error");
        assert!(error.to_string().contains("cancelled"));

        // The refresh lock was released with the aborted POST: nothing is
        // left holding it for the next caller.
        let entries = store.cache_status();
        assert!(entries.iter().all(|entry| !entry.fresh));
    }

    #[tokio::test]
    async fn clear_cache_forgets_records() {
        let dir = tempfile::tempdir().unwrap();
        seed_record(dir.path(), "qwen-auth-1", now_ms() + 10_000);

        let store = store_with(dir.path(), Box::new(CountingRefresher::new(Duration::ZERO)));
        store.get("qwen-auth-1", &CancellationToken::new()).await.unwrap();
        assert_eq!(store.cache_status().len(), 1);

        store.clear_cache();
        assert!(store.cache_status().is_empty());
    }

    #[test]
    fn base_url_derives_from_resource_url() {
        let with_resource = QwenAccess {
            access_token: "t".into(),
            resource_url: Some("api-sg.qwen.ai".into()),
        };
        assert_eq!(with_resource.base_url(), "https://api-sg.qwen.ai/v1");

        let without = QwenAccess {
            access_token: "t".into(),
            resource_url: None,
        };
        assert_eq!(without.base_url(), "https://portal.qwen.ai/v1");
    }
}
