use std::path::PathBuf;
use std::time::Duration;

/// CLI configuration, loaded from environment variables.
pub struct Config {
    /// Record service endpoint; local-only when unset.
    pub server_url: Option<String>,
    /// Local SQLite file used directly or as the fallback store.
    pub db_path: PathBuf,
    /// Recorded as `marked_by` on manual marks.
    pub actor: String,
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("rollcall.db"));

        Self {
            server_url: std::env::var("ROLLCALL_SERVER_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            db_path,
            actor: std::env::var("ROLLCALL_ACTOR").unwrap_or_else(|_| "cli".to_string()),
            request_timeout: Duration::from_secs(env_u64("ROLLCALL_REQUEST_TIMEOUT_SECS", 5)),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
