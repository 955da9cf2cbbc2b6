use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Optional TOML file named by `ROLLCALL_CONFIG`. Environment variables take
/// precedence over anything set here.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    db_path: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }
}

/// Record service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite file backing the service.
    pub db_path: PathBuf,
    /// Interface to listen on (default: all).
    pub bind: String,
    pub port: u16,
}

impl Config {
    /// Load from `ROLLCALL_CONFIG` (if set) and `ROLLCALL_*` environment variables.
    pub fn load() -> Result<Self> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Ok(Self::resolve(file, |key| std::env::var(key).ok()))
    }

    fn resolve(file: FileConfig, env: impl Fn(&str) -> Option<String>) -> Self {
        let db_path = env("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .or(file.db_path)
            .unwrap_or_else(|| default_data_dir(&env).join("rollcall.db"));

        let port = env("ROLLCALL_PORT")
            .or_else(|| env("PORT"))
            .and_then(|v| v.parse().ok())
            .or(file.port)
            .unwrap_or(3001);

        Self {
            db_path,
            bind: env("ROLLCALL_BIND")
                .or(file.bind)
                .unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn default_data_dir(env: &impl Fn(&str) -> Option<String>) -> PathBuf {
    env("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}
