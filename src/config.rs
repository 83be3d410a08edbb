use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Knobs the engine itself reads.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a writer waits for the ledger lock before `ConflictRetry`.
    pub lock_timeout: Duration,
    /// Extra attempts after a `ConflictRetry` before surfacing it.
    pub max_retries: u32,
    /// Base backoff; attempt `n` sleeps `n * retry_backoff`.
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(2_000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Process configuration, read from `SHIFTPICK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub audit_log: Option<PathBuf>,
    pub seed_file: Option<PathBuf>,
    pub engine: EngineConfig,
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = EngineConfig::default();
        let engine = EngineConfig {
            lock_timeout: env_parse("SHIFTPICK_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            max_retries: env_parse("SHIFTPICK_MAX_RETRIES").unwrap_or(defaults.max_retries),
            retry_backoff: env_parse("SHIFTPICK_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_backoff),
        };
        Self {
            data_dir: std::env::var("SHIFTPICK_DATA_DIR")
                .unwrap_or_else(|_| "./data".into())
                .into(),
            metrics_port: env_parse("SHIFTPICK_METRICS_PORT"),
            compact_threshold: env_parse("SHIFTPICK_COMPACT_THRESHOLD").unwrap_or(1000),
            audit_log: std::env::var("SHIFTPICK_AUDIT_LOG").ok().map(PathBuf::from),
            seed_file: std::env::var("SHIFTPICK_SEED_FILE").ok().map(PathBuf::from),
            engine,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("shiftpick.wal")
    }
}
