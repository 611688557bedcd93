use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub store: StoreConfig,
    pub state: StateConfig,
    pub execution: ExecutionConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TALLY_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TALLY_PROFILE", "");
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            store: StoreConfig::from_env_profiled(p),
            state: StateConfig::from_env_profiled(p),
            execution: ExecutionConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  store:      host={}, port={}, connections={}",
            self.store.host,
            self.store.port,
            self.store.connection_limit
        );
        tracing::info!("  state:      dir={}", self.state.dir.display());
        tracing::info!(
            "  execution:  max_retries={}, backoff={}s, idle={}s, page_size={}, workers={}",
            self.execution.max_retries,
            self.execution.retry_backoff_secs,
            self.execution.idle_interval_secs,
            self.execution.page_size,
            self.execution.resolved_worker_threads()
        );
    }
}

// ── Document store ────────────────────────────────────────────

/// Elasticsearch / OpenSearch connection defaults for job settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub connection_limit: usize,
}

impl StoreConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "ELASTICSEARCH_HOST", "localhost"),
            port: profiled_env_parse(p, "ELASTICSEARCH_PORT", 9200),
            connection_limit: profiled_env_parse(p, "ELASTICSEARCH_CONNECTION_LIMIT", 5),
        }
    }
}

// ── Checkpoint state ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory holding checkpoint files.
    pub dir: PathBuf,
}

impl StateConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            dir: PathBuf::from(profiled_env_or(p, "STATE_DIR", "data/state")),
        }
    }
}

// ── Execution loop ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Consecutive failed attempts before a job is marked broken.
    pub max_retries: u32,
    pub retry_backoff_secs: u64,
    /// Sleep after processing the still-open current period.
    pub idle_interval_secs: u64,
    /// Records fetched per page.
    pub page_size: usize,
    /// Aggregation worker threads (0 = available parallelism).
    pub worker_threads: usize,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            retry_backoff_secs: 10,
            idle_interval_secs: 60,
            page_size: 10_000,
            worker_threads: 0,
        }
    }
}

impl ExecutionConfig {
    fn from_env_profiled(p: &str) -> Self {
        let d = Self::default();
        Self {
            max_retries: profiled_env_parse(p, "MAX_RETRIES", d.max_retries),
            retry_backoff_secs: profiled_env_parse(p, "RETRY_BACKOFF_SECS", d.retry_backoff_secs),
            idle_interval_secs: profiled_env_parse(p, "IDLE_INTERVAL_SECS", d.idle_interval_secs),
            page_size: profiled_env_parse(p, "PAGE_SIZE", d.page_size),
            worker_threads: profiled_env_parse(p, "WORKER_THREADS", d.worker_threads),
        }
    }

    /// Worker thread count with `0` resolved to the machine's parallelism.
    pub fn resolved_worker_threads(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}
