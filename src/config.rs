//! Process-wide configuration, loaded from environment variables (ambient
//! stack — logging/config carried over from the teacher regardless of
//! which domain features are in scope).

use std::path::PathBuf;

/// Top-level configuration for the MCP process.
pub struct AppConfig {
    /// Directory holding one SQLite file per backtest run
    /// (`<runId>.events.db`). Created on first write if absent.
    pub events_dir: PathBuf,
    /// Default bound on worker concurrency for the optimization pipeline
    /// when a run doesn't override `parallel_workers`.
    pub default_parallel_workers: usize,
}

impl AppConfig {
    /// Builds configuration from the environment.
    ///
    /// | Env Var | Default | Purpose |
    /// |---------|---------|---------|
    /// | `EVENTS_DIR` | `./events` | Event-store database directory |
    /// | `PARALLEL_WORKERS` | number of logical CPUs | Pipeline worker bound |
    #[must_use]
    pub fn from_env() -> Self {
        let events_dir = match std::env::var("EVENTS_DIR") {
            Ok(val) => PathBuf::from(val),
            Err(_) => PathBuf::from("./events"),
        };

        let default_parallel_workers = std::env::var("PARALLEL_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(num_cpus);

        Self {
            events_dir,
            default_parallel_workers,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
