//! Top-level error type for startup and fatal daemon failures (§6.3). Most
//! per-connection and per-session errors are handled locally and never reach
//! here; this is what `main` maps to an exit code.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("failed to bind control server: {0}")]
    Bind(#[from] std::io::Error),

    #[error("adapter unavailable: {0}")]
    Adapter(#[from] ble_adapter::AdapterError),

    #[error("cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),
}

impl DaemonError {
    /// Process exit code per §6.3.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaemonError::Bind(_) => 1,
            DaemonError::Adapter(_) => 2,
            DaemonError::Cache(_) => 1,
        }
    }
}
