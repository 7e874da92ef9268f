use std::env;
use std::net::{AddrParseError, SocketAddr};

use wm_core::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("LISTEN_ADDR must be a valid socket address: {0}")]
    ListenAddr(#[from] AddrParseError),

    #[error(transparent)]
    Worker(#[from] wm_core::ConfigError),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    /// Without a database the process keeps all state in memory.
    pub database_url: Option<String>,
    pub worker: WorkerConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            listen_addr: env::var("LISTEN_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:8080".into())
                .parse()?,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            worker: WorkerConfig::from_env()?,
        })
    }
}
