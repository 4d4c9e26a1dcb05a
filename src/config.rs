//! Runtime configuration.
//!
//! Every option can be given as a flag or through its environment variable.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::db::pool::PoolSettings;
use crate::error::AppError;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "pr-reviewer",
    about = "Assigns and maintains pull request reviewers inside teams",
    version
)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, default_value = "0.0.0.0", env = "APP_HTTP_HOST")]
    pub host: IpAddr,

    /// Port the HTTP server listens on
    #[arg(short, long, default_value_t = 8080, env = "APP_HTTP_PORT")]
    pub port: u16,

    /// SQLite database file (created if missing)
    #[arg(long, default_value = "pr-reviewer.db", env = "DATABASE_PATH")]
    pub database_path: PathBuf,

    /// Maximum number of pooled database connections
    #[arg(long, default_value_t = 5, env = "DB_MAX_CONNECTIONS")]
    pub max_connections: u32,

    /// Per-request deadline in seconds
    #[arg(long, default_value_t = 10, env = "REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: u64,

    /// Seed for reviewer selection; random when unset
    #[arg(long, env = "REVIEWER_SEED")]
    pub reviewer_seed: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.port == 0 {
            return Err(AppError::invalid_input_field("port must be non-zero", "port"));
        }
        if self.max_connections == 0 {
            return Err(AppError::invalid_input_field(
                "at least one database connection is required",
                "max_connections",
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(AppError::invalid_input_field(
                "request timeout must be at least one second",
                "request_timeout_secs",
            ));
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.max_connections,
            ..PoolSettings::default()
        }
    }
}
