//! Process configuration, read from flags and environment.
//!
//! Only deployment concerns are configurable. The cache TTL and the upstream
//! request timeout are fixed constants ([`crate::fetcher::CACHE_TTL`],
//! [`crate::transport::UPSTREAM_TIMEOUT`]).

use std::time::Duration;

use clap::Parser;

use crate::gateway::DEFAULT_UPSTREAM;
use crate::server::Timeouts;

/// Command-line and environment configuration for the `calgate` binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "calgate")]
#[command(about = "Read-through caching gateway for the calendar API")]
#[command(version)]
pub struct GatewayConfig {
    /// Address to listen on
    #[arg(long, env = "CALGATE_LISTEN", default_value = "0.0.0.0:3000")]
    pub listen: String,

    /// Base URL of the upstream calendar API
    #[arg(long, env = "CALGATE_UPSTREAM", default_value = DEFAULT_UPSTREAM)]
    pub upstream: String,

    /// Seconds a request may take to arrive once started
    #[arg(long, env = "CALGATE_READ_TIMEOUT_SECS", default_value_t = 5)]
    pub read_timeout_secs: u64,

    /// Seconds allowed for handling and writing one response
    #[arg(long, env = "CALGATE_WRITE_TIMEOUT_SECS", default_value_t = 15)]
    pub write_timeout_secs: u64,

    /// Seconds an idle keep-alive connection is kept open
    #[arg(long, env = "CALGATE_IDLE_TIMEOUT_SECS", default_value_t = 30)]
    pub idle_timeout_secs: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "CALGATE_LOG", default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Rejects configurations the server cannot run with.
    ///
    /// # Errors
    ///
    /// A human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.upstream.starts_with("http://") || self.upstream.starts_with("https://")) {
            return Err(format!(
                "upstream must be an http(s) URL, got {:?}",
                self.upstream
            ));
        }
        if self.read_timeout_secs == 0 || self.write_timeout_secs == 0 || self.idle_timeout_secs == 0
        {
            return Err("listener timeouts must be > 0".into());
        }
        let lvl = self.log_level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("log level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            read: Duration::from_secs(self.read_timeout_secs),
            write: Duration::from_secs(self.write_timeout_secs),
            idle: Duration::from_secs(self.idle_timeout_secs),
        }
    }
}
