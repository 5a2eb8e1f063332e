//! Configuration parsing and validation for the gateway
//!
//! This module handles command-line argument parsing and validation using clap. Every flag can
//! also be supplied through a `KEYGATE_*` environment variable.
use anyhow::anyhow;
use clap::{Parser, Subcommand};
use keygate::client::PoolConfig;
use keygate::traits::DEFAULT_RATE_LIMIT;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the gateway will listen.
    #[arg(short = 'p', long, env = "KEYGATE_PORT", default_value_t = 3000)]
    pub port: u16,

    /// The port on which the metrics server will listen.
    #[arg(long, env = "KEYGATE_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, env = "KEYGATE_METRICS", default_value_t = true, action = clap::ArgAction::Set)]
    pub metrics: bool,

    /// The prefix to use for metrics.
    #[arg(long, env = "KEYGATE_METRICS_PREFIX", default_value = "keygate")]
    pub metrics_prefix: String,

    /// SQLite database holding the API keys.
    #[arg(short = 'd', long, env = "KEYGATE_DATABASE", default_value = "apiKeys.db")]
    pub database: PathBuf,

    /// Base URL of the Ollama server that admitted requests are forwarded to.
    #[arg(long, env = "KEYGATE_OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: Url,

    /// Maximum number of idle HTTP connections to keep alive to the Ollama server.
    #[arg(long, env = "KEYGATE_POOL_MAX_IDLE_PER_HOST", default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle HTTP connections alive.
    #[arg(long, env = "KEYGATE_POOL_IDLE_TIMEOUT_SECS", default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the gateway (the default).
    Serve,
    /// Generate a new random API key.
    GenerateKey {
        /// Requests allowed per minute.
        #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
        rate_limit: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// Register a caller-chosen API key.
    AddKey {
        key: String,
        /// Requests allowed per minute.
        #[arg(long, default_value_t = DEFAULT_RATE_LIMIT)]
        rate_limit: i64,
        #[arg(long)]
        description: Option<String>,
    },
    /// List all API keys.
    ListKeys,
    /// Remove an API key.
    RemoveKey { key: String },
    /// Re-enable a deactivated API key.
    Activate { key: String },
    /// Reject all requests for an API key without removing it.
    Deactivate { key: String },
    /// Set the requests-per-minute limit for an API key, from its next window.
    RateLimit { key: String, limit: i64 },
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if !matches!(self.ollama_url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Ollama URL '{}' must use http or https",
                self.ollama_url
            ));
        }
        let limit = match &self.command {
            Some(Command::GenerateKey { rate_limit, .. })
            | Some(Command::AddKey { rate_limit, .. }) => Some(*rate_limit),
            Some(Command::RateLimit { limit, .. }) => Some(*limit),
            _ => None,
        };
        if let Some(limit) = limit
            && limit < 1
        {
            return Err(anyhow!("Rate limit must be at least 1, got {}", limit));
        }
        Ok(self)
    }

    pub fn pool(&self) -> PoolConfig {
        PoolConfig {
            idle_timeout: Duration::from_secs(self.pool_idle_timeout_secs),
            max_idle_per_host: self.pool_max_idle_per_host,
        }
    }
}
