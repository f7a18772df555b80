use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Log format: "compact" or "json".
    pub log_format: String,
    /// Advertised through GetSqlInfo.
    pub server_name: String,
    /// Advertised through GetSqlInfo; the engine itself enforces nothing.
    pub read_only: bool,
    /// Maximum number of live prepared statements.
    pub prepared_statement_cache_size: Option<usize>,
    /// Prepared-statement idle expiry in seconds.
    pub prepared_statement_idle_seconds: Option<u64>,
    /// Maximum number of pending ad-hoc statement tickets.
    pub statement_cache_size: Option<usize>,
    /// Ad-hoc statement ticket idle expiry in seconds.
    pub statement_idle_seconds: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4414,
            log_format: "compact".to_string(),
            server_name: "Wingspan Flight SQL Server".to_string(),
            read_only: false,
            prepared_statement_cache_size: Some(100),
            prepared_statement_idle_seconds: Some(600),
            statement_cache_size: Some(100),
            statement_idle_seconds: Some(600),
        }
    }
}

impl ServerConfig {
    /// Load defaults overlaid with `WINGSPAN_`-prefixed environment
    /// variables.
    pub fn load() -> anyhow::Result<Self> {
        let defaults_json = serde_json::to_string(&Self::default())
            .with_context(|| "failed to serialize defaults")?;
        let settings = config::Config::builder()
            .add_source(
                config::File::from_str(&defaults_json, config::FileFormat::Json).required(false),
            )
            .add_source(config::Environment::with_prefix("WINGSPAN"))
            .build()
            .with_context(|| "failed to load configuration")?;
        let cfg: ServerConfig = settings
            .try_deserialize()
            .with_context(|| "failed to deserialize configuration")?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.to_socket_addrs()?
            .next()
            .ok_or_else(|| anyhow::anyhow!("unable to resolve bind address for {addr}"))
    }
}
