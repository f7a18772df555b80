//! Per-location transport connection pool.
//!
//! Endpoints of a FlightInfo may name the peer that serves them. Streams
//! for such endpoints borrow a connection keyed by the location URI and
//! return it afterwards; idle connections are kept up to a bounded count
//! per location and dropped beyond it.

use std::collections::HashMap;

use arrow_flight::flight_service_client::FlightServiceClient;
use tokio::sync::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    /// Idle connections retained per location.
    pub max_idle_per_location: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_location: 4,
        }
    }
}

pub struct ConnectionPool {
    idle: Mutex<HashMap<String, Vec<FlightServiceClient<Channel>>>>,
    config: PoolConfig,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Borrow a connection for the location, reusing an idle one when
    /// available.
    pub async fn acquire(
        &self,
        location: &str,
    ) -> Result<FlightServiceClient<Channel>, ClientError> {
        if let Some(client) = self
            .idle
            .lock()
            .await
            .get_mut(location)
            .and_then(Vec::pop)
        {
            debug!(%location, "reusing pooled connection");
            return Ok(client);
        }

        debug!(%location, "opening connection");
        let channel = Endpoint::from_shared(location.to_string())?.connect().await?;
        Ok(FlightServiceClient::new(channel))
    }

    /// Return a borrowed connection. Beyond the idle bound it is dropped.
    pub async fn release(&self, location: &str, client: FlightServiceClient<Channel>) {
        let mut idle = self.idle.lock().await;
        let connections = idle.entry(location.to_string()).or_default();
        if connections.len() < self.config.max_idle_per_location {
            connections.push(client);
        }
    }

    pub async fn idle_count(&self, location: &str) -> usize {
        self.idle
            .lock()
            .await
            .get(location)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
