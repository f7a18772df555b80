//! Client facade for Flight SQL servers.
//!
//! [`FlightSqlClient`] packs typed command envelopes, issues the generic
//! Flight calls, and reads result streams back as record batches.
//! [`PreparedStatement`] spans the create / bind / execute / close
//! lifecycle, and [`ConnectionPool`] keeps per-location transport
//! connections for multi-endpoint results.

mod client;
mod error;
mod pool;
mod prepared;

pub use client::FlightSqlClient;
pub use error::ClientError;
pub use pool::{ConnectionPool, PoolConfig};
pub use prepared::PreparedStatement;
