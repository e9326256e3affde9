//! Crate-wide error glue.
//!
//! Each subsystem (`dht`, `metadata`, `store`) defines its own `Error` type at the
//! granularity the teacher's `databases::error::Error` does — one variant per failure
//! mode, `thiserror`-derived, with `From` impls at driver boundaries. This module only
//! aggregates the errors that can legitimately stop the process (§7: "Programmer-invariant
//! violations... abort the process" and "Store-integrity... fatal at startup").
use crate::store;

/// Errors that abort process startup. Never constructed for steady-state operation —
/// transient and malformed-input errors are logged and dropped at their origin per §7.
#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("database error: {0}")]
    Store(#[from] store::Error),

    #[error("failed to bind DHT indexer socket on {addr}: {source}")]
    DhtBind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },
}
