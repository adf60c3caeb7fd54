//! Fabric-level errors.

/// Errors raised by the routing fabric.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("failed to connect after {attempts} attempts: {source}")]
    ConnectExhausted { attempts: u32, #[source] source: lapin::Error },
    #[error("topology declare failed for '{entity}': {source}")]
    TopologyConflict { entity: String, #[source] source: lapin::Error },
    /// Raised for operations attempted while the connection is down; the
    /// caller may retry once reconnection completes (spec §4.1).
    #[error("fabric connection unavailable, operation is retriable: {0}")]
    Retriable(String),
}
