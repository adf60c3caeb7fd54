//! Routing fabric: AMQP 0-9-1 exchange/queue/binding topology and the
//! reconnect policy that keeps the bridge connected to the internal
//! broker (spec §4.1).

pub mod connection;
pub mod error;
pub mod publish;
pub mod topology;

pub use connection::{connect_with_backoff, BrokerEndpoint};
pub use error::FabricError;
pub use publish::publish_yaml;
pub use topology::{declare_topology, routing_key, sim_queue_name};

use lapin::{Channel, Connection};

/// A live connection to the internal broker plus its default channel,
/// ready for topology declaration, publishing, and consumer setup.
pub struct RoutingFabric {
    connection: Connection,
    channel: Channel,
}

impl RoutingFabric {
    /// Connect (with backoff) and open a channel.
    pub async fn connect(endpoint: &BrokerEndpoint) -> Result<Self, FabricError> {
        let connection = connect_with_backoff(endpoint).await?;
        let channel = connection.create_channel().await?;
        Ok(RoutingFabric { connection, channel })
    }

    /// Declare the full exchange/queue/binding topology for the given set
    /// of known simulator ids.
    pub async fn declare_topology(&self, simulator_ids: &[String]) -> Result<(), FabricError> {
        declare_topology(&self.channel, simulator_ids).await
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Open a fresh channel on the same connection (one channel per
    /// consumed queue, per spec §4.3's "one goroutine-equivalent per
    /// consumed queue" concurrency model).
    pub async fn new_channel(&self) -> Result<Channel, FabricError> {
        Ok(self.connection.create_channel().await?)
    }

    pub async fn publish(&self, exchange: &str, routing_key: &str, body: &[u8]) -> Result<(), FabricError> {
        publish_yaml(&self.channel, exchange, routing_key, body).await
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}
