//! Exchange/queue/binding topology (spec §4.1).

use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::FieldTable;
use lapin::{Channel, ExchangeKind};

use crate::error::FabricError;

pub const EX_BRIDGE_INPUT: &str = "ex.bridge.input";
pub const EX_BRIDGE_OUTPUT: &str = "ex.bridge.output";
pub const EX_BRIDGE_RESULT: &str = "ex.bridge.result";
pub const EX_SIM_RESULT: &str = "ex.sim.result";

pub const Q_BRIDGE_INPUT: &str = "Q.bridge.input";
pub const Q_BRIDGE_RESULT: &str = "Q.bridge.result";

pub fn sim_queue_name(simulator_id: &str) -> String {
    format!("Q.sim.{simulator_id}")
}

/// Declare the four topic exchanges, the bridge-owned queues, one
/// per-simulator queue for each id in `simulator_ids`, and the bindings
/// between them, all durable.
///
/// A declare failing because an entity already exists with incompatible
/// arguments surfaces as [`FabricError::TopologyConflict`] — the caller
/// treats this as a fatal startup configuration error (spec §4.1).
pub async fn declare_topology(channel: &Channel, simulator_ids: &[String]) -> Result<(), FabricError> {
    for exchange in [EX_BRIDGE_INPUT, EX_BRIDGE_OUTPUT, EX_BRIDGE_RESULT, EX_SIM_RESULT] {
        declare_exchange(channel, exchange).await?;
    }

    declare_queue(channel, Q_BRIDGE_INPUT).await?;
    declare_queue(channel, Q_BRIDGE_RESULT).await?;
    bind_queue(channel, Q_BRIDGE_INPUT, EX_BRIDGE_INPUT, "*").await?;
    bind_queue(channel, Q_BRIDGE_RESULT, EX_BRIDGE_RESULT, "*.result").await?;
    bind_queue(channel, Q_BRIDGE_RESULT, EX_SIM_RESULT, "*.result.*").await?;

    for simulator_id in simulator_ids {
        let queue = sim_queue_name(simulator_id);
        declare_queue(channel, &queue).await?;
        bind_queue(channel, &queue, EX_BRIDGE_OUTPUT, &format!("*.{simulator_id}")).await?;
    }

    Ok(())
}

async fn declare_exchange(channel: &Channel, name: &str) -> Result<(), FabricError> {
    channel
        .exchange_declare(
            name,
            ExchangeKind::Topic,
            ExchangeDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(|source| FabricError::TopologyConflict { entity: name.to_string(), source })
}

async fn declare_queue(channel: &Channel, name: &str) -> Result<(), FabricError> {
    channel
        .queue_declare(
            name,
            QueueDeclareOptions { durable: true, ..Default::default() },
            FieldTable::default(),
        )
        .await
        .map_err(|source| FabricError::TopologyConflict { entity: name.to_string(), source })?;
    Ok(())
}

async fn bind_queue(channel: &Channel, queue: &str, exchange: &str, routing_key: &str) -> Result<(), FabricError> {
    channel
        .queue_bind(queue, exchange, routing_key, QueueBindOptions::default(), FieldTable::default())
        .await
        .map_err(|source| FabricError::TopologyConflict { entity: format!("{queue}<-{exchange}"), source })
}

/// Routing-key construction per the dot-separated convention (spec §4.1).
pub mod routing_key {
    pub fn client_inbound(client_id: &str) -> String {
        client_id.to_string()
    }

    pub fn bridge_to_simulator(client_id: &str, simulator_id: &str) -> String {
        format!("{client_id}.{simulator_id}")
    }

    pub fn simulator_result(simulator_id: &str, client_id: &str) -> String {
        format!("{simulator_id}.result.{client_id}")
    }

    /// Key the bridge core republishes an `internal`-origin result under
    /// on `ex.bridge.result` itself (spec §4.6) — distinct from
    /// [`simulator_result`], which is the key the simulator agent's own
    /// publish onto `ex.sim.result` carries and is already the delivery
    /// an internal-protocol client observes (spec §8 scenario S1).
    pub fn simulator_result_broadcast(simulator_id: &str) -> String {
        format!("{simulator_id}.result")
    }
}

#[cfg(test)]
mod tests {
    use super::routing_key;

    #[test]
    fn client_inbound_is_the_bare_client_id() {
        assert_eq!(routing_key::client_inbound("dt"), "dt");
    }

    #[test]
    fn bridge_to_simulator_joins_client_and_simulator() {
        assert_eq!(routing_key::bridge_to_simulator("dt", "sim1"), "dt.sim1");
    }

    #[test]
    fn simulator_result_places_result_segment_in_the_middle() {
        assert_eq!(routing_key::simulator_result("sim1", "dt"), "sim1.result.dt");
    }

    #[test]
    fn simulator_result_broadcast_has_no_client_segment() {
        assert_eq!(routing_key::simulator_result_broadcast("sim1"), "sim1.result");
    }

    #[test]
    fn sim_queue_name_is_namespaced() {
        assert_eq!(super::sim_queue_name("sim1"), "Q.sim.sim1");
    }
}
