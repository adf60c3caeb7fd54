//! Internal-broker adapter (spec §4.3): consumes `Q.bridge.input` (client
//! requests) and `Q.bridge.result` (simulator results), emitting
//! normalized signals for the bridge core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use simbridge_fabric::{routing_key, topology, RoutingFabric};
use simbridge_types::ResponseEnvelope;
use tracing::{debug, warn};

use crate::adapter::{normalize_body, Adapter};
use crate::error::AdapterError;
use crate::signal::{Signal, SignalSender};

/// Caps the number of unacknowledged messages per consumer channel (spec
/// §4.3 "Prefetch defaults to 1 to cap per-consumer in-flight work").
const PREFETCH: u16 = 1;

pub struct InternalBrokerAdapter {
    fabric: Arc<RoutingFabric>,
    signal_tx: SignalSender,
    running: Arc<AtomicBool>,
}

impl InternalBrokerAdapter {
    pub fn new(fabric: Arc<RoutingFabric>, signal_tx: SignalSender) -> Self {
        InternalBrokerAdapter { fabric, signal_tx, running: Arc::new(AtomicBool::new(false)) }
    }

    async fn consume_input_queue(&self) -> Result<(), AdapterError> {
        let channel = self.fabric.new_channel().await?;
        channel.basic_qos(PREFETCH, BasicQosOptions::default()).await?;
        let mut consumer = channel
            .basic_consume(
                topology::Q_BRIDGE_INPUT,
                "simbridge-input",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        while self.running.load(Ordering::SeqCst) {
            let Some(delivery) = consumer.next().await else { break };
            let delivery = delivery?;
            match normalize_body(&delivery.data) {
                Ok(request) => {
                    delivery.ack(BasicAckOptions::default()).await?;
                    if self.signal_tx.send(Signal::InputInternal(request)).await.is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "failed to normalize message on Q.bridge.input");
                    delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await?;
                }
            }
        }
        Ok(())
    }

    async fn consume_result_queue(&self) -> Result<(), AdapterError> {
        let channel = self.fabric.new_channel().await?;
        channel.basic_qos(PREFETCH, BasicQosOptions::default()).await?;
        let mut consumer = channel
            .basic_consume(
                topology::Q_BRIDGE_RESULT,
                "simbridge-result",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        while self.running.load(Ordering::SeqCst) {
            let Some(delivery) = consumer.next().await else { break };
            let delivery = delivery?;
            let parsed = serde_yaml::from_slice::<ResponseEnvelope>(&delivery.data)
                .ok()
                .or_else(|| serde_json::from_slice::<ResponseEnvelope>(&delivery.data).ok());
            match parsed {
                Some(envelope) => {
                    delivery.ack(BasicAckOptions::default()).await?;
                    if self.signal_tx.send(Signal::ResultInternal(envelope)).await.is_err() {
                        break;
                    }
                }
                None => {
                    debug!("unparseable message on Q.bridge.result, surfacing as other_internal");
                    delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await?;
                    let _ = self.signal_tx.send(Signal::OtherInternal(delivery.data.clone())).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for InternalBrokerAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        self.running.store(true, Ordering::SeqCst);
        let input = self.consume_input_queue();
        let result = self.consume_result_queue();
        let (input_res, result_res) = tokio::join!(input, result);
        input_res?;
        result_res?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// For internal-protocol clients the simulator's own publish onto
    /// `ex.sim.result` (bridged into `Q.bridge.result`) already carries
    /// the client-targeted copy (spec §8 scenario S1); this republishes
    /// the simulator-scoped broadcast copy named in spec §4.6's dispatch
    /// table, under `<simulator>.result` with no client segment.
    async fn deliver(&self, _client_id: &str, response: &ResponseEnvelope) -> Result<bool, AdapterError> {
        let simulator = response.bridge_meta.simulator().unwrap_or("unknown");
        let key = routing_key::simulator_result_broadcast(simulator);
        let body = serde_yaml::to_string(response)
            .map_err(|e| AdapterError::Parse(format!("failed to encode response: {e}")))?;
        self.fabric.publish(topology::EX_BRIDGE_RESULT, &key, body.as_bytes()).await?;
        Ok(true)
    }
}
