//! Bridge core (C6, spec §4.6): tags each inbound signal with its origin
//! protocol and forwards it to the simulator via the internal broker; on
//! result signals, dispatches back to the adapter matching the origin tag.

use std::sync::Arc;

use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel, Connection};
use simbridge_adapters::{Adapter, HttpStreamingAdapter, InternalBrokerAdapter, PubSubAdapter, Signal, SignalReceiver};
use simbridge_fabric::{routing_key, topology, BrokerEndpoint};
use simbridge_types::ResponseEnvelope;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Owns its own broker connection, distinct from the routing fabric's
/// (spec §4.6): the connection is checked before each publish and
/// re-established on close, independent of the adapters' own fabric handle.
pub struct BridgeCore {
    endpoint: BrokerEndpoint,
    connection: Connection,
    channel: Channel,
    internal: Arc<InternalBrokerAdapter>,
    pubsub: Arc<PubSubAdapter>,
    http: Arc<HttpStreamingAdapter>,
}

impl BridgeCore {
    pub async fn connect(
        endpoint: BrokerEndpoint,
        internal: Arc<InternalBrokerAdapter>,
        pubsub: Arc<PubSubAdapter>,
        http: Arc<HttpStreamingAdapter>,
    ) -> Result<Self, simbridge_fabric::FabricError> {
        let connection = simbridge_fabric::connect_with_backoff(&endpoint).await?;
        let channel = connection.create_channel().await?;
        Ok(BridgeCore { endpoint, connection, channel, internal, pubsub, http })
    }

    async fn ensure_connected(&mut self) -> Result<(), simbridge_fabric::FabricError> {
        if !self.connection.status().connected() {
            warn!("bridge core connection closed, re-establishing");
            self.connection = simbridge_fabric::connect_with_backoff(&self.endpoint).await?;
            self.channel = self.connection.create_channel().await?;
        }
        Ok(())
    }

    async fn publish_with_retry(&mut self, exchange: &str, key: &str, body: &[u8]) {
        for attempt in 0..2 {
            if let Err(err) = self.ensure_connected().await {
                error!(error = %err, attempt, "bridge core failed to re-establish broker connection");
                continue;
            }
            let properties = BasicProperties::default()
                .with_delivery_mode(2)
                .with_content_type("application/x-yaml".into())
                .with_message_id(Uuid::new_v4().to_string().into());
            match self.channel.basic_publish(exchange, key, BasicPublishOptions::default(), body, properties).await {
                Ok(pending) => match pending.await {
                    Ok(_) => return,
                    Err(err) => warn!(error = %err, attempt, exchange, key, "bridge core publish confirm failed"),
                },
                Err(err) => warn!(error = %err, attempt, exchange, key, "bridge core publish failed"),
            }
        }
        error!(exchange, key, "bridge core publish failed after reconnect retry, dropping message");
    }

    /// Tags an inbound request with its origin protocol and forwards it to
    /// the simulator via `ex.bridge.output` (spec §4.6 input-signal rule).
    async fn route_input(&mut self, mut request: simbridge_types::SimulationRequest, protocol: &str) {
        request.bridge_meta.set_protocol(protocol);
        request.bridge_meta.set_client_id(&request.client_id);
        request.bridge_meta.set_simulator(&request.simulator);

        let envelope = simbridge_types::RequestEnvelope { simulation: request };
        let key = routing_key::bridge_to_simulator(&envelope.simulation.client_id, &envelope.simulation.simulator);
        let body = match serde_yaml::to_vec(&envelope) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "failed to encode outbound request");
                return;
            }
        };
        self.publish_with_retry(topology::EX_BRIDGE_OUTPUT, &key, &body).await;
    }

    /// Dispatches a terminal or progress result to the adapter matching
    /// its `bridge_meta.protocol` tag (spec §4.6 result-signal rule).
    async fn dispatch_result(&self, response: ResponseEnvelope) {
        let client_id = response.bridge_meta.client_id().unwrap_or_default().to_string();
        match response.bridge_meta.protocol() {
            Some("internal") => {
                if let Err(err) = self.internal.deliver(&client_id, &response).await {
                    error!(error = %err, "internal adapter failed to deliver result");
                }
            }
            Some("pubsub") => {
                if let Err(err) = self.pubsub.deliver(&client_id, &response).await {
                    error!(error = %err, "pub-sub adapter failed to deliver result");
                }
            }
            Some("http") => match self.http.deliver(&client_id, &response).await {
                Ok(false) => warn!(client_id = %client_id, "no open http stream for result"),
                Err(err) => error!(error = %err, "http adapter failed to deliver result"),
                Ok(true) => {}
            },
            other => warn!(protocol = ?other, "result carries unknown or missing protocol tag, dropping"),
        }
    }

    /// Drives the core's main loop until `signals` closes or `shutdown` fires.
    pub async fn run(mut self, mut signals: SignalReceiver, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        info!("bridge core started");
        loop {
            tokio::select! {
                signal = signals.recv() => {
                    let Some(signal) = signal else { break };
                    match signal {
                        Signal::InputInternal(request) => self.route_input(request, "internal").await,
                        Signal::InputPubsub(request) => self.route_input(request, "pubsub").await,
                        Signal::InputHttp(request) => self.route_input(request, "http").await,
                        Signal::ResultInternal(response) => self.dispatch_result(response).await,
                        Signal::OtherInternal(_) => {}
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        info!("bridge core stopped");
    }
}
