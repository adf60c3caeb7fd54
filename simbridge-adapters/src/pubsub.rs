//! Pub-sub adapter (spec §4.4): subscribes to an input topic, publishes
//! results onto an output topic. Reconnection on transport errors follows
//! the poll/pause/continue shape common to `rumqttc`-based clients — the
//! broker connection itself auto-reconnects, the adapter just has to keep
//! calling `poll()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use simbridge_types::ResponseEnvelope;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::adapter::{normalize_body, Adapter};
use crate::error::AdapterError;
use crate::signal::{Signal, SignalSender};

#[derive(Debug, Clone)]
pub struct PubSubConfig {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    pub input_topic: String,
    pub output_topic: String,
    pub qos: u8,
}

impl PubSubConfig {
    fn qos(&self) -> QoS {
        match self.qos {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut opts = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        opts.set_keep_alive(Duration::from_secs(self.keepalive_secs));
        opts
    }
}

pub struct PubSubAdapter {
    config: PubSubConfig,
    client: AsyncClient,
    event_loop: Mutex<Option<rumqttc::EventLoop>>,
    signal_tx: SignalSender,
    running: Arc<AtomicBool>,
}

impl PubSubAdapter {
    /// Capacity of the internal client->eventloop request queue.
    const QUEUE_CAPACITY: usize = 64;

    pub fn new(config: PubSubConfig, signal_tx: SignalSender) -> Self {
        let (client, event_loop) = AsyncClient::new(config.mqtt_options(), Self::QUEUE_CAPACITY);
        PubSubAdapter {
            config,
            client,
            event_loop: Mutex::new(Some(event_loop)),
            signal_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    async fn do_pause() {
        sleep(Duration::from_secs(1)).await;
    }
}

#[async_trait]
impl Adapter for PubSubAdapter {
    async fn start(&self) -> Result<(), AdapterError> {
        self.running.store(true, Ordering::SeqCst);
        let Some(mut event_loop) = self.event_loop.lock().await.take() else {
            return Err(AdapterError::Mqtt("adapter already started".into()));
        };

        self.client
            .subscribe(&self.config.input_topic, self.config.qos())
            .await
            .map_err(|e| AdapterError::Mqtt(e.to_string()))?;

        while self.running.load(Ordering::SeqCst) {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    match normalize_body(&msg.payload) {
                        Ok(mut request) => {
                            request.bridge_meta.set_protocol("pubsub");
                            if self.signal_tx.send(Signal::InputPubsub(request)).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => warn!(error = %err, "failed to normalize message on pub-sub input topic"),
                    }
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!(topic = %self.config.input_topic, "pub-sub adapter connected");
                }
                Err(err) => {
                    error!(error = %err, "pub-sub connection error");
                    Self::do_pause().await;
                }
                _ => {}
            }
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), AdapterError> {
        self.running.store(false, Ordering::SeqCst);
        self.client.disconnect().await.map_err(|e| AdapterError::Mqtt(e.to_string()))
    }

    async fn deliver(&self, _client_id: &str, response: &ResponseEnvelope) -> Result<bool, AdapterError> {
        let payload = serde_json::to_vec(response)
            .map_err(|e| AdapterError::Parse(format!("failed to encode response: {e}")))?;
        self.client
            .publish(&self.config.output_topic, self.config.qos(), false, payload)
            .await
            .map_err(|e| AdapterError::Mqtt(e.to_string()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qos_maps_numeric_levels() {
        let mut config = sample_config();
        config.qos = 0;
        assert_eq!(config.qos(), QoS::AtMostOnce);
        config.qos = 1;
        assert_eq!(config.qos(), QoS::AtLeastOnce);
        config.qos = 2;
        assert_eq!(config.qos(), QoS::ExactlyOnce);
    }

    fn sample_config() -> PubSubConfig {
        PubSubConfig {
            client_id: "bridge".into(),
            host: "localhost".into(),
            port: 1883,
            keepalive_secs: 30,
            input_topic: "bridge/input".into(),
            output_topic: "bridge/output".into(),
            qos: 0,
        }
    }
}
