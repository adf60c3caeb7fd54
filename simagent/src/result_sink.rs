//! Result delivery abstraction (spec §4.6/§4.8): the agent's counterpart
//! to `rabbitmq_manager.py`'s `send_result` — publishes a response
//! envelope under `<agent_id>.result.<destination>` on `ex.sim.result`.
//! A trait so the batch/streaming executors can be tested without a real
//! broker connection.

use async_trait::async_trait;
use simbridge_fabric::{routing_key, topology, RoutingFabric};
use simbridge_types::ResponseEnvelope;
use std::sync::Arc;
use tracing::error;

#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Publishes `response` addressed to `destination`, returning whether
    /// delivery succeeded (spec's `send_result` boolean contract, used to
    /// decide whether to record `result_sent` in the performance monitor).
    async fn send_result(&self, destination: &str, response: &ResponseEnvelope) -> bool;
}

pub struct FabricResultSink {
    fabric: Arc<RoutingFabric>,
    agent_id: String,
}

impl FabricResultSink {
    pub fn new(fabric: Arc<RoutingFabric>, agent_id: String) -> Self {
        FabricResultSink { fabric, agent_id }
    }
}

#[async_trait]
impl ResultSink for FabricResultSink {
    async fn send_result(&self, destination: &str, response: &ResponseEnvelope) -> bool {
        let key = routing_key::simulator_result(&self.agent_id, destination);
        let body = match serde_yaml::to_vec(response) {
            Ok(body) => body,
            Err(err) => {
                error!(error = %err, "failed to encode result envelope");
                return false;
            }
        };
        match self.fabric.publish(topology::EX_SIM_RESULT, &key, &body).await {
            Ok(()) => true,
            Err(err) => {
                error!(error = %err, destination, "failed to publish result");
                false
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every envelope handed to it; used by `batch`/`streaming`
    /// unit tests in place of a live broker connection.
    #[derive(Default)]
    pub struct RecordingSink {
        pub sent: Mutex<Vec<(String, ResponseEnvelope)>>,
    }

    #[async_trait]
    impl ResultSink for RecordingSink {
        async fn send_result(&self, destination: &str, response: &ResponseEnvelope) -> bool {
            self.sent.lock().unwrap().push((destination.to_string(), response.clone()));
            true
        }
    }
}
