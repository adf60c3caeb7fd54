//! Inbound message handler (C7, spec §4.7): consumes this agent's
//! per-simulator queue, validates and dispatches each request to the
//! batch or streaming executor. Grounded on `rabbitmq_manager.py`'s
//! consumer setup (durable queue, prefetch 1) and `agent.py`'s dispatch
//! onto `handle_batch_simulation`/`handle_streaming_simulation`.

use std::sync::Arc;

use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions};
use lapin::types::FieldTable;
use simbridge_fabric::{topology, RoutingFabric};
use simbridge_types::{BridgeMeta, ErrorKind, RequestEnvelope, SimulationRequest, SimulationType};
use tracing::{info, warn};

use crate::batch;
use crate::config::AgentSettings;
use crate::performance::PerformanceMonitor;
use crate::response::{self, ErrorDetails, ResponseFields, TemplateType};
use crate::result_sink::ResultSink;
use crate::streaming;

const PREFETCH: u16 = 1;

/// Consumes `Q.sim.<agent_id>` until the channel closes. A message that
/// fails to parse or names an unsupported `type` is NACKed without
/// requeue (spec §4.7 "malformed requests are not retried"). Batch
/// requests are acknowledged only after `batch::handle` returns (spec
/// §4.7 step 4: "ACK on acceptance for batch, after synchronous
/// completion") so a crash mid-`invoke` leaves the message unacked and
/// redeliverable; streaming requests are acknowledged immediately and run
/// to completion in their own task, so one long-running stream doesn't
/// block consumption of the next request (spec §4.9).
pub async fn run(
    fabric: &RoutingFabric,
    settings: Arc<AgentSettings>,
    performance: Arc<PerformanceMonitor>,
    sink: Arc<dyn ResultSink>,
) -> Result<(), simbridge_fabric::FabricError> {
    let channel = fabric.new_channel().await?;
    channel.basic_qos(PREFETCH, BasicQosOptions::default()).await?;

    let queue = topology::sim_queue_name(&settings.agent_id);
    let mut consumer = channel
        .basic_consume(&queue, "simagent", BasicConsumeOptions::default(), FieldTable::default())
        .await?;

    info!(queue = %queue, "listening for simulation requests");

    while let Some(delivery) = consumer.next().await {
        let delivery = delivery?;
        match parse_request(&delivery.data) {
            Ok(request) => {
                let destination = request.client_id.clone();
                match request.kind {
                    SimulationType::Batch => {
                        batch::handle(&request, &destination, &settings, &performance, sink.as_ref()).await;
                        delivery.ack(BasicAckOptions::default()).await?;
                    }
                    SimulationType::Streaming => {
                        delivery.ack(BasicAckOptions::default()).await?;
                        let settings = settings.clone();
                        let performance = performance.clone();
                        let sink = sink.clone();
                        tokio::spawn(async move {
                            streaming::handle(&request, &destination, &settings, &performance, sink.as_ref()).await;
                        });
                    }
                }
            }
            Err((kind, err)) => {
                warn!(error = %err, kind = kind.as_str(), "failed to parse simulation request");
                // Routing key's leading segment is the originating client_id
                // (spec §4.7 step 2); used here purely to route the error
                // response back, same as `source` in `message_handler.py`.
                let destination = delivery.routing_key.as_str().split('.').next().unwrap_or_default();
                let envelope = response::build(
                    TemplateType::Error,
                    "",
                    SimulationType::Batch,
                    &settings.response_templates,
                    "",
                    BridgeMeta::default(),
                    ResponseFields {
                        error: Some(ErrorDetails { message: err, kind, details: None, traceback: None }),
                        ..Default::default()
                    },
                );
                sink.send_result(destination, &envelope).await;
                delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await?;
            }
        }
    }

    Ok(())
}

/// Parses a raw delivery body into a [`SimulationRequest`]: YAML
/// preferred, JSON fallback (spec §4.2's wire-format convention, mirrored
/// here since the agent does not depend on the adapters crate). Distinguishes
/// `yaml_parse_error` (body parses as neither YAML nor JSON at all) from
/// `validation_error` (parses as a mapping but doesn't match the expected
/// shape, e.g. an unsupported `type`) per spec §4.7 step 1/5 and §7.
fn parse_request(raw: &[u8]) -> Result<SimulationRequest, (ErrorKind, String)> {
    if let Ok(envelope) = serde_yaml::from_slice::<RequestEnvelope>(raw) {
        return Ok(envelope.simulation);
    }
    if let Ok(envelope) = serde_json::from_slice::<RequestEnvelope>(raw) {
        return Ok(envelope.simulation);
    }
    match serde_yaml::from_slice::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Mapping(_)) => Err((
            ErrorKind::ValidationError,
            "payload is a mapping but does not match the expected simulation request shape".to_string(),
        )),
        Ok(_) => Err((ErrorKind::ValidationError, "payload is not an object".to_string())),
        Err(err) => Err((ErrorKind::YamlParseError, err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_yaml_batch_request() {
        let body = b"simulation:\n  request_id: r1\n  client_id: dt\n  simulator: sim1\n  type: batch\n  file: add.m\n  outputs: [sum]\n";
        let req = parse_request(body).unwrap();
        assert_eq!(req.request_id, "r1");
        assert_eq!(req.kind, SimulationType::Batch);
    }

    #[test]
    fn parses_json_streaming_request() {
        let body = br#"{"simulation":{"request_id":"r2","client_id":"pt","simulator":"sim1","type":"streaming","file":"walk.m"}}"#;
        let req = parse_request(body).unwrap();
        assert_eq!(req.kind, SimulationType::Streaming);
    }

    #[test]
    fn rejects_unknown_type_as_validation_error() {
        let body = b"simulation:\n  request_id: r3\n  client_id: dt\n  simulator: sim1\n  type: bogus\n  file: add.m\n";
        let (kind, _) = parse_request(body).unwrap_err();
        assert_eq!(kind, ErrorKind::ValidationError);
    }

    #[test]
    fn rejects_garbage_payload_as_yaml_parse_error() {
        let (kind, _) = parse_request(b"{ not: yaml").unwrap_err();
        assert_eq!(kind, ErrorKind::YamlParseError);
    }
}
