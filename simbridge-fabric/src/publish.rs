//! Outbound publish helper: persistent delivery, YAML body, UUIDv4 message id.

use lapin::options::BasicPublishOptions;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel};

use crate::error::FabricError;

/// Publish `body` (already YAML-encoded) to `exchange` with `routing_key`,
/// persistent delivery mode, `content_type: application/x-yaml`, and a
/// fresh UUIDv4 `message_id` (spec §6 "AMQP wire").
pub async fn publish_yaml(
    channel: &Channel,
    exchange: &str,
    routing_key: &str,
    body: &[u8],
) -> Result<(), FabricError> {
    let properties = BasicProperties::default()
        .with_delivery_mode(2) // persistent
        .with_content_type("application/x-yaml".into())
        .with_message_id(uuid::Uuid::new_v4().to_string().into());

    channel
        .basic_publish(exchange, routing_key, BasicPublishOptions::default(), body, properties)
        .await?
        .await?;
    Ok(())
}
