//! Adapter interface (spec §4.2) and the common message-normalization
//! logic every inbound adapter shares.

use async_trait::async_trait;
use simbridge_types::{ErrorKind, RequestEnvelope, ResponseEnvelope, SimulationRequest};

use crate::error::AdapterError;

/// Contract every inbound protocol adapter implements.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Block consuming/serving until [`Adapter::stop`] is called. Runs in
    /// its own task.
    async fn start(&self) -> Result<(), AdapterError>;

    /// Graceful shutdown; drains in-flight messages where the transport
    /// allows.
    async fn stop(&self) -> Result<(), AdapterError>;

    /// Send a result back on this adapter's protocol. Returns whether a
    /// listener was still present to receive it.
    async fn deliver(&self, client_id: &str, response: &ResponseEnvelope) -> Result<bool, AdapterError>;
}

/// Parse a raw inbound payload into a [`SimulationRequest`]: YAML
/// preferred, JSON fallback, raw-text last. Non-object payloads (and
/// payloads that parse as neither YAML nor JSON mappings) are rejected —
/// callers turn this into a synthetic error response rather than drop
/// silently (spec §4.2).
pub fn normalize_body(raw: &[u8]) -> Result<SimulationRequest, AdapterError> {
    if let Ok(envelope) = serde_yaml::from_slice::<RequestEnvelope>(raw) {
        return Ok(envelope.simulation);
    }
    if let Ok(envelope) = serde_json::from_slice::<RequestEnvelope>(raw) {
        return Ok(envelope.simulation);
    }

    // Raw-text last: confirm whether the payload at least parses as some
    // structured value, to distinguish "not an object" from "not valid
    // syntax at all" in the error we surface.
    match serde_yaml::from_slice::<serde_yaml::Value>(raw) {
        Ok(serde_yaml::Value::Mapping(_)) => {
            Err(AdapterError::Parse("payload is a mapping but missing required fields".into()))
        }
        Ok(_) => Err(AdapterError::NotAnObject),
        Err(err) => Err(AdapterError::Parse(err.to_string())),
    }
}

/// The [`ErrorKind`] a normalize failure should be reported as.
pub fn normalize_error_kind(err: &AdapterError) -> ErrorKind {
    match err {
        AdapterError::NotAnObject => ErrorKind::ValidationError,
        AdapterError::Parse(_) => ErrorKind::YamlParseError,
        _ => ErrorKind::ExecutionError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_yaml_parsing() {
        let body = b"simulation:\n  request_id: r1\n  client_id: c1\n  simulator: sim1\n  type: batch\n  file: add.m\n";
        let req = normalize_body(body).unwrap();
        assert_eq!(req.request_id, "r1");
    }

    #[test]
    fn falls_back_to_json() {
        let body = br#"{"simulation":{"request_id":"r2","client_id":"c2","simulator":"sim1","type":"streaming","file":"walk.m"}}"#;
        let req = normalize_body(body).unwrap();
        assert_eq!(req.request_id, "r2");
    }

    #[test]
    fn rejects_non_object_payload() {
        let err = normalize_body(b"just some text").unwrap_err();
        assert!(matches!(err, AdapterError::NotAnObject));
    }

    #[test]
    fn rejects_broken_yaml_syntax() {
        let err = normalize_body(b"{ not: yaml").unwrap_err();
        assert_eq!(normalize_error_kind(&err), ErrorKind::YamlParseError);
    }
}
