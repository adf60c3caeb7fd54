//! Wire data model shared by the bridge and the agent (spec §3).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for a simulation request (§3 `type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationType {
    Batch,
    Streaming,
}

impl SimulationType {
    pub fn as_str(self) -> &'static str {
        match self {
            SimulationType::Batch => "batch",
            SimulationType::Streaming => "streaming",
        }
    }
}

/// Opaque bridge-owned metadata carried on every request/response.
///
/// Clients must not set this themselves (§3); the bridge core stamps
/// `protocol` on the way in and every component passes it through
/// unchanged afterwards. Unknown keys round-trip verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BridgeMeta(pub HashMap<String, serde_json::Value>);

impl BridgeMeta {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn protocol(&self) -> Option<&str> {
        self.0.get("protocol").and_then(|v| v.as_str())
    }

    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.0.insert("protocol".to_string(), serde_json::Value::String(protocol.to_string()));
        self
    }

    pub fn set_protocol(&mut self, protocol: &str) {
        self.0.insert("protocol".to_string(), serde_json::Value::String(protocol.to_string()));
    }

    /// Origin `client_id`, stamped by the bridge core alongside `protocol`
    /// so any adapter can route a terminal response back without needing
    /// the rest of the original request in hand.
    pub fn client_id(&self) -> Option<&str> {
        self.0.get("client_id").and_then(|v| v.as_str())
    }

    pub fn simulator(&self) -> Option<&str> {
        self.0.get("simulator").and_then(|v| v.as_str())
    }

    pub fn set_client_id(&mut self, client_id: &str) {
        self.0.insert("client_id".to_string(), serde_json::Value::String(client_id.to_string()));
    }

    pub fn set_simulator(&mut self, simulator: &str) {
        self.0.insert("simulator".to_string(), serde_json::Value::String(simulator.to_string()));
    }
}

/// A single simulation job as it travels from client to simulator (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRequest {
    pub request_id: String,
    pub client_id: String,
    pub simulator: String,
    #[serde(rename = "type")]
    pub kind: SimulationType,
    pub file: String,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub outputs: Option<serde_json::Value>,
    #[serde(default)]
    pub bridge_meta: BridgeMeta,
}

impl SimulationRequest {
    /// Entry-point symbol: `function_name`, defaulting to `file` stripped
    /// of its extension (§3).
    pub fn function_name(&self) -> String {
        self.function_name.clone().unwrap_or_else(|| {
            std::path::Path::new(&self.file)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.file.clone())
        })
    }

    /// Batch output names, if `outputs` was given as a sequence of strings.
    pub fn batch_output_names(&self) -> Vec<String> {
        match &self.outputs {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// The wrapper envelope that wires a request over the outer protocols
/// (§3 "Simulation request" is the inner payload; this is what actually
/// travels on the wire, keyed under `simulation`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub simulation: SimulationRequest,
}

/// `status` discriminator for a response envelope (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Completed,
    InProgress,
    Streaming,
    Error,
    /// Non-terminal frame the HTTP adapter writes immediately on accept.
    Processing,
    /// Terminal frame written when the HTTP idle timeout fires.
    Timeout,
}

/// `simulation.{name,type,outputs}` portion of a response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SimulationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub percentage: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage: Option<f64>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Uniform outbound envelope shape (§3 "Response envelope").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub simulation: SimulationInfo,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "BridgeMeta::is_empty")]
    pub bridge_meta: BridgeMeta,
    pub status: ResponseStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<Progress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ResponseMetadata>,
}

impl ResponseEnvelope {
    /// `true` for the envelopes that end a request's lifecycle (§8 property 3).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ResponseStatus::Completed | ResponseStatus::Error | ResponseStatus::Timeout
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_name_defaults_to_file_stem() {
        let req = SimulationRequest {
            request_id: "r1".into(),
            client_id: "c1".into(),
            simulator: "sim1".into(),
            kind: SimulationType::Batch,
            file: "add.m".into(),
            function_name: None,
            inputs: HashMap::new(),
            outputs: None,
            bridge_meta: BridgeMeta::default(),
        };
        assert_eq!(req.function_name(), "add");
    }

    #[test]
    fn function_name_honors_explicit_override() {
        let mut req_inputs = HashMap::new();
        req_inputs.insert("a".to_string(), serde_json::json!(1));
        let req = SimulationRequest {
            request_id: "r1".into(),
            client_id: "c1".into(),
            simulator: "sim1".into(),
            kind: SimulationType::Streaming,
            file: "walk.m".into(),
            function_name: Some("custom_entry".into()),
            inputs: req_inputs,
            outputs: None,
            bridge_meta: BridgeMeta::default(),
        };
        assert_eq!(req.function_name(), "custom_entry");
    }

    #[test]
    fn bridge_meta_round_trips_unknown_keys() {
        let mut meta = BridgeMeta::default();
        meta.0.insert("protocol".into(), serde_json::json!("http"));
        meta.0.insert("trace_id".into(), serde_json::json!("abc"));
        let json = serde_json::to_string(&meta).unwrap();
        let back: BridgeMeta = serde_json::from_str(&json).unwrap();
        assert_eq!(back.protocol(), Some("http"));
        assert_eq!(back.0.get("trace_id").unwrap(), "abc");
    }

    #[test]
    fn bridge_meta_carries_routing_breadcrumbs() {
        let mut meta = BridgeMeta::default();
        meta.set_protocol("http");
        meta.set_client_id("dt");
        meta.set_simulator("sim1");
        assert_eq!(meta.protocol(), Some("http"));
        assert_eq!(meta.client_id(), Some("dt"));
        assert_eq!(meta.simulator(), Some("sim1"));
    }

    #[test]
    fn response_envelope_terminal_classification() {
        let base = ResponseEnvelope {
            simulation: SimulationInfo {
                name: "add.m".into(),
                kind: SimulationType::Batch,
                outputs: None,
            },
            request_id: "r1".into(),
            bridge_meta: BridgeMeta::default(),
            status: ResponseStatus::InProgress,
            timestamp: Utc::now(),
            data: None,
            progress: None,
            error: None,
            sequence: None,
            metadata: None,
        };
        assert!(!base.is_terminal());
        let mut completed = base.clone();
        completed.status = ResponseStatus::Completed;
        assert!(completed.is_terminal());
    }
}
