//! Response builder (C10, spec §4.10): shared templating that constructs
//! success/error/progress/streaming responses with consistent envelope
//! fields. Grounded on `create_response.py`: a pure function keyed by
//! `template_type`, fed optional fields through a config-gated template.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;
use simbridge_types::{
    BridgeMeta, ErrorInfo, ErrorKind, Progress, ResponseEnvelope, ResponseMetadata, ResponseStatus,
    SimulationInfo, SimulationType,
};

use crate::config::ResponseTemplatesConfig;

/// Which shape of response to build; selects which optional fields are
/// populated and which `status` string is used (spec §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    Success,
    Error,
    Progress,
    Streaming,
}

/// Extra, per-call fields threaded into [`build`]. Absent optional fields
/// are simply left `None` and omitted from the envelope, matching the
/// Python template's `**kwargs` handling.
#[derive(Debug, Clone, Default)]
pub struct ResponseFields {
    pub outputs: Option<Value>,
    pub data: Option<Value>,
    pub percentage: Option<f32>,
    pub message: Option<String>,
    pub error: Option<ErrorDetails>,
    pub metadata: Option<ResponseMetadata>,
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ErrorDetails {
    pub message: String,
    pub kind: ErrorKind,
    pub details: Option<Value>,
    pub traceback: Option<String>,
}

/// Build one response envelope (spec §4.10). `sim_file`/`sim_type` become
/// `simulation.{name,type}`; `request_id`/`bridge_meta` are copied through
/// unchanged per the routing-identity invariant (spec §3, §8 property 1).
pub fn build(
    template_type: TemplateType,
    sim_file: &str,
    sim_type: SimulationType,
    templates: &ResponseTemplatesConfig,
    request_id: &str,
    bridge_meta: BridgeMeta,
    fields: ResponseFields,
) -> ResponseEnvelope {
    let status = match template_type {
        TemplateType::Success => ResponseStatus::Completed,
        TemplateType::Error => ResponseStatus::Error,
        TemplateType::Progress => ResponseStatus::InProgress,
        TemplateType::Streaming => ResponseStatus::Streaming,
    };

    let outputs = match template_type {
        TemplateType::Success if sim_type == SimulationType::Batch => fields.outputs.clone(),
        TemplateType::Success => fields.data.clone().or(Some(Value::Object(Default::default()))),
        _ => None,
    };

    let metadata = if templates.include_metadata(template_type) { fields.metadata.clone() } else { None };

    let progress = if template_type == TemplateType::Progress {
        build_progress(templates, &fields)
    } else {
        None
    };

    let data = match template_type {
        TemplateType::Streaming => fields.data.clone(),
        TemplateType::Progress => fields.data.clone().filter(|v| !is_empty_object(v)),
        _ => None,
    };

    let error = if template_type == TemplateType::Error { fields.error.as_ref().map(|e| build_error(templates, e)) } else { None };

    ResponseEnvelope {
        simulation: SimulationInfo { name: sim_file.to_string(), kind: sim_type, outputs },
        request_id: request_id.to_string(),
        bridge_meta,
        status,
        timestamp: Utc::now(),
        data,
        progress,
        error,
        sequence: fields.sequence,
        metadata,
    }
}

fn is_empty_object(v: &Value) -> bool {
    matches!(v, Value::Object(m) if m.is_empty())
}

fn build_progress(templates: &ResponseTemplatesConfig, fields: &ResponseFields) -> Option<Progress> {
    if !templates.progress.include_percentage {
        return None;
    }
    let percentage = fields.percentage?;
    Some(Progress { percentage, message: fields.message.clone() })
}

fn build_error(templates: &ResponseTemplatesConfig, error: &ErrorDetails) -> ErrorInfo {
    let code = templates.error.error_codes.get(error.kind.as_str()).copied().unwrap_or_else(|| error.kind.default_code());
    let details = if templates.error.include_stacktrace {
        match (&error.details, &error.traceback) {
            (Some(details), _) => Some(details.clone()),
            (None, Some(tb)) => Some(Value::String(tb.clone())),
            (None, None) => None,
        }
    } else {
        error.details.clone()
    };
    ErrorInfo { message: error.message.clone(), kind: error.kind.as_str().to_string(), code: Some(code), details }
}

/// Table-driven error-code lookup plus the per-template include flags
/// (spec §4.10 "Error-code mapping is table-driven from configuration").
#[derive(Debug, Clone, Default)]
pub struct SuccessTemplateConfig {
    pub include_metadata: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ErrorTemplateConfig {
    pub include_stacktrace: bool,
    pub error_codes: HashMap<String, u32>,
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTemplateConfig {
    pub include_percentage: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StreamingTemplateConfig {
    pub include_metadata: bool,
}

impl ResponseTemplatesConfig {
    fn include_metadata(&self, template_type: TemplateType) -> bool {
        match template_type {
            TemplateType::Success => self.success.include_metadata,
            TemplateType::Streaming => self.streaming.include_metadata,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simbridge_types::ErrorKind;

    fn templates() -> ResponseTemplatesConfig {
        let mut error_codes = HashMap::new();
        error_codes.insert("missing_file".to_string(), 404);
        ResponseTemplatesConfig {
            success: SuccessTemplateConfig { include_metadata: true },
            error: ErrorTemplateConfig { include_stacktrace: false, error_codes },
            progress: ProgressTemplateConfig { include_percentage: true },
            streaming: StreamingTemplateConfig { include_metadata: true },
        }
    }

    #[test]
    fn batch_success_populates_outputs() {
        let env = build(
            TemplateType::Success,
            "add.m",
            SimulationType::Batch,
            &templates(),
            "r1",
            BridgeMeta::default(),
            ResponseFields { outputs: Some(serde_json::json!({"sum": 5.0})), ..Default::default() },
        );
        assert_eq!(env.status, ResponseStatus::Completed);
        assert_eq!(env.simulation.outputs, Some(serde_json::json!({"sum": 5.0})));
    }

    #[test]
    fn error_response_maps_code_from_table() {
        let env = build(
            TemplateType::Error,
            "nosuch.m",
            SimulationType::Batch,
            &templates(),
            "r1",
            BridgeMeta::default(),
            ResponseFields {
                error: Some(ErrorDetails {
                    message: "not found".into(),
                    kind: ErrorKind::MissingFile,
                    details: None,
                    traceback: None,
                }),
                ..Default::default()
            },
        );
        let error = env.error.unwrap();
        assert_eq!(error.code, Some(404));
        assert_eq!(error.kind, "missing_file");
    }

    #[test]
    fn progress_omitted_when_percentage_disabled() {
        let mut cfg = templates();
        cfg.progress.include_percentage = false;
        let env = build(
            TemplateType::Progress,
            "add.m",
            SimulationType::Batch,
            &cfg,
            "r1",
            BridgeMeta::default(),
            ResponseFields { percentage: Some(50.0), ..Default::default() },
        );
        assert!(env.progress.is_none());
    }

    #[test]
    fn streaming_response_carries_sequence_and_data() {
        let env = build(
            TemplateType::Streaming,
            "walk.m",
            SimulationType::Streaming,
            &templates(),
            "r2",
            BridgeMeta::default(),
            ResponseFields { data: Some(serde_json::json!({"t": 1})), sequence: Some(0), ..Default::default() },
        );
        assert_eq!(env.sequence, Some(0));
        assert_eq!(env.data, Some(serde_json::json!({"t": 1})));
    }
}
