//! Batch executor (C8, spec §4.8): starts a compute session, marshals
//! inputs, invokes the function, marshals outputs, emits
//! success/progress/error responses, tears down. Grounded on
//! `batch.py`'s `handle_batch_simulation`.

use simbridge_types::marshal::{from_compute, marshal_inputs};
use simbridge_types::{ErrorKind, SimulationRequest, SimulationType};
use tracing::{error, info, warn};

use crate::compute::ComputeSession;
use crate::config::{AgentSettings, MATLAB_START_BACKOFF, MAX_MATLAB_START_RETRIES};
use crate::performance::PerformanceMonitor;
use crate::response::{self, ErrorDetails, ResponseFields, TemplateType};
use crate::result_sink::ResultSink;

/// Runs one batch request end to end: publishes progress updates as they
/// occur and a single terminal success/error response, mirroring
/// `batch.py`'s `_send_progress`/`create_response` calls. Never panics or
/// propagates: every exceptional condition becomes an error response
/// (spec §7 propagation policy) and teardown runs on every exit path
/// (spec §4.8, §9).
pub async fn handle(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
) {
    performance.start_operation(&request.request_id);
    performance.record_matlab_start();

    let outcome = run(request, destination, settings, performance, sink).await;

    performance.complete_operation();

    if let Err((kind, message)) = outcome {
        error!(request_id = %request.request_id, error = %message, "batch simulation failed");
        let envelope = build_error(request, settings, kind, message);
        if sink.send_result(destination, &envelope).await {
            performance.record_result_sent();
        }
    }
}

async fn run(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
) -> Result<(), (ErrorKind, String)> {
    let outputs = request.batch_output_names();
    if outputs.is_empty() {
        return Err((ErrorKind::InvalidConfig, "no outputs specified in simulation config".to_string()));
    }

    let mut session = ComputeSession::new(&settings.simulation.path, &request.file, &settings.simulation.command)
        .map_err(|e| (e.kind(), e.message()))?;

    performance.record_matlab_startup_complete();
    emit_progress(request, destination, settings, performance, sink, 0.0).await;

    start_with_retry(&mut session).await.map_err(|e| (e.kind(), e.message()))?;

    emit_progress(request, destination, settings, performance, sink, 50.0).await;

    let marshaled_inputs = marshal_inputs(&request.inputs);
    let function_name = request.function_name();
    let invoke_result = session.invoke(&function_name, &marshaled_inputs, outputs.len()).await;

    match invoke_result {
        Ok(values) => {
            performance.record_simulation_complete();
            performance.record_matlab_stop();
            let outputs_map: serde_json::Map<String, serde_json::Value> =
                outputs.iter().cloned().zip(values.iter().map(from_compute)).collect();
            let metadata = if settings.response_templates.success.include_metadata {
                Some(session.metadata(performance.current_memory_mb()))
            } else {
                None
            };
            session.close().await;

            let envelope = response::build(
                TemplateType::Success,
                &request.file,
                SimulationType::Batch,
                &settings.response_templates,
                &request.request_id,
                request.bridge_meta.clone(),
                ResponseFields { outputs: Some(serde_json::Value::Object(outputs_map)), metadata, ..Default::default() },
            );
            if sink.send_result(destination, &envelope).await {
                performance.record_result_sent();
            }
            info!(request_id = %request.request_id, file = %request.file, "batch simulation completed");
            Ok(())
        }
        Err(err) => {
            session.close().await;
            Err((err.kind(), err.message()))
        }
    }
}

async fn start_with_retry(session: &mut ComputeSession) -> Result<(), simbridge_types::BridgeError> {
    for attempt in 1..=MAX_MATLAB_START_RETRIES {
        match session.start().await {
            Ok(()) => return Ok(()),
            Err(err) if attempt < MAX_MATLAB_START_RETRIES => {
                warn!(attempt, max = MAX_MATLAB_START_RETRIES, error = %err, "compute session start failed, retrying");
                tokio::time::sleep(MATLAB_START_BACKOFF).await;
            }
            Err(err) => return Err(err),
        }
    }
    unreachable!("loop always returns before exhausting retries")
}

async fn emit_progress(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
    percentage: f32,
) {
    if !settings.response_templates.progress.include_percentage {
        return;
    }
    let envelope = response::build(
        TemplateType::Progress,
        &request.file,
        SimulationType::Batch,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields { percentage: Some(percentage), ..Default::default() },
    );
    if sink.send_result(destination, &envelope).await {
        performance.record_result_sent();
    }
}

fn build_error(
    request: &SimulationRequest,
    settings: &AgentSettings,
    kind: ErrorKind,
    message: String,
) -> simbridge_types::ResponseEnvelope {
    response::build(
        TemplateType::Error,
        &request.file,
        SimulationType::Batch,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields {
            error: Some(ErrorDetails { message, kind, details: None, traceback: None }),
            ..Default::default()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result_sink::test_support::RecordingSink;
    use simbridge_types::{BridgeMeta, Config};
    use std::collections::HashMap;

    fn settings() -> AgentSettings {
        AgentSettings::from_config(&Config::empty()).unwrap()
    }

    fn request(file: &str, outputs: Vec<&str>) -> SimulationRequest {
        SimulationRequest {
            request_id: "r1".into(),
            client_id: "dt".into(),
            simulator: "sim1".into(),
            kind: SimulationType::Batch,
            file: file.into(),
            function_name: None,
            inputs: HashMap::new(),
            outputs: Some(serde_json::json!(outputs)),
            bridge_meta: BridgeMeta::default(),
        }
    }

    #[tokio::test]
    async fn missing_file_publishes_error_response() {
        let req = request("nosuchfile.m", vec!["sum"]);
        let monitor = PerformanceMonitor::disabled();
        let sink = RecordingSink::default();
        handle(&req, "dt", &settings(), &monitor, &sink).await;
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "dt");
        assert_eq!(sent[0].1.error.as_ref().unwrap().kind, "missing_file");
    }

    #[tokio::test]
    async fn empty_outputs_is_invalid_config() {
        let req = request("add.m", vec![]);
        let monitor = PerformanceMonitor::disabled();
        let sink = RecordingSink::default();
        handle(&req, "dt", &settings(), &monitor, &sink).await;
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent[0].1.error.as_ref().unwrap().kind, "invalid_config");
    }

    #[tokio::test]
    async fn progress_is_published_before_failure() {
        let req = request("nosuchfile.m", vec!["sum"]);
        let monitor = PerformanceMonitor::disabled();
        let sink = RecordingSink::default();
        handle(&req, "dt", &settings(), &monitor, &sink).await;
        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1, "new() failure happens before any progress is emitted");
    }
}
