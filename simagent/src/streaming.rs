//! Streaming executor (C9, spec §4.9): binds a TCP listener, launches the
//! compute process with the listener's port substituted into its command
//! line, accepts one connection, exchanges one JSON "inputs" line for a
//! stream of newline-delimited JSON output records, and republishes each
//! as a progress or streaming response. Grounded on `streaming.py`'s
//! `StreamingConnection`/`MatlabStreamingController`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde_json::Value;
use simbridge_types::error::BridgeError;
use simbridge_types::{ErrorKind, SimulationRequest, SimulationType};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::compute::substitute;
use crate::config::{AgentSettings, PROCESS_TEARDOWN_TIMEOUT, STREAMING_ACCEPT_TIMEOUT};
use crate::performance::PerformanceMonitor;
use crate::response::{self, ErrorDetails, ResponseFields, TemplateType};
use crate::result_sink::ResultSink;

/// Runs one streaming request end to end: bind, launch, accept, stream,
/// teardown. Every exceptional condition becomes an error response
/// published through `sink` (spec §7 propagation policy); teardown runs
/// regardless of outcome (spec §4.9, §9).
pub async fn handle(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
) {
    performance.start_operation(&request.request_id);
    performance.record_matlab_start();

    let mut controller = match StreamingController::new(&settings.simulation.path, &request.file) {
        Ok(c) => c,
        Err(err) => {
            performance.complete_operation();
            error!(request_id = %request.request_id, error = %err, "streaming validation failed");
            publish_error(request, destination, settings, performance, sink, err.kind(), err.message()).await;
            return;
        }
    };

    let outcome = run(request, destination, settings, performance, sink, &mut controller).await;
    controller.close().await;
    performance.complete_operation();

    if let Err((kind, message)) = outcome {
        error!(request_id = %request.request_id, error = %message, "streaming simulation failed");
        publish_error(request, destination, settings, performance, sink, kind, message).await;
    }
}

async fn run(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
    controller: &mut StreamingController,
) -> Result<(), (ErrorKind, String)> {
    controller.start(&settings.tcp.host, settings.tcp.port, &settings.simulation.command).await.map_err(|e| (e.kind(), e.message()))?;
    performance.record_matlab_startup_complete();

    let start_envelope = response::build(
        TemplateType::Success,
        &request.file,
        SimulationType::Streaming,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields {
            data: Some(serde_json::json!({"status": "completed"})),
            metadata: Some(controller.metadata(performance.current_memory_mb())),
            ..Default::default()
        },
    );
    if sink.send_result(destination, &start_envelope).await {
        performance.record_result_sent();
    }

    let mut stream = controller.accept().await.map_err(|e| (e.kind(), e.message()))?;

    let inputs_line = serde_json::to_vec(&request.inputs).map_err(|e| {
        (ErrorKind::ExecutionError, format!("failed to encode streaming inputs: {e}"))
    })?;
    write_line(&mut stream, &inputs_line).await.map_err(|e| (e.kind(), e.message()))?;

    let (read_half, _write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let mut sequence: u64 = 0;

    loop {
        line.clear();
        let bytes_read = reader
            .read_line(&mut line)
            .await
            .map_err(|e| (ErrorKind::ExecutionError, format!("streaming connection error: {e}")))?;
        if bytes_read == 0 {
            debug!(request_id = %request.request_id, "streaming connection closed");
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(output) => {
                let envelope = build_output_envelope(request, settings, &output, sequence);
                if sink.send_result(destination, &envelope).await {
                    performance.record_result_sent();
                }
                sequence += 1;
            }
            Err(err) => {
                warn!(request_id = %request.request_id, error = %err, "invalid JSON on streaming connection, skipping");
            }
        }
    }

    performance.record_simulation_complete();
    performance.record_matlab_stop();

    let final_envelope = response::build(
        TemplateType::Success,
        &request.file,
        SimulationType::Streaming,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields {
            data: Some(serde_json::json!({"status": "completed"})),
            metadata: Some(controller.metadata(performance.current_memory_mb())),
            ..Default::default()
        },
    );
    if sink.send_result(destination, &final_envelope).await {
        performance.record_result_sent();
    }
    info!(request_id = %request.request_id, file = %request.file, "streaming simulation completed");
    Ok(())
}

fn build_output_envelope(
    request: &SimulationRequest,
    settings: &AgentSettings,
    output: &Value,
    sequence: u64,
) -> simbridge_types::ResponseEnvelope {
    let is_progress = output.get("progress").is_some();
    let template_type = if is_progress { TemplateType::Progress } else { TemplateType::Streaming };
    let data = if is_progress { output.get("data").cloned() } else { Some(output.clone()) };
    let percentage = output
        .get("progress")
        .and_then(|p| p.get("percentage"))
        .and_then(Value::as_f64)
        .map(|p| p as f32)
        .unwrap_or(sequence as f32);

    response::build(
        template_type,
        &request.file,
        SimulationType::Streaming,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields { data, percentage: Some(percentage), sequence: Some(sequence), ..Default::default() },
    )
}

async fn publish_error(
    request: &SimulationRequest,
    destination: &str,
    settings: &AgentSettings,
    performance: &PerformanceMonitor,
    sink: &dyn ResultSink,
    kind: ErrorKind,
    message: String,
) {
    let envelope = response::build(
        TemplateType::Error,
        &request.file,
        SimulationType::Streaming,
        &settings.response_templates,
        &request.request_id,
        request.bridge_meta.clone(),
        ResponseFields {
            error: Some(ErrorDetails { message, kind, details: None, traceback: None }),
            ..Default::default()
        },
    );
    if sink.send_result(destination, &envelope).await {
        performance.record_result_sent();
    }
}

async fn write_line(stream: &mut TcpStream, body: &[u8]) -> Result<(), BridgeError> {
    stream.write_all(body).await.map_err(|e| BridgeError::Execution(format!("failed to write streaming inputs: {e}")))?;
    stream
        .write_all(b"\n")
        .await
        .map_err(|e| BridgeError::Execution(format!("failed to write streaming inputs: {e}")))?;
    Ok(())
}

/// Owns the TCP listener and compute process for one streaming request
/// (spec §4.9). Grounded on `streaming.py`'s `StreamingConnection`.
struct StreamingController {
    sim_path: PathBuf,
    sim_file: String,
    start_time: std::time::Instant,
    listener: Option<TcpListener>,
    child: Option<Child>,
}

impl StreamingController {
    fn new(path: &str, file: &str) -> Result<Self, BridgeError> {
        let sim_path = Path::new(path).to_path_buf();
        if !sim_path.is_dir() {
            return Err(BridgeError::MissingFile(format!("simulation directory not found: {}", sim_path.display())));
        }
        if !sim_path.join(file).exists() {
            return Err(BridgeError::MissingFile(format!("simulation file '{file}' not found in {}", sim_path.display())));
        }
        Ok(StreamingController {
            sim_path,
            sim_file: file.to_string(),
            start_time: std::time::Instant::now(),
            listener: None,
            child: None,
        })
    }

    async fn start(&mut self, host: &str, port: u16, command_template: &[String]) -> Result<(), BridgeError> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| BridgeError::MatlabStartFailure(format!("failed to bind streaming listener: {e}")))?;
        debug!(host, port, "streaming listener bound");

        let args = substitute(command_template, &self.sim_path, &self.sim_file, Some(port));
        let Some((program, rest)) = args.split_first() else {
            return Err(BridgeError::MatlabStartFailure("empty command template".into()));
        };
        let child = Command::new(program)
            .args(rest)
            .current_dir(&self.sim_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::MatlabStartFailure(format!("failed to spawn compute process: {e}")))?;

        self.listener = Some(listener);
        self.child = Some(child);
        Ok(())
    }

    async fn accept(&mut self) -> Result<TcpStream, BridgeError> {
        let listener = self.listener.as_ref().ok_or_else(|| BridgeError::Execution("streaming listener not started".into()))?;
        match tokio::time::timeout(STREAMING_ACCEPT_TIMEOUT, listener.accept()).await {
            Ok(Ok((stream, _addr))) => Ok(stream),
            Ok(Err(err)) => Err(BridgeError::Execution(format!("failed to accept streaming connection: {err}"))),
            Err(_) => Err(BridgeError::Timeout("timed out waiting for compute process to connect".into())),
        }
    }

    fn metadata(&self, memory_usage_mb: f64) -> simbridge_types::ResponseMetadata {
        simbridge_types::ResponseMetadata {
            execution_time: Some(self.start_time.elapsed().as_secs_f64()),
            memory_usage: Some(memory_usage_mb),
            extra: Default::default(),
        }
    }

    async fn close(&mut self) {
        self.listener.take();
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(PROCESS_TEARDOWN_TIMEOUT, child.wait()).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "error waiting for compute process exit"),
                Err(_) => {
                    warn!("compute process did not exit within teardown timeout, killing");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_missing_directory() {
        let err = StreamingController::new("/no/such/dir", "walk.m").unwrap_err();
        assert!(matches!(err, BridgeError::MissingFile(_)));
    }

    #[test]
    fn new_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StreamingController::new(dir.path().to_str().unwrap(), "walk.m").unwrap_err();
        assert!(matches!(err, BridgeError::MissingFile(_)));
    }

    #[test]
    fn progress_output_is_classified_by_progress_key() {
        let request = SimulationRequest {
            request_id: "r1".into(),
            client_id: "dt".into(),
            simulator: "sim1".into(),
            kind: SimulationType::Streaming,
            file: "walk.m".into(),
            function_name: None,
            inputs: Default::default(),
            outputs: None,
            bridge_meta: Default::default(),
        };
        let settings = AgentSettings::from_config(&simbridge_types::Config::empty()).unwrap();
        let progress_output = serde_json::json!({"progress": {"percentage": 42.0}});
        let env = build_output_envelope(&request, &settings, &progress_output, 0);
        assert!(env.progress.is_some());
        assert_eq!(env.progress.unwrap().percentage, 42.0);

        let streaming_output = serde_json::json!({"t": 1, "x": 2.5});
        let env = build_output_envelope(&request, &settings, &streaming_output, 1);
        assert_eq!(env.data, Some(streaming_output));
        assert_eq!(env.sequence, Some(1));
    }
}
