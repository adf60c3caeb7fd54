//! The compute session: the agent's handle onto the opaque compute kernel
//! (spec §1 "the bridge and agent treat it as an opaque function
//! `f(inputs) → outputs`", GLOSSARY "Compute session"). Grounded on
//! `matlab_simulator.py`'s engine lifecycle (`start`/`eval`/`feval`/
//! `quit`), generalized from the MATLAB engine API to a subprocess
//! speaking one JSON request/response line per `invoke` over its
//! stdin/stdout — the process-spawn-plus-pipe shape the source's batch
//! path already uses, without depending on a MATLAB installation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use simbridge_types::error::BridgeError;
use simbridge_types::marshal::ComputeValue;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct InvokeRequest<'a> {
    function: &'a str,
    inputs: &'a HashMap<String, ComputeValue>,
    nargout: usize,
}

#[derive(Debug, Deserialize)]
struct InvokeResponse {
    outputs: Vec<ComputeValue>,
    #[serde(default)]
    version: Option<String>,
}

/// Manages the lifecycle of one compute kernel process for a single batch
/// request: validation, engine start, `invoke`, metadata, and teardown
/// (spec §4.8).
pub struct ComputeSession {
    sim_path: PathBuf,
    sim_file: String,
    command_template: Vec<String>,
    start_time: Option<std::time::Instant>,
    child: Option<Child>,
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<BufReader<tokio::process::ChildStdout>>,
    version: Option<String>,
}

impl ComputeSession {
    /// Validates the simulation directory and file exist before anything
    /// else runs (spec §4.8 failure taxonomy: missing file → 404).
    pub fn new(path: &str, file: &str, command_template: &[String]) -> Result<Self, BridgeError> {
        let sim_path = Path::new(path).to_path_buf();
        if !sim_path.is_dir() {
            return Err(BridgeError::MissingFile(format!("simulation directory not found: {}", sim_path.display())));
        }
        if !sim_path.join(file).exists() {
            return Err(BridgeError::MissingFile(format!("simulation file '{file}' not found in {}", sim_path.display())));
        }
        Ok(ComputeSession {
            sim_path,
            sim_file: file.to_string(),
            command_template: command_template.to_vec(),
            start_time: None,
            child: None,
            stdin: None,
            stdout: None,
            version: None,
        })
    }

    /// Starts the compute kernel process (spec §4.8 "session-start").
    /// Failures here are the caller's retry target.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        debug!(sim_file = %self.sim_file, "starting compute session");
        self.start_time = Some(std::time::Instant::now());

        let args = substitute(&self.command_template, &self.sim_path, &self.sim_file, None);
        let Some((program, rest)) = args.split_first() else {
            return Err(BridgeError::MatlabStartFailure("empty command template".into()));
        };

        let mut child = Command::new(program)
            .args(rest)
            .current_dir(&self.sim_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| BridgeError::MatlabStartFailure(format!("failed to spawn compute process: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::MatlabStartFailure("compute process stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::MatlabStartFailure("compute process stdout unavailable".into()))?;

        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stdout = Some(BufReader::new(stdout));
        Ok(())
    }

    /// Invokes `function_name` with `inputs`, expecting `nargout` output
    /// values back (spec §4.8 `invoke(function, marshaled_inputs,
    /// nargout=len(outputs))`).
    pub async fn invoke(
        &mut self,
        function_name: &str,
        inputs: &HashMap<String, ComputeValue>,
        nargout: usize,
    ) -> Result<Vec<ComputeValue>, BridgeError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| BridgeError::Execution("compute session is not started".into()))?;
        let stdout = self.stdout.as_mut().ok_or_else(|| BridgeError::Execution("compute session is not started".into()))?;

        let request = InvokeRequest { function: function_name, inputs, nargout };
        let mut line = serde_json::to_vec(&request).map_err(|e| BridgeError::Execution(format!("failed to encode invoke request: {e}")))?;
        line.push(b'\n');
        stdin.write_all(&line).await.map_err(|e| BridgeError::Execution(format!("failed to write to compute process: {e}")))?;
        stdin.flush().await.map_err(|e| BridgeError::Execution(format!("failed to flush compute process stdin: {e}")))?;

        let mut response_line = String::new();
        let bytes_read = stdout
            .read_line(&mut response_line)
            .await
            .map_err(|e| BridgeError::Execution(format!("failed to read from compute process: {e}")))?;
        if bytes_read == 0 {
            return Err(BridgeError::Execution("compute process closed its output before responding".into()));
        }

        let response: InvokeResponse = serde_json::from_str(response_line.trim())
            .map_err(|e| BridgeError::Execution(format!("invalid response from compute process: {e}")))?;
        if response.outputs.len() != nargout {
            return Err(BridgeError::Execution(format!(
                "compute process returned {} outputs, expected {nargout}",
                response.outputs.len()
            )));
        }
        self.version = response.version;
        Ok(response.outputs)
    }

    /// Execution time and bridge-process memory metadata, plus whatever
    /// the compute kernel self-reported (spec §4.8 optional metadata,
    /// §4.11's RSS capture).
    pub fn metadata(&self, memory_usage_mb: f64) -> simbridge_types::ResponseMetadata {
        let execution_time = self.start_time.map(|t| t.elapsed().as_secs_f64());
        let mut extra = HashMap::new();
        if let Some(version) = &self.version {
            extra.insert("matlab_version".to_string(), serde_json::Value::String(version.clone()));
        }
        simbridge_types::ResponseMetadata { execution_time, memory_usage: Some(memory_usage_mb), extra }
    }

    /// Teardown guaranteed on every exit path (spec §4.8, §9 "scoped
    /// resource acquisition"): close stdin, wait briefly, kill if the
    /// process does not exit on its own.
    pub async fn close(&mut self) {
        self.stdin.take();
        self.stdout.take();
        if let Some(mut child) = self.child.take() {
            match tokio::time::timeout(crate::config::PROCESS_TEARDOWN_TIMEOUT, child.wait()).await {
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

/// Substitutes `{path}`, `{file}`, and `{port}` placeholders in a command
/// template (spec §4.9's launch args also use this). The entry-point
/// function name is not part of the launch command line — it travels in
/// the per-invocation JSON request instead (see [`InvokeRequest`]) — so no
/// `{function}` placeholder is substituted here.
pub fn substitute(template: &[String], sim_path: &Path, sim_file: &str, port: Option<u16>) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            let mut out = arg.replace("{path}", &sim_path.to_string_lossy()).replace("{file}", sim_file);
            if let Some(port) = port {
                out = out.replace("{port}", &port.to_string());
            }
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_missing_directory() {
        let err = ComputeSession::new("/no/such/dir", "add.m", &["true".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::MissingFile(_)));
    }

    #[test]
    fn new_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ComputeSession::new(dir.path().to_str().unwrap(), "add.m", &["true".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::MissingFile(_)));
    }

    #[test]
    fn substitute_replaces_known_placeholders() {
        let template = vec!["run".to_string(), "{file}".to_string(), "--port".to_string(), "{port}".to_string()];
        let out = substitute(&template, Path::new("/sims"), "walk.m", Some(5678));
        assert_eq!(out, vec!["run", "walk.m", "--port", "5678"]);
    }
}
