//! Performance monitor (C11, spec §4.11): per-operation timing with an
//! aggregated summary, appended to a CSV sink. Grounded on
//! `performance_monitor.py`, reshaped per spec §9's "Singleton performance
//! monitor → process-scoped value with explicit lifetime": one value
//! created from config at startup and handed to executors by reference,
//! rather than a lazily-initialized global.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use sysinfo::{Pid, System};
use tracing::{debug, error};

use crate::config::PerformanceSettings;

#[derive(Debug, Clone)]
struct OperationMetrics {
    operation_id: String,
    timestamp: DateTime<Utc>,
    request_received_at: std::time::Instant,
    request_received_time: DateTime<Utc>,
    matlab_start_at: Option<std::time::Instant>,
    matlab_start_time: Option<DateTime<Utc>>,
    matlab_startup_duration: f64,
    simulation_duration: f64,
    matlab_stop_time: Option<DateTime<Utc>>,
    result_send_time: Option<DateTime<Utc>>,
    cpu_percent: f32,
    memory_rss_mb: f64,
}

struct Summary {
    startup: Vec<f64>,
    simulation: Vec<f64>,
    total: Vec<f64>,
}

/// Disabled by default; every method is a no-op when `enabled` is false,
/// matching spec §4.11's "zero-overhead when disabled".
pub struct PerformanceMonitor {
    enabled: bool,
    csv_path: PathBuf,
    current: Mutex<Option<OperationMetrics>>,
    history: Mutex<Summary>,
    system: Mutex<System>,
}

impl PerformanceMonitor {
    pub fn new(settings: &PerformanceSettings) -> Self {
        let enabled = settings.enabled;
        let log_dir = PathBuf::from(&settings.log_dir);
        let csv_path = log_dir.join(&settings.log_filename);

        if enabled {
            if let Err(err) = std::fs::create_dir_all(&log_dir) {
                error!(error = %err, "failed to create performance log directory, disabling monitor");
                return PerformanceMonitor {
                    enabled: false,
                    csv_path,
                    current: Mutex::new(None),
                    history: Mutex::new(Summary { startup: Vec::new(), simulation: Vec::new(), total: Vec::new() }),
                    system: Mutex::new(System::new()),
                };
            }
            if !csv_path.exists() {
                if let Err(err) = write_csv_headers(&csv_path) {
                    error!(error = %err, "failed to write performance CSV headers, disabling monitor");
                    return PerformanceMonitor {
                        enabled: false,
                        csv_path,
                        current: Mutex::new(None),
                        history: Mutex::new(Summary { startup: Vec::new(), simulation: Vec::new(), total: Vec::new() }),
                        system: Mutex::new(System::new()),
                    };
                }
            }
        }

        PerformanceMonitor {
            enabled,
            csv_path,
            current: Mutex::new(None),
            history: Mutex::new(Summary { startup: Vec::new(), simulation: Vec::new(), total: Vec::new() }),
            system: Mutex::new(System::new()),
        }
    }

    pub fn disabled() -> Self {
        PerformanceMonitor {
            enabled: false,
            csv_path: PathBuf::new(),
            current: Mutex::new(None),
            history: Mutex::new(Summary { startup: Vec::new(), simulation: Vec::new(), total: Vec::new() }),
            system: Mutex::new(System::new()),
        }
    }

    pub fn start_operation(&self, operation_id: &str) {
        if !self.enabled {
            return;
        }
        let (cpu, rss) = self.sample_self();
        let now = std::time::Instant::now();
        let now_utc = Utc::now();
        *self.current.lock().unwrap() = Some(OperationMetrics {
            operation_id: operation_id.to_string(),
            timestamp: now_utc,
            request_received_at: now,
            request_received_time: now_utc,
            matlab_start_at: None,
            matlab_start_time: None,
            matlab_startup_duration: 0.0,
            simulation_duration: 0.0,
            matlab_stop_time: None,
            result_send_time: None,
            cpu_percent: cpu,
            memory_rss_mb: rss,
        });
        debug!(operation_id, "started monitoring operation");
    }

    pub fn record_matlab_start(&self) {
        self.update_current(|m| {
            m.matlab_start_at = Some(std::time::Instant::now());
            m.matlab_start_time = Some(Utc::now());
        });
    }

    pub fn record_matlab_startup_complete(&self) {
        self.update_current(|m| {
            if let Some(start) = m.matlab_start_at {
                m.matlab_startup_duration = start.elapsed().as_secs_f64();
            }
        });
    }

    pub fn record_simulation_complete(&self) {
        self.update_current(|m| {
            if let Some(start) = m.matlab_start_at {
                m.simulation_duration = start.elapsed().as_secs_f64();
            }
        });
    }

    pub fn record_matlab_stop(&self) {
        self.update_current(|m| m.matlab_stop_time = Some(Utc::now()));
    }

    pub fn record_result_sent(&self) {
        self.update_current(|m| m.result_send_time = Some(Utc::now()));
    }

    fn update_current(&self, f: impl FnOnce(&mut OperationMetrics)) {
        if !self.enabled {
            return;
        }
        let (cpu, rss) = self.sample_self();
        let mut guard = self.current.lock().unwrap();
        if let Some(metrics) = guard.as_mut() {
            f(metrics);
            metrics.cpu_percent = cpu;
            metrics.memory_rss_mb = rss;
        }
    }

    /// Most recently sampled RSS for the in-flight operation, in MiB, or
    /// `0.0` when disabled or nothing has been sampled yet. Lets executors
    /// fold the monitor's own sampling into `ResponseMetadata.memory_usage`
    /// instead of reporting it separately only in the CSV sink.
    pub fn current_memory_mb(&self) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.current.lock().unwrap().as_ref().map(|m| m.memory_rss_mb).unwrap_or(0.0)
    }

    fn sample_self(&self) -> (f32, f64) {
        let mut system = self.system.lock().unwrap();
        system.refresh_all();
        let pid = Pid::from_u32(std::process::id());
        match system.process(pid) {
            Some(proc) => (proc.cpu_usage(), proc.memory() as f64 / (1024.0 * 1024.0)),
            None => (0.0, 0.0),
        }
    }

    /// Complete the current operation, appending a CSV row and folding
    /// its durations into the running summary.
    pub fn complete_operation(&self) {
        if !self.enabled {
            return;
        }
        let metrics = self.current.lock().unwrap().take();
        let Some(metrics) = metrics else { return };
        let total_duration = metrics.request_received_at.elapsed().as_secs_f64();

        {
            let mut history = self.history.lock().unwrap();
            history.startup.push(metrics.matlab_startup_duration);
            history.simulation.push(metrics.simulation_duration);
            history.total.push(total_duration);
        }

        if let Err(err) = append_csv_row(&self.csv_path, &metrics, total_duration) {
            error!(error = %err, "failed to append performance metrics row");
        }
        debug!(operation_id = %metrics.operation_id, total_duration, "completed operation");
    }

    /// Min/mean/max across startup, simulation, and total durations over
    /// every completed operation this process has recorded.
    pub fn summary(&self) -> Vec<(&'static str, f64, f64, f64)> {
        if !self.enabled {
            return Vec::new();
        }
        let history = self.history.lock().unwrap();
        if history.total.is_empty() {
            return Vec::new();
        }
        vec![
            ("startup", min(&history.startup), mean(&history.startup), max(&history.startup)),
            ("simulation", min(&history.simulation), mean(&history.simulation), max(&history.simulation)),
            ("total", min(&history.total), mean(&history.total), max(&history.total)),
        ]
    }
}

fn min(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::INFINITY, f64::min)
}

fn max(v: &[f64]) -> f64 {
    v.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

/// Column order mirrors `performance_monitor.py`'s `_write_csv_headers`
/// (operation id, timestamp, then the four wall-clock markers, then the
/// derived durations and resource samples).
fn write_csv_headers(path: &std::path::Path) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "operation_id",
        "timestamp",
        "request_received_time",
        "matlab_start_time",
        "matlab_startup_duration_s",
        "simulation_duration_s",
        "matlab_stop_time",
        "result_send_time",
        "cpu_percent",
        "memory_rss_mb",
        "total_duration_s",
    ])?;
    writer.flush()?;
    Ok(())
}

fn format_timestamp(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.to_rfc3339()).unwrap_or_default()
}

fn append_csv_row(path: &std::path::Path, metrics: &OperationMetrics, total_duration: f64) -> csv::Result<()> {
    let file = std::fs::OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
    writer.write_record([
        metrics.operation_id.clone(),
        metrics.timestamp.to_rfc3339(),
        metrics.request_received_time.to_rfc3339(),
        format_timestamp(metrics.matlab_start_time),
        metrics.matlab_startup_duration.to_string(),
        metrics.simulation_duration.to_string(),
        format_timestamp(metrics.matlab_stop_time),
        format_timestamp(metrics.result_send_time),
        metrics.cpu_percent.to_string(),
        metrics.memory_rss_mb.to_string(),
        total_duration.to_string(),
    ])?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PerformanceSettings;

    #[test]
    fn disabled_monitor_is_a_no_op() {
        let monitor = PerformanceMonitor::disabled();
        monitor.start_operation("op1");
        monitor.record_matlab_start();
        monitor.complete_operation();
        assert!(monitor.summary().is_empty());
        assert_eq!(monitor.current_memory_mb(), 0.0);
    }

    #[test]
    fn enabled_monitor_exposes_current_memory_while_operation_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PerformanceSettings {
            enabled: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            log_filename: "metrics.csv".to_string(),
        };
        let monitor = PerformanceMonitor::new(&settings);
        monitor.start_operation("op1");
        assert!(monitor.current_memory_mb() >= 0.0);
        monitor.complete_operation();
        assert_eq!(monitor.current_memory_mb(), 0.0, "no operation in flight after completion");
    }

    #[test]
    fn enabled_monitor_writes_csv_and_summarizes() {
        let dir = tempfile::tempdir().unwrap();
        let settings = PerformanceSettings {
            enabled: true,
            log_dir: dir.path().to_string_lossy().into_owned(),
            log_filename: "metrics.csv".to_string(),
        };
        let monitor = PerformanceMonitor::new(&settings);
        monitor.start_operation("op1");
        monitor.record_matlab_start();
        monitor.record_matlab_startup_complete();
        monitor.record_simulation_complete();
        monitor.record_matlab_stop();
        monitor.record_result_sent();
        monitor.complete_operation();

        let summary = monitor.summary();
        assert_eq!(summary.len(), 3);
        let csv_path = dir.path().join("metrics.csv");
        assert!(csv_path.exists());
        let content = std::fs::read_to_string(csv_path).unwrap();
        assert!(content.contains("op1"));

        let header = content.lines().next().unwrap();
        assert_eq!(header.matches(',').count(), 10, "expected 11 CSV columns");
        let row = content.lines().nth(1).unwrap();
        let timestamp_field = row.split(',').nth(1).unwrap();
        assert!(timestamp_field.parse::<DateTime<Utc>>().is_ok(), "timestamp column must be a real RFC3339 value, got {timestamp_field}");
    }
}
