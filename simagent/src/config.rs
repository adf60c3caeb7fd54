//! Typed view over the layered config surface for the agent process
//! (spec §6 "Agent-side" configuration surface).

use std::collections::HashMap;
use std::time::Duration;

use simbridge_types::config::ConfigError;
use simbridge_types::{Config, ErrorKind};

use crate::logging::LogFormat;
use crate::response::{ErrorTemplateConfig, ProgressTemplateConfig, StreamingTemplateConfig, SuccessTemplateConfig};

#[derive(Debug, Clone)]
pub struct RabbitMqSettings {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
    pub heartbeat_secs: u64,
}

#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct PerformanceSettings {
    pub enabled: bool,
    pub log_dir: String,
    pub log_filename: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseTemplatesConfig {
    pub success: SuccessTemplateConfig,
    pub error: ErrorTemplateConfig,
    pub progress: ProgressTemplateConfig,
    pub streaming: StreamingTemplateConfig,
}

#[derive(Debug, Clone)]
pub struct SimulationSettings {
    /// Directory containing the compute entry-point artifacts (`agent.simulation.path`).
    pub path: String,
    /// Command template used to launch the compute kernel process. `{path}`,
    /// `{file}`, `{port}` placeholders are substituted.
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub agent_id: String,
    pub rabbitmq: RabbitMqSettings,
    pub tcp: TcpSettings,
    pub simulation: SimulationSettings,
    pub response_templates: ResponseTemplatesConfig,
    pub performance: PerformanceSettings,
    pub logging: LoggingSettings,
}

/// Accept/read/teardown timeouts fixed by spec §4.9/§5; not
/// operator-configurable (the source hard-codes them too).
pub const STREAMING_ACCEPT_TIMEOUT: Duration = Duration::from_secs(120);
pub const PROCESS_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(10);
pub const MAX_MATLAB_START_RETRIES: u32 = 3;
pub const MATLAB_START_BACKOFF: Duration = Duration::from_secs(1);

impl AgentSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut error_codes = HashMap::new();
        for kind in [
            ErrorKind::YamlParseError,
            ErrorKind::ValidationError,
            ErrorKind::MissingFile,
            ErrorKind::MatlabStartFailure,
            ErrorKind::ExecutionError,
            ErrorKind::Timeout,
            ErrorKind::InvalidConfig,
            ErrorKind::BadRequest,
        ] {
            let key = format!("response_templates.error.error_codes.{}", kind.as_str());
            let code = config.get_or::<i64>(&key, kind.default_code() as i64) as u32;
            error_codes.insert(kind.as_str().to_string(), code);
        }

        let command_raw = config.get_or::<String>(
            "agent.command",
            "matlab -batch addpath('{path}');run('{file}')".to_string(),
        );
        let command: Vec<String> = command_raw.split_whitespace().map(str::to_string).collect();

        Ok(AgentSettings {
            agent_id: config.get_or("agent.agent_id", "matlab".to_string()),
            rabbitmq: RabbitMqSettings {
                host: config.get_or("rabbitmq.host", "localhost".to_string()),
                port: config.get_or::<i64>("rabbitmq.port", 5672) as u16,
                virtual_host: config.get_or("rabbitmq.virtual_host", "/".to_string()),
                username: config.get_or("rabbitmq.username", "guest".to_string()),
                password: config.get_or("rabbitmq.password", "guest".to_string()),
                heartbeat_secs: config.get_or::<i64>("rabbitmq.heartbeat", 600) as u64,
            },
            tcp: TcpSettings {
                host: config.get_or("tcp.host", "localhost".to_string()),
                port: config.get_or::<i64>("tcp.port", 5678) as u16,
            },
            simulation: SimulationSettings {
                path: config.get_or("simulation.path", ".".to_string()),
                command,
            },
            response_templates: ResponseTemplatesConfig {
                success: SuccessTemplateConfig {
                    include_metadata: config.get_or("response_templates.success.include_metadata", true),
                },
                error: ErrorTemplateConfig {
                    include_stacktrace: config.get_or("response_templates.error.include_stacktrace", false),
                    error_codes,
                },
                progress: ProgressTemplateConfig {
                    include_percentage: config.get_or("response_templates.progress.include_percentage", true),
                },
                streaming: StreamingTemplateConfig {
                    include_metadata: config.get_or("response_templates.streaming.include_metadata", true),
                },
            },
            performance: PerformanceSettings {
                enabled: config.get_or("performance.enabled", false),
                log_dir: config.get_or("performance.log_dir", "performance_logs".to_string()),
                log_filename: config.get_or("performance.log_filename", "performance_metrics.csv".to_string()),
            },
            logging: LoggingSettings {
                level: config.get_or("logging.level", "info".to_string()),
                format: LogFormat::parse(&config.get_or("logging.format", "pretty".to_string())),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_populate_error_code_table() {
        let config = Config::empty();
        let settings = AgentSettings::from_config(&config).unwrap();
        assert_eq!(settings.response_templates.error.error_codes.get("missing_file"), Some(&404));
        assert_eq!(settings.response_templates.error.error_codes.get("timeout"), Some(&504));
    }

    #[test]
    fn overrides_take_precedence_over_defaults() {
        let config = Config::from_yaml_str(
            "agent:\n  agent_id: sim1\ntcp:\n  port: 9000\nresponse_templates:\n  error:\n    error_codes:\n      missing_file: 410\n",
            "test",
        )
        .unwrap();
        let settings = AgentSettings::from_config(&config).unwrap();
        assert_eq!(settings.agent_id, "sim1");
        assert_eq!(settings.tcp.port, 9000);
        assert_eq!(settings.response_templates.error.error_codes.get("missing_file"), Some(&410));
    }
}
