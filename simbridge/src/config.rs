//! Typed view over the layered [`simbridge_types::Config`] (spec §6
//! configuration surface).

use simbridge_types::config::ConfigError;
use simbridge_types::Config;

use crate::logging::LogFormat;

#[derive(Debug, Clone)]
pub struct RabbitMqSettings {
    pub host: String,
    pub port: u16,
    pub virtual_host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub keepalive_secs: u64,
    pub input_topic: String,
    pub output_topic: String,
    pub qos: u8,
}

#[derive(Debug, Clone)]
pub struct RestSettings {
    pub host: String,
    pub port: u16,
    pub input_endpoint: String,
    pub certfile: Option<String>,
    pub keyfile: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct BridgeSettings {
    pub bridge_id: String,
    pub simulator_ids: Vec<String>,
    pub rabbitmq: RabbitMqSettings,
    pub mqtt: MqttSettings,
    pub rest: RestSettings,
    pub logging: LoggingSettings,
}

impl BridgeSettings {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let simulator_ids: Vec<String> = config
            .get_or::<String>("simulation_bridge.simulators", String::new())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Ok(BridgeSettings {
            bridge_id: config.get_or("simulation_bridge.bridge_id", "simbridge".to_string()),
            simulator_ids,
            rabbitmq: RabbitMqSettings {
                host: config.get_or("rabbitmq.host", "localhost".to_string()),
                port: config.get_or::<i64>("rabbitmq.port", 5672) as u16,
                virtual_host: config.get_or("rabbitmq.virtual_host", "/".to_string()),
                username: config.get_or("rabbitmq.username", "guest".to_string()),
                password: config.get_or("rabbitmq.password", "guest".to_string()),
            },
            mqtt: MqttSettings {
                host: config.get_or("mqtt.host", "localhost".to_string()),
                port: config.get_or::<i64>("mqtt.port", 1883) as u16,
                keepalive_secs: config.get_or::<i64>("mqtt.keepalive_secs", 30) as u64,
                input_topic: config.get_or("mqtt.input_topic", "bridge/input".to_string()),
                output_topic: config.get_or("mqtt.output_topic", "bridge/output".to_string()),
                qos: config.get_or::<i64>("mqtt.qos", 1) as u8,
            },
            rest: RestSettings {
                host: config.get_or("rest.host", "0.0.0.0".to_string()),
                port: config.get_or::<i64>("rest.port", 8080) as u16,
                input_endpoint: config.get_or("rest.input_endpoint", "/message".to_string()),
                certfile: config.get::<String>("rest.certfile").ok(),
                keyfile: config.get::<String>("rest.keyfile").ok(),
            },
            logging: LoggingSettings {
                level: config.get_or("logging.level", "info".to_string()),
                format: LogFormat::parse(&config.get_or("logging.format", "pretty".to_string())),
            },
        })
    }
}
