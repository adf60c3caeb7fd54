//! Layered configuration: YAML file + profile overlay + `.env` + environment
//! variables, with `${VAR}` / `${VAR:default}` placeholder resolution.
//!
//! Resolution order (lowest to highest priority):
//! 1. `<base>.yaml` (e.g. `bridge.yaml`)
//! 2. `<base>-{profile}.yaml` (profile override)
//! 3. `.env` file (loaded into process environment, never overwrites an
//!    already-set variable)
//! 4. `.env.{profile}` file
//! 5. Environment variables (`BRIDGE_BROKER_HOST` overrides `broker.host`)
//!
//! Profile is `SIMBRIDGE_PROFILE` env var, else the `profile` argument,
//! else `"dev"`.

mod loader;
pub mod secrets;
pub mod value;

use std::collections::HashMap;
use std::path::Path;

pub use secrets::{DefaultSecretResolver, SecretResolver};
pub use value::{ConfigValue, FromConfigValue};

/// Error type for configuration operations.
#[derive(Debug, Clone)]
pub enum ConfigError {
    NotFound(String),
    TypeMismatch { key: String, expected: &'static str },
    Load(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::NotFound(key) => write!(f, "config key not found: {key}"),
            ConfigError::TypeMismatch { key, expected } => {
                write!(f, "config type mismatch for '{key}': expected {expected}")
            }
            ConfigError::Load(msg) => write!(f, "config load error: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Flattened, layered configuration for one process (`simbridge` or
/// `simagent`). Raw key-value access only; callers pull typed fields with
/// [`Config::get`]/[`Config::get_or`].
#[derive(Debug, Clone)]
pub struct Config {
    values: HashMap<String, ConfigValue>,
    profile: String,
}

impl Config {
    /// Load `{base}.yaml` and `{base}-{profile}.yaml` from the current
    /// directory, overlay `.env`/`.env.{profile}`, resolve placeholders,
    /// then overlay environment variables under `{env_prefix}_` (e.g.
    /// `env_prefix = "BRIDGE"` turns `BRIDGE_BROKER_HOST` into
    /// `broker.host`).
    pub fn load(base: &str, profile: &str, env_prefix: &str) -> Result<Self, ConfigError> {
        Self::load_with_resolver(base, profile, env_prefix, &DefaultSecretResolver)
    }

    pub fn load_with_resolver(
        base: &str,
        profile: &str,
        env_prefix: &str,
        resolver: &dyn SecretResolver,
    ) -> Result<Self, ConfigError> {
        let active_profile = std::env::var("SIMBRIDGE_PROFILE").unwrap_or_else(|_| profile.to_string());

        let mut values = HashMap::new();
        loader::load_yaml_file(Path::new(&format!("{base}.yaml")), &mut values)?;
        loader::load_yaml_file(Path::new(&format!("{base}-{active_profile}.yaml")), &mut values)?;

        let _ = dotenvy::dotenv();
        let _ = dotenvy::from_filename(format!(".env.{active_profile}"));

        resolve_string_values(&mut values, resolver)?;

        let prefix = format!("{}_", env_prefix.to_uppercase());
        for (env_key, env_val) in std::env::vars() {
            if let Some(rest) = env_key.strip_prefix(&prefix) {
                let config_key = rest.to_lowercase().replace('_', ".");
                values.insert(config_key, ConfigValue::String(env_val));
            }
        }

        Ok(Config { values, profile: active_profile })
    }

    /// Build a config directly from a YAML string (tests, embedded defaults).
    /// Placeholders are resolved against the default env/file resolver.
    pub fn from_yaml_str(yaml: &str, profile: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        loader::load_yaml_str(yaml, &mut values)?;
        resolve_string_values(&mut values, &DefaultSecretResolver)?;
        Ok(Config { values, profile: profile.to_string() })
    }

    pub fn empty() -> Self {
        Config { values: HashMap::new(), profile: "test".to_string() }
    }

    pub fn set(&mut self, key: &str, value: ConfigValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn get<V: FromConfigValue>(&self, key: &str) -> Result<V, ConfigError> {
        let value = self.values.get(key).ok_or_else(|| ConfigError::NotFound(key.to_string()))?;
        V::from_config_value(value, key)
    }

    pub fn get_or<V: FromConfigValue>(&self, key: &str, default: V) -> V {
        self.get(key).unwrap_or(default)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
}

fn resolve_string_values(
    values: &mut HashMap<String, ConfigValue>,
    resolver: &dyn SecretResolver,
) -> Result<(), ConfigError> {
    let keys: Vec<String> = values.keys().cloned().collect();
    for key in keys {
        if let Some(ConfigValue::String(s)) = values.get(&key) {
            if s.contains("${") {
                let resolved = secrets::resolve_placeholders(s, resolver)?;
                values.insert(key, ConfigValue::String(resolved));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_values_are_dot_addressable() {
        let cfg = Config::from_yaml_str("broker:\n  host: localhost\n  port: 5672\n", "dev").unwrap();
        assert_eq!(cfg.get::<String>("broker.host").unwrap(), "localhost");
        assert_eq!(cfg.get::<i64>("broker.port").unwrap(), 5672);
    }

    #[test]
    fn get_or_falls_back_on_missing_key() {
        let cfg = Config::empty();
        assert_eq!(cfg.get_or::<i64>("missing.key", 42), 42);
    }

    #[test]
    fn placeholder_with_default_resolves_when_env_unset() {
        std::env::remove_var("SIMBRIDGE_TEST_UNSET_VALUE");
        let cfg = Config::from_yaml_str(
            "broker:\n  host: \"${SIMBRIDGE_TEST_UNSET_VALUE:localhost}\"\n",
            "dev",
        )
        .unwrap();
        assert_eq!(cfg.get::<String>("broker.host").unwrap(), "localhost");
    }
}
