//! YAML loading and dot-key flattening.

use std::collections::HashMap;
use std::path::Path;

use super::value::ConfigValue;
use super::ConfigError;

/// Load and parse a YAML file, flattening it into the values map.
///
/// Missing files are not an error; the caller relies on layered overlays
/// where a profile file is often absent.
pub(crate) fn load_yaml_file(
    path: &Path,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Load(e.to_string()))?;
        load_yaml_str(&content, values)?;
    }
    Ok(())
}

/// Parse a YAML string and flatten it into the values map.
pub(crate) fn load_yaml_str(
    content: &str,
    values: &mut HashMap<String, ConfigValue>,
) -> Result<(), ConfigError> {
    let yaml: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
    flatten_yaml("", &yaml, values);
    Ok(())
}

/// Flatten a YAML tree into dot-separated keys (`a.b.c`). Sequences are
/// stored both as a whole (`key` -> `List`) and per-element (`key.0`,
/// `key.1`, ...) so either access style works.
pub(crate) fn flatten_yaml(
    prefix: &str,
    value: &serde_yaml::Value,
    out: &mut HashMap<String, ConfigValue>,
) {
    match value {
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map {
                let key_str = match k {
                    serde_yaml::Value::String(s) => s.clone(),
                    other => format!("{other:?}"),
                };
                let full_key = if prefix.is_empty() { key_str } else { format!("{prefix}.{key_str}") };
                flatten_yaml(&full_key, v, out);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            if !prefix.is_empty() {
                out.insert(
                    prefix.to_string(),
                    ConfigValue::List(seq.iter().map(ConfigValue::from_yaml).collect()),
                );
                for (i, item) in seq.iter().enumerate() {
                    flatten_yaml(&format!("{prefix}.{i}"), item, out);
                }
            }
        }
        leaf => {
            if !prefix.is_empty() {
                out.insert(prefix.to_string(), ConfigValue::from_yaml(leaf));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flattens_nested_mapping() {
        let yaml: serde_yaml::Value = serde_yaml::from_str(
            "broker:\n  host: localhost\n  port: 5672\n",
        )
        .unwrap();
        let mut out = HashMap::new();
        flatten_yaml("", &yaml, &mut out);
        assert_eq!(out.get("broker.host"), Some(&ConfigValue::String("localhost".into())));
        assert_eq!(out.get("broker.port"), Some(&ConfigValue::Integer(5672)));
    }

    #[test]
    fn flattens_sequence_both_whole_and_indexed() {
        let yaml: serde_yaml::Value = serde_yaml::from_str("simulators:\n  - alpha\n  - beta\n").unwrap();
        let mut out = HashMap::new();
        flatten_yaml("", &yaml, &mut out);
        assert_eq!(out.get("simulators.0"), Some(&ConfigValue::String("alpha".into())));
        assert_eq!(out.get("simulators.1"), Some(&ConfigValue::String("beta".into())));
        assert!(matches!(out.get("simulators"), Some(ConfigValue::List(items)) if items.len() == 2));
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let mut out = HashMap::new();
        assert!(load_yaml_file(Path::new("/nonexistent/bridge.yaml"), &mut out).is_ok());
        assert!(out.is_empty());
    }
}
