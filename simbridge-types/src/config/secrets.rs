//! `${...}` placeholder resolution for configuration string values.

use super::ConfigError;

/// Resolution backend for `${...}` references.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError>;
}

/// Default resolver: environment variables and file references.
///
/// Supports:
/// - `${VAR_NAME}` — environment variable
/// - `${env:VAR_NAME}` — explicit environment variable
/// - `${file:/path/to/secret}` — file contents, trimmed
pub struct DefaultSecretResolver;

impl SecretResolver for DefaultSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
        if let Some(path) = reference.strip_prefix("file:") {
            std::fs::read_to_string(path.trim())
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::Load(format!("secret file '{}': {}", path.trim(), e)))
        } else if let Some(var) = reference.strip_prefix("env:") {
            std::env::var(var.trim()).map_err(|_| ConfigError::NotFound(format!("env:{}", var.trim())))
        } else {
            std::env::var(reference.trim()).map_err(|_| ConfigError::NotFound(reference.trim().to_string()))
        }
    }
}

/// Resolve `${...}` placeholders in a string value.
///
/// A reference of the form `${VAR:default}` falls back to `default`
/// (taken literally, not re-resolved) when `VAR` cannot be resolved by
/// `resolver` — the `file:`/`env:` prefixed forms support this too, e.g.
/// `${env:API_KEY:dev-key}`.
pub fn resolve_placeholders(value: &str, resolver: &dyn SecretResolver) -> Result<String, ConfigError> {
    let mut result = value.to_string();
    while let Some(start) = result.find("${") {
        let end = result[start..]
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("unclosed placeholder in: {value}")))?;
        let reference = &result[start + 2..start + end];
        let resolved = resolve_one(reference, resolver)?;
        result = format!("{}{}{}", &result[..start], resolved, &result[start + end + 1..]);
    }
    Ok(result)
}

fn resolve_one(reference: &str, resolver: &dyn SecretResolver) -> Result<String, ConfigError> {
    match split_default(reference) {
        Some((head, default)) => match resolver.resolve(head) {
            Ok(v) => Ok(v),
            Err(_) => Ok(default.to_string()),
        },
        None => resolver.resolve(reference),
    }
}

/// Split `head:default` on the last `:` that isn't part of a recognized
/// `env:`/`file:` prefix, e.g. `env:API_KEY:dev-key` -> `(env:API_KEY,
/// dev-key)`, `PORT:8080` -> `(PORT, 8080)`, `file:/etc/secret` -> `None`
/// (no default given).
fn split_default(reference: &str) -> Option<(&str, &str)> {
    let body = reference
        .strip_prefix("env:")
        .or_else(|| reference.strip_prefix("file:"));
    let (prefix_len, rest) = match body {
        Some(rest) => (reference.len() - rest.len(), rest),
        None => (0, reference),
    };
    rest.find(':').map(|idx| (&reference[..prefix_len + idx], &reference[prefix_len + idx + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedResolver(Option<&'static str>);
    impl SecretResolver for FixedResolver {
        fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| ConfigError::NotFound(reference.to_string()))
        }
    }

    #[test]
    fn resolves_bare_placeholder() {
        let resolver = FixedResolver(Some("localhost"));
        assert_eq!(resolve_placeholders("${HOST}", &resolver).unwrap(), "localhost");
    }

    #[test]
    fn falls_back_to_default_when_unresolvable() {
        let resolver = FixedResolver(None);
        assert_eq!(resolve_placeholders("${PORT:5672}", &resolver).unwrap(), "5672");
    }

    #[test]
    fn default_not_used_when_resolver_succeeds() {
        let resolver = FixedResolver(Some("amqp.internal"));
        assert_eq!(resolve_placeholders("${HOST:localhost}", &resolver).unwrap(), "amqp.internal");
    }

    #[test]
    fn resolves_multiple_placeholders_in_one_string() {
        let resolver = FixedResolver(Some("x"));
        assert_eq!(resolve_placeholders("${A}-${B:fallback}", &resolver).unwrap(), "x-x");
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        let resolver = FixedResolver(Some("x"));
        assert!(resolve_placeholders("${UNCLOSED", &resolver).is_err());
    }
}
