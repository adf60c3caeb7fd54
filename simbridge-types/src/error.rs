//! Error taxonomy shared by the bridge and the agent (spec §7).

use serde::{Deserialize, Serialize};

/// The error kinds a response envelope can carry in its `error.type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    YamlParseError,
    ValidationError,
    MissingFile,
    MatlabStartFailure,
    ExecutionError,
    Timeout,
    InvalidConfig,
    BadRequest,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::YamlParseError => "yaml_parse_error",
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::MissingFile => "missing_file",
            ErrorKind::MatlabStartFailure => "matlab_start_failure",
            ErrorKind::ExecutionError => "execution_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::BadRequest => "bad_request",
        }
    }

    /// The numeric `error.code` a response builder stamps by default for
    /// this kind (§4.10), absent a more specific code from the failing
    /// component.
    pub fn default_code(self) -> u32 {
        match self {
            ErrorKind::MissingFile => 404,
            ErrorKind::BadRequest | ErrorKind::ValidationError | ErrorKind::InvalidConfig => 400,
            ErrorKind::Timeout => 504,
            ErrorKind::YamlParseError | ErrorKind::MatlabStartFailure | ErrorKind::ExecutionError => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error, carrying both a taxonomy kind (for the wire
/// envelope) and a human-readable message.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("YAML parse error: {0}")]
    YamlParse(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error("missing file: {0}")]
    MissingFile(String),
    #[error("simulator failed to start: {0}")]
    MatlabStartFailure(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("routing fabric error: {0}")]
    Fabric(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// The taxonomy kind a response envelope should stamp for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::YamlParse(_) => ErrorKind::YamlParseError,
            BridgeError::Validation(_) => ErrorKind::ValidationError,
            BridgeError::MissingFile(_) => ErrorKind::MissingFile,
            BridgeError::MatlabStartFailure(_) => ErrorKind::MatlabStartFailure,
            BridgeError::Execution(_) => ErrorKind::ExecutionError,
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            BridgeError::BadRequest(_) => ErrorKind::BadRequest,
            BridgeError::Fabric(_) => ErrorKind::ExecutionError,
            BridgeError::Io(_) => ErrorKind::ExecutionError,
        }
    }

    /// The plain message an `error.message` field should carry.
    pub fn message(&self) -> String {
        self.to_string()
    }
}

impl From<crate::config::ConfigError> for BridgeError {
    fn from(err: crate::config::ConfigError) -> Self {
        match err {
            crate::config::ConfigError::Load(msg) if msg.to_lowercase().contains("yaml") => {
                BridgeError::YamlParse(msg)
            }
            other => BridgeError::InvalidConfig(other.to_string()),
        }
    }
}

/// Generate `From<E> for BridgeError` implementations that map error types
/// to a specific `BridgeError` variant.
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::BridgeError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::BridgeError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_to_expected_wire_string() {
        assert_eq!(ErrorKind::MissingFile.as_str(), "missing_file");
        assert_eq!(ErrorKind::MatlabStartFailure.as_str(), "matlab_start_failure");
    }

    #[test]
    fn default_codes_match_taxonomy() {
        assert_eq!(ErrorKind::MissingFile.default_code(), 404);
        assert_eq!(ErrorKind::Timeout.default_code(), 504);
        assert_eq!(ErrorKind::BadRequest.default_code(), 400);
        assert_eq!(ErrorKind::ExecutionError.default_code(), 500);
    }

    #[test]
    fn bridge_error_kind_and_message_round_trip() {
        let err = BridgeError::Timeout("agent did not respond within 30s".into());
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.message().contains("30s"));
    }

    #[test]
    fn io_error_converts_through_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: BridgeError = io_err.into();
        assert_eq!(err.kind(), ErrorKind::ExecutionError);
    }
}
