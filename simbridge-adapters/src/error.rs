//! Adapter-level errors.

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("payload is not a mapping/object")]
    NotAnObject,
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
    #[error("mqtt error: {0}")]
    Mqtt(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("fabric error: {0}")]
    Fabric(#[from] simbridge_fabric::FabricError),
    #[error("adapter is stopped")]
    Stopped,
}
