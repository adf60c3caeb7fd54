//! Wire data model, layered configuration, error taxonomy, and type
//! marshalling shared by the simulation bridge and its agents.

pub mod config;
pub mod error;
pub mod marshal;
pub mod model;

pub use config::Config;
pub use error::{BridgeError, ErrorKind};
pub use model::{
    BridgeMeta, ErrorInfo, Progress, RequestEnvelope, ResponseEnvelope, ResponseMetadata,
    ResponseStatus, SimulationInfo, SimulationRequest, SimulationType,
};
