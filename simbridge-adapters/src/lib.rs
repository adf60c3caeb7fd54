//! Adapter interface (C2) and the three inbound protocol adapters:
//! internal-broker (C3), pub-sub (C4), and HTTP streaming (C5).

pub mod adapter;
pub mod error;
pub mod http_streaming;
pub mod internal_broker;
pub mod pubsub;
pub mod signal;

pub use adapter::{normalize_body, normalize_error_kind, Adapter};
pub use error::AdapterError;
pub use http_streaming::{HttpStreamingAdapter, HttpStreamingConfig};
pub use internal_broker::InternalBrokerAdapter;
pub use pubsub::{PubSubAdapter, PubSubConfig};
pub use signal::{Signal, SignalReceiver, SignalSender};
