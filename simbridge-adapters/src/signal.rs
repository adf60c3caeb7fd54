//! The normalized signals inbound adapters emit toward the bridge core
//! (spec §4.6, §9 "Callbacks & signals → message-passing channels").

use simbridge_types::{ResponseEnvelope, SimulationRequest};

/// One normalized event flowing from an adapter into the bridge core's
/// main select loop.
#[derive(Debug, Clone)]
pub enum Signal {
    /// A client request arrived over the internal-broker adapter (C3).
    InputInternal(SimulationRequest),
    /// A client request arrived over the pub-sub adapter (C4).
    InputPubsub(SimulationRequest),
    /// A client request arrived over the HTTP streaming adapter (C5).
    InputHttp(SimulationRequest),
    /// A simulator result arrived on `Q.bridge.result` (C3).
    ResultInternal(ResponseEnvelope),
    /// A message on `Q.bridge.result`/`Q.bridge.input` that could not be
    /// decoded into either shape; kept for diagnostics, never routed.
    OtherInternal(Vec<u8>),
}

pub type SignalSender = tokio::sync::mpsc::Sender<Signal>;
pub type SignalReceiver = tokio::sync::mpsc::Receiver<Signal>;
