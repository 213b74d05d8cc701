//! Sora signaling protocol
//!
//! - `protocol`: the JSON wire schema
//! - `negotiator`: frame classification and outgoing frame construction

pub mod negotiator;
pub mod protocol;

pub use negotiator::{Inbound, Negotiator};
pub use protocol::SignalingMessage;
