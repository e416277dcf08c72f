//! Pairing and relay core for tandem.
//!
//! Every connected session is matched with exactly one other unmatched
//! session, strictly first come first served. Once matched, the server
//! forwards `offer` / `answer` / `ice-candidate` messages between the two
//! sides without looking inside them, until one side disconnects or asks
//! for someone new with `next`.
//!
//! The transport is not part of this crate. A connection is represented by
//! a [`ChannelHandle`], the sending half of a bounded queue that the
//! transport drains into its socket.

pub mod engine;
pub mod protocol;
pub mod registry;

pub use engine::{EngineStats, PairingEngine, SessionPhase};
pub use protocol::{ClientMessage, Payload, RelayedSignal, ServerMessage, Signal, SignalKind};
pub use registry::{ChannelHandle, ChannelRegistry, Delivery};
