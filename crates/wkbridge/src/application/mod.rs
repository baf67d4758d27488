//! Application layer for wkbridge.
//!
//! The application layer owns the bridge logic (listener lifecycle,
//! frontend/device pairing, byte relay) and the trait seams it is driven
//! through.  It performs no I/O of its own: every socket operation goes
//! through [`ports::ReactorOps`] and every out-of-scope subsystem (device
//! discovery, inspector attach) is behind a collaborator trait.
//!
//! # What does NOT belong here?
//!
//! - Opening sockets or spawning tasks (infrastructure)
//! - The relay daemon's wire format (infrastructure)
//! - CLI parsing (main.rs)

pub mod orchestrator;
pub mod ports;

pub use orchestrator::Orchestrator;
pub use ports::{
    Accept, AttachError, AttachedInspector, BoxedStream, BridgeEvents, ConnId, DeviceDiscovery,
    FatalError, InspectorAttach, ReactorOps, Verdict,
};
