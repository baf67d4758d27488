//! # wkbridge-core
//!
//! Shared library for wkbridge containing the port-assignment configuration
//! grammar, the source-dependent assignment cache, and device identity types.
//!
//! This crate is pure domain logic: it has zero dependencies on sockets,
//! async runtimes, or the reactor.  The only I/O it ever performs is reading
//! a configuration file inside [`port_cache::PortCache`], and that behavior
//! is the whole point of the module (see its docs).
//!
//! # What lives where
//!
//! - **`port_config`** – The `[device]:port[-port]` CSV grammar and the
//!   resolution rules mapping a device identifier to an explicit port or a
//!   probing range.
//!
//! - **`port_cache`** – The literal-vs-file caching wrapper: an inline
//!   literal is parsed exactly once per process, while a file path is
//!   re-read on every lookup so on-disk edits take effect immediately.
//!
//! - **`device`** – Device identifiers and the attach/detach event type
//!   produced by the discovery collaborator.

pub mod device;
pub mod port_cache;
pub mod port_config;

// Re-export the most-used types at the crate root so callers can write
// `wkbridge_core::PortAssignment` instead of the full module path.
pub use device::{DeviceEvent, DeviceId};
pub use port_cache::{PortCache, PortCacheError};
pub use port_config::{PortAssignment, PortConfig, PortConfigError};

/// Device identifier of the discovery-only listener that is not bound to a
/// real device.  With the default configuration it serves the device roster
/// on port 9221.
pub const NULL_DEVICE_ID: &str = "null";
