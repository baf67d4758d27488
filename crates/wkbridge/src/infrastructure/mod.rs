//! Infrastructure layer for wkbridge.
//!
//! Everything that touches a real socket or a real process lives here: the
//! socket reactor over tokio, the relay-daemon collaborators, and the driver
//! that wires them to the orchestrator and runs the loop.

pub mod driver;
pub mod reactor;
pub mod relay;

pub use driver::Driver;
pub use reactor::{Reactor, Sockets};
pub use relay::{RelayDiscovery, RelayInspector};
