//! wkbridge library crate.
//!
//! wkbridge lets standard WebKit remote-debugging frontends attach, over
//! plain TCP, to the inspector service of attached mobile devices.  Each
//! device is served on its own TCP port; a frontend connecting to that port
//! is paired with a device-side inspector connection and bytes are relayed
//! verbatim in both directions.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Frontend (TCP, one port per device)
//!         ↕
//! [wkbridge]
//!   ├── domain/           ProxyConfig and its defaults (no I/O)
//!   ├── application/
//!   │     ├── ports/      The seam traits: ReactorOps, BridgeEvents,
//!   │     │               DeviceDiscovery, InspectorAttach
//!   │     └── orchestrator/  Listener lifecycle, pairing, relay
//!   └── infrastructure/
//!         ├── reactor/    The socket reactor (tokio) driving the handlers
//!         ├── relay/      TCP collaborators for the device-relay daemon
//!         └── driver/     Process lifecycle: start, poll loop, teardown
//!         ↕
//! device-relay daemon (discovery + inspector attach, fixed line contract)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` defines the traits it needs and implements the bridge
//!   logic against them; it never opens a socket itself.
//! - `infrastructure` implements those traits on tokio and owns the process
//!   lifecycle.
//!
//! The reactor/orchestrator split mirrors the two halves of the system: the
//! reactor knows sockets but nothing about devices; the orchestrator knows
//! devices, listeners, and pairs but performs I/O only through the
//! [`application::ports::ReactorOps`] trait handed to each event handler.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::orchestrator::Orchestrator;
pub use domain::config::ProxyConfig;
pub use infrastructure::driver::Driver;
pub use infrastructure::reactor::Reactor;
