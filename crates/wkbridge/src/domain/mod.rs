//! Domain layer for wkbridge.
//!
//! Pure configuration types with no dependencies on sockets, async runtimes,
//! or external frameworks.  Everything here can be constructed and tested
//! without touching the network.

pub mod config;

pub use config::{
    ProxyConfig, DEFAULT_CONFIG, DEFAULT_FRONTEND_URL, DEFAULT_RELAY_ADDR, SELECT_TIMEOUT,
};
