//! Source-dependent caching of the parsed port configuration.
//!
//! The raw configuration string handed to the process is either an inline
//! literal (`null:9221,:9222-9322`) or a path to a file in the same format.
//! Which one it is cannot be known up front, so the first lookup decides:
//!
//! - If the string parses as a literal, the parsed handle is kept and reused
//!   for the remainder of the process.  The backing string never touches the
//!   filesystem, so a file that happens to share the name cannot interfere.
//! - Otherwise the string is treated as a file path.  The file is re-read
//!   and re-parsed on *every* lookup and the scratch handle is discarded
//!   immediately afterwards, so on-disk edits take effect on the next lookup.
//!
//! The two states are modeled explicitly in [`CacheSource`] rather than as a
//! nullable handle plus a boolean.

use std::path::PathBuf;

use thiserror::Error;
use tracing::debug;

use crate::device::DeviceId;
use crate::port_config::{PortAssignment, PortConfig, PortConfigError};

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors produced while resolving a device's port assignment.
///
/// `Unassigned` is deliberately separate from the parse/read failures: it
/// means the configuration is fine but names no entry for this device, and
/// the orchestrator must simply not open a listener for it.
#[derive(Debug, Error)]
pub enum PortCacheError {
    /// The configuration (literal or file contents) failed to parse.
    #[error("invalid port configuration: {0}")]
    Config(#[from] PortConfigError),

    /// The configuration string was taken as a path but the file could not
    /// be read.
    #[error("failed to read port configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration has no entry (exact or wildcard) for this device.
    #[error("no port assignment for device '{device_id}'")]
    Unassigned { device_id: DeviceId },
}

// ── Cache state ───────────────────────────────────────────────────────────────

/// Where the parsed configuration comes from, decided on first lookup.
#[derive(Debug)]
enum CacheSource {
    /// No lookup has happened yet.
    Unresolved,
    /// The raw string parsed as an inline literal; this handle lives for the
    /// rest of the process.
    Literal(PortConfig),
    /// The raw string is a file path; a fresh handle is built per lookup and
    /// never stored here.
    FileBacked,
}

/// The port-assignment cache: the raw configuration string (immutable for
/// the process lifetime) plus the [`CacheSource`] state machine.
#[derive(Debug)]
pub struct PortCache {
    raw: String,
    source: CacheSource,
}

impl PortCache {
    /// Creates a cache over the raw configuration string.  No parsing
    /// happens until the first lookup.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            source: CacheSource::Unresolved,
        }
    }

    /// Whether the configuration source turned out to be file-backed.
    ///
    /// Meaningful only after the first lookup; before that it returns
    /// `false`.
    pub fn is_file_backed(&self) -> bool {
        matches!(self.source, CacheSource::FileBacked)
    }

    /// Resolves a device identifier to its port assignment.
    ///
    /// # Errors
    ///
    /// - [`PortCacheError::Unassigned`] if no entry matches the device.
    /// - [`PortCacheError::Config`] / [`PortCacheError::Io`] if a file-backed
    ///   configuration cannot be read or parsed on this lookup.  One device's
    ///   resolution failure never affects listeners already opened.
    pub fn resolve(&mut self, device_id: &str) -> Result<PortAssignment, PortCacheError> {
        self.lookup(|config| config.resolve(device_id))?
            .ok_or_else(|| PortCacheError::Unassigned {
                device_id: device_id.to_string(),
            })
    }

    /// Device identifiers named explicitly in the configuration (used to
    /// open statically configured listeners at startup).
    pub fn static_device_ids(&mut self) -> Result<Vec<DeviceId>, PortCacheError> {
        self.lookup(PortConfig::static_device_ids)
    }

    /// Runs `f` against the parsed configuration, honoring the cache state:
    /// cached handle for literals, scratch handle per call for files.
    fn lookup<T>(&mut self, f: impl FnOnce(&PortConfig) -> T) -> Result<T, PortCacheError> {
        if let CacheSource::Unresolved = self.source {
            match PortConfig::parse(&self.raw) {
                Ok(config) => {
                    debug!("port configuration is an inline literal; parsed once");
                    self.source = CacheSource::Literal(config);
                }
                Err(e) => {
                    debug!("port configuration is not a literal ({e}); treating as a file path");
                    self.source = CacheSource::FileBacked;
                }
            }
        }

        if let CacheSource::Literal(config) = &self.source {
            return Ok(f(config));
        }

        // Scratch handle for this call only: dropped on return so the next
        // lookup re-reads the file from scratch.
        let text = std::fs::read_to_string(&self.raw).map_err(|source| PortCacheError::Io {
            path: PathBuf::from(&self.raw),
            source,
        })?;
        let config = PortConfig::parse(&text)?;
        Ok(f(&config))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
