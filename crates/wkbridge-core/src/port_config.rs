//! The `[device]:port[-port]` port-assignment grammar.
//!
//! A configuration is a comma- or newline-separated list of entries.  Each
//! entry maps a device identifier to either an explicit port or an inclusive
//! probing range:
//!
//! ```text
//! null:9221,:9222-9322
//! ```
//!
//! reads as: the `"null"` discovery listener gets port 9221, and every other
//! device (the empty identifier is a wildcard) gets the next free port in
//! 9222–9322.  A single device can be pinned explicitly:
//!
//! ```text
//! 4ea8dd11e8c4fbc1a2deadbeefa0fd3bbbb268c7:9227
//! ```
//!
//! In the file form of the configuration, blank lines and lines starting
//! with `#` are ignored.
//!
//! Resolution walks the entries in order and returns the first whose device
//! identifier matches exactly or is the wildcard.  A device that matches no
//! entry at all is *unassigned*; callers must treat that differently from a
//! wildcard match, because an unassigned device gets no listener.

use thiserror::Error;

use crate::device::DeviceId;

// ── Error type ────────────────────────────────────────────────────────────────

/// Errors produced while parsing a port configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortConfigError {
    /// An entry had no `:` separating the device identifier from the port.
    #[error("missing ':' in config entry '{entry}'")]
    MissingSeparator { entry: String },

    /// The port (or one bound of a range) was not a valid non-zero u16.
    #[error("invalid port '{port}' in config entry '{entry}'")]
    InvalidPort { entry: String, port: String },

    /// A range was written with its bounds reversed (e.g. `:9322-9222`).
    #[error("inverted port range in config entry '{entry}'")]
    InvertedRange { entry: String },

    /// The configuration contained no entries at all.
    #[error("empty port configuration")]
    Empty,
}

// ── Assignment result ─────────────────────────────────────────────────────────

/// The outcome of resolving a device identifier against the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAssignment {
    /// The device is pinned to exactly this port.
    Port(u16),
    /// The device gets the first free port probed in `min..=max`.
    Range { min: u16, max: u16 },
}

// ── Parsed configuration ──────────────────────────────────────────────────────

/// One parsed `[device]:port[-port]` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    /// Exact device identifier, or empty for the wildcard.
    device_id: DeviceId,
    assignment: PortAssignment,
}

/// A parsed port configuration: an ordered list of entries.
///
/// `PortConfig` is immutable once parsed.  Whether a given instance is kept
/// for the process lifetime or rebuilt per lookup is the concern of
/// [`crate::port_cache::PortCache`], not of this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    entries: Vec<Entry>,
}

impl PortConfig {
    /// Parses a configuration from its textual form.
    ///
    /// Entries are separated by commas or newlines.  Blank entries and
    /// `#`-comment lines are skipped.
    ///
    /// # Errors
    ///
    /// Returns a [`PortConfigError`] if any entry is malformed or the text
    /// contains no entries.  Parsing is all-or-nothing: one bad entry fails
    /// the whole configuration.
    pub fn parse(text: &str) -> Result<Self, PortConfigError> {
        let mut entries = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            for raw in line.split(',') {
                let raw = raw.trim();
                if raw.is_empty() {
                    continue;
                }
                entries.push(Self::parse_entry(raw)?);
            }
        }
        if entries.is_empty() {
            return Err(PortConfigError::Empty);
        }
        Ok(Self { entries })
    }

    /// Parses a single `[device]:port[-port]` entry.
    fn parse_entry(raw: &str) -> Result<Entry, PortConfigError> {
        let (device_id, ports) =
            raw.split_once(':')
                .ok_or_else(|| PortConfigError::MissingSeparator {
                    entry: raw.to_string(),
                })?;

        let assignment = match ports.split_once('-') {
            Some((min, max)) => {
                let min = Self::parse_port(raw, min)?;
                let max = Self::parse_port(raw, max)?;
                if min > max {
                    return Err(PortConfigError::InvertedRange {
                        entry: raw.to_string(),
                    });
                }
                PortAssignment::Range { min, max }
            }
            None => PortAssignment::Port(Self::parse_port(raw, ports)?),
        };

        Ok(Entry {
            device_id: device_id.trim().to_string(),
            assignment,
        })
    }

    /// Parses one port number.  Zero is rejected: ephemeral allocation is a
    /// reactor concern, not something the configuration can request.
    fn parse_port(entry: &str, port: &str) -> Result<u16, PortConfigError> {
        match port.trim().parse::<u16>() {
            Ok(p) if p > 0 => Ok(p),
            _ => Err(PortConfigError::InvalidPort {
                entry: entry.to_string(),
                port: port.trim().to_string(),
            }),
        }
    }

    /// Resolves a device identifier to its assignment.
    ///
    /// Returns the first entry whose device identifier matches exactly or is
    /// the wildcard (empty), in configuration order.  `None` means the device
    /// is unassigned and must not get a listener.
    pub fn resolve(&self, device_id: &str) -> Option<PortAssignment> {
        self.entries
            .iter()
            .find(|e| e.device_id == device_id || e.device_id.is_empty())
            .map(|e| e.assignment)
    }

    /// Device identifiers that are named explicitly (non-wildcard) in the
    /// configuration, in order, without duplicates.
    ///
    /// Used at startup to open listeners for statically configured devices
    /// before any discovery event arrives.
    pub fn static_device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = Vec::new();
        for e in &self.entries {
            if !e.device_id.is_empty() && !ids.iter().any(|d| d == &e.device_id) {
                ids.push(e.device_id.clone());
            }
        }
        ids
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: &str = "null:9221,:9222-9322";

    #[test]
    fn test_default_config_resolves_null_to_explicit_port() {
        // Arrange
        let pc = PortConfig::parse(DEFAULT).unwrap();

        // Act / Assert: the discovery listener is pinned to 9221
        assert_eq!(pc.resolve("null"), Some(PortAssignment::Port(9221)));
    }

    #[test]
    fn test_default_config_resolves_other_devices_to_wildcard_range() {
        let pc = PortConfig::parse(DEFAULT).unwrap();
        assert_eq!(
            pc.resolve("4ea8dd11e8c4fbc1a2deadbeefa0fd3bbbb268c7"),
            Some(PortAssignment::Range {
                min: 9222,
                max: 9322
            })
        );
    }

    #[test]
    fn test_explicit_device_entry_wins_over_wildcard() {
        // Entry order matters: the pinned device must match before the wildcard.
        let pc = PortConfig::parse("abc:9227,:9222-9322").unwrap();
        assert_eq!(pc.resolve("abc"), Some(PortAssignment::Port(9227)));
        assert_eq!(
            pc.resolve("other"),
            Some(PortAssignment::Range {
                min: 9222,
                max: 9322
            })
        );
    }

    #[test]
    fn test_config_without_wildcard_leaves_unknown_devices_unassigned() {
        let pc = PortConfig::parse("abc:9227").unwrap();
        // Unassigned is None, distinct from any wildcard match.
        assert_eq!(pc.resolve("other"), None);
    }

    #[test]
    fn test_newline_separated_entries_parse_like_csv() {
        let pc = PortConfig::parse("null:9221\n:9222-9322\n").unwrap();
        assert_eq!(pc.resolve("null"), Some(PortAssignment::Port(9221)));
        assert!(pc.resolve("x").is_some());
    }

    #[test]
    fn test_comments_and_blank_lines_are_ignored() {
        let text = "# device roster\n\nnull:9221\n# everything else\n:9222-9322\n";
        let pc = PortConfig::parse(text).unwrap();
        assert_eq!(pc.resolve("null"), Some(PortAssignment::Port(9221)));
    }

    #[test]
    fn test_entry_without_separator_is_rejected() {
        // A filesystem path must not parse as a literal configuration; this
        // is what makes the literal-vs-file fallback in PortCache work.
        let result = PortConfig::parse("/etc/wkbridge/ports.csv");
        assert!(matches!(
            result,
            Err(PortConfigError::MissingSeparator { .. })
        ));
    }

    #[test]
    fn test_non_numeric_port_is_rejected() {
        let result = PortConfig::parse("null:html");
        assert!(matches!(result, Err(PortConfigError::InvalidPort { .. })));
    }

    #[test]
    fn test_port_zero_is_rejected() {
        let result = PortConfig::parse("null:0");
        assert!(matches!(result, Err(PortConfigError::InvalidPort { .. })));
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        let result = PortConfig::parse(":9322-9222");
        assert!(matches!(result, Err(PortConfigError::InvertedRange { .. })));
    }

    #[test]
    fn test_single_port_range_is_allowed() {
        let pc = PortConfig::parse(":9222-9222").unwrap();
        assert_eq!(
            pc.resolve("x"),
            Some(PortAssignment::Range {
                min: 9222,
                max: 9222
            })
        );
    }

    #[test]
    fn test_empty_config_is_rejected() {
        assert_eq!(PortConfig::parse(""), Err(PortConfigError::Empty));
        assert_eq!(PortConfig::parse("# only comments\n"), Err(PortConfigError::Empty));
    }

    #[test]
    fn test_static_device_ids_excludes_wildcard_and_dedups() {
        let pc = PortConfig::parse("null:9221,abc:9227,abc:9228,:9222-9322").unwrap();
        assert_eq!(
            pc.static_device_ids(),
            vec!["null".to_string(), "abc".to_string()]
        );
    }

    #[test]
    fn test_whitespace_around_entries_is_tolerated() {
        let pc = PortConfig::parse(" null : 9221 , : 9222-9322 ").unwrap();
        assert_eq!(pc.resolve("null"), Some(PortAssignment::Port(9221)));
    }
}
