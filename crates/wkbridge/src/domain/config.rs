//! Runtime configuration for the bridge process.
//!
//! [`ProxyConfig`] is the single source of truth for all runtime settings.
//! It is built once from CLI arguments in `main.rs` (or from defaults in
//! tests) and handed to the [`crate::Driver`].

use std::time::Duration;

/// Default device-to-port assignment: the discovery roster (`"null"`) on
/// port 9221, every other device on the next free port in 9222–9322.
pub const DEFAULT_CONFIG: &str = "null:9221,:9222-9322";

/// Default hosted DevTools frontend location.
pub const DEFAULT_FRONTEND_URL: &str =
    "https://chrome-devtools-frontend.appspot.com/static/27.0.1453.93/devtools.html";

/// Default address of the device-relay daemon (discovery + inspector attach).
pub const DEFAULT_RELAY_ADDR: &str = "127.0.0.1:27015";

/// Upper bound on a single reactor poll, which is also the worst-case delay
/// before a stop signal is observed.
pub const SELECT_TIMEOUT: Duration = Duration::from_secs(2);

/// All runtime configuration for the bridge.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Port-assignment spec: an inline `[device]:port[-port]` CSV or the
    /// path to a file in that format.  Which one it is gets decided by the
    /// port cache on first lookup, never up front.
    pub config: String,

    /// DevTools frontend path or URL, announced in the device roster.
    /// `None` when the frontend is disabled (`--no-frontend`).
    pub frontend: Option<String>,

    /// Address of the device-relay daemon both collaborators connect to.
    pub relay_addr: String,

    /// Verbose diagnostic output requested on the command line.
    pub debug: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            config: DEFAULT_CONFIG.to_string(),
            frontend: Some(DEFAULT_FRONTEND_URL.to_string()),
            relay_addr: DEFAULT_RELAY_ADDR.to_string(),
            debug: false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_string_matches_documented_default() {
        let cfg = ProxyConfig::default();
        assert_eq!(cfg.config, "null:9221,:9222-9322");
    }

    #[test]
    fn test_default_frontend_is_the_hosted_url() {
        let cfg = ProxyConfig::default();
        let frontend = cfg.frontend.expect("frontend enabled by default");
        assert!(frontend.ends_with(".html"));
        assert!(frontend.starts_with("https://"));
    }

    #[test]
    fn test_config_can_be_cloned() {
        let cfg = ProxyConfig::default();
        let cloned = cfg.clone();
        assert_eq!(cfg.config, cloned.config);
        assert_eq!(cfg.frontend, cloned.frontend);
    }
}
