//! The process driver: owns the reactor and the orchestrator and runs the
//! poll loop until asked to stop.

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wkbridge_core::PortCache;

use crate::application::ports::{DeviceDiscovery, InspectorAttach};
use crate::application::Orchestrator;
use crate::domain::config::{ProxyConfig, SELECT_TIMEOUT};
use crate::infrastructure::reactor::Reactor;
use crate::infrastructure::relay::{RelayDiscovery, RelayInspector};

/// Owns the whole bridge for one process lifetime.
pub struct Driver {
    reactor: Reactor,
    orchestrator: Orchestrator,
}

impl Driver {
    /// Builds the production wiring: both collaborators talk to the relay
    /// daemon at the configured address.
    ///
    /// # Errors
    ///
    /// Fails if the relay address does not parse.  Nothing connects yet;
    /// that happens in [`Driver::run`].
    pub fn new(config: &ProxyConfig) -> anyhow::Result<Self> {
        let relay_addr = config
            .relay_addr
            .parse()
            .with_context(|| format!("invalid relay address '{}'", config.relay_addr))?;
        Ok(Self::with_collaborators(
            config,
            Box::new(RelayDiscovery::new(relay_addr)),
            Box::new(RelayInspector::new(relay_addr)),
        ))
    }

    /// Wiring with caller-supplied collaborators, for tests.
    pub fn with_collaborators(
        config: &ProxyConfig,
        discovery: Box<dyn DeviceDiscovery>,
        inspector: Box<dyn InspectorAttach>,
    ) -> Self {
        let orchestrator = Orchestrator::new(
            discovery,
            inspector,
            PortCache::new(&config.config),
            config.frontend.clone(),
        );
        Self {
            reactor: Reactor::new(),
            orchestrator,
        }
    }

    /// Runs the bridge until `shutdown` fires or a fatal error ends the
    /// loop.  Teardown always runs; every connection still registered gets
    /// its close notification before this returns.
    ///
    /// # Errors
    ///
    /// Startup failure (discovery unreachable) or a fatal loop error (lost
    /// discovery channel, dead reactor queue).
    pub async fn run(mut self, shutdown: CancellationToken) -> anyhow::Result<()> {
        self.orchestrator
            .start(self.reactor.ops())
            .context("could not subscribe to device discovery")?;
        info!("bridge running");

        let mut outcome = Ok(());
        while !shutdown.is_cancelled() {
            if let Err(e) = self.reactor.select(&mut self.orchestrator, SELECT_TIMEOUT).await {
                outcome = Err(e).context("bridge loop ended");
                break;
            }
        }
        if outcome.is_ok() {
            debug!("stop requested; tearing down");
        }

        self.reactor.cleanup(&mut self.orchestrator);
        info!("bridge stopped");
        outcome
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    use crate::application::ports::{AttachError, AttachedInspector, BoxedStream};
    use wkbridge_core::DeviceEvent;

    struct NoDiscovery;

    impl DeviceDiscovery for NoDiscovery {
        fn subscribe(&mut self) -> io::Result<BoxedStream> {
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }

        fn decode(&mut self, _bytes: &[u8]) -> Vec<DeviceEvent> {
            Vec::new()
        }
    }

    struct QuietDiscovery;

    impl DeviceDiscovery for QuietDiscovery {
        fn subscribe(&mut self) -> io::Result<BoxedStream> {
            let (ours, theirs) = tokio::io::duplex(64);
            std::mem::forget(theirs);
            Ok(Box::new(ours))
        }

        fn decode(&mut self, _bytes: &[u8]) -> Vec<DeviceEvent> {
            Vec::new()
        }
    }

    struct NoInspector;

    impl InspectorAttach for NoInspector {
        fn attach(&mut self, device_id: &str) -> Result<AttachedInspector, AttachError> {
            Err(AttachError::Refused {
                device_id: device_id.to_string(),
                reason: "not wired in this test".to_string(),
            })
        }
    }

    /// Each caller gets its own roster port so parallel tests never collide.
    fn test_config(roster_port: u16) -> ProxyConfig {
        ProxyConfig {
            config: format!("null:{roster_port}"),
            ..ProxyConfig::default()
        }
    }

    #[test]
    fn test_new_rejects_unparseable_relay_address() {
        let config = ProxyConfig {
            relay_addr: "not-an-address".to_string(),
            ..ProxyConfig::default()
        };
        assert!(Driver::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_run_fails_when_discovery_is_unreachable() {
        let driver = Driver::with_collaborators(
            &test_config(39901),
            Box::new(NoDiscovery),
            Box::new(NoInspector),
        );
        let result = driver.run(CancellationToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_exits_cleanly_once_cancelled() {
        let driver = Driver::with_collaborators(
            &test_config(39902),
            Box::new(QuietDiscovery),
            Box::new(NoInspector),
        );
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            canceller.cancel();
        });

        driver.run(shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_returns_error_when_discovery_channel_dies() {
        struct DyingDiscovery;

        impl DeviceDiscovery for DyingDiscovery {
            fn subscribe(&mut self) -> io::Result<BoxedStream> {
                // Far end dropped immediately: the channel EOFs on the
                // first poll round.
                let (ours, theirs) = tokio::io::duplex(64);
                drop(theirs);
                Ok(Box::new(ours))
            }

            fn decode(&mut self, _bytes: &[u8]) -> Vec<DeviceEvent> {
                Vec::new()
            }
        }

        let driver = Driver::with_collaborators(
            &test_config(39903),
            Box::new(DyingDiscovery),
            Box::new(NoInspector),
        );
        let result = driver.run(CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
