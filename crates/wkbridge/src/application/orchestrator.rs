//! The bridge orchestrator: the handler set driven by the socket reactor.
//!
//! The orchestrator owns every piece of bridge state (the discovery
//! subscription, one listener per attached device, and the table pairing
//! frontend connections to device-side inspector connections) and mutates
//! it only from reactor dispatch, so the whole component is logically
//! single-threaded.
//!
//! # Connection roles
//!
//! Every registered connection the orchestrator cares about has exactly one
//! role in its typed table:
//!
//! - **Discovery** – the device attach/detach channel.
//! - **Listener** – a bound port accepting frontends for one device (or the
//!   `"null"` roster listener).
//! - **Frontend / Device** – the two halves of a bridged pair, each linked
//!   to its peer.
//! - **Roster** – a short-lived connection on the `"null"` listener that is
//!   sent the device roster and closed once it flushes.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use wkbridge_core::{DeviceEvent, DeviceId, PortAssignment, PortCache, NULL_DEVICE_ID};

use crate::application::ports::{
    Accept, BridgeEvents, ConnId, DeviceDiscovery, FatalError, InspectorAttach, ReactorOps, Verdict,
};

// ── Connection state ──────────────────────────────────────────────────────────

/// What a registered connection means to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConnRole {
    /// The device discovery channel.
    Discovery,
    /// A listening socket accepting frontends for `device_id`.
    Listener { device_id: DeviceId },
    /// Frontend half of a bridged pair.
    Frontend { peer: ConnId, device_id: DeviceId },
    /// Device-side inspector half of a bridged pair.
    Device { peer: ConnId, device_id: DeviceId },
    /// A roster reply in flight on the `"null"` listener.
    Roster,
}

/// One open listener and the assignment that produced it.
#[derive(Debug, Clone)]
struct ListenerEntry {
    conn: ConnId,
    port: u16,
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

/// The connection-bridging orchestrator.  Implements [`BridgeEvents`]; all
/// socket work goes back out through the [`ReactorOps`] handed to each
/// handler.
pub struct Orchestrator {
    discovery: Box<dyn DeviceDiscovery>,
    inspector: Box<dyn InspectorAttach>,
    port_cache: PortCache,
    frontend_url: Option<String>,

    /// Typed role table, keyed by connection handle.
    conns: HashMap<ConnId, ConnRole>,
    /// Open listeners by device identifier.
    listeners: HashMap<DeviceId, ListenerEntry>,
}

impl Orchestrator {
    /// Creates an orchestrator over its collaborators.  Nothing is opened
    /// until [`Orchestrator::start`].
    pub fn new(
        discovery: Box<dyn DeviceDiscovery>,
        inspector: Box<dyn InspectorAttach>,
        port_cache: PortCache,
        frontend_url: Option<String>,
    ) -> Self {
        Self {
            discovery,
            inspector,
            port_cache,
            frontend_url,
            conns: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    /// Subscribes to device discovery and opens listeners for every device
    /// named explicitly in the configuration (including the `"null"` roster
    /// listener with the default configuration).
    ///
    /// # Errors
    ///
    /// Returns an error only if the discovery subscription itself fails.
    /// A per-device resolution or bind failure is logged and skipped; other
    /// devices are unaffected.
    pub fn start(&mut self, ops: &mut dyn ReactorOps) -> io::Result<()> {
        let stream = self.discovery.subscribe()?;
        let conn = ops.adopt(stream);
        self.conns.insert(conn, ConnRole::Discovery);
        info!("subscribed to device discovery ({conn})");

        match self.port_cache.static_device_ids() {
            Ok(ids) => {
                for device_id in ids {
                    self.open_listener(ops, &device_id);
                }
            }
            // A file-backed configuration may be unreadable right now and
            // readable on a later lookup, so startup carries on.
            Err(e) => warn!("could not enumerate statically configured devices: {e}"),
        }
        Ok(())
    }

    /// The port currently serving `device_id`, if a listener is open.
    pub fn listener_port(&self, device_id: &str) -> Option<u16> {
        self.listeners.get(device_id).map(|e| e.port)
    }

    /// Number of fully established bridged pairs.
    pub fn pair_count(&self) -> usize {
        self.conns
            .values()
            .filter(|r| matches!(r, ConnRole::Frontend { .. }))
            .count()
    }

    // ── Listener lifecycle ───────────────────────────────────────────────────

    /// Resolves `device_id`'s assignment and opens its listener.  Returns
    /// the bound port, or `None` if the device is unassigned, resolution
    /// failed, or every port in its range is taken.
    fn open_listener(&mut self, ops: &mut dyn ReactorOps, device_id: &str) -> Option<u16> {
        if let Some(entry) = self.listeners.get(device_id) {
            debug!("device {device_id} already has a listener on {}", entry.port);
            return Some(entry.port);
        }

        let (min, max) = match self.port_cache.resolve(device_id) {
            Ok(PortAssignment::Port(p)) => (p, p),
            Ok(PortAssignment::Range { min, max }) => (min, max),
            Err(e) => {
                warn!("not serving device {device_id}: {e}");
                return None;
            }
        };

        // Deterministic probe: ascending from the bottom of the range, first
        // successful bind wins.
        for port in min..=max {
            match ops.listen(port) {
                Ok((conn, bound)) => {
                    self.conns.insert(
                        conn,
                        ConnRole::Listener {
                            device_id: device_id.to_string(),
                        },
                    );
                    self.listeners.insert(
                        device_id.to_string(),
                        ListenerEntry { conn, port: bound },
                    );
                    info!("device {device_id} listening on port {bound} ({conn})");
                    return Some(bound);
                }
                Err(e) => debug!("port {port} unavailable for device {device_id}: {e}"),
            }
        }

        warn!("no free port for device {device_id} in {min}-{max}; not serving it");
        None
    }

    /// Tears down a detached device: its listener and every bridged pair
    /// carrying its identifier.
    fn detach_device(&mut self, ops: &mut dyn ReactorOps, device_id: &str) {
        if let Some(entry) = self.listeners.remove(device_id) {
            info!("device {device_id} detached; closing port {}", entry.port);
            ops.remove(entry.conn);
        } else {
            debug!("detach for unknown device {device_id} ignored");
        }

        let pair_conns: Vec<ConnId> = self
            .conns
            .iter()
            .filter_map(|(conn, role)| match role {
                ConnRole::Frontend { device_id: d, .. } | ConnRole::Device { device_id: d, .. }
                    if d == device_id =>
                {
                    Some(*conn)
                }
                _ => None,
            })
            .collect();
        for conn in pair_conns {
            ops.remove(conn);
        }
    }

    /// Applies one decoded discovery event.
    fn on_device_event(&mut self, ops: &mut dyn ReactorOps, event: DeviceEvent) {
        match event {
            DeviceEvent::Attached { device_id } => {
                if device_id == NULL_DEVICE_ID {
                    // The sentinel is not a real device; its listener is
                    // opened from the static configuration at startup.
                    debug!("ignoring attach event for the '{NULL_DEVICE_ID}' sentinel");
                    return;
                }
                self.open_listener(ops, &device_id);
            }
            DeviceEvent::Detached { device_id } => self.detach_device(ops, &device_id),
        }
    }

    // ── Roster ───────────────────────────────────────────────────────────────

    /// Plaintext roster served on the `"null"` listener: one
    /// `<device-id>\t<port>` line per served device, sorted by port.
    fn roster_text(&self) -> String {
        let mut out = String::from("# wkbridge device roster\n");
        if let Some(url) = &self.frontend_url {
            out.push_str(&format!("# frontend: {url}\n"));
        }
        let mut rows: Vec<(&str, u16)> = self
            .listeners
            .iter()
            .filter(|(device_id, _)| device_id.as_str() != NULL_DEVICE_ID)
            .map(|(device_id, entry)| (device_id.as_str(), entry.port))
            .collect();
        rows.sort_by_key(|(_, port)| *port);
        for (device_id, port) in rows {
            out.push_str(&format!("{device_id}\t{port}\n"));
        }
        out
    }
}

// ── Event handlers ────────────────────────────────────────────────────────────

impl BridgeEvents for Orchestrator {
    fn on_accept(
        &mut self,
        ops: &mut dyn ReactorOps,
        listener: ConnId,
        conn: ConnId,
        peer: SocketAddr,
    ) -> Result<Accept, FatalError> {
        let device_id = match self.conns.get(&listener) {
            Some(ConnRole::Listener { device_id }) => device_id.clone(),
            _ => {
                debug!("accept on unknown listener {listener}; rejecting {peer}");
                return Ok(Accept::Reject);
            }
        };

        if device_id == NULL_DEVICE_ID {
            // Roster request: push the device list, close once it flushes.
            let roster = self.roster_text();
            if !ops.send(conn, roster.as_bytes()) {
                return Ok(Accept::Reject);
            }
            self.conns.insert(conn, ConnRole::Roster);
            debug!("roster sent to {peer} ({conn})");
            return Ok(Accept::Accept);
        }

        // Pair the frontend with a fresh device-side inspector connection.
        // Either both halves register together or the frontend is rejected;
        // no half-pair ever survives this block.
        match self.inspector.attach(&device_id) {
            Ok(attached) => {
                let dev_conn = ops.adopt(attached.stream);
                // Pair roles carry the discovery-provided identifier so a
                // later detach for it finds them; the canonical id the
                // inspector reports may differ in form and is only logged.
                self.conns.insert(
                    conn,
                    ConnRole::Frontend {
                        peer: dev_conn,
                        device_id: device_id.clone(),
                    },
                );
                self.conns.insert(
                    dev_conn,
                    ConnRole::Device {
                        peer: conn,
                        device_id: device_id.clone(),
                    },
                );
                info!(
                    "paired frontend {peer} ({conn}) with device {} \"{}\" ({dev_conn})",
                    attached.device_id, attached.device_name
                );
                Ok(Accept::Accept)
            }
            Err(e) => {
                warn!("dropping frontend {peer}: {e}");
                Ok(Accept::Reject)
            }
        }
    }

    fn on_recv(
        &mut self,
        ops: &mut dyn ReactorOps,
        conn: ConnId,
        bytes: &[u8],
    ) -> Result<Verdict, FatalError> {
        match self.conns.get(&conn) {
            Some(ConnRole::Discovery) => {
                for event in self.discovery.decode(bytes) {
                    self.on_device_event(ops, event);
                }
                Ok(Verdict::Continue)
            }
            Some(ConnRole::Frontend { peer, .. }) | Some(ConnRole::Device { peer, .. }) => {
                // Verbatim relay to the paired half.  A vanished peer means
                // the pair is mid-teardown; drop this half too.
                let peer = *peer;
                if ops.send(peer, bytes) {
                    Ok(Verdict::Continue)
                } else {
                    debug!("relay target {peer} gone; dropping {conn}");
                    Ok(Verdict::Disconnect)
                }
            }
            // Roster connections may send a request (e.g. an HTTP GET); the
            // reply is the same roster regardless, already queued.
            Some(ConnRole::Roster) => Ok(Verdict::Continue),
            Some(ConnRole::Listener { .. }) | None => {
                debug!("bytes on unexpected connection {conn} ignored");
                Ok(Verdict::Continue)
            }
        }
    }

    fn on_sent(&mut self, ops: &mut dyn ReactorOps, conn: ConnId) -> Result<Verdict, FatalError> {
        // Sends are fire-and-forget for relay halves; the only connection
        // that waits for its flush is a roster reply, closed here.
        if matches!(self.conns.get(&conn), Some(ConnRole::Roster)) {
            ops.remove(conn);
        }
        Ok(Verdict::Continue)
    }

    fn on_close(
        &mut self,
        ops: &mut dyn ReactorOps,
        conn: ConnId,
        _was_listening: bool,
    ) -> Result<(), FatalError> {
        let Some(role) = self.conns.remove(&conn) else {
            return Ok(());
        };
        match role {
            ConnRole::Discovery => {
                // Without discovery the bridge can never see another device;
                // treat it as loop-ending.
                warn!("device discovery channel closed");
                Err(FatalError::DiscoveryLost)
            }
            ConnRole::Listener { device_id } => {
                // Drop the entry only if it still points at this connection;
                // a replacement listener may already be open.
                if self
                    .listeners
                    .get(&device_id)
                    .is_some_and(|e| e.conn == conn)
                {
                    self.listeners.remove(&device_id);
                }
                debug!("listener for device {device_id} closed ({conn})");
                Ok(())
            }
            ConnRole::Frontend { peer, device_id } | ConnRole::Device { peer, device_id } => {
                // Closing either half schedules teardown of the other.  The
                // peer's role is gone from the table by the time its own
                // close notification arrives, so the teardown never echoes.
                if self.conns.contains_key(&peer) {
                    debug!("closing peer {peer} of {conn} (device {device_id})");
                    ops.remove(peer);
                }
                Ok(())
            }
            ConnRole::Roster => Ok(()),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
