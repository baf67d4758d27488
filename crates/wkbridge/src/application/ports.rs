//! The trait seams between the orchestrator, the reactor, and the external
//! collaborators.
//!
//! The reactor and the orchestrator drive each other in both directions:
//! the reactor dispatches socket events *to* the orchestrator, and the
//! orchestrator's handlers issue socket operations *back into* the reactor
//! while handling them.  Rather than wiring two objects together with
//! callbacks at construction time, the operations side
//! ([`ReactorOps`]) is passed into every [`BridgeEvents`] handler
//! invocation.  Both sides stay plain owned values and the borrow checker
//! can see that a handler never outlives the dispatch that invoked it.
//!
//! The discovery and inspector collaborators stand in for whole subsystems
//! (the host's device-transport layer and the phone-side inspector relay
//! protocol).  Their wire formats are not wkbridge's concern; the traits
//! here are the entire contract.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

use wkbridge_core::{DeviceEvent, DeviceId};

// ── Connection handles ────────────────────────────────────────────────────────

/// Opaque handle to a connection registered with the reactor.
///
/// Handles are never reused within a process, so a stale `ConnId` held
/// across a close can at worst miss (operations on it are no-ops), never
/// alias a newer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub(crate) u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Any bidirectional byte stream the reactor can adopt: a TCP socket, an
/// in-memory duplex in tests, or whatever transport a collaborator hands
/// back from an attach.
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// Boxed transport handed across the collaborator seams.
pub type BoxedStream = Box<dyn Duplex>;

// ── Status taxonomy ───────────────────────────────────────────────────────────

/// Per-connection outcome of an event handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep the connection; the loop continues.
    Continue,
    /// Tear down this connection only; the loop and all other connections
    /// continue unaffected.
    Disconnect,
}

/// Outcome of an accept decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accept {
    /// Keep the new connection registered.
    Accept,
    /// Close the new connection immediately.  The handler declined it, so
    /// no close notification follows.
    Reject,
}

/// Loop-ending failures.  Anything else is scoped to a single connection.
#[derive(Debug, Error)]
pub enum FatalError {
    /// The device discovery channel closed; no further attach/detach events
    /// can ever arrive.
    #[error("device discovery channel closed")]
    DiscoveryLost,

    /// The reactor's internal event queue failed.
    #[error("socket reactor event queue failed")]
    ReactorQueue,
}

// ── Reactor operations (implemented by the reactor registry) ─────────────────

/// Socket operations available to the orchestrator, both at startup and
/// from inside any event handler.
pub trait ReactorOps {
    /// Binds and listens on a TCP port (0 requests an ephemeral port) and
    /// registers the listener.  Returns the handle and the actual bound
    /// port.
    ///
    /// # Errors
    ///
    /// Returns the bind error; for range probing this is the normal
    /// "port taken, try the next one" signal and is recoverable at the call
    /// site.
    fn listen(&mut self, port: u16) -> io::Result<(ConnId, u16)>;

    /// Starts a non-blocking outbound TCP connection and registers it.
    /// Completion is signaled later, as the first receive on success or a
    /// close notification on failure, never synchronously.  Sends enqueued
    /// before completion flush once the connection establishes.
    fn connect(&mut self, host: &str, port: u16) -> ConnId;

    /// Registers an already-established collaborator transport.
    fn adopt(&mut self, stream: BoxedStream) -> ConnId;

    /// Enqueues bytes for non-blocking write.  Partial writes are retried
    /// internally; a `sent` notification fires once the outbound queue fully
    /// drains.  Returns `false` if the connection is unknown, closing, or a
    /// listener.
    fn send(&mut self, conn: ConnId, bytes: &[u8]) -> bool;

    /// Deregisters and closes a connection.  Exactly one close notification
    /// is delivered for it, on a later dispatch round.  Returns `false` if
    /// the connection was not registered.
    fn remove(&mut self, conn: ConnId) -> bool;
}

// ── Socket events (implemented by the orchestrator) ──────────────────────────

/// The handler set the reactor dispatches into.
///
/// Handlers run to completion on the event-loop task and must never block;
/// the only suspension point in the whole core is the reactor's poll.
pub trait BridgeEvents {
    /// A listening socket accepted `conn` from `peer`.  The new connection
    /// is already registered; returning [`Accept::Reject`] closes it
    /// immediately without a close notification.
    fn on_accept(
        &mut self,
        ops: &mut dyn ReactorOps,
        listener: ConnId,
        conn: ConnId,
        peer: SocketAddr,
    ) -> Result<Accept, FatalError>;

    /// Bytes arrived on an established connection.
    fn on_recv(
        &mut self,
        ops: &mut dyn ReactorOps,
        conn: ConnId,
        bytes: &[u8],
    ) -> Result<Verdict, FatalError>;

    /// A previously queued send has fully flushed.
    fn on_sent(&mut self, ops: &mut dyn ReactorOps, conn: ConnId) -> Result<Verdict, FatalError>;

    /// Delivered exactly once per connection teardown: peer-initiated,
    /// error-initiated, locally requested, or during cleanup.  No further
    /// events follow for `conn`.
    fn on_close(
        &mut self,
        ops: &mut dyn ReactorOps,
        conn: ConnId,
        was_listening: bool,
    ) -> Result<(), FatalError>;
}

// ── Collaborator contracts ────────────────────────────────────────────────────

/// Device attach/detach discovery, backed by the host's device-transport
/// layer.
pub trait DeviceDiscovery {
    /// Opens the discovery channel.  Bytes subsequently read from the
    /// returned stream are fed back through [`DeviceDiscovery::decode`].
    fn subscribe(&mut self) -> io::Result<BoxedStream>;

    /// Decodes a chunk of discovery-channel bytes into zero or more device
    /// events.  The decoder owns any partial-message state between calls.
    fn decode(&mut self, bytes: &[u8]) -> Vec<DeviceEvent>;
}

/// A successfully attached device-side inspector connection.
pub struct AttachedInspector {
    /// Canonical device identifier (may differ in case/form from the id the
    /// frontend's listener was opened under).
    pub device_id: DeviceId,
    /// Human-readable device name, for logging and the roster.
    pub device_name: String,
    /// The raw inspector relay stream.
    pub stream: BoxedStream,
}

impl std::fmt::Debug for AttachedInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedInspector")
            .field("device_id", &self.device_id)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

/// Errors from a device-side inspector attach.  Always Disconnect-scoped:
/// the affected frontend connection is dropped and nothing else.  There is
/// no retry or backoff; the frontend may simply reconnect.
#[derive(Debug, Error)]
pub enum AttachError {
    /// The relay daemon refused the attach (unknown device, device busy).
    #[error("inspector attach refused for device '{device_id}': {reason}")]
    Refused { device_id: DeviceId, reason: String },

    /// Transport-level failure talking to the relay daemon.
    #[error("inspector attach I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Connects frontends to the device-side inspector service.
pub trait InspectorAttach {
    /// Attaches to `device_id`'s inspector.  Bounded, brief blocking is
    /// permitted (the relay daemon is local); implementations must enforce
    /// their own timeout.
    fn attach(&mut self, device_id: &str) -> Result<AttachedInspector, AttachError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────
