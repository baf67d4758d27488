//! The socket reactor: non-blocking socket multiplexing over tokio.
//!
//! Each registered stream gets one spawned task that owns the socket and
//! does nothing but shovel bytes: reads are forwarded to a single process-
//! wide event queue, writes are drained from a per-connection channel.  All
//! *decisions* happen on the dispatch side: [`Reactor::select`] pulls
//! events off the queue one at a time and hands them to the
//! [`BridgeEvents`] handler together with a [`ReactorOps`] view of the
//! registry.  Handler state is therefore mutated from exactly one task and
//! needs no locking, while the byte shoveling still overlaps freely.
//!
//! # Notification guarantees
//!
//! - `recv`/`sent` events for a connection that has since been removed are
//!   silently discarded; the handler never sees a connection after its
//!   close notification.
//! - Exactly one close notification is delivered per registered connection,
//!   whether the teardown was peer-initiated, error-initiated, requested
//!   through [`ReactorOps::remove`], or forced by [`Reactor::cleanup`].
//! - A connection rejected from `on_accept` is closed with *no* close
//!   notification; the handler declined it and never owned it.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::application::ports::{
    Accept, BoxedStream, BridgeEvents, ConnId, FatalError, ReactorOps, Verdict,
};

/// Read chunk size for every connection task.
const READ_BUF_SIZE: usize = 4096;

// ── Raw socket events ─────────────────────────────────────────────────────────

/// What the per-socket tasks report to the dispatch loop.
enum RawEvent {
    /// A listener accepted a new inbound stream.
    Accepted {
        listener: ConnId,
        stream: TcpStream,
        peer: SocketAddr,
    },
    /// Bytes arrived on an established connection.
    Recv { conn: ConnId, bytes: Vec<u8> },
    /// The outbound queue of a connection fully drained.
    Sent { conn: ConnId },
    /// A connection's task ended, or removal was requested.
    Closed { conn: ConnId },
}

// ── Registry ──────────────────────────────────────────────────────────────────

/// Book-keeping for one registered connection.
struct Registration {
    listening: bool,
    /// Set once removal is requested; filters stale recv/sent events until
    /// the close notification goes out.
    closing: bool,
    /// Write queue into the connection task.  `None` for listeners and for
    /// connections already asked to close.
    write_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Registration {
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// The connection registry: allocates handles, spawns socket tasks, and
/// routes operations to them.  This is the [`ReactorOps`] implementation
/// handed to every event handler.
pub struct Sockets {
    next_id: u64,
    table: HashMap<ConnId, Registration>,
    event_tx: mpsc::UnboundedSender<RawEvent>,
}

impl Sockets {
    fn alloc(&mut self) -> ConnId {
        self.next_id += 1;
        ConnId(self.next_id)
    }

    fn is_live(&self, conn: ConnId) -> bool {
        self.table.get(&conn).is_some_and(|r| !r.closing)
    }

    /// Removes the registration outright.  The caller decides whether a
    /// close notification follows; dispatch uses the returned registration
    /// to deliver it exactly once.
    fn deregister(&mut self, conn: ConnId) -> Option<Registration> {
        let mut reg = self.table.remove(&conn)?;
        reg.abort_tasks();
        Some(reg)
    }

    /// Closes a rejected connection with no notification: the registration
    /// and its task just vanish, and the task's final `Closed` event finds
    /// nothing to deliver to.
    fn drop_quiet(&mut self, conn: ConnId) {
        self.deregister(conn);
    }

    /// Registers an accepted TCP stream.
    fn adopt_tcp(&mut self, stream: TcpStream) -> ConnId {
        self.adopt(Box::new(stream))
    }

    /// Spawns the read/write task for a stream and registers it.
    fn register_stream(&mut self, stream: BoxedStream) -> ConnId {
        let conn = self.alloc();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(connection_loop(conn, stream, write_rx, self.event_tx.clone()));
        self.table.insert(
            conn,
            Registration {
                listening: false,
                closing: false,
                write_tx: Some(write_tx),
                tasks: vec![task],
            },
        );
        conn
    }
}

impl ReactorOps for Sockets {
    fn listen(&mut self, port: u16) -> io::Result<(ConnId, u16)> {
        // Bind synchronously so a taken port is reported to the caller right
        // here, then hand the socket to tokio for accepting.
        let std_listener = std::net::TcpListener::bind(("0.0.0.0", port))?;
        std_listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(std_listener)?;
        let bound = listener.local_addr()?.port();

        let conn = self.alloc();
        let event_tx = self.event_tx.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if event_tx
                            .send(RawEvent::Accepted {
                                listener: conn,
                                stream,
                                peer,
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                    // Transient accept failures (e.g. the peer aborted
                    // mid-handshake) do not take the listener down.
                    Err(e) => debug!("accept error on {conn}: {e}"),
                }
            }
        });

        self.table.insert(
            conn,
            Registration {
                listening: true,
                closing: false,
                write_tx: None,
                tasks: vec![task],
            },
        );
        Ok((conn, bound))
    }

    fn connect(&mut self, host: &str, port: u16) -> ConnId {
        let conn = self.alloc();
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let event_tx = self.event_tx.clone();
        let addr = format!("{host}:{port}");
        // Establishment happens on the task; failure surfaces as the
        // connection's close notification.  Sends queued meanwhile sit in
        // the write channel and flush once connected.
        let task = tokio::spawn(async move {
            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    connection_loop(conn, Box::new(stream), write_rx, event_tx).await;
                }
                Err(e) => {
                    debug!("outbound connect to {addr} failed ({conn}): {e}");
                    let _ = event_tx.send(RawEvent::Closed { conn });
                }
            }
        });
        self.table.insert(
            conn,
            Registration {
                listening: false,
                closing: false,
                write_tx: Some(write_tx),
                tasks: vec![task],
            },
        );
        conn
    }

    fn adopt(&mut self, stream: BoxedStream) -> ConnId {
        self.register_stream(stream)
    }

    fn send(&mut self, conn: ConnId, bytes: &[u8]) -> bool {
        match self.table.get(&conn) {
            Some(reg) if !reg.closing => match &reg.write_tx {
                Some(tx) => tx.send(bytes.to_vec()).is_ok(),
                None => false, // listener
            },
            _ => false,
        }
    }

    fn remove(&mut self, conn: ConnId) -> bool {
        let Some(reg) = self.table.get_mut(&conn) else {
            return false;
        };
        if reg.closing {
            return false;
        }
        reg.closing = true;
        // Dropping the write side tells the connection task to flush,
        // shut down, and exit.  Listener tasks are just aborted.
        reg.write_tx = None;
        if reg.listening {
            reg.abort_tasks();
        }
        // The explicit event guarantees a close notification even if the
        // task is already gone.  Duplicates from the task's own exit are
        // deduplicated at dispatch.
        let _ = self.event_tx.send(RawEvent::Closed { conn });
        true
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

/// Owns one stream until it dies: forwards reads to the event queue, drains
/// queued writes, and reports the close.
async fn connection_loop(
    conn: ConnId,
    stream: BoxedStream,
    mut write_rx: mpsc::UnboundedReceiver<Vec<u8>>,
    event_tx: mpsc::UnboundedSender<RawEvent>,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        tokio::select! {
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => {
                    if event_tx
                        .send(RawEvent::Recv { conn, bytes: buf[..n].to_vec() })
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    debug!("read error on {conn}: {e}");
                    break;
                }
            },
            queued = write_rx.recv() => match queued {
                Some(bytes) => {
                    if writer.write_all(&bytes).await.is_err() {
                        break;
                    }
                    // Only report once the whole queue has drained; a burst
                    // of sends yields one notification, not one per chunk.
                    if write_rx.is_empty() && event_tx.send(RawEvent::Sent { conn }).is_err() {
                        return;
                    }
                }
                // Local removal: the registry dropped our write channel.
                None => {
                    let _ = writer.shutdown().await;
                    break;
                }
            },
        }
    }
    let _ = event_tx.send(RawEvent::Closed { conn });
}

// ── Reactor ───────────────────────────────────────────────────────────────────

/// The dispatch half of the reactor: owns the registry and the event queue.
pub struct Reactor {
    sockets: Sockets,
    event_rx: mpsc::UnboundedReceiver<RawEvent>,
}

impl Default for Reactor {
    fn default() -> Self {
        Self::new()
    }
}

impl Reactor {
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            sockets: Sockets {
                next_id: 0,
                table: HashMap::new(),
                event_tx,
            },
            event_rx,
        }
    }

    /// The registry view, for issuing socket operations outside a dispatch
    /// (startup, mainly).
    pub fn ops(&mut self) -> &mut Sockets {
        &mut self.sockets
    }

    /// One poll round: waits up to `timeout` for socket activity, then
    /// dispatches everything currently queued and returns.  An idle round
    /// returns `Ok(())` so the caller can re-check its stop condition.
    ///
    /// # Errors
    ///
    /// Propagates the first [`FatalError`] a handler returns; per-connection
    /// trouble never surfaces here.
    pub async fn select(
        &mut self,
        handler: &mut dyn BridgeEvents,
        timeout: Duration,
    ) -> Result<(), FatalError> {
        let first = match tokio::time::timeout(timeout, self.event_rx.recv()).await {
            Err(_) => return Ok(()),
            Ok(None) => return Err(FatalError::ReactorQueue),
            Ok(Some(ev)) => ev,
        };
        self.dispatch(handler, first)?;
        while let Ok(ev) = self.event_rx.try_recv() {
            self.dispatch(handler, ev)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, handler: &mut dyn BridgeEvents, ev: RawEvent) -> Result<(), FatalError> {
        match ev {
            RawEvent::Accepted {
                listener,
                stream,
                peer,
            } => {
                // The listener may have been removed while this sat queued.
                if !self.sockets.is_live(listener) {
                    debug!("late accept from {peer} on removed listener {listener}");
                    return Ok(());
                }
                let conn = self.sockets.adopt_tcp(stream);
                match handler.on_accept(&mut self.sockets, listener, conn, peer)? {
                    Accept::Accept => {}
                    Accept::Reject => self.sockets.drop_quiet(conn),
                }
                Ok(())
            }
            RawEvent::Recv { conn, bytes } => {
                if !self.sockets.is_live(conn) {
                    return Ok(());
                }
                if handler.on_recv(&mut self.sockets, conn, &bytes)? == Verdict::Disconnect {
                    self.sockets.remove(conn);
                }
                Ok(())
            }
            RawEvent::Sent { conn } => {
                if !self.sockets.is_live(conn) {
                    return Ok(());
                }
                if handler.on_sent(&mut self.sockets, conn)? == Verdict::Disconnect {
                    self.sockets.remove(conn);
                }
                Ok(())
            }
            RawEvent::Closed { conn } => {
                // First Closed for a connection wins; removal plus the
                // task's own exit may both have queued one.
                let Some(reg) = self.sockets.deregister(conn) else {
                    return Ok(());
                };
                handler.on_close(&mut self.sockets, conn, reg.listening)
            }
        }
    }

    /// Tears down every remaining connection, delivering each pending close
    /// notification exactly once, then drains the queue.  Handler errors are
    /// logged and ignored; cleanup always finishes.
    pub fn cleanup(&mut self, handler: &mut dyn BridgeEvents) {
        let mut conns: Vec<ConnId> = self.sockets.table.keys().copied().collect();
        conns.sort();
        for conn in conns {
            if let Some(reg) = self.sockets.deregister(conn) {
                if let Err(e) = handler.on_close(&mut self.sockets, conn, reg.listening) {
                    warn!("close handler failed during cleanup of {conn}: {e}");
                }
            }
        }
        while self.event_rx.try_recv().is_ok() {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
