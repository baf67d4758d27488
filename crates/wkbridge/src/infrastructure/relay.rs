//! TCP collaborators speaking the device-relay daemon's line protocol.
//!
//! The relay daemon is a separate local process that owns the actual device
//! transport.  wkbridge talks to it over two kinds of plain TCP connection:
//!
//! - **Discovery**: connect and the daemon streams `attach <device-id>` /
//!   `detach <device-id>` lines for as long as the connection lives.
//! - **Inspector attach**: connect, send `attach <device-id>\n`, read one
//!   reply line, either `ok <canonical-id> <name>` or `err <reason>`.
//!   After that the same connection *is* the raw inspector relay stream.
//!
//! Both are deliberately thin: no reconnect, no backoff, no framing beyond
//! newline-delimited ASCII commands.  A broken discovery channel ends the
//! bridge; a failed attach drops one frontend.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use tracing::{debug, warn};

use wkbridge_core::DeviceEvent;

use crate::application::ports::{
    AttachError, AttachedInspector, BoxedStream, DeviceDiscovery, InspectorAttach,
};

/// Bound on connect and on the attach reply read.  The daemon is local, so
/// anything slower than this is a hang, not latency.  Attach runs on the
/// dispatch side, so connect plus reply read caps how long one attach can
/// hold up unrelated dispatching; the total must stay within one poll round.
const RELAY_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest accepted protocol line, including the newline.
const MAX_LINE: usize = 4096;

/// Opens a relay connection, still in blocking mode.
fn connect_relay(addr: &SocketAddr) -> io::Result<TcpStream> {
    let stream = TcpStream::connect_timeout(addr, RELAY_IO_TIMEOUT)?;
    stream.set_read_timeout(Some(RELAY_IO_TIMEOUT))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

/// Converts an established blocking relay connection into a reactor-ready
/// stream.
fn into_boxed(stream: TcpStream) -> io::Result<BoxedStream> {
    stream.set_read_timeout(None)?;
    stream.set_nonblocking(true)?;
    Ok(Box::new(tokio::net::TcpStream::from_std(stream)?))
}

// ── Line decoding ─────────────────────────────────────────────────────────────

/// Accumulates raw bytes into newline-delimited lines across reads.
///
/// Discovery reads arrive in arbitrary chunks; a line may span several reads
/// or a single read may carry several lines.  Anything longer than
/// [`MAX_LINE`] without a newline is discarded wholesale.
#[derive(Debug, Default)]
struct LineDecoder {
    partial: Vec<u8>,
}

impl LineDecoder {
    /// Feeds a chunk and returns every line completed by it, trimmed and
    /// lossily decoded.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in bytes {
            if b == b'\n' {
                let line = String::from_utf8_lossy(&self.partial).trim().to_string();
                self.partial.clear();
                if !line.is_empty() {
                    lines.push(line);
                }
            } else {
                if self.partial.len() >= MAX_LINE {
                    warn!("oversized relay protocol line discarded");
                    self.partial.clear();
                }
                self.partial.push(b);
            }
        }
        lines
    }
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// Production [`DeviceDiscovery`] over the relay daemon's event stream.
pub struct RelayDiscovery {
    addr: SocketAddr,
    decoder: LineDecoder,
}

impl RelayDiscovery {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            decoder: LineDecoder::default(),
        }
    }
}

impl DeviceDiscovery for RelayDiscovery {
    fn subscribe(&mut self) -> io::Result<BoxedStream> {
        let stream = connect_relay(&self.addr)?;
        debug!("discovery channel open to {}", self.addr);
        into_boxed(stream)
    }

    fn decode(&mut self, bytes: &[u8]) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        for line in self.decoder.push(bytes) {
            if let Some(id) = line.strip_prefix("attach ") {
                events.push(DeviceEvent::Attached {
                    device_id: id.trim().to_string(),
                });
            } else if let Some(id) = line.strip_prefix("detach ") {
                events.push(DeviceEvent::Detached {
                    device_id: id.trim().to_string(),
                });
            } else {
                // Future daemon versions may emit lines we don't know;
                // skipping keeps the channel usable.
                warn!("unrecognized discovery line skipped: {line:?}");
            }
        }
        events
    }
}

// ── Inspector attach ──────────────────────────────────────────────────────────

/// Production [`InspectorAttach`] over the relay daemon.
pub struct RelayInspector {
    addr: SocketAddr,
}

impl RelayInspector {
    pub fn new(addr: SocketAddr) -> Self {
        Self { addr }
    }
}

/// Reads the single attach reply line, blocking, byte at a time.  The reply
/// is a handful of bytes from a local daemon; buffering here would risk
/// swallowing the first bytes of the inspector stream that follows it.
fn read_reply_line(stream: &mut TcpStream) -> io::Result<String> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "relay daemon closed before replying",
                ))
            }
            _ => {
                if byte[0] == b'\n' {
                    return Ok(String::from_utf8_lossy(&line).trim().to_string());
                }
                if line.len() >= MAX_LINE {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "oversized attach reply",
                    ));
                }
                line.push(byte[0]);
            }
        }
    }
}

/// Parses `ok <canonical-id> <name>` / `err <reason>`.
fn parse_attach_reply(line: &str, device_id: &str) -> Result<(String, String), AttachError> {
    if let Some(rest) = line.strip_prefix("ok ") {
        let mut parts = rest.trim().splitn(2, ' ');
        let canonical = parts.next().unwrap_or_default();
        if canonical.is_empty() {
            return Err(AttachError::Refused {
                device_id: device_id.to_string(),
                reason: format!("malformed attach reply: {line:?}"),
            });
        }
        let name = parts.next().unwrap_or("").trim().to_string();
        return Ok((canonical.to_string(), name));
    }
    if let Some(reason) = line.strip_prefix("err ") {
        return Err(AttachError::Refused {
            device_id: device_id.to_string(),
            reason: reason.trim().to_string(),
        });
    }
    Err(AttachError::Refused {
        device_id: device_id.to_string(),
        reason: format!("malformed attach reply: {line:?}"),
    })
}

impl InspectorAttach for RelayInspector {
    fn attach(&mut self, device_id: &str) -> Result<AttachedInspector, AttachError> {
        let mut stream = connect_relay(&self.addr)?;
        stream.write_all(format!("attach {device_id}\n").as_bytes())?;
        let reply = read_reply_line(&mut stream)?;
        let (canonical_id, device_name) = parse_attach_reply(&reply, device_id)?;
        debug!("attached to device {canonical_id} ({device_name:?}) via {}", self.addr);
        Ok(AttachedInspector {
            device_id: canonical_id,
            device_name,
            stream: into_boxed(stream)?,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;

    #[test]
    fn test_decoder_splits_multiple_lines_in_one_chunk() {
        let mut decoder = LineDecoder::default();
        let lines = decoder.push(b"attach a\ndetach b\n");
        assert_eq!(lines, vec!["attach a", "detach b"]);
    }

    #[test]
    fn test_decoder_buffers_a_line_split_across_chunks() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"atta").is_empty());
        assert!(decoder.push(b"ch dev1").is_empty());
        assert_eq!(decoder.push(b"\n"), vec!["attach dev1"]);
    }

    #[test]
    fn test_decoder_discards_oversized_garbage() {
        let mut decoder = LineDecoder::default();
        decoder.push(&vec![b'x'; MAX_LINE + 100]);
        // The next real line still decodes.
        let lines = decoder.push(b"\nattach dev1\n");
        assert_eq!(lines.last().map(String::as_str), Some("attach dev1"));
    }

    #[test]
    fn test_discovery_decode_skips_unknown_lines() {
        let mut discovery = RelayDiscovery::new("127.0.0.1:1".parse().unwrap());
        let events = discovery.decode(b"hello v2\nattach dev1\n");
        assert_eq!(
            events,
            vec![DeviceEvent::Attached {
                device_id: "dev1".to_string()
            }]
        );
    }

    #[test]
    fn test_attach_reply_ok_with_spaced_name() {
        let (id, name) = parse_attach_reply("ok ABC123 Anna's Phone", "abc123").unwrap();
        assert_eq!(id, "ABC123");
        assert_eq!(name, "Anna's Phone");
    }

    #[test]
    fn test_attach_reply_ok_without_name() {
        let (id, name) = parse_attach_reply("ok ABC123", "abc123").unwrap();
        assert_eq!(id, "ABC123");
        assert_eq!(name, "");
    }

    #[test]
    fn test_attach_reply_err_is_refused_with_reason() {
        let e = parse_attach_reply("err device busy", "abc").unwrap_err();
        match e {
            AttachError::Refused { device_id, reason } => {
                assert_eq!(device_id, "abc");
                assert_eq!(reason, "device busy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_attach_reply_garbage_is_refused() {
        assert!(matches!(
            parse_attach_reply("banana", "abc"),
            Err(AttachError::Refused { .. })
        ));
    }

    #[tokio::test]
    async fn test_attach_round_trip_against_scripted_daemon() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let daemon = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "attach dev1\n");
            let mut stream = stream;
            stream.write_all(b"ok DEV1 Test Phone\n").unwrap();
        });

        let mut inspector = RelayInspector::new(addr);
        let attached = inspector.attach("dev1").unwrap();

        assert_eq!(attached.device_id, "DEV1");
        assert_eq!(attached.device_name, "Test Phone");
        daemon.join().unwrap();
    }

    #[tokio::test]
    async fn test_attach_refusal_surfaces_daemon_reason() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let daemon = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            stream.write_all(b"err no such device\n").unwrap();
        });

        let mut inspector = RelayInspector::new(addr);
        let err = inspector.attach("ghost").unwrap_err();

        assert!(err.to_string().contains("no such device"));
        daemon.join().unwrap();
    }

    #[test]
    fn test_attach_to_silent_daemon_times_out_within_one_poll_round() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let daemon = std::thread::spawn(move || {
            // Accept and read the command, then never reply; the connection
            // stays open until the attach side gives up.
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let mut sink = String::new();
            let _ = reader.read_line(&mut sink);
        });

        let mut inspector = RelayInspector::new(addr);
        let started = std::time::Instant::now();
        let result = inspector.attach("dev1");

        assert!(matches!(result, Err(AttachError::Io(_))));
        assert!(
            started.elapsed() < RELAY_IO_TIMEOUT * 2,
            "attach stalled for {:?}",
            started.elapsed()
        );
        daemon.join().unwrap();
    }

    #[test]
    fn test_attach_against_nothing_is_an_io_error() {
        // Bind then drop to find a port with no listener behind it.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut inspector = RelayInspector::new(format!("127.0.0.1:{port}").parse().unwrap());
        assert!(matches!(
            inspector.attach("dev1"),
            Err(AttachError::Io(_))
        ));
    }
}
