//! # TSS UDP Protocol Client
//!
//! Request/response client for the Telemetry Stream Server datagram protocol.
//! The protocol is strictly one request, one response, one datagram each way:
//!
//! - **Request**: 8 bytes, the current Unix timestamp and the command number,
//!   both big-endian unsigned 32-bit integers.
//! - **Response**: an 8-byte header (opaque to us, skipped) followed by a
//!   UTF-8 JSON document, right-padded with NUL bytes up to the 8192-byte
//!   maximum datagram size.
//!
//! ## Core Design Points:
//!
//! - **One socket, one request in flight**: the client owns a single
//!   long-lived UDP socket guarded by a mutex held across send+receive.
//!   Responses carry no correlation field, so overlapping requests could
//!   cross-deliver between commands; serializing at the socket is what makes
//!   the pairing sound.
//! - **Blocking with a receive deadline**: `fetch` blocks up to the configured
//!   timeout (2 s against the deployed TSS). Callers on an async runtime drive
//!   it through a blocking worker; see the aggregator.
//! - **Explicit release**: `close` drops the socket exactly once and is
//!   idempotent; dropping the client releases it as well if `close` is never
//!   called. Retry policy belongs to the caller: every failure is reported as
//!   a distinct [`FetchError`] kind and never retried here.

use std::io;
use std::net::UdpSocket;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use thiserror::Error;

/// Size of the opaque response header, skipped before decoding.
pub const HEADER_SIZE: usize = 8;
/// Maximum datagram size on both directions of the protocol.
pub const PACKET_SIZE: usize = 8192;

/// Address of the deployed TSS instrument server.
pub const DEFAULT_ADDR: &str = "192.168.95.154:14141";
/// Receive deadline applied to every fetch.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Custom error types for TSS fetch operations.
#[derive(Debug, Error)]
pub enum FetchError {
    /// No response datagram arrived within the configured deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    /// A transport-level send/receive failure, carrying the underlying cause.
    #[error("transport failure: {0}")]
    Transport(#[from] io::Error),
    /// The response payload was not decodable UTF-8 JSON after stripping.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Connection settings for the TSS endpoint.
#[derive(Debug, Clone)]
pub struct TssClientConfig {
    /// Remote `host:port` of the instrument server.
    pub addr: String,
    /// Receive deadline for a single fetch.
    pub timeout: Duration,
}

impl Default for TssClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// The TSS protocol client. One instance holds one long-lived UDP socket for
/// the process lifetime.
pub struct TssClient {
    config: TssClientConfig,
    socket: Mutex<Option<UdpSocket>>,
}

impl TssClient {
    /// Binds the client socket and applies the receive deadline.
    pub fn connect(config: TssClientConfig) -> io::Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_read_timeout(Some(config.timeout))?;
        Ok(Self {
            config,
            socket: Mutex::new(Some(socket)),
        })
    }

    /// Sends `command` to the TSS and returns the decoded JSON document.
    ///
    /// Blocking: waits up to the configured deadline for the response
    /// datagram. Errors are reported, never retried:
    /// - [`FetchError::Timeout`]: no response within the deadline,
    /// - [`FetchError::Transport`]: send/receive failure, or the client was
    ///   already closed,
    /// - [`FetchError::MalformedPayload`]: the payload did not decode.
    pub fn fetch(&self, command: u32) -> Result<Value, FetchError> {
        let guard = self.socket.lock().expect("TSS socket lock poisoned");
        let socket = guard.as_ref().ok_or_else(|| {
            FetchError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "TSS client already closed",
            ))
        })?;

        let timestamp = Utc::now().timestamp() as u32;
        let request = encode_request(timestamp, command);
        socket.send_to(&request, &self.config.addr)?;

        let mut buffer = [0u8; PACKET_SIZE];
        let (len, _peer) = match socket.recv_from(&mut buffer) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                return Err(FetchError::Timeout(self.config.timeout));
            }
            Err(e) => return Err(e.into()),
        };

        decode_response(&buffer[..len])
    }

    /// Releases the socket. Idempotent; later fetches report a transport
    /// failure. Dropping the client has the same effect if this is never
    /// called.
    pub fn close(&self) {
        let mut guard = self.socket.lock().expect("TSS socket lock poisoned");
        if guard.take().is_some() {
            log::debug!("TSS client socket released");
        }
    }
}

/// Encodes the fixed 8-byte request header.
pub fn encode_request(timestamp: u32, command: u32) -> [u8; HEADER_SIZE] {
    let mut packet = [0u8; HEADER_SIZE];
    packet[..4].copy_from_slice(&timestamp.to_be_bytes());
    packet[4..].copy_from_slice(&command.to_be_bytes());
    packet
}

/// Decodes an 8-byte request header back into `(timestamp, command)`.
/// Used by the simulator and by tests.
pub fn decode_request(datagram: &[u8]) -> Option<(u32, u32)> {
    if datagram.len() != HEADER_SIZE {
        return None;
    }
    let timestamp = u32::from_be_bytes(datagram[..4].try_into().ok()?);
    let command = u32::from_be_bytes(datagram[4..].try_into().ok()?);
    Some((timestamp, command))
}

/// Decodes a response datagram: skips the 8-byte header, strips trailing NUL
/// padding and parses the remainder as UTF-8 JSON. Stripping is idempotent,
/// so an unpadded datagram decodes identically.
pub fn decode_response(datagram: &[u8]) -> Result<Value, FetchError> {
    if datagram.len() < HEADER_SIZE {
        return Err(FetchError::MalformedPayload(format!(
            "datagram of {} bytes is shorter than the {} byte header",
            datagram.len(),
            HEADER_SIZE
        )));
    }

    let payload = &datagram[HEADER_SIZE..];
    let end = payload.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    let text = std::str::from_utf8(&payload[..end])
        .map_err(|e| FetchError::MalformedPayload(e.to_string()))?;

    serde_json::from_str(text).map_err(|e| FetchError::MalformedPayload(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::net::UdpSocket;

    fn frame(payload: &Value, padded: bool) -> Vec<u8> {
        let mut datagram = vec![0u8; HEADER_SIZE];
        datagram.extend_from_slice(payload.to_string().as_bytes());
        if padded {
            datagram.resize(PACKET_SIZE, 0);
        }
        datagram
    }

    #[test]
    fn test_request_header_round_trip() {
        for (timestamp, command) in [(0, 0), (1_700_000_000, 2), (u32::MAX, u32::MAX)] {
            let packet = encode_request(timestamp, command);
            assert_eq!(decode_request(&packet), Some((timestamp, command)));
        }
    }

    #[test]
    fn test_padding_strip_is_idempotent() {
        let payload = json!({"pr_telemetry": {"speed": 5}});
        let padded = decode_response(&frame(&payload, true)).unwrap();
        let unpadded = decode_response(&frame(&payload, false)).unwrap();
        assert_eq!(padded, unpadded);
        assert_eq!(padded, payload);
    }

    #[test]
    fn test_short_datagram_is_malformed() {
        let result = decode_response(&[0u8; 3]);
        assert!(matches!(result, Err(FetchError::MalformedPayload(_))));
    }

    #[test]
    fn test_non_json_payload_is_malformed() {
        let mut datagram = vec![0u8; HEADER_SIZE];
        datagram.extend_from_slice(b"not json");
        let result = decode_response(&datagram);
        assert!(matches!(result, Err(FetchError::MalformedPayload(_))));
    }

    #[test]
    fn test_fetch_times_out_against_silent_peer() {
        // A bound socket that never answers stands in for an unreachable TSS.
        let silent = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = silent.local_addr().unwrap();

        let client = TssClient::connect(TssClientConfig {
            addr: addr.to_string(),
            timeout: Duration::from_millis(100),
        })
        .unwrap();

        let result = client.fetch(0);
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }

    #[test]
    fn test_fetch_round_trip_against_mock_server() {
        let server = UdpSocket::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();

        let responder = std::thread::spawn(move || {
            let mut buffer = [0u8; PACKET_SIZE];
            let (len, peer) = server.recv_from(&mut buffer).unwrap();
            let (_, command) = decode_request(&buffer[..len]).unwrap();
            let reply = frame(&json!({"echoed_command": command}), true);
            server.send_to(&reply, peer).unwrap();
        });

        let client = TssClient::connect(TssClientConfig {
            addr: addr.to_string(),
            timeout: Duration::from_secs(1),
        })
        .unwrap();

        let document = client.fetch(2).unwrap();
        assert_eq!(document, json!({"echoed_command": 2}));
        responder.join().unwrap();
    }

    #[test]
    fn test_close_is_idempotent_and_fails_later_fetches() {
        let client = TssClient::connect(TssClientConfig {
            addr: "127.0.0.1:9".to_string(),
            timeout: Duration::from_millis(50),
        })
        .unwrap();

        client.close();
        client.close();

        let result = client.fetch(0);
        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
