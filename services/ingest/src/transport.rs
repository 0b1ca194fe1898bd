//! Datagram listener feeding the ingress pipeline
//!
//! The engine is indifferent to the transport implementation; it only
//! consumes decoded frames. `UdpTransport` binds a UDP socket, parses wire
//! frames on a receive thread, and invokes the callback for each valid
//! frame. Endpoint URIs use `quic://host:port` or `udp://host:port`.

use crate::frame::Frame;
use crate::wire;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("bind failed: {0}")]
    Bind(#[source] std::io::Error),

    #[error("transport already running")]
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub bytes_received: u64,
    pub frames_received: u64,
    pub frames_malformed: u64,
    pub connections_active: u64,
}

pub type FrameCallback = Arc<dyn Fn(Frame<'_>) + Send + Sync>;

/// Contract between the listener and the rest of the system.
pub trait Transport {
    fn start(&mut self, endpoint_uri: &str, callback: FrameCallback) -> Result<(), TransportError>;
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    fn stats(&self) -> TransportStats;
}

#[derive(Default)]
struct Counters {
    bytes_received: AtomicU64,
    frames_received: AtomicU64,
    frames_malformed: AtomicU64,
}

/// UDP listener with the QUIC-compatible wire framing.
pub struct UdpTransport {
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    receive_thread: Option<JoinHandle<()>>,
    local_addr: Option<std::net::SocketAddr>,
}

impl UdpTransport {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            receive_thread: None,
            local_addr: None,
        }
    }

    /// Address actually bound, useful when the endpoint requested port 0.
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        self.local_addr
    }

    fn parse_endpoint(uri: &str) -> Result<String, TransportError> {
        let rest = uri
            .strip_prefix("quic://")
            .or_else(|| uri.strip_prefix("udp://"))
            .ok_or_else(|| TransportError::InvalidEndpoint(uri.to_string()))?;
        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(uri.to_string()))?;
        if host.is_empty() || port.parse::<u16>().is_err() {
            return Err(TransportError::InvalidEndpoint(uri.to_string()));
        }
        Ok(format!("{host}:{port}"))
    }

    fn receive_loop(
        socket: UdpSocket,
        running: Arc<AtomicBool>,
        counters: Arc<Counters>,
        callback: FrameCallback,
    ) {
        const MAX_DATAGRAM_SIZE: usize = 65536;
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];

        while running.load(Ordering::Relaxed) {
            let received = match socket.recv_from(&mut buffer) {
                Ok((n, _)) => n,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "transport receive error");
                    continue;
                }
            };
            if received == 0 {
                continue;
            }

            counters
                .bytes_received
                .fetch_add(received as u64, Ordering::Relaxed);

            match wire::parse_frame(&buffer[..received]) {
                Ok(frame) => {
                    counters.frames_received.fetch_add(1, Ordering::Relaxed);
                    callback(frame);
                }
                Err(e) => {
                    counters.frames_malformed.fetch_add(1, Ordering::Relaxed);
                    debug!(error = %e, "malformed datagram dropped");
                }
            }
        }
    }
}

impl Default for UdpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for UdpTransport {
    fn start(&mut self, endpoint_uri: &str, callback: FrameCallback) -> Result<(), TransportError> {
        if self.running.load(Ordering::Relaxed) {
            return Err(TransportError::AlreadyRunning);
        }

        let addr = Self::parse_endpoint(endpoint_uri)?;
        let socket = UdpSocket::bind(&addr).map_err(TransportError::Bind)?;
        self.local_addr = socket.local_addr().ok();
        // Receive timeout so the loop observes shutdown promptly.
        socket
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(TransportError::Bind)?;

        self.running.store(true, Ordering::Relaxed);
        let running = Arc::clone(&self.running);
        let counters = Arc::clone(&self.counters);
        self.receive_thread = Some(std::thread::spawn(move || {
            Self::receive_loop(socket, running, counters, callback);
        }));

        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.receive_thread.take() {
            let _ = handle.join();
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    fn stats(&self) -> TransportStats {
        TransportStats {
            bytes_received: self.counters.bytes_received.load(Ordering::Relaxed),
            frames_received: self.counters.frames_received.load(Ordering::Relaxed),
            frames_malformed: self.counters.frames_malformed.load(Ordering::Relaxed),
            connections_active: if self.is_running() { 1 } else { 0 },
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::MessageKind;
    use std::sync::Mutex;
    use types::ids::AccountId;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(
            UdpTransport::parse_endpoint("quic://127.0.0.1:9000").unwrap(),
            "127.0.0.1:9000"
        );
        assert_eq!(
            UdpTransport::parse_endpoint("udp://0.0.0.0:1234").unwrap(),
            "0.0.0.0:1234"
        );
        assert!(UdpTransport::parse_endpoint("http://127.0.0.1:9000").is_err());
        assert!(UdpTransport::parse_endpoint("quic://127.0.0.1").is_err());
        assert!(UdpTransport::parse_endpoint("quic://127.0.0.1:notaport").is_err());
    }

    #[test]
    fn test_start_receive_stop() {
        let mut transport = UdpTransport::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);

        transport
            .start(
                "udp://127.0.0.1:0",
                Arc::new(move |frame: Frame<'_>| {
                    sink.lock()
                        .unwrap()
                        .push((frame.header, frame.payload.to_vec()));
                }),
            )
            .unwrap();
        assert!(transport.is_running());
        let addr = transport.local_addr().unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        let datagram = crate::wire::build_datagram(
            AccountId(9),
            1,
            42,
            0,
            MessageKind::NewOrder,
            &[1, 2, 3],
        );
        sender.send_to(&datagram, addr).unwrap();
        // Malformed datagram is counted, not delivered
        sender.send_to(&[0u8; 8], addr).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while (transport.stats().frames_received < 1 || transport.stats().frames_malformed < 1)
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(Duration::from_millis(10));
        }

        transport.stop();
        assert!(!transport.is_running());
        assert_eq!(transport.stats().connections_active, 0);

        let frames = received.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0.account, AccountId(9));
        assert_eq!(frames[0].1, vec![1, 2, 3]);
        assert_eq!(transport.stats().frames_received, 1);
        assert_eq!(transport.stats().frames_malformed, 1);
    }

    #[test]
    fn test_bind_failure_surfaces() {
        let mut transport = UdpTransport::new();
        let result = transport.start("udp://256.0.0.1:70000", Arc::new(|_| {}));
        assert!(result.is_err());
    }
}
