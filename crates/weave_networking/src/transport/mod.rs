//! # Transport Layer
//!
//! One UDP socket, one background receive thread, one inbound queue.
//!
//! ## Design
//!
//! ```text
//!   receive thread                        tick thread
//! ┌────────────────┐   ReceivedPacket   ┌──────────────────┐
//! │ recv_from loop │ ─────────────────> │ drain(handler)   │
//! │ (poll timeout) │   FIFO channel     │ send(bytes, to)  │
//! └────────────────┘                    └──────────────────┘
//! ```
//!
//! - The receive thread is the only producer, the tick thread the only
//!   consumer. The queue and the statistics are the only shared state.
//! - `recv_from` blocks for at most `poll_interval`, so the thread notices
//!   `stop()` promptly.
//! - `send` is synchronous and best-effort. Failures are logged and counted;
//!   the caller never sees them.
//! - `drain` never waits for traffic.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};
use weave_core::{Clock, SharedClock};

use crate::protocol::{BitReader, BitWriter};
use crate::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_CAPACITY, DEFAULT_RECV_BUFFER_SIZE};

/// Transport failures reported to the caller.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The socket could not be bound.
    #[error("failed to bind UDP port {port}: {source}")]
    Bind {
        /// Requested port.
        port: u16,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// Socket setup after binding failed.
    #[error("transport socket setup failed: {0}")]
    Io(#[from] io::Error),

    /// `start` was called on a transport that is already receiving.
    #[error("receive thread already running")]
    AlreadyStarted,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Socket tuning shared by client and server.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Upper bound on how long the receive thread blocks before checking
    /// for shutdown, in milliseconds.
    pub poll_interval_ms: u64,
    /// Largest datagram accepted, in bytes. Longer datagrams are truncated
    /// by the OS.
    pub recv_buffer_size: usize,
    /// Datagrams held until the tick thread drains them. Arrivals beyond
    /// this are dropped and counted.
    pub queue_capacity: usize,
}

impl TransportConfig {
    /// Poll interval as a duration, never zero.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            recv_buffer_size: DEFAULT_RECV_BUFFER_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransportStats {
    /// Datagrams sent.
    pub packets_sent: u64,
    /// Datagrams received.
    pub packets_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes received.
    pub bytes_received: u64,
    /// Failed sends.
    pub send_errors: u64,
    /// Failed receives, excluding poll timeouts.
    pub recv_errors: u64,
    /// Datagrams received but discarded because the queue was full.
    pub dropped: u64,
}

/// A datagram as it came off the socket.
#[derive(Clone, Debug)]
pub struct ReceivedPacket {
    received_at: f64,
    data: Vec<u8>,
    from: SocketAddr,
}

impl ReceivedPacket {
    /// Clock reading when the receive thread got the datagram.
    #[inline]
    #[must_use]
    pub const fn received_at(&self) -> f64 {
        self.received_at
    }

    /// Sender endpoint.
    #[inline]
    #[must_use]
    pub const fn source(&self) -> SocketAddr {
        self.from
    }

    /// Raw datagram bytes.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Bit reader over the datagram.
    #[inline]
    #[must_use]
    pub fn reader(&self) -> BitReader<'_> {
        BitReader::new(&self.data)
    }
}

/// UDP socket with a background receive thread.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    config: TransportConfig,
    clock: SharedClock,
    queue_tx: Sender<ReceivedPacket>,
    queue_rx: Receiver<ReceivedPacket>,
    done: Arc<AtomicBool>,
    receiver: Option<JoinHandle<()>>,
    stats: Arc<Mutex<TransportStats>>,
}

impl UdpTransport {
    /// Binds `0.0.0.0:port` (0 picks an ephemeral port). Nothing is received
    /// until [`UdpTransport::start`].
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the port is taken or not permitted.
    pub fn bind(port: u16, config: TransportConfig, clock: SharedClock) -> TransportResult<Self> {
        Self::bind_addr(
            SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port),
            config,
            clock,
        )
    }

    /// Binds a specific local address.
    ///
    /// # Errors
    ///
    /// [`TransportError::Bind`] if the address cannot be bound.
    pub fn bind_addr(
        addr: SocketAddr,
        config: TransportConfig,
        clock: SharedClock,
    ) -> TransportResult<Self> {
        let socket = UdpSocket::bind(addr).map_err(|source| TransportError::Bind {
            port: addr.port(),
            source,
        })?;
        let local_addr = socket.local_addr()?;
        let (queue_tx, queue_rx) = bounded(config.queue_capacity.max(1));

        info!(%local_addr, "transport bound");

        Ok(Self {
            socket,
            local_addr,
            config,
            clock,
            queue_tx,
            queue_rx,
            done: Arc::new(AtomicBool::new(false)),
            receiver: None,
            stats: Arc::new(Mutex::new(TransportStats::default())),
        })
    }

    /// Binds and starts receiving in one step.
    ///
    /// # Errors
    ///
    /// As for [`UdpTransport::bind`] and [`UdpTransport::start`].
    pub fn open(port: u16, config: TransportConfig, clock: SharedClock) -> TransportResult<Self> {
        let mut transport = Self::bind(port, config, clock)?;
        transport.start()?;
        Ok(transport)
    }

    /// Launches the receive thread.
    ///
    /// # Errors
    ///
    /// [`TransportError::AlreadyStarted`] if called twice, or
    /// [`TransportError::Io`] if the socket cannot be prepared.
    pub fn start(&mut self) -> TransportResult<()> {
        if self.receiver.is_some() || self.done.load(Ordering::Acquire) {
            return Err(TransportError::AlreadyStarted);
        }

        let socket = self.socket.try_clone()?;
        socket.set_read_timeout(Some(self.config.poll_interval()))?;

        let queue = self.queue_tx.clone();
        let done = Arc::clone(&self.done);
        let stats = Arc::clone(&self.stats);
        let clock = Arc::clone(&self.clock);
        let buffer_size = self.config.recv_buffer_size.max(1);
        let poll_interval = self.config.poll_interval();

        let handle = thread::Builder::new()
            .name(format!("weave-recv-{}", self.local_addr.port()))
            .spawn(move || {
                Self::receive_loop(&socket, &queue, &done, &stats, &clock, buffer_size, poll_interval);
            })?;

        self.receiver = Some(handle);
        debug!(local_addr = %self.local_addr, "receive thread started");
        Ok(())
    }

    fn receive_loop(
        socket: &UdpSocket,
        queue: &Sender<ReceivedPacket>,
        done: &AtomicBool,
        stats: &Mutex<TransportStats>,
        clock: &SharedClock,
        buffer_size: usize,
        poll_interval: Duration,
    ) {
        let mut buffer = vec![0u8; buffer_size];

        while !done.load(Ordering::Acquire) {
            match socket.recv_from(&mut buffer) {
                Ok((0, from)) => {
                    trace!(%from, "empty datagram dropped");
                }
                Ok((len, from)) => {
                    let packet = ReceivedPacket {
                        received_at: clock.now(),
                        data: buffer[..len].to_vec(),
                        from,
                    };
                    {
                        let mut s = stats.lock();
                        s.packets_received += 1;
                        s.bytes_received += len as u64;
                    }
                    match queue.try_send(packet) {
                        Ok(()) => {}
                        Err(TrySendError::Full(packet)) => {
                            stats.lock().dropped += 1;
                            trace!(from = %packet.from, "queue full, datagram dropped");
                        }
                        Err(TrySendError::Disconnected(_)) => break,
                    }
                }
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                    // ICMP port unreachable from an earlier send on some
                    // platforms. The socket is still usable.
                    debug!(error = %e, "peer unreachable");
                }
                Err(e) => {
                    error!(error = %e, "receive failed");
                    stats.lock().recv_errors += 1;
                    thread::sleep(poll_interval);
                }
            }
        }
    }

    /// Local address the socket is bound to.
    #[inline]
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// True between `start` and `stop`.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.receiver.is_some()
    }

    /// Sends a packet. Returns true if the OS accepted the whole datagram.
    pub fn send(&self, packet: &BitWriter, to: SocketAddr) -> bool {
        self.send_bytes(packet.as_bytes(), to)
    }

    /// Sends raw bytes. Returns true if the OS accepted the whole datagram.
    ///
    /// Failures are logged and counted, never returned.
    pub fn send_bytes(&self, data: &[u8], to: SocketAddr) -> bool {
        match self.socket.send_to(data, to) {
            Ok(n) if n == data.len() => {
                let mut s = self.stats.lock();
                s.packets_sent += 1;
                s.bytes_sent += n as u64;
                trace!(%to, bytes = n, "datagram sent");
                true
            }
            Ok(n) => {
                warn!(%to, sent = n, len = data.len(), "datagram truncated on send");
                self.stats.lock().send_errors += 1;
                false
            }
            Err(e) => {
                error!(%to, error = %e, "send failed");
                self.stats.lock().send_errors += 1;
                false
            }
        }
    }

    /// Hands every currently queued packet to `handler`, oldest first.
    ///
    /// Packets arriving while draining wait for the next call. Returns the
    /// number of packets handled.
    pub fn drain<F>(&self, mut handler: F) -> usize
    where
        F: FnMut(ReceivedPacket),
    {
        let pending = self.queue_rx.len();
        let mut handled = 0;
        while handled < pending {
            match self.queue_rx.try_recv() {
                Ok(packet) => {
                    handler(packet);
                    handled += 1;
                }
                Err(_) => break,
            }
        }
        handled
    }

    /// Number of packets waiting to be drained.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    /// Snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        *self.stats.lock()
    }

    /// Stops the receive thread and waits for it to exit.
    ///
    /// Idempotent. Packets already queued stay drainable; nothing new is
    /// queued after this returns. A stopped transport cannot be restarted.
    pub fn stop(&mut self) {
        self.done.store(true, Ordering::Release);

        if let Some(handle) = self.receiver.take() {
            if handle.join().is_err() {
                error!(local_addr = %self.local_addr, "receive thread panicked");
            }
            info!(local_addr = %self.local_addr, "transport stopped");
        }
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("running", &self.receiver.is_some())
            .field("queued", &self.queue_rx.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use weave_core::SystemClock;

    fn loopback(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn wait_for(transport: &UdpTransport, count: usize) -> Vec<ReceivedPacket> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.len() < count && Instant::now() < deadline {
            transport.drain(|packet| received.push(packet));
            thread::sleep(Duration::from_millis(2));
        }
        received
    }

    #[test]
    fn bind_conflict_is_reported() {
        let first = UdpTransport::bind(0, TransportConfig::default(), SystemClock::shared()).unwrap();
        let taken = first.local_addr().port();

        let second = UdpTransport::bind_addr(
            SocketAddr::new(first.local_addr().ip(), taken),
            TransportConfig::default(),
            SystemClock::shared(),
        );
        assert!(matches!(second, Err(TransportError::Bind { port, .. }) if port == taken));
    }

    #[test]
    fn send_and_drain_over_loopback() {
        let a = UdpTransport::open(0, TransportConfig::default(), SystemClock::shared()).unwrap();
        let b = UdpTransport::open(0, TransportConfig::default(), SystemClock::shared()).unwrap();

        assert!(a.send_bytes(b"ping", loopback(b.local_addr().port())));

        let received = wait_for(&b, 1);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].bytes(), b"ping");
        assert_eq!(received[0].source().port(), a.local_addr().port());
        assert_eq!(a.stats().packets_sent, 1);
        assert_eq!(b.stats().packets_received, 1);
    }

    #[test]
    fn drain_on_empty_queue_returns_immediately() {
        let transport = UdpTransport::open(0, TransportConfig::default(), SystemClock::shared()).unwrap();
        let started = Instant::now();
        assert_eq!(transport.drain(|_| {}), 0);
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let config = TransportConfig {
            queue_capacity: 4,
            poll_interval_ms: 5,
            ..TransportConfig::default()
        };
        let transport = UdpTransport::open(0, config, SystemClock::shared()).unwrap();
        let target = loopback(transport.local_addr().port());

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        for i in 0..10u8 {
            sender.send_to(&[i], target).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while transport.queued() as u64 + transport.stats().dropped < 10 {
            assert!(Instant::now() < deadline, "datagrams never arrived");
            thread::sleep(Duration::from_millis(2));
        }

        assert_eq!(transport.stats().packets_received, 10);
        assert_eq!(transport.stats().dropped, 6);
        let mut kept = Vec::new();
        assert_eq!(transport.drain(|packet| kept.push(packet.bytes()[0])), 4);
        assert_eq!(kept, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stop_is_idempotent_and_final() {
        let mut transport = UdpTransport::open(0, TransportConfig::default(), SystemClock::shared()).unwrap();
        let target = loopback(transport.local_addr().port());

        transport.stop();
        transport.stop();
        assert!(!transport.is_running());
        assert!(matches!(transport.start(), Err(TransportError::AlreadyStarted)));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(b"late", target).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(transport.drain(|_| {}), 0);
    }
}
