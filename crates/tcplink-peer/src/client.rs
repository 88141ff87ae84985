use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{info, warn};

use tcplink_frame::{Frame, Headers};
use tcplink_transport::{NetStream, TcpSettings, TcpSocket};

use crate::error::{PeerError, Result};
use crate::events::{ClientEvents, DisconnectReason, NullEvents};
use crate::peer::{
    lock_unpoisoned, ConnectionObserver, ConnectionState, PeerConnection, StateCell,
};
use crate::scheduler::Scheduler;

/// Name of the reconnect task. At most one exists per client.
const AUTO_RECONNECT: &str = "AutoReconnect";

/// Default dial timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client behavior configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Interval between reconnect attempts after a lost connection.
    /// Zero disables auto-reconnect.
    pub reconnect_interval: Duration,
    /// How long a single dial may take before it is counted as failed.
    pub connect_timeout: Duration,
    /// Socket timeouts applied to each established connection.
    pub settings: TcpSettings,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::ZERO,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            settings: TcpSettings::default(),
        }
    }
}

/// A connecting-side peer: dials a server, exchanges frames, and, when
/// configured with a non-zero reconnect interval, re-establishes a lost
/// connection at that fixed interval until stopped.
///
/// Dial failures during reconnection are expected and never surface to the
/// caller; the application observes only the `connected`/`disconnected`
/// transitions through its [`ClientEvents`].
pub struct TcpClient {
    shared: Arc<ClientShared>,
}

struct ClientShared {
    addr: String,
    config: ClientConfig,
    events: Mutex<Arc<dyn ClientEvents>>,
    scheduler: Scheduler,
    state: StateCell,
    conn: Mutex<Option<Arc<PeerConnection>>>,
    stopped: AtomicBool,
}

impl TcpClient {
    /// Create a client for `addr` (a `"host:port"` string). No connection is
    /// made until [`TcpClient::start`].
    pub fn new(addr: impl Into<String>, config: ClientConfig) -> Result<Self> {
        let addr = addr.into();
        if addr.is_empty() || !addr.contains(':') {
            return Err(PeerError::InvalidAddress(addr));
        }
        Ok(Self {
            shared: Arc::new(ClientShared {
                addr,
                config,
                events: Mutex::new(Arc::new(NullEvents)),
                scheduler: Scheduler::new(),
                state: StateCell::new(ConnectionState::Disconnected),
                conn: Mutex::new(None),
                stopped: AtomicBool::new(false),
            }),
        })
    }

    /// Replace the event sink. May be called at any time.
    pub fn set_events(&self, events: Arc<dyn ClientEvents>) {
        *lock_unpoisoned(&self.shared.events) = events;
    }

    /// Connect to the server.
    ///
    /// If a reconnect attempt is already scheduled this is a no-op. When
    /// auto-reconnect is enabled, a failed dial schedules the first retry
    /// and returns `Ok(())`; otherwise the dial error is returned.
    pub fn start(&self) -> Result<()> {
        if self.shared.scheduler.exists(AUTO_RECONNECT) {
            return Ok(());
        }
        if self.shared.stopped.load(Ordering::Acquire) {
            return Err(PeerError::Stopped);
        }
        if self.shared.state.load() == ConnectionState::Connected {
            return Err(PeerError::AlreadyRunning);
        }

        match ClientShared::dial(&self.shared) {
            Ok(()) => Ok(()),
            Err(err) => {
                if self.shared.config.reconnect_interval.is_zero() {
                    Err(err)
                } else {
                    warn!(addr = %self.shared.addr, error = %err, "connect failed, scheduling reconnect");
                    ClientShared::schedule_reconnect(&self.shared);
                    Ok(())
                }
            }
        }
    }

    /// Tear the client down: cancel any pending reconnect and close the
    /// connection with reason `Stopped`.
    ///
    /// Works from any state, including mid-reconnect. A second call returns
    /// `NotRunning`.
    pub fn stop(&self) -> Result<()> {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return Err(PeerError::NotRunning);
        }

        self.shared.scheduler.cancel(AUTO_RECONNECT);

        let conn = lock_unpoisoned(&self.shared.conn).take();
        match conn {
            Some(conn) => conn.close(DisconnectReason::Stopped),
            None => self.shared.state.store(ConnectionState::Disconnected),
        }

        info!(addr = %self.shared.addr, "client stopped");
        Ok(())
    }

    /// Send one frame to the server. See [`PeerConnection::send`] for the
    /// precondition and failure-absorption contract.
    pub fn send(&self, payload: &[u8], headers: Option<&Headers>) -> Result<()> {
        let conn = lock_unpoisoned(&self.shared.conn).clone();
        match conn {
            Some(conn) => conn.send(payload, headers),
            None => Err(PeerError::NotConnected(self.shared.addr.clone())),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether a reconnect attempt is currently scheduled.
    pub fn reconnect_pending(&self) -> bool {
        self.shared.scheduler.exists(AUTO_RECONNECT)
    }

    /// The `"host:port"` address this client dials.
    pub fn addr(&self) -> &str {
        &self.shared.addr
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl ClientShared {
    fn events(&self) -> Arc<dyn ClientEvents> {
        Arc::clone(&lock_unpoisoned(&self.events))
    }

    /// Dial once and attach the resulting connection.
    fn dial(shared: &Arc<Self>) -> Result<()> {
        shared.state.store(ConnectionState::Connecting);
        match TcpSocket::connect(&shared.addr, shared.config.connect_timeout) {
            Ok(stream) => Self::attach(shared, stream),
            Err(err) => {
                shared.state.store(ConnectionState::Disconnected);
                Err(err.into())
            }
        }
    }

    /// Wire a freshly connected stream into a running peer connection.
    fn attach(shared: &Arc<Self>, stream: NetStream) -> Result<()> {
        // A dial may still be in flight when stop() lands; drop its result.
        if shared.stopped.load(Ordering::Acquire) {
            shared.state.store(ConnectionState::Disconnected);
            return Err(PeerError::Stopped);
        }

        let conn = PeerConnection::new(stream, shared.addr.clone(), &shared.config.settings)?;

        *lock_unpoisoned(&shared.conn) = Some(Arc::clone(&conn));
        shared.state.store(ConnectionState::Connected);
        // A fresh connection cancels any outstanding retry.
        shared.scheduler.cancel(AUTO_RECONNECT);

        let observer = Arc::new(ClientObserver {
            shared: Arc::downgrade(shared),
        });
        if let Err(err) = conn.start(observer) {
            *lock_unpoisoned(&shared.conn) = None;
            shared.state.store(ConnectionState::Disconnected);
            return Err(err);
        }

        info!(addr = %shared.addr, "connected to server");
        shared.events().connected();
        Ok(())
    }

    /// Arm one retry. The task re-arms itself on failure, so retries
    /// continue at the fixed interval until a dial succeeds or the client
    /// stops.
    fn schedule_reconnect(shared: &Arc<Self>) {
        if shared.stopped.load(Ordering::Acquire) {
            return;
        }
        let interval = shared.config.reconnect_interval;
        let weak = Arc::downgrade(shared);
        shared.scheduler.schedule(AUTO_RECONNECT, interval, move || {
            let Some(shared) = weak.upgrade() else { return };
            if shared.stopped.load(Ordering::Acquire) {
                return;
            }
            if shared.state.load() == ConnectionState::Connected {
                return;
            }
            if let Err(err) = ClientShared::dial(&shared) {
                warn!(addr = %shared.addr, error = %err, "reconnect attempt failed");
                ClientShared::schedule_reconnect(&shared);
            }
        });
    }
}

struct ClientObserver {
    shared: Weak<ClientShared>,
}

impl ConnectionObserver for ClientObserver {
    fn frame_received(&self, _identity: &str, frame: Frame) {
        if let Some(shared) = self.shared.upgrade() {
            shared.events().frame_received(frame);
        }
    }

    fn disconnected(&self, _identity: &str, reason: DisconnectReason) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        shared.state.store(ConnectionState::Disconnected);
        *lock_unpoisoned(&shared.conn) = None;
        shared.events().disconnected(reason);

        if !shared.config.reconnect_interval.is_zero()
            && !shared.stopped.load(Ordering::Acquire)
        {
            ClientShared::schedule_reconnect(&shared);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    enum Event {
        Connected,
        Disconnected(DisconnectReason),
        Frame(Frame),
    }

    struct ChannelEvents {
        tx: Mutex<mpsc::Sender<Event>>,
    }

    impl ChannelEvents {
        fn pair() -> (Arc<Self>, mpsc::Receiver<Event>) {
            let (tx, rx) = mpsc::channel();
            (Arc::new(Self { tx: Mutex::new(tx) }), rx)
        }

        fn send(&self, event: Event) {
            let _ = lock_unpoisoned(&self.tx).send(event);
        }
    }

    impl ClientEvents for ChannelEvents {
        fn connected(&self) {
            self.send(Event::Connected);
        }

        fn disconnected(&self, reason: DisconnectReason) {
            self.send(Event::Disconnected(reason));
        }

        fn frame_received(&self, frame: Frame) {
            self.send(Event::Frame(frame));
        }
    }

    fn expect_connected(rx: &mpsc::Receiver<Event>) {
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Connected => {}
            Event::Disconnected(reason) => panic!("unexpected disconnect: {reason}"),
            Event::Frame(_) => panic!("unexpected frame"),
        }
    }

    #[test]
    fn new_rejects_empty_or_portless_addr() {
        assert!(matches!(
            TcpClient::new("", ClientConfig::default()),
            Err(PeerError::InvalidAddress(_))
        ));
        assert!(matches!(
            TcpClient::new("localhost", ClientConfig::default()),
            Err(PeerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn start_connects_and_fires_connected() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = std::thread::spawn(move || listener.accept().unwrap());

        let client = TcpClient::new(addr, ClientConfig::default()).unwrap();
        let (events, rx) = ChannelEvents::pair();
        client.set_events(events);

        client.start().unwrap();
        expect_connected(&rx);
        assert!(client.is_connected());

        let _server_side = accept.join().unwrap();
    }

    #[test]
    fn start_while_connected_is_already_running() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = std::thread::spawn(move || listener.accept().unwrap());

        let client = TcpClient::new(addr, ClientConfig::default()).unwrap();
        client.start().unwrap();
        let _server_side = accept.join().unwrap();

        assert!(matches!(client.start(), Err(PeerError::AlreadyRunning)));
    }

    #[test]
    fn start_without_listener_and_no_reconnect_fails() {
        let probe = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let client = TcpClient::new(addr, ClientConfig::default()).unwrap();
        assert!(client.start().is_err());
        assert!(!client.is_connected());
    }

    #[test]
    fn send_without_connection_is_not_connected() {
        let client = TcpClient::new("127.0.0.1:1", ClientConfig::default()).unwrap();
        assert!(matches!(
            client.send(b"data", None),
            Err(PeerError::NotConnected(_))
        ));
    }

    #[test]
    fn failed_dial_schedules_retry_when_reconnect_enabled() {
        let probe = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap().to_string();
        drop(probe);

        let config = ClientConfig {
            reconnect_interval: Duration::from_millis(50),
            connect_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        let client = TcpClient::new(addr, config).unwrap();

        client.start().unwrap();
        assert!(client.reconnect_pending() || !client.is_connected());

        // While a retry is pending, start is a no-op.
        client.start().unwrap();

        client.stop().unwrap();
        assert!(!client.reconnect_pending());
    }

    #[test]
    fn reconnect_converges_once_listener_appears() {
        // Reserve a port, then free it so the first dials fail.
        let probe = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = probe.local_addr().unwrap();
        drop(probe);

        let config = ClientConfig {
            reconnect_interval: Duration::from_millis(40),
            connect_timeout: Duration::from_millis(200),
            ..ClientConfig::default()
        };
        let client = TcpClient::new(addr.to_string(), config).unwrap();
        let (events, rx) = ChannelEvents::pair();
        client.set_events(events);

        client.start().unwrap();
        assert!(!client.is_connected());

        // Let a few attempts fail before the listener shows up.
        std::thread::sleep(Duration::from_millis(150));
        let listener = TcpSocket::bind(addr).unwrap();
        let accept = std::thread::spawn(move || listener.accept().unwrap());

        expect_connected(&rx);
        assert!(client.is_connected());
        let _server_side = accept.join().unwrap();

        // Convergence: no further retries are scheduled.
        std::thread::sleep(Duration::from_millis(150));
        assert!(!client.reconnect_pending());
        assert!(client.is_connected());
    }

    #[test]
    fn lost_connection_reconnects_to_same_listener() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let config = ClientConfig {
            reconnect_interval: Duration::from_millis(40),
            connect_timeout: Duration::from_millis(500),
            ..ClientConfig::default()
        };
        let client = TcpClient::new(addr, config).unwrap();
        let (events, rx) = ChannelEvents::pair();
        client.set_events(events);

        let accept_loop = std::thread::spawn(move || {
            // First connection: wait for the client's marker frame, then
            // sever the link.
            let (first, _) = listener.accept().unwrap();
            let mut reader = tcplink_frame::FrameReader::new(first.try_clone().unwrap());
            reader.read_frame().unwrap();
            first.shutdown();
            drop(first);
            // Second connection: hold it open.
            listener.accept().unwrap()
        });

        client.start().unwrap();
        expect_connected(&rx);
        client.send(b"ready", None).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Disconnected(reason) => assert_eq!(reason, DisconnectReason::Timeout),
            _ => panic!("expected disconnect after server dropped the link"),
        }

        expect_connected(&rx);
        assert!(client.is_connected());
        let _held = accept_loop.join().unwrap();
    }

    #[test]
    fn stop_fires_disconnected_with_stopped_reason() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = std::thread::spawn(move || listener.accept().unwrap());

        let client = TcpClient::new(addr, ClientConfig::default()).unwrap();
        let (events, rx) = ChannelEvents::pair();
        client.set_events(events);

        client.start().unwrap();
        expect_connected(&rx);
        let _server_side = accept.join().unwrap();

        client.stop().unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Disconnected(reason) => assert_eq!(reason, DisconnectReason::Stopped),
            _ => panic!("expected disconnect"),
        }

        assert!(matches!(client.stop(), Err(PeerError::NotRunning)));
        assert!(matches!(client.start(), Err(PeerError::Stopped)));
    }

    #[test]
    fn frames_from_server_reach_events() {
        let listener = TcpSocket::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept = std::thread::spawn(move || listener.accept().unwrap());

        let client = TcpClient::new(addr, ClientConfig::default()).unwrap();
        let (events, rx) = ChannelEvents::pair();
        client.set_events(events);
        client.start().unwrap();
        expect_connected(&rx);

        let (server_side, _) = accept.join().unwrap();
        let mut writer = tcplink_frame::FrameWriter::new(server_side);
        let headers: Headers = [("Command", "ping")].into_iter().collect();
        writer.send(b"hi", &headers).unwrap();

        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Frame(frame) => {
                assert_eq!(frame.payload.as_ref(), b"hi");
                assert_eq!(frame.headers.get("Command"), Some("ping"));
                assert_eq!(frame.headers.get(tcplink_frame::CONTENT_LENGTH), Some("2"));
            }
            _ => panic!("expected frame"),
        }
    }
}
