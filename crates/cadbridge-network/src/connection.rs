//! Client connection to the CAD server
//!
//! A [`Connection`] owns one TCP socket. `connect` returns immediately and a dedicated I/O
//! thread opens the socket and runs the receive loop, posting decoded messages on the event
//! queue. Requests are written from the calling thread through a cloned handle of the same
//! socket; the caller blocks until the frame is written, not until the server answers.

use crate::codec::{decode_message, encode_request, Message};
use crate::events::{BridgeEvent, EventSender};
use crate::protocol::{MessageType, Protocol, ProtocolError, DEFAULT_MAX_MESSAGE_SIZE};
use crate::request::{RefacetParams, Request};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

/// Errors that can occur during connection operations
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Connection error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Already connected or connecting")]
    AlreadyConnected,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Connection closed by remote")]
    ConnectionClosed,
}

/// Configuration for the client connection
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Maximum inbound and outbound frame size in bytes
    pub max_message_size: usize,
    /// TCP no-delay setting
    pub tcp_nodelay: bool,
    /// Connection timeout
    pub connect_timeout: Option<Duration>,
    /// Write timeout for outbound requests
    pub write_timeout: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            tcp_nodelay: true,
            connect_timeout: Some(Duration::from_secs(10)),
            write_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The receive loop stopped on a protocol error
    Error,
}

/// Statistics about the traffic of the current connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub frames_sent: u64,
    pub bytes_sent: u64,
    pub frames_received: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Default)]
struct Session {
    filename: Option<String>,
    subscribed: bool,
    peer_addr: Option<SocketAddr>,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl Counters {
    fn reset(&self) {
        for counter in [
            &self.frames_sent,
            &self.bytes_sent,
            &self.frames_received,
            &self.bytes_received,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// State shared between the owner and its I/O thread
struct Shared {
    state: Mutex<ConnectionState>,
    writer: Mutex<Option<TcpStream>>,
    request_id: AtomicU32,
    session: Mutex<Session>,
    pending: Mutex<HashMap<MessageType, VecDeque<u32>>>,
    closing: AtomicBool,
    counters: Counters,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn new() -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            request_id: AtomicU32::new(0),
            session: Mutex::new(Session::default()),
            pending: Mutex::new(HashMap::new()),
            closing: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: ConnectionState) {
        let mut current = lock(&self.state);
        if *current != state {
            debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    fn reset_session(&self) {
        *lock(&self.session) = Session::default();
        lock(&self.pending).clear();
    }

    /// Match a response against the oldest outstanding request of its type
    fn settle(&self, message_type: MessageType, request_id: u32) {
        let mut pending = lock(&self.pending);
        let outstanding = pending.entry(message_type).or_default();
        match outstanding.front().copied() {
            Some(oldest) if oldest == request_id => {
                outstanding.pop_front();
            }
            Some(oldest) => {
                warn!(
                    "{:?} response {} does not match oldest outstanding request {}",
                    message_type, request_id, oldest
                );
                outstanding.retain(|id| *id != request_id);
            }
            None => {
                warn!("Unsolicited {:?} response {}", message_type, request_id);
            }
        }
    }
}

/// Client side of the bridge protocol
pub struct Connection {
    config: ConnectionConfig,
    protocol: Protocol,
    events: EventSender,
    shared: Arc<Shared>,
    io_thread: Option<JoinHandle<()>>,
}

impl Connection {
    /// Create a disconnected connection that posts inbound events to `events`
    pub fn new(config: ConnectionConfig, events: EventSender) -> Self {
        let protocol = Protocol::new().with_max_message_size(config.max_message_size);
        Self {
            config,
            protocol,
            events,
            shared: Arc::new(Shared::new()),
            io_thread: None,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Filename of the last inbound message of this session
    pub fn filename(&self) -> Option<String> {
        lock(&self.shared.session).filename.clone()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.session).subscribed
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        lock(&self.shared.session).peer_addr
    }

    /// Number of sent requests still waiting for their response
    pub fn pending_requests(&self) -> usize {
        lock(&self.shared.pending).values().map(VecDeque::len).sum()
    }

    pub fn stats(&self) -> ConnectionStats {
        let counters = &self.shared.counters;
        ConnectionStats {
            frames_sent: counters.frames_sent.load(Ordering::Relaxed),
            bytes_sent: counters.bytes_sent.load(Ordering::Relaxed),
            frames_received: counters.frames_received.load(Ordering::Relaxed),
            bytes_received: counters.bytes_received.load(Ordering::Relaxed),
        }
    }

    /// Start connecting to `address` (`host:port`) on the I/O thread
    ///
    /// Success or failure is reported through the event queue: `Connected` once the socket is
    /// open, and exactly one `Disconnected` when this attempt ends for any reason.
    pub fn connect(&mut self, address: &str) -> Result<(), ConnectionError> {
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {
                return Err(ConnectionError::AlreadyConnected)
            }
            ConnectionState::Disconnected | ConnectionState::Error => {}
        }

        // A previous session may have ended on its own; reap its thread
        self.join_io_thread();

        info!("Connecting to {}...", address);

        self.shared.closing.store(false, Ordering::SeqCst);
        self.shared.set_state(ConnectionState::Connecting);

        let worker = IoWorker {
            address: address.to_owned(),
            config: self.config.clone(),
            protocol: self.protocol,
            shared: Arc::clone(&self.shared),
            events: self.events.clone(),
        };

        let handle = thread::Builder::new()
            .name("cadbridge-io".into())
            .spawn(move || worker.run());

        match handle {
            Ok(handle) => {
                self.io_thread = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.set_state(ConnectionState::Disconnected);
                Err(ConnectionError::Io(e))
            }
        }
    }

    /// Block until the attempt started by `connect` settles or `timeout` elapses
    pub fn wait_until_settled(&self, timeout: Duration) -> ConnectionState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if state != ConnectionState::Connecting || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Close the socket and wait for the I/O thread to finish
    pub fn disconnect(&mut self) {
        if self.io_thread.is_none() {
            info!("Not connected, nothing to disconnect");
            return;
        }

        info!("Closing connection...");
        {
            // The worker checks `closing` under the same lock before installing its writer
            let writer = lock(&self.shared.writer);
            self.shared.closing.store(true, Ordering::SeqCst);

            if let Some(stream) = writer.as_ref() {
                // Unblocks the receive loop reading from the other handle
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!("Socket shutdown: {}", e);
                }
            }
        }

        self.join_io_thread();
    }

    fn join_io_thread(&mut self) {
        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                error!("I/O thread panicked");
                self.shared.set_state(ConnectionState::Error);
            }
        }
    }

    pub fn list_all(&self) -> Result<Option<u32>, ConnectionError> {
        self.send_request(Request::ListAll)
    }

    pub fn list_visible(&self) -> Result<Option<u32>, ConnectionError> {
        self.send_request(Request::ListVisible)
    }

    pub fn list_some(&self, filename: &str, ids: &[u32]) -> Result<Option<u32>, ConnectionError> {
        self.send_request(Request::ListSome {
            filename: filename.to_owned(),
            ids: ids.to_vec(),
        })
    }

    pub fn subscribe_all(&self) -> Result<Option<u32>, ConnectionError> {
        let sent = self.send_request(Request::SubscribeAll)?;
        if sent.is_some() {
            lock(&self.shared.session).subscribed = true;
        }
        Ok(sent)
    }

    pub fn unsubscribe_all(&self) -> Result<Option<u32>, ConnectionError> {
        let sent = self.send_request(Request::UnsubscribeAll)?;
        if sent.is_some() {
            lock(&self.shared.session).subscribed = false;
        }
        Ok(sent)
    }

    pub fn subscribe_some(
        &self,
        filename: &str,
        ids: &[u32],
    ) -> Result<Option<u32>, ConnectionError> {
        self.send_request(Request::SubscribeSome {
            filename: filename.to_owned(),
            ids: ids.to_vec(),
        })
    }

    pub fn refacet_some(
        &self,
        filename: &str,
        ids: &[u32],
        params: RefacetParams,
    ) -> Result<Option<u32>, ConnectionError> {
        self.send_request(Request::RefacetSome {
            filename: filename.to_owned(),
            ids: ids.to_vec(),
            params,
        })
    }

    /// Encode and write a request, returning its id
    ///
    /// Returns `Ok(None)` without sending when not connected or when an id-targeted request
    /// has no ids; the request id counter only advances for requests actually written.
    pub fn send_request(&self, request: Request) -> Result<Option<u32>, ConnectionError> {
        let message_type = request.message_type();

        if request.is_empty_selection() {
            debug!("Skipping {:?} with no ids", message_type);
            return Ok(None);
        }

        if !self.is_connected() {
            warn!("Not connected, cannot send {:?}", message_type);
            return Ok(None);
        }

        let mut writer = lock(&self.shared.writer);
        let Some(stream) = writer.as_mut() else {
            warn!("Not connected, cannot send {:?}", message_type);
            return Ok(None);
        };

        let request_id = self.shared.request_id.fetch_add(1, Ordering::SeqCst) + 1;
        let payload = encode_request(request_id, &request);

        // Recorded before writing so a fast response always finds it
        let expects_response = message_type.has_response_envelope();
        if expects_response {
            lock(&self.shared.pending)
                .entry(message_type)
                .or_default()
                .push_back(request_id);
        }

        if let Err(e) = self.protocol.write_frame(stream, &payload) {
            error!("Failed to send {:?} request {}: {}", message_type, request_id, e);
            if expects_response {
                if let Some(outstanding) = lock(&self.shared.pending).get_mut(&message_type) {
                    outstanding.retain(|id| *id != request_id);
                }
            }
            return Err(e.into());
        }

        let counters = &self.shared.counters;
        counters.frames_sent.fetch_add(1, Ordering::Relaxed);
        counters
            .bytes_sent
            .fetch_add(payload.len() as u64 + 4, Ordering::Relaxed);

        debug!(
            "Sent {:?} request {} ({} bytes)",
            message_type,
            request_id,
            payload.len()
        );

        Ok(Some(request_id))
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.io_thread.is_some() {
            self.disconnect();
        }
    }
}

/// How a receive loop ended
enum Exit {
    Closed,
    Failed,
}

/// Everything the I/O thread needs for one connection attempt
struct IoWorker {
    address: String,
    config: ConnectionConfig,
    protocol: Protocol,
    shared: Arc<Shared>,
    events: EventSender,
}

impl IoWorker {
    fn run(self) {
        let exit = match self.open() {
            Ok(stream) => {
                let exit = self.receive_loop(stream);
                if let Some(writer) = lock(&self.shared.writer).take() {
                    if let Err(e) = writer.shutdown(Shutdown::Both) {
                        debug!("Socket shutdown: {}", e);
                    }
                }
                exit
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", self.address, e);
                Exit::Closed
            }
        };

        self.shared.reset_session();
        self.shared.set_state(match exit {
            Exit::Closed => ConnectionState::Disconnected,
            Exit::Failed => ConnectionState::Error,
        });

        info!("Disconnected from {}", self.address);
        self.events.post(BridgeEvent::Disconnected);
    }

    fn open(&self) -> Result<TcpStream, ConnectionError> {
        let socket_addr = self
            .address
            .to_socket_addrs()
            .map_err(|e| ConnectionError::InvalidAddress(format!("{}: {e}", self.address)))?
            .next()
            .ok_or_else(|| ConnectionError::InvalidAddress(self.address.clone()))?;

        let stream = match self.config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout)?,
            None => TcpStream::connect(socket_addr)?,
        };

        stream.set_nodelay(self.config.tcp_nodelay)?;
        let writer = stream.try_clone()?;
        writer.set_write_timeout(self.config.write_timeout)?;

        self.shared.request_id.store(0, Ordering::SeqCst);
        self.shared.reset_session();
        self.shared.counters.reset();
        lock(&self.shared.session).peer_addr = Some(socket_addr);

        {
            let mut slot = lock(&self.shared.writer);
            if self.shared.closing.load(Ordering::SeqCst) {
                if let Err(e) = stream.shutdown(Shutdown::Both) {
                    debug!("Socket shutdown: {}", e);
                }
                return Err(ConnectionError::ConnectionClosed);
            }
            *slot = Some(writer);
        }
        self.shared.set_state(ConnectionState::Connected);

        info!("Connected to {}", socket_addr);
        self.events.post(BridgeEvent::Connected);

        Ok(stream)
    }

    fn receive_loop(&self, mut stream: TcpStream) -> Exit {
        loop {
            let payload = match self.protocol.read_frame(&mut stream) {
                Ok(payload) => payload,
                Err(ProtocolError::Io(e)) => {
                    if self.shared.closing.load(Ordering::SeqCst) {
                        debug!("Receive loop stopped locally");
                    } else if matches!(
                        e.kind(),
                        ErrorKind::UnexpectedEof
                            | ErrorKind::ConnectionReset
                            | ErrorKind::ConnectionAborted
                    ) {
                        info!("Server closed the connection");
                    } else {
                        error!("Connection error: {}", e);
                    }
                    return Exit::Closed;
                }
                Err(e) => {
                    error!("Protocol error: {}", e);
                    return Exit::Failed;
                }
            };

            let counters = &self.shared.counters;
            counters.frames_received.fetch_add(1, Ordering::Relaxed);
            counters
                .bytes_received
                .fetch_add(payload.len() as u64 + 4, Ordering::Relaxed);

            let message = match decode_message(&payload) {
                Ok(message) => message,
                Err(e) => {
                    error!("Failed to decode message: {}", e);
                    return Exit::Failed;
                }
            };

            if let Some(event) = self.route(message) {
                if !self.events.post(event) {
                    warn!("Event queue dropped, stopping receive loop");
                    return Exit::Closed;
                }
            }
        }
    }

    /// Update session bookkeeping and turn a message into a main-thread event
    fn route(&self, message: Message) -> Option<BridgeEvent> {
        if let Some(filename) = message.filename() {
            lock(&self.shared.session).filename = Some(filename.to_owned());
        }

        match message {
            Message::Transaction(transaction) => {
                debug!(
                    "Transaction for {} version {}",
                    transaction.filename, transaction.version
                );
                Some(BridgeEvent::Transaction(transaction))
            }
            Message::List {
                request_id,
                snapshot,
            } => {
                self.shared.settle(snapshot.kind.message_type(), request_id);
                debug!(
                    "List of {} version {} with {} objects",
                    snapshot.filename,
                    snapshot.version,
                    snapshot.add.len()
                );
                Some(BridgeEvent::List(snapshot))
            }
            Message::Refacet { request_id, result } => {
                self.shared.settle(MessageType::RefacetSome, request_id);
                Some(BridgeEvent::Refacet(result))
            }
            Message::NewVersion { filename, version } => {
                Some(BridgeEvent::NewVersion { filename, version })
            }
            Message::NewFile { filename } => Some(BridgeEvent::NewFile { filename }),
            Message::Failure(failure) => {
                self.shared.settle(failure.message_type, failure.request_id);
                error!(
                    "{:?} failed with code: {}",
                    failure.message_type, failure.code
                );
                Some(BridgeEvent::RequestFailed(failure))
            }
            Message::Ignored(message_type) => {
                trace!("Ignoring {:?} message", message_type);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event_queue;
    use std::net::TcpListener;

    #[test]
    fn test_connection_config_default() {
        let config = ConnectionConfig::default();
        assert!(config.tcp_nodelay);
        assert_eq!(config.max_message_size, u32::MAX as usize);
    }

    #[test]
    fn test_requests_are_noops_when_disconnected() {
        let (sender, queue) = event_queue();
        let connection = Connection::new(ConnectionConfig::default(), sender);

        assert_eq!(connection.state(), ConnectionState::Disconnected);
        assert!(connection.list_all().unwrap().is_none());
        assert!(connection.subscribe_all().unwrap().is_none());
        assert!(!connection.is_subscribed());
        assert_eq!(connection.stats().frames_sent, 0);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_disconnect_when_never_connected() {
        let (sender, queue) = event_queue();
        let mut connection = Connection::new(ConnectionConfig::default(), sender);
        connection.disconnect();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_connect_refused_reports_disconnect() {
        // Grab a free port, then close it
        let addr = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();

        let (sender, queue) = event_queue();
        let mut connection = Connection::new(ConnectionConfig::default(), sender);
        connection.connect(&addr.to_string()).unwrap();

        assert_eq!(
            queue.recv_timeout(Duration::from_secs(5)),
            Some(BridgeEvent::Disconnected)
        );
        assert_eq!(
            connection.wait_until_settled(Duration::from_secs(1)),
            ConnectionState::Disconnected
        );
        assert!(queue.try_next().is_none());
    }

    #[test]
    fn test_invalid_address() {
        let (sender, queue) = event_queue();
        let mut connection = Connection::new(ConnectionConfig::default(), sender);
        connection.connect("not an address").unwrap();

        assert_eq!(
            queue.recv_timeout(Duration::from_secs(5)),
            Some(BridgeEvent::Disconnected)
        );
    }

    #[test]
    fn test_settle_tracks_oldest_request() {
        let shared = Shared::new();
        lock(&shared.pending)
            .entry(MessageType::ListAll)
            .or_default()
            .extend([1, 2]);

        shared.settle(MessageType::ListAll, 2);
        assert_eq!(
            lock(&shared.pending)[&MessageType::ListAll],
            VecDeque::from(vec![1])
        );

        shared.settle(MessageType::ListAll, 1);
        assert!(lock(&shared.pending)[&MessageType::ListAll].is_empty());
    }
}
