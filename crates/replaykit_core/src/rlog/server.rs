//! Live RLOG stream over TCP.

use crate::error::{CoreError, CoreResult};
use crate::receiver::LogDataReceiver;
use crate::rlog::encoder::{encode_frame, RlogEncoder};
use crate::table::LogTable;
use bytes::Bytes;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Port used when none is configured.
pub const DEFAULT_RLOG_PORT: u16 = 5800;

/// Name of the thread that accepts clients.
pub const RLOG_ACCEPT_THREAD_NAME: &str = "replaykit-rlog-accept";

const ACCEPT_POLL: Duration = Duration::from_millis(20);
const KEEP_ALIVE: [u8; 4] = [0; 4];

/// Configuration for an [`RlogServer`].
#[derive(Debug, Clone)]
pub struct RlogServerConfig {
    /// Address to listen on.
    pub bind: SocketAddr,

    /// Frames buffered per client before it is dropped as too slow.
    pub client_queue_capacity: usize,

    /// A client that sends nothing for this long is disconnected.
    pub heartbeat_timeout: Duration,

    /// Idle time after which a keep-alive frame is sent.
    pub keep_alive_period: Duration,
}

impl RlogServerConfig {
    /// Listens on every interface at `port`.
    #[must_use]
    pub fn new(port: u16) -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], port)),
            client_queue_capacity: 500,
            heartbeat_timeout: Duration::from_secs(3),
            keep_alive_period: Duration::from_millis(20),
        }
    }

    /// Sets the listen address.
    #[must_use]
    pub fn bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }
}

impl Default for RlogServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_RLOG_PORT)
    }
}

#[derive(Debug)]
struct Client {
    peer: SocketAddr,
    tx: Sender<Bytes>,
}

/// The encoder and the client list share one lock so a joining client's
/// catch-up data and the deltas that follow it line up exactly.
#[derive(Debug, Default)]
struct Broadcast {
    encoder: RlogEncoder,
    clients: Vec<Client>,
}

#[derive(Debug)]
struct Shared {
    broadcast: Mutex<Broadcast>,
    running: AtomicBool,
    client_threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Streams every snapshot to connected clients in the RLOG format.
///
/// Each client gets the full current state on connect and afterwards only
/// changed fields. Clients are served by their own writer thread, so a
/// slow client never delays the others; one that falls too far behind is
/// disconnected and can reconnect to catch up.
pub struct RlogServer {
    config: RlogServerConfig,
    listener: Option<TcpListener>,
    local_addr: Option<SocketAddr>,
    shared: Option<Arc<Shared>>,
    accept_thread: Option<JoinHandle<()>>,
}

impl RlogServer {
    /// Creates a server. The socket is bound on `start`.
    #[must_use]
    pub fn new(config: RlogServerConfig) -> Self {
        Self {
            config,
            listener: None,
            local_addr: None,
            shared: None,
            accept_thread: None,
        }
    }

    /// Creates a server and binds its socket now, so the address is known
    /// before the server is handed to a dispatcher.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub fn bind(config: RlogServerConfig) -> CoreResult<Self> {
        let listener = TcpListener::bind(config.bind)?;
        let local_addr = listener.local_addr()?;
        let mut server = Self::new(config);
        server.listener = Some(listener);
        server.local_addr = Some(local_addr);
        Ok(server)
    }

    /// Address the server is listening on, once bound.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of connected clients.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.shared
            .as_ref()
            .map_or(0, |shared| shared.broadcast.lock().clients.len())
    }
}

impl Shared {
    fn admit(&self, stream: TcpStream, peer: SocketAddr, config: &RlogServerConfig) -> CoreResult<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(config.heartbeat_timeout))?;
        let reader = stream.try_clone()?;

        let (tx, rx) = crossbeam_channel::bounded(config.client_queue_capacity.max(1));
        {
            let mut broadcast = self.broadcast.lock();
            let newcomer = encode_frame(&broadcast.encoder.newcomer_data())?;
            if tx.try_send(Bytes::from(newcomer)).is_err() {
                return Err(CoreError::QueueClosed);
            }
            broadcast.clients.push(Client { peer, tx });
        }

        let last_heard = Arc::new(Mutex::new(Instant::now()));
        let heard = Arc::clone(&last_heard);
        let reader_thread = thread::Builder::new()
            .name(format!("replaykit-rlog-read-{peer}"))
            .spawn(move || run_client_reader(reader, &heard))
            .map_err(|err| CoreError::thread(format!("failed to spawn RLOG reader: {err}")))?;
        let writer_config = config.clone();
        let writer_thread = thread::Builder::new()
            .name(format!("replaykit-rlog-write-{peer}"))
            .spawn(move || run_client_writer(stream, peer, &rx, &last_heard, &writer_config))
            .map_err(|err| CoreError::thread(format!("failed to spawn RLOG writer: {err}")))?;

        let mut threads = self.client_threads.lock();
        threads.push(reader_thread);
        threads.push(writer_thread);
        tracing::info!(peer = %peer, "RLOG client connected");
        Ok(())
    }
}

fn run_accept_loop(listener: &TcpListener, shared: &Shared, config: &RlogServerConfig) {
    while shared.running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                if let Err(err) = shared.admit(stream, peer, config) {
                    tracing::warn!(peer = %peer, error = %err, "failed to admit RLOG client");
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) => {
                tracing::warn!(error = %err, "RLOG accept failed");
                thread::sleep(ACCEPT_POLL);
            }
        }
    }
}

/// Anything the client sends counts as a heartbeat.
fn run_client_reader(mut stream: TcpStream, last_heard: &Mutex<Instant>) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => *last_heard.lock() = Instant::now(),
        }
    }
}

fn run_client_writer(
    mut stream: TcpStream,
    peer: SocketAddr,
    rx: &Receiver<Bytes>,
    last_heard: &Mutex<Instant>,
    config: &RlogServerConfig,
) {
    loop {
        if last_heard.lock().elapsed() > config.heartbeat_timeout {
            tracing::info!(peer = %peer, "RLOG client timed out");
            break;
        }
        let written = match rx.recv_timeout(config.keep_alive_period) {
            Ok(frame) => stream.write_all(&frame),
            Err(RecvTimeoutError::Timeout) => stream.write_all(&KEEP_ALIVE),
            Err(RecvTimeoutError::Disconnected) => break,
        };
        if let Err(err) = written {
            tracing::info!(peer = %peer, error = %err, "RLOG client disconnected");
            break;
        }
    }
    let _ = stream.shutdown(Shutdown::Both);
}

impl LogDataReceiver for RlogServer {
    fn start(&mut self) -> CoreResult<()> {
        if self.shared.is_some() {
            self.end()?;
        }
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(self.config.bind)?,
        };
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        self.local_addr = Some(local_addr);

        let shared = Arc::new(Shared {
            broadcast: Mutex::new(Broadcast::default()),
            running: AtomicBool::new(true),
            client_threads: Mutex::new(Vec::new()),
        });
        let accept_shared = Arc::clone(&shared);
        let config = self.config.clone();
        let handle = thread::Builder::new()
            .name(RLOG_ACCEPT_THREAD_NAME.to_string())
            .spawn(move || run_accept_loop(&listener, &accept_shared, &config))
            .map_err(|err| CoreError::thread(format!("failed to spawn RLOG server: {err}")))?;

        self.shared = Some(shared);
        self.accept_thread = Some(handle);
        tracing::info!(addr = %local_addr, "RLOG server started");
        Ok(())
    }

    fn put_table(&mut self, table: &LogTable) -> CoreResult<()> {
        let Some(shared) = &self.shared else {
            return Ok(());
        };
        let mut broadcast = shared.broadcast.lock();
        let frame = Bytes::from(encode_frame(&broadcast.encoder.encode_table(table, false))?);
        broadcast
            .clients
            .retain(|client| match client.tx.try_send(frame.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(peer = %client.peer, "RLOG client fell behind, disconnecting");
                    false
                }
                Err(TrySendError::Disconnected(_)) => false,
            });
        Ok(())
    }

    fn end(&mut self) -> CoreResult<()> {
        let Some(shared) = self.shared.take() else {
            return Ok(());
        };
        shared.running.store(false, Ordering::SeqCst);
        let accept = self.accept_thread.take().map(JoinHandle::join);

        // Dropping the senders lets each writer drain its queue and close.
        shared.broadcast.lock().clients.clear();
        let threads = std::mem::take(&mut *shared.client_threads.lock());
        for handle in threads {
            if handle.join().is_err() {
                tracing::error!("RLOG client thread panicked");
            }
        }
        tracing::info!("RLOG server stopped");

        match accept {
            Some(Err(_)) => Err(CoreError::thread("RLOG accept thread panicked")),
            _ => Ok(()),
        }
    }
}

impl Drop for RlogServer {
    fn drop(&mut self) {
        if let Err(err) = self.end() {
            tracing::error!(error = %err, "RLOG server shutdown failed");
        }
    }
}

impl std::fmt::Debug for RlogServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RlogServer")
            .field("local_addr", &self.local_addr)
            .field("clients", &self.client_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::rlog::encoder::{read_frame, RlogDecoder};

    fn loopback() -> RlogServerConfig {
        RlogServerConfig::new(0).bind(SocketAddr::from(([127, 0, 0, 1], 0)))
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
        stream
    }

    /// Next frame that is not a keep-alive.
    fn next_data_frame(stream: &mut TcpStream) -> Vec<u8> {
        loop {
            let frame = read_frame(stream).unwrap().expect("server closed the stream");
            if !frame.is_empty() {
                return frame;
            }
        }
    }

    fn wait_for_eof(stream: &mut TcpStream) {
        loop {
            match read_frame(stream) {
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => return,
            }
        }
    }

    #[test]
    fn client_gets_state_then_changes() {
        let mut server = RlogServer::new(loopback());
        server.start().unwrap();

        let table = LogTable::new(20_000);
        table.put("Drive/Speed", &1.5f64);
        table.put("Mode", "auto");
        server.put_table(&table.snapshot()).unwrap();

        let mut client = connect(server.local_addr().unwrap());
        let received = LogTable::new(0);
        let mut decoder = RlogDecoder::new();

        decoder.decode_into(&next_data_frame(&mut client), &received).unwrap();
        assert_eq!(received.timestamp(), 20_000);
        assert_eq!(received.get("Drive/Speed", 0.0f64), 1.5);
        assert_eq!(received.get("Mode", String::new()), "auto");
        assert_eq!(server.client_count(), 1);

        table.set_timestamp(40_000);
        table.put("Drive/Speed", &2.0f64);
        table.put("Count", &3i64);
        server.put_table(&table.snapshot()).unwrap();

        let delta = next_data_frame(&mut client);
        assert!(!delta.windows(4).any(|w| w == b"Mode"));
        decoder.decode_into(&delta, &received).unwrap();
        assert_eq!(received.timestamp(), 40_000);
        assert_eq!(received.get("Drive/Speed", 0.0f64), 2.0);
        assert_eq!(received.get("Count", 0i64), 3);
        assert_eq!(received.get("Mode", String::new()), "auto");

        server.end().unwrap();
        wait_for_eof(&mut client);
        assert_eq!(server.client_count(), 0);
    }

    #[test]
    fn silent_client_times_out() {
        let mut server = RlogServer::new(loopback().heartbeat_timeout(Duration::from_millis(100)));
        server.start().unwrap();
        let mut client = connect(server.local_addr().unwrap());
        next_data_frame(&mut client);
        wait_for_eof(&mut client);
        server.end().unwrap();
    }

    #[test]
    fn end_without_start_is_a_no_op() {
        let mut server = RlogServer::new(loopback());
        server.put_table(&LogTable::new(0)).unwrap();
        server.end().unwrap();
        assert_eq!(server.local_addr(), None);
    }

    #[test]
    fn serves_snapshots_from_dispatcher() {
        let server = RlogServer::bind(loopback()).unwrap();
        let addr = server.local_addr().unwrap();
        let dispatcher = Dispatcher::start(8, vec![Box::new(server)]).unwrap();

        let mut client = connect(addr);
        let received = LogTable::new(0);
        let mut decoder = RlogDecoder::new();
        decoder.decode_into(&next_data_frame(&mut client), &received).unwrap();

        let table = LogTable::new(60_000);
        table.put("Arm/Angle", &0.75f64);
        assert!(dispatcher.offer(table));
        decoder.decode_into(&next_data_frame(&mut client), &received).unwrap();
        assert_eq!(received.timestamp(), 60_000);
        assert_eq!(received.get("Arm/Angle", 0.0f64), 0.75);

        dispatcher.shutdown().unwrap();
        wait_for_eof(&mut client);
    }
}
