//! Persistent connection to a link server.
//!
//! A [`Connection`] owns one TCP stream driven by a background task. Every
//! received frame is handed, in arrival order, to the single [`FrameHandler`]
//! registered when the connection was opened. The connection never
//! reconnects on its own; that policy belongs to the owner.

use crate::transport::{connect_tcp, recv_frame, write_frame, FrameDecoder, TransportError};
use bytes::{Bytes, BytesMut};
use link_wire::DEFAULT_MAX_FRAME_SIZE;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Configuration for a link connection
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Server address, `host:port`
    pub addr: String,
    /// Upper bound on TCP connection establishment
    pub connect_timeout: Duration,
    /// Largest frame accepted or sent
    pub max_frame_size: usize,
    /// Initial capacity of the read buffer
    pub read_buffer_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7000".to_string(),
            connect_timeout: Duration::from_secs(10),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            read_buffer_capacity: 64 * 1024,
        }
    }
}

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connect in progress
    Connecting,
    /// Frames can be sent
    Open,
    /// Terminal; the connection will not reopen
    Closed,
}

/// Receives everything that arrives on a connection
pub trait FrameHandler: Send + Sync + 'static {
    /// Called once per received frame, in arrival order
    fn on_frame(&self, frame: Bytes);

    /// Called once when the connection ends; `None` for a local close
    fn on_closed(&self, error: Option<TransportError>);
}

/// Statistics for a connection
#[derive(Clone, Debug, Default)]
pub struct ConnectionStats {
    /// Total frame bytes received
    pub bytes_in: u64,
    /// Total frame bytes sent
    pub bytes_out: u64,
    /// Number of frames received
    pub frames_received: u64,
    /// Number of frames sent
    pub frames_sent: u64,
    /// Timestamp of last received frame
    pub last_frame_in: Option<Instant>,
    /// Timestamp of last sent frame
    pub last_frame_out: Option<Instant>,
}

#[derive(Debug, Clone)]
struct Status {
    state: ConnectionState,
    error: Option<TransportError>,
}

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Handle to a live connection; dropping it closes the connection
#[derive(Debug)]
pub struct Connection {
    addr: String,
    max_frame_size: usize,
    outbound: mpsc::UnboundedSender<Outbound>,
    status: watch::Receiver<Status>,
    stats: Arc<Mutex<ConnectionStats>>,
}

impl std::fmt::Debug for Outbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Outbound::Frame(frame) => write!(f, "Frame({} bytes)", frame.len()),
            Outbound::Close => f.write_str("Close"),
        }
    }
}

impl Connection {
    /// Start connecting in the background and return immediately.
    ///
    /// The connection is in [`ConnectionState::Connecting`] until the TCP
    /// handshake finishes; use [`Connection::connected`] to wait for it.
    pub fn open<H: FrameHandler>(config: ConnectionConfig, handler: H) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(Status {
            state: ConnectionState::Connecting,
            error: None,
        });
        let stats = Arc::new(Mutex::new(ConnectionStats::default()));

        let addr = config.addr.clone();
        let max_frame_size = config.max_frame_size;
        tokio::spawn(run_connection(
            config,
            Arc::new(handler),
            outbound_rx,
            status_tx,
            Arc::clone(&stats),
        ));

        Self {
            addr,
            max_frame_size,
            outbound: outbound_tx,
            status: status_rx,
            stats,
        }
    }

    /// Open a connection and wait until it is usable
    pub async fn connect<H: FrameHandler>(
        config: ConnectionConfig,
        handler: H,
    ) -> Result<Self, TransportError> {
        let connection = Self::open(config, handler);
        connection.connected().await?;
        Ok(connection)
    }

    /// Wait until the connection leaves `Connecting`.
    ///
    /// Returns the connection error if it never opened.
    pub async fn connected(&self) -> Result<(), TransportError> {
        let mut status = self.status.clone();
        let result = status
            .wait_for(|s| s.state != ConnectionState::Connecting)
            .await
            .map(|s| s.clone());
        match result {
            Ok(Status {
                state: ConnectionState::Open,
                ..
            }) => Ok(()),
            Ok(Status { error, .. }) => Err(error.unwrap_or(TransportError::Closed)),
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Wait until the connection is closed
    pub async fn closed(&self) {
        let mut status = self.status.clone();
        let _ = status
            .wait_for(|s| s.state == ConnectionState::Closed)
            .await;
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Whether frames can be sent right now
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Error that closed the connection, if any
    pub fn close_reason(&self) -> Option<TransportError> {
        self.status.borrow().error.clone()
    }

    /// Server address this connection targets
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Largest frame this connection sends or accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Queue a frame for sending.
    ///
    /// Fails with [`TransportError::NotReady`] unless the connection is open,
    /// and with [`TransportError::FrameTooLarge`] for a frame above the size
    /// limit; neither affects the connection.
    pub fn send(&self, frame: Bytes) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::NotReady);
        }
        if frame.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge(frame.len()));
        }
        self.outbound
            .send(Outbound::Frame(frame))
            .map_err(|_| TransportError::NotReady)
    }

    /// Close gracefully after frames already queued have been written
    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    /// Snapshot of the connection statistics
    pub fn stats(&self) -> ConnectionStats {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn run_connection(
    config: ConnectionConfig,
    handler: Arc<dyn FrameHandler>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    status_tx: watch::Sender<Status>,
    stats: Arc<Mutex<ConnectionStats>>,
) {
    debug!("Connecting to {}", config.addr);

    let connect = tokio::time::timeout(config.connect_timeout, connect_tcp(&config.addr)).await;
    let stream = match connect {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            let error = TransportError::from(e);
            error!("Failed to connect to {}: {}", config.addr, error);
            finish(&status_tx, handler.as_ref(), Some(error));
            return;
        }
        Err(_) => {
            error!(
                "Connecting to {} timed out after {:?}",
                config.addr, config.connect_timeout
            );
            finish(&status_tx, handler.as_ref(), Some(TransportError::Timeout));
            return;
        }
    };

    info!("Connected to {}", config.addr);
    status_tx.send_replace(Status {
        state: ConnectionState::Open,
        error: None,
    });

    let result = session_loop(stream, &config, handler.as_ref(), &mut outbound_rx, &stats).await;
    match &result {
        Ok(()) => info!("Connection to {} closed", config.addr),
        Err(TransportError::Closed) => info!("Server {} closed the connection", config.addr),
        Err(e) => warn!("Connection to {} failed: {}", config.addr, e),
    }
    finish(&status_tx, handler.as_ref(), result.err());
}

/// Mark the connection closed, then notify the handler
fn finish(
    status_tx: &watch::Sender<Status>,
    handler: &dyn FrameHandler,
    error: Option<TransportError>,
) {
    status_tx.send_replace(Status {
        state: ConnectionState::Closed,
        error: error.clone(),
    });
    handler.on_closed(error);
}

async fn session_loop(
    mut stream: TcpStream,
    config: &ConnectionConfig,
    handler: &dyn FrameHandler,
    outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    stats: &Mutex<ConnectionStats>,
) -> Result<(), TransportError> {
    let (mut reader, mut writer) = stream.split();
    let mut decoder = FrameDecoder::new(config.max_frame_size);
    let mut read_buffer = BytesMut::with_capacity(config.read_buffer_capacity);

    loop {
        tokio::select! {
            biased;

            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Frame(frame)) if frame.len() > config.max_frame_size => {
                        warn!("Dropping outbound frame of {} bytes above the size limit", frame.len());
                    }
                    Some(Outbound::Frame(frame)) => {
                        write_frame(&mut writer, &frame, config.max_frame_size).await?;
                        let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
                        stats.bytes_out += frame.len() as u64;
                        stats.frames_sent += 1;
                        stats.last_frame_out = Some(Instant::now());
                    }
                    // explicit close, or every handle dropped
                    Some(Outbound::Close) | None => {
                        let _ = writer.shutdown().await;
                        return Ok(());
                    }
                }
            }

            frame = recv_frame(&mut reader, &mut decoder, &mut read_buffer) => {
                let frame = frame?;
                {
                    let mut stats = stats.lock().unwrap_or_else(PoisonError::into_inner);
                    stats.bytes_in += frame.len() as u64;
                    stats.frames_received += 1;
                    stats.last_frame_in = Some(Instant::now());
                }
                debug!("Received frame of {} bytes", frame.len());
                handler.on_frame(frame);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::write_frame;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::UnboundedSender;

    #[derive(Debug)]
    enum Seen {
        Frame(Bytes),
        Closed(Option<TransportError>),
    }

    struct Recorder(UnboundedSender<Seen>);

    impl FrameHandler for Recorder {
        fn on_frame(&self, frame: Bytes) {
            let _ = self.0.send(Seen::Frame(frame));
        }

        fn on_closed(&self, error: Option<TransportError>) {
            let _ = self.0.send(Seen::Closed(error));
        }
    }

    fn config_for(addr: String) -> ConnectionConfig {
        ConnectionConfig {
            addr,
            connect_timeout: Duration::from_secs(5),
            ..ConnectionConfig::default()
        }
    }

    #[tokio::test]
    async fn test_frames_delivered_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for i in 0..5u8 {
                write_frame(&mut socket, &[i; 3], 1024).await.unwrap();
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::connect(config_for(addr), Recorder(tx))
            .await
            .unwrap();
        assert!(connection.is_open());

        for i in 0..5u8 {
            match rx.recv().await.unwrap() {
                Seen::Frame(frame) => assert_eq!(&frame[..], &[i; 3]),
                other => panic!("unexpected {:?}", other),
            }
        }

        // server task dropped its socket
        match rx.recv().await.unwrap() {
            Seen::Closed(Some(TransportError::Closed)) => {}
            other => panic!("unexpected {:?}", other),
        }
        connection.closed().await;
        assert_eq!(connection.state(), ConnectionState::Closed);
        assert_eq!(connection.stats().frames_received, 5);
    }

    #[tokio::test]
    async fn test_send_reaches_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new(1024);
            let mut buffer = BytesMut::new();
            recv_frame(&mut socket, &mut decoder, &mut buffer)
                .await
                .unwrap()
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let connection = Connection::connect(config_for(addr), Recorder(tx))
            .await
            .unwrap();
        connection.send(Bytes::from_static(b"hello")).unwrap();

        assert_eq!(&server.await.unwrap()[..], b"hello");
    }

    #[tokio::test]
    async fn test_send_after_close_is_not_ready() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::connect(config_for(addr), Recorder(tx))
            .await
            .unwrap();
        connection.close();
        connection.closed().await;

        assert_eq!(
            connection.send(Bytes::from_static(b"late")),
            Err(TransportError::NotReady)
        );
        match rx.recv().await.unwrap() {
            Seen::Closed(None) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_oversized_send_keeps_connection_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut decoder = FrameDecoder::new(1024);
            let mut buffer = BytesMut::new();
            recv_frame(&mut socket, &mut decoder, &mut buffer)
                .await
                .unwrap()
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let config = ConnectionConfig {
            max_frame_size: 16,
            ..config_for(addr)
        };
        let connection = Connection::connect(config, Recorder(tx)).await.unwrap();

        assert_eq!(
            connection.send(Bytes::from(vec![7u8; 17])),
            Err(TransportError::FrameTooLarge(17))
        );
        assert!(connection.is_open());

        connection.send(Bytes::from_static(b"small")).unwrap();
        assert_eq!(&server.await.unwrap()[..], b"small");
        assert_eq!(connection.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_connect_refused_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = Connection::connect(config_for(addr), Recorder(tx)).await;
        assert!(result.is_err());

        match rx.recv().await.unwrap() {
            Seen::Closed(Some(_)) => {}
            other => panic!("unexpected {:?}", other),
        }
    }
}
