// serial/mod.rs
mod port;

pub use port::TtyConnector;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf},
    sync::Mutex,
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{devices::DeviceStore, error::AppError};

/// Byte stream to the device.
pub trait DeviceIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DeviceIo for T {}

/// Opens the byte stream behind a device path.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, path: &str, baud_rate: u32) -> Result<Box<dyn DeviceIo>, AppError>;
}

pub type LineHandler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

struct Connection {
    writer: WriteHalf<Box<dyn DeviceIo>>,
    reader: JoinHandle<()>,
    generation: u64,
    path: String,
}

struct Shared {
    store: Arc<DeviceStore>,
    handler: RwLock<Option<LineHandler>>,
    connection: Mutex<Option<Connection>>,
}

impl Shared {
    fn handler(&self) -> Option<LineHandler> {
        match self.handler.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Drops the connection if it is still the one identified by `generation`.
    async fn release(&self, generation: u64) {
        let mut connection = self.connection.lock().await;
        if connection.as_ref().is_some_and(|c| c.generation == generation) {
            if let Some(conn) = connection.take() {
                info!(path = %conn.path, "Serial port closed");
            }
            self.store.set_connected(false).await;
        }
    }
}

/// The single serial connection to the device.
///
/// Owns the write half; a background task reads newline-delimited input and
/// hands each line to the registered [`LineHandler`] in arrival order. The
/// store's `connected` flag follows the handle: set after a successful open,
/// cleared on close, EOF, read error or failed write.
pub struct SerialLink {
    connector: Box<dyn Connector>,
    shared: Arc<Shared>,
    generation: AtomicU64,
}

impl SerialLink {
    pub fn new(connector: Box<dyn Connector>, store: Arc<DeviceStore>) -> Self {
        Self {
            connector,
            shared: Arc::new(Shared {
                store,
                handler: RwLock::new(None),
                connection: Mutex::new(None),
            }),
            generation: AtomicU64::new(0),
        }
    }

    pub async fn open(&self, path: &str, baud_rate: u32) -> Result<(), AppError> {
        self.close_current(false).await;

        let stream = self.connector.connect(path, baud_rate).await.map_err(|e| {
            error!(%path, "Error opening serial port: {}", e);
            match e {
                AppError::Connection(_) => e,
                other => AppError::Connection(other.to_string()),
            }
        })?;

        let (reader, writer) = tokio::io::split(stream);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Hold the slot while marking connected so a reader that hits EOF
        // straight away cannot clear the flag before it is set.
        let mut connection = self.shared.connection.lock().await;
        let task = tokio::spawn(read_lines(Arc::clone(&self.shared), reader, generation));
        *connection = Some(Connection {
            writer,
            reader: task,
            generation,
            path: path.to_string(),
        });
        self.shared.store.set_connected(true).await;
        info!(%path, baud_rate, "Serial port opened");

        Ok(())
    }

    /// Writes `line` plus a newline terminator and waits for the flush.
    pub async fn write_line(&self, line: &str) -> Result<(), AppError> {
        let mut connection = self.shared.connection.lock().await;
        let conn = connection.as_mut().ok_or(AppError::NotConnected)?;

        let mut frame = String::with_capacity(line.len() + 1);
        frame.push_str(line);
        frame.push('\n');

        let written = async {
            conn.writer.write_all(frame.as_bytes()).await?;
            conn.writer.flush().await
        }
        .await;

        match written {
            Ok(()) => {
                debug!(command = line, "Sent command");
                Ok(())
            }
            Err(e) => {
                error!("Error writing to serial port: {}", e);
                if let Some(conn) = connection.take() {
                    conn.reader.abort();
                }
                self.shared.store.set_connected(false).await;
                Err(AppError::Connection(e.to_string()))
            }
        }
    }

    /// Registers the handler that receives every inbound line.
    pub fn on_line(&self, handler: LineHandler) {
        match self.shared.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    pub async fn close(&self) {
        self.close_current(true).await;
    }

    pub async fn is_open(&self) -> bool {
        self.shared.connection.lock().await.is_some()
    }

    async fn close_current(&self, always_broadcast: bool) {
        let mut connection = self.shared.connection.lock().await;
        let had_connection = match connection.take() {
            Some(mut conn) => {
                conn.reader.abort();
                if let Err(e) = conn.writer.shutdown().await {
                    debug!("Serial shutdown: {}", e);
                }
                info!(path = %conn.path, "Serial port closed");
                true
            }
            None => false,
        };

        if had_connection || always_broadcast {
            self.shared.store.set_connected(false).await;
        }
    }
}

async fn read_lines(shared: Arc<Shared>, reader: ReadHalf<Box<dyn DeviceIo>>, generation: u64) {
    let mut segments = BufReader::new(reader).split(b'\n');

    loop {
        match segments.next_segment().await {
            Ok(Some(bytes)) => {
                let text = String::from_utf8_lossy(&bytes);
                let line = text.trim();
                if line.is_empty() {
                    continue;
                }
                debug!(line, "Device response");
                if let Some(handler) = shared.handler() {
                    handler(line.to_string()).await;
                }
            }
            Ok(None) => {
                warn!("Serial port reached end of stream");
                break;
            }
            Err(e) => {
                error!("Serial port error: {}", e);
                break;
            }
        }
    }

    shared.release(generation).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
        sync::mpsc,
    };

    struct Loopback {
        peers: mpsc::UnboundedSender<DuplexStream>,
    }

    #[async_trait]
    impl Connector for Loopback {
        async fn connect(
            &self,
            _path: &str,
            _baud_rate: u32,
        ) -> Result<Box<dyn DeviceIo>, AppError> {
            let (ours, theirs) = tokio::io::duplex(1024);
            self.peers
                .send(theirs)
                .map_err(|_| AppError::Connection("peer dropped".into()))?;
            Ok(Box::new(ours))
        }
    }

    struct Unplugged;

    #[async_trait]
    impl Connector for Unplugged {
        async fn connect(
            &self,
            path: &str,
            _baud_rate: u32,
        ) -> Result<Box<dyn DeviceIo>, AppError> {
            Err(AppError::Connection(format!("{path}: No such file or directory")))
        }
    }

    fn loopback() -> (SerialLink, Arc<DeviceStore>, mpsc::UnboundedReceiver<DuplexStream>) {
        let store = Arc::new(DeviceStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let link = SerialLink::new(Box::new(Loopback { peers: tx }), Arc::clone(&store));
        (link, store, rx)
    }

    async fn wait_disconnected(store: &DeviceStore) {
        for _ in 0..100 {
            if !store.snapshot().await.connected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("link never reported disconnect");
    }

    #[tokio::test]
    async fn open_marks_connected_and_write_appends_newline() {
        let (link, store, mut peers) = loopback();
        link.open("/dev/test", 9600).await.unwrap();
        assert!(store.snapshot().await.connected);

        let peer = peers.recv().await.unwrap();
        link.write_line("MOTOR_ON").await.unwrap();

        let mut lines = BufReader::new(peer).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "MOTOR_ON");
    }

    #[tokio::test]
    async fn write_without_connection_fails_fast() {
        let (link, _, _) = loopback();
        assert!(matches!(
            link.write_line("LED_ON").await,
            Err(AppError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn open_failure_is_a_connection_error() {
        let store = Arc::new(DeviceStore::new());
        let link = SerialLink::new(Box::new(Unplugged), Arc::clone(&store));
        assert!(matches!(
            link.open("/dev/missing", 9600).await,
            Err(AppError::Connection(_))
        ));
        assert!(!store.snapshot().await.connected);
        assert!(!link.is_open().await);
    }

    #[tokio::test]
    async fn lines_are_delivered_in_order() {
        let (link, _, mut peers) = loopback();
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.on_line(Arc::new(move |line: String| -> BoxFuture<'static, ()> {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(line);
            })
        }));
        link.open("/dev/test", 9600).await.unwrap();

        let mut peer = peers.recv().await.unwrap();
        peer.write_all(b"OK:MOTOR_ON\r\n\nOK:LED_OFF\npartial")
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), "OK:MOTOR_ON");
        assert_eq!(rx.recv().await.unwrap(), "OK:LED_OFF");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn peer_hangup_marks_disconnected() {
        let (link, store, mut peers) = loopback();
        link.open("/dev/test", 9600).await.unwrap();
        drop(peers.recv().await.unwrap());

        wait_disconnected(&store).await;
        assert!(!link.is_open().await);
    }

    #[tokio::test]
    async fn close_always_broadcasts_disconnect() {
        let (link, store, _peers) = loopback();
        let (_, mut rx) = store.subscribe().await.unwrap();
        rx.recv().await.unwrap();

        link.close().await;
        let frame = rx.recv().await.unwrap();
        assert!(frame.as_str().contains("\"connected\":false"));
    }

    #[tokio::test]
    async fn reopen_replaces_previous_handle() {
        let (link, store, mut peers) = loopback();
        link.open("/dev/test", 9600).await.unwrap();
        let first = peers.recv().await.unwrap();
        link.open("/dev/test", 9600).await.unwrap();
        let second = peers.recv().await.unwrap();

        // The old reader is gone; hanging up the old peer must not flip state.
        drop(first);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(store.snapshot().await.connected);

        link.write_line("LED_ON").await.unwrap();
        let mut lines = BufReader::new(second).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "LED_ON");
    }
}
