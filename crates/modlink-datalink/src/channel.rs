use crate::log::{ChannelLogger, TracingLogger};
use crate::DataLinkError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::trace;

const READ_CHUNK: usize = 256;

/// A bidirectional byte pipe to one peer.
///
/// Reads are bounded by a timeout and never lose bytes: a read that times out
/// leaves everything it collected available to the next read.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human readable peer description used in logs.
    fn description(&self) -> &str;

    fn logger(&self) -> &Arc<dyn ChannelLogger>;

    async fn write(&self, bytes: &[u8]) -> Result<(), DataLinkError>;

    async fn read_byte(&self, timeout: Duration) -> Result<u8, DataLinkError>;

    /// Reads exactly `count` bytes or nothing.
    async fn read_bytes(&self, count: usize, timeout: Duration) -> Result<Vec<u8>, DataLinkError>;

    /// Returns whatever is already buffered without waiting.
    async fn read_all_remaining(&self) -> Result<Vec<u8>, DataLinkError>;

    fn is_disposed(&self) -> bool;

    async fn dispose(&self);
}

struct ReadState<S> {
    half: ReadHalf<S>,
    pending: VecDeque<u8>,
}

/// [`Channel`] over any tokio byte stream.
pub struct StreamChannel<S> {
    description: String,
    logger: Arc<dyn ChannelLogger>,
    reader: Mutex<ReadState<S>>,
    writer: Mutex<WriteHalf<S>>,
    disposed: AtomicBool,
}

pub type TcpChannel = StreamChannel<TcpStream>;

impl<S> fmt::Debug for StreamChannel<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamChannel")
            .field("description", &self.description)
            .field("disposed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, description: impl Into<String>) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            description: description.into(),
            logger: Arc::new(TracingLogger),
            reader: Mutex::new(ReadState {
                half: read_half,
                pending: VecDeque::new(),
            }),
            writer: Mutex::new(write_half),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_logger(mut self, logger: Arc<dyn ChannelLogger>) -> Self {
        self.logger = logger;
        self
    }

    fn mark_disposed(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    /// Pulls the next chunk from the stream into `pending`.
    async fn fill(&self, state: &mut ReadState<S>, deadline: Instant) -> Result<(), DataLinkError> {
        let mut chunk = [0u8; READ_CHUNK];
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, state.half.read(&mut chunk)).await {
            Err(_) => Err(DataLinkError::Timeout),
            Ok(Ok(0)) => {
                self.mark_disposed();
                Err(DataLinkError::ConnectionClosed)
            }
            Ok(Ok(n)) => {
                trace!(channel = %self.description, len = n, "channel read");
                state.pending.extend(&chunk[..n]);
                Ok(())
            }
            Ok(Err(err)) => {
                self.mark_disposed();
                Err(DataLinkError::Io(err))
            }
        }
    }
}

impl<S> StreamChannel<S> {
    fn is_closed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

impl TcpChannel {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, DataLinkError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_tcp(stream))
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let description = stream
            .peer_addr()
            .map(|peer| format!("tcp {peer}"))
            .unwrap_or_else(|_| "tcp".to_string());
        // Small request/response frames; do not wait to coalesce.
        let _ = stream.set_nodelay(true);
        Self::new(stream, description)
    }
}

#[async_trait]
impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn description(&self) -> &str {
        &self.description
    }

    fn logger(&self) -> &Arc<dyn ChannelLogger> {
        &self.logger
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), DataLinkError> {
        if self.is_closed() {
            return Err(DataLinkError::ConnectionClosed);
        }
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(bytes).await?;
            writer.flush().await
        }
        .await;
        if let Err(err) = result {
            self.mark_disposed();
            return Err(DataLinkError::Io(err));
        }
        trace!(channel = %self.description, len = bytes.len(), "channel write");
        Ok(())
    }

    async fn read_byte(&self, timeout: Duration) -> Result<u8, DataLinkError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.reader.lock().await;
        loop {
            if let Some(byte) = state.pending.pop_front() {
                return Ok(byte);
            }
            if self.is_closed() {
                return Err(DataLinkError::ConnectionClosed);
            }
            self.fill(&mut state, deadline).await?;
        }
    }

    async fn read_bytes(&self, count: usize, timeout: Duration) -> Result<Vec<u8>, DataLinkError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.reader.lock().await;
        while state.pending.len() < count {
            if self.is_closed() {
                return Err(DataLinkError::ConnectionClosed);
            }
            self.fill(&mut state, deadline).await?;
        }
        Ok(state.pending.drain(..count).collect())
    }

    async fn read_all_remaining(&self) -> Result<Vec<u8>, DataLinkError> {
        let mut state = self.reader.lock().await;
        loop {
            if self.is_closed() {
                break;
            }
            match self.fill(&mut state, Instant::now()).await {
                Ok(()) => continue,
                Err(DataLinkError::Timeout) => break,
                Err(err) if state.pending.is_empty() => return Err(err),
                Err(_) => break,
            }
        }
        Ok(state.pending.drain(..).collect())
    }

    fn is_disposed(&self) -> bool {
        self.is_closed()
    }

    async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
