use crate::channel::{Channel, TcpChannel};
use crate::log::{ChannelLogger, TracingLogger};
use crate::DataLinkError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const EVENT_BACKLOG: usize = 16;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accepts TCP connections and hands each one out as a [`Channel`].
pub struct TcpChannelProvider {
    listener: TcpListener,
    logger: Arc<dyn ChannelLogger>,
}

impl TcpChannelProvider {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self, DataLinkError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self::from_listener(listener))
    }

    pub fn from_listener(listener: TcpListener) -> Self {
        Self {
            listener,
            logger: Arc::new(TracingLogger),
        }
    }

    /// Logger installed on every accepted channel.
    pub fn with_logger(mut self, logger: Arc<dyn ChannelLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        Ok(self.listener.local_addr()?)
    }

    /// Starts accepting. Each accepted connection arrives as one event.
    pub fn start(self) -> ChannelEvents {
        let (tx, rx) = mpsc::channel(EVENT_BACKLOG);
        let Self { listener, logger } = self;

        let task = tokio::spawn(async move {
            loop {
                let (socket, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(err) => {
                        warn!(error = %err, "modbus tcp accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };
                debug!(%peer, "modbus tcp channel created");
                let channel: Arc<dyn Channel> =
                    Arc::new(TcpChannel::from_tcp(socket).with_logger(Arc::clone(&logger)));
                if tx.send(channel).await.is_err() {
                    break;
                }
            }
        });

        ChannelEvents {
            rx,
            task: Some(task),
        }
    }
}

/// Stream of channels created by a provider.
pub struct ChannelEvents {
    rx: mpsc::Receiver<Arc<dyn Channel>>,
    task: Option<JoinHandle<()>>,
}

impl ChannelEvents {
    /// Wraps channels produced elsewhere, such as in-memory test pipes.
    pub fn from_receiver(rx: mpsc::Receiver<Arc<dyn Channel>>) -> Self {
        Self { rx, task: None }
    }

    pub async fn next(&mut self) -> Option<Arc<dyn Channel>> {
        self.rx.recv().await
    }
}

impl Drop for ChannelEvents {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
