//! Transaction correlation for TCP masters.

use crate::{log_outcome, log_request};
use modlink_core::pdu::{CommErrorCode, ModbusRequest, ModbusResponse};
use modlink_datalink::codec::{read_frame, response_from_frame, TcpCodec, TcpFrame};
use modlink_datalink::{Channel, ChannelLog, DataLinkError, FrameCodec};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

// How long the reader waits for a header before re-checking the channel.
const IDLE_POLL: Duration = Duration::from_millis(500);

type Reply = Result<ModbusResponse, DataLinkError>;

struct PendingRequest {
    request: ModbusRequest,
    reply: oneshot::Sender<Reply>,
}

#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u16, PendingRequest>,
    closed: bool,
}

struct Shared {
    pending: Mutex<PendingTable>,
    next_transaction_id: AtomicU16,
}

impl Shared {
    fn pending(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a waiter under a fresh transaction id. Ids start at 1, wrap
    /// around, skip 0 and skip ids that are still waiting.
    fn register(
        &self,
        request: ModbusRequest,
    ) -> Result<(ModbusRequest, oneshot::Receiver<Reply>), DataLinkError> {
        let mut pending = self.pending();
        if pending.closed {
            return Err(DataLinkError::ConnectionClosed);
        }
        let transaction_id = loop {
            let candidate = self.next_transaction_id.fetch_add(1, Ordering::Relaxed);
            if candidate != 0 && !pending.waiters.contains_key(&candidate) {
                break candidate;
            }
        };

        let request = request.with_transaction_id(transaction_id);
        let (reply, rx) = oneshot::channel();
        pending.waiters.insert(
            transaction_id,
            PendingRequest {
                request: request.clone(),
                reply,
            },
        );
        Ok((request, rx))
    }

    fn take(&self, transaction_id: u16) -> Option<PendingRequest> {
        self.pending().waiters.remove(&transaction_id)
    }

    fn close(&self) {
        let waiters = {
            let mut pending = self.pending();
            pending.closed = true;
            std::mem::take(&mut pending.waiters)
        };
        for (transaction_id, waiter) in waiters {
            trace!(transaction_id, "failing pending request on close");
            let _ = waiter.reply.send(Err(DataLinkError::ConnectionClosed));
        }
    }
}

pub(crate) struct TcpLink {
    channel: Arc<dyn Channel>,
    shared: Arc<Shared>,
    reader: JoinHandle<()>,
}

impl TcpLink {
    pub(crate) fn start(channel: Arc<dyn Channel>, frame_timeout: Duration) -> Self {
        let shared = Arc::new(Shared {
            pending: Mutex::new(PendingTable::default()),
            next_transaction_id: AtomicU16::new(1),
        });
        let reader = tokio::spawn(read_loop(
            Arc::clone(&channel),
            Arc::clone(&shared),
            frame_timeout,
        ));
        Self {
            channel,
            shared,
            reader,
        }
    }

    pub(crate) async fn exchange(
        &self,
        request: ModbusRequest,
        timeout: Duration,
    ) -> Result<ModbusResponse, DataLinkError> {
        let channel = self.channel.as_ref();
        // Validate quantities before a transaction id is spent.
        request.to_pdu()?;
        let (request, rx) = self.shared.register(request)?;
        let transaction_id = request.transaction_id;

        let frame = match TcpCodec.encode_request(&request) {
            Ok(frame) => frame,
            Err(err) => {
                self.shared.take(transaction_id);
                return Err(err);
            }
        };
        log_request(channel, &request, &frame);

        let outcome = match channel.write(&frame).await {
            Ok(()) => match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(DataLinkError::ConnectionClosed),
                Err(_) => {
                    // A reply arriving from now on is logged as unrecognized.
                    self.shared.take(transaction_id);
                    Ok(ModbusResponse::failed(
                        request,
                        CommErrorCode::ResponseTimeout,
                        Vec::new(),
                    ))
                }
            },
            Err(err) => {
                self.shared.take(transaction_id);
                Err(err)
            }
        };
        log_outcome(channel, &outcome);
        outcome
    }

    pub(crate) fn shutdown(&self) {
        self.reader.abort();
        self.shared.close();
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn deliver(channel: &dyn Channel, shared: &Shared, frame: TcpFrame) {
    let transaction_id = frame.header.transaction_id;
    match shared.take(transaction_id) {
        Some(waiter) => {
            let reply = response_from_frame(&frame, &waiter.request).await;
            if waiter.reply.send(reply).is_err() {
                trace!(transaction_id, "waiter gone before reply");
            }
        }
        None => channel.logger().log(ChannelLog::Unrecognized {
            channel: channel.description().to_string(),
            bytes: frame.raw,
        }),
    }
}

async fn read_loop(channel: Arc<dyn Channel>, shared: Arc<Shared>, frame_timeout: Duration) {
    loop {
        match read_frame(channel.as_ref(), IDLE_POLL, frame_timeout).await {
            Ok(Some(frame)) => deliver(channel.as_ref(), &shared, frame).await,
            Ok(None) if channel.is_disposed() => break,
            Ok(None) => {}
            Err(err) => {
                debug!(channel = %channel.description(), error = %err, "tcp master reader stopped");
                break;
            }
        }
    }
    shared.close();
}

#[cfg(test)]
mod tests {
    use super::Shared;
    use modlink_core::pdu::{ModbusRequest, ObjectType};
    use modlink_datalink::DataLinkError;
    use std::sync::atomic::AtomicU16;
    use std::sync::Mutex;

    fn shared(first: u16) -> Shared {
        Shared {
            pending: Mutex::new(Default::default()),
            next_transaction_id: AtomicU16::new(first),
        }
    }

    fn request() -> ModbusRequest {
        ModbusRequest::read(1, ObjectType::Coil, 0, 1)
    }

    #[test]
    fn transaction_ids_wrap_past_zero() {
        let shared = shared(u16::MAX);
        let (first, _rx1) = shared.register(request()).unwrap();
        let (second, _rx2) = shared.register(request()).unwrap();
        assert_eq!(first.transaction_id, u16::MAX);
        assert_eq!(second.transaction_id, 1);
    }

    #[test]
    fn ids_still_waiting_are_skipped() {
        let shared = shared(1);
        let (_first, _rx1) = shared.register(request()).unwrap();
        shared
            .next_transaction_id
            .store(1, std::sync::atomic::Ordering::Relaxed);
        let (second, _rx2) = shared.register(request()).unwrap();
        assert_eq!(second.transaction_id, 2);
    }

    #[tokio::test]
    async fn close_fails_every_waiter() {
        let shared = shared(1);
        let (_, rx) = shared.register(request()).unwrap();
        shared.close();
        assert!(matches!(
            rx.await.unwrap(),
            Err(DataLinkError::ConnectionClosed)
        ));
        assert!(matches!(
            shared.register(request()),
            Err(DataLinkError::ConnectionClosed)
        ));
    }
}
