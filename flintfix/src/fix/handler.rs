//! The transport handler: one connection, two pumps, one dispatch table.
//!
//! The handler owns the socket. A reader task frames bytes into messages
//! and feeds a bounded inbound queue; a writer task drains a bounded
//! outbound queue onto the socket. The session engine sits between them:
//! it is the single consumer of the inbound queue (sequence tracking has to
//! see every message) and the single producer of the outbound one, so
//! MsgSeqNum order on the wire always matches write order.
//!
//! Application messages the engine has validated are re-published through
//! the [`SubscriberRegistry`], which fans each message out to the
//! subscribers registered for its MsgType, in subscription order. A
//! subscriber that went away is skipped and later dropped; it cannot stall
//! the rest.

use crate::fix::log::Logger;
use crate::fix::mem::MsgBuf;
use crate::fix::{stream, SessionError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Duration;

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("transport handler is stopping")]
pub struct HandlerStopped;

/// Why a handler shut down; recorded at the first `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    LogoutComplete,
    ProtocolError,
    Timeout,
    TransportClosed,
    UserRequested,
}

/// What the reader pushes at the engine: a framed message, or the error
/// that interrupted framing.
pub(super) enum Incoming {
    Message(MsgBuf),
    Error(SessionError),
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<Arc<MsgBuf>>,
}

/// MsgType-keyed fan-out table. Also carries catch-all subscribers that see
/// every published message.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: u64,
    by_type: HashMap<char, Vec<Subscriber>>,
    catch_all: Vec<Subscriber>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    id: u64,
    msg_type: Option<char>,
}

pub(crate) type SharedRegistry = Arc<Mutex<SubscriberRegistry>>;

pub(crate) fn new_registry() -> SharedRegistry {
    Arc::new(Mutex::new(SubscriberRegistry::default()))
}

impl SubscriberRegistry {
    fn register(
        &mut self,
        msg_type: Option<char>,
        capacity: usize,
    ) -> (SubscriptionHandle, mpsc::Receiver<Arc<MsgBuf>>) {
        self.next_id += 1;
        let id = self.next_id;
        let (sender, receiver) = mpsc::channel(capacity);
        let subscriber = Subscriber { id, sender };
        match msg_type {
            Some(t) => self.by_type.entry(t).or_default().push(subscriber),
            None => self.catch_all.push(subscriber),
        }
        (SubscriptionHandle { id, msg_type }, receiver)
    }

    fn remove(&mut self, handle: SubscriptionHandle) {
        match handle.msg_type {
            Some(t) => {
                if let Some(subs) = self.by_type.get_mut(&t) {
                    subs.retain(|s| s.id != handle.id);
                }
            }
            None => self.catch_all.retain(|s| s.id != handle.id),
        }
    }

    fn senders_for(&self, msg_type: char) -> Vec<(u64, mpsc::Sender<Arc<MsgBuf>>)> {
        let mut senders = Vec::new();
        if let Some(subs) = self.by_type.get(&msg_type) {
            senders.extend(subs.iter().map(|s| (s.id, s.sender.clone())));
        }
        senders.extend(self.catch_all.iter().map(|s| (s.id, s.sender.clone())));
        senders
    }

    fn drop_dead(&mut self, dead: &[u64]) {
        for subs in self.by_type.values_mut() {
            subs.retain(|s| !dead.contains(&s.id));
        }
        self.catch_all.retain(|s| !dead.contains(&s.id));
    }
}

pub(crate) fn subscribe(
    registry: &SharedRegistry,
    msg_type: Option<char>,
    capacity: usize,
) -> (SubscriptionHandle, mpsc::Receiver<Arc<MsgBuf>>) {
    registry.lock().unwrap().register(msg_type, capacity)
}

pub(crate) fn unsubscribe(registry: &SharedRegistry, handle: SubscriptionHandle) {
    registry.lock().unwrap().remove(handle);
}

pub(super) struct TransportHandler {
    outbound: mpsc::Sender<MsgBuf>,
    inbound: mpsc::Receiver<Incoming>,
    registry: SharedRegistry,
    cancel: watch::Sender<bool>,
    stop_reason: Option<StopReason>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl TransportHandler {
    /// Splits the socket and starts the reader and writer pumps. Both
    /// queues are bounded at `capacity`.
    pub(super) fn start(
        stream: TcpStream,
        registry: SharedRegistry,
        capacity: usize,
        mut read_logger: impl Logger + Send + 'static,
        mut write_logger: impl Logger + Send + 'static,
    ) -> TransportHandler {
        let (read_half, mut write_half) = stream.into_split();
        let (inbound_sender, inbound) = mpsc::channel::<Incoming>(capacity);
        let (outbound, mut outbound_receiver) = mpsc::channel::<MsgBuf>(capacity);
        let (cancel, cancel_seen_reader) = watch::channel(false);
        let mut cancel_seen_writer = cancel_seen_reader.clone();

        let reader = tokio::spawn(async move {
            let mut framer = stream::Framer::new(read_half);
            let mut cancel_seen = cancel_seen_reader;
            loop {
                let result = tokio::select! {
                    biased;
                    _ = cancel_seen.changed() => break,
                    r = framer.next_frame(&mut read_logger) => r,
                };
                match result {
                    Ok(msg) => {
                        if inbound_sender.send(Incoming::Message(msg)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let fatal = matches!(
                            e,
                            SessionError::IoError(_) | SessionError::TcpDisconnection
                        );
                        let _ = inbound_sender.send(Incoming::Error(e)).await;
                        if fatal {
                            break;
                        }
                    }
                }
            }
        });

        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_seen_writer.changed() => break,
                    maybe_msg = outbound_receiver.recv() => {
                        let Some(msg) = maybe_msg else { break };
                        if stream::write_frame(&mut write_half, &msg, &mut write_logger)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                }
            }
            // stopping: drain what was already queued, then close
            let drain = async {
                while let Ok(msg) = outbound_receiver.try_recv() {
                    if stream::write_frame(&mut write_half, &msg, &mut write_logger)
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            };
            let _ = tokio::time::timeout(DRAIN_DEADLINE, drain).await;
            use tokio::io::AsyncWriteExt;
            let _ = write_half.shutdown().await;
        });

        TransportHandler {
            outbound,
            inbound,
            registry,
            cancel,
            stop_reason: None,
            reader,
            writer,
        }
    }

    /// Queues a framed message for the wire. Blocks while the outbound
    /// queue is full; fails once the handler is stopping.
    pub(super) async fn send(&self, msg: MsgBuf) -> Result<(), HandlerStopped> {
        if *self.cancel.borrow() {
            return Err(HandlerStopped);
        }
        self.outbound.send(msg).await.map_err(|_| HandlerStopped)
    }

    /// The engine's intake: the next framed message or framing error, in
    /// the order the reader produced them. `None` once the reader is gone
    /// and the queue is empty.
    pub(super) async fn recv(&mut self) -> Option<Incoming> {
        self.inbound.recv().await
    }

    /// Fans a validated message out to its subscribers, in subscription
    /// order. Subscribers that hung up are dropped from the registry.
    pub(super) async fn publish(&self, msg_type: char, msg: Arc<MsgBuf>) {
        publish(&self.registry, msg_type, msg).await
    }

    /// Signals both pumps to stop. The writer drains the outbound queue up
    /// to a deadline and closes the socket. Idempotent; the first reason
    /// wins.
    pub(super) async fn stop(&mut self, reason: StopReason) {
        if self.stop_reason.is_some() {
            return;
        }
        self.stop_reason = Some(reason);
        let _ = self.cancel.send(true);
        let _ = tokio::time::timeout(DRAIN_DEADLINE * 2, &mut self.writer).await;
        self.reader.abort();
        let _ = (&mut self.reader).await;
    }

    pub(super) fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }
}

pub(super) async fn publish(registry: &SharedRegistry, msg_type: char, msg: Arc<MsgBuf>) {
    let senders = registry.lock().unwrap().senders_for(msg_type);
    let mut dead = Vec::new();
    for (id, sender) in senders {
        if sender.send(Arc::clone(&msg)).await.is_err() {
            dead.push(id);
        }
    }
    if !dead.is_empty() {
        registry.lock().unwrap().drop_dead(&dead);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::log::NullLogger;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    const LOGON: &[u8] = b"8=FIX.4.4\x019=67\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156=TW\x0198=0\x01108=30\x01141=Y\x0110=003\x01";

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_reader_frames_inbound_messages() {
        let (client, server) = connected_pair().await;
        let registry = new_registry();
        let mut handler = TransportHandler::start(server, registry, 10, NullLogger, NullLogger);

        let mut peer = client;
        peer.write_all(LOGON).await.unwrap();

        match handler.recv().await {
            Some(Incoming::Message(msg)) => assert_eq!(msg.as_slice(), LOGON),
            _ => panic!("expected a framed message"),
        }
        handler.stop(StopReason::UserRequested).await;
    }

    #[tokio::test]
    async fn test_writer_puts_messages_on_the_wire() {
        let (client, server) = connected_pair().await;
        let registry = new_registry();
        let mut handler = TransportHandler::start(server, registry, 10, NullLogger, NullLogger);

        handler.send(MsgBuf::from(LOGON)).await.unwrap();
        handler.send(MsgBuf::from(LOGON)).await.unwrap();

        let mut peer = client;
        let mut read_back = vec![0u8; LOGON.len() * 2];
        peer.read_exact(&mut read_back).await.unwrap();
        assert_eq!(&read_back[..LOGON.len()], LOGON);
        assert_eq!(&read_back[LOGON.len()..], LOGON);
        handler.stop(StopReason::UserRequested).await;
    }

    #[tokio::test]
    async fn test_send_fails_once_stopping() {
        let (_client, server) = connected_pair().await;
        let registry = new_registry();
        let mut handler = TransportHandler::start(server, registry, 10, NullLogger, NullLogger);

        handler.stop(StopReason::LogoutComplete).await;
        assert_eq!(
            handler.send(MsgBuf::from(LOGON)).await,
            Err(HandlerStopped)
        );
        assert_eq!(handler.stop_reason(), Some(StopReason::LogoutComplete));

        // stop is idempotent and keeps the first reason
        handler.stop(StopReason::Timeout).await;
        assert_eq!(handler.stop_reason(), Some(StopReason::LogoutComplete));
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_as_error() {
        let (client, server) = connected_pair().await;
        let registry = new_registry();
        let mut handler = TransportHandler::start(server, registry, 10, NullLogger, NullLogger);

        drop(client);
        match handler.recv().await {
            Some(Incoming::Error(SessionError::TcpDisconnection)) => {}
            _ => panic!("expected a disconnection error"),
        }
        handler.stop(StopReason::TransportClosed).await;
    }

    #[tokio::test]
    async fn test_publish_dispatches_in_subscription_order() {
        let registry = new_registry();
        let (_h1, mut first) = subscribe(&registry, Some('8'), 10);
        let (_h2, mut second) = subscribe(&registry, Some('8'), 10);
        let (_h3, mut other_type) = subscribe(&registry, Some('D'), 10);
        let (_h4, mut everything) = subscribe(&registry, None, 10);

        publish(&registry, '8', Arc::new(MsgBuf::from(LOGON))).await;

        assert!(first.try_recv().is_ok());
        assert!(second.try_recv().is_ok());
        assert!(everything.try_recv().is_ok());
        assert!(other_type.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dead_subscriber_does_not_block_the_rest() {
        let registry = new_registry();
        let (_h1, first) = subscribe(&registry, Some('8'), 10);
        let (_h2, mut second) = subscribe(&registry, Some('8'), 10);
        drop(first);

        publish(&registry, '8', Arc::new(MsgBuf::from(LOGON))).await;
        assert!(second.try_recv().is_ok());
        // the dead subscriber was pruned
        assert!(registry.lock().unwrap().by_type[&'8'].len() == 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_subscriber() {
        let registry = new_registry();
        let (handle, mut receiver) = subscribe(&registry, Some('8'), 10);
        unsubscribe(&registry, handle);

        publish(&registry, '8', Arc::new(MsgBuf::from(LOGON))).await;
        assert!(receiver.try_recv().is_err());
    }
}
