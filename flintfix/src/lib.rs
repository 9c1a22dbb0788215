//! A FIX 4.4 engine for Rust, speaking both sides of a session.
//!
//! flintfix connects (or accepts) a TCP byte stream, performs the FIX
//! logon handshake, and keeps the session alive: heartbeats, test
//! requests, sequence tracking, gap recovery via resend, and an orderly
//! logout. Application messages are plain [`Message`] trees; build them,
//! hand them to the session handle, and subscribe to the MsgTypes you
//! care about for the inbound direction.
//!
//! ## Terminology
//! * `FIX connection` -- one TCP connection carrying one logon/logout
//!   cycle of a FIX session.
//! * `FIX session` -- the ordered, bidirectional message stream between
//!   two comp ids. Sequence numbers survive reconnects, so a session can
//!   outlive many connections.
//! * `engine` -- the background task that owns a connection and runs the
//!   protocol for it.
//!
//! ## Example
//! ```no_run
//! use flintfix::{
//!     ApplicationError, FixInitiator, SessionSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ApplicationError> {
//!     let settings = SessionSettings::builder()
//!         .with_sender_comp_id("my_id")
//!         .with_target_comp_id("peer_id")
//!         .with_socket_addr("127.0.0.1:9880".parse().unwrap())
//!         .with_store_path("./store.db".into())
//!         .with_log_dir("./log".into())
//!         .build()?;
//!
//!     let (handle, mut app_messages) = FixInitiator::build(settings)?.initiate().await?;
//!
//!     tokio::spawn(async move {
//!         while let Some(msg) = app_messages.recv().await {
//!             println!("application message: {}", msg);
//!         }
//!     });
//!
//!     handle.start_async().await?;
//!     // build and send messages here...
//!     handle.end_async().await?;
//!     Ok(())
//! }
//! ```

pub mod fix;

use fix::handler::{self, SharedRegistry, SubscriptionHandle};
use fix::mem::MsgBuf;
use fix::message::Message;
use fix::store::MessageStorage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, oneshot};

const BEGIN_STRING: &str = "FIX.4.4";

pub(crate) enum Request {
    Logon {
        resp_sender: oneshot::Sender<bool>,
    },
    SendMessage {
        resp_sender: oneshot::Sender<bool>,
        message: Message,
    },
    Logout {
        resp_sender: oneshot::Sender<bool>,
    },
}

/// Errors surfaced through the public API.
#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("An I/O error occured: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Session ended unexpectedly")]
    SessionEnded,
    #[error("Logon has failed")]
    LogonFailed,
    #[error("Logout has failed")]
    LogoutFailed,
    #[error("MessageSend has failed")]
    SendMessageFailed,
    #[error("setting `{0}` is required")]
    SettingRequired(String),
}

/// What the acceptor learns about a peer at logon, handed to the
/// authentication callback.
#[derive(Debug, Clone)]
pub struct LogonRequest {
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub reset_seq_num_flag: bool,
    pub heart_bt_int: u32,
}

/// Decides a logon: `Ok` accepts, `Err` carries the text echoed back in
/// the Logout that closes the connection.
pub type Authenticator = Arc<dyn Fn(&LogonRequest) -> Result<(), String> + Send + Sync>;

/// How an initiator retries the TCP connect.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 1,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// Everything a session needs to run. Construct with the
/// [`SessionSettingsBuilder`].
#[derive(Clone)]
pub struct SessionSettings {
    pub(crate) begin_string: Arc<String>,
    pub(crate) engine_type: EngineType,
    pub(crate) sender_comp_id: String,
    pub(crate) target_comp_id: String,
    pub(crate) addr: SocketAddr,
    pub(crate) session_id: String,
    pub(crate) store_path: PathBuf,
    pub(crate) log_dir: PathBuf,
    pub(crate) heartbeat_timeout: Duration,
    pub(crate) logon_timeout: Duration,
    pub(crate) queue_capacity: usize,
    pub(crate) heartbeat_limits: Option<(u32, u32)>,
    pub(crate) authenticator: Option<Authenticator>,
    pub(crate) storage: Option<Arc<dyn MessageStorage>>,
    pub(crate) username: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) reset_seq_num_on_logon: bool,
    pub(crate) reconnect: ReconnectPolicy,
}

impl std::fmt::Debug for SessionSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSettings")
            .field("begin_string", &self.begin_string)
            .field("engine_type", &self.engine_type)
            .field("sender_comp_id", &self.sender_comp_id)
            .field("target_comp_id", &self.target_comp_id)
            .field("addr", &self.addr)
            .field("session_id", &self.session_id)
            .field("store_path", &self.store_path)
            .field("log_dir", &self.log_dir)
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("logon_timeout", &self.logon_timeout)
            .field("queue_capacity", &self.queue_capacity)
            .field("heartbeat_limits", &self.heartbeat_limits)
            .field("authenticator", &self.authenticator.as_ref().map(|_| "<fn>"))
            .field("storage", &self.storage.as_ref().map(|_| "<storage>"))
            .field("username", &self.username)
            .field("password", &self.password)
            .field("reset_seq_num_on_logon", &self.reset_seq_num_on_logon)
            .field("reconnect", &self.reconnect)
            .finish()
    }
}

/// Builder for [`SessionSettings`].
///
/// Required: sender comp id, target comp id, socket address, store path,
/// log directory. Everything else has a sensible default.
#[derive(Default)]
pub struct SessionSettingsBuilder {
    sender_comp_id: Option<String>,
    target_comp_id: Option<String>,
    addr: Option<SocketAddr>,
    session_id: Option<String>,
    store_path: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    heartbeat_timeout: Option<Duration>,
    logon_timeout: Option<Duration>,
    queue_capacity: Option<usize>,
    heartbeat_limits: Option<(u32, u32)>,
    authenticator: Option<Authenticator>,
    storage: Option<Arc<dyn MessageStorage>>,
    username: Option<String>,
    password: Option<String>,
    reset_seq_num_on_logon: bool,
    reconnect: Option<ReconnectPolicy>,
}

impl SessionSettingsBuilder {
    pub fn new() -> SessionSettingsBuilder {
        Default::default()
    }

    /// The `SenderCompID(49)` stamped on every outbound message.
    pub fn with_sender_comp_id(mut self, sender_comp_id: &str) -> Self {
        self.set_sender_comp_id(sender_comp_id);
        self
    }
    pub fn set_sender_comp_id(&mut self, sender_comp_id: &str) {
        self.sender_comp_id = Some(sender_comp_id.to_string());
    }

    /// The `TargetCompID(56)` stamped on every outbound message.
    pub fn with_target_comp_id(mut self, target_comp_id: &str) -> Self {
        self.set_target_comp_id(target_comp_id);
        self
    }
    pub fn set_target_comp_id(&mut self, target_comp_id: &str) {
        self.target_comp_id = Some(target_comp_id.to_string());
    }

    /// The address to connect to, or to listen on.
    pub fn with_socket_addr(mut self, addr: SocketAddr) -> Self {
        self.addr = Some(addr);
        self
    }
    pub fn set_socket_addr(&mut self, addr: SocketAddr) {
        self.addr = Some(addr);
    }

    /// Identifies the session in storage and log file names. Defaults to
    /// `<sender>_<target>`.
    pub fn with_session_id(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }
    pub fn set_session_id(&mut self, session_id: &str) {
        self.session_id = Some(session_id.to_string());
    }

    /// Where the sqlite message store lives.
    pub fn with_store_path(mut self, store_path: PathBuf) -> Self {
        self.store_path = Some(store_path);
        self
    }
    pub fn set_store_path(&mut self, store_path: PathBuf) {
        self.store_path = Some(store_path);
    }

    /// Directory for per-session wire logs.
    pub fn with_log_dir(mut self, log_dir: PathBuf) -> Self {
        self.log_dir = Some(log_dir);
        self
    }
    pub fn set_log_dir(&mut self, log_dir: PathBuf) {
        self.log_dir = Some(log_dir);
    }

    /// The `HeartBtInt(108)` this side proposes at logon; also the
    /// interval used until logon completes.
    pub fn with_heartbeat_timeout(mut self, hb_timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(hb_timeout);
        self
    }
    pub fn set_heartbeat_timeout(&mut self, hb_timeout: Duration) {
        self.heartbeat_timeout = Some(hb_timeout);
    }

    /// How long an acceptor waits for the peer's Logon before dropping
    /// the connection.
    pub fn with_logon_timeout(mut self, logon_timeout: Duration) -> Self {
        self.logon_timeout = Some(logon_timeout);
        self
    }
    pub fn set_logon_timeout(&mut self, logon_timeout: Duration) {
        self.logon_timeout = Some(logon_timeout);
    }

    /// Capacity of the inbound and outbound message queues.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }
    pub fn set_queue_capacity(&mut self, capacity: usize) {
        self.queue_capacity = Some(capacity);
    }

    /// Acceptor only: the inclusive range a peer's `HeartBtInt(108)` must
    /// fall within at logon.
    pub fn with_heartbeat_limits(mut self, min: u32, max: u32) -> Self {
        self.heartbeat_limits = Some((min, max));
        self
    }
    pub fn set_heartbeat_limits(&mut self, min: u32, max: u32) {
        self.heartbeat_limits = Some((min, max));
    }

    /// Acceptor only: callback that accepts or rejects each logon.
    pub fn with_authenticator(mut self, authenticator: Authenticator) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
    pub fn set_authenticator(&mut self, authenticator: Authenticator) {
        self.authenticator = Some(authenticator);
    }

    /// Overrides the storage backend. Without this, the engine opens the
    /// sqlite store at the configured path (or an in-memory store when
    /// the `sqlite` feature is off).
    pub fn with_storage(mut self, storage: Arc<dyn MessageStorage>) -> Self {
        self.storage = Some(storage);
        self
    }
    pub fn set_storage(&mut self, storage: Arc<dyn MessageStorage>) {
        self.storage = Some(storage);
    }

    /// Initiator only: `Username(553)` sent at logon.
    pub fn with_username(mut self, username: &str) -> Self {
        self.username = Some(username.to_string());
        self
    }
    pub fn set_username(&mut self, username: &str) {
        self.username = Some(username.to_string());
    }

    /// Initiator only: `Password(554)` sent at logon.
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }
    pub fn set_password(&mut self, password: &str) {
        self.password = Some(password.to_string());
    }

    /// Initiator only: send `ResetSeqNumFlag(141)=Y` at logon, restarting
    /// both sequence counters at 1.
    pub fn with_reset_seq_num_on_logon(mut self, reset: bool) -> Self {
        self.reset_seq_num_on_logon = reset;
        self
    }
    pub fn set_reset_seq_num_on_logon(&mut self, reset: bool) {
        self.reset_seq_num_on_logon = reset;
    }

    /// Initiator only: TCP connect retry policy.
    pub fn with_reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = Some(policy);
        self
    }
    pub fn set_reconnect_policy(&mut self, policy: ReconnectPolicy) {
        self.reconnect = Some(policy);
    }

    /// Builds the settings, or `Err(ApplicationError::SettingRequired)`
    /// when a required field is missing.
    pub fn build(self) -> Result<SessionSettings, ApplicationError> {
        let sender_comp_id = self.sender_comp_id.ok_or(ApplicationError::SettingRequired(
            "sender_comp_id".to_string(),
        ))?;
        let target_comp_id = self.target_comp_id.ok_or(ApplicationError::SettingRequired(
            "target_comp_id".to_string(),
        ))?;
        let addr = self
            .addr
            .ok_or(ApplicationError::SettingRequired("addr".to_string()))?;
        let store_path = self
            .store_path
            .ok_or(ApplicationError::SettingRequired("store_path".to_string()))?;
        let log_dir = self
            .log_dir
            .ok_or(ApplicationError::SettingRequired("log_dir".to_string()))?;

        Ok(SessionSettings {
            begin_string: Arc::new(String::from(BEGIN_STRING)),
            engine_type: EngineType::Initiator,
            session_id: self
                .session_id
                .unwrap_or(format!("{}_{}", &sender_comp_id, &target_comp_id)),
            heartbeat_timeout: self.heartbeat_timeout.unwrap_or(Duration::from_secs(30)),
            logon_timeout: self.logon_timeout.unwrap_or(Duration::from_secs(10)),
            queue_capacity: self.queue_capacity.unwrap_or(10),
            heartbeat_limits: self.heartbeat_limits,
            authenticator: self.authenticator,
            storage: self.storage,
            username: self.username,
            password: self.password,
            reset_seq_num_on_logon: self.reset_seq_num_on_logon,
            reconnect: self.reconnect.unwrap_or_default(),
            sender_comp_id,
            target_comp_id,
            addr,
            store_path,
            log_dir,
        })
    }
}

impl SessionSettings {
    pub fn builder() -> SessionSettingsBuilder {
        SessionSettingsBuilder::new()
    }
}

/// A cloneable handle on a running session engine.
///
/// All operations come in three flavors: fire-and-return (yields a
/// [`oneshot::Receiver`] with the eventual outcome), `_async` (awaits the
/// outcome), and `_sync` (blocks a non-async caller). The engine may stop
/// at any moment; operations then fail with
/// [`ApplicationError::SessionEnded`] or their specific failure.
///
/// [`oneshot::Receiver`]: tokio::sync::oneshot::Receiver
#[derive(Clone)]
pub struct SessionHandle {
    request_sender: mpsc::UnboundedSender<Request>,
    registry: SharedRegistry,
    begin_string: Arc<String>,
    queue_capacity: usize,
}

impl SessionHandle {
    /// Asks the engine to perform the logon handshake.
    pub fn start(&self) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        if self.request_sender.is_closed() {
            return Err(ApplicationError::SessionEnded);
        }
        let (resp_sender, resp_receiver) = oneshot::channel();
        let _ = self.request_sender.send(Request::Logon { resp_sender });
        Ok(resp_receiver)
    }
    pub async fn start_async(&self) -> Result<(), ApplicationError> {
        if Ok(true) != self.start()?.await {
            return Err(ApplicationError::LogonFailed);
        }
        Ok(())
    }
    pub fn start_sync(&self) -> Result<(), ApplicationError> {
        if Ok(true) != self.start()?.blocking_recv() {
            return Err(ApplicationError::LogonFailed);
        }
        Ok(())
    }

    /// Queues `message` for the wire. The engine stamps MsgSeqNum, the
    /// comp ids and SendingTime; the receiver yields `true` once the
    /// message has been persisted and written.
    pub fn send_message(
        &self,
        message: Message,
    ) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        if self.request_sender.is_closed() {
            return Err(ApplicationError::SessionEnded);
        }
        let (resp_sender, resp_receiver) = oneshot::channel();
        let _ = self.request_sender.send(Request::SendMessage {
            resp_sender,
            message,
        });
        Ok(resp_receiver)
    }
    pub async fn send_message_async(&self, message: Message) -> Result<(), ApplicationError> {
        if Ok(true) != self.send_message(message)?.await {
            return Err(ApplicationError::SendMessageFailed);
        }
        Ok(())
    }
    pub fn send_message_sync(&self, message: Message) -> Result<(), ApplicationError> {
        if Ok(true) != self.send_message(message)?.blocking_recv() {
            return Err(ApplicationError::SendMessageFailed);
        }
        Ok(())
    }

    /// Asks the engine to log out and close the connection.
    pub fn end(&self) -> Result<oneshot::Receiver<bool>, ApplicationError> {
        let (resp_sender, resp_receiver) = oneshot::channel();
        let _ = self.request_sender.send(Request::Logout { resp_sender });
        Ok(resp_receiver)
    }
    pub async fn end_async(&self) -> Result<(), ApplicationError> {
        if Ok(true) != self.end()?.await {
            return Err(ApplicationError::LogoutFailed);
        }
        Ok(())
    }
    pub fn end_sync(&self) -> Result<(), ApplicationError> {
        if Ok(true) != self.end()?.blocking_recv() {
            return Err(ApplicationError::LogoutFailed);
        }
        Ok(())
    }

    /// Subscribes to validated inbound messages of one MsgType. Messages
    /// are dispatched to subscribers in subscription order.
    pub fn subscribe(
        &self,
        msg_type: char,
    ) -> (SubscriptionHandle, mpsc::Receiver<Arc<MsgBuf>>) {
        handler::subscribe(&self.registry, Some(msg_type), self.queue_capacity)
    }

    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        handler::unsubscribe(&self.registry, handle);
    }

    /// Always `"FIX.4.4"`.
    pub fn begin_string(&self) -> Arc<String> {
        Arc::clone(&self.begin_string)
    }
}

fn spawn_engine(
    stream: TcpStream,
    settings: SessionSettings,
) -> (SessionHandle, mpsc::Receiver<Arc<MsgBuf>>) {
    let (request_sender, request_receiver) = mpsc::unbounded_channel::<Request>();
    let registry = handler::new_registry();
    let begin_string = Arc::clone(&settings.begin_string);
    let queue_capacity = settings.queue_capacity;

    let (_, app_message_receiver) = handler::subscribe(&registry, None, queue_capacity);

    let engine_registry = Arc::clone(&registry);
    tokio::spawn(async move {
        if let Err(e) = fix::run_session(stream, request_receiver, engine_registry, settings).await
        {
            eprintln!("{e:?}");
        }
    });

    let handle = SessionHandle {
        request_sender,
        registry,
        begin_string,
        queue_capacity,
    };

    (handle, app_message_receiver)
}

/// Dials the peer and spins up an engine per connection.
pub struct FixInitiator {
    settings: SessionSettings,
    stream_factory: StreamFactory,
}

impl FixInitiator {
    pub fn build(mut settings: SessionSettings) -> Result<FixInitiator, ApplicationError> {
        settings.engine_type = EngineType::Initiator;
        let stream_factory = StreamFactory::build(&settings)?;
        Ok(FixInitiator {
            settings,
            stream_factory,
        })
    }

    /// Connects (retrying per the [`ReconnectPolicy`]) and starts the
    /// engine on the current runtime.
    ///
    /// Returns the session handle and a receiver carrying every validated
    /// inbound application message. Close the receiver if you subscribe
    /// per MsgType instead.
    pub async fn initiate(
        self,
    ) -> Result<(SessionHandle, mpsc::Receiver<Arc<MsgBuf>>), ApplicationError> {
        let stream = self.stream_factory.stream().await?;
        Ok(spawn_engine(stream, self.settings))
    }

    /// Connects, then drives the engine from `runtime` on a background
    /// thread. For callers without their own async runtime.
    pub fn initiate_with_runtime(
        self,
        runtime: tokio::runtime::Runtime,
    ) -> Result<(SessionHandle, mpsc::Receiver<Arc<MsgBuf>>), ApplicationError> {
        let stream = runtime.block_on(self.stream_factory.stream())?;
        let (request_sender, request_receiver) = mpsc::unbounded_channel::<Request>();
        let registry = handler::new_registry();
        let begin_string = Arc::clone(&self.settings.begin_string);
        let queue_capacity = self.settings.queue_capacity;
        let (_, app_message_receiver) = handler::subscribe(&registry, None, queue_capacity);

        let engine_registry = Arc::clone(&registry);
        let settings = self.settings;
        std::thread::spawn(move || {
            if let Err(e) =
                runtime.block_on(fix::run_session(stream, request_receiver, engine_registry, settings))
            {
                eprintln!("{e:?}");
            }
        });

        let handle = SessionHandle {
            request_sender,
            registry,
            begin_string,
            queue_capacity,
        };
        Ok((handle, app_message_receiver))
    }

    pub fn initiate_sync(
        self,
    ) -> Result<(SessionHandle, mpsc::Receiver<Arc<MsgBuf>>), ApplicationError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        self.initiate_with_runtime(runtime)
    }
}

/// Listens for peers and spins up an engine per accepted connection.
pub struct FixAcceptor {
    settings: SessionSettings,
    stream_factory: StreamFactory,
}

impl FixAcceptor {
    pub fn build(mut settings: SessionSettings) -> Result<FixAcceptor, ApplicationError> {
        settings.engine_type = EngineType::Acceptor;
        let stream_factory = StreamFactory::build(&settings)?;
        Ok(FixAcceptor {
            settings,
            stream_factory,
        })
    }

    /// The bound listen address; useful when configured with port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ApplicationError> {
        match &self.stream_factory {
            StreamFactory::Acceptor(listener) => Ok(listener.local_addr()?),
            StreamFactory::Initiator(addr, _) => Ok(*addr),
        }
    }

    /// Accepts one TCP connection and starts an engine for it.
    pub async fn accept(
        &mut self,
    ) -> Result<(SessionHandle, mpsc::Receiver<Arc<MsgBuf>>), ApplicationError> {
        let stream = self.stream_factory.stream().await?;
        Ok(spawn_engine(stream, self.settings.clone()))
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum EngineType {
    Initiator,
    Acceptor,
}

enum StreamFactory {
    Acceptor(TcpListener),
    Initiator(SocketAddr, ReconnectPolicy),
}

impl StreamFactory {
    fn build(settings: &SessionSettings) -> Result<Self, std::io::Error> {
        match settings.engine_type {
            EngineType::Initiator => Ok(StreamFactory::Initiator(settings.addr, settings.reconnect)),
            EngineType::Acceptor => {
                let socket = TcpSocket::new_v4()?;
                socket.bind(settings.addr)?;
                let listener = socket.listen(1024)?;
                Ok(StreamFactory::Acceptor(listener))
            }
        }
    }

    async fn stream(&self) -> Result<TcpStream, std::io::Error> {
        match self {
            StreamFactory::Acceptor(listener) => {
                let (stream, _from_addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(stream)
            }
            StreamFactory::Initiator(addr, policy) => {
                let mut attempt = 0;
                loop {
                    attempt += 1;
                    let socket = TcpSocket::new_v4()?;
                    match socket.connect(*addr).await {
                        Ok(stream) => {
                            stream.set_nodelay(true)?;
                            return Ok(stream);
                        }
                        Err(e) if attempt < policy.max_attempts => {
                            eprintln!("connect attempt {} failed: {e}", attempt);
                            tokio::time::sleep(policy.retry_delay).await;
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::generated::{MsgType, Tags};
    use crate::fix::message::Item;
    use crate::fix::store::MemoryStorage;
    use crate::fix::value::Value;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("flintfix-tests").join(name);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn base_settings(name: &str, addr: SocketAddr) -> SessionSettingsBuilder {
        let dir = temp_dir(name);
        SessionSettings::builder()
            .with_socket_addr(addr)
            .with_store_path(dir.join("store.db"))
            .with_log_dir(dir)
            .with_storage(Arc::new(MemoryStorage::new()))
            .with_heartbeat_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_builder_requires_core_settings() {
        let err = SessionSettings::builder()
            .with_sender_comp_id("A")
            .build()
            .unwrap_err();
        assert!(matches!(err, ApplicationError::SettingRequired(ref s) if s == "target_comp_id"));
    }

    #[test]
    fn test_builder_defaults() {
        let settings = SessionSettings::builder()
            .with_sender_comp_id("A")
            .with_target_comp_id("B")
            .with_socket_addr("127.0.0.1:0".parse().unwrap())
            .with_store_path("./s".into())
            .with_log_dir("./l".into())
            .build()
            .unwrap();
        assert_eq!(&*settings.begin_string, "FIX.4.4");
        assert_eq!(settings.session_id, "A_B");
        assert_eq!(settings.queue_capacity, 10);
        assert_eq!(settings.heartbeat_timeout, Duration::from_secs(30));
    }

    fn order_single(cl_ord_id: &str) -> crate::fix::message::Message {
        let mut msg =
            crate::fix::message::Message::standard(BEGIN_STRING, MsgType::ORDER_SINGLE.into());
        msg.set_body(vec![
            Item::field(Tags::ClOrdID, Value::str(cl_ord_id)),
            Item::field(Tags::Symbol, Value::str("MSFT")),
            Item::field(Tags::Side, Value::str("1")),
            Item::field(Tags::TransactTime, Value::time(chrono::Utc::now())),
            Item::field(Tags::OrdType, Value::str("1")),
            Item::field(Tags::OrderQty, Value::float(100.0)),
        ]);
        msg
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_logon_send_logout_round_trip() {
        let acceptor_settings = base_settings("acceptor", "127.0.0.1:0".parse().unwrap())
            .with_sender_comp_id("SERVER")
            .with_target_comp_id("CLIENT")
            .with_heartbeat_limits(1, 60)
            .build()
            .unwrap();
        let mut acceptor = FixAcceptor::build(acceptor_settings).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (handle, app_messages) = acceptor.accept().await.unwrap();
            handle.start_async().await.unwrap();
            (handle, app_messages)
        });

        let initiator_settings = base_settings("initiator", addr)
            .with_sender_comp_id("CLIENT")
            .with_target_comp_id("SERVER")
            .with_username("trader")
            .with_password("hunter2")
            .build()
            .unwrap();
        let (client, _client_app) = FixInitiator::build(initiator_settings)
            .unwrap()
            .initiate()
            .await
            .unwrap();

        client.start_async().await.unwrap();
        let (server, mut server_app) = accept_task.await.unwrap();

        // an application message flows through and reaches the acceptor's
        // subscribers
        client
            .send_message_async(order_single("ord-1"))
            .await
            .unwrap();
        let received = server_app.recv().await.expect("order should arrive");
        let text = format!("{}", received);
        assert!(text.contains("35=D"));
        assert!(text.contains("11=ord-1"));
        assert!(text.contains("49=CLIENT"));

        // orderly logout handshake
        client.end_async().await.unwrap();
        drop(server);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_acceptor_rejects_bad_credentials() {
        let authenticator: Authenticator = Arc::new(|request: &LogonRequest| {
            if request.password.as_deref() == Some("hunter2") {
                Ok(())
            } else {
                Err(String::from("invalid credentials"))
            }
        });
        let acceptor_settings = base_settings("auth-acceptor", "127.0.0.1:0".parse().unwrap())
            .with_sender_comp_id("SERVER")
            .with_target_comp_id("CLIENT")
            .with_authenticator(authenticator)
            .build()
            .unwrap();
        let mut acceptor = FixAcceptor::build(acceptor_settings).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (handle, _app) = acceptor.accept().await.unwrap();
            handle.start_async().await
        });

        let initiator_settings = base_settings("auth-initiator", addr)
            .with_sender_comp_id("CLIENT")
            .with_target_comp_id("SERVER")
            .with_username("trader")
            .with_password("wrong")
            .build()
            .unwrap();
        let (client, _app) = FixInitiator::build(initiator_settings)
            .unwrap()
            .initiate()
            .await
            .unwrap();

        // the acceptor refuses the logon; both sides report failure
        assert!(client.start_async().await.is_err());
        assert!(accept_task.await.unwrap().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscription_by_msg_type() {
        let acceptor_settings = base_settings("sub-acceptor", "127.0.0.1:0".parse().unwrap())
            .with_sender_comp_id("SERVER")
            .with_target_comp_id("CLIENT")
            .build()
            .unwrap();
        let mut acceptor = FixAcceptor::build(acceptor_settings).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let accept_task = tokio::spawn(async move {
            let (handle, app) = acceptor.accept().await.unwrap();
            let orders = handle.subscribe('D');
            handle.start_async().await.unwrap();
            (handle, app, orders)
        });

        let initiator_settings = base_settings("sub-initiator", addr)
            .with_sender_comp_id("CLIENT")
            .with_target_comp_id("SERVER")
            .build()
            .unwrap();
        let (client, _app) = FixInitiator::build(initiator_settings)
            .unwrap()
            .initiate()
            .await
            .unwrap();

        client.start_async().await.unwrap();
        let (server, _server_app, (order_sub, mut orders)) = accept_task.await.unwrap();

        client
            .send_message_async(order_single("ord-42"))
            .await
            .unwrap();
        let received = orders.recv().await.expect("subscribed type should arrive");
        assert!(format!("{}", received).contains("11=ord-42"));

        server.unsubscribe(order_sub);
        client.end_async().await.unwrap();
    }
}
