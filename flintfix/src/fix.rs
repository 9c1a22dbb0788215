//! The session engine: one task that drives a FIX connection end-to-end.
//!
//! [`run_session`] wires the pieces together. The transport handler pumps
//! frames in and out over its bounded queues; the engine consumes every
//! inbound frame, decodes the session fields with a [`decode::ParserCallback`],
//! validates the envelope, and feeds the resulting event to the state
//! machine. Outbound messages, whether pushed by the machine or submitted
//! by the user, are stamped with the next sequence number, persisted, and
//! only then handed to the writer.

use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Duration;

use anyhow::Result;
use thiserror::Error;

use crate::fix::decode::parse_timestamp;
use crate::fix::generated::{GapFillFlag, MsgType, PossDupFlag, SessionRejectReason, Tags};
use crate::fix::handler::{Incoming, StopReason, TransportHandler};
use crate::fix::log::FileLogger;
use crate::fix::mem::MsgBuf;
use crate::fix::message::Message;
use crate::fix::session::{Event, SessionMachine};
use crate::fix::stopwatch::FixTimeouts;
use crate::fix::store::{Direction, MessageStorage, StorageError};
use crate::fix::validate::Envelope;
use crate::fix::value::Value;
use crate::{EngineType, Request, SessionSettings};

use std::sync::Arc;

pub mod decode;
pub mod generated;
pub mod handler;
pub mod mem;
pub mod message;
pub mod store;
pub mod value;

#[cfg(feature = "sqlite")]
pub mod sqlite_store;

mod checksum;
mod log;
mod resend;
mod session;
mod stopwatch;
mod stream;
mod validate;

const LOGOUT_GRACE: Duration = Duration::from_secs(10);

/// Everything that can go wrong inside a running session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("An I/O error occured: {0}")]
    IoError(#[from] std::io::Error),
    #[error("A garbled message was received")]
    GarbledMessage {
        text: String,
        garbled_msg_type: GarbledMessageType,
    },
    #[error("A message was received without a sequence number")]
    MissingMsgSeqNum { text: String },
    #[error("A message was rejected because: {text}")]
    MessageRejected {
        text: String,
        reject_reason: Option<SessionRejectReason>,
        msg_seq_num: u32,
        ref_tag_id: Option<u32>,
        ref_msg_type: Option<char>,
    },
    #[error("Tried to resend a malformed message")]
    ResendError,
    #[error("Message storage failed: {0}")]
    StorageError(#[from] StorageError),
    #[error("TCP peer closed their half of the connection")]
    TcpDisconnection,
}

#[derive(Debug)]
pub enum GarbledMessageType {
    BeginStringIssue,
    BodyLengthIssue,
    MsgTypeIssue,
    ChecksumIssue,
    Other,
}

impl SessionError {
    fn new_message_rejected(
        reason: Option<SessionRejectReason>,
        seq_num: u32,
        tag_id: Option<u32>,
        msg_type: Option<char>,
    ) -> SessionError {
        SessionError::MessageRejected {
            text: reason.as_ref().map_or(String::from(""), |r| r.into()),
            reject_reason: reason,
            msg_seq_num: seq_num,
            ref_tag_id: tag_id,
            ref_msg_type: msg_type,
        }
    }

    fn new_garbled_message(text: String, t: GarbledMessageType) -> SessionError {
        SessionError::GarbledMessage {
            text,
            garbled_msg_type: t,
        }
    }
}

#[derive(Default)]
struct SessionParserCallback<'a> {
    msg_type: char,
    msg_seq_num: u32,
    sender_comp_id: Option<&'a [u8]>,
    target_comp_id: Option<&'a [u8]>,
    poss_dup_flag: Option<char>,
    gap_fill: Option<char>,
    new_seq_no: Option<u32>,
    test_req_id: Option<&'a [u8]>,
    begin_seq_no: Option<u32>,
    end_seq_no: Option<u32>,
    heart_bt_int: Option<u32>,
    sending_time: Option<DateTime<Utc>>,
    orig_sending_time: Option<DateTime<Utc>>,
    encrypt_method: Option<u32>,
    reset_seq_num_flag: Option<char>,
    username: Option<&'a [u8]>,
    password: Option<&'a [u8]>,
}

impl<'a> crate::fix::decode::ParserCallback<'a> for SessionParserCallback<'a> {
    type Err = SessionError;
    fn header(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err> {
        match key.try_into() {
            Ok(Tags::MsgType) => {
                if value.len() == 1 {
                    self.msg_type = value[0] as char;
                } else {
                    return Err(self.create_message_reject(
                        SessionRejectReason::INVALID_MSGTYPE,
                        Tags::MsgType,
                    ));
                }
            }
            Ok(Tags::MsgSeqNum) => {
                self.msg_seq_num = decode::parse_field::<u32>(value).map_err(|_| {
                    SessionError::MissingMsgSeqNum {
                        text: String::from("Missing MsgSeqNum"),
                    }
                })?;
            }
            Ok(Tags::TargetCompID) => {
                self.target_comp_id = Some(value);
            }
            Ok(Tags::SenderCompID) => {
                self.sender_comp_id = Some(value);
            }
            Ok(Tags::PossDupFlag) => {
                if value.len() == 1 {
                    self.poss_dup_flag = Some(value[0] as char);
                } else {
                    return Err(self.create_message_reject(
                        SessionRejectReason::VALUE_IS_INCORRECT,
                        Tags::PossDupFlag,
                    ));
                }
            }
            Ok(Tags::SendingTime) => match parse_timestamp(value) {
                Ok(sending_time) => {
                    self.sending_time = Some(sending_time);
                }
                Err(_) => {
                    return Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::SendingTime,
                    ));
                }
            },
            Ok(Tags::OrigSendingTime) => match parse_timestamp(value) {
                Ok(orig_sending_time) => {
                    self.orig_sending_time = Some(orig_sending_time);
                }
                Err(_) => {
                    return Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::OrigSendingTime,
                    ));
                }
            },
            _ => (),
        }
        Ok(true)
    }

    fn body(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err> {
        if !generated::is_session_message(self.msg_type) {
            return Ok(false);
        }
        match key.try_into() {
            Ok(Tags::GapFillFlag) => {
                if value.len() == 1 {
                    self.gap_fill = Some(value[0] as char);
                } else {
                    return Err(self.create_message_reject(
                        SessionRejectReason::VALUE_IS_INCORRECT,
                        Tags::GapFillFlag,
                    ));
                }
            }
            Ok(Tags::NewSeqNo) => {
                self.new_seq_no =
                    Some(decode::parse_field::<u32>(value).or(Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::NewSeqNo,
                    )))?);
            }
            Ok(Tags::TestReqID) => {
                self.test_req_id = Some(value);
            }
            Ok(Tags::BeginSeqNo) => {
                self.begin_seq_no =
                    Some(decode::parse_field::<u32>(value).or(Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::BeginSeqNo,
                    )))?);
            }
            Ok(Tags::EndSeqNo) => {
                self.end_seq_no =
                    Some(decode::parse_field::<u32>(value).or(Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::EndSeqNo,
                    )))?);
            }
            Ok(Tags::HeartBtInt) => {
                self.heart_bt_int =
                    Some(decode::parse_field::<u32>(value).or(Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::HeartBtInt,
                    )))?)
            }
            Ok(Tags::EncryptMethod) => {
                self.encrypt_method =
                    Some(decode::parse_field::<u32>(value).or(Err(self.create_message_reject(
                        SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE,
                        Tags::EncryptMethod,
                    )))?);
            }
            Ok(Tags::ResetSeqNumFlag) => {
                if value.len() == 1 {
                    self.reset_seq_num_flag = Some(value[0] as char);
                } else {
                    return Err(self.create_message_reject(
                        SessionRejectReason::VALUE_IS_INCORRECT,
                        Tags::ResetSeqNumFlag,
                    ));
                }
            }
            Ok(Tags::Username) => {
                self.username = Some(value);
            }
            Ok(Tags::Password) => {
                self.password = Some(value);
            }
            _ => (),
        }
        Ok(true)
    }

    fn trailer(&mut self, _key: u32, _value: &'a [u8]) -> Result<bool, Self::Err> {
        Ok(true)
    }

    fn sequence_num(&self) -> u32 {
        self.msg_seq_num
    }
}

impl<'a> SessionParserCallback<'a> {
    fn create_message_reject(&self, reason: SessionRejectReason, ref_tag: Tags) -> SessionError {
        SessionError::new_message_rejected(
            Some(reason),
            self.msg_seq_num,
            Some(ref_tag.into()),
            Some(self.msg_type),
        )
    }

    fn envelope(&self) -> Envelope<'a> {
        Envelope {
            msg_type: self.msg_type,
            msg_seq_num: self.msg_seq_num,
            sender_comp_id: self.sender_comp_id,
            target_comp_id: self.target_comp_id,
            sending_time: self.sending_time,
            poss_dup_flag: self.poss_dup_flag,
            orig_sending_time: self.orig_sending_time,
            begin_seq_no: self.begin_seq_no,
            end_seq_no: self.end_seq_no,
        }
    }
}

pub(crate) async fn run_session(
    stream: TcpStream,
    mut request_receiver: mpsc::UnboundedReceiver<Request>,
    registry: handler::SharedRegistry,
    settings: SessionSettings,
) -> Result<()> {
    // SETUP

    let storage = build_storage(&settings).await?;
    let session_id = settings.session_id.clone();
    let logger = FileLogger::build(&settings.log_dir, &session_id).await?;
    let sequences = storage.sequences(&session_id).await?;
    let mut machine = SessionMachine::new(&settings, sequences);

    let logon_resp_sender = await_start_request(&mut request_receiver).await;
    machine.set_logon_resp_sender(logon_resp_sender);

    match settings.engine_type {
        EngineType::Acceptor => {
            machine.handle(&Event::Accept);
        }
        EngineType::Initiator => {
            if settings.reset_seq_num_on_logon {
                storage.reset(&session_id).await?;
            }
            machine.handle(&Event::Connect(settings.reset_seq_num_on_logon));
            machine.outbox_push(initiator_logon(&settings));
        }
    }

    let mut fix_timeouts = FixTimeouts::new(
        settings.heartbeat_timeout,
        settings.logon_timeout,
        LOGOUT_GRACE,
        matches!(settings.engine_type, EngineType::Acceptor),
    );

    let mut handler = TransportHandler::start(
        stream,
        registry,
        settings.queue_capacity,
        logger.clone(),
        logger.clone(),
    );

    // LOOP

    loop {
        flush_outbox(
            &mut machine,
            &handler,
            storage.as_ref(),
            &session_id,
            &settings,
            &mut fix_timeouts,
        )
        .await;

        if session::should_disconnect(&machine) {
            let reason = if session::in_error_state(&machine) {
                StopReason::ProtocolError
            } else {
                StopReason::LogoutComplete
            };
            let resp = teardown(
                request_receiver,
                storage.as_ref(),
                &session_id,
                &machine,
                &mut handler,
                logger,
                reason,
            )
            .await;
            let logout_success = !session::in_error_state(&machine);
            machine.send_logout_response(logout_success && resp.is_ok());
            resp?;
            break;
        }

        let next_timeout = fix_timeouts.next_expiring_timeout();
        let (timeout_fut, timeout_event) = next_timeout.timeout();

        tokio::select! {
            biased;

            Some(req) = request_receiver.recv() => {
                handle_request(req, &mut machine);
            }
            maybe_incoming = handler.recv() => {
                let incoming = maybe_incoming.unwrap_or(Incoming::Error(SessionError::TcpDisconnection));
                handle_incoming(
                    incoming,
                    &mut machine,
                    &mut fix_timeouts,
                    storage.as_ref(),
                    &session_id,
                    &settings,
                    &handler,
                ).await?;
            }
            _ = timeout_fut => {
                let sent_test_request = matches!(timeout_event, Event::SendTestRequest);
                machine.handle(timeout_event);
                next_timeout.reset_timeout();
                if sent_test_request {
                    fix_timeouts.start_test_response_timeout();
                }
            }
        };
    }

    Ok(())
}

async fn build_storage(settings: &SessionSettings) -> Result<Arc<dyn MessageStorage>> {
    if let Some(storage) = &settings.storage {
        return Ok(Arc::clone(storage));
    }
    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(
            sqlite_store::SqliteStorage::build(&settings.store_path).await?,
        ))
    }
    #[cfg(not(feature = "sqlite"))]
    {
        Ok(Arc::new(store::MemoryStorage::new()))
    }
}

fn initiator_logon(settings: &SessionSettings) -> Message {
    let mut logon = session::build_logon(
        &settings.begin_string,
        settings.heartbeat_timeout.as_secs() as u32,
        settings.reset_seq_num_on_logon,
    );
    if let Some(username) = &settings.username {
        if let Some(v) = logon.body_field_mut(Tags::Username) {
            let _ = v.set(Value::str(username.clone()));
        }
    }
    if let Some(password) = &settings.password {
        if let Some(v) = logon.body_field_mut(Tags::Password) {
            let _ = v.set(Value::str(password.clone()));
        }
    }
    logon
}

// The engine sits idle until the user asks it to start. Messages queued
// too early are refused; a logout before any logon succeeds vacuously.
async fn await_start_request(
    requests: &mut mpsc::UnboundedReceiver<Request>,
) -> Option<oneshot::Sender<bool>> {
    while let Some(request) = requests.recv().await {
        match request {
            Request::Logon { resp_sender } => return Some(resp_sender),
            Request::SendMessage { resp_sender, .. } => acknowledge(Some(resp_sender), false),
            Request::Logout { resp_sender } => acknowledge(Some(resp_sender), true),
        }
    }
    None
}

fn handle_request(req: Request, machine: &mut SessionMachine) {
    match req {
        Request::SendMessage {
            resp_sender,
            message,
        } => {
            machine.outbox_push_with_sender(message, resp_sender);
        }
        Request::Logout { resp_sender } => {
            let begin_string = Arc::clone(&machine.begin_string);
            machine.outbox_push_with_sender(session::build_logout(&begin_string), resp_sender);
        }
        Request::Logon { resp_sender } => {
            let _ = resp_sender.send(true);
        }
    }
}

// Stamps the session header fields the engine owns. The message keeps
// whatever else its builder put in the header.
fn prepare_outbound(
    msg: &mut Message,
    msg_seq_num: u32,
    settings: &SessionSettings,
    now: DateTime<Utc>,
) -> Result<Vec<u8>, SessionError> {
    let stamp = |r: Result<(), crate::fix::message::ModelError>| {
        r.map_err(|e| SessionError::new_garbled_message(e.to_string(), GarbledMessageType::Other))
    };
    stamp(msg.set_header_field(Tags::MsgSeqNum, Value::uint(msg_seq_num as u64)))?;
    stamp(msg.set_header_field(Tags::SenderCompID, Value::str(settings.sender_comp_id.clone())))?;
    stamp(msg.set_header_field(Tags::TargetCompID, Value::str(settings.target_comp_id.clone())))?;
    stamp(msg.set_header_field(Tags::SendingTime, Value::time(now)))?;
    msg.encode()
        .map_err(|e| SessionError::new_garbled_message(e.to_string(), GarbledMessageType::Other))
}

// What became of one outbox entry.
enum SendOutcome {
    Delivered,
    // the message itself was bad, or storage refused it; the session
    // continues and NextOut stays where it was
    Discarded,
    LinkDown,
}

async fn dispatch_message(
    msg: &mut Message,
    machine: &mut SessionMachine,
    handler: &TransportHandler,
    storage: &dyn MessageStorage,
    session_id: &str,
    settings: &SessionSettings,
) -> SendOutcome {
    let msg_seq_num = machine.sequences.peek_outgoing();
    let bytes = match prepare_outbound(msg, msg_seq_num, settings, Utc::now()) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("dropping malformed outbound message: {e}");
            return SendOutcome::Discarded;
        }
    };

    // a message that cannot be replayed later must never reach the wire
    if let Err(e) = storage
        .save(session_id, Direction::Outbound, msg_seq_num, &bytes)
        .await
    {
        eprintln!("error storing outgoing message: {e}");
        return SendOutcome::Discarded;
    }

    if handler.send(bytes.into()).await.is_err() {
        return SendOutcome::LinkDown;
    }
    machine.sequences.next_outgoing();
    SendOutcome::Delivered
}

fn acknowledge(ack: Option<oneshot::Sender<bool>>, delivered: bool) {
    if let Some(ack) = ack {
        let _ = ack.send(delivered);
    }
}

// Drains the state machine's outbox onto the wire. A delivered logout ends
// the drain: the rest of the queue is abandoned and the grace timer for
// the peer's answering Logout starts.
async fn flush_outbox(
    machine: &mut SessionMachine,
    handler: &TransportHandler,
    storage: &dyn MessageStorage,
    session_id: &str,
    settings: &SessionSettings,
    fix_timeouts: &mut FixTimeouts,
) {
    if !machine.outbox.is_empty() {
        fix_timeouts.reset_heartbeat();
    }
    while let Some((mut msg, ack)) = machine.outbox_pop() {
        let ends_session = msg.msg_type() == Some(MsgType::LOGOUT.into());
        match dispatch_message(&mut msg, machine, handler, storage, session_id, settings).await {
            SendOutcome::Delivered if ends_session => {
                machine.outbox_clear();
                machine.set_logout_resp_sender(ack);
                machine.handle(&Event::LogoutSent);
                fix_timeouts.start_logout_timeout();
                return;
            }
            SendOutcome::Delivered => acknowledge(ack, true),
            SendOutcome::Discarded => acknowledge(ack, false),
            SendOutcome::LinkDown => {
                acknowledge(ack, false);
                machine.handle(&Event::SessionErrorReceived {
                    error: SessionError::TcpDisconnection,
                });
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_incoming(
    incoming: Incoming,
    machine: &mut SessionMachine,
    fix_timeouts: &mut FixTimeouts,
    storage: &dyn MessageStorage,
    session_id: &str,
    settings: &SessionSettings,
    handler: &TransportHandler,
) -> Result<()> {
    let msg = match incoming {
        Incoming::Message(b) => {
            fix_timeouts.observe_inbound();
            Arc::new(b)
        }
        Incoming::Error(SessionError::IoError(_)) | Incoming::Error(SessionError::TcpDisconnection) => {
            machine.handle(&Event::SessionErrorReceived {
                error: SessionError::TcpDisconnection,
            });
            return Ok(());
        }
        Incoming::Error(error) => {
            machine.handle(&Event::SessionErrorReceived { error });
            return Ok(());
        }
    };

    // PARSE

    let mut cb: SessionParserCallback = Default::default();

    if let Err(error) = crate::fix::decode::parse(&msg.as_ref()[..], &mut cb) {
        machine.handle(&Event::SessionErrorReceived { error });
        return Ok(());
    };

    // VALIDATE

    if let Err(error) = validate::validate_checksum(&msg) {
        machine.handle(&Event::SessionErrorReceived { error });
        return Ok(());
    }

    let my_comp_ids = (
        settings.sender_comp_id.as_str(),
        settings.target_comp_id.as_str(),
    );
    if let Err(error) = cb.envelope().check(my_comp_ids, Utc::now()) {
        machine.handle(&Event::SessionErrorReceived { error });
        return Ok(());
    }

    if let Err(e) = storage
        .save(session_id, Direction::Inbound, cb.msg_seq_num, msg.as_slice())
        .await
    {
        eprintln!("error storing incoming message: {e}");
    }

    // HANDLE

    let msg_seq_num = cb.msg_seq_num;
    // only 'Y'/'N' survive envelope validation
    let poss_dup = cb
        .poss_dup_flag
        .and_then(|flag| PossDupFlag::try_from(flag).ok());

    match cb.msg_type.try_into() {
        Ok(MsgType::LOGON) => {
            fix_timeouts.logon_received();
            if let Some(interval) = cb.heart_bt_int {
                fix_timeouts.set_heartbeat_duration(Duration::from_secs(interval as u64));
            }
            let reset_seq_num = cb.reset_seq_num_flag == Some('Y');
            if reset_seq_num {
                if let Err(e) = storage.reset(session_id).await {
                    eprintln!("error resetting session storage: {e}");
                }
            }
            machine.handle(&Event::LogonReceived {
                msg_seq_num,
                heart_bt_int: cb.heart_bt_int,
                encrypt_method: cb.encrypt_method,
                reset_seq_num,
                username: cb.username.map(|u| u.to_vec()),
                password: cb.password.map(|p| p.to_vec()),
                poss_dup,
            });
        }
        Ok(MsgType::LOGOUT) => {
            machine.handle(&Event::LogoutReceived(msg_seq_num, poss_dup));
        }
        Ok(MsgType::HEARTBEAT) => {
            machine.handle(&Event::HeartbeatReceived {
                msg_seq_num,
                test_req_id: cb.test_req_id.map(|id| id.to_vec()),
                poss_dup,
            });
        }
        Ok(MsgType::SEQUENCE_RESET) => {
            if let Some(new_seq_no) = cb.new_seq_no {
                let gap_fill = cb
                    .gap_fill
                    .map(GapFillFlag::try_from)
                    .transpose()
                    .map_err(anyhow::Error::msg)?;
                machine.handle(&Event::SequenceResetReceived {
                    msg_seq_num,
                    gap_fill,
                    new_seq_no,
                    poss_dup,
                })
            }
        }
        Ok(MsgType::REJECT) | Ok(MsgType::BUSINESS_MESSAGE_REJECT) => {
            machine.handle(&Event::RejectReceived(msg_seq_num, poss_dup))
        }
        Ok(MsgType::TEST_REQUEST) => {
            if let Some(test_req_id) = cb.test_req_id {
                machine.handle(&Event::TestRequestReceived {
                    msg_seq_num,
                    test_req_id: test_req_id.to_owned(),
                    poss_dup,
                })
            }
        }
        Ok(MsgType::RESEND_REQUEST) => {
            let e = match cb.end_seq_no {
                Some(n) if n > 0 => n,
                _ => machine.sequences.peek_outgoing().saturating_sub(1),
            };
            let b = cb.begin_seq_no.unwrap_or(e);

            if session::should_resend(machine) {
                let stored = storage.messages(session_id, b, e).await?;
                replay_stored_messages(stored, handler, settings).await?;
            }
            machine.handle(&Event::ResendRequestReceived(msg_seq_num, b, e, poss_dup));
        }
        Ok(ref msg_type) if msg_type.is_application() => {
            if session::should_pass_app_message(machine, msg_seq_num) {
                handler.publish(cb.msg_type, Arc::clone(&msg)).await;
            }
            machine.handle(&Event::ApplicationMessageReceived(msg_seq_num, poss_dup));
        }
        _ => {
            let error = SessionError::new_message_rejected(
                Some(SessionRejectReason::INVALID_MSGTYPE),
                cb.msg_seq_num,
                None,
                None,
            );
            machine.handle(&Event::SessionErrorReceived { error });
        }
    }
    Ok(())
}

// Answers a ResendRequest from storage. Application messages are replayed
// as possible duplicates under their original seqnum; each unbroken run of
// administrative messages collapses into one SequenceReset-GapFill that
// jumps the peer's expectation past it. The whole replay is planned before
// anything touches the wire, so a bad stored frame aborts cleanly.
async fn replay_stored_messages(
    stored: Vec<(u32, Vec<u8>)>,
    handler: &TransportHandler,
    settings: &SessionSettings,
) -> Result<(), SessionError> {
    let now = Utc::now();
    let mut plan: Vec<MsgBuf> = Vec::with_capacity(stored.len());
    // an open run of admin messages: (first seqnum, seqnum after the last)
    let mut admin_run: Option<(u32, u32)> = None;

    for (seq, frame) in &stored {
        let msg_type =
            MsgType::try_from(resend::stored_msg_type(frame)?).or(Err(SessionError::ResendError))?;
        if msg_type.is_session() {
            let first = admin_run.map_or(*seq, |(first, _)| first);
            admin_run = Some((first, seq + 1));
            continue;
        }
        if let Some((first, _)) = admin_run.take() {
            // the gap-fill lands the peer on this application message
            plan.push(gap_fill_frame(first, *seq, settings)?);
        }
        plan.push(resend::mark_possible_duplicate(frame, now)?);
    }
    if let Some((first, after_last)) = admin_run {
        plan.push(gap_fill_frame(first, after_last, settings)?);
    }

    for frame in plan {
        handler
            .send(frame)
            .await
            .or(Err(SessionError::TcpDisconnection))?;
    }
    Ok(())
}

fn gap_fill_frame(
    msg_seq_num: u32,
    new_seq_num: u32,
    settings: &SessionSettings,
) -> Result<MsgBuf, SessionError> {
    let mut msg = session::build_sequence_reset_gap_fill(&settings.begin_string, new_seq_num);
    let now = Utc::now();
    let stamp =
        |r: Result<(), crate::fix::message::ModelError>| r.or(Err(SessionError::ResendError));
    stamp(msg.set_header_field(Tags::PossDupFlag, Value::bool(true)))?;
    stamp(msg.set_header_field(Tags::OrigSendingTime, Value::time(now)))?;
    let bytes = prepare_outbound(&mut msg, msg_seq_num, settings, now)?;
    Ok(bytes.into())
}

// Orderly teardown, in dependency order: no more user requests, counters
// made durable, backends flushed, then the transport drained and closed.
async fn teardown(
    mut requests: mpsc::UnboundedReceiver<Request>,
    storage: &dyn MessageStorage,
    session_id: &str,
    machine: &SessionMachine,
    handler: &mut TransportHandler,
    mut logger: FileLogger,
    reason: StopReason,
) -> Result<()> {
    requests.close();
    let next_in = machine.sequences.peek_incoming();
    let next_out = machine.sequences.peek_outgoing();
    storage.store_sequences(session_id, next_in, next_out).await?;
    storage.close().await?;
    logger.disconnect().await?;
    handler.stop(reason).await;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::decode::ParserCallback;

    #[test]
    fn test_session_parser_callback_logon() {
        let raw = b"8=FIX.4.4\x019=92\x0135=A\x0134=1\x0149=CLIENT\x0152=20240101-00:00:00.000\x0156=SERVER\x0198=0\x01108=30\x01141=Y\x01553=user\x01554=hunter2\x0110=021\x01";
        let mut cb: SessionParserCallback = Default::default();
        crate::fix::decode::parse(&raw[..], &mut cb).unwrap();

        assert_eq!(cb.msg_type, 'A');
        assert_eq!(cb.msg_seq_num, 1);
        assert_eq!(cb.sender_comp_id, Some(&b"CLIENT"[..]));
        assert_eq!(cb.target_comp_id, Some(&b"SERVER"[..]));
        assert_eq!(cb.heart_bt_int, Some(30));
        assert_eq!(cb.encrypt_method, Some(0));
        assert_eq!(cb.reset_seq_num_flag, Some('Y'));
        assert_eq!(cb.username, Some(&b"user"[..]));
        assert_eq!(cb.password, Some(&b"hunter2"[..]));
        assert_eq!(cb.sequence_num(), 1);
    }

    #[test]
    fn test_session_parser_callback_resend_request() {
        let raw = b"8=FIX.4.4\x019=47\x0135=2\x0134=9\x0149=A\x0152=20240101-00:00:00.000\x0156=B\x017=3\x0116=0\x0110=021\x01";
        let mut cb: SessionParserCallback = Default::default();
        crate::fix::decode::parse(&raw[..], &mut cb).unwrap();

        assert_eq!(cb.msg_type, '2');
        assert_eq!(cb.begin_seq_no, Some(3));
        assert_eq!(cb.end_seq_no, Some(0));
    }

    #[test]
    fn test_session_parser_callback_ignores_app_bodies() {
        let raw = b"8=FIX.4.4\x019=47\x0135=D\x0134=9\x0149=A\x0152=20240101-00:00:00.000\x0156=B\x0111=x\x0138=5\x0110=021\x01";
        let mut cb: SessionParserCallback = Default::default();
        crate::fix::decode::parse(&raw[..], &mut cb).unwrap();
        assert_eq!(cb.msg_type, 'D');
        assert_eq!(cb.msg_seq_num, 9);
    }

    #[test]
    fn test_missing_seq_num_is_its_own_error() {
        let raw = b"8=FIX.4.4\x019=20\x0135=0\x0134=x\x0110=021\x01";
        let mut cb: SessionParserCallback = Default::default();
        assert!(matches!(
            crate::fix::decode::parse(&raw[..], &mut cb),
            Err(SessionError::MissingMsgSeqNum { .. })
        ));
    }
}
