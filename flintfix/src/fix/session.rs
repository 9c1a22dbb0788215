//! The session state machine.
//!
//! Every state transition is a pure function of (state, event): events come
//! from decoded inbound messages, user requests, and timers, and the only
//! outputs are a new state plus messages pushed onto the outbox. Nothing in
//! here touches a socket, a clock, or storage, which is what makes the
//! whole protocol testable from a unit test.

use crate::fix::generated::{GapFillFlag, MsgType, PossDupFlag, SessionRejectReason, Tags};
use crate::fix::message::{Item, Message};
use crate::fix::value::Value;
use crate::fix::{GarbledMessageType, SessionError};
use crate::{LogonRequest, SessionSettings};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

enum Response {
    Handled,
    Transition(State),
}

#[derive(Debug, Clone)]
pub(super) enum State {
    Start,
    Connected,
    LogonSent,
    LoggedIn,
    ExpectingResends { return_state: Arc<State> },
    ExpectingTestResponse,
    LogoutSent,
    End,
    Error,
}

#[derive(Debug)]
pub(super) enum Event {
    Connect(bool),
    Accept,
    LogonReceived {
        msg_seq_num: u32,
        heart_bt_int: Option<u32>,
        encrypt_method: Option<u32>,
        reset_seq_num: bool,
        username: Option<Vec<u8>>,
        password: Option<Vec<u8>>,
        poss_dup: Option<PossDupFlag>,
    },
    LogoutSent,
    LogoutReceived(u32, Option<PossDupFlag>),
    HeartbeatReceived {
        msg_seq_num: u32,
        test_req_id: Option<Vec<u8>>,
        poss_dup: Option<PossDupFlag>,
    },
    SequenceResetReceived {
        msg_seq_num: u32,
        gap_fill: Option<GapFillFlag>,
        new_seq_no: u32,
        poss_dup: Option<PossDupFlag>,
    },
    TestRequestReceived {
        msg_seq_num: u32,
        test_req_id: Vec<u8>,
        poss_dup: Option<PossDupFlag>,
    },
    SessionErrorReceived {
        error: SessionError,
    },
    ApplicationMessageReceived(u32, Option<PossDupFlag>),
    SendHeartbeat,
    SendTestRequest,
    TestRequestExpired,
    ResendRequestReceived(u32, u32, u32, Option<PossDupFlag>),
    RejectReceived(u32, Option<PossDupFlag>),
    LogonExpired,
    LogoutExpired,
}

impl Event {
    fn get_msg_seq_num(&self) -> Option<u32> {
        match self {
            Event::LogonReceived { msg_seq_num, .. } => Some(*msg_seq_num),
            Event::LogoutReceived(n, ..) => Some(*n),
            Event::HeartbeatReceived { msg_seq_num, .. } => Some(*msg_seq_num),
            Event::SequenceResetReceived {
                msg_seq_num,
                gap_fill: Some(GapFillFlag::YES),
                ..
            } => Some(*msg_seq_num),
            Event::TestRequestReceived { msg_seq_num, .. } => Some(*msg_seq_num),
            Event::ApplicationMessageReceived(n, ..) => Some(*n),
            Event::ResendRequestReceived(n, ..) => Some(*n),
            Event::RejectReceived(n, ..) => Some(*n),
            _ => None,
        }
    }

    fn is_poss_dup(&self) -> bool {
        let poss_dup_flag = match self {
            Event::LogonReceived { poss_dup, .. } => poss_dup,
            Event::LogoutReceived(.., p) => p,
            Event::HeartbeatReceived { poss_dup, .. } => poss_dup,
            Event::SequenceResetReceived { poss_dup, .. } => poss_dup,
            Event::TestRequestReceived { poss_dup, .. } => poss_dup,
            Event::ApplicationMessageReceived(.., p) => p,
            Event::ResendRequestReceived(.., p) => p,
            Event::RejectReceived(.., p) => p,
            _ => &None,
        };
        poss_dup_flag == &Some(PossDupFlag::YES)
    }

    fn is_logout(&self) -> bool {
        matches!(self, Event::LogoutReceived(..))
    }
}

// Where an in-flight gap recovery stands: the replay the peer owes us runs
// from `expecting` through `through` inclusive.
#[derive(Debug, Clone, Copy)]
struct ReplayWindow {
    expecting: u32,
    through: u32,
}

impl ReplayWindow {
    // Records a replayed message (or a gap-fill jump) landing us at `next`.
    // True once the window is exhausted.
    fn advance_to(&mut self, next: u32) -> bool {
        self.expecting = next;
        self.expecting > self.through
    }
}

// How an inbound MsgSeqNum relates to the one we expect.
enum SeqCheck {
    // no sequence number on this event; nothing to judge
    Unnumbered,
    // exactly the expected number; the counter has been advanced
    InOrder,
    // below expectation and marked PossDup: already processed, drop it
    Duplicate,
    // below expectation with no duplicate marker: the streams disagree
    TooLow { expected: u32, received: u32 },
    // above expectation: messages went missing
    Gap { expected: u32, received: u32 },
}

pub(super) struct SessionMachine {
    pub(super) outbox: VecDeque<(Message, Option<oneshot::Sender<bool>>)>,
    pub(super) sequences: Sequences,
    pub(super) begin_string: Arc<String>,
    sender_comp_id: String,
    target_comp_id: String,
    heartbeat_limits: Option<(u32, u32)>,
    authenticator: Option<crate::Authenticator>,
    replay_window: Option<ReplayWindow>,
    logout_resp_sender: Option<oneshot::Sender<bool>>,
    logon_resp_sender: Option<oneshot::Sender<bool>>,
    pending_test_req_id: Option<Vec<u8>>,
    test_req_counter: u32,
    state: State,
}

impl SessionMachine {
    pub(super) fn new(settings: &SessionSettings, seqs: (u32, u32)) -> Self {
        SessionMachine {
            outbox: VecDeque::new(),
            sequences: seqs.into(),
            begin_string: Arc::clone(&settings.begin_string),
            sender_comp_id: settings.sender_comp_id.clone(),
            target_comp_id: settings.target_comp_id.clone(),
            heartbeat_limits: settings.heartbeat_limits,
            authenticator: settings.authenticator.clone(),
            replay_window: None,
            logon_resp_sender: None,
            logout_resp_sender: None,
            pending_test_req_id: None,
            test_req_counter: 0,
            state: State::Start,
        }
    }

    pub(super) fn state(&self) -> &State {
        &self.state
    }

    pub(super) fn handle(&mut self, event: &Event) {
        if let Response::Transition(new_state) = match &self.state {
            State::Start => self.start(event),
            State::Connected => self.connected(event),
            State::LogonSent => self.logon_sent(event),
            State::LoggedIn => self.logged_in(event),
            State::ExpectingResends { return_state } => {
                self.expecting_resends(event, return_state.clone())
            }
            State::ExpectingTestResponse => self.expecting_test_response(event),
            State::LogoutSent => self.logout_sent(event),
            State::End => self.end(event),
            State::Error => self.error(event),
        } {
            self.state = new_state;
        }
    }

    pub(super) fn outbox_push(&mut self, msg: Message) {
        self.outbox.push_back((msg, None));
    }
    pub(super) fn outbox_push_with_sender(
        &mut self,
        msg: Message,
        resp_sender: oneshot::Sender<bool>,
    ) {
        self.outbox.push_back((msg, Some(resp_sender)));
    }
    pub(super) fn outbox_pop(&mut self) -> Option<(Message, Option<oneshot::Sender<bool>>)> {
        self.outbox.pop_front()
    }
    pub(super) fn outbox_clear(&mut self) {
        self.outbox.clear();
    }
    pub(super) fn set_logon_resp_sender(&mut self, resp_sender: Option<oneshot::Sender<bool>>) {
        self.logon_resp_sender = resp_sender;
    }
    pub(super) fn set_logout_resp_sender(&mut self, resp_sender: Option<oneshot::Sender<bool>>) {
        self.logout_resp_sender = resp_sender;
    }
    fn send_logon_response(&mut self, logon_status: bool) {
        if let Some(resp_sender) = self.logon_resp_sender.take() {
            let _ = resp_sender.send(logon_status);
        }
    }
    pub(super) fn send_logout_response(&mut self, logout_status: bool) {
        if let Some(resp_sender) = self.logout_resp_sender.take() {
            let _ = resp_sender.send(logout_status);
        }
    }

    // Files an inbound sequence number against the expected one. In-order
    // numbers advance the counter as a side effect; everything else is
    // left to sequence policy.
    fn classify_sequence(&mut self, event: &Event) -> SeqCheck {
        let Some(received) = event.get_msg_seq_num() else {
            return SeqCheck::Unnumbered;
        };
        let expected = self.sequences.peek_incoming();
        match received.cmp(&expected) {
            Ordering::Equal => {
                self.sequences.incr_incoming();
                SeqCheck::InOrder
            }
            Ordering::Greater => SeqCheck::Gap { expected, received },
            Ordering::Less if event.is_poss_dup() => SeqCheck::Duplicate,
            Ordering::Less => SeqCheck::TooLow { expected, received },
        }
    }

    // The sequence rules every post-logon state defers to. `resume` is
    // where a successful gap recovery puts the machine back. Returns None
    // when the event may be processed further.
    fn apply_sequence_policy(&mut self, event: &Event, resume: State) -> Option<Response> {
        match self.classify_sequence(event) {
            SeqCheck::Unnumbered | SeqCheck::InOrder => None,
            SeqCheck::Duplicate => Some(Response::Handled),
            SeqCheck::Gap { expected, received } => {
                self.replay_window = Some(ReplayWindow {
                    expecting: expected,
                    through: received,
                });
                // open-ended request: everything from the first missing
                // number onward
                self.outbox_push(build_resend_request(&self.begin_string, expected, 0));
                Some(Response::Transition(State::ExpectingResends {
                    return_state: Arc::new(resume),
                }))
            }
            SeqCheck::TooLow { expected, received } => {
                self.outbox_push(build_logout_with_text(
                    &self.begin_string,
                    &format!(
                        "MsgSeqNum too low, expecting {} but received {}",
                        expected, received
                    ),
                ));
                Some(Response::Transition(State::Error))
            }
        }
    }

    fn reset_sequences(&mut self) {
        self.sequences = (1, 1).into()
    }

    fn apply_sequence_reset(
        &mut self,
        msg_seq_num: u32,
        gap_fill: Option<GapFillFlag>,
        new_seq_no: u32,
    ) {
        match gap_fill {
            Some(GapFillFlag::YES) => {
                if let Err(msg) = self.sequences.advance_incoming(new_seq_no) {
                    let reject = build_message_reject(
                        msg,
                        &Some(SessionRejectReason::VALUE_IS_INCORRECT),
                        &msg_seq_num,
                        &Some(Tags::NewSeqNo.into()),
                        &Some(char::from(MsgType::SEQUENCE_RESET)),
                    );
                    self.outbox_push(reject);
                }
            }
            // reset mode takes effect no matter where the counter sits
            _ => self.sequences.force_incoming(new_seq_no),
        }
    }

    // Superstate for everything that can happen after logon; the named
    // states defer here for the common events.
    fn post_logon(&mut self, event: &Event) -> Response {
        match event {
            Event::SessionErrorReceived {
                error:
                    SessionError::GarbledMessage {
                        text,
                        garbled_msg_type: GarbledMessageType::BeginStringIssue,
                    },
            } => {
                self.outbox_push(build_logout_with_text(&self.begin_string, text));
                Response::Transition(State::Error)
            }
            Event::SessionErrorReceived {
                error: SessionError::TcpDisconnection,
            } => Response::Transition(State::Error),
            Event::LogoutReceived(..) => {
                self.outbox_push(build_logout(&self.begin_string));
                Response::Transition(State::End)
            }
            Event::SendTestRequest => {
                self.test_req_counter += 1;
                let id = format!("TEST-{}", self.test_req_counter).into_bytes();
                self.pending_test_req_id = Some(id.clone());
                self.outbox_push(build_test_request(&self.begin_string, &id));
                Response::Transition(State::ExpectingTestResponse)
            }
            Event::SendHeartbeat => {
                self.outbox_push(build_heartbeat(&self.begin_string, None));
                Response::Handled
            }
            Event::TestRequestExpired => {
                self.outbox_push(build_logout_with_text(
                    &self.begin_string,
                    "TestRequest timed out",
                ));
                Response::Handled
            }
            Event::LogoutSent => Response::Transition(State::LogoutSent),
            Event::LogoutExpired => Response::Transition(State::Error),
            _ => Response::Handled,
        }
    }

    // Waiting out the peer's replay of a gap. Only messages marked PossDup
    // belong to the replay; live traffic keeps its ordinary meaning.
    fn expecting_resends(&mut self, event: &Event, return_state: Arc<State>) -> Response {
        if !event.is_poss_dup() {
            return match event {
                Event::LogoutReceived(..) => {
                    self.outbox_push(build_logout(&self.begin_string));
                    Response::Transition(State::End)
                }
                _ => self.post_logon(event),
            };
        }

        // a reset-mode SequenceReset overrides the whole recovery
        if let Event::SequenceResetReceived {
            gap_fill: Some(GapFillFlag::NO) | None,
            new_seq_no,
            ..
        } = event
        {
            self.sequences.force_incoming(*new_seq_no);
            self.replay_window = None;
            return Response::Transition((*return_state).clone());
        }

        let Some(window) = self.replay_window.as_mut() else {
            return Response::Transition(State::Error);
        };
        if event.get_msg_seq_num() != Some(window.expecting) {
            return Response::Handled;
        }

        let landing = match event {
            Event::SequenceResetReceived { new_seq_no, .. } => *new_seq_no,
            _ => window.expecting + 1,
        };
        if window.advance_to(landing) {
            self.sequences.force_incoming(landing);
            self.replay_window = None;
            if matches!(*return_state, State::End) {
                self.outbox_push(build_logout(&self.begin_string));
            }
            return Response::Transition((*return_state).clone());
        }
        Response::Handled
    }

    fn expecting_test_response(&mut self, event: &Event) -> Response {
        match event {
            Event::HeartbeatReceived { test_req_id, .. } => {
                let matches_pending = match (&self.pending_test_req_id, test_req_id) {
                    (Some(pending), Some(id)) => pending == id,
                    _ => false,
                };
                if matches_pending {
                    self.pending_test_req_id = None;
                }
                if let Some(resp) = self.apply_sequence_policy(event, State::LoggedIn) {
                    return resp;
                }
                Response::Transition(State::LoggedIn)
            }
            _ => self.logged_in(event),
        }
    }

    fn logged_in(&mut self, event: &Event) -> Response {
        let next_state = if event.is_logout() {
            State::End
        } else {
            State::LoggedIn
        };

        if let Some(resp) = self.apply_sequence_policy(event, next_state) {
            return resp;
        }
        match event {
            Event::SessionErrorReceived {
                error: SessionError::MissingMsgSeqNum { text },
            } => {
                self.outbox_push(build_logout_with_text(&self.begin_string, text));
                Response::Transition(State::Error)
            }
            Event::SequenceResetReceived {
                msg_seq_num,
                gap_fill,
                new_seq_no,
                ..
            } => {
                self.apply_sequence_reset(*msg_seq_num, *gap_fill, *new_seq_no);
                Response::Handled
            }
            Event::TestRequestReceived { test_req_id, .. } => {
                self.outbox_push(build_heartbeat(&self.begin_string, Some(test_req_id.as_slice())));
                Response::Handled
            }
            Event::ApplicationMessageReceived(..) => Response::Handled,
            Event::SessionErrorReceived {
                error:
                    SessionError::MessageRejected {
                        text,
                        reject_reason,
                        msg_seq_num,
                        ref_tag_id,
                        ref_msg_type,
                    },
            } => {
                self.sequences.incr_incoming();
                self.outbox_push(build_message_reject(
                    text,
                    reject_reason,
                    msg_seq_num,
                    ref_tag_id,
                    ref_msg_type,
                ));

                if *reject_reason == Some(SessionRejectReason::COMPID_PROBLEM)
                    || *reject_reason == Some(SessionRejectReason::SENDINGTIME_ACCURACY_PROBLEM)
                {
                    self.outbox_push(build_logout_with_text(&self.begin_string, text));
                    return Response::Transition(State::Error);
                }
                Response::Handled
            }
            Event::SessionErrorReceived {
                error: SessionError::TcpDisconnection,
            } => Response::Transition(State::Error),
            _ => self.post_logon(event),
        }
    }

    fn start(&mut self, event: &Event) -> Response {
        match event {
            Event::Connect(reset_seq_num) => {
                if *reset_seq_num {
                    self.reset_sequences();
                }
                // logon body is finished by the engine, which owns the
                // configured interval and credentials
                Response::Transition(State::LogonSent)
            }
            Event::Accept => Response::Transition(State::Connected),
            _ => Response::Handled,
        }
    }

    #[allow(unused_variables)]
    fn error(&mut self, event: &Event) -> Response {
        Response::Handled
    }

    #[allow(unused_variables)]
    fn end(&mut self, event: &Event) -> Response {
        Response::Handled
    }

    fn connected(&mut self, event: &Event) -> Response {
        match event {
            Event::SessionErrorReceived { error } => match error {
                SessionError::GarbledMessage { .. } => {
                    self.send_logon_response(false);
                    Response::Transition(State::Error)
                }
                SessionError::MessageRejected {
                    text,
                    reject_reason,
                    ..
                } => {
                    if *reject_reason != Some(SessionRejectReason::COMPID_PROBLEM) {
                        self.outbox_push(build_logout_with_text(&self.begin_string, text));
                    }
                    self.send_logon_response(false);
                    Response::Transition(State::Error)
                }
                _ => {
                    self.send_logon_response(false);
                    Response::Transition(State::Error)
                }
            },
            Event::LogonReceived {
                heart_bt_int,
                encrypt_method,
                reset_seq_num,
                username,
                password,
                ..
            } => {
                if !matches!(encrypt_method, None | Some(0)) {
                    self.outbox_push(build_logout_with_text(
                        &self.begin_string,
                        "Unsupported EncryptMethod",
                    ));
                    self.send_logon_response(false);
                    return Response::Transition(State::Error);
                }

                let Some(interval) = *heart_bt_int else {
                    self.outbox_push(build_logout_with_text(
                        &self.begin_string,
                        "HeartBtInt(108) is required at logon",
                    ));
                    self.send_logon_response(false);
                    return Response::Transition(State::Error);
                };

                if let Some((min, max)) = self.heartbeat_limits {
                    if !(min..=max).contains(&interval) {
                        self.outbox_push(build_logout_with_text(
                            &self.begin_string,
                            &format!(
                                "HeartBtInt(108) must be within [{}, {}], received {}",
                                min, max, interval
                            ),
                        ));
                        self.send_logon_response(false);
                        return Response::Transition(State::Error);
                    }
                }

                if let Some(authenticate) = self.authenticator.clone() {
                    let request = LogonRequest {
                        sender_comp_id: self.target_comp_id.clone(),
                        target_comp_id: self.sender_comp_id.clone(),
                        username: username
                            .as_ref()
                            .map(|u| String::from_utf8_lossy(u).into_owned()),
                        password: password
                            .as_ref()
                            .map(|p| String::from_utf8_lossy(p).into_owned()),
                        reset_seq_num_flag: *reset_seq_num,
                        heart_bt_int: interval,
                    };
                    if let Err(reason) = authenticate(&request) {
                        self.outbox_push(build_logout_with_text(&self.begin_string, &reason));
                        self.send_logon_response(false);
                        return Response::Transition(State::Error);
                    }
                }

                if *reset_seq_num {
                    self.reset_sequences();
                }
                let echo = build_logon(&self.begin_string, interval, *reset_seq_num);
                self.outbox_push(echo);
                self.send_logon_response(true);
                if let Some(resp) = self.apply_sequence_policy(event, State::LoggedIn) {
                    return resp;
                }
                Response::Transition(State::LoggedIn)
            }
            Event::LogonExpired => {
                self.send_logon_response(false);
                Response::Transition(State::Error)
            }
            // timers may tick before the peer's Logon shows up
            Event::SendHeartbeat | Event::SendTestRequest | Event::TestRequestExpired => {
                Response::Handled
            }
            _ => {
                self.send_logon_response(false);
                Response::Transition(State::Error)
            }
        }
    }

    fn logon_sent(&mut self, event: &Event) -> Response {
        match event {
            Event::LogonReceived { encrypt_method, .. } => {
                if !matches!(encrypt_method, None | Some(0)) {
                    self.send_logon_response(false);
                    return Response::Transition(State::Error);
                }
                self.send_logon_response(true);

                if let Some(resp) = self.apply_sequence_policy(event, State::LoggedIn) {
                    return resp;
                }

                Response::Transition(State::LoggedIn)
            }
            Event::SessionErrorReceived { error } => {
                match error {
                    SessionError::MessageRejected { ref_msg_type, .. }
                        if *ref_msg_type == Some(MsgType::LOGON.into()) =>
                    {
                        self.outbox_push(build_logout(&self.begin_string));
                    }
                    _ => {}
                }

                self.send_logon_response(false);
                Response::Transition(State::Error)
            }
            Event::LogoutSent => {
                self.send_logon_response(false);
                Response::Transition(State::LogoutSent)
            }
            Event::SendHeartbeat | Event::SendTestRequest | Event::TestRequestExpired => {
                Response::Handled
            }
            _ => {
                self.send_logon_response(false);
                Response::Transition(State::Error)
            }
        }
    }

    fn logout_sent(&mut self, event: &Event) -> Response {
        if let Some(resp) = self.apply_sequence_policy(event, State::LogoutSent) {
            return resp;
        }

        match event {
            Event::LogoutReceived(..) => Response::Transition(State::End),
            Event::LogoutExpired => Response::Transition(State::Error),
            Event::SessionErrorReceived { .. } => Response::Transition(State::Error),
            _ => Response::Handled,
        }
    }
}

pub(super) fn should_pass_app_message(machine: &SessionMachine, msg_seq_num: u32) -> bool {
    if let Some(window) = machine.replay_window {
        return msg_seq_num == window.expecting;
    }
    msg_seq_num == machine.sequences.peek_incoming()
        && !matches!(
            machine.state(),
            State::Start {}
                | State::End {}
                | State::Error {}
                | State::Connected {}
                | State::LogonSent {}
        )
}

pub(super) fn should_resend(machine: &SessionMachine) -> bool {
    matches!(
        machine.state(),
        State::LoggedIn | State::ExpectingResends { .. } | State::LogoutSent
    )
}

pub(super) fn should_disconnect(machine: &SessionMachine) -> bool {
    matches!(machine.state(), State::End | State::Error)
}

pub(super) fn in_error_state(machine: &SessionMachine) -> bool {
    matches!(machine.state(), State::Error)
}

pub(super) fn build_logon(begin_string: &str, heart_bt_int: u32, reset_seq_num: bool) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::LOGON.into());
    msg.set_body(vec![
        Item::field(Tags::EncryptMethod, Value::uint(0)),
        Item::field(Tags::HeartBtInt, Value::uint(heart_bt_int as u64)),
        Item::field(
            Tags::ResetSeqNumFlag,
            if reset_seq_num {
                Value::bool(true)
            } else {
                Value::Bool(None)
            },
        ),
        Item::field(Tags::Username, Value::Str(None)),
        Item::field(Tags::Password, Value::Str(None)),
    ]);
    msg
}

pub(super) fn build_logout(begin_string: &str) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::LOGOUT.into());
    msg.set_body(vec![Item::field(Tags::Text, Value::Str(None))]);
    msg
}

pub(super) fn build_logout_with_text(begin_string: &str, text: &str) -> Message {
    let mut msg = build_logout(begin_string);
    if let Some(v) = msg.body_field_mut(Tags::Text) {
        let _ = v.set(Value::str(text));
    }
    msg
}

pub(super) fn build_heartbeat(begin_string: &str, test_req_id: Option<&[u8]>) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::HEARTBEAT.into());
    msg.set_body(vec![Item::field(
        Tags::TestReqID,
        match test_req_id {
            Some(id) => Value::str(String::from_utf8_lossy(id).into_owned()),
            None => Value::Str(None),
        },
    )]);
    msg
}

pub(super) fn build_test_request(begin_string: &str, test_req_id: &[u8]) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::TEST_REQUEST.into());
    msg.set_body(vec![Item::field(
        Tags::TestReqID,
        Value::str(String::from_utf8_lossy(test_req_id).into_owned()),
    )]);
    msg
}

pub(super) fn build_resend_request(begin_string: &str, begin_seq_no: u32, end_seq_no: u32) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::RESEND_REQUEST.into());
    msg.set_body(vec![
        Item::field(Tags::BeginSeqNo, Value::uint(begin_seq_no as u64)),
        Item::field(Tags::EndSeqNo, Value::uint(end_seq_no as u64)),
    ]);
    msg
}

pub(super) fn build_sequence_reset_gap_fill(begin_string: &str, new_seq_no: u32) -> Message {
    let mut msg = Message::standard(begin_string, MsgType::SEQUENCE_RESET.into());
    msg.set_body(vec![
        Item::field(Tags::GapFillFlag, Value::bool(true)),
        Item::field(Tags::NewSeqNo, Value::uint(new_seq_no as u64)),
    ]);
    msg
}

fn build_message_reject(
    text: &str,
    reject_reason: &Option<SessionRejectReason>,
    msg_seq_num: &u32,
    ref_tag_id: &Option<u32>,
    ref_msg_type: &Option<char>,
) -> Message {
    let mut msg = Message::standard("FIX.4.4", MsgType::REJECT.into());
    msg.set_body(vec![
        Item::field(Tags::RefSeqNum, Value::uint(*msg_seq_num as u64)),
        Item::field(
            Tags::RefTagID,
            match ref_tag_id {
                Some(t) => Value::uint(*t as u64),
                None => Value::Uint(None),
            },
        ),
        Item::field(
            Tags::RefMsgType,
            match ref_msg_type {
                Some(t) if *t != '0' => Value::str(t.to_string()),
                _ => Value::Str(None),
            },
        ),
        Item::field(
            Tags::SessionRejectReason,
            match reject_reason {
                Some(r) => Value::uint(<&SessionRejectReason as Into<u32>>::into(r) as u64),
                None => Value::Uint(None),
            },
        ),
        Item::field(Tags::Text, Value::str(text)),
    ]);
    msg
}

#[derive(Default)]
pub(super) struct Sequences {
    incoming: u32,
    outgoing: u32,
}

impl Sequences {
    pub(super) fn next_outgoing(&mut self) -> u32 {
        let n = self.outgoing;
        self.outgoing += 1;
        n
    }
    pub(super) fn incr_incoming(&mut self) -> u32 {
        let n = self.incoming;
        self.incoming += 1;
        n
    }
    pub(super) fn peek_incoming(&self) -> u32 {
        self.incoming
    }
    pub(super) fn peek_outgoing(&self) -> u32 {
        self.outgoing
    }
    /// Gap-fill advance: may only move the expected number forward.
    pub(super) fn advance_incoming(&mut self, new: u32) -> Result<(), &'static str> {
        if new <= self.incoming {
            return Err("NewSeqNo(36) must be greater than the expected MsgSeqNum");
        }
        self.incoming = new;
        Ok(())
    }
    /// Reset-mode assignment, no questions asked.
    pub(super) fn force_incoming(&mut self, new: u32) {
        self.incoming = new;
    }
}

impl From<(u32, u32)> for Sequences {
    fn from((incoming, outgoing): (u32, u32)) -> Self {
        Sequences { incoming, outgoing }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::SessionSettingsBuilder;

    fn settings() -> SessionSettings {
        SessionSettingsBuilder::new()
            .with_sender_comp_id("SERVER")
            .with_target_comp_id("CLIENT")
            .with_socket_addr("127.0.0.1:0".parse().unwrap())
            .with_store_path("./store".into())
            .with_log_dir("./log".into())
            .build()
            .unwrap()
    }

    fn logged_in_machine(next_in: u32, next_out: u32) -> SessionMachine {
        let mut machine = SessionMachine::new(&settings(), (next_in, next_out));
        machine.state = State::LoggedIn;
        machine
    }

    fn pop_msg(machine: &mut SessionMachine) -> Message {
        machine.outbox_pop().expect("outbox should not be empty").0
    }

    #[test]
    fn test_gap_triggers_resend_request() {
        let mut machine = logged_in_machine(3, 5);
        machine.handle(&Event::ApplicationMessageReceived(4, None));

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('2'));
        assert_eq!(msg.body_field(Tags::BeginSeqNo).unwrap().as_uint(), Some(3));
        assert_eq!(msg.body_field(Tags::EndSeqNo).unwrap().as_uint(), Some(0));
        assert!(matches!(machine.state(), State::ExpectingResends { .. }));
        assert!(should_pass_app_message(&machine, 3));
        assert!(!should_pass_app_message(&machine, 4));
    }

    #[test]
    fn test_gap_recovery_processes_buffered_sequence() {
        let mut machine = logged_in_machine(3, 5);
        // seqnum 4 arrives while 3 is expected
        machine.handle(&Event::ApplicationMessageReceived(4, None));
        let _resend_request = pop_msg(&mut machine);

        // peer replays 3 and 4 with PossDupFlag=Y
        machine.handle(&Event::ApplicationMessageReceived(
            3,
            Some(PossDupFlag::YES),
        ));
        assert!(matches!(machine.state(), State::ExpectingResends { .. }));
        machine.handle(&Event::ApplicationMessageReceived(
            4,
            Some(PossDupFlag::YES),
        ));
        assert!(matches!(machine.state(), State::LoggedIn));
        assert_eq!(machine.sequences.peek_incoming(), 5);
    }

    #[test]
    fn test_gap_fill_during_resend() {
        let mut machine = logged_in_machine(3, 5);
        machine.handle(&Event::ApplicationMessageReceived(6, None));
        let _resend_request = pop_msg(&mut machine);

        // peer gap-fills 3..5 then replays 6
        machine.handle(&Event::SequenceResetReceived {
            msg_seq_num: 3,
            gap_fill: Some(GapFillFlag::YES),
            new_seq_no: 6,
            poss_dup: Some(PossDupFlag::YES),
        });
        machine.handle(&Event::ApplicationMessageReceived(
            6,
            Some(PossDupFlag::YES),
        ));
        assert!(matches!(machine.state(), State::LoggedIn));
        assert_eq!(machine.sequences.peek_incoming(), 7);
    }

    #[test]
    fn test_duplicate_with_poss_dup_is_dropped() {
        let mut machine = logged_in_machine(6, 2);
        machine.handle(&Event::ApplicationMessageReceived(
            5,
            Some(PossDupFlag::YES),
        ));
        assert!(machine.outbox.is_empty());
        assert!(matches!(machine.state(), State::LoggedIn));
        assert_eq!(machine.sequences.peek_incoming(), 6);
        assert!(!should_pass_app_message(&machine, 5));
    }

    #[test]
    fn test_too_low_without_poss_dup_is_fatal() {
        let mut machine = logged_in_machine(6, 2);
        machine.handle(&Event::ApplicationMessageReceived(4, None));

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('5'));
        assert!(msg
            .body_field(Tags::Text)
            .unwrap()
            .as_str()
            .unwrap()
            .contains("MsgSeqNum too low"));
        assert!(should_disconnect(&machine));
    }

    #[test]
    fn test_test_request_heartbeat_cycle() {
        let mut machine = logged_in_machine(1, 1);
        machine.handle(&Event::SendTestRequest);

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('1'));
        let id = msg
            .body_field(Tags::TestReqID)
            .unwrap()
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(id, "TEST-1");
        assert!(matches!(machine.state(), State::ExpectingTestResponse));

        machine.handle(&Event::HeartbeatReceived {
            msg_seq_num: 1,
            test_req_id: Some(id.into_bytes()),
            poss_dup: None,
        });
        assert!(matches!(machine.state(), State::LoggedIn));
        assert!(machine.pending_test_req_id.is_none());
    }

    #[test]
    fn test_test_request_timeout_initiates_logout() {
        let mut machine = logged_in_machine(1, 1);
        machine.handle(&Event::SendTestRequest);
        let _test_request = pop_msg(&mut machine);
        machine.handle(&Event::TestRequestExpired);

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('5'));
        assert!(msg
            .body_field(Tags::Text)
            .unwrap()
            .as_str()
            .unwrap()
            .contains("TestRequest timed out"));
    }

    #[test]
    fn test_inbound_test_request_echoes_id() {
        let mut machine = logged_in_machine(1, 1);
        machine.handle(&Event::TestRequestReceived {
            msg_seq_num: 1,
            test_req_id: b"ping-7".to_vec(),
            poss_dup: None,
        });

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('0'));
        assert_eq!(
            msg.body_field(Tags::TestReqID).unwrap().as_str(),
            Some("ping-7")
        );
    }

    #[test]
    fn test_sequence_reset_gap_fill_must_advance() {
        let mut machine = logged_in_machine(10, 1);
        machine.handle(&Event::SequenceResetReceived {
            msg_seq_num: 10,
            gap_fill: Some(GapFillFlag::YES),
            new_seq_no: 15,
            poss_dup: None,
        });
        assert_eq!(machine.sequences.peek_incoming(), 15);

        machine.handle(&Event::SequenceResetReceived {
            msg_seq_num: 15,
            gap_fill: Some(GapFillFlag::YES),
            new_seq_no: 12,
            poss_dup: None,
        });
        // moving backwards in gap-fill mode earns a Reject
        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('3'));
        assert_eq!(machine.sequences.peek_incoming(), 16);
    }

    #[test]
    fn test_sequence_reset_mode_is_unconditional() {
        let mut machine = logged_in_machine(10, 1);
        machine.handle(&Event::SequenceResetReceived {
            msg_seq_num: 2,
            gap_fill: Some(GapFillFlag::NO),
            new_seq_no: 2,
            poss_dup: None,
        });
        assert!(machine.outbox.is_empty());
        assert_eq!(machine.sequences.peek_incoming(), 2);
    }

    #[test]
    fn test_acceptor_rejects_out_of_limits_heartbeat() {
        let mut settings = settings();
        settings.heartbeat_limits = Some((5, 60));
        let mut machine = SessionMachine::new(&settings, (1, 1));
        machine.handle(&Event::Accept);
        machine.handle(&Event::LogonReceived {
            msg_seq_num: 1,
            heart_bt_int: Some(120),
            encrypt_method: Some(0),
            reset_seq_num: false,
            username: None,
            password: None,
            poss_dup: None,
        });

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('5'));
        assert!(msg
            .body_field(Tags::Text)
            .unwrap()
            .as_str()
            .unwrap()
            .contains("within [5, 60]"));
        assert!(should_disconnect(&machine));
    }

    #[test]
    fn test_acceptor_accepts_and_echoes_logon() {
        let mut settings = settings();
        settings.heartbeat_limits = Some((5, 60));
        let mut machine = SessionMachine::new(&settings, (1, 1));
        machine.handle(&Event::Accept);
        machine.handle(&Event::LogonReceived {
            msg_seq_num: 1,
            heart_bt_int: Some(30),
            encrypt_method: Some(0),
            reset_seq_num: false,
            username: Some(b"user".to_vec()),
            password: Some(b"hunter2".to_vec()),
            poss_dup: None,
        });

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('A'));
        assert_eq!(msg.body_field(Tags::HeartBtInt).unwrap().as_uint(), Some(30));
        assert!(matches!(machine.state(), State::LoggedIn));
        assert_eq!(machine.sequences.peek_incoming(), 2);
    }

    #[test]
    fn test_acceptor_auth_callback_rejects() {
        let mut settings = settings();
        settings.authenticator = Some(Arc::new(|request: &LogonRequest| {
            if request.username.as_deref() == Some("trusted") {
                Ok(())
            } else {
                Err(String::from("unknown user"))
            }
        }));
        let mut machine = SessionMachine::new(&settings, (1, 1));
        machine.handle(&Event::Accept);
        machine.handle(&Event::LogonReceived {
            msg_seq_num: 1,
            heart_bt_int: Some(30),
            encrypt_method: Some(0),
            reset_seq_num: false,
            username: Some(b"stranger".to_vec()),
            password: None,
            poss_dup: None,
        });

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('5'));
        assert_eq!(
            msg.body_field(Tags::Text).unwrap().as_str(),
            Some("unknown user")
        );
        assert!(should_disconnect(&machine));
    }

    #[test]
    fn test_reset_seq_num_logon_resets_both_counters() {
        let mut settings = settings();
        settings.heartbeat_limits = Some((5, 60));
        let mut machine = SessionMachine::new(&settings, (40, 50));
        machine.handle(&Event::Accept);
        machine.handle(&Event::LogonReceived {
            msg_seq_num: 1,
            heart_bt_int: Some(30),
            encrypt_method: Some(0),
            reset_seq_num: true,
            username: None,
            password: None,
            poss_dup: None,
        });

        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('A'));
        assert_eq!(
            msg.body_field(Tags::ResetSeqNumFlag).unwrap().as_bool(),
            Some(true)
        );
        // both counters restart at 1; the inbound logon consumed 1
        assert_eq!(machine.sequences.peek_incoming(), 2);
        assert_eq!(machine.sequences.peek_outgoing(), 1);
    }

    #[test]
    fn test_acceptor_logon_window_expires() {
        let mut machine = SessionMachine::new(&settings(), (1, 1));
        machine.handle(&Event::Accept);
        machine.handle(&Event::LogonExpired);
        assert!(should_disconnect(&machine));
    }

    #[test]
    fn test_logout_handshake() {
        let mut machine = logged_in_machine(1, 1);
        machine.handle(&Event::LogoutSent);
        assert!(matches!(machine.state(), State::LogoutSent));
        machine.handle(&Event::LogoutReceived(1, None));
        assert!(matches!(machine.state(), State::End));
        assert!(should_disconnect(&machine));
    }

    #[test]
    fn test_logout_timeout_forces_error() {
        let mut machine = logged_in_machine(1, 1);
        machine.handle(&Event::LogoutSent);
        machine.handle(&Event::LogoutExpired);
        assert!(in_error_state(&machine));
    }

    #[test]
    fn test_peer_logout_is_acknowledged() {
        let mut machine = logged_in_machine(3, 1);
        machine.handle(&Event::LogoutReceived(3, None));
        let msg = pop_msg(&mut machine);
        assert_eq!(msg.msg_type(), Some('5'));
        assert!(matches!(machine.state(), State::End));
    }

    #[test]
    fn test_outgoing_sequence_is_monotone() {
        let mut seqs: Sequences = (1, 1).into();
        assert_eq!(seqs.next_outgoing(), 1);
        assert_eq!(seqs.next_outgoing(), 2);
        assert_eq!(seqs.next_outgoing(), 3);
        assert_eq!(seqs.peek_outgoing(), 4);
    }
}
