//! Session timers.
//!
//! Four deadlines matter to a running session: the outbound heartbeat (T
//! since we last sent anything), inbound liveness (1.2·T of silence earns
//! the peer a TestRequest, and the reply gets T more), the acceptor's
//! logon window, and the logout grace period. Timers never preempt; the
//! engine polls the next expiring one in its select loop and feeds the
//! resulting event to the state machine.

use crate::fix::session::Event;
use tokio::time::{sleep_until, Duration, Instant, Sleep};

pub(super) struct Timeout {
    next_instant: Instant,
    duration: Duration,
    event: Event,
}

impl Timeout {
    pub(super) fn new(duration: Duration, event: Event) -> Timeout {
        Timeout {
            next_instant: Instant::now() + duration,
            duration,
            event,
        }
    }

    pub(super) fn reset_timeout(&mut self) {
        self.next_instant = Instant::now() + self.duration;
    }

    pub(super) fn set_timeout_duration(&mut self, dur: Duration) {
        self.duration = dur;
        self.reset_timeout();
    }

    pub(super) fn timeout(&self) -> (Sleep, &Event) {
        (sleep_until(self.next_instant), &self.event)
    }
}

pub(super) struct FixTimeouts {
    heartbeat: Timeout,
    test_request: Timeout,
    test_response: Timeout,
    logon: Timeout,
    logout: Timeout,
    awaiting_logon: bool,
    awaiting_test_response: bool,
    awaiting_logout: bool,
}

pub(super) fn test_request_duration(heartbeat: &Duration) -> Duration {
    (*heartbeat * 12) / 10
}

impl FixTimeouts {
    pub(super) fn new(
        heartbeat_dur: Duration,
        logon_dur: Duration,
        logout_dur: Duration,
        awaiting_logon: bool,
    ) -> FixTimeouts {
        FixTimeouts {
            heartbeat: Timeout::new(heartbeat_dur, Event::SendHeartbeat),
            test_request: Timeout::new(test_request_duration(&heartbeat_dur), Event::SendTestRequest),
            test_response: Timeout::new(heartbeat_dur, Event::TestRequestExpired),
            logon: Timeout::new(logon_dur, Event::LogonExpired),
            logout: Timeout::new(logout_dur, Event::LogoutExpired),
            awaiting_logon,
            awaiting_test_response: false,
            awaiting_logout: false,
        }
    }

    pub(super) fn next_expiring_timeout(&mut self) -> &mut Timeout {
        if self.awaiting_logout {
            return &mut self.logout;
        }
        let mut next = &mut self.heartbeat;
        if self.awaiting_test_response {
            if self.test_response.next_instant < next.next_instant {
                next = &mut self.test_response;
            }
        } else if self.test_request.next_instant < next.next_instant {
            next = &mut self.test_request;
        }
        if self.awaiting_logon && self.logon.next_instant < next.next_instant {
            next = &mut self.logon;
        }
        next
    }

    /// Something went out; the peer does not need a heartbeat for another T.
    pub(super) fn reset_heartbeat(&mut self) {
        self.heartbeat.reset_timeout();
    }

    /// Something came in; the peer is alive.
    pub(super) fn observe_inbound(&mut self) {
        self.test_request.reset_timeout();
        self.awaiting_test_response = false;
    }

    /// A TestRequest went out; the reply is due within one heartbeat
    /// interval.
    pub(super) fn start_test_response_timeout(&mut self) {
        self.awaiting_test_response = true;
        self.test_response.reset_timeout();
    }

    pub(super) fn logon_received(&mut self) {
        self.awaiting_logon = false;
    }

    pub(super) fn start_logout_timeout(&mut self) {
        self.awaiting_logout = true;
        self.logout.reset_timeout();
    }

    /// Re-arms everything around the interval negotiated at logon.
    pub(super) fn set_heartbeat_duration(&mut self, heartbeat_dur: Duration) {
        self.heartbeat.set_timeout_duration(heartbeat_dur);
        self.test_request
            .set_timeout_duration(test_request_duration(&heartbeat_dur));
        self.test_response.set_timeout_duration(heartbeat_dur);
    }
}
