//! Envelope validation: what every inbound message must get right before
//! the state machine will look at it.
//!
//! The engine's field scanner leaves behind an [`Envelope`] of session
//! header facts; [`Envelope::check`] runs them through the gauntlet:
//! recognized MsgType, the comp ids this session was configured for, a
//! SendingTime close to our own clock, coherent duplicate markers, and a
//! complete ResendRequest range. The first failure becomes the Reject (or
//! Logout) the state machine sends back.

use crate::fix::checksum::checksum_is_valid;
use crate::fix::generated::{MsgType, SessionRejectReason, Tags};
use crate::fix::mem::MsgBuf;
use crate::fix::{GarbledMessageType, SessionError};

use chrono::{DateTime, Duration, Utc};

// Tolerated clock drift between the peers, in either direction.
const MAX_CLOCK_DRIFT_SECS: i64 = 10;

/// Session-level header facts pulled off one inbound message.
pub(super) struct Envelope<'a> {
    pub msg_type: char,
    pub msg_seq_num: u32,
    pub sender_comp_id: Option<&'a [u8]>,
    pub target_comp_id: Option<&'a [u8]>,
    pub sending_time: Option<DateTime<Utc>>,
    pub poss_dup_flag: Option<char>,
    pub orig_sending_time: Option<DateTime<Utc>>,
    pub begin_seq_no: Option<u32>,
    pub end_seq_no: Option<u32>,
}

impl Envelope<'_> {
    /// Validates the envelope against this session's identity and clock.
    /// `my_comp_ids` is `(sender, target)` as configured locally; the
    /// peer's headers must carry them swapped.
    pub(super) fn check(
        &self,
        my_comp_ids: (&str, &str),
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.known_msg_type()?;
        self.comp_ids_swapped(my_comp_ids)?;
        let sending_time = self.sending_time_near(now)?;
        self.duplicate_markers(sending_time)?;
        self.resend_range()
    }

    fn reject(&self, reason: SessionRejectReason, ref_tag: Option<Tags>) -> SessionError {
        SessionError::new_message_rejected(
            Some(reason),
            self.msg_seq_num,
            ref_tag.map(u32::from),
            Some(self.msg_type),
        )
    }

    fn known_msg_type(&self) -> Result<(), SessionError> {
        MsgType::try_from(self.msg_type)
            .map(|_| ())
            .map_err(|_| self.reject(SessionRejectReason::INVALID_MSGTYPE, Some(Tags::MsgType)))
    }

    // The peer's SenderCompID is my target and its TargetCompID is me.
    fn comp_ids_swapped(&self, (my_sender, my_target): (&str, &str)) -> Result<(), SessionError> {
        if self.sender_comp_id != Some(my_target.as_bytes()) {
            return Err(self.reject(
                SessionRejectReason::COMPID_PROBLEM,
                Some(Tags::SenderCompID),
            ));
        }
        if self.target_comp_id != Some(my_sender.as_bytes()) {
            return Err(self.reject(
                SessionRejectReason::COMPID_PROBLEM,
                Some(Tags::TargetCompID),
            ));
        }
        Ok(())
    }

    fn sending_time_near(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, SessionError> {
        let sending_time = self.sending_time.ok_or_else(|| {
            self.reject(
                SessionRejectReason::REQUIRED_TAG_MISSING,
                Some(Tags::SendingTime),
            )
        })?;
        let drift = (now - sending_time).abs();
        if drift > Duration::seconds(MAX_CLOCK_DRIFT_SECS) {
            return Err(self.reject(
                SessionRejectReason::SENDINGTIME_ACCURACY_PROBLEM,
                Some(Tags::SendingTime),
            ));
        }
        Ok(sending_time)
    }

    // PossDupFlag=Y requires OrigSendingTime, and the original send cannot
    // postdate the retransmission.
    fn duplicate_markers(&self, sending_time: DateTime<Utc>) -> Result<(), SessionError> {
        match self.poss_dup_flag {
            None | Some('N') => Ok(()),
            Some('Y') => {
                let original = self.orig_sending_time.ok_or_else(|| {
                    self.reject(
                        SessionRejectReason::REQUIRED_TAG_MISSING,
                        Some(Tags::OrigSendingTime),
                    )
                })?;
                if original > sending_time {
                    return Err(
                        self.reject(SessionRejectReason::SENDINGTIME_ACCURACY_PROBLEM, None)
                    );
                }
                Ok(())
            }
            Some(_) => Err(self.reject(
                SessionRejectReason::VALUE_IS_INCORRECT,
                Some(Tags::PossDupFlag),
            )),
        }
    }

    fn resend_range(&self) -> Result<(), SessionError> {
        let is_resend_request = self.msg_type == char::from(MsgType::RESEND_REQUEST);
        if is_resend_request && (self.begin_seq_no.is_none() || self.end_seq_no.is_none()) {
            return Err(self.reject(SessionRejectReason::REQUIRED_TAG_MISSING, None));
        }
        Ok(())
    }
}

pub(super) fn validate_checksum(msg_buf: &MsgBuf) -> Result<(), SessionError> {
    if !checksum_is_valid(msg_buf.as_slice()) {
        return Err(SessionError::new_garbled_message(
            String::from("Checksum invalid"),
            GarbledMessageType::ChecksumIssue,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn envelope<'a>(now: DateTime<Utc>) -> Envelope<'a> {
        Envelope {
            msg_type: '0',
            msg_seq_num: 5,
            sender_comp_id: Some(b"PEER"),
            target_comp_id: Some(b"ME"),
            sending_time: Some(now),
            poss_dup_flag: None,
            orig_sending_time: None,
            begin_seq_no: None,
            end_seq_no: None,
        }
    }

    fn reason_of(err: SessionError) -> Option<SessionRejectReason> {
        match err {
            SessionError::MessageRejected { reject_reason, .. } => reject_reason,
            _ => None,
        }
    }

    #[test]
    fn test_valid_envelope_passes() {
        let now = Utc::now();
        assert!(envelope(now).check(("ME", "PEER"), now).is_ok());
    }

    #[test]
    fn test_unknown_msg_type() {
        let now = Utc::now();
        let mut env = envelope(now);
        env.msg_type = '~';
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::INVALID_MSGTYPE)
        );
    }

    #[test]
    fn test_comp_ids_must_be_swapped() {
        let now = Utc::now();
        // correct ids in the wrong roles: the peer claimed to be me
        let mut env = envelope(now);
        env.sender_comp_id = Some(b"ME");
        env.target_comp_id = Some(b"PEER");
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::COMPID_PROBLEM)
        );

        let mut env = envelope(now);
        env.sender_comp_id = None;
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::COMPID_PROBLEM)
        );
    }

    #[test]
    fn test_sending_time_required_and_fresh() {
        let now = Utc::now();
        let mut env = envelope(now);
        env.sending_time = None;
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::REQUIRED_TAG_MISSING)
        );

        for skew in [Duration::seconds(60), Duration::seconds(-60)] {
            let mut env = envelope(now);
            env.sending_time = Some(now + skew);
            assert_eq!(
                reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
                Some(SessionRejectReason::SENDINGTIME_ACCURACY_PROBLEM)
            );
        }
    }

    #[test]
    fn test_duplicate_markers() {
        let now = Utc::now();
        let mut env = envelope(now);
        env.poss_dup_flag = Some('Y');
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::REQUIRED_TAG_MISSING)
        );

        env.orig_sending_time = Some(now - Duration::seconds(30));
        assert!(env.check(("ME", "PEER"), now).is_ok());

        // an original send from the future is nonsense
        env.orig_sending_time = Some(now + Duration::seconds(5));
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::SENDINGTIME_ACCURACY_PROBLEM)
        );

        let mut env = envelope(now);
        env.poss_dup_flag = Some('X');
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::VALUE_IS_INCORRECT)
        );
    }

    #[test]
    fn test_resend_request_needs_both_range_tags() {
        let now = Utc::now();
        let mut env = envelope(now);
        env.msg_type = '2';
        env.begin_seq_no = Some(3);
        assert_eq!(
            reason_of(env.check(("ME", "PEER"), now).unwrap_err()),
            Some(SessionRejectReason::REQUIRED_TAG_MISSING)
        );

        env.end_seq_no = Some(0);
        assert!(env.check(("ME", "PEER"), now).is_ok());
    }

    #[test]
    fn test_validate_checksum() {
        let good = b"8=FIX.4.4\x019=5\x0135=0\x0110=163\x01";
        assert!(validate_checksum(&MsgBuf::from(&good[..])).is_ok());
        let bad = b"8=FIX.4.4\x019=5\x0135=0\x0110=162\x01";
        assert!(validate_checksum(&MsgBuf::from(&bad[..])).is_err());
    }
}
