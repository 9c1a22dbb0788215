//! Marking stored messages for retransmission.
//!
//! A replayed application message keeps its original MsgSeqNum but must
//! announce itself: PossDupFlag=Y, a fresh SendingTime, and the original
//! SendingTime preserved in OrigSendingTime(122). Rather than splicing
//! byte offsets, the stored frame is scanned back into its `tag=value`
//! records, the duplicate markers are rewritten at the SendingTime record,
//! and the envelope is rebuilt around the result, which recomputes
//! BodyLength and CheckSum for free.

use crate::fix::checksum::ChecksumWriter;
use crate::fix::decode::{self, ParserCallback};
use crate::fix::generated::Tags;
use crate::fix::mem::MsgBuf;
use crate::fix::value::TIME_FORMAT;
use crate::fix::SessionError;
use chrono::{DateTime, Utc};
use std::io::Write;

const SOH: u8 = b'\x01';

// Collects every record of a frame, in order, borrowing the values.
#[derive(Default)]
struct RecordCollector<'a> {
    records: Vec<(u32, &'a [u8])>,
}

impl<'a> ParserCallback<'a> for RecordCollector<'a> {
    type Err = SessionError;
    fn header(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err> {
        self.records.push((key, value));
        Ok(true)
    }
    fn body(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err> {
        self.records.push((key, value));
        Ok(true)
    }
    fn trailer(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err> {
        self.records.push((key, value));
        Ok(true)
    }
    fn sequence_num(&self) -> u32 {
        0
    }
}

/// The MsgType of a stored frame, read off its envelope.
pub(super) fn stored_msg_type(frame: &[u8]) -> Result<char, SessionError> {
    if frame.len() < crate::fix::stream::ENVELOPE_LEN {
        return Err(SessionError::ResendError);
    }
    Ok(decode::parse_peeked_prefix(frame)?.msg_type)
}

/// Rebuilds a stored frame as a possible duplicate, stamped `now`.
pub(super) fn mark_possible_duplicate(
    frame: &[u8],
    now: DateTime<Utc>,
) -> Result<MsgBuf, SessionError> {
    let mut collector = RecordCollector::default();
    decode::parse(frame, &mut collector).or(Err(SessionError::ResendError))?;

    let begin_string = record_value(&collector.records, Tags::BeginString)
        .ok_or(SessionError::ResendError)?;
    let original_sending_time =
        record_value(&collector.records, Tags::SendingTime).ok_or(SessionError::ResendError)?;
    let fresh_sending_time = now.format(TIME_FORMAT).to_string();

    // every record except the envelope, with the duplicate markers
    // rewritten in place of the original SendingTime
    let mut body: Vec<u8> = Vec::with_capacity(frame.len() + 48);
    for (tag, value) in &collector.records {
        match (*tag).try_into() {
            Ok(Tags::BeginString) | Ok(Tags::BodyLength) | Ok(Tags::CheckSum) => continue,
            Ok(Tags::PossDupFlag) | Ok(Tags::OrigSendingTime) => continue,
            Ok(Tags::SendingTime) => {
                push_record(&mut body, Tags::PossDupFlag.into(), b"Y");
                push_record(&mut body, Tags::SendingTime.into(), fresh_sending_time.as_bytes());
                push_record(&mut body, Tags::OrigSendingTime.into(), original_sending_time);
            }
            _ => push_record(&mut body, *tag, value),
        }
    }

    let mut out: Vec<u8> = Vec::with_capacity(body.len() + 32);
    let mut w = ChecksumWriter::new(&mut out);
    write!(w, "8=")
        .and_then(|_| w.write_all(begin_string))
        .and_then(|_| write!(w, "\x019={}\x01", body.len()))
        .and_then(|_| w.write_all(&body))
        .or(Err(SessionError::ResendError))?;
    let checksum = w.checksum();
    write!(out, "10={:0>3}\x01", checksum).or(Err(SessionError::ResendError))?;
    Ok(out.into())
}

fn record_value<'a>(records: &[(u32, &'a [u8])], tag: Tags) -> Option<&'a [u8]> {
    let wanted = u32::from(tag);
    records
        .iter()
        .find(|(tag, _)| *tag == wanted)
        .map(|(_, value)| *value)
}

fn push_record(out: &mut Vec<u8>, tag: u32, value: &[u8]) {
    let _ = write!(out, "{}=", tag);
    out.extend_from_slice(value);
    out.push(SOH);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::checksum::checksum_is_valid;
    use chrono::TimeZone;

    const STORED: &[u8] = b"8=FIX.4.4\x019=40\x0135=D\x0134=7\x0149=CL\x0156=SRV\x0152=20240101-10:00:00.000\x0144=1.5\x0110=000\x01";

    #[test]
    fn test_stored_msg_type() {
        assert_eq!(stored_msg_type(STORED).unwrap(), 'D');
        assert!(stored_msg_type(b"8=FIX.4.4\x019=5").is_err());
    }

    #[test]
    fn test_marks_resends() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let resent = mark_possible_duplicate(STORED, now).unwrap();
        let text = format!("{}", resent);

        assert!(text.contains("43=Y\x0152=20240102-09:30:00.000\x01122=20240101-10:00:00.000\x01"));
        // original seqnum and payload survive
        assert!(text.contains("34=7\x01"));
        assert!(text.contains("44=1.5\x01"));
        assert!(checksum_is_valid(resent.as_slice()));
    }

    #[test]
    fn test_recomputed_body_length_matches_layout() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let resent = mark_possible_duplicate(STORED, now).unwrap();

        let bytes = resent.as_slice();
        let len_start = "8=FIX.4.4\x019=".len();
        let len_end = bytes[len_start..].iter().position(|b| *b == SOH).unwrap() + len_start;
        let declared: usize = std::str::from_utf8(&bytes[len_start..len_end])
            .unwrap()
            .parse()
            .unwrap();
        assert_eq!(declared, bytes.len() - (len_end + 1) - 7);
    }

    #[test]
    fn test_stale_duplicate_markers_are_replaced() {
        // a frame that was itself a resend: old 43/122 must not survive
        let prior = b"8=FIX.4.4\x019=67\x0135=D\x0134=7\x0149=CL\x0156=SRV\x0143=Y\x0152=20240101-11:00:00.000\x01122=20240101-10:00:00.000\x0144=1.5\x0110=000\x01";
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let resent = mark_possible_duplicate(prior, now).unwrap();
        let text = format!("{}", resent);

        assert_eq!(text.matches("43=").count(), 1);
        assert_eq!(text.matches("122=").count(), 1);
        assert!(text.contains("122=20240101-11:00:00.000\x01"));
    }

    #[test]
    fn test_frame_without_sending_time_is_rejected() {
        let no_52 = b"8=FIX.4.4\x019=17\x0135=D\x0134=7\x0149=CL\x0156=SRV\x0110=000\x01";
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        assert!(mark_possible_duplicate(no_52, now).is_err());
    }

    #[test]
    fn test_raw_data_with_soh_survives() {
        // 95/96 carry length-prefixed data that may contain SOH
        let with_data = b"8=FIX.4.4\x019=56\x0135=D\x0134=7\x0149=CL\x0156=SRV\x0152=20240101-10:00:00.000\x0195=5\x0196=ab\x01cd\x0110=000\x01";
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 9, 30, 0).unwrap();
        let resent = mark_possible_duplicate(with_data, now).unwrap();
        let text = format!("{}", resent);
        assert!(text.contains("95=5\x0196=ab\x01cd\x01"));
    }
}
