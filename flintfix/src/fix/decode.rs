//! Fast, flat decoding of raw message buffers.
//!
//! The session engine does not need the full structural model to do its
//! job; it needs a handful of header and admin fields out of every inbound
//! message, quickly. [`parse`] scans a framed buffer once and hands each
//! `tag=value` record to a [`ParserCallback`], which picks out what it
//! cares about. Values are borrowed straight from the buffer.
//!
//! Structural parsing into the typed tree lives in
//! [`crate::fix::message`].

use crate::fix::generated::{get_data_ref, SessionRejectReason, Tags};
use crate::fix::{GarbledMessageType, SessionError};
use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

const TIME_FORMAT_SHORT: &str = "%Y%m%d-%H:%M:%S";
const TIME_FORMAT_LONG: &str = "%Y%m%d-%H:%M:%S%.3f";

/// Errors from the generated field dictionary.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown tag {0}")]
    UnknownTag(u32),
    #[error("unknown value {1} for {0:?}")]
    UnknownChar(Tags, char),
    #[error("unknown value {1} for {0:?}")]
    UnknownInt(Tags, u8),
}

lazy_static! {
    static ref HEADER_FIELDS: BTreeSet<u32> = [
        8, 9, 35, 49, 56, 115, 128, 90, 91, 34, 50, 142, 57, 143, 116, 144, 129, 145, 43, 97, 52,
        122, 212, 213, 347, 369, 627, 628, 629, 630,
    ]
    .iter()
    .cloned()
    .collect();
    static ref TRAILER_FIELDS: BTreeSet<u32> = [93, 89, 10].iter().cloned().collect();
}

#[derive(PartialEq, Eq, Debug)]
enum FieldState {
    Start,
    InTag,
    SeenEquals,
    InField,
}

/// Receives each record of a scanned message. Header and trailer tags go to
/// `header`, everything else to `body`; returning `Ok(false)` stops the
/// scan early. `sequence_num` is whatever MsgSeqNum the callback has seen
/// so far, used to fill in reject errors raised mid-scan.
pub trait ParserCallback<'a> {
    type Err: From<SessionError>;
    fn header(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err>;
    fn body(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err>;
    fn trailer(&mut self, key: u32, value: &'a [u8]) -> Result<bool, Self::Err>;
    fn sequence_num(&self) -> u32;
}

/// A [`ParserCallback`] that accepts everything and keeps nothing.
pub struct NullParserCallback;

impl<'a> ParserCallback<'a> for NullParserCallback {
    type Err = SessionError;
    fn header(&mut self, _key: u32, _value: &'a [u8]) -> Result<bool, Self::Err> {
        Ok(true)
    }
    fn body(&mut self, _key: u32, _value: &'a [u8]) -> Result<bool, Self::Err> {
        Ok(true)
    }
    fn trailer(&mut self, _key: u32, _value: &'a [u8]) -> Result<bool, Self::Err> {
        Ok(true)
    }
    fn sequence_num(&self) -> u32 {
        0
    }
}

/// Scans a framed message and feeds every record to `callbacks`.
///
/// Data fields (RawData and friends) may legally contain SOH; when their
/// length field has been seen, the scanner skips that many bytes instead of
/// scanning for the separator.
pub fn parse<'a, C>(msg: &'a [u8], callbacks: &mut C) -> Result<(), C::Err>
where
    C: ParserCallback<'a>,
{
    let mut field_lengths: HashMap<u32, u32> = HashMap::new();
    let mut state = FieldState::Start;
    let mut tag_accum: u32 = 0;
    let mut field_start: usize = 0;
    let mut iter = msg.iter().enumerate();
    while let Some((i, b)) = iter.next() {
        let c = *b as char;
        match (&state, c) {
            (&FieldState::Start, '0'..='9') | (&FieldState::InTag, '0'..='9') => {
                if state == FieldState::Start {
                    tag_accum = 0;
                } else {
                    tag_accum *= 10;
                }
                tag_accum += *b as u32 - '0' as u32;
                state = FieldState::InTag;
            }
            (&FieldState::InTag, '=') => {
                field_start = i + 1;
                if let Some(len) = field_lengths.get(&tag_accum) {
                    if *len > 0 {
                        skip_ahead(&mut iter, len - 1);
                    }
                }
                state = FieldState::SeenEquals;
            }
            (&FieldState::SeenEquals, '\x01') | (&FieldState::InField, '\x01') => {
                if let Some(data_tag) = get_data_ref(tag_accum) {
                    let len = bytes_to_u32(&msg[field_start..i]).ok_or_else(|| {
                        SessionError::new_message_rejected(
                            Some(SessionRejectReason::INCORRECT_DATA_FORMAT_FOR_VALUE),
                            callbacks.sequence_num(),
                            Some(tag_accum),
                            None,
                        )
                    })?;
                    field_lengths.insert(data_tag, len);
                }
                let cont = if HEADER_FIELDS.contains(&tag_accum) {
                    callbacks.header(tag_accum, &msg[field_start..i])?
                } else if TRAILER_FIELDS.contains(&tag_accum) {
                    callbacks.trailer(tag_accum, &msg[field_start..i])?
                } else {
                    callbacks.body(tag_accum, &msg[field_start..i])?
                };
                if !cont {
                    break;
                }

                state = FieldState::Start;
            }
            (&FieldState::SeenEquals, _) | (&FieldState::InField, _) => {
                if state != FieldState::InField {
                    state = FieldState::InField;
                }
            }
            _ => {
                return Err(SessionError::GarbledMessage {
                    text: format!("{}: invalid char at {} while in {:?}", c, i, state),
                    garbled_msg_type: GarbledMessageType::Other,
                }
                .into());
            }
        }
    }
    Ok(())
}

fn bytes_to_u32(bytes: &[u8]) -> Option<u32> {
    if bytes.is_empty() {
        return None;
    }
    let mut accum: u32 = 0;
    for b in bytes.iter() {
        if *b < b'0' || b'9' < *b {
            return None;
        }
        accum = accum
            .checked_mul(10)
            .and_then(|r| r.checked_add((b - b'0').into()))?;
    }
    Some(accum)
}

fn skip_ahead<T: Iterator>(iter: &mut T, n: u32) {
    for _ in 0..n {
        _ = iter.next();
    }
}

pub(super) struct ParsedPeek {
    pub msg_type: char,
    pub msg_length: usize,
    pub len_start: usize,
    pub len_end: usize,
    pub fixed_fields_end: usize,
}

/// Parses the fixed prefix `8=FIX.4.4<SOH>9=<len><SOH>35=<t><SOH>` from the
/// first bytes of a message and derives the total frame length.
pub(super) fn parse_peeked_prefix(peeked: &[u8]) -> Result<ParsedPeek, SessionError> {
    const EXPECTED_PREFIX: &[u8] = b"8=FIX.4.4\x019=";
    if &peeked[..2] == b"8=" && &peeked[2..9] != b"FIX.4.4" {
        return Err(SessionError::new_garbled_message(
            String::from("Incorrect BeginString"),
            GarbledMessageType::BeginStringIssue,
        ));
    }

    if &peeked[..EXPECTED_PREFIX.len()] != EXPECTED_PREFIX {
        return Err(SessionError::new_garbled_message(
            String::from("BeginString not first"),
            GarbledMessageType::Other,
        ));
    }
    let mut at = EXPECTED_PREFIX.len();
    let mut body_length: usize = 0;
    let mut saw_end = false;
    for c in peeked[EXPECTED_PREFIX.len()..].iter() {
        at += 1;
        match *c as char {
            '0'..='9' => {
                body_length =
                    body_length
                        .checked_mul(10)
                        .ok_or(SessionError::new_garbled_message(
                            String::from("BodyLength too large"),
                            GarbledMessageType::BodyLengthIssue,
                        ))?;
                body_length = body_length.checked_add((*c - b'0') as usize).ok_or(
                    SessionError::new_garbled_message(
                        String::from("BodyLength too large"),
                        GarbledMessageType::BodyLengthIssue,
                    ),
                )?;
            }
            '\x01' => {
                saw_end = true;
                break;
            }
            _ => {
                return Err(SessionError::new_garbled_message(
                    String::from("Illegal character in BodyLength"),
                    GarbledMessageType::BodyLengthIssue,
                ));
            }
        }
    }
    let len_end = at - 1;
    if !saw_end {
        return Err(SessionError::new_garbled_message(
            String::from("BodyLength too large"),
            GarbledMessageType::BodyLengthIssue,
        ));
    }
    let msg_type = if &peeked[at..at + 3] == b"35=" && peeked[at + 4] == b'\x01' {
        peeked[at + 3]
    } else {
        return Err(SessionError::new_garbled_message(
            String::from("Missing MsgType"),
            GarbledMessageType::MsgTypeIssue,
        ));
    };
    let fixed_fields_end = at + 5;

    // "at" is the offset of the first byte BodyLength counts, and the frame
    // ends with the 7-byte 10=ccc<SOH> trailer, so:
    let msg_length = body_length + at + 7;
    Ok(ParsedPeek {
        msg_type: msg_type as char,
        msg_length,
        len_start: EXPECTED_PREFIX.len(),
        len_end,
        fixed_fields_end,
    })
}

/// Parses a FIX value into any [`FromStr`] type.
///
/// [`FromStr`]: std::str::FromStr
pub fn parse_field<T>(field: &[u8]) -> Result<T>
where
    T: std::str::FromStr,
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::str::from_utf8(field)?
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("{e:?}"))
}

/// Parses a UTCTimestamp header value, with or without milliseconds.
pub(super) fn parse_timestamp(bytes: &[u8]) -> Result<DateTime<Utc>> {
    let s = std::str::from_utf8(bytes)?;
    let naive = NaiveDateTime::parse_from_str(s, TIME_FORMAT_LONG)
        .or_else(|_| NaiveDateTime::parse_from_str(s, TIME_FORMAT_SHORT))?;
    Ok(naive.and_utc())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_peek_prefix() {
        let msg = b"8=FIX.4.4\x019=57\x0135=A\x0134=1\x0149=ISLD\x0152=20240506-13:59:15.021\x0156=TW\x0198=0\x01108=30\x01141=Y\x0110=003\x01";
        let peek = parse_peeked_prefix(&msg[..32]).unwrap();
        assert_eq!(peek.msg_type, 'A');
        assert_eq!(peek.len_start, 12);
        assert_eq!(peek.len_end, 14);
        // prefix (15 bytes through SOH after 9=57) + body 57 + trailer 7
        assert_eq!(peek.msg_length, 15 + 57 + 7);
        assert_eq!(&msg[peek.fixed_fields_end..peek.fixed_fields_end + 3], b"34=");
    }

    #[test]
    fn test_peek_prefix_rejects_wrong_version() {
        assert!(matches!(
            parse_peeked_prefix(b"8=FIX.4.2\x019=57\x0135=A\x01xxxxxxxxxxx"),
            Err(SessionError::GarbledMessage {
                garbled_msg_type: GarbledMessageType::BeginStringIssue,
                ..
            })
        ));
    }

    #[test]
    fn test_body_length_too_long() {
        assert!(parse_peeked_prefix(b"8=FIX.4.4\x019=33333333333333333333333").is_err());
    }

    #[test]
    fn test_bytes_to_u32() {
        assert_eq!(bytes_to_u32(b"234").unwrap(), 234);
        assert_eq!(bytes_to_u32(b"0").unwrap(), 0);
        assert!(bytes_to_u32(b"11111111111111111111111111111111111111").is_none());
        assert!(bytes_to_u32(b"a").is_none());
        assert!(bytes_to_u32(b"").is_none());
    }

    #[test]
    fn test_data_field_may_contain_soh() {
        // 96 is RawData, sized by 95; the embedded SOH must not split it
        let msg = b"8=FIX.4.4\x019=21\x0195=10\x0196=123\x01456789\x0110=000\x01";
        let mut cb = NullParserCallback;
        assert!(parse(&msg[..], &mut cb).is_ok());
    }

    #[test]
    fn test_garbled_field_is_an_error() {
        let msg = b"8=FIX.4.4\x019=21\x0195=1a\x0196=123\x01456789\x0110=000\x01";
        let mut cb = NullParserCallback;
        assert!(parse(&msg[..], &mut cb).is_err());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp(b"20240506-13:59:15.021").is_ok());
        assert!(parse_timestamp(b"20240506-13:59:15").is_ok());
        assert!(parse_timestamp(b"2024-05-06").is_err());
    }
}
