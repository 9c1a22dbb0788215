//! Typed FIX field values.
//!
//! Every FIX field carries one of a small set of scalar shapes: free text,
//! signed and unsigned integers, decimal floats, Y/N booleans, UTC
//! timestamps, and raw data. [`Value`] is the sum of those shapes. A value
//! is typed at construction and stays that type for its lifetime; what can
//! change is the payload, including to *absent*.
//!
//! Absent is not a default. An absent `Str` and an empty `Str` are different
//! values: the empty string goes on the wire as `58=<SOH>`, the absent one
//! produces no bytes at all.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use thiserror::Error;

/// Wire layout of a millisecond UTCTimestamp, in [chrono format syntax].
///
/// [chrono format syntax]: https://docs.rs/chrono/latest/chrono/format/strftime/index.html
pub const TIME_FORMAT: &str = "%Y%m%d-%H:%M:%S%.3f";

const TS_SECONDS: &str = "%Y%m%d-%H:%M:%S";
const DATE_ONLY: &str = "%Y%m%d";
const TIME_ONLY: &str = "%H:%M:%S%.3f";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("malformed integer")]
    MalformedInt,
    #[error("malformed float")]
    MalformedFloat,
    #[error("malformed timestamp")]
    MalformedTime,
    #[error("malformed boolean, expected Y or N")]
    MalformedBool,
    #[error("value out of range")]
    OutOfRange,
    #[error("value contains a SOH byte")]
    ContainsSoh,
    #[error("expected a {expected:?} value, got {got:?}")]
    TypeMismatch { expected: ValueKind, got: ValueKind },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Raw,
    Str,
    Int,
    Uint,
    Float,
    Bool,
    Time,
}

/// Which wire form a timestamp field uses. Most fields want the millisecond
/// UTCTimestamp; a handful are date-only or time-only, so the layout lives
/// on the field rather than in a global constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeLayout {
    #[default]
    UtcTimestamp,
    UtcDateOnly,
    UtcTimeOnly,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timestamp {
    pub at: DateTime<Utc>,
    pub layout: TimeLayout,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Raw(Option<Vec<u8>>),
    Str(Option<String>),
    Int(Option<i64>),
    Uint(Option<u64>),
    Float(Option<f64>),
    Bool(Option<bool>),
    Time(Option<Timestamp>),
}

impl Value {
    pub fn raw(v: impl Into<Vec<u8>>) -> Value {
        Value::Raw(Some(v.into()))
    }
    pub fn str(v: impl Into<String>) -> Value {
        Value::Str(Some(v.into()))
    }
    pub fn int(v: i64) -> Value {
        Value::Int(Some(v))
    }
    pub fn uint(v: u64) -> Value {
        Value::Uint(Some(v))
    }
    pub fn float(v: f64) -> Value {
        Value::Float(Some(v))
    }
    pub fn bool(v: bool) -> Value {
        Value::Bool(Some(v))
    }
    pub fn time(at: DateTime<Utc>) -> Value {
        Value::Time(Some(Timestamp {
            at,
            layout: TimeLayout::UtcTimestamp,
        }))
    }
    pub fn time_with_layout(at: DateTime<Utc>, layout: TimeLayout) -> Value {
        Value::Time(Some(Timestamp { at, layout }))
    }

    /// An absent value of the given kind. Used by message templates to fix a
    /// slot's type before any payload exists.
    pub fn absent(kind: ValueKind) -> Value {
        match kind {
            ValueKind::Raw => Value::Raw(None),
            ValueKind::Str => Value::Str(None),
            ValueKind::Int => Value::Int(None),
            ValueKind::Uint => Value::Uint(None),
            ValueKind::Float => Value::Float(None),
            ValueKind::Bool => Value::Bool(None),
            ValueKind::Time => Value::Time(None),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Raw(_) => ValueKind::Raw,
            Value::Str(_) => ValueKind::Str,
            Value::Int(_) => ValueKind::Int,
            Value::Uint(_) => ValueKind::Uint,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Time(_) => ValueKind::Time,
        }
    }

    pub fn is_absent(&self) -> bool {
        match self {
            Value::Raw(v) => v.is_none(),
            Value::Str(v) => v.is_none(),
            Value::Int(v) => v.is_none(),
            Value::Uint(v) => v.is_none(),
            Value::Float(v) => v.is_none(),
            Value::Bool(v) => v.is_none(),
            Value::Time(v) => v.is_none(),
        }
    }

    pub fn clear(&mut self) {
        *self = Value::absent(self.kind());
    }

    /// Replaces the payload with another value of the same kind. A kind
    /// mismatch is a schema violation and is rejected before it can reach
    /// serialization. A `Str` payload containing SOH is rejected for the
    /// same reason.
    pub fn set(&mut self, other: Value) -> Result<(), ValueError> {
        if self.kind() != other.kind() {
            return Err(ValueError::TypeMismatch {
                expected: self.kind(),
                got: other.kind(),
            });
        }
        if let Value::Str(Some(s)) = &other {
            if s.as_bytes().contains(&b'\x01') {
                return Err(ValueError::ContainsSoh);
            }
        }
        // keep the slot's declared time layout
        if let (Value::Time(Some(slot)), Value::Time(Some(incoming))) = (&*self, &other) {
            *self = Value::Time(Some(Timestamp {
                at: incoming.at,
                layout: slot.layout,
            }));
            return Ok(());
        }
        *self = other;
        Ok(())
    }

    /// The wire form of the payload, or `None` when absent. Absent values
    /// produce no bytes anywhere, not even an empty `tag=`.
    pub fn encode(&self) -> Option<Vec<u8>> {
        match self {
            Value::Raw(v) => v.clone(),
            Value::Str(v) => v.as_ref().map(|s| s.as_bytes().to_vec()),
            Value::Int(v) => v.map(|i| i.to_string().into_bytes()),
            Value::Uint(v) => v.map(|u| u.to_string().into_bytes()),
            Value::Float(v) => v.map(|f| f.to_string().into_bytes()),
            Value::Bool(v) => v.map(|b| if b { b"Y".to_vec() } else { b"N".to_vec() }),
            Value::Time(v) => v.map(|t| {
                let fmt = match t.layout {
                    TimeLayout::UtcTimestamp => TIME_FORMAT,
                    TimeLayout::UtcDateOnly => DATE_ONLY,
                    TimeLayout::UtcTimeOnly => TIME_ONLY,
                };
                t.at.format(fmt).to_string().into_bytes()
            }),
        }
    }

    /// Parses `bytes` into this value's kind, replacing the payload.
    pub fn decode(&mut self, bytes: &[u8]) -> Result<(), ValueError> {
        match self {
            Value::Raw(v) => {
                *v = Some(bytes.to_vec());
            }
            Value::Str(v) => {
                let s = std::str::from_utf8(bytes).map_err(|_| ValueError::OutOfRange)?;
                *v = Some(s.to_string());
            }
            Value::Int(v) => {
                let s = std::str::from_utf8(bytes).map_err(|_| ValueError::MalformedInt)?;
                *v = Some(s.parse().map_err(|_| ValueError::MalformedInt)?);
            }
            Value::Uint(v) => {
                let s = std::str::from_utf8(bytes).map_err(|_| ValueError::MalformedInt)?;
                *v = Some(s.parse().map_err(|_| ValueError::MalformedInt)?);
            }
            Value::Float(v) => {
                let s = std::str::from_utf8(bytes).map_err(|_| ValueError::MalformedFloat)?;
                *v = Some(s.parse().map_err(|_| ValueError::MalformedFloat)?);
            }
            Value::Bool(v) => {
                *v = match bytes {
                    b"Y" => Some(true),
                    b"N" => Some(false),
                    _ => return Err(ValueError::MalformedBool),
                };
            }
            Value::Time(v) => {
                let layout = v.map(|t| t.layout).unwrap_or_default();
                let s = std::str::from_utf8(bytes).map_err(|_| ValueError::MalformedTime)?;
                let at = parse_time(s, layout)?;
                *v = Some(Timestamp { at, layout });
            }
        }
        Ok(())
    }

    /// Human-readable rendering; empty for absent values.
    pub fn as_string(&self) -> String {
        self.encode()
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => *v,
            _ => None,
        }
    }
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Value::Uint(v) => *v,
            _ => None,
        }
    }
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => *v,
            _ => None,
        }
    }
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => *v,
            _ => None,
        }
    }
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => v.as_deref(),
            _ => None,
        }
    }
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(v) => v.map(|t| t.at),
            _ => None,
        }
    }
}

fn parse_time(s: &str, layout: TimeLayout) -> Result<DateTime<Utc>, ValueError> {
    match layout {
        TimeLayout::UtcTimestamp => NaiveDateTime::parse_from_str(s, TIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, TS_SECONDS))
            .map(|n| n.and_utc())
            .map_err(|_| ValueError::MalformedTime),
        TimeLayout::UtcDateOnly => NaiveDate::parse_from_str(s, DATE_ONLY)
            .map(|d| d.and_hms_opt(0, 0, 0).unwrap().and_utc())
            .map_err(|_| ValueError::MalformedTime),
        TimeLayout::UtcTimeOnly => NaiveTime::parse_from_str(s, TIME_ONLY)
            .map(|t| {
                Utc.from_utc_datetime(&NaiveDateTime::new(
                    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap(),
                    t,
                ))
            })
            .map_err(|_| ValueError::MalformedTime),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_absent_encodes_to_nothing() {
        for kind in [
            ValueKind::Raw,
            ValueKind::Str,
            ValueKind::Int,
            ValueKind::Uint,
            ValueKind::Float,
            ValueKind::Bool,
            ValueKind::Time,
        ] {
            let v = Value::absent(kind);
            assert!(v.is_absent());
            assert_eq!(v.encode(), None);
            assert_eq!(v.as_string(), "");
        }
    }

    #[test]
    fn test_absent_string_is_not_empty_string() {
        let absent = Value::Str(None);
        let empty = Value::str("");
        assert_ne!(absent, empty);
        assert_eq!(empty.encode(), Some(vec![]));
        assert_eq!(absent.encode(), None);
    }

    #[test]
    fn test_scalar_encodings() {
        assert_eq!(Value::int(-42).encode().unwrap(), b"-42");
        assert_eq!(Value::uint(7).encode().unwrap(), b"7");
        assert_eq!(Value::bool(true).encode().unwrap(), b"Y");
        assert_eq!(Value::bool(false).encode().unwrap(), b"N");
        assert_eq!(Value::float(10.5).encode().unwrap(), b"10.5");
        assert_eq!(Value::float(3.0).encode().unwrap(), b"3");
        assert_eq!(Value::str("CLIENT").encode().unwrap(), b"CLIENT");
        assert_eq!(Value::raw(&b"\x01\x02"[..]).encode().unwrap(), b"\x01\x02");
    }

    #[test]
    fn test_time_encoding_layouts() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_milli_opt(13, 5, 9, 250)
            .unwrap()
            .and_utc();
        assert_eq!(
            Value::time(at).encode().unwrap(),
            b"20240101-13:05:09.250"
        );
        assert_eq!(
            Value::time_with_layout(at, TimeLayout::UtcDateOnly)
                .encode()
                .unwrap(),
            b"20240101"
        );
        assert_eq!(
            Value::time_with_layout(at, TimeLayout::UtcTimeOnly)
                .encode()
                .unwrap(),
            b"13:05:09.250"
        );
    }

    #[test]
    fn test_decode_round_trip() {
        let mut v = Value::Time(None);
        v.decode(b"20240101-13:05:09.250").unwrap();
        assert_eq!(v.encode().unwrap(), b"20240101-13:05:09.250");

        let mut v = Value::Int(None);
        v.decode(b"-17").unwrap();
        assert_eq!(v.as_int(), Some(-17));

        let mut v = Value::Float(None);
        v.decode(b"0.890000").unwrap();
        assert_eq!(v.as_float(), Some(0.89));
    }

    #[test]
    fn test_decode_errors() {
        let mut v = Value::Int(None);
        assert_eq!(v.decode(b"12a"), Err(ValueError::MalformedInt));
        let mut v = Value::Uint(None);
        assert_eq!(v.decode(b"-1"), Err(ValueError::MalformedInt));
        let mut v = Value::Bool(None);
        assert_eq!(v.decode(b"X"), Err(ValueError::MalformedBool));
        let mut v = Value::Time(None);
        assert_eq!(v.decode(b"not-a-time"), Err(ValueError::MalformedTime));
        let mut v = Value::Float(None);
        assert_eq!(v.decode(b"ten"), Err(ValueError::MalformedFloat));
    }

    #[test]
    fn test_set_rejects_kind_change() {
        let mut v = Value::Str(None);
        assert!(v.set(Value::str("ok")).is_ok());
        assert_eq!(
            v.set(Value::int(1)),
            Err(ValueError::TypeMismatch {
                expected: ValueKind::Str,
                got: ValueKind::Int,
            })
        );
        assert_eq!(v.as_str(), Some("ok"));
    }

    #[test]
    fn test_set_rejects_soh_in_string() {
        let mut v = Value::Str(None);
        assert_eq!(
            v.set(Value::str("bad\x01value")),
            Err(ValueError::ContainsSoh)
        );
    }

    #[test]
    fn test_clear_keeps_kind() {
        let mut v = Value::uint(5);
        v.clear();
        assert!(v.is_absent());
        assert_eq!(v.kind(), ValueKind::Uint);
    }
}
