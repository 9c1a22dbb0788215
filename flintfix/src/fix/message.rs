//! The structured message model: an ordered tag tree with components and
//! repeating groups, plus its wire codec.
//!
//! A [`Message`] is three parts in wire order: a header [`Component`], body
//! items, and a trailer [`Component`]. Items are [`KeyValue`] fields,
//! repeating [`Group`]s, or inline [`Component`]s. The message doubles as
//! its own schema: slots are created with typed, absent [`Value`]s and
//! [`Message::parse`] fills them from raw bytes, while [`Message::encode`]
//! walks the tree in declaration order, computing BodyLength(9) and
//! CheckSum(10) on the way out.
//!
//! The session engine works on raw buffers for speed (see
//! [`crate::fix::decode`]); this model is the construction and inspection
//! API for everything that has structure.

use crate::fix::checksum::ChecksumWriter;
use crate::fix::generated::Tags;
use crate::fix::value::{Value, ValueError};
use std::io::Write;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("tag {tag}: {source}")]
    Value { tag: u32, source: ValueError },
    #[error("tag {tag} does not belong to this message's template")]
    UnexpectedTag { tag: u32 },
    #[error("group {count_tag} declared {declared} entries, found {found}")]
    GroupCountMismatch {
        count_tag: u32,
        declared: usize,
        found: usize,
    },
    #[error("required header tag {tag} missing")]
    MissingRequiredTag { tag: u32 },
    #[error("message truncated at byte {at}")]
    Truncated { at: usize },
}

#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
    #[error("body slot {index} holds a {expected}, cannot replace with a {got}")]
    SlotKindMismatch {
        index: usize,
        expected: &'static str,
        got: &'static str,
    },
    #[error("body slot {index} out of bounds")]
    OutOfBounds { index: usize },
    #[error("no header slot for tag {tag}")]
    NoHeaderSlot { tag: u32 },
    #[error(transparent)]
    Value(#[from] ValueError),
}

#[derive(Debug, Error, PartialEq)]
pub enum EncodeError {
    #[error("header has no BeginString(8) slot")]
    MissingBeginString,
    #[error("header has no MsgType(35) slot")]
    MissingMsgType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub tag: u32,
    pub value: Value,
}

impl KeyValue {
    pub fn new(tag: impl Into<u32>, value: Value) -> KeyValue {
        KeyValue {
            tag: tag.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Field(KeyValue),
    Group(Group),
    Component(Component),
}

impl Item {
    pub fn field(tag: impl Into<u32>, value: Value) -> Item {
        Item::Field(KeyValue::new(tag, value))
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Item::Field(_) => "field",
            Item::Group(_) => "group",
            Item::Component(_) => "component",
        }
    }
}

/// An inline fragment of ordered items. Components add structure to the
/// model but no framing on the wire; their items serialize at the insertion
/// point as if declared directly.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Component {
    items: Vec<Item>,
}

impl Component {
    pub fn new(items: Vec<Item>) -> Component {
        Component { items }
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn items_mut(&mut self) -> &mut Vec<Item> {
        &mut self.items
    }

    fn find_value_mut(&mut self, tag: u32) -> Option<&mut Value> {
        for item in &mut self.items {
            match item {
                Item::Field(kv) if kv.tag == tag => return Some(&mut kv.value),
                Item::Component(c) => {
                    if let Some(v) = c.find_value_mut(tag) {
                        return Some(v);
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn find_value(&self, tag: u32) -> Option<&Value> {
        for item in &self.items {
            match item {
                Item::Field(kv) if kv.tag == tag => return Some(&kv.value),
                Item::Component(c) => {
                    if let Some(v) = c.find_value(tag) {
                        return Some(v);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

/// A repeating group rooted at its NoXxx count tag.
///
/// The template describes the ordered items of one entry; the delimiter is
/// the tag that opens each entry on the wire. It defaults to the template's
/// first field but is stored explicitly, since a trailing optional tag of
/// one entry could otherwise be mistaken for the start of the next.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    count_tag: u32,
    delimiter: u32,
    template: Vec<Item>,
    entries: Vec<Vec<Item>>,
}

impl Group {
    pub fn new(count_tag: impl Into<u32>, template: Vec<Item>) -> Group {
        let delimiter = first_tag(&template).unwrap_or(0);
        Group {
            count_tag: count_tag.into(),
            delimiter,
            template,
            entries: Vec::new(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<u32>) -> Group {
        self.delimiter = delimiter.into();
        self
    }

    pub fn count_tag(&self) -> u32 {
        self.count_tag
    }

    pub fn delimiter(&self) -> u32 {
        self.delimiter
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a fresh entry cloned from the template and returns it for
    /// filling in.
    pub fn add_entry(&mut self) -> &mut Vec<Item> {
        self.entries.push(self.template.clone());
        self.entries.last_mut().unwrap()
    }

    pub fn entry(&self, i: usize) -> Option<&[Item]> {
        self.entries.get(i).map(|e| e.as_slice())
    }

    pub fn entry_mut(&mut self, i: usize) -> Option<&mut Vec<Item>> {
        self.entries.get_mut(i)
    }

    pub fn entries(&self) -> &[Vec<Item>] {
        &self.entries
    }
}

fn first_tag(items: &[Item]) -> Option<u32> {
    for item in items {
        match item {
            Item::Field(kv) => return Some(kv.tag),
            Item::Group(g) => return Some(g.count_tag),
            Item::Component(c) => {
                if let Some(t) = first_tag(c.items()) {
                    return Some(t);
                }
            }
        }
    }
    None
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    header: Component,
    body: Vec<Item>,
    trailer: Component,
}

impl Message {
    pub fn new() -> Message {
        Default::default()
    }

    /// A message with the standard FIX 4.4 header and trailer templates.
    /// BodyLength and CheckSum slots exist for parsing; on encode they are
    /// computed, never read.
    pub fn standard(begin_string: &str, msg_type: char) -> Message {
        let header = Component::new(vec![
            Item::field(Tags::BeginString, Value::str(begin_string)),
            Item::field(Tags::BodyLength, Value::Uint(None)),
            Item::field(Tags::MsgType, Value::str(msg_type.to_string())),
            Item::field(Tags::SenderCompID, Value::Str(None)),
            Item::field(Tags::TargetCompID, Value::Str(None)),
            Item::field(Tags::MsgSeqNum, Value::Uint(None)),
            Item::field(Tags::PossDupFlag, Value::Bool(None)),
            Item::field(Tags::PossResend, Value::Bool(None)),
            Item::field(Tags::SendingTime, Value::Time(None)),
            Item::field(Tags::OrigSendingTime, Value::Time(None)),
        ]);
        let trailer = Component::new(vec![Item::field(Tags::CheckSum, Value::Str(None))]);
        Message {
            header,
            body: Vec::new(),
            trailer,
        }
    }

    pub fn set_header(&mut self, header: Component) {
        self.header = header;
    }

    pub fn set_trailer(&mut self, trailer: Component) {
        self.trailer = trailer;
    }

    pub fn set_body(&mut self, items: Vec<Item>) {
        self.body = items;
    }

    pub fn header(&self) -> &Component {
        &self.header
    }

    pub fn trailer(&self) -> &Component {
        &self.trailer
    }

    pub fn body(&self) -> &[Item] {
        &self.body
    }

    pub fn get(&self, i: usize) -> Option<&Item> {
        self.body.get(i)
    }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Item> {
        self.body.get_mut(i)
    }

    /// Replaces body slot `i`. The slot keeps its kind for the life of the
    /// message; swapping a field for a group (or any other kind change) is
    /// rejected before it can reach the wire.
    pub fn set(&mut self, i: usize, item: Item) -> Result<(), ModelError> {
        let slot = self
            .body
            .get_mut(i)
            .ok_or(ModelError::OutOfBounds { index: i })?;
        if std::mem::discriminant(slot) != std::mem::discriminant(&item) {
            return Err(ModelError::SlotKindMismatch {
                index: i,
                expected: slot.kind_name(),
                got: item.kind_name(),
            });
        }
        *slot = item;
        Ok(())
    }

    /// Sets a header field by tag. The slot must exist in the header
    /// template; the engine relies on this for MsgSeqNum, comp ids and
    /// SendingTime.
    pub fn set_header_field(&mut self, tag: impl Into<u32>, value: Value) -> Result<(), ModelError> {
        let tag = tag.into();
        let slot = self
            .header
            .find_value_mut(tag)
            .ok_or(ModelError::NoHeaderSlot { tag })?;
        slot.set(value)?;
        Ok(())
    }

    pub fn header_field(&self, tag: impl Into<u32>) -> Option<&Value> {
        self.header.find_value(tag.into())
    }

    /// Finds a body field by tag, searching components inline but not
    /// descending into group entries.
    pub fn body_field(&self, tag: impl Into<u32>) -> Option<&Value> {
        fn find<'a>(items: &'a [Item], tag: u32) -> Option<&'a Value> {
            for item in items {
                match item {
                    Item::Field(kv) if kv.tag == tag => return Some(&kv.value),
                    Item::Component(c) => {
                        if let Some(v) = find(c.items(), tag) {
                            return Some(v);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        find(&self.body, tag.into())
    }

    pub fn body_field_mut(&mut self, tag: impl Into<u32>) -> Option<&mut Value> {
        fn find<'a>(items: &'a mut [Item], tag: u32) -> Option<&'a mut Value> {
            for item in items {
                match item {
                    Item::Field(kv) if kv.tag == tag => return Some(&mut kv.value),
                    Item::Component(c) => {
                        if let Some(v) = find(c.items_mut(), tag) {
                            return Some(v);
                        }
                    }
                    _ => {}
                }
            }
            None
        }
        find(&mut self.body, tag.into())
    }

    pub fn msg_type(&self) -> Option<char> {
        self.header_field(Tags::MsgType)
            .and_then(|v| v.as_str())
            .and_then(|s| s.chars().next())
    }

    /// Every present field in wire order, flattened through components and
    /// group entries. Group count tags appear as synthesized pairs.
    pub fn fields(&self) -> Vec<(u32, Vec<u8>)> {
        let mut out = Vec::new();
        collect_fields(self.header.items(), &mut out);
        collect_fields(&self.body, &mut out);
        collect_fields(self.trailer.items(), &mut out);
        out
    }

    /// Serializes to wire bytes. Walks header items (BeginString and
    /// BodyLength form the envelope), body, then trailer; BodyLength covers
    /// everything between its own SOH and the CheckSum field, and CheckSum
    /// is the running byte sum mod 256, three digits.
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        let begin_string = self
            .header
            .find_value(Tags::BeginString.into())
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .ok_or(EncodeError::MissingBeginString)?;
        self.header
            .find_value(Tags::MsgType.into())
            .filter(|v| !v.is_absent())
            .ok_or(EncodeError::MissingMsgType)?;

        let mut inner: Vec<u8> = Vec::with_capacity(256);
        write_items_except(self.header.items(), &mut inner, &[8, 9]);
        write_items_except(&self.body, &mut inner, &[]);
        write_items_except(self.trailer.items(), &mut inner, &[10]);

        let mut out = Vec::with_capacity(inner.len() + 32);
        let mut w = ChecksumWriter::new(&mut out);
        let _ = write!(w, "8={}\x019={}\x01", begin_string, inner.len());
        let _ = w.write_all(&inner);
        let checksum = w.checksum();
        let _ = write!(out, "10={:0>3}\x01", checksum);
        Ok(out)
    }

    /// Parses raw wire bytes into this message's slots. The message's own
    /// header/body/trailer layout is the schema: fields fill matching slots
    /// in order, count tags open their group, and anything that fits no
    /// slot is an error.
    pub fn parse(&mut self, raw: &[u8]) -> Result<(), ParseError> {
        let records = split_records(raw)?;
        let mut at = 0;

        // header runs until the first tag that has no header slot
        while at < records.len() {
            let (tag, value) = &records[at];
            match self.header.find_value_mut(*tag) {
                Some(slot) => {
                    slot.decode(value).map_err(|source| ParseError::Value {
                        tag: *tag,
                        source,
                    })?;
                    at += 1;
                }
                None => break,
            }
        }

        for required in [Tags::BeginString, Tags::BodyLength, Tags::MsgType] {
            let tag = u32::from(required);
            if self
                .header
                .find_value(tag)
                .map(|v| v.is_absent())
                .unwrap_or(true)
            {
                return Err(ParseError::MissingRequiredTag { tag });
            }
        }

        at = parse_items(&mut self.body, &records, at)?;

        while at < records.len() {
            let (tag, value) = &records[at];
            match self.trailer.find_value_mut(*tag) {
                Some(slot) => {
                    slot.decode(value).map_err(|source| ParseError::Value {
                        tag: *tag,
                        source,
                    })?;
                    at += 1;
                }
                None => return Err(ParseError::UnexpectedTag { tag: *tag }),
            }
        }

        Ok(())
    }
}

fn collect_fields(items: &[Item], out: &mut Vec<(u32, Vec<u8>)>) {
    for item in items {
        match item {
            Item::Field(kv) => {
                if let Some(bytes) = kv.value.encode() {
                    out.push((kv.tag, bytes));
                }
            }
            Item::Component(c) => collect_fields(c.items(), out),
            Item::Group(g) => {
                if !g.is_empty() {
                    out.push((g.count_tag, g.len().to_string().into_bytes()));
                    for entry in g.entries() {
                        collect_fields(entry, out);
                    }
                }
            }
        }
    }
}

fn write_items_except(items: &[Item], out: &mut Vec<u8>, skip: &[u32]) {
    let mut fields = Vec::new();
    collect_fields(items, &mut fields);
    for (tag, bytes) in fields {
        if skip.contains(&tag) {
            continue;
        }
        let _ = write!(out, "{}=", tag);
        out.extend_from_slice(&bytes);
        out.push(b'\x01');
    }
}

type Record<'a> = (u32, &'a [u8]);

fn split_records(raw: &[u8]) -> Result<Vec<Record<'_>>, ParseError> {
    let mut records = Vec::new();
    let mut at = 0;
    while at < raw.len() {
        let eq = raw[at..]
            .iter()
            .position(|b| *b == b'=')
            .ok_or(ParseError::Truncated { at })?
            + at;
        let tag_bytes = &raw[at..eq];
        if tag_bytes.is_empty() || !tag_bytes.iter().all(|b| b.is_ascii_digit()) {
            return Err(ParseError::Truncated { at });
        }
        let tag: u32 = std::str::from_utf8(tag_bytes)
            .unwrap()
            .parse()
            .map_err(|_| ParseError::Truncated { at })?;
        let soh = raw[eq + 1..]
            .iter()
            .position(|b| *b == b'\x01')
            .ok_or(ParseError::Truncated { at: eq + 1 })?
            + eq
            + 1;
        records.push((tag, &raw[eq + 1..soh]));
        at = soh + 1;
    }
    Ok(records)
}

// Walks template items against the record stream starting at `at`; returns
// the index of the first unconsumed record. A slot whose tag never shows up
// simply stays absent.
fn parse_items(
    items: &mut [Item],
    records: &[Record<'_>],
    mut at: usize,
) -> Result<usize, ParseError> {
    let mut slot = 0;
    while at < records.len() && slot < items.len() {
        let (tag, value) = records[at];
        // find the next slot this record can fill
        let found = items[slot..].iter().position(|item| match item {
            Item::Field(kv) => kv.tag == tag,
            Item::Group(g) => g.count_tag == tag,
            Item::Component(c) => component_has_tag(c, tag),
        });
        let Some(offset) = found else {
            break;
        };
        slot += offset;
        match &mut items[slot] {
            Item::Field(kv) => {
                kv.value
                    .decode(value)
                    .map_err(|source| ParseError::Value { tag, source })?;
                at += 1;
            }
            Item::Group(g) => {
                at = parse_group(g, records, at)?;
            }
            Item::Component(c) => {
                at = parse_items(c.items_mut(), records, at)?;
            }
        }
        slot += 1;
    }
    Ok(at)
}

fn component_has_tag(c: &Component, tag: u32) -> bool {
    c.items().iter().any(|item| match item {
        Item::Field(kv) => kv.tag == tag,
        Item::Group(g) => g.count_tag == tag,
        Item::Component(inner) => component_has_tag(inner, tag),
    })
}

fn parse_group(g: &mut Group, records: &[Record<'_>], mut at: usize) -> Result<usize, ParseError> {
    let (count_tag, count_bytes) = records[at];
    debug_assert_eq!(count_tag, g.count_tag);
    let declared: usize = std::str::from_utf8(count_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ParseError::Value {
            tag: count_tag,
            source: ValueError::MalformedInt,
        })?;
    at += 1;

    g.entries.clear();
    for _ in 0..declared {
        if at >= records.len() || records[at].0 != g.delimiter {
            return Err(ParseError::GroupCountMismatch {
                count_tag: g.count_tag,
                declared,
                found: g.entries.len(),
            });
        }
        let mut entry = g.template.clone();
        at = parse_entry(&mut entry, records, at, g.delimiter)?;
        g.entries.push(entry);
    }

    // one more delimiter means the count undersold the entries
    if at < records.len() && records[at].0 == g.delimiter {
        return Err(ParseError::GroupCountMismatch {
            count_tag: g.count_tag,
            declared,
            found: declared + 1,
        });
    }

    Ok(at)
}

// Like parse_items, but stops at the delimiter once this entry has already
// consumed it, so a trailing optional field that shares the delimiter tag
// cannot swallow the next entry.
fn parse_entry(
    items: &mut [Item],
    records: &[Record<'_>],
    mut at: usize,
    delimiter: u32,
) -> Result<usize, ParseError> {
    let mut slot = 0;
    let mut seen_delimiter = false;
    while at < records.len() && slot < items.len() {
        let (tag, value) = records[at];
        if tag == delimiter && seen_delimiter {
            break;
        }
        let found = items[slot..].iter().position(|item| match item {
            Item::Field(kv) => kv.tag == tag,
            Item::Group(g) => g.count_tag == tag,
            Item::Component(c) => component_has_tag(c, tag),
        });
        let Some(offset) = found else {
            break;
        };
        slot += offset;
        match &mut items[slot] {
            Item::Field(kv) => {
                kv.value
                    .decode(value)
                    .map_err(|source| ParseError::Value { tag, source })?;
                at += 1;
            }
            Item::Group(nested) => {
                at = parse_group(nested, records, at)?;
            }
            Item::Component(c) => {
                at = parse_items(c.items_mut(), records, at)?;
            }
        }
        if tag == delimiter {
            seen_delimiter = true;
        }
        slot += 1;
    }
    Ok(at)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fix::generated::MsgType;
    use crate::fix::value::ValueKind;
    use chrono::NaiveDate;

    fn logon_fixture() -> Message {
        let mut msg = Message::standard("FIX.4.4", MsgType::LOGON.into());
        msg.set_header_field(Tags::SenderCompID, Value::str("CLIENT"))
            .unwrap();
        msg.set_header_field(Tags::TargetCompID, Value::str("SERVER"))
            .unwrap();
        msg.set_header_field(Tags::MsgSeqNum, Value::uint(1)).unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc();
        msg.set_header_field(Tags::SendingTime, Value::time(at))
            .unwrap();
        msg.set_body(vec![
            Item::field(Tags::EncryptMethod, Value::uint(0)),
            Item::field(Tags::HeartBtInt, Value::uint(30)),
        ]);
        msg
    }

    #[test]
    fn test_encode_logon_envelope() {
        let bytes = logon_fixture().encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();

        assert!(text.starts_with("8=FIX.4.4\x019="));
        assert_eq!(&bytes[bytes.len() - 7..bytes.len() - 4], b"10=");
        assert_eq!(bytes[bytes.len() - 1], b'\x01');

        // BodyLength spans from after its own SOH through the SOH before 10=
        let len_start = "8=FIX.4.4\x019=".len();
        let len_end = bytes[len_start..].iter().position(|b| *b == 1).unwrap() + len_start;
        let declared: usize = text[len_start..len_end].parse().unwrap();
        let body = &bytes[len_end + 1..bytes.len() - 7];
        assert_eq!(declared, body.len());

        assert!(text.contains("35=A\x0149=CLIENT\x0156=SERVER\x0134=1\x01"));
        assert!(text.contains("52=20240101-00:00:00.000\x0198=0\x01108=30\x01"));
    }

    #[test]
    fn test_encode_checksum_matches_spec_sum() {
        let bytes = logon_fixture().encode().unwrap();
        let declared: u32 = std::str::from_utf8(&bytes[bytes.len() - 4..bytes.len() - 1])
            .unwrap()
            .parse()
            .unwrap();
        let computed: u32 = bytes[..bytes.len() - 7]
            .iter()
            .map(|b| *b as u32)
            .sum::<u32>()
            % 256;
        assert_eq!(declared, computed);
    }

    #[test]
    fn test_absent_fields_leave_no_bytes() {
        let mut msg = logon_fixture();
        msg.set_body(vec![
            Item::field(Tags::EncryptMethod, Value::uint(0)),
            Item::field(Tags::HeartBtInt, Value::uint(30)),
            Item::field(Tags::Username, Value::Str(None)),
            Item::field(Tags::Password, Value::Str(None)),
        ]);
        let bytes = msg.encode().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(!text.contains("553="));
        assert!(!text.contains("554="));
    }

    #[test]
    fn test_parse_round_trips_bytes() {
        let bytes = logon_fixture().encode().unwrap();
        let mut parsed = Message::standard("FIX.4.4", MsgType::LOGON.into());
        parsed.set_body(vec![
            Item::field(Tags::EncryptMethod, Value::Uint(None)),
            Item::field(Tags::HeartBtInt, Value::Uint(None)),
        ]);
        parsed.parse(&bytes).unwrap();

        assert_eq!(parsed.msg_type(), Some('A'));
        assert_eq!(
            parsed.header_field(Tags::SenderCompID).unwrap().as_str(),
            Some("CLIENT")
        );
        assert_eq!(
            parsed.body_field(Tags::HeartBtInt).unwrap().as_uint(),
            Some(30)
        );

        // byte-for-byte: re-encoding reproduces the original stream
        assert_eq!(parsed.encode().unwrap(), bytes);
    }

    fn md_template() -> Message {
        let mut msg = Message::standard("FIX.4.4", MsgType::MARKET_DATA_SNAPSHOT_FULL_REFRESH.into());
        msg.set_body(vec![
            Item::field(Tags::MDReqID, Value::Str(None)),
            Item::field(Tags::Symbol, Value::Str(None)),
            Item::Group(Group::new(
                Tags::NoMDEntries,
                vec![
                    Item::field(Tags::MDEntryType, Value::Str(None)),
                    Item::field(Tags::MDEntryPx, Value::Float(None)),
                    Item::field(Tags::MDEntrySize, Value::Float(None)),
                ],
            )),
        ]);
        msg
    }

    #[test]
    fn test_group_encode_and_parse() {
        let mut msg = md_template();
        msg.set_header_field(Tags::SenderCompID, Value::str("MD")).unwrap();
        msg.set_header_field(Tags::TargetCompID, Value::str("CLIENT"))
            .unwrap();
        msg.set_header_field(Tags::MsgSeqNum, Value::uint(9)).unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_milli_opt(10, 0, 0, 1)
            .unwrap()
            .and_utc();
        msg.set_header_field(Tags::SendingTime, Value::time(at))
            .unwrap();
        msg.body_field_mut(Tags::Symbol)
            .unwrap()
            .set(Value::str("EURUSD"))
            .unwrap();
        if let Some(Item::Group(g)) = msg.get_mut(2) {
            let e = g.add_entry();
            e[0] = Item::field(Tags::MDEntryType, Value::str("0"));
            e[1] = Item::field(Tags::MDEntryPx, Value::float(1.0845));
            let e = g.add_entry();
            e[0] = Item::field(Tags::MDEntryType, Value::str("1"));
            e[1] = Item::field(Tags::MDEntryPx, Value::float(1.0847));
            e[2] = Item::field(Tags::MDEntrySize, Value::float(500000.0));
        }

        let bytes = msg.encode().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.contains("268=2\x01269=0\x01270=1.0845\x01269=1\x01270=1.0847\x01271=500000\x01"));

        let mut parsed = md_template();
        parsed.parse(&bytes).unwrap();
        if let Some(Item::Group(g)) = parsed.get(2) {
            assert_eq!(g.len(), 2);
            assert!(matches!(
                &g.entry(0).unwrap()[2],
                Item::Field(kv) if kv.value.is_absent()
            ));
        } else {
            panic!("slot 2 should be the entries group");
        }
        assert_eq!(parsed.encode().unwrap(), bytes);
    }

    #[test]
    fn test_group_count_mismatch() {
        let mut raw = logon_fixture().encode().unwrap();
        // splice in a group that declares two entries but carries one
        let text = String::from_utf8(raw.clone()).unwrap();
        let body_at = text.find("98=0").unwrap();
        raw.truncate(body_at);
        raw.extend_from_slice(b"268=2\x01269=0\x01270=1.5\x0110=000\x01");

        let mut template = Message::standard("FIX.4.4", MsgType::LOGON.into());
        template.set_body(vec![Item::Group(Group::new(
            Tags::NoMDEntries,
            vec![
                Item::field(Tags::MDEntryType, Value::Str(None)),
                Item::field(Tags::MDEntryPx, Value::Float(None)),
            ],
        ))]);
        match template.parse(&raw) {
            Err(ParseError::GroupCountMismatch {
                count_tag: 268,
                declared: 2,
                found: 1,
            }) => {}
            other => panic!("expected count mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_out_of_template_tag_rejected() {
        let bytes = logon_fixture().encode().unwrap();
        let mut template = Message::standard("FIX.4.4", MsgType::LOGON.into());
        // no body slots at all: 98 fits nothing and is not a trailer tag
        match template.parse(&bytes) {
            Err(ParseError::UnexpectedTag { tag: 98 }) => {}
            other => panic!("expected unexpected-tag, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_input() {
        let mut bytes = logon_fixture().encode().unwrap();
        bytes.truncate(bytes.len() - 3);
        let mut template = Message::standard("FIX.4.4", MsgType::LOGON.into());
        assert!(matches!(
            template.parse(&bytes),
            Err(ParseError::Truncated { .. })
        ));
    }

    #[test]
    fn test_positional_set_rejects_kind_change() {
        let mut msg = md_template();
        let err = msg
            .set(2, Item::field(Tags::Text, Value::Str(None)))
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::SlotKindMismatch {
                index: 2,
                expected: "group",
                got: "field",
            }
        );
        assert!(msg.set(0, Item::field(Tags::MDReqID, Value::str("x"))).is_ok());
        assert!(matches!(
            msg.set(9, Item::field(Tags::Text, Value::Str(None))),
            Err(ModelError::OutOfBounds { index: 9 })
        ));
    }

    #[test]
    fn test_component_inlines_on_wire() {
        let mut msg = Message::standard("FIX.4.4", MsgType::ORDER_SINGLE.into());
        msg.set_header_field(Tags::SenderCompID, Value::str("A")).unwrap();
        msg.set_header_field(Tags::TargetCompID, Value::str("B")).unwrap();
        msg.set_header_field(Tags::MsgSeqNum, Value::uint(2)).unwrap();
        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(8, 30, 0)
            .unwrap()
            .and_utc();
        msg.set_header_field(Tags::SendingTime, Value::time(at)).unwrap();
        msg.set_body(vec![
            Item::field(Tags::ClOrdID, Value::str("ord-1")),
            Item::Component(Component::new(vec![
                Item::field(Tags::Symbol, Value::str("MSFT")),
                Item::field(Tags::SecurityID, Value::Str(None)),
            ])),
            Item::field(Tags::Side, Value::str("1")),
        ]);
        let text = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(text.contains("11=ord-1\x0155=MSFT\x0154=1\x01"));
    }

    #[test]
    fn test_value_level_equality_after_round_trip() {
        let msg = logon_fixture();
        let bytes = msg.encode().unwrap();
        let mut parsed = Message::standard("FIX.4.4", MsgType::LOGON.into());
        parsed.set_body(vec![
            Item::field(Tags::EncryptMethod, Value::Uint(None)),
            Item::field(Tags::HeartBtInt, Value::Uint(None)),
        ]);
        parsed.parse(&bytes).unwrap();
        // body and every header field the original had present must match
        assert_eq!(parsed.body(), msg.body());
        for tag in [49u32, 56, 34, 52, 35] {
            assert_eq!(
                parsed.header_field(tag),
                msg.header_field(tag),
                "tag {tag}"
            );
        }
    }

    #[test]
    fn test_standard_slots_are_typed() {
        let msg = Message::standard("FIX.4.4", MsgType::HEARTBEAT.into());
        assert_eq!(
            msg.header_field(Tags::MsgSeqNum).unwrap().kind(),
            ValueKind::Uint
        );
        assert_eq!(
            msg.header_field(Tags::SendingTime).unwrap().kind(),
            ValueKind::Time
        );
    }
}
