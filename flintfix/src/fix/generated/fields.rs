#![allow(non_camel_case_types, dead_code)]
#![allow(clippy::upper_case_acronyms)]

use crate::fix::decode::DecodeError;

pub fn is_session_message(msg_type: char) -> bool {
    matches!(msg_type, '0' | '1' | '2' | '3' | '4' | '5' | 'A' | 'j')
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tags {
    Account = 1,
    AvgPx = 6,
    BeginSeqNo = 7,
    BeginString = 8,
    BodyLength = 9,
    CheckSum = 10,
    ClOrdID = 11,
    CumQty = 14,
    Currency = 15,
    EndSeqNo = 16,
    ExecID = 17,
    ExecInst = 18,
    HandlInst = 21,
    SecurityIDSource = 22,
    LastPx = 31,
    LastQty = 32,
    MsgSeqNum = 34,
    MsgType = 35,
    NewSeqNo = 36,
    OrderID = 37,
    OrderQty = 38,
    OrdStatus = 39,
    OrdType = 40,
    OrigClOrdID = 41,
    PossDupFlag = 43,
    Price = 44,
    RefSeqNum = 45,
    SecurityID = 48,
    SenderCompID = 49,
    SenderSubID = 50,
    SendingTime = 52,
    Side = 54,
    Symbol = 55,
    TargetCompID = 56,
    TargetSubID = 57,
    Text = 58,
    TimeInForce = 59,
    TransactTime = 60,
    Signature = 89,
    SecureDataLen = 90,
    SecureData = 91,
    SignatureLength = 93,
    RawDataLength = 95,
    RawData = 96,
    PossResend = 97,
    EncryptMethod = 98,
    StopPx = 99,
    CxlRejReason = 102,
    OrdRejReason = 103,
    HeartBtInt = 108,
    TestReqID = 112,
    OnBehalfOfCompID = 115,
    OnBehalfOfSubID = 116,
    OrigSendingTime = 122,
    GapFillFlag = 123,
    DeliverToCompID = 128,
    DeliverToSubID = 129,
    ResetSeqNumFlag = 141,
    NoRelatedSym = 146,
    ExecType = 150,
    LeavesQty = 151,
    MDReqID = 262,
    SubscriptionRequestType = 263,
    MarketDepth = 264,
    MDUpdateType = 265,
    NoMDEntryTypes = 267,
    NoMDEntries = 268,
    MDEntryType = 269,
    MDEntryPx = 270,
    MDEntrySize = 271,
    MDEntryTime = 273,
    MDReqRejReason = 281,
    EncodedTextLen = 354,
    EncodedText = 355,
    LastMsgSeqNumProcessed = 369,
    RefTagID = 371,
    RefMsgType = 372,
    SessionRejectReason = 373,
    MaxMessageSize = 383,
    NoMsgTypes = 384,
    MsgDirection = 385,
    CxlRejResponseTo = 434,
    PartyIDSource = 447,
    PartyID = 448,
    PartyRole = 452,
    NoPartyIDs = 453,
    Username = 553,
    Password = 554,
    NoHops = 627,
    HopCompID = 628,
    HopSendingTime = 629,
    HopRefID = 630,
    NextExpectedMsgSeqNum = 789,
}
impl TryFrom<u32> for Tags {
    type Error = DecodeError;
    fn try_from(u: u32) -> Result<Self, Self::Error> {
        match u {
            1 => Ok(Tags::Account),
            6 => Ok(Tags::AvgPx),
            7 => Ok(Tags::BeginSeqNo),
            8 => Ok(Tags::BeginString),
            9 => Ok(Tags::BodyLength),
            10 => Ok(Tags::CheckSum),
            11 => Ok(Tags::ClOrdID),
            14 => Ok(Tags::CumQty),
            15 => Ok(Tags::Currency),
            16 => Ok(Tags::EndSeqNo),
            17 => Ok(Tags::ExecID),
            18 => Ok(Tags::ExecInst),
            21 => Ok(Tags::HandlInst),
            22 => Ok(Tags::SecurityIDSource),
            31 => Ok(Tags::LastPx),
            32 => Ok(Tags::LastQty),
            34 => Ok(Tags::MsgSeqNum),
            35 => Ok(Tags::MsgType),
            36 => Ok(Tags::NewSeqNo),
            37 => Ok(Tags::OrderID),
            38 => Ok(Tags::OrderQty),
            39 => Ok(Tags::OrdStatus),
            40 => Ok(Tags::OrdType),
            41 => Ok(Tags::OrigClOrdID),
            43 => Ok(Tags::PossDupFlag),
            44 => Ok(Tags::Price),
            45 => Ok(Tags::RefSeqNum),
            48 => Ok(Tags::SecurityID),
            49 => Ok(Tags::SenderCompID),
            50 => Ok(Tags::SenderSubID),
            52 => Ok(Tags::SendingTime),
            54 => Ok(Tags::Side),
            55 => Ok(Tags::Symbol),
            56 => Ok(Tags::TargetCompID),
            57 => Ok(Tags::TargetSubID),
            58 => Ok(Tags::Text),
            59 => Ok(Tags::TimeInForce),
            60 => Ok(Tags::TransactTime),
            89 => Ok(Tags::Signature),
            90 => Ok(Tags::SecureDataLen),
            91 => Ok(Tags::SecureData),
            93 => Ok(Tags::SignatureLength),
            95 => Ok(Tags::RawDataLength),
            96 => Ok(Tags::RawData),
            97 => Ok(Tags::PossResend),
            98 => Ok(Tags::EncryptMethod),
            99 => Ok(Tags::StopPx),
            102 => Ok(Tags::CxlRejReason),
            103 => Ok(Tags::OrdRejReason),
            108 => Ok(Tags::HeartBtInt),
            112 => Ok(Tags::TestReqID),
            115 => Ok(Tags::OnBehalfOfCompID),
            116 => Ok(Tags::OnBehalfOfSubID),
            122 => Ok(Tags::OrigSendingTime),
            123 => Ok(Tags::GapFillFlag),
            128 => Ok(Tags::DeliverToCompID),
            129 => Ok(Tags::DeliverToSubID),
            141 => Ok(Tags::ResetSeqNumFlag),
            146 => Ok(Tags::NoRelatedSym),
            150 => Ok(Tags::ExecType),
            151 => Ok(Tags::LeavesQty),
            262 => Ok(Tags::MDReqID),
            263 => Ok(Tags::SubscriptionRequestType),
            264 => Ok(Tags::MarketDepth),
            265 => Ok(Tags::MDUpdateType),
            267 => Ok(Tags::NoMDEntryTypes),
            268 => Ok(Tags::NoMDEntries),
            269 => Ok(Tags::MDEntryType),
            270 => Ok(Tags::MDEntryPx),
            271 => Ok(Tags::MDEntrySize),
            273 => Ok(Tags::MDEntryTime),
            281 => Ok(Tags::MDReqRejReason),
            354 => Ok(Tags::EncodedTextLen),
            355 => Ok(Tags::EncodedText),
            369 => Ok(Tags::LastMsgSeqNumProcessed),
            371 => Ok(Tags::RefTagID),
            372 => Ok(Tags::RefMsgType),
            373 => Ok(Tags::SessionRejectReason),
            383 => Ok(Tags::MaxMessageSize),
            384 => Ok(Tags::NoMsgTypes),
            385 => Ok(Tags::MsgDirection),
            434 => Ok(Tags::CxlRejResponseTo),
            447 => Ok(Tags::PartyIDSource),
            448 => Ok(Tags::PartyID),
            452 => Ok(Tags::PartyRole),
            453 => Ok(Tags::NoPartyIDs),
            553 => Ok(Tags::Username),
            554 => Ok(Tags::Password),
            627 => Ok(Tags::NoHops),
            628 => Ok(Tags::HopCompID),
            629 => Ok(Tags::HopSendingTime),
            630 => Ok(Tags::HopRefID),
            789 => Ok(Tags::NextExpectedMsgSeqNum),
            _ => Err(DecodeError::UnknownTag(u)),
        }
    }
}
impl From<Tags> for u32 {
    fn from(value: Tags) -> u32 {
        value as isize as u32
    }
}

// Maps a data-length tag to the raw-data tag whose value it sizes. Raw data
// may contain SOH, so the scanner must skip it by length instead of scanning.
pub fn get_data_ref(tag: u32) -> Option<u32> {
    match tag {
        93 => Some(89),
        90 => Some(91),
        95 => Some(96),
        354 => Some(355),
        _ => None,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    HEARTBEAT = '0' as isize,
    TEST_REQUEST = '1' as isize,
    RESEND_REQUEST = '2' as isize,
    REJECT = '3' as isize,
    SEQUENCE_RESET = '4' as isize,
    LOGOUT = '5' as isize,
    INDICATION_OF_INTEREST = '6' as isize,
    ADVERTISEMENT = '7' as isize,
    EXECUTION_REPORT = '8' as isize,
    ORDER_CANCEL_REJECT = '9' as isize,
    LOGON = 'A' as isize,
    NEWS = 'B' as isize,
    MASS_QUOTE_ACKNOWLEDGEMENT = 'b' as isize,
    EMAIL = 'C' as isize,
    SECURITY_DEFINITION_REQUEST = 'c' as isize,
    ORDER_SINGLE = 'D' as isize,
    SECURITY_DEFINITION = 'd' as isize,
    ORDER_LIST = 'E' as isize,
    SECURITY_STATUS_REQUEST = 'e' as isize,
    SECURITY_STATUS = 'f' as isize,
    ORDER_CANCEL_REQUEST = 'F' as isize,
    ORDER_CANCEL_REPLACE_REQUEST = 'G' as isize,
    TRADING_SESSION_STATUS_REQUEST = 'g' as isize,
    ORDER_STATUS_REQUEST = 'H' as isize,
    TRADING_SESSION_STATUS = 'h' as isize,
    MASS_QUOTE = 'i' as isize,
    BUSINESS_MESSAGE_REJECT = 'j' as isize,
    ALLOCATION_INSTRUCTION = 'J' as isize,
    LIST_CANCEL_REQUEST = 'K' as isize,
    BID_REQUEST = 'k' as isize,
    BID_RESPONSE = 'l' as isize,
    LIST_EXECUTE = 'L' as isize,
    LIST_STRIKE_PRICE = 'm' as isize,
    LIST_STATUS_REQUEST = 'M' as isize,
    LIST_STATUS = 'N' as isize,
    ALLOCATION_INSTRUCTION_ACK = 'P' as isize,
    DONT_KNOW_TRADE = 'Q' as isize,
    QUOTE_REQUEST = 'R' as isize,
    QUOTE = 'S' as isize,
    SETTLEMENT_INSTRUCTIONS = 'T' as isize,
    MARKET_DATA_REQUEST = 'V' as isize,
    MARKET_DATA_SNAPSHOT_FULL_REFRESH = 'W' as isize,
    MARKET_DATA_INCREMENTAL_REFRESH = 'X' as isize,
    MARKET_DATA_REQUEST_REJECT = 'Y' as isize,
    QUOTE_CANCEL = 'Z' as isize,
}

impl From<MsgType> for char {
    fn from(a: MsgType) -> char {
        a as isize as u8 as char
    }
}

impl From<MsgType> for &'static [u8] {
    fn from(a: MsgType) -> &'static [u8] {
        match a {
            MsgType::HEARTBEAT => b"0",
            MsgType::TEST_REQUEST => b"1",
            MsgType::RESEND_REQUEST => b"2",
            MsgType::REJECT => b"3",
            MsgType::SEQUENCE_RESET => b"4",
            MsgType::LOGOUT => b"5",
            MsgType::INDICATION_OF_INTEREST => b"6",
            MsgType::ADVERTISEMENT => b"7",
            MsgType::EXECUTION_REPORT => b"8",
            MsgType::ORDER_CANCEL_REJECT => b"9",
            MsgType::LOGON => b"A",
            MsgType::NEWS => b"B",
            MsgType::MASS_QUOTE_ACKNOWLEDGEMENT => b"b",
            MsgType::EMAIL => b"C",
            MsgType::SECURITY_DEFINITION_REQUEST => b"c",
            MsgType::ORDER_SINGLE => b"D",
            MsgType::SECURITY_DEFINITION => b"d",
            MsgType::ORDER_LIST => b"E",
            MsgType::SECURITY_STATUS_REQUEST => b"e",
            MsgType::SECURITY_STATUS => b"f",
            MsgType::ORDER_CANCEL_REQUEST => b"F",
            MsgType::ORDER_CANCEL_REPLACE_REQUEST => b"G",
            MsgType::TRADING_SESSION_STATUS_REQUEST => b"g",
            MsgType::ORDER_STATUS_REQUEST => b"H",
            MsgType::TRADING_SESSION_STATUS => b"h",
            MsgType::MASS_QUOTE => b"i",
            MsgType::BUSINESS_MESSAGE_REJECT => b"j",
            MsgType::ALLOCATION_INSTRUCTION => b"J",
            MsgType::LIST_CANCEL_REQUEST => b"K",
            MsgType::BID_REQUEST => b"k",
            MsgType::BID_RESPONSE => b"l",
            MsgType::LIST_EXECUTE => b"L",
            MsgType::LIST_STRIKE_PRICE => b"m",
            MsgType::LIST_STATUS_REQUEST => b"M",
            MsgType::LIST_STATUS => b"N",
            MsgType::ALLOCATION_INSTRUCTION_ACK => b"P",
            MsgType::DONT_KNOW_TRADE => b"Q",
            MsgType::QUOTE_REQUEST => b"R",
            MsgType::QUOTE => b"S",
            MsgType::SETTLEMENT_INSTRUCTIONS => b"T",
            MsgType::MARKET_DATA_REQUEST => b"V",
            MsgType::MARKET_DATA_SNAPSHOT_FULL_REFRESH => b"W",
            MsgType::MARKET_DATA_INCREMENTAL_REFRESH => b"X",
            MsgType::MARKET_DATA_REQUEST_REJECT => b"Y",
            MsgType::QUOTE_CANCEL => b"Z",
        }
    }
}

impl TryFrom<char> for MsgType {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Self::HEARTBEAT),
            '1' => Ok(Self::TEST_REQUEST),
            '2' => Ok(Self::RESEND_REQUEST),
            '3' => Ok(Self::REJECT),
            '4' => Ok(Self::SEQUENCE_RESET),
            '5' => Ok(Self::LOGOUT),
            '6' => Ok(Self::INDICATION_OF_INTEREST),
            '7' => Ok(Self::ADVERTISEMENT),
            '8' => Ok(Self::EXECUTION_REPORT),
            '9' => Ok(Self::ORDER_CANCEL_REJECT),
            'A' => Ok(Self::LOGON),
            'B' => Ok(Self::NEWS),
            'b' => Ok(Self::MASS_QUOTE_ACKNOWLEDGEMENT),
            'C' => Ok(Self::EMAIL),
            'c' => Ok(Self::SECURITY_DEFINITION_REQUEST),
            'D' => Ok(Self::ORDER_SINGLE),
            'd' => Ok(Self::SECURITY_DEFINITION),
            'E' => Ok(Self::ORDER_LIST),
            'e' => Ok(Self::SECURITY_STATUS_REQUEST),
            'f' => Ok(Self::SECURITY_STATUS),
            'F' => Ok(Self::ORDER_CANCEL_REQUEST),
            'G' => Ok(Self::ORDER_CANCEL_REPLACE_REQUEST),
            'g' => Ok(Self::TRADING_SESSION_STATUS_REQUEST),
            'H' => Ok(Self::ORDER_STATUS_REQUEST),
            'h' => Ok(Self::TRADING_SESSION_STATUS),
            'i' => Ok(Self::MASS_QUOTE),
            'j' => Ok(Self::BUSINESS_MESSAGE_REJECT),
            'J' => Ok(Self::ALLOCATION_INSTRUCTION),
            'K' => Ok(Self::LIST_CANCEL_REQUEST),
            'k' => Ok(Self::BID_REQUEST),
            'l' => Ok(Self::BID_RESPONSE),
            'L' => Ok(Self::LIST_EXECUTE),
            'm' => Ok(Self::LIST_STRIKE_PRICE),
            'M' => Ok(Self::LIST_STATUS_REQUEST),
            'N' => Ok(Self::LIST_STATUS),
            'P' => Ok(Self::ALLOCATION_INSTRUCTION_ACK),
            'Q' => Ok(Self::DONT_KNOW_TRADE),
            'R' => Ok(Self::QUOTE_REQUEST),
            'S' => Ok(Self::QUOTE),
            'T' => Ok(Self::SETTLEMENT_INSTRUCTIONS),
            'V' => Ok(Self::MARKET_DATA_REQUEST),
            'W' => Ok(Self::MARKET_DATA_SNAPSHOT_FULL_REFRESH),
            'X' => Ok(Self::MARKET_DATA_INCREMENTAL_REFRESH),
            'Y' => Ok(Self::MARKET_DATA_REQUEST_REJECT),
            'Z' => Ok(Self::QUOTE_CANCEL),
            _ => Err(DecodeError::UnknownChar(Tags::MsgType, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PossDupFlag {
    NO = 'N' as isize,
    YES = 'Y' as isize,
}

impl From<PossDupFlag> for char {
    fn from(a: PossDupFlag) -> char {
        a as isize as u8 as char
    }
}

impl From<PossDupFlag> for &'static [u8] {
    fn from(a: PossDupFlag) -> &'static [u8] {
        match a {
            PossDupFlag::NO => b"N",
            PossDupFlag::YES => b"Y",
        }
    }
}

impl TryFrom<char> for PossDupFlag {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'N' => Ok(Self::NO),
            'Y' => Ok(Self::YES),
            _ => Err(DecodeError::UnknownChar(Tags::PossDupFlag, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapFillFlag {
    NO = 'N' as isize,
    YES = 'Y' as isize,
}

impl From<GapFillFlag> for char {
    fn from(a: GapFillFlag) -> char {
        a as isize as u8 as char
    }
}

impl From<GapFillFlag> for &'static [u8] {
    fn from(a: GapFillFlag) -> &'static [u8] {
        match a {
            GapFillFlag::NO => b"N",
            GapFillFlag::YES => b"Y",
        }
    }
}

impl TryFrom<char> for GapFillFlag {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            'N' => Ok(Self::NO),
            'Y' => Ok(Self::YES),
            _ => Err(DecodeError::UnknownChar(Tags::GapFillFlag, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptMethod {
    NONE = 0,
    PKCS = 1,
    DES = 2,
    PKCS_DES = 3,
    PGP_DES = 4,
    PGP_DES_MD5 = 5,
    PEM_DES_MD5 = 6,
}

impl From<EncryptMethod> for u32 {
    fn from(a: EncryptMethod) -> u32 {
        a as isize as u32
    }
}

impl TryFrom<u8> for EncryptMethod {
    type Error = DecodeError;
    fn try_from(c: u8) -> Result<Self, Self::Error> {
        match c {
            0 => Ok(Self::NONE),
            1 => Ok(Self::PKCS),
            2 => Ok(Self::DES),
            3 => Ok(Self::PKCS_DES),
            4 => Ok(Self::PGP_DES),
            5 => Ok(Self::PGP_DES_MD5),
            6 => Ok(Self::PEM_DES_MD5),
            _ => Err(DecodeError::UnknownInt(Tags::EncryptMethod, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRejectReason {
    INVALID_TAG_NUMBER,
    REQUIRED_TAG_MISSING,
    TAG_NOT_DEFINED_FOR_THIS_MESSAGE_TYPE,
    UNDEFINED_TAG,
    TAG_SPECIFIED_WITHOUT_A_VALUE,
    VALUE_IS_INCORRECT,
    INCORRECT_DATA_FORMAT_FOR_VALUE,
    DECRYPTION_PROBLEM,
    SIGNATURE_PROBLEM,
    COMPID_PROBLEM,
    SENDINGTIME_ACCURACY_PROBLEM,
    INVALID_MSGTYPE,
    XML_VALIDATION_ERROR,
    TAG_APPEARS_MORE_THAN_ONCE,
    TAG_SPECIFIED_OUT_OF_REQUIRED_ORDER,
    REPEATING_GROUP_FIELDS_OUT_OF_ORDER,
    INCORRECT_NUMINGROUP_COUNT_FOR_REPEATING_GROUP,
    NON_DATA_VALUE_INCLUDES_FIELD_DELIMITER,
    OTHER,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdType {
    MARKET = '1' as isize,
    LIMIT = '2' as isize,
    STOP = '3' as isize,
    STOP_LIMIT = '4' as isize,
    MARKET_ON_CLOSE = '5' as isize,
    PREVIOUSLY_QUOTED = 'D' as isize,
}

impl From<OrdType> for char {
    fn from(a: OrdType) -> char {
        a as isize as u8 as char
    }
}

impl From<OrdType> for &'static [u8] {
    fn from(a: OrdType) -> &'static [u8] {
        match a {
            OrdType::MARKET => b"1",
            OrdType::LIMIT => b"2",
            OrdType::STOP => b"3",
            OrdType::STOP_LIMIT => b"4",
            OrdType::MARKET_ON_CLOSE => b"5",
            OrdType::PREVIOUSLY_QUOTED => b"D",
        }
    }
}

impl TryFrom<char> for OrdType {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '1' => Ok(Self::MARKET),
            '2' => Ok(Self::LIMIT),
            '3' => Ok(Self::STOP),
            '4' => Ok(Self::STOP_LIMIT),
            '5' => Ok(Self::MARKET_ON_CLOSE),
            'D' => Ok(Self::PREVIOUSLY_QUOTED),
            _ => Err(DecodeError::UnknownChar(Tags::OrdType, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    BUY = '1' as isize,
    SELL = '2' as isize,
    BUY_MINUS = '3' as isize,
    SELL_PLUS = '4' as isize,
    SELL_SHORT = '5' as isize,
    SELL_SHORT_EXEMPT = '6' as isize,
    UNDISCLOSED = '7' as isize,
    CROSS = '8' as isize,
    CROSS_SHORT = '9' as isize,
}

impl From<Side> for char {
    fn from(a: Side) -> char {
        a as isize as u8 as char
    }
}

impl From<Side> for &'static [u8] {
    fn from(a: Side) -> &'static [u8] {
        match a {
            Side::BUY => b"1",
            Side::SELL => b"2",
            Side::BUY_MINUS => b"3",
            Side::SELL_PLUS => b"4",
            Side::SELL_SHORT => b"5",
            Side::SELL_SHORT_EXEMPT => b"6",
            Side::UNDISCLOSED => b"7",
            Side::CROSS => b"8",
            Side::CROSS_SHORT => b"9",
        }
    }
}

impl TryFrom<char> for Side {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '1' => Ok(Self::BUY),
            '2' => Ok(Self::SELL),
            '3' => Ok(Self::BUY_MINUS),
            '4' => Ok(Self::SELL_PLUS),
            '5' => Ok(Self::SELL_SHORT),
            '6' => Ok(Self::SELL_SHORT_EXEMPT),
            '7' => Ok(Self::UNDISCLOSED),
            '8' => Ok(Self::CROSS),
            '9' => Ok(Self::CROSS_SHORT),
            _ => Err(DecodeError::UnknownChar(Tags::Side, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeInForce {
    DAY = '0' as isize,
    GOOD_TILL_CANCEL = '1' as isize,
    AT_THE_OPENING = '2' as isize,
    IMMEDIATE_OR_CANCEL = '3' as isize,
    FILL_OR_KILL = '4' as isize,
    GOOD_TILL_CROSSING = '5' as isize,
    GOOD_TILL_DATE = '6' as isize,
    AT_THE_CLOSE = '7' as isize,
}

impl From<TimeInForce> for char {
    fn from(a: TimeInForce) -> char {
        a as isize as u8 as char
    }
}

impl From<TimeInForce> for &'static [u8] {
    fn from(a: TimeInForce) -> &'static [u8] {
        match a {
            TimeInForce::DAY => b"0",
            TimeInForce::GOOD_TILL_CANCEL => b"1",
            TimeInForce::AT_THE_OPENING => b"2",
            TimeInForce::IMMEDIATE_OR_CANCEL => b"3",
            TimeInForce::FILL_OR_KILL => b"4",
            TimeInForce::GOOD_TILL_CROSSING => b"5",
            TimeInForce::GOOD_TILL_DATE => b"6",
            TimeInForce::AT_THE_CLOSE => b"7",
        }
    }
}

impl TryFrom<char> for TimeInForce {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Self::DAY),
            '1' => Ok(Self::GOOD_TILL_CANCEL),
            '2' => Ok(Self::AT_THE_OPENING),
            '3' => Ok(Self::IMMEDIATE_OR_CANCEL),
            '4' => Ok(Self::FILL_OR_KILL),
            '5' => Ok(Self::GOOD_TILL_CROSSING),
            '6' => Ok(Self::GOOD_TILL_DATE),
            '7' => Ok(Self::AT_THE_CLOSE),
            _ => Err(DecodeError::UnknownChar(Tags::TimeInForce, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecType {
    NEW = '0' as isize,
    DONE_FOR_DAY = '3' as isize,
    CANCELED = '4' as isize,
    REPLACED = '5' as isize,
    PENDING_CANCEL = '6' as isize,
    STOPPED = '7' as isize,
    REJECTED = '8' as isize,
    SUSPENDED = '9' as isize,
    PENDING_NEW = 'A' as isize,
    CALCULATED = 'B' as isize,
    EXPIRED = 'C' as isize,
    RESTATED = 'D' as isize,
    PENDING_REPLACE = 'E' as isize,
    TRADE = 'F' as isize,
    TRADE_CORRECT = 'G' as isize,
    TRADE_CANCEL = 'H' as isize,
    ORDER_STATUS = 'I' as isize,
}

impl From<ExecType> for char {
    fn from(a: ExecType) -> char {
        a as isize as u8 as char
    }
}

impl TryFrom<char> for ExecType {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Self::NEW),
            '3' => Ok(Self::DONE_FOR_DAY),
            '4' => Ok(Self::CANCELED),
            '5' => Ok(Self::REPLACED),
            '6' => Ok(Self::PENDING_CANCEL),
            '7' => Ok(Self::STOPPED),
            '8' => Ok(Self::REJECTED),
            '9' => Ok(Self::SUSPENDED),
            'A' => Ok(Self::PENDING_NEW),
            'B' => Ok(Self::CALCULATED),
            'C' => Ok(Self::EXPIRED),
            'D' => Ok(Self::RESTATED),
            'E' => Ok(Self::PENDING_REPLACE),
            'F' => Ok(Self::TRADE),
            'G' => Ok(Self::TRADE_CORRECT),
            'H' => Ok(Self::TRADE_CANCEL),
            'I' => Ok(Self::ORDER_STATUS),
            _ => Err(DecodeError::UnknownChar(Tags::ExecType, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrdStatus {
    NEW = '0' as isize,
    PARTIALLY_FILLED = '1' as isize,
    FILLED = '2' as isize,
    DONE_FOR_DAY = '3' as isize,
    CANCELED = '4' as isize,
    REPLACED = '5' as isize,
    PENDING_CANCEL = '6' as isize,
    STOPPED = '7' as isize,
    REJECTED = '8' as isize,
    SUSPENDED = '9' as isize,
    PENDING_NEW = 'A' as isize,
    CALCULATED = 'B' as isize,
    EXPIRED = 'C' as isize,
    ACCEPTED_FOR_BIDDING = 'D' as isize,
    PENDING_REPLACE = 'E' as isize,
}

impl From<OrdStatus> for char {
    fn from(a: OrdStatus) -> char {
        a as isize as u8 as char
    }
}

impl TryFrom<char> for OrdStatus {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Self::NEW),
            '1' => Ok(Self::PARTIALLY_FILLED),
            '2' => Ok(Self::FILLED),
            '3' => Ok(Self::DONE_FOR_DAY),
            '4' => Ok(Self::CANCELED),
            '5' => Ok(Self::REPLACED),
            '6' => Ok(Self::PENDING_CANCEL),
            '7' => Ok(Self::STOPPED),
            '8' => Ok(Self::REJECTED),
            '9' => Ok(Self::SUSPENDED),
            'A' => Ok(Self::PENDING_NEW),
            'B' => Ok(Self::CALCULATED),
            'C' => Ok(Self::EXPIRED),
            'D' => Ok(Self::ACCEPTED_FOR_BIDDING),
            'E' => Ok(Self::PENDING_REPLACE),
            _ => Err(DecodeError::UnknownChar(Tags::OrdStatus, c)),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MDEntryType {
    BID = '0' as isize,
    OFFER = '1' as isize,
    TRADE = '2' as isize,
    INDEX_VALUE = '3' as isize,
    OPENING_PRICE = '4' as isize,
    CLOSING_PRICE = '5' as isize,
    SETTLEMENT_PRICE = '6' as isize,
    TRADING_SESSION_HIGH_PRICE = '7' as isize,
    TRADING_SESSION_LOW_PRICE = '8' as isize,
}

impl From<MDEntryType> for char {
    fn from(a: MDEntryType) -> char {
        a as isize as u8 as char
    }
}

impl From<MDEntryType> for &'static [u8] {
    fn from(a: MDEntryType) -> &'static [u8] {
        match a {
            MDEntryType::BID => b"0",
            MDEntryType::OFFER => b"1",
            MDEntryType::TRADE => b"2",
            MDEntryType::INDEX_VALUE => b"3",
            MDEntryType::OPENING_PRICE => b"4",
            MDEntryType::CLOSING_PRICE => b"5",
            MDEntryType::SETTLEMENT_PRICE => b"6",
            MDEntryType::TRADING_SESSION_HIGH_PRICE => b"7",
            MDEntryType::TRADING_SESSION_LOW_PRICE => b"8",
        }
    }
}

impl TryFrom<char> for MDEntryType {
    type Error = DecodeError;
    fn try_from(c: char) -> Result<Self, Self::Error> {
        match c {
            '0' => Ok(Self::BID),
            '1' => Ok(Self::OFFER),
            '2' => Ok(Self::TRADE),
            '3' => Ok(Self::INDEX_VALUE),
            '4' => Ok(Self::OPENING_PRICE),
            '5' => Ok(Self::CLOSING_PRICE),
            '6' => Ok(Self::SETTLEMENT_PRICE),
            '7' => Ok(Self::TRADING_SESSION_HIGH_PRICE),
            '8' => Ok(Self::TRADING_SESSION_LOW_PRICE),
            _ => Err(DecodeError::UnknownChar(Tags::MDEntryType, c)),
        }
    }
}
