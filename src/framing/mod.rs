//! Wire framing: length-prefixed records with a record-type tag.
//!
//! Every outbound frame is an 8-byte header `(be_u32 record_type, be_u32
//! payload_length)` followed by the UTF-8 payload, padded to an 8-byte
//! boundary. Inbound frames begin with a `be_i32 length`: `0` means the
//! null value, `-1` means the distinguished "undefined" value, any other
//! negative value means the payload is a callback request rather than a
//! result. See spec §4.1.

mod codec;

pub use codec::{decode_frame, encode_frame};

use std::fmt;

/// Stable wire identifiers for every command the protocol understands.
/// Discriminants are part of the wire format and must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RecordType {
    Const = 0,
    Get = 1,
    Set = 2,
    SetInst = 3,
    SetPath = 4,
    SetPathInst = 5,
    Unset = 6,
    UnsetPath = 7,
    ClassStaticConst = 8,
    ClassStaticGet = 9,
    ClassStaticSet = 10,
    ClassStaticSetInst = 11,
    ClassStaticSetPath = 12,
    ClassStaticSetPathInst = 13,
    ClassStaticUnset = 14,
    ClassStaticUnsetPath = 15,
    ClassStaticCall = 16,
    Construct = 17,
    Destruct = 18,
    ClassGet = 19,
    ClassSet = 20,
    ClassSetInst = 21,
    ClassCall = 22,
    ClassCallPath = 23,
    ClassInvoke = 24,
    ClassGetIterator = 25,
    ClassIterateBegin = 26,
    ClassIterate = 27,
    ClassToString = 28,
    ClassIsset = 29,
    ClassUnset = 30,
    ClassProps = 31,
    ClassInstanceOf = 32,
    Call = 33,
    CallEcho = 34,
    CallEval = 35,
    CallEvalThis = 36,
    CallInclude = 37,
    CallIncludeOnce = 38,
    CallRequire = 39,
    CallRequireOnce = 40,
    PushFrame = 41,
    PopFrame = 42,
    NObjects = 43,
    Exit = 44,
    EndStdout = 45,
    /// Reply to an inbound callback request (§4.6).
    Data = 46,
}

impl RecordType {
    pub fn from_u32(v: u32) -> Option<Self> {
        use RecordType::*;
        const TABLE: &[RecordType] = &[
            Const,
            Get,
            Set,
            SetInst,
            SetPath,
            SetPathInst,
            Unset,
            UnsetPath,
            ClassStaticConst,
            ClassStaticGet,
            ClassStaticSet,
            ClassStaticSetInst,
            ClassStaticSetPath,
            ClassStaticSetPathInst,
            ClassStaticUnset,
            ClassStaticUnsetPath,
            ClassStaticCall,
            Construct,
            Destruct,
            ClassGet,
            ClassSet,
            ClassSetInst,
            ClassCall,
            ClassCallPath,
            ClassInvoke,
            ClassGetIterator,
            ClassIterateBegin,
            ClassIterate,
            ClassToString,
            ClassIsset,
            ClassUnset,
            ClassProps,
            ClassInstanceOf,
            Call,
            CallEcho,
            CallEval,
            CallEvalThis,
            CallInclude,
            CallIncludeOnce,
            CallRequire,
            CallRequireOnce,
            PushFrame,
            PopFrame,
            NObjects,
            Exit,
            EndStdout,
            Data,
        ];
        TABLE.get(v as usize).copied()
    }
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum InboundFrame {
    /// A `length == 0` frame: the null result value.
    Null,
    /// A `length == -1` frame: the distinguished "undefined" value.
    Undefined,
    /// A positive-length frame: the raw JSON payload of a result.
    Result(Vec<u8>),
    /// A negative-length (other than -1) frame: an inbound callback request.
    Callback(CallbackRequest),
    /// A negative-length frame carrying [`ERROR_RESULT_MARKER`] instead of a
    /// callback kind: an uncaught PHP throwable raised while dispatching the
    /// command we just sent (§4.7, §7).
    Error { file: String, line: u32, message: String, trace: String },
}

/// Sentinel kind-code (first 4 bytes of a negative-length frame's payload)
/// marking it as an error reply rather than a callback request. Chosen
/// outside the 0-14 range [`CallbackKind`] occupies so the two can never be
/// confused.
pub const ERROR_RESULT_MARKER: u32 = 0xFFFF_FFFF;

/// The header of a callback request, decoded from a negative-length frame's
/// payload: a 4-byte kind code, a 4-byte host-handle id, then a JSON body.
#[derive(Debug, Clone)]
pub struct CallbackRequest {
    pub kind: CallbackKind,
    pub host_handle: u32,
    pub body: Vec<u8>,
}

/// Kinds of inbound callback requests, see spec §4.6 table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CallbackKind {
    GetClass = 0,
    Construct = 1,
    Destruct = 2,
    ClassGet = 3,
    ClassSet = 4,
    ClassCall = 5,
    ClassInvoke = 6,
    ClassGetIterator = 7,
    ClassToString = 8,
    ClassIsset = 9,
    ClassUnset = 10,
    ClassProps = 11,
    ClassStaticCall = 12,
    Call = 13,
    JsonEncode = 14,
}

impl CallbackKind {
    pub fn from_u32(v: u32) -> Option<Self> {
        use CallbackKind::*;
        const TABLE: &[CallbackKind] = &[
            GetClass, Construct, Destruct, ClassGet, ClassSet, ClassCall, ClassInvoke,
            ClassGetIterator, ClassToString, ClassIsset, ClassUnset, ClassProps,
            ClassStaticCall, Call, JsonEncode,
        ];
        TABLE.get(v as usize).copied()
    }
}

bitflags::bitflags! {
    /// Type flags carried in a `DATA` reply payload (`"<flags> <body>"`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DataFlags: u32 {
        const HAS_ITERATOR = 0b0000_0001;
        const HAS_LENGTH    = 0b0000_0010;
        const HAS_SIZE      = 0b0000_0100;
        const IS_STRING     = 0b0000_1000;
        const IS_JSON       = 0b0001_0000;
        const IS_ERROR      = 0b0010_0000;
    }
}

/// Errors from encoding or decoding a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    UnexpectedEof,
    UnknownRecordType(u32),
    UnknownCallbackKind(u32),
    PayloadTooShort { expected: usize, got: usize },
    InvalidUtf8,
    MalformedErrorReply,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::UnexpectedEof => write!(f, "unexpected end of stream while framing"),
            FramingError::UnknownRecordType(v) => write!(f, "unknown record type {v}"),
            FramingError::UnknownCallbackKind(v) => write!(f, "unknown callback kind {v}"),
            FramingError::PayloadTooShort { expected, got } => {
                write!(f, "callback payload too short: expected at least {expected} bytes, got {got}")
            }
            FramingError::InvalidUtf8 => write!(f, "frame payload was not valid UTF-8"),
            FramingError::MalformedErrorReply => write!(f, "malformed PHP error reply payload"),
        }
    }
}

impl std::error::Error for FramingError {}

/// Rounds `n` up to the next multiple of 8, as the framing alignment
/// requires (see §4.1: "padded to an 8-byte boundary").
pub(crate) fn pad8(n: usize) -> usize {
    (n + 7) & !7
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad8_rounds_up() {
        assert_eq!(pad8(0), 0);
        assert_eq!(pad8(1), 8);
        assert_eq!(pad8(8), 8);
        assert_eq!(pad8(9), 16);
    }

    #[test]
    fn record_type_roundtrip() {
        assert_eq!(RecordType::from_u32(RecordType::Data as u32), Some(RecordType::Data));
        assert_eq!(RecordType::from_u32(9999), None);
    }
}
