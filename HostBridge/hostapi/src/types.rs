//! The host-side value model.
//!
//! Every value the guest refers to by handle is a `HostValue`. Its type is
//! always checked through `ValueTag` before use; a mismatch is a
//! `TypeMismatch` error rather than a reinterpretation.

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use keel_primitives::ErrorCode;

use crate::closure::ClosureCell;
use crate::error::HostError;

/// Type tag reported to the guest by the `value_tag` import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ValueTag {
    Undefined = 0,
    Null = 1,
    Bool = 2,
    Number = 3,
    String = 4,
    Bytes = 5,
    Array = 6,
    Error = 7,
    Closure = 8,
    Function = 9,
    Object = 10,
}

impl ValueTag {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for ValueTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Array => "array",
            Self::Error => "error",
            Self::Closure => "closure",
            Self::Function => "function",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// The error object that crosses the boundary in both directions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorValue {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A host-implemented callable the guest can invoke through `call`.
pub type HostFunction = Rc<dyn Fn(HostValue) -> Result<HostValue, ErrorValue>>;

/// A value owned by the host and referenced from the guest by handle.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Array(Vec<HostValue>),
    Error(ErrorValue),
    /// A guest closure wrapped as a host callable.
    Closure(Rc<ClosureCell>),
    Function(HostFunction),
    /// Opaque host object.
    Object(Rc<dyn Any>),
}

impl HostValue {
    pub fn tag(&self) -> ValueTag {
        match self {
            Self::Undefined => ValueTag::Undefined,
            Self::Null => ValueTag::Null,
            Self::Bool(_) => ValueTag::Bool,
            Self::Number(_) => ValueTag::Number,
            Self::String(_) => ValueTag::String,
            Self::Bytes(_) => ValueTag::Bytes,
            Self::Array(_) => ValueTag::Array,
            Self::Error(_) => ValueTag::Error,
            Self::Closure(_) => ValueTag::Closure,
            Self::Function(_) => ValueTag::Function,
            Self::Object(_) => ValueTag::Object,
        }
    }

    pub fn function(f: impl Fn(HostValue) -> Result<HostValue, ErrorValue> + 'static) -> Self {
        Self::Function(Rc::new(f))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_str(&self) -> Result<&str, HostError> {
        match self {
            Self::String(s) => Ok(s),
            other => Err(HostError::type_mismatch(ValueTag::String, other.tag())),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], HostError> {
        match self {
            Self::Bytes(b) => Ok(b),
            other => Err(HostError::type_mismatch(ValueTag::Bytes, other.tag())),
        }
    }

    pub fn as_number(&self) -> Result<f64, HostError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(HostError::type_mismatch(ValueTag::Number, other.tag())),
        }
    }

    pub fn as_bool(&self) -> Result<bool, HostError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(HostError::type_mismatch(ValueTag::Bool, other.tag())),
        }
    }

    pub fn as_array(&self) -> Result<&[HostValue], HostError> {
        match self {
            Self::Array(items) => Ok(items),
            other => Err(HostError::type_mismatch(ValueTag::Array, other.tag())),
        }
    }

    pub fn as_error(&self) -> Result<&ErrorValue, HostError> {
        match self {
            Self::Error(e) => Ok(e),
            other => Err(HostError::type_mismatch(ValueTag::Error, other.tag())),
        }
    }

    pub fn as_closure(&self) -> Result<&Rc<ClosureCell>, HostError> {
        match self {
            Self::Closure(c) => Ok(c),
            other => Err(HostError::type_mismatch(ValueTag::Closure, other.tag())),
        }
    }

    /// Borrow an opaque object as `T`.
    pub fn downcast_object<T: 'static>(&self) -> Result<&T, HostError> {
        match self {
            Self::Object(obj) => obj
                .downcast_ref::<T>()
                .ok_or_else(|| HostError::type_mismatch(ValueTag::Object, ValueTag::Object)),
            other => Err(HostError::type_mismatch(ValueTag::Object, other.tag())),
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Bytes(b) => write!(f, "Bytes(len={})", b.len()),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Error(e) => write!(f, "Error({e})"),
            Self::Closure(c) => write!(f, "Closure({:?})", c),
            Self::Function(_) => f.write_str("Function"),
            Self::Object(_) => f.write_str("Object"),
        }
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Vec<u8>> for HostValue {
    fn from(b: Vec<u8>) -> Self {
        Self::Bytes(b)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<ErrorValue> for HostValue {
    fn from(e: ErrorValue) -> Self {
        Self::Error(e)
    }
}

/// Well-known global scope objects the guest can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalScope {
    Global = 0,
    GlobalThis = 1,
    SelfScope = 2,
    Window = 3,
}

impl GlobalScope {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Global),
            1 => Some(Self::GlobalThis),
            2 => Some(Self::SelfScope),
            3 => Some(Self::Window),
            _ => None,
        }
    }
}

/// Severity of a guest log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    /// Unknown levels clamp to `Error`.
    pub fn from_u32(v: u32) -> Self {
        match v {
            0 => Self::Trace,
            1 => Self::Debug,
            2 => Self::Info,
            3 => Self::Warn,
            _ => Self::Error,
        }
    }
}

/// A captured guest log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}
