//! Runtime value domain for the Glyph VM
//!
//! Values are immutable once produced by an opcode; all mutation in the
//! language happens by producing a new value and rebinding a name. Equality
//! is structural and deep. Objects are keyed maps whose insertion order is
//! not significant for equality, so they are stored sorted.

use std::collections::BTreeMap;
use std::fmt;

/// Constant-pool tag bytes used by the bytecode container
///
/// Arrays and objects never appear in the constant pool; they are built at
/// runtime by `BuildArray`/`BuildObject`.
pub mod tags {
    /// Null constant, no payload
    pub const NULL: u8 = 0x00;
    /// Int constant, 8-byte i64 little-endian payload
    pub const INT: u8 = 0x01;
    /// Float constant, 8-byte IEEE-754 double little-endian payload
    pub const FLOAT: u8 = 0x02;
    /// Bool constant, 1-byte payload (0x00 or 0x01)
    pub const BOOL: u8 = 0x03;
    /// String constant, u32-LE length followed by UTF-8 bytes
    pub const STRING: u8 = 0x04;
}

/// A runtime value
///
/// The full value domain of the language: scalars, strings, arrays, and
/// string-keyed objects. Host-provided opaque values cross the VM boundary
/// as one of these shapes (typically an object handle encoded as a string).
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    /// The null value
    #[default]
    Null,
    /// 64-bit signed integer
    Int(i64),
    /// IEEE-754 double
    Float(f64),
    /// Boolean
    Bool(bool),
    /// Immutable UTF-8 string
    String(String),
    /// Ordered sequence of values
    Array(Vec<Value>),
    /// String-keyed mapping; key order is canonical (sorted), not insertion
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Build a string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// Build an array value
    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Build an object value from key/value pairs
    pub fn object(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Value::Object(fields.into_iter().collect())
    }

    /// The boolean projection used by conditional jumps
    ///
    /// `Null`, `false`, `0`, `0.0`, the empty string, the empty array, and
    /// the empty object are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(fields) => !fields.is_empty(),
        }
    }

    /// Static name of this value's type, used in error messages
    #[inline]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }

    /// Borrow the string payload if this is a string
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer payload if this is an int
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Whether this value may live in the constant pool
    #[inline]
    pub fn is_constant_representable(&self) -> bool {
        !matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Append this value's constant-pool encoding to `buf`
    ///
    /// Panics on arrays and objects: the compiler only ever interns scalars
    /// and strings, so a composite here is a compiler bug, not an input error.
    pub fn encode_constant(&self, buf: &mut Vec<u8>) {
        match self {
            Value::Null => buf.push(tags::NULL),
            Value::Int(n) => {
                buf.push(tags::INT);
                buf.extend_from_slice(&n.to_le_bytes());
            }
            Value::Float(f) => {
                buf.push(tags::FLOAT);
                buf.extend_from_slice(&f.to_le_bytes());
            }
            Value::Bool(b) => {
                buf.push(tags::BOOL);
                buf.push(*b as u8);
            }
            Value::String(s) => {
                buf.push(tags::STRING);
                buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Value::Array(_) | Value::Object(_) => {
                panic!("composite values cannot be encoded as constants")
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Bool(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
