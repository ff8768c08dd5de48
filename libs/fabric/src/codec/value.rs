use crate::codec::framing::{MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
use crate::error::{Error, Result};

const TAG_NONE: u8 = b'n';
const TAG_BOOL: u8 = b'b';
const TAG_INT: u8 = b'i';
const TAG_FLOAT: u8 = b'f';
const TAG_STR: u8 = b's';
const TAG_BYTES: u8 = b'y';
const TAG_LIST: u8 = b'l';
const TAG_MAP: u8 = b'm';

/// Deepest list or map nesting accepted in either direction
pub const MAX_NESTING: usize = 64;

/// A type-tagged argument or answer value
///
/// On the wire every value starts with a single tag byte followed by its
/// body. Lists carry their elements as length-prefixed encoded values, maps
/// carry key/value frames terminated by an empty key, like a box.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

impl Value {
    /// Encode into a tagged byte string fitting a single box field
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.encode_at(0)
    }

    fn encode_at(&self, depth: usize) -> Result<Vec<u8>> {
        if depth > MAX_NESTING {
            return Err(Error::codec(format!(
                "Value nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        let mut out = Vec::new();
        self.encode_into(&mut out, depth)?;
        if out.len() > MAX_VALUE_LENGTH {
            return Err(Error::codec(format!(
                "Encoded value too large: {} bytes",
                out.len()
            )));
        }
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>, depth: usize) -> Result<()> {
        match self {
            Value::None => out.push(TAG_NONE),
            Value::Bool(b) => {
                out.push(TAG_BOOL);
                out.push(u8::from(*b));
            }
            Value::Int(i) => {
                out.push(TAG_INT);
                out.extend_from_slice(&i.to_be_bytes());
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_be_bytes());
            }
            Value::Str(s) => {
                out.push(TAG_STR);
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                out.extend_from_slice(b);
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                for item in items {
                    put_prefixed(out, &item.encode_at(depth + 1)?)?;
                }
            }
            Value::Map(entries) => {
                out.push(TAG_MAP);
                for (key, value) in entries {
                    if key.is_empty() || key.len() > MAX_KEY_LENGTH {
                        return Err(Error::codec(format!("Invalid map key length: {}", key.len())));
                    }
                    put_prefixed(out, key.as_bytes())?;
                    put_prefixed(out, &value.encode_at(depth + 1)?)?;
                }
                out.extend_from_slice(&0u16.to_be_bytes());
            }
        }
        Ok(())
    }

    /// Decode a tagged byte string
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Self::decode_at(bytes, 0)
    }

    fn decode_at(bytes: &[u8], depth: usize) -> Result<Self> {
        if depth > MAX_NESTING {
            return Err(Error::codec(format!(
                "Value nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        let (tag, body) = bytes
            .split_first()
            .ok_or_else(|| Error::codec("Empty value"))?;

        match *tag {
            TAG_NONE if body.is_empty() => Ok(Value::None),
            TAG_NONE => Err(Error::codec("Unexpected bytes after none")),
            TAG_BOOL => match body {
                [0] => Ok(Value::Bool(false)),
                [1] => Ok(Value::Bool(true)),
                _ => Err(Error::codec("Invalid boolean")),
            },
            TAG_INT => fixed(body).map(|b| Value::Int(i64::from_be_bytes(b))),
            TAG_FLOAT => fixed(body).map(|b| Value::Float(f64::from_be_bytes(b))),
            TAG_STR => String::from_utf8(body.to_vec())
                .map(Value::Str)
                .map_err(|e| Error::codec(e.to_string())),
            TAG_BYTES => Ok(Value::Bytes(body.to_vec())),
            TAG_LIST => {
                let mut items = Vec::new();
                let mut rest = body;
                while !rest.is_empty() {
                    let (item, tail) = take_prefixed(rest)?;
                    items.push(Value::decode_at(item, depth + 1)?);
                    rest = tail;
                }
                Ok(Value::List(items))
            }
            TAG_MAP => {
                let mut entries = Vec::new();
                let mut rest = body;
                loop {
                    let (key, tail) = take_prefixed(rest)?;
                    if key.is_empty() {
                        if !tail.is_empty() {
                            return Err(Error::codec("Trailing bytes after map"));
                        }
                        break;
                    }
                    let key = std::str::from_utf8(key)
                        .map_err(|e| Error::codec(e.to_string()))?
                        .to_string();
                    let (value, tail) = take_prefixed(tail)?;
                    entries.push((key, Value::decode_at(value, depth + 1)?));
                    rest = tail;
                }
                Ok(Value::Map(entries))
            }
            other => Err(Error::codec(format!("Unknown value tag: {:#04x}", other))),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the variant, used in conversion errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::None => "none",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

fn fixed(body: &[u8]) -> Result<[u8; 8]> {
    <[u8; 8]>::try_from(body).map_err(|_| Error::codec(format!("Expected 8 bytes, got {}", body.len())))
}

fn put_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::codec(format!("Nested field too large: {} bytes", bytes.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

fn take_prefixed(bytes: &[u8]) -> Result<(&[u8], &[u8])> {
    let (len, rest) = match bytes {
        [hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, rest),
        _ => return Err(Error::codec("Truncated length prefix")),
    };
    if rest.len() < len {
        return Err(Error::codec(format!(
            "Nested field claims {} bytes, {} available",
            len,
            rest.len()
        )));
    }
    Ok(rest.split_at(len))
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::None
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

macro_rules! value_conversions {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }

            impl TryFrom<Value> for $ty {
                type Error = Error;

                fn try_from(value: Value) -> Result<Self> {
                    match value {
                        Value::$variant(v) => <$ty>::try_from(v)
                            .map_err(|e| Error::codec(e.to_string())),
                        other => Err(Error::codec(format!(
                            "Expected {}, got {}",
                            stringify!($variant).to_lowercase(),
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

value_conversions! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    u32 => Int,
    f64 => Float,
    String => Str,
    Vec<u8> => Bytes,
}

impl TryFrom<Value> for () {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::None => Ok(()),
            other => Err(Error::codec(format!("Expected none, got {}", other.kind()))),
        }
    }
}
