use std::collections::BTreeMap;
use std::fmt::Display;

/// A Bencode value as defined in the BitTorrent specification.
///
/// Bencode supports four different types of values:
/// - Integers
/// - Byte strings (raw octets, not necessarily UTF-8)
/// - Lists
/// - Dictionaries
///
/// Dictionary keys are raw byte strings. Keeping them in a `BTreeMap` means
/// iteration is always in lexicographic key order, so re-encoding a decoded
/// value reproduces the canonical byte sequence the info hash depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BValue {
    /// An integer value, can be positive or negative.
    /// Example: `i42e` represents 42
    Integer(i64),

    /// A byte string, prefixed with its length.
    /// Example: `4:spam` represents b"spam"
    Bytes(Vec<u8>),

    /// A list of BValue elements.
    /// Example: `l4:spami42ee` represents [b"spam", 42]
    List(Vec<BValue>),

    /// A dictionary mapping byte strings to BValues.
    /// Example: `d3:bar4:spam3:fooi42ee` represents {b"bar": b"spam", b"foo": 42}
    Dict(BTreeMap<Vec<u8>, BValue>),
}

impl BValue {
    /// Returns the integer value, if this is an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            BValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the raw octets, if this is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            BValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the byte string decoded as UTF-8, if this is one and it is valid.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            BValue::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BValue]> {
        match self {
            BValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BValue>> {
        match self {
            BValue::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` when this value is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&BValue> {
        self.as_dict().and_then(|d| d.get(key))
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::from(self)
    }
}

impl From<serde_json::Value> for BValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => BValue::Integer(n.as_i64().unwrap_or_default()),
            serde_json::Value::String(s) => BValue::Bytes(s.into_bytes()),
            serde_json::Value::Array(arr) => {
                BValue::List(arr.into_iter().map(BValue::from).collect())
            }
            serde_json::Value::Object(map) => {
                let btree = map
                    .into_iter()
                    .map(|(k, v)| (k.into_bytes(), BValue::from(v)))
                    .collect();
                BValue::Dict(btree)
            }
            _ => BValue::Bytes(Vec::new()),
        }
    }
}

impl From<&BValue> for serde_json::Value {
    fn from(value: &BValue) -> Self {
        match value {
            BValue::Integer(n) => serde_json::Value::Number((*n).into()),
            BValue::Bytes(s) => serde_json::Value::String(display_bytes(s)),
            BValue::List(arr) => serde_json::Value::Array(arr.iter().map(|v| v.into()).collect()),
            BValue::Dict(map) => {
                let obj = map
                    .iter()
                    .map(|(k, v)| (display_bytes(k), v.into()))
                    .collect();
                serde_json::Value::Object(obj)
            }
        }
    }
}

impl From<BValue> for serde_json::Value {
    fn from(value: BValue) -> Self {
        (&value).into()
    }
}

/// Byte strings that are printable ASCII render as text, anything else as hex.
fn display_bytes(s: &[u8]) -> String {
    if s.iter().any(|&b| !(32..=126).contains(&b)) {
        hex::encode(s)
    } else {
        String::from_utf8_lossy(s).into_owned()
    }
}

impl Display for BValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BValue::Integer(n) => write!(f, "{}", n),
            BValue::Bytes(s) => write!(f, "\"{}\"", display_bytes(s)),
            BValue::List(list) => {
                write!(f, "[")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            BValue::Dict(dict) => {
                write!(f, "{{")?;
                for (i, (key, value)) in dict.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "\"{}\":{}", display_bytes(key), value)?;
                }
                write!(f, "}}")
            }
        }
    }
}
