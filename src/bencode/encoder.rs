//! Bencode encoder following the BitTorrent protocol specification.
//!
//! The encoding rules are:
//! - Byte strings are length-prefixed base10 followed by a colon and the octets
//! - Integers are 'i' followed by the number in base10 followed by 'e'
//! - Lists are 'l' followed by their elements followed by 'e'
//! - Dictionaries are 'd' followed by alternating keys and values followed by 'e'
//!
//! Dictionary keys are emitted in ascending lexicographic order of their raw
//! bytes. Since `BValue::Dict` is a `BTreeMap`, plain iteration already
//! yields that order, which is what makes `encode(decode(b)) == b` hold for
//! canonical inputs and keeps the info hash byte-stable.

use std::collections::BTreeMap;

use super::bvalue::BValue;

/// An encoder that serializes values into the Bencode octet format.
pub struct Encoder {
    output: Vec<u8>,
}

impl Encoder {
    /// Creates a new encoder with an empty output buffer.
    pub fn new() -> Self {
        Self { output: Vec::new() }
    }

    /// Encodes a value and returns the accumulated bytes.
    pub fn encode(mut self, value: &BValue) -> Vec<u8> {
        self.encode_value(value);
        self.output
    }

    fn encode_value(&mut self, value: &BValue) {
        match value {
            BValue::Integer(n) => self.encode_integer(*n),
            BValue::Bytes(s) => self.encode_bytes(s),
            BValue::List(list) => self.encode_list(list),
            BValue::Dict(dict) => self.encode_dict(dict),
        }
    }

    /// Encodes an integer in the format: i<number>e
    fn encode_integer(&mut self, n: i64) {
        self.output.push(b'i');
        self.output.extend_from_slice(n.to_string().as_bytes());
        self.output.push(b'e');
    }

    /// Encodes a byte string in the format: <length>:<octets>
    fn encode_bytes(&mut self, s: &[u8]) {
        self.output.extend_from_slice(s.len().to_string().as_bytes());
        self.output.push(b':');
        self.output.extend_from_slice(s);
    }

    /// Encodes a list in the format: l<bencoded values>e
    fn encode_list(&mut self, list: &[BValue]) {
        self.output.push(b'l');
        for item in list {
            self.encode_value(item);
        }
        self.output.push(b'e');
    }

    /// Encodes a dictionary in the format: d<bencoded string><bencoded value>e
    fn encode_dict(&mut self, dict: &BTreeMap<Vec<u8>, BValue>) {
        self.output.push(b'd');
        for (key, value) in dict {
            self.encode_bytes(key);
            self.encode_value(value);
        }
        self.output.push(b'e');
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Self::new()
    }
}
