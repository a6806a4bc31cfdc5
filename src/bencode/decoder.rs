//! Bencode decoder following the BitTorrent protocol specification.
//!
//! Parses bencoded data as defined in the
//! [BitTorrent protocol specification](http://www.bittorrent.org/beps/bep_0003.html#bencoding).
//!
//! Bencode supports four data types:
//! - Byte strings: `<length>:<contents>` (e.g. `4:spam`)
//! - Integers: `i<number>e` (e.g. `i42e`)
//! - Lists: `l<bencoded values>e` (e.g. `l4:spami42ee`)
//! - Dictionaries: `d<bencoded string><bencoded value>e` (e.g. `d3:bar4:spam3:fooi42ee`)
//!
//! The decoder is positional: it works on raw octets and reports exactly how
//! many input bytes it consumed, so composite decoders can advance past one
//! value and keep going.

use std::collections::BTreeMap;

use super::bvalue::BValue;
use super::BencodeError;

/// A streaming decoder for bencoded data.
///
/// The decoder maintains its byte position in the input and parses one value
/// at a time.
#[derive(Debug)]
pub struct Decoder<'a> {
    input: &'a [u8],
    position: usize,
}

impl<'a> Decoder<'a> {
    /// Creates a new decoder over the given input bytes.
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, position: 0 }
    }

    /// Parses a single bencoded value starting at the current position.
    pub fn parse(&mut self) -> Result<BValue, BencodeError> {
        self.parse_value()
    }

    /// Number of input bytes consumed so far.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the next byte without consuming it.
    fn peek(&self) -> Option<u8> {
        self.input.get(self.position).copied()
    }

    /// Consumes and returns the next byte.
    fn bump(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.position += 1;
        Some(b)
    }

    /// Parses a bencoded value based on its prefix:
    /// - 'i' for integers
    /// - 'l' for lists
    /// - 'd' for dictionaries
    /// - a digit for byte strings
    fn parse_value(&mut self) -> Result<BValue, BencodeError> {
        match self.peek() {
            Some(b'i') => Ok(BValue::Integer(self.parse_integer()?)),
            Some(b'l') => self.parse_list(),
            Some(b'd') => self.parse_dict(),
            Some(b) if b.is_ascii_digit() => Ok(BValue::Bytes(self.parse_bytes()?)),
            Some(b) => Err(BencodeError::UnexpectedPrefix {
                byte: b,
                position: self.position,
            }),
            None => Err(BencodeError::Truncated),
        }
    }

    /// Parses a bencoded integer of the form `i<number>e`.
    ///
    /// Rejects an empty digit run, `-0`, and any leading zero other than the
    /// literal `i0e`, since a non-canonical integer could not survive an
    /// encode round-trip.
    fn parse_integer(&mut self) -> Result<i64, BencodeError> {
        self.bump(); // consume 'i'
        let start = self.position;
        if self.peek() == Some(b'-') {
            self.bump();
        }
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.bump();
        }
        let body = &self.input[start..self.position];
        match self.bump() {
            Some(b'e') => {}
            Some(_) => return Err(BencodeError::InvalidInteger),
            None => return Err(BencodeError::Truncated),
        }

        let digits = body.strip_prefix(b"-").unwrap_or(body);
        if digits.is_empty() {
            return Err(BencodeError::InvalidInteger);
        }
        if digits[0] == b'0' && (digits.len() > 1 || body[0] == b'-') {
            return Err(BencodeError::InvalidInteger);
        }

        // body is ASCII by construction
        std::str::from_utf8(body)
            .expect("integer body is ascii")
            .parse::<i64>()
            .map_err(|_| BencodeError::InvalidInteger)
    }

    /// Parses a bencoded byte string of the form `<length>:<octets>`.
    fn parse_bytes(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.position;
        while matches!(self.peek(), Some(b) if b.is_ascii_digit()) {
            self.bump();
        }
        let len_digits = &self.input[start..self.position];
        match self.bump() {
            Some(b':') => {}
            Some(_) => return Err(BencodeError::InvalidLength),
            None => return Err(BencodeError::Truncated),
        }
        let len = std::str::from_utf8(len_digits)
            .expect("length digits are ascii")
            .parse::<usize>()
            .map_err(|_| BencodeError::InvalidLength)?;

        if self.input.len() - self.position < len {
            return Err(BencodeError::Truncated);
        }
        let bytes = self.input[self.position..self.position + len].to_vec();
        self.position += len;
        Ok(bytes)
    }

    /// Parses a bencoded list of the form `l<bencoded values>e`.
    fn parse_list(&mut self) -> Result<BValue, BencodeError> {
        self.bump(); // consume 'l'
        let mut values = Vec::new();

        loop {
            match self.peek() {
                Some(b'e') => {
                    self.bump();
                    return Ok(BValue::List(values));
                }
                Some(_) => values.push(self.parse_value()?),
                None => return Err(BencodeError::Unterminated("list")),
            }
        }
    }

    /// Parses a bencoded dictionary of the form `d<bencoded string><bencoded value>e`.
    ///
    /// Keys must be byte strings; a repeated key is malformed input.
    fn parse_dict(&mut self) -> Result<BValue, BencodeError> {
        self.bump(); // consume 'd'
        let mut map = BTreeMap::new();

        loop {
            match self.peek() {
                Some(b'e') => {
                    self.bump();
                    return Ok(BValue::Dict(map));
                }
                Some(_) => {
                    let key = match self.parse_value()? {
                        BValue::Bytes(k) => k,
                        _ => return Err(BencodeError::NonStringKey),
                    };
                    let value = self.parse_value()?;
                    if map.insert(key.clone(), value).is_some() {
                        return Err(BencodeError::DuplicateKey(
                            String::from_utf8_lossy(&key).into_owned(),
                        ));
                    }
                }
                None => return Err(BencodeError::Unterminated("dictionary")),
            }
        }
    }
}
