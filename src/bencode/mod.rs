pub use bvalue::BValue;
pub use decoder::Decoder;
pub use encoder::Encoder;

mod bvalue;
mod decoder;
mod encoder;

/// Ways a bencoded input can be malformed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BencodeError {
    #[error("input ended before the value was complete")]
    Truncated,
    #[error("unexpected byte {byte:#04x} at position {position}")]
    UnexpectedPrefix { byte: u8, position: usize },
    #[error("invalid integer literal")]
    InvalidInteger,
    #[error("invalid byte string length")]
    InvalidLength,
    #[error("unterminated {0}")]
    Unterminated(&'static str),
    #[error("dictionary key is not a byte string")]
    NonStringKey,
    #[error("duplicate dictionary key `{0}`")]
    DuplicateKey(String),
}

/// Bencode codec facade.
#[derive(Debug, Clone, Copy)]
pub struct Bencode;

impl Bencode {
    /// Decodes one bencoded value from the front of `input`.
    ///
    /// Returns the value together with the number of bytes consumed, so a
    /// caller working through concatenated values can advance past it.
    pub fn decode(input: &[u8]) -> Result<(BValue, usize), BencodeError> {
        let mut decoder = Decoder::new(input);
        let value = decoder.parse()?;
        Ok((value, decoder.position()))
    }

    /// Encodes a value into its canonical bencoded byte form.
    pub fn encode(value: &BValue) -> Vec<u8> {
        Encoder::new().encode(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_decode_roundtrip() {
        let test_cases = vec![
            json!(42),
            json!("Hello, World!"),
            json!(["a", "b", "c"]),
            json!({"x": "y", "z": 42}),
            json!({
                "list": ["a", "b", "c"],
                "dict": {"x": "y", "z": 42}
            }),
        ];

        for value in test_cases {
            let bvalue = BValue::from(value.clone());
            let encoded = Bencode::encode(&bvalue);
            let (decoded, consumed) = Bencode::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded.to_json(), value);
        }
    }

    #[test]
    fn test_decode_encode_roundtrip() {
        let test_cases: Vec<&[u8]> = vec![
            b"i42e",
            b"4:spam",
            b"l4:spami42ee",
            b"d3:bar4:spam3:fooi42ee",
            b"d3:cow3:moo4:spaml1:a1:bee",
        ];

        for input in test_cases {
            let (decoded, consumed) = Bencode::decode(input).unwrap();
            assert_eq!(consumed, input.len());
            assert_eq!(Bencode::encode(&decoded), input);
        }
    }

    #[test]
    fn test_bytestring_roundtrip_arbitrary_octets() {
        for len in [0usize, 1, 3, 255, 1 << 10, 1 << 20] {
            let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
            let encoded = Bencode::encode(&BValue::Bytes(payload.clone()));
            let (decoded, consumed) = Bencode::decode(&encoded).unwrap();
            assert_eq!(consumed, encoded.len());
            assert_eq!(decoded.as_bytes().unwrap(), payload.as_slice());
        }
    }

    #[test]
    fn test_integer_roundtrip() {
        for n in [0i64, 1, -1, 42, -7, i64::MAX, i64::MIN] {
            let encoded = Bencode::encode(&BValue::Integer(n));
            let (decoded, _) = Bencode::decode(&encoded).unwrap();
            assert_eq!(decoded.as_int(), Some(n));
        }
    }

    #[test]
    fn test_nested_dictionary_reencodes_identically() {
        let input = b"d3:cow3:moo4:spaml1:a1:bee";
        let (decoded, _) = Bencode::decode(input).unwrap();
        assert_eq!(
            decoded.get(b"cow").and_then(BValue::as_bytes),
            Some(b"moo".as_slice())
        );
        let spam = decoded.get(b"spam").and_then(BValue::as_list).unwrap();
        assert_eq!(spam.len(), 2);
        assert_eq!(spam[0].as_bytes(), Some(b"a".as_slice()));
        assert_eq!(spam[1].as_bytes(), Some(b"b".as_slice()));
        assert_eq!(Bencode::encode(&decoded), input);
    }
}
