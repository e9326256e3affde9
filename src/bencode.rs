//! Bencode support shared by the DHT and metadata modules.
//!
//! Dictionary keys preserve first-seen order, matching the wire format exactly. Hash
//! verification of a received metadata blob must always run against these raw bytes,
//! never against a re-serialized form: `serde_bencode`'s encoder is not guaranteed to
//! reproduce the exact byte sequence a peer sent.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

/// A bencode value: the recursive sum type over integer, byte-string, list and
/// dictionary that BEP 3 describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(Vec<(Vec<u8>, Value)>),
}

impl Value {
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_dict(&self) -> Option<&[(Vec<u8>, Value)]> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Looks up a key in a dictionary value. Returns `None` for non-dictionaries.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.iter().find(|(k, _)| k == key.as_bytes()).map(|(_, v)| v)
    }
}

/// Decodes a single bencoded value from raw bytes, ignoring trailing data.
///
/// # Errors
///
/// Returns an error if `bytes` is not well-formed bencode.
pub fn decode(bytes: &[u8]) -> Result<Value, DecodeError> {
    let (value, _rest) = decode_one(bytes)?;
    Ok(value)
}

/// Decodes a single bencoded value and returns whatever bytes follow it,
/// unparsed. Used for ut_metadata `data` messages (BEP 9), where a bencoded
/// header dict is immediately followed by the raw piece bytes with no
/// delimiter between them.
pub fn decode_with_remainder(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    decode_one(bytes)
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unexpected end of bencode input")]
    UnexpectedEof,
    #[error("invalid bencode byte {0:#x} at offset {1}")]
    InvalidByte(u8, usize),
    #[error("non-UTF-8 or malformed integer in bencode input")]
    MalformedInteger,
}

fn decode_one(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    match bytes.first() {
        None => Err(DecodeError::UnexpectedEof),
        Some(b'i') => decode_int(bytes),
        Some(b'l') => decode_list(bytes),
        Some(b'd') => decode_dict(bytes),
        Some(b'0'..=b'9') => decode_bytes(bytes),
        Some(&other) => Err(DecodeError::InvalidByte(other, 0)),
    }
}

fn decode_int(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let end = bytes.iter().position(|&b| b == b'e').ok_or(DecodeError::UnexpectedEof)?;
    let digits = std::str::from_utf8(&bytes[1..end]).map_err(|_| DecodeError::MalformedInteger)?;
    let value = digits.parse::<i64>().map_err(|_| DecodeError::MalformedInteger)?;
    Ok((Value::Int(value), &bytes[end + 1..]))
}

fn decode_bytes(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let colon = bytes.iter().position(|&b| b == b':').ok_or(DecodeError::UnexpectedEof)?;
    let len_str = std::str::from_utf8(&bytes[..colon]).map_err(|_| DecodeError::MalformedInteger)?;
    let len = len_str.parse::<usize>().map_err(|_| DecodeError::MalformedInteger)?;
    let start = colon + 1;
    let end = start.checked_add(len).ok_or(DecodeError::UnexpectedEof)?;
    if end > bytes.len() {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok((Value::Bytes(bytes[start..end].to_vec()), &bytes[end..]))
}

fn decode_list(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let mut rest = &bytes[1..];
    let mut items = Vec::new();
    loop {
        match rest.first() {
            None => return Err(DecodeError::UnexpectedEof),
            Some(b'e') => return Ok((Value::List(items), &rest[1..])),
            _ => {
                let (item, new_rest) = decode_one(rest)?;
                items.push(item);
                rest = new_rest;
            }
        }
    }
}

fn decode_dict(bytes: &[u8]) -> Result<(Value, &[u8]), DecodeError> {
    let mut rest = &bytes[1..];
    let mut entries = Vec::new();
    loop {
        match rest.first() {
            None => return Err(DecodeError::UnexpectedEof),
            Some(b'e') => return Ok((Value::Dict(entries), &rest[1..])),
            _ => {
                let (key, new_rest) = decode_one(rest)?;
                let key = key.as_bytes().ok_or(DecodeError::MalformedInteger)?.to_vec();
                let (value, new_rest) = decode_one(new_rest)?;
                entries.push((key, value));
                rest = new_rest;
            }
        }
    }
}

/// A `{path, length}` entry as it appears inside the `files` list of a multi-file
/// torrent's info dictionary.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct RawFileEntry {
    pub length: i64,
    pub path: Vec<ByteBuf>,
}

/// The subset of a torrent's info dictionary this crate cares about: the name and,
/// depending on whether the torrent is single- or multi-file, either `length` or
/// `files`. Extra fields (`piece length`, `pieces`, ...) are ignored on purpose —
/// they carry no metadata this indexer surfaces.
#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct RawInfoDict {
    pub name: ByteBuf,
    pub length: Option<i64>,
    pub files: Option<Vec<RawFileEntry>>,
}

/// Parses an info dictionary from raw bytes using `serde_bencode`.
///
/// # Errors
///
/// Returns an error if `bytes` does not decode into the expected shape.
pub(crate) fn parse_info_dict(bytes: &[u8]) -> Result<RawInfoDict, serde_bencode::Error> {
    serde_bencode::from_bytes(bytes)
}

/// Re-exported so callers that only need ordering-insensitive comparisons (tests)
/// can build dictionaries without worrying about key order.
pub type OrderedDict = BTreeMap<Vec<u8>, Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_file_info_dict_scenario() {
        let raw = b"d6:lengthi12e4:name5:helloe";
        let parsed = parse_info_dict(raw).unwrap();
        assert_eq!(parsed.name.as_ref(), b"hello");
        assert_eq!(parsed.length, Some(12));
        assert!(parsed.files.is_none());
    }

    #[test]
    fn decodes_multi_file_info_dict_scenario() {
        let raw = b"d5:filesld6:lengthi3e4:pathl1:a1:beed6:lengthi5e4:pathl1:ceee4:name3:foobare";
        let parsed = parse_info_dict(raw).unwrap();
        assert_eq!(parsed.name.as_ref(), b"foobar");
        let files = parsed.files.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].length, 3);
        assert_eq!(files[0].path[0].as_ref(), b"a");
        assert_eq!(files[0].path[1].as_ref(), b"b");
        assert_eq!(files[1].length, 5);
        assert_eq!(files[1].path[0].as_ref(), b"c");
    }

    #[test]
    fn decode_preserves_key_order_for_generic_values() {
        let raw = b"d1:zi1e1:ai2ee";
        let value = decode(raw).unwrap();
        let dict = value.as_dict().unwrap();
        assert_eq!(dict[0].0, b"z");
        assert_eq!(dict[1].0, b"a");
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let raw = b"d3:foo";
        assert!(decode(raw).is_err());
    }
}
