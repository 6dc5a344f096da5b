//! Pluggable serialization boundary between in-memory [crate::Document]
//! values and the bytes the storage file persists.
//!
//! This mirrors the two-function shape spec'd for storage transforms: a
//! concrete `Codec` can prepend a nonce and encrypt, compress, or simply
//! pass the plain encoding through unchanged. The engine treats the
//! result as an opaque blob; only [Codec::encode]/[Codec::decode] know
//! its shape.
//!
//! The document body itself uses a small self-delimiting binary format,
//! tag-byte per value, rather than routing through `cbordata`: documents
//! are dynamically shaped (arbitrary string-keyed maps), and `cbordata`'s
//! `Cborize` derive (used elsewhere in this crate for fixed-shape
//! `Stats`/`Config` records) targets structs with a known field set, not
//! an open map of `Value`. A version byte fronts the encoding so the
//! shape can evolve without breaking old databases.

use std::convert::TryFrom;

use crate::{document::Document, value::Value, Result};

/// Storage-transform seam. Implementations must round-trip:
/// `decode(encode(doc)) == doc`.
pub trait Codec: Send + Sync {
    fn encode(&self, doc: &Document) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Document>;
}

const DOC_VERSION: u8 = 1;

const TAG_NULL: u8 = 0;
const TAG_BOOL_FALSE: u8 = 1;
const TAG_BOOL_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_BYTES: u8 = 6;
const TAG_LIST: u8 = 7;
const TAG_MAP: u8 = 8;

/// Default codec: a flat, self-delimiting binary encoding, no transform.
/// This is what [crate::Database::create] uses unless the caller supplies
/// their own [Codec].
#[derive(Clone, Copy, Default)]
pub struct BinCodec;

impl Codec for BinCodec {
    fn encode(&self, doc: &Document) -> Result<Vec<u8>> {
        let mut buf = vec![DOC_VERSION];
        encode_map(doc.as_map(), &mut buf)?;
        Ok(buf)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Document> {
        if bytes.is_empty() || bytes[0] != DOC_VERSION {
            err_at!(DecodeFail, msg: "unsupported document version {:?}", bytes.get(0))
        }
        let (map, n) = decode_map(&bytes[1..])?;
        if n + 1 != bytes.len() {
            err_at!(DecodeFail, msg: "trailing bytes after document {} {}", n + 1, bytes.len())
        }
        Ok(Document::from_map(map))
    }
}

fn encode_len(n: usize, buf: &mut Vec<u8>) -> Result<()> {
    let n = err_at!(FailConvert, u32::try_from(n))?;
    buf.extend_from_slice(&n.to_be_bytes());
    Ok(())
}

fn decode_len(bytes: &[u8]) -> Result<(usize, usize)> {
    check_remaining!(bytes, 4, "document length prefix")?;
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    Ok((u32::from_be_bytes(arr) as usize, 4))
}

fn encode_value(value: &Value, buf: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => buf.push(TAG_NULL),
        Value::Bool(false) => buf.push(TAG_BOOL_FALSE),
        Value::Bool(true) => buf.push(TAG_BOOL_TRUE),
        Value::Int(n) => {
            buf.push(TAG_INT);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        Value::Float(n) => {
            buf.push(TAG_FLOAT);
            buf.extend_from_slice(&n.to_be_bytes());
        }
        Value::Str(s) => {
            buf.push(TAG_STR);
            encode_len(s.len(), buf)?;
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Bytes(b) => {
            buf.push(TAG_BYTES);
            encode_len(b.len(), buf)?;
            buf.extend_from_slice(b);
        }
        Value::List(items) => {
            buf.push(TAG_LIST);
            encode_len(items.len(), buf)?;
            for item in items {
                encode_value(item, buf)?;
            }
        }
        Value::Map(map) => {
            buf.push(TAG_MAP);
            encode_map(map, buf)?;
        }
    }
    Ok(())
}

fn encode_map(map: &std::collections::BTreeMap<String, Value>, buf: &mut Vec<u8>) -> Result<()> {
    encode_len(map.len(), buf)?;
    for (key, value) in map.iter() {
        encode_len(key.len(), buf)?;
        buf.extend_from_slice(key.as_bytes());
        encode_value(value, buf)?;
    }
    Ok(())
}

fn decode_value(bytes: &[u8]) -> Result<(Value, usize)> {
    check_remaining!(bytes, 1, "value tag")?;
    match bytes[0] {
        TAG_NULL => Ok((Value::Null, 1)),
        TAG_BOOL_FALSE => Ok((Value::Bool(false), 1)),
        TAG_BOOL_TRUE => Ok((Value::Bool(true), 1)),
        TAG_INT => {
            check_remaining!(bytes, 9, "int value")?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[1..9]);
            Ok((Value::Int(i64::from_be_bytes(arr)), 9))
        }
        TAG_FLOAT => {
            check_remaining!(bytes, 9, "float value")?;
            let mut arr = [0u8; 8];
            arr.copy_from_slice(&bytes[1..9]);
            Ok((Value::Float(f64::from_be_bytes(arr)), 9))
        }
        TAG_STR => {
            let (len, n) = decode_len(&bytes[1..])?;
            check_remaining!(bytes[1 + n..], len, "string value")?;
            let s = err_at!(
                DecodeFail,
                String::from_utf8(bytes[1 + n..1 + n + len].to_vec())
            )?;
            Ok((Value::Str(s), 1 + n + len))
        }
        TAG_BYTES => {
            let (len, n) = decode_len(&bytes[1..])?;
            check_remaining!(bytes[1 + n..], len, "bytes value")?;
            let b = bytes[1 + n..1 + n + len].to_vec();
            Ok((Value::Bytes(b), 1 + n + len))
        }
        TAG_LIST => {
            let (len, mut off) = decode_len(&bytes[1..])?;
            off += 1;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                let (value, n) = decode_value(&bytes[off..])?;
                items.push(value);
                off += n;
            }
            Ok((Value::List(items), off))
        }
        TAG_MAP => {
            let (map, n) = decode_map(&bytes[1..])?;
            Ok((Value::Map(map), 1 + n))
        }
        tag => err_at!(DecodeFail, msg: "unknown value tag {}", tag),
    }
}

fn decode_map(bytes: &[u8]) -> Result<(std::collections::BTreeMap<String, Value>, usize)> {
    let (len, mut off) = decode_len(bytes)?;
    let mut map = std::collections::BTreeMap::new();
    for _ in 0..len {
        let (klen, n) = decode_len(&bytes[off..])?;
        off += n;
        check_remaining!(bytes[off..], klen, "map key")?;
        let key = err_at!(DecodeFail, String::from_utf8(bytes[off..off + klen].to_vec()))?;
        off += klen;
        let (value, n) = decode_value(&bytes[off..])?;
        off += n;
        map.insert(key, value);
    }
    Ok((map, off))
}

#[cfg(test)]
#[path = "codec_test.rs"]
mod codec_test;
