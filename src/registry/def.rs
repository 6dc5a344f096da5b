//! Index definition: the properties block plus the two function bodies
//! that an `_indexes/NN<name>.idx` file persists (spec.md §6).
//!
//! File shape:
//!
//! ```text
//! [properties]
//! name = with_a
//! type = hash
//! key_format = 16s
//! hash_lim = 1024
//! unique = false
//!
//! [code]
//! fn make_key_value(doc) {
//!     let a = doc.a
//!     if a == null {
//!         return null
//!     }
//!     return md5(tostr(a))
//! }
//!
//! fn make_key(key) {
//!     return md5(tostr(key))
//! }
//! ```

use std::collections::BTreeMap;

use crate::{registry::lang, Result};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndexType {
    Hash,
    Btree,
}

/// A key's on-disk byte width/encoding, parsed from the `key_format`
/// property. `16s` means a fixed 16-byte (UTF-8, zero-padded) key;
/// `I`/`Q` mean a 4-/8-byte big-endian unsigned integer, mirroring the
/// `struct`-module format characters the original index files use.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyFormat {
    FixedBytes(usize),
    UInt32,
    UInt64,
}

impl KeyFormat {
    pub fn width(&self) -> usize {
        match self {
            KeyFormat::FixedBytes(n) => *n,
            KeyFormat::UInt32 => 4,
            KeyFormat::UInt64 => 8,
        }
    }

    fn parse(s: &str) -> Result<KeyFormat> {
        match s {
            "I" => Ok(KeyFormat::UInt32),
            "Q" => Ok(KeyFormat::UInt64),
            _ if s.ends_with('s') => {
                let digits = &s[..s.len() - 1];
                let n = err_at!(Precondition, digits.parse::<usize>())?;
                Ok(KeyFormat::FixedBytes(n))
            }
            other => err_at!(Precondition, msg: "unrecognized key_format {:?}", other),
        }
    }

    /// Encode a projected [lang::Val] into exactly [KeyFormat::width]
    /// bytes, truncating/padding text and binary keys, or reinterpreting
    /// numeric keys as big-endian integers.
    pub fn encode(&self, val: &lang::Val) -> Result<Vec<u8>> {
        match self {
            KeyFormat::FixedBytes(n) => {
                let mut bytes = val.to_bytes();
                match bytes.len().cmp(n) {
                    std::cmp::Ordering::Equal => {}
                    std::cmp::Ordering::Greater => bytes.truncate(*n),
                    std::cmp::Ordering::Less => bytes.resize(*n, 0),
                }
                Ok(bytes)
            }
            KeyFormat::UInt32 => {
                let n = as_int(val)? as u32;
                Ok(n.to_be_bytes().to_vec())
            }
            KeyFormat::UInt64 => {
                let n = as_int(val)?;
                Ok((n as u64).to_be_bytes().to_vec())
            }
        }
    }
}

fn as_int(val: &lang::Val) -> Result<i64> {
    match val {
        lang::Val::Int(n) => Ok(*n),
        lang::Val::Float(n) => Ok(*n as i64),
        other => err_at!(ValueException, msg: "expected numeric key, got {:?}", other),
    }
}

#[derive(Clone, Debug)]
pub struct IndexDef {
    pub name: String,
    pub kind: IndexType,
    pub key_format: KeyFormat,
    /// `hash_lim` for hash indexes, `node_capacity` for btree indexes.
    pub size_param: usize,
    pub unique: bool,
    pub program: lang::Program,
}

impl IndexDef {
    /// Project a document down to its index key, or `None` if
    /// `make_key_value` returned `null`.
    pub fn project(&self, doc: &crate::Document) -> Result<Option<Vec<u8>>> {
        match self.program.eval_make_key_value(doc)? {
            None => Ok(None),
            Some(val) => Ok(Some(self.key_format.encode(&val)?)),
        }
    }

    /// Project a caller-supplied lookup key the same way
    /// `make_key_value` would have, via `make_key`.
    pub fn project_key(&self, key: &lang::Val) -> Result<Vec<u8>> {
        let val = self.program.eval_make_key(key)?;
        self.key_format.encode(&val)
    }

    /// Convenience over [IndexDef::project_key] for callers holding a
    /// [crate::Value] rather than the mini-language's own [lang::Val].
    pub fn project_value(&self, value: &crate::Value) -> Result<Vec<u8>> {
        self.project_key(&lang::Val::from_value(value))
    }

    pub fn to_text(&self, source_code: &str) -> String {
        let kind = match self.kind {
            IndexType::Hash => "hash",
            IndexType::Btree => "btree",
        };
        let size_key = match self.kind {
            IndexType::Hash => "hash_lim",
            IndexType::Btree => "node_capacity",
        };
        let key_format = match self.key_format {
            KeyFormat::FixedBytes(n) => format!("{}s", n),
            KeyFormat::UInt32 => "I".to_string(),
            KeyFormat::UInt64 => "Q".to_string(),
        };
        format!(
            "[properties]\nname = {}\ntype = {}\nkey_format = {}\n{} = {}\nunique = {}\n\n[code]\n{}",
            self.name, kind, key_format, size_key, self.size_param, self.unique, source_code
        )
    }

    /// Parse a full `_indexes/NN<name>.idx` definition file.
    pub fn parse(text: &str) -> Result<IndexDef> {
        let (props_text, code_text) = split_sections(text)?;
        let props = parse_properties(props_text)?;

        let name = require(&props, "name")?.clone();
        let kind = match require(&props, "type")?.as_str() {
            "hash" => IndexType::Hash,
            "btree" => IndexType::Btree,
            other => err_at!(Precondition, msg: "unknown index type {:?}", other),
        };
        let key_format = KeyFormat::parse(require(&props, "key_format")?)?;
        let size_key = match kind {
            IndexType::Hash => "hash_lim",
            IndexType::Btree => "node_capacity",
        };
        let size_param = err_at!(Precondition, require(&props, size_key)?.parse::<usize>())?;
        let unique = match props.get("unique").map(String::as_str) {
            Some("true") => true,
            Some("false") | None => false,
            Some(other) => err_at!(Precondition, msg: "unique must be true/false, got {:?}", other),
        };
        let program = lang::parse(code_text)?;

        Ok(IndexDef {
            name,
            kind,
            key_format,
            size_param,
            unique,
            program,
        })
    }
}

fn require<'a>(props: &'a BTreeMap<String, String>, key: &str) -> Result<&'a String> {
    props
        .get(key)
        .ok_or_else(|| crate::Error::Precondition(format!("{}:{} missing property {:?}", file!(), line!(), key)))
}

fn split_sections(text: &str) -> Result<(&str, &str)> {
    let props_marker = "[properties]";
    let code_marker = "[code]";
    let props_start = text
        .find(props_marker)
        .ok_or_else(|| crate::Error::Precondition(format!("{}:{} missing [properties] section", file!(), line!())))?
        + props_marker.len();
    let code_start = text
        .find(code_marker)
        .ok_or_else(|| crate::Error::Precondition(format!("{}:{} missing [code] section", file!(), line!())))?;
    if code_start < props_start {
        err_at!(Precondition, msg: "[code] section precedes [properties]")
    }
    Ok((&text[props_start..code_start], &text[code_start + code_marker.len()..]))
}

fn parse_properties(text: &str) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.splitn(2, '=');
        let key = parts.next().unwrap().trim().to_string();
        let value = match parts.next() {
            Some(v) => v.trim().to_string(),
            None => err_at!(Precondition, msg: "malformed property line {:?}", line),
        };
        out.insert(key, value);
    }
    Ok(out)
}

#[cfg(test)]
#[path = "def_test.rs"]
mod def_test;
