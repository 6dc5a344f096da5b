//! The document type persisted by the engine: an arbitrary string-keyed
//! mapping with two reserved fields, `_id` and `_rev`.

use rand::RngCore;
use std::collections::BTreeMap;

use crate::{value::Value, Result};

pub const ID_FIELD: &str = "_id";
pub const REV_FIELD: &str = "_rev";

/// A schema-less document. Opaque to every index except through its
/// `make_key_value` projection.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    pub fn new() -> Document {
        Document {
            fields: BTreeMap::new(),
        }
    }

    pub fn from_map(fields: BTreeMap<String, Value>) -> Document {
        Document { fields }
    }

    pub fn as_map(&self) -> &BTreeMap<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }

    pub fn id(&self) -> Option<&str> {
        self.get(ID_FIELD).and_then(Value::as_str)
    }

    pub fn rev(&self) -> Option<&str> {
        self.get(REV_FIELD).and_then(Value::as_str)
    }

    pub fn set_id(&mut self, id: &str) -> &mut Self {
        self.set(ID_FIELD, id)
    }

    pub fn set_rev(&mut self, rev: &str) -> &mut Self {
        self.set(REV_FIELD, rev)
    }

    /// A document without its engine-managed `_id`/`_rev`, useful for
    /// comparing caller-supplied content against what was stored.
    pub fn without_reserved(&self) -> Document {
        let mut fields = self.fields.clone();
        fields.remove(ID_FIELD);
        fields.remove(REV_FIELD);
        Document { fields }
    }
}

/// Generate a fresh 32 lowercase-hex-digit id.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_simple().to_string()
}

/// Generate a fresh 8 hex-digit revision token.
pub fn new_rev() -> String {
    let mut bytes = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// `_id` must be exactly 32 lowercase hex characters.
pub fn validate_id(id: &str) -> Result<()> {
    let ok = id.len() == 32 && id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        err_at!(Precondition, msg: "malformed _id {:?}, want 32 lowercase hex chars", id)
    }
}

/// `_rev` must be exactly 8 hex characters.
pub fn validate_rev(rev: &str) -> Result<()> {
    let ok = rev.len() == 8 && rev.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if ok {
        Ok(())
    } else {
        err_at!(Precondition, msg: "malformed _rev {:?}, want 8 hex chars", rev)
    }
}

#[cfg(test)]
#[path = "document_test.rs"]
mod document_test;
