// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Wire containers: string-keyed dictionaries and value lists.
//!
//! These are the payload building blocks of the framed protocols: BOR
//! configurations, EOR metadata, message tags and user-command argument
//! lists all travel as one of these two shapes, encoded as a msgpack map or
//! array.

use std::collections::btree_map::{self, BTreeMap};

use rmp::decode;
use rmp::encode::{self, ByteBuf};

use crate::config::value::{decode_str, infallible, IntoValue, Value};
use crate::message::DecodeError;

/// An ordered `string -> Value` mapping, msgpack-encoded as a map.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dictionary {
    entries: BTreeMap<String, Value>,
}

impl Dictionary {
    pub fn new() -> Self {
        Dictionary::default()
    }

    /// Insert or overwrite an entry.
    pub fn insert<V: IntoValue>(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value.into_value());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.entries.iter()
    }

    pub fn keys(&self) -> btree_map::Keys<'_, String, Value> {
        self.entries.keys()
    }

    /// Encode into an existing buffer.
    pub fn encode(&self, buf: &mut ByteBuf) {
        infallible(encode::write_map_len(buf, self.entries.len() as u32));
        for (key, value) in &self.entries {
            infallible(encode::write_str(buf, key));
            value.encode(buf);
        }
    }

    /// Encode as a standalone msgpack map.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        self.encode(&mut buf);
        buf.into_vec()
    }

    /// Decode a msgpack map from the front of `buf`, advancing it.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let len = decode::read_map_len(buf)
            .map_err(|e| DecodeError::Malformed(format!("invalid msgpack map length: {e}")))?;
        let mut entries = BTreeMap::new();
        for _ in 0..len {
            let key = decode_str(buf)?;
            let value = Value::decode(buf)?;
            entries.insert(key, value);
        }
        Ok(Dictionary { entries })
    }

    /// Decode a standalone msgpack map (must consume all bytes).
    pub fn disassemble(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = bytes;
        let dict = Dictionary::decode(&mut slice)?;
        if !slice.is_empty() {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes after dictionary",
                slice.len()
            )));
        }
        Ok(dict)
    }
}

impl IntoIterator for Dictionary {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Dictionary { entries: iter.into_iter().collect() }
    }
}

impl std::fmt::Display for Dictionary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {key}: {value}")?;
        }
        write!(f, " }}")
    }
}

/// An ordered value list, msgpack-encoded as an array.
///
/// Unlike [`Value`]'s typed arrays, a list may mix element types; it is the
/// shape of user-command argument payloads.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct List {
    items: Vec<Value>,
}

impl List {
    pub fn new() -> Self {
        List::default()
    }

    pub fn push<V: IntoValue>(&mut self, value: V) {
        self.items.push(value.into_value());
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.items.iter()
    }

    /// Encode as a standalone msgpack array.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        infallible(encode::write_array_len(&mut buf, self.items.len() as u32));
        for item in &self.items {
            item.encode(&mut buf);
        }
        buf.into_vec()
    }

    /// Decode a standalone msgpack array (must consume all bytes).
    pub fn disassemble(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = bytes;
        let len = decode::read_array_len(&mut slice)
            .map_err(|e| DecodeError::Malformed(format!("invalid msgpack array length: {e}")))?;
        let mut items = Vec::with_capacity(len as usize);
        for _ in 0..len {
            items.push(Value::decode(&mut slice)?);
        }
        if !slice.is_empty() {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes after list",
                slice.len()
            )));
        }
        Ok(List { items })
    }
}

impl FromIterator<Value> for List {
    fn from_iter<T: IntoIterator<Item = Value>>(iter: T) -> Self {
        List { items: iter.into_iter().collect() }
    }
}

impl IntoIterator for List {
    type Item = Value;
    type IntoIter = std::vec::IntoIter<Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_roundtrip() {
        let mut dict = Dictionary::new();
        dict.insert("run_id", "test");
        dict.insert("_eor_timeout", 1u64);
        dict.insert("tainted", false);
        dict.insert("rates", vec![1.5, 2.5]);

        let decoded = Dictionary::disassemble(&dict.assemble()).expect("decode");
        assert_eq!(decoded, dict);
        assert_eq!(decoded.get("run_id"), Some(&Value::Str("test".into())));
        assert_eq!(decoded.get("_eor_timeout"), Some(&Value::Int(1)));
    }

    #[test]
    fn empty_dictionary_roundtrip() {
        let dict = Dictionary::new();
        assert_eq!(Dictionary::disassemble(&dict.assemble()).expect("decode"), dict);
    }

    #[test]
    fn list_may_mix_types() {
        let mut list = List::new();
        list.push(1i64);
        list.push("two");
        list.push(3.0f64);

        let decoded = List::disassemble(&list.assemble()).expect("decode");
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded.get(0), Some(&Value::Int(1)));
        assert_eq!(decoded.get(1), Some(&Value::Str("two".into())));
        assert_eq!(decoded.get(2), Some(&Value::Float(3.0)));
    }

    #[test]
    fn dictionary_rejects_trailing_bytes() {
        let mut bytes = Dictionary::new().assemble();
        bytes.push(0xC0);
        assert!(Dictionary::disassemble(&bytes).is_err());
    }

    #[test]
    fn dictionary_display_is_compact() {
        let mut dict = Dictionary::new();
        dict.insert("a", 1i64);
        dict.insert("b", "x");
        assert_eq!(dict.to_string(), "{ a: 1, b: x }");
    }
}
