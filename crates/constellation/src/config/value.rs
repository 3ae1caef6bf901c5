// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The language-neutral value type carried in dictionaries and payloads.
//!
//! Values are serialized as plain msgpack so that controllers and listeners
//! written in other languages can decode them without a schema. Encoding and
//! decoding is done manually with the `rmp` primitives over a `ByteBuf` /
//! byte slice; timestamps use the msgpack ext type -1 (96-bit form on
//! encode, all three standard forms accepted on decode).

use std::convert::Infallible;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rmp::decode;
use rmp::encode::{self, ByteBuf, RmpWrite, ValueWriteError};
use rmp::Marker;

use crate::message::DecodeError;

/// Unwrap an encode result whose writer is a [`ByteBuf`] (cannot fail).
pub(crate) fn infallible<T>(result: Result<T, ValueWriteError<Infallible>>) -> T {
    match result {
        Ok(value) => value,
        Err(ValueWriteError::InvalidMarkerWrite(e))
        | Err(ValueWriteError::InvalidDataWrite(e)) => match e {},
    }
}

/// Unwrap a marker-only write into a [`ByteBuf`] (cannot fail).
fn infallible_marker<T>(result: Result<T, Infallible>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => match e {},
    }
}

/// A typed configuration or payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Path(PathBuf),
    Time(SystemTime),
    BoolArray(Vec<bool>),
    IntArray(Vec<i64>),
    FloatArray(Vec<f64>),
    StrArray(Vec<String>),
    PathArray(Vec<PathBuf>),
}

impl Value {
    /// Human-readable type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Path(_) => "path",
            Value::Time(_) => "timestamp",
            Value::BoolArray(_) => "bool array",
            Value::IntArray(_) => "int array",
            Value::FloatArray(_) => "float array",
            Value::StrArray(_) => "string array",
            Value::PathArray(_) => "path array",
        }
    }

    /// Encode this value as msgpack into `buf`.
    pub fn encode(&self, buf: &mut ByteBuf) {
        match self {
            Value::Nil => infallible_marker(encode::write_nil(buf)),
            Value::Bool(b) => infallible_marker(encode::write_bool(buf, *b)),
            Value::Int(i) => {
                infallible(encode::write_sint(buf, *i));
            }
            Value::Float(f) => infallible(encode::write_f64(buf, *f)),
            Value::Str(s) => infallible(encode::write_str(buf, s)),
            Value::Path(p) => infallible(encode::write_str(buf, &p.to_string_lossy())),
            Value::Time(t) => encode_timestamp(buf, *t),
            Value::BoolArray(items) => {
                infallible(encode::write_array_len(buf, items.len() as u32));
                for item in items {
                    infallible_marker(encode::write_bool(buf, *item));
                }
            }
            Value::IntArray(items) => {
                infallible(encode::write_array_len(buf, items.len() as u32));
                for item in items {
                    infallible(encode::write_sint(buf, *item));
                }
            }
            Value::FloatArray(items) => {
                infallible(encode::write_array_len(buf, items.len() as u32));
                for item in items {
                    infallible(encode::write_f64(buf, *item));
                }
            }
            Value::StrArray(items) => {
                infallible(encode::write_array_len(buf, items.len() as u32));
                for item in items {
                    infallible(encode::write_str(buf, item));
                }
            }
            Value::PathArray(items) => {
                infallible(encode::write_array_len(buf, items.len() as u32));
                for item in items {
                    infallible(encode::write_str(buf, &item.to_string_lossy()));
                }
            }
        }
    }

    /// Encode as a standalone msgpack byte vector.
    pub fn assemble(&self) -> Vec<u8> {
        let mut buf = ByteBuf::new();
        self.encode(&mut buf);
        buf.into_vec()
    }

    /// Decode a single msgpack value from `bytes` (must be fully consumed).
    pub fn disassemble(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut slice = bytes;
        let value = Value::decode(&mut slice)?;
        if !slice.is_empty() {
            return Err(DecodeError::Malformed(format!(
                "{} trailing bytes after value",
                slice.len()
            )));
        }
        Ok(value)
    }

    /// Decode a single msgpack value from the front of `buf`, advancing it.
    ///
    /// Strings decode as [`Value::Str`]; whether they are paths is decided
    /// by the typed accessor, not the wire format. Empty arrays decode as an
    /// empty string array.
    pub fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        let marker = peek_marker(buf)?;
        match marker {
            Marker::Null => {
                decode::read_nil(buf).map_err(|e| malformed("nil", e))?;
                Ok(Value::Nil)
            }
            Marker::True | Marker::False => {
                let b = decode::read_bool(buf).map_err(|e| malformed("bool", e))?;
                Ok(Value::Bool(b))
            }
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => {
                let i: i64 = decode::read_int(buf).map_err(|e| malformed("integer", e))?;
                Ok(Value::Int(i))
            }
            Marker::F32 => {
                let f = decode::read_f32(buf).map_err(|e| malformed("f32", e))?;
                Ok(Value::Float(f64::from(f)))
            }
            Marker::F64 => {
                let f = decode::read_f64(buf).map_err(|e| malformed("f64", e))?;
                Ok(Value::Float(f))
            }
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                Ok(Value::Str(decode_str(buf)?))
            }
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => decode_array(buf),
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => Ok(Value::Time(decode_timestamp(buf)?)),
            other => Err(DecodeError::Malformed(format!(
                "unsupported msgpack marker {other:?} for a value"
            ))),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn join<T: std::fmt::Display>(
            f: &mut std::fmt::Formatter<'_>,
            items: &[T],
        ) -> std::fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{item}")?;
            }
            write!(f, "]")
        }
        match self {
            Value::Nil => write!(f, "NIL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Path(p) => write!(f, "{}", p.display()),
            Value::Time(t) => match t.duration_since(UNIX_EPOCH) {
                Ok(d) => write!(f, "{}.{:09}", d.as_secs(), d.subsec_nanos()),
                Err(_) => write!(f, "<pre-epoch>"),
            },
            Value::BoolArray(items) => join(f, items),
            Value::IntArray(items) => join(f, items),
            Value::FloatArray(items) => join(f, items),
            Value::StrArray(items) => join(f, items),
            Value::PathArray(items) => {
                let rendered: Vec<String> =
                    items.iter().map(|p| p.display().to_string()).collect();
                join(f, &rendered)
            }
        }
    }
}

fn peek_marker(buf: &[u8]) -> Result<Marker, DecodeError> {
    buf.first()
        .map(|b| Marker::from_u8(*b))
        .ok_or_else(|| DecodeError::Malformed("truncated msgpack data".into()))
}

fn malformed<E: std::fmt::Display>(what: &str, err: E) -> DecodeError {
    DecodeError::Malformed(format!("invalid msgpack {what}: {err}"))
}

fn take<'a>(buf: &mut &'a [u8], len: usize) -> Result<&'a [u8], DecodeError> {
    if buf.len() < len {
        return Err(DecodeError::Malformed(format!(
            "msgpack data truncated: need {len} bytes, have {}",
            buf.len()
        )));
    }
    let (head, tail) = buf.split_at(len);
    *buf = tail;
    Ok(head)
}

/// Decode a msgpack string from the front of `buf`.
pub(crate) fn decode_str(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let len = decode::read_str_len(buf).map_err(|e| malformed("string length", e))? as usize;
    let bytes = take(buf, len)?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| DecodeError::Malformed("msgpack string is not valid UTF-8".into()))
}

fn decode_array(buf: &mut &[u8]) -> Result<Value, DecodeError> {
    let len = decode::read_array_len(buf).map_err(|e| malformed("array length", e))? as usize;
    if len == 0 {
        return Ok(Value::StrArray(Vec::new()));
    }
    // The first element decides the array flavor; mixed arrays are rejected.
    let first = Value::decode(buf)?;
    match first {
        Value::Bool(b) => {
            let mut items = Vec::with_capacity(len);
            items.push(b);
            for _ in 1..len {
                match Value::decode(buf)? {
                    Value::Bool(b) => items.push(b),
                    other => return Err(mixed_array("bool", &other)),
                }
            }
            Ok(Value::BoolArray(items))
        }
        Value::Int(i) => {
            let mut items = Vec::with_capacity(len);
            items.push(i);
            for _ in 1..len {
                match Value::decode(buf)? {
                    Value::Int(i) => items.push(i),
                    other => return Err(mixed_array("int", &other)),
                }
            }
            Ok(Value::IntArray(items))
        }
        Value::Float(x) => {
            let mut items = Vec::with_capacity(len);
            items.push(x);
            for _ in 1..len {
                match Value::decode(buf)? {
                    Value::Float(x) => items.push(x),
                    Value::Int(i) => items.push(i as f64),
                    other => return Err(mixed_array("float", &other)),
                }
            }
            Ok(Value::FloatArray(items))
        }
        Value::Str(s) => {
            let mut items = Vec::with_capacity(len);
            items.push(s);
            for _ in 1..len {
                match Value::decode(buf)? {
                    Value::Str(s) => items.push(s),
                    other => return Err(mixed_array("string", &other)),
                }
            }
            Ok(Value::StrArray(items))
        }
        other => Err(DecodeError::Malformed(format!(
            "unsupported array element type {}",
            other.type_name()
        ))),
    }
}

fn mixed_array(expected: &str, got: &Value) -> DecodeError {
    DecodeError::Malformed(format!(
        "mixed msgpack array: expected {expected}, found {}",
        got.type_name()
    ))
}

fn encode_timestamp(buf: &mut ByteBuf, time: SystemTime) {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    // timestamp 96: ext type -1, u32 nanoseconds followed by i64 seconds
    infallible(encode::write_ext_meta(buf, 12, -1));
    let write = |buf: &mut ByteBuf, bytes: &[u8]| match buf.write_bytes(bytes) {
        Ok(()) => (),
        Err(e) => match e {},
    };
    write(buf, &duration.subsec_nanos().to_be_bytes());
    write(buf, &(duration.as_secs() as i64).to_be_bytes());
}

fn decode_timestamp(buf: &mut &[u8]) -> Result<SystemTime, DecodeError> {
    let meta = decode::read_ext_meta(buf).map_err(|e| malformed("ext header", e))?;
    if meta.typeid != -1 {
        return Err(DecodeError::Malformed(format!(
            "unsupported msgpack ext type {}",
            meta.typeid
        )));
    }
    let data = take(buf, meta.size as usize)?;
    let (secs, nanos) = match data.len() {
        4 => (u64::from(u32::from_be_bytes([data[0], data[1], data[2], data[3]])), 0u32),
        8 => {
            let packed = u64::from_be_bytes(data.try_into().expect("length checked"));
            (packed & 0x3_FFFF_FFFF, (packed >> 34) as u32)
        }
        12 => {
            let nanos = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            let secs = i64::from_be_bytes(data[4..12].try_into().expect("length checked"));
            if secs < 0 {
                return Err(DecodeError::Malformed("pre-epoch timestamp".into()));
            }
            (secs as u64, nanos)
        }
        other => {
            return Err(DecodeError::Malformed(format!(
                "invalid timestamp ext length {other}"
            )))
        }
    };
    Ok(UNIX_EPOCH + Duration::new(secs, nanos))
}

/// Read an unsigned integer from the front of a msgpack buffer (headers use
/// this for timestamps and sequence numbers).
pub(crate) fn decode_u64(buf: &mut &[u8]) -> Result<u64, DecodeError> {
    decode::read_int(buf).map_err(|e| malformed("u64", e))
}

/// Read a single byte-sized unsigned integer.
pub(crate) fn decode_u8(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    decode::read_int(buf).map_err(|e| malformed("u8", e))
}

/// Conversion from a [`Value`] into a concrete Rust type.
pub trait FromValue: Sized {
    /// Expected type name for error messages.
    const EXPECTED: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromValue for u64 {
    const EXPECTED: &'static str = "unsigned int";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) if *i >= 0 => Some(*i as u64),
            _ => None,
        }
    }
}

impl FromValue for u16 {
    const EXPECTED: &'static str = "port number";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => u16::try_from(*i).ok(),
            _ => None,
        }
    }
}

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Str(s) => Some(s.clone()),
            Value::Path(p) => Some(p.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

impl FromValue for PathBuf {
    const EXPECTED: &'static str = "path";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Path(p) => Some(p.clone()),
            Value::Str(s) => Some(PathBuf::from(s)),
            _ => None,
        }
    }
}

impl FromValue for SystemTime {
    const EXPECTED: &'static str = "timestamp";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl FromValue for Vec<bool> {
    const EXPECTED: &'static str = "bool array";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::BoolArray(items) => Some(items.clone()),
            Value::StrArray(items) if items.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }
}

impl FromValue for Vec<i64> {
    const EXPECTED: &'static str = "int array";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntArray(items) => Some(items.clone()),
            Value::StrArray(items) if items.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }
}

impl FromValue for Vec<f64> {
    const EXPECTED: &'static str = "float array";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::FloatArray(items) => Some(items.clone()),
            Value::StrArray(items) if items.is_empty() => Some(Vec::new()),
            _ => None,
        }
    }
}

impl FromValue for Vec<String> {
    const EXPECTED: &'static str = "string array";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::StrArray(items) => Some(items.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<PathBuf> {
    const EXPECTED: &'static str = "path array";
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::PathArray(items) => Some(items.clone()),
            Value::StrArray(items) => Some(items.iter().map(PathBuf::from).collect()),
            _ => None,
        }
    }
}

/// Conversion from a concrete Rust type into a [`Value`].
pub trait IntoValue {
    fn into_value(self) -> Value;
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoValue for i32 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl IntoValue for u64 {
    fn into_value(self) -> Value {
        Value::Int(self as i64)
    }
}

impl IntoValue for u16 {
    fn into_value(self) -> Value {
        Value::Int(i64::from(self))
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_owned())
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for PathBuf {
    fn into_value(self) -> Value {
        Value::Path(self)
    }
}

impl IntoValue for SystemTime {
    fn into_value(self) -> Value {
        Value::Time(self)
    }
}

impl IntoValue for Vec<bool> {
    fn into_value(self) -> Value {
        Value::BoolArray(self)
    }
}

impl IntoValue for Vec<i64> {
    fn into_value(self) -> Value {
        Value::IntArray(self)
    }
}

impl IntoValue for Vec<f64> {
    fn into_value(self) -> Value {
        Value::FloatArray(self)
    }
}

impl IntoValue for Vec<String> {
    fn into_value(self) -> Value {
        Value::StrArray(self)
    }
}

impl IntoValue for Vec<&str> {
    fn into_value(self) -> Value {
        Value::StrArray(self.into_iter().map(str::to_owned).collect())
    }
}

impl IntoValue for Vec<PathBuf> {
    fn into_value(self) -> Value {
        Value::PathArray(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: Value) -> Value {
        let bytes = value.assemble();
        Value::disassemble(&bytes).expect("decode")
    }

    #[test]
    fn scalars_roundtrip() {
        assert_eq!(roundtrip(Value::Nil), Value::Nil);
        assert_eq!(roundtrip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(roundtrip(Value::Int(-42)), Value::Int(-42));
        assert_eq!(roundtrip(Value::Int(i64::MAX)), Value::Int(i64::MAX));
        assert_eq!(roundtrip(Value::Float(2.5)), Value::Float(2.5));
        assert_eq!(roundtrip(Value::Str("orbit".into())), Value::Str("orbit".into()));
    }

    #[test]
    fn paths_travel_as_strings() {
        assert_eq!(
            roundtrip(Value::Path(PathBuf::from("/data/run1"))),
            Value::Str("/data/run1".into())
        );
    }

    #[test]
    fn arrays_roundtrip() {
        assert_eq!(roundtrip(Value::IntArray(vec![1, 2, 3])), Value::IntArray(vec![1, 2, 3]));
        assert_eq!(
            roundtrip(Value::StrArray(vec!["a".into(), "b".into()])),
            Value::StrArray(vec!["a".into(), "b".into()])
        );
        assert_eq!(roundtrip(Value::BoolArray(vec![true, false])), Value::BoolArray(vec![true, false]));
    }

    #[test]
    fn timestamp_roundtrips() {
        let t = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        assert_eq!(roundtrip(Value::Time(t)), Value::Time(t));
    }

    #[test]
    fn mixed_array_is_rejected() {
        let mut buf = ByteBuf::new();
        infallible(encode::write_array_len(&mut buf, 2));
        infallible(encode::write_sint(&mut buf, 1));
        infallible(encode::write_str(&mut buf, "nope"));
        assert!(Value::disassemble(&buf.into_vec()).is_err());
    }

    #[test]
    fn truncated_data_is_rejected() {
        let bytes = Value::Str("truncate me".into()).assemble();
        assert!(Value::disassemble(&bytes[..bytes.len() - 3]).is_err());
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let mut bytes = Value::Int(1).assemble();
        bytes.push(0xC0);
        assert!(Value::disassemble(&bytes).is_err());
    }

    #[test]
    fn typed_conversions() {
        assert_eq!(u64::from_value(&Value::Int(7)), Some(7));
        assert_eq!(u64::from_value(&Value::Int(-7)), None);
        assert_eq!(f64::from_value(&Value::Int(2)), Some(2.0));
        assert_eq!(String::from_value(&Value::Int(2)), None);
        assert_eq!(PathBuf::from_value(&Value::Str("/tmp/x".into())), Some(PathBuf::from("/tmp/x")));
        assert_eq!(
            Vec::<String>::from_value(&Value::StrArray(vec!["Dummy.t1".into()])),
            Some(vec!["Dummy.t1".to_string()])
        );
    }
}
