//! The BSON value model.

use std::fmt::{self, Debug, Display};

use chrono::{LocalResult, TimeZone, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::document::Document;
use crate::oid::ObjectId;
use crate::raw::RawBson;
use crate::spec::ElementType;

/// Alias for `Vec<Bson>`.
pub type Array = Vec<Bson>;

/// A BSON datetime: milliseconds since the Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct UtcDateTime(pub i64);

impl UtcDateTime {
    pub fn now() -> UtcDateTime {
        UtcDateTime(Utc::now().timestamp_millis())
    }

    pub fn timestamp_millis(&self) -> i64 {
        self.0
    }

    /// The value as a `chrono` datetime.
    ///
    /// Not every BSON datetime can be represented as a [`chrono::DateTime`];
    /// for such values [`chrono::DateTime::MIN_UTC`] or
    /// [`chrono::DateTime::MAX_UTC`] is returned, whichever is closer.
    pub fn to_chrono(&self) -> chrono::DateTime<Utc> {
        match Utc.timestamp_millis_opt(self.0) {
            LocalResult::Single(dt) => dt,
            _ => {
                if self.0 < 0 {
                    chrono::DateTime::<Utc>::MIN_UTC
                } else {
                    chrono::DateTime::<Utc>::MAX_UTC
                }
            }
        }
    }

    pub fn from_chrono(dt: chrono::DateTime<Utc>) -> UtcDateTime {
        UtcDateTime(dt.timestamp_millis())
    }
}

/// A BSON timestamp, an opaque 64-bit value used internally by the server.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Timestamp(pub i64);

/// A BSON symbol.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Symbol(pub String);

/// Javascript code.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Code(pub String);

/// Javascript code with a scope document.
#[derive(Clone, PartialEq, Debug)]
pub struct CodeWithScope {
    pub code: String,
    pub scope: Document,
}

/// A BSON regular expression.
///
/// The valid options are `i`, `l`, `m`, `s`, `u` and `x`, and must be given
/// in alphabetical order.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Regexp {
    pub pattern: String,
    pub options: String,
}

impl Regexp {
    pub fn new(pattern: impl Into<String>, options: impl Into<String>) -> Regexp {
        Regexp {
            pattern: pattern.into(),
            options: options.into(),
        }
    }
}

/// The minimum or maximum BSON value, used as open range endpoints in index
/// scans.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MinMax {
    Min,
    Max,
}

/// A BSON value of any kind.
#[derive(Clone, PartialEq)]
pub enum Bson {
    Float(f64),
    String(String),
    Document(Document),
    Array(Array),
    Binary(Vec<u8>),
    ObjectId(ObjectId),
    Boolean(bool),
    DateTime(UtcDateTime),
    Null,
    Regexp(Regexp),
    Code(String),
    Symbol(String),
    CodeWithScope(CodeWithScope),
    I32(i32),
    Timestamp(Timestamp),
    I64(i64),
    MaxKey,
    MinKey,
}

impl Bson {
    /// The kind byte this value is written with.
    pub fn element_type(&self) -> ElementType {
        match self {
            Bson::Float(..) => ElementType::Float64,
            Bson::String(..) => ElementType::String,
            Bson::Document(..) => ElementType::Document,
            Bson::Array(..) => ElementType::Array,
            Bson::Binary(..) => ElementType::Binary,
            Bson::ObjectId(..) => ElementType::ObjectId,
            Bson::Boolean(..) => ElementType::Bool,
            Bson::DateTime(..) => ElementType::DateTime,
            Bson::Null => ElementType::Null,
            Bson::Regexp(..) => ElementType::Regexp,
            Bson::Code(..) => ElementType::Code,
            Bson::Symbol(..) => ElementType::Symbol,
            Bson::CodeWithScope(..) => ElementType::CodeWithScope,
            Bson::I32(..) => ElementType::Int32,
            Bson::Timestamp(..) => ElementType::Timestamp,
            Bson::I64(..) => ElementType::Int64,
            Bson::MaxKey => ElementType::MaxKey,
            Bson::MinKey => ElementType::MinKey,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Bson::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Bson::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Bson::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Bson::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Bson::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Bson::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Bson::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> Option<ObjectId> {
        match self {
            Bson::ObjectId(id) => Some(*id),
            _ => None,
        }
    }

    /// The extended-document form of a value that has no native serde
    /// representation. The serde bridge round-trips domain types through
    /// these small tagged maps.
    pub(crate) fn to_extended_document(&self) -> Document {
        let mut doc = Document::new();
        match self {
            Bson::ObjectId(id) => {
                doc.insert("$oid", id.to_hex());
            }
            Bson::DateTime(dt) => {
                doc.insert("$date", dt.0);
            }
            Bson::Timestamp(ts) => {
                doc.insert("$timestamp", ts.0);
            }
            Bson::Symbol(s) => {
                doc.insert("$symbol", s.as_str());
            }
            Bson::Code(c) => {
                doc.insert("$code", c.as_str());
            }
            Bson::CodeWithScope(cws) => {
                doc.insert("$code", cws.code.as_str());
                doc.insert("$scope", cws.scope.clone());
            }
            Bson::Regexp(r) => {
                doc.insert("$regex", r.pattern.as_str());
                doc.insert("$options", r.options.as_str());
            }
            Bson::MinKey => {
                doc.insert("$minMaxKey", -1i32);
            }
            Bson::MaxKey => {
                doc.insert("$minMaxKey", 1i32);
            }
            _ => panic!("no extended form for {:?}", self.element_type()),
        }
        doc
    }

    /// Folds an extended document back into the domain value it stands for,
    /// or returns the document unchanged when it is not one of the tagged
    /// shapes.
    pub(crate) fn from_extended_document(doc: Document) -> Bson {
        if doc.len() == 1 {
            if let Some(hex) = doc.get_str("$oid") {
                if let Ok(id) = ObjectId::parse_str(hex) {
                    return Bson::ObjectId(id);
                }
            } else if let Some(ms) = doc.get("$date").and_then(int_value) {
                return Bson::DateTime(UtcDateTime(ms));
            } else if let Some(v) = doc.get("$timestamp").and_then(int_value) {
                return Bson::Timestamp(Timestamp(v));
            } else if let Some(s) = doc.get_str("$symbol") {
                return Bson::Symbol(s.to_owned());
            } else if let Some(c) = doc.get_str("$code") {
                return Bson::Code(c.to_owned());
            } else if let Some(v) = doc.get("$minMaxKey").and_then(int_value) {
                match v {
                    -1 => return Bson::MinKey,
                    1 => return Bson::MaxKey,
                    _ => {}
                }
            }
        } else if doc.len() == 2 {
            if let (Some(pattern), Some(options)) =
                (doc.get_str("$regex"), doc.get_str("$options"))
            {
                return Bson::Regexp(Regexp::new(pattern, options));
            }
            if let (Some(code), Some(scope)) = (doc.get_str("$code"), doc.get_document("$scope"))
            {
                return Bson::CodeWithScope(CodeWithScope {
                    code: code.to_owned(),
                    scope: scope.clone(),
                });
            }
            if let (Some(kind), Some(data)) = (
                doc.get("$rawKind").and_then(int_value),
                doc.get_str("$rawData"),
            ) {
                if let Some(raw) = decode_raw_pair(kind, data) {
                    if let Ok(value) = raw.to_bson() {
                        return value;
                    }
                }
            }
        }
        Bson::Document(doc)
    }
}

fn int_value(value: &Bson) -> Option<i64> {
    match value {
        Bson::I32(v) => Some(*v as i64),
        Bson::I64(v) => Some(*v),
        _ => None,
    }
}

fn decode_raw_pair(kind: i64, data: &str) -> Option<RawBson> {
    let kind = ElementType::from_u8(u8::try_from(kind).ok()?)?;
    let data = hex::decode(data).ok()?;
    Some(RawBson::new(kind, data))
}

impl Debug for Bson {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Float(v) => write!(f, "Float({:?})", v),
            Bson::String(s) => write!(f, "String({:?})", s),
            Bson::Document(d) => write!(f, "Document({})", d),
            Bson::Array(a) => write!(f, "Array({:?})", a),
            Bson::Binary(b) => write!(f, "Binary(0x{})", hex::encode(b)),
            Bson::ObjectId(id) => write!(f, "{:?}", id),
            Bson::Boolean(b) => write!(f, "Boolean({:?})", b),
            Bson::DateTime(dt) => write!(f, "DateTime({})", dt.0),
            Bson::Null => write!(f, "Null"),
            Bson::Regexp(r) => write!(f, "Regexp(/{}/{})", r.pattern, r.options),
            Bson::Code(c) => write!(f, "Code({:?})", c),
            Bson::Symbol(s) => write!(f, "Symbol({:?})", s),
            Bson::CodeWithScope(c) => write!(f, "CodeWithScope({:?}, {})", c.code, c.scope),
            Bson::I32(v) => write!(f, "I32({:?})", v),
            Bson::Timestamp(ts) => write!(f, "Timestamp({})", ts.0),
            Bson::I64(v) => write!(f, "I64({:?})", v),
            Bson::MaxKey => write!(f, "MaxKey"),
            Bson::MinKey => write!(f, "MinKey"),
        }
    }
}

impl Display for Bson {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bson::Float(v) => write!(f, "{}", v),
            Bson::String(s) => write!(f, "\"{}\"", s),
            Bson::Document(d) => write!(f, "{}", d),
            Bson::Array(a) => {
                write!(f, "[")?;
                for (i, value) in a.iter().enumerate() {
                    if i != 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, "]")
            }
            Bson::Binary(b) => write!(f, "BinData(0, 0x{})", hex::encode(b)),
            Bson::ObjectId(id) => write!(f, "ObjectId(\"{}\")", id),
            Bson::Boolean(b) => write!(f, "{}", b),
            Bson::DateTime(dt) => write!(f, "Date({})", dt.0),
            Bson::Null => write!(f, "null"),
            Bson::Regexp(r) => write!(f, "/{}/{}", r.pattern, r.options),
            Bson::Code(c) | Bson::Symbol(c) => f.write_str(c),
            Bson::CodeWithScope(c) => f.write_str(&c.code),
            Bson::I32(v) => write!(f, "{}", v),
            Bson::Timestamp(ts) => write!(f, "Timestamp({})", ts.0),
            Bson::I64(v) => write!(f, "{}", v),
            Bson::MaxKey => write!(f, "MaxKey"),
            Bson::MinKey => write!(f, "MinKey"),
        }
    }
}

impl From<f32> for Bson {
    fn from(v: f32) -> Bson {
        Bson::Float(v as f64)
    }
}

impl From<f64> for Bson {
    fn from(v: f64) -> Bson {
        Bson::Float(v)
    }
}

impl<'a> From<&'a str> for Bson {
    fn from(s: &str) -> Bson {
        Bson::String(s.to_owned())
    }
}

impl From<String> for Bson {
    fn from(s: String) -> Bson {
        Bson::String(s)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Bson {
        Bson::Boolean(v)
    }
}

impl From<i8> for Bson {
    fn from(v: i8) -> Bson {
        Bson::I32(v as i32)
    }
}

impl From<i16> for Bson {
    fn from(v: i16) -> Bson {
        Bson::I32(v as i32)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Bson {
        Bson::I32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Bson {
        Bson::I64(v)
    }
}

impl From<u8> for Bson {
    fn from(v: u8) -> Bson {
        Bson::I32(v as i32)
    }
}

impl From<u16> for Bson {
    fn from(v: u16) -> Bson {
        Bson::I32(v as i32)
    }
}

impl From<u32> for Bson {
    fn from(v: u32) -> Bson {
        Bson::I64(v as i64)
    }
}

impl From<Array> for Bson {
    fn from(a: Array) -> Bson {
        Bson::Array(a)
    }
}

impl From<Document> for Bson {
    fn from(d: Document) -> Bson {
        Bson::Document(d)
    }
}

impl From<ObjectId> for Bson {
    fn from(id: ObjectId) -> Bson {
        Bson::ObjectId(id)
    }
}

impl From<UtcDateTime> for Bson {
    fn from(dt: UtcDateTime) -> Bson {
        Bson::DateTime(dt)
    }
}

impl From<chrono::DateTime<Utc>> for Bson {
    fn from(dt: chrono::DateTime<Utc>) -> Bson {
        Bson::DateTime(UtcDateTime::from_chrono(dt))
    }
}

impl From<Timestamp> for Bson {
    fn from(ts: Timestamp) -> Bson {
        Bson::Timestamp(ts)
    }
}

impl From<Symbol> for Bson {
    fn from(s: Symbol) -> Bson {
        Bson::Symbol(s.0)
    }
}

impl From<Code> for Bson {
    fn from(c: Code) -> Bson {
        Bson::Code(c.0)
    }
}

impl From<CodeWithScope> for Bson {
    fn from(c: CodeWithScope) -> Bson {
        Bson::CodeWithScope(c)
    }
}

impl From<Regexp> for Bson {
    fn from(r: Regexp) -> Bson {
        Bson::Regexp(r)
    }
}

impl From<MinMax> for Bson {
    fn from(m: MinMax) -> Bson {
        match m {
            MinMax::Min => Bson::MinKey,
            MinMax::Max => Bson::MaxKey,
        }
    }
}

impl<T: Into<Bson>> From<Option<T>> for Bson {
    fn from(v: Option<T>) -> Bson {
        match v {
            Some(v) => v.into(),
            None => Bson::Null,
        }
    }
}

// Serde bridging. Values with a native serde representation use it; the
// domain types travel as their extended documents and the codec folds them
// back on the other side.

impl Serialize for Bson {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Bson::Float(v) => serializer.serialize_f64(*v),
            Bson::String(s) => serializer.serialize_str(s),
            Bson::Document(d) => d.serialize(serializer),
            Bson::Array(a) => a.serialize(serializer),
            Bson::Binary(b) => serializer.serialize_bytes(b),
            Bson::ObjectId(id) => id.serialize(serializer),
            Bson::Boolean(b) => serializer.serialize_bool(*b),
            Bson::Null => serializer.serialize_unit(),
            Bson::I32(v) => serializer.serialize_i32(*v),
            Bson::I64(v) => serializer.serialize_i64(*v),
            Bson::DateTime(..)
            | Bson::Timestamp(..)
            | Bson::Symbol(..)
            | Bson::Code(..)
            | Bson::CodeWithScope(..)
            | Bson::Regexp(..)
            | Bson::MinKey
            | Bson::MaxKey => self.to_extended_document().serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Bson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Bson, D::Error> {
        deserializer.deserialize_any(BsonVisitor)
    }
}

struct BsonVisitor;

impl<'de> Visitor<'de> for BsonVisitor {
    type Value = Bson;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a BSON value")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> std::result::Result<Bson, E> {
        Ok(Bson::Boolean(v))
    }

    fn visit_i8<E: serde::de::Error>(self, v: i8) -> std::result::Result<Bson, E> {
        Ok(Bson::I32(v as i32))
    }

    fn visit_i16<E: serde::de::Error>(self, v: i16) -> std::result::Result<Bson, E> {
        Ok(Bson::I32(v as i32))
    }

    fn visit_i32<E: serde::de::Error>(self, v: i32) -> std::result::Result<Bson, E> {
        Ok(Bson::I32(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<Bson, E> {
        Ok(Bson::I64(v))
    }

    fn visit_u8<E: serde::de::Error>(self, v: u8) -> std::result::Result<Bson, E> {
        Ok(Bson::I32(v as i32))
    }

    fn visit_u16<E: serde::de::Error>(self, v: u16) -> std::result::Result<Bson, E> {
        Ok(Bson::I32(v as i32))
    }

    fn visit_u32<E: serde::de::Error>(self, v: u32) -> std::result::Result<Bson, E> {
        Ok(Bson::I64(v as i64))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<Bson, E> {
        if v <= i32::MAX as u64 {
            Ok(Bson::I32(v as i32))
        } else if v <= i64::MAX as u64 {
            Ok(Bson::I64(v as i64))
        } else {
            Err(E::custom(format!("value {} does not fit in int64", v)))
        }
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> std::result::Result<Bson, E> {
        Ok(Bson::Float(v))
    }

    fn visit_char<E: serde::de::Error>(self, v: char) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v.to_string()))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v.to_owned()))
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> std::result::Result<Bson, E> {
        Ok(Bson::String(v))
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Bson, E> {
        Ok(Bson::Binary(v.to_vec()))
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> std::result::Result<Bson, E> {
        Ok(Bson::Binary(v))
    }

    fn visit_none<E: serde::de::Error>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_some<D: Deserializer<'de>>(
        self,
        deserializer: D,
    ) -> std::result::Result<Bson, D::Error> {
        deserializer.deserialize_any(BsonVisitor)
    }

    fn visit_unit<E: serde::de::Error>(self) -> std::result::Result<Bson, E> {
        Ok(Bson::Null)
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(
        self,
        mut seq: A,
    ) -> std::result::Result<Bson, A::Error> {
        let mut array = Array::new();
        while let Some(value) = seq.next_element()? {
            array.push(value);
        }
        Ok(Bson::Array(array))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Bson, A::Error> {
        let mut doc = Document::new();
        while let Some((key, value)) = map.next_entry::<String, Bson>()? {
            doc.insert(key, value);
        }
        Ok(Bson::from_extended_document(doc))
    }
}

impl Serialize for UtcDateTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$date", &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for UtcDateTime {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<UtcDateTime, D::Error> {
        deserializer
            .deserialize_any(TaggedI64Visitor {
                tag: "$date",
                expecting: "a datetime",
            })
            .map(UtcDateTime)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$timestamp", &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Timestamp, D::Error> {
        deserializer
            .deserialize_any(TaggedI64Visitor {
                tag: "$timestamp",
                expecting: "a timestamp",
            })
            .map(Timestamp)
    }
}

// Accepts either the extended form {tag: v} or, per the conversion table, a
// bare wire integer.
struct TaggedI64Visitor {
    tag: &'static str,
    expecting: &'static str,
}

impl<'de> Visitor<'de> for TaggedI64Visitor {
    type Value = i64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> std::result::Result<i64, E> {
        Ok(v)
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> std::result::Result<i64, E> {
        i64::try_from(v).map_err(|_| E::custom("value does not fit in int64"))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<i64, A::Error> {
        use serde::de::Error as _;
        while let Some(key) = map.next_key::<String>()? {
            if key == self.tag {
                return map.next_value();
            }
            map.next_value::<serde::de::IgnoredAny>()?;
        }
        Err(A::Error::custom(format!("expected a {} entry", self.tag)))
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$symbol", &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Symbol {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Symbol, D::Error> {
        deserializer
            .deserialize_any(TaggedStringVisitor {
                tag: "$symbol",
                expecting: "a symbol",
            })
            .map(Symbol)
    }
}

impl Serialize for Code {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$code", &self.0)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Code {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Code, D::Error> {
        deserializer
            .deserialize_any(TaggedStringVisitor {
                tag: "$code",
                expecting: "javascript code",
            })
            .map(Code)
    }
}

struct TaggedStringVisitor {
    tag: &'static str,
    expecting: &'static str,
}

impl<'de> Visitor<'de> for TaggedStringVisitor {
    type Value = String;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> std::result::Result<String, E> {
        Ok(v.to_owned())
    }

    fn visit_string<E: serde::de::Error>(self, v: String) -> std::result::Result<String, E> {
        Ok(v)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<String, A::Error> {
        use serde::de::Error as _;
        while let Some(key) = map.next_key::<String>()? {
            if key == self.tag {
                return map.next_value();
            }
            map.next_value::<serde::de::IgnoredAny>()?;
        }
        Err(A::Error::custom(format!("expected a {} entry", self.tag)))
    }
}

impl Serialize for CodeWithScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$code", &self.code)?;
        map.serialize_entry("$scope", &self.scope)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for CodeWithScope {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<CodeWithScope, D::Error> {
        struct CwsVisitor;

        impl<'de> Visitor<'de> for CwsVisitor {
            type Value = CodeWithScope;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("javascript code with scope")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<CodeWithScope, A::Error> {
                use serde::de::Error as _;
                let mut code = None;
                let mut scope = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "$code" => code = Some(map.next_value::<String>()?),
                        "$scope" => scope = Some(map.next_value::<Document>()?),
                        _ => {
                            map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }
                match (code, scope) {
                    (Some(code), Some(scope)) => Ok(CodeWithScope { code, scope }),
                    _ => Err(A::Error::custom("expected $code and $scope entries")),
                }
            }
        }

        deserializer.deserialize_map(CwsVisitor)
    }
}

impl Serialize for Regexp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$regex", &self.pattern)?;
        map.serialize_entry("$options", &self.options)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Regexp {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Regexp, D::Error> {
        struct RegexpVisitor;

        impl<'de> Visitor<'de> for RegexpVisitor {
            type Value = Regexp;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a regular expression")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut map: A,
            ) -> std::result::Result<Regexp, A::Error> {
                use serde::de::Error as _;
                let mut pattern = None;
                let mut options = None;
                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "$regex" => pattern = Some(map.next_value::<String>()?),
                        "$options" => options = Some(map.next_value::<String>()?),
                        _ => {
                            map.next_value::<serde::de::IgnoredAny>()?;
                        }
                    }
                }
                match (pattern, options) {
                    (Some(pattern), Some(options)) => Ok(Regexp { pattern, options }),
                    _ => Err(A::Error::custom("expected $regex and $options entries")),
                }
            }
        }

        deserializer.deserialize_map(RegexpVisitor)
    }
}

impl Serialize for MinMax {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        let v: i32 = match self {
            MinMax::Min => -1,
            MinMax::Max => 1,
        };
        map.serialize_entry("$minMaxKey", &v)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for MinMax {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<MinMax, D::Error> {
        use serde::de::Error as _;
        let v = deserializer.deserialize_any(TaggedI64Visitor {
            tag: "$minMaxKey",
            expecting: "a min/max key",
        })?;
        match v {
            -1 => Ok(MinMax::Min),
            1 => Ok(MinMax::Max),
            other => Err(D::Error::custom(format!("unknown min/max value {}", other))),
        }
    }
}
