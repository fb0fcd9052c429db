//! Uninterpreted BSON elements.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bson::Bson;
use crate::decoder;
use crate::document::Document;
use crate::encoder;
use crate::error::{Error, Result};
use crate::spec::ElementType;

// Marker name the crate's own deserializer recognizes to hand over raw
// element bytes instead of a parsed value.
pub(crate) const RAW_BSON_NEWTYPE: &str = "$mongowireRawBson";

/// A chunk of uninterpreted BSON: an element's kind byte together with its
/// body bytes.
///
/// Use this type to move element data through a decode/encode pair without
/// interpreting it, for example to defer decoding a command reply's `value`
/// field until its record type is known.
#[derive(Clone, PartialEq, Eq)]
pub struct RawBson {
    kind: ElementType,
    data: Vec<u8>,
}

impl RawBson {
    pub fn new(kind: ElementType, data: Vec<u8>) -> RawBson {
        RawBson { kind, data }
    }

    /// Captures a value's encoded body.
    pub fn from_bson(value: &Bson) -> RawBson {
        RawBson {
            kind: value.element_type(),
            data: encoder::encode_body_to_vec(value),
        }
    }

    pub fn kind(&self) -> ElementType {
        self.kind
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Parses the raw bytes back into a value.
    pub fn to_bson(&self) -> Result<Bson> {
        decoder::decode_body_from_slice(self.kind, &self.data)
    }

    /// Decodes the raw bytes into `T`. The element must be a document.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        if self.kind != ElementType::Document {
            return Err(Error::unsupported_type(format!(
                "cannot decode a record from a {:?} element",
                self.kind
            )));
        }
        let doc = decoder::decode_document_from_slice(&self.data)?;
        decoder::from_document(doc)
    }

    /// Decodes the raw bytes into a [`Document`]. The element must be a
    /// document.
    pub fn to_document(&self) -> Result<Document> {
        if self.kind != ElementType::Document {
            return Err(Error::unsupported_type(format!(
                "cannot decode a document from a {:?} element",
                self.kind
            )));
        }
        decoder::decode_document_from_slice(&self.data)
    }
}

impl fmt::Debug for RawBson {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "RawBson({:?}, 0x{})", self.kind, hex::encode(&self.data))
    }
}

impl Serialize for RawBson {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("$rawKind", &(self.kind as u8 as i32))?;
        map.serialize_entry("$rawData", &hex::encode(&self.data))?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawBson {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<RawBson, D::Error> {
        deserializer.deserialize_newtype_struct(RAW_BSON_NEWTYPE, RawBsonVisitor)
    }
}

struct RawBsonVisitor;

impl<'de> Visitor<'de> for RawBsonVisitor {
    type Value = RawBson;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a raw BSON element")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<RawBson, A::Error> {
        use serde::de::Error as _;
        let mut kind = None;
        let mut data = None;
        while let Some(key) = map.next_key::<String>()? {
            match key.as_str() {
                "$rawKind" => kind = Some(map.next_value::<i32>()?),
                "$rawData" => data = Some(map.next_value::<String>()?),
                _ => {
                    map.next_value::<serde::de::IgnoredAny>()?;
                }
            }
        }
        let kind = kind.ok_or_else(|| A::Error::custom("expected a $rawKind entry"))?;
        let data = data.ok_or_else(|| A::Error::custom("expected a $rawData entry"))?;
        let kind = u8::try_from(kind)
            .ok()
            .and_then(ElementType::from_u8)
            .ok_or_else(|| A::Error::custom(format!("unrecognized element kind {}", kind)))?;
        let data = hex::decode(&data).map_err(A::Error::custom)?;
        Ok(RawBson { kind, data })
    }
}

#[cfg(test)]
mod test {
    use super::RawBson;
    use crate::bson::Bson;
    use crate::spec::ElementType;

    #[test]
    fn captures_and_restores_a_value() {
        let value = Bson::String("hello".to_owned());
        let raw = RawBson::from_bson(&value);
        assert_eq!(raw.kind(), ElementType::String);
        assert_eq!(raw.data(), &[6, 0, 0, 0, b'h', b'e', b'l', b'l', b'o', 0]);
        assert_eq!(raw.to_bson().unwrap(), value);
    }

    #[test]
    fn document_body_is_a_whole_document() {
        let doc = doc! { "x" => 1 };
        let raw = RawBson::from_bson(&Bson::Document(doc.clone()));
        assert_eq!(raw.kind(), ElementType::Document);
        assert_eq!(raw.to_document().unwrap(), doc);
    }

    #[test]
    fn decode_rejects_non_documents() {
        let raw = RawBson::from_bson(&Bson::I32(5));
        assert!(raw.to_document().is_err());
    }
}
