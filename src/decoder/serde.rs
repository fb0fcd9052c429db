use std::fmt;

use serde::de::{self, DeserializeSeed, EnumAccess, MapAccess, SeqAccess, VariantAccess, Visitor};

use crate::bson::{Array, Bson};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::raw::{RawBson, RAW_BSON_NEWTYPE};

/// A serde deserializer reading out of a decoded [`Bson`] value.
///
/// Typed destinations get the conversions the wire calls for: the integer
/// kinds, doubles, datetimes and timestamps narrow or widen to any numeric
/// destination (with a range check), any numeric feeds a `bool` destination
/// as non-zero, and a symbol feeds a string destination. Record destinations
/// skip elements their plan does not list; a genuine type mismatch is an
/// error.
pub struct Decoder {
    value: Bson,
}

impl Decoder {
    pub fn new(value: Bson) -> Decoder {
        Decoder { value }
    }

    fn integer_value(&self) -> Result<i64> {
        match &self.value {
            Bson::I32(v) => Ok(*v as i64),
            Bson::I64(v) => Ok(*v),
            Bson::Float(f) => Ok(*f as i64),
            Bson::DateTime(dt) => Ok(dt.0),
            Bson::Timestamp(ts) => Ok(ts.0),
            other => Err(self.mismatch("an integer", other)),
        }
    }

    fn mismatch(&self, expected: &str, got: &Bson) -> Error {
        Error::Message(format!(
            "expected {}, got {:?}",
            expected,
            got.element_type()
        ))
    }
}

macro_rules! deserialize_integer {
    ($method:ident, $visit:ident, $ty:ty) => {
        fn $method<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
            let n = self.integer_value()?;
            let v = <$ty>::try_from(n).map_err(|_| {
                Error::Message(format!(
                    "value {} does not fit in {}",
                    n,
                    stringify!($ty)
                ))
            })?;
            visitor.$visit(v)
        }
    };
}

impl<'de> de::Deserializer<'de> for Decoder {
    type Error = Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Float(v) => visitor.visit_f64(v),
            Bson::String(s) => visitor.visit_string(s),
            Bson::Document(doc) => visitor.visit_map(DocumentAccess::new(doc)),
            Bson::Array(arr) => visitor.visit_seq(ArrayAccess::new(arr)),
            Bson::Binary(data) => visitor.visit_byte_buf(data),
            Bson::Boolean(v) => visitor.visit_bool(v),
            Bson::Null => visitor.visit_unit(),
            Bson::I32(v) => visitor.visit_i32(v),
            Bson::I64(v) => visitor.visit_i64(v),
            // Values without a native serde representation travel as their
            // extended documents and fold back on the far side.
            other => visitor.visit_map(DocumentAccess::new(other.to_extended_document())),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match &self.value {
            Bson::Boolean(v) => visitor.visit_bool(*v),
            Bson::I32(v) => visitor.visit_bool(*v != 0),
            Bson::I64(v) => visitor.visit_bool(*v != 0),
            Bson::Float(f) => visitor.visit_bool(*f != 0.0),
            other => Err(self.mismatch("a boolean", other)),
        }
    }

    deserialize_integer!(deserialize_i8, visit_i8, i8);
    deserialize_integer!(deserialize_i16, visit_i16, i16);
    deserialize_integer!(deserialize_i32, visit_i32, i32);
    deserialize_integer!(deserialize_i64, visit_i64, i64);
    deserialize_integer!(deserialize_u8, visit_u8, u8);
    deserialize_integer!(deserialize_u16, visit_u16, u16);
    deserialize_integer!(deserialize_u32, visit_u32, u32);
    deserialize_integer!(deserialize_u64, visit_u64, u64);

    fn deserialize_f32<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_f64(visitor)
    }

    fn deserialize_f64<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match &self.value {
            Bson::Float(f) => visitor.visit_f64(*f),
            Bson::I32(v) => visitor.visit_f64(*v as f64),
            Bson::I64(v) => visitor.visit_f64(*v as f64),
            other => Err(self.mismatch("a double", other)),
        }
    }

    fn deserialize_char<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match &self.value {
            Bson::String(s) if s.chars().count() == 1 => {
                visitor.visit_char(s.chars().next().unwrap())
            }
            other => Err(self.mismatch("a single-character string", other)),
        }
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::String(s) | Bson::Symbol(s) => visitor.visit_string(s),
            ref other => Err(self.mismatch("a string", other)),
        }
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_bytes<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Binary(data) => visitor.visit_byte_buf(data),
            ref other => Err(self.mismatch("binary data", other)),
        }
    }

    fn deserialize_byte_buf<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_bytes(visitor)
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Null => visitor.visit_none(),
            _ => visitor.visit_some(self),
        }
    }

    fn deserialize_unit<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Null => visitor.visit_unit(),
            ref other => Err(self.mismatch("null", other)),
        }
    }

    fn deserialize_unit_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_unit(visitor)
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        if name == RAW_BSON_NEWTYPE {
            // Hand the element over uninterpreted: kind byte plus body
            // bytes, re-encoded from the parsed value.
            let raw = RawBson::from_bson(&self.value);
            let mut ext = Document::new();
            ext.insert("$rawKind", raw.kind() as u8 as i32);
            ext.insert("$rawData", hex::encode(raw.data()));
            return visitor.visit_map(DocumentAccess::new(ext));
        }
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_seq<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Array(arr) => visitor.visit_seq(ArrayAccess::new(arr)),
            Bson::Binary(data) => visitor.visit_seq(ArrayAccess::new(
                data.into_iter().map(|b| Bson::I32(b as i32)).collect(),
            )),
            ref other => Err(self.mismatch("an array", other)),
        }
    }

    fn deserialize_tuple<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_tuple_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_seq(visitor)
    }

    fn deserialize_map<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        match self.value {
            Bson::Document(doc) => visitor.visit_map(DocumentAccess::new(doc)),
            other => {
                let has_extended_form = matches!(
                    other,
                    Bson::ObjectId(..)
                        | Bson::DateTime(..)
                        | Bson::Timestamp(..)
                        | Bson::Symbol(..)
                        | Bson::Code(..)
                        | Bson::CodeWithScope(..)
                        | Bson::Regexp(..)
                        | Bson::MinKey
                        | Bson::MaxKey
                );
                if has_extended_form {
                    visitor.visit_map(DocumentAccess::new(other.to_extended_document()))
                } else {
                    Err(Error::Message(format!(
                        "expected a document, got {:?}",
                        other.element_type()
                    )))
                }
            }
        }
    }

    fn deserialize_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_map(visitor)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        match self.value {
            Bson::String(s) => visitor.visit_enum(EnumDeserializer {
                variant: s,
                value: None,
            }),
            Bson::Document(doc) if doc.len() == 1 => {
                let (variant, value) = doc.into_iter().next().unwrap();
                visitor.visit_enum(EnumDeserializer {
                    variant,
                    value: Some(value),
                })
            }
            ref other => Err(self.mismatch("an enum variant", other)),
        }
    }

    fn deserialize_identifier<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        self.deserialize_str(visitor)
    }

    fn deserialize_ignored_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }
}

struct DocumentAccess {
    iter: crate::document::IntoIter,
    value: Option<Bson>,
}

impl DocumentAccess {
    fn new(doc: Document) -> DocumentAccess {
        DocumentAccess {
            iter: doc.into_iter(),
            value: None,
        }
    }
}

impl<'de> MapAccess<'de> for DocumentAccess {
    type Error = Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(Decoder::new(Bson::String(key))).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value> {
        let value = match self.value.take() {
            Some(value) => value,
            None => {
                return Err(Error::Message(
                    "next_value called before next_key".to_owned(),
                ))
            }
        };
        seed.deserialize(Decoder::new(value))
    }
}

struct ArrayAccess {
    iter: std::vec::IntoIter<Bson>,
}

impl ArrayAccess {
    fn new(arr: Array) -> ArrayAccess {
        ArrayAccess {
            iter: arr.into_iter(),
        }
    }
}

impl<'de> SeqAccess<'de> for ArrayAccess {
    type Error = Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>> {
        match self.iter.next() {
            Some(value) => seed.deserialize(Decoder::new(value)).map(Some),
            None => Ok(None),
        }
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}

struct EnumDeserializer {
    variant: String,
    value: Option<Bson>,
}

impl<'de> EnumAccess<'de> for EnumDeserializer {
    type Error = Error;
    type Variant = VariantDeserializer;

    fn variant_seed<V: DeserializeSeed<'de>>(
        self,
        seed: V,
    ) -> Result<(V::Value, VariantDeserializer)> {
        let variant = seed.deserialize(Decoder::new(Bson::String(self.variant)))?;
        Ok((variant, VariantDeserializer { value: self.value }))
    }
}

struct VariantDeserializer {
    value: Option<Bson>,
}

impl<'de> VariantAccess<'de> for VariantDeserializer {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        match self.value {
            None | Some(Bson::Null) => Ok(()),
            Some(_) => Err(Error::Message(
                "unexpected value for unit variant".to_owned(),
            )),
        }
    }

    fn newtype_variant_seed<T: DeserializeSeed<'de>>(self, seed: T) -> Result<T::Value> {
        seed.deserialize(Decoder::new(self.value.unwrap_or(Bson::Null)))
    }

    fn tuple_variant<V: Visitor<'de>>(self, _len: usize, visitor: V) -> Result<V::Value> {
        use serde::de::Deserializer as _;
        Decoder::new(self.value.unwrap_or(Bson::Null)).deserialize_seq(visitor)
    }

    fn struct_variant<V: Visitor<'de>>(
        self,
        _fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        use serde::de::Deserializer as _;
        Decoder::new(self.value.unwrap_or(Bson::Null)).deserialize_map(visitor)
    }
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Decoder({:?})", self.value)
    }
}
