use serde::ser::{self, Serialize};

use crate::bson::{Array, Bson};
use crate::document::Document;
use crate::error::{Error, Result};

/// A serde serializer producing a [`Bson`] tree.
///
/// Record types drive this through their derived `Serialize`
/// implementations; the derive output plays the role of a per-record
/// encoding plan, fixing field order, encoded names (`rename`), conditional
/// omission (`skip_serializing_if`) and flattened embeddings at compile
/// time.
pub struct Encoder {
    root: bool,
}

impl Encoder {
    pub fn new() -> Encoder {
        Encoder { root: true }
    }

    fn nested() -> Encoder {
        Encoder { root: false }
    }
}

impl Default for Encoder {
    fn default() -> Encoder {
        Encoder::new()
    }
}

#[inline]
fn unsigned_to_bson(v: u64) -> Result<Bson> {
    if v <= i32::MAX as u64 {
        Ok(Bson::I32(v as i32))
    } else if v <= i64::MAX as u64 {
        Ok(Bson::I64(v as i64))
    } else {
        Err(Error::DoesNotFitInInt64(v))
    }
}

impl ser::Serializer for Encoder {
    type Ok = Bson;
    type Error = Error;

    type SerializeSeq = ArrayEncoder;
    type SerializeTuple = ArrayEncoder;
    type SerializeTupleStruct = ArrayEncoder;
    type SerializeTupleVariant = TupleVariantEncoder;
    type SerializeMap = MapEncoder;
    type SerializeStruct = StructEncoder;
    type SerializeStructVariant = StructVariantEncoder;

    fn serialize_bool(self, v: bool) -> Result<Bson> {
        Ok(Bson::Boolean(v))
    }

    fn serialize_i8(self, v: i8) -> Result<Bson> {
        Ok(Bson::I32(v as i32))
    }

    fn serialize_i16(self, v: i16) -> Result<Bson> {
        Ok(Bson::I32(v as i32))
    }

    fn serialize_i32(self, v: i32) -> Result<Bson> {
        Ok(Bson::I32(v))
    }

    fn serialize_i64(self, v: i64) -> Result<Bson> {
        Ok(Bson::I64(v))
    }

    fn serialize_u8(self, v: u8) -> Result<Bson> {
        Ok(Bson::I32(v as i32))
    }

    fn serialize_u16(self, v: u16) -> Result<Bson> {
        Ok(Bson::I32(v as i32))
    }

    fn serialize_u32(self, v: u32) -> Result<Bson> {
        Ok(Bson::I64(v as i64))
    }

    // usize funnels in here; small values stay Int32, values past the i64
    // range cannot be carried at all.
    fn serialize_u64(self, v: u64) -> Result<Bson> {
        unsigned_to_bson(v)
    }

    fn serialize_f32(self, v: f32) -> Result<Bson> {
        Ok(Bson::Float(v as f64))
    }

    fn serialize_f64(self, v: f64) -> Result<Bson> {
        Ok(Bson::Float(v))
    }

    fn serialize_char(self, v: char) -> Result<Bson> {
        Ok(Bson::String(v.to_string()))
    }

    fn serialize_str(self, v: &str) -> Result<Bson> {
        Ok(Bson::String(v.to_owned()))
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<Bson> {
        Ok(Bson::Binary(v.to_vec()))
    }

    fn serialize_none(self) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Bson> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Bson> {
        Ok(Bson::Null)
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Bson> {
        Ok(Bson::String(variant.to_owned()))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        value: &T,
    ) -> Result<Bson> {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(variant, value.serialize(Encoder::nested())?);
        Ok(Bson::Document(doc))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<ArrayEncoder> {
        Ok(ArrayEncoder {
            items: Array::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<ArrayEncoder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(self, _name: &'static str, len: usize) -> Result<ArrayEncoder> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        len: usize,
    ) -> Result<TupleVariantEncoder> {
        Ok(TupleVariantEncoder {
            variant,
            items: Array::with_capacity(len),
        })
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<MapEncoder> {
        Ok(MapEncoder {
            doc: Document::new(),
            next_key: None,
            root: self.root,
        })
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<StructEncoder> {
        Ok(StructEncoder {
            doc: Document::new(),
        })
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<StructVariantEncoder> {
        Ok(StructVariantEncoder {
            variant,
            doc: Document::new(),
        })
    }
}

pub struct ArrayEncoder {
    items: Array,
}

impl ser::SerializeSeq for ArrayEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(Encoder::nested())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        Ok(Bson::Array(self.items))
    }
}

impl ser::SerializeTuple for ArrayEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for ArrayEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Bson> {
        ser::SerializeSeq::end(self)
    }
}

pub struct TupleVariantEncoder {
    variant: &'static str,
    items: Array,
}

impl ser::SerializeTupleVariant for TupleVariantEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        self.items.push(value.serialize(Encoder::nested())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.variant, Bson::Array(self.items));
        Ok(Bson::Document(doc))
    }
}

pub struct MapEncoder {
    doc: Document,
    next_key: Option<String>,
    root: bool,
}

impl ser::SerializeMap for MapEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<()> {
        match key.serialize(Encoder::nested())? {
            Bson::String(s) => {
                self.next_key = Some(s);
                Ok(())
            }
            other => Err(Error::unsupported_type(format!(
                "map keys must be strings, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let key = match self.next_key.take() {
            Some(key) => key,
            None => {
                return Err(Error::Message(
                    "serialize_value called before serialize_key".to_owned(),
                ))
            }
        };
        self.doc.insert(key, value.serialize(Encoder::nested())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut folded = Bson::from_extended_document(self.doc);
        // Only the top-level mapping input promotes its `_id`; ordered
        // element sequences and nested documents keep their order verbatim.
        if self.root {
            if let Bson::Document(ref mut doc) = folded {
                doc.move_to_front("_id");
            }
        }
        Ok(folded)
    }
}

pub struct StructEncoder {
    doc: Document,
}

impl ser::SerializeStruct for StructEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.doc.insert(key, value.serialize(Encoder::nested())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        Ok(Bson::Document(self.doc))
    }
}

pub struct StructVariantEncoder {
    variant: &'static str,
    doc: Document,
}

impl ser::SerializeStructVariant for StructVariantEncoder {
    type Ok = Bson;
    type Error = Error;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<()> {
        self.doc.insert(key, value.serialize(Encoder::nested())?);
        Ok(())
    }

    fn end(self) -> Result<Bson> {
        let mut doc = Document::new();
        doc.insert(self.variant, Bson::Document(self.doc));
        Ok(Bson::Document(doc))
    }
}

#[cfg(test)]
mod test {
    use serde::Serialize;

    use super::super::to_bson;
    use crate::bson::Bson;
    use crate::oid::ObjectId;

    #[test]
    fn integer_widths() {
        assert_eq!(to_bson(&5i8).unwrap(), Bson::I32(5));
        assert_eq!(to_bson(&5i16).unwrap(), Bson::I32(5));
        assert_eq!(to_bson(&5i32).unwrap(), Bson::I32(5));
        assert_eq!(to_bson(&5i64).unwrap(), Bson::I64(5));
        assert_eq!(to_bson(&5u8).unwrap(), Bson::I32(5));
        assert_eq!(to_bson(&5u16).unwrap(), Bson::I32(5));
        assert_eq!(to_bson(&5u32).unwrap(), Bson::I64(5));
    }

    #[test]
    fn unsigned_is_adaptive() {
        assert_eq!(to_bson(&5u64).unwrap(), Bson::I32(5));
        assert_eq!(
            to_bson(&(i32::MAX as u64)).unwrap(),
            Bson::I32(i32::MAX)
        );
        assert_eq!(
            to_bson(&(i32::MAX as u64 + 1)).unwrap(),
            Bson::I64(i32::MAX as i64 + 1)
        );
        assert_eq!(
            to_bson(&(i64::MAX as u64)).unwrap(),
            Bson::I64(i64::MAX)
        );
        assert!(to_bson(&(i64::MAX as u64 + 1)).is_err());
        assert!(to_bson(&u64::MAX).is_err());
    }

    #[test]
    fn top_level_map_promotes_id() {
        let id = ObjectId::new();
        // Document's own serialize goes through the map path, so an `_id`
        // inserted last still comes out first at the top level.
        let doc = doc! { "x" => 1, "_id" => id };
        let encoded = to_bson(&doc).unwrap();
        let keys: Vec<_> = encoded.as_document().unwrap().keys().collect();
        assert_eq!(keys, vec!["_id", "x"]);
    }

    #[test]
    fn nested_map_keeps_order() {
        let doc = doc! { "outer" => { "x" => 1, "_id" => 7 } };
        let encoded = to_bson(&doc).unwrap();
        let inner = encoded
            .as_document()
            .unwrap()
            .get_document("outer")
            .unwrap();
        let keys: Vec<_> = inner.keys().collect();
        assert_eq!(keys, vec!["x", "_id"]);
    }

    #[test]
    fn map_keys_must_be_strings() {
        use std::collections::BTreeMap;
        let mut map = BTreeMap::new();
        map.insert(1, "one");
        assert!(to_bson(&map).is_err());
    }

    #[test]
    fn derived_struct_preserves_declaration_order() {
        #[derive(Serialize)]
        struct Record {
            b: i32,
            a: i32,
        }
        let encoded = to_bson(&Record { b: 1, a: 2 }).unwrap();
        let keys: Vec<_> = encoded.as_document().unwrap().keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn enums() {
        #[derive(Serialize)]
        enum E {
            Unit,
            Newtype(i32),
            Tuple(i32, i32),
            Struct { x: i32 },
        }
        assert_eq!(to_bson(&E::Unit).unwrap(), Bson::String("Unit".to_owned()));
        assert_eq!(
            to_bson(&E::Newtype(1)).unwrap(),
            Bson::Document(doc! { "Newtype" => 1 })
        );
        assert_eq!(
            to_bson(&E::Tuple(1, 2)).unwrap(),
            Bson::Document(doc! { "Tuple" => [1, 2] })
        );
        assert_eq!(
            to_bson(&E::Struct { x: 1 }).unwrap(),
            Bson::Document(doc! { "Struct" => { "x" => 1 } })
        );
    }
}
