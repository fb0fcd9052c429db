//! BSON encoder.
//!
//! Two layers: the byte layer turns a [`Document`] tree into its wire
//! encoding, appending to a [`Buffer`] and backfilling each length prefix
//! once the bytes it measures are in place; the serde layer
//! ([`to_bson`]/[`to_document`]) turns any `Serialize` value into that tree
//! first. [`encode`] composes the two.

mod serde;

pub use self::serde::Encoder;

use ::serde::Serialize;

use crate::bson::Bson;
use crate::buffer::Buffer;
use crate::document::Document;
use crate::error::{Error, Result};

/// Appends the encoding of an ordered document. Element order is written
/// exactly as stored.
pub fn encode_document(buf: &mut Buffer, doc: &Document) {
    let offset = buf.begin_doc();
    for (key, value) in doc {
        encode_element(buf, key, value);
    }
    buf.write_byte(0);
    buf.end_doc(offset);
}

fn encode_array(buf: &mut Buffer, arr: &[Bson]) {
    let offset = buf.begin_doc();
    for (i, value) in arr.iter().enumerate() {
        encode_element(buf, &i.to_string(), value);
    }
    buf.write_byte(0);
    buf.end_doc(offset);
}

fn encode_element(buf: &mut Buffer, key: &str, value: &Bson) {
    buf.write_byte(value.element_type() as u8);
    buf.write_cstring(key);
    encode_body(buf, value);
}

pub(crate) fn encode_body(buf: &mut Buffer, value: &Bson) {
    match value {
        Bson::Float(v) => buf.write_u64(v.to_bits()),
        Bson::String(s) | Bson::Code(s) | Bson::Symbol(s) => buf.write_string(s),
        Bson::Document(doc) => encode_document(buf, doc),
        Bson::Array(arr) => encode_array(buf, arr),
        Bson::Binary(data) => {
            buf.write_u32(data.len() as u32);
            buf.write_byte(0); // generic subtype
            buf.write_bytes(data);
        }
        Bson::ObjectId(id) => buf.write_bytes(&id.bytes()),
        Bson::Boolean(v) => buf.write_byte(*v as u8),
        Bson::DateTime(dt) => buf.write_u64(dt.0 as u64),
        Bson::Null | Bson::MinKey | Bson::MaxKey => {}
        Bson::Regexp(r) => {
            buf.write_cstring(&r.pattern);
            buf.write_cstring(&r.options);
        }
        Bson::CodeWithScope(cws) => {
            let offset = buf.begin_doc();
            buf.write_string(&cws.code);
            encode_document(buf, &cws.scope);
            buf.end_doc(offset);
        }
        Bson::I32(v) => buf.write_u32(*v as u32),
        Bson::Timestamp(ts) => buf.write_u64(ts.0 as u64),
        Bson::I64(v) => buf.write_u64(*v as u64),
    }
}

pub(crate) fn encode_body_to_vec(value: &Bson) -> Vec<u8> {
    let mut buf = Buffer::new();
    encode_body(&mut buf, value);
    buf.into_vec()
}

/// Serializes a value into a [`Bson`] tree.
pub fn to_bson<T: Serialize + ?Sized>(value: &T) -> Result<Bson> {
    value.serialize(Encoder::new())
}

/// Serializes a value that must come out as a document: a record, a
/// string-keyed map, an ordered document, or a raw pre-encoded document.
pub fn to_document<T: Serialize + ?Sized>(value: &T) -> Result<Document> {
    match to_bson(value)? {
        Bson::Document(doc) => Ok(doc),
        other => Err(Error::unsupported_type(format!(
            "the top level must encode as a document, got {:?}",
            other.element_type()
        ))),
    }
}

/// Serializes `value` as a single top-level document appended to `buf`.
pub fn encode<T: Serialize + ?Sized>(buf: &mut Buffer, value: &T) -> Result<()> {
    let doc = to_document(value)?;
    encode_document(buf, &doc);
    Ok(())
}

/// Convenience for [`encode`] into a fresh byte vector.
pub fn encode_to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Buffer::new();
    encode(&mut buf, value)?;
    Ok(buf.into_vec())
}
