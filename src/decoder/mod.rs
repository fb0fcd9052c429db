//! BSON decoder.
//!
//! The byte layer parses one wire document into a [`Document`] tree,
//! checking every length prefix against the bytes actually present; the
//! serde layer ([`from_bson`]/[`from_document`]) maps the tree into any
//! `Deserialize` destination under the conversion rules described on
//! [`Decoder`]. [`decode_from_slice`] composes the two.

mod serde;

pub use self::serde::Decoder;

use std::io::Read;
use std::str;

use byteorder::{LittleEndian, ReadBytesExt};
use ::serde::de::DeserializeOwned;

use crate::bson::{Bson, CodeWithScope, Regexp, Timestamp, UtcDateTime};
use crate::document::Document;
use crate::error::{Error, Result};
use crate::spec::ElementType;

/// Reads one length-prefixed document from a stream.
pub fn decode_document<R: Read + ?Sized>(reader: &mut R) -> Result<Document> {
    let len = reader.read_i32::<LittleEndian>()?;
    if len < 5 {
        return Err(Error::TruncatedDocument);
    }
    let mut data = vec![0u8; len as usize];
    data[..4].copy_from_slice(&len.to_le_bytes());
    reader.read_exact(&mut data[4..])?;
    decode_document_from_slice(&data)
}

/// Parses `data` as exactly one document; trailing bytes are an error.
pub fn decode_document_from_slice(data: &[u8]) -> Result<Document> {
    let mut r = SliceReader::new(data);
    let doc = parse_document(&mut r)?;
    if !r.is_empty() {
        return Err(Error::TruncatedDocument);
    }
    Ok(doc)
}

/// Parses a lone element body of the given kind, as carried by a
/// [`RawBson`](crate::RawBson) value.
pub(crate) fn decode_body_from_slice(kind: ElementType, data: &[u8]) -> Result<Bson> {
    let mut r = SliceReader::new(data);
    let value = parse_body(&mut r, kind)?;
    if !r.is_empty() {
        return Err(Error::TruncatedDocument);
    }
    Ok(value)
}

/// Maps a decoded value into any `Deserialize` destination.
pub fn from_bson<T: DeserializeOwned>(value: Bson) -> Result<T> {
    T::deserialize(Decoder::new(value))
}

/// Maps a decoded document into any `Deserialize` destination.
pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    from_bson(Bson::Document(doc))
}

/// Parses one document from `data` and maps it into `T`.
pub fn decode_from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    from_document(decode_document_from_slice(data)?)
}

struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(data: &'a [u8]) -> SliceReader<'a> {
        SliceReader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::TruncatedDocument);
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.read_bytes(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.read_bytes(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    /// A NUL-terminated UTF-8 string.
    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.data[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::TruncatedDocument)?;
        let s = str::from_utf8(&rest[..nul])?;
        self.pos += nul + 1;
        Ok(s)
    }

    /// A length-prefixed string; the prefix counts the trailing 0.
    fn read_string(&mut self) -> Result<&'a str> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(Error::TruncatedDocument);
        }
        let bytes = self.read_bytes(len as usize)?;
        if bytes[len as usize - 1] != 0 {
            return Err(Error::TruncatedDocument);
        }
        Ok(str::from_utf8(&bytes[..len as usize - 1])?)
    }
}

fn parse_document(r: &mut SliceReader) -> Result<Document> {
    let len = r.read_i32()?;
    if len < 5 || (len as usize - 4) > r.remaining() {
        return Err(Error::TruncatedDocument);
    }
    let mut body = SliceReader::new(r.read_bytes(len as usize - 4)?);
    let doc = parse_elements(&mut body)?;
    if !body.is_empty() {
        return Err(Error::TruncatedDocument);
    }
    Ok(doc)
}

fn parse_elements(r: &mut SliceReader) -> Result<Document> {
    let mut doc = Document::new();
    loop {
        let tag = r.read_u8()?;
        if tag == 0 {
            break;
        }
        let kind = ElementType::from_u8(tag).ok_or(Error::UnrecognizedElementType(tag))?;
        let name = r.read_cstring()?;
        let value = parse_body(r, kind)?;
        doc.insert(name, value);
    }
    Ok(doc)
}

fn parse_body(r: &mut SliceReader, kind: ElementType) -> Result<Bson> {
    Ok(match kind {
        ElementType::Float64 => Bson::Float(r.read_f64()?),
        ElementType::String => Bson::String(r.read_string()?.to_owned()),
        ElementType::Document => Bson::Document(parse_document(r)?),
        ElementType::Array => {
            let doc = parse_document(r)?;
            Bson::Array(doc.into_iter().map(|(_, value)| value).collect())
        }
        ElementType::Binary => {
            let len = r.read_i32()?;
            if len < 0 {
                return Err(Error::TruncatedDocument);
            }
            let _subtype = r.read_u8()?;
            Bson::Binary(r.read_bytes(len as usize)?.to_vec())
        }
        ElementType::ObjectId => {
            let mut id = [0u8; 12];
            id.copy_from_slice(r.read_bytes(12)?);
            Bson::ObjectId(crate::oid::ObjectId::with_bytes(id))
        }
        ElementType::Bool => Bson::Boolean(r.read_u8()? != 0),
        ElementType::DateTime => Bson::DateTime(UtcDateTime(r.read_i64()?)),
        ElementType::Null => Bson::Null,
        ElementType::Regexp => {
            let pattern = r.read_cstring()?.to_owned();
            let options = r.read_cstring()?.to_owned();
            Bson::Regexp(Regexp { pattern, options })
        }
        ElementType::Code => Bson::Code(r.read_string()?.to_owned()),
        ElementType::Symbol => Bson::Symbol(r.read_string()?.to_owned()),
        ElementType::CodeWithScope => {
            let total = r.read_i32()?;
            if total < 4 || (total as usize - 4) > r.remaining() {
                return Err(Error::TruncatedDocument);
            }
            let mut body = SliceReader::new(r.read_bytes(total as usize - 4)?);
            let code = body.read_string()?.to_owned();
            let scope = parse_document(&mut body)?;
            if !body.is_empty() {
                return Err(Error::TruncatedDocument);
            }
            Bson::CodeWithScope(CodeWithScope { code, scope })
        }
        ElementType::Int32 => Bson::I32(r.read_i32()?),
        ElementType::Timestamp => Bson::Timestamp(Timestamp(r.read_i64()?)),
        ElementType::Int64 => Bson::I64(r.read_i64()?),
        ElementType::MaxKey => Bson::MaxKey,
        ElementType::MinKey => Bson::MinKey,
    })
}
