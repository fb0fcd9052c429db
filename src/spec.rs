//! BSON element kinds.
//!
//! One byte of every element identifies the type of its body. The values
//! below are fixed by the BSON specification (http://bsonspec.org/spec.html);
//! a kind byte of `0x00` terminates a document.

pub const ELEMENT_TYPE_FLOAT64: u8 = 0x01;
pub const ELEMENT_TYPE_STRING: u8 = 0x02;
pub const ELEMENT_TYPE_DOCUMENT: u8 = 0x03;
pub const ELEMENT_TYPE_ARRAY: u8 = 0x04;
pub const ELEMENT_TYPE_BINARY: u8 = 0x05;
pub const ELEMENT_TYPE_OBJECT_ID: u8 = 0x07;
pub const ELEMENT_TYPE_BOOL: u8 = 0x08;
pub const ELEMENT_TYPE_DATETIME: u8 = 0x09;
pub const ELEMENT_TYPE_NULL: u8 = 0x0A;
pub const ELEMENT_TYPE_REGEXP: u8 = 0x0B;
pub const ELEMENT_TYPE_CODE: u8 = 0x0D;
pub const ELEMENT_TYPE_SYMBOL: u8 = 0x0E;
pub const ELEMENT_TYPE_CODE_WITH_SCOPE: u8 = 0x0F;
pub const ELEMENT_TYPE_INT32: u8 = 0x10;
pub const ELEMENT_TYPE_TIMESTAMP: u8 = 0x11;
pub const ELEMENT_TYPE_INT64: u8 = 0x12;
pub const ELEMENT_TYPE_MAX_KEY: u8 = 0x7F;
pub const ELEMENT_TYPE_MIN_KEY: u8 = 0xFF;

/// The type of a BSON element, as carried on the wire in its kind byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ElementType {
    Float64 = ELEMENT_TYPE_FLOAT64,
    String = ELEMENT_TYPE_STRING,
    Document = ELEMENT_TYPE_DOCUMENT,
    Array = ELEMENT_TYPE_ARRAY,
    Binary = ELEMENT_TYPE_BINARY,
    ObjectId = ELEMENT_TYPE_OBJECT_ID,
    Bool = ELEMENT_TYPE_BOOL,
    DateTime = ELEMENT_TYPE_DATETIME,
    Null = ELEMENT_TYPE_NULL,
    Regexp = ELEMENT_TYPE_REGEXP,
    Code = ELEMENT_TYPE_CODE,
    Symbol = ELEMENT_TYPE_SYMBOL,
    CodeWithScope = ELEMENT_TYPE_CODE_WITH_SCOPE,
    Int32 = ELEMENT_TYPE_INT32,
    Timestamp = ELEMENT_TYPE_TIMESTAMP,
    Int64 = ELEMENT_TYPE_INT64,
    MaxKey = ELEMENT_TYPE_MAX_KEY,
    MinKey = ELEMENT_TYPE_MIN_KEY,
}

impl ElementType {
    /// Maps a kind byte back to an `ElementType`, or `None` for bytes this
    /// codec does not speak (including the deprecated kinds).
    #[inline]
    pub fn from_u8(tag: u8) -> Option<ElementType> {
        use self::ElementType::*;
        Some(match tag {
            ELEMENT_TYPE_FLOAT64 => Float64,
            ELEMENT_TYPE_STRING => String,
            ELEMENT_TYPE_DOCUMENT => Document,
            ELEMENT_TYPE_ARRAY => Array,
            ELEMENT_TYPE_BINARY => Binary,
            ELEMENT_TYPE_OBJECT_ID => ObjectId,
            ELEMENT_TYPE_BOOL => Bool,
            ELEMENT_TYPE_DATETIME => DateTime,
            ELEMENT_TYPE_NULL => Null,
            ELEMENT_TYPE_REGEXP => Regexp,
            ELEMENT_TYPE_CODE => Code,
            ELEMENT_TYPE_SYMBOL => Symbol,
            ELEMENT_TYPE_CODE_WITH_SCOPE => CodeWithScope,
            ELEMENT_TYPE_INT32 => Int32,
            ELEMENT_TYPE_TIMESTAMP => Timestamp,
            ELEMENT_TYPE_INT64 => Int64,
            ELEMENT_TYPE_MAX_KEY => MaxKey,
            ELEMENT_TYPE_MIN_KEY => MinKey,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod test {
    use super::ElementType;

    #[test]
    fn kind_byte_round_trip() {
        for tag in 0u8..=0xFF {
            if let Some(t) = ElementType::from_u8(tag) {
                assert_eq!(t as u8, tag);
            }
        }
        assert_eq!(ElementType::from_u8(0x00), None);
        assert_eq!(ElementType::from_u8(0x06), None);
        assert_eq!(ElementType::from_u8(0x0C), None);
        assert_eq!(ElementType::from_u8(0x13), None);
    }
}
