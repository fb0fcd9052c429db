//! ObjectId generation and parsing.

use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use rand::{rngs::OsRng, RngCore};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

lazy_static! {
    static ref OID_COUNTER: Mutex<u64> = Mutex::new(0);
}

// Seeded from the OS random source the first time an id is generated; the
// first call returns the seed itself and every later call increments by one
// under the lock.
fn next_counter() -> u64 {
    let mut counter = OID_COUNTER.lock().unwrap();
    if *counter == 0 {
        *counter = OsRng.next_u64();
    } else {
        *counter = counter.wrapping_add(1);
    }
    *counter
}

/// A BSON object identifier.
///
/// The layout is 12 opaque bytes:
///
/// - `[0..4)` big-endian seconds since the Unix epoch, compatible with ids
///   produced by other drivers;
/// - `[4..12)` an incrementing 8-byte counter initialized from a
///   cryptographic random source, which keeps ids unique while staying
///   simpler than the machine-id/pid format other drivers use.
///
/// Equality and ordering are bytewise, so ids generated later sort after
/// ids generated earlier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectId {
    id: [u8; 12],
}

impl ObjectId {
    /// Generates a new id stamped with the current time.
    pub fn new() -> ObjectId {
        ObjectId::from_parts(Utc::now().timestamp(), next_counter())
    }

    pub(crate) fn from_parts(seconds: i64, counter: u64) -> ObjectId {
        let mut id = [0u8; 12];
        id[..4].copy_from_slice(&(seconds as u32).to_be_bytes());
        id[4..].copy_from_slice(&counter.to_be_bytes());
        ObjectId { id }
    }

    /// Wraps a raw 12-byte representation.
    pub fn with_bytes(bytes: [u8; 12]) -> ObjectId {
        ObjectId { id: bytes }
    }

    /// Parses the 24-character hexadecimal encoding of an id.
    pub fn parse_str(s: &str) -> Result<ObjectId> {
        let bytes = hex::decode(s).map_err(|_| Error::InvalidObjectId(s.to_owned()))?;
        if bytes.len() != 12 {
            return Err(Error::InvalidObjectId(s.to_owned()));
        }
        let mut id = [0u8; 12];
        id.copy_from_slice(&bytes);
        Ok(ObjectId { id })
    }

    /// The smallest id that can carry time `seconds`: the counter bytes are
    /// all zero. Useful as the lower bound of an `_id` range scan.
    pub fn min_for_time(seconds: i64) -> ObjectId {
        ObjectId::from_parts(seconds, u64::MIN)
    }

    /// The largest id that can carry time `seconds`: the counter bytes are
    /// all ones.
    pub fn max_for_time(seconds: i64) -> ObjectId {
        ObjectId::from_parts(seconds, u64::MAX)
    }

    /// The raw byte representation.
    pub fn bytes(&self) -> [u8; 12] {
        self.id
    }

    /// The time the id was created, in seconds since the Unix epoch.
    pub fn creation_time(&self) -> i64 {
        let mut secs = [0u8; 4];
        secs.copy_from_slice(&self.id[..4]);
        u32::from_be_bytes(secs) as i64
    }

    /// The creation time as a `chrono` datetime.
    pub fn creation_datetime(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.creation_time(), 0).unwrap()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex())
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$oid", &self.to_hex())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<ObjectId, D::Error> {
        deserializer.deserialize_map(ObjectIdVisitor)
    }
}

struct ObjectIdVisitor;

impl<'de> Visitor<'de> for ObjectIdVisitor {
    type Value = ObjectId;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an object id")
    }

    fn visit_map<A: MapAccess<'de>>(
        self,
        mut map: A,
    ) -> std::result::Result<ObjectId, A::Error> {
        use serde::de::Error as _;
        while let Some(key) = map.next_key::<String>()? {
            if key == "$oid" {
                let hex: String = map.next_value()?;
                return ObjectId::parse_str(&hex).map_err(A::Error::custom);
            }
            map.next_value::<serde::de::IgnoredAny>()?;
        }
        Err(A::Error::custom("expected an $oid entry"))
    }
}
