//! An ordered BSON document.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bson::{Array, Bson};
use crate::oid::ObjectId;

/// A BSON document: a string-to-value map that remembers insertion order.
///
/// Key order is part of BSON's semantics. Command documents put the command
/// name first, compound index keys encode their precedence as element order,
/// and re-encoding a decoded document must reproduce the original bytes, so
/// there is exactly one document type in this crate and it is ordered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Document {
    keys: Vec<String>,
    entries: BTreeMap<String, Bson>,
}

impl Document {
    pub fn new() -> Document {
        Document {
            keys: Vec::new(),
            entries: BTreeMap::new(),
        }
    }

    /// Iterates over `(key, value)` pairs in insertion order.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            document: self,
            index: 0,
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.entries.clear();
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Bson> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts a value under `key`, appending the key at the end of the
    /// order. Re-inserting an existing key replaces the value and moves the
    /// key to the end. Returns the previous value, if any.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Bson>) -> Option<Bson> {
        let key = key.into();
        let old = self.entries.insert(key.clone(), value.into());
        if old.is_some() {
            self.keys.retain(|k| *k != key);
        }
        self.keys.push(key);
        old
    }

    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let old = self.entries.remove(key);
        if old.is_some() {
            self.keys.retain(|k| k != key);
        }
        old
    }

    /// Moves `key` to the front of the order if present. Used for the
    /// top-level `_id`-first rule.
    pub(crate) fn move_to_front(&mut self, key: &str) {
        if let Some(position) = self.keys.iter().position(|k| k == key) {
            if position > 0 {
                let key = self.keys.remove(position);
                self.keys.insert(0, key);
            }
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Bson::as_str)
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.get(key).and_then(Bson::as_i32)
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_i64)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Bson::as_f64)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Bson::as_bool)
    }

    pub fn get_document(&self, key: &str) -> Option<&Document> {
        self.get(key).and_then(Bson::as_document)
    }

    pub fn get_array(&self, key: &str) -> Option<&Array> {
        self.get(key).and_then(Bson::as_array)
    }

    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(Bson::as_object_id)
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (key, value)) in self.iter().enumerate() {
            if i != 0 {
                write!(f, ",")?;
            }
            write!(f, " \"{}\": {}", key, value)?;
        }
        write!(f, " }}")
    }
}

/// A borrowing iterator over a document's entries in insertion order.
pub struct Iter<'a> {
    document: &'a Document,
    index: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a str, &'a Bson);

    fn next(&mut self) -> Option<(&'a str, &'a Bson)> {
        let key = self.document.keys.get(self.index)?;
        self.index += 1;
        Some((key.as_str(), &self.document.entries[key]))
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a str, &'a Bson);
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// An owning iterator over a document's entries in insertion order.
pub struct IntoIter {
    keys: std::vec::IntoIter<String>,
    entries: BTreeMap<String, Bson>,
}

impl Iterator for IntoIter {
    type Item = (String, Bson);

    fn next(&mut self) -> Option<(String, Bson)> {
        let key = self.keys.next()?;
        let value = self.entries.remove(&key)?;
        Some((key, value))
    }
}

impl IntoIterator for Document {
    type Item = (String, Bson);
    type IntoIter = IntoIter;

    fn into_iter(self) -> IntoIter {
        IntoIter {
            keys: self.keys.into_iter(),
            entries: self.entries,
        }
    }
}

impl<K: Into<String>, V: Into<Bson>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Document {
        let mut doc = Document::new();
        for (key, value) in iter {
            doc.insert(key, value);
        }
        doc
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Document, D::Error> {
        struct DocumentVisitor;

        impl<'de> Visitor<'de> for DocumentVisitor {
            type Value = Document;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a document")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Document, A::Error> {
                let mut doc = Document::new();
                while let Some((key, value)) = map.next_entry::<String, Bson>()? {
                    doc.insert(key, value);
                }
                Ok(doc)
            }
        }

        deserializer.deserialize_map(DocumentVisitor)
    }
}

#[cfg(test)]
mod test {
    use super::Document;
    use crate::bson::Bson;

    #[test]
    fn preserves_insertion_order() {
        let mut doc = Document::new();
        doc.insert("first", 1);
        doc.insert("second", "foo");
        doc.insert("alphanumeric", "bar");

        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["first", "second", "alphanumeric"]);
    }

    #[test]
    fn reinsert_moves_key_to_end() {
        let mut doc = Document::new();
        doc.insert("a", 1);
        doc.insert("b", 2);
        doc.insert("a", 3);

        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(doc.get_i32("a"), Some(3));
    }

    #[test]
    fn remove_keeps_order_of_the_rest() {
        let mut doc = Document::new();
        doc.insert("a", 1);
        doc.insert("b", 2);
        doc.insert("c", 3);

        assert!(doc.remove("b").is_some());
        assert!(doc.remove("nope").is_none());

        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn move_to_front() {
        let mut doc = Document::new();
        doc.insert("x", 1);
        doc.insert("_id", 7);
        doc.move_to_front("_id");

        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["_id", "x"]);
        doc.move_to_front("missing");
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn typed_getters() {
        let mut doc = Document::new();
        doc.insert("s", "str");
        doc.insert("i", 5);
        doc.insert("b", true);
        assert_eq!(doc.get_str("s"), Some("str"));
        assert_eq!(doc.get_i32("i"), Some(5));
        assert_eq!(doc.get_bool("b"), Some(true));
        assert_eq!(doc.get_i64("i"), None);
        assert_eq!(doc.get("missing"), None);
    }

    #[test]
    fn owning_iterator_preserves_order() {
        let mut doc = Document::new();
        doc.insert("z", 1);
        doc.insert("a", 2);
        let pairs: Vec<_> = doc.into_iter().collect();
        assert_eq!(
            pairs,
            vec![("z".to_owned(), Bson::I32(1)), ("a".to_owned(), Bson::I32(2))]
        );
    }
}
