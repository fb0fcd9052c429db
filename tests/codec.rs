//! End-to-end codec tests: byte vectors, record round trips and the
//! conversion rules.

#[macro_use]
extern crate mongowire;

use std::collections::HashMap;

use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};

use mongowire::{
    decode_document_from_slice, decode_from_slice, encode_document, encode_to_vec, from_bson,
    from_document, serde_helpers, to_bson, to_document, Bson, Buffer, CodeWithScope, Document,
    ElementType, MinMax, ObjectId, RawBson, Regexp, Symbol, Timestamp, UtcDateTime,
};

const SIMPLE_MAP_BYTES: [u8; 21] = [
    0x15, 0x00, 0x00, 0x00, 0x02, 0x74, 0x65, 0x73, 0x74, 0x00, 0x06, 0x00, 0x00, 0x00, 0x77,
    0x6F, 0x72, 0x6C, 0x64, 0x00, 0x00,
];

#[test]
fn encode_simple_map() {
    let mut map = HashMap::new();
    map.insert("test".to_owned(), "world".to_owned());
    assert_eq!(encode_to_vec(&map).unwrap(), SIMPLE_MAP_BYTES);
}

#[test]
fn decode_simple_map() {
    let map: HashMap<String, String> = decode_from_slice(&SIMPLE_MAP_BYTES).unwrap();
    let mut expected = HashMap::new();
    expected.insert("test".to_owned(), "world".to_owned());
    assert_eq!(map, expected);
}

#[test]
fn encode_ordered_document() {
    // [("test", "hello world")]
    let expected = [
        0x1B, 0x00, 0x00, 0x00, 0x02, 0x74, 0x65, 0x73, 0x74, 0x00, 0x0C, 0x00, 0x00, 0x00,
        0x68, 0x65, 0x6C, 0x6C, 0x6F, 0x20, 0x77, 0x6F, 0x72, 0x6C, 0x64, 0x00, 0x00,
    ];
    assert_eq!(
        encode_to_vec(&doc! { "test" => "hello world" }).unwrap(),
        expected
    );
}

#[test]
fn empty_document_is_exactly_five_bytes() {
    assert_eq!(encode_to_vec(&doc! {}).unwrap(), [5, 0, 0, 0, 0]);
    assert!(decode_document_from_slice(&[5, 0, 0, 0, 0])
        .unwrap()
        .is_empty());
}

#[test]
fn map_with_id_promotes_it_first() {
    let id = ObjectId::parse_str("0102030405060708090a0b0c").unwrap();
    let mut map = HashMap::new();
    map.insert("aaa".to_owned(), Bson::I32(1));
    map.insert("_id".to_owned(), Bson::ObjectId(id));
    map.insert("zzz".to_owned(), Bson::I32(2));

    let doc = to_document(&map).unwrap();
    assert_eq!(doc.keys().next(), Some("_id"));
    assert_eq!(doc.get_object_id("_id"), Some(id));
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Post {
    #[serde(rename = "_id")]
    id: ObjectId,
    title: String,
    #[serde(skip_serializing_if = "serde_helpers::is_default", default)]
    views: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    parent: Option<ObjectId>,
    tags: Vec<String>,
    #[serde(with = "serde_bytes")]
    payload: Vec<u8>,
    created: UtcDateTime,
    modified: Timestamp,
    kind: Symbol,
    matcher: Regexp,
    hook: CodeWithScope,
    bound: MinMax,
    meta: Document,
}

fn sample_post() -> Post {
    Post {
        id: ObjectId::parse_str("0102030405060708090a0b0c").unwrap(),
        title: "driving the codec".to_owned(),
        views: 0,
        parent: None,
        tags: vec!["a".to_owned(), "b".to_owned()],
        payload: vec![0, 1, 2, 254],
        created: UtcDateTime(1_500_000_000_000),
        modified: Timestamp(42),
        kind: Symbol("post".to_owned()),
        matcher: Regexp::new("^d", "i"),
        hook: CodeWithScope {
            code: "function() { return n; }".to_owned(),
            scope: doc! { "n" => 1 },
        },
        bound: MinMax::Max,
        meta: doc! { "nested" => { "deep" => [1, 2] } },
    }
}

#[test]
fn record_round_trip() {
    let post = sample_post();
    let bytes = encode_to_vec(&post).unwrap();
    let back: Post = decode_from_slice(&bytes).unwrap();
    assert_eq!(back, post);
}

#[test]
fn conditional_field_emits_nothing_when_zero() {
    let post = sample_post();
    let doc = to_document(&post).unwrap();
    assert!(!doc.contains_key("views"));
    assert!(!doc.contains_key("parent"));

    let mut viewed = sample_post();
    viewed.views = 9;
    let doc = to_document(&viewed).unwrap();
    assert_eq!(doc.get_i64("views"), Some(9));
}

#[test]
fn non_conditional_zero_still_emits() {
    #[derive(Serialize)]
    struct Flag {
        on: bool,
    }
    let doc = to_document(&Flag { on: false }).unwrap();
    assert_eq!(doc.get_bool("on"), Some(false));
}

#[test]
fn record_fields_keep_declaration_order() {
    let doc = to_document(&sample_post()).unwrap();
    let keys: Vec<_> = doc.keys().collect();
    assert_eq!(
        keys,
        vec![
            "_id", "title", "tags", "payload", "created", "modified", "kind", "matcher",
            "hook", "bound", "meta"
        ]
    );
}

#[test]
fn flattened_embedding() {
    #[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
    #[serde(default)]
    struct Common {
        kind: String,
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize, Default)]
    #[serde(default)]
    struct Wrapper {
        #[serde(flatten)]
        common: Common,
        label: String,
    }

    let value = Wrapper {
        common: Common {
            kind: "k".to_owned(),
        },
        label: "l".to_owned(),
    };
    let bytes = encode_to_vec(&value).unwrap();
    let doc = decode_document_from_slice(&bytes).unwrap();
    assert_eq!(doc.get_str("kind"), Some("k"));
    assert_eq!(doc.get_str("label"), Some("l"));

    let back: Wrapper = decode_from_slice(&bytes).unwrap();
    assert_eq!(back, value);
}

#[test]
fn numeric_conversions_on_decode() {
    #[derive(Debug, Deserialize)]
    struct Narrowed {
        a: u8,
        b: i64,
        c: f64,
        d: bool,
        e: i32,
    }

    let doc = doc! {
        "a" => 200,            // Int32 -> u8
        "b" => 7,              // Int32 -> i64
        "c" => 3,              // Int32 -> f64
        "d" => 2.5,            // Float -> bool (non-zero)
        "e" => 1_000_000_000i64 // Int64 -> i32
    };
    let narrowed: Narrowed = from_document(doc).unwrap();
    assert_eq!(narrowed.a, 200);
    assert_eq!(narrowed.b, 7);
    assert_eq!(narrowed.c, 3.0);
    assert!(narrowed.d);
    assert_eq!(narrowed.e, 1_000_000_000);
}

#[test]
fn out_of_range_narrowing_fails() {
    #[derive(Debug, Deserialize)]
    struct Tiny {
        #[allow(dead_code)]
        a: u8,
    }
    assert!(from_document::<Tiny>(doc! { "a" => 300 }).is_err());
    assert!(from_document::<Tiny>(doc! { "a" => (-1) }).is_err());
}

#[test]
fn datetime_and_timestamp_convert_to_and_from_int64() {
    #[derive(Debug, Deserialize)]
    struct AsInts {
        when: i64,
        ts: i64,
    }
    let doc = doc! { "when" => (UtcDateTime(123)), "ts" => (Timestamp(456)) };
    let ints: AsInts = from_document(doc).unwrap();
    assert_eq!(ints.when, 123);
    assert_eq!(ints.ts, 456);

    #[derive(Debug, Deserialize)]
    struct AsDomain {
        when: UtcDateTime,
        ts: Timestamp,
    }
    let doc = doc! { "when" => 123i64, "ts" => 456i64 };
    let domain: AsDomain = from_document(doc).unwrap();
    assert_eq!(domain.when, UtcDateTime(123));
    assert_eq!(domain.ts, Timestamp(456));
}

#[test]
fn symbol_converts_to_string() {
    #[derive(Debug, Deserialize)]
    struct S {
        v: String,
    }
    let s: S = from_document(doc! { "v" => (Bson::Symbol("sym".to_owned())) }).unwrap();
    assert_eq!(s.v, "sym");
}

#[test]
fn type_mismatch_is_an_error() {
    #[derive(Debug, Deserialize)]
    struct Typed {
        #[allow(dead_code)]
        n: i32,
    }
    assert!(from_document::<Typed>(doc! { "n" => "five" }).is_err());
}

#[test]
fn unknown_elements_are_skipped() {
    #[derive(Debug, Deserialize)]
    struct Sparse {
        known: i32,
    }
    let doc = doc! {
        "surplus" => { "deep" => [1, 2, 3] },
        "known" => 7,
        "more" => "ignored"
    };
    let sparse: Sparse = from_document(doc).unwrap();
    assert_eq!(sparse.known, 7);
}

#[test]
fn missing_fields_use_defaults() {
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Defaulted {
        present: i32,
        absent: String,
    }
    let d: Defaulted = from_document(doc! { "present" => 3 }).unwrap();
    assert_eq!(d.present, 3);
    assert_eq!(d.absent, "");
}

#[test]
fn unsigned_boundary_encodes_as_int64() {
    #[derive(Serialize)]
    struct N {
        n: u64,
    }
    let doc = to_document(&N {
        n: i32::MAX as u64 + 1,
    })
    .unwrap();
    assert_eq!(doc.get("n").unwrap().element_type(), ElementType::Int64);

    let doc = to_document(&N { n: 12 }).unwrap();
    assert_eq!(doc.get("n").unwrap().element_type(), ElementType::Int32);

    assert!(to_document(&N { n: u64::MAX }).is_err());
}

#[test]
fn ordered_round_trip_reproduces_bytes() {
    let doc = doc! {
        "alpha" => 1,
        "_id" => "kept-in-place",
        "omega" => { "t" => (Bson::Null) }
    };
    let mut buf = Buffer::new();
    encode_document(&mut buf, &doc);
    let bytes = buf.into_vec();

    let decoded = decode_document_from_slice(&bytes).unwrap();
    assert_eq!(decoded, doc);

    let mut buf = Buffer::new();
    encode_document(&mut buf, &decoded);
    assert_eq!(buf.into_vec(), bytes);
}

#[test]
fn raw_passthrough_preserves_bytes() {
    #[derive(Debug, Serialize, Deserialize)]
    struct Carrier {
        value: RawBson,
    }

    let inner = doc! { "a" => 1, "b" => "two" };
    let outer = doc! { "value" => (inner.clone()) };
    let bytes = encode_to_vec(&outer).unwrap();

    let carrier: Carrier = decode_from_slice(&bytes).unwrap();
    assert_eq!(carrier.value.kind(), ElementType::Document);
    assert_eq!(
        carrier.value.data(),
        encode_to_vec(&inner).unwrap().as_slice()
    );
    assert_eq!(carrier.value.to_document().unwrap(), inner);

    // and back out: re-encoding the carrier reproduces the original bytes
    assert_eq!(encode_to_vec(&carrier).unwrap(), bytes);
}

#[test]
fn raw_decode_into_record() {
    #[derive(Debug, Deserialize)]
    struct Inner {
        a: i32,
    }
    let raw = RawBson::from_bson(&Bson::Document(doc! { "a" => 41 }));
    let inner: Inner = raw.decode().unwrap();
    assert_eq!(inner.a, 41);
}

#[test]
fn bson_value_destination_keeps_everything() {
    let doc = doc! {
        "any" => [1, "two", { "three" => 3.0 }]
    };
    let bytes = encode_to_vec(&doc).unwrap();
    let back: Document = decode_from_slice(&bytes).unwrap();
    assert_eq!(back, doc);

    let value: Bson = from_bson(Bson::Document(doc.clone())).unwrap();
    assert_eq!(value, Bson::Document(doc));
}

#[test]
fn object_id_round_trips_through_hex_and_bson() {
    let id = ObjectId::new();
    assert_eq!(ObjectId::parse_str(&id.to_string()).unwrap(), id);

    let doc = doc! { "_id" => id };
    let bytes = encode_to_vec(&doc).unwrap();
    let decoded = decode_document_from_slice(&bytes).unwrap();
    assert_eq!(decoded.get_object_id("_id"), Some(id));
}

#[test]
fn truncated_documents_are_rejected() {
    let good = encode_to_vec(&doc! { "x" => [1, 2, 3] }).unwrap();
    for cut in 1..good.len() {
        assert!(
            decode_document_from_slice(&good[..cut]).is_err(),
            "a prefix of {} bytes decoded",
            cut
        );
    }
}

#[test]
fn to_bson_maps_scalars() {
    assert_eq!(to_bson(&true).unwrap(), Bson::Boolean(true));
    assert_eq!(to_bson("s").unwrap(), Bson::String("s".to_owned()));
    assert_eq!(to_bson(&1.5f64).unwrap(), Bson::Float(1.5));
    assert_eq!(to_bson(&Option::<i32>::None).unwrap(), Bson::Null);
}
