//! Connection and cursor tests against an in-memory stream: the test plays
//! the server by preloading reply frames and inspecting the frames the
//! driver writes.

#[macro_use]
extern crate mongowire;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::rc::Rc;

use pretty_assertions::assert_eq;

use mongowire::wire::message::{
    OP_GET_MORE, OP_INSERT, OP_KILL_CURSORS, OP_QUERY, OP_REMOVE, OP_REPLY, OP_UPDATE,
    QUERY_EXHAUST, QUERY_TAILABLE, REPLY_CURSOR_NOT_FOUND, REPLY_QUERY_FAILURE,
};
use mongowire::{
    encode_to_vec, Collection, Connection, Database, Document, Error, FindOptions,
};

/// Both ends of the conversation: reads come from `input` (what the "server"
/// has sent), writes land in `output`.
#[derive(Clone, Default)]
struct FakeStream {
    inner: Rc<RefCell<FakeStreamInner>>,
}

#[derive(Default)]
struct FakeStreamInner {
    input: VecDeque<u8>,
    output: Vec<u8>,
    fail_writes: bool,
}

impl FakeStream {
    fn new() -> FakeStream {
        FakeStream::default()
    }

    fn push(&self, bytes: Vec<u8>) {
        self.inner.borrow_mut().input.extend(bytes);
    }

    fn sent(&self) -> Vec<u8> {
        self.inner.borrow().output.clone()
    }

    fn clear_sent(&self) {
        self.inner.borrow_mut().output.clear();
    }

    fn fail_writes(&self) {
        self.inner.borrow_mut().fail_writes = true;
    }
}

impl Read for FakeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.input.is_empty() {
            return Ok(0); // connection closed from the server side
        }
        let n = buf.len().min(inner.input.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inner.input.pop_front().unwrap();
        }
        Ok(n)
    }
}

impl Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self.inner.borrow_mut();
        if inner.fail_writes {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        inner.output.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct Frame {
    request_id: u32,
    response_to: u32,
    op_code: u32,
    body: Vec<u8>,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn parse_frames(bytes: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos < bytes.len() {
        let len = read_u32(bytes, pos) as usize;
        assert!(len >= 16 && pos + len <= bytes.len(), "mangled frame");
        frames.push(Frame {
            request_id: read_u32(bytes, pos + 4),
            response_to: read_u32(bytes, pos + 8),
            op_code: read_u32(bytes, pos + 12),
            body: bytes[pos + 16..pos + len].to_vec(),
        });
        pos += len;
    }
    frames
}

fn reply(
    response_to: u32,
    request_id: u32,
    flags: u32,
    cursor_id: u64,
    docs: &[Document],
) -> Vec<u8> {
    let mut body = Vec::new();
    for doc in docs {
        body.extend(encode_to_vec(doc).unwrap());
    }
    let mut out = Vec::new();
    out.extend((36 + body.len() as u32).to_le_bytes());
    out.extend(request_id.to_le_bytes());
    out.extend(response_to.to_le_bytes());
    out.extend(OP_REPLY.to_le_bytes());
    out.extend(flags.to_le_bytes());
    out.extend(cursor_id.to_le_bytes());
    out.extend(0u32.to_le_bytes()); // startingFrom
    out.extend((docs.len() as u32).to_le_bytes());
    out.extend(body);
    out
}

fn connect() -> (Connection<FakeStream>, FakeStream) {
    let stream = FakeStream::new();
    (Connection::from_stream(stream.clone()), stream)
}

#[test]
fn mutation_frames_carry_the_right_opcodes() {
    let (conn, stream) = connect();

    conn.update("db.c", &doc! { "x" => 1 }, &doc! { "x" => 2 }, None)
        .unwrap();
    conn.insert("db.c", &[doc! { "x" => 3 }]).unwrap();
    conn.remove("db.c", &doc! { "x" => 3 }, None).unwrap();

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].op_code, OP_UPDATE);
    assert_eq!(frames[1].op_code, OP_INSERT);
    assert_eq!(frames[2].op_code, OP_REMOVE);
    // request ids are allocated monotonically starting at 1
    assert_eq!(frames[0].request_id, 1);
    assert_eq!(frames[1].request_id, 2);
    assert_eq!(frames[2].request_id, 3);
    assert!(frames.iter().all(|f| f.response_to == 0));
}

#[test]
fn insert_with_no_documents_is_rejected() {
    let (conn, stream) = connect();
    let docs: [Document; 0] = [];
    assert!(conn.insert("db.c", &docs).is_err());
    assert!(stream.sent().is_empty());
}

#[test]
fn find_frame_shape() {
    let (conn, stream) = connect();
    let options = FindOptions {
        skip: 5,
        limit: 10,
        ..Default::default()
    };
    let _cursor = conn.find("db.c", &doc! {}, Some(&options)).unwrap();

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 1);
    let frame = &frames[0];
    assert_eq!(frame.op_code, OP_QUERY);
    // body: flags, cstring namespace, skip, numberToReturn, query document
    assert_eq!(read_u32(&frame.body, 0), 0);
    let ns_end = 4 + "db.c".len();
    assert_eq!(&frame.body[4..ns_end], b"db.c");
    assert_eq!(frame.body[ns_end], 0);
    assert_eq!(read_u32(&frame.body, ns_end + 1), 5); // skip
    assert_eq!(read_u32(&frame.body, ns_end + 5), 10); // numberToReturn = remaining limit
    assert_eq!(&frame.body[ns_end + 9..], &[5, 0, 0, 0, 0]); // empty query doc
}

#[test]
fn cursor_streams_documents_and_latches_exhaustion() {
    let (conn, stream) = connect();
    stream.push(reply(
        1,
        100,
        0,
        0,
        &[doc! { "n" => 1 }, doc! { "n" => 2 }],
    ));

    let mut cursor = conn.find("db.c", &doc! {}, None).unwrap();
    assert!(cursor.has_next());
    let first: Document = cursor.next().unwrap();
    assert_eq!(first.get_i32("n"), Some(1));
    let second: Document = cursor.next().unwrap();
    assert_eq!(second.get_i32("n"), Some(2));

    assert!(!cursor.has_next());
    assert!(matches!(
        cursor.next::<Document>(),
        Err(Error::CursorExhausted)
    ));
    assert!(matches!(cursor.error(), Some(Error::CursorExhausted)));
    // the server never assigned a cursor id, so nothing to kill
    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 1);
}

#[test]
fn get_more_continues_an_open_cursor() {
    let (conn, stream) = connect();
    stream.push(reply(1, 100, 0, 99, &[doc! { "n" => 1 }]));

    let mut cursor = conn.find("db.c", &doc! {}, None).unwrap();
    assert!(cursor.has_next());
    let _: Document = cursor.next().unwrap();

    // batch drained but the server cursor is open: expect a get-more
    stream.push(reply(2, 101, 0, 99, &[doc! { "n" => 2 }]));
    assert!(cursor.has_next());
    let second: Document = cursor.next().unwrap();
    assert_eq!(second.get_i32("n"), Some(2));

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].op_code, OP_GET_MORE);
    // body: reserved, cstring namespace, numberToReturn, cursorId
    let body = &frames[1].body;
    let ns_end = 4 + "db.c".len() + 1;
    assert_eq!(&body[4..ns_end - 1], b"db.c");
    assert_eq!(
        u64::from_le_bytes(body[ns_end + 4..ns_end + 12].try_into().unwrap()),
        99
    );
}

#[test]
fn limit_reached_kills_the_server_cursor() {
    let (conn, stream) = connect();
    stream.push(reply(
        1,
        100,
        0,
        77,
        &[doc! { "n" => 1 }, doc! { "n" => 2 }],
    ));

    let options = FindOptions {
        limit: 1,
        ..Default::default()
    };
    let mut cursor = conn.find("db.c", &doc! {}, Some(&options)).unwrap();
    assert!(cursor.has_next());
    let _: Document = cursor.next().unwrap();

    assert!(matches!(cursor.error(), Some(Error::CursorExhausted)));
    assert!(!cursor.has_next());

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].op_code, OP_KILL_CURSORS);
    // body: reserved, count, the id
    assert_eq!(read_u32(&frames[1].body, 4), 1);
    assert_eq!(
        u64::from_le_bytes(frames[1].body[8..16].try_into().unwrap()),
        77
    );
}

#[test]
fn tailable_cursor_stays_alive_between_batches() {
    let (conn, stream) = connect();
    let options = FindOptions {
        tailable: true,
        ..Default::default()
    };

    // one document available at first
    stream.push(reply(1, 100, 0, 9, &[doc! { "x" => 0 }]));
    let mut cursor = conn.find("db.capped", &doc! {}, Some(&options)).unwrap();
    let frames = parse_frames(&stream.sent());
    assert_eq!(read_u32(&frames[0].body, 0), QUERY_TAILABLE);

    assert!(cursor.has_next());
    let doc: Document = cursor.next().unwrap();
    assert_eq!(doc.get_i32("x"), Some(0));

    // drained: the get-more comes back empty, the cursor stays alive
    stream.push(reply(2, 101, 0, 9, &[]));
    assert!(!cursor.has_next());
    assert!(cursor.error().is_none());

    // two more documents appear
    stream.push(reply(3, 102, 0, 9, &[doc! { "x" => 1 }, doc! { "x" => 2 }]));
    assert!(cursor.has_next());
    let doc: Document = cursor.next().unwrap();
    assert_eq!(doc.get_i32("x"), Some(1));
    assert!(cursor.has_next());
    let doc: Document = cursor.next().unwrap();
    assert_eq!(doc.get_i32("x"), Some(2));

    stream.push(reply(4, 103, 0, 9, &[]));
    assert!(!cursor.has_next());
    assert!(cursor.error().is_none());
}

#[test]
fn query_failure_latches_the_cursor_not_the_connection() {
    let (conn, stream) = connect();
    stream.push(reply(
        1,
        100,
        REPLY_QUERY_FAILURE,
        0,
        &[doc! { "$err" => "exhausted heap" }],
    ));

    let mut cursor = conn.find("db.c", &doc! {}, None).unwrap();
    // the error is reported from next(), so has_next says true
    assert!(cursor.has_next());
    match cursor.next::<Document>() {
        Err(Error::QueryFailure(message)) => assert_eq!(message, "exhausted heap"),
        other => panic!("expected a query failure, got {:?}", other),
    }
    assert!(conn.error().is_none());
}

#[test]
fn cursor_not_found_is_latched() {
    let (conn, stream) = connect();
    stream.push(reply(1, 100, 0, 44, &[doc! { "n" => 1 }]));

    let mut cursor = conn
        .find("db.c", &doc! {}, Some(&FindOptions::default()))
        .unwrap();
    assert!(cursor.has_next());
    let _: Document = cursor.next().unwrap();

    stream.push(reply(2, 101, REPLY_CURSOR_NOT_FOUND, 0, &[]));
    assert!(cursor.has_next());
    assert!(matches!(
        cursor.next::<Document>(),
        Err(Error::CursorNotFound)
    ));
    assert!(conn.error().is_none());
}

#[test]
fn orphan_reply_with_cursor_id_gets_killed() {
    let (conn, stream) = connect();
    // a reply nobody asked for, then the real one
    stream.push(reply(99, 100, 0, 55, &[]));
    stream.push(reply(1, 101, 0, 0, &[doc! { "n" => 1 }]));

    let mut cursor = conn.find("db.c", &doc! {}, None).unwrap();
    assert!(cursor.has_next());
    let doc: Document = cursor.next().unwrap();
    assert_eq!(doc.get_i32("n"), Some(1));

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].op_code, OP_KILL_CURSORS);
    assert_eq!(
        u64::from_le_bytes(frames[1].body[8..16].try_into().unwrap()),
        55
    );
}

#[test]
fn displaced_documents_become_private_copies() {
    let (conn, stream) = connect();
    stream.push(reply(
        1,
        100,
        0,
        0,
        &[doc! { "a" => 1 }, doc! { "a" => 2 }],
    ));
    stream.push(reply(2, 101, 0, 0, &[doc! { "b" => 1 }]));

    let mut cursor_a = conn.find("db.c", &doc! {}, None).unwrap();
    let mut cursor_b = conn.find("db.c", &doc! {}, None).unwrap();

    assert!(cursor_a.has_next());
    let a1: Document = cursor_a.next().unwrap();
    assert_eq!(a1.get_i32("a"), Some(1));

    // b's receive displaces a's remaining document off the socket
    assert!(cursor_b.has_next());
    let b1: Document = cursor_b.next().unwrap();
    assert_eq!(b1.get_i32("b"), Some(1));

    assert!(cursor_a.has_next());
    let a2: Document = cursor_a.next().unwrap();
    assert_eq!(a2.get_i32("a"), Some(2));

    assert!(!cursor_a.has_next());
    assert!(!cursor_b.has_next());
}

#[test]
fn exhaust_replies_chain_without_get_more() {
    let (conn, stream) = connect();
    let options = FindOptions {
        exhaust: true,
        ..Default::default()
    };
    stream.push(reply(1, 101, 0, 7, &[doc! { "n" => 1 }]));
    stream.push(reply(101, 102, 0, 7, &[doc! { "n" => 2 }]));
    stream.push(reply(102, 103, 0, 0, &[doc! { "n" => 3 }]));

    let mut cursor = conn.find("db.c", &doc! {}, Some(&options)).unwrap();
    let mut seen = Vec::new();
    while cursor.has_next() {
        let doc: Document = cursor.next().unwrap();
        seen.push(doc.get_i32("n").unwrap());
    }
    assert_eq!(seen, vec![1, 2, 3]);

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 1, "exhaust mode must not send get-more");
    assert_eq!(read_u32(&frames[0].body, 0), QUERY_EXHAUST);
}

#[test]
fn write_failure_latches_the_connection() {
    let (conn, stream) = connect();
    stream.fail_writes();

    let err = conn
        .insert("db.c", &[doc! { "x" => 1 }])
        .expect_err("write should fail");
    assert!(matches!(err, Error::Io(_)));
    // the original error is latched and re-reported
    assert!(matches!(conn.error(), Some(Error::Io(_))));
    assert!(matches!(
        conn.remove("db.c", &doc! {}, None),
        Err(Error::Io(_))
    ));
}

#[test]
fn closing_the_connection_invalidates_cursors() {
    let (conn, _stream) = connect();
    let mut cursor = conn.find("db.c", &doc! {}, None).unwrap();

    conn.close();
    // no panic, the error surfaces through the cursor
    assert!(cursor.has_next());
    assert!(matches!(
        cursor.next::<Document>(),
        Err(Error::ConnectionClosed)
    ));
    cursor.close();
}

#[test]
fn batch_size_one_is_rewritten_to_two() {
    let (conn, stream) = connect();
    let options = FindOptions {
        batch_size: 1,
        ..Default::default()
    };
    let _cursor = conn.find("db.c", &doc! {}, Some(&options)).unwrap();

    let frames = parse_frames(&stream.sent());
    let body = &frames[0].body;
    let ns_end = 4 + "db.c".len() + 1;
    // numberToReturn must be 2, not the hard-limiting 1
    assert_eq!(read_u32(body, ns_end + 4), 2);
}

#[test]
fn safe_collection_checks_last_error() {
    let (conn, stream) = connect();
    let things = Collection::safe(conn.clone(), "db.things");

    // insert is frame 1, the getLastError query is frame 2
    stream.push(reply(2, 100, 0, 0, &[doc! { "ok" => 1, "n" => 1 }]));
    things.insert(&doc! { "x" => 1 }).unwrap();

    let frames = parse_frames(&stream.sent());
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].op_code, OP_INSERT);
    assert_eq!(frames[1].op_code, OP_QUERY);
    let body = &frames[1].body;
    let ns = b"db.$cmd";
    assert_eq!(&body[4..4 + ns.len()], ns);

    // a duplicate key turns into a write error
    stream.clear_sent();
    stream.push(reply(
        4,
        101,
        0,
        0,
        &[doc! { "ok" => 1, "err" => "E11000 duplicate key", "code" => 11000, "n" => 0 }],
    ));
    match things.insert(&doc! { "x" => 1 }) {
        Err(Error::WriteError { message, code, .. }) => {
            assert_eq!(message, "E11000 duplicate key");
            assert_eq!(code, 11000);
        }
        other => panic!("expected a write error, got {:?}", other),
    }
}

#[test]
fn database_run_checks_ok_and_returns_the_reply() {
    let (conn, stream) = connect();
    let db = Database::new(conn.clone(), "admin");

    stream.push(reply(
        1,
        100,
        0,
        0,
        &[doc! { "ok" => 1.0, "version" => "1.8.1" }],
    ));
    let info = db.run(&doc! { "buildInfo" => 1 }).unwrap();
    assert_eq!(info.get_str("version"), Some("1.8.1"));

    stream.push(reply(
        2,
        101,
        0,
        0,
        &[doc! { "ok" => 0, "errmsg" => "no such command" }],
    ));
    match db.run(&doc! { "bogus" => 1 }) {
        Err(Error::CommandFailed(message)) => assert_eq!(message, "no such command"),
        other => panic!("expected a command failure, got {:?}", other),
    }
}

#[test]
fn collection_count_via_query() {
    let (conn, stream) = connect();
    let things = Collection::new(conn.clone(), "db.things");

    stream.push(reply(1, 100, 0, 0, &[doc! { "ok" => 1, "n" => 42i64 }]));
    let query = things.find(&doc! { "kind" => "widget" }).unwrap();
    assert_eq!(query.count().unwrap(), 42);

    // the command went to the $cmd pseudo-collection with the filter inside
    let frames = parse_frames(&stream.sent());
    let body = &frames[0].body;
    assert_eq!(&body[4..11], b"db.$cmd");
}
