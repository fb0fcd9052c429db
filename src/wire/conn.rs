use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::rc::Rc;

use log::{debug, trace};
use serde::Serialize;

use crate::buffer::Buffer;
use crate::decoder;
use crate::encoder;
use crate::error::{Error, Result};
use crate::wire::cursor::{Cursor, CursorState};
use crate::wire::message::{
    ReplyHeader, OP_GET_MORE, OP_INSERT, OP_KILL_CURSORS, OP_QUERY, OP_REMOVE, OP_REPLY,
    OP_UPDATE, QUERY_AWAIT_DATA, QUERY_EXHAUST, QUERY_NO_CURSOR_TIMEOUT, QUERY_PARTIAL_RESULTS,
    QUERY_SLAVE_OK, QUERY_TAILABLE, REPLY_CURSOR_NOT_FOUND, REPLY_QUERY_FAILURE, UPDATE_MULTI,
    UPDATE_UPSERT, REMOVE_SINGLE,
};
use crate::wire::{FindOptions, RemoveOptions, UpdateOptions};

pub(crate) type CursorRef = Rc<RefCell<CursorState>>;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "27017";

// Appends the default port when the address does not name one. The last ':'
// is compared against the last ']' so bracketed IPv6 literals with a port
// pass through untouched.
fn complete_addr(addr: &str) -> String {
    let addr = if addr.is_empty() { DEFAULT_HOST } else { addr };
    let colon = addr.rfind(':').map(|i| i as isize).unwrap_or(-1);
    let bracket = addr.rfind(']').map(|i| i as isize).unwrap_or(-1);
    if colon <= bracket {
        format!("{}:{}", addr, DEFAULT_PORT)
    } else {
        addr.to_owned()
    }
}

/// A connection to a MongoDB server.
///
/// The handle is cheap to clone; clones share the underlying socket and
/// request-id counter. Cursors returned by [`find`](Connection::find) hold
/// the same shared state, so a connection and its cursors must be used from
/// a single thread of control.
///
/// A write failure closes the socket and latches a permanent error: every
/// later operation on the connection or any of its cursors reports that
/// error without touching the socket. [`close`](Connection::close) has the
/// same effect, with [`Error::ConnectionClosed`] as the latched error.
pub struct Connection<S: Read + Write = TcpStream> {
    inner: Rc<RefCell<Conn<S>>>,
}

impl Connection<TcpStream> {
    /// Connects to the server at `addr`. An empty address means the default
    /// `127.0.0.1:27017`; an address without a port gets 27017 appended.
    pub fn dial(addr: &str) -> Result<Connection<TcpStream>> {
        let addr = complete_addr(addr);
        debug!("dialing {}", addr);
        let stream = TcpStream::connect(&addr)?;
        Ok(Connection::from_stream(stream))
    }
}

impl<S: Read + Write> Connection<S> {
    /// Wraps an already-connected stream. Useful for unix sockets, tunnels
    /// and in-memory test transports.
    pub fn from_stream(stream: S) -> Connection<S> {
        Connection {
            inner: Rc::new(RefCell::new(Conn::new(stream))),
        }
    }

    /// Releases the socket and invalidates every cursor derived from this
    /// connection.
    pub fn close(&self) {
        self.inner.borrow_mut().close();
    }

    /// The latched permanent error, if any.
    pub fn error(&self) -> Option<Error> {
        self.inner.borrow().err.clone()
    }

    /// Updates documents matching `selector` with `update`.
    pub fn update<Sel, U>(
        &self,
        namespace: &str,
        selector: &Sel,
        update: &U,
        options: Option<&UpdateOptions>,
    ) -> Result<()>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
    {
        self.inner
            .borrow_mut()
            .update(namespace, selector, update, options)
    }

    /// Inserts documents into the collection named by `namespace`.
    pub fn insert<T: Serialize>(&self, namespace: &str, documents: &[T]) -> Result<()> {
        self.inner.borrow_mut().insert(namespace, documents)
    }

    /// Removes documents matching `selector`.
    pub fn remove<Sel: Serialize + ?Sized>(
        &self,
        namespace: &str,
        selector: &Sel,
        options: Option<&RemoveOptions>,
    ) -> Result<()> {
        self.inner.borrow_mut().remove(namespace, selector, options)
    }

    /// Sends a query and returns a cursor over its results. The cursor must
    /// be closed (dropping it closes it).
    pub fn find<Q: Serialize + ?Sized>(
        &self,
        namespace: &str,
        query: &Q,
        options: Option<&FindOptions>,
    ) -> Result<Cursor<S>> {
        let state = self.inner.borrow_mut().find(namespace, query, options)?;
        Ok(Cursor::new(self.inner.clone(), state))
    }
}

impl<S: Read + Write> Clone for Connection<S> {
    fn clone(&self) -> Connection<S> {
        Connection {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct Conn<S> {
    stream: Option<BufReader<S>>,
    request_id: u32,
    cursors: HashMap<u32, CursorRef>,
    // The cursor whose reply documents are still on the socket.
    streaming: Option<CursorRef>,
    // Bytes and documents remaining in the current reply body.
    response_len: usize,
    response_count: usize,
    pub(crate) err: Option<Error>,
}

impl<S: Read + Write> Conn<S> {
    fn new(stream: S) -> Conn<S> {
        Conn {
            stream: Some(BufReader::new(stream)),
            request_id: 0,
            cursors: HashMap::new(),
            streaming: None,
            response_len: 0,
            response_count: 0,
            err: None,
        }
    }

    fn next_id(&mut self) -> u32 {
        self.request_id = self.request_id.wrapping_add(1);
        self.request_id
    }

    fn stream(&mut self) -> Result<&mut BufReader<S>> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream),
            None => Err(self.err.clone().unwrap_or(Error::ConnectionClosed)),
        }
    }

    fn fatal(&mut self, err: Error) -> Error {
        if self.err.is_none() {
            self.close();
            self.err = Some(err.clone());
        }
        err
    }

    pub(crate) fn close(&mut self) {
        self.stream = None;
        self.cursors.clear();
        self.streaming = None;
        self.response_len = 0;
        self.response_count = 0;
        self.err = Some(Error::ConnectionClosed);
    }

    pub(crate) fn is_streaming(&self, cursor: &CursorRef) -> bool {
        match &self.streaming {
            Some(streaming) => Rc::ptr_eq(streaming, cursor),
            None => false,
        }
    }

    pub(crate) fn remove_cursor(&mut self, request_id: u32) {
        self.cursors.remove(&request_id);
    }

    // Backfills the message length and writes the frame in one batch.
    fn send(&mut self, buf: &mut Buffer) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }
        buf.set_u32(0, buf.len() as u32);
        let res = {
            let stream = self.stream()?.get_mut();
            match stream.write_all(buf.as_slice()) {
                Ok(()) => stream.flush(),
                Err(err) => Err(err),
            }
        };
        res.map_err(|err| self.fatal(err.into()))
    }

    pub(crate) fn update<Sel, U>(
        &mut self,
        namespace: &str,
        selector: &Sel,
        update: &U,
        options: Option<&UpdateOptions>,
    ) -> Result<()>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
    {
        let mut flags = 0;
        if let Some(options) = options {
            if options.upsert {
                flags |= UPDATE_UPSERT;
            }
            if options.multi {
                flags |= UPDATE_MULTI;
            }
        }
        let mut b = Buffer::new();
        b.next(4); // message length placeholder
        b.write_u32(self.next_id());
        b.write_u32(0); // responseTo
        b.write_u32(OP_UPDATE);
        b.write_u32(0); // reserved
        b.write_cstring(namespace);
        b.write_u32(flags);
        encoder::encode(&mut b, selector)?;
        encoder::encode(&mut b, update)?;
        trace!("update ns={} flags={:#x}", namespace, flags);
        self.send(&mut b)
    }

    pub(crate) fn insert<T: Serialize>(&mut self, namespace: &str, documents: &[T]) -> Result<()> {
        if documents.is_empty() {
            return Err(Error::Message("insert with no documents".to_owned()));
        }
        let mut b = Buffer::new();
        b.next(4);
        b.write_u32(self.next_id());
        b.write_u32(0);
        b.write_u32(OP_INSERT);
        b.write_u32(0); // reserved
        b.write_cstring(namespace);
        for document in documents {
            encoder::encode(&mut b, document)?;
        }
        trace!("insert ns={} n={}", namespace, documents.len());
        self.send(&mut b)
    }

    pub(crate) fn remove<Sel: Serialize + ?Sized>(
        &mut self,
        namespace: &str,
        selector: &Sel,
        options: Option<&RemoveOptions>,
    ) -> Result<()> {
        let mut flags = 0;
        if let Some(options) = options {
            if options.single {
                flags |= REMOVE_SINGLE;
            }
        }
        let mut b = Buffer::new();
        b.next(4);
        b.write_u32(self.next_id());
        b.write_u32(0);
        b.write_u32(OP_REMOVE);
        b.write_u32(0); // reserved
        b.write_cstring(namespace);
        b.write_u32(flags);
        encoder::encode(&mut b, selector)?;
        trace!("remove ns={} flags={:#x}", namespace, flags);
        self.send(&mut b)
    }

    pub(crate) fn find<Q: Serialize + ?Sized>(
        &mut self,
        namespace: &str,
        query: &Q,
        options: Option<&FindOptions>,
    ) -> Result<CursorRef> {
        let default_options = FindOptions::default();
        let options = options.unwrap_or(&default_options);

        let mut state = CursorState {
            namespace: namespace.to_owned(),
            request_id: self.next_id(),
            cursor_id: 0,
            limit: options.limit,
            batch_size: options.batch_size,
            count: 0,
            docs: Default::default(),
            flags: 0,
            err: None,
        };
        if state.batch_size == 1 {
            // The server treats numberToReturn == 1 as a hard limit; ask for
            // two so a batch size of one does not truncate the result set.
            state.batch_size = 2;
        }
        if options.tailable {
            state.flags |= QUERY_TAILABLE;
            state.limit = 0;
        }
        if options.slave_ok {
            state.flags |= QUERY_SLAVE_OK;
        }
        if options.no_cursor_timeout {
            state.flags |= QUERY_NO_CURSOR_TIMEOUT;
        }
        if options.await_data {
            state.flags |= QUERY_AWAIT_DATA;
        }
        if options.exhaust {
            state.flags |= QUERY_EXHAUST;
        }
        if options.partial_results {
            state.flags |= QUERY_PARTIAL_RESULTS;
        }

        let mut b = Buffer::new();
        b.next(4);
        b.write_u32(state.request_id);
        b.write_u32(0);
        b.write_u32(OP_QUERY);
        b.write_u32(state.flags);
        b.write_cstring(namespace);
        b.write_u32(options.skip as u32);
        b.write_u32(state.number_to_return() as u32);
        encoder::encode(&mut b, query)?;
        if let Some(fields) = &options.fields {
            encoder::encode(&mut b, fields)?;
        }
        debug!(
            "find ns={} request_id={} flags={:#x}",
            namespace, state.request_id, state.flags
        );
        self.send(&mut b)?;

        let request_id = state.request_id;
        let cursor = Rc::new(RefCell::new(state));
        self.cursors.insert(request_id, cursor.clone());
        Ok(cursor)
    }

    pub(crate) fn get_more(&mut self, cursor: &CursorRef) -> Result<()> {
        let request_id = self.next_id();
        let (namespace, number_to_return, cursor_id) = {
            let state = cursor.borrow();
            (
                state.namespace.clone(),
                state.number_to_return(),
                state.cursor_id,
            )
        };
        let mut b = Buffer::new();
        b.next(4);
        b.write_u32(request_id);
        b.write_u32(0);
        b.write_u32(OP_GET_MORE);
        b.write_u32(0); // reserved
        b.write_cstring(&namespace);
        b.write_u32(number_to_return as u32);
        b.write_u64(cursor_id);
        trace!(
            "get_more ns={} cursor_id={} request_id={}",
            namespace,
            cursor_id,
            request_id
        );
        self.send(&mut b)?;
        cursor.borrow_mut().request_id = request_id;
        self.cursors.insert(request_id, cursor.clone());
        Ok(())
    }

    pub(crate) fn kill_cursors(&mut self, cursor_ids: &[u64]) -> Result<()> {
        let mut b = Buffer::new();
        b.next(4);
        b.write_u32(self.next_id());
        b.write_u32(0);
        b.write_u32(OP_KILL_CURSORS);
        b.write_u32(0); // reserved
        b.write_u32(cursor_ids.len() as u32);
        for cursor_id in cursor_ids {
            b.write_u64(*cursor_id);
        }
        trace!("kill_cursors ids={:?}", cursor_ids);
        self.send(&mut b)
    }

    /// Reads one document off the current reply body into its own
    /// allocation.
    pub(crate) fn read_doc(&mut self) -> Result<Vec<u8>> {
        if self.response_len < 4 {
            return Err(self.fatal(Error::FrameShape(
                "incomplete document in message".to_owned(),
            )));
        }
        let mut len_bytes = [0u8; 4];
        let res = {
            let stream = self.stream()?;
            stream.read_exact(&mut len_bytes)
        };
        if let Err(err) = res {
            return Err(self.fatal(err.into()));
        }
        let n = u32::from_le_bytes(len_bytes) as usize;
        if n < 5 || self.response_len < n {
            return Err(self.fatal(Error::FrameShape(
                "incomplete document in message".to_owned(),
            )));
        }
        let mut doc = vec![0u8; n];
        doc[..4].copy_from_slice(&len_bytes);
        let res = {
            let stream = self.stream()?;
            stream.read_exact(&mut doc[4..])
        };
        if let Err(err) = res {
            return Err(self.fatal(err.into()));
        }
        self.response_len -= n;
        self.response_count -= 1;
        if self.response_count == 0 {
            self.streaming = None;
            if self.response_len != 0 {
                return Err(self.fatal(Error::FrameShape(
                    "unexpected data in message".to_owned(),
                )));
            }
        }
        Ok(doc)
    }

    /// Drains and discards the rest of the current reply body.
    pub(crate) fn skip_docs(&mut self) -> Result<()> {
        if self.response_len > 0 {
            let n = self.response_len as u64;
            let res = {
                let stream = self.stream()?;
                io::copy(&mut stream.take(n), &mut io::sink())
            };
            match res {
                Ok(copied) if copied == n => {}
                Ok(_) => {
                    return Err(self.fatal(Error::Io(std::sync::Arc::new(
                        io::Error::from(io::ErrorKind::UnexpectedEof),
                    ))))
                }
                Err(err) => return Err(self.fatal(err.into())),
            }
        }
        self.response_len = 0;
        self.response_count = 0;
        self.streaming = None;
        Ok(())
    }

    /// Receives a single reply from the server and delivers it to the
    /// cursor that requested it.
    pub(crate) fn receive(&mut self) -> Result<()> {
        if let Some(err) = &self.err {
            return Err(err.clone());
        }

        // Displacement: documents still pending for the previous streaming
        // cursor move into its in-memory batch so the socket can advance.
        while self.response_count > 0 {
            let streaming = match &self.streaming {
                Some(cursor) => cursor.clone(),
                None => {
                    return Err(self.fatal(Error::FrameShape(
                        "reply documents pending without a cursor".to_owned(),
                    )))
                }
            };
            let doc = self.read_doc()?;
            streaming.borrow_mut().docs.push_back(doc);
        }

        let mut header = [0u8; ReplyHeader::LEN];
        let res = {
            let stream = self.stream()?;
            stream.read_exact(&mut header)
        };
        if let Err(err) = res {
            return Err(self.fatal(err.into()));
        }
        let reply = ReplyHeader::parse(&header);
        if (reply.message_length as usize) < ReplyHeader::LEN {
            return Err(self.fatal(Error::FrameShape(
                "reply shorter than its preamble".to_owned(),
            )));
        }
        self.response_len = reply.message_length as usize - ReplyHeader::LEN;
        self.response_count = reply.number_returned as usize;

        if reply.op_code != OP_REPLY {
            return Err(self.fatal(Error::UnknownOpcode(reply.op_code)));
        }
        trace!(
            "reply to={} cursor_id={} flags={:#x} n={}",
            reply.response_to,
            reply.cursor_id,
            reply.flags,
            reply.number_returned
        );

        let cursor = match self.cursors.remove(&reply.response_to) {
            Some(cursor) => cursor,
            None => {
                // Nobody is waiting for this reply; make sure the server
                // does not keep a cursor alive for it.
                if reply.cursor_id != 0 {
                    self.kill_cursors(&[reply.cursor_id])?;
                }
                return self.skip_docs();
            }
        };

        {
            let mut state = cursor.borrow_mut();
            state.cursor_id = reply.cursor_id;
            state.request_id = 0;
            if state.flags & QUERY_EXHAUST != 0 && reply.cursor_id != 0 {
                // The server will push further batches unprompted, each
                // under a fresh requestId chained off this reply.
                state.request_id = reply.request_id;
            }
        }
        if cursor.borrow().request_id != 0 {
            self.cursors.insert(reply.request_id, cursor.clone());
        }

        if reply.flags & REPLY_CURSOR_NOT_FOUND != 0 {
            self.unregister(&cursor);
            cursor.borrow_mut().err = Some(Error::CursorNotFound);
            if self.response_count != 0 || self.response_len != 0 {
                return Err(self.fatal(Error::FrameShape(
                    "unexpected data after cursor not found".to_owned(),
                )));
            }
            return Ok(());
        }

        if reply.flags & REPLY_QUERY_FAILURE != 0 {
            if self.response_count != 1 {
                return Err(self.fatal(Error::FrameShape(
                    "unexpected document count for query failure".to_owned(),
                )));
            }
            let doc = self.read_doc()?;
            self.unregister(&cursor);
            let err = match decoder::decode_document_from_slice(&doc) {
                Ok(doc) => match doc.get_str("$err") {
                    Some(message) => Error::QueryFailure(message.to_owned()),
                    None => Error::QueryFailure("query failure".to_owned()),
                },
                Err(err) => err,
            };
            cursor.borrow_mut().err = Some(err);
            return Ok(());
        }

        if self.response_count > 0 {
            self.streaming = Some(cursor);
        }
        Ok(())
    }

    // Drops a cursor's outstanding-request registration, if it has one.
    fn unregister(&mut self, cursor: &CursorRef) {
        let request_id = {
            let mut state = cursor.borrow_mut();
            std::mem::replace(&mut state.request_id, 0)
        };
        if request_id != 0 {
            self.cursors.remove(&request_id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::complete_addr;

    #[test]
    fn default_port_is_appended() {
        assert_eq!(complete_addr(""), "127.0.0.1:27017");
        assert_eq!(complete_addr("db.example.com"), "db.example.com:27017");
        assert_eq!(complete_addr("db.example.com:27018"), "db.example.com:27018");
        assert_eq!(complete_addr("[::1]"), "[::1]:27017");
        assert_eq!(complete_addr("[::1]:27018"), "[::1]:27018");
    }
}
