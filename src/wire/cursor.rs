use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::rc::Rc;

use serde::de::DeserializeOwned;

use crate::decoder;
use crate::error::{Error, Result};
use crate::wire::conn::{Conn, CursorRef};

pub(crate) struct CursorState {
    pub namespace: String,
    /// The outstanding request this cursor is waiting on; zero when no
    /// request is in flight.
    pub request_id: u32,
    /// The server-assigned cursor id; zero means the server is done.
    pub cursor_id: u64,
    pub limit: i32,
    pub batch_size: i32,
    /// Documents delivered so far.
    pub count: i32,
    /// Documents displaced off the socket into private copies.
    pub docs: VecDeque<Vec<u8>>,
    pub flags: u32,
    pub err: Option<Error>,
}

impl CursorState {
    /// Combines the configured limit and batch size into the wire's
    /// numberToReturn field.
    ///
    /// A negative batch size means "return this many and close the cursor".
    /// A result of exactly 1 is sent as -1 because the server treats
    /// numberToReturn == 1 as a hard limit.
    pub(crate) fn number_to_return(&self) -> i32 {
        let batch_size = self.batch_size.abs();
        let remaining = if self.limit > 0 {
            self.limit - self.count
        } else {
            0
        };

        let mut n = if batch_size == 0 && remaining > 0 {
            remaining
        } else if batch_size > 0 && remaining == 0 {
            batch_size
        } else if remaining < batch_size {
            remaining
        } else {
            batch_size
        };

        if self.batch_size < 0 {
            n = -n;
        }
        if n == 1 {
            n = -1;
        }
        n
    }
}

/// A handle to a server-side result set, streamed in batches.
///
/// ```no_run
/// # use mongowire::{Connection, Document};
/// # fn run() -> mongowire::Result<()> {
/// let conn = Connection::dial("127.0.0.1")?;
/// let mut cursor = conn.find("db.coll", &Document::new(), None)?;
/// while cursor.has_next() {
///     let doc: Document = cursor.next()?;
///     // ...
/// }
/// cursor.close();
/// # Ok(())
/// # }
/// ```
///
/// For a tailable cursor, `has_next` returning false does not end the
/// cursor; check [`error`](Cursor::error) to tell a live cursor apart from a
/// dead one, and poll again later.
pub struct Cursor<S: Read + Write = TcpStream> {
    conn: Rc<RefCell<Conn<S>>>,
    state: CursorRef,
}

impl<S: Read + Write> Cursor<S> {
    pub(crate) fn new(conn: Rc<RefCell<Conn<S>>>, state: CursorRef) -> Cursor<S> {
        Cursor { conn, state }
    }

    /// The latched terminal error, if any. [`Error::CursorExhausted`] means
    /// the cursor simply ran out of documents.
    pub fn error(&self) -> Option<Error> {
        self.state.borrow().err.clone()
    }

    fn is_streaming(&self) -> bool {
        self.conn.borrow().is_streaming(&self.state)
    }

    // Teardown: kill the server cursor, drain the socket if this cursor was
    // streaming, drop the demux registration, then latch `err`. Connection
    // failures here are already latched on the connection itself, so they
    // are not reported again.
    fn terminate(&self, err: Error) {
        if self.state.borrow().err.is_some() {
            return;
        }
        self.release();
        self.state.borrow_mut().err = Some(err);
    }

    fn release(&self) {
        let mut conn = match self.conn.try_borrow_mut() {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let (cursor_id, request_id) = {
            let state = self.state.borrow();
            (state.cursor_id, state.request_id)
        };
        if cursor_id != 0 {
            let _ = conn.kill_cursors(&[cursor_id]);
        }
        if conn.is_streaming(&self.state) {
            let _ = conn.skip_docs();
        }
        if request_id != 0 {
            conn.remove_cursor(request_id);
            self.state.borrow_mut().request_id = 0;
        }
    }

    /// True when another document can be retrieved with [`next`](Cursor::next).
    ///
    /// A latched non-exhaustion error also returns true so that the error is
    /// reported from the `next` call. For a tailable cursor with no current
    /// documents this returns false without ending the cursor.
    pub fn has_next(&mut self) -> bool {
        if let Some(err) = self.state.borrow().err.as_ref() {
            return !err.is_exhausted();
        }
        if !self.state.borrow().docs.is_empty() || self.is_streaming() {
            return true;
        }

        if self.state.borrow().request_id == 0 {
            if self.state.borrow().cursor_id == 0 {
                self.terminate(Error::CursorExhausted);
                return false;
            }
            let res = self.conn.borrow_mut().get_more(&self.state);
            if let Err(err) = res {
                self.terminate(err);
                return true;
            }
        }

        // Drive the connection until our request comes back (or dies).
        let request_id = self.state.borrow().request_id;
        while self.state.borrow().request_id == request_id {
            let res = self.conn.borrow_mut().receive();
            if let Err(err) = res {
                self.terminate(err);
                break;
            }
        }

        let latched = self.state.borrow().err.clone();
        match latched {
            Some(err) => !err.is_exhausted(),
            None => {
                if self.is_streaming() {
                    true
                } else if self.state.borrow().cursor_id == 0 {
                    self.terminate(Error::CursorExhausted);
                    false
                } else {
                    // Tailable cursor with nothing to deliver right now.
                    false
                }
            }
        }
    }

    /// Fetches and decodes the next document.
    ///
    /// Returns [`Error::CursorExhausted`] once the result set is done. A
    /// decode failure is local to the document: it is returned but not
    /// latched, and the cursor can keep going.
    pub fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        if !self.has_next() {
            return Err(Error::CursorExhausted);
        }
        if let Some(err) = self.state.borrow().err.clone() {
            return Err(err);
        }

        let popped = self.state.borrow_mut().docs.pop_front();
        let bytes = match popped {
            Some(bytes) => bytes,
            None if self.is_streaming() => {
                let res = self.conn.borrow_mut().read_doc();
                match res {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        self.terminate(err.clone());
                        return Err(err);
                    }
                }
            }
            None => {
                return Err(Error::FrameShape(
                    "cursor has neither documents nor the stream".to_owned(),
                ))
            }
        };

        let value = decoder::decode_from_slice(&bytes);

        let reached_limit = {
            let mut state = self.state.borrow_mut();
            state.count += 1;
            state.limit > 0 && state.count >= state.limit
        };
        if reached_limit {
            self.terminate(Error::CursorExhausted);
        }

        value
    }

    /// Ends the cursor: kills the server-side cursor if one is open, drains
    /// any of its bytes still on the socket, and latches
    /// [`Error::CursorClosed`]. Closing does not close the connection.
    pub fn close(&mut self) {
        if self.state.borrow().err.is_some() {
            return;
        }
        self.release();
        self.state.borrow_mut().err = Some(Error::CursorClosed);
    }
}

impl<S: Read + Write> Drop for Cursor<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod test {
    use super::CursorState;

    fn state(limit: i32, batch_size: i32, count: i32) -> CursorState {
        CursorState {
            namespace: "db.test".to_owned(),
            request_id: 0,
            cursor_id: 0,
            limit,
            batch_size,
            count,
            docs: Default::default(),
            flags: 0,
            err: None,
        }
    }

    #[test]
    fn no_limit_no_batch() {
        assert_eq!(state(0, 0, 0).number_to_return(), 0);
    }

    #[test]
    fn limit_only_emits_remaining() {
        assert_eq!(state(10, 0, 0).number_to_return(), 10);
        assert_eq!(state(10, 0, 4).number_to_return(), 6);
    }

    #[test]
    fn batch_only_emits_batch() {
        assert_eq!(state(0, 3, 5).number_to_return(), 3);
    }

    #[test]
    fn remaining_caps_batch() {
        assert_eq!(state(10, 8, 4).number_to_return(), 6);
        assert_eq!(state(10, 3, 4).number_to_return(), 3);
    }

    #[test]
    fn negative_batch_stays_negative() {
        assert_eq!(state(0, -5, 0).number_to_return(), -5);
        assert_eq!(state(3, -5, 0).number_to_return(), -3);
    }

    #[test]
    fn one_becomes_minus_one() {
        // a remaining count of 1 would otherwise read as a hard limit
        assert_eq!(state(5, 3, 4).number_to_return(), -1);
        assert_eq!(state(0, -1, 0).number_to_return(), -1);
    }
}
