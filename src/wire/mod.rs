//! The wire connection and cursor engine.
//!
//! A [`Connection`] wraps one stream socket and speaks the pre-3.6 MongoDB
//! wire protocol over it: opcoded request frames out, OP_REPLY frames back
//! in, each reply dispatched to the [`Cursor`] whose request it answers. The
//! model is single-threaded and blocking; a connection and the cursors
//! derived from it belong to one thread of control, and there is no
//! multiplexing beyond the bookkeeping exhaust cursors require.

pub(crate) mod conn;
pub(crate) mod cursor;
pub mod message;

pub use self::conn::Connection;
pub use self::cursor::Cursor;

use crate::document::Document;

/// Options for [`Connection::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Insert the update document when no document matches the selector.
    pub upsert: bool,

    /// Update every document matching the selector instead of the first.
    pub multi: bool,
}

/// Options for [`Connection::remove`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Remove only the first matching document instead of all of them.
    pub single: bool,
}

/// Options for [`Connection::find`].
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Limits the fields in the returned documents. Each entry names a field
    /// to return, with the integer value 1.
    pub fields: Option<Document>,

    /// Do not close the cursor when no more data is available on the server.
    pub tailable: bool,

    /// Allow querying a replica slave.
    pub slave_ok: bool,

    /// Do not close the cursor on the server after its idle period.
    pub no_cursor_timeout: bool,

    /// Block at the server for a short time if a tailable cursor has no
    /// data.
    pub await_data: bool,

    /// Stream result batches down without waiting for get-more requests.
    pub exhaust: bool,

    /// Allow partial results when a shard is unavailable.
    pub partial_results: bool,

    /// Number of documents the server skips at the start of the result set.
    pub skip: i32,

    /// Number of documents to return; zero means no limit.
    pub limit: i32,

    /// Batch size used for sending documents from the server to the client.
    /// A negative value asks the server for a single final batch of that
    /// many documents.
    pub batch_size: i32,
}
