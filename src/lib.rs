//! A minimal driver for MongoDB speaking the classic wire protocol, with
//! its own BSON codec.
//!
//! The crate has two load-bearing halves. The BSON codec maps between Rust
//! values and the binary document format: an ordered [`Document`] tree with
//! the [`doc!`] macro for literals, and a serde bridge
//! ([`encoder::to_document`], [`decoder::from_document`]) so record types
//! move in and out of documents through their derived `Serialize` /
//! `Deserialize` implementations. The wire half is a blocking,
//! single-request-at-a-time [`Connection`] over one TCP socket, with a
//! [`Cursor`] streaming query results in lazy batches, including tailable
//! and exhaust cursors.
//!
//! The [`Database`], [`Collection`] and [`Query`] types are thin
//! composition over those two halves: namespaces, command execution, the
//! getLastError round trip and the `$query` modifier wrapper.
//!
//! ```no_run
//! use mongowire::{doc, Collection, Connection};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct Event {
//!     name: String,
//!     count: i32,
//! }
//!
//! # fn run() -> mongowire::Result<()> {
//! let conn = Connection::dial("127.0.0.1")?;
//! let events = Collection::safe(conn, "app.events");
//!
//! events.insert(&Event { name: "boot".into(), count: 1 })?;
//!
//! let mut cursor = events.find(&doc! { "name" => "boot" })?.cursor()?;
//! while cursor.has_next() {
//!     let event: Event = cursor.next()?;
//!     println!("{} x{}", event.name, event.count);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Record fields map to element names through the usual serde attributes:
//! `rename` picks the encoded name, and
//! `skip_serializing_if = "serde_helpers::is_default"` (with `default`)
//! omits a field whose value carries no information, which is how the query
//! modifiers and index options in this crate are declared.
//!
//! A connection and every cursor derived from it form one affinity group:
//! use them from a single thread of control. Socket failures latch the
//! connection permanently; server-side cursor failures latch only the
//! cursor they belong to.

#[macro_use]
mod macros;

pub mod bson;
pub mod buffer;
pub mod collection;
pub mod database;
pub mod decoder;
pub mod document;
pub mod encoder;
pub mod error;
pub mod oid;
pub mod query;
pub mod raw;
pub mod serde_helpers;
pub mod spec;
pub mod wire;

pub use crate::bson::{
    Array, Bson, Code, CodeWithScope, MinMax, Regexp, Symbol, Timestamp, UtcDateTime,
};
pub use crate::buffer::Buffer;
pub use crate::collection::{
    command_namespace, index_name, split_namespace, Collection, FindAndModifyOptions,
    IndexOptions,
};
pub use crate::database::{default_last_error_cmd, CommandResponse, Database, DbRef};
pub use crate::decoder::{
    decode_document, decode_document_from_slice, decode_from_slice, from_bson, from_document,
};
pub use crate::document::Document;
pub use crate::encoder::{encode, encode_document, encode_to_vec, to_bson, to_document};
pub use crate::error::{Error, Result};
pub use crate::oid::ObjectId;
pub use crate::query::{Query, QuerySpec};
pub use crate::raw::RawBson;
pub use crate::spec::ElementType;
pub use crate::wire::{Connection, Cursor, FindOptions, RemoveOptions, UpdateOptions};
