//! The `Database` convenience layer: command execution and last-error
//! checking.

use std::io::{Read, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::collection::Collection;
use crate::document::Document;
use crate::error::{Error, Result};
use crate::oid::ObjectId;
use crate::raw::RawBson;
use crate::wire::{Connection, FindOptions};

/// The command document used when no custom last-error command is set:
/// `{"getLastError": 1}`.
pub fn default_last_error_cmd() -> Document {
    doc! { "getLastError" => 1 }
}

// Commands run as a find on the $cmd pseudo-collection asking for one
// document in a single final batch.
fn command_find_options() -> FindOptions {
    FindOptions {
        batch_size: -1,
        ..Default::default()
    }
}

pub(crate) fn check_command(ok: bool, errmsg: &str) -> Result<()> {
    if ok {
        return Ok(());
    }
    let message = if errmsg.is_empty() {
        "unspecified error"
    } else {
        errmsg
    };
    Err(Error::CommandFailed(message.to_owned()))
}

/// The fields common to every command reply.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommandResponse {
    pub ok: bool,
    pub errmsg: String,
}

impl CommandResponse {
    /// The server-reported failure, if the command did not succeed.
    pub fn check(&self) -> Result<()> {
        check_command(self.ok, &self.errmsg)
    }
}

/// A reference to a document in another collection, and possibly another
/// database, in the conventional `$ref`/`$id`/`$db` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRef {
    /// The target document's id.
    #[serde(rename = "$id")]
    pub id: ObjectId,

    /// The target document's collection.
    #[serde(rename = "$ref")]
    pub collection: String,

    /// The target document's database, when it differs from the referring
    /// one.
    #[serde(rename = "$db", skip_serializing_if = "Option::is_none", default)]
    pub database: Option<String>,
}

/// A MongoDB database.
pub struct Database<S: Read + Write = TcpStream> {
    pub conn: Connection<S>,
    pub name: String,

    /// Command used by collections derived from this handle to check for
    /// errors after a mutation.
    pub last_error_cmd: Option<Document>,
}

impl<S: Read + Write> Database<S> {
    pub fn new(conn: Connection<S>, name: impl Into<String>) -> Database<S> {
        Database {
            conn,
            name: name.into(),
            last_error_cmd: None,
        }
    }

    /// The collection with `name`. A lightweight operation; nothing checks
    /// that the collection exists.
    pub fn collection(&self, name: &str) -> Collection<S> {
        Collection {
            conn: self.conn.clone(),
            namespace: format!("{}.{}", self.name, name),
            last_error_cmd: self.last_error_cmd.clone(),
        }
    }

    /// Runs the command `cmd` and returns the full reply document after
    /// checking its `ok` field.
    pub fn run<C: Serialize + ?Sized>(&self, cmd: &C) -> Result<Document> {
        let raw = self.run_raw(cmd)?;
        raw.to_document()
    }

    /// Runs the command `cmd` and decodes the reply into `T`.
    pub fn run_as<C: Serialize + ?Sized, T: DeserializeOwned>(&self, cmd: &C) -> Result<T> {
        let raw = self.run_raw(cmd)?;
        raw.decode()
    }

    fn run_raw<C: Serialize + ?Sized>(&self, cmd: &C) -> Result<RawBson> {
        let namespace = format!("{}.$cmd", self.name);
        let mut cursor = self
            .conn
            .find(&namespace, cmd, Some(&command_find_options()))?;
        let raw: RawBson = cursor.next()?;
        let response: CommandResponse = raw.decode()?;
        response.check()?;
        Ok(raw)
    }

    /// Issues the last-error command and reports the write error it
    /// carries, if any. `None` uses `{"getLastError": 1}`.
    pub fn last_error(&self, cmd: Option<&Document>) -> Result<()> {
        #[derive(Debug, Default, Deserialize)]
        #[serde(default)]
        struct LastErrorReply {
            ok: bool,
            errmsg: String,
            err: String,
            n: i64,
            code: i32,
        }

        let default_cmd;
        let cmd = match cmd {
            Some(cmd) => cmd,
            None => {
                default_cmd = default_last_error_cmd();
                &default_cmd
            }
        };
        let namespace = format!("{}.$cmd", self.name);
        let mut cursor = self
            .conn
            .find(&namespace, cmd, Some(&command_find_options()))?;
        let reply: LastErrorReply = cursor.next()?;
        check_command(reply.ok, &reply.errmsg)?;
        if !reply.err.is_empty() {
            return Err(Error::WriteError {
                message: reply.err,
                code: reply.code,
                n: reply.n,
            });
        }
        Ok(())
    }

    /// Fetches the document a [`DbRef`] points at.
    pub fn dereference<T: DeserializeOwned>(&self, reference: &DbRef, slave_ok: bool) -> Result<T> {
        let mut db = self.clone();
        if let Some(database) = &reference.database {
            db.name = database.clone();
        }
        db.collection(&reference.collection)
            .find(&doc! { "_id" => (reference.id) })?
            .slave_ok(slave_ok)
            .one()
    }
}

impl<S: Read + Write> Clone for Database<S> {
    fn clone(&self) -> Database<S> {
        Database {
            conn: self.conn.clone(),
            name: self.name.clone(),
            last_error_cmd: self.last_error_cmd.clone(),
        }
    }
}
