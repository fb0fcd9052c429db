//! The `Collection` convenience layer.

use std::io::{Read, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::bson::Bson;
use crate::database::{check_command, default_last_error_cmd, Database};
use crate::document::Document;
use crate::encoder;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::raw::RawBson;
use crate::wire::{Connection, FindOptions, RemoveOptions, UpdateOptions};

/// Splits a namespace into its database and collection name components at
/// the first `.`.
pub fn split_namespace(namespace: &str) -> (&str, &str) {
    match namespace.find('.') {
        Some(i) if i > 0 => (&namespace[..i], &namespace[i + 1..]),
        _ => (namespace, ""),
    }
}

/// The command pseudo-collection namespace for `namespace`'s database.
pub fn command_namespace(namespace: &str) -> String {
    let (db, _) = split_namespace(namespace);
    format!("{}.$cmd", db)
}

/// The standard name for an index on `keys`: names and directions joined
/// with underscores, e.g. `up_1_down_-1_geo_2d`.
pub fn index_name(keys: &Document) -> Result<String> {
    let mut name = String::new();
    for (i, (key, value)) in keys.iter().enumerate() {
        if i != 0 {
            name.push('_');
        }
        name.push_str(key);
        name.push('_');
        match value {
            Bson::I32(v) => name.push_str(&v.to_string()),
            Bson::I64(v) => name.push_str(&v.to_string()),
            Bson::String(s) => name.push_str(s),
            _ => {
                return Err(Error::Message(
                    "index direction must be an integer or string".to_owned(),
                ))
            }
        }
    }
    Ok(name)
}

/// Options for [`Collection::create_index`].
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    /// Custom name for the index. Generated from the keys when empty.
    pub name: String,

    /// Should this index guarantee uniqueness?
    pub unique: bool,

    /// Should duplicates be dropped when creating a unique index?
    pub drop_dups: bool,
}

/// Options for [`Collection::find_and_update`] and
/// [`Collection::find_and_remove`].
#[derive(Debug, Clone, Default)]
pub struct FindAndModifyOptions {
    /// Return the modified document rather than the original. Ignored for
    /// remove.
    pub new: bool,

    /// Subset of fields to return.
    pub fields: Option<Document>,

    /// Create the document if it doesn't exist. Ignored for remove.
    pub upsert: bool,

    /// When multiple documents match, modify the first one in this sort
    /// order.
    pub sort: Option<Document>,
}

/// A MongoDB collection.
///
/// When `last_error_cmd` is set, every mutation is followed by that
/// command against the database (the getLastError round trip), turning
/// silent write failures into reported errors.
pub struct Collection<S: Read + Write = TcpStream> {
    pub conn: Connection<S>,

    /// `"<database>.<collection>"`.
    pub namespace: String,

    /// Command used to check for errors after a mutation. `None` means
    /// mutations are not checked.
    pub last_error_cmd: Option<Document>,
}

impl<S: Read + Write> Collection<S> {
    /// An unchecked collection handle: mutations are fire-and-forget.
    pub fn new(conn: Connection<S>, namespace: impl Into<String>) -> Collection<S> {
        Collection {
            conn,
            namespace: namespace.into(),
            last_error_cmd: None,
        }
    }

    /// A safe collection handle: every mutation is followed by
    /// `{"getLastError": 1}`.
    pub fn safe(conn: Connection<S>, namespace: impl Into<String>) -> Collection<S> {
        Collection {
            conn,
            namespace: namespace.into(),
            last_error_cmd: Some(default_last_error_cmd()),
        }
    }

    /// The collection's name, without the database component.
    pub fn name(&self) -> &str {
        split_namespace(&self.namespace).1
    }

    /// The database this collection belongs to.
    pub fn db(&self) -> Database<S> {
        let (db, _) = split_namespace(&self.namespace);
        Database {
            conn: self.conn.clone(),
            name: db.to_owned(),
            last_error_cmd: self.last_error_cmd.clone(),
        }
    }

    fn check_error(&self, result: Result<()>) -> Result<()> {
        result?;
        match &self.last_error_cmd {
            Some(cmd) => self.db().last_error(Some(cmd)),
            None => Ok(()),
        }
    }

    /// Adds a document to the collection.
    pub fn insert<T: Serialize>(&self, document: &T) -> Result<()> {
        self.check_error(
            self.conn
                .insert(&self.namespace, std::slice::from_ref(document)),
        )
    }

    /// Adds several documents in one message.
    pub fn insert_all<T: Serialize>(&self, documents: &[T]) -> Result<()> {
        self.check_error(self.conn.insert(&self.namespace, documents))
    }

    /// Updates the first document found by `selector` with `update`.
    pub fn update<Sel, U>(&self, selector: &Sel, update: &U) -> Result<()>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
    {
        self.check_error(self.conn.update(&self.namespace, selector, update, None))
    }

    /// Updates the first document found by `selector`, inserting the update
    /// when nothing matches.
    pub fn upsert<Sel, U>(&self, selector: &Sel, update: &U) -> Result<()>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
    {
        let options = UpdateOptions {
            upsert: true,
            multi: false,
        };
        self.check_error(
            self.conn
                .update(&self.namespace, selector, update, Some(&options)),
        )
    }

    /// Updates every document matching `selector`.
    pub fn update_all<Sel, U>(&self, selector: &Sel, update: &U) -> Result<()>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
    {
        let options = UpdateOptions {
            upsert: false,
            multi: true,
        };
        self.check_error(
            self.conn
                .update(&self.namespace, selector, update, Some(&options)),
        )
    }

    /// Removes every document found by `selector`.
    pub fn remove<Sel: Serialize + ?Sized>(&self, selector: &Sel) -> Result<()> {
        self.check_error(self.conn.remove(&self.namespace, selector, None))
    }

    /// Removes the first document found by `selector`.
    pub fn remove_first<Sel: Serialize + ?Sized>(&self, selector: &Sel) -> Result<()> {
        let options = RemoveOptions { single: true };
        self.check_error(self.conn.remove(&self.namespace, selector, Some(&options)))
    }

    /// A query builder over this collection for the given filter.
    pub fn find<Q: Serialize + ?Sized>(&self, filter: &Q) -> Result<Query<S>> {
        let filter = encoder::to_document(filter)?;
        Ok(Query::new(
            self.conn.clone(),
            self.namespace.clone(),
            filter,
        ))
    }

    /// Creates an index on `keys` by inserting into `system.indexes`. The
    /// write is always checked with getLastError.
    pub fn create_index(&self, keys: &Document, options: Option<&IndexOptions>) -> Result<()> {
        let mut index = Document::new();
        index.insert("key", keys.clone());
        index.insert("ns", self.namespace.as_str());

        let mut name = options.map(|o| o.name.clone()).unwrap_or_default();
        if name.is_empty() {
            name = index_name(keys)?;
        }
        index.insert("name", name);
        if let Some(options) = options {
            if options.unique {
                index.insert("unique", true);
            }
            if options.drop_dups {
                index.insert("dropDups", true);
            }
        }

        let (db, _) = split_namespace(&self.namespace);
        let mut system_indexes =
            Collection::new(self.conn.clone(), format!("{}.system.indexes", db));
        system_indexes.last_error_cmd = self
            .last_error_cmd
            .clone()
            .or_else(|| Some(default_last_error_cmd()));
        system_indexes.insert(&index)
    }

    /// Updates and returns a document in one server round trip, via the
    /// findAndModify command. Returns `None` when nothing matched.
    pub fn find_and_update<Sel, U, T>(
        &self,
        selector: &Sel,
        update: &U,
        options: Option<&FindAndModifyOptions>,
    ) -> Result<Option<T>>
    where
        Sel: Serialize + ?Sized,
        U: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (_, name) = split_namespace(&self.namespace);
        let mut cmd = Document::new();
        cmd.insert("findAndModify", name);
        cmd.insert("query", encoder::to_document(selector)?);
        cmd.insert("update", encoder::to_document(update)?);
        append_find_and_modify_options(&mut cmd, options);
        self.find_and_modify(&cmd)
    }

    /// Removes and returns a document in one server round trip. Returns
    /// `None` when nothing matched.
    pub fn find_and_remove<Sel, T>(
        &self,
        selector: &Sel,
        options: Option<&FindAndModifyOptions>,
    ) -> Result<Option<T>>
    where
        Sel: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let (_, name) = split_namespace(&self.namespace);
        let mut cmd = Document::new();
        cmd.insert("findAndModify", name);
        cmd.insert("query", encoder::to_document(selector)?);
        cmd.insert("remove", true);
        append_find_and_modify_options(&mut cmd, options);
        self.find_and_modify(&cmd)
    }

    fn find_and_modify<T: DeserializeOwned>(&self, cmd: &Document) -> Result<Option<T>> {
        #[derive(Debug, Default, serde::Deserialize)]
        #[serde(default)]
        struct Reply {
            ok: bool,
            errmsg: String,
            value: Option<RawBson>,
        }

        let namespace = command_namespace(&self.namespace);
        let options = FindOptions {
            batch_size: -1,
            ..Default::default()
        };
        let mut cursor = self.conn.find(&namespace, cmd, Some(&options))?;
        let reply: Reply = cursor.next()?;
        check_command(reply.ok, &reply.errmsg)?;
        match reply.value {
            Some(raw) => Ok(Some(raw.decode()?)),
            None => Ok(None),
        }
    }
}

impl<S: Read + Write> Clone for Collection<S> {
    fn clone(&self) -> Collection<S> {
        Collection {
            conn: self.conn.clone(),
            namespace: self.namespace.clone(),
            last_error_cmd: self.last_error_cmd.clone(),
        }
    }
}

fn append_find_and_modify_options(cmd: &mut Document, options: Option<&FindAndModifyOptions>) {
    if let Some(options) = options {
        if options.new {
            cmd.insert("new", true);
        }
        if let Some(fields) = &options.fields {
            cmd.insert("fields", fields.clone());
        }
        if options.upsert {
            cmd.insert("upsert", true);
        }
        if let Some(sort) = &options.sort {
            cmd.insert("sort", sort.clone());
        }
    }
}
