//! The query builder.

use std::io::{Read, Write};
use std::net::TcpStream;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::bson::Bson;
use crate::collection::split_namespace;
use crate::database::check_command;
use crate::decoder;
use crate::document::Document;
use crate::error::Result;
use crate::serde_helpers;
use crate::wire::{Connection, Cursor, FindOptions};

/// The `$query` wrapper the server understands for queries carrying
/// modifiers alongside the filter.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QuerySpec {
    /// The filter.
    #[serde(rename = "$query")]
    pub query: Document,

    /// Sort order as (key, direction) pairs; 1 ascending, -1 descending.
    #[serde(rename = "$orderby", skip_serializing_if = "Option::is_none")]
    pub sort: Option<Document>,

    /// Return the server's explain plan instead of the results.
    #[serde(rename = "$explain", skip_serializing_if = "serde_helpers::is_default")]
    pub explain: bool,

    /// Index hint as (key, direction) pairs.
    #[serde(rename = "$hint", skip_serializing_if = "Option::is_none")]
    pub hint: Option<Document>,

    /// Snapshot mode: documents updated during the query's lifetime are
    /// returned once and only once.
    #[serde(rename = "$snapshot", skip_serializing_if = "serde_helpers::is_default")]
    pub snapshot: bool,

    /// Constrain matches to index keys >= this value.
    #[serde(rename = "$min", skip_serializing_if = "Option::is_none")]
    pub min: Option<Document>,

    /// Constrain matches to index keys < this value.
    #[serde(rename = "$max", skip_serializing_if = "Option::is_none")]
    pub max: Option<Document>,
}

impl QuerySpec {
    fn is_bare_filter(&self) -> bool {
        self.sort.is_none()
            && !self.explain
            && self.hint.is_none()
            && !self.snapshot
            && self.min.is_none()
            && self.max.is_none()
    }
}

/// A query under construction against one collection.
///
/// Built by [`Collection::find`](crate::Collection::find); the setters
/// refine it and the executors ([`cursor`](Query::cursor),
/// [`one`](Query::one), [`all`](Query::all), [`count`](Query::count),
/// [`distinct`](Query::distinct), [`explain`](Query::explain)) run it.
pub struct Query<S: Read + Write = TcpStream> {
    conn: Connection<S>,
    namespace: String,
    pub spec: QuerySpec,
    pub options: FindOptions,
}

impl<S: Read + Write> Query<S> {
    pub(crate) fn new(conn: Connection<S>, namespace: String, filter: Document) -> Query<S> {
        Query {
            conn,
            namespace,
            spec: QuerySpec {
                query: filter,
                ..Default::default()
            },
            options: FindOptions::default(),
        }
    }

    /// Sort order as (key, direction) pairs; 1 ascending, -1 descending.
    pub fn sort(mut self, sort: Document) -> Self {
        self.spec.sort = Some(sort);
        self
    }

    /// Index hint as (key, direction) pairs.
    pub fn hint(mut self, hint: Document) -> Self {
        self.spec.hint = Some(hint);
        self
    }

    /// Number of documents to return.
    pub fn limit(mut self, limit: i32) -> Self {
        self.options.limit = limit;
        self
    }

    /// Number of documents the server skips at the start of the result set.
    pub fn skip(mut self, skip: i32) -> Self {
        self.options.skip = skip;
        self
    }

    /// Batch size used for sending documents from the server.
    pub fn batch_size(mut self, batch_size: i32) -> Self {
        self.options.batch_size = batch_size;
        self
    }

    /// Limits the fields in the returned documents.
    pub fn fields(mut self, fields: Document) -> Self {
        self.options.fields = Some(fields);
        self
    }

    /// Allow routing the query to a replica slave.
    pub fn slave_ok(mut self, slave_ok: bool) -> Self {
        self.options.slave_ok = slave_ok;
        self
    }

    /// Allow partial results when a shard is down.
    pub fn partial_results(mut self, ok: bool) -> Self {
        self.options.partial_results = ok;
        self
    }

    /// Stream batches down without get-more prompts.
    pub fn exhaust(mut self, exhaust: bool) -> Self {
        self.options.exhaust = exhaust;
        self
    }

    /// Keep the cursor open when no more data is available.
    pub fn tailable(mut self, tailable: bool) -> Self {
        self.options.tailable = tailable;
        self
    }

    // Sends the bare filter when no modifier is set, the $query wrapper
    // otherwise.
    fn run(&self, options: &FindOptions) -> Result<Cursor<S>> {
        if self.spec.is_bare_filter() {
            self.conn.find(&self.namespace, &self.spec.query, Some(options))
        } else {
            self.conn.find(&self.namespace, &self.spec, Some(options))
        }
    }

    /// Executes the query and returns a cursor over the results.
    pub fn cursor(self) -> Result<Cursor<S>> {
        self.run(&self.options)
    }

    /// Executes the query and returns the first result.
    pub fn one<T: DeserializeOwned>(mut self) -> Result<T> {
        self.options.limit = 1;
        self.options.batch_size = -1;
        let mut cursor = self.run(&self.options)?;
        cursor.next()
    }

    /// Executes the query and collects every result.
    pub fn all<T: DeserializeOwned>(self) -> Result<Vec<T>> {
        let mut cursor = self.cursor()?;
        let mut results = Vec::new();
        while cursor.has_next() {
            results.push(cursor.next()?);
        }
        Ok(results)
    }

    /// The number of documents matching the query; limit and skip are
    /// honored.
    pub fn count(&self) -> Result<i64> {
        #[derive(Debug, Default, Deserialize)]
        #[serde(default)]
        struct CountReply {
            ok: bool,
            errmsg: String,
            n: i64,
        }

        let (_, name) = split_namespace(&self.namespace);
        let mut cmd = Document::new();
        cmd.insert("count", name);
        cmd.insert("query", self.spec.query.clone());
        if self.options.limit != 0 {
            cmd.insert("limit", self.options.limit);
        }
        if self.options.skip != 0 {
            cmd.insert("skip", self.options.skip);
        }
        let mut cursor = self.run_command(&cmd)?;
        let reply: CountReply = cursor.next()?;
        check_command(reply.ok, &reply.errmsg)?;
        Ok(reply.n)
    }

    /// The distinct values of `key` among the documents matching the query.
    pub fn distinct<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        #[derive(Debug, Default, Deserialize)]
        #[serde(default)]
        struct DistinctReply {
            ok: bool,
            errmsg: String,
            values: Option<Bson>,
        }

        let (_, name) = split_namespace(&self.namespace);
        let mut cmd = Document::new();
        cmd.insert("distinct", name);
        cmd.insert("key", key);
        cmd.insert("query", self.spec.query.clone());
        let mut cursor = self.run_command(&cmd)?;
        let reply: DistinctReply = cursor.next()?;
        check_command(reply.ok, &reply.errmsg)?;
        decoder::from_bson(reply.values.unwrap_or_else(|| Bson::Array(Vec::new())))
    }

    /// The server's explanation of how it would execute the query.
    pub fn explain<T: DeserializeOwned>(&self) -> Result<T> {
        let mut spec = self.spec.clone();
        spec.explain = true;
        let mut options = self.options.clone();
        if options.limit != 0 {
            options.batch_size = -options.limit;
        }
        let mut cursor = self.conn.find(&self.namespace, &spec, Some(&options))?;
        cursor.next()
    }

    // Commands reuse the query's options with the paging fields reset.
    fn run_command(&self, cmd: &Document) -> Result<Cursor<S>> {
        let (db, _) = split_namespace(&self.namespace);
        let options = FindOptions {
            batch_size: -1,
            limit: 0,
            skip: 0,
            fields: None,
            ..self.options.clone()
        };
        self.conn.find(&format!("{}.$cmd", db), cmd, Some(&options))
    }
}

#[cfg(test)]
mod test {
    use super::QuerySpec;

    #[test]
    fn bare_filter_detection() {
        let mut spec = QuerySpec {
            query: doc! { "x" => 1 },
            ..Default::default()
        };
        assert!(spec.is_bare_filter());
        spec.sort = Some(doc! { "x" => 1 });
        assert!(!spec.is_bare_filter());
    }

    #[test]
    fn spec_serializes_only_set_modifiers() {
        let spec = QuerySpec {
            query: doc! { "x" => 1 },
            sort: Some(doc! { "y" => (-1) }),
            ..Default::default()
        };
        let doc = crate::encoder::to_document(&spec).unwrap();
        let keys: Vec<_> = doc.keys().collect();
        assert_eq!(keys, vec!["$query", "$orderby"]);
    }
}
