//! Relstore – a transactional data-access layer over a relational store.
//!
//! Relstore turns a generic data-store transaction (create, read, update and
//! delete of entities, relation traversal, filtering, sorting and pagination)
//! into SQL run against SQLite:
//! * An [`entity::Entity`] is a dynamic record of a declared type, shared through [`entity::EntityRef`] handles.
//! * A [`dictionary::EntityDictionary`] describes entity types, their attributes and relations.
//! * A [`filter::FilterExpression`] is a tree of predicates over [`path::Path`]s.
//! * A [`session::Session`] executes plans and applies writes.
//! * A [`transaction::Transaction`] reads through the session and buffers writes until flushed.
//!
//! ## Modules
//! * [`value`] and [`entity`] – Typed values and the entity records that hold them.
//! * [`dictionary`] – Entity metadata, buildable in code or loadable from a JSON model.
//! * [`filter`], [`path`], [`sort`], [`pagination`] – What a read asks for.
//! * [`query`] – Builds a [`query::QueryPlan`] for a root collection or the members of a relation.
//! * [`results`] – Runs a plan as a single result, a result set, or a count.
//! * [`buffer`] – Pending writes and the transaction state machine.
//! * [`persist`] – SQLite schema creation and the [`persist::SqliteSession`].
//! * [`settings`] – Layered configuration for the `relstore` binary.
//!
//! ## Persistence
//! Every entity type gets a table, every to-one relation a foreign key column,
//! and every owning many-to-many relation a join table. A
//! [`persist::SqliteSession`] keeps an SQLite transaction open; in automatic
//! flush mode each flush of a [`transaction::Transaction`] commits it.
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use rusqlite::Connection;
//! use relstore::dictionary::{Dictionary, EntityBinding};
//! use relstore::entity::{Entity, EntityRef};
//! use relstore::persist::{create_schema, SqliteSession};
//! use relstore::session::FlushMode;
//! use relstore::transaction::Transaction;
//! use relstore::value::{Value, ValueType};
//!
//! let dictionary = Arc::new(
//!     Dictionary::new(vec![EntityBinding::new("book").attribute("title", ValueType::Text)]).unwrap(),
//! );
//! let conn = Connection::open_in_memory().unwrap();
//! create_schema(&conn, dictionary.as_ref()).unwrap();
//! let mut session = SqliteSession::begin(&conn, dictionary.clone(), FlushMode::Auto).unwrap();
//! let mut tx = Transaction::new(&mut session, dictionary);
//! let book = EntityRef::new(Entity::new("book").with("title", "Dune"));
//! tx.create_object(&book).unwrap();
//! tx.commit().unwrap();
//! let id = book.id().unwrap();
//! assert_eq!(id, Value::Integer(1));
//! assert!(tx.load_object("book", Some(id), None).unwrap().is_some());
//! ```

pub mod buffer;
pub mod dictionary;
pub mod entity;
pub mod error;
pub mod filter;
pub mod pagination;
pub mod path;
pub mod persist;
pub mod query;
pub mod relationship;
pub mod results;
pub mod session;
pub mod settings;
pub mod sort;
pub mod transaction;
pub mod value;

pub use error::{Error, Result};
