//! Crmock – an offline, deterministic record engine for a mock CRM.
//!
//! Every business object, standard or custom, is a *record*: an integer id,
//! a bag of string-valued properties and a lifecycle. Records are typed by an
//! *object type*, their properties are declared in a per-type catalog and any
//! two records can be joined by labeled, directional *associations*.
//! * An [`registry::ObjectType`] is a standard (`0-1`, `contacts`) or custom
//!   (`2-N`, registered through a schema) kind of record.
//! * A [`property::PropertyDefinition`] declares a property's type and
//!   validation rules; values are normalized against it on every write.
//! * A [`record::Record`] is one entity, stored attribute-value style.
//! * An [`association::AssociationTypeDef`] names a directed relationship
//!   between two object types, optionally carrying a label.
//!
//! Object types are owned by a "keeper" (see [`registry::TypeKeeper`]) that
//! resolves names and ids both ways, restored from storage on startup.
//!
//! ## Modules
//! * [`registry`] – Type Registry: resolution and custom schemas.
//! * [`property`] – Property Catalog: definitions, groups and value validation.
//! * [`record`] – Record Store: CRUD, batches, upsert and merge.
//! * [`association`] – Association Graph: edges and the label catalog.
//! * [`search`] – Search Compiler: filter groups, query, sort and paging to SQL.
//! * [`persist`] – SQLite schema and the single serialized connection.
//! * [`interface`] – Async facade running core calls on tokio's blocking pool.
//!
//! ## Persistence
//! The [`persist::Persistor`] owns the SQLite connection and creates the
//! schema. The [`database::Database`] wires a persistor together with the type
//! keeper and a [`clock::Clock`], seeds the standard types and restores prior
//! state on startup. Every write runs in one transaction; batch items run in
//! their own savepoints.
//!
//! ## Quick Start
//! ```
//! use crmock::database::Database;
//! use crmock::persist::PersistenceMode;
//! use crmock::record::RecordInput;
//! use crmock::search::{Filter, SearchRequest};
//!
//! let db = Database::new(PersistenceMode::InMemory).unwrap();
//! db.records()
//!     .create("contacts", RecordInput::new([("email", "b@x.com")]))
//!     .unwrap();
//! let request = SearchRequest::new()
//!     .filter_group(vec![Filter::new("email", "EQ").with_value("b@x.com")]);
//! let found = db.search().execute("contacts", &request).unwrap();
//! assert_eq!(found.total, 1);
//! ```

pub mod association;
pub mod batch;
pub mod clock;
pub mod config;
pub mod database;
pub mod datatype;
pub mod error;
pub mod filter;
pub mod interface;
pub mod page;
pub mod persist;
pub mod property;
pub mod record;
pub mod registry;
pub mod search;
pub mod seed;
