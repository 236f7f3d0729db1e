//!
//! # Polystore
//!
//! A pluggable storage abstraction layer that presents uniform key-value,
//! graph, and analytic surfaces over several concrete backends: an
//! embedded columnar SQL engine, a partitioned document store, a native
//! graph engine reached through a client trait, and a relational engine
//! with vector search.
//!
//! ## Core Concepts
//!
//! ### Capability traits
//!
//! Backends do not share an inheritance tree. Each implements the slice
//! of capability traits it supports:
//! [`Storage`](traits::Storage) and [`BatchStorage`](traits::BatchStorage)
//! for key-value access, [`SaveableStorage`](traits::SaveableStorage) for
//! manual-save backends, [`GraphStorage`](traits::GraphStorage) for
//! node/edge/traversal work, [`SemanticStorage`](traits::SemanticStorage)
//! for declarative OLAP queries, and [`VectorStorage`](traits::VectorStorage)
//! for similarity search. Unsupported semantic operations answer
//! `NotImplemented` at runtime instead of failing at compile time.
//!
//! ### Safe statement construction
//!
//! No user-supplied string is ever concatenated into SQL or graph
//! statements. Identifiers pass [`sql::ident::validate`]; integer bounds
//! are validated before they are embedded; everything else binds as a
//! parameter. The [`sql`] module builds SQL, [`cypher`] builds graph
//! statements, and [`traversal`] builds the recursive set queries behind
//! graph traversal on the relational backend.
//!
//! ### Shared adapter core
//!
//! [`base::AdapterCore`] carries the concerns every adapter shares: the
//! in-memory cache, the exclusive load gate, the persist gate, nested
//! logical transactions with snapshot rollback, and operation timing.
//! Process-wide state lives in [`connection`]: one shared engine handle
//! per database address and the table-creation mutex that serializes
//! schema DDL across instances.
//!
//! ## Quick Start
//!
//! ```
//! use polystore::prelude::*;
//! use serde_json::json;
//!
//! let store: MemoryStore = MemoryStore::default();
//! store.set("greeting", json!({"text": "hello"}))?;
//! assert!(store.has("greeting")?);
//! # polystore::error::StorageResult::Ok(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Capability traits                │
//! │  Storage · Batch · Graph · Semantic · Vector│
//! └──────┬──────────┬──────────┬──────────┬─────┘
//!        │          │          │          │
//!   ┌────▼───┐ ┌────▼────┐ ┌───▼────┐ ┌───▼────────┐
//!   │ Memory │ │  File   │ │Document│ │ Columnar / │
//!   │        │ │ (JSON)  │ │ (sled) │ │ Relational │
//!   └────────┘ └─────────┘ └────────┘ └───┬────────┘
//!                                         │
//!                        ┌────────────────▼───────────────┐
//!                        │ sql · cypher · traversal       │
//!                        │ (validated, parameterized)     │
//!                        └────────────────────────────────┘
//! ```

pub mod base;
pub mod config;
pub mod connection;
pub mod cypher;
pub mod databases;
pub mod error;
pub mod partition;
pub mod prelude;
pub mod sql;
pub mod traits;
pub mod traversal;
pub mod value;

pub use error::{ErrorKind, StorageError, StorageResult};
