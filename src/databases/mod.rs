//! Backend adapters.
//!
//! Each heavy engine sits behind a cargo feature; the file, memory, and
//! graph-client adapters are always available.

pub mod file;
pub mod graph;
pub mod memory;

#[cfg(feature = "columnar")]
pub mod columnar;
#[cfg(feature = "document")]
pub mod document;
#[cfg(feature = "relational")]
pub mod relational;

pub use file::FileStore;
pub use graph::{GraphClient, GraphClientStore};
pub use memory::MemoryStore;

#[cfg(feature = "columnar")]
pub use columnar::ColumnarStore;
#[cfg(feature = "document")]
pub use document::{Document, DocumentStore};
#[cfg(feature = "relational")]
pub use relational::RelationalStore;
