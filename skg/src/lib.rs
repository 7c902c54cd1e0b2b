//! `skg`: an embedded, sharded property-graph storage engine for
//! heterogeneous graphs.
//!
//! This crate is the facade: it composes the vertex-id encoder, schema
//! registry, vertex attribute store, shard tree and query engine from
//! `skg-storage`, and the BFS traversal layer from `skg-traverse`, into one
//! `Database` handle with CRUD, schema, bulk-import, neighborhood-query and
//! path-query operations. Callers never touch the storage crates directly.

mod database;

pub use database::{BulkEdgeInput, Database, EdgeView, PathEnvelope, VertexEnvelope};
pub use skg_storage::SkgOptions;
pub use skg_traverse::{Budget, Direction, EnvelopeCode};
pub use skg_types::{ColumnDescriptor, ColumnType, Error, PropertyValue, Result, Tag, Vid};
