//! Storage layer: DDL derivation and SQLite-backed repositories.
//!
//! Layout:
//! - `ddl.rs`: table layouts derived from entity type declarations
//! - `collection.rs`: the backend boundary that creates, alters and drops tables
//! - `meta_repos.rs`: bootstrap, upgrade and rows of the metadata tables
//! - `models.rs`: Rust structs mirroring metadata rows
//! - `entity_repo.rs`: row-level access to one concrete entity table

pub mod collection;
pub mod ddl;
pub mod entity_repo;
pub mod meta_repos;
pub mod models;

mod pool;

pub use collection::{RepositoryCollection, SqliteRepositoryCollection};
pub use ddl::{ColumnSpec, JunctionSpec, TableSpec, ValueKind};
pub use entity_repo::{EntityRepository, SqliteRepository};
pub use meta_repos::{MetaDataRepositories, MetadataTables};
pub use pool::connect;
