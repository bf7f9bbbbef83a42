//! Data layer module
//!
//! Handles all data persistence and caching:
//! - SQLite schema, column mappings and migrations
//! - Normalizing writes through a single serialized writer
//! - Decoded content cache (volatile)

mod cache;
mod database;
mod ingest;
mod models;
pub(crate) mod records;
pub(crate) mod schema;
mod writer;

pub use cache::ContentCache;
pub use database::{Database, ReadContext};
pub use ingest::PruneReport;
pub use models::*;
pub(crate) use records::{
    decode_account, decode_filter, decode_stored_status, decode_timeline, has_joined_row,
};
pub use schema::{Table, TableSet};

#[cfg(test)]
pub(crate) mod fixtures;
