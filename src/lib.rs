//! Filterjoin - Cross-index filter joins for Elasticsearch-compatible backends
//!
//! This crate coordinates "filter join" queries: a query document may
//! restrict a field to the values of another field found by a lookup
//! query against a different index. Before the main query runs, every
//! join clause is discovered, its lookup executed (with process-wide
//! caching), and the clause rewritten in place into a plain `terms`
//! filter the backend understands. Per-join execution metadata is
//! attached to the final response.

pub mod cache;
pub mod config;
pub mod coordinate;
pub mod errors;
pub mod query_tree;
pub mod search;
pub mod server;
