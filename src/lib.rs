//! stacks: hybrid dense + BM25 retrieval over workspace chunk stores
//!
//! The chunk store (SQLite) is the source of truth. The dense index (Qdrant)
//! and the BM25 snapshot are derived from it by the [`index::IndexSynchronizer`]
//! and queried through the [`retrieve::Retriever`]. Long-running work runs as
//! persisted tasks on the [`tasks::Scheduler`]; scope-wide questions are
//! answered by the map-reduce [`coverage::CoverageEngine`].

pub mod commands;
pub mod config;
pub mod coverage;
pub mod embed;
pub mod embedding_backend;
pub mod engine;
pub mod error;
pub mod index;
pub mod meta;
pub mod progress;
pub mod rank;
pub mod retrieve;
pub mod sparse;
pub mod store;
pub mod tasks;
