//! # Knowledge Engine Core
//!
//! Runtime-agnostic logic for the Knowledge Engine: data models, the error
//! taxonomy, paragraph chunking, the store abstraction, relevance scorers,
//! and the ranking algorithm.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies. Timeouts, cancellation tokens, and per-document
//! ingestion locks live in the `knowledge-engine` application crate.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Knowledge bases, documents, chunks, queries, scored results |
//! | [`error`] | [`EngineError`](error::EngineError) and its [`ErrorKind`](error::ErrorKind) |
//! | [`chunk`] | Paragraph-aligned chunker |
//! | [`store`] | [`Store`](store::Store) trait and [`InMemoryStore`](store::memory::InMemoryStore) |
//! | [`embedding`] | [`Embedder`](embedding::Embedder) trait and vector helpers |
//! | [`scorer`] | [`Scorer`](scorer::Scorer) capability and its implementations |
//! | [`search`] | Snapshot ranking: filter, score, sort, truncate |

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod models;
pub mod scorer;
pub mod search;
pub mod store;

pub use error::{EngineError, ErrorKind, Result};
