//! # Knowledge Engine
//!
//! Knowledge-base ingestion and ranked retrieval for AI workflows.
//!
//! Documents are split into paragraph-aligned chunks, stored atomically, and
//! retrieved by scoring every chunk of a knowledge base against a query with
//! a pluggable scorer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────┐
//! │ ingest / │──▶│ Chunker +     │──▶│  Store   │
//! │ reingest │   │ inline embed  │   │ (SQLite) │
//! └──────────┘   └───────────────┘   └────┬─────┘
//!                                         │ snapshot
//!                ┌──────────┐        ┌────▼─────┐
//!   retrieve ───▶│  Scorer  │◀───────│  Ranker  │
//!                └──────────┘        └──────────┘
//! ```
//!
//! The storage-agnostic pieces (chunker, scorers, ranker, in-memory store)
//! live in [`knowledge_engine_core`]. This crate adds SQLite persistence,
//! configuration, the OpenAI embedding client, per-document locking, time
//! limits, cancellation, and the `kbe` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite [`Store`](knowledge_engine_core::store::Store) |
//! | [`embedding`] | OpenAI embedding client |
//! | [`scoring`] | Scorer selection and per-call timeouts |
//! | [`ingest`] | Validation, chunk preparation, document locks |
//! | [`engine`] | The [`KnowledgeEngine`](engine::KnowledgeEngine) facade |
//! | [`commands`] | CLI command handlers |

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod migrate;
pub mod scoring;
pub mod sqlite_store;

pub use knowledge_engine_core::{EngineError, ErrorKind};
