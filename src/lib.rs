//! Retrieval-and-decay engine for agent memory.
//!
//! mnemo keeps a graph of generalized knowledge ("concepts") linked by typed
//! relations, and answers recall queries by seeding on embedding similarity
//! and spreading activation along those relations. Every concept carries a
//! usage-based `decay_factor`: periodic passes lower it, and being recalled
//! raises it in proportion to how strongly the concept was activated.
//!
//! # Architecture
//!
//! - **Storage**: SQLite (WAL) with FTS5 for keyword fallback and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for cosine similarity
//! - **Embeddings**: pluggable provider (`none`, Ollama, OpenAI-compatible)
//! - **Retrieval**: similarity seeds → bounded spreading activation → decay weighting
//! - **Transport**: MCP over stdio, plus a maintenance CLI
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite database initialization, schema, migrations, and health checks
//! - [`embedding`]: Query embedding providers
//! - [`error`]: Library error type
//! - [`memory`]: Store, spreading activation, decay, and the recall orchestrator

pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod memory;

pub use error::{Error, Result};
pub use memory::activation::{ActivationSource, RankedConcept, SpreadingActivation};
pub use memory::decay::{DecayEngine, DecayPass};
pub use memory::recall::{RecallMode, RecallResult, Recaller};
pub use memory::stats::DecayStats;
pub use memory::store::Store;
pub use memory::types::{Concept, Entity, Episode, EpisodeType, Relation, RelationType};
