//! # threadloom
//!
//! Chain conversation steps with a language model and ground them in
//! locally-embedded source files.
//!
//! Two pieces carry the weight:
//!
//! - a **node-tree engine** ([`engine`]) that threads messages and side data
//!   through composable workflow steps, with error branches and
//!   re-parenting;
//! - an **embedding pipeline** ([`cache`], [`embedding`], [`search`]) that
//!   never pays twice for the same fragment, tracks which source files went
//!   stale, rate-limits outbound requests and serves top-K similarity
//!   search with exclusion filtering.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌────────────────┐   ┌─────────────┐
//! │   index    │──▶│ EmbeddingCache │──▶│ RateLimited │──▶ provider
//! │ walk+split │   │  + staleness   │   │   fetcher   │
//! └────────────┘   └───────┬────────┘   └─────────────┘
//!                          ▼
//!                  ┌────────────────┐   ┌─────────────┐
//!                  │  SQLite k/v    │◀──│ VectorStore │
//!                  │    tables      │   │   search    │
//!                  └────────────────┘   └──────┬──────┘
//!                                              ▼
//!        NodeTree ─▶ embedQuery ─▶ searchFiles ─▶ completeThread
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`engine`] | Node arena, workflow traits, flow composition |
//! | [`workflows`] | Retrieval and chat steps |
//! | [`truncate`] | Word-budget thread trimming |
//! | [`cache`] | Embedding cache keyed by fragment text |
//! | [`staleness`] | Last-seen file modification times |
//! | [`rate_limit`] | Fixed-window request limiter |
//! | [`embedding`] | Embedding providers and the retrying fetcher |
//! | [`chat`] | Chat-completion providers |
//! | [`vector_store`] | Stored vectors and similarity ranking |
//! | [`search`] | Result filtering and the `search` command |
//! | [`index`] | File scanning and the `index`/`stale` commands |
//! | [`store`] | Key/value backends (SQLite, in-memory) |
//! | [`config`] | TOML configuration parsing |

pub mod ask;
pub mod cache;
pub mod chat;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod index;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod search;
pub mod staleness;
pub mod store;
pub mod traits;
pub mod truncate;
pub mod vector_store;
pub mod workflows;
pub mod workspace;
