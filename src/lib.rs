//! # Content Guard
//!
//! A copyright-detection pipeline for user-generated content.
//!
//! Owners register protected works; each work is fingerprinted per
//! modality. Scanned platform items are compared against the owner's
//! active catalog by detection jobs, and pairs that clear the match
//! policy are stored as content matches for human review.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │  Scanned    │──▶│  Detection   │──▶│    SQLite    │
//! │  items      │   │  Manager     │   │ jobs+matches │
//! └─────────────┘   └──────┬───────┘   └──────┬───────┘
//!                          │                  │
//!              ┌───────────┤                  ▼
//!              ▼           ▼            ┌──────────┐
//!        ┌──────────┐ ┌──────────┐      │   CLI    │
//!        │ Catalog  │ │  Judge   │      │ (cguard) │
//!        │ +FP gen  │ │  (HTTP)  │      └──────────┘
//!        └──────────┘ └──────────┘
//! ```
//!
//! The I/O-free pieces (models, fingerprinting, comparison, policy, the job
//! state machine) live in `content-guard-core`. This crate adds storage,
//! transport, scheduling and the command line.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the store |
//! | [`judge`] | HTTP chat-completions judge |
//! | [`detect`] | Detection Manager |
//! | [`dispatch`] | Inline queue and worker pool |
//! | [`ingest`] | Scanned item ingestion |
//! | [`logging`] | Tracing subscriber setup |
//! | [`catalog_cmd`], [`detect_cmd`], [`matches_cmd`], [`stats`] | CLI commands |

pub mod catalog_cmd;
pub mod config;
pub mod db;
pub mod detect;
pub mod detect_cmd;
pub mod dispatch;
pub mod ingest;
pub mod judge;
pub mod logging;
pub mod matches_cmd;
pub mod migrate;
pub mod sqlite_store;
pub mod stats;
