//! # Content Guard Core
//!
//! Shared, I/O-free logic for Content Guard: data models, fingerprint
//! generators, similarity comparators, the match decision policy, the
//! external-judge contract, catalog operations, the detection job state
//! machine and the store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP or filesystem dependencies.
//! The application crate supplies persistence, transport and scheduling.

pub mod catalog;
pub mod compare;
pub mod error;
pub mod fingerprint;
pub mod job;
pub mod judge;
pub mod models;
pub mod policy;
pub mod store;

pub use error::DetectionError;
