//! Core types and trait definitions for the BioHub feature security engine.
//!
//! This crate has no HTTP or database dependencies. It holds
//! the schema-as-data registry, the typed attribute projection, the security
//! condition model and the pure rule evaluation engine. Storage backends
//! implement [`store::SubmissionStore`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod engine;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod index;
pub mod ledger;
pub mod rule;
pub mod schema;
pub mod store;
pub mod temporal;

pub use error::{Error, Result};
