//! Core reconciliation engine
//!
//! This module contains the types and logic that make a namespace's filter
//! table match a declared set of chains. It provides:
//!
//! - [`intent`]: Chain intents, directions, and pure rule rendering
//! - [`probe`]: Live rule state listing (read-before-write)
//! - [`mutate`]: Idempotent create/flush/append primitives
//! - [`reconcile`]: Orchestration, bootstrap, and per-namespace locking
//! - [`error`]: Error types for reconciliation operations

pub mod error;
pub mod intent;
pub mod mutate;
pub mod probe;
pub mod reconcile;

#[cfg(test)]
pub mod test_helpers;
