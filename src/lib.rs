//! nsgard - namespace guard
//!
//! Idempotent iptables chain reconciliation for container network namespaces.
//!
//! # Architecture
//!
//! - [`core`] - Chain intents, rule rendering, and the reconciliation engine
//! - [`exec`] - Namespace-scoped iptables command execution
//! - [`netns`] - Process-to-namespace resolution
//! - [`audit`] - Security audit logging for all privileged operations
//! - [`validators`] - Input validation and sanitization
//! - [`utils`] - Utility functions (XDG directories, etc.)
//!
//! # Reconciliation Model
//!
//! A caller supplies a target network namespace and an ordered list of
//! [`core::intent::ChainIntent`] values. [`core::reconcile::Reconciler`]
//! makes the namespace's filter table match those intents exactly:
//!
//! - Chains are created if absent; "already exists" is success
//! - Chain contents are replaced wholesale (flush + append), never diffed
//! - Each chain is hooked exactly once into its umbrella chain, and each
//!   umbrella exactly once into the kernel's `INPUT`/`OUTPUT` base chain,
//!   no matter how many times reconciliation runs
//! - The first failure aborts the batch; chains applied before it stay
//!   applied (no rollback)
//!
//! # Safety Features
//!
//! - All intent fields validated before any external command runs
//! - Per-namespace lock serializes concurrent reconciliations
//! - `iptables -w` on every invocation (xtables lock wait)
//! - Audit trail of all reconciliations

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod core;
pub mod exec;
pub mod netns;
pub mod utils;
pub mod validators;

// Re-export commonly used types
pub use self::core::error::{Error, Result};
pub use self::core::intent::{ChainIntent, Direction, RenderedRule};
pub use self::core::reconcile::Reconciler;
