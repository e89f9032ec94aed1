#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Core types for spend-permission collection and settlement.
//!
//! A spend permission is an off-chain grant, signed by the owner of a smart
//! account, that authorizes a `spender` to pull up to `allowance` of a token
//! from the account once per recurring `period`. This crate is chain-agnostic
//! at its seams: it validates and persists grants and drives settlement through
//! the [`settlement::SettlementExecutor`] trait, which chain-specific crates
//! implement.
//!
//! # Modules
//!
//! - [`permission`] - `SpendPermission`, its unique key and signature types
//! - [`validate`] - Structural and semantic validation of incoming grants
//! - [`store`] - Record store trait and an in-memory implementation
//! - [`settlement`] - Settlement executor trait, results and allowance checks
//! - [`collect`] - The collection flow: validate, store, then settle
//! - [`error`] - Error taxonomy shared by all of the above
//!
//! # Feature Flags
//!
//! - `telemetry` - Enables tracing instrumentation for debugging and monitoring

pub mod collect;
pub mod error;
pub mod permission;
pub mod settlement;
pub mod store;
pub mod validate;

use std::future::Future;
use std::pin::Pin;

pub use collect::{CollectOutcome, Collector};
pub use error::{CollectError, SettlementError, SettlementPhase, StorageError, ValidationError};
pub use permission::{PermissionKey, PermissionSignature, SpendPermission};
pub use settlement::{SettlementExecutor, SettlementResult};
pub use store::{MemoryPermissionStore, PermissionStore, StoredPermission};

/// A boxed, sendable future borrowed for `'a`.
///
/// Used at the dyn-compatible trait seams ([`PermissionStore`],
/// [`SettlementExecutor`]) so the server can hold them as trait objects.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
