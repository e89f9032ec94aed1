#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! EIP-155 (EVM) settlement of spend permissions.
//!
//! Settles permissions against Coinbase's `SpendPermissionManager` from a
//! Coinbase Smart Wallet spender, submitting every call as an ERC-4337 v0.6
//! user operation through a bundler, optionally with ERC-7677 paymaster
//! sponsorship.
//!
//! # Architecture
//!
//! - [`contract`] - Solidity bindings for the manager, wallet, factory and entry point
//! - [`user_operation`] - User operation type, hashing and bundler wire types
//! - [`bundler`] - JSON-RPC client for bundler and paymaster endpoints
//! - [`spender`] - [`SmartSpender`], the [`spendgate::SettlementExecutor`] implementation
//! - [`error`] - Setup errors and settlement error mapping
//!
//! # Feature Flags
//!
//! - `telemetry` - Tracing instrumentation of chain and bundler calls
//!
pub mod bundler;
pub mod contract;
pub mod error;
pub mod spender;
pub mod user_operation;

mod networks;
pub use networks::*;

pub use bundler::{BundlerClient, BundlerError};
pub use error::SpenderError;
pub use spender::{SmartSpender, signer_from_key};
