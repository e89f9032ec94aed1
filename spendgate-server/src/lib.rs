//! Spend-permission collection service.
//!
//! Collects spend permissions over HTTP, persists them, and settles them
//! on-chain through an ERC-4337 spender account.
//!
//! # Modules
//!
//! - [`handlers`] - Axum route handlers and router builder
//! - [`error`] - HTTP error mapping
//! - [`config`] - Server configuration with environment variable expansion
//! - [`store`] - Postgres record store

pub mod config;
pub mod error;
pub mod handlers;
pub mod store;

pub use handlers::{AppState, collect_router};
