//! # docgate Shared Library
//!
//! Types and business logic shared by the docgate API server and the metered
//! operation pipeline.
//!
//! ## Module Organization
//!
//! - `auth`: Opaque keys, signed-token verification and the identity resolver
//! - `models`: Database models and their PostgreSQL queries
//! - `store`: Persistence traits with PostgreSQL and in-memory backends
//! - `ledger`: Atomic credit balance operations and settlement policy
//! - `accounts`: Registration and auto-provisioning
//! - `credit_tokens`: Redeemable credit token issuance and redemption
//! - `db`: Connection pool and migrations

pub mod accounts;
pub mod auth;
pub mod credit_tokens;
pub mod db;
pub mod ledger;
pub mod models;
pub mod store;

/// Current version of the docgate shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
