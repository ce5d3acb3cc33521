//! # docgate pipeline
//!
//! The credit-metered request pipeline: upstream adapters, the operation
//! catalog, error translation, background usage recording and the
//! orchestrator that ties them to the ledger.
//!
//! ## Modules
//!
//! - `adapters`: `ExternalOperation` trait plus HTTP and mock adapters
//! - `catalog`: operation table (cost, charge policy, timeout, request shape)
//! - `orchestrator`: the metered request lifecycle
//! - `recorder`: bounded queue and worker pool for usage writes
//! - `timeout`: time budgets and cancellation for upstream calls
//! - `translator`: technical upstream errors to user-facing errors
//!
//! ## Example
//!
//! ```no_run
//! use docgate_pipeline::catalog::{default_descriptors, Catalog};
//!
//! let catalog = Catalog::from_upstreams(default_descriptors(), |var| std::env::var(var).ok())
//!     .expect("HTTP client");
//! println!("{} operations", catalog.descriptors().len());
//! ```

pub mod adapters;
pub mod catalog;
pub mod orchestrator;
pub mod recorder;
pub mod timeout;
pub mod translator;
