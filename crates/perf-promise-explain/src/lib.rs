//! perf-promise-explain
//!
//! Execution plan classification across database backends.
//!
//! A select is explained on the connection that ran it, and the backend's plan
//! payload is reduced to a [`PlanInfo`]: either a full table scan of one named
//! table, or indexed access.
//!
//! # Example
//!
//! ```ignore
//! use perf_promise_explain::{Backend, ExplainClient};
//!
//! let plan = client.plan("SELECT * FROM users WHERE email = 'a@b.c'").await?;
//! if plan.is_full_scan() {
//!     println!("full scan on {}", plan.scanned_table().unwrap_or("?"));
//! }
//!
//! // Classify a payload captured elsewhere.
//! let plan = Backend::Sqlite.classify(serde_json::json!([{"detail": "SCAN TABLE users"}]));
//! assert_eq!(plan.scanned_table(), Some("users"));
//! ```

pub mod backend;
pub mod client;
pub mod error;
pub mod plan;
pub mod statement;

pub use backend::Backend;
pub use client::{ExplainClient, RowCounter, quote_table};
pub use error::{ExplainError, ExplainResult};
pub use plan::PlanInfo;
pub use statement::StatementKind;
