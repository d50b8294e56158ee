//! ECOD Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging and error handling for the ECOD batch workspace.
//!
//! # Overview
//!
//! - **Error Handling**: [`EcodError`] and the crate [`Result`] alias
//! - **Logging**: tracing subscriber setup shared by every binary
//! - **Types**: chain keys, stage statuses, quality labels and reference status
//!
//! # Example
//!
//! ```no_run
//! use ecod_common::types::ChainKey;
//!
//! fn main() -> ecod_common::Result<()> {
//!     let key: ChainKey = "8ABC_A".parse()?;
//!     assert_eq!(key.to_string(), "8abc_A");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{EcodError, Result};
