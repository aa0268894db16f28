//! B3 History Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the B3 history workspace members:
//!
//! - **Logging**: tracing subscriber setup driven by environment variables
//! - **Identifiers**: validation and quoting of SQL identifiers built from
//!   user input (schema names, table names derived from file names)
//! - **Errors**: the error type for the above
//!
//! # Example
//!
//! ```no_run
//! use b3_common::identifier::{quote_identifier, validate_identifier};
//!
//! fn main() -> b3_common::Result<()> {
//!     validate_identifier("b3_history")?;
//!     assert_eq!(quote_identifier("b3_history"), "\"b3_history\"");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod identifier;
pub mod logging;

pub use error::{CommonError, Result};
