/// Core Module for sqlbatch
///
/// The error taxonomy and the database layer it reports on.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbError, DbErrorCode, ExecutionKind, OpenCause, Result};
