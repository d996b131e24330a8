/// Database Module
///
/// The unit-of-work layer over SQLite, split by concern:
///
/// - **Parameters** (`params.rs`): named, typed parameter maps
/// - **Connections** (`connection.rs`): connection handles, factories and transactions
/// - **Commands** (`command.rs`): command assembly, binding and execution
/// - **Rows** (`reader.rs`): forward-only cursors and typed column reads
/// - **Batches** (`batch.rs`, `async_batch.rs`): transactional units of work
///
/// ## Error Handling
///
/// Every operation returns the crate-wide `Result`, carrying a `DbError` whose
/// `code()` identifies the failure kind.
///
/// ## Usage
///
/// ```no_run
/// use sqlbatch::core::db::{ConnectionOptions, DbConnection, ExecutionErrorPolicy, TransactionBehavior};
/// use sqlbatch::db_params;
///
/// # fn main() -> sqlbatch::core::Result<()> {
/// let mut batch = DbConnection::new(ConnectionOptions::file("app.db"))
///     .new_batch(TransactionBehavior::Deferred, ExecutionErrorPolicy::CallerDecides)?;
/// batch.exec("INSERT INTO t (description) VALUES (@d)", db_params! { "d" => "x" })?;
/// batch.commit()?;
/// # Ok(())
/// # }
/// ```
pub mod async_batch;
pub mod batch;
pub mod command;
pub mod connection;
pub mod params;
pub mod reader;

pub use async_batch::*;
pub use batch::*;
pub use command::*;
pub use connection::*;
pub use params::*;
pub use reader::*;
