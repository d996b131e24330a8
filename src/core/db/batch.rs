/// Batch Module
///
/// A batch is a unit of work: it owns one open connection and one active
/// transaction, runs commands inside that transaction and then finishes it
/// exactly once, either by committing or by rolling back.
///
/// ## Lifecycle
///
/// ```text
///          commit ok           commit failed (after compensating rollback)
///   Open ──────────► Committed      Open ──────────► RolledBack
///   Open ──────────► RolledBack     (rollback, auto-rollback policy, or drop)
/// ```
///
/// Whichever way the batch finishes, the connection is closed and the
/// transaction handle disposed afterwards, in that order.
///
/// `commit` and `rollback` take the batch by value, so a finished batch cannot
/// be used again. The only way to reach a finished batch at runtime is the
/// [`ExecutionErrorPolicy::RollbackOnError`] policy, after which every
/// operation fails with `DbError::BatchClosed`.
use crate::core::db::command::{bind_params, execute_bound, Command, CommandBuilder};
use crate::core::db::connection::{DbConnection, DbTransaction, TransactionBehavior};
use crate::core::db::params::Params;
use crate::core::db::reader::{Record, RowCursor};
use crate::core::{DbError, ExecutionKind, Result};
use rusqlite::types::Value;
use rusqlite::InterruptHandle;
use serde::Deserialize;
use std::borrow::Borrow;
use std::fmt;
use tracing::{debug, error, info, instrument, warn};

/// Where a batch is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchState {
    Open,
    Committed,
    RolledBack,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Open => "open",
            BatchState::Committed => "committed",
            BatchState::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// What a batch does when a command fails to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorPolicy {
    /// Return the error and leave the transaction open; the caller decides
    /// whether to roll back.
    #[default]
    CallerDecides,
    /// Roll back and release the batch before returning the error.
    RollbackOnError,
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Commit,
    Rollback,
}

/// A unit of work over one connection and one transaction.
pub struct Batch {
    connection: DbConnection,
    transaction: DbTransaction,
    policy: ExecutionErrorPolicy,
    state: BatchState,
    released: bool,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("connection", &self.connection)
            .field("transaction", &self.transaction)
            .field("policy", &self.policy)
            .field("state", &self.state)
            .finish()
    }
}

impl Batch {
    /// Wraps an open connection and the transaction active on it.
    ///
    /// # Errors
    ///
    /// `DbError::CouldNotBeginBatch` if the connection is not open, the
    /// transaction is not active, or the connection has no transaction open
    /// (the transaction belongs to some other connection).
    pub fn new(
        connection: DbConnection,
        transaction: DbTransaction,
        policy: ExecutionErrorPolicy,
    ) -> Result<Self> {
        if !connection.is_open() {
            return Err(DbError::CouldNotBeginBatch(
                "connection is not open".to_string(),
            ));
        }
        if !transaction.is_active() {
            return Err(DbError::CouldNotBeginBatch(format!(
                "transaction is {:?}",
                transaction.state()
            )));
        }
        if connection.raw().map_or(true, rusqlite::Connection::is_autocommit) {
            return Err(DbError::CouldNotBeginBatch(
                "no transaction is open on the connection".to_string(),
            ));
        }

        info!(behavior = ?transaction.behavior(), ?policy, "batch started");
        Ok(Batch {
            connection,
            transaction,
            policy,
            state: BatchState::Open,
            released: false,
        })
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == BatchState::Open
    }

    pub fn policy(&self) -> ExecutionErrorPolicy {
        self.policy
    }

    pub fn transaction_behavior(&self) -> TransactionBehavior {
        self.transaction.behavior()
    }

    pub(crate) fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.connection.interrupt_handle()
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            BatchState::Open => Ok(()),
            state => Err(DbError::BatchClosed(state.to_string())),
        }
    }

    /// Builds a command bound to this batch's transaction.
    ///
    /// The command borrows the batch, so anything it hands out (a live
    /// [`RowCursor`] from [`Command::read`] included) must be gone before the
    /// batch can be committed. Failures of commands built this way are not
    /// seen by the batch and never trigger the auto-rollback policy.
    pub fn command(&self, sql: &str, params: Params) -> Result<Command<'_>> {
        self.ensure_open()?;
        CommandBuilder::new(&self.connection, sql)
            .params(params)
            .transaction(&self.transaction)
            .build()
    }

    fn run<T, F>(&mut self, sql: &str, params: Params, op: F) -> Result<T>
    where
        F: FnOnce(&mut Command<'_>) -> Result<T>,
    {
        let result = self
            .command(sql, params)
            .and_then(|mut command| op(&mut command));
        self.apply_policy(result)
    }

    fn apply_policy<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Err(err)
                if err.is_execution() && self.policy == ExecutionErrorPolicy::RollbackOnError =>
            {
                warn!(error = %err, "command failed; rolling back batch");
                if let Err(rollback_err) = self.complete(Outcome::Rollback) {
                    error!(error = %rollback_err, "automatic rollback failed");
                }
                Err(err)
            }
            other => other,
        }
    }

    /// Runs a non-query statement and returns the number of rows affected.
    #[instrument(level = "debug", skip(self, params))]
    pub fn exec(&mut self, sql: &str, params: Params) -> Result<usize> {
        self.run(sql, params, |command| command.exec())
    }

    /// Runs one statement once per parameter map, reusing the prepared
    /// statement, and returns the total rows affected. Stops at the first
    /// failure.
    #[instrument(level = "debug", skip(self, param_list))]
    pub fn exec_many<I>(&mut self, sql: &str, param_list: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<Params>,
    {
        self.run(sql, Params::new(), |command| command.exec_many(param_list))
    }

    /// Returns the first column of the first row, or `None` when the query
    /// produced no rows.
    #[instrument(level = "debug", skip(self, params))]
    pub fn scalar(&mut self, sql: &str, params: Params) -> Result<Option<Value>> {
        self.run(sql, params, |command| command.scalar())
    }

    /// Maps every row of the query, in order, keeping duplicates.
    #[instrument(level = "debug", skip(self, params, map))]
    pub fn query<T, F>(&mut self, sql: &str, params: Params, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Record<'_, '_>) -> Result<T>,
    {
        self.run(sql, params, |command| command.query(map))
    }

    /// Maps the first row of the query, or returns `None` when there are no rows.
    #[instrument(level = "debug", skip(self, params, map))]
    pub fn query_single<T, F>(&mut self, sql: &str, params: Params, map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Record<'_, '_>) -> Result<T>,
    {
        self.run(sql, params, |command| command.query_single(map))
    }

    /// Runs the query and lends the live cursor to `f`, which advances it as
    /// far as it likes. The cursor is released when `f` returns.
    #[instrument(level = "debug", skip(self, params, f))]
    pub fn read<T, F>(&mut self, sql: &str, params: Params, f: F) -> Result<T>
    where
        F: FnOnce(RowCursor<'_>) -> Result<T>,
    {
        self.run(sql, params, |command| f(command.read()?))
    }

    /// Runs a multi-statement script verbatim, without parameters.
    #[instrument(level = "debug", skip_all)]
    pub fn exec_script(&mut self, sql: &str) -> Result<()> {
        self.ensure_open()?;
        let result = self
            .connection
            .raw()
            .and_then(|conn| {
                conn.execute_batch(sql)
                    .map_err(|e| DbError::execution(ExecutionKind::NonQuery, sql, e))
            });
        self.apply_policy(result)
    }

    /// Runs a multi-statement script one statement at a time, binding
    /// `params` into each, and returns the total rows affected. Rows produced
    /// by queries in the script are discarded.
    #[instrument(level = "debug", skip_all)]
    pub fn exec_script_with(&mut self, sql: &str, params: &Params) -> Result<usize> {
        self.ensure_open()?;
        let result = self
            .connection
            .raw()
            .and_then(|conn| run_script(conn, sql, params));
        self.apply_policy(result)
    }

    /// Commits the transaction and releases the batch.
    ///
    /// # Errors
    ///
    /// `DbError::CouldNotCommitBatch` if the commit fails. A compensating
    /// rollback has been attempted by then and the batch is released either
    /// way.
    #[instrument(skip(self))]
    pub fn commit(mut self) -> Result<()> {
        self.complete(Outcome::Commit)
    }

    /// Rolls the transaction back and releases the batch.
    #[instrument(skip(self))]
    pub fn rollback(mut self) -> Result<()> {
        self.complete(Outcome::Rollback)
    }

    fn complete(&mut self, outcome: Outcome) -> Result<()> {
        self.ensure_open()?;

        let finished = match outcome {
            Outcome::Commit => self.try_commit(),
            Outcome::Rollback => self.try_rollback(),
        };
        let released = self.release();

        match (finished, released) {
            (Ok(()), released) => released,
            (Err(err), Err(close_err)) => {
                error!(error = %close_err, "releasing batch failed");
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
        }
    }

    fn try_commit(&mut self) -> Result<()> {
        let conn = self.connection.raw()?;
        match self.transaction.commit(conn) {
            Ok(()) => {
                self.state = BatchState::Committed;
                info!("batch committed");
                Ok(())
            }
            Err(commit_err) => {
                error!(error = %commit_err, "commit failed; rolling back");
                if conn.is_autocommit() {
                    debug!("no transaction left to roll back");
                } else if let Err(rollback_err) = self.transaction.rollback(conn) {
                    error!(error = %rollback_err, "compensating rollback failed");
                }
                self.state = BatchState::RolledBack;
                Err(DbError::CouldNotCommitBatch(commit_err))
            }
        }
    }

    fn try_rollback(&mut self) -> Result<()> {
        self.state = BatchState::RolledBack;
        let conn = self.connection.raw()?;

        // SQLite may already have rolled back on its own, e.g. after RAISE(ROLLBACK).
        if conn.is_autocommit() {
            debug!("transaction already rolled back by the database");
            return Ok(());
        }
        self.transaction
            .rollback(conn)
            .map_err(DbError::CouldNotRollbackBatch)?;
        info!("batch rolled back");
        Ok(())
    }

    /// Closes the connection, then disposes the transaction. Runs once.
    fn release(&mut self) -> Result<()> {
        if self.released {
            return Err(DbError::BatchClosed("released".to_string()));
        }
        self.released = true;

        let closed = self.connection.close();
        self.transaction.dispose(None);
        debug!(state = %self.state, "batch released");
        closed
    }
}

impl Drop for Batch {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.state == BatchState::Open {
            warn!("batch dropped while open; rolling back");
            if let Err(e) = self.try_rollback() {
                error!(error = %e, "rollback of dropped batch failed");
            }
        }
        if let Err(e) = self.release() {
            error!(error = %e, "releasing dropped batch failed");
        }
    }
}

fn run_script(conn: &rusqlite::Connection, sql: &str, params: &Params) -> Result<usize> {
    let kind = ExecutionKind::NonQuery;
    let mut statements = rusqlite::Batch::new(conn, sql);
    let mut affected = 0;

    while let Some(mut stmt) = statements
        .next()
        .map_err(|e| DbError::execution(kind, sql, e))?
    {
        bind_params(&mut stmt, params, sql, kind)?;
        affected +=
            execute_bound(conn, &mut stmt).map_err(|e| DbError::execution(kind, sql, e))?;
    }
    Ok(affected)
}
