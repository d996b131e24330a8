/// Connection Management Module
///
/// This module provides the connection handle, the transaction handle and the
/// factory abstraction batches are created from.

use crate::core::db::batch::{Batch, ExecutionErrorPolicy};
use crate::core::{DbError, OpenCause, Result};
use rusqlite::{Connection, InterruptHandle, OpenFlags};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a connection points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// A private in-memory database, gone when the connection closes
    Memory,
    /// A database file
    File(PathBuf),
}

impl ConnectionTarget {
    /// Interprets `":memory:"` as an in-memory database and anything else as a path.
    pub fn parse(target: &str) -> Self {
        if target == ":memory:" {
            ConnectionTarget::Memory
        } else {
            ConnectionTarget::File(PathBuf::from(target))
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionTarget::Memory => f.write_str(":memory:"),
            ConnectionTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Settings applied every time a connection is opened.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub target: ConnectionTarget,
    pub read_only: bool,
    /// How long the driver waits on a locked database; `None` keeps the driver default
    pub busy_timeout: Option<Duration>,
    /// `PRAGMA name = value` pairs applied in order after opening
    pub pragmas: Vec<(String, String)>,
}

impl ConnectionOptions {
    pub fn new(target: ConnectionTarget) -> Self {
        ConnectionOptions {
            target,
            read_only: false,
            busy_timeout: None,
            pragmas: vec![("foreign_keys".to_string(), "ON".to_string())],
        }
    }

    pub fn file(path: impl Into<PathBuf>) -> Self {
        ConnectionOptions::new(ConnectionTarget::File(path.into()))
    }

    pub fn memory() -> Self {
        ConnectionOptions::new(ConnectionTarget::Memory)
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    /// Adds a pragma, replacing an earlier value for the same name.
    pub fn pragma(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.pragmas.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some(existing) => existing.1 = value,
            None => self.pragmas.push((name, value)),
        }
        self
    }

    fn open_flags(&self) -> OpenFlags {
        let access = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };
        access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }
}

/// How `BEGIN` acquires locks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionBehavior {
    /// Locks are taken on first read/write
    #[default]
    Deferred,
    /// A write lock is taken immediately
    Immediate,
    /// An exclusive lock is taken immediately
    Exclusive,
}

impl TransactionBehavior {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionBehavior::Deferred => "BEGIN DEFERRED",
            TransactionBehavior::Immediate => "BEGIN IMMEDIATE",
            TransactionBehavior::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Begun and not yet finished
    Active,
    Committed,
    RolledBack,
    /// Released without an explicit commit or rollback
    Disposed,
}

/// A database connection handle.
///
/// Created closed; `open` must be called exactly once before use. Opening an
/// already open handle is a usage error reported as
/// [`OpenCause::Busy`].
pub struct DbConnection {
    options: ConnectionOptions,
    conn: Option<Connection>,
}

impl fmt::Debug for DbConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConnection")
            .field("target", &self.options.target)
            .field("open", &self.is_open())
            .finish()
    }
}

impl DbConnection {
    /// Creates an unopened handle.
    pub fn new(options: ConnectionOptions) -> Self {
        DbConnection {
            options,
            conn: None,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Opens the connection and applies the configured timeout and pragmas.
    ///
    /// # Errors
    ///
    /// `DbError::CouldNotOpenConnection` with `OpenCause::Busy` if the handle is
    /// already open, or `OpenCause::Driver` if SQLite refuses.
    pub fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Err(DbError::open(OpenCause::Busy));
        }

        let flags = self.options.open_flags();
        let conn = match &self.options.target {
            ConnectionTarget::Memory => Connection::open_in_memory_with_flags(flags),
            ConnectionTarget::File(path) => Connection::open_with_flags(path, flags),
        }
        .map_err(DbError::open)?;

        if let Some(timeout) = self.options.busy_timeout {
            conn.busy_timeout(timeout).map_err(DbError::open)?;
        }
        for (name, value) in &self.options.pragmas {
            conn.pragma_update(None, name, value).map_err(DbError::open)?;
        }

        info!(db = %self.options.target, "database connection opened");
        self.conn = Some(conn);
        Ok(())
    }

    /// Closes the connection. Closing a handle that is not open is a no-op.
    ///
    /// The driver handle is released even when SQLite reports a close failure.
    pub fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            conn.close()
                .map_err(|(_conn, e)| DbError::CouldNotCloseConnection(e))?;
            info!(db = %self.options.target, "database connection closed");
        }
        Ok(())
    }

    /// Begins a transaction on the open connection.
    pub fn begin_transaction(&mut self, behavior: TransactionBehavior) -> Result<DbTransaction> {
        let conn = self.raw()?;
        conn.execute_batch(behavior.begin_sql())
            .map_err(|e| DbError::CouldNotBeginTransaction {
                reason: format!("`{}` failed", behavior.begin_sql()),
                source: Some(e),
            })?;

        debug!(?behavior, "transaction started");
        Ok(DbTransaction {
            behavior,
            state: TransactionState::Active,
        })
    }

    /// Opens this handle, begins a transaction and wraps both in a [`Batch`].
    pub fn new_batch(
        mut self,
        behavior: TransactionBehavior,
        policy: ExecutionErrorPolicy,
    ) -> Result<Batch> {
        self.open()?;
        let transaction = self.begin_transaction(behavior)?;
        Batch::new(self, transaction, policy)
    }

    /// A handle that can interrupt statements running on this connection from another thread.
    pub fn interrupt_handle(&self) -> Option<InterruptHandle> {
        self.conn.as_ref().map(Connection::get_interrupt_handle)
    }

    /// The driver connection, if open.
    pub(crate) fn raw(&self) -> Result<&Connection> {
        self.conn.as_ref().ok_or(DbError::ConnectionClosed)
    }
}

/// A transaction handle.
///
/// The handle only tracks state; the statements that finish it run on the
/// connection that began it, which the owning batch passes in.
#[derive(Debug)]
pub struct DbTransaction {
    behavior: TransactionBehavior,
    state: TransactionState,
}

impl DbTransaction {
    pub fn behavior(&self) -> TransactionBehavior {
        self.behavior
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub(crate) fn commit(&mut self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch("COMMIT")?;
        self.state = TransactionState::Committed;
        debug!("transaction committed");
        Ok(())
    }

    pub(crate) fn rollback(&mut self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch("ROLLBACK")?;
        self.state = TransactionState::RolledBack;
        debug!("transaction rolled back");
        Ok(())
    }

    /// Releases the handle. A transaction still active on an open connection
    /// is rolled back; once the connection is closed SQLite has already
    /// discarded it.
    pub(crate) fn dispose(&mut self, conn: Option<&Connection>) {
        if self.state != TransactionState::Active {
            return;
        }

        if let Some(conn) = conn.filter(|c| !c.is_autocommit()) {
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "rollback while disposing transaction failed");
            }
        }
        self.state = TransactionState::Disposed;
    }
}

/// Represents the ability to create new, unopened connections.
pub trait ConnectionFactory: Send + Sync + 'static {
    fn new_connection(&self) -> DbConnection;
}

impl<F> ConnectionFactory for F
where
    F: Fn() -> DbConnection + Send + Sync + 'static,
{
    fn new_connection(&self) -> DbConnection {
        self()
    }
}

/// A factory handing out SQLite connections that share one set of options.
#[derive(Debug, Clone)]
pub struct SqliteConnectionFactory {
    options: ConnectionOptions,
}

impl SqliteConnectionFactory {
    pub fn new(options: ConnectionOptions) -> Self {
        SqliteConnectionFactory { options }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn new_connection(&self) -> DbConnection {
        DbConnection::new(self.options.clone())
    }
}
