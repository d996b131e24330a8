/// Command Module
///
/// Builds driver commands from SQL text and named parameters and runs them,
/// translating driver failures into `DbError::Execution` tagged with the kind
/// of operation and the SQL text.

use crate::core::db::connection::{DbConnection, DbTransaction};
use crate::core::db::params::{bare_name, Params, PARAM_PREFIXES};
use crate::core::db::reader::{Record, RowCursor};
use crate::core::{DbError, ExecutionKind, Result};
use rusqlite::types::Value;
use rusqlite::{Connection, Statement};
use std::borrow::Borrow;
use std::time::Duration;
use tracing::{debug, warn};

/// How the command text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// The text is a SQL statement
    #[default]
    Text,
    /// The text is a table name; the command selects every row of it
    TableDirect,
}

/// A fluent API for assembling [`Command`]s.
pub struct CommandBuilder<'a> {
    conn: &'a DbConnection,
    text: String,
    params: Params,
    timeout: Option<Duration>,
    kind: CommandKind,
    transaction: Option<&'a DbTransaction>,
}

impl<'a> CommandBuilder<'a> {
    pub fn new(conn: &'a DbConnection, text: impl Into<String>) -> Self {
        CommandBuilder {
            conn,
            text: text.into(),
            params: Params::new(),
            timeout: None,
            kind: CommandKind::Text,
            transaction: None,
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// How long to wait on a locked database. SQLite scopes this to the
    /// connection, so the previous busy timeout is put back when the command
    /// is dropped.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Binds the command to a transaction, which must still be active when the command is built.
    pub fn transaction(mut self, transaction: &'a DbTransaction) -> Self {
        self.transaction = Some(transaction);
        self
    }

    pub fn build(self) -> Result<Command<'a>> {
        let conn = self.conn.raw()?;

        if let Some(transaction) = self.transaction {
            if !transaction.is_active() || conn.is_autocommit() {
                return Err(DbError::CouldNotBeginTransaction {
                    reason: "command bound to a transaction that is no longer active".to_string(),
                    source: None,
                });
            }
        }

        let sql = match self.kind {
            CommandKind::Text => self.text,
            CommandKind::TableDirect => format!("SELECT * FROM {}", quote_identifier(&self.text)),
        };

        let restore_timeout = match self.timeout {
            Some(timeout) => {
                let previous = current_busy_timeout(conn)
                    .map_err(|e| DbError::execution(ExecutionKind::NonQuery, &sql, e))?;
                conn.busy_timeout(timeout)
                    .map_err(|e| DbError::execution(ExecutionKind::NonQuery, &sql, e))?;
                Some(previous)
            }
            None => None,
        };

        Ok(Command {
            conn,
            sql,
            params: self.params,
            stmt: None,
            restore_timeout,
        })
    }
}

fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn current_busy_timeout(conn: &Connection) -> rusqlite::Result<Duration> {
    let ms: i64 = conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
    Ok(Duration::from_millis(u64::try_from(ms).unwrap_or(0)))
}

/// A command ready to run against an open connection.
///
/// The statement is prepared on first use and reused afterwards.
pub struct Command<'conn> {
    conn: &'conn Connection,
    sql: String,
    params: Params,
    stmt: Option<Statement<'conn>>,
    restore_timeout: Option<Duration>,
}

impl<'conn> Command<'conn> {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    fn prepare(&mut self, kind: ExecutionKind) -> Result<(&mut Statement<'conn>, &str, &Params)> {
        let conn = self.conn;
        let Command { sql, params, stmt, .. } = self;

        let prepared = match stmt.take() {
            Some(prepared) => prepared,
            None => conn
                .prepare(sql)
                .map_err(|e| DbError::execution(kind, sql, e))?,
        };
        Ok((stmt.insert(prepared), sql.as_str(), &*params))
    }

    /// Runs a non-query statement and returns the number of rows affected.
    /// Rows the statement hands back, as with `RETURNING`, are discarded.
    pub fn exec(&mut self) -> Result<usize> {
        let kind = ExecutionKind::NonQuery;
        let conn = self.conn;
        let (stmt, sql, params) = self.prepare(kind)?;
        bind_params(stmt, params, sql, kind)?;

        debug!(sql = %preview(sql), "executing non-query");
        execute_bound(conn, stmt).map_err(|e| DbError::execution(kind, sql, e))
    }

    /// Runs the statement once per parameter map, reusing one prepared
    /// statement. Stops at the first failure. The command's own parameters are
    /// not used.
    pub fn exec_many<I>(&mut self, param_list: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<Params>,
    {
        let kind = ExecutionKind::NonQuery;
        let conn = self.conn;
        let (stmt, sql, _) = self.prepare(kind)?;

        let mut affected = 0;
        for (i, params) in param_list.into_iter().enumerate() {
            bind_params(stmt, params.borrow(), sql, kind)?;
            debug!(sql = %preview(sql), iteration = i, "executing non-query");
            affected +=
                execute_bound(conn, stmt).map_err(|e| DbError::execution(kind, sql, e))?;
        }
        Ok(affected)
    }

    /// Returns the first column of the first row, or `None` when there are no rows.
    pub fn scalar(&mut self) -> Result<Option<Value>> {
        let kind = ExecutionKind::Scalar;
        let (stmt, sql, params) = self.prepare(kind)?;
        bind_params(stmt, params, sql, kind)?;

        debug!(sql = %preview(sql), "executing scalar");
        let has_columns = stmt.column_count() > 0;
        let mut rows = stmt.raw_query();
        let first = rows.next().map_err(|e| DbError::execution(kind, sql, e))?;

        match first {
            Some(row) if has_columns => row
                .get_ref(0)
                .map(|v| Some(Value::from(v)))
                .map_err(|e| DbError::execution(kind, sql, e)),
            _ => Ok(None),
        }
    }

    /// Runs the query and maps every row, preserving order and duplicates.
    pub fn query<T, F>(&mut self, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Record<'_, '_>) -> Result<T>,
    {
        self.read()?.map(map)
    }

    /// Runs the query and maps the first row only.
    pub fn query_single<T, F>(&mut self, map: F) -> Result<Option<T>>
    where
        F: FnOnce(&Record<'_, '_>) -> Result<T>,
    {
        self.read()?.map_first(map)
    }

    /// Runs the query and hands back a live cursor the caller advances.
    pub fn read(&mut self) -> Result<RowCursor<'_>> {
        let kind = ExecutionKind::Reader;
        let (stmt, sql, params) = self.prepare(kind)?;
        bind_params(stmt, params, sql, kind)?;

        debug!(sql = %preview(sql), "executing reader");
        Ok(RowCursor::new(stmt.raw_query(), sql))
    }
}

impl Drop for Command<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.restore_timeout.take() {
            if let Err(e) = self.conn.busy_timeout(previous) {
                warn!(error = %e, "could not restore busy timeout");
            }
        }
    }
}

/// Runs a bound statement to completion and returns the rows it changed.
/// Rows it produces are stepped through and dropped; a read-only statement
/// changes nothing.
pub(crate) fn execute_bound(conn: &Connection, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
    if stmt.column_count() == 0 {
        return stmt.raw_execute();
    }

    let mut rows = stmt.raw_query();
    while rows.next()?.is_some() {}
    drop(rows);

    if stmt.readonly() {
        Ok(0)
    } else {
        Ok(conn.changes() as usize)
    }
}

/// Binds every entry of `params` to its placeholder(s). Each placeholder in
/// the statement must receive a value; names the statement does not use are
/// ignored.
pub(crate) fn bind_params(
    stmt: &mut Statement<'_>,
    params: &Params,
    sql: &str,
    kind: ExecutionKind,
) -> Result<()> {
    let mut bound = vec![false; stmt.parameter_count()];

    for (name, value) in params {
        for index in parameter_indexes(stmt, name).map_err(|e| DbError::execution(kind, sql, e))? {
            stmt.raw_bind_parameter(index, value)
                .map_err(|e| DbError::execution(kind, sql, e))?;
            bound[index - 1] = true;
        }
    }

    if let Some(missing) = bound.iter().position(|b| !b) {
        let name = stmt
            .parameter_name(missing + 1)
            .map(str::to_string)
            .unwrap_or_else(|| format!("?{}", missing + 1));
        return Err(DbError::execution(
            kind,
            sql,
            rusqlite::Error::InvalidParameterName(name),
        ));
    }
    Ok(())
}

/// One-based indexes of the placeholders a parameter name binds to: `@name`,
/// `:name` and `$name` all match.
fn parameter_indexes(stmt: &Statement<'_>, name: &str) -> rusqlite::Result<Vec<usize>> {
    let name = bare_name(name);
    let mut indexes = Vec::new();
    for prefix in PARAM_PREFIXES {
        if let Some(index) = stmt.parameter_index(&format!("{}{}", prefix, name))? {
            indexes.push(index);
        }
    }
    Ok(indexes)
}

fn preview(sql: &str) -> String {
    sql.chars().take(100).collect()
}
