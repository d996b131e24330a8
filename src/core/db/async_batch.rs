/// Async Batch Module
///
/// An asynchronous mirror of [`Batch`]. SQLite has no async driver, so every
/// operation runs the synchronous batch on tokio's blocking pool and the
/// calling task awaits the result.
use crate::core::db::batch::{Batch, BatchState, ExecutionErrorPolicy};
use crate::core::db::connection::{DbConnection, TransactionBehavior};
use crate::core::db::params::Params;
use crate::core::db::reader::{Record, RowCursor};
use crate::core::{DbError, Result};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::InterruptHandle;
use std::sync::Arc;
use tokio::task;
use tracing::debug;

/// Interrupts whatever statement the batch's connection is running.
///
/// An interrupted statement fails with the execution error of the operation
/// that ran it; the batch itself stays open. Cancelling while nothing is
/// running has no effect.
#[derive(Clone)]
pub struct QueryCanceller {
    interrupt_handle: Option<Arc<InterruptHandle>>,
}

impl QueryCanceller {
    pub fn cancel(&self) {
        if let Some(handle) = &self.interrupt_handle {
            debug!("interrupting running statement");
            handle.interrupt();
        }
    }
}

/// A [`Batch`] driven from async code.
///
/// Dropping an `AsyncBatch` that was never finished rolls it back on the
/// dropping thread, exactly as dropping a `Batch` does.
pub struct AsyncBatch {
    inner: Arc<Mutex<Option<Batch>>>,
    interrupt_handle: Option<Arc<InterruptHandle>>,
}

impl AsyncBatch {
    pub fn new(batch: Batch) -> Self {
        let interrupt_handle = batch.interrupt_handle().map(Arc::new);
        AsyncBatch {
            inner: Arc::new(Mutex::new(Some(batch))),
            interrupt_handle,
        }
    }

    /// Opens `connection`, begins a transaction and wraps both, off the async thread.
    pub async fn begin(
        connection: DbConnection,
        behavior: TransactionBehavior,
        policy: ExecutionErrorPolicy,
    ) -> Result<Self> {
        let batch = task::spawn_blocking(move || connection.new_batch(behavior, policy)).await??;
        Ok(AsyncBatch::new(batch))
    }

    pub fn cancel_handle(&self) -> QueryCanceller {
        QueryCanceller {
            interrupt_handle: self.interrupt_handle.clone(),
        }
    }

    /// The batch state, or `None` while an operation holds the batch.
    pub fn state(&self) -> Option<BatchState> {
        self.inner
            .try_lock()
            .map(|guard| guard.as_ref().map_or(BatchState::RolledBack, Batch::state))
    }

    async fn with_batch<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Batch) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        task::spawn_blocking(move || {
            let mut guard = inner.lock();
            let batch = guard
                .as_mut()
                .ok_or_else(|| DbError::BatchClosed("released".to_string()))?;
            f(batch)
        })
        .await?
    }

    async fn finish<F>(self, f: F) -> Result<()>
    where
        F: FnOnce(Batch) -> Result<()> + Send + 'static,
    {
        let inner = self.inner;
        task::spawn_blocking(move || {
            let batch = inner
                .lock()
                .take()
                .ok_or_else(|| DbError::BatchClosed("released".to_string()))?;
            f(batch)
        })
        .await?
    }

    pub async fn exec(&mut self, sql: impl Into<String>, params: Params) -> Result<usize> {
        let sql = sql.into();
        self.with_batch(move |batch| batch.exec(&sql, params)).await
    }

    pub async fn exec_many(&mut self, sql: impl Into<String>, param_list: Vec<Params>) -> Result<usize> {
        let sql = sql.into();
        self.with_batch(move |batch| batch.exec_many(&sql, &param_list))
            .await
    }

    pub async fn scalar(&mut self, sql: impl Into<String>, params: Params) -> Result<Option<Value>> {
        let sql = sql.into();
        self.with_batch(move |batch| batch.scalar(&sql, params)).await
    }

    pub async fn query<T, F>(&mut self, sql: impl Into<String>, params: Params, map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Record<'_, '_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.with_batch(move |batch| batch.query(&sql, params, map))
            .await
    }

    pub async fn query_single<T, F>(
        &mut self,
        sql: impl Into<String>,
        params: Params,
        map: F,
    ) -> Result<Option<T>>
    where
        F: FnOnce(&Record<'_, '_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.with_batch(move |batch| batch.query_single(&sql, params, map))
            .await
    }

    /// Lends the live cursor to `f` on the blocking thread.
    pub async fn read<T, F>(&mut self, sql: impl Into<String>, params: Params, f: F) -> Result<T>
    where
        F: FnOnce(RowCursor<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.with_batch(move |batch| batch.read(&sql, params, f)).await
    }

    pub async fn exec_script(&mut self, sql: impl Into<String>) -> Result<()> {
        let sql = sql.into();
        self.with_batch(move |batch| batch.exec_script(&sql)).await
    }

    pub async fn exec_script_with(&mut self, sql: impl Into<String>, params: Params) -> Result<usize> {
        let sql = sql.into();
        self.with_batch(move |batch| batch.exec_script_with(&sql, &params))
            .await
    }

    pub async fn commit(self) -> Result<()> {
        self.finish(Batch::commit).await
    }

    pub async fn rollback(self) -> Result<()> {
        self.finish(Batch::rollback).await
    }
}
