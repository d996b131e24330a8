/// # Test Utilities Module
///
/// Isolated file-backed databases for unit tests. Each `TestDb` lives in its
/// own temporary directory, is bootstrapped from `tests/fixtures/schema.sql`
/// and disappears when dropped.
use crate::core::db::{
    Batch, ConnectionFactory, ConnectionOptions, ExecutionErrorPolicy, SqliteConnectionFactory,
    TransactionBehavior,
};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SCHEMA: &str = include_str!("../tests/fixtures/schema.sql");

pub struct TestDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("test.db");

        let conn = rusqlite::Connection::open(&path).expect("failed to create test database");
        conn.execute_batch(SCHEMA).expect("failed to load schema");
        drop(conn);

        TestDb { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn factory(&self) -> SqliteConnectionFactory {
        SqliteConnectionFactory::new(ConnectionOptions::file(&self.path))
    }

    /// A deferred batch with the default error policy.
    pub fn new_batch(&self) -> Batch {
        self.factory()
            .new_connection()
            .new_batch(TransactionBehavior::Deferred, ExecutionErrorPolicy::default())
            .expect("failed to start batch")
    }
}

/// A random string for tagging rows written by one test.
pub fn random_string() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
