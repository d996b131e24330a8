#![allow(dead_code)]

use sqlbatch::core::db::{ConnectionOptions, SqliteConnectionFactory};
use sqlbatch::fixture::DbFixture;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const SCHEMA: &str = include_str!("../fixtures/schema.sql");

/// A temporary database file bootstrapped with the test schema.
pub struct TestDb {
    _dir: TempDir,
    path: PathBuf,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("failed to create temp dir");
        let path = dir.path().join("integration.db");

        let fixture = DbFixture::new(SqliteConnectionFactory::new(ConnectionOptions::file(&path)));
        fixture.exec_script(SCHEMA).expect("failed to load schema");

        TestDb { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fixture(&self) -> DbFixture<SqliteConnectionFactory> {
        DbFixture::new(SqliteConnectionFactory::new(ConnectionOptions::file(&self.path)))
    }
}

pub fn random_string() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
