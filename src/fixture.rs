/// Fixture Module
///
/// `DbFixture` hands out batches from a connection factory and offers
/// one-shot operations that each run inside a batch of their own.
use crate::config::Config;
use crate::core::db::{
    AsyncBatch, Batch, ConnectionFactory, DbConnection, ExecutionErrorPolicy, Params, Record,
    SqliteConnectionFactory, TransactionBehavior,
};
use crate::core::Result;
use rusqlite::types::Value;
use std::borrow::Borrow;
use std::sync::Arc;
use tokio::task;
use tracing::warn;

/// Creates batches from a [`ConnectionFactory`].
pub struct DbFixture<F: ConnectionFactory> {
    factory: Arc<F>,
    behavior: TransactionBehavior,
    policy: ExecutionErrorPolicy,
}

impl<F: ConnectionFactory> Clone for DbFixture<F> {
    fn clone(&self) -> Self {
        DbFixture {
            factory: Arc::clone(&self.factory),
            behavior: self.behavior,
            policy: self.policy,
        }
    }
}

impl DbFixture<SqliteConnectionFactory> {
    /// Builds a fixture from loaded configuration. `path_override` takes the
    /// place of the configured database path.
    pub fn from_config(config: &Config, path_override: Option<&str>) -> Result<Self> {
        let options = config.database.connection_options(path_override)?;
        Ok(DbFixture::new(SqliteConnectionFactory::new(options))
            .transaction_behavior(config.batch.transaction_behavior)
            .error_policy(config.batch.on_execution_error))
    }
}

impl<F: ConnectionFactory> DbFixture<F> {
    pub fn new(factory: F) -> Self {
        DbFixture {
            factory: Arc::new(factory),
            behavior: TransactionBehavior::default(),
            policy: ExecutionErrorPolicy::default(),
        }
    }

    pub fn transaction_behavior(mut self, behavior: TransactionBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    pub fn error_policy(mut self, policy: ExecutionErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// A new, unopened connection.
    pub fn new_connection(&self) -> DbConnection {
        self.factory.new_connection()
    }

    /// Opens a connection and begins a batch on it.
    pub fn new_batch(&self) -> Result<Batch> {
        self.new_connection().new_batch(self.behavior, self.policy)
    }

    /// Runs `f` in a new batch, committing when it returns `Ok` and rolling
    /// back when it returns `Err`.
    pub fn batch<T, G>(&self, f: G) -> Result<T>
    where
        G: FnOnce(&mut Batch) -> Result<T>,
    {
        let mut batch = self.new_batch()?;
        match f(&mut batch) {
            Ok(value) => {
                batch.commit()?;
                Ok(value)
            }
            Err(err) => {
                // The auto-rollback policy may already have finished the batch.
                if batch.is_open() {
                    if let Err(rollback_err) = batch.rollback() {
                        warn!(error = %rollback_err, "rollback after failed batch failed");
                    }
                }
                Err(err)
            }
        }
    }

    pub fn exec(&self, sql: &str, params: Params) -> Result<usize> {
        self.batch(|b| b.exec(sql, params))
    }

    pub fn exec_many<I>(&self, sql: &str, param_list: I) -> Result<usize>
    where
        I: IntoIterator,
        I::Item: Borrow<Params>,
    {
        self.batch(|b| b.exec_many(sql, param_list))
    }

    pub fn scalar(&self, sql: &str, params: Params) -> Result<Option<Value>> {
        self.batch(|b| b.scalar(sql, params))
    }

    pub fn query<T, M>(&self, sql: &str, params: Params, map: M) -> Result<Vec<T>>
    where
        M: FnMut(&Record<'_, '_>) -> Result<T>,
    {
        self.batch(|b| b.query(sql, params, map))
    }

    pub fn query_single<T, M>(&self, sql: &str, params: Params, map: M) -> Result<Option<T>>
    where
        M: FnOnce(&Record<'_, '_>) -> Result<T>,
    {
        self.batch(|b| b.query_single(sql, params, map))
    }

    pub fn exec_script(&self, sql: &str) -> Result<()> {
        self.batch(|b| b.exec_script(sql))
    }

    /// Opens a connection and begins a batch without blocking the async thread.
    pub async fn new_batch_async(&self) -> Result<AsyncBatch> {
        AsyncBatch::begin(self.new_connection(), self.behavior, self.policy).await
    }

    /// The async counterpart of [`DbFixture::batch`], run entirely on the blocking pool.
    pub async fn batch_async<T, G>(&self, f: G) -> Result<T>
    where
        G: FnOnce(&mut Batch) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let fixture = self.clone();
        task::spawn_blocking(move || fixture.batch(f)).await?
    }

    pub async fn exec_async(&self, sql: impl Into<String>, params: Params) -> Result<usize> {
        let sql = sql.into();
        self.batch_async(move |b| b.exec(&sql, params)).await
    }

    pub async fn exec_many_async(&self, sql: impl Into<String>, param_list: Vec<Params>) -> Result<usize> {
        let sql = sql.into();
        self.batch_async(move |b| b.exec_many(&sql, &param_list))
            .await
    }

    pub async fn scalar_async(&self, sql: impl Into<String>, params: Params) -> Result<Option<Value>> {
        let sql = sql.into();
        self.batch_async(move |b| b.scalar(&sql, params)).await
    }

    pub async fn query_async<T, M>(&self, sql: impl Into<String>, params: Params, map: M) -> Result<Vec<T>>
    where
        M: FnMut(&Record<'_, '_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.batch_async(move |b| b.query(&sql, params, map)).await
    }

    pub async fn query_single_async<T, M>(
        &self,
        sql: impl Into<String>,
        params: Params,
        map: M,
    ) -> Result<Option<T>>
    where
        M: FnOnce(&Record<'_, '_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sql = sql.into();
        self.batch_async(move |b| b.query_single(&sql, params, map))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DbErrorCode;
    use crate::db_params;
    use crate::test_utils::{random_string, TestDb};

    fn fixture(db: &TestDb) -> DbFixture<SqliteConnectionFactory> {
        DbFixture::new(db.factory())
    }

    #[test]
    fn test_one_shot_operations_commit() {
        let db = TestDb::new();
        let fixture = fixture(&db);
        let description = random_string();

        let inserted = fixture
            .exec(
                "INSERT INTO test_values (description) VALUES (@d)",
                db_params! { "d" => description.as_str() },
            )
            .unwrap();
        assert_eq!(inserted, 1);

        let found = fixture
            .query_single(
                "SELECT description FROM test_values WHERE description = @d",
                db_params! { "d" => description.as_str() },
                |r| r.read_string("description"),
            )
            .unwrap();
        assert_eq!(found, Some(description));
    }

    #[test]
    fn test_batch_rolls_back_on_error() {
        let db = TestDb::new();
        let fixture = fixture(&db);
        let description = random_string();

        let err = fixture
            .batch(|b| {
                b.exec(
                    "INSERT INTO test_values (description) VALUES (@d)",
                    db_params! { "d" => description.as_str() },
                )?;
                b.exec("INSERT INTO missing_table VALUES (1)", Params::new())
            })
            .unwrap_err();
        assert_eq!(err.code(), DbErrorCode::CouldNotExecuteNonQuery);

        let count = fixture
            .scalar(
                "SELECT COUNT(*) FROM test_values WHERE description = @d",
                db_params! { "d" => description.as_str() },
            )
            .unwrap();
        assert_eq!(count, Some(Value::Integer(0)));
    }

    #[test]
    fn test_batch_with_rollback_policy() {
        let db = TestDb::new();
        let fixture = fixture(&db).error_policy(ExecutionErrorPolicy::RollbackOnError);

        let err = fixture
            .batch(|b| b.exec("NOT SQL", Params::new()))
            .unwrap_err();
        assert_eq!(err.code(), DbErrorCode::CouldNotExecuteNonQuery);
    }

    #[test]
    fn test_closure_factory() {
        let db = TestDb::new();
        let factory = db.factory();
        let fixture = DbFixture::new(move || factory.new_connection());
        assert_eq!(
            fixture.scalar("SELECT @v", db_params! { "v" => "hello" }).unwrap(),
            Some(Value::Text("hello".to_string()))
        );
    }

    #[test]
    fn test_from_config() {
        let config: Config = toml::from_str("[batch]\ntransaction_behavior = \"exclusive\"").unwrap();
        let fixture = DbFixture::from_config(&config, Some(":memory:")).unwrap();
        let batch = fixture.new_batch().unwrap();
        assert_eq!(batch.transaction_behavior(), TransactionBehavior::Exclusive);
        batch.rollback().unwrap();
    }
}
