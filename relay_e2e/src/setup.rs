//! Test environment setup and teardown
//!
//! Provides TestContext for test isolation with automatic cleanup via RAII.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use uuid::Uuid;

use post_relay::config::{Config, PostgresConfig};
use post_relay::relay::{EntityKind, FieldMap, PostgresStore, Store};

use crate::common::{create_store, load_config, TestResult};

/// Test context providing isolation and automatic cleanup
///
/// Topics are fixed per route, so isolation comes from unique consumer
/// groups and from rows created for the test alone. Those rows are removed
/// on cleanup.
pub struct TestContext {
    /// Unique identifier for this test run
    pub test_id: String,
    pub config: Config,
    /// Store the consumers under test write through
    pub store: Arc<PostgresStore>,
    /// Separate client for cleanup
    db_client: Arc<Client>,
    rows_created: Arc<Mutex<Vec<(EntityKind, i64)>>>,
}

impl TestContext {
    /// Create a new test context
    pub async fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let test_id = Uuid::new_v4().to_string()[..8].to_string();
        let config = load_config(&test_id)?;
        let store = create_store(&config).await?;
        let db_client = connect(&config.postgres).await?;

        Ok(Self {
            test_id,
            config,
            store,
            db_client: Arc::new(db_client),
            rows_created: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Generate a unique consumer group for this test
    pub fn unique_group(&self, base: &str) -> String {
        let uuid_str = Uuid::new_v4().to_string();
        format!("{}-{}-{}", base, self.test_id, &uuid_str[..8])
    }

    /// Insert a row and track it for cleanup
    pub async fn create_row(
        &self,
        entity: EntityKind,
        fields: FieldMap,
    ) -> Result<i64, Box<dyn std::error::Error>> {
        let id = self.store.create(entity, fields).await?;
        self.rows_created.lock().await.push((entity, id));
        Ok(id)
    }

    /// Manually trigger cleanup (also called automatically on drop)
    pub async fn cleanup(&self) -> TestResult {
        let rows = self.rows_created.lock().await;
        delete_rows(&self.db_client, &rows).await;
        Ok(())
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        // Best-effort: nothing is cleaned if the runtime is already gone
        let rows = self.rows_created.clone();
        let db = self.db_client.clone();

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let rows = rows.lock().await;
                delete_rows(&db, &rows).await;
            });
        }
    }
}

async fn connect(config: &PostgresConfig) -> Result<Client, Box<dyn std::error::Error>> {
    let mut pg = tokio_postgres::Config::new();
    pg.host(&config.host)
        .port(config.port)
        .user(&config.user)
        .dbname(&config.database);
    if !config.password.is_empty() {
        pg.password(&config.password);
    }
    let (client, connection) = pg.connect(NoTls).await?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("PostgreSQL connection error: {}", e);
        }
    });
    Ok(client)
}

async fn delete_rows(db: &Client, rows: &[(EntityKind, i64)]) {
    for (entity, id) in rows {
        let sql = format!("DELETE FROM {} WHERE id = $1", entity.table());
        let _ = db.execute(sql.as_str(), &[id]).await;
    }
}

/// Verify that the Kafka broker is reachable
pub async fn verify_broker_ready() -> TestResult {
    let config = load_config("readiness")?;
    let publisher = crate::common::create_publisher(&config)?;
    publisher.health_check()?;
    Ok(())
}

/// Verify database connectivity and schema
pub async fn verify_database_ready() -> TestResult {
    let config = load_config("readiness")?;
    let client = connect(&config.postgres).await?;

    for table in ["posts", "logs"] {
        let row = client
            .query_one(
                "SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)",
                &[&table],
            )
            .await?;
        let exists: bool = row.get(0);
        if !exists {
            return Err(format!("table '{}' does not exist", table).into());
        }
    }
    Ok(())
}
