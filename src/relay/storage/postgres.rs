// PostgreSQL implementation of the Store trait
//
// Tables `posts` and `logs` carry the entity columns plus created_at,
// updated_at and deleted_at. Column names in generated SQL come only from the
// fixed entity schema, never from message content.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};

use super::{Row, Store, StoreAck};
use crate::config::PostgresConfig;
use crate::relay::command::{EntityKind, FieldKind, FieldMap, FieldValue};
use crate::relay::error::Result;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS posts (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL DEFAULT 0,
    title       TEXT NOT NULL DEFAULT '',
    content     TEXT NOT NULL DEFAULT '',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ,
    deleted_at  TIMESTAMPTZ
);

CREATE TABLE IF NOT EXISTS logs (
    id            BIGSERIAL PRIMARY KEY,
    level         TEXT NOT NULL DEFAULT '',
    message       TEXT NOT NULL DEFAULT '',
    service_name  TEXT NOT NULL DEFAULT '',
    created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at    TIMESTAMPTZ,
    deleted_at    TIMESTAMPTZ
);
";

/// PostgreSQL-backed implementation of Store
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connect and spawn the connection driver onto the current runtime
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
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
                tracing::error!("PostgreSQL connection error: {}", e);
            }
        });

        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "Connected to PostgreSQL"
        );
        Ok(Self { client })
    }

    /// Create the entity tables if missing
    pub async fn migrate(&self) -> Result<()> {
        self.client.batch_execute(SCHEMA).await?;
        Ok(())
    }

    fn select_list(entity: EntityKind) -> String {
        let columns: Vec<&str> = entity.columns().iter().map(|(name, _)| *name).collect();
        format!(
            "SELECT id, {}, created_at, updated_at, deleted_at FROM {}",
            columns.join(", "),
            entity.table()
        )
    }

    fn read_row(entity: EntityKind, row: &tokio_postgres::Row) -> Result<Row> {
        let mut fields = FieldMap::new();
        for (name, kind) in entity.columns() {
            let value = match kind {
                FieldKind::Text => FieldValue::Text(row.try_get::<_, String>(*name)?),
                FieldKind::Integer => FieldValue::Integer(row.try_get::<_, i64>(*name)?),
            };
            fields.insert(name.to_string(), value);
        }

        Ok(Row {
            id: row.try_get("id")?,
            fields,
            created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
            updated_at: row.try_get::<_, Option<DateTime<Utc>>>("updated_at")?,
            deleted_at: row.try_get::<_, Option<DateTime<Utc>>>("deleted_at")?,
        })
    }
}

fn sql_param(value: &FieldValue) -> &(dyn ToSql + Sync) {
    match value {
        FieldValue::Text(s) => s,
        FieldValue::Integer(v) => v,
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn create(&self, entity: EntityKind, fields: FieldMap) -> Result<i64> {
        entity.check_fields(&fields)?;

        let sql = if fields.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES RETURNING id", entity.table())
        } else {
            let names: Vec<&str> = fields.keys().map(String::as_str).collect();
            let placeholders: Vec<String> = (1..=fields.len()).map(|i| format!("${}", i)).collect();
            format!(
                "INSERT INTO {} ({}) VALUES ({}) RETURNING id",
                entity.table(),
                names.join(", "),
                placeholders.join(", ")
            )
        };
        let params: Vec<&(dyn ToSql + Sync)> = fields.values().map(sql_param).collect();

        let row = self.client.query_one(&sql, &params).await?;
        let id: i64 = row.try_get("id")?;
        tracing::debug!(table = entity.table(), id, "Inserted row");
        Ok(id)
    }

    async fn get(&self, entity: EntityKind, id: i64) -> Result<Option<Row>> {
        let sql = format!(
            "{} WHERE id = $1 AND deleted_at IS NULL",
            Self::select_list(entity)
        );
        match self.client.query_opt(&sql, &[&id]).await? {
            Some(row) => Ok(Some(Self::read_row(entity, &row)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, entity: EntityKind) -> Result<Vec<Row>> {
        let sql = format!(
            "{} WHERE deleted_at IS NULL ORDER BY id",
            Self::select_list(entity)
        );
        self.client
            .query(&sql, &[])
            .await?
            .iter()
            .map(|row| Self::read_row(entity, row))
            .collect()
    }

    async fn update(&self, entity: EntityKind, id: i64, fields: &FieldMap) -> Result<StoreAck> {
        entity.check_fields(fields)?;

        let mut assignments = vec!["updated_at = NOW()".to_string()];
        let mut params: Vec<&(dyn ToSql + Sync)> = Vec::with_capacity(fields.len() + 1);
        for (name, value) in fields {
            params.push(sql_param(value));
            assignments.push(format!("{} = ${}", name, params.len()));
        }
        params.push(&id);

        let sql = format!(
            "UPDATE {} SET {} WHERE id = ${} AND deleted_at IS NULL",
            entity.table(),
            assignments.join(", "),
            params.len()
        );

        let affected = self.client.execute(&sql, &params).await?;
        Ok(if affected == 0 {
            StoreAck::NotFound
        } else {
            StoreAck::Applied
        })
    }

    async fn delete(&self, entity: EntityKind, id: i64) -> Result<StoreAck> {
        let sql = format!(
            "UPDATE {} SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL",
            entity.table()
        );
        if self.client.execute(&sql, &[&id]).await? > 0 {
            return Ok(StoreAck::Applied);
        }

        // Nothing updated: either already deleted (idempotent success) or absent
        let exists = format!("SELECT 1 FROM {} WHERE id = $1", entity.table());
        Ok(match self.client.query_opt(&exists, &[&id]).await? {
            Some(_) => StoreAck::Applied,
            None => StoreAck::NotFound,
        })
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore")
            .field("closed", &self.client.is_closed())
            .finish()
    }
}
