use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::{Executor, FromRow, Sqlite, SqlitePool};

use crate::{
    config::SessionDbConfig,
    data::SessionData,
    error::{Result, SessionError},
};

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Raw session row as selected from the table.
#[derive(Debug, FromRow)]
struct SessionRow {
    session_key: String,
    session_data: String,
    expires_at: i64,
    version: i64,
    created_at: i64,
    updated_at: i64,
}

/// One session's persisted state, with the data cell decoded.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub key: String,
    pub data: SessionData,
    /// Absolute deadline, unix milliseconds. Advisory: the session manager
    /// compares it against its own clock; nothing here reaps expired rows.
    pub expires_at: i64,
    /// Bumped on every bag replace; guards the compare-and-swap update.
    pub version: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<SessionRow> for SessionRecord {
    type Error = SessionError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Self {
            key: row.session_key,
            data: SessionData::decode(&row.session_data)?,
            expires_at: row.expires_at,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Physical CRUD over the session table, one row per session key.
///
/// Every method is generic over the executor, so callers pass either the
/// pool or an open transaction and the statement joins whatever isolation
/// the caller set up.
#[derive(Debug, Clone)]
pub struct SessionStore {
    table: String,
}

impl SessionStore {
    pub fn new(config: &SessionDbConfig) -> Result<Self> {
        Ok(Self {
            table: config.validated_table_name()?.to_string(),
        })
    }

    /// Create the session table if it doesn't exist.
    pub async fn init(&self, pool: &SqlitePool) -> Result<()> {
        sqlx::query(&format!(
            r#"CREATE TABLE IF NOT EXISTS {} (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                session_key  TEXT NOT NULL UNIQUE,
                session_data TEXT NOT NULL DEFAULT '{{}}',
                expires_at   INTEGER NOT NULL,
                version      INTEGER NOT NULL DEFAULT 0,
                created_at   INTEGER NOT NULL,
                updated_at   INTEGER NOT NULL,
                deleted_at   INTEGER
            )"#,
            self.table
        ))
        .execute(pool)
        .await?;
        tracing::debug!(table = %self.table, "session table ready");
        Ok(())
    }

    /// Look up the live row for `key`. Found, absent, and failure are
    /// three distinct outcomes; nothing is coalesced here.
    pub async fn find<'e, E>(&self, executor: E, key: &str) -> Result<Option<SessionRecord>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT session_key, session_data, expires_at, version, created_at, updated_at \
             FROM {} WHERE session_key = ? AND deleted_at IS NULL LIMIT 1",
            self.table
        );
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(key)
            .fetch_optional(executor)
            .await?;
        row.map(SessionRecord::try_from).transpose()
    }

    /// Create the row for `key`. The unique constraint on `session_key`
    /// turns a duplicate into [`SessionError::Conflict`].
    pub async fn insert<'e, E>(
        &self,
        executor: E,
        key: &str,
        data: &SessionData,
        expires_at: i64,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = now_ms();
        let sql = format!(
            "INSERT INTO {} (session_key, session_data, expires_at, version, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?)",
            self.table
        );
        let inserted = sqlx::query(&sql)
            .bind(key)
            .bind(data.encode())
            .bind(expires_at)
            .bind(now)
            .bind(now)
            .execute(executor)
            .await;
        match inserted {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(SessionError::conflict(key)),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the stored bag, guarded by the version the caller read.
    /// Callers establish existence with [`find`](Self::find) inside the
    /// same transaction, so a zero-row update means the snapshot went
    /// stale and surfaces as [`SessionError::Conflict`].
    pub async fn update_data<'e, E>(
        &self,
        executor: E,
        key: &str,
        data: &SessionData,
        expected_version: i64,
    ) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "UPDATE {} SET session_data = ?, version = version + 1, updated_at = ? \
             WHERE session_key = ? AND version = ? AND deleted_at IS NULL",
            self.table
        );
        let updated = sqlx::query(&sql)
            .bind(data.encode())
            .bind(now_ms())
            .bind(key)
            .bind(expected_version)
            .execute(executor)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SessionError::conflict(key));
        }
        Ok(())
    }

    /// Replace the expiry field only.
    pub async fn update_expiry<'e, E>(&self, executor: E, key: &str, expires_at: i64) -> Result<()>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "UPDATE {} SET expires_at = ?, updated_at = ? \
             WHERE session_key = ? AND deleted_at IS NULL",
            self.table
        );
        let updated = sqlx::query(&sql)
            .bind(expires_at)
            .bind(now_ms())
            .bind(key)
            .execute(executor)
            .await?;
        if updated.rows_affected() == 0 {
            return Err(SessionError::not_found(key));
        }
        Ok(())
    }

    /// Hard-delete the row. Returns the number of rows removed; 0 is not
    /// an error.
    pub async fn delete<'e, E>(&self, executor: E, key: &str) -> Result<u64>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!("DELETE FROM {} WHERE session_key = ?", self.table);
        let deleted = sqlx::query(&sql).bind(key).execute(executor).await?;
        Ok(deleted.rows_affected())
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn store() -> (SqlitePool, SessionStore) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SessionStore::new(&SessionDbConfig::in_memory()).unwrap();
        store.init(&pool).await.unwrap();
        (pool, store)
    }

    #[tokio::test]
    async fn init_is_idempotent() {
        let (pool, store) = store().await;
        store.init(&pool).await.unwrap();
    }

    #[tokio::test]
    async fn insert_then_find() {
        let (pool, store) = store().await;
        let mut data = SessionData::new();
        data.set("a", json!(1));
        store.insert(&pool, "sid-1", &data, 42_000).await.unwrap();

        let record = store.find(&pool, "sid-1").await.unwrap().unwrap();
        assert_eq!(record.key, "sid-1");
        assert_eq!(record.data, data);
        assert_eq!(record.expires_at, 42_000);
        assert_eq!(record.version, 0);
        assert!(record.created_at > 0);

        assert!(store.find(&pool, "sid-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_conflict() {
        let (pool, store) = store().await;
        let data = SessionData::new();
        store.insert(&pool, "sid-1", &data, 1).await.unwrap();
        assert!(matches!(
            store.insert(&pool, "sid-1", &data, 2).await,
            Err(SessionError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn stale_version_replace_is_a_conflict() {
        let (pool, store) = store().await;
        let mut data = SessionData::new();
        store.insert(&pool, "sid-1", &data, 1).await.unwrap();

        data.set("a", json!("x"));
        store.update_data(&pool, "sid-1", &data, 0).await.unwrap();

        // The replace bumped the version, so the old snapshot is stale.
        assert!(matches!(
            store.update_data(&pool, "sid-1", &data, 0).await,
            Err(SessionError::Conflict { .. })
        ));
        let record = store.find(&pool, "sid-1").await.unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.data, data);
    }

    #[tokio::test]
    async fn update_expiry_requires_a_row() {
        let (pool, store) = store().await;
        assert!(matches!(
            store.update_expiry(&pool, "nope", 9).await,
            Err(SessionError::NotFound { .. })
        ));

        store
            .insert(&pool, "sid-1", &SessionData::new(), 1)
            .await
            .unwrap();
        store.update_expiry(&pool, "sid-1", 99_000).await.unwrap();
        let record = store.find(&pool, "sid-1").await.unwrap().unwrap();
        assert_eq!(record.expires_at, 99_000);
    }

    #[tokio::test]
    async fn delete_reports_rows_removed() {
        let (pool, store) = store().await;
        store
            .insert(&pool, "sid-1", &SessionData::new(), 1)
            .await
            .unwrap();
        assert_eq!(store.delete(&pool, "sid-1").await.unwrap(), 1);
        assert_eq!(store.delete(&pool, "sid-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn custom_table_name() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let config = SessionDbConfig::in_memory().with_table_name("web_sessions");
        let store = SessionStore::new(&config).unwrap();
        store.init(&pool).await.unwrap();
        store
            .insert(&pool, "sid-1", &SessionData::new(), 1)
            .await
            .unwrap();
        assert!(store.find(&pool, "sid-1").await.unwrap().is_some());
    }
}
