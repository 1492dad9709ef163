use std::time::Duration;

use {
    serde::{Serialize, de::DeserializeOwned},
    serde_json::Value,
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tracing::{debug, warn},
};

use crate::{
    config::SessionDbConfig,
    data::SessionData,
    error::{Result, SessionError},
    store::{SessionStore, now_ms},
};

/// Absolute session deadline handed back to the session manager.
///
/// The empty value is a sentinel: no stored deadline to report, the
/// manager should apply its own default expiration policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifeTime(Option<i64>);

impl LifeTime {
    /// Sentinel: defer to the caller's default policy.
    pub const EMPTY: Self = Self(None);

    /// Deadline at the given unix-millisecond timestamp.
    pub fn at(expires_at_ms: i64) -> Self {
        Self(Some(expires_at_ms))
    }

    pub fn expires_at_ms(&self) -> Option<i64> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }
}

/// SQLite-backed session database, pluggable as a session manager's
/// storage backend.
///
/// Each session key owns one row holding its key/value bag and expiry
/// deadline. [`acquire`](Self::acquire) and the bag mutations wrap their
/// read-then-write in a transaction, so concurrent requests for the same
/// key either serialize or fail the compare-and-swap and can be retried.
#[derive(Debug, Clone)]
pub struct SessionDatabase {
    pool: SqlitePool,
    store: SessionStore,
}

impl SessionDatabase {
    /// Open a pool from the config and prepare the schema.
    pub async fn connect(config: &SessionDbConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .connect(&config.connect_url())
            .await?;
        Self::with_pool(pool, config).await
    }

    /// Adopt a pool owned by the embedding application. Still runs schema
    /// setup, which is idempotent.
    pub async fn with_pool(pool: SqlitePool, config: &SessionDbConfig) -> Result<Self> {
        let store = SessionStore::new(config)?;
        store.init(&pool).await?;
        Ok(Self { pool, store })
    }

    /// Create-or-fetch the row for `key` in one transaction.
    ///
    /// An existing session returns its stored deadline. A freshly created
    /// session (expiry `now + default_ttl`) returns [`LifeTime::EMPTY`] so
    /// the session manager applies its own policy; any transaction failure
    /// also degrades to the sentinel: session creation must never be
    /// blocked by a transient backend error. The fallback is reported
    /// through the log, not the return value.
    pub async fn acquire(&self, key: &str, default_ttl: Duration) -> LifeTime {
        match self.try_acquire(key, default_ttl).await {
            Ok(lifetime) => lifetime,
            Err(e) => {
                warn!(session = key, error = %e, "acquire fell back to default expiration");
                LifeTime::EMPTY
            }
        }
    }

    async fn try_acquire(&self, key: &str, default_ttl: Duration) -> Result<LifeTime> {
        let mut tx = self.pool.begin().await?;
        if let Some(record) = self.store.find(&mut *tx, key).await? {
            tx.commit().await?;
            return Ok(LifeTime::at(record.expires_at));
        }
        let expires_at = now_ms() + default_ttl.as_millis() as i64;
        self.store
            .insert(&mut *tx, key, &SessionData::new(), expires_at)
            .await?;
        tx.commit().await?;
        debug!(session = key, expires_at, "created session row");
        Ok(LifeTime::EMPTY)
    }

    /// Push the session's deadline to `now + new_ttl`.
    pub async fn update_expiration(&self, key: &str, new_ttl: Duration) -> Result<()> {
        let expires_at = now_ms() + new_ttl.as_millis() as i64;
        self.store.update_expiry(&self.pool, key, expires_at).await
    }

    /// Set one field of the session bag.
    ///
    /// Transactional read-modify-write: the whole bag is replaced under
    /// the version read in the same transaction, so sequentially committed
    /// writers to different fields never lose each other's updates. The
    /// same field is last-committer-wins.
    pub async fn set(&self, key: &str, field: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = self.store.find(&mut *tx, key).await? else {
            return Err(SessionError::not_found(key));
        };
        record.data.set(field, value);
        self.store
            .update_data(&mut *tx, key, &record.data, record.version)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Read one field. `Ok(None)` when the session or the field is
    /// absent; storage failures propagate so callers can tell "no
    /// session" from "storage is broken".
    pub async fn get(&self, key: &str, field: &str) -> Result<Option<Value>> {
        let Some(record) = self.store.find(&self.pool, key).await? else {
            return Ok(None);
        };
        Ok(record.data.get(field).cloned())
    }

    /// Read one field and decode it into `T`. A stored value that does
    /// not fit `T` is a [`SessionError::TypeMismatch`].
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Option<T>> {
        match self.get(key, field).await? {
            Some(value) => Ok(Some(SessionData::decode_value(&value)?)),
            None => Ok(None),
        }
    }

    /// Call `cb` once per field/value pair, in no particular order.
    pub async fn visit(&self, key: &str, cb: impl FnMut(&str, &Value)) -> Result<()> {
        let Some(record) = self.store.find(&self.pool, key).await? else {
            return Err(SessionError::not_found(key));
        };
        record.data.visit(cb);
        Ok(())
    }

    /// Number of fields in the session bag; 0 when the session is absent.
    pub async fn len(&self, key: &str) -> Result<usize> {
        let record = self.store.find(&self.pool, key).await?;
        Ok(record.map(|r| r.data.len()).unwrap_or(0))
    }

    /// Remove one field, best effort. `false` when the session is absent
    /// or the bag could not be persisted; persistence failures are logged,
    /// not raised.
    pub async fn delete(&self, key: &str, field: &str) -> bool {
        match self.try_delete(key, field).await {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(session = key, field, error = %e, "failed to delete session field");
                false
            }
        }
    }

    async fn try_delete(&self, key: &str, field: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = self.store.find(&mut *tx, key).await? else {
            return Ok(false);
        };
        record.data.remove(field);
        self.store
            .update_data(&mut *tx, key, &record.data, record.version)
            .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Drop every field but keep the session row alive.
    pub async fn clear(&self, key: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let Some(mut record) = self.store.find(&mut *tx, key).await? else {
            return Err(SessionError::not_found(key));
        };
        record.data.clear();
        self.store
            .update_data(&mut *tx, key, &record.data, record.version)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Destroy the session row entirely. Idempotent: releasing an absent
    /// session is not an error.
    pub async fn release(&self, key: &str) -> Result<()> {
        self.store.delete(&self.pool, key).await?;
        Ok(())
    }

    /// Close the underlying pool. Operations issued after this return
    /// storage errors.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
