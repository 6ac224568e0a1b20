use arc_swap::ArcSwap;
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Result;
use crate::webrtc::BandwidthLimit;

/// Key of the persisted bandwidth limit
pub const BANDWIDTH_LIMIT_KEY: &str = "bandwidthLimit";

/// Persisted settings backed by SQLite
///
/// Only the bandwidth limit survives restarts. Reads go through an
/// `ArcSwap` cache and never touch the database.
#[derive(Clone)]
pub struct ConfigStore {
    pool: Pool<Sqlite>,
    cache: Arc<ArcSwap<BandwidthLimit>>,
}

impl ConfigStore {
    /// Open (or create) the store
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(5))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let limit = Self::load_bandwidth_limit(&pool).await?;
        info!("Bandwidth limit: {} kb/s", limit);

        Ok(Self {
            pool,
            cache: Arc::new(ArcSwap::from_pointee(limit)),
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_bandwidth_limit(pool: &Pool<Sqlite>) -> Result<BandwidthLimit> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM config WHERE key = ?1")
            .bind(BANDWIDTH_LIMIT_KEY)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((value,)) => match value.parse() {
                Ok(limit) => Ok(limit),
                Err(e) => {
                    warn!("Ignoring stored bandwidth limit: {}", e);
                    Ok(BandwidthLimit::Unlimited)
                }
            },
            None => Ok(BandwidthLimit::Unlimited),
        }
    }

    /// Current bandwidth limit (lock-free)
    pub fn bandwidth_limit(&self) -> BandwidthLimit {
        **self.cache.load()
    }

    /// Persist a new bandwidth limit; takes effect at the next session start
    pub async fn set_bandwidth_limit(&self, limit: BandwidthLimit) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO config (key, value, updated_at)
            VALUES (?1, ?2, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')
            "#,
        )
        .bind(BANDWIDTH_LIMIT_KEY)
        .bind(limit.to_string())
        .execute(&self.pool)
        .await?;

        self.cache.store(Arc::new(limit));
        info!("Bandwidth limit set to {} kb/s", limit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::num::NonZeroU32;
    use tempfile::tempdir;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_defaults_to_unlimited() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&dir.path().join("test.db")).await.unwrap();
        assert_eq!(store.bandwidth_limit(), BandwidthLimit::Unlimited);
    }

    #[tokio::test]
    async fn test_bandwidth_limit_persists() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let limit = BandwidthLimit::Kbps(NonZeroU32::new(30).unwrap());

        let store = ConfigStore::new(&db_path).await.unwrap();
        assert_ok!(store.set_bandwidth_limit(limit).await);
        assert_eq!(store.bandwidth_limit(), limit);
        store.pool.close().await;

        let store2 = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(store2.bandwidth_limit(), limit);

        assert_ok!(store2.set_bandwidth_limit(BandwidthLimit::Unlimited).await);
        assert_eq!(store2.bandwidth_limit(), BandwidthLimit::Unlimited);
    }

    #[tokio::test]
    async fn test_corrupt_value_falls_back_to_unlimited() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let store = ConfigStore::new(&db_path).await.unwrap();
        sqlx::query("INSERT INTO config (key, value) VALUES (?1, 'fast')")
            .bind(BANDWIDTH_LIMIT_KEY)
            .execute(&store.pool)
            .await
            .unwrap();
        store.pool.close().await;

        let store2 = ConfigStore::new(&db_path).await.unwrap();
        assert_eq!(store2.bandwidth_limit(), BandwidthLimit::Unlimited);
    }
}
