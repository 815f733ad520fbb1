use async_trait::async_trait;
use betascan_core::{AppRecord, BetaStatus, HistoryEntry, InteractionRow, LedgerEntry};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::store::{AppRepository, CursorStore, InteractionSource, NotificationLedger, StoreError};

/// Postgres-backed store. Every method is a single statement; nothing here
/// opens a transaction, so concurrent scans interleave at statement level.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn parse_status(table: &'static str, raw: &str) -> Result<BetaStatus, StoreError> {
    raw.parse().map_err(|e: betascan_core::UnknownStatus| StoreError::Corrupt {
        table,
        detail: e.to_string(),
    })
}

fn app_from_row(row: &PgRow) -> Result<AppRecord, StoreError> {
    let status: String = row.try_get("status")?;
    Ok(AppRecord {
        id: Some(row.try_get("id")?),
        name_key: row.try_get("name_key")?,
        name: row.try_get("name")?,
        link: row.try_get("link")?,
        logo: row.try_get("logo")?,
        status: parse_status("apps", &status)?,
        click_count: row.try_get("click_count")?,
        description: row.try_get("description")?,
        categories: row.try_get("categories")?,
        screenshot_urls: row.try_get("screenshot_urls")?,
        features: row.try_get("features")?,
        app_store: row.try_get("app_store")?,
        artist_view_url: row.try_get("artist_view_url")?,
        seller_name: row.try_get("seller_name")?,
        content_rating: row.try_get("content_rating")?,
        primary_genre: row.try_get("primary_genre")?,
        artwork_url: row.try_get("artwork_url")?,
        last_checked: row.try_get("last_checked")?,
    })
}

#[async_trait]
impl AppRepository for PgStore {
    async fn find_app(&self, name_key: &str) -> Result<Option<AppRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name_key, name, link, logo, status, click_count, description,
                   categories, screenshot_urls, features, app_store, artist_view_url,
                   seller_name, content_rating, primary_genre, artwork_url, last_checked
              FROM apps
             WHERE name_key = $1
            "#,
        )
        .bind(name_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(app_from_row).transpose()
    }

    async fn upsert_app(&self, record: &AppRecord) -> Result<i64, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO apps (
                name_key, name, link, logo, status, click_count, description,
                categories, screenshot_urls, features, app_store, artist_view_url,
                seller_name, content_rating, primary_genre, artwork_url, last_checked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ON CONFLICT (name_key) DO UPDATE SET
                name = EXCLUDED.name,
                link = EXCLUDED.link,
                logo = EXCLUDED.logo,
                status = EXCLUDED.status,
                click_count = EXCLUDED.click_count,
                description = EXCLUDED.description,
                categories = EXCLUDED.categories,
                screenshot_urls = EXCLUDED.screenshot_urls,
                features = EXCLUDED.features,
                app_store = EXCLUDED.app_store,
                artist_view_url = EXCLUDED.artist_view_url,
                seller_name = EXCLUDED.seller_name,
                content_rating = EXCLUDED.content_rating,
                primary_genre = EXCLUDED.primary_genre,
                artwork_url = EXCLUDED.artwork_url,
                last_checked = EXCLUDED.last_checked
            RETURNING id
            "#,
        )
        .bind(&record.name_key)
        .bind(&record.name)
        .bind(&record.link)
        .bind(&record.logo)
        .bind(record.status.as_str())
        .bind(record.click_count)
        .bind(&record.description)
        .bind(&record.categories)
        .bind(&record.screenshot_urls)
        .bind(&record.features)
        .bind(&record.app_store)
        .bind(&record.artist_view_url)
        .bind(&record.seller_name)
        .bind(&record.content_rating)
        .bind(&record.primary_genre)
        .bind(&record.artwork_url)
        .bind(record.last_checked)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("id")?)
    }

    async fn insert_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO app_history (app_id, status, click_count, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(entry.app_id)
        .bind(entry.status.as_str())
        .bind(entry.click_count)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn history_ids_newest_first(&self, app_id: i64) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id
              FROM app_history
             WHERE app_id = $1
             ORDER BY recorded_at DESC, id DESC
            "#,
        )
        .bind(app_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<i64, _>("id").map_err(StoreError::from))
            .collect()
    }

    async fn delete_history(&self, ids: &[i64]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM app_history WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl CursorStore for PgStore {
    async fn cursor(&self, scan_key: &str) -> Result<u64, StoreError> {
        let position: Option<i64> =
            sqlx::query_scalar("SELECT position FROM scan_cursors WHERE scan_key = $1")
                .bind(scan_key)
                .fetch_optional(&self.pool)
                .await?;
        Ok(position.map(|p| u64::try_from(p).unwrap_or(0)).unwrap_or(0))
    }

    async fn set_cursor(&self, scan_key: &str, position: u64) -> Result<(), StoreError> {
        let position = i64::try_from(position).map_err(|_| StoreError::Corrupt {
            table: "scan_cursors",
            detail: format!("cursor {position} exceeds BIGINT"),
        })?;
        sqlx::query(
            r#"
            INSERT INTO scan_cursors (scan_key, position, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (scan_key) DO UPDATE SET
                position = EXCLUDED.position,
                updated_at = NOW()
            "#,
        )
        .bind(scan_key)
        .bind(position)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InteractionSource for PgStore {
    async fn interactions_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InteractionRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT name_key, click_count
              FROM user_interactions
             ORDER BY name_key
             LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<InteractionRow, StoreError> {
                Ok(InteractionRow {
                    name_key: row.try_get("name_key")?,
                    click_count: row.try_get("click_count")?,
                })
            })
            .collect()
    }

    async fn upsert_interaction(
        &self,
        name_key: &str,
        app_name: &str,
        click_count: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_interactions (name_key, app_name, click_count)
            VALUES ($1, $2, $3)
            ON CONFLICT (name_key) DO UPDATE SET
                app_name = EXCLUDED.app_name,
                click_count = EXCLUDED.click_count
            "#,
        )
        .bind(name_key)
        .bind(app_name)
        .bind(click_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl NotificationLedger for PgStore {
    async fn ledger_entry(&self, app_name: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let row = sqlx::query(
            "SELECT app_name, signature, recorded_at FROM notification_ledger WHERE app_name = $1",
        )
        .bind(app_name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<LedgerEntry, StoreError> {
            let recorded_at: DateTime<Utc> = row.try_get("recorded_at")?;
            Ok(LedgerEntry {
                app_name: row.try_get("app_name")?,
                signature: row.try_get("signature")?,
                recorded_at,
            })
        })
        .transpose()
    }

    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notification_ledger (app_name, signature, recorded_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (app_name) DO UPDATE SET
                signature = EXCLUDED.signature,
                recorded_at = EXCLUDED.recorded_at
            "#,
        )
        .bind(&entry.app_name)
        .bind(&entry.signature)
        .bind(entry.recorded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_ledger(&self, app_name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM notification_ledger WHERE app_name = $1")
            .bind(app_name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
