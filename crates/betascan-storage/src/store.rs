use async_trait::async_trait;
use betascan_core::{AppRecord, HistoryEntry, InteractionRow, LedgerEntry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("corrupt row in {table}: {detail}")]
    Corrupt { table: &'static str, detail: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// App rows keyed by normalized name, plus their append-only history.
#[async_trait]
pub trait AppRepository: Send + Sync {
    async fn find_app(&self, name_key: &str) -> Result<Option<AppRecord>, StoreError>;

    /// Insert or update by `name_key`; returns the row id.
    async fn upsert_app(&self, record: &AppRecord) -> Result<i64, StoreError>;

    async fn insert_history(&self, entry: &HistoryEntry) -> Result<(), StoreError>;

    async fn history_ids_newest_first(&self, app_id: i64) -> Result<Vec<i64>, StoreError>;

    async fn delete_history(&self, ids: &[i64]) -> Result<(), StoreError>;
}

/// One rotating offset per scan kind.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Stored position, or 0 when the key has never been written.
    async fn cursor(&self, scan_key: &str) -> Result<u64, StoreError>;

    async fn set_cursor(&self, scan_key: &str, position: u64) -> Result<(), StoreError>;
}

/// Accumulated click counts, read a page at a time in stable key order.
#[async_trait]
pub trait InteractionSource: Send + Sync {
    async fn interactions_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InteractionRow>, StoreError>;

    async fn upsert_interaction(
        &self,
        name_key: &str,
        app_name: &str,
        click_count: i64,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait NotificationLedger: Send + Sync {
    async fn ledger_entry(&self, app_name: &str) -> Result<Option<LedgerEntry>, StoreError>;

    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError>;

    async fn clear_ledger(&self, app_name: &str) -> Result<(), StoreError>;
}

/// Everything a scan needs from durable state.
pub trait Store: AppRepository + CursorStore + InteractionSource + NotificationLedger {}

impl<T> Store for T where T: AppRepository + CursorStore + InteractionSource + NotificationLedger {}
