use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use betascan_core::{AppRecord, HistoryEntry, InteractionRow, LedgerEntry};
use tokio::sync::Mutex;

use crate::store::{AppRepository, CursorStore, InteractionSource, NotificationLedger, StoreError};

/// In-process store with the same semantics as [`crate::PgStore`].
/// Used for dry runs and tests; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    apps: BTreeMap<String, AppRecord>,
    next_app_id: i64,
    history: Vec<(i64, HistoryEntry)>,
    next_history_id: i64,
    interactions: BTreeMap<String, InteractionRow>,
    cursors: HashMap<String, u64>,
    ledger: HashMap<String, LedgerEntry>,
    failing_app_keys: HashSet<String>,
    interactions_unavailable: bool,
    ledger_unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_interactions<I, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let store = Self::new();
        {
            let mut state = store.state.lock().await;
            for (name_key, click_count) in rows {
                let name_key = name_key.into();
                state.interactions.insert(
                    name_key.clone(),
                    InteractionRow {
                        name_key,
                        click_count,
                    },
                );
            }
        }
        store
    }

    /// Make every write for `name_key` fail, as a flaky backend would.
    pub async fn fail_writes_for(&self, name_key: &str) {
        self.state
            .lock()
            .await
            .failing_app_keys
            .insert(name_key.to_string());
    }

    pub async fn fail_interaction_reads(&self) {
        self.state.lock().await.interactions_unavailable = true;
    }

    pub async fn fail_ledger(&self) {
        self.state.lock().await.ledger_unavailable = true;
    }

    pub async fn history_for(&self, app_id: i64) -> Vec<HistoryEntry> {
        let state = self.state.lock().await;
        state
            .history
            .iter()
            .filter(|(_, e)| e.app_id == app_id)
            .map(|(_, e)| e.clone())
            .collect()
    }

    pub async fn app_count(&self) -> usize {
        self.state.lock().await.apps.len()
    }
}

#[async_trait]
impl AppRepository for MemoryStore {
    async fn find_app(&self, name_key: &str) -> Result<Option<AppRecord>, StoreError> {
        Ok(self.state.lock().await.apps.get(name_key).cloned())
    }

    async fn upsert_app(&self, record: &AppRecord) -> Result<i64, StoreError> {
        let mut state = self.state.lock().await;
        if state.failing_app_keys.contains(&record.name_key) {
            return Err(StoreError::Unavailable(format!(
                "write rejected for {}",
                record.name_key
            )));
        }

        let id = match state.apps.get(&record.name_key).and_then(|r| r.id) {
            Some(id) => id,
            None => {
                state.next_app_id += 1;
                state.next_app_id
            }
        };
        let mut stored = record.clone();
        stored.id = Some(id);
        state.apps.insert(stored.name_key.clone(), stored);
        Ok(id)
    }

    async fn insert_history(&self, entry: &HistoryEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.next_history_id += 1;
        let id = state.next_history_id;
        state.history.push((id, entry.clone()));
        Ok(())
    }

    async fn history_ids_newest_first(&self, app_id: i64) -> Result<Vec<i64>, StoreError> {
        let state = self.state.lock().await;
        let mut rows = state
            .history
            .iter()
            .filter(|(_, e)| e.app_id == app_id)
            .map(|(id, e)| (e.recorded_at, *id))
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.cmp(a));
        Ok(rows.into_iter().map(|(_, id)| id).collect())
    }

    async fn delete_history(&self, ids: &[i64]) -> Result<(), StoreError> {
        let doomed = ids.iter().copied().collect::<HashSet<_>>();
        self.state
            .lock()
            .await
            .history
            .retain(|(id, _)| !doomed.contains(id));
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn cursor(&self, scan_key: &str) -> Result<u64, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .cursors
            .get(scan_key)
            .copied()
            .unwrap_or(0))
    }

    async fn set_cursor(&self, scan_key: &str, position: u64) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .cursors
            .insert(scan_key.to_string(), position);
        Ok(())
    }
}

#[async_trait]
impl InteractionSource for MemoryStore {
    async fn interactions_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<InteractionRow>, StoreError> {
        let state = self.state.lock().await;
        if state.interactions_unavailable {
            return Err(StoreError::Unavailable("user_interactions".into()));
        }
        Ok(state
            .interactions
            .values()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn upsert_interaction(
        &self,
        name_key: &str,
        _app_name: &str,
        click_count: i64,
    ) -> Result<(), StoreError> {
        self.state.lock().await.interactions.insert(
            name_key.to_string(),
            InteractionRow {
                name_key: name_key.to_string(),
                click_count,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl NotificationLedger for MemoryStore {
    async fn ledger_entry(&self, app_name: &str) -> Result<Option<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        if state.ledger_unavailable {
            return Err(StoreError::Unavailable("notification_ledger".into()));
        }
        Ok(state.ledger.get(app_name).cloned())
    }

    async fn record_ledger(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.ledger_unavailable {
            return Err(StoreError::Unavailable("notification_ledger".into()));
        }
        state.ledger.insert(entry.app_name.clone(), entry.clone());
        Ok(())
    }

    async fn clear_ledger(&self, app_name: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.ledger_unavailable {
            return Err(StoreError::Unavailable("notification_ledger".into()));
        }
        state.ledger.remove(app_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use betascan_core::{BetaStatus, CatalogEntry};
    use chrono::Utc;

    #[tokio::test]
    async fn upsert_keeps_id_stable_per_key() {
        let store = MemoryStore::new();
        let mut record = AppRecord::from_catalog(
            &CatalogEntry::new("Acme", "https://t/1"),
            3,
            BetaStatus::Unknown,
            Utc::now(),
        );
        let first = store.upsert_app(&record).await.unwrap();
        record.status = BetaStatus::Open;
        let second = store.upsert_app(&record).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.app_count().await, 1);
        assert_eq!(
            store.find_app("acme").await.unwrap().unwrap().status,
            BetaStatus::Open
        );
    }

    #[tokio::test]
    async fn cursor_defaults_to_zero_then_upserts() {
        let store = MemoryStore::new();
        assert_eq!(store.cursor("lastChecked_check_apps").await.unwrap(), 0);
        store.set_cursor("lastChecked_check_apps", 7).await.unwrap();
        store.set_cursor("lastChecked_check_apps", 9).await.unwrap();
        assert_eq!(store.cursor("lastChecked_check_apps").await.unwrap(), 9);
    }

    #[tokio::test]
    async fn interaction_pages_are_ordered_and_bounded() {
        let store = MemoryStore::with_interactions([("c", 1), ("a", 2), ("b", 3)]).await;
        let first = store.interactions_page(0, 2).await.unwrap();
        let rest = store.interactions_page(2, 2).await.unwrap();
        assert_eq!(
            first.iter().map(|r| r.name_key.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].name_key, "c");
    }
}
