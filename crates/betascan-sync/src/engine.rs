use std::sync::Arc;
use std::time::Duration;

use betascan_adapters::{CatalogError, CatalogFormat};
use betascan_core::{
    is_placeholder_description, normalize_name, transition_signature, AppRecord, BetaStatus,
    CatalogEntry, HistoryEntry, LedgerEntry, NotifyItem, ScanReport, HISTORY_RETENTION,
};
use betascan_storage::{
    AppRepository, CursorStore, FetchError, NotificationLedger, Store, StoreError,
};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::catalog::CatalogSource;
use crate::enrich::{Enricher, NoopEnricher};
use crate::notify::Notifier;
use crate::popularity::{load_popularity, PopularityMap};
use crate::probe::StatusProbe;

pub const DEFAULT_PROBE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_EXAMINE_FACTOR: usize = 10;
pub const DEFAULT_EXAMINE_CAP: usize = 20;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("fetching catalog {url} failed: {source}")]
    UpstreamFetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("parsing catalog {url} failed: {source}")]
    CatalogParse {
        url: String,
        #[source]
        source: CatalogError,
    },
    #[error("loading popularity failed: {0}")]
    PopularityLoad(#[source] StoreError),
    #[error("cursor {scan_key} unavailable: {source}")]
    Cursor {
        scan_key: String,
        #[source]
        source: StoreError,
    },
    #[error("catalog has no apps")]
    EmptyCatalog,
}

/// Parameters of one scan invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub scan_key: String,
    pub click_threshold: i64,
    pub max_to_admit: usize,
    pub examine_factor: usize,
    pub examine_cap: usize,
    pub notify: bool,
    pub notify_url: Option<String>,
}

impl ScanRequest {
    pub fn new(scan_key: impl Into<String>, click_threshold: i64, max_to_admit: usize) -> Self {
        Self {
            scan_key: scan_key.into(),
            click_threshold,
            max_to_admit,
            examine_factor: DEFAULT_EXAMINE_FACTOR,
            examine_cap: DEFAULT_EXAMINE_CAP,
            notify: true,
            notify_url: None,
        }
    }

    /// Most candidates one scan may look at.
    pub fn examine_budget(&self, catalog_len: usize) -> usize {
        self.max_to_admit
            .saturating_mul(self.examine_factor)
            .min(self.examine_cap)
            .min(catalog_len)
    }
}

/// Rotating-cursor scan over a catalog: admits popular apps, probes them,
/// merges against stored state and batches qualifying transitions.
pub struct Reconciler {
    store: Arc<dyn Store>,
    catalog: Box<dyn CatalogSource>,
    probe: Box<dyn StatusProbe>,
    enricher: Box<dyn Enricher>,
    notifier: Box<dyn Notifier>,
    probe_delay: Duration,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn Store>,
        catalog: Box<dyn CatalogSource>,
        probe: Box<dyn StatusProbe>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            catalog,
            probe,
            enricher: Box::<NoopEnricher>::default(),
            notifier,
            probe_delay: DEFAULT_PROBE_DELAY,
        }
    }

    pub fn with_enricher(mut self, enricher: Box<dyn Enricher>) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub async fn load_catalog(
        &self,
        url: &str,
        format: CatalogFormat,
    ) -> Result<Vec<CatalogEntry>, ScanError> {
        self.catalog.load(url, format).await
    }

    /// Fetch the catalog at `url`, then reconcile it.
    pub async fn run_scan(
        &self,
        url: &str,
        format: CatalogFormat,
        request: &ScanRequest,
    ) -> Result<ScanReport, ScanError> {
        let span = info_span!("scan", scan_key = %request.scan_key, url);
        async {
            let catalog = self.catalog.load(url, format).await?;
            self.reconcile(&catalog, request).await
        }
        .instrument(span)
        .await
    }

    pub async fn reconcile(
        &self,
        catalog: &[CatalogEntry],
        request: &ScanRequest,
    ) -> Result<ScanReport, ScanError> {
        if catalog.is_empty() {
            return Err(ScanError::EmptyCatalog);
        }
        let started_at = Utc::now();
        let len = catalog.len();

        let stored_cursor = self
            .store
            .cursor(&request.scan_key)
            .await
            .map_err(|source| ScanError::Cursor {
                scan_key: request.scan_key.clone(),
                source,
            })?;
        let start = (stored_cursor % len as u64) as usize;
        let popularity = load_popularity(self.store.as_ref())
            .await
            .map_err(ScanError::PopularityLoad)?;

        let budget = request.examine_budget(len);
        let mut examined = 0usize;
        let mut admitted = 0usize;
        let mut below_threshold = 0usize;
        let mut updated = 0usize;
        let mut batch = Vec::new();

        while examined < budget && admitted < request.max_to_admit {
            let entry = &catalog[(start + examined) % len];
            examined += 1;

            let name_key = normalize_name(&entry.name);
            let clicks = popularity.clicks(&name_key);
            if clicks < request.click_threshold {
                debug!(app = %entry.name, clicks, "below click threshold");
                below_threshold += 1;
                continue;
            }
            admitted += 1;

            match self.reconcile_candidate(entry, clicks, request, &mut batch).await {
                Ok(true) => updated += 1,
                Ok(false) => {}
                Err(err) => warn!(app = %entry.name, error = %err, "store operation failed; candidate skipped"),
            }
        }

        let next_cursor = advance_cursor(start, examined, len);
        self.store
            .set_cursor(&request.scan_key, next_cursor as u64)
            .await
            .map_err(|source| ScanError::Cursor {
                scan_key: request.scan_key.clone(),
                source,
            })?;

        let mut dispatch = Vec::new();
        let mut notifications_sent = 0;
        if request.notify && !batch.is_empty() {
            dispatch = self
                .notifier
                .dispatch(&batch, request.notify_url.as_deref())
                .await;
            if dispatch.iter().any(|r| r.success) {
                notifications_sent = batch.len();
            } else {
                warn!(queued = batch.len(), "no notification channel accepted the batch");
            }
        }

        info!(
            examined,
            admitted,
            below_threshold,
            updated,
            notifications_sent,
            next_cursor,
            "scan finished"
        );
        Ok(ScanReport {
            run_id: Uuid::new_v4(),
            scan_key: request.scan_key.clone(),
            started_at,
            finished_at: Utc::now(),
            catalog_len: len,
            start_cursor: start,
            next_cursor,
            click_threshold: request.click_threshold,
            examined,
            admitted,
            below_threshold,
            updated,
            notifications_sent,
            dispatch,
        })
    }

    /// Probe, merge and persist one admitted app. `Ok(true)` when a write happened.
    async fn reconcile_candidate(
        &self,
        entry: &CatalogEntry,
        clicks: i64,
        request: &ScanRequest,
        batch: &mut Vec<NotifyItem>,
    ) -> Result<bool, StoreError> {
        let now = Utc::now();
        let stored = self.store.find_app(&normalize_name(&entry.name)).await?;

        let mut candidate = AppRecord::from_catalog(entry, clicks, BetaStatus::Unknown, now);
        if let Some(prev) = &stored {
            inherit_missing(&mut candidate, prev);
        }
        if candidate.needs_enrichment() {
            candidate = self.enricher.enrich(candidate).await;
        }

        candidate.status = self.probe.probe(&candidate.link).await;
        if !self.probe_delay.is_zero() {
            tokio::time::sleep(self.probe_delay).await;
        }

        let Some(prev) = stored else {
            let app_id = self.store.upsert_app(&candidate).await?;
            self.record_history(app_id, &candidate).await;
            info!(app = %candidate.name, status = %candidate.status, "app created");
            return Ok(true);
        };

        if prev.same_tracked_fields(&candidate) {
            debug!(app = %candidate.name, "unchanged");
            return Ok(false);
        }

        // Once the row is written the candidate counts as updated; the
        // history and ledger writes below only log on failure.
        candidate.id = prev.id;
        let app_id = self.store.upsert_app(&candidate).await?;
        self.record_history(app_id, &candidate).await;

        if BetaStatus::is_qualifying_transition(prev.status, candidate.status) {
            if request.notify {
                self.queue_notification(&prev, &candidate, batch).await;
            }
        } else if candidate.status != BetaStatus::Open && candidate.status != prev.status {
            if let Err(err) = self.store.clear_ledger(&candidate.name).await {
                warn!(app = %candidate.name, error = %err, "clearing notification ledger failed");
            }
        }
        Ok(true)
    }

    async fn record_history(&self, app_id: i64, record: &AppRecord) {
        if let Err(err) = append_history(self.store.as_ref(), app_id, record).await {
            warn!(app = %record.name, error = %err, "history write failed");
        }
    }

    /// The ledger only suppresses repeats; when it cannot be read or
    /// written the item is still queued.
    async fn queue_notification(&self, prev: &AppRecord, next: &AppRecord, batch: &mut Vec<NotifyItem>) {
        let signature = transition_signature(prev.status, next.status);
        match self.store.ledger_entry(&next.name).await {
            Ok(Some(seen)) if seen.signature == signature => {
                info!(app = %next.name, %signature, "transition already notified");
                return;
            }
            Ok(_) => {}
            Err(err) => warn!(app = %next.name, error = %err, "notification ledger unreadable"),
        }

        let now = Utc::now();
        let entry = LedgerEntry {
            app_name: next.name.clone(),
            signature: signature.clone(),
            recorded_at: now,
        };
        if let Err(err) = self.store.record_ledger(&entry).await {
            warn!(app = %next.name, error = %err, "notification ledger write failed");
        }
        info!(app = %next.name, %signature, "qualifying transition");
        batch.push(NotifyItem::from_record(next, now));
    }
}

pub fn advance_cursor(start: usize, examined: usize, catalog_len: usize) -> usize {
    if catalog_len == 0 {
        return 0;
    }
    (start + examined) % catalog_len
}

/// Record one history sample, then drop everything past the retention window.
pub async fn append_history(
    store: &dyn Store,
    app_id: i64,
    record: &AppRecord,
) -> Result<(), StoreError> {
    store
        .insert_history(&HistoryEntry {
            app_id,
            status: record.status,
            click_count: record.click_count,
            recorded_at: record.last_checked,
        })
        .await?;
    let ids = store.history_ids_newest_first(app_id).await?;
    if ids.len() > HISTORY_RETENTION {
        store.delete_history(&ids[HISTORY_RETENTION..]).await?;
    }
    Ok(())
}

/// Catalog rows often omit metadata the stored record already has.
fn inherit_missing(candidate: &mut AppRecord, stored: &AppRecord) {
    fn fill(target: &mut String, from: &str) {
        if target.is_empty() {
            *target = from.to_string();
        }
    }
    fn fill_list(target: &mut Vec<String>, from: &[String]) {
        if target.is_empty() {
            *target = from.to_vec();
        }
    }

    if is_placeholder_description(&candidate.description)
        && !is_placeholder_description(&stored.description)
    {
        candidate.description = stored.description.clone();
    }
    fill(&mut candidate.link, &stored.link);
    fill(&mut candidate.logo, &stored.logo);
    fill(&mut candidate.app_store, &stored.app_store);
    fill(&mut candidate.artist_view_url, &stored.artist_view_url);
    fill(&mut candidate.seller_name, &stored.seller_name);
    fill(&mut candidate.content_rating, &stored.content_rating);
    fill(&mut candidate.primary_genre, &stored.primary_genre);
    fill(&mut candidate.artwork_url, &stored.artwork_url);
    fill_list(&mut candidate.categories, &stored.categories);
    fill_list(&mut candidate.screenshot_urls, &stored.screenshot_urls);
    fill_list(&mut candidate.features, &stored.features);
}

/// Popularity map for ad-hoc inspection outside a scan.
pub async fn current_popularity(store: &dyn Store) -> Result<PopularityMap, ScanError> {
    load_popularity(store).await.map_err(ScanError::PopularityLoad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use betascan_core::DispatchResult;
    use betascan_storage::{AppRepository, CursorStore, MemoryStore};
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct StaticCatalog(Vec<CatalogEntry>);

    #[async_trait]
    impl CatalogSource for StaticCatalog {
        async fn load(&self, _url: &str, _format: CatalogFormat) -> Result<Vec<CatalogEntry>, ScanError> {
            Ok(self.0.clone())
        }
    }

    #[derive(Clone, Default)]
    struct ScriptedProbe {
        pages: Arc<Mutex<HashMap<String, BetaStatus>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedProbe {
        fn set(&self, link: &str, status: BetaStatus) {
            self.pages.lock().unwrap().insert(link.to_string(), status);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl StatusProbe for ScriptedProbe {
        async fn probe(&self, link: &str) -> BetaStatus {
            self.calls.lock().unwrap().push(link.to_string());
            self.pages
                .lock()
                .unwrap()
                .get(link)
                .copied()
                .unwrap_or(BetaStatus::Unknown)
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        batches: Arc<Mutex<Vec<Vec<NotifyItem>>>>,
    }

    impl RecordingNotifier {
        fn batches(&self) -> Vec<Vec<NotifyItem>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn dispatch(&self, batch: &[NotifyItem], _target: Option<&str>) -> Vec<DispatchResult> {
            self.batches.lock().unwrap().push(batch.to_vec());
            vec![DispatchResult {
                channel: "webhook".into(),
                success: true,
                message: "ok".into(),
                status_code: Some(200),
                response: None,
            }]
        }
    }

    struct RejectingNotifier;

    #[async_trait]
    impl Notifier for RejectingNotifier {
        async fn dispatch(&self, _batch: &[NotifyItem], _target: Option<&str>) -> Vec<DispatchResult> {
            vec![DispatchResult {
                channel: "webhook".into(),
                success: false,
                message: "HTTP 503".into(),
                status_code: Some(503),
                response: None,
            }]
        }
    }

    #[derive(Clone, Default)]
    struct FillingEnricher {
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Enricher for FillingEnricher {
        async fn enrich(&self, mut record: AppRecord) -> AppRecord {
            self.calls.lock().unwrap().push(record.name.clone());
            record.description = format!("{} from search", record.name);
            record
        }
    }

    struct Harness {
        store: Arc<MemoryStore>,
        probe: ScriptedProbe,
        notifier: RecordingNotifier,
        reconciler: Reconciler,
    }

    fn harness(store: MemoryStore) -> Harness {
        let store = Arc::new(store);
        let probe = ScriptedProbe::default();
        let notifier = RecordingNotifier::default();
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticCatalog(Vec::new())),
            Box::new(probe.clone()),
            Box::new(notifier.clone()),
        )
        .with_probe_delay(Duration::ZERO);
        Harness {
            store,
            probe,
            notifier,
            reconciler,
        }
    }

    fn catalog(names: &[&str]) -> Vec<CatalogEntry> {
        names
            .iter()
            .map(|n| CatalogEntry::new(*n, format!("https://t/{}", n.to_lowercase())))
            .collect()
    }

    async fn seed_app(store: &MemoryStore, name: &str, clicks: i64, status: BetaStatus) {
        let entry = CatalogEntry::new(name, format!("https://t/{}", name.to_lowercase()));
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        store
            .upsert_app(&AppRecord::from_catalog(&entry, clicks, status, ts))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn only_popular_app_is_probed_and_its_opening_notified() {
        let h = harness(MemoryStore::with_interactions([("a", 25), ("b", 5)]).await);
        seed_app(&h.store, "A", 25, BetaStatus::Unknown).await;
        h.probe.set("https://t/a", BetaStatus::Open);

        let report = h
            .reconciler
            .reconcile(&catalog(&["A", "B"]), &ScanRequest::new("lastChecked_test", 10, 1))
            .await
            .unwrap();

        assert_eq!(h.probe.calls(), vec!["https://t/a".to_string()]);
        assert_eq!(report.examined, 1);
        assert_eq!(report.admitted, 1);
        assert_eq!(report.updated, 1);
        assert_eq!(report.notifications_sent, 1);
        assert_eq!(report.next_cursor, 1);
        let batches = h.notifier.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].name, "A");
        assert_eq!(batches[0][0].status, BetaStatus::Open);
        assert_eq!(
            h.store.find_app("a").await.unwrap().unwrap().status,
            BetaStatus::Open
        );
    }

    #[tokio::test]
    async fn cursor_advances_by_examined_not_admitted() {
        let h = harness(MemoryStore::new());
        h.store.set_cursor("k", 8).await.unwrap();
        let names = ["A", "B", "C", "D", "E", "F", "G", "H", "I", "J"];
        let mut request = ScanRequest::new("k", 10, 1);
        request.examine_factor = 5;

        let report = h.reconciler.reconcile(&catalog(&names), &request).await.unwrap();

        assert_eq!(report.start_cursor, 8);
        assert_eq!(report.examined, 5);
        assert_eq!(report.below_threshold, 5);
        assert_eq!(report.admitted, 0);
        assert_eq!(report.next_cursor, 3);
        assert_eq!(h.store.cursor("k").await.unwrap(), 3);
        assert!(h.probe.calls().is_empty());
    }

    #[tokio::test]
    async fn stored_cursor_is_taken_modulo_current_catalog() {
        let h = harness(MemoryStore::new());
        h.store.set_cursor("k", 23).await.unwrap();
        let mut request = ScanRequest::new("k", 1, 1);
        request.examine_factor = 1;

        let report = h
            .reconciler
            .reconcile(&catalog(&["A", "B", "C", "D", "E"]), &request)
            .await
            .unwrap();
        assert_eq!(report.start_cursor, 3);
        assert_eq!(report.next_cursor, 4);
    }

    #[tokio::test]
    async fn unchanged_app_writes_nothing() {
        let h = harness(MemoryStore::with_interactions([("a", 12)]).await);
        h.probe.set("https://t/a", BetaStatus::Full);
        let request = ScanRequest::new("k", 10, 1);

        let first = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        let second = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();

        assert_eq!(first.updated, 1);
        assert_eq!(second.updated, 0);
        let app_id = h.store.find_app("a").await.unwrap().unwrap().id.unwrap();
        assert_eq!(h.store.history_for(app_id).await.len(), 1);
    }

    #[tokio::test]
    async fn new_app_is_created_without_notifying() {
        let h = harness(MemoryStore::with_interactions([("a", 12)]).await);
        h.probe.set("https://t/a", BetaStatus::Open);

        let report = h
            .reconciler
            .reconcile(&catalog(&["A"]), &ScanRequest::new("k", 10, 1))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.notifications_sent, 0);
        assert!(h.notifier.batches().is_empty());
        assert_eq!(h.store.app_count().await, 1);
    }

    #[tokio::test]
    async fn repeated_transition_is_dispatched_once() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        seed_app(&h.store, "A", 30, BetaStatus::Unknown).await;
        h.probe.set("https://t/a", BetaStatus::Open);
        let request = ScanRequest::new("k", 10, 1);

        h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        // Another writer puts the old status back; the same transition shows up again.
        seed_app(&h.store, "A", 30, BetaStatus::Unknown).await;
        let second = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();

        assert_eq!(second.updated, 1);
        assert_eq!(second.notifications_sent, 0);
        assert_eq!(h.notifier.batches().len(), 1);
    }

    #[tokio::test]
    async fn closing_clears_ledger_so_reopening_notifies_again() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        seed_app(&h.store, "A", 30, BetaStatus::Full).await;
        let request = ScanRequest::new("k", 10, 1);

        for status in [BetaStatus::Open, BetaStatus::Full, BetaStatus::Open] {
            h.probe.set("https://t/a", status);
            h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        }

        let batches = h.notifier.batches();
        assert_eq!(batches.len(), 2);
        assert!(h.store.ledger_entry("A").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn disabled_notifications_touch_neither_ledger_nor_notifier() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        seed_app(&h.store, "A", 30, BetaStatus::Full).await;
        h.probe.set("https://t/a", BetaStatus::Open);
        let mut request = ScanRequest::new("k", 0, 20);
        request.notify = false;

        let report = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        assert_eq!(report.updated, 1);
        assert!(report.dispatch.is_empty());
        assert!(h.notifier.batches().is_empty());
        assert!(h.store.ledger_entry("A").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_keeps_thirty_newest_entries() {
        let store = MemoryStore::new();
        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).single().unwrap();
        let mut record = AppRecord::from_catalog(&CatalogEntry::new("A", "l"), 1, BetaStatus::Open, base);
        let app_id = store.upsert_app(&record).await.unwrap();

        for i in 0..31 {
            record.last_checked = base + chrono::Duration::minutes(i);
            record.click_count = i;
            append_history(&store, app_id, &record).await.unwrap();
        }

        let history = store.history_for(app_id).await;
        assert_eq!(history.len(), HISTORY_RETENTION);
        assert!(history.iter().all(|e| e.click_count >= 1));
    }

    #[tokio::test]
    async fn failed_write_is_isolated_to_its_app() {
        let h = harness(MemoryStore::with_interactions([("a", 30), ("b", 30)]).await);
        h.store.fail_writes_for("a").await;

        let report = h
            .reconciler
            .reconcile(&catalog(&["A", "B"]), &ScanRequest::new("k", 10, 2))
            .await
            .unwrap();

        assert_eq!(report.admitted, 2);
        assert_eq!(report.updated, 1);
        assert!(h.store.find_app("a").await.unwrap().is_none());
        assert!(h.store.find_app("b").await.unwrap().is_some());
        assert_eq!(report.next_cursor, 0);
    }

    #[tokio::test]
    async fn unavailable_ledger_still_counts_and_queues_the_transition() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        seed_app(&h.store, "A", 30, BetaStatus::Full).await;
        h.store.fail_ledger().await;
        let request = ScanRequest::new("k", 10, 1);

        h.probe.set("https://t/a", BetaStatus::Open);
        let opened = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        assert_eq!(opened.updated, 1);
        assert_eq!(opened.notifications_sent, 1);
        assert_eq!(h.notifier.batches().len(), 1);
        assert_eq!(
            h.store.find_app("a").await.unwrap().unwrap().status,
            BetaStatus::Open
        );

        h.probe.set("https://t/a", BetaStatus::Full);
        let closed = h.reconciler.reconcile(&catalog(&["A"]), &request).await.unwrap();
        assert_eq!(closed.updated, 1);
        assert_eq!(closed.notifications_sent, 0);
    }

    #[tokio::test]
    async fn rejected_dispatch_is_not_counted_as_sent() {
        let store = Arc::new(MemoryStore::with_interactions([("a", 30)]).await);
        seed_app(&store, "A", 30, BetaStatus::Full).await;
        let probe = ScriptedProbe::default();
        probe.set("https://t/a", BetaStatus::Open);
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticCatalog(Vec::new())),
            Box::new(probe),
            Box::new(RejectingNotifier),
        )
        .with_probe_delay(Duration::ZERO);

        let report = reconciler
            .reconcile(&catalog(&["A"]), &ScanRequest::new("k", 10, 1))
            .await
            .unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.notifications_sent, 0);
        assert_eq!(report.dispatch.len(), 1);
        assert!(!report.dispatch[0].success);
    }

    #[tokio::test]
    async fn popularity_failure_aborts_before_cursor_moves() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        h.store.fail_interaction_reads().await;

        let err = h
            .reconciler
            .reconcile(&catalog(&["A", "B"]), &ScanRequest::new("k", 10, 1))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::PopularityLoad(_)));
        assert_eq!(h.store.cursor("k").await.unwrap(), 0);
        assert!(h.probe.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_catalog_is_an_error() {
        let h = harness(MemoryStore::new());
        let err = h
            .reconciler
            .reconcile(&[], &ScanRequest::new("k", 0, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, ScanError::EmptyCatalog));
    }

    #[tokio::test]
    async fn enrichment_runs_only_for_bare_records() {
        let enricher = FillingEnricher::default();
        let store = Arc::new(MemoryStore::with_interactions([("a", 30), ("b", 30)]).await);
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticCatalog(Vec::new())),
            Box::new(ScriptedProbe::default()),
            Box::new(RecordingNotifier::default()),
        )
        .with_enricher(Box::new(enricher.clone()))
        .with_probe_delay(Duration::ZERO);

        let mut entries = catalog(&["A", "B"]);
        entries[1].screenshot_urls = vec!["https://s/b.png".into()];
        reconciler
            .reconcile(&entries, &ScanRequest::new("k", 10, 2))
            .await
            .unwrap();

        assert_eq!(*enricher.calls.lock().unwrap(), vec!["A".to_string()]);
        let a = store.find_app("a").await.unwrap().unwrap();
        assert_eq!(a.description, "A from search");
        let b = store.find_app("b").await.unwrap().unwrap();
        assert_eq!(b.description, "");
    }

    #[tokio::test]
    async fn stored_metadata_survives_sparse_catalog_rows() {
        let h = harness(MemoryStore::with_interactions([("a", 30)]).await);
        let ts = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let mut rich = CatalogEntry::new("A", "https://t/a");
        rich.description = "Notes that sync.".into();
        rich.categories = vec!["Productivity".into()];
        h.store
            .upsert_app(&AppRecord::from_catalog(&rich, 30, BetaStatus::Unknown, ts))
            .await
            .unwrap();

        let report = h
            .reconciler
            .reconcile(&catalog(&["A"]), &ScanRequest::new("k", 10, 1))
            .await
            .unwrap();

        assert_eq!(report.updated, 0);
        let stored = h.store.find_app("a").await.unwrap().unwrap();
        assert_eq!(stored.description, "Notes that sync.");
    }

    // A popular app outside the window is only reached once the cursor rotates to it.
    #[tokio::test]
    async fn popular_app_past_the_window_is_reached_on_a_later_scan() {
        let h = harness(MemoryStore::with_interactions([("f", 99)]).await);
        let entries = catalog(&["A", "B", "C", "D", "E", "F"]);
        let mut request = ScanRequest::new("k", 10, 1);
        request.examine_factor = 2;

        for _ in 0..2 {
            h.reconciler.reconcile(&entries, &request).await.unwrap();
            assert!(h.probe.calls().is_empty());
        }
        let third = h.reconciler.reconcile(&entries, &request).await.unwrap();
        assert_eq!(third.admitted, 1);
        assert_eq!(h.probe.calls(), vec!["https://t/f".to_string()]);
    }

    #[tokio::test]
    async fn run_scan_loads_catalog_through_the_source() {
        let store = Arc::new(MemoryStore::with_interactions([("a", 30)]).await);
        let reconciler = Reconciler::new(
            store.clone(),
            Box::new(StaticCatalog(catalog(&["A"]))),
            Box::new(ScriptedProbe::default()),
            Box::new(RecordingNotifier::default()),
        )
        .with_probe_delay(Duration::ZERO);

        let report = reconciler
            .run_scan("https://catalog", CatalogFormat::Json, &ScanRequest::new("k", 10, 1))
            .await
            .unwrap();
        assert_eq!(report.catalog_len, 1);
        assert_eq!(store.app_count().await, 1);
    }

    #[test]
    fn examine_budget_is_bounded_by_cap_and_catalog() {
        let request = ScanRequest::new("k", 0, 3);
        assert_eq!(request.examine_budget(100), 20);
        assert_eq!(request.examine_budget(7), 7);
        assert_eq!(ScanRequest::new("k", 0, 1).examine_budget(100), 10);
        assert_eq!(advance_cursor(8, 5, 10), 3);
    }
}
