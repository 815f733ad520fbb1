//! Core domain model for betascan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

mod normalize;
mod status;

pub use normalize::normalize_name;
pub use status::{classify_page_text, transition_signature, BetaStatus, UnknownStatus};

pub const CRATE_NAME: &str = "betascan-core";

/// History entries kept per app; older rows are pruned after each insert.
pub const HISTORY_RETENTION: usize = 30;

const PLACEHOLDER_DESCRIPTIONS: [&str; 3] = ["no description", "no description available", "n/a"];

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One app as listed by the hosted catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CatalogEntry {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub link: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub logo: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    #[serde(default, rename = "screenshotUrls", deserialize_with = "null_as_default")]
    pub screenshot_urls: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    #[serde(default, rename = "appStore", deserialize_with = "null_as_default")]
    pub app_store: String,
    #[serde(default, rename = "artistViewUrl", deserialize_with = "null_as_default")]
    pub artist_view_url: String,
    #[serde(default, rename = "sellerName", deserialize_with = "null_as_default")]
    pub seller_name: String,
    #[serde(default, rename = "trackContentRating", deserialize_with = "null_as_default")]
    pub content_rating: String,
    #[serde(default, rename = "primaryGenreName", deserialize_with = "null_as_default")]
    pub primary_genre: String,
    #[serde(default, rename = "artworkUrl100", deserialize_with = "null_as_default")]
    pub artwork_url: String,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: link.into(),
            ..Default::default()
        }
    }
}

/// Persisted app row. `name_key` is the unique identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppRecord {
    pub id: Option<i64>,
    pub name_key: String,
    pub name: String,
    pub link: String,
    pub logo: String,
    pub status: BetaStatus,
    pub click_count: i64,
    pub description: String,
    pub categories: Vec<String>,
    pub screenshot_urls: Vec<String>,
    pub features: Vec<String>,
    pub app_store: String,
    pub artist_view_url: String,
    pub seller_name: String,
    pub content_rating: String,
    pub primary_genre: String,
    pub artwork_url: String,
    pub last_checked: DateTime<Utc>,
}

impl AppRecord {
    /// Candidate record built from a catalog row plus freshly observed values.
    pub fn from_catalog(
        entry: &CatalogEntry,
        click_count: i64,
        status: BetaStatus,
        checked_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            name_key: normalize_name(&entry.name),
            name: entry.name.clone(),
            link: entry.link.clone(),
            logo: entry.logo.clone(),
            status,
            click_count,
            description: entry.description.clone(),
            categories: entry.categories.clone(),
            screenshot_urls: entry.screenshot_urls.clone(),
            features: entry.features.clone(),
            app_store: entry.app_store.clone(),
            artist_view_url: entry.artist_view_url.clone(),
            seller_name: entry.seller_name.clone(),
            content_rating: entry.content_rating.clone(),
            primary_genre: entry.primary_genre.clone(),
            artwork_url: entry.artwork_url.clone(),
            last_checked: checked_at,
        }
    }

    /// Equality over the fields whose change warrants a write.
    /// `last_checked`, `link` and the seller/rating/genre/artwork fields are ignored.
    pub fn same_tracked_fields(&self, other: &AppRecord) -> bool {
        self.click_count == other.click_count
            && self.status == other.status
            && self.screenshot_urls == other.screenshot_urls
            && self.description == other.description
            && self.categories == other.categories
            && self.features == other.features
            && self.app_store == other.app_store
            && self.artist_view_url == other.artist_view_url
            && self.logo == other.logo
    }

    pub fn has_placeholder_description(&self) -> bool {
        is_placeholder_description(&self.description)
    }

    /// Enrichment runs only when both screenshots and description are missing.
    pub fn needs_enrichment(&self) -> bool {
        self.screenshot_urls.is_empty() && self.has_placeholder_description()
    }
}

pub fn is_placeholder_description(description: &str) -> bool {
    let trimmed = description.trim();
    trimmed.is_empty()
        || PLACEHOLDER_DESCRIPTIONS
            .iter()
            .any(|p| trimmed.eq_ignore_ascii_case(p))
}

/// Append-only status/popularity sample for one app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub app_id: i64,
    pub status: BetaStatus,
    pub click_count: i64,
    pub recorded_at: DateTime<Utc>,
}

/// Click count accumulated for one normalized name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionRow {
    pub name_key: String,
    pub click_count: i64,
}

/// Most recent dispatched transition for an app, used to suppress repeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub app_name: String,
    pub signature: String,
    pub recorded_at: DateTime<Utc>,
}

/// Outbound notification payload row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyItem {
    pub name: String,
    pub status: BetaStatus,
    #[serde(rename = "clickCount")]
    pub click_count: i64,
    pub categories: Vec<String>,
    pub logo: String,
    pub timestamp: DateTime<Utc>,
}

impl NotifyItem {
    pub fn from_record(record: &AppRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            name: record.name.clone(),
            status: record.status,
            click_count: record.click_count,
            categories: record.categories.clone(),
            logo: record.logo.clone(),
            timestamp,
        }
    }
}

/// Outcome of one dispatch call. Failures are reported here, never raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub channel: String,
    pub success: bool,
    pub message: String,
    pub status_code: Option<u16>,
    pub response: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub run_id: Uuid,
    pub scan_key: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub catalog_len: usize,
    pub start_cursor: usize,
    pub next_cursor: usize,
    pub click_threshold: i64,
    /// Candidates looked at, admitted or not.
    pub examined: usize,
    /// Candidates at or above the click threshold, each probed once.
    pub admitted: usize,
    pub below_threshold: usize,
    pub updated: usize,
    pub notifications_sent: usize,
    pub dispatch: Vec<DispatchResult>,
}
