//! Catalog and metadata-search adapters: raw bytes in, domain rows out.

use std::sync::LazyLock;

use betascan_core::{is_placeholder_description, AppRecord, CatalogEntry};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "betascan-adapters";

static MARKDOWN_APP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\*\*(.*?)\*\*:.*?\[!\[App Logo\]\((.*?)\)\]\((.*?)\)")
        .expect("static regex compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogFormat {
    Json,
    Markdown,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("catalog document has no apps list")]
    MissingApps,
    #[error("catalog contains no apps")]
    Empty,
}

impl CatalogFormat {
    /// Parse a fetched catalog document. An empty result is an error so a
    /// broken upstream never looks like "nothing to do".
    pub fn parse(self, body: &[u8]) -> Result<Vec<CatalogEntry>, CatalogError> {
        let entries = match self {
            Self::Json => parse_json_catalog(body)?,
            Self::Markdown => parse_markdown_catalog(&String::from_utf8_lossy(body)),
        };
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(entries)
    }
}

/// Accepts both `{"apps": [...]}` and `[{"apps": [...]}]`.
pub fn parse_json_catalog(body: &[u8]) -> Result<Vec<CatalogEntry>, CatalogError> {
    let document: JsonValue = serde_json::from_slice(body)?;
    let apps = match &document {
        JsonValue::Object(map) => map.get("apps"),
        JsonValue::Array(items) => items.first().and_then(|first| first.get("apps")),
        _ => None,
    }
    .ok_or(CatalogError::MissingApps)?;

    let entries = Vec::<CatalogEntry>::deserialize(apps)?;
    Ok(entries
        .into_iter()
        .filter(|e| !e.name.trim().is_empty())
        .collect())
}

/// Extract `(name, logo, link)` triples from lines shaped like
/// `**Name**: ... [![App Logo](logo)](link)`.
pub fn parse_markdown_catalog(text: &str) -> Vec<CatalogEntry> {
    MARKDOWN_APP
        .captures_iter(text)
        .map(|caps| CatalogEntry {
            name: caps[1].to_string(),
            logo: caps[2].to_string(),
            link: caps[3].to_string(),
            ..Default::default()
        })
        .filter(|e| !e.name.trim().is_empty())
        .collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// One row of an App Store style keyword search.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub track_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub screenshot_urls: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub genres: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub features: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track_view_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artist_view_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seller_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub track_content_rating: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub primary_genre_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub artwork_url100: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

pub fn parse_search_response(body: &[u8]) -> Result<Vec<SearchResult>, CatalogError> {
    let response: SearchResponse = serde_json::from_slice(body)?;
    Ok(response.results)
}

/// First result whose track name contains `name`, ignoring case.
/// Ranking is left to the search backend.
pub fn first_name_match<'a>(results: &'a [SearchResult], name: &str) -> Option<&'a SearchResult> {
    let needle = name.to_lowercase();
    results
        .iter()
        .find(|r| r.track_name.to_lowercase().contains(&needle))
}

fn fill_string(slot: &mut String, value: &str, label: &'static str, filled: &mut Vec<&'static str>) {
    if slot.trim().is_empty() && !value.trim().is_empty() {
        *slot = value.to_string();
        filled.push(label);
    }
}

fn fill_list(slot: &mut Vec<String>, value: &[String], label: &'static str, filled: &mut Vec<&'static str>) {
    if slot.is_empty() && !value.is_empty() {
        *slot = value.to_vec();
        filled.push(label);
    }
}

/// Copy search metadata into fields that are currently empty. Populated
/// fields are never overwritten. Returns the names of the fields filled.
pub fn fill_missing_fields(record: &mut AppRecord, result: &SearchResult) -> Vec<&'static str> {
    let mut filled = Vec::new();

    if is_placeholder_description(&record.description) && !result.description.trim().is_empty() {
        record.description = result.description.clone();
        filled.push("description");
    }
    fill_list(&mut record.screenshot_urls, &result.screenshot_urls, "screenshot_urls", &mut filled);
    fill_list(&mut record.categories, &result.genres, "categories", &mut filled);
    fill_list(&mut record.features, &result.features, "features", &mut filled);
    fill_string(&mut record.app_store, &result.track_view_url, "app_store", &mut filled);
    fill_string(&mut record.artist_view_url, &result.artist_view_url, "artist_view_url", &mut filled);
    fill_string(&mut record.seller_name, &result.seller_name, "seller_name", &mut filled);
    fill_string(&mut record.content_rating, &result.track_content_rating, "content_rating", &mut filled);
    fill_string(&mut record.primary_genre, &result.primary_genre_name, "primary_genre", &mut filled);
    fill_string(&mut record.artwork_url, &result.artwork_url100, "artwork_url", &mut filled);
    fill_string(&mut record.logo, &result.artwork_url100, "logo", &mut filled);

    filled
}
