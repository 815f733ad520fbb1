use std::collections::HashMap;

use betascan_storage::{InteractionSource, StoreError};
use tracing::debug;

/// Rows requested per page when reading the interaction ledger.
pub const INTERACTION_PAGE_SIZE: usize = 1000;

/// Normalized name -> click count, rebuilt on every scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopularityMap {
    clicks: HashMap<String, i64>,
}

impl PopularityMap {
    /// Clicks for `name_key`; unknown names count as zero.
    pub fn clicks(&self, name_key: &str) -> i64 {
        self.clicks.get(name_key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.clicks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clicks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.clicks.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

impl FromIterator<(String, i64)> for PopularityMap {
    fn from_iter<I: IntoIterator<Item = (String, i64)>>(iter: I) -> Self {
        Self {
            clicks: iter.into_iter().map(|(k, v)| (k, v.max(0))).collect(),
        }
    }
}

/// Read every interaction row, page by page. A failed page fails the load:
/// an empty map always means "no interactions", never "lookup failed".
pub async fn load_popularity<S>(source: &S) -> Result<PopularityMap, StoreError>
where
    S: InteractionSource + ?Sized,
{
    let mut clicks = HashMap::new();
    let mut offset = 0usize;
    loop {
        let page = source.interactions_page(offset, INTERACTION_PAGE_SIZE).await?;
        let fetched = page.len();
        for row in page {
            clicks.insert(row.name_key, row.click_count.max(0));
        }
        if fetched < INTERACTION_PAGE_SIZE {
            break;
        }
        offset += fetched;
    }
    debug!(names = clicks.len(), "loaded popularity map");
    Ok(PopularityMap { clicks })
}
