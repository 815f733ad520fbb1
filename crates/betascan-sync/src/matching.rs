use std::collections::HashMap;

use betascan_core::{normalize_name, CatalogEntry};
use serde::Serialize;

use crate::popularity::PopularityMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchedApp {
    pub name_key: String,
    pub name: String,
    pub clicks: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingApp {
    pub name_key: String,
    pub clicks: i64,
}

/// How well tracked click counts line up with catalog names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub matches: usize,
    pub missing: usize,
    pub total_tracked: usize,
    pub total_catalog: usize,
    pub match_details: Vec<MatchedApp>,
    pub missing_details: Vec<MissingApp>,
}

pub fn match_popularity(catalog: &[CatalogEntry], popularity: &PopularityMap) -> MatchReport {
    let by_key = catalog
        .iter()
        .map(|e| (normalize_name(&e.name), e.name.as_str()))
        .collect::<HashMap<_, _>>();

    let mut match_details = Vec::new();
    let mut missing_details = Vec::new();
    for (name_key, clicks) in popularity.iter() {
        match by_key.get(name_key) {
            Some(name) => match_details.push(MatchedApp {
                name_key: name_key.to_string(),
                name: name.to_string(),
                clicks,
            }),
            None => missing_details.push(MissingApp {
                name_key: name_key.to_string(),
                clicks,
            }),
        }
    }
    match_details.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.name_key.cmp(&b.name_key)));
    missing_details.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.name_key.cmp(&b.name_key)));

    MatchReport {
        matches: match_details.len(),
        missing: missing_details.len(),
        total_tracked: popularity.len(),
        total_catalog: catalog.len(),
        match_details,
        missing_details,
    }
}
