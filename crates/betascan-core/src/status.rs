//! Beta availability states and page-text classification.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub const FULL_MARKER: &str = "this beta is full";
pub const NOT_ACCEPTING_MARKERS: [&str; 2] = [
    "this beta isn't accepting any new testers right now",
    "this beta isn\u{2019}t accepting any new testers right now",
];
pub const OPEN_MARKERS: [&str; 2] = ["join the", "start testing"];

/// Availability of a public beta as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BetaStatus {
    Open,
    Full,
    #[serde(alias = "not accepting")]
    NotAccepting,
    #[default]
    Unknown,
    Timeout,
    Error,
}

impl BetaStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Full => "full",
            Self::NotAccepting => "not_accepting",
            Self::Unknown => "unknown",
            Self::Timeout => "timeout",
            Self::Error => "error",
        }
    }

    /// True for a `previous -> next` change worth telling subscribers about:
    /// a beta that was not joinable has just opened.
    pub fn is_qualifying_transition(previous: Self, next: Self) -> bool {
        next == Self::Open
            && matches!(
                previous,
                Self::Full | Self::NotAccepting | Self::Error | Self::Unknown
            )
    }
}

impl fmt::Display for BetaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognised beta status {:?}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

impl FromStr for BetaStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Self::Open),
            "full" => Ok(Self::Full),
            "not_accepting" | "not accepting" => Ok(Self::NotAccepting),
            "unknown" => Ok(Self::Unknown),
            "timeout" => Ok(Self::Timeout),
            "error" => Ok(Self::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Classify fetched page text. Markers are checked case-insensitively in
/// priority order, so a page saying both "this beta is full" and "join the"
/// is `Full`.
pub fn classify_page_text(text: &str) -> BetaStatus {
    let content = text.to_lowercase();

    if content.contains(FULL_MARKER) {
        return BetaStatus::Full;
    }
    if NOT_ACCEPTING_MARKERS.iter().any(|m| content.contains(m)) {
        return BetaStatus::NotAccepting;
    }
    if OPEN_MARKERS.iter().any(|m| content.contains(m)) {
        return BetaStatus::Open;
    }
    BetaStatus::Unknown
}

/// Ledger signature for a `previous -> next` change.
pub fn transition_signature(previous: BetaStatus, next: BetaStatus) -> String {
    format!("{previous}->{next}")
}
