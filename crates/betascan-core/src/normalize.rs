//! Display name -> stable lookup key.

use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// Bytes left untouched when a non-ASCII name is percent-encoded.
const NAME_KEY_UNRESERVED: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("static regex compiles"));
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s-]").expect("static regex compiles"));
static HYPHEN_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-+").expect("static regex compiles"));

/// Map an app display name to its normalized key.
///
/// Names containing any non-ASCII character are percent-encoded whole so
/// non-Latin scripts keep distinct keys. ASCII names are lowercased and
/// slugged: whitespace runs and non-word characters become hyphens, repeated
/// hyphens collapse, and leading/trailing hyphens are stripped.
pub fn normalize_name(name: &str) -> String {
    if name.is_empty() {
        return String::new();
    }

    if !name.is_ascii() {
        return utf8_percent_encode(name, NAME_KEY_UNRESERVED).to_string();
    }

    let lowered = name.to_ascii_lowercase();
    let hyphenated = WHITESPACE_RUN.replace_all(&lowered, "-");
    let word_only = NON_WORD.replace_all(&hyphenated, "-");
    let collapsed = HYPHEN_RUN.replace_all(&word_only, "-");
    collapsed.trim_matches('-').to_string()
}
