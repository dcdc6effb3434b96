//! SF-006: Name resolution — caller-supplied name to catalog entry.
//!
//! The raw name comes straight from an HTTP path segment. It must match the
//! allow-list exactly; anything else (`/`, `..`, `;`, whitespace, shell
//! metacharacters, non-ASCII) is treated as not found before the
//! filesystem is touched. The returned path always comes from the catalog
//! listing, never from the caller's string.

use super::catalog::{Catalog, CatalogEntry};
use regex::Regex;
use std::sync::LazyLock;

/// Longest name accepted.
pub const MAX_NAME_LEN: usize = 128;

static APP_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("application name pattern"));

/// Return the name unchanged if it is on the allow-list, else `None`.
pub fn sanitize(raw: &str) -> Option<&str> {
    if raw.is_empty() || raw.len() > MAX_NAME_LEN || !APP_NAME.is_match(raw) {
        return None;
    }
    Some(raw)
}

/// Resolve a caller-supplied name against the current catalog listing.
///
/// Matching is ASCII case-insensitive. An exact-case match is preferred
/// over a case-folded one; otherwise the first entry in sorted order wins.
pub fn resolve(catalog: &Catalog, raw: &str) -> Option<CatalogEntry> {
    let Some(name) = sanitize(raw) else {
        tracing::debug!(raw_len = raw.len(), "rejected application name");
        return None;
    };
    resolve_in(catalog.entries(), name)
}

/// Pick the entry for an already sanitized name from a listing.
pub fn resolve_in(entries: Vec<CatalogEntry>, name: &str) -> Option<CatalogEntry> {
    let mut folded = None;
    for entry in entries {
        if entry.name == name {
            return Some(entry);
        }
        if folded.is_none() && entry.name.eq_ignore_ascii_case(name) {
            folded = Some(entry);
        }
    }
    folded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DefinitionFormat;
    use proptest::prelude::*;
    use std::path::PathBuf;

    fn entry(name: &str) -> CatalogEntry {
        CatalogEntry {
            name: name.to_string(),
            path: PathBuf::from(format!("/apps/{}App.rb", name)),
            format: DefinitionFormat::Script,
        }
    }

    #[test]
    fn test_sf006_sanitize_accepts_allow_list() {
        assert_eq!(sanitize("Fastqc"), Some("Fastqc"));
        assert_eq!(sanitize("STAR_2"), Some("STAR_2"));
        assert_eq!(sanitize("x"), Some("x"));
    }

    #[test]
    fn test_sf006_sanitize_rejects_attacks() {
        for raw in [
            "",
            "../../../etc/passwd",
            "Fastqc;rm -rf /",
            "Fastqc ",
            " Fastqc",
            "Fast qc",
            "Fastqc/..",
            "Fastqc.rb",
            "$(reboot)",
            "`id`",
            "Fastqc\n",
            "Fastqc\0",
            "Fästqc",
            "Fastqc|cat",
            "Fastqc&&ls",
        ] {
            assert_eq!(sanitize(raw), None, "accepted {:?}", raw);
        }
    }

    #[test]
    fn test_sf006_sanitize_length_cap() {
        let long = "a".repeat(MAX_NAME_LEN + 1);
        assert!(sanitize(&long).is_none());
        let max = "a".repeat(MAX_NAME_LEN);
        assert!(sanitize(&max).is_some());
    }

    #[test]
    fn test_sf006_resolve_case_insensitive() {
        let entries = vec![entry("BamStats"), entry("Fastqc")];
        let found = resolve_in(entries, "fastqc").unwrap();
        assert_eq!(found.name, "Fastqc");
        assert_eq!(found.path, PathBuf::from("/apps/FastqcApp.rb"));
    }

    #[test]
    fn test_sf006_resolve_prefers_exact_case() {
        let entries = vec![entry("FASTQC"), entry("Fastqc")];
        assert_eq!(resolve_in(entries.clone(), "Fastqc").unwrap().name, "Fastqc");
        assert_eq!(resolve_in(entries.clone(), "FASTQC").unwrap().name, "FASTQC");
        assert_eq!(resolve_in(entries, "fastQC").unwrap().name, "FASTQC");
    }

    #[test]
    fn test_sf006_resolve_unknown() {
        assert!(resolve_in(vec![entry("Fastqc")], "Star").is_none());
    }

    #[test]
    fn test_sf006_resolve_rejects_before_listing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("FastqcApp.rb"), "").unwrap();
        let catalog = Catalog::new(dir.path());
        assert!(resolve(&catalog, "Fastqc;rm -rf /").is_none());
        assert!(resolve(&catalog, "../FastqcApp").is_none());
        assert_eq!(resolve(&catalog, "FASTQC").unwrap().name, "Fastqc");
    }

    proptest! {
        #[test]
        fn prop_sf006_sanitize_never_passes_foreign_chars(raw in ".{0,40}") {
            if let Some(ok) = sanitize(&raw) {
                prop_assert!(ok.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
                prop_assert_eq!(ok, raw.as_str());
            }
        }

        #[test]
        fn prop_sf006_sanitize_accepts_identifiers(raw in "[A-Za-z0-9_]{1,64}") {
            prop_assert_eq!(sanitize(&raw), Some(raw.as_str()));
        }
    }
}
