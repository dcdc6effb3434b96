//! SF-005: Definition catalog — directory listing, no evaluation.
//!
//! A definition file is `<Name>App.rb` (legacy script) or `<Name>App.yaml`
//! / `<Name>App.yml` (declarative). Anything else in the directory is
//! ignored. Listing never reads file contents, so one broken definition
//! cannot break the listing.

use super::types::DefinitionFormat;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static DEFINITION_FILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_]+)App\.(rb|yaml|yml)$").expect("definition file pattern"));

/// One definition file found on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Canonical name derived from the file name (`FastqcApp.rb` → `Fastqc`)
    pub name: String,
    pub path: PathBuf,
    pub format: DefinitionFormat,
}

/// Extract the canonical name and format from a file name.
pub fn parse_file_name(file_name: &str) -> Option<(String, DefinitionFormat)> {
    let caps = DEFINITION_FILE.captures(file_name)?;
    let format = match &caps[2] {
        "rb" => DefinitionFormat::Script,
        _ => DefinitionFormat::Declarative,
    };
    Some((caps[1].to_string(), format))
}

/// A directory of application definitions.
#[derive(Debug, Clone)]
pub struct Catalog {
    dir: PathBuf,
}

impl Catalog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All definitions, sorted by name, one entry per name.
    ///
    /// Re-reads the directory on every call. Symlinks and non-regular files
    /// are skipped. When a name has both a declarative and a script file the
    /// declarative one wins.
    pub fn entries(&self) -> Vec<CatalogEntry> {
        let read_dir = match std::fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "cannot list definitions directory");
                return Vec::new();
            }
        };

        let mut by_name: BTreeMap<String, CatalogEntry> = BTreeMap::new();
        for entry in read_dir.flatten() {
            // file_type() does not follow symlinks
            let is_file = entry.file_type().map(|ft| ft.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some((name, format)) = parse_file_name(file_name) else {
                continue;
            };
            let candidate = CatalogEntry {
                name: name.clone(),
                path: self.dir.join(file_name),
                format,
            };
            match by_name.get(&name) {
                Some(existing) if !prefer(&candidate, existing) => {}
                _ => {
                    by_name.insert(name, candidate);
                }
            }
        }

        by_name.into_values().collect()
    }

    /// Canonical names, sorted lexicographically.
    pub fn list(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.name).collect()
    }
}

/// Whether `candidate` should replace `existing` for the same name.
/// Declarative beats script; among equals, `.yaml` beats `.yml`.
fn prefer(candidate: &CatalogEntry, existing: &CatalogEntry) -> bool {
    (candidate.format, extension_rank(&candidate.path)) < (existing.format, extension_rank(&existing.path))
}

fn extension_rank(path: &Path) -> u8 {
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") => 0,
        Some("yml") => 1,
        _ => 2,
    }
}
