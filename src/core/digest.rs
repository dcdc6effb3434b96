//! SF-013: BLAKE3 digests for definition files and extracted configs.
//!
//! Callers that cache rendered forms key them on these. All return
//! `"blake3:{hex}"`.

use super::catalog::CatalogEntry;
use super::types::ApplicationConfig;
use std::path::Path;

/// Hash a definition file's contents.
///
/// Applies the same rule as evaluation: only a regular file is read, so a
/// definition swapped for a symlink after listing is refused.
pub fn definition_digest(path: &Path) -> Result<String, String> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| format!("cannot stat {}: {}", path.display(), e))?;
    if !meta.file_type().is_file() {
        return Err(format!("{} is not a regular file", path.display()));
    }
    let file = std::fs::File::open(path).map_err(|e| format!("cannot open {}: {}", path.display(), e))?;
    let mut hasher = blake3::Hasher::new();
    hasher
        .update_reader(file)
        .map_err(|e| format!("read error {}: {}", path.display(), e))?;
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a whole catalog: each entry's name, format and file digest, in
/// catalog order.
pub fn catalog_digest(entries: &[CatalogEntry]) -> Result<String, String> {
    let mut hasher = blake3::Hasher::new();
    for entry in entries {
        let digest = definition_digest(&entry.path)?;
        hasher.update(entry.name.as_bytes());
        hasher.update(b"\0");
        hasher.update(entry.format.to_string().as_bytes());
        hasher.update(b"\0");
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash the canonical JSON rendering of a config.
///
/// Field order is fixed by the type and parameter order by the definition,
/// so equal configs always hash equal.
pub fn config_fingerprint(config: &ApplicationConfig) -> Result<String, String> {
    let json = serde_json::to_vec(config).map_err(|e| format!("cannot serialize config: {}", e))?;
    Ok(format!("blake3:{}", blake3::hash(&json).to_hex()))
}
