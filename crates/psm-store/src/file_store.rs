//! File-backed store: pretty-printed JSON document, atomic replace on save,
//! pre-migration backup on any migration-triggered rewrite.

use std::path::{Path, PathBuf};

use psm_core::{PsmError, Store};

use crate::migrate::migrate;
use crate::validate::validate_store;

fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().and_then(|n| n.to_str()).unwrap_or("store").to_string();
    name.push_str(".pre_migration.json");
    path.with_file_name(name)
}

/// Loads, migrates if necessary, and validates the store at `path`. If the
/// raw document was not already in the current shape, the original bytes
/// are preserved to a sibling `*.pre_migration.json` file before the
/// migrated document is returned (the caller is expected to `save` it back).
pub fn load(path: &Path) -> Result<Store, PsmError> {
    let raw_text = std::fs::read_to_string(path)
        .map_err(|e| PsmError::StorageError(format!("reading {}: {e}", path.display())))?;
    let raw: serde_json::Value = serde_json::from_str(&raw_text)
        .map_err(|e| PsmError::StorageError(format!("parsing {}: {e}", path.display())))?;

    let is_current_shape = raw.get("positions").is_some() && raw.get("meta").is_some();
    let store = migrate(raw);

    if !is_current_shape {
        std::fs::write(backup_path(path), &raw_text)
            .map_err(|e| PsmError::StorageError(format!("writing backup for {}: {e}", path.display())))?;
        tracing::warn!(path = %path.display(), "store migrated from a legacy shape, backup written");
    }

    validate_store(&store)?;
    Ok(store)
}

/// Writes `store` as pretty-printed UTF-8 JSON, atomically: serialize to a
/// sibling temp file, then rename over the destination.
pub fn save(path: &Path, store: &Store) -> Result<(), PsmError> {
    let text = serde_json::to_string_pretty(store)
        .map_err(|e| PsmError::StorageError(format!("serializing store: {e}")))?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, text)
        .map_err(|e| PsmError::StorageError(format!("writing {}: {e}", tmp_path.display())))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| PsmError::StorageError(format!("renaming {} to {}: {e}", tmp_path.display(), path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_empty_store() {
        let dir = std::env::temp_dir().join(format!("psm-store-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.json");
        let store = Store::empty();
        save(&path, &store).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.meta.schema_version, store.meta.schema_version);
        std::fs::remove_dir_all(&dir).ok();
    }
}
