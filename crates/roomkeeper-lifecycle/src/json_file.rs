//! Whole-file JSON list persistence shared by the registry and the
//! allowed-surface store.

use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::LifecycleError;

/// Default state location: ~/.roomkeeper/
pub fn default_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".roomkeeper")
}

/// Read a JSON array and decode it element by element.
///
/// A missing or blank file is an empty list. A file that is not a JSON array
/// is an error; elements that fail to decode are logged and skipped so one bad
/// entry cannot hide the rest.
pub async fn read_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, LifecycleError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<serde_json::Value> = serde_json::from_str(&content)?;
    let mut items = Vec::with_capacity(entries.len());
    for entry in entries {
        match serde_json::from_value(entry.clone()) {
            Ok(item) => items.push(item),
            Err(e) => {
                tracing::warn!(path = %path.display(), %entry, "Skipping unreadable entry: {e}");
            }
        }
    }
    Ok(items)
}

/// Replace the file contents. Writes a sibling temp file and renames it over
/// the target so readers never observe a half-written list.
pub async fn write_list<T: Serialize>(path: &Path, items: &[T]) -> Result<(), LifecycleError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(items)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}
