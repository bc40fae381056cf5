//! Small JSON state files under the data directory.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;

/// A missing file yields the default; an unreadable or malformed one is
/// logged and also yields the default.
pub async fn load_json<T: DeserializeOwned + Default>(path: &Path) -> T {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<T>(&contents) {
            Ok(value) => {
                tracing::info!(path = %path.display(), "loaded state file");
                value
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), %e, "ignoring malformed state file");
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), %e, "could not read state file");
            T::default()
        }
    }
}

/// Write through a sibling temp file and rename, so readers never see a
/// partial file.
pub async fn save_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .map_err(|e| anyhow::anyhow!("write {}: {e}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| anyhow::anyhow!("rename {} -> {}: {e}", tmp.display(), path.display()))?;
    Ok(())
}
