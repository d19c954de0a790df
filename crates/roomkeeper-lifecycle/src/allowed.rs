use std::path::PathBuf;

use roomkeeper_core::SurfaceId;
use tokio::sync::Mutex;

use crate::error::LifecycleError;
use crate::json_file;

/// Persisted set of surfaces the creation command may be used from.
///
/// Stored as a plain JSON array of ids (`allowed_surfaces.json`). Like the
/// registry, an unreadable file counts as empty.
pub struct AllowedSurfaces {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AllowedSurfaces {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load_or_empty(&self) -> Vec<SurfaceId> {
        match json_file::read_list::<SurfaceId>(&self.path).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    "Allowed-surface list unreadable, treating as empty: {e}"
                );
                Vec::new()
            }
        }
    }

    pub async fn list(&self) -> Vec<SurfaceId> {
        let _guard = self.lock.lock().await;
        self.load_or_empty().await
    }

    pub async fn contains(&self, surface: SurfaceId) -> bool {
        self.list().await.contains(&surface)
    }

    /// Add a surface. Returns false if it was already allowed.
    pub async fn allow(&self, surface: SurfaceId) -> Result<bool, LifecycleError> {
        let _guard = self.lock.lock().await;
        let mut ids = self.load_or_empty().await;
        if ids.contains(&surface) {
            return Ok(false);
        }
        ids.push(surface);
        json_file::write_list(&self.path, &ids).await?;
        tracing::info!(surface_id = %surface, "Surface allowed");
        Ok(true)
    }

    /// Remove a surface. Returns false if it was not allowed.
    pub async fn disallow(&self, surface: SurfaceId) -> Result<bool, LifecycleError> {
        let _guard = self.lock.lock().await;
        let mut ids = self.load_or_empty().await;
        let before = ids.len();
        ids.retain(|id| *id != surface);
        if ids.len() == before {
            return Ok(false);
        }
        json_file::write_list(&self.path, &ids).await?;
        tracing::info!(surface_id = %surface, "Surface disallowed");
        Ok(true)
    }
}
