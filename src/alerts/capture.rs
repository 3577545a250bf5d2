use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::{debug, info};

/// Writes unknown-face crops under the configured storage path
pub struct UnknownFaceStore {
    root: PathBuf,
    counter: AtomicU64,
}

impl UnknownFaceStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the storage directory if it is missing
    pub async fn ensure_root(&self) -> std::io::Result<()> {
        if fs::metadata(&self.root).await.is_err() {
            fs::create_dir_all(&self.root).await?;
            info!("Created unknown-face directory: {}", self.root.display());
        }
        Ok(())
    }

    /// File name for the next capture: `unknown_<local time>_<sequence>.jpg`
    pub fn next_filename(&self) -> String {
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        format!(
            "unknown_{}_{}.jpg",
            Local::now().format("%Y%m%d_%H%M%S"),
            sequence
        )
    }

    /// Persist one JPEG crop and return its path
    pub async fn save(&self, filename: &str, jpeg: &[u8]) -> std::io::Result<PathBuf> {
        self.ensure_root().await?;
        let path = self.root.join(filename);
        fs::write(&path, jpeg).await?;
        debug!("Saved unknown face to {}", path.display());
        Ok(path)
    }
}
