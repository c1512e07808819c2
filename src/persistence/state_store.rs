//! TradeState storage
//!
//! One TradeState per key with read-after-write consistency. The file backend
//! writes to a temp file, fsyncs and renames so a crash never leaves a
//! truncated state behind.

use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::TradeState;
use crate::error::Result;

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` when nothing has been persisted yet
    async fn load(&self) -> Result<Option<TradeState>>;

    async fn save(&self, state: &TradeState) -> Result<()>;
}

/// Process-local store, used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    state: Mutex<Option<TradeState>>,
    saves: AtomicUsize,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: TradeState) -> Self {
        Self {
            state: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<TradeState>> {
        Ok(self.state.lock().await.clone())
    }

    async fn save(&self, state: &TradeState) -> Result<()> {
        *self.state.lock().await = Some(state.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON file store
#[derive(Debug, Clone)]
pub struct FileStateStore {
    path: PathBuf,
}

impl FileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("json.tmp");
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<Option<TradeState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &TradeState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &bytes))
            .await
            .map_err(|e| crate::error::ArbError::Internal(format!("state writer panicked: {e}")))??;
        debug!(path = %self.path.display(), state = %state.state, "trade state saved");
        Ok(())
    }
}
