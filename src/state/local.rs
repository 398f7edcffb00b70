//! Local file-based state storage backend.
//!
//! All records live in one JSON document. Every mutation is a
//! read-modify-write under an async mutex, written to a temporary file and
//! renamed into place so a crash never leaves a half-written document.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StateError, TerragraphError};

use super::store::StateStore;
use super::types::{ResourceState, STATE_VERSION, StateFile};

/// Default state directory name.
const STATE_DIR: &str = ".terragraph";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Serializes read-modify-write cycles.
    write_lock: Mutex<()>,
}

impl LocalStateStore {
    /// Creates a new local state store in `.terragraph/` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| {
                TerragraphError::internal(format!("Cannot determine current directory: {e}"))
            })?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);

        Self {
            base_dir,
            state_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a new local state store from a custom state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        Self {
            base_dir,
            state_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Returns the state file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.state_path
    }

    /// Reads the whole state document, or an empty one if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or was written
    /// by an incompatible version.
    pub async fn read_file(&self) -> Result<StateFile> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(StateFile::new());
        }

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            TerragraphError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let file: StateFile = serde_json::from_str(&content).map_err(|e| {
            TerragraphError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        if file.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: file.version,
            }
            .into());
        }

        Ok(file)
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir)
                .await
                .map_err(|e| StateError::write(format!("Failed to create state directory: {e}")))?;
        }
        Ok(())
    }

    async fn write_file(&self, file: &mut StateFile) -> Result<()> {
        self.ensure_dir().await?;
        file.touch();

        let content = serde_json::to_string_pretty(file)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut handle = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;

        handle
            .write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;

        handle
            .sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        debug!("State saved (serial {})", file.serial);
        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, name: &str) -> Result<Option<ResourceState>> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        Ok(file.resources.remove(name))
    }

    async fn save(&self, name: &str, state: &ResourceState) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        file.resources.insert(name.to_string(), state.clone());

        info!("Saving state for {name} to {}", self.state_path.display());
        self.write_file(&mut file).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;
        if file.resources.remove(name).is_none() {
            debug!("No state recorded for {name}");
            return Ok(());
        }

        info!("Removing state for {name} from {}", self.state_path.display());
        self.write_file(&mut file).await
    }

    async fn list(&self) -> Result<Vec<String>> {
        let _guard = self.write_lock.lock().await;
        let file = self.read_file().await?;
        Ok(file.resources.into_keys().collect())
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
