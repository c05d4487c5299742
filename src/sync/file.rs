use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    model::Repository,
    repository::DataRepository,
    sync::{ReadySignal, Synchronizer},
    Result,
};

/// Loads the repository once from a local JSON file. Intended for tests and offline usage.
pub struct FileSynchronizer {
    path: PathBuf,
    repository: Arc<DataRepository>,
    signal: ReadySignal,
}

impl FileSynchronizer {
    /// Create a synchronizer that loads `path` into `repository` when started.
    pub fn new(path: impl Into<PathBuf>, repository: Arc<DataRepository>) -> FileSynchronizer {
        FileSynchronizer {
            path: path.into(),
            repository,
            signal: ReadySignal::new(),
        }
    }

    /// The repository file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<()> {
        let content = std::fs::read_to_string(&self.path)?;
        let repository: Repository = serde_json::from_str(&content)?;
        self.repository.refresh(repository);
        Ok(())
    }
}

impl Synchronizer for FileSynchronizer {
    fn start(&mut self) -> Result<ReadySignal> {
        let result = self.load();
        match &result {
            Ok(()) => {
                log::info!(target: "featureprobe", path:serde = self.path; "loaded repository from file")
            }
            Err(err) => {
                log::warn!(target: "featureprobe", path:serde = self.path; "failed to load repository from file: {err}")
            }
        }
        self.signal.complete(result);
        Ok(self.signal.clone())
    }

    fn stop(&mut self) {}
}
