//! Model residency policies.
//!
//! - **eager**: load once at startup, keep for the process lifetime.
//! - **lazy-cached**: load on the first request, keep for the process lifetime.
//!   Concurrent first requests share a single fetch + deserialise.
//! - **lazy-ephemeral**: every request downloads the artifact to its own
//!   temporary path, predicts once, then drops the model and deletes the file.
//!   Trades latency and bandwidth for a flat memory ceiling.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::artifact::ArtifactFetcher;
use crate::error::{DeserializationError, PredictError};
use crate::model::{FeatureRow, ModelHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelPolicy {
    Eager,
    LazyCached,
    LazyEphemeral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
    Unloaded,
    Resident,
    EphemeralInUse,
}

/// Turns an artifact on disk into a model handle.
pub type ModelLoader =
    Arc<dyn Fn(&Path) -> Result<ModelHandle, DeserializationError> + Send + Sync>;

/// Owns the model handle and decides when it is fetched, kept and released.
pub struct ModelManager {
    policy: ModelPolicy,
    model_id: String,
    artifact_path: PathBuf,
    fetcher: Arc<dyn ArtifactFetcher>,
    loader: ModelLoader,
    resident: OnceCell<Arc<ModelHandle>>,
    ephemeral_in_use: AtomicUsize,
    ephemeral_seq: AtomicU64,
    ephemeral_nonce: u32,
}

impl ModelManager {
    pub fn new(
        policy: ModelPolicy,
        model_id: impl Into<String>,
        artifact_path: impl Into<PathBuf>,
        fetcher: Arc<dyn ArtifactFetcher>,
    ) -> Self {
        ModelManager {
            policy,
            model_id: model_id.into(),
            artifact_path: artifact_path.into(),
            fetcher,
            loader: Arc::new(|path: &Path| ModelHandle::load(path)),
            resident: OnceCell::new(),
            ephemeral_in_use: AtomicUsize::new(0),
            ephemeral_seq: AtomicU64::new(0),
            ephemeral_nonce: rand::random(),
        }
    }

    /// Replace the artifact deserialiser.
    #[cfg(test)]
    pub fn with_loader(mut self, loader: ModelLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn policy(&self) -> ModelPolicy {
        self.policy
    }

    pub fn state(&self) -> ModelState {
        if self.resident.initialized() {
            ModelState::Resident
        } else if self.ephemeral_in_use.load(Ordering::Acquire) > 0 {
            ModelState::EphemeralInUse
        } else {
            ModelState::Unloaded
        }
    }

    /// Load the resident model now.  Used at startup under the eager policy.
    pub async fn preload(&self) -> Result<(), PredictError> {
        self.resident().await.map(|_| ())
    }

    /// Run one prediction under the active policy.
    pub async fn predict(&self, row: &FeatureRow) -> Result<(Vec<String>, Vec<f64>), PredictError> {
        match self.policy {
            ModelPolicy::Eager | ModelPolicy::LazyCached => self.resident().await?.predict(row),
            ModelPolicy::LazyEphemeral => self.predict_ephemeral(row).await,
        }
    }

    async fn resident(&self) -> Result<Arc<ModelHandle>, PredictError> {
        self.resident
            .get_or_try_init(|| async {
                self.fetcher
                    .ensure_present(&self.model_id, &self.artifact_path)
                    .await?;
                let model = self.deserialize(self.artifact_path.clone()).await?;
                info!(
                    "Model resident ({} classes: {:?})",
                    model.classes().len(),
                    model.classes()
                );
                Ok::<_, PredictError>(Arc::new(model))
            })
            .await
            .cloned()
    }

    async fn predict_ephemeral(
        &self,
        row: &FeatureRow,
    ) -> Result<(Vec<String>, Vec<f64>), PredictError> {
        let path = self.ephemeral_path();
        // Deletes the artifact on every exit path, including cancellation.
        let _artifact = EphemeralArtifact::new(path.clone(), &self.ephemeral_in_use);

        self.fetcher.ensure_present(&self.model_id, &path).await?;
        let model = self.deserialize(path).await?;
        let out = model.predict(row);
        drop(model);
        out
    }

    async fn deserialize(&self, path: PathBuf) -> Result<ModelHandle, PredictError> {
        let loader = Arc::clone(&self.loader);
        let started = Instant::now();
        let model = tokio::task::spawn_blocking(move || loader(&path))
            .await
            .map_err(|e| PredictError::Inference(format!("model loader task failed: {e}")))??;
        debug!("Model deserialised in {:?}", started.elapsed());
        Ok(model)
    }

    fn ephemeral_path(&self) -> PathBuf {
        let seq = self.ephemeral_seq.fetch_add(1, Ordering::Relaxed);
        let mut name = self.artifact_path.as_os_str().to_os_string();
        name.push(format!(".{:08x}-{}.tmp", self.ephemeral_nonce, seq));
        PathBuf::from(name)
    }
}

/// Scope guard for a request-private artifact file.
struct EphemeralArtifact<'a> {
    path: PathBuf,
    in_use: &'a AtomicUsize,
}

impl<'a> EphemeralArtifact<'a> {
    fn new(path: PathBuf, in_use: &'a AtomicUsize) -> Self {
        in_use.fetch_add(1, Ordering::AcqRel);
        EphemeralArtifact { path, in_use }
    }
}

impl Drop for EphemeralArtifact<'_> {
    fn drop(&mut self) {
        // Blocking unlink: the file must be gone before the response is sent.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed ephemeral artifact {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove ephemeral artifact {}: {}",
                self.path.display(),
                e
            ),
        }
        self.in_use.fetch_sub(1, Ordering::AcqRel);
    }
}
