pub mod drive;

pub use drive::DriveFetcher;

use async_trait::async_trait;
use std::path::Path;

use crate::error::FetchError;

/// Fetch-if-absent access to the remote artifact store.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    /// Make sure the artifact `identifier` exists at `destination`.
    ///
    /// A file already at `destination` is trusted as-is and nothing is
    /// downloaded.
    async fn ensure_present(&self, identifier: &str, destination: &Path) -> Result<(), FetchError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
