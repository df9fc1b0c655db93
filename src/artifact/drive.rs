use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use super::ArtifactFetcher;
use crate::error::FetchError;

/// Downloads artifacts from a Google-Drive style store (`/uc?id=<id>`).
#[derive(Clone)]
pub struct DriveFetcher {
    http: Client,
    /// Base URL for overriding in tests
    base_url: String,
}

impl DriveFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(DriveFetcher {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn download_url(&self, identifier: &str) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/uc", self.base_url))?;
        url.query_pairs_mut()
            .append_pair("id", identifier)
            .append_pair("export", "download")
            .append_pair("confirm", "t");
        Ok(url)
    }

    async fn download(&self, identifier: &str, part: &Path) -> Result<u64, FetchError> {
        let url = self.download_url(identifier)?;
        debug!("Downloading model artifact from {}", url);

        let resp = self.http.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(FetchError::Status {
                identifier: identifier.to_string(),
                status: resp.status(),
            });
        }

        // Unknown ids and quota errors come back as an HTML page with 200.
        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false);
        if is_html {
            return Err(FetchError::NotAnArtifact(identifier.to_string()));
        }

        let mut file = tokio::fs::File::create(part).await?;
        let mut written = 0u64;
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Removes an in-flight `.part` file unless the download was committed.
/// Runs on error returns and when the fetch future is dropped mid-stream.
struct PartialDownload {
    path: PathBuf,
    committed: bool,
}

impl PartialDownload {
    fn new(destination: &Path) -> Self {
        PartialDownload {
            path: part_path(destination),
            committed: false,
        }
    }

    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove partial download {}: {}", self.path.display(), e);
            }
        }
    }
}

#[async_trait]
impl ArtifactFetcher for DriveFetcher {
    fn name(&self) -> &str {
        "drive"
    }

    async fn ensure_present(&self, identifier: &str, destination: &Path) -> Result<(), FetchError> {
        if tokio::fs::try_exists(destination).await? {
            debug!("Model artifact already present at {}", destination.display());
            return Ok(());
        }

        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        info!("📥 Downloading model '{}' to {}", identifier, destination.display());
        let part = PartialDownload::new(destination);
        let bytes = self.download(identifier, &part.path).await?;
        tokio::fs::rename(&part.path, destination).await?;
        part.commit();
        info!("✅ Model downloaded ({} bytes)", bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, Bytes},
        extract::Query,
        http::header,
        response::IntoResponse,
        routing::get,
        Router,
    };
    use futures_util::stream;
    use std::collections::HashMap;

    async fn uc_handler(Query(q): Query<HashMap<String, String>>) -> impl IntoResponse {
        match q.get("id").map(String::as_str) {
            Some("good") => (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                "{\"model_type\":\"linear_model\"}",
            )
                .into_response(),
            Some("quota") => (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                "<html>Too many users have viewed or downloaded this file</html>",
            )
                .into_response(),
            // First chunk, then the connection stalls forever.
            Some("stall") => {
                let first = stream::once(async {
                    Ok::<_, std::io::Error>(Bytes::from_static(b"{\"model_type\":"))
                });
                let body = Body::from_stream(first.chain(stream::pending()));
                ([(header::CONTENT_TYPE, "application/octet-stream")], body).into_response()
            }
            _ => axum::http::StatusCode::NOT_FOUND.into_response(),
        }
    }

    async fn serve() -> String {
        let app = Router::new().route("/uc", get(uc_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn download_url_carries_identifier() {
        let f = DriveFetcher::new("https://drive.google.com/", Duration::from_secs(5)).unwrap();
        let url = f.download_url("1FBM4lYhm9pvEmlL4vmJV0YMKl-rIIXaJ").unwrap();
        assert_eq!(
            url.as_str(),
            "https://drive.google.com/uc?id=1FBM4lYhm9pvEmlL4vmJV0YMKl-rIIXaJ&export=download&confirm=t"
        );
    }

    #[tokio::test]
    async fn downloads_when_absent() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("models").join("model.json");
        let f = DriveFetcher::new(&base, Duration::from_secs(5)).unwrap();

        f.ensure_present("good", &dest).await.unwrap();

        let body = std::fs::read_to_string(&dest).unwrap();
        assert!(body.contains("linear_model"));
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn existing_file_is_trusted() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.json");
        std::fs::write(&dest, "cached").unwrap();
        // Unroutable base: any network access would fail the test.
        let f = DriveFetcher::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();

        f.ensure_present("good", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "cached");
    }

    #[tokio::test]
    async fn unknown_identifier_is_a_status_error() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.json");
        let f = DriveFetcher::new(&base, Duration::from_secs(5)).unwrap();

        let err = f.ensure_present("missing", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[tokio::test]
    async fn html_interstitial_is_rejected() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.json");
        let f = DriveFetcher::new(&base, Duration::from_secs(5)).unwrap();

        let err = f.ensure_present("quota", &dest).await.unwrap_err();
        assert!(matches!(err, FetchError::NotAnArtifact(id) if id == "quota"));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn cancelled_download_leaves_no_partial_file() {
        let base = serve().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("model.json");
        let part = part_path(&dest);
        let f = DriveFetcher::new(&base, Duration::from_secs(30)).unwrap();

        let task = {
            let dest = dest.clone();
            tokio::spawn(async move { f.ensure_present("stall", &dest).await })
        };
        for _ in 0..200 {
            if part.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(part.exists(), "download never started");

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert!(!part.exists());
        assert!(!dest.exists());
    }
}
