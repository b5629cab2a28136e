use std::path::PathBuf;

use anyhow::Context as _;
use bytes::Bytes;
use futures_util::StreamExt as _;
use tokio::io::AsyncWriteExt as _;
use tracing::debug;

use crate::{
    config::FetchConfig,
    error::{FuseError, FuseResult},
    temp::TempTracker,
};

const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// A fetched remote image, held only long enough to rewrite its reference.
#[derive(Clone, Debug)]
pub struct FetchedImage {
    pub bytes: Bytes,
    pub mime: String,
}

/// Bounded HTTP fetcher for the two remote asset kinds.
///
/// Images are buffered in memory under a small ceiling; the video clip is
/// streamed to a temp file that is registered for cleanup before the first
/// byte arrives, so a mid-stream failure still releases it.
#[derive(Debug)]
pub struct AssetFetcher {
    http: reqwest::Client,
    config: FetchConfig,
}

impl AssetFetcher {
    pub fn new(config: FetchConfig) -> FuseResult<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .use_rustls_tls()
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, config })
    }

    pub fn image_concurrency(&self) -> usize {
        self.config.image_concurrency
    }

    /// Fetch one remote image. Errors here are soft from the document's point
    /// of view; the preprocessor logs them and leaves the node untouched.
    pub async fn fetch_image(&self, url: &str) -> FuseResult<FetchedImage> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.image_timeout())
            .send()
            .await
            .map_err(|e| FuseError::input(format!("image request to '{url}' failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FuseError::input(format!(
                "image request to '{url}' returned status {}",
                response.status()
            )));
        }

        if let Some(len) = response.content_length()
            && len > self.config.max_image_bytes
        {
            return Err(FuseError::input(format!(
                "image at '{url}' is too large: {len} bytes (max {})",
                self.config.max_image_bytes
            )));
        }

        let header_mime = response_mime(&response);
        let bytes = response
            .bytes()
            .await
            .map_err(|e| FuseError::input(format!("failed to read image body from '{url}': {e}")))?;
        if bytes.len() as u64 > self.config.max_image_bytes {
            return Err(FuseError::input(format!(
                "image at '{url}' is too large: {} bytes (max {})",
                bytes.len(),
                self.config.max_image_bytes
            )));
        }

        // Content-Type wins when it is an image type; otherwise fall back to
        // the URL's extension, then to a generic image type.
        let mime = header_mime
            .filter(|m| m.starts_with("image/"))
            .or_else(|| mime_from_extension(url).map(str::to_string))
            .unwrap_or_else(|| DEFAULT_IMAGE_MIME.to_string());
        if !mime.starts_with("image/") {
            return Err(FuseError::input(format!(
                "resource at '{url}' is not an image (resolved type '{mime}')"
            )));
        }

        debug!(url, mime = %mime, bytes = bytes.len(), "fetched remote image");
        Ok(FetchedImage { bytes, mime })
    }

    /// Download the video clip to a tracked temp file. Any failure here is a
    /// hard failure for the run.
    pub async fn fetch_video(&self, url: &str, temp: &TempTracker) -> FuseResult<PathBuf> {
        let response = self
            .http
            .get(url)
            .timeout(self.config.video_timeout())
            .send()
            .await
            .map_err(|e| FuseError::input(format!("video request to '{url}' failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FuseError::input(format!(
                "video request to '{url}' returned status {}",
                response.status()
            )));
        }

        let mime = response_mime(&response).unwrap_or_default();
        if !mime.starts_with("video/") {
            return Err(FuseError::input(format!(
                "remote clip at '{url}' has non-video content type '{mime}'"
            )));
        }

        if let Some(len) = response.content_length()
            && len > self.config.max_video_bytes
        {
            return Err(FuseError::input(format!(
                "video at '{url}' is too large: {len} bytes (max {})",
                self.config.max_video_bytes
            )));
        }

        let path = temp.create(".mp4")?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("open temp video file '{}'", path.display()))?;

        let mut stream = response.bytes_stream();
        let mut total: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                FuseError::input(format!("video download from '{url}' failed mid-stream: {e}"))
            })?;
            total += chunk.len() as u64;
            if total > self.config.max_video_bytes {
                return Err(FuseError::input(format!(
                    "video at '{url}' exceeded {} bytes mid-stream",
                    self.config.max_video_bytes
                )));
            }
            file.write_all(&chunk)
                .await
                .context("write video chunk to temp file")?;
        }
        file.flush().await.context("flush temp video file")?;

        debug!(url, bytes = total, path = %path.display(), "downloaded video clip");
        Ok(path)
    }
}

fn response_mime(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
        .filter(|v| !v.is_empty())
}

fn mime_from_extension(url: &str) -> Option<&'static str> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let ext = std::path::Path::new(parsed.path())
        .extension()?
        .to_str()?
        .to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "tif" | "tiff" => Some("image/tiff"),
        "ico" => Some("image/x-icon"),
        "svg" => Some("image/svg+xml"),
        "avif" => Some("image/avif"),
        // Recognized non-image types so a mislabeled clip URL is rejected
        // instead of defaulting to a generic image type.
        "mp4" => Some("video/mp4"),
        "webm" => Some("video/webm"),
        "mov" => Some("video/quicktime"),
        "avi" => Some("video/x-msvideo"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> AssetFetcher {
        AssetFetcher::new(FetchConfig::default()).unwrap()
    }

    #[test]
    fn client_build_failure_is_an_environment_error() {
        let mut config = FetchConfig::default();
        config.user_agent = "bad\nagent".to_string();
        let err = AssetFetcher::new(config).unwrap_err();
        assert!(matches!(err, FuseError::Other(_)));
    }

    #[test]
    fn extension_guesses() {
        assert_eq!(
            mime_from_extension("https://cdn.example/a/pic.PNG?v=2"),
            Some("image/png")
        );
        assert_eq!(
            mime_from_extension("https://cdn.example/clip.mp4"),
            Some("video/mp4")
        );
        assert_eq!(mime_from_extension("https://cdn.example/no-ext"), None);
        assert_eq!(mime_from_extension("not a url"), None);
    }

    #[tokio::test]
    async fn image_mime_prefers_content_type_header() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/pic.jpg")
            .with_header("content-type", "image/webp; charset=binary")
            .with_body(vec![1, 2, 3])
            .create_async()
            .await;

        let img = fetcher()
            .fetch_image(&format!("{}/pic.jpg", server.url()))
            .await
            .unwrap();
        assert_eq!(img.mime, "image/webp");
        assert_eq!(img.bytes.as_ref(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn image_mime_falls_back_to_extension_then_default() {
        let mut server = mockito::Server::new_async().await;
        let _png = server
            .mock("GET", "/pic.png")
            .with_header("content-type", "application/octet-stream")
            .with_body(vec![0u8; 8])
            .create_async()
            .await;
        let _bare = server
            .mock("GET", "/pic")
            .with_body(vec![0u8; 8])
            .create_async()
            .await;

        let f = fetcher();
        let img = f
            .fetch_image(&format!("{}/pic.png", server.url()))
            .await
            .unwrap();
        assert_eq!(img.mime, "image/png");

        let img = f.fetch_image(&format!("{}/pic", server.url())).await.unwrap();
        assert_eq!(img.mime, DEFAULT_IMAGE_MIME);
    }

    #[tokio::test]
    async fn image_rejects_resolved_non_image_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/clip.mp4")
            .with_header("content-type", "application/octet-stream")
            .with_body(vec![0u8; 8])
            .create_async()
            .await;

        let err = fetcher()
            .fetch_image(&format!("{}/clip.mp4", server.url()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not an image"));
    }

    #[tokio::test]
    async fn image_rejects_oversize_body() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/big.png")
            .with_header("content-type", "image/png")
            .with_body(vec![0u8; 64])
            .create_async()
            .await;

        let mut config = FetchConfig::default();
        config.max_image_bytes = 16;
        let err = AssetFetcher::new(config)
            .unwrap()
            .fetch_image(&format!("{}/big.png", server.url()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[tokio::test]
    async fn image_rejects_http_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let err = fetcher()
            .fetch_image(&format!("{}/gone.png", server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, FuseError::Input(_)));
    }

    #[tokio::test]
    async fn video_rejects_non_video_content_type() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/clip")
            .with_header("content-type", "text/html")
            .with_body("<html></html>")
            .create_async()
            .await;

        let temp = TempTracker::new();
        let err = fetcher()
            .fetch_video(&format!("{}/clip", server.url()), &temp)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("non-video content type"));
    }

    #[tokio::test]
    async fn video_streams_body_to_tracked_temp_file() {
        let body = vec![7u8; 4096];
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/clip.mp4")
            .with_header("content-type", "video/mp4")
            .with_body(body.clone())
            .create_async()
            .await;

        let temp = TempTracker::new();
        let path = fetcher()
            .fetch_video(&format!("{}/clip.mp4", server.url()), &temp)
            .await
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), body);

        temp.cleanup();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn video_enforces_ceiling_mid_stream() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/clip.mp4")
            .with_header("content-type", "video/mp4")
            .with_body(vec![0u8; 1024])
            .create_async()
            .await;

        let mut config = FetchConfig::default();
        config.max_video_bytes = 512;
        let temp = TempTracker::new();
        let err = AssetFetcher::new(config)
            .unwrap()
            .fetch_video(&format!("{}/clip.mp4", server.url()), &temp)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("too large") || err.to_string().contains("exceeded"));
    }
}
