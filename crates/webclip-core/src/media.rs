//! Media enumeration and concurrent download
//!
//! Assets are addressed by a hash of their remote URL, so a second run over
//! the same page finds the files already on disk and makes no requests.
//! Two requests racing to create the same new asset both write a temp file and
//! rename it into place; the last rename wins.

use crate::clean::LAZY_ATTRIBUTES;
use crate::config::MediaConfig;
use crate::MediaAsset;
use futures::stream::{self, StreamExt};
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::Client;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use url::Url;

/// Subdirectory of the output directory holding downloaded media
pub const MEDIA_SUBDIR: &str = "media";

const SLUG_MAX_CHARS: usize = 30;
const HASH_HEX_CHARS: usize = 12;

const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "svg", "bmp", "ico", "avif", "mp4", "webm", "mov", "m4v",
    "mp3", "wav", "ogg", "m4a", "aac", "flac",
];

static MEDIA_ELEMENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("img, video, audio, source").expect("valid selector"));

/// A single failed download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaError {
    pub url: String,
    pub reason: String,
}

/// Result of downloading one page's media
#[derive(Debug, Clone, Default)]
pub struct MediaReport {
    /// Saved (or reused) assets in enumeration order
    pub assets: Vec<MediaAsset>,
    /// Remote URL to local relative path
    pub rewrites: HashMap<String, String>,
    /// Downloads that were skipped or failed
    pub failed: Vec<MediaError>,
}

/// Collect media URLs from cleaned HTML, resolved against `base`, in
/// first-seen order without duplicates.
pub fn enumerate_media(html: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_fragment(html);
    let mut seen = HashSet::new();
    let mut urls = Vec::new();

    for el in document.select(&MEDIA_ELEMENTS) {
        let attrs: Vec<&str> = match el.value().name() {
            "img" => std::iter::once("src")
                .chain(LAZY_ATTRIBUTES.iter().copied())
                .collect(),
            "video" => vec!["src", "poster"],
            _ => vec!["src"],
        };

        for attr in attrs {
            let Some(value) = el.value().attr(attr) else {
                continue;
            };
            let Some(resolved) = resolve_media_url(value, base) else {
                continue;
            };
            if seen.insert(resolved.clone()) {
                urls.push(resolved);
            }
            // One asset per img: the first usable attribute
            if el.value().name() == "img" {
                break;
            }
        }
    }
    urls
}

fn resolve_media_url(value: &str, base: &Url) -> Option<String> {
    let value = value.trim();
    if value.is_empty() || value.starts_with("data:") || value.starts_with("blob:") {
        return None;
    }
    let url = base.join(value).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// First 12 hex digits of the SHA-256 of the URL
pub fn url_hash(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..HASH_HEX_CHARS].to_string()
}

/// Filesystem-safe stem taken from the URL path
pub fn slug_for(url: &str) -> String {
    let stem = Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
        })
        .map(|name| match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name,
        })
        .unwrap_or_default();

    let slug: String = stem
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(SLUG_MAX_CHARS)
        .collect();

    if slug.trim_matches('_').is_empty() {
        "media".to_string()
    } else {
        slug
    }
}

/// Supported extension from the URL path, lower-cased
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?.to_string();
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    SUPPORTED_EXTENSIONS.contains(&ext.as_str()).then_some(ext)
}

/// Extension for a MIME type, by exact type then by category
pub fn extension_from_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let exact = match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "image/bmp" => Some("bmp"),
        "image/x-icon" | "image/vnd.microsoft.icon" => Some("ico"),
        "image/avif" => Some("avif"),
        "video/mp4" => Some("mp4"),
        "video/webm" => Some("webm"),
        "video/quicktime" => Some("mov"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" => Some("wav"),
        "audio/ogg" => Some("ogg"),
        "audio/aac" => Some("aac"),
        "audio/flac" => Some("flac"),
        "audio/mp4" | "audio/x-m4a" => Some("m4a"),
        _ => None,
    };
    exact.or_else(|| match mime.split('/').next() {
        Some("image") => Some("jpg"),
        Some("video") => Some("mp4"),
        Some("audio") => Some("mp3"),
        _ => None,
    })
}

/// Whether a response with this MIME type may be saved as media
fn mime_acceptable(content_type: Option<&str>) -> bool {
    let Some(content_type) = content_type else {
        return true;
    };
    let mime = content_type.to_ascii_lowercase();
    mime.starts_with("image/")
        || mime.starts_with("video/")
        || mime.starts_with("audio/")
        || mime.starts_with("application/octet-stream")
        || mime.trim().is_empty()
}

/// Downloads media into `<output>/media/`
#[derive(Debug, Clone)]
pub struct MediaDownloader {
    client: Client,
    config: MediaConfig,
    media_dir: PathBuf,
}

enum Attempt {
    Saved(MediaAsset),
    Retry(String),
    Reject(String),
}

impl MediaDownloader {
    pub fn new(client: Client, config: MediaConfig, output_dir: &Path) -> Self {
        Self {
            client,
            config,
            media_dir: output_dir.join(MEDIA_SUBDIR),
        }
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Download every URL with bounded concurrency. Results keep input order.
    pub async fn download_all(&self, urls: &[String], referer: Option<&Url>) -> MediaReport {
        let mut report = MediaReport::default();
        if urls.is_empty() {
            return report;
        }
        if let Err(e) = fs::create_dir_all(&self.media_dir) {
            warn!("Cannot create media directory {:?}: {}", self.media_dir, e);
            report.failed = urls
                .iter()
                .map(|url| MediaError {
                    url: url.clone(),
                    reason: e.to_string(),
                })
                .collect();
            return report;
        }

        info!("Downloading {} media file(s)", urls.len());
        let mut results: Vec<(usize, Result<MediaAsset, MediaError>)> =
            stream::iter(urls.iter().cloned().enumerate())
                .map(|(index, url)| async move {
                    let result = self.download(&url, referer).await;
                    (index, result)
                })
                .buffer_unordered(self.config.max_workers.max(1))
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        for (_, result) in results {
            match result {
                Ok(asset) => {
                    report
                        .rewrites
                        .insert(asset.remote_url.clone(), asset.local_path.clone());
                    report.assets.push(asset);
                }
                Err(error) => {
                    warn!("Media download failed for {}: {}", error.url, error.reason);
                    report.failed.push(error);
                }
            }
        }
        report
    }

    /// Download one asset, reusing an existing file with the same address
    pub async fn download(&self, url: &str, referer: Option<&Url>) -> Result<MediaAsset, MediaError> {
        let slug = slug_for(url);
        let hash = url_hash(url);

        if let Some(existing) = self.find_existing(&slug, &hash) {
            debug!("Reusing {:?} for {}", existing, url);
            return self.asset_for(url, &existing, None);
        }

        let mut last_reason = String::new();
        for attempt in 0..=self.config.retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                debug!("Retrying {} (attempt {})", url, attempt + 1);
            }
            match self.try_once(url, &slug, &hash, referer).await {
                Attempt::Saved(asset) => return Ok(asset),
                Attempt::Reject(reason) => {
                    return Err(MediaError {
                        url: url.to_string(),
                        reason,
                    })
                }
                Attempt::Retry(reason) => last_reason = reason,
            }
        }
        Err(MediaError {
            url: url.to_string(),
            reason: last_reason,
        })
    }

    async fn try_once(&self, url: &str, slug: &str, hash: &str, referer: Option<&Url>) -> Attempt {
        let mut request = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.config.timeout_secs));
        if let Some(referer) = referer {
            request = request.header(REFERER, referer.as_str());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return Attempt::Retry(format!("request failed: {}", e)),
        };

        let status = response.status();
        if status.is_server_error() {
            return Attempt::Retry(format!("HTTP status {}", status));
        }
        if !status.is_success() {
            return Attempt::Reject(format!("HTTP status {}", status));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());
        if !mime_acceptable(content_type.as_deref()) {
            return Attempt::Reject(format!(
                "unsupported content type {}",
                content_type.unwrap_or_default()
            ));
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Attempt::Retry(format!("reading body failed: {}", e)),
        };
        if bytes.len() < self.config.min_bytes {
            return Attempt::Reject(format!("body too small ({} bytes)", bytes.len()));
        }

        let ext = extension_from_url(url)
            .or_else(|| {
                content_type
                    .as_deref()
                    .and_then(extension_from_mime)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "bin".to_string());
        let target = self.media_dir.join(format!("{}_{}.{}", slug, hash, ext));

        match write_atomic(&self.media_dir, &target, &bytes) {
            Ok(()) => match self.asset_for(url, &target, content_type) {
                Ok(asset) => Attempt::Saved(asset),
                Err(e) => Attempt::Reject(e.reason),
            },
            Err(e) => Attempt::Reject(format!("write failed: {}", e)),
        }
    }

    /// A file named `<slug>_<hash>.*` already in the media directory
    fn find_existing(&self, slug: &str, hash: &str) -> Option<PathBuf> {
        let prefix = format!("{}_{}.", slug, hash);
        fs::read_dir(&self.media_dir)
            .ok()?
            .filter_map(|entry| entry.ok())
            .find(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
            .map(|entry| entry.path())
    }

    fn asset_for(
        &self,
        url: &str,
        path: &Path,
        content_type: Option<String>,
    ) -> Result<MediaAsset, MediaError> {
        let size = fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| MediaError {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(MediaAsset {
            remote_url: url.to_string(),
            local_path: format!("{}/{}", MEDIA_SUBDIR, file_name),
            content_type,
            size,
        })
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://example.com/post/1").unwrap()
    }

    #[test]
    fn test_enumerate_media_order_and_dedup() {
        let html = r#"
            <img src="a.jpg">
            <img data-src="/lazy.png">
            <video src="https://cdn.example.com/v.mp4" poster="poster.jpg"></video>
            <img src="https://example.com/post/a.jpg">
            <img src="data:image/png;base64,AAAA">
            <audio src="blob:https://example.com/123"></audio>
            <source src="ftp://example.com/x.mp3">
        "#;
        assert_eq!(
            enumerate_media(html, &base()),
            vec![
                "https://example.com/post/a.jpg",
                "https://example.com/lazy.png",
                "https://cdn.example.com/v.mp4",
                "https://example.com/post/poster.jpg",
            ]
        );
    }

    #[test]
    fn test_hash_is_stable() {
        let a = url_hash("https://example.com/a.jpg");
        assert_eq!(a.len(), 12);
        assert_eq!(a, url_hash("https://example.com/a.jpg"));
        assert_ne!(a, url_hash("https://example.com/b.jpg"));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug_for("https://e.com/img/my photo.jpg"), "my_20photo");
        assert_eq!(slug_for("https://e.com/"), "media");
        assert_eq!(
            slug_for("https://e.com/aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa.png").len(),
            30
        );
    }

    #[test]
    fn test_extension_resolution() {
        assert_eq!(extension_from_url("https://e.com/a.JPG?x=1"), Some("jpg".to_string()));
        assert_eq!(extension_from_url("https://e.com/a.php"), None);
        assert_eq!(extension_from_mime("image/png; charset=binary"), Some("png"));
        assert_eq!(extension_from_mime("image/x-weird"), Some("jpg"));
        assert_eq!(extension_from_mime("video/x-other"), Some("mp4"));
        assert_eq!(extension_from_mime("text/html"), None);
    }

    #[test]
    fn test_mime_acceptance() {
        assert!(mime_acceptable(None));
        assert!(mime_acceptable(Some("image/jpeg")));
        assert!(!mime_acceptable(Some("text/html; charset=utf-8")));
    }

    #[test]
    fn test_empty_list_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = MediaDownloader::new(Client::new(), MediaConfig::default(), dir.path());
        let report = tokio_test::block_on(downloader.download_all(&[], None));
        assert!(report.assets.is_empty() && report.failed.is_empty());
        assert!(!downloader.media_dir().exists());
    }
}
