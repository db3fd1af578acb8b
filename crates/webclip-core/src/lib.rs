//! Webclip Core Library
//!
//! The resilient content-extraction pipeline behind webclip:
//! - HTTP fetching with explicit decompression and charset resolution
//! - Client-side-rendered shell detection
//! - Per-domain dynamic fallbacks (syndication API, headless Chrome)
//! - Content cleaning and HTML to Markdown conversion
//! - Concurrent media download and link rewriting
//! - Batch orchestration with deduplication and per-item time budgets

pub mod budget;
pub mod chrome;
pub mod clean;
pub mod config;
pub mod decode;
pub mod dedup;
pub mod dynamic;
pub mod extract;
pub mod failure;
pub mod fetch;
pub mod markdown;
pub mod media;
pub mod orchestrator;
pub mod persist;
pub mod rewrite;
pub mod shell;

use std::path::PathBuf;
use thiserror::Error;

// Re-export key types
pub use budget::Deadline;
pub use config::Settings;
pub use dedup::{BatchInput, DedupKey};
pub use dynamic::{DynamicStrategy, Route, Router, Trigger};
pub use failure::{Diagnostic, Failure, FailureCode, FailureRecord, Stage};
pub use fetch::{FetchedPage, Fetcher};
pub use markdown::{Backend, MarkdownConverter};
pub use orchestrator::{BatchReport, Orchestrator, Outcome};
pub use shell::{ShellDetector, ShellVerdict};

#[derive(Error, Debug)]
pub enum ClipError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClipError>;

/// Where a piece of extracted content came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The statically fetched HTML
    Static,
    /// A public syndication endpoint
    Syndication,
    /// A headless browser rendering
    HeadlessRender,
}

/// Content ready for cleaning and conversion
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// HTML fragment (or full document) holding the content
    pub html: String,
    /// Page title
    pub title: Option<String>,
    /// Short description / summary
    pub description: Option<String>,
    /// Author or handle
    pub author: Option<String>,
    /// Publish time as found on the page
    pub publish_time: Option<String>,
    /// Stage that produced this content
    pub origin: Origin,
}

/// One unit of work in a batch
#[derive(Debug, Clone)]
pub struct ContentRequest {
    /// The URL to archive
    pub url: url::Url,
    /// Explicit output file name, overriding the title-derived one
    pub output_name: Option<String>,
    /// Whether embedded media should be downloaded
    pub download_media: bool,
    /// Absolute point in time by which the request must be terminal
    pub deadline: Deadline,
}

/// A media file saved next to the markdown output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAsset {
    /// Absolute remote URL the asset was fetched from
    pub remote_url: String,
    /// Path relative to the output directory, e.g. `media/cat_0123456789ab.jpg`
    pub local_path: String,
    /// MIME type reported by the server, if any
    pub content_type: Option<String>,
    /// Size on disk in bytes
    pub size: u64,
}

/// A persisted markdown document
#[derive(Debug, Clone)]
pub struct OutputDocument {
    /// Full markdown text as written
    pub markdown: String,
    /// Where it was written
    pub path: PathBuf,
}
