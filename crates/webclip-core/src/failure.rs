//! Failure taxonomy for pipeline items
//!
//! Every stage turns its own errors into a [`Failure`] so that nothing escapes
//! the batch loop. A [`FailureRecord`] is the terminal, timestamped form that
//! lands in the manual-review file.

use chrono::{DateTime, Local};
use std::fmt;

/// Pipeline stage an item was in when something happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Intake,
    Fetch,
    ShellCheck,
    DynamicFallback,
    Clean,
    Convert,
    MediaDownload,
    Rewrite,
    Persist,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intake => "intake",
            Stage::Fetch => "fetch",
            Stage::ShellCheck => "shell_check",
            Stage::DynamicFallback => "dynamic_fallback",
            Stage::Clean => "clean",
            Stage::Convert => "convert",
            Stage::MediaDownload => "media_download",
            Stage::Rewrite => "rewrite",
            Stage::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error codes surfaced to the manual-review record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCode {
    /// Network error, bad status or unusable URL
    FetchFailed,
    /// Shell page and every fallback strategy exhausted
    DynamicPageUnresolved,
    /// The page explicitly says the content was removed or expired
    ArticleUnavailable,
    /// Extracted body below the minimum length
    ContentEmpty,
    /// Per-item budget exhausted
    TimeoutTotal,
    /// Unexpected error in clean/convert/media/persist
    ConvertError,
    /// Rendering capability missing in this environment
    DynamicHandlerUnavailable,
}

impl FailureCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCode::FetchFailed => "FETCH_FAILED",
            FailureCode::DynamicPageUnresolved => "DYNAMIC_PAGE_UNRESOLVED",
            FailureCode::ArticleUnavailable => "ARTICLE_UNAVAILABLE",
            FailureCode::ContentEmpty => "CONTENT_EMPTY",
            FailureCode::TimeoutTotal => "TIMEOUT_TOTAL",
            FailureCode::ConvertError => "CONVERT_ERROR",
            FailureCode::DynamicHandlerUnavailable => "DYNAMIC_HANDLER_UNAVAILABLE",
        }
    }
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stage-tagged failure flowing through the pipeline as data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub code: FailureCode,
    pub stage: Stage,
    pub message: String,
}

/// Diagnostics reported by dynamic strategies share the failure shape
pub type Diagnostic = Failure;

impl Failure {
    pub fn new(code: FailureCode, stage: Stage, message: impl Into<String>) -> Self {
        Self {
            code,
            stage,
            message: message.into(),
        }
    }

    pub fn fetch(message: impl Into<String>) -> Self {
        Self::new(FailureCode::FetchFailed, Stage::Fetch, message)
    }

    pub fn timeout(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(FailureCode::TimeoutTotal, stage, message)
    }

    pub fn convert(stage: Stage, message: impl Into<String>) -> Self {
        Self::new(FailureCode::ConvertError, stage, message)
    }

    /// Attach the request URL and the current time
    pub fn into_record(self, url: &str) -> FailureRecord {
        FailureRecord {
            url: url.to_string(),
            code: self.code,
            stage: self.stage,
            message: self.message,
            timestamp: Local::now(),
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.code, self.stage, self.message)
    }
}

impl std::error::Error for Failure {}

/// Terminal failure of one request
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub url: String,
    pub code: FailureCode,
    pub stage: Stage,
    pub message: String,
    pub timestamp: DateTime<Local>,
}

impl FailureRecord {
    /// Render as a manual-review block
    pub fn to_block(&self) -> String {
        format!(
            "URL: {}\nError: {}\nStage: {}\nMessage: {}\nTime: {}",
            self.url,
            self.code,
            self.stage,
            self.message,
            self.timestamp.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_render_screaming_case() {
        assert_eq!(FailureCode::TimeoutTotal.to_string(), "TIMEOUT_TOTAL");
        assert_eq!(
            FailureCode::DynamicHandlerUnavailable.as_str(),
            "DYNAMIC_HANDLER_UNAVAILABLE"
        );
    }

    #[test]
    fn test_record_block_lists_every_field() {
        let record = Failure::fetch("status 404").into_record("https://example.com/x");
        let block = record.to_block();
        assert!(block.contains("URL: https://example.com/x"));
        assert!(block.contains("Error: FETCH_FAILED"));
        assert!(block.contains("Stage: fetch"));
        assert!(block.contains("Message: status 404"));
        assert!(block.contains("Time: "));
    }
}
