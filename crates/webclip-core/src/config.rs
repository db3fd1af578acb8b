//! Configuration management

use crate::{ClipError, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// HTTP fetching
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Shell detection thresholds
    #[serde(default)]
    pub shell: ShellConfig,

    /// Content cleaning
    #[serde(default)]
    pub clean: CleanConfig,

    /// Media downloading
    #[serde(default)]
    pub media: MediaConfig,

    /// Headless rendering
    #[serde(default)]
    pub render: RenderConfig,

    /// Syndication endpoint
    #[serde(default)]
    pub syndication: SyndicationConfig,

    /// URL deduplication
    #[serde(default)]
    pub dedup: DedupConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Directory receiving markdown files and the media/ subdirectory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Download embedded media
    #[serde(default = "default_true")]
    pub download_media: bool,

    /// Wall-clock budget per URL in seconds
    #[serde(default = "default_budget")]
    pub budget_secs: u64,

    /// Markdown backend: "auto", "htmd", "html2md" or "builtin"
    #[serde(default = "default_converter")]
    pub converter: String,

    /// Start each document with a `# title` line
    #[serde(default = "default_true")]
    pub include_title: bool,

    /// Minimum non-whitespace characters in the converted body
    #[serde(default = "default_min_body_chars")]
    pub min_body_chars: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            download_media: default_true(),
            budget_secs: default_budget(),
            converter: default_converter(),
            include_title: default_true(),
            min_body_chars: default_min_body_chars(),
        }
    }
}

/// Extra headers sent to hosts containing `domain`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeaderOverride {
    pub domain: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Accept-Language header
    #[serde(default = "default_accept_language")]
    pub accept_language: String,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Declared charsets that are ignored because servers use them as placeholders
    #[serde(default = "default_unreliable_charsets")]
    pub unreliable_charsets: Vec<String>,

    /// Per-domain header overrides, matched by substring on the host
    #[serde(default = "default_header_overrides")]
    pub header_overrides: Vec<HeaderOverride>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            timeout_secs: default_timeout(),
            unreliable_charsets: default_unreliable_charsets(),
            header_overrides: default_header_overrides(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Substrings that betray a client-side bootstrap
    #[serde(default = "default_loader_markers")]
    pub loader_markers: Vec<String>,

    /// Markers needed (with no structural content) to call a page a shell
    #[serde(default = "default_min_marker_hits")]
    pub min_marker_hits: usize,

    /// Script-to-element ratio inside <body> above which a page is a shell
    #[serde(default = "default_max_script_ratio")]
    pub max_script_ratio: f64,

    /// Visible text a structural tag needs to count as real content
    #[serde(default = "default_structural_min_chars")]
    pub structural_min_chars: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            loader_markers: default_loader_markers(),
            min_marker_hits: default_min_marker_hits(),
            max_script_ratio: default_max_script_ratio(),
            structural_min_chars: default_structural_min_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanConfig {
    /// Visible text a content region needs before it is preferred over <body>
    #[serde(default = "default_structural_min_chars")]
    pub min_region_chars: usize,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            min_region_chars: default_structural_min_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Concurrent downloads per page
    #[serde(default = "default_media_workers")]
    pub max_workers: usize,

    /// Responses smaller than this are treated as error pages
    #[serde(default = "default_min_bytes")]
    pub min_bytes: usize,

    /// Extra attempts after a network error or 5xx
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Per-file timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_workers: default_media_workers(),
            min_bytes: default_min_bytes(),
            retries: default_retries(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Browser mode: "auto", "system" or "none"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Custom Chrome binary path
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// Upper bound on waiting for navigation
    #[serde(default = "default_nav_timeout")]
    pub nav_timeout_secs: u64,

    /// Delay after navigation before reading the DOM
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Extra wait before the single probe retry
    #[serde(default = "default_retry_wait_ms")]
    pub retry_wait_ms: u64,

    /// Minimum text for generic content probes
    #[serde(default = "default_min_probe_chars")]
    pub min_probe_chars: usize,

    /// URL substrings that select the mobile profile
    #[serde(default = "default_mobile_patterns")]
    pub mobile_patterns: Vec<String>,

    /// Referrer per domain substring; the URL origin otherwise
    #[serde(default)]
    pub referers: Vec<(String, String)>,

    /// Page text that means the content was removed
    #[serde(default = "default_unavailable_signals")]
    pub unavailable_signals: Vec<String>,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            chrome_path: None,
            nav_timeout_secs: default_nav_timeout(),
            settle_ms: default_settle_ms(),
            retry_wait_ms: default_retry_wait_ms(),
            min_probe_chars: default_min_probe_chars(),
            mobile_patterns: default_mobile_patterns(),
            referers: Vec::new(),
            unavailable_signals: default_unavailable_signals(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyndicationConfig {
    /// Public read endpoint taking `id` and `token` query parameters
    #[serde(default = "default_syndication_endpoint")]
    pub endpoint: String,
}

impl Default for SyndicationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_syndication_endpoint(),
        }
    }
}

/// Query parameters that only count as tracking on hosts matching `domain`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SiteTrackingParams {
    pub domain: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl SiteTrackingParams {
    /// `domain` itself or any subdomain of it
    pub fn matches(&self, host: &str) -> bool {
        let domain = self.domain.to_ascii_lowercase();
        host == domain || host.ends_with(&format!(".{}", domain))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Query parameters dropped on every host (`utm_*` is always dropped)
    #[serde(default = "default_tracking_params")]
    pub tracking_params: Vec<String>,

    /// Short or generic parameter names dropped only on the listed sites
    #[serde(default = "default_site_tracking_params")]
    pub site_tracking_params: Vec<SiteTrackingParams>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            tracking_params: default_tracking_params(),
            site_tracking_params: default_site_tracking_params(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("webclip-output")
}
fn default_budget() -> u64 {
    120
}
fn default_converter() -> String {
    "auto".to_string()
}
fn default_min_body_chars() -> usize {
    1
}
fn default_timeout() -> u64 {
    30
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}
fn default_accept_language() -> String {
    "zh-CN,zh;q=0.9,en;q=0.8".to_string()
}
fn default_unreliable_charsets() -> Vec<String> {
    ["iso-8859-1", "latin1", "latin-1"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_header_overrides() -> Vec<HeaderOverride> {
    vec![
        HeaderOverride {
            domain: "toutiao.com".to_string(),
            headers: vec![("Referer".to_string(), "https://www.toutiao.com/".to_string())],
        },
        HeaderOverride {
            domain: "mp.weixin.qq.com".to_string(),
            headers: vec![(
                "User-Agent".to_string(),
                "Mozilla/5.0 (iPhone; CPU iPhone OS 16_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Mobile/15E148 MicroMessenger/8.0.40".to_string(),
            )],
        },
        HeaderOverride {
            domain: "zhihu.com".to_string(),
            headers: vec![("Referer".to_string(), "https://www.zhihu.com/".to_string())],
        },
    ]
}
fn default_loader_markers() -> Vec<String> {
    [
        "__NEXT_DATA__",
        "__NUXT__",
        "window.__INITIAL_STATE__",
        "window.__PRELOADED_STATE__",
        "webpackJsonp",
        "data-reactroot",
        "ng-version",
        "<div id=\"root\"></div>",
        "<div id=\"app\"></div>",
        "You need to enable JavaScript",
        "Please enable JavaScript",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_min_marker_hits() -> usize {
    2
}
fn default_max_script_ratio() -> f64 {
    0.7
}
fn default_structural_min_chars() -> usize {
    200
}
fn default_media_workers() -> usize {
    5
}
fn default_min_bytes() -> usize {
    100
}
fn default_retries() -> u32 {
    2
}
fn default_mode() -> String {
    "auto".to_string()
}
fn default_nav_timeout() -> u64 {
    20
}
fn default_settle_ms() -> u64 {
    1500
}
fn default_retry_wait_ms() -> u64 {
    2500
}
fn default_min_probe_chars() -> usize {
    100
}
fn default_mobile_patterns() -> Vec<String> {
    ["://m.", "://mobile.", "/w/", "/status/"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_unavailable_signals() -> Vec<String> {
    [
        "This post is unavailable",
        "This Tweet was deleted",
        "this page doesn’t exist",
        "this page doesn't exist",
        "Content unavailable",
        "has been removed",
        "文章已删除",
        "内容已删除",
        "该内容已被删除",
        "内容不存在",
        "页面不存在",
        "文章不存在",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_syndication_endpoint() -> String {
    "https://cdn.syndication.twimg.com/tweet-result".to_string()
}
fn default_tracking_params() -> Vec<String> {
    ["timestamp", "spm", "share_token", "fbclid", "gclid"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_site_tracking_params() -> Vec<SiteTrackingParams> {
    let site = |domain: &str, params: &[&str]| SiteTrackingParams {
        domain: domain.to_string(),
        params: params.iter().map(|p| p.to_string()).collect(),
    };
    vec![
        site("twitter.com", &["s", "t", "ref_src", "ref_url"]),
        site("x.com", &["s", "t", "ref_src", "ref_url"]),
        site(
            "toutiao.com",
            &[
                "from",
                "source",
                "wfr",
                "share_source",
                "app",
                "is_copy_url",
                "is_from_webapp",
                "sender_device",
                "share_uid",
                "tt_from",
                "use_new_style",
            ],
        ),
        site("youtube.com", &["si", "feature"]),
        site("youtu.be", &["si", "feature"]),
    ]
}

impl Settings {
    /// Load configuration from the default location or use defaults
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ClipError::ConfigError(e.to_string()))
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ClipError::ConfigError(e.to_string()))
    }

    /// Default configuration file location
    pub fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "webclip").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Per-item budget
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.general.budget_secs)
    }
}
