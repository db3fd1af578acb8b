//! Chrome discovery and scoped headless sessions
//!
//! A [`BrowserSession`] owns the browser process, its CDP handler task and a
//! throwaway profile directory. Dropping it, on any path including task
//! abort, stops the handler and kills the process.

use crate::config::RenderConfig;
use crate::{ClipError, Result};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1";

/// Device emulation applied to a page before navigation
#[derive(Debug, Clone, PartialEq)]
pub struct RenderProfile {
    pub mobile: bool,
    pub user_agent: String,
    pub width: i64,
    pub height: i64,
    pub scale: f64,
}

impl RenderProfile {
    pub fn desktop() -> Self {
        Self {
            mobile: false,
            user_agent: DESKTOP_UA.to_string(),
            width: 1366,
            height: 900,
            scale: 1.0,
        }
    }

    pub fn mobile() -> Self {
        Self {
            mobile: true,
            user_agent: MOBILE_UA.to_string(),
            width: 390,
            height: 844,
            scale: 3.0,
        }
    }

    /// Mobile for `m.`/`mobile.` hosts and URLs matching a mobile pattern
    pub fn for_url(url: &Url, mobile_patterns: &[String]) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let text = url.as_str();
        let mobile = host.starts_with("m.")
            || host.starts_with("mobile.")
            || mobile_patterns.iter().any(|p| text.contains(p.as_str()));
        if mobile {
            Self::mobile()
        } else {
            Self::desktop()
        }
    }
}

/// Referrer for a URL: the first table entry whose domain is contained in
/// the host, otherwise the URL's origin.
pub fn referer_for(url: &Url, table: &[(String, String)]) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    table
        .iter()
        .find(|(domain, _)| host.contains(&domain.to_ascii_lowercase()))
        .map(|(_, referer)| referer.clone())
        .unwrap_or_else(|| format!("{}/", url.origin().ascii_serialization()))
}

/// Resolve the Chrome binary for the configured mode.
///
/// `none` disables rendering; otherwise the configured path is tried, then
/// well-known install locations, then `PATH`.
pub fn find_chrome(config: &RenderConfig) -> Option<PathBuf> {
    if config.mode.eq_ignore_ascii_case("none") {
        debug!("Headless rendering disabled by configuration");
        return None;
    }
    if let Some(path) = config.chrome_path.as_ref() {
        if path.exists() {
            return Some(path.clone());
        }
        warn!("Configured chrome_path {:?} does not exist", path);
    }
    find_system_chrome()
}

/// Find Chrome installed on the system
pub fn find_system_chrome() -> Option<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .or_else(|| {
            ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"]
                .iter()
                .find_map(|name| which::which(name).ok())
        })
}

/// One isolated headless browser, released on drop
pub struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
    // Dropped after `browser`, once the process is gone
    _profile_dir: TempDir,
}

impl BrowserSession {
    /// Launch Chrome with a fresh profile directory
    pub async fn launch(chrome_path: &Path) -> Result<Self> {
        debug!("Launching browser from {:?}", chrome_path);
        let profile_dir = tempfile::Builder::new().prefix("webclip-chrome-").tempdir()?;

        let config = BrowserConfig::builder()
            .chrome_executable(chrome_path)
            .user_data_dir(profile_dir.path())
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-software-rasterizer")
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--no-first-run")
            .arg("--mute-audio")
            .build()
            .map_err(ClipError::BrowserError)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| ClipError::BrowserError(format!("Failed to launch browser: {}", e)))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler error: {:?}", e);
                }
            }
        });

        Ok(Self {
            browser,
            handler,
            _profile_dir: profile_dir,
        })
    }

    /// Open `url` in a new page with the given profile and referrer.
    ///
    /// Navigation is awaited for at most `nav_timeout`; a slow page is still
    /// returned so whatever has rendered can be read.
    pub async fn open(
        &self,
        url: &Url,
        profile: &RenderProfile,
        referer: &str,
        nav_timeout: Duration,
    ) -> Result<Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ClipError::BrowserError(e.to_string()))?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(profile.width)
            .height(profile.height)
            .device_scale_factor(profile.scale)
            .mobile(profile.mobile)
            .build()
            .map_err(ClipError::BrowserError)?;
        page.execute(metrics)
            .await
            .map_err(|e| ClipError::BrowserError(e.to_string()))?;
        page.execute(SetUserAgentOverrideParams::new(profile.user_agent.clone()))
            .await
            .map_err(|e| ClipError::BrowserError(e.to_string()))?;
        let headers = Headers::new(serde_json::json!({ "Referer": referer }));
        page.execute(SetExtraHttpHeadersParams::new(headers))
            .await
            .map_err(|e| ClipError::BrowserError(e.to_string()))?;

        info!(mobile = profile.mobile, "Rendering {}", url);
        match tokio::time::timeout(nav_timeout, page.goto(url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(ClipError::BrowserError(format!("Navigation failed: {}", e))),
            Err(_) => warn!("Navigation to {} still pending after {:?}", url, nav_timeout),
        }
        Ok(page)
    }

    /// Rendered HTML of a page
    pub async fn html(page: &Page) -> Result<String> {
        page.content()
            .await
            .map_err(|e| ClipError::BrowserError(e.to_string()))
    }

    /// Close the browser gracefully. Dropping the session has the same end
    /// result without waiting for Chrome to exit.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!("Browser close failed: {}", e);
        }
        let _ = self.browser.wait().await;
    }
}

impl Drop for BrowserSession {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patterns() -> Vec<String> {
        RenderConfig::default().mobile_patterns
    }

    #[test]
    fn test_profile_by_url_shape() {
        let url = |s: &str| Url::parse(s).unwrap();
        assert!(RenderProfile::for_url(&url("https://m.toutiao.com/a1/"), &patterns()).mobile);
        assert!(RenderProfile::for_url(&url("https://x.com/abc/status/1"), &patterns()).mobile);
        assert!(!RenderProfile::for_url(&url("https://www.toutiao.com/article/1/"), &patterns()).mobile);
    }

    #[test]
    fn test_referer_defaults_to_origin() {
        let url = Url::parse("https://www.toutiao.com/article/1/").unwrap();
        assert_eq!(referer_for(&url, &[]), "https://www.toutiao.com/");
        let table = vec![("toutiao.com".to_string(), "https://www.toutiao.com/".to_string())];
        let other = Url::parse("https://m.toutiao.com/a1/").unwrap();
        assert_eq!(referer_for(&other, &table), "https://www.toutiao.com/");
    }

    #[test]
    fn test_mode_none_disables_chrome() {
        let config = RenderConfig {
            mode: "none".to_string(),
            chrome_path: Some(PathBuf::from("/bin/sh")),
            ..RenderConfig::default()
        };
        assert!(find_chrome(&config).is_none());
    }

    #[test]
    fn test_find_system_chrome() {
        // Only checks that discovery does not panic
        let _ = find_system_chrome();
    }
}
