//! Headless Chrome rendering as a last resort

use super::DynamicStrategy;
use crate::budget::Deadline;
use crate::chrome::{self, BrowserSession, RenderProfile};
use crate::config::{RenderConfig, ShellConfig};
use crate::extract::{self, ContentProbe, ProbeHit};
use crate::failure::{Diagnostic, Failure, FailureCode, Stage};
use crate::shell::{ShellDetector, ShellVerdict};
use crate::{ExtractedContent, Origin};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// A generic region this short that carries a removal signal is the notice
const NOTICE_MAX_CHARS: usize = 300;

/// What one look at the rendered DOM produced
#[derive(Debug, Clone, PartialEq)]
pub enum Inspection {
    /// The page says the content is gone
    Unavailable(String),
    /// A probe matched
    Found(ProbeHit),
    /// Nothing usable yet
    ShellLike,
}

/// Renders pages in an isolated Chrome session and probes the result
#[derive(Debug, Clone)]
pub struct HeadlessRenderStrategy {
    config: RenderConfig,
    shell: ShellDetector,
    probes: Vec<ContentProbe>,
}

impl HeadlessRenderStrategy {
    pub fn new(config: RenderConfig, shell: ShellConfig) -> Self {
        Self {
            config,
            shell: ShellDetector::new(shell),
            probes: extract::default_probes(),
        }
    }

    pub fn with_probes(mut self, probes: Vec<ContentProbe>) -> Self {
        self.probes = probes;
        self
    }

    /// Classify rendered HTML. Pure, so it runs against fixtures.
    ///
    /// Content regions win over removal signals: the signals are only read
    /// when no probe hits, or when the hit is a short generic region that is
    /// itself the notice.
    pub fn inspect(&self, html: &str) -> Inspection {
        let signals = &self.config.unavailable_signals;
        let hit = extract::probe_content(html, &self.probes, self.config.min_probe_chars)
            // A generic hit on a page that still looks like a bootstrap shell
            // is the loader, not the article
            .filter(|hit| hit.prefer_small || self.shell.classify(html) != ShellVerdict::JsShell);

        match hit {
            Some(hit) if !hit.prefer_small && hit.text.chars().count() <= NOTICE_MAX_CHARS => {
                match signals.iter().find(|signal| hit.text.contains(signal.as_str())) {
                    Some(signal) => Inspection::Unavailable(signal.clone()),
                    None => Inspection::Found(hit),
                }
            }
            Some(hit) => Inspection::Found(hit),
            None => match extract::unavailable_signal(html, signals) {
                Some(signal) => Inspection::Unavailable(signal.to_string()),
                None => Inspection::ShellLike,
            },
        }
    }

    /// Build the extracted content from a rendered page and its probe hit
    pub fn content_from(&self, html: &str, hit: ProbeHit) -> ExtractedContent {
        let meta = extract::extract_meta(html);
        ExtractedContent {
            title: extract::resolve_title(html, Some(&hit)),
            description: meta.description,
            author: extract::resolve_author(html),
            publish_time: meta.publish_time,
            html: hit.html,
            origin: Origin::HeadlessRender,
        }
    }

    async fn render(
        &self,
        session: &BrowserSession,
        url: &Url,
        deadline: Deadline,
    ) -> Result<(Url, String), Diagnostic> {
        let profile = RenderProfile::for_url(url, &self.config.mobile_patterns);
        let referer = chrome::referer_for(url, &self.config.referers);
        let nav_timeout = deadline.clamp(Duration::from_secs(self.config.nav_timeout_secs));

        let page = session
            .open(url, &profile, &referer, nav_timeout)
            .await
            .map_err(|e| unresolved(e.to_string()))?;
        tokio::time::sleep(deadline.clamp(Duration::from_millis(self.config.settle_ms))).await;

        let html = BrowserSession::html(&page)
            .await
            .map_err(|e| unresolved(e.to_string()))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| url.clone());
        let _ = page.close().await;
        Ok((final_url, html))
    }

    /// Render, follow at most one embedded redirect, retry once, then
    /// classify. `render` loads a URL and returns where it landed plus the DOM.
    async fn render_and_probe<F, Fut>(
        &self,
        mut render: F,
        url: &Url,
        deadline: Deadline,
    ) -> Result<ExtractedContent, Diagnostic>
    where
        F: FnMut(Url) -> Fut,
        Fut: Future<Output = Result<(Url, String), Diagnostic>>,
    {
        let (mut effective_url, mut html) = render(url.clone()).await?;
        let mut inspection = self.inspect(&html);

        // One hop through an embedded canonical / refresh target
        if inspection == Inspection::ShellLike {
            if let Some(target) = extract::embedded_redirect(&html, &effective_url) {
                info!("Following embedded link {} -> {}", effective_url, target);
                let (landed, redirected) = render(target).await?;
                effective_url = landed;
                html = redirected;
                inspection = self.inspect(&html);
            }
        }

        // Late-hydrating pages get one more look, at wherever we ended up
        if inspection == Inspection::ShellLike && deadline.remaining().is_some() {
            let wait = deadline.clamp(Duration::from_millis(self.config.retry_wait_ms));
            debug!("Probe found nothing, retrying {} after {:?}", effective_url, wait);
            tokio::time::sleep(wait).await;
            let (_, again) = render(effective_url.clone()).await?;
            html = again;
            inspection = self.inspect(&html);
        }

        match inspection {
            Inspection::Found(hit) => Ok(self.content_from(&html, hit)),
            Inspection::Unavailable(signal) => Err(Failure::new(
                FailureCode::ArticleUnavailable,
                Stage::DynamicFallback,
                format!("page reports: {}", signal),
            )),
            Inspection::ShellLike => Err(unresolved("no content region found in rendered page")),
        }
    }
}

fn unresolved(message: impl Into<String>) -> Diagnostic {
    Failure::new(FailureCode::DynamicPageUnresolved, Stage::DynamicFallback, message)
}

#[async_trait]
impl DynamicStrategy for HeadlessRenderStrategy {
    fn name(&self) -> &str {
        "headless_render"
    }

    async fn get_content(&self, url: &Url, deadline: Deadline) -> Result<ExtractedContent, Diagnostic> {
        let chrome_path = chrome::find_chrome(&self.config).ok_or_else(|| {
            Failure::new(
                FailureCode::DynamicHandlerUnavailable,
                Stage::DynamicFallback,
                "no Chrome or Chromium installation found",
            )
        })?;

        let session = BrowserSession::launch(&chrome_path).await.map_err(|e| {
            Failure::new(
                FailureCode::DynamicHandlerUnavailable,
                Stage::DynamicFallback,
                e.to_string(),
            )
        })?;

        let result = self
            .render_and_probe(
                |target: Url| {
                    let session = &session;
                    async move { self.render(session, &target, deadline).await }
                },
                url,
                deadline,
            )
            .await;
        session.close().await;
        result
    }
}
