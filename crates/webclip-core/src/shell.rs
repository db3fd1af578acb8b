//! Client-side-rendered shell detection

use crate::config::ShellConfig;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

static BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("body").expect("valid selector"));
static ALL_ELEMENTS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("*").expect("valid selector"));
static STRUCTURAL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("article, main, [role='main']").expect("valid selector")
});

/// Whether a document carries its content as static markup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellVerdict {
    RealContent,
    JsShell,
}

/// Signals gathered while classifying a document
#[derive(Debug, Clone, PartialEq)]
pub struct ShellSignals {
    pub marker_hits: usize,
    pub has_structural_content: bool,
    pub script_ratio: f64,
}

/// Classifies decoded HTML as real content or a client-side shell
#[derive(Debug, Clone)]
pub struct ShellDetector {
    config: ShellConfig,
}

impl ShellDetector {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    /// Classify a document
    pub fn classify(&self, html: &str) -> ShellVerdict {
        let signals = self.signals(html);
        let verdict = if (signals.marker_hits >= self.config.min_marker_hits
            && !signals.has_structural_content)
            || signals.script_ratio > self.config.max_script_ratio
        {
            ShellVerdict::JsShell
        } else {
            ShellVerdict::RealContent
        };
        debug!(?signals, ?verdict, "Shell check");
        verdict
    }

    /// Gather the raw signals the verdict is based on
    pub fn signals(&self, html: &str) -> ShellSignals {
        let marker_hits = self
            .config
            .loader_markers
            .iter()
            .filter(|marker| html.contains(marker.as_str()))
            .count();

        let document = Html::parse_document(html);

        let has_structural_content = document.select(&STRUCTURAL).any(|el| {
            let text: String = el.text().collect();
            text.trim().chars().count() > self.config.structural_min_chars
        });

        let script_ratio = document
            .select(&BODY)
            .next()
            .map(|body| {
                let mut total = 0usize;
                let mut scripts = 0usize;
                for el in body.select(&ALL_ELEMENTS) {
                    total += 1;
                    if el.value().name() == "script" {
                        scripts += 1;
                    }
                }
                if total == 0 {
                    0.0
                } else {
                    scripts as f64 / total as f64
                }
            })
            .unwrap_or(0.0);

        ShellSignals {
            marker_hits,
            has_structural_content,
            script_ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> ShellDetector {
        ShellDetector::new(ShellConfig::default())
    }

    #[test]
    fn test_markers_without_structure_is_shell() {
        let html = r#"<html><body><div id="root"></div>
            <noscript>You need to enable JavaScript to run this app.</noscript>
            <p>loading</p><p>please wait</p><span>x</span></body></html>"#;
        assert_eq!(detector().classify(html), ShellVerdict::JsShell);
    }

    #[test]
    fn test_long_article_is_real_content_despite_markers() {
        let body = "Real words in a real article. ".repeat(10);
        let html = format!(
            r#"<html><body><div id="root"></div><noscript>You need to enable JavaScript</noscript>
            <article><p>{}</p></article><script>window.__NEXT_DATA__ = {{}}</script>
            <div>a</div><div>b</div></body></html>"#,
            body
        );
        let signals = detector().signals(&html);
        assert!(signals.marker_hits >= 2);
        assert!(signals.has_structural_content);
        assert_eq!(detector().classify(&html), ShellVerdict::RealContent);
    }

    #[test]
    fn test_script_heavy_body_is_shell() {
        let html = "<html><body><div></div><script></script><script></script><script></script></body></html>";
        assert_eq!(detector().classify(html), ShellVerdict::JsShell);
    }

    #[test]
    fn test_plain_short_article_is_real_content() {
        let html = r#"<article><h1>Title</h1><p>Body text</p><img src="a.jpg"></article>"#;
        assert_eq!(detector().classify(html), ShellVerdict::RealContent);
    }

    #[test]
    fn test_thresholds_are_configurable() {
        let strict = ShellDetector::new(ShellConfig {
            max_script_ratio: 0.2,
            ..ShellConfig::default()
        });
        let html = "<html><body><p>a</p><p>b</p><script></script></body></html>";
        assert_eq!(detector().classify(html), ShellVerdict::RealContent);
        assert_eq!(strict.classify(html), ShellVerdict::JsShell);
    }
}
