//! Page metadata, title resolution and content-region probes
//!
//! Everything here is a pure function over HTML so that the probe order and
//! the title waterfall can be exercised against fixed fixtures without a
//! live browser.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::debug;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static TITLE_TAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\s*(\.{3}|…|#[^\s#]+))+\s*$").expect("valid regex")
});

/// Maximum length of a title derived from body text
const BODY_TITLE_CHARS: usize = 60;

/// Elements whose text never reaches the reader
const HIDDEN_TEXT_PARENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Metadata found in a document head
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub publish_time: Option<String>,
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn element_text(el: ElementRef) -> String {
    collapse(&el.text().collect::<String>())
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn first_text(document: &Html, css: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .map(element_text)
        .find(|text| !text.is_empty())
}

fn first_attr(document: &Html, css: &str, attr: &str) -> Option<String> {
    let sel = selector(css)?;
    document
        .select(&sel)
        .filter_map(|el| el.value().attr(attr))
        .map(collapse)
        .find(|value| !value.is_empty())
}

/// Title, description, author and publish time of a statically fetched page
pub fn extract_meta(html: &str) -> PageMeta {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title").or_else(|| first_text(&document, "h1"));

    let description = first_attr(&document, "meta[name='description']", "content")
        .or_else(|| first_attr(&document, "meta[property='og:description']", "content"));

    let author = first_attr(&document, "meta[name='author']", "content")
        .or_else(|| first_attr(&document, "meta[property='article:author']", "content"));

    let publish_time = publish_time(&document);

    PageMeta {
        title,
        description,
        author,
        publish_time,
    }
}

fn publish_time(document: &Html) -> Option<String> {
    let candidates = [
        "meta[property='article:published_time']",
        "meta[name='publish_date']",
        "time[datetime]",
        ".publish-time",
        ".date",
    ];
    for css in candidates {
        let Some(sel) = selector(css) else { continue };
        if let Some(el) = document.select(&sel).next() {
            let value = el
                .value()
                .attr("content")
                .or_else(|| el.value().attr("datetime"))
                .map(collapse)
                .unwrap_or_else(|| element_text(el));
            return non_empty(value);
        }
    }
    None
}

/// First line of a page title with trailing ellipses and hashtags removed
pub fn clean_title_line(title: &str) -> Option<String> {
    let first = title.lines().map(str::trim).find(|line| !line.is_empty())?;
    let trimmed = TITLE_TAIL.replace(first, "");
    non_empty(collapse(&trimmed))
}

/// First non-empty line of body text, capped for use as a title
pub fn title_from_body(text: &str) -> Option<String> {
    let line = text.lines().map(str::trim).find(|line| !line.is_empty())?;
    let capped: String = line.chars().take(BODY_TITLE_CHARS).collect();
    clean_title_line(&capped)
}

/// A content region to look for in a rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentProbe {
    pub selector: String,
    /// Narrow containers such as micro-post bodies; no minimum length applies
    pub prefer_small: bool,
}

impl ContentProbe {
    pub fn small(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            prefer_small: true,
        }
    }

    pub fn generic(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            prefer_small: false,
        }
    }
}

/// The probe list used for rendered pages
pub fn default_probes() -> Vec<ContentProbe> {
    vec![
        ContentProbe::small("[data-testid='tweetText']"),
        ContentProbe::small(".weitoutiao-html"),
        ContentProbe::small(".wtt-content"),
        ContentProbe::small(".micro-content"),
        ContentProbe::generic(".article-content"),
        ContentProbe::generic("article"),
        ContentProbe::generic(".post-content"),
        ContentProbe::generic("main"),
        ContentProbe::generic("[role='main']"),
        ContentProbe::generic("#content"),
        ContentProbe::generic("body"),
    ]
}

/// A region found by [`probe_content`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeHit {
    pub selector: String,
    pub prefer_small: bool,
    pub html: String,
    pub text: String,
}

/// Evaluate probes in order; prefer-small probes run first, first hit wins.
pub fn probe_content(html: &str, probes: &[ContentProbe], min_chars: usize) -> Option<ProbeHit> {
    let document = Html::parse_document(html);
    let ordered = probes
        .iter()
        .filter(|p| p.prefer_small)
        .chain(probes.iter().filter(|p| !p.prefer_small));

    ordered.into_iter().find_map(|probe| {
        let hit = run_probe(&document, probe, min_chars);
        if hit.is_none() {
            debug!("Probe {} found nothing usable", probe.selector);
        }
        hit
    })
}

fn run_probe(document: &Html, probe: &ContentProbe, min_chars: usize) -> Option<ProbeHit> {
    let sel = selector(&probe.selector)?;
    document.select(&sel).find_map(|el| {
        let text = block_text(el);
        let len = text.chars().filter(|c| !c.is_whitespace()).count();
        let long_enough = if probe.prefer_small {
            len > 0
        } else {
            len >= min_chars
        };
        long_enough.then(|| ProbeHit {
            selector: probe.selector.clone(),
            prefer_small: probe.prefer_small,
            html: el.html(),
            text,
        })
    })
}

/// Visible text with block boundaries kept as newlines
fn block_text(el: ElementRef) -> String {
    let lines: Vec<String> = el
        .text()
        .map(collapse)
        .filter(|line| !line.is_empty())
        .collect();
    lines.join("\n")
}

/// Title waterfall for rendered pages.
///
/// `<title>` first line → `[role=heading]` → first h1/h2 → `og:title` → known
/// title selectors → first body line when a prefer-small probe matched.
pub fn resolve_title(html: &str, hit: Option<&ProbeHit>) -> Option<String> {
    let document = Html::parse_document(html);

    let known_title_selectors = [
        ".article-title",
        ".article-header h1",
        "[data-testid='title']",
        ".title",
    ];

    first_text(&document, "title")
        .and_then(|t| clean_title_line(&t))
        .or_else(|| first_text(&document, "[role='heading']"))
        .or_else(|| first_text(&document, "h1"))
        .or_else(|| first_text(&document, "h2"))
        .or_else(|| first_attr(&document, "meta[property='og:title']", "content"))
        .or_else(|| {
            known_title_selectors
                .iter()
                .find_map(|css| first_text(&document, css))
        })
        .or_else(|| {
            hit.filter(|h| h.prefer_small)
                .and_then(|h| title_from_body(&h.text))
        })
}

/// Author of a rendered page: head metadata, then byline containers
pub fn resolve_author(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    first_attr(&document, "meta[name='author']", "content")
        .or_else(|| first_attr(&document, "meta[property='article:author']", "content"))
        .or_else(|| {
            [
                ".article-author",
                ".author-name",
                "[data-testid='author']",
                ".byline-author",
                "[data-testid='User-Name']",
            ]
            .iter()
            .find_map(|css| first_text(&document, css))
        })
}

/// The first configured "content removed" signal in the page's visible text
pub fn unavailable_signal<'a>(html: &str, signals: &'a [String]) -> Option<&'a str> {
    let document = Html::parse_document(html);
    let text: String = document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let parent = node.parent().and_then(ElementRef::wrap)?;
            (!HIDDEN_TEXT_PARENTS.contains(&parent.value().name())).then(|| String::from(&**text))
        })
        .collect();
    signals
        .iter()
        .map(String::as_str)
        .find(|signal| text.contains(signal))
}

/// Canonical or meta-refresh target pointing somewhere other than `current`
pub fn embedded_redirect(html: &str, current: &url::Url) -> Option<url::Url> {
    let document = Html::parse_document(html);
    let canonical = first_attr(&document, "link[rel='canonical']", "href");
    let refresh = first_attr(&document, "meta[http-equiv='refresh']", "content").and_then(|c| {
        c.split_once(|ch: char| ch == ';' || ch == ',')
            .map(|(_, rest)| rest.trim())
            .and_then(|rest| {
                let lower = rest.to_ascii_lowercase();
                lower
                    .starts_with("url=")
                    .then(|| rest[4..].trim_matches(['\'', '"', ' ']).to_string())
            })
    });

    [canonical, refresh]
        .into_iter()
        .flatten()
        .filter_map(|target| current.join(&target).ok())
        .find(|target| {
            let mut a = target.clone();
            let mut b = current.clone();
            a.set_fragment(None);
            b.set_fragment(None);
            a != b
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_extraction() {
        let html = r#"<html><head><title> A   Title </title>
            <meta name="description" content="Summary here">
            <meta name="author" content="Jane">
            <meta property="article:published_time" content="2024-05-01T10:00:00Z">
            </head><body><h1>Heading</h1></body></html>"#;
        let meta = extract_meta(html);
        assert_eq!(meta.title.as_deref(), Some("A Title"));
        assert_eq!(meta.description.as_deref(), Some("Summary here"));
        assert_eq!(meta.author.as_deref(), Some("Jane"));
        assert_eq!(meta.publish_time.as_deref(), Some("2024-05-01T10:00:00Z"));
    }

    #[test]
    fn test_meta_title_falls_back_to_h1() {
        let meta = extract_meta("<article><h1>Title</h1><p>Body text</p></article>");
        assert_eq!(meta.title.as_deref(), Some("Title"));
        assert_eq!(meta.description, None);
    }

    #[test]
    fn test_clean_title_line_trims_suffixes() {
        assert_eq!(
            clean_title_line("Big news today... #breaking #world\nsecond line"),
            Some("Big news today".to_string())
        );
        assert_eq!(clean_title_line("Plain"), Some("Plain".to_string()));
        assert_eq!(clean_title_line("   "), None);
    }

    #[test]
    fn test_prefer_small_probe_wins_without_minimum() {
        let html = r#"<html><body><article>
            <div class="wtt-content">short post</div>
            <p>padding padding padding padding</p></article></body></html>"#;
        let hit = probe_content(html, &default_probes(), 100).unwrap();
        assert_eq!(hit.selector, ".wtt-content");
        assert!(hit.prefer_small);
        assert_eq!(hit.text, "short post");
    }

    #[test]
    fn test_generic_probe_needs_minimum_length() {
        let long = "word ".repeat(50);
        let html = format!(
            r#"<html><body><article>tiny</article><main><p>{}</p></main></body></html>"#,
            long
        );
        let hit = probe_content(&html, &default_probes(), 100).unwrap();
        assert_eq!(hit.selector, "main");
    }

    #[test]
    fn test_no_probe_matches_empty_page() {
        assert!(probe_content("<html><body></body></html>", &default_probes(), 10).is_none());
    }

    #[test]
    fn test_title_waterfall_order() {
        let with_title = "<html><head><title>Page title…</title></head><body><h1>H</h1></body></html>";
        assert_eq!(resolve_title(with_title, None), Some("Page title".to_string()));

        let heading_role = r#"<html><body><div role="heading">Role heading</div><h1>H1</h1></body></html>"#;
        assert_eq!(resolve_title(heading_role, None), Some("Role heading".to_string()));

        let og = r#"<html><head><meta property="og:title" content="From OG"></head><body><p>x</p></body></html>"#;
        assert_eq!(resolve_title(og, None), Some("From OG".to_string()));
    }

    #[test]
    fn test_title_from_small_probe_body() {
        let html = r#"<html><body><div class="wtt-content">First line of post<br>more</div></body></html>"#;
        let hit = probe_content(html, &default_probes(), 100);
        assert_eq!(
            resolve_title(html, hit.as_ref()),
            Some("First line of post".to_string())
        );
    }

    #[test]
    fn test_author_from_byline() {
        let html = r#"<html><body><div class="author-name"> Some Writer </div></body></html>"#;
        assert_eq!(resolve_author(html), Some("Some Writer".to_string()));
        assert_eq!(resolve_author("<p>nobody</p>"), None);
    }

    #[test]
    fn test_unavailable_signal() {
        let signals = vec!["has been removed".to_string()];
        let html = "<html><body><p>This article has been removed.</p></body></html>";
        assert_eq!(unavailable_signal(html, &signals), Some("has been removed"));
        assert_eq!(unavailable_signal("<p>fine</p>", &signals), None);

        let scripted = r#"<html><body><p>fine</p><script>var msg = "has been removed";</script></body></html>"#;
        assert_eq!(unavailable_signal(scripted, &signals), None);
    }

    #[test]
    fn test_embedded_redirect() {
        let current = url::Url::parse("https://m.example.com/a/1").unwrap();
        let html = r#"<html><head><link rel="canonical" href="https://www.example.com/article/1"></head></html>"#;
        assert_eq!(
            embedded_redirect(html, &current).map(|u| u.to_string()),
            Some("https://www.example.com/article/1".to_string())
        );

        let same = r#"<html><head><link rel="canonical" href="/a/1"></head></html>"#;
        assert_eq!(embedded_redirect(same, &current), None);

        let refresh = r#"<html><head><meta http-equiv="refresh" content="0; url='/b/2'"></head></html>"#;
        assert_eq!(
            embedded_redirect(refresh, &current).map(|u| u.path().to_string()),
            Some("/b/2".to_string())
        );
    }
}
