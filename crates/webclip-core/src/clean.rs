//! Content cleaning
//!
//! A streaming `lol_html` pass promotes lazy-load attributes, absolutizes
//! media and link references and drops non-content markup. The main region is
//! then picked with `scraper`.

use crate::failure::{Failure, Stage};
use lol_html::{doc_comments, element, HtmlRewriter, Settings};
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

/// Attributes that lazy-loading scripts use instead of `src`, in priority order
pub const LAZY_ATTRIBUTES: &[&str] = &[
    "data-src",
    "data-original",
    "data-lazy-src",
    "data-actualsrc",
    "data-url",
    "_src",
];

/// Elements removed before conversion
const NON_CONTENT: &str = "script, style, noscript, nav, header, footer, aside, iframe, object, \
                           embed, form, button, input, select, textarea";

/// Candidate main-content containers, in priority order
const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    ".content",
    "#content",
    ".main",
    "#main",
    ".post-content",
    ".entry-content",
    ".article-content",
    ".post-body",
    ".entry-body",
];

/// Whether a `src` value is missing or a stand-in for the real asset
pub fn is_placeholder_src(src: &str) -> bool {
    let src = src.trim();
    if src.is_empty() || src.starts_with("data:") || src == "#" {
        return true;
    }
    let lower = src.to_ascii_lowercase();
    ["placeholder", "blank.", "lazy", "loading", "spacer", "grey.gif", "pixel.gif"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// Resolve a reference against the page URL, leaving special schemes alone
pub fn absolutize(reference: &str, base: &Url) -> Option<String> {
    let reference = reference.trim();
    if reference.is_empty()
        || reference.starts_with('#')
        || reference.starts_with("data:")
        || reference.starts_with("javascript:")
        || reference.starts_with("mailto:")
    {
        return None;
    }
    base.join(reference).ok().map(|u| u.to_string())
}

/// Strip non-content markup and normalize references.
pub fn sanitize(html: &str, base: &Url) -> Result<String, Failure> {
    let mut output = Vec::with_capacity(html.len());

    let mut rewriter = HtmlRewriter::new(
        Settings {
            element_content_handlers: vec![
                element!(NON_CONTENT, |el| {
                    el.remove();
                    Ok(())
                }),
                element!("img, video, audio, source", |el| {
                    let current = el.get_attribute("src");
                    if current.as_deref().map_or(true, is_placeholder_src) {
                        let promoted = LAZY_ATTRIBUTES.iter().find_map(|attr| {
                            el.get_attribute(attr)
                                .filter(|value| !value.trim().is_empty())
                        });
                        if let Some(value) = promoted {
                            el.set_attribute("src", &value)?;
                        }
                    }
                    for attr in ["src", "poster"] {
                        if let Some(value) = el.get_attribute(attr) {
                            if let Some(resolved) = absolutize(&value, base) {
                                el.set_attribute(attr, &resolved)?;
                            }
                        }
                    }
                    Ok(())
                }),
                element!("a[href]", |el| {
                    if let Some(href) = el.get_attribute("href") {
                        if let Some(resolved) = absolutize(&href, base) {
                            el.set_attribute("href", &resolved)?;
                        }
                    }
                    Ok(())
                }),
            ],
            document_content_handlers: vec![doc_comments!(|comment| {
                comment.remove();
                Ok(())
            })],
            ..Settings::default()
        },
        |chunk: &[u8]| output.extend_from_slice(chunk),
    );

    rewriter
        .write(html.as_bytes())
        .map_err(|e| Failure::convert(Stage::Clean, format!("HTML rewrite error: {}", e)))?;
    rewriter
        .end()
        .map_err(|e| Failure::convert(Stage::Clean, format!("HTML rewrite error: {}", e)))?;

    String::from_utf8(output)
        .map_err(|e| Failure::convert(Stage::Clean, format!("rewritten HTML is not UTF-8: {}", e)))
}

/// Pick the main content region of sanitized HTML
pub fn select_main_region(html: &str, min_chars: usize) -> String {
    let document = Html::parse_document(html);

    for css in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text_len = element.text().collect::<String>().trim().chars().count();
            if text_len > min_chars {
                debug!("Found content using selector: {}", css);
                return element.html();
            }
        }
    }

    match Selector::parse("body")
        .ok()
        .and_then(|body| document.select(&body).next())
    {
        Some(body) => body.inner_html(),
        None => document.root_element().html(),
    }
}

/// Full cleaning pass: sanitize, then select the main region
pub fn clean(html: &str, base: &Url, min_region_chars: usize) -> Result<String, Failure> {
    let sanitized = sanitize(html, base)?;
    Ok(select_main_region(&sanitized, min_region_chars))
}
