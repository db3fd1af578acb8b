//! Micro-blog posts via the public syndication endpoint

use super::DynamicStrategy;
use crate::budget::Deadline;
use crate::extract::title_from_body;
use crate::failure::{Diagnostic, Failure, FailureCode, Stage};
use crate::{ExtractedContent, Origin};
use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static STATUS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status(?:es)?/(\d+)").expect("status regex is valid"));

/// Fractional base-36 digits kept in the token
const TOKEN_FRACTION_DIGITS: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct SyndicatedPost {
    #[serde(rename = "__typename", default)]
    typename: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    user: Option<SyndicatedUser>,
    #[serde(default)]
    photos: Vec<SyndicatedPhoto>,
    #[serde(rename = "mediaDetails", default)]
    media_details: Vec<MediaDetail>,
    #[serde(default)]
    video: Option<SyndicatedVideo>,
}

#[derive(Debug, Deserialize)]
struct SyndicatedUser {
    screen_name: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyndicatedPhoto {
    url: String,
}

#[derive(Debug, Deserialize)]
struct MediaDetail {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    media_url_https: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SyndicatedVideo {
    #[serde(default)]
    poster: Option<String>,
}

/// Status id from a `/status/<digits>` or `/statuses/<digits>` path
pub fn status_id(url: &Url) -> Option<String> {
    STATUS_ID
        .captures(url.path())
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Token the endpoint expects for a status id: `(id / 1e15) * π` in base 36
/// with zeros and the radix point removed.
pub fn syndication_token(id: &str) -> String {
    let value = id.parse::<f64>().unwrap_or(0.0) / 1e15 * std::f64::consts::PI;
    let mut integer = value.trunc() as u64;
    let mut fraction = value.fract();

    let mut int_digits = Vec::new();
    loop {
        int_digits.push(base36_digit((integer % 36) as u32));
        integer /= 36;
        if integer == 0 {
            break;
        }
    }
    let mut token: String = int_digits.into_iter().rev().collect();

    for _ in 0..TOKEN_FRACTION_DIGITS {
        if fraction <= 0.0 {
            break;
        }
        fraction *= 36.0;
        let digit = fraction.trunc() as u32;
        token.push(base36_digit(digit.min(35)));
        fraction -= f64::from(digit);
    }

    token.retain(|c| c != '0');
    if token.is_empty() {
        "a".to_string()
    } else {
        token
    }
}

fn base36_digit(d: u32) -> char {
    std::char::from_digit(d, 36).unwrap_or('0')
}

/// Fetches posts from a syndication endpoint taking `id`, `token` and `lang`
#[derive(Debug, Clone)]
pub struct SyndicationStrategy {
    client: Client,
    endpoint: String,
}

impl SyndicationStrategy {
    pub fn new(client: Client, endpoint: String) -> Self {
        Self { client, endpoint }
    }

    fn unresolved(message: impl Into<String>) -> Diagnostic {
        Failure::new(FailureCode::DynamicPageUnresolved, Stage::DynamicFallback, message)
    }

    async fn fetch_post(&self, id: &str, deadline: Deadline) -> Result<SyndicatedPost, Diagnostic> {
        let token = syndication_token(id);
        let budget = deadline
            .remaining()
            .ok_or_else(|| Failure::timeout(Stage::DynamicFallback, "no budget for syndication request"))?;

        let response = self
            .client
            .get(&self.endpoint)
            .query(&[("id", id), ("token", token.as_str()), ("lang", "en")])
            .timeout(budget)
            .send()
            .await
            .map_err(|e| Self::unresolved(format!("syndication request failed: {}", e)))?;

        // A 404 here also covers posts the endpoint will not serve, so the
        // chain moves on; only a tombstone body proves removal
        let status = response.status();
        if !status.is_success() {
            return Err(Self::unresolved(format!("syndication status {}", status)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| Self::unresolved(format!("reading syndication body failed: {}", e)))?;
        if body.trim().is_empty() || body.trim() == "{}" {
            return Err(Self::unresolved("empty syndication response"));
        }
        serde_json::from_str(&body)
            .map_err(|e| Self::unresolved(format!("invalid syndication JSON: {}", e)))
    }
}

#[async_trait]
impl DynamicStrategy for SyndicationStrategy {
    fn name(&self) -> &str {
        "syndication"
    }

    async fn get_content(&self, url: &Url, deadline: Deadline) -> Result<ExtractedContent, Diagnostic> {
        let id = status_id(url).ok_or_else(|| Self::unresolved("no status id in URL"))?;
        debug!("Syndication lookup for status {}", id);

        let post = self.fetch_post(&id, deadline).await?;
        if post.typename.as_deref() == Some("TweetTombstone") {
            return Err(Failure::new(
                FailureCode::ArticleUnavailable,
                Stage::DynamicFallback,
                "post is unavailable",
            ));
        }
        content_from_post(post)
    }
}

fn content_from_post(post: SyndicatedPost) -> Result<ExtractedContent, Diagnostic> {
    let text = post.text.unwrap_or_default();
    let media = media_urls(&post.photos, &post.media_details, post.video.as_ref());
    if text.trim().is_empty() && media.is_empty() {
        return Err(SyndicationStrategy::unresolved("syndicated post has no text or media"));
    }

    let mut html = String::from("<article>\n");
    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        html.push_str(&format!("<p>{}</p>\n", encode_text(line)));
    }

    let author = post.user.as_ref().map(|u| format!("@{}", u.screen_name));
    if let Some(user) = post.user.as_ref() {
        let line = match user.name.as_deref().filter(|n| !n.trim().is_empty()) {
            Some(name) => format!("{} (@{})", name.trim(), user.screen_name),
            None => format!("@{}", user.screen_name),
        };
        html.push_str(&format!("<p class=\"author\">{}</p>\n", encode_text(&line)));
    }

    for src in &media {
        html.push_str(&format!(
            "<p><img src=\"{}\"></p>\n",
            encode_double_quoted_attribute(src)
        ));
    }
    html.push_str("</article>");

    Ok(ExtractedContent {
        html,
        title: title_from_body(&text),
        description: None,
        author,
        publish_time: post.created_at,
        origin: Origin::Syndication,
    })
}

/// Photos first, then video posters, keeping the post's own order
fn media_urls(
    photos: &[SyndicatedPhoto],
    details: &[MediaDetail],
    video: Option<&SyndicatedVideo>,
) -> Vec<String> {
    let mut urls: Vec<String> = photos.iter().map(|p| p.url.clone()).collect();
    let posters = details
        .iter()
        .filter(|d| d.kind == "video" || d.kind == "animated_gif")
        .filter_map(|d| d.media_url_https.clone())
        .chain(video.and_then(|v| v.poster.clone()));
    for poster in posters {
        if !urls.contains(&poster) {
            urls.push(poster);
        }
    }
    urls
}
