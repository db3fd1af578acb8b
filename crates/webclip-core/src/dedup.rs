//! Batch input parsing and URL deduplication

use crate::config::DedupConfig;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use url::Url;

/// Delimiter separating fragments of a batch (URLs and free-text notes)
pub const FRAGMENT_DELIMITER: &str = "%%%";

static STATUS_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/status(?:es)?/(\d+)").expect("status regex is valid"));

static TOUTIAO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:article/|group/|a|i|w/|item/)(\d{6,})").expect("toutiao regex is valid")
});

static YOUTUBE_PATH_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/(?:shorts|embed|live|v)/([A-Za-z0-9_-]{6,})").expect("youtube regex is valid")
});

const MICROBLOG_HOSTS: &[&str] = &[
    "twitter.com",
    "x.com",
    "mobile.twitter.com",
    "mobile.x.com",
    "www.twitter.com",
    "www.x.com",
];

/// Canonical identity of a logical article
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    /// Derive the key for a URL. Known share-link shapes map to a stable id,
    /// everything else to the canonicalized URL.
    pub fn for_url(url: &Url, config: &DedupConfig) -> Self {
        share_link_key(url).unwrap_or_else(|| Self(canonicalize(url, config)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_tracking_param(key: &str, host: &str, config: &DedupConfig) -> bool {
    let key = key.to_ascii_lowercase();
    if key.starts_with("utm_") || key == "utm" {
        return true;
    }
    if config.tracking_params.iter().any(|p| p.eq_ignore_ascii_case(&key)) {
        return true;
    }
    config
        .site_tracking_params
        .iter()
        .filter(|site| site.matches(host))
        .any(|site| site.params.iter().any(|p| p.eq_ignore_ascii_case(&key)))
}

/// Lower-case scheme and host, no default port or fragment, tracking
/// parameters dropped, remaining query sorted, no trailing slash except on
/// the root path. Site-scoped parameters are only dropped on their own site.
pub fn canonicalize(url: &Url, config: &DedupConfig) -> String {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k, &host, config))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    let mut path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        path = path.trim_end_matches('/').to_string();
        if path.is_empty() {
            path.push('/');
        }
    }

    let mut out = format!(
        "{}://{}",
        url.scheme().to_ascii_lowercase(),
        host
    );
    // `Url` already drops the scheme's default port
    if let Some(port) = url.port() {
        out.push_str(&format!(":{}", port));
    }
    out.push_str(&path);

    if !pairs.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        out.push('?');
        out.push_str(&query);
    }
    out
}

fn share_link_key(url: &Url) -> Option<DedupKey> {
    let host = url.host_str()?.to_ascii_lowercase();
    let path = url.path();

    if MICROBLOG_HOSTS.contains(&host.as_str()) {
        let id = STATUS_ID.captures(path)?.get(1)?.as_str();
        return Some(DedupKey(format!("microblog:status:{}", id)));
    }

    if host == "toutiao.com" || host.ends_with(".toutiao.com") {
        let from_path = TOUTIAO_ID
            .captures(path)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        let id = from_path.or_else(|| {
            url.query_pairs()
                .find(|(k, _)| k == "group_id" || k == "item_id")
                .map(|(_, v)| v.into_owned())
                .filter(|v| v.chars().all(|c| c.is_ascii_digit()) && !v.is_empty())
        })?;
        return Some(DedupKey(format!("toutiao:article:{}", id)));
    }

    if host == "youtu.be" {
        let id = path.trim_matches('/');
        return (!id.is_empty()).then(|| DedupKey(format!("youtube:{}", id)));
    }
    if host == "youtube.com" || host.ends_with(".youtube.com") {
        if path == "/watch" {
            let id = url
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.into_owned())?;
            return Some(DedupKey(format!("youtube:{}", id)));
        }
        let id = YOUTUBE_PATH_ID.captures(path)?.get(1)?.as_str();
        return Some(DedupKey(format!("youtube:{}", id)));
    }

    None
}

/// Tracks keys already admitted in a batch
#[derive(Debug, Default)]
pub struct Deduper {
    config: DedupConfig,
    seen: HashMap<DedupKey, String>,
}

impl Deduper {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            seen: HashMap::new(),
        }
    }

    /// Admit a URL, or return the earlier URL it duplicates
    pub fn admit(&mut self, url: &Url) -> Result<DedupKey, String> {
        let key = DedupKey::for_url(url, &self.config);
        if let Some(first) = self.seen.get(&key) {
            return Err(first.clone());
        }
        self.seen.insert(key.clone(), url.to_string());
        Ok(key)
    }
}

/// A batch split into URLs and free-text notes, both in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchInput {
    pub urls: Vec<String>,
    pub notes: Vec<String>,
}

impl BatchInput {
    /// Split on `%%%` when present, otherwise on newlines. Fragments starting
    /// with `http://` or `https://` are URLs; the rest are notes.
    pub fn parse(text: &str) -> Self {
        let fragments: Vec<&str> = if text.contains(FRAGMENT_DELIMITER) {
            text.split(FRAGMENT_DELIMITER).collect()
        } else {
            text.lines().collect()
        };

        let mut input = BatchInput::default();
        for fragment in fragments.into_iter().map(str::trim).filter(|f| !f.is_empty()) {
            let lower = fragment.to_ascii_lowercase();
            if lower.starts_with("http://") || lower.starts_with("https://") {
                input.urls.push(fragment.to_string());
            } else {
                input.notes.push(fragment.to_string());
            }
        }
        input
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.notes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn key(url: &str) -> String {
        DedupKey::for_url(&Url::parse(url).unwrap(), &DedupConfig::default()).to_string()
    }

    #[test]
    fn test_tracking_params_collapse() {
        assert_eq!(key("https://e.com/a?utm_source=x"), "https://e.com/a");
        assert_eq!(key("https://e.com/a/"), "https://e.com/a");
        assert_eq!(key("HTTPS://E.com:443/a#frag"), "https://e.com/a");
        assert_eq!(key("https://e.com/a?b=2&a=1&spm=3"), "https://e.com/a?a=1&b=2");
        assert_eq!(key("https://e.com/a?timestamp=1700000000"), "https://e.com/a");
        assert_eq!(key("https://e.com/"), "https://e.com/");
        assert_eq!(key("http://e.com:8080/x"), "http://e.com:8080/x");
    }

    #[test]
    fn test_short_params_identify_pages_on_other_sites() {
        assert_ne!(
            key("https://forum.example/viewtopic.php?t=101"),
            key("https://forum.example/viewtopic.php?t=202")
        );
        assert_ne!(key("https://blog.example/?s=rust"), key("https://blog.example/?s=golang"));
        assert_eq!(
            key("https://forum.example/viewtopic.php?t=101&from=feed"),
            "https://forum.example/viewtopic.php?from=feed&t=101"
        );
    }

    #[test]
    fn test_site_params_drop_on_their_site() {
        assert_eq!(
            key("https://x.com/abc?s=20&t=xyz&lang=en"),
            "https://x.com/abc?lang=en"
        );
        assert_eq!(
            key("https://www.toutiao.com/c/user/42/?source=share&tt_from=weixin"),
            "https://www.toutiao.com/c/user/42"
        );
        // no parent-domain match on lookalike hosts
        assert_eq!(key("https://notx.com/abc?s=20"), "https://notx.com/abc?s=20");
    }

    #[test]
    fn test_microblog_share_links() {
        let expected = "microblog:status:1234567890";
        assert_eq!(key("https://twitter.com/abc/status/1234567890"), expected);
        assert_eq!(key("https://x.com/abc/status/1234567890?s=20&t=xyz"), expected);
        assert_eq!(key("https://mobile.twitter.com/abc/status/1234567890/photo/1"), expected);
    }

    #[test]
    fn test_toutiao_share_links() {
        let expected = "toutiao:article:7300000000000000001";
        assert_eq!(key("https://www.toutiao.com/article/7300000000000000001/"), expected);
        assert_eq!(key("https://m.toutiao.com/a7300000000000000001/"), expected);
        assert_eq!(key("https://www.toutiao.com/group/7300000000000000001/"), expected);
        assert_eq!(
            key("https://m.toutiao.com/share?group_id=7300000000000000001&tt_from=weixin"),
            expected
        );
    }

    #[test]
    fn test_youtube_share_links() {
        assert_eq!(key("https://www.youtube.com/watch?v=dQw4w9WgXcQ&t=42"), "youtube:dQw4w9WgXcQ");
        assert_eq!(key("https://youtu.be/dQw4w9WgXcQ?si=abc"), "youtube:dQw4w9WgXcQ");
        assert_eq!(key("https://youtube.com/shorts/dQw4w9WgXcQ"), "youtube:dQw4w9WgXcQ");
    }

    #[test]
    fn test_deduper_keeps_first() {
        let mut deduper = Deduper::new(DedupConfig::default());
        let first = Url::parse("https://e.com/a").unwrap();
        let second = Url::parse("https://e.com/a?utm_source=x").unwrap();
        assert!(deduper.admit(&first).is_ok());
        assert_eq!(deduper.admit(&second), Err("https://e.com/a".to_string()));
    }

    #[test]
    fn test_parse_newlines() {
        let input = BatchInput::parse("https://e.com/a\n\n  read later  \nhttp://e.com/b\n");
        assert_eq!(input.urls, vec!["https://e.com/a", "http://e.com/b"]);
        assert_eq!(input.notes, vec!["read later"]);
    }

    #[test]
    fn test_parse_delimited_keeps_multiline_notes() {
        let input = BatchInput::parse("https://e.com/a%%%first line\nsecond line%%%\nhttps://e.com/b\n");
        assert_eq!(input.urls, vec!["https://e.com/a", "https://e.com/b"]);
        assert_eq!(input.notes, vec!["first line\nsecond line"]);
    }
}
