//! HTTP fetching

use crate::config::{FetchConfig, HeaderOverride};
use crate::decode::{self, EncodingSource};
use crate::failure::Failure;
use crate::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// A fetched and decoded page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The URL that was requested
    pub url: Url,
    /// The URL after redirects
    pub final_url: Url,
    /// HTTP status code
    pub status: u16,
    /// Body bytes after transport decompression
    pub bytes: Vec<u8>,
    /// Declared Content-Encoding
    pub content_encoding: Option<String>,
    /// Declared Content-Type
    pub content_type: Option<String>,
    /// Encoding used to decode the body
    pub encoding: &'static str,
    /// Which resolution step chose the encoding
    pub encoding_source: EncodingSource,
    /// The decoded HTML
    pub html: String,
}

/// Fetcher for web pages
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    /// Create a fetcher with the given configuration
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self { client, config })
    }

    /// The underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Fetch a page. Never panics or errors outside the returned failure.
    pub async fn fetch(&self, url: &Url) -> std::result::Result<FetchedPage, Failure> {
        info!("Fetching: {}", url);

        let response = self
            .client
            .get(url.as_str())
            .headers(self.headers_for(url))
            .send()
            .await
            .map_err(|e| Failure::fetch(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Failure::fetch(format!("HTTP status {}", status)));
        }

        let final_url = response.url().clone();
        let content_encoding = header_string(response.headers(), CONTENT_ENCODING);
        let content_type = header_string(response.headers(), CONTENT_TYPE);

        let raw = response
            .bytes()
            .await
            .map_err(|e| Failure::fetch(format!("reading body failed: {}", e)))?;

        let bytes = decode::decompress(raw.to_vec(), content_encoding.as_deref());
        let declared = content_type
            .as_deref()
            .and_then(decode::charset_from_content_type);
        let decoded = decode::decode_text(&bytes, declared.as_deref(), &self.config.unreliable_charsets);

        debug!(
            "Fetched {} bytes from {} as {} ({:?})",
            bytes.len(),
            final_url,
            decoded.encoding,
            decoded.source
        );

        Ok(FetchedPage {
            url: url.clone(),
            final_url,
            status: status.as_u16(),
            bytes,
            content_encoding,
            content_type,
            encoding: decoded.encoding,
            encoding_source: decoded.source,
            html: decoded.text,
        })
    }

    /// Browser-like headers plus any per-domain overrides
    fn headers_for(&self, url: &Url) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let defaults = [
            (
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
            ),
            ("Accept-Encoding", "gzip, deflate"),
            ("Accept-Language", self.config.accept_language.as_str()),
            ("Upgrade-Insecure-Requests", "1"),
        ];
        for (name, value) in defaults {
            insert_header(&mut headers, name, value);
        }

        let host = url.host_str().unwrap_or_default();
        for rule in matching_overrides(&self.config.header_overrides, host) {
            for (name, value) in &rule.headers {
                insert_header(&mut headers, name, value);
            }
        }
        headers
    }
}

/// Build the shared HTTP client. Decompression stays off so bodies can be
/// decoded explicitly.
pub fn build_client(config: &FetchConfig) -> Result<Client> {
    let client = Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .cookie_store(true)
        .build()?;
    Ok(client)
}

/// Overrides whose domain is a substring of `host`, in table order
pub fn matching_overrides<'a>(
    table: &'a [HeaderOverride],
    host: &'a str,
) -> impl Iterator<Item = &'a HeaderOverride> + 'a {
    let host = host.to_ascii_lowercase();
    table
        .iter()
        .filter(move |rule| host.contains(&rule.domain.to_ascii_lowercase()))
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => warn!("Skipping invalid header {}: {}", name, value),
    }
}

fn header_string(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}
