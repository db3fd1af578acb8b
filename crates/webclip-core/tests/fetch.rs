use flate2::write::GzEncoder;
use flate2::Compression;
use pretty_assertions::assert_eq;
use std::io::Write;
use url::Url;
use webclip_core::config::FetchConfig;
use webclip_core::decode::EncodingSource;
use webclip_core::{FailureCode, Fetcher, Stage};
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> Fetcher {
    Fetcher::new(FetchConfig::default()).unwrap()
}

fn page_url(server: &MockServer, p: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), p)).unwrap()
}

#[tokio::test]
async fn test_gzip_body_is_decompressed() {
    let server = MockServer::start().await;
    let html = "<html><body><article><p>compressed body</p></article></body></html>";
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(html.as_bytes()).unwrap();
    let gz = encoder.finish().unwrap();

    Mock::given(method("GET"))
        .and(path("/gz"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-encoding", "gzip")
                .set_body_raw(gz, "text/html; charset=utf-8"),
        )
        .mount(&server)
        .await;

    let page = fetcher().fetch(&page_url(&server, "/gz")).await.unwrap();
    assert_eq!(page.content_encoding.as_deref(), Some("gzip"));
    assert_eq!(page.html, html);
}

#[tokio::test]
async fn test_declared_gbk_is_decoded() {
    let server = MockServer::start().await;
    let html = "<html><body><p>中文内容，用于测试编码。</p></body></html>";
    let (bytes, _, _) = encoding_rs::GBK.encode(html);

    Mock::given(method("GET"))
        .and(path("/gbk"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(bytes.into_owned(), "text/html; charset=gbk"))
        .mount(&server)
        .await;

    let page = fetcher().fetch(&page_url(&server, "/gbk")).await.unwrap();
    assert_eq!(page.encoding_source, EncodingSource::Declared);
    assert!(page.html.contains("中文内容"));
}

#[tokio::test]
async fn test_placeholder_charset_falls_through_to_detection() {
    let server = MockServer::start().await;
    let text = "这是一段足够长的中文文本，用来让编码检测器做出有把握的判断。".repeat(4);
    let html = format!("<html><body><p>{}</p></body></html>", text);

    Mock::given(method("GET"))
        .and(path("/placeholder"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            html.clone().into_bytes(),
            "text/html; charset=iso-8859-1",
        ))
        .mount(&server)
        .await;

    let page = fetcher()
        .fetch(&page_url(&server, "/placeholder"))
        .await
        .unwrap();
    assert_eq!(page.html, html);
    assert_ne!(page.encoding_source, EncodingSource::Declared);
}

#[tokio::test]
async fn test_non_success_status_is_fetch_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = fetcher().fetch(&page_url(&server, "/gone")).await.unwrap_err();
    assert_eq!(err.code, FailureCode::FetchFailed);
    assert_eq!(err.stage, Stage::Fetch);
    assert!(err.message.contains("503"));
}

#[tokio::test]
async fn test_browser_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/headers"))
        .and(header_exists("accept-language"))
        .and(header("upgrade-insecure-requests", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<p>ok</p>", "text/html"))
        .expect(1)
        .mount(&server)
        .await;

    let page = fetcher().fetch(&page_url(&server, "/headers")).await.unwrap();
    assert_eq!(page.status, 200);
}
