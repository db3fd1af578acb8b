use pretty_assertions::assert_eq;
use std::fs;
use webclip_core::config::{FetchConfig, MediaConfig};
use webclip_core::fetch::build_client;
use webclip_core::media::MediaDownloader;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn downloader(dir: &std::path::Path) -> MediaDownloader {
    let client = build_client(&FetchConfig::default()).unwrap();
    MediaDownloader::new(client, MediaConfig::default(), dir)
}

fn image_body() -> Vec<u8> {
    vec![0xFFu8; 512]
}

#[tokio::test]
async fn test_download_then_reuse() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/photo.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(image_body(), "image/jpeg"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dl = downloader(dir.path());
    let url = format!("{}/img/photo.jpg", server.uri());

    let first = dl.download(&url, None).await.unwrap();
    assert!(first.local_path.starts_with("media/"));
    assert!(first.local_path.ends_with(".jpg"));
    assert_eq!(first.size, 512);
    assert_eq!(first.content_type.as_deref(), Some("image/jpeg"));

    let second = dl.download(&url, None).await.unwrap();
    assert_eq!(second.local_path, first.local_path);
    assert_eq!(fs::read_dir(dl.media_dir()).unwrap().count(), 1);
}

#[tokio::test]
async fn test_tiny_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/tiny.png"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(vec![1u8; 20], "image/png"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dl = downloader(dir.path());
    let err = dl
        .download(&format!("{}/tiny.png", server.uri()), None)
        .await
        .unwrap_err();
    assert!(err.reason.contains("too small"));
}

#[tokio::test]
async fn test_html_error_page_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_raw("<html>".repeat(50), "text/html"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = downloader(dir.path())
        .download(&format!("{}/blocked.jpg", server.uri()), None)
        .await
        .unwrap_err();
    assert!(err.reason.contains("content type"));
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky.webp"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.webp"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(image_body(), "image/webp"))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let asset = downloader(dir.path())
        .download(&format!("{}/flaky.webp", server.uri()), None)
        .await
        .unwrap();
    assert!(asset.local_path.ends_with(".webp"));
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.gif"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let err = downloader(dir.path())
        .download(&format!("{}/missing.gif", server.uri()), None)
        .await
        .unwrap_err();
    assert!(err.reason.contains("404"));
}

#[tokio::test]
async fn test_download_all_keeps_order_and_sends_referer() {
    let server = MockServer::start().await;
    for name in ["a", "b", "c"] {
        Mock::given(method("GET"))
            .and(path(format!("/{}.png", name)))
            .and(header("referer", "https://blog.example/post/1"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(image_body(), "image/png"))
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let urls: Vec<String> = ["a", "b", "c"]
        .iter()
        .map(|n| format!("{}/{}.png", server.uri(), n))
        .collect();
    let referer = url::Url::parse("https://blog.example/post/1").unwrap();
    let report = downloader(dir.path())
        .download_all(&urls, Some(&referer))
        .await;

    assert!(report.failed.is_empty());
    let order: Vec<&str> = report.assets.iter().map(|a| a.remote_url.as_str()).collect();
    assert_eq!(order, urls.iter().map(String::as_str).collect::<Vec<_>>());
    assert_eq!(report.rewrites.len(), 3);
}
