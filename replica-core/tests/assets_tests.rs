// Asset resolution against a mock origin

use replica_core::config::AssetConfig;
use replica_core::rewrite::rewrite_markup;
use replica_core::{AssetResolver, create_layout};
use replica_scanner::{Bucket, PageRecord, ResourceInventory};
use reqwest::Client;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn page(url: &str, html: &str, refs: &[(Bucket, &str)]) -> PageRecord {
    let mut resources = ResourceInventory::new();
    for (bucket, reference) in refs {
        resources.insert(*bucket, *reference);
    }
    PageRecord::new(url.to_string(), html.to_string(), String::new(), resources)
}

async fn serve(server: &MockServer, route: &str, body: &[u8], expected: u64) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .expect(expected)
        .mount(server)
        .await;
}

async fn resolver(server: &MockServer, dir: &TempDir, config: AssetConfig) -> AssetResolver {
    create_layout(dir.path()).await.unwrap();
    let base = Url::parse(&server.uri()).unwrap();
    AssetResolver::new(Client::new(), base, dir.path(), config)
}

#[tokio::test]
async fn test_stylesheet_font_and_image_are_relocated() {
    let server = MockServer::start().await;
    serve(
        &server,
        "/css/main.css",
        b"@font-face { src: url('/fonts/f.woff2'); } .logo { background: url(\"../img/logo.png\") }",
        1,
    )
    .await;
    serve(&server, "/img/a.png", b"png-a", 1).await;
    serve(&server, "/fonts/f.woff2", b"font", 1).await;
    serve(&server, "/img/logo.png", b"logo", 1).await;

    let html = r#"<html><head><link rel="stylesheet" href="/css/main.css"></head><body><img src="/img/a.png"></body></html>"#;
    let pages = vec![page(
        &format!("{}/", server.uri()),
        html,
        &[(Bucket::Stylesheet, "/css/main.css"), (Bucket::Image, "/img/a.png")],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("/css/main.css"), Some("css/main.css"));
    assert_eq!(assets.get("/img/a.png"), Some("images/a.png"));
    assert_eq!(assets.get("/fonts/f.woff2"), Some("fonts/f.woff2"));
    assert_eq!(assets.get("../img/logo.png"), Some("images/logo.png"));

    assert_eq!(fs::read(dir.path().join("images/a.png")).unwrap(), b"png-a");
    assert_eq!(fs::read(dir.path().join("fonts/f.woff2")).unwrap(), b"font");

    let css = fs::read_to_string(dir.path().join("css/main.css")).unwrap();
    assert!(css.contains("url('../fonts/f.woff2')"), "{}", css);
    assert!(css.contains("url('../images/logo.png')"), "{}", css);

    let rewritten = rewrite_markup(html, "", &assets);
    assert!(rewritten.html.contains(r#"<link rel="stylesheet" href="css/main.css">"#));
    assert!(rewritten.html.contains(r#"<img src="images/a.png">"#));

    let stats = resolver.stats();
    assert_eq!(stats.fetched, 4);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_shared_reference_is_fetched_once() {
    let server = MockServer::start().await;
    serve(&server, "/img/shared.png", b"shared", 1).await;

    let html = r#"<img src="/img/shared.png">"#;
    let pages: Vec<PageRecord> = ["/", "/a", "/b"]
        .iter()
        .map(|p| {
            page(
                &format!("{}{}", server.uri(), p),
                html,
                &[(Bucket::Image, "/img/shared.png")],
            )
        })
        .collect();

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    for page in &pages {
        let out = rewrite_markup(&page.html, "", &assets);
        assert!(out.html.contains(r#"<img src="images/shared.png">"#));
    }
    assert_eq!(resolver.stats().fetched, 1);
}

#[tokio::test]
async fn test_same_url_under_two_spellings_downloads_twice() {
    let server = MockServer::start().await;
    serve(&server, "/img/a.png", b"a", 2).await;

    let absolute = format!("{}/img/a.png", server.uri());
    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Image, "/img/a.png"), (Bucket::Image, absolute.as_str())],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("/img/a.png"), Some("images/a.png"));
    assert_eq!(assets.get(&absolute), Some("images/a_1.png"));
}

#[tokio::test]
async fn test_dedupe_by_url_shares_one_download() {
    let server = MockServer::start().await;
    serve(&server, "/img/a.png", b"a", 1).await;

    let absolute = format!("{}/img/a.png", server.uri());
    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Image, "/img/a.png"), (Bucket::Image, absolute.as_str())],
    )];

    let config = AssetConfig {
        dedupe_by_url: true,
        ..Default::default()
    };
    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, config).await;
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("/img/a.png"), Some("images/a.png"));
    assert_eq!(assets.get(&absolute), Some("images/a.png"));
}

#[tokio::test]
async fn test_basename_collisions_get_distinct_names() {
    let server = MockServer::start().await;
    serve(&server, "/x/logo.png", b"x", 1).await;
    serve(&server, "/y/logo.png", b"y", 1).await;
    serve(&server, "/z/logo.png", b"z", 1).await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[
            (Bucket::Image, "/x/logo.png"),
            (Bucket::Image, "/y/logo.png"),
            (Bucket::Image, "/z/logo.png"),
        ],
    )];

    let dir = TempDir::new().unwrap();
    let config = AssetConfig {
        concurrent_downloads: 3,
        ..Default::default()
    };
    let mut resolver = resolver(&server, &dir, config).await;
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("/x/logo.png"), Some("images/logo.png"));
    assert_eq!(assets.get("/y/logo.png"), Some("images/logo_1.png"));
    assert_eq!(assets.get("/z/logo.png"), Some("images/logo_2.png"));
    assert_eq!(fs::read(dir.path().join("images/logo_1.png")).unwrap(), b"y");
}

#[tokio::test]
async fn test_timeout_leaves_reference_unmapped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/slow.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow".to_vec())
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let html = r#"<img src="/img/slow.png">"#;
    let pages = vec![page(
        &format!("{}/", server.uri()),
        html,
        &[(Bucket::Image, "/img/slow.png")],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default())
        .await
        .with_download_timeout(Duration::from_millis(100))
        .with_retries(0);
    let assets = resolver.resolve(&pages).await;

    assert!(!assets.contains("/img/slow.png"));
    assert_eq!(resolver.stats().failed, 1);
    assert!(!dir.path().join("images/slow.png").exists());

    let out = rewrite_markup(html, "", &assets);
    assert!(out.html.contains(r#"<img src="/img/slow.png">"#));
}

#[tokio::test]
async fn test_not_found_is_a_counted_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/js/gone.js"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Script, "/js/gone.js")],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default())
        .await
        .with_retries(3);
    let assets = resolver.resolve(&pages).await;

    assert!(assets.is_empty());
    assert_eq!(resolver.stats().failed, 1);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/js/app.js"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    serve(&server, "/js/app.js", b"console.log(1)", 1).await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Script, "/js/app.js")],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default())
        .await
        .with_retries(1);
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("/js/app.js"), Some("js/app.js"));
    assert_eq!(
        fs::read_to_string(dir.path().join("js/app.js")).unwrap(),
        "console.log(1)"
    );
}

#[tokio::test]
async fn test_oversized_body_is_discarded() {
    let server = MockServer::start().await;
    serve(&server, "/img/huge.png", &[0u8; 4096], 1).await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Image, "/img/huge.png")],
    )];

    let config = AssetConfig {
        max_file_size: 1024,
        ..Default::default()
    };
    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, config).await;
    let assets = resolver.resolve(&pages).await;

    assert!(!assets.contains("/img/huge.png"));
    assert!(!dir.path().join("images/huge.png").exists());
}

#[tokio::test]
async fn test_unfetchable_and_disallowed_references_are_skipped() {
    let server = MockServer::start().await;
    serve(&server, "/files/setup.exe", b"MZ", 0).await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[
            (Bucket::Image, "data:image/png;base64,AAAA"),
            (Bucket::Other, "/files/setup.exe"),
        ],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    assert!(assets.is_empty());
    assert_eq!(resolver.stats().skipped, 2);
}

#[tokio::test]
async fn test_extensionless_reference_gets_synthesized_name() {
    let server = MockServer::start().await;
    serve(&server, "/api/avatar", b"img", 1).await;

    let pages = vec![page(
        &format!("{}/", server.uri()),
        "",
        &[(Bucket::Image, "/api/avatar")],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    let local = assets.get("/api/avatar").unwrap();
    assert!(local.starts_with("images/asset_"), "{}", local);
    assert!(local.ends_with(".png"));
    assert!(dir.path().join(local).exists());
}

#[tokio::test]
async fn test_relative_reference_resolves_against_its_page() {
    let server = MockServer::start().await;
    serve(&server, "/docs/img/diagram.svg", b"<svg/>", 1).await;

    let pages = vec![page(
        &format!("{}/docs/guide", server.uri()),
        r#"<img src="img/diagram.svg">"#,
        &[],
    )];

    let dir = TempDir::new().unwrap();
    let mut resolver = resolver(&server, &dir, AssetConfig::default()).await;
    let assets = resolver.resolve(&pages).await;

    assert_eq!(assets.get("img/diagram.svg"), Some("images/diagram.svg"));
}
