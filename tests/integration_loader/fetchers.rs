//! The loader over real fetchers: a static directory and an HTTP origin.

use std::{fs, sync::Arc};

use httpmock::prelude::*;
use miniapp_sandbox::{
    AssetFetcher, DirectoryFetcher, FetchMode, HttpFetcher, LifecycleKind, SandboxConfig,
};
use tempfile::TempDir;

use super::support::{descriptor, loader_over, page};

fn apps_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = dir.path().join("clock");
    fs::create_dir_all(app.join("js")).expect("mkdir");
    fs::write(
        app.join("index.html"),
        page(r#"<time id="now">--</time><img src="face.png"><script src="js/tick.js"></script>"#),
    )
    .expect("write index");
    fs::write(
        app.join("js/tick.js"),
        "document.getElementById('now').textContent = 'ticking';",
    )
    .expect("write script");
    fs::write(dir.path().join("secret.txt"), "top secret").expect("write secret");
    dir
}

#[tokio::test]
async fn loads_a_mini_app_from_a_directory() {
    let dir = apps_dir();
    let (loader, sink) = loader_over(Arc::new(DirectoryFetcher::new(dir.path())));
    loader.select(descriptor("clock")).await;

    assert_eq!(sink.last().map(|e| e.kind), Some(LifecycleKind::Loaded));
    let html = loader.root_html();
    assert!(html.contains(r#"<time id="now">ticking</time>"#), "{html}");
    assert!(html.contains(r#"src="/projects/clock/face.png""#), "{html}");
}

#[tokio::test]
async fn directory_fetcher_refuses_to_leave_its_root() {
    let dir = apps_dir();
    let fetcher = DirectoryFetcher::new(dir.path());
    for url in [
        "/projects/../secret.txt",
        "/projects/clock/../../secret.txt",
        "/elsewhere/secret.txt",
    ] {
        let response = fetcher.fetch(url, FetchMode::Default).await.expect("response");
        assert_eq!(response.status, 403, "{url}");
    }
    let missing = fetcher
        .fetch("/projects/clock/nope.js", FetchMode::Default)
        .await
        .expect("response");
    assert_eq!(missing.status, 404);
    let folder = fetcher
        .fetch("/projects/clock/js", FetchMode::Default)
        .await
        .expect("response");
    assert_eq!(folder.status, 404);
}

#[tokio::test]
async fn directory_fetcher_serves_names_that_need_escaping() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = dir.path().join("demo");
    fs::create_dir_all(&app).expect("mkdir");
    fs::write(
        app.join("index.html"),
        page(r#"<p id="o">-</p><script src="my app.js"></script><script src="naïve.js"></script>"#),
    )
    .expect("write index");
    fs::write(app.join("my app.js"), "document.getElementById('o').textContent = 'spaced';")
        .expect("write spaced");
    fs::write(
        app.join("naïve.js"),
        "var o = document.getElementById('o'); o.textContent = o.textContent + ' accented';",
    )
    .expect("write accented");

    let (loader, sink) = loader_over(Arc::new(DirectoryFetcher::new(dir.path())));
    loader.select(descriptor("demo")).await;

    assert_eq!(sink.kinds(), vec![LifecycleKind::Loading, LifecycleKind::Loaded]);
    assert!(loader.root_html().contains("spaced accented"), "{}", loader.root_html());

    let fetcher = DirectoryFetcher::new(dir.path());
    let escaped = fetcher
        .fetch("/projects/demo/%2e%2e/secret.txt", FetchMode::Default)
        .await
        .expect("response");
    assert_eq!(escaped.status, 403);
}

#[tokio::test]
async fn directory_fetcher_never_serves_another_hosts_url_locally() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = dir.path().join("demo");
    fs::create_dir_all(&app).expect("mkdir");
    fs::write(
        app.join("index.html"),
        page(r#"<p id="o">-</p><script src="https://cdn.example.com/projects/demo/local.js"></script>"#),
    )
    .expect("write index");
    fs::write(app.join("local.js"), "document.getElementById('o').textContent = 'local';")
        .expect("write script");

    let (loader, sink) = loader_over(Arc::new(DirectoryFetcher::new(dir.path())));
    loader.select(descriptor("demo")).await;

    let last = sink.last().expect("event");
    assert_eq!(last.kind, LifecycleKind::Error);
    let message = last.error.expect("message");
    assert!(message.contains("cdn.example.com") && message.contains("404"), "{message}");
    assert!(!loader.root_html().contains("local"));
}

#[cfg(unix)]
#[tokio::test]
async fn directory_fetcher_rejects_symlink_escapes() {
    let dir = apps_dir();
    let outside = tempfile::tempdir().expect("outside");
    fs::write(outside.path().join("leak.txt"), "leak").expect("write");
    std::os::unix::fs::symlink(outside.path(), dir.path().join("clock/link")).expect("symlink");
    let fetcher = DirectoryFetcher::new(dir.path());
    let response = fetcher
        .fetch("/projects/clock/link/leak.txt", FetchMode::Default)
        .await
        .expect("response");
    assert_eq!(response.status, 403);
}

#[tokio::test]
async fn http_fetcher_disables_caching_for_entry_documents() {
    let server = MockServer::start_async().await;
    let entry = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/projects/remote/index.html")
                .header("cache-control", "no-cache")
                .header("pragma", "no-cache");
            then.status(200)
                .body(page(r#"<p id="p">remote</p><script src="app.js"></script>"#));
        })
        .await;
    let script = server
        .mock_async(|when, then| {
            when.method(GET).path("/projects/remote/app.js");
            then.status(200)
                .body("document.getElementById('p').textContent = 'remote ran';");
        })
        .await;

    let config = SandboxConfig {
        http_origin: server.base_url(),
        ..SandboxConfig::default()
    };
    let fetcher = HttpFetcher::new(&config).expect("client");
    let (loader, sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("remote")).await;

    entry.assert_async().await;
    script.assert_async().await;
    assert_eq!(sink.last().map(|e| e.kind), Some(LifecycleKind::Loaded));
    assert!(loader.root_html().contains("remote ran"));
}

#[tokio::test]
async fn http_script_failure_fails_the_load_with_its_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/projects/half/index.html");
            then.status(200).body(page(r#"<script src="gone.js"></script>"#));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/projects/half/gone.js");
            then.status(503);
        })
        .await;

    let config = SandboxConfig {
        http_origin: server.base_url(),
        ..SandboxConfig::default()
    };
    let (loader, sink) = loader_over(Arc::new(HttpFetcher::new(&config).expect("client")));
    loader.select(descriptor("half")).await;

    let last = sink.last().expect("event");
    assert_eq!(last.kind, LifecycleKind::Error);
    let message = last.error.expect("message");
    assert!(message.contains("503") && message.contains("gone.js"), "{message}");
    assert_eq!(loader.root_html(), "");
}

#[tokio::test]
async fn unreachable_origin_is_a_transport_error() {
    let config = SandboxConfig {
        http_origin: "http://127.0.0.1:9/".to_string(),
        fetch_timeout_ms: 2_000,
        connect_timeout_ms: 500,
        ..SandboxConfig::default()
    };
    let (loader, sink) = loader_over(Arc::new(HttpFetcher::new(&config).expect("client")));
    loader.select(descriptor("offline")).await;
    let message = sink.last().and_then(|e| e.error).expect("error");
    assert!(message.starts_with("E-MAPP-0201"), "{message}");
}
