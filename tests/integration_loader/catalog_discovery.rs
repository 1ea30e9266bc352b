//! Catalogs built from manifests and mini-app folders on disk.

use std::{fs, sync::Arc};

use miniapp_sandbox::{Catalog, DirectoryFetcher, LifecycleKind};

use super::support::loader_over;

#[test]
fn discovers_folders_with_an_entry_document() {
    let dir = tempfile::tempdir().expect("tempdir");
    for (folder, meta) in [
        ("weather", Some(r#"{"name": "Weather", "order": 2, "tags": ["api"]}"#)),
        ("abacus", Some(r#"{"name": "Abacus", "order": 2, "agents": ["calc"]}"#)),
        ("zen", None),
        ("broken-meta", Some("{not json")),
    ] {
        let path = dir.path().join(folder);
        fs::create_dir_all(&path).expect("mkdir");
        fs::write(path.join("index.html"), "<p>hi</p>").expect("index");
        if let Some(meta) = meta {
            fs::write(path.join("miniapp.json"), meta).expect("meta");
        }
    }
    fs::create_dir_all(dir.path().join("assets-only")).expect("mkdir");
    fs::write(dir.path().join("README.md"), "not an app").expect("readme");

    let catalog = Catalog::discover(dir.path(), "/projects/").expect("catalog");
    let slugs: Vec<&str> = catalog.entries().iter().map(|e| e.slug.as_str()).collect();
    assert_eq!(slugs, vec!["abacus", "weather", "broken-meta", "zen"]);

    let weather = catalog.get("weather").expect("weather");
    assert_eq!(weather.entry_point, "/projects/weather/index.html");
    assert_eq!(weather.tags, vec!["api"]);
    assert_eq!(catalog.get("zen").map(|e| e.name.as_str()), Some("zen"));
}

#[test]
fn loads_a_manifest_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = dir.path().join("manifest.json");
    fs::write(
        &manifest,
        r#"{"projects": [{"slug": "b", "name": "B"}, {"slug": "a", "name": "A", "order": 0}]}"#,
    )
    .expect("write");
    let catalog = Catalog::load(&manifest).expect("catalog");
    assert_eq!(catalog.entries()[0].slug, "a");
    assert_eq!(catalog.entries()[1].entry_point, "/projects/b/index.html");

    let missing = Catalog::load(dir.path().join("absent.json")).unwrap_err();
    assert!(missing.to_string().starts_with("E-MAPP-0501"));
}

#[tokio::test]
async fn catalog_descriptors_drive_the_loader() {
    let dir = tempfile::tempdir().expect("tempdir");
    let app = dir.path().join("hello");
    fs::create_dir_all(&app).expect("mkdir");
    fs::write(
        app.join("index.html"),
        "<body><p id='g'></p><script>document.getElementById('g').textContent = 'hello';</script></body>",
    )
    .expect("index");

    let catalog = Catalog::discover(dir.path(), "/projects/").expect("catalog");
    let descriptor = catalog.descriptor("hello").expect("descriptor");
    let (loader, sink) = loader_over(Arc::new(DirectoryFetcher::new(dir.path())));
    loader.select(descriptor).await;

    assert_eq!(sink.last().map(|e| e.kind), Some(LifecycleKind::Loaded));
    assert!(loader.root_html().contains(r#"<p id="g">hello</p>"#));
}
