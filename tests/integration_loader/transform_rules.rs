//! Attribute rewriting as seen in the mounted markup.

use std::sync::Arc;

use miniapp_sandbox::MemoryFetcher;

use super::support::{descriptor, loader_over, page};

#[tokio::test]
async fn relative_references_are_rebased_and_others_left_alone() {
    let body = r##"
        <img id="a" src="img/a.png" alt="A" srcset="img/a.png 1x, img/a@2x.png 2x">
        <picture><source srcset="wide.webp 800w,  , narrow.webp 400w"></picture>
        <a id="b" href="../shared/doc.html#top" class="link">doc</a>
        <a id="c" href="https://example.com/x">ext</a>
        <a id="d" href="#section">frag</a>
        <a id="e" href="//cdn.example.com/lib.js">cdn</a>
        <img id="f" src="data:image/png;base64,AAAA">
        <video poster="poster.jpg"></video>
        <audio src="/abs/sound.ogg"></audio>
        <svg><use href="sprites.svg#icon"></use></svg>
    "##;
    let fetcher = MemoryFetcher::new().with_file("/projects/gallery/index.html", page(body));
    let (loader, _sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("gallery")).await;
    let html = loader.root_html();

    for expected in [
        r#"src="/projects/gallery/img/a.png""#,
        r#"alt="A""#,
        r#"srcset="/projects/gallery/img/a.png 1x, /projects/gallery/img/a@2x.png 2x""#,
        r#"srcset="/projects/gallery/wide.webp 800w, /projects/gallery/narrow.webp 400w""#,
        r#"href="/projects/shared/doc.html#top""#,
        r#"class="link""#,
        r#"href="https://example.com/x""#,
        r##"href="#section""##,
        r#"href="//cdn.example.com/lib.js""#,
        r#"src="data:image/png;base64,AAAA""#,
        r#"poster="/projects/gallery/poster.jpg""#,
        r#"src="/abs/sound.ogg""#,
        r#"href="/projects/gallery/sprites.svg#icon""#,
    ] {
        assert!(html.contains(expected), "missing {expected} in {html}");
    }
}

#[tokio::test]
async fn head_styles_survive_and_scripts_never_render() {
    let html = r#"<html><head>
        <meta charset="utf-8"><title>Styled</title>
        <link rel="stylesheet" href="css/app.css">
        <link rel="icon" href="favicon.ico">
        <style>p { color: red; }</style>
      </head><body><p>styled</p><script>1 + 1;</script></body></html>"#;
    let fetcher = MemoryFetcher::new().with_file("/projects/styled/index.html", html);
    let (loader, _sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("styled")).await;
    let out = loader.root_html();

    assert!(out.contains(r#"<link rel="stylesheet" href="/projects/styled/css/app.css">"#), "{out}");
    assert!(out.contains("<style>p { color: red; }</style>"), "{out}");
    assert!(!out.contains("favicon"));
    assert!(!out.contains("<title>"));
    assert!(!out.contains("<script"));
    assert!(out.find("<style>").unwrap_or(usize::MAX) < out.find("<p>").unwrap_or(0));
}
