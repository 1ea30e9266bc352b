//! Script extraction order, execution and the host-driving surface.

use std::sync::Arc;

use miniapp_sandbox::{ConsoleLevel, LifecycleKind, LoadPhase, MemoryFetcher};

use super::support::{descriptor, loader_over, page};

fn messages(entries: &[miniapp_sandbox::ConsoleEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.message.as_str()).collect()
}

#[tokio::test]
async fn scripts_run_in_document_order_including_external_ones() {
    let html = r#"<!doctype html><html><head>
        <script>console.log('head');</script>
        <script src="./lib/first.js"></script>
      </head><body>
        <div id="app"></div>
        <script>console.log('body inline');</script>
        <script type="module">console.log('module must not run');</script>
        <script type="text/x-template"><p>template</p></script>
        <script type=" Text/JavaScript ">console.log('typed');</script>
        <script src="second.js"></script>
      </body></html>"#;
    let fetcher = MemoryFetcher::new()
        .with_file("/projects/order/index.html", html)
        .with_file("/projects/order/lib/first.js", "console.log('first external');")
        .with_file("/projects/order/second.js", "console.log('second external');");
    let fetcher = Arc::new(fetcher);
    let (loader, _sink) = loader_over(fetcher.clone());
    loader.select(descriptor("order")).await;

    let console = loader.console();
    assert_eq!(
        messages(&console),
        vec!["head", "first external", "body inline", "typed", "second external"]
    );
    let report = loader.last_report().expect("report");
    assert_eq!(report.executed, 5);
    assert!(!loader.root_html().contains("template"));
    assert!(fetcher
        .requests()
        .iter()
        .any(|path| path == "/projects/order/lib/first.js"));
}

#[tokio::test]
async fn a_throwing_script_does_not_stop_the_rest() {
    let body = r#"<p id="out"></p>
        <script>document.getElementById('out').textContent = 'one';</script>
        <script>undefinedFunction();</script>
        <script>document.getElementById('out').textContent += ' three';</script>"#;
    let fetcher = MemoryFetcher::new().with_file("/projects/flaky/index.html", page(body));
    let (loader, sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("flaky")).await;

    assert_eq!(loader.phase(), LoadPhase::Loaded);
    assert_eq!(sink.last().map(|e| e.kind), Some(LifecycleKind::Loaded));
    assert!(loader.root_html().contains(r#"<p id="out">one three</p>"#));
    let report = loader.last_report().expect("report");
    assert_eq!((report.executed, report.failed), (2, 1));
    assert!(loader
        .console()
        .iter()
        .any(|e| e.level == ConsoleLevel::Error && e.message.contains("undefinedFunction")));
}

#[tokio::test]
async fn current_script_root_lookups_reach_the_isolated_root() {
    let body = r#"<span id="label">x</span>
        <script>
          const root = document.currentScript?.getRootNode();
          root.getElementById('label').textContent = 'via optional chaining';
        </script>
        <script>
          const r = document.currentScript && document.currentScript.getRootNode();
          const made = document.createElement('em');
          made.textContent = 'appended';
          r.appendChild(made);
        </script>"#;
    let fetcher = MemoryFetcher::new().with_file("/projects/rooted/index.html", page(body));
    let (loader, _sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("rooted")).await;

    let html = loader.root_html();
    assert!(html.contains("via optional chaining"), "{html}");
    assert!(html.ends_with("<em>appended</em>"), "{html}");
    assert_eq!(loader.last_report().map(|r| r.failed), Some(0));
}

#[tokio::test]
async fn resize_and_fullscreen_follow_the_viewport() {
    let body = r#"<canvas id="view" width="200" height="100"></canvas>
        <script>
          const canvas = document.getElementById('view');
          new ResizeObserver((entries) => {
            const box = entries[0].contentRect;
            console.log('size ' + box.width + 'x' + box.height);
          }).observe(canvas);
          window.addEventListener('resize', () => console.log('dpr ' + devicePixelRatio));
        </script>"#;
    let fetcher = MemoryFetcher::new().with_file("/projects/canvas/index.html", page(body));
    let (loader, _sink) = loader_over(Arc::new(fetcher));
    loader.set_fullscreen(Some(2.0));
    loader.select(descriptor("canvas")).await;

    let html = loader.root_html();
    assert!(html.contains(r#"width="400""#), "{html}");
    assert!(html.contains("width:200px;height:100px"), "{html}");

    let driven = loader.resize(1024, 768);
    assert_eq!(driven.fired, 2);
    assert_eq!(messages(&loader.console()), vec!["size 1024x768", "dpr 2"]);

    loader.set_fullscreen(None);
    let html = loader.root_html();
    assert!(html.contains(r#"<canvas id="view" width="200" height="100"></canvas>"#), "{html}");
}

#[tokio::test]
async fn timers_keep_running_after_mount() {
    let body = r#"<b id="n">0</b>
        <script>
          let n = 0;
          const el = document.getElementById('n');
          const id = setInterval(() => {
            n += 1;
            el.textContent = String(n);
            if (n === 4) clearInterval(id);
          }, 250);
        </script>"#;
    let fetcher = MemoryFetcher::new().with_file("/projects/count/index.html", page(body));
    let (loader, _sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("count")).await;
    assert_eq!(loader.ledger_len(), 1);

    loader.advance(600);
    assert!(loader.root_html().contains(r#"<b id="n">2</b>"#));
    loader.advance(10_000);
    assert!(loader.root_html().contains(r#"<b id="n">4</b>"#));
    assert_eq!(loader.ledger_len(), 0);
    assert_eq!(loader.active_timers(), 0);
}
