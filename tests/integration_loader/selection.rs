//! Tickets, re-selection and superseded loads.

use std::sync::Arc;

use miniapp_sandbox::{LifecycleKind, LoadPhase, MemoryFetcher, MiniAppDescriptor};

use super::support::{descriptor, loader_over, page, GatedFetcher};

fn two_apps() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_file("/projects/alpha/index.html", page(r#"<h1 id="t">alpha</h1>"#))
        .with_file("/projects/beta/index.html", page(r#"<h1 id="t">beta</h1>"#))
}

#[tokio::test]
async fn tickets_increase_with_every_new_selection() {
    let fetcher = Arc::new(two_apps());
    let (loader, sink) = loader_over(fetcher);
    loader.select(descriptor("alpha")).await;
    loader.select(descriptor("beta")).await;
    loader.select(descriptor("alpha")).await;

    let tickets: Vec<u64> = sink.events().iter().map(|e| e.ticket).collect();
    assert_eq!(tickets, vec![1, 1, 2, 2, 3, 3]);
    assert!(tickets.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(loader.current_ticket(), 3);
}

#[tokio::test]
async fn reselecting_the_active_app_is_a_no_op() {
    let fetcher = Arc::new(two_apps());
    let (loader, sink) = loader_over(fetcher.clone());
    loader.select(descriptor("alpha")).await;
    let html = loader.root_html();
    loader.select(descriptor("alpha")).await;

    assert_eq!(fetcher.request_count(), 1);
    assert_eq!(sink.kinds(), vec![LifecycleKind::Loading, LifecycleKind::Loaded]);
    assert_eq!(loader.root_html(), html);
    assert_eq!(loader.current_ticket(), 1);
}

#[tokio::test]
async fn a_changed_entry_point_counts_as_a_new_selection() {
    let fetcher = Arc::new(two_apps());
    let (loader, sink) = loader_over(fetcher);
    loader.select(descriptor("alpha")).await;
    loader
        .select(MiniAppDescriptor::new("alpha", "/projects/beta/index.html"))
        .await;
    assert_eq!(sink.events().len(), 4);
    assert!(loader.root_html().contains("beta"));
}

#[tokio::test]
async fn superseded_load_is_silent_and_never_mounts() {
    let gated = Arc::new(GatedFetcher::new(two_apps()));
    gated.gate("/projects/alpha/index.html");
    let (loader, sink) = loader_over(gated.clone());

    let first = loader.select(descriptor("alpha"));
    let second = async {
        tokio::task::yield_now().await;
        loader.select(descriptor("beta")).await;
        gated.release("/projects/alpha/index.html");
    };
    tokio::join!(first, second);

    let events = sink.events();
    let kinds: Vec<_> = events.iter().map(|e| (e.kind, e.ticket)).collect();
    assert_eq!(
        kinds,
        vec![
            (LifecycleKind::Loading, 1),
            (LifecycleKind::Loading, 2),
            (LifecycleKind::Loaded, 2),
        ]
    );
    assert!(events.iter().all(|e| e.kind != LifecycleKind::Error));
    assert!(loader.root_html().contains("beta"));
    assert!(!loader.root_html().contains("alpha"));
    assert_eq!(loader.phase(), LoadPhase::Loaded);
}

#[tokio::test]
async fn superseded_script_fetch_abandons_the_transform() {
    let fetcher = two_apps().with_file(
        "/projects/slow/index.html",
        page(r#"<p>slow</p><script src="app.js"></script>"#),
    );
    fetcher.insert("/projects/slow/app.js", "document.body.textContent = 'ran';");
    let gated = Arc::new(GatedFetcher::new(fetcher));
    gated.gate("/projects/slow/app.js");
    let (loader, sink) = loader_over(gated.clone());

    let first = loader.select(descriptor("slow"));
    let second = async {
        // Let the first load reach its script fetch.
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
        loader.select(descriptor("alpha")).await;
        gated.release("/projects/slow/app.js");
    };
    tokio::join!(first, second);

    assert_eq!(
        sink.kinds(),
        vec![LifecycleKind::Loading, LifecycleKind::Loading, LifecycleKind::Loaded]
    );
    assert!(loader.root_html().contains("alpha"));
    assert!(!loader.root_html().contains("ran"));
}

#[tokio::test]
async fn missing_slug_leaves_the_mounted_app_alone() {
    let fetcher = Arc::new(two_apps());
    let (loader, sink) = loader_over(fetcher.clone());
    loader.select(descriptor("alpha")).await;
    loader
        .select(MiniAppDescriptor::new("", "/projects/beta/index.html"))
        .await;

    let last = sink.last().expect("error event");
    assert_eq!(last.kind, LifecycleKind::Error);
    assert_eq!(last.ticket, 2);
    assert_eq!(fetcher.request_count(), 1);
    assert!(loader.root_html().contains("alpha"));
}

#[tokio::test]
async fn dispose_supersedes_and_clears() {
    let fetcher = Arc::new(two_apps());
    let (loader, _sink) = loader_over(fetcher);
    loader.select(descriptor("alpha")).await;
    loader.dispose();
    assert_eq!(loader.phase(), LoadPhase::Idle);
    assert_eq!(loader.root_html(), "");
    assert!(loader.active().is_none());
    assert_eq!(loader.current_ticket(), 2);
}

#[tokio::test]
async fn many_overlapping_selections_report_only_the_last() {
    const APPS: [&str; 6] = ["a0", "a1", "a2", "a3", "a4", "a5"];
    let entry = |slug: &str| format!("/projects/{slug}/index.html");

    let mut fetcher = MemoryFetcher::new();
    for slug in APPS {
        fetcher = fetcher.with_file(&entry(slug), page(&format!(r#"<h1 id="t">{slug}</h1>"#)));
    }
    let gated = Arc::new(GatedFetcher::new(fetcher));
    for slug in APPS {
        gated.gate(&entry(slug));
    }
    let (loader, sink) = loader_over(gated.clone());

    let releases = async {
        tokio::task::yield_now().await;
        for idx in [3, 5, 0, 4, 1, 2] {
            gated.release(&entry(APPS[idx]));
            tokio::task::yield_now().await;
        }
    };
    tokio::join!(
        loader.select(descriptor(APPS[0])),
        loader.select(descriptor(APPS[1])),
        loader.select(descriptor(APPS[2])),
        loader.select(descriptor(APPS[3])),
        loader.select(descriptor(APPS[4])),
        loader.select(descriptor(APPS[5])),
        releases,
    );

    let events = sink.events();
    let loading: Vec<u64> = events
        .iter()
        .filter(|e| e.kind == LifecycleKind::Loading)
        .map(|e| e.ticket)
        .collect();
    assert_eq!(loading, vec![1, 2, 3, 4, 5, 6]);

    let outcomes: Vec<_> = events
        .iter()
        .filter(|e| e.kind != LifecycleKind::Loading)
        .collect();
    assert_eq!(outcomes.len(), 1, "{events:?}");
    assert_eq!(outcomes[0].kind, LifecycleKind::Loaded);
    assert_eq!(outcomes[0].ticket, 6);
    assert_eq!(outcomes[0].slug, "a5");

    assert_eq!(loader.current_ticket(), 6);
    let html = loader.root_html();
    assert!(html.contains(">a5<"), "{html}");
    for slug in &APPS[..5] {
        assert!(!html.contains(&format!(">{slug}<")), "{html}");
    }
}
