//! Switching mini-apps releases everything the previous one registered.

use std::sync::Arc;

use miniapp_sandbox::{EventTarget, MemoryFetcher, MiniAppDescriptor};

use super::support::{descriptor, loader_over, page};

const BUSY_APP: &str = r#"
<canvas id="c" width="300" height="150"></canvas>
<script>
  const canvas = document.getElementById('c');
  window.ticks = 0;
  setInterval(() => { window.ticks += 1; console.log('tick'); }, 10);
  setTimeout(() => console.log('late timeout'), 500);
  requestAnimationFrame(function loop() { requestAnimationFrame(loop); });
  window.addEventListener('resize', () => console.log('window resize'));
  document.addEventListener('keydown', () => console.log('key'));
  canvas.addEventListener('click', () => console.log('click'));
  new ResizeObserver(() => console.log('observed')).observe(canvas);
</script>
"#;

fn fetcher() -> MemoryFetcher {
    MemoryFetcher::new()
        .with_file("/projects/busy/index.html", page(BUSY_APP))
        .with_file("/projects/quiet/index.html", page("<p>quiet</p>"))
}

#[tokio::test]
async fn every_registered_resource_is_released_on_switch() {
    let (loader, _sink) = loader_over(Arc::new(fetcher()));
    loader.select(descriptor("busy")).await;

    assert_eq!(loader.active_timers(), 2);
    assert_eq!(loader.pending_frames(), 1);
    assert_eq!(loader.listener_count(), 3);
    assert_eq!(loader.observer_count(), 1);
    assert_eq!(loader.ledger_len(), 7);

    let driven = loader.advance(35);
    assert!(driven.fired >= 3, "{driven:?}");
    assert_eq!(loader.pending_frames(), 1);

    loader.select(descriptor("quiet")).await;
    assert_eq!(loader.active_timers(), 0);
    assert_eq!(loader.pending_frames(), 0);
    assert_eq!(loader.listener_count(), 0);
    assert_eq!(loader.observer_count(), 0);
    assert_eq!(loader.ledger_len(), 0);

    let after = loader.advance(1_000);
    assert_eq!(after.fired + after.skipped + after.failed, 0);
    assert_eq!(loader.dispatch_event(EventTarget::Window, "resize").fired, 0);
    assert!(loader.console().is_empty());
}

#[tokio::test]
async fn empty_entry_point_tears_down_too() {
    let (loader, sink) = loader_over(Arc::new(fetcher()));
    loader.select(descriptor("busy")).await;
    loader.select(MiniAppDescriptor::new("busy-but-empty", "")).await;

    assert!(sink.last().expect("loaded").empty);
    assert_eq!(loader.root_html(), "");
    assert_eq!(loader.active_timers(), 0);
    assert_eq!(loader.listener_count(), 0);
}

#[tokio::test]
async fn failed_load_clears_the_previous_app() {
    let fetcher = fetcher();
    fetcher.insert_status("/projects/broken/index.html", 404);
    let (loader, sink) = loader_over(Arc::new(fetcher));
    loader.select(descriptor("busy")).await;
    loader.select(descriptor("broken")).await;

    let error = sink.last().and_then(|e| e.error).expect("error message");
    assert!(error.contains("404"), "{error}");
    assert_eq!(loader.root_html(), "");
    assert_eq!(loader.observer_count(), 0);
}

#[tokio::test]
async fn released_resources_stay_silent_when_the_old_app_is_driven() {
    let (loader, _sink) = loader_over(Arc::new(fetcher()));
    loader.select(descriptor("busy")).await;
    loader.advance(10);
    assert_eq!(loader.console().len(), 1);

    loader.dispose();
    let after = loader.advance(100);
    assert_eq!(after.fired, 0);
    assert_eq!(loader.resize(800, 600).fired, 0);
}
