use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics_relay::{ExecCachedProxy, ExecProxy, MetricProxy, ScrapeParams};

static TEMP_SEQ: AtomicU32 = AtomicU32::new(0);

fn marker_path(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "metrics-relay-exec-test-{}-{}-{tag}",
        std::process::id(),
        TEMP_SEQ.fetch_add(1, Ordering::Relaxed),
    ))
}

fn invocation_count(marker: &PathBuf) -> usize {
    std::fs::read_to_string(marker)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn concurrent_scrapes_share_one_invocation() {
    let marker = marker_path("coalesce");
    // The script records each invocation, then takes long enough that every
    // scraper below registers before it finishes.
    let proxy = Arc::new(ExecProxy::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "echo run >> \"$0\"; sleep 0.4; echo 'x 1'".to_string(),
            marker.display().to_string(),
        ],
    ));

    let scrapes = (0..50).map(|_| {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.scrape(&ScrapeParams::default()).await })
    });
    let results = futures_util::future::join_all(scrapes).await;

    let mut bodies = Vec::new();
    for result in results {
        let families = result.expect("join").expect("scrape");
        bodies.push(metrics_relay::exposition::encode(&families));
    }
    assert_eq!(bodies.len(), 50);
    assert!(bodies.iter().all(|body| body == &bodies[0]));
    assert!(bodies[0].contains("x 1"));

    assert_eq!(invocation_count(&marker), 1, "expected a single invocation");
    let _ = std::fs::remove_file(marker);
}

#[tokio::test]
async fn cancelled_scrapes_deregister_and_do_not_deadlock() {
    let marker = marker_path("cancel");
    let proxy = Arc::new(ExecProxy::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "echo run >> \"$0\"; sleep 1; echo 'x 1'".to_string(),
            marker.display().to_string(),
        ],
    ));

    // The first scrape gives up long before the script finishes.
    let hurried = tokio::time::timeout(
        Duration::from_millis(100),
        proxy.scrape(&ScrapeParams::default()),
    )
    .await;
    assert!(hurried.is_err(), "expected the deadline to fire first");

    // A patient scrape still completes: the in-flight execution serves it.
    let families = tokio::time::timeout(
        Duration::from_secs(10),
        proxy.scrape(&ScrapeParams::default()),
    )
    .await
    .expect("no deadlock")
    .expect("scrape");
    assert_eq!(families[0].name, "x");

    assert_eq!(invocation_count(&marker), 1);
    let _ = std::fs::remove_file(marker);
}

#[tokio::test]
async fn cached_scrapes_observe_the_interval() {
    let marker = marker_path("cached");
    // Prints the number of executions so far, so each snapshot is
    // distinguishable.
    let proxy = ExecCachedProxy::new(
        "/bin/sh",
        vec![
            "-c".to_string(),
            "echo run >> \"$0\"; echo \"x $(wc -l < \"$0\")\"".to_string(),
            marker.display().to_string(),
        ],
        Duration::from_millis(400),
    );

    // Blocks until the first execution lands.
    let first = proxy.scrape(&ScrapeParams::default()).await.expect("scrape");
    assert_eq!(first[0].samples[0].value, 1.0);

    // Well inside the interval: same snapshot.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let second = proxy.scrape(&ScrapeParams::default()).await.expect("scrape");
    assert_eq!(second, first);

    // Past the interval: a newer execution is visible.
    tokio::time::sleep(Duration::from_millis(750)).await;
    let third = proxy.scrape(&ScrapeParams::default()).await.expect("scrape");
    assert!(third[0].samples[0].value >= 2.0, "stale snapshot: {third:?}");

    let _ = std::fs::remove_file(marker);
}

#[tokio::test]
async fn cached_scrape_respects_the_caller_deadline_before_readiness() {
    let proxy = ExecCachedProxy::new(
        "/bin/sh",
        vec!["-c".to_string(), "sleep 30; echo 'x 1'".to_string()],
        Duration::from_secs(3600),
    );

    let hurried = tokio::time::timeout(
        Duration::from_millis(100),
        proxy.scrape(&ScrapeParams::default()),
    )
    .await;
    assert!(hurried.is_err(), "expected the deadline to fire first");
}
