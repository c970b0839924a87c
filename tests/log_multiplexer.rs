//! Merged container log tails
mod support;

use futures::StreamExt;
use kubemirror::k8s::logs::{LogChunk, LogMultiplexer};
use kubemirror::ClusterMirror;
use std::time::Duration;
use support::{FakeCluster, LogScript};
use tokio::io::AsyncReadExt;
use tokio::time::timeout;

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| (*n).to_string()).collect()
}

#[tokio::test]
async fn test_open_is_all_or_nothing() {
    let fake = FakeCluster::new();
    fake.script_log("app", LogScript::Follow(vec!["2024-05-01T10:00:00Z up"]));
    fake.script_log("sidecar", LogScript::Fail);
    fake.script_log("proxy", LogScript::Follow(vec![]));

    let result = LogMultiplexer::new(fake.clone())
        .open("default", "web-0", &names(&["app", "sidecar", "proxy"]))
        .await;

    assert!(result.is_err());
    assert_eq!(fake.log_opens(), names(&["app", "sidecar"]));
    assert!(fake.log_closed("app"));
}

#[tokio::test]
async fn test_chunks_are_labeled_by_container() {
    let fake = FakeCluster::new();
    fake.script_log(
        "app",
        LogScript::Finite(vec!["2024-05-01T10:00:00Z started", "2024-05-01T10:00:01Z ready"]),
    );
    fake.script_log("sidecar", LogScript::Finite(vec!["2024-05-01T10:00:02Z proxying"]));

    let merged = LogMultiplexer::new(fake.clone())
        .open("default", "web-0", &names(&["app", "sidecar"]))
        .await
        .unwrap();
    assert_eq!(merged.sources(), names(&["app", "sidecar"]).as_slice());

    let chunks: Vec<LogChunk> = merged.map(Result::unwrap).collect().await;
    assert_eq!(chunks.len(), 3);

    let app: Vec<&LogChunk> = chunks.iter().filter(|c| c.container == "app").collect();
    assert_eq!(app.len(), 2);
    assert_eq!(&app[0].data[..], b"2024-05-01T10:00:00Z started\n");
    assert_eq!(&app[1].data[..], b"2024-05-01T10:00:01Z ready\n");
    assert!(chunks.iter().all(|c| c.timestamp().is_some()));

    let sidecar = chunks.iter().find(|c| c.container == "sidecar").unwrap();
    assert_eq!(&sidecar.render()[..], b"[sidecar] 2024-05-01T10:00:02Z proxying\n");
}

#[tokio::test]
async fn test_close_releases_every_source() {
    let fake = FakeCluster::new();
    fake.script_log("app", LogScript::Follow(vec!["one"]));
    fake.script_log("sidecar", LogScript::Follow(vec![]));

    let mut merged = LogMultiplexer::new(fake.clone())
        .open("default", "web-0", &names(&["app", "sidecar"]))
        .await
        .unwrap();

    let first = merged.next().await.unwrap().unwrap();
    assert_eq!(first.container, "app");
    assert!(!fake.log_closed("app"));

    merged.close();
    assert!(fake.log_closed("app"));
    assert!(fake.log_closed("sidecar"));
    assert!(merged.next().await.is_none());
}

#[tokio::test]
async fn test_dropping_the_stream_closes_sources() {
    let fake = FakeCluster::new();
    let merged = LogMultiplexer::new(fake.clone())
        .open("default", "web-0", &names(&["app"]))
        .await
        .unwrap();
    assert!(!fake.log_closed("app"));

    drop(merged);
    assert!(fake.log_closed("app"));
}

#[tokio::test]
async fn test_get_logs_through_the_mirror() {
    let fake = FakeCluster::new();
    fake.serve_all();
    fake.script_log("app", LogScript::Finite(vec!["hello"]));

    let mirror = ClusterMirror::start(fake.clone(), support::fast_config());
    let logs = mirror
        .get_logs("default", "web-0", &names(&["app"]))
        .await
        .unwrap();

    let mut out = String::new();
    let mut reader = Box::pin(logs.into_async_read());
    timeout(Duration::from_secs(5), reader.read_to_string(&mut out))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(out, "[app] hello\n");

    mirror.shutdown().await;
}
