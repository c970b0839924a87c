//! In-memory `ClusterApi` used by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use futures::{Stream, StreamExt};
use k8s_openapi::serde_json::{self, json, Value};
use kube::api::{DynamicObject, ObjectList, WatchEvent};
use kubemirror::k8s::mirror::BackoffConfig;
use kubemirror::k8s::api::{ClusterApi, LogStream, WatchStream};
use kubemirror::k8s::resources::ApiTarget;
use kubemirror::{Error, MirrorConfig, Result};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

type WatchItem = Result<WatchEvent<DynamicObject>>;

#[derive(Clone)]
pub enum LogScript {
    /// Emit these lines, then keep following (never end)
    Follow(Vec<&'static str>),
    /// Emit these lines, then end
    Finite(Vec<&'static str>),
    /// Opening fails
    Fail,
}

#[derive(Default)]
struct State {
    served: HashMap<String, Vec<String>>,
    discovery_failures: HashMap<String, usize>,
    discovery_calls: Vec<(String, Instant)>,
    collections: HashMap<String, (String, Vec<Value>)>,
    list_calls: Vec<String>,
    watch_calls: Vec<(String, String)>,
    watch_senders: HashMap<String, mpsc::UnboundedSender<WatchItem>>,
    logs: HashMap<String, LogScript>,
    log_opens: Vec<String>,
    log_closed: HashMap<String, Arc<AtomicBool>>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Serve `plural` under `group_version`
    pub fn serve(&self, group_version: &str, plural: &str) {
        self.with(|s| {
            s.served
                .entry(group_version.to_string())
                .or_default()
                .push(plural.to_string());
        });
    }

    /// Serve `group_version` without any resources
    pub fn serve_group(&self, group_version: &str) {
        self.with(|s| {
            s.served.entry(group_version.to_string()).or_default();
        });
    }

    /// Serve every kind the mirror knows at its preferred version
    pub fn serve_all(&self) {
        for (gv, plural) in [
            ("v1", "pods"),
            ("v1", "services"),
            ("v1", "nodes"),
            ("v1", "namespaces"),
            ("apps/v1", "deployments"),
            ("apps/v1", "daemonsets"),
            ("apps/v1", "statefulsets"),
            ("batch/v1", "jobs"),
            ("batch/v1", "cronjobs"),
        ] {
            self.serve(gv, plural);
        }
    }

    /// The next `times` discovery calls for `group_version` fail
    pub fn fail_discovery(&self, group_version: &str, times: usize) {
        self.with(|s| {
            s.discovery_failures.insert(group_version.to_string(), times);
        });
    }

    pub fn set_collection(&self, target: &str, resource_version: &str, items: Vec<Value>) {
        self.with(|s| {
            s.collections
                .insert(target.to_string(), (resource_version.to_string(), items));
        });
    }

    pub fn discovery_calls(&self, group_version: &str) -> Vec<Instant> {
        self.with(|s| {
            s.discovery_calls
                .iter()
                .filter(|(gv, _)| gv == group_version)
                .map(|(_, at)| *at)
                .collect()
        })
    }

    pub fn list_calls(&self, target: &str) -> usize {
        self.with(|s| s.list_calls.iter().filter(|t| *t == target).count())
    }

    pub fn watch_calls(&self, target: &str) -> Vec<String> {
        self.with(|s| {
            s.watch_calls
                .iter()
                .filter(|(t, _)| t == target)
                .map(|(_, rv)| rv.clone())
                .collect()
        })
    }

    /// Deliver one change on the currently open watch of `target`
    pub fn push(&self, target: &str, event: WatchEvent<DynamicObject>) {
        self.send(target, Ok(event));
    }

    /// Break the currently open watch of `target` with a transport error
    pub fn fail_watch(&self, target: &str) {
        self.send(target, Err(Error::Custom("connection reset by peer".to_string())));
    }

    /// Close the currently open watch of `target` as a server timeout would
    pub fn close_watch(&self, target: &str) {
        self.with(|s| {
            s.watch_senders.remove(target);
        });
    }

    fn send(&self, target: &str, item: WatchItem) {
        self.with(|s| {
            let sender = s.watch_senders.get(target).expect("no open watch");
            sender.send(item).expect("watch receiver dropped");
        });
    }

    pub fn script_log(&self, container: &str, script: LogScript) {
        self.with(|s| {
            s.logs.insert(container.to_string(), script);
        });
    }

    pub fn log_opens(&self) -> Vec<String> {
        self.with(|s| s.log_opens.clone())
    }

    pub fn log_closed(&self, container: &str) -> bool {
        self.with(|s| {
            s.log_closed
                .get(container)
                .is_some_and(|flag| flag.load(Ordering::SeqCst))
        })
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn served_resources(&self, group_version: &str) -> Result<Option<Vec<String>>> {
        self.with(|s| {
            s.discovery_calls
                .push((group_version.to_string(), Instant::now()));
            if let Some(remaining) = s.discovery_failures.get_mut(group_version) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(Error::Custom("discovery timed out".to_string()));
                }
            }
            Ok(s.served.get(group_version).cloned())
        })
    }

    async fn list(&self, target: &ApiTarget) -> Result<ObjectList<DynamicObject>> {
        let key = target.to_string();
        let (rv, items) = self.with(|s| {
            s.list_calls.push(key.clone());
            s.collections
                .get(&key)
                .cloned()
                .unwrap_or_else(|| ("1".to_string(), Vec::new()))
        });
        Ok(serde_json::from_value(json!({
            "apiVersion": target.group_version(),
            "kind": format!("{}List", target.kind),
            "metadata": {"resourceVersion": rv},
            "items": items,
        }))?)
    }

    async fn watch(&self, target: &ApiTarget, resource_version: &str) -> Result<WatchStream> {
        let key = target.to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        self.with(|s| {
            s.watch_calls.push((key.clone(), resource_version.to_string()));
            s.watch_senders.insert(key, tx);
        });
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }

    async fn open_log(&self, _namespace: &str, _pod: &str, container: &str) -> Result<LogStream> {
        self.with(|s| {
            s.log_opens.push(container.to_string());
            let script = s
                .logs
                .get(container)
                .cloned()
                .unwrap_or(LogScript::Follow(Vec::new()));
            let lines = |lines: Vec<&'static str>| {
                stream::iter(lines.into_iter().map(|l| Ok(Bytes::from(format!("{l}\n")))))
            };
            let inner: LogStream = match script {
                LogScript::Fail => {
                    return Err(Error::Custom(format!("container {container} not found")));
                }
                LogScript::Follow(l) => lines(l).chain(stream::pending()).boxed(),
                LogScript::Finite(l) => lines(l).boxed(),
            };
            let closed = Arc::new(AtomicBool::new(false));
            s.log_closed.insert(container.to_string(), closed.clone());
            Ok(Tracked { inner, closed }.boxed())
        })
    }
}

/// Log stream that records when it is dropped
struct Tracked {
    inner: LogStream,
    closed: Arc<AtomicBool>,
}

impl Stream for Tracked {
    type Item = std::io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub fn object(api_version: &str, kind: &str, namespace: Option<&str>, name: &str, rv: &str) -> Value {
    let mut metadata = json!({
        "name": name,
        "resourceVersion": rv,
        "uid": format!("uid-{name}"),
    });
    if let Some(ns) = namespace {
        metadata["namespace"] = json!(ns);
    }
    json!({"apiVersion": api_version, "kind": kind, "metadata": metadata})
}

pub fn pod(namespace: &str, name: &str, rv: &str) -> Value {
    let mut pod = object("v1", "Pod", Some(namespace), name, rv);
    pod["spec"] = json!({"containers": [{"name": "app", "image": "nginx"}]});
    pod
}

pub fn dynamic(value: Value) -> DynamicObject {
    serde_json::from_value(value).unwrap()
}

/// Watch bookmark carrying only a resource version
pub fn bookmark(rv: &str) -> WatchEvent<DynamicObject> {
    serde_json::from_value(json!({
        "type": "BOOKMARK",
        "object": {
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"resourceVersion": rv},
        },
    }))
    .unwrap()
}

/// Poll `check` until it holds, failing the test after a few seconds
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(30);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Millisecond backoff so failure paths run quickly
pub fn fast_config() -> MirrorConfig {
    MirrorConfig {
        backoff: BackoffConfig {
            floor: Duration::from_millis(10),
            ceiling: Duration::from_millis(50),
        },
        healthy_after: Duration::from_secs(10),
        restart_delay: Duration::from_millis(10),
        shutdown_grace: Duration::from_secs(2),
    }
}

pub const PODS: &str = "v1/pods";
