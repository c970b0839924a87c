/**
 * Remote control plane access
 *
 * `ClusterApi` is the only way the mirror talks to the api server:
 * discovery, bulk list, watch and log streaming. `KubeApi` implements it
 * over a `kube::Client`; tests substitute an in-memory cluster.
 */
use super::mirror::config::WATCH_TIMEOUT_SECONDS;
use super::resources::ApiTarget;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, DynamicObject, ListParams, LogParams, ObjectList, WatchEvent, WatchParams};
use kube::Client;
use tracing::debug;

/// Server-push change stream for one collection
pub type WatchStream = BoxStream<'static, Result<WatchEvent<DynamicObject>>>;

/// Live byte stream of one container's log, one chunk per line, bytes untouched
pub type LogStream = BoxStream<'static, std::io::Result<Bytes>>;

#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// Resource names served under `group_version`.
    ///
    /// `Ok(None)` when the server reports the group/version as absent, which
    /// is distinct from failing to ask.
    async fn served_resources(&self, group_version: &str) -> Result<Option<Vec<String>>>;

    /// Full collection across all namespaces
    async fn list(&self, target: &ApiTarget) -> Result<ObjectList<DynamicObject>>;

    /// Change stream starting after `resource_version`
    async fn watch(&self, target: &ApiTarget, resource_version: &str) -> Result<WatchStream>;

    /// Follow a container's log with timestamps
    async fn open_log(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream>;
}

/// `ClusterApi` backed by a real api server
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
}

impl KubeApi {
    #[must_use]
    pub const fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic(&self, target: &ApiTarget) -> Api<DynamicObject> {
        Api::all_with(self.client.clone(), &target.api_resource())
    }
}

#[async_trait]
impl ClusterApi for KubeApi {
    async fn served_resources(&self, group_version: &str) -> Result<Option<Vec<String>>> {
        let listed = if group_version.contains('/') {
            self.client.list_api_group_resources(group_version).await
        } else {
            self.client.list_core_api_resources(group_version).await
        };

        match listed.map_err(Error::from) {
            Ok(list) => Ok(Some(
                list.resources.into_iter().map(|r| r.name).collect(),
            )),
            Err(e) if e.is_not_found() => {
                debug!("🔎 {} is not served: {}", group_version, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn list(&self, target: &ApiTarget) -> Result<ObjectList<DynamicObject>> {
        Ok(self.dynamic(target).list(&ListParams::default()).await?)
    }

    async fn watch(&self, target: &ApiTarget, resource_version: &str) -> Result<WatchStream> {
        let wp = WatchParams::default().timeout(WATCH_TIMEOUT_SECONDS);
        let stream = self.dynamic(target).watch(&wp, resource_version).await?;
        Ok(stream.map_err(Into::into).boxed())
    }

    async fn open_log(&self, namespace: &str, pod: &str, container: &str) -> Result<LogStream> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams {
            follow: true,
            timestamps: true,
            container: Some(container.to_string()),
            ..LogParams::default()
        };

        let reader = Box::pin(pods.log_stream(pod, &lp).await?);
        // split on raw bytes: container output is not guaranteed to be UTF-8
        let lines = futures::stream::try_unfold(reader, |mut reader| async move {
            let mut line = Vec::new();
            let read = reader.read_until(b'\n', &mut line).await?;
            Ok::<_, std::io::Error>((read > 0).then(|| (Bytes::from(line), reader)))
        })
        .boxed();
        Ok(lines)
    }
}
