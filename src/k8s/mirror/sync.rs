/**
 * List-then-watch sync protocol for one mirror store
 *
 * 1. list the whole collection and swap it into the store
 * 2. watch from the list's resource version, applying each change in order
 * 3. hand control back to the supervisor when the stream ends
 */
use super::store::{ChangeEvent, Mirrored, MirrorStore, ObjectRecord};
use crate::error::{Error, Result};
use crate::k8s::api::ClusterApi;
use crate::k8s::resources::ApiTarget;
use futures::StreamExt;
use kube::api::{DynamicObject, ObjectList, WatchEvent};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Why one list-then-watch cycle ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server closed the watch (timeout or connection reset); re-list
    StreamClosed,
    /// The checkpoint is too old for the server (`410 Gone`); re-list
    Expired,
    /// Shutdown was requested
    Stopped,
}

/// Run one list-then-watch cycle against `store`.
///
/// # Errors
///
/// Transport, decode and watch status failures are returned for the
/// supervisor to retry with backoff
pub async fn list_and_watch<K: Mirrored>(
    api: &dyn ClusterApi,
    target: &ApiTarget,
    store: &MirrorStore<K>,
    shutdown: &CancellationToken,
) -> Result<SyncOutcome> {
    let kind = store.kind();

    let list = tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(SyncOutcome::Stopped),
        list = api.list(target) => list?,
    };
    let checkpoint = list_checkpoint(&list);
    let records = list
        .items
        .into_iter()
        .map(|obj| ObjectRecord::decode(kind, obj))
        .collect::<Result<Vec<ObjectRecord<K>>>>()?;
    let listed = records.len();
    store.replace(records, checkpoint.clone())?;
    info!("📋 {} listed {} objects at version {}", kind, listed, checkpoint);

    let mut stream = tokio::select! {
        biased;
        () = shutdown.cancelled() => return Ok(SyncOutcome::Stopped),
        stream = api.watch(target, &checkpoint) => stream?,
    };

    loop {
        let next = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(SyncOutcome::Stopped),
            next = stream.next() => next,
        };

        let Some(event) = next else {
            debug!("🔚 {} watch stream closed by server", kind);
            return Ok(SyncOutcome::StreamClosed);
        };

        match event? {
            WatchEvent::Added(obj) => {
                let record = ObjectRecord::decode(kind, obj)?;
                debug!("➕ {} added: {}", kind, record.key());
                store.apply(ChangeEvent::Added(record))?;
            }
            WatchEvent::Modified(obj) => {
                let record = ObjectRecord::decode(kind, obj)?;
                debug!("📝 {} modified: {}", kind, record.key());
                store.apply(ChangeEvent::Updated(record))?;
            }
            WatchEvent::Deleted(obj) => {
                let record = ObjectRecord::decode(kind, obj)?;
                debug!("🗑️  {} deleted: {}", kind, record.key());
                store.apply(ChangeEvent::Deleted(record))?;
            }
            WatchEvent::Bookmark(bookmark) => {
                store.advance_checkpoint(&bookmark.metadata.resource_version)?;
            }
            WatchEvent::Error(status) if status.code == 410 => {
                info!("⌛ {} watch checkpoint expired: {}", kind, status.message);
                return Ok(SyncOutcome::Expired);
            }
            WatchEvent::Error(status) => return Err(Error::WatchStatus(status)),
        }
    }
}

/// Collection resource version, or the highest item version when the server omitted it
fn list_checkpoint(list: &ObjectList<DynamicObject>) -> String {
    list.metadata
        .resource_version
        .clone()
        .filter(|rv| !rv.is_empty())
        .or_else(|| {
            list.items
                .iter()
                .filter_map(|obj| obj.metadata.resource_version.as_deref())
                .max_by_key(|rv| rv.parse::<u64>().unwrap_or(0))
                .map(ToString::to_string)
        })
        .unwrap_or_else(|| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::serde_json;

    fn list_with(collection_rv: Option<&str>, item_rvs: &[&str]) -> ObjectList<DynamicObject> {
        let items: Vec<_> = item_rvs
            .iter()
            .enumerate()
            .map(|(i, rv)| {
                serde_json::json!({
                    "metadata": {"name": format!("p{i}"), "namespace": "ns", "resourceVersion": rv}
                })
            })
            .collect();
        let mut metadata = serde_json::json!({});
        if let Some(rv) = collection_rv {
            metadata["resourceVersion"] = serde_json::json!(rv);
        }
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "PodList",
            "metadata": metadata,
            "items": items,
        }))
        .unwrap()
    }

    #[test]
    fn test_checkpoint_prefers_collection_version() {
        assert_eq!(list_checkpoint(&list_with(Some("900"), &["5", "12"])), "900");
    }

    #[test]
    fn test_checkpoint_falls_back_to_highest_item() {
        assert_eq!(list_checkpoint(&list_with(None, &["5", "12", "9"])), "12");
        assert_eq!(list_checkpoint(&list_with(Some(""), &["3"])), "3");
        assert_eq!(list_checkpoint(&list_with(None, &[])), "0");
    }
}
