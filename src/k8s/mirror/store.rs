use super::fanout::{ChangeKind, EventFanout};
use crate::error::{Error, Result};
use crate::k8s::resources::ResourceKind;
use k8s_openapi::serde_json;
use kube::api::DynamicObject;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Bounds every mirrored object type satisfies
pub trait Mirrored: Resource + Clone + DeserializeOwned + Send + Sync + 'static {}

impl<K> Mirrored for K where K: Resource + Clone + DeserializeOwned + Send + Sync + 'static {}

/// Identity of an entry: namespace (empty for cluster-scoped kinds) and name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn of<K: Resource>(obj: &K) -> Self {
        Self::new(obj.namespace().unwrap_or_default(), obj.name_any())
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// A decoded object together with the resource version it was observed at
#[derive(Debug, Clone)]
pub struct ObjectRecord<K> {
    pub object: K,
    pub resource_version: String,
}

impl<K: Mirrored> ObjectRecord<K> {
    pub fn new(object: K) -> Self {
        let resource_version = object.resource_version().unwrap_or_default();
        Self {
            object,
            resource_version,
        }
    }

    /// Decode a wire object into its typed form.
    ///
    /// `apiVersion`/`kind` are dropped first so an older served version
    /// (legacy `CronJob`) decodes into the current struct.
    ///
    /// # Errors
    ///
    /// Returns `Error::Decode` when the payload does not match `K`
    pub fn decode(kind: ResourceKind, mut obj: DynamicObject) -> Result<Self> {
        obj.types = None;
        let value = serde_json::to_value(&obj)?;
        let object: K = serde_json::from_value(value).map_err(|source| Error::Decode {
            kind: kind.plural(),
            source,
        })?;
        Ok(Self::new(object))
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::of(&self.object)
    }
}

/// One change delivered by a watch
#[derive(Debug, Clone)]
pub enum ChangeEvent<K> {
    Added(ObjectRecord<K>),
    Updated(ObjectRecord<K>),
    /// Final state of the removed object, as the watch delivered it
    Deleted(ObjectRecord<K>),
}

#[derive(Debug)]
struct Snapshot<K> {
    entries: HashMap<ResourceKey, Arc<ObjectRecord<K>>>,
    checkpoint: Option<String>,
}

/// Local mirror of one remote collection.
///
/// Readers always see a whole snapshot: a re-list swaps the full map under
/// the write lock and single events are applied one at a time in arrival
/// order. Records are shared as `Arc`s and replaced, never edited.
pub struct MirrorStore<K> {
    kind: ResourceKind,
    state: RwLock<Snapshot<K>>,
    fanout: Option<Arc<EventFanout<K>>>,
}

impl<K: Mirrored> MirrorStore<K> {
    #[must_use]
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            state: RwLock::new(Snapshot {
                entries: HashMap::new(),
                checkpoint: None,
            }),
            fanout: None,
        }
    }

    /// A store that reports every applied change to `fanout`
    #[must_use]
    pub fn with_fanout(kind: ResourceKind, fanout: Arc<EventFanout<K>>) -> Self {
        Self {
            fanout: Some(fanout),
            ..Self::new(kind)
        }
    }

    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Point-in-time copy of every entry, safe to call while syncing
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn list(&self) -> Result<Vec<Arc<ObjectRecord<K>>>> {
        let state = self.read()?;
        Ok(state.entries.values().cloned().collect())
    }

    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn get(&self, key: &ResourceKey) -> Result<Option<Arc<ObjectRecord<K>>>> {
        Ok(self.read()?.entries.get(key).cloned())
    }

    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Last resource version this store has caught up to
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn checkpoint(&self) -> Result<Option<String>> {
        Ok(self.read()?.checkpoint.clone())
    }

    /// Swap the whole mapping for a fresh list result.
    ///
    /// Later records win when a key repeats.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn replace(&self, records: Vec<ObjectRecord<K>>, resource_version: String) -> Result<()> {
        let entries: HashMap<_, _> = records
            .into_iter()
            .map(|record| (record.key(), Arc::new(record)))
            .collect();
        let count = entries.len();

        {
            let mut state = self.write()?;
            state.entries = entries;
            state.checkpoint = Some(resource_version);
        }

        debug!("📦 {} re-listed: {} entries", self.kind, count);
        Ok(())
    }

    /// Drop every entry and forget the checkpoint
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn clear(&self) -> Result<()> {
        let mut state = self.write()?;
        state.entries.clear();
        state.checkpoint = None;
        Ok(())
    }

    /// Apply one watch change, then notify the fan-out with the decoded object.
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn apply(&self, event: ChangeEvent<K>) -> Result<()> {
        let (change, record) = {
            let mut state = self.write()?;
            match event {
                ChangeEvent::Added(record) => (ChangeKind::Added, state.upsert(record)),
                ChangeEvent::Updated(record) => (ChangeKind::Updated, state.upsert(record)),
                ChangeEvent::Deleted(record) => (ChangeKind::Deleted, state.remove(record)),
            }
        };

        if let Some(fanout) = &self.fanout {
            fanout.dispatch(change, &record.object);
        }
        Ok(())
    }

    /// Move the checkpoint without touching entries (bookmarks)
    ///
    /// # Errors
    ///
    /// Returns `Error::LockPoisoned` if a writer panicked
    pub fn advance_checkpoint(&self, resource_version: &str) -> Result<()> {
        if !resource_version.is_empty() {
            self.write()?.checkpoint = Some(resource_version.to_string());
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Snapshot<K>>> {
        self.state
            .read()
            .map_err(|_| Error::LockPoisoned("mirror store read lock"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Snapshot<K>>> {
        self.state
            .write()
            .map_err(|_| Error::LockPoisoned("mirror store write lock"))
    }
}

impl<K: Mirrored> Snapshot<K> {
    fn upsert(&mut self, record: ObjectRecord<K>) -> Arc<ObjectRecord<K>> {
        if !record.resource_version.is_empty() {
            self.checkpoint = Some(record.resource_version.clone());
        }
        let record = Arc::new(record);
        self.entries.insert(record.key(), record.clone());
        record
    }

    /// Unknown keys are not an error; the delete still counts as applied
    fn remove(&mut self, record: ObjectRecord<K>) -> Arc<ObjectRecord<K>> {
        if !record.resource_version.is_empty() {
            self.checkpoint = Some(record.resource_version.clone());
        }
        self.entries.remove(&record.key());
        Arc::new(record)
    }
}
