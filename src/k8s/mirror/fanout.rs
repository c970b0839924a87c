use std::fmt;
use std::sync::{Mutex, PoisonError};
use tracing::debug;
use uuid::Uuid;

/// What happened to an object, as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

/// Identifier handed back by `subscribe`, only useful for correlating logs
pub type SubscriberId = String;

type Callback<K> = Box<dyn Fn(ChangeKind, &K) + Send + Sync>;

struct Subscriber<K> {
    id: SubscriberId,
    callback: Callback<K>,
}

/// Append-only registry of change callbacks.
///
/// `dispatch` runs every callback inline, in registration order, while
/// holding the registry lock, so a registration never lands in the middle
/// of a dispatch. Callbacks are not isolated from each other: a slow one
/// delays the rest and the mirror behind it, and a callback must not call
/// `subscribe` on the same fan-out.
pub struct EventFanout<K> {
    subscribers: Mutex<Vec<Subscriber<K>>>,
}

impl<K> Default for EventFanout<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EventFanout<K> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback for changes applied from now on. There is no replay.
    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(ChangeKind, &K) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4().to_string();
        // the list only ever grows, so a poisoned lock still guards a valid list
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subs.push(Subscriber {
            id: id.clone(),
            callback: Box::new(callback),
        });
        debug!("👂 Subscriber {} registered ({} total)", id, subs.len());
        drop(subs);
        id
    }

    pub fn dispatch(&self, change: ChangeKind, object: &K) {
        let subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for subscriber in subs.iter() {
            (subscriber.callback)(change, object);
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids in registration order
    pub fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| s.id.clone())
            .collect()
    }
}
