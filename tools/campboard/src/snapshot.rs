use crate::records::ItemRecord;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// One successful fetch, in source order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub items: Vec<ItemRecord>,
    pub fetched_at: Option<SystemTime>,
}

impl Snapshot {
    pub fn new(items: Vec<ItemRecord>, fetched_at: SystemTime) -> Self {
        Self {
            items,
            fetched_at: Some(fetched_at),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }
}

/// Holds the last-good snapshot of one dashboard.
///
/// There is a single writer (the fetcher). Readers get whole `Arc<Snapshot>`
/// values, so a snapshot is never visible while it is being built.
#[derive(Debug)]
pub struct SnapshotStore {
    sender: watch::Sender<Option<Arc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self { sender }
    }

    pub fn last_good(&self) -> Option<Arc<Snapshot>> {
        self.sender.borrow().clone()
    }

    pub fn last_good_or_empty(&self) -> Arc<Snapshot> {
        self.last_good()
            .unwrap_or_else(|| Arc::new(Snapshot::empty()))
    }

    pub fn has_last_good(&self) -> bool {
        self.sender.borrow().is_some()
    }

    pub fn publish(&self, snapshot: Arc<Snapshot>) {
        self.sender.send_replace(Some(snapshot));
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Snapshot, SnapshotStore};
    use crate::records::ItemRecord;
    use std::sync::Arc;
    use std::time::SystemTime;

    fn snapshot(name: &str) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(
            vec![ItemRecord {
                code: String::new(),
                name: name.to_string(),
                count: 1,
                target: 2,
            }],
            SystemTime::UNIX_EPOCH,
        ))
    }

    #[test]
    fn store_starts_without_last_good() {
        let store = SnapshotStore::new();
        assert!(!store.has_last_good());
        assert!(store.last_good().is_none());
        assert!(store.last_good_or_empty().is_empty());
    }

    #[test]
    fn publish_replaces_whole_snapshot_and_readers_keep_their_copy() {
        let store = SnapshotStore::new();
        let first = snapshot("Tents");
        store.publish(first.clone());
        let seen = store.last_good().expect("snapshot");
        assert!(Arc::ptr_eq(&seen, &first));

        store.publish(snapshot("Stoves"));
        assert_eq!(store.last_good_or_empty().items[0].name, "Stoves");
        assert!(Arc::ptr_eq(&seen, &first), "old readers keep their copy");
    }

    #[test]
    fn independent_stores_do_not_share_state() {
        let a = SnapshotStore::new();
        let b = SnapshotStore::new();
        a.publish(snapshot("Tents"));
        assert!(a.has_last_good());
        assert!(!b.has_last_good());
    }
}
