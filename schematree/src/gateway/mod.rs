//! The persistence boundary of the registry.
//!
//! A gateway stores whole root documents (a root collection and its entire
//! sub-collection closure) keyed by root id, and pushes the full set of roots
//! to every subscriber after each change.

mod directory;
mod memory;
mod sqlite;

pub use directory::DirectoryGateway;
pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

pub use crate::config::MergeMode;

use crate::error::{Result, SchemaTreeError};
use crate::schema::Collection;
use std::sync::{mpsc, Mutex, MutexGuard};

/// Storage contract the registry depends on.
pub trait PersistenceGateway: Send + Sync {
    /// Subscribe to root snapshots. The current snapshot is delivered
    /// immediately; dropping the subscription unsubscribes.
    fn subscribe(&self) -> Result<Subscription>;

    /// Fetch one root document by id
    fn get_document(&self, id: &str) -> Result<Option<Collection>>;

    /// Upsert complete root documents, combining each with the stored one
    /// according to [`merge_mode`](Self::merge_mode). Returns false if
    /// there was nothing to write.
    fn set_documents(&self, roots: &[Collection]) -> Result<bool>;

    /// Delete root documents by id. Missing ids are ignored.
    fn remove_documents(&self, ids: &[&str]) -> Result<()>;

    fn merge_mode(&self) -> MergeMode;

    /// Pick up changes made outside this process and notify subscribers.
    /// Returns how many external changes were seen.
    fn poll(&self) -> Result<usize> {
        Ok(0)
    }
}

/// Receiving end of a gateway subscription
pub struct Subscription {
    rx: mpsc::Receiver<Vec<Collection>>,
}

impl Subscription {
    /// Next pending snapshot, without blocking
    pub fn try_next(&self) -> Option<Vec<Collection>> {
        self.rx.try_recv().ok()
    }

    /// Drain pending snapshots, keeping only the newest
    pub fn latest(&self) -> Option<Vec<Collection>> {
        let mut latest = None;
        while let Ok(snapshot) = self.rx.try_recv() {
            latest = Some(snapshot);
        }
        latest
    }
}

/// Fan-out of root snapshots to live subscriptions
#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::Sender<Vec<Collection>>>>,
}

impl Subscribers {
    /// Register a subscriber and hand it the current snapshot
    pub(crate) fn add(&self, snapshot: Vec<Collection>) -> Subscription {
        let (tx, rx) = mpsc::channel();
        // the receiver is alive here, so the send cannot fail
        let _ = tx.send(snapshot);
        lock(&self.senders).push(tx);
        Subscription { rx }
    }

    /// Send a snapshot to every subscriber, pruning the dropped ones
    pub(crate) fn broadcast(&self, snapshot: &[Collection]) {
        let mut senders = lock(&self.senders);
        senders.retain(|tx| tx.send(snapshot.to_vec()).is_ok());
        log::debug!("Broadcast {} roots to {} subscribers", snapshot.len(), senders.len());
    }

    pub(crate) fn count(&self) -> usize {
        lock(&self.senders).len()
    }
}

/// Lock a mutex, recovering the data if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Combine an incoming root with the stored one.
///
/// `Merge` is a shallow top-level merge: every top-level key of the incoming
/// document replaces the stored one, stored keys the incoming document does
/// not carry survive. `Replace` takes the incoming document as is.
pub fn merge_document(
    existing: Option<&Collection>,
    incoming: &Collection,
    mode: MergeMode,
) -> Result<Collection> {
    let existing = match (existing, mode) {
        (Some(existing), MergeMode::Merge) => existing,
        _ => return Ok(incoming.clone()),
    };

    let mut base = serde_json::to_value(existing)?;
    let patch = serde_json::to_value(incoming)?;
    if let (Some(base_map), serde_json::Value::Object(patch_map)) = (base.as_object_mut(), patch) {
        for (key, value) in patch_map {
            base_map.insert(key, value);
        }
    }
    let mut merged: Collection = serde_json::from_value(base)?;
    merged.normalize_loaded();
    Ok(merged)
}

/// Check that a root id can key a stored document
pub(crate) fn validate_root_id(id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(SchemaTreeError::InvalidPath(
            "root document has an empty id".into(),
        ));
    }
    if id.contains('/') || id.contains('\\') || id.starts_with('.') {
        return Err(SchemaTreeError::InvalidPath(format!(
            "'{id}' is not a valid root document id"
        )));
    }
    Ok(())
}

/// Serialize a root document for storage
pub(crate) fn encode_document(root: &Collection) -> Result<String> {
    Ok(serde_json::to_string(root)?)
}

/// Deserialize a stored root document. Derived keys are dropped.
pub(crate) fn decode_document(json: &str) -> Result<Collection> {
    let mut root: Collection = serde_json::from_str(json)?;
    root.normalize_loaded();
    Ok(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Property};
    use pretty_assertions::assert_eq;

    fn stored() -> Collection {
        let mut root = Collection::new("foo")
            .with_property("x", Property::new(DataType::Number))
            .with_subcollection(Collection::new("bar"));
        root.extra
            .insert("description".into(), serde_json::json!("kept"));
        root
    }

    #[test]
    fn test_merge_keeps_keys_absent_from_incoming() {
        let mut incoming = Collection::new("foo").with_name("Foo");
        incoming.extra.insert("icon".into(), serde_json::json!("star"));

        let merged = merge_document(Some(&stored()), &incoming, MergeMode::Merge).unwrap();
        assert_eq!(merged.name, "Foo");
        assert_eq!(merged.extra["description"], "kept");
        assert_eq!(merged.extra["icon"], "star");
        // properties and subcollections are always present on the incoming side
        assert!(merged.properties.is_empty());
        assert!(merged.subcollections.is_empty());
    }

    #[test]
    fn test_replace_ignores_existing() {
        let incoming = Collection::new("foo");
        let merged = merge_document(Some(&stored()), &incoming, MergeMode::Replace).unwrap();
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_merge_without_existing() {
        let incoming = stored();
        let merged = merge_document(None, &incoming, MergeMode::Merge).unwrap();
        assert_eq!(merged, incoming);
    }

    #[test]
    fn test_encode_decode_strips_derived_keys() {
        let decoded = decode_document(
            r#"{"id":"root","name":"Root","path":"x","properties":{},"subcollections":[]}"#,
        )
        .unwrap();
        assert!(decoded.extra.is_empty());
        let encoded = encode_document(&decoded).unwrap();
        assert!(!encoded.contains("\"path\""));
    }

    #[test]
    fn test_validate_root_id() {
        assert!(validate_root_id("blog").is_ok());
        assert!(validate_root_id("").is_err());
        assert!(validate_root_id("a/b").is_err());
        assert!(validate_root_id("..").is_err());
    }

    #[test]
    fn test_subscribers_prune_dropped() {
        let subscribers = Subscribers::default();
        let first = subscribers.add(vec![]);
        let second = subscribers.add(vec![]);
        assert_eq!(subscribers.count(), 2);

        drop(first);
        subscribers.broadcast(&[Collection::new("a")]);
        assert_eq!(subscribers.count(), 1);

        // initial snapshot, then the broadcast one
        assert_eq!(second.try_next().unwrap().len(), 0);
        assert_eq!(second.try_next().unwrap()[0].id, "a");
        assert!(second.try_next().is_none());
    }

    #[test]
    fn test_latest_drains_to_newest() {
        let subscribers = Subscribers::default();
        let sub = subscribers.add(vec![]);
        subscribers.broadcast(&[Collection::new("a")]);
        subscribers.broadcast(&[Collection::new("a"), Collection::new("b")]);
        assert_eq!(sub.latest().unwrap().len(), 2);
        assert!(sub.latest().is_none());
    }
}
