use super::{lock, merge_document, validate_root_id, MergeMode, PersistenceGateway, Subscribers, Subscription};
use crate::error::{Result, SchemaTreeError};
use crate::schema::Collection;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// In-memory gateway. Writes apply and notify synchronously, which makes it
/// the deterministic double for registry tests.
pub struct MemoryGateway {
    documents: Mutex<BTreeMap<String, Collection>>,
    merge_mode: MergeMode,
    subscribers: Subscribers,
    fail_writes: AtomicBool,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        MemoryGateway::new(MergeMode::default())
    }
}

impl MemoryGateway {
    pub fn new(merge_mode: MergeMode) -> Self {
        MemoryGateway {
            documents: Mutex::new(BTreeMap::new()),
            merge_mode,
            subscribers: Subscribers::default(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// A gateway pre-seeded with root documents, stored as given
    pub fn with_documents(merge_mode: MergeMode, roots: impl IntoIterator<Item = Collection>) -> Self {
        let gateway = MemoryGateway::new(merge_mode);
        {
            let mut documents = lock(&gateway.documents);
            for mut root in roots {
                root.normalize_loaded();
                documents.insert(root.id.clone(), root);
            }
        }
        gateway
    }

    /// Make every following write and delete fail until switched off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// All stored roots, ordered by id
    pub fn snapshot(&self) -> Vec<Collection> {
        lock(&self.documents).values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.documents).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.documents).is_empty()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.count()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SchemaTreeError::Gateway("write rejected by memory gateway".into()));
        }
        Ok(())
    }
}

impl PersistenceGateway for MemoryGateway {
    fn subscribe(&self) -> Result<Subscription> {
        Ok(self.subscribers.add(self.snapshot()))
    }

    fn get_document(&self, id: &str) -> Result<Option<Collection>> {
        Ok(lock(&self.documents).get(id).cloned())
    }

    fn set_documents(&self, roots: &[Collection]) -> Result<bool> {
        if roots.is_empty() {
            return Ok(false);
        }
        self.check_writable()?;

        let snapshot = {
            let mut documents = lock(&self.documents);
            // compute every merged document before touching the map
            let mut merged = Vec::with_capacity(roots.len());
            for root in roots {
                validate_root_id(&root.id)?;
                merged.push(merge_document(documents.get(&root.id), root, self.merge_mode)?);
            }
            for root in merged {
                documents.insert(root.id.clone(), root);
            }
            documents.values().cloned().collect::<Vec<_>>()
        };

        self.subscribers.broadcast(&snapshot);
        Ok(true)
    }

    fn remove_documents(&self, ids: &[&str]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        self.check_writable()?;

        let snapshot = {
            let mut documents = lock(&self.documents);
            for id in ids {
                documents.remove(*id);
            }
            documents.values().cloned().collect::<Vec<_>>()
        };

        self.subscribers.broadcast(&snapshot);
        Ok(())
    }

    fn merge_mode(&self) -> MergeMode {
        self.merge_mode
    }
}
