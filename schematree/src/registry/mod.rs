use crate::config::{RegistryConfig, UpdateMode};
use crate::error::{Result, SchemaTreeError};
use crate::gateway::{lock, PersistenceGateway, Subscription};
use crate::path;
use crate::schema::{Collection, Properties};
use crate::tree;
use crate::view::{self, CollectionNode, SchemaView};
use std::sync::{Arc, Mutex, RwLock};

/// Callback invoked with the fresh projection after every recomputation
pub type ChangeCallback = Arc<dyn Fn(&SchemaView) + Send + Sync>;

/// The collection schema registry.
///
/// Reads and mutations always go to the gateway: every mutation fetches the
/// affected root fresh, changes a local copy and writes the whole root back.
/// The projection returned by [`view`](Self::view) only changes when the
/// gateway's subscription delivers a new snapshot and
/// [`process_events`](Self::process_events) runs.
pub struct SchemaRegistry<G: PersistenceGateway + ?Sized> {
    gateway: Arc<G>,
    config: RegistryConfig,
    subscription: Mutex<Option<Subscription>>,
    view: RwLock<Arc<SchemaView>>,
    listeners: Mutex<Vec<ChangeCallback>>,
}

impl<G: PersistenceGateway + ?Sized> SchemaRegistry<G> {
    pub fn new(gateway: Arc<G>, config: RegistryConfig) -> Self {
        SchemaRegistry {
            gateway,
            config,
            subscription: Mutex::new(None),
            view: RwLock::new(Arc::new(SchemaView::default())),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Subscribe to the gateway and build the initial projection.
    /// Calling `start` on a running registry does nothing.
    pub fn start(&self) -> Result<()> {
        {
            let mut subscription = lock(&self.subscription);
            if subscription.is_some() {
                return Ok(());
            }
            *subscription = Some(self.gateway.subscribe()?);
        }
        self.process_events()?;
        Ok(())
    }

    /// Drop the subscription. The last projection stays readable.
    pub fn stop(&self) {
        lock(&self.subscription).take();
    }

    pub fn is_running(&self) -> bool {
        lock(&self.subscription).is_some()
    }

    /// Pump the gateway and rebuild the projection from the newest pending
    /// snapshot, if any. Returns whether the projection was replaced.
    pub fn process_events(&self) -> Result<bool> {
        self.gateway.poll()?;
        let roots = match lock(&self.subscription).as_ref() {
            Some(subscription) => subscription.latest(),
            None => None,
        };
        let Some(roots) = roots else {
            return Ok(false);
        };

        let projection = Arc::new(view::flatten(&roots));
        *self.view.write().unwrap_or_else(|p| p.into_inner()) = Arc::clone(&projection);
        // listeners may call back into the registry, so none of its locks are held
        let listeners: Vec<ChangeCallback> = lock(&self.listeners).clone();
        for listener in &listeners {
            listener(&projection);
        }
        Ok(true)
    }

    /// Register a callback fired after each projection rebuild.
    /// A callback registered from inside another one first fires on the next rebuild.
    pub fn on_change<F>(&self, callback: F)
    where
        F: Fn(&SchemaView) + Send + Sync + 'static,
    {
        lock(&self.listeners).push(Arc::new(callback));
    }

    /// The current projection
    pub fn view(&self) -> Arc<SchemaView> {
        Arc::clone(&self.view.read().unwrap_or_else(|p| p.into_inner()))
    }

    // ── Resolution ─────────────────────────────────────────────────

    /// Resolve a schema path (pure collection ids, root first).
    ///
    /// The root is fetched from the gateway, then each remaining id selects
    /// the first matching sub-collection. `Ok(None)` when any step is
    /// missing or the path is empty; errors come only from the gateway.
    pub fn resolve_by_schema_path<S: AsRef<str>>(
        &self,
        segments: &[S],
    ) -> Result<Option<CollectionNode>> {
        let segments: Vec<String> = segments
            .iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let Some((root_id, rest)) = segments.split_first() else {
            return Ok(None);
        };

        let Some(root) = self.gateway.get_document(root_id)? else {
            log::debug!("Root collection '{root_id}' not found");
            return Ok(None);
        };
        let node = tree::descend(&root, rest).cloned();
        if node.is_none() {
            log::debug!("No collection at '{}'", path::join(&segments));
        }
        Ok(node.map(|collection| CollectionNode::new(collection, Arc::from(segments))))
    }

    /// Resolve a `/`-separated schema path string (`foo/bar`)
    pub fn resolve(&self, schema_path: &str) -> Result<Option<CollectionNode>> {
        self.resolve_by_schema_path(&path::normalize(schema_path))
    }

    /// Resolve a document path (`foo/1/bar/3/baz`): document ids at odd
    /// positions are dropped before schema-path resolution.
    pub fn resolve_by_document_path(&self, document_path: &str) -> Result<Option<CollectionNode>> {
        self.resolve_by_schema_path(&path::schema_path_from_document_path(document_path))
    }

    // ── Mutation ───────────────────────────────────────────────────

    /// Create the collection chain named by `path` (lowercased).
    ///
    /// Missing nodes are appended under the deepest existing one; existing
    /// nodes, their properties and unrelated branches are left as they are.
    /// An empty path does nothing.
    pub fn create_collections(&self, path: &str) -> Result<()> {
        let segments = path::normalize_lowercase(path);
        let Some((root_id, rest)) = segments.split_first() else {
            log::debug!("Ignoring create for empty path '{path}'");
            return Ok(());
        };

        let root = match self.gateway.get_document(root_id)? {
            Some(mut root) => {
                if tree::graft(&mut root, rest) == 0 {
                    log::debug!("Collections '{}' already exist", path::join(&segments));
                    return Ok(());
                }
                root
            }
            None => match tree::build_chain(&segments) {
                Some(chain) => chain,
                None => return Ok(()),
            },
        };

        self.gateway.set_documents(std::slice::from_ref(&root))?;
        log::info!("Created collections '{}'", path::join(&segments));
        Ok(())
    }

    /// Apply `target.properties` to the node at `target.path_segments`
    /// using the configured update mode.
    pub fn update_properties(&self, target: &CollectionNode) -> Result<()> {
        self.update_properties_with(target, self.config.update_mode)
    }

    /// Like [`update_properties`](Self::update_properties) with an explicit mode
    pub fn update_properties_with(&self, target: &CollectionNode, mode: UpdateMode) -> Result<()> {
        self.apply_update(&target.path_segments, &target.properties, mode)
    }

    /// Apply a property map to the node at a schema path string
    pub fn update_properties_at(&self, schema_path: &str, properties: &Properties) -> Result<()> {
        self.apply_update(&path::normalize(schema_path), properties, self.config.update_mode)
    }

    fn apply_update(&self, segments: &[String], properties: &Properties, mode: UpdateMode) -> Result<()> {
        let Some((root_id, rest)) = segments.split_first() else {
            return Err(SchemaTreeError::InvalidPath("document has no path".into()));
        };

        let mut root = self
            .gateway
            .get_document(root_id)?
            .ok_or_else(|| SchemaTreeError::RootNotFound { id: root_id.clone() })?;
        let node = tree::descend_mut(&mut root, rest).ok_or_else(|| {
            SchemaTreeError::CollectionNotFound {
                path: path::join(segments),
            }
        })?;
        tree::apply_properties(node, properties, mode);

        self.gateway.set_documents(std::slice::from_ref(&root))?;
        log::info!(
            "Updated {} properties on '{}' ({mode:?})",
            properties.len(),
            path::join(segments)
        );
        Ok(())
    }

    /// Remove the branch at `path`.
    ///
    /// A single segment deletes the whole root document. A longer path
    /// splices the first matching child out of its parent and rewrites the
    /// root. Missing roots or children and empty paths are a no-op.
    pub fn remove_collections(&self, path: &str) -> Result<()> {
        let segments = path::normalize(path);
        match segments.as_slice() {
            [] => {
                log::debug!("Ignoring remove for empty path '{path}'");
                Ok(())
            }
            [root_id] => {
                self.gateway.remove_documents(&[root_id.as_str()])?;
                log::info!("Removed root collection '{root_id}'");
                Ok(())
            }
            [root_id, rest @ ..] => {
                let Some(mut root) = self.gateway.get_document(root_id)? else {
                    log::debug!("Nothing to remove at '{}'", path::join(&segments));
                    return Ok(());
                };
                if !tree::remove_descendant(&mut root, rest) {
                    log::debug!("Nothing to remove at '{}'", path::join(&segments));
                    return Ok(());
                }
                self.gateway.set_documents(std::slice::from_ref(&root))?;
                log::info!("Removed collection '{}'", path::join(&segments));
                Ok(())
            }
        }
    }

    /// Persist seed root trees in one gateway batch. Returns how many
    /// roots were written.
    pub fn import_collections(&self, roots: &[Collection]) -> Result<usize> {
        if roots.is_empty() {
            return Ok(0);
        }
        self.gateway.set_documents(roots)?;
        log::info!("Imported {} root collections", roots.len());
        Ok(roots.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MergeMode;
    use crate::gateway::MemoryGateway;
    use crate::schema::{DataType, Property};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn seed() -> Collection {
        Collection::new("root")
            .with_name("Root")
            .with_property("prop1", Property::new(DataType::String))
            .with_subcollection(
                Collection::new("sub1")
                    .with_name("Sub")
                    .with_property("prop11", Property::new(DataType::String))
                    .with_subcollection(
                        Collection::new("sub11")
                            .with_name("Nested Sub")
                            .with_property("prop111", Property::new(DataType::String)),
                    ),
            )
    }

    fn setup() -> (Arc<MemoryGateway>, SchemaRegistry<MemoryGateway>) {
        let gateway = Arc::new(MemoryGateway::with_documents(MergeMode::Merge, vec![seed()]));
        let registry = SchemaRegistry::new(Arc::clone(&gateway), RegistryConfig::default());
        (gateway, registry)
    }

    fn props(entries: &[(&str, DataType)]) -> Properties {
        entries
            .iter()
            .map(|(k, t)| (k.to_string(), Property::new(t.clone())))
            .collect()
    }

    #[test]
    fn test_resolve_nodes() {
        let (_gateway, registry) = setup();
        let root = registry.resolve_by_schema_path(&["root"]).unwrap().unwrap();
        assert_eq!(root.collection, seed());
        assert_eq!(root.path, "root");
        assert!(root.parent.is_none());

        let sub11 = registry
            .resolve_by_schema_path(&["root", "sub1", "sub11"])
            .unwrap()
            .unwrap();
        assert_eq!(sub11.name, "Nested Sub");
        assert_eq!(sub11.path, "root/sub1/sub11");
        assert_eq!(sub11.parent.as_deref(), Some("root/sub1"));
    }

    #[test]
    fn test_resolve_missing_is_none() {
        let (_gateway, registry) = setup();
        assert!(registry.resolve_by_schema_path(&["invalid"]).unwrap().is_none());
        assert!(registry.resolve_by_schema_path(&["root", "nope"]).unwrap().is_none());
        assert!(registry
            .resolve_by_schema_path(&["root", "sub1", "sub11", "deeper"])
            .unwrap()
            .is_none());
        assert!(registry.resolve_by_schema_path::<&str>(&[]).unwrap().is_none());
        assert!(registry.resolve("  //  ").unwrap().is_none());
    }

    #[test]
    fn test_start_builds_projection_and_stop_detaches() {
        let (gateway, registry) = setup();
        assert!(registry.view().is_empty());

        registry.start().unwrap();
        assert!(registry.is_running());
        assert_eq!(registry.view().paths(), vec!["root", "root/sub1", "root/sub1/sub11"]);

        registry.stop();
        assert!(!registry.is_running());
        registry.create_collections("other").unwrap();
        assert!(!registry.process_events().unwrap());
        assert_eq!(registry.view().len(), 3);
        assert_eq!(gateway.subscriber_count(), 0);
    }

    #[test]
    fn test_projection_updates_only_after_process_events() {
        let (_gateway, registry) = setup();
        registry.start().unwrap();

        registry.create_collections("foo").unwrap();
        assert!(registry.view().get("foo").is_none());

        assert!(registry.process_events().unwrap());
        assert!(registry.view().get("foo").is_some());
        assert!(!registry.process_events().unwrap());
    }

    #[test]
    fn test_on_change_listener() {
        let (_gateway, registry) = setup();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        registry.on_change(move |view| {
            assert!(!view.is_empty());
            seen.fetch_add(1, Ordering::SeqCst);
        });

        registry.start().unwrap();
        registry.create_collections("foo/bar").unwrap();
        registry.process_events().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_can_reenter_registry() {
        let (_gateway, registry) = setup();
        let registry = Arc::new(registry);
        let nested = Arc::new(AtomicUsize::new(0));

        let inner = Arc::clone(&registry);
        let nested_seen = Arc::clone(&nested);
        registry.on_change(move |_| {
            let seen = Arc::clone(&nested_seen);
            inner.on_change(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            });
            assert!(inner.resolve("root").unwrap().is_some());
        });

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&registry);
        std::thread::spawn(move || {
            let result = worker.start().and_then(|_| {
                worker.create_collections("foo")?;
                worker.process_events()
            });
            let _ = done_tx.send(result.is_ok());
        });

        let finished = done_rx.recv_timeout(std::time::Duration::from_secs(5));
        assert_eq!(finished, Ok(true));
        // registered during start, fired on the second rebuild
        assert_eq!(nested.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_create_lowercases_and_normalizes() {
        let (_gateway, registry) = setup();
        registry.create_collections(" /Foo//BAR/ ").unwrap();
        let bar = registry.resolve("foo/bar").unwrap().unwrap();
        assert_eq!(bar.id, "bar");
        assert_eq!(bar.name, "bar");
    }

    #[test]
    fn test_create_empty_path_is_noop() {
        let (gateway, registry) = setup();
        registry.create_collections("").unwrap();
        registry.create_collections("///").unwrap();
        assert_eq!(gateway.len(), 1);
    }

    #[test]
    fn test_create_under_existing_root_keeps_siblings() {
        let (_gateway, registry) = setup();
        registry.create_collections("root/sub2").unwrap();

        let root = registry.resolve("root").unwrap().unwrap();
        let ids: Vec<_> = root.subcollections.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["sub1", "sub2"]);
        assert!(root.properties.contains_key("prop1"));
        assert!(registry.resolve("root/sub1/sub11").unwrap().is_some());
    }

    #[test]
    fn test_update_properties_merge() {
        let (_gateway, registry) = setup();
        let mut node = registry.resolve("root/sub1").unwrap().unwrap();
        node.collection.properties = props(&[("extra", DataType::Number)]);
        registry.update_properties(&node).unwrap();

        let sub1 = registry.resolve("root/sub1").unwrap().unwrap();
        let keys: Vec<_> = sub1.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["extra", "prop11"]);
        // untouched ancestor and descendant
        let root = registry.resolve("root").unwrap().unwrap();
        assert!(root.properties.contains_key("prop1"));
        assert!(registry.resolve("root/sub1/sub11").unwrap().is_some());
    }

    #[test]
    fn test_update_properties_replace() {
        let (_gateway, registry) = setup();
        let mut node = registry.resolve("root").unwrap().unwrap();
        node.collection.properties = props(&[("only", DataType::Boolean)]);
        registry.update_properties_with(&node, UpdateMode::Replace).unwrap();

        let root = registry.resolve("root").unwrap().unwrap();
        let keys: Vec<_> = root.properties.keys().cloned().collect();
        assert_eq!(keys, vec!["only"]);
        assert_eq!(root.subcollections.len(), 1);
    }

    #[test]
    fn test_update_uses_configured_mode() {
        let gateway = Arc::new(MemoryGateway::with_documents(MergeMode::Merge, vec![seed()]));
        let config = RegistryConfig {
            update_mode: UpdateMode::Replace,
            ..RegistryConfig::default()
        };
        let registry = SchemaRegistry::new(gateway, config);

        registry
            .update_properties_at("root", &props(&[("b", DataType::Date)]))
            .unwrap();
        let root = registry.resolve("root").unwrap().unwrap();
        assert_eq!(root.property_count(), 1);
    }

    #[test]
    fn test_update_missing_root_is_error() {
        let (_gateway, registry) = setup();
        let node = CollectionNode::root(Collection::new("ghost"));
        let result = registry.update_properties(&node);
        assert!(matches!(result, Err(SchemaTreeError::RootNotFound { id }) if id == "ghost"));
    }

    #[test]
    fn test_update_missing_child_is_error() {
        let (gateway, registry) = setup();
        let result = registry.update_properties_at("root/nope", &props(&[("a", DataType::String)]));
        assert!(matches!(
            result,
            Err(SchemaTreeError::CollectionNotFound { path }) if path == "root/nope"
        ));
        assert_eq!(gateway.get_document("root").unwrap().unwrap(), seed());
    }

    #[test]
    fn test_update_empty_path_is_error() {
        let (_gateway, registry) = setup();
        let result = registry.update_properties_at("", &Properties::new());
        assert!(matches!(result, Err(SchemaTreeError::InvalidPath(_))));
    }

    #[test]
    fn test_failed_write_propagates_and_leaves_store_untouched() {
        let (gateway, registry) = setup();
        registry.start().unwrap();
        gateway.fail_writes(true);

        let result = registry.update_properties_at("root", &props(&[("x", DataType::Number)]));
        assert!(matches!(result, Err(SchemaTreeError::Gateway(_))));
        assert!(registry.create_collections("root/new").is_err());
        assert!(registry.remove_collections("root/sub1").is_err());

        assert_eq!(gateway.get_document("root").unwrap().unwrap(), seed());
        assert!(!registry.process_events().unwrap());
        assert_eq!(registry.view().len(), 3);
    }

    #[test]
    fn test_remove_root_document() {
        let (gateway, registry) = setup();
        registry.remove_collections("root").unwrap();
        assert!(gateway.is_empty());
        assert!(registry.resolve("root").unwrap().is_none());
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let (gateway, registry) = setup();
        let sub = gateway.subscribe().unwrap();
        sub.latest();

        registry.remove_collections("missing/path").unwrap();
        registry.remove_collections("root/missing").unwrap();
        registry.remove_collections("").unwrap();
        assert!(sub.try_next().is_none());
        assert_eq!(gateway.get_document("root").unwrap().unwrap(), seed());
    }

    #[test]
    fn test_import_collections() {
        let gateway = Arc::new(MemoryGateway::default());
        let registry = SchemaRegistry::new(Arc::clone(&gateway), RegistryConfig::default());
        let count = registry
            .import_collections(&[seed(), Collection::new("blog")])
            .unwrap();
        assert_eq!(count, 2);
        assert_eq!(gateway.len(), 2);
        assert_eq!(registry.import_collections(&[]).unwrap(), 0);
    }

    #[test]
    fn test_dyn_gateway() {
        let gateway: Arc<dyn PersistenceGateway> =
            Arc::new(MemoryGateway::with_documents(MergeMode::Merge, vec![seed()]));
        let registry = SchemaRegistry::new(gateway, RegistryConfig::default());
        assert!(registry.resolve("root/sub1").unwrap().is_some());
    }
}
