use crate::path;
use crate::schema::Collection;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

/// A collection annotated with its position in the tree.
///
/// `parent` is the parent's path, resolved through a [`SchemaView`],
/// never a live reference, so a node serializes without cycles.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionNode {
    pub collection: Collection,
    /// `/`-joined ids from the root down to this node
    pub path: String,
    /// Ancestor ids plus this node's id; a fresh snapshot per node
    pub path_segments: Arc<[String]>,
    /// Path of the immediate ancestor, `None` on a root
    pub parent: Option<String>,
}

impl CollectionNode {
    pub fn new(collection: Collection, path_segments: Arc<[String]>) -> Self {
        let path = path::join(&path_segments[..]);
        let parent = path::parent_of(&path).map(str::to_string);
        CollectionNode {
            collection,
            path,
            path_segments,
            parent,
        }
    }

    /// A root node (`path == id`).
    pub fn root(collection: Collection) -> Self {
        let segments: Arc<[String]> = Arc::from(vec![collection.id.clone()]);
        CollectionNode::new(collection, segments)
    }

    /// Id of the root document this node is persisted in
    pub fn root_id(&self) -> &str {
        self.path_segments
            .first()
            .map(String::as_str)
            .unwrap_or(&self.collection.id)
    }

    /// Zero for roots
    pub fn depth(&self) -> usize {
        self.path_segments.len().saturating_sub(1)
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

impl Deref for CollectionNode {
    type Target = Collection;

    fn deref(&self) -> &Collection {
        &self.collection
    }
}

/// The flattened projection of a set of root trees: every node in
/// ascending path order, plus an index from full path to position.
///
/// Projected nodes hold their own settings and properties only; their
/// `subcollections` are empty and the tree is walked with
/// [`children`](Self::children) and [`parent`](Self::parent).
#[derive(Debug, Clone, Default)]
pub struct SchemaView {
    nodes: Vec<CollectionNode>,
    index: HashMap<String, usize>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
}

impl SchemaView {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[CollectionNode] {
        &self.nodes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CollectionNode> {
        self.nodes.iter()
    }

    /// Node at the given schema path string (`foo/bar`)
    pub fn get(&self, path: &str) -> Option<&CollectionNode> {
        self.index.get(path).map(|&i| &self.nodes[i])
    }

    pub fn parent(&self, node: &CollectionNode) -> Option<&CollectionNode> {
        match self.position(node) {
            Some(i) => self.parents[i].map(|p| &self.nodes[p]),
            None => node.parent.as_deref().and_then(|p| self.get(p)),
        }
    }

    /// Direct children of `node`, in sub-collection order
    pub fn children(&self, node: &CollectionNode) -> Vec<&CollectionNode> {
        self.position(node)
            .map(|i| self.children[i].iter().map(|&c| &self.nodes[c]).collect())
            .unwrap_or_default()
    }

    pub fn roots(&self) -> impl Iterator<Item = &CollectionNode> {
        self.nodes.iter().filter(|n| n.is_root())
    }

    /// Nodes whose id or name contains `term`, case-insensitively, in path order
    pub fn search(&self, term: &str) -> Vec<&CollectionNode> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return self.nodes.iter().collect();
        }
        self.nodes
            .iter()
            .filter(|n| {
                n.id.to_lowercase().contains(&needle) || n.name.to_lowercase().contains(&needle)
            })
            .collect()
    }

    pub fn paths(&self) -> Vec<&str> {
        self.nodes.iter().map(|n| n.path.as_str()).collect()
    }

    /// Position of `node` in this view. A node borrowed from the view is
    /// found by identity, any other node by its path.
    fn position(&self, node: &CollectionNode) -> Option<usize> {
        let by_path = self.index.get(&node.path).copied();
        if let Some(i) = by_path {
            if std::ptr::eq(&self.nodes[i], node) {
                return Some(i);
            }
        }
        self.nodes
            .iter()
            .position(|n| std::ptr::eq(n, node))
            .or(by_path)
    }
}

impl<'a> IntoIterator for &'a SchemaView {
    type Item = &'a CollectionNode;
    type IntoIter = std::slice::Iter<'a, CollectionNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

struct Entry {
    node: CollectionNode,
    /// Pre-order position of the parent
    parent: Option<usize>,
}

/// Project root trees into a path-sorted flat list.
///
/// Each root is walked pre-order; every node gets a fresh `path_segments`
/// built from its parent's plus its own id, and a copy of the collection
/// without its sub-collections. The result is sorted by `path` with plain
/// byte-wise string comparison. Nothing is carried over between calls.
pub fn flatten(roots: &[Collection]) -> SchemaView {
    let mut entries = Vec::new();
    for root in roots {
        extend(root, &[], None, &mut entries);
    }

    // stable, so equal paths keep pre-order
    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| entries[a].node.path.cmp(&entries[b].node.path));
    let mut position = vec![0; entries.len()];
    for (pos, &pre) in order.iter().enumerate() {
        position[pre] = pos;
    }

    let mut parents = vec![None; entries.len()];
    let mut children = vec![Vec::new(); entries.len()];
    for (pre, entry) in entries.iter().enumerate() {
        if let Some(parent) = entry.parent {
            parents[position[pre]] = Some(position[parent]);
            children[position[parent]].push(position[pre]);
        }
    }

    let mut slots: Vec<Option<CollectionNode>> =
        entries.into_iter().map(|e| Some(e.node)).collect();
    let nodes: Vec<CollectionNode> = order.iter().filter_map(|&pre| slots[pre].take()).collect();

    let mut index = HashMap::with_capacity(nodes.len());
    for (i, node) in nodes.iter().enumerate() {
        // duplicate sibling ids: the first one in path order wins
        index.entry(node.path.clone()).or_insert(i);
    }

    log::debug!("Projected {} roots into {} nodes", roots.len(), nodes.len());
    SchemaView {
        nodes,
        index,
        parents,
        children,
    }
}

fn extend(
    collection: &Collection,
    parent_segments: &[String],
    parent: Option<usize>,
    out: &mut Vec<Entry>,
) {
    let mut segments = Vec::with_capacity(parent_segments.len() + 1);
    segments.extend_from_slice(parent_segments);
    segments.push(collection.id.clone());
    let segments: Arc<[String]> = Arc::from(segments);

    let at = out.len();
    out.push(Entry {
        node: CollectionNode::new(collection.without_subcollections(), Arc::clone(&segments)),
        parent,
    });
    for child in &collection.subcollections {
        extend(child, &segments, Some(at), out);
    }
}
