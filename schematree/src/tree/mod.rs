//! Pure operations on an owned collection tree.
//!
//! Every walk here consumes an immutable segment slice one step at a time,
//! so a walk ends after at most `segments.len()` steps whether or not the
//! path exists. Callers own the tree they pass in; nothing is persisted.

use crate::config::UpdateMode;
use crate::schema::{Collection, Properties};

/// Walk from `root` down through `segments` (ids below the root).
/// An empty slice yields the root itself.
pub fn descend<'a, S: AsRef<str>>(root: &'a Collection, segments: &[S]) -> Option<&'a Collection> {
    let mut node = root;
    for id in segments {
        node = node.find_child(id.as_ref())?;
    }
    Some(node)
}

/// Mutable counterpart of [`descend`].
pub fn descend_mut<'a, S: AsRef<str>>(
    root: &'a mut Collection,
    segments: &[S],
) -> Option<&'a mut Collection> {
    let mut node = root;
    for id in segments {
        node = node.find_child_mut(id.as_ref())?;
    }
    Some(node)
}

/// Build a linear chain from root-first segments: the last segment is the
/// deepest leaf, each earlier segment wraps the next as its only child.
pub fn build_chain<S: AsRef<str>>(segments: &[S]) -> Option<Collection> {
    segments.iter().rev().fold(None, |child, id| {
        let mut node = Collection::new(id.as_ref());
        node.subcollections.extend(child);
        Some(node)
    })
}

/// Ensure the chain `segments` (ids below the root) exists under `root`,
/// reusing the first matching child at every level and appending the
/// missing ones. Returns how many nodes were created.
pub fn graft<S: AsRef<str>>(root: &mut Collection, segments: &[S]) -> usize {
    let mut created = 0;
    let mut node = root;
    for id in segments {
        let id = id.as_ref();
        let index = match node.subcollections.iter().position(|c| c.id == id) {
            Some(index) => index,
            None => {
                node.subcollections.push(Collection::new(id));
                created += 1;
                node.subcollections.len() - 1
            }
        };
        node = &mut node.subcollections[index];
    }
    created
}

/// Apply a property map to a node.
///
/// `Merge` is a shallow union: incoming keys are added or overwrite,
/// existing keys not named by `properties` stay. A nested map-typed
/// definition is replaced as a whole. `Replace` installs `properties` wholesale.
pub fn apply_properties(node: &mut Collection, properties: &Properties, mode: UpdateMode) {
    match mode {
        UpdateMode::Merge => {
            for (field, property) in properties {
                node.properties.insert(field.clone(), property.clone());
            }
        }
        UpdateMode::Replace => node.properties = properties.clone(),
    }
}

/// Splice the node at `segments` (ids below the root) out of its parent's
/// sub-collections. Only the first child with the leaf id is removed.
/// Returns false, leaving the tree untouched, if any step is missing
/// or `segments` is empty.
pub fn remove_descendant<S: AsRef<str>>(root: &mut Collection, segments: &[S]) -> bool {
    let Some((leaf, parents)) = segments.split_last() else {
        return false;
    };
    let Some(parent) = descend_mut(root, parents) else {
        return false;
    };
    match parent
        .subcollections
        .iter()
        .position(|c| c.id == leaf.as_ref())
    {
        Some(index) => {
            parent.subcollections.remove(index);
            true
        }
        None => false,
    }
}
