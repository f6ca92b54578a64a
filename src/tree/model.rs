//! Locally materialized mirror of the server's node hierarchy.
//!
//! Items are stored in a flat `Vec` indexed by [`TreePosition`], with parent
//! links and an ordered child list per item. Children are fetched lazily, once
//! per position, the first time the UI asks for them:
//!
//! ```text
//! Root                (pos 0, children loaded)
//! +-- Objects         (pos 1, children loaded)
//!     +-- Line1       (pos 2, not loaded yet)
//!     +-- Line2       (pos 3, not loaded yet)
//! ```
//!
//! Browse results are sorted by browse name and de-duplicated by node id. A
//! node is materialized at one position only; later references to a node that
//! is already in the tree are skipped, so each node belongs to exactly one
//! parent's controller.

use crate::backend::client_trait::UaClient;
use crate::error::{Result, ResultExt, UaBrowserError};
use crate::tree::signals::SignalTable;
use crate::types::{AttributeId, NodeClass, NodeId, ReferenceDescription, TreePosition, Variant};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Ordered access to the materialized children of a tree position
pub trait ChildSource: Send + Sync {
    /// Children of `position` as `(child position, node id)`, in display order
    fn children_of(&self, position: TreePosition) -> Result<Vec<(TreePosition, NodeId)>>;
}

/// A single row of the tree.
#[derive(Debug, Clone)]
pub struct TreeItem {
    pub position: TreePosition,
    pub node_id: NodeId,
    pub display_name: String,
    pub browse_name: String,
    pub node_class: NodeClass,
    pub type_definition: Option<NodeId>,
    /// Parent row (TreePosition::INVALID for the root).
    pub parent: TreePosition,
    pub children: Vec<TreePosition>,
    /// True once the server has been browsed for this row's children.
    pub children_loaded: bool,
}

#[derive(Debug, Default)]
struct Arena {
    items: Vec<TreeItem>,
    positions: HashMap<NodeId, TreePosition>,
}

/// Thread-safe tree shared by the UI and the worker pool.
pub struct LiveTree {
    arena: RwLock<Arena>,
    signals: Arc<SignalTable>,
}

impl LiveTree {
    pub fn new(signals: Arc<SignalTable>) -> Self {
        Self {
            arena: RwLock::new(Arena::default()),
            signals,
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the server's Root node and make it the first row
    pub fn set_root_node(&self, client: &dyn UaClient) -> Result<TreePosition> {
        let root = client.root_node();
        let attrs = client
            .get_node(root.clone())
            .read_attributes(&[
                AttributeId::DisplayName,
                AttributeId::BrowseName,
                AttributeId::NodeId,
                AttributeId::NodeClass,
            ])
            .context("Failed to read root node")?;

        let text = |i: usize| {
            attrs
                .get(i)
                .and_then(|dv| dv.value.as_str())
                .unwrap_or("No Value")
                .to_string()
        };
        let node_id = match attrs.get(2).map(|dv| &dv.value) {
            Some(Variant::NodeId(id)) => id.clone(),
            _ => root,
        };
        let node_class = match attrs.get(3).map(|dv| &dv.value) {
            Some(Variant::NodeClass(c)) => *c,
            _ => NodeClass::Object,
        };

        let desc = ReferenceDescription {
            node_id,
            browse_name: text(1),
            display_name: text(0),
            node_class,
            type_definition: None,
        };
        Ok(self.add_item(TreePosition::INVALID, desc))
    }

    /// Append a row under `parent` (INVALID for a root row)
    ///
    /// Registers the node's notification signal. If the node is already in
    /// the tree, its existing position is returned.
    pub fn add_item(&self, parent: TreePosition, desc: ReferenceDescription) -> TreePosition {
        let mut arena = self.write();
        self.insert_item(&mut arena, parent, desc)
    }

    fn insert_item(&self, arena: &mut Arena, parent: TreePosition, desc: ReferenceDescription) -> TreePosition {
        if let Some(&existing) = arena.positions.get(&desc.node_id) {
            return existing;
        }

        let position = TreePosition(arena.items.len() as u32);
        self.signals.register(&desc.node_id);
        arena.positions.insert(desc.node_id.clone(), position);
        arena.items.push(TreeItem {
            position,
            node_id: desc.node_id,
            display_name: desc.display_name,
            browse_name: desc.browse_name,
            node_class: desc.node_class,
            type_definition: desc.type_definition,
            parent,
            children: Vec::new(),
            children_loaded: false,
        });
        if parent.is_valid() {
            if let Some(p) = arena.items.get_mut(parent.index()) {
                p.children.push(position);
            }
        }
        position
    }

    /// Browse and materialize the children of `position`, once
    ///
    /// Returns the positions of the rows added by this call.
    pub fn fetch_more(&self, position: TreePosition, client: &dyn UaClient) -> Result<Vec<TreePosition>> {
        let node_id = {
            let arena = self.read();
            let item = arena
                .items
                .get(position.index())
                .ok_or(UaBrowserError::UnknownPosition(position))?;
            if item.children_loaded {
                return Ok(Vec::new());
            }
            item.node_id.clone()
        };

        let mut descs = client
            .get_node(node_id.clone())
            .children()
            .with_context(|| format!("Failed to browse {}", node_id))?;
        descs.sort_by(|a, b| a.browse_name.cmp(&b.browse_name));

        // Re-check under the write lock: another fetch may have won the race.
        // The flag and the children are published in the same critical
        // section, so a loaded row never shows a partial child list.
        let mut arena = self.write();
        match arena.items.get_mut(position.index()) {
            Some(item) if item.children_loaded => return Ok(Vec::new()),
            Some(item) => item.children_loaded = true,
            None => return Err(UaBrowserError::UnknownPosition(position)),
        }

        let mut seen = HashSet::new();
        let mut added = Vec::new();
        for desc in descs {
            if !seen.insert(desc.node_id.clone()) {
                continue;
            }
            if arena.positions.contains_key(&desc.node_id) {
                tracing::debug!("{} already materialized elsewhere, skipping", desc.node_id);
                continue;
            }
            added.push(self.insert_item(&mut arena, position, desc));
        }
        drop(arena);
        tracing::debug!("Loaded {} children for {}", added.len(), node_id);
        Ok(added)
    }

    pub fn item(&self, position: TreePosition) -> Option<TreeItem> {
        self.read().items.get(position.index()).cloned()
    }

    pub fn node_id(&self, position: TreePosition) -> Option<NodeId> {
        self.read()
            .items
            .get(position.index())
            .map(|i| i.node_id.clone())
    }

    pub fn position_of(&self, node: &NodeId) -> Option<TreePosition> {
        self.read().positions.get(node).copied()
    }

    pub fn root(&self) -> Option<TreePosition> {
        self.read().items.first().map(|i| i.position)
    }

    pub fn children_loaded(&self, position: TreePosition) -> bool {
        self.read()
            .items
            .get(position.index())
            .map(|i| i.children_loaded)
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every row and the notification signals they registered
    pub fn clear(&self) {
        let mut arena = self.write();
        arena.items.clear();
        arena.positions.clear();
        self.signals.clear();
    }
}

impl ChildSource for LiveTree {
    fn children_of(&self, position: TreePosition) -> Result<Vec<(TreePosition, NodeId)>> {
        let arena = self.read();
        let item = arena
            .items
            .get(position.index())
            .ok_or(UaBrowserError::UnknownPosition(position))?;
        Ok(item
            .children
            .iter()
            .filter_map(|c| arena.items.get(c.index()))
            .map(|c| (c.position, c.node_id.clone()))
            .collect())
    }
}
