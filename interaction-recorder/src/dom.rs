//! Element access used by the locator.
//!
//! [`ElementHandle`] is the narrow view of a DOM element the recorder needs: identity
//! inside its document, attributes, and the ancestor/sibling chain. Hosts embedding the
//! recorder in a real page implement it over their DOM bindings; [`MemoryDocument`] is an
//! in-memory tree with HTML semantics (upper-case tag names, ordered attributes, detached
//! nodes) used by headless hosts and tests.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Read-only view of a DOM element
pub trait ElementHandle: Send + Sync {
    /// Tag name as the DOM reports it (upper-case for HTML elements)
    fn tag_name(&self) -> String;

    fn attribute(&self, name: &str) -> Option<String>;

    /// All attributes in DOM order
    fn attributes(&self) -> Vec<(String, String)>;

    fn parent_element(&self) -> Option<Arc<dyn ElementHandle>>;

    fn previous_element_sibling(&self) -> Option<Arc<dyn ElementHandle>>;

    fn child_elements(&self) -> Vec<Arc<dyn ElementHandle>>;

    /// Whether the element is attached to its document
    fn is_connected(&self) -> bool;

    /// Rendered text of the element and its descendants
    fn visible_text(&self) -> Option<String>;

    /// Form value for input-like controls, `None` for everything else
    fn form_value(&self) -> Option<String>;

    /// Identity of the node, unique within one document
    fn node_key(&self) -> u64;

    /// The `id` attribute, if present and non-empty
    fn id(&self) -> Option<String> {
        self.attribute("id").filter(|id| !id.is_empty())
    }
}

const INPUT_LIKE_TAGS: &[&str] = &["INPUT", "TEXTAREA", "SELECT"];

type NodeId = usize;

#[derive(Debug, Default)]
struct NodeData {
    tag: String,
    attributes: Vec<(String, String)>,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    text: Option<String>,
    value: Option<String>,
}

#[derive(Debug)]
struct Tree {
    nodes: Vec<NodeData>,
}

const DOCUMENT_ELEMENT: NodeId = 0;

impl Tree {
    fn push(&mut self, tag: &str) -> NodeId {
        self.nodes.push(NodeData {
            tag: tag.to_ascii_uppercase(),
            ..Default::default()
        });
        self.nodes.len() - 1
    }

    fn detach(&mut self, node: NodeId) {
        if let Some(parent) = self.nodes[node].parent.take() {
            self.nodes[parent].children.retain(|child| *child != node);
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == candidate {
                return true;
            }
            match self.nodes[node].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    fn root_of(&self, mut node: NodeId) -> NodeId {
        while let Some(parent) = self.nodes[node].parent {
            node = parent;
        }
        node
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        if let Some(text) = &self.nodes[node].text {
            out.push_str(text);
        }
        for child in &self.nodes[node].children {
            self.collect_text(*child, out);
        }
    }

    fn descendants(&self, node: NodeId, out: &mut Vec<NodeId>) {
        for child in &self.nodes[node].children {
            out.push(*child);
            self.descendants(*child, out);
        }
    }
}

/// In-memory HTML document: `<html><head></head><body></body></html>` plus whatever is
/// appended to it.
#[derive(Debug, Clone)]
pub struct MemoryDocument {
    tree: Arc<RwLock<Tree>>,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocument {
    pub fn new() -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        let html = tree.push("html");
        for tag in ["head", "body"] {
            let node = tree.push(tag);
            tree.nodes[node].parent = Some(html);
            tree.nodes[html].children.push(node);
        }
        Self {
            tree: Arc::new(RwLock::new(tree)),
        }
    }

    fn element(&self, node: NodeId) -> MemoryElement {
        MemoryElement {
            tree: Arc::clone(&self.tree),
            node,
        }
    }

    pub fn document_element(&self) -> MemoryElement {
        self.element(DOCUMENT_ELEMENT)
    }

    pub fn head(&self) -> MemoryElement {
        self.element(1)
    }

    pub fn body(&self) -> MemoryElement {
        self.element(2)
    }

    /// Create a detached element owned by this document
    pub fn create_element(&self, tag: &str) -> MemoryElement {
        let node = write(&self.tree).push(tag);
        self.element(node)
    }

    /// First connected element in document order carrying `id`
    pub fn get_element_by_id(&self, id: &str) -> Option<MemoryElement> {
        let tree = read(&self.tree);
        let mut nodes = Vec::new();
        tree.descendants(DOCUMENT_ELEMENT, &mut nodes);
        nodes
            .into_iter()
            .find(|node| {
                tree.nodes[*node]
                    .attributes
                    .iter()
                    .any(|(name, value)| name == "id" && value == id)
            })
            .map(|node| self.element(node))
    }
}

/// Element of a [`MemoryDocument`]
#[derive(Debug, Clone)]
pub struct MemoryElement {
    tree: Arc<RwLock<Tree>>,
    node: NodeId,
}

fn read(tree: &RwLock<Tree>) -> RwLockReadGuard<'_, Tree> {
    tree.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(tree: &RwLock<Tree>) -> RwLockWriteGuard<'_, Tree> {
    tree.write().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryElement {
    fn sibling(&self, node: NodeId) -> MemoryElement {
        MemoryElement {
            tree: Arc::clone(&self.tree),
            node,
        }
    }

    fn boxed(&self, node: NodeId) -> Arc<dyn ElementHandle> {
        Arc::new(self.sibling(node))
    }

    /// Append `child`, moving it out of its current parent.
    ///
    /// Returns false when `child` belongs to another document or is an ancestor of `self`.
    pub fn append_child(&self, child: &MemoryElement) -> bool {
        if !Arc::ptr_eq(&self.tree, &child.tree) {
            return false;
        }
        let mut tree = write(&self.tree);
        if tree.is_ancestor_or_self(child.node, self.node) {
            return false;
        }
        tree.detach(child.node);
        tree.nodes[child.node].parent = Some(self.node);
        tree.nodes[self.node].children.push(child.node);
        true
    }

    /// Create a `tag` element and append it as the last child
    pub fn append(&self, tag: &str) -> MemoryElement {
        let node = {
            let mut tree = write(&self.tree);
            let node = tree.push(tag);
            tree.nodes[node].parent = Some(self.node);
            tree.nodes[self.node].children.push(node);
            node
        };
        self.sibling(node)
    }

    /// Detach from the parent. The document element cannot be removed.
    pub fn remove(&self) {
        if self.node != DOCUMENT_ELEMENT {
            write(&self.tree).detach(self.node);
        }
    }

    pub fn set_attribute(&self, name: &str, value: &str) -> &Self {
        let mut tree = write(&self.tree);
        let attributes = &mut tree.nodes[self.node].attributes;
        match attributes.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => attributes.push((name.to_string(), value.to_string())),
        }
        self
    }

    pub fn remove_attribute(&self, name: &str) -> &Self {
        write(&self.tree).nodes[self.node]
            .attributes
            .retain(|(existing, _)| existing != name);
        self
    }

    pub fn set_text(&self, text: &str) -> &Self {
        write(&self.tree).nodes[self.node].text = Some(text.to_string());
        self
    }

    pub fn set_value(&self, value: &str) -> &Self {
        write(&self.tree).nodes[self.node].value = Some(value.to_string());
        self
    }

    pub fn is_same_node(&self, other: &dyn ElementHandle) -> bool {
        self.node_key() == other.node_key()
    }
}

impl ElementHandle for MemoryElement {
    fn tag_name(&self) -> String {
        read(&self.tree).nodes[self.node].tag.clone()
    }

    fn attribute(&self, name: &str) -> Option<String> {
        read(&self.tree).nodes[self.node]
            .attributes
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.clone())
    }

    fn attributes(&self) -> Vec<(String, String)> {
        read(&self.tree).nodes[self.node].attributes.clone()
    }

    fn parent_element(&self) -> Option<Arc<dyn ElementHandle>> {
        let parent = read(&self.tree).nodes[self.node].parent;
        parent.map(|node| self.boxed(node))
    }

    fn previous_element_sibling(&self) -> Option<Arc<dyn ElementHandle>> {
        let previous = {
            let tree = read(&self.tree);
            let parent = tree.nodes[self.node].parent?;
            let siblings = &tree.nodes[parent].children;
            let position = siblings.iter().position(|child| *child == self.node)?;
            position.checked_sub(1).map(|index| siblings[index])
        };
        previous.map(|node| self.boxed(node))
    }

    fn child_elements(&self) -> Vec<Arc<dyn ElementHandle>> {
        let children = read(&self.tree).nodes[self.node].children.clone();
        children.into_iter().map(|node| self.boxed(node)).collect()
    }

    fn is_connected(&self) -> bool {
        read(&self.tree).root_of(self.node) == DOCUMENT_ELEMENT
    }

    fn visible_text(&self) -> Option<String> {
        let mut text = String::new();
        read(&self.tree).collect_text(self.node, &mut text);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }

    fn form_value(&self) -> Option<String> {
        let tree = read(&self.tree);
        let node = &tree.nodes[self.node];
        INPUT_LIKE_TAGS
            .contains(&node.tag.as_str())
            .then(|| node.value.clone().unwrap_or_default())
    }

    fn node_key(&self) -> u64 {
        self.node as u64
    }
}
