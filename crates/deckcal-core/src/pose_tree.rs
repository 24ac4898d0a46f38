//! Arena-backed tree of parent-relative rigid transforms.
//!
//! Nodes are addressed by [`NodeId`] with an interned name index; parent
//! links are stored as ids, so the tree holds no references into itself and
//! can be shared behind a read/write lock.

use crate::{CriticalPoint, CriticalPoints, Transform};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PoseTreeError {
    #[error("unknown pose node `{0}`")]
    UnknownNode(String),
    #[error("unknown parent node `{0}`")]
    UnknownParent(String),
    #[error("pose node `{0}` already exists")]
    DuplicateNode(String),
    #[error("`{ancestor}` is not an ancestor of `{node}`")]
    NotAnAncestor { node: String, ancestor: String },
}

/// Stable index of a node inside a [`PoseTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Clone, Debug)]
struct PoseNode {
    name: String,
    parent: Option<NodeId>,
    local: Transform,
}

/// Tree of named poses rooted at the deck-correction node.
///
/// `absolute(n)` is `root.local * ... * parent.local * n.local`, followed by
/// the critical-point offset when `n` is a registered end-effector.
#[derive(Clone, Debug)]
pub struct PoseTree {
    nodes: Vec<PoseNode>,
    index: HashMap<String, NodeId>,
    effectors: HashMap<NodeId, CriticalPoints>,
}

impl PoseTree {
    /// Create a tree whose root holds the identity transform.
    pub fn new(root_name: impl Into<String>) -> Self {
        Self::with_root_transform(root_name, Transform::identity())
    }

    pub fn with_root_transform(root_name: impl Into<String>, root: Transform) -> Self {
        let name = root_name.into();
        let mut index = HashMap::new();
        index.insert(name.clone(), NodeId(0));
        Self {
            nodes: vec![PoseNode {
                name,
                parent: None,
                local: root,
            }],
            index,
            effectors: HashMap::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn root_name(&self) -> &str {
        &self.nodes[0].name
    }

    /// Number of nodes including the root.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always `false`: the root exists from construction.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId, PoseTreeError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| PoseTreeError::UnknownNode(name.to_string()))
    }

    pub fn name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).map(|n| n.name.as_str())
    }

    /// Names in insertion order, root first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.name.as_str())
    }

    /// Insert `name` under `parent` with the given parent-relative transform.
    pub fn attach(
        &mut self,
        name: impl Into<String>,
        parent: &str,
        local: Transform,
    ) -> Result<NodeId, PoseTreeError> {
        let name = name.into();
        let parent_id = *self
            .index
            .get(parent)
            .ok_or_else(|| PoseTreeError::UnknownParent(parent.to_string()))?;
        if self.index.contains_key(&name) {
            return Err(PoseTreeError::DuplicateNode(name));
        }

        let id = NodeId(self.nodes.len());
        self.index.insert(name.clone(), id);
        self.nodes.push(PoseNode {
            name,
            parent: Some(parent_id),
            local,
        });
        Ok(id)
    }

    /// Replace the parent-relative transform of `name`.
    ///
    /// Absolute poses are resolved on demand, so every descendant observes
    /// the change on its next query.
    pub fn set_local_transform(
        &mut self,
        name: &str,
        local: Transform,
    ) -> Result<(), PoseTreeError> {
        let id = self.node_id(name)?;
        self.nodes[id.0].local = local;
        Ok(())
    }

    /// Replace the deck-correction transform held by the root.
    pub fn set_root_transform(&mut self, root: Transform) {
        self.nodes[0].local = root;
    }

    pub fn root_transform(&self) -> Transform {
        self.nodes[0].local
    }

    pub fn local_transform(&self, name: &str) -> Result<Transform, PoseTreeError> {
        let id = self.node_id(name)?;
        Ok(self.nodes[id.0].local)
    }

    /// Parent name, `None` for the root.
    pub fn parent(&self, name: &str) -> Result<Option<&str>, PoseTreeError> {
        let id = self.node_id(name)?;
        Ok(self.nodes[id.0]
            .parent
            .map(|p| self.nodes[p.0].name.as_str()))
    }

    /// Root-first chain of node ids ending at `id`.
    fn chain(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cur = self.nodes[id.0].parent;
        while let Some(p) = cur {
            chain.push(p);
            cur = self.nodes[p.0].parent;
        }
        chain.reverse();
        chain
    }

    /// Root-first list of names from the root down to `name` inclusive.
    pub fn ancestry(&self, name: &str) -> Result<Vec<&str>, PoseTreeError> {
        let id = self.node_id(name)?;
        Ok(self
            .chain(id)
            .into_iter()
            .map(|n| self.nodes[n.0].name.as_str())
            .collect())
    }

    /// Register the critical-point table of an end-effector node.
    pub fn set_end_effector(
        &mut self,
        name: &str,
        points: CriticalPoints,
    ) -> Result<(), PoseTreeError> {
        let id = self.node_id(name)?;
        self.effectors.insert(id, points);
        Ok(())
    }

    pub fn clear_end_effector(
        &mut self,
        name: &str,
    ) -> Result<Option<CriticalPoints>, PoseTreeError> {
        let id = self.node_id(name)?;
        Ok(self.effectors.remove(&id))
    }

    pub fn end_effector(&self, name: &str) -> Result<Option<CriticalPoints>, PoseTreeError> {
        let id = self.node_id(name)?;
        Ok(self.effectors.get(&id).copied())
    }

    /// Absolute pose of `name` at its default critical point.
    pub fn absolute(&self, name: &str) -> Result<Transform, PoseTreeError> {
        self.absolute_at(name, CriticalPoint::default())
    }

    /// Absolute pose of `name`, offset to `cp` when `name` is an end-effector.
    ///
    /// For plain nodes `cp` is ignored.
    pub fn absolute_at(&self, name: &str, cp: CriticalPoint) -> Result<Transform, PoseTreeError> {
        let id = self.node_id(name)?;
        let composed = self
            .chain(id)
            .into_iter()
            .fold(Transform::identity(), |acc, n| acc * self.nodes[n.0].local);
        Ok(match self.effectors.get(&id) {
            Some(points) => composed * points.offset(cp),
            None => composed,
        })
    }

    /// Pose of `name` expressed in the frame of its ancestor `ancestor`:
    /// the product of the local transforms strictly below `ancestor`, plus the
    /// critical-point offset when `name` is an end-effector.
    pub fn relative_to(
        &self,
        name: &str,
        ancestor: &str,
        cp: CriticalPoint,
    ) -> Result<Transform, PoseTreeError> {
        let id = self.node_id(name)?;
        let anc = self.node_id(ancestor)?;
        let chain = self.chain(id);
        let start = chain
            .iter()
            .position(|&n| n == anc)
            .ok_or_else(|| PoseTreeError::NotAnAncestor {
                node: name.to_string(),
                ancestor: ancestor.to_string(),
            })?;
        let composed = chain[start + 1..]
            .iter()
            .fold(Transform::identity(), |acc, n| acc * self.nodes[n.0].local);
        Ok(match self.effectors.get(&id) {
            Some(points) => composed * points.offset(cp),
            None => composed,
        })
    }
}
