//! Bus topology reconstruction

use crate::device::Device;
use serde::Serialize;

/// A device and the devices plugged into it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    #[serde(flatten)]
    pub device: Device,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    /// Number of nodes in this subtree, including this one
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(TreeNode::count).sum::<usize>()
    }

    /// Depth-first, pre-order traversal of this subtree
    pub fn walk(&self) -> Vec<&TreeNode> {
        let mut nodes = vec![self];
        for child in &self.children {
            nodes.extend(child.walk());
        }
        nodes
    }
}

/// Build a forest from a flat device list
///
/// Each device hangs off the first device in input order that is its
/// immediate parent. Devices without a parent in the list (root hubs and
/// orphans) become roots. Roots and siblings keep input order.
pub fn build_forest(devices: &[Device]) -> Vec<TreeNode> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); devices.len()];
    let mut roots = Vec::new();

    for (index, device) in devices.iter().enumerate() {
        match devices.iter().position(|parent| parent.is_parent_of(device)) {
            Some(parent) => children[parent].push(index),
            None => roots.push(index),
        }
    }

    roots
        .into_iter()
        .map(|index| build_node(devices, &children, index))
        .collect()
}

fn build_node(devices: &[Device], children: &[Vec<usize>], index: usize) -> TreeNode {
    TreeNode {
        device: devices[index].clone(),
        children: children[index]
            .iter()
            .map(|&child| build_node(devices, children, child))
            .collect(),
    }
}

/// Total number of nodes in a forest
pub fn count_nodes(roots: &[TreeNode]) -> usize {
    roots.iter().map(TreeNode::count).sum()
}
