use super::{Edge, HashMap};
use crate::NodeIdx;

/// The hierarchy before pruning: every edge in both directions, so that
/// shortcuts can be expanded back into original edges.
pub struct AllEdges {
    forward: Vec<Vec<Edge>>,
    backward: Vec<Vec<Edge>>,
}

impl AllEdges {
    pub fn empty() -> Self {
        Self {
            forward: vec![],
            backward: vec![],
        }
    }

    /// Derives the reverse adjacency from `forward`, whose targets must be in
    /// bounds.
    pub fn from_forward(forward: Vec<Vec<Edge>>) -> Self {
        let mut backward = vec![vec![]; forward.len()];

        for (from, edges) in forward.iter().enumerate() {
            for edge in edges {
                backward[edge.to as usize].push(Edge {
                    to: from as NodeIdx,
                    ..*edge
                });
            }
        }

        Self { forward, backward }
    }

    pub fn forward(&self) -> &[Vec<Edge>] {
        &self.forward
    }
}

/// Parent pointers of both halves of a bidirectional search.
pub struct SearchTree {
    forward: HashMap<NodeIdx, NodeIdx>,
    backward: HashMap<NodeIdx, NodeIdx>,
}

impl SearchTree {
    pub fn new() -> Self {
        Self {
            forward: HashMap::default(),
            backward: HashMap::default(),
        }
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.backward.clear();
    }

    pub fn set_forward_parent(&mut self, node: NodeIdx, parent: NodeIdx) {
        self.forward.insert(node, parent);
    }

    pub fn set_backward_parent(&mut self, node: NodeIdx, parent: NodeIdx) {
        self.backward.insert(node, parent);
    }

    /// Original nodes from `start` through `meeting` to `target`. `None` if
    /// the tree does not match `edges`.
    pub fn unpack(
        &mut self,
        edges: &AllEdges,
        start: NodeIdx,
        target: NodeIdx,
        meeting: NodeIdx,
    ) -> Option<Vec<NodeIdx>> {
        let mut path = vec![meeting];

        let mut node = meeting;
        while node != start {
            let parent = *self.forward.get(&node)?;
            expand(&mut path, &edges.forward, node, parent)?;
            node = parent;
        }

        path.reverse();

        let mut node = meeting;
        while node != target {
            let parent = *self.backward.get(&node)?;
            expand(&mut path, &edges.backward, node, parent)?;
            node = parent;
        }

        self.clear();

        Some(path)
    }
}

/// Appends the original nodes strictly after `node` up to and including
/// `parent`, where `adjacency[parent]` holds an edge to `node`.
fn expand(
    path: &mut Vec<NodeIdx>,
    adjacency: &[Vec<Edge>],
    node: NodeIdx,
    parent: NodeIdx,
) -> Option<()> {
    let mut pending = vec![(node, parent)];

    while let Some((node, parent)) = pending.pop() {
        let edge = adjacency
            .get(parent as usize)?
            .iter()
            .find(|edge| edge.to == node)?;

        match edge.via {
            Some(via) => {
                pending.push((via, parent));
                pending.push((node, via));
            }
            None => path.push(parent),
        }
    }

    Some(())
}
