use std::{collections::BinaryHeap, time::Instant};

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use unfolding::{AllEdges, SearchTree};

use crate::{
    coordinate::Coordinate,
    graph::RoadGraph,
    store::{DeadlineExceeded, LegPath, RoutingAlgorithm},
    NodeIdx,
};

mod contract;
mod storage;
mod unfolding;

pub use contract::contract;

type HashMap<K, V> = FxHashMap<K, V>;
type HashSet<K> = FxHashSet<K>;

/// Settled nodes between two looks at the clock.
const DEADLINE_CHECK_INTERVAL: u32 = 1024;

#[derive(Copy, Clone)]
struct Edge {
    to: NodeIdx,
    weight: f32,
    length: f32,
    /// Contracted node this shortcut bypasses, `None` for original edges.
    via: Option<NodeIdx>,
}

pub struct ContractionHierarchy {
    forward_edges: Vec<Vec<Edge>>,
    backward_edges: Vec<Vec<Edge>>,
    all_edges: AllEdges,
}

struct NodeImportance {
    node_idx: NodeIdx,
    importance: u32,
}

impl Eq for NodeImportance {}
impl PartialEq for NodeImportance {
    fn eq(&self, other: &Self) -> bool {
        self.importance == other.importance
    }
}

impl PartialOrd for NodeImportance {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NodeImportance {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Inverted for min-heap
        other.importance.cmp(&self.importance)
    }
}

/// A shortcut candidate: `(from, to, weight, length)`.
type Shortcut = (NodeIdx, NodeIdx, f32, f32);

impl ContractionHierarchy {
    /// Contracts `graph`. The initial importance pass runs on the current
    /// rayon pool.
    pub fn new(graph: &RoadGraph) -> Self {
        let node_count = graph.node_count() as usize;
        let coordinates: Vec<Coordinate> = graph.nodes().iter().map(|n| n.coordinate).collect();
        let max_speed = graph.max_speed();

        let mut forward_edges = vec![vec![]; node_count];
        let mut backward_edges = vec![vec![]; node_count];

        for edge in graph.edges().filter(|edge| edge.from != edge.to) {
            insert_shorter(
                &mut forward_edges[edge.from as usize],
                Edge {
                    to: edge.to,
                    weight: edge.weight,
                    length: edge.length,
                    via: None,
                },
            );
            insert_shorter(
                &mut backward_edges[edge.to as usize],
                Edge {
                    to: edge.from,
                    weight: edge.weight,
                    length: edge.length,
                    via: None,
                },
            );
        }

        let mut this = Self {
            forward_edges,
            backward_edges,
            all_edges: AllEdges::empty(),
        };

        let mut contracted = vec![false; node_count];
        let mut node_importance = vec![0; node_count];

        let initial: Vec<_> = (0..node_count as NodeIdx)
            .into_par_iter()
            .map(|node_idx| NodeImportance {
                importance: this
                    .get_required_shortcuts(&coordinates, node_idx, &contracted, max_speed)
                    .len() as u32,
                node_idx,
            })
            .collect();
        let mut remaining_nodes: BinaryHeap<_> = initial.into_iter().collect();

        let mut next_importance = 0;
        let mut shortcut_count = 0usize;

        while let Some(node_imp) = remaining_nodes.pop() {
            let node_idx = node_imp.node_idx;
            let required_shortcuts =
                this.get_required_shortcuts(&coordinates, node_idx, &contracted, max_speed);
            let importance = required_shortcuts.len() as u32;

            if importance > node_imp.importance {
                remaining_nodes.push(NodeImportance {
                    node_idx,
                    importance,
                });
                continue;
            }

            node_importance[node_idx as usize] = next_importance;
            next_importance += 1;
            shortcut_count += required_shortcuts.len();

            for (from, to, weight, length) in required_shortcuts {
                this.add_shortcut(from, to, node_idx, weight, length);
            }

            contracted[node_idx as usize] = true;
        }

        tracing::debug!(nodes = node_count, shortcuts = shortcut_count, "contraction finished");

        this.all_edges = AllEdges::from_forward(this.forward_edges.clone());
        this.prune_edges(&node_importance);

        this
    }

    pub fn distance(
        &self,
        start: NodeIdx,
        target: NodeIdx,
    ) -> Result<Option<f32>, DeadlineExceeded> {
        Router::new(self).distance(start, target)
    }

    pub fn route(
        &self,
        start: NodeIdx,
        target: NodeIdx,
    ) -> Result<Option<UnpackedRoute>, DeadlineExceeded> {
        Router::new(self).route(start, target)
    }

    pub fn node_count(&self) -> u32 {
        self.forward_edges.len() as u32
    }

    fn prune_edges(&mut self, node_importance: &[u32]) {
        for (i, edges) in self.forward_edges.iter_mut().enumerate() {
            edges.retain(|edge| node_importance[i] < node_importance[edge.to as usize]);
        }

        for (i, edges) in self.backward_edges.iter_mut().enumerate() {
            edges.retain(|edge| node_importance[edge.to as usize] > node_importance[i]);
        }
    }

    fn get_required_shortcuts(
        &self,
        coordinates: &[Coordinate],
        node_idx: NodeIdx,
        contracted: &[bool],
        max_speed: f32,
    ) -> Vec<Shortcut> {
        let incoming = &self.backward_edges[node_idx as usize];
        let outgoing = &self.forward_edges[node_idx as usize];

        let mut required_shortcuts = vec![];

        let mut pairs: HashMap<(NodeIdx, NodeIdx), (f32, f32)> = HashMap::default();

        for in_edge in incoming {
            for out_edge in outgoing {
                if contracted[in_edge.to as usize]
                    || contracted[out_edge.to as usize]
                    || in_edge.to == out_edge.to
                {
                    continue;
                }

                let path = (
                    in_edge.weight + out_edge.weight,
                    in_edge.length + out_edge.length,
                );
                let current = pairs.entry((in_edge.to, out_edge.to)).or_insert(path);
                if path.0 < current.0 {
                    *current = path;
                }
            }
        }

        for ((from, to), (weight, length)) in pairs {
            if !self.witness_path_exists(
                coordinates,
                from,
                to,
                node_idx,
                weight,
                max_speed,
                contracted,
            ) {
                required_shortcuts.push((from, to, weight, length));
            }
        }

        // Pair iteration order is unspecified; keep contraction reproducible.
        required_shortcuts.sort_by_key(|&(from, to, _, _)| (from, to));
        required_shortcuts
    }

    /// A* from `from` to `to` avoiding `via`, bounded by `max_length`. The
    /// heuristic is the great-circle distance over the fastest edge speed.
    #[allow(clippy::too_many_arguments)]
    fn witness_path_exists(
        &self,
        coordinates: &[Coordinate],
        from: NodeIdx,
        to: NodeIdx,
        via: NodeIdx,
        max_length: f32,
        max_speed: f32,
        contracted: &[bool],
    ) -> bool {
        struct State {
            cost: f32,
            h_cost: f32,
            idx: NodeIdx,
        }

        impl Eq for State {}
        impl PartialEq for State {
            fn eq(&self, other: &Self) -> bool {
                self.h_cost == other.h_cost
            }
        }

        impl PartialOrd for State {
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl Ord for State {
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                other.h_cost.total_cmp(&self.h_cost)
            }
        }

        let target = coordinates[to as usize];
        let lower_bound = |from: NodeIdx| {
            if max_speed > 0.0 {
                coordinates[from as usize].haversine_distance(&target) as f32 / max_speed
                    * (1.0 - 1e-4)
            } else {
                0.0
            }
        };

        let mut distances = HashMap::default();
        let mut heap = BinaryHeap::new();

        distances.insert(from, 0.0);
        heap.push(State {
            cost: 0.0,
            h_cost: lower_bound(from),
            idx: from,
        });

        while let Some(State { cost, idx, h_cost }) = heap.pop() {
            if cost > distances[&idx] {
                continue;
            }

            if h_cost > max_length {
                return false;
            }

            if idx == to {
                return true;
            }

            for edge in &self.forward_edges[idx as usize] {
                if edge.to == via || contracted[edge.to as usize] {
                    continue;
                }

                let cost = cost + edge.weight;
                let next = State {
                    h_cost: cost + lower_bound(edge.to),
                    idx: edge.to,
                    cost,
                };

                let dist = distances.entry(next.idx).or_insert(f32::MAX);

                if cost < *dist {
                    *dist = cost;
                    heap.push(next);
                }
            }
        }

        false
    }

    fn add_shortcut(&mut self, from: NodeIdx, to: NodeIdx, via: NodeIdx, weight: f32, length: f32) {
        let forward = &mut self.forward_edges[from as usize];
        let backward = &mut self.backward_edges[to as usize];

        forward.retain(|edge| edge.to != to);
        backward.retain(|edge| edge.to != from);

        forward.push(Edge {
            to,
            weight,
            length,
            via: Some(via),
        });
        backward.push(Edge {
            to: from,
            weight,
            length,
            via: Some(via),
        });
    }
}

/// Keeps only the cheaper of parallel edges.
fn insert_shorter(edges: &mut Vec<Edge>, edge: Edge) {
    match edges.iter_mut().find(|existing| existing.to == edge.to) {
        Some(existing) if edge.weight < existing.weight => *existing = edge,
        Some(_) => {}
        None => edges.push(edge),
    }
}

impl RoutingAlgorithm for ContractionHierarchy {
    fn name(&self) -> &'static str {
        "CH"
    }

    fn node_count(&self) -> u32 {
        self.node_count()
    }

    fn shortest_path(
        &self,
        _graph: &RoadGraph,
        source: NodeIdx,
        target: NodeIdx,
        unpack: bool,
        deadline: Option<Instant>,
    ) -> Result<Option<LegPath>, DeadlineExceeded> {
        let mut router = Router::new(self).with_deadline(deadline);

        if unpack {
            return Ok(router.route(source, target)?.map(|route| LegPath {
                duration: route.weight as f64,
                distance: route.length as f64,
                nodes: route.path,
            }));
        }

        Ok(router
            .bidirectional_dijkstra(source, target)?
            .map(|(_, label)| LegPath {
                duration: label.weight as f64,
                distance: label.length as f64,
                nodes: vec![],
            }))
    }
}

#[derive(Copy, Clone)]
struct Label {
    weight: f32,
    length: f32,
}

struct SearchState {
    node: NodeIdx,
    label: Label,
    parent: NodeIdx,
}

impl Eq for SearchState {}
impl PartialEq for SearchState {
    fn eq(&self, other: &Self) -> bool {
        self.label.weight == other.label.weight
    }
}

impl Ord for SearchState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.label.weight.total_cmp(&self.label.weight)
    }
}

impl PartialOrd for SearchState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A fully unpacked path through the original graph.
pub struct UnpackedRoute {
    pub path: Vec<NodeIdx>,
    pub weight: f32,
    pub length: f32,
}

/// Per-query search state over a hierarchy. Cheap to create; one per query
/// keeps the hierarchy itself free of mutable state.
pub struct Router<'ch> {
    ch: &'ch ContractionHierarchy,
    queue: BinaryHeap<SearchState>,
    forward_distances: HashMap<NodeIdx, Label>,
    backward_distances: HashMap<NodeIdx, Label>,
    forward_settled: HashSet<NodeIdx>,
    tree: SearchTree,
    deadline: Option<Instant>,
    settled: u32,
}

impl<'ch> Router<'ch> {
    pub fn new(ch: &'ch ContractionHierarchy) -> Self {
        Self {
            ch,
            queue: BinaryHeap::new(),
            forward_distances: HashMap::default(),
            backward_distances: HashMap::default(),
            forward_settled: HashSet::default(),
            tree: SearchTree::new(),
            deadline: None,
            settled: 0,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn distance(
        &mut self,
        start: NodeIdx,
        target: NodeIdx,
    ) -> Result<Option<f32>, DeadlineExceeded> {
        Ok(self
            .bidirectional_dijkstra(start, target)?
            .map(|(_, label)| label.weight))
    }

    pub fn route(
        &mut self,
        start: NodeIdx,
        target: NodeIdx,
    ) -> Result<Option<UnpackedRoute>, DeadlineExceeded> {
        let Some((node, label)) = self.bidirectional_dijkstra(start, target)? else {
            return Ok(None);
        };

        Ok(self
            .tree
            .unpack(&self.ch.all_edges, start, target, node)
            .map(|path| UnpackedRoute {
                path,
                weight: label.weight,
                length: label.length,
            }))
    }

    fn check_deadline(&mut self) -> Result<(), DeadlineExceeded> {
        self.settled += 1;
        if self.settled % DEADLINE_CHECK_INTERVAL == 1 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    self.reset();
                    return Err(DeadlineExceeded);
                }
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.queue.clear();
        self.forward_distances.clear();
        self.backward_distances.clear();
        self.forward_settled.clear();
    }

    fn bidirectional_dijkstra(
        &mut self,
        start: NodeIdx,
        target: NodeIdx,
    ) -> Result<Option<(NodeIdx, Label)>, DeadlineExceeded> {
        let mut best: Option<(NodeIdx, Label)> = None;
        let origin = Label {
            weight: 0.0,
            length: 0.0,
        };

        self.tree.clear();

        self.queue.push(SearchState {
            label: origin,
            node: start,
            parent: start,
        });

        self.forward_distances.insert(start, origin);
        self.backward_distances.insert(target, origin);

        while let Some(SearchState { node, label, parent }) = self.queue.pop() {
            if let Some(current) = self.forward_distances.get(&node) {
                if label.weight > current.weight {
                    continue;
                }
            }

            self.check_deadline()?;
            self.forward_settled.insert(node);
            self.tree.set_forward_parent(node, parent);

            for edge in &self.ch.forward_edges[node as usize] {
                let next = SearchState {
                    label: Label {
                        weight: label.weight + edge.weight,
                        length: label.length + edge.length,
                    },
                    node: edge.to,
                    parent: node,
                };

                let forward = self.forward_distances.entry(next.node).or_insert(Label {
                    weight: f32::MAX,
                    length: 0.0,
                });
                if next.label.weight < forward.weight {
                    *forward = next.label;
                    self.queue.push(next);
                }
            }
        }

        self.queue.push(SearchState {
            label: origin,
            node: target,
            parent: target,
        });

        while let Some(SearchState { node, label, parent }) = self.queue.pop() {
            if let Some(current) = self.backward_distances.get(&node) {
                if label.weight > current.weight {
                    continue;
                }
            }

            self.check_deadline()?;
            self.tree.set_backward_parent(node, parent);

            if self.forward_settled.contains(&node) {
                let forward = self.forward_distances[&node];
                let total = Label {
                    weight: label.weight + forward.weight,
                    length: label.length + forward.length,
                };
                if best.map_or(true, |(_, best)| total.weight < best.weight) {
                    best = Some((node, total));
                }
            }

            for edge in &self.ch.backward_edges[node as usize] {
                let next = SearchState {
                    label: Label {
                        weight: label.weight + edge.weight,
                        length: label.length + edge.length,
                    },
                    node: edge.to,
                    parent: node,
                };

                let backward = self.backward_distances.entry(next.node).or_insert(Label {
                    weight: f32::MAX,
                    length: 0.0,
                });

                if next.label.weight < backward.weight {
                    *backward = next.label;
                    self.queue.push(next);
                }
            }
        }

        self.reset();

        Ok(best)
    }
}
