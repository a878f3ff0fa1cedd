//! Recursive bisection of the road graph by inertial flow.
//!
//! Each cell is cut in two by projecting its nodes onto a few directions;
//! for each direction the first and last `boundary_factor` share of the
//! nodes are tied to a source and a sink and a unit-capacity max flow
//! between them yields a minimum cut. The smallest balanced cut over all
//! directions wins.

use std::collections::VecDeque;

use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::{config::PartitionConfig, graph::RoadGraph, NodeIdx};

/// A node of the bisection tree. It covers `len` consecutive entries of the
/// node order; its children cover the same range split in pieces.
pub(super) struct Bisection {
    pub len: usize,
    pub children: Vec<Bisection>,
}

impl Bisection {
    fn leaf(len: usize) -> Self {
        Self {
            len,
            children: vec![],
        }
    }
}

/// Bisects `graph` until every leaf holds at most `leaf_size` nodes.
/// Returns the node order and the tree over it.
pub(super) fn bisect_graph(
    graph: &RoadGraph,
    config: &PartitionConfig,
    leaf_size: usize,
) -> (Vec<NodeIdx>, Bisection) {
    let neighbors = undirected(graph);
    let points = project(graph);
    let bisector = Bisector {
        neighbors: &neighbors,
        points: &points,
        config,
        leaf_size: leaf_size.max(1),
    };

    // Small components are bisected together, every other one on its own.
    let (small, mut parts): (Vec<Vec<NodeIdx>>, Vec<Vec<NodeIdx>>) = components(&neighbors)
        .into_iter()
        .partition(|component| component.len() < config.small_component_size);
    if !small.is_empty() {
        parts.push(small.concat());
    }

    tracing::debug!(parts = parts.len(), "bisecting components");

    let mut children: Vec<Bisection> = parts
        .par_iter_mut()
        .map(|part| bisector.bisect(part))
        .collect();
    let order = parts.concat();

    let root = if children.len() == 1 {
        children.remove(0)
    } else {
        Bisection {
            len: order.len(),
            children,
        }
    };

    (order, root)
}

/// Neighbourhoods ignoring edge direction, without loops or duplicates.
fn undirected(graph: &RoadGraph) -> Vec<Vec<NodeIdx>> {
    let mut neighbors = vec![vec![]; graph.node_count() as usize];
    for edge in graph.edges().filter(|edge| edge.from != edge.to) {
        neighbors[edge.from as usize].push(edge.to);
        neighbors[edge.to as usize].push(edge.from);
    }
    for list in &mut neighbors {
        list.sort_unstable();
        list.dedup();
    }
    neighbors
}

/// Equirectangular projection around the mean latitude.
fn project(graph: &RoadGraph) -> Vec<[f64; 2]> {
    let nodes = graph.nodes();
    let mean_lat = if nodes.is_empty() {
        0.0
    } else {
        nodes.iter().map(|n| n.coordinate.lat()).sum::<f64>() / nodes.len() as f64
    };
    let scale = mean_lat.to_radians().cos();

    nodes
        .iter()
        .map(|n| [n.coordinate.lon() * scale, n.coordinate.lat()])
        .collect()
}

/// Connected components of a symmetric adjacency, each in BFS order.
fn components(adjacency: &[Vec<u32>]) -> Vec<Vec<u32>> {
    let mut seen = vec![false; adjacency.len()];
    let mut result = vec![];

    for start in 0..adjacency.len() {
        if seen[start] {
            continue;
        }
        seen[start] = true;

        let mut component = vec![start as u32];
        let mut next = 0;
        while next < component.len() {
            let node = component[next] as usize;
            next += 1;
            for &neighbor in &adjacency[node] {
                if !seen[neighbor as usize] {
                    seen[neighbor as usize] = true;
                    component.push(neighbor);
                }
            }
        }

        result.push(component);
    }

    result
}

struct Bisector<'a> {
    neighbors: &'a [Vec<NodeIdx>],
    points: &'a [[f64; 2]],
    config: &'a PartitionConfig,
    leaf_size: usize,
}

impl Bisector<'_> {
    fn bisect(&self, nodes: &mut [NodeIdx]) -> Bisection {
        let len = nodes.len();
        if len <= self.leaf_size || len < 2 {
            return Bisection::leaf(len);
        }

        let split = self.split(nodes);
        let (left, right) = nodes.split_at_mut(split);
        let (left, right) = rayon::join(|| self.bisect(left), || self.bisect(right));

        Bisection {
            len,
            children: vec![left, right],
        }
    }

    /// Reorders `nodes` so the first side comes first and returns its size,
    /// which is always in `1..nodes.len()`.
    fn split(&self, nodes: &mut [NodeIdx]) -> usize {
        let n = nodes.len();
        let position: FxHashMap<NodeIdx, u32> = nodes
            .iter()
            .enumerate()
            .map(|(i, &node)| (node, i as u32))
            .collect();
        let adjacency: Vec<Vec<u32>> = nodes
            .iter()
            .map(|&node| {
                let mut local: Vec<u32> = self.neighbors[node as usize]
                    .iter()
                    .filter_map(|neighbor| position.get(neighbor).copied())
                    .collect();
                local.sort_unstable();
                local
            })
            .collect();

        let parts = components(&adjacency);
        let in_left = if parts.len() > 1 {
            pack_components(parts, n)
        } else {
            self.inertial_flow(nodes, &adjacency)
        };

        let reordered: Vec<NodeIdx> = (0..n)
            .filter(|&i| in_left[i])
            .chain((0..n).filter(|&i| !in_left[i]))
            .map(|i| nodes[i])
            .collect();
        nodes.copy_from_slice(&reordered);

        in_left.iter().filter(|&&left| left).count()
    }

    fn projection_order(&self, nodes: &[NodeIdx], cut: usize) -> Vec<u32> {
        let angle = std::f64::consts::PI * cut as f64 / self.config.num_optimizing_cuts as f64;
        let (sin, cos) = angle.sin_cos();
        let key = |i: u32| {
            let [x, y] = self.points[nodes[i as usize] as usize];
            x * cos + y * sin
        };

        let mut order: Vec<u32> = (0..nodes.len() as u32).collect();
        order.sort_by(|&a, &b| key(a).total_cmp(&key(b)).then(a.cmp(&b)));
        order
    }

    fn inertial_flow(&self, nodes: &[NodeIdx], adjacency: &[Vec<u32>]) -> Vec<bool> {
        let n = nodes.len();
        let terminals = ((n as f64 * self.config.boundary_factor) as usize).clamp(1, n / 2);
        let balanced = |left: usize| {
            left > 0 && left < n && left.max(n - left) as f64 <= self.config.balance * n as f64 / 2.0
        };

        // (cut size, imbalance, side)
        let mut best: Option<(usize, usize, Vec<bool>)> = None;

        for cut in 0..self.config.num_optimizing_cuts {
            let order = self.projection_order(nodes, cut);
            let mut network = FlowNetwork::new(adjacency);
            let (cut_size, source_side) =
                network.max_flow(&order[..terminals], &order[n - terminals..]);
            let sink_side = network.sink_side(&order[n - terminals..]);
            let before_sinks: Vec<bool> = sink_side.iter().map(|&reached| !reached).collect();

            for side in [source_side, before_sinks] {
                let left = side.iter().filter(|&&left| left).count();
                if !balanced(left) {
                    continue;
                }

                let imbalance = (2 * left).abs_diff(n);
                let better = best.as_ref().map_or(true, |(best_cut, best_imbalance, _)| {
                    (cut_size, imbalance) < (*best_cut, *best_imbalance)
                });
                if better {
                    best = Some((cut_size, imbalance, side));
                }
            }
        }

        if let Some((_, _, side)) = best {
            return side;
        }

        // No balanced minimum cut: split at the median of the first direction.
        let order = self.projection_order(nodes, 0);
        let mut side = vec![false; n];
        for &i in &order[..n / 2] {
            side[i as usize] = true;
        }
        side
    }
}

/// Distributes whole components over two sides, largest first, always onto
/// the smaller side.
fn pack_components(mut parts: Vec<Vec<u32>>, n: usize) -> Vec<bool> {
    parts.sort_by_key(|part| std::cmp::Reverse(part.len()));

    let mut side = vec![false; n];
    let (mut left, mut right) = (0, 0);
    for part in parts {
        let to_left = left <= right;
        for &i in &part {
            side[i as usize] = to_left;
        }
        if to_left {
            left += part.len();
        } else {
            right += part.len();
        }
    }
    side
}

/// Unit-capacity flow network over a symmetric adjacency: every undirected
/// edge is a pair of mutually reverse arcs of capacity one.
struct FlowNetwork {
    first_out: Vec<usize>,
    tail: Vec<u32>,
    head: Vec<u32>,
    reverse: Vec<usize>,
    flow: Vec<i8>,
}

impl FlowNetwork {
    fn new(adjacency: &[Vec<u32>]) -> Self {
        let mut first_out = Vec::with_capacity(adjacency.len() + 1);
        let mut tail = vec![];
        let mut head = vec![];
        first_out.push(0);
        for (node, neighbors) in adjacency.iter().enumerate() {
            for &neighbor in neighbors {
                tail.push(node as u32);
                head.push(neighbor);
            }
            first_out.push(head.len());
        }

        let reverse = (0..head.len())
            .map(|arc| {
                let (from, to) = (tail[arc], head[arc] as usize);
                let offset = adjacency[to].binary_search(&from).unwrap_or(0);
                first_out[to] + offset
            })
            .collect();

        Self {
            flow: vec![0; head.len()],
            first_out,
            tail,
            head,
            reverse,
        }
    }

    fn residual(&self, arc: usize) -> bool {
        self.flow[arc] < 1
    }

    fn arcs(&self, node: u32) -> std::ops::Range<usize> {
        self.first_out[node as usize]..self.first_out[node as usize + 1]
    }

    /// Augments along shortest residual paths until none is left. Returns
    /// the flow value and the nodes still reachable from the sources.
    fn max_flow(&mut self, sources: &[u32], sinks: &[u32]) -> (usize, Vec<bool>) {
        let n = self.first_out.len() - 1;
        let mut is_source = vec![false; n];
        let mut is_sink = vec![false; n];
        sources.iter().for_each(|&s| is_source[s as usize] = true);
        sinks.iter().for_each(|&t| is_sink[t as usize] = true);

        let mut value = 0;
        loop {
            let mut reached = is_source.clone();
            let mut parent = vec![usize::MAX; n];
            let mut queue: VecDeque<u32> = sources.iter().copied().collect();
            let mut found = None;

            'search: while let Some(node) = queue.pop_front() {
                for arc in self.arcs(node) {
                    let next = self.head[arc];
                    if reached[next as usize] || !self.residual(arc) {
                        continue;
                    }
                    reached[next as usize] = true;
                    parent[next as usize] = arc;
                    if is_sink[next as usize] {
                        found = Some(next);
                        break 'search;
                    }
                    queue.push_back(next);
                }
            }

            let Some(mut node) = found else {
                return (value, reached);
            };

            while !is_source[node as usize] {
                let arc = parent[node as usize];
                self.flow[arc] += 1;
                self.flow[self.reverse[arc]] -= 1;
                node = self.tail[arc];
            }
            value += 1;
        }
    }

    /// Nodes that can still reach a sink in the residual network.
    fn sink_side(&self, sinks: &[u32]) -> Vec<bool> {
        let n = self.first_out.len() - 1;
        let mut reached = vec![false; n];
        let mut queue: VecDeque<u32> = sinks.iter().copied().collect();
        sinks.iter().for_each(|&t| reached[t as usize] = true);

        while let Some(node) = queue.pop_front() {
            for arc in self.arcs(node) {
                let prev = self.head[arc];
                if reached[prev as usize] || !self.residual(self.reverse[arc]) {
                    continue;
                }
                reached[prev as usize] = true;
                queue.push_back(prev);
            }
        }

        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_graphs::grid;

    /// Two 3x3 grids joined by a single edge.
    fn dumbbell() -> Vec<Vec<u32>> {
        let mut adjacency = vec![vec![]; 18];
        let mut link = |a: u32, b: u32| {
            adjacency[a as usize].push(b);
            adjacency[b as usize].push(a);
        };
        for offset in [0, 9] {
            for y in 0..3 {
                for x in 0..3 {
                    let i = offset + y * 3 + x;
                    if x < 2 {
                        link(i, i + 1);
                    }
                    if y < 2 {
                        link(i, i + 3);
                    }
                }
            }
        }
        link(5, 12);
        for list in &mut adjacency {
            list.sort_unstable();
        }
        adjacency
    }

    #[test]
    fn max_flow_finds_the_bridge() {
        let adjacency = dumbbell();
        let mut network = FlowNetwork::new(&adjacency);

        let (value, source_side) = network.max_flow(&[0, 1], &[16, 17]);
        assert_eq!(value, 1);
        assert_eq!(source_side.iter().filter(|&&s| s).count(), 9);
        assert!(source_side[..9].iter().all(|&s| s));

        let sink_side = network.sink_side(&[16, 17]);
        assert_eq!(sink_side.iter().filter(|&&s| s).count(), 9);
        assert!(sink_side[9..].iter().all(|&s| s));
    }

    #[test]
    fn components_are_packed_whole() {
        let side = pack_components(vec![vec![0, 1], vec![2, 3, 4], vec![5]], 6);
        assert!(!side[0] && !side[1]);
        assert!(side[2] && side[3] && side[4]);
        assert!(!side[5]);
    }

    fn check_tree(tree: &Bisection, leaf_size: usize) -> usize {
        if tree.children.is_empty() {
            assert!(tree.len <= leaf_size);
            return 1;
        }
        assert_eq!(tree.children.iter().map(|c| c.len).sum::<usize>(), tree.len);
        assert!(tree.children.iter().all(|c| c.len > 0));
        tree.children.iter().map(|c| check_tree(c, leaf_size)).sum()
    }

    #[test]
    fn bisects_grid_into_small_leaves() {
        let graph = grid(8, 6);
        let config = PartitionConfig::default();
        let (mut order, root) = bisect_graph(&graph, &config, 5);

        assert_eq!(root.len, 48);
        assert!(check_tree(&root, 5) >= 10);

        order.sort_unstable();
        assert_eq!(order, (0..48).collect::<Vec<_>>());
    }
}
