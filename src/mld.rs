//! Multi-level overlay: nested cells over the road graph, cliques between
//! the boundary nodes of every cell, and a level-aware Dijkstra using them.

use std::{cmp::Ordering, collections::BinaryHeap};

use rustc_hash::FxHashMap;

use crate::{error::LoadError, graph::RoadGraph, NodeIdx};

mod bisection;
mod customize;
mod partition;
mod query;

pub use customize::{customize, Cell, CellStorage};
pub use partition::{partition, Partition};

/// Partition plus customized cliques, ready for queries.
pub struct MultiLevelOverlay {
    partition: Partition,
    cells: CellStorage,
}

impl MultiLevelOverlay {
    pub fn new(partition: Partition, cells: CellStorage) -> Result<Self, LoadError> {
        let inconsistent = |what: String| Err(LoadError::Inconsistent(what));

        if partition.node_count() != cells.node_count() {
            return inconsistent(format!(
                "partition covers {} nodes, cells cover {}",
                partition.node_count(),
                cells.node_count()
            ));
        }
        if partition.level_count() != cells.level_count() {
            return inconsistent(format!(
                "partition has {} levels, cells have {}",
                partition.level_count(),
                cells.level_count()
            ));
        }
        for level in 1..=partition.level_count() {
            if partition.cell_count(level) != cells.cell_count(level) {
                return inconsistent(format!(
                    "level {level} has {} cells in the partition but {} customized",
                    partition.cell_count(level),
                    cells.cell_count(level)
                ));
            }
        }

        Ok(Self { partition, cells })
    }

    pub(crate) fn from_bytes(partition: &[u8], cells: &[u8]) -> Result<Self, LoadError> {
        Self::new(Partition::from_bytes(partition)?, CellStorage::from_bytes(cells)?)
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn cells(&self) -> &CellStorage {
        &self.cells
    }
}

pub(crate) struct Settled {
    pub weight: f64,
    pub length: f64,
    pub pred: NodeIdx,
}

struct State {
    weight: f64,
    node: NodeIdx,
}

impl Eq for State {}
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.weight == other.weight
    }
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        other.weight.total_cmp(&self.weight)
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Dijkstra from `source` that never leaves `cell` at `level`. Stops once
/// `target` is settled; otherwise explores the whole cell.
pub(crate) fn cell_search(
    graph: &RoadGraph,
    partition: &Partition,
    level: usize,
    cell: u32,
    source: NodeIdx,
    target: Option<NodeIdx>,
) -> FxHashMap<NodeIdx, Settled> {
    let mut labels = FxHashMap::default();
    let mut heap = BinaryHeap::new();

    labels.insert(
        source,
        Settled {
            weight: 0.0,
            length: 0.0,
            pred: source,
        },
    );
    heap.push(State {
        weight: 0.0,
        node: source,
    });

    while let Some(State { weight, node }) = heap.pop() {
        let Some(current) = labels.get(&node) else {
            continue;
        };
        if weight > current.weight {
            continue;
        }
        if Some(node) == target {
            break;
        }
        let length = current.length;

        for arc in graph.out_edges(node) {
            if partition.cell(level, arc.to) != cell {
                continue;
            }

            let next = weight + arc.weight as f64;
            let improves = labels
                .get(&arc.to)
                .map_or(true, |label: &Settled| next < label.weight);

            if improves {
                labels.insert(
                    arc.to,
                    Settled {
                        weight: next,
                        length: length + arc.length as f64,
                        pred: node,
                    },
                );
                heap.push(State {
                    weight: next,
                    node: arc.to,
                });
            }
        }
    }

    labels
}

/// Walks `pred` links back from `target`; `None` if it was never reached.
pub(crate) fn cell_path(
    labels: &FxHashMap<NodeIdx, Settled>,
    source: NodeIdx,
    target: NodeIdx,
) -> Option<Vec<NodeIdx>> {
    let mut path = vec![target];
    let mut node = target;

    while node != source {
        node = labels.get(&node)?.pred;
        path.push(node);
        if path.len() > labels.len() {
            return None;
        }
    }

    path.reverse();
    Some(path)
}
