use std::{collections::BinaryHeap, time::Instant};

use rustc_hash::FxHashMap;

use super::{cell_path, cell_search, MultiLevelOverlay, State};
use crate::{
    graph::RoadGraph,
    store::{DeadlineExceeded, LegPath, RoutingAlgorithm},
    NodeIdx,
};

/// Settled nodes between two looks at the clock.
const DEADLINE_CHECK_INTERVAL: u32 = 1024;

#[derive(Copy, Clone, Debug, PartialEq)]
enum Via {
    Start,
    /// A graph edge from this node.
    Edge(NodeIdx),
    /// A clique edge from this node across its cell at the given level.
    Clique(NodeIdx, usize),
}

#[derive(Copy, Clone)]
struct Label {
    weight: f64,
    length: f64,
    via: Via,
}

impl MultiLevelOverlay {
    /// Dijkstra that skips over every cell holding neither endpoint by using
    /// its clique at the coarsest such level.
    fn search(
        &self,
        graph: &RoadGraph,
        source: NodeIdx,
        target: NodeIdx,
        deadline: Option<Instant>,
    ) -> Result<Option<FxHashMap<NodeIdx, Label>>, DeadlineExceeded> {
        let partition = &self.partition;
        let mut labels: FxHashMap<NodeIdx, Label> = FxHashMap::default();
        let mut heap = BinaryHeap::new();
        let mut settled = 0u32;

        labels.insert(
            source,
            Label {
                weight: 0.0,
                length: 0.0,
                via: Via::Start,
            },
        );
        heap.push(State {
            weight: 0.0,
            node: source,
        });

        let relax = |labels: &mut FxHashMap<NodeIdx, Label>,
                     heap: &mut BinaryHeap<State>,
                     to: NodeIdx,
                     label: Label| {
            if labels.get(&to).map_or(true, |current| label.weight < current.weight) {
                labels.insert(to, label);
                heap.push(State {
                    weight: label.weight,
                    node: to,
                });
            }
        };

        while let Some(State { weight, node }) = heap.pop() {
            let Some(&current) = labels.get(&node) else {
                continue;
            };
            if weight > current.weight {
                continue;
            }

            settled += 1;
            if settled % DEADLINE_CHECK_INTERVAL == 1
                && deadline.is_some_and(|deadline| Instant::now() >= deadline)
            {
                return Err(DeadlineExceeded);
            }

            if node == target {
                return Ok(Some(labels));
            }

            let level = partition.query_level(node, source, target);

            if level == 0 {
                for arc in graph.out_edges(node) {
                    let label = Label {
                        weight: weight + arc.weight as f64,
                        length: current.length + arc.length as f64,
                        via: Via::Edge(node),
                    };
                    relax(&mut labels, &mut heap, arc.to, label);
                }
                continue;
            }

            let cell = partition.cell(level, node);

            if let Some(clique) = self.cells.cell(level, cell).clique(node) {
                for (exit, clique_weight, clique_length) in clique {
                    if exit == node || !clique_weight.is_finite() {
                        continue;
                    }
                    let label = Label {
                        weight: weight + clique_weight as f64,
                        length: current.length + clique_length as f64,
                        via: Via::Clique(node, level),
                    };
                    relax(&mut labels, &mut heap, exit, label);
                }
            }

            for arc in graph.out_edges(node) {
                if partition.cell(level, arc.to) == cell {
                    continue;
                }
                let label = Label {
                    weight: weight + arc.weight as f64,
                    length: current.length + arc.length as f64,
                    via: Via::Edge(node),
                };
                relax(&mut labels, &mut heap, arc.to, label);
            }
        }

        Ok(None)
    }

    /// Expands the search tree into graph nodes, replaying clique edges
    /// inside their cells.
    fn unpack(
        &self,
        graph: &RoadGraph,
        labels: &FxHashMap<NodeIdx, Label>,
        target: NodeIdx,
    ) -> Vec<NodeIdx> {
        let mut reversed = vec![target];
        let mut node = target;

        while let Some(label) = labels.get(&node) {
            match label.via {
                Via::Start => break,
                Via::Edge(pred) => {
                    reversed.push(pred);
                    node = pred;
                }
                Via::Clique(pred, level) => {
                    let cell = self.partition.cell(level, pred);
                    let inner = cell_search(graph, &self.partition, level, cell, pred, Some(node));
                    match cell_path(&inner, pred, node) {
                        Some(path) => reversed.extend(path.iter().rev().skip(1)),
                        None => {
                            tracing::warn!(
                                from = pred,
                                to = node,
                                level,
                                "clique edge could not be unpacked"
                            );
                            reversed.push(pred);
                        }
                    }
                    node = pred;
                }
            }
        }

        reversed.reverse();
        reversed
    }
}

impl RoutingAlgorithm for MultiLevelOverlay {
    fn name(&self) -> &'static str {
        "MLD"
    }

    fn node_count(&self) -> u32 {
        self.partition.node_count()
    }

    fn shortest_path(
        &self,
        graph: &RoadGraph,
        source: NodeIdx,
        target: NodeIdx,
        unpack: bool,
        deadline: Option<Instant>,
    ) -> Result<Option<LegPath>, DeadlineExceeded> {
        let Some(labels) = self.search(graph, source, target, deadline)? else {
            return Ok(None);
        };
        let Some(end) = labels.get(&target) else {
            return Ok(None);
        };

        Ok(Some(LegPath {
            duration: end.weight,
            distance: end.length,
            nodes: if unpack {
                self.unpack(graph, &labels, target)
            } else {
                vec![]
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::{
        config::PartitionConfig,
        graph::test_graphs,
        mld::{CellStorage, MultiLevelOverlay, Partition},
        store::RoutingAlgorithm,
        Edge, Node, RoadGraph,
    };

    fn overlay(graph: &RoadGraph, max_cell_sizes: Vec<usize>) -> MultiLevelOverlay {
        let config = PartitionConfig::default().with_max_cell_sizes(max_cell_sizes);
        let partition = Partition::build(graph, &config);
        let cells = CellStorage::build(graph, &partition);
        MultiLevelOverlay::new(partition, cells).unwrap()
    }

    fn path_weight(graph: &RoadGraph, path: &[u32]) -> f64 {
        path.windows(2)
            .map(|pair| {
                graph
                    .out_edges(pair[0])
                    .filter(|arc| arc.to == pair[1])
                    .map(|arc| arc.weight as f64)
                    .fold(f64::INFINITY, f64::min)
            })
            .sum()
    }

    #[test]
    fn matches_dijkstra_on_grid() {
        let graph = test_graphs::grid(9, 8);
        let mld = overlay(&graph, vec![4, 12, 36]);
        assert_eq!(mld.partition().level_count(), 3);

        for source in (0..graph.node_count()).step_by(7) {
            for target in (0..graph.node_count()).step_by(5) {
                let (duration, distance) = test_graphs::dijkstra(&graph, source, target).unwrap();
                let leg = mld
                    .shortest_path(&graph, source, target, true, None)
                    .unwrap()
                    .unwrap();

                assert!((leg.duration - duration).abs() < 1e-2, "{source} -> {target}");
                assert!(leg.distance >= 0.0);
                assert!(distance == 0.0 || leg.distance > 0.0);

                assert_eq!(leg.nodes.first(), Some(&source));
                assert_eq!(leg.nodes.last(), Some(&target));
                assert!((path_weight(&graph, &leg.nodes) - duration).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn without_levels_it_is_plain_dijkstra() {
        let graph = test_graphs::grid(3, 3);
        let mld = overlay(&graph, vec![100]);
        assert_eq!(mld.partition().level_count(), 0);

        let leg = mld.shortest_path(&graph, 0, 8, false, None).unwrap().unwrap();
        let (duration, _) = test_graphs::dijkstra(&graph, 0, 8).unwrap();
        assert!((leg.duration - duration).abs() < 1e-3);
        assert!(leg.nodes.is_empty());
    }

    #[test]
    fn unreachable_and_trivial() {
        let coordinate = |lon| crate::Coordinate::new(lon, 43.73).unwrap();
        let graph = RoadGraph::new(
            vec![
                Node { coordinate: coordinate(7.410) },
                Node { coordinate: coordinate(7.411) },
                Node { coordinate: coordinate(7.412) },
            ],
            &[Edge {
                from: 0,
                to: 1,
                weight: 5.0,
                length: 80.0,
            }],
        );
        let mld = overlay(&graph, vec![2]);

        assert_eq!(mld.shortest_path(&graph, 1, 0, true, None).unwrap(), None);
        assert_eq!(mld.shortest_path(&graph, 0, 2, true, None).unwrap(), None);

        let same = mld.shortest_path(&graph, 1, 1, true, None).unwrap().unwrap();
        assert_eq!(same.duration, 0.0);
        assert_eq!(same.nodes, vec![1]);
    }

    #[test]
    fn expired_deadline_aborts() {
        let graph = test_graphs::grid(20, 20);
        let mld = overlay(&graph, vec![16, 64]);

        let result = mld.shortest_path(&graph, 0, 399, false, Some(Instant::now()));
        assert!(result.is_err());
    }
}
