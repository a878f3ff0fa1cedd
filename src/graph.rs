use std::{fs, io, ops::Range, path::Path};

use crate::{
    coordinate::Coordinate,
    error::{LoadError, PreprocessError},
    io::{decode_error, payload, write_artifact, Artifact, ReadLe},
    Edge, Node, NodeIdx,
};

/// The extracted road network in forward-star layout: the outgoing edges of
/// node `n` are `first_out[n]..first_out[n + 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RoadGraph {
    nodes: Vec<Node>,
    first_out: Vec<u32>,
    head: Vec<NodeIdx>,
    weight: Vec<f32>,
    length: Vec<f32>,
}

/// An outgoing edge as seen from its tail.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OutEdge {
    pub to: NodeIdx,
    pub weight: f32,
    pub length: f32,
}

impl RoadGraph {
    /// Builds the graph. Edges are grouped by tail; the relative order of
    /// edges sharing a tail is kept.
    pub fn new(nodes: Vec<Node>, edges: &[Edge]) -> Self {
        let mut order: Vec<usize> = (0..edges.len()).collect();
        order.sort_by_key(|&i| edges[i].from);

        let mut first_out = vec![0u32; nodes.len() + 1];
        for edge in edges {
            first_out[edge.from as usize + 1] += 1;
        }
        for i in 0..nodes.len() {
            first_out[i + 1] += first_out[i];
        }

        Self {
            head: order.iter().map(|&i| edges[i].to).collect(),
            weight: order.iter().map(|&i| edges[i].weight).collect(),
            length: order.iter().map(|&i| edges[i].length).collect(),
            nodes,
            first_out,
        }
    }

    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub fn edge_count(&self) -> u32 {
        self.head.len() as u32
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn coordinate(&self, node: NodeIdx) -> Coordinate {
        self.nodes[node as usize].coordinate
    }

    pub fn edge_range(&self, node: NodeIdx) -> Range<usize> {
        self.first_out[node as usize] as usize..self.first_out[node as usize + 1] as usize
    }

    pub fn out_edges(&self, node: NodeIdx) -> impl Iterator<Item = OutEdge> + '_ {
        self.edge_range(node).map(move |i| OutEdge {
            to: self.head[i],
            weight: self.weight[i],
            length: self.length[i],
        })
    }

    pub fn edges(&self) -> impl Iterator<Item = Edge> + '_ {
        (0..self.node_count()).flat_map(move |from| {
            self.out_edges(from).map(move |arc| Edge {
                from,
                to: arc.to,
                weight: arc.weight,
                length: arc.length,
            })
        })
    }

    /// Highest speed in m/s over all edges, used as the admissible bound in
    /// goal-directed searches.
    pub fn max_speed(&self) -> f32 {
        self.weight
            .iter()
            .zip(&self.length)
            .filter(|&(&weight, _)| weight > 0.0)
            .map(|(&weight, &length)| length / weight)
            .fold(0.0, f32::max)
    }

    pub fn save(&self, base: &Path) -> Result<(), PreprocessError> {
        write_artifact(Artifact::Graph, base, |out| self.write(out)).map(|_| ())
    }

    /// Reads `<base>.graph` for a later preprocessing step.
    pub fn load(base: &Path) -> Result<Self, PreprocessError> {
        let path = Artifact::Graph.path(base);
        if !path.exists() {
            return Err(PreprocessError::MissingIntermediate(path));
        }

        let bytes = fs::read(&path).map_err(|source| LoadError::Io { path, source })?;
        Ok(Self::from_bytes(&bytes)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut reader = payload(Artifact::Graph, bytes)?;
        let graph = Self::read(&mut reader).map_err(decode_error(Artifact::Graph))?;

        if !reader.is_empty() {
            return Err(LoadError::Corrupt {
                artifact: Artifact::Graph.name(),
                reason: format!("{} trailing bytes", reader.len()),
            });
        }

        Ok(graph)
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(&self.node_count().to_le_bytes())?;
        writer.write_all(&self.edge_count().to_le_bytes())?;

        for node in &self.nodes {
            let (lon, lat) = node.coordinate.to_fixed();
            writer.write_all(&lon.to_le_bytes())?;
            writer.write_all(&lat.to_le_bytes())?;
        }

        for edge in self.edges() {
            writer.write_all(&edge.from.to_le_bytes())?;
            writer.write_all(&edge.to.to_le_bytes())?;
            writer.write_all(&edge.weight.to_le_bytes())?;
            writer.write_all(&edge.length.to_le_bytes())?;
        }

        Ok(())
    }

    pub fn read(reader: &mut impl io::Read) -> io::Result<Self> {
        let invalid = |msg: String| io::Error::new(io::ErrorKind::InvalidData, msg);

        let nodes_len = reader.read_u32_le()?;
        let edges_len = reader.read_u32_le()?;

        let mut nodes = Vec::with_capacity(nodes_len as usize);
        for _ in 0..nodes_len {
            let lon = reader.read_i32_le()?;
            let lat = reader.read_i32_le()?;
            let coordinate =
                Coordinate::from_fixed(lon, lat).map_err(|err| invalid(err.to_string()))?;
            nodes.push(Node { coordinate });
        }

        let mut edges = Vec::with_capacity(edges_len as usize);
        for _ in 0..edges_len {
            let edge = Edge {
                from: reader.read_u32_le()?,
                to: reader.read_u32_le()?,
                weight: reader.read_f32_le()?,
                length: reader.read_f32_le()?,
            };

            if edge.from >= nodes_len || edge.to >= nodes_len {
                return Err(invalid(format!(
                    "edge {} -> {} references a node beyond {nodes_len}",
                    edge.from, edge.to
                )));
            }

            if !(edge.weight >= 0.0 && edge.length >= 0.0) {
                return Err(invalid(format!(
                    "edge {} -> {} has a negative weight or length",
                    edge.from, edge.to
                )));
            }

            edges.push(edge);
        }

        Ok(Self::new(nodes, &edges))
    }
}

#[cfg(test)]
pub(crate) mod test_graphs {
    use std::{cmp::Reverse, collections::BinaryHeap};

    use super::*;

    /// A `width` x `height` grid with ~55 m spacing near Monaco. Horizontal
    /// streets are two-way, every other vertical street is one-way north.
    pub fn grid(width: u32, height: u32) -> RoadGraph {
        let step = 0.0005;
        let nodes: Vec<Node> = (0..height)
            .flat_map(|y| {
                (0..width).map(move |x| Node {
                    coordinate: Coordinate::new(
                        7.4185 + step * x as f64,
                        43.7305 + step * y as f64,
                    )
                    .unwrap(),
                })
            })
            .collect();

        let idx = |x: u32, y: u32| y * width + x;
        let mut edges = vec![];
        let mut add = |from: NodeIdx, to: NodeIdx, speed: f32| {
            let length = nodes[from as usize]
                .coordinate
                .haversine_distance(&nodes[to as usize].coordinate) as f32;
            edges.push(Edge {
                from,
                to,
                weight: length / speed,
                length,
            });
        };

        for y in 0..height {
            for x in 0..width {
                if x + 1 < width {
                    let speed = if y % 3 == 0 { 14.0 } else { 7.0 };
                    add(idx(x, y), idx(x + 1, y), speed);
                    add(idx(x + 1, y), idx(x, y), speed);
                }
                if y + 1 < height {
                    add(idx(x, y), idx(x, y + 1), 9.0);
                    if x % 2 == 0 {
                        add(idx(x, y + 1), idx(x, y), 9.0);
                    }
                }
            }
        }

        RoadGraph::new(nodes, &edges)
    }

    /// Plain Dijkstra returning (duration, distance) of the fastest path.
    pub fn dijkstra(graph: &RoadGraph, source: NodeIdx, target: NodeIdx) -> Option<(f64, f64)> {
        let mut best = vec![(f64::INFINITY, 0.0); graph.node_count() as usize];
        let mut queue = BinaryHeap::new();

        best[source as usize] = (0.0, 0.0);
        queue.push(Reverse((0u64, source)));

        while let Some(Reverse((_, node))) = queue.pop() {
            let (weight, length) = best[node as usize];
            if node == target {
                return Some((weight, length));
            }

            for arc in graph.out_edges(node) {
                let next = (weight + arc.weight as f64, length + arc.length as f64);
                if next.0 < best[arc.to as usize].0 {
                    best[arc.to as usize] = next;
                    queue.push(Reverse(((next.0 * 1e6) as u64, arc.to)));
                }
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::{test_graphs::grid, *};

    #[test]
    fn groups_edges_by_tail() {
        let graph = grid(4, 3);

        assert_eq!(graph.node_count(), 12);
        for node in 0..graph.node_count() {
            for arc in graph.out_edges(node) {
                assert_ne!(arc.to, node);
                assert!(arc.length > 0.0 && arc.weight > 0.0);
            }
        }
        assert_eq!(graph.edges().count() as u32, graph.edge_count());
        assert!((graph.max_speed() - 14.0).abs() < 1e-3);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("grid");
        let graph = grid(5, 5);

        graph.save(&base).unwrap();
        let bytes = std::fs::read(Artifact::Graph.path(&base)).unwrap();
        let loaded = RoadGraph::from_bytes(&bytes).unwrap();

        assert_eq!(loaded.edge_count(), graph.edge_count());
        for (a, b) in loaded.nodes().iter().zip(graph.nodes()) {
            assert!(a.coordinate.haversine_distance(&b.coordinate) < 0.1);
        }
        assert!(loaded.edges().zip(graph.edges()).all(|(a, b)| a == b));
    }
}
