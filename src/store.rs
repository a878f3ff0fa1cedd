use std::{path::Path, time::Instant};

use thiserror::Error;

use crate::{
    ch::ContractionHierarchy,
    config::Algorithm,
    coordinate::Coordinate,
    datasource::{DataSource, FileSource},
    error::{LoadError, NotFoundError},
    graph::RoadGraph,
    io::Artifact,
    mld::MultiLevelOverlay,
    spatial::SpatialIndex,
    NodeIdx,
};

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("search deadline exceeded")]
pub struct DeadlineExceeded;

/// Totals of a shortest path between two nodes. `nodes` is empty unless
/// unpacking was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct LegPath {
    /// Seconds.
    pub duration: f64,
    /// Meters.
    pub distance: f64,
    pub nodes: Vec<NodeIdx>,
}

/// A speed-up technique answering point-to-point queries on a `RoadGraph`.
pub trait RoutingAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    /// Number of graph nodes the structure was built for.
    fn node_count(&self) -> u32;

    /// Fastest path from `source` to `target`, `None` if unreachable.
    fn shortest_path(
        &self,
        graph: &RoadGraph,
        source: NodeIdx,
        target: NodeIdx,
        unpack: bool,
        deadline: Option<Instant>,
    ) -> Result<Option<LegPath>, DeadlineExceeded>;
}

/// A coordinate snapped onto the graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapped {
    pub node: NodeIdx,
    /// Location of the node.
    pub location: Coordinate,
    /// Great-circle distance from the input coordinate, in meters.
    pub distance: f64,
}

/// Everything a query needs, loaded once and read-only afterwards.
pub struct GraphStore {
    graph: RoadGraph,
    spatial: SpatialIndex,
    algorithm: Box<dyn RoutingAlgorithm>,
    max_snap_distance: f64,
}

pub const DEFAULT_MAX_SNAP_DISTANCE: f64 = 1000.0;

impl GraphStore {
    /// Loads the dataset at `base` from files.
    pub fn load(base: impl AsRef<Path>, algorithm: Algorithm) -> Result<Self, LoadError> {
        Self::open(&FileSource::new(base.as_ref()), algorithm)
    }

    pub fn open(source: &dyn DataSource, algorithm: Algorithm) -> Result<Self, LoadError> {
        let started = Instant::now();
        let graph = RoadGraph::from_bytes(&source.read(Artifact::Graph)?)?;

        let algorithm: Box<dyn RoutingAlgorithm> = match algorithm {
            Algorithm::Ch => Box::new(ContractionHierarchy::from_bytes(
                &source.read(Artifact::Hierarchy)?,
            )?),
            Algorithm::Mld => Box::new(MultiLevelOverlay::from_bytes(
                &source.read(Artifact::Partition)?,
                &source.read(Artifact::Cells)?,
            )?),
        };

        let store = Self::from_parts(graph, algorithm)?;

        tracing::info!(
            source = %source.describe(),
            algorithm = store.algorithm.name(),
            nodes = store.graph.node_count(),
            edges = store.graph.edge_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "graph store loaded"
        );

        Ok(store)
    }

    /// Assembles a store from already loaded parts, checking that they
    /// describe the same graph.
    pub fn from_parts(
        graph: RoadGraph,
        algorithm: Box<dyn RoutingAlgorithm>,
    ) -> Result<Self, LoadError> {
        if algorithm.node_count() != graph.node_count() {
            return Err(LoadError::Inconsistent(format!(
                "{} covers {} nodes but the graph has {}",
                algorithm.name(),
                algorithm.node_count(),
                graph.node_count()
            )));
        }

        Ok(Self {
            spatial: SpatialIndex::build(&graph),
            graph,
            algorithm,
            max_snap_distance: DEFAULT_MAX_SNAP_DISTANCE,
        })
    }

    pub fn with_max_snap_distance(mut self, meters: f64) -> Self {
        self.max_snap_distance = meters;
        self
    }

    pub fn max_snap_distance(&self) -> f64 {
        self.max_snap_distance
    }

    pub fn graph(&self) -> &RoadGraph {
        &self.graph
    }

    pub fn algorithm(&self) -> &dyn RoutingAlgorithm {
        self.algorithm.as_ref()
    }

    /// The closest routable node to `coordinate` within the snapping radius.
    pub fn nearest_node(&self, coordinate: Coordinate) -> Result<Snapped, NotFoundError> {
        let (node, distance) = self
            .spatial
            .nearest(coordinate)
            .ok_or(NotFoundError::EmptyGraph)?;

        if distance > self.max_snap_distance {
            return Err(NotFoundError::OutOfRange {
                lon: coordinate.lon(),
                lat: coordinate.lat(),
                radius: self.max_snap_distance,
            });
        }

        Ok(Snapped {
            node,
            location: self.graph.coordinate(node),
            distance,
        })
    }

    pub fn shortest_path(
        &self,
        source: NodeIdx,
        target: NodeIdx,
        unpack: bool,
        deadline: Option<Instant>,
    ) -> Result<Option<LegPath>, DeadlineExceeded> {
        self.algorithm
            .shortest_path(&self.graph, source, target, unpack, deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_graphs::grid;

    fn store() -> GraphStore {
        let graph = grid(4, 4);
        let ch = ContractionHierarchy::new(&graph);
        GraphStore::from_parts(graph, Box::new(ch)).unwrap()
    }

    #[test]
    fn snapping_respects_radius() {
        let store = store();

        let snapped = store
            .nearest_node(Coordinate::new(7.4185, 43.7305).unwrap())
            .unwrap();
        assert_eq!(snapped.node, 0);
        assert!(snapped.distance < 1.0);

        let far = Coordinate::new(-73.98, 40.75).unwrap();
        assert!(matches!(
            store.nearest_node(far),
            Err(NotFoundError::OutOfRange { .. })
        ));

        let store = store.with_max_snap_distance(f64::INFINITY);
        assert!(store.nearest_node(far).is_ok());
    }

    #[test]
    fn empty_graph_has_nothing_to_snap_to() {
        let graph = RoadGraph::new(vec![], &[]);
        let ch = ContractionHierarchy::new(&graph);
        let store = GraphStore::from_parts(graph, Box::new(ch)).unwrap();

        assert_eq!(
            store.nearest_node(Coordinate::new(7.42, 43.73).unwrap()),
            Err(NotFoundError::EmptyGraph)
        );
    }

    #[test]
    fn rejects_mismatched_parts() {
        let ch = ContractionHierarchy::new(&grid(3, 3));
        assert!(matches!(
            GraphStore::from_parts(grid(4, 4), Box::new(ch)),
            Err(LoadError::Inconsistent(_))
        ));
    }

    #[test]
    fn missing_hierarchy() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("grid");
        grid(3, 3).save(&base).unwrap();

        assert!(matches!(
            GraphStore::load(&base, Algorithm::Ch),
            Err(LoadError::Missing(path)) if path.ends_with("grid.hsgr")
        ));
    }
}
