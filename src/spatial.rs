//! Spatial index for snapping coordinates to graph nodes

use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::{coordinate::Coordinate, graph::RoadGraph, NodeIdx};

/// Position on the unit sphere. Chord length grows monotonically with the
/// central angle, so the R-tree's nearest neighbour is also the great-circle
/// nearest one.
fn unit_sphere(coordinate: Coordinate) -> [f64; 3] {
    let (lon, lat) = (coordinate.lon().to_radians(), coordinate.lat().to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct IndexedPoint {
    coords: [f64; 3],
    location: Coordinate,
    node: NodeIdx,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.coords)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 3]) -> f64 {
        self.coords
            .iter()
            .zip(point)
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    fn contains_point(&self, point: &[f64; 3]) -> bool {
        self.coords == *point
    }
}

pub struct SpatialIndex {
    tree: RTree<IndexedPoint>,
}

impl SpatialIndex {
    /// Indexes every node that has at least one incident edge.
    pub fn build(graph: &RoadGraph) -> Self {
        let mut connected = vec![false; graph.node_count() as usize];
        for edge in graph.edges() {
            connected[edge.from as usize] = true;
            connected[edge.to as usize] = true;
        }

        let points = graph
            .nodes()
            .iter()
            .enumerate()
            .filter(|&(node, _)| connected[node])
            .map(|(node, n)| IndexedPoint {
                coords: unit_sphere(n.coordinate),
                location: n.coordinate,
                node: node as NodeIdx,
            })
            .collect();

        Self {
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Nearest indexed node and its great-circle distance in meters.
    pub fn nearest(&self, coordinate: Coordinate) -> Option<(NodeIdx, f64)> {
        self.tree
            .nearest_neighbor(&unit_sphere(coordinate))
            .map(|point| (point.node, coordinate.haversine_distance(&point.location)))
    }
}
