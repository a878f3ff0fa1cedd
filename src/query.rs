use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    config::EngineConfig,
    coordinate::Coordinate,
    datasource::{FileSource, SharedMemorySource},
    error::{LoadError, RouteError},
    response::{Response, ResponseBuilder},
    store::GraphStore,
    NodeIdx,
};

/// A route through `coordinates`, visited in order.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteRequest {
    pub coordinates: Vec<Coordinate>,
    /// Include the node coordinates along the route.
    pub geometry: bool,
    pub deadline: Option<Instant>,
}

impl RouteRequest {
    pub fn new(coordinates: Vec<Coordinate>) -> Self {
        Self {
            coordinates,
            geometry: false,
            deadline: None,
        }
    }

    pub fn with_geometry(mut self, geometry: bool) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }
}

/// A request coordinate after snapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waypoint {
    pub node: NodeIdx,
    pub location: Coordinate,
    /// Meters between the requested coordinate and `location`.
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouteLeg {
    /// Meters.
    pub distance: f64,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub distance: f64,
    pub duration: f64,
    pub legs: Vec<RouteLeg>,
    pub geometry: Option<Vec<Coordinate>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteSet {
    pub routes: Vec<Route>,
    pub waypoints: Vec<Waypoint>,
}

pub type RouteResult = Result<RouteSet, RouteError>;

/// Answers route requests against a shared, read-only `GraphStore`.
#[derive(Clone)]
pub struct QueryEngine {
    store: Arc<GraphStore>,
}

impl QueryEngine {
    pub fn new(config: &EngineConfig) -> Result<Self, LoadError> {
        let base = &config.storage_config.base_path;
        let store = if config.use_shared_memory {
            GraphStore::open(&SharedMemorySource::new(base), config.algorithm)?
        } else {
            GraphStore::open(&FileSource::new(base), config.algorithm)?
        };

        Ok(Self::from_store(Arc::new(
            store.with_max_snap_distance(config.max_snap_distance),
        )))
    }

    pub fn from_store(store: Arc<GraphStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    pub fn route(&self, request: &RouteRequest) -> RouteResult {
        if request.coordinates.len() < 2 {
            return Err(RouteError::InvalidOptions(format!(
                "at least two coordinates are required, got {}",
                request.coordinates.len()
            )));
        }

        let waypoints = request
            .coordinates
            .iter()
            .enumerate()
            .map(|(index, &coordinate)| {
                self.store
                    .nearest_node(coordinate)
                    .map(|snapped| Waypoint {
                        node: snapped.node,
                        location: snapped.location,
                        distance: snapped.distance,
                    })
                    .map_err(|err| {
                        RouteError::NoSegment(format!(
                            "could not find a matching segment for coordinate {index}: {err}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let graph = self.store.graph();
        let mut legs = Vec::with_capacity(waypoints.len() - 1);
        let mut geometry: Option<Vec<Coordinate>> = request.geometry.then(Vec::new);

        for (index, pair) in waypoints.windows(2).enumerate() {
            let (from, to) = (pair[0].node, pair[1].node);

            if from == to {
                tracing::debug!(leg = index, node = from, "waypoints coincide");
                legs.push(RouteLeg {
                    distance: 0.0,
                    duration: 0.0,
                });
                if let Some(geometry) = &mut geometry {
                    if geometry.is_empty() {
                        geometry.push(graph.coordinate(from));
                    }
                }
                continue;
            }

            let path = self
                .store
                .shortest_path(from, to, request.geometry, request.deadline)
                .map_err(|_| {
                    RouteError::Timeout(format!("route search for leg {index} ran past its deadline"))
                })?
                .ok_or_else(|| {
                    RouteError::NoRoute(format!(
                        "no route between coordinates {index} and {}",
                        index + 1
                    ))
                })?;

            if let Some(geometry) = &mut geometry {
                let skip = usize::from(!geometry.is_empty());
                geometry.extend(path.nodes.iter().skip(skip).map(|&node| graph.coordinate(node)));
            }

            legs.push(RouteLeg {
                distance: path.distance,
                duration: path.duration,
            });
        }

        let route = Route {
            distance: legs.iter().map(|leg| leg.distance).sum(),
            duration: legs.iter().map(|leg| leg.duration).sum(),
            legs,
            geometry,
        };

        tracing::debug!(
            algorithm = self.store.algorithm().name(),
            waypoints = waypoints.len(),
            distance = route.distance,
            duration = route.duration,
            "route computed"
        );

        Ok(RouteSet {
            routes: vec![route],
            waypoints,
        })
    }

    /// Routes and renders the result as a response document.
    pub fn respond(&self, request: &RouteRequest) -> Response {
        ResponseBuilder::build(&self.route(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ch::ContractionHierarchy, graph::test_graphs::grid, response::Status, Edge, Node,
        RoadGraph,
    };

    fn engine(graph: RoadGraph) -> QueryEngine {
        let ch = ContractionHierarchy::new(&graph);
        QueryEngine::from_store(Arc::new(GraphStore::from_parts(graph, Box::new(ch)).unwrap()))
    }

    fn at(lon: f64, lat: f64) -> Coordinate {
        Coordinate::new(lon, lat).unwrap()
    }

    #[test]
    fn needs_two_coordinates() {
        let engine = engine(grid(3, 3));

        for coordinates in [vec![], vec![at(7.4185, 43.7305)]] {
            let err = engine.route(&RouteRequest::new(coordinates)).unwrap_err();
            assert_eq!(err.code(), "InvalidOptions");
        }
    }

    #[test]
    fn unsnappable_coordinate() {
        let engine = engine(grid(3, 3));
        let request = RouteRequest::new(vec![at(7.4185, 43.7305), at(-73.98, 40.75)]);

        let err = engine.route(&request).unwrap_err();
        assert_eq!(err.code(), "NoSegment");
        assert!(err.message().contains("coordinate 1"));
    }

    #[test]
    fn coincident_waypoints_give_zero_totals() {
        let engine = engine(grid(3, 3));
        let request =
            RouteRequest::new(vec![at(7.4185, 43.7305), at(7.41851, 43.73051)]).with_geometry(true);

        let set = engine.route(&request).unwrap();
        let route = &set.routes[0];
        assert_eq!(route.distance, 0.0);
        assert_eq!(route.duration, 0.0);
        assert_eq!(route.geometry.as_ref().map(Vec::len), Some(1));
        assert_eq!(set.waypoints[0].node, set.waypoints[1].node);
    }

    #[test]
    fn legs_add_up() {
        let engine = engine(grid(5, 5));
        let request = RouteRequest::new(vec![
            at(7.4185, 43.7305),
            at(7.4205, 43.7305),
            at(7.4205, 43.7325),
        ])
        .with_geometry(true);

        let route = engine.route(&request).unwrap().routes.remove(0);
        assert_eq!(route.legs.len(), 2);
        assert!(route.legs.iter().all(|leg| leg.distance > 0.0 && leg.duration > 0.0));
        assert!((route.distance - route.legs.iter().map(|l| l.distance).sum::<f64>()).abs() < 1e-9);

        let geometry = route.geometry.unwrap();
        assert_eq!(geometry.first(), Some(&at(7.4185, 43.7305)));
        assert!(geometry.windows(2).all(|pair| pair[0] != pair[1]));
    }

    #[test]
    fn disconnected_waypoints() {
        let graph = RoadGraph::new(
            vec![
                Node { coordinate: at(7.410, 43.73) },
                Node { coordinate: at(7.411, 43.73) },
                Node { coordinate: at(7.412, 43.73) },
                Node { coordinate: at(7.413, 43.73) },
            ],
            &[
                Edge { from: 0, to: 1, weight: 8.0, length: 80.0 },
                Edge { from: 2, to: 3, weight: 8.0, length: 80.0 },
            ],
        );
        let engine = engine(graph);

        let err = engine
            .route(&RouteRequest::new(vec![at(7.410, 43.73), at(7.413, 43.73)]))
            .unwrap_err();
        assert_eq!(err.code(), "NoRoute");
    }

    #[test]
    fn expired_deadline_times_out() {
        let engine = engine(grid(30, 30));
        let request = RouteRequest::new(vec![at(7.4185, 43.7305), at(7.431, 43.743)])
            .with_deadline(Instant::now());

        let err = engine.route(&request).unwrap_err();
        assert_eq!(err.code(), "Timeout");
        assert_eq!(engine.respond(&request).status, Status::Error);
    }

    #[test]
    fn repeated_requests_are_identical() {
        let engine = engine(grid(6, 6));
        let request = RouteRequest::new(vec![at(7.4185, 43.7305), at(7.421, 43.733)]);

        let first = engine.respond(&request);
        assert_eq!(first.status, Status::Ok);
        assert_eq!(first, engine.respond(&request));
        assert!(first.document.get_array("routes").unwrap()[0]
            .as_object()
            .and_then(|route| route.get_number("distance"))
            .is_some_and(|distance| distance > 0.0));
    }
}
