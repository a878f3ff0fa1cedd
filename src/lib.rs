mod ch;
mod config;
mod coordinate;
mod datasource;
pub mod datastore;
mod error;
mod extract;
mod graph;
mod io;
mod mld;
mod network;
mod profile;
mod query;
mod response;
mod spatial;
mod store;

pub use ch::{contract, ContractionHierarchy, Router, UnpackedRoute};
pub use config::{
    Algorithm, ContractorConfig, CustomizationConfig, EngineConfig, ExtractorConfig,
    PartitionConfig, StorageConfig,
};
pub use coordinate::Coordinate;
pub use datasource::{DataSource, FileSource, SharedMemorySource};
pub use error::{InvalidCoordinate, LoadError, NotFoundError, PreprocessError, RouteError};
pub use extract::{extract, load_edge_lookup, Properties};
pub use graph::RoadGraph;
pub use io::Artifact;
pub use mld::{customize, partition, Cell, CellStorage, MultiLevelOverlay, Partition};
pub use network::{RawNode, RawWay, RoadNetwork};
pub use profile::{Profile, TravelDirection};
pub use query::{QueryEngine, Route, RouteLeg, RouteRequest, RouteResult, RouteSet, Waypoint};
pub use response::{Object, Response, ResponseBuilder, Status, Value};
pub use store::{DeadlineExceeded, GraphStore, LegPath, RoutingAlgorithm, Snapped};

pub type NodeIdx = u32;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Node {
    pub coordinate: Coordinate,
}

/// A directed road segment. `weight` is travel time in seconds, `length` is
/// the great-circle length in meters.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Edge {
    pub from: NodeIdx,
    pub to: NodeIdx,
    pub weight: f32,
    pub length: f32,
}

/// Result of a preprocessing trigger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The outputs were computed and written.
    Built,
    /// The outputs already existed and were left untouched.
    Skipped,
}
