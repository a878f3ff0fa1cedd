//! Configuration values for the preprocessing triggers and the query engine.
//!
//! All of them are plain data with sensible defaults and can be read from
//! JSON through serde.

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// JSON road network to extract.
    pub input_path: PathBuf,
    /// Outputs are written as `<base_path>.<extension>`.
    pub base_path: PathBuf,
    /// Profile JSON. The built-in car profile is used when absent.
    pub profile_path: Option<PathBuf>,
    /// Worker threads, 0 for one per core.
    pub requested_num_threads: usize,
    pub generate_edge_lookup: bool,
}

impl ExtractorConfig {
    pub fn new(input_path: impl Into<PathBuf>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn with_profile(mut self, profile_path: impl Into<PathBuf>) -> Self {
        self.profile_path = Some(profile_path.into());
        self
    }

    pub fn with_threads(mut self, requested_num_threads: usize) -> Self {
        self.requested_num_threads = requested_num_threads;
        self
    }

    pub fn with_edge_lookup(mut self, generate_edge_lookup: bool) -> Self {
        self.generate_edge_lookup = generate_edge_lookup;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractorConfig {
    pub base_path: PathBuf,
    pub requested_num_threads: usize,
}

impl ContractorConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            requested_num_threads: 0,
        }
    }

    pub fn with_threads(mut self, requested_num_threads: usize) -> Self {
        self.requested_num_threads = requested_num_threads;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    pub base_path: PathBuf,
    /// Largest allowed ratio between a bisection side and half the cell.
    pub balance: f64,
    /// Share of nodes on either end of a projection used as flow terminals.
    pub boundary_factor: f64,
    /// Number of projection directions tried per bisection.
    pub num_optimizing_cuts: usize,
    /// Connected components below this size are packed instead of cut.
    pub small_component_size: usize,
    /// Maximum node count of a cell, per level, finest first.
    pub max_cell_sizes: Vec<usize>,
    pub requested_num_threads: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::new(),
            balance: 1.2,
            boundary_factor: 0.25,
            num_optimizing_cuts: 10,
            small_component_size: 1000,
            max_cell_sizes: vec![128, 128 * 32, 128 * 32 * 16, 128 * 32 * 16 * 32],
            requested_num_threads: 0,
        }
    }
}

impl PartitionConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            ..Self::default()
        }
    }

    pub fn with_max_cell_sizes(mut self, max_cell_sizes: Vec<usize>) -> Self {
        self.max_cell_sizes = max_cell_sizes;
        self
    }

    pub fn with_small_component_size(mut self, small_component_size: usize) -> Self {
        self.small_component_size = small_component_size;
        self
    }

    pub fn with_threads(mut self, requested_num_threads: usize) -> Self {
        self.requested_num_threads = requested_num_threads;
        self
    }

    pub fn validate(&self) -> Result<(), PreprocessError> {
        let invalid = |msg: String| Err(PreprocessError::InvalidConfig(msg));

        if !(self.balance >= 1.0) {
            return invalid(format!("balance must be at least 1, got {}", self.balance));
        }
        if !(self.boundary_factor > 0.0 && self.boundary_factor < 0.5) {
            return invalid(format!(
                "boundary factor must be in (0, 0.5), got {}",
                self.boundary_factor
            ));
        }
        if self.num_optimizing_cuts == 0 {
            return invalid("at least one optimizing cut is required".into());
        }
        if self.max_cell_sizes.is_empty() {
            return invalid("at least one level is required".into());
        }
        if self.max_cell_sizes[0] < 2 {
            return invalid("cells must hold at least two nodes".into());
        }
        if self.max_cell_sizes.windows(2).any(|pair| pair[0] >= pair[1]) {
            return invalid(format!(
                "max cell sizes must be strictly increasing, got {:?}",
                self.max_cell_sizes
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomizationConfig {
    pub base_path: PathBuf,
    pub requested_num_threads: usize,
}

impl CustomizationConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            requested_num_threads: 0,
        }
    }

    pub fn with_threads(mut self, requested_num_threads: usize) -> Self {
        self.requested_num_threads = requested_num_threads;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_path: PathBuf,
}

impl StorageConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }
}

/// Speed-up technique used to answer queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Contraction hierarchies: needs extract + contract.
    #[default]
    Ch,
    /// Multi-level Dijkstra: needs extract + partition + customize.
    Mld,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Ch => "ch",
            Algorithm::Mld => "mld",
        })
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ch" => Ok(Algorithm::Ch),
            "mld" => Ok(Algorithm::Mld),
            other => Err(format!("unknown algorithm {other:?}, expected ch or mld")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage_config: StorageConfig,
    /// Load from regions published with `datastore::publish` instead of
    /// reading the files.
    pub use_shared_memory: bool,
    pub algorithm: Algorithm,
    /// Waypoints farther than this from every node, in meters, do not snap.
    pub max_snap_distance: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storage_config: StorageConfig::default(),
            use_shared_memory: false,
            algorithm: Algorithm::default(),
            max_snap_distance: 1000.0,
        }
    }
}

impl EngineConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_config: StorageConfig::new(base_path),
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_shared_memory(mut self, use_shared_memory: bool) -> Self {
        self.use_shared_memory = use_shared_memory;
        self
    }

    pub fn with_max_snap_distance(mut self, meters: f64) -> Self {
        self.max_snap_distance = meters;
        self
    }
}

pub(crate) fn thread_pool(requested_num_threads: usize) -> Result<rayon::ThreadPool, PreprocessError> {
    Ok(rayon::ThreadPoolBuilder::new()
        .num_threads(requested_num_threads)
        .build()?)
}
