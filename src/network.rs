use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::PreprocessError;

/// Raw road network fed to extraction: OSM-like nodes and tagged ways.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoadNetwork {
    pub nodes: Vec<RawNode>,
    pub ways: Vec<RawWay>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawNode {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawWay {
    pub id: i64,
    pub nodes: Vec<i64>,
    #[serde(default)]
    pub tags: FxHashMap<String, String>,
}

impl RawWay {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }
}

impl RoadNetwork {
    pub fn read(path: impl AsRef<Path>) -> Result<Self, PreprocessError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PreprocessError::MissingInput(path.to_path_buf()));
        }

        let malformed = |reason: String| PreprocessError::MalformedInput {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
        serde_json::from_str(&text).map_err(|err| malformed(err.to_string()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), PreprocessError> {
        let path = path.as_ref();
        let json = serde_json::to_vec(self).map_err(|err| PreprocessError::Write {
            path: path.to_path_buf(),
            source: err.into(),
        })?;

        crate::io::write_atomic(path, &json)
    }
}
