use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
#[error("coordinate ({lon}, {lat}) is outside the valid WGS84 range")]
pub struct InvalidCoordinate {
    pub lon: f64,
    pub lat: f64,
}

/// Failure to bring a preprocessed dataset into memory.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("required data file {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{artifact} data is corrupt: {reason}")]
    Corrupt { artifact: &'static str, reason: String },

    #[error("no shared memory region holds {artifact} for {}", .base.display())]
    SharedMemory {
        base: PathBuf,
        artifact: &'static str,
    },

    #[error("dataset is inconsistent: {0}")]
    Inconsistent(String),
}

/// Failure of a one-shot preprocessing step. Fatal for startup.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("input map {} does not exist", .0.display())]
    MissingInput(PathBuf),

    #[error("input map {} is malformed: {reason}", .path.display())]
    MalformedInput { path: PathBuf, reason: String },

    #[error("profile {} is malformed: {reason}", .path.display())]
    MalformedProfile { path: PathBuf, reason: String },

    #[error("required intermediate file {} is missing", .0.display())]
    MissingIntermediate(PathBuf),

    #[error("intermediate data could not be loaded")]
    Load(#[from] LoadError),

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to start worker threads")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum NotFoundError {
    #[error("the graph has no nodes")]
    EmptyGraph,

    #[error("no node within {radius} m of ({lon}, {lat})")]
    OutOfRange { lon: f64, lat: f64, radius: f64 },
}

/// Per-query failure. Always returned as a value, never raised.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("{0}")]
    InvalidOptions(String),

    #[error("{0}")]
    NoSegment(String),

    #[error("{0}")]
    NoRoute(String),

    #[error("{0}")]
    Timeout(String),
}

impl RouteError {
    pub fn code(&self) -> &'static str {
        match self {
            RouteError::InvalidOptions(_) => "InvalidOptions",
            RouteError::NoSegment(_) => "NoSegment",
            RouteError::NoRoute(_) => "NoRoute",
            RouteError::Timeout(_) => "Timeout",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            RouteError::InvalidOptions(message)
            | RouteError::NoSegment(message)
            | RouteError::NoRoute(message)
            | RouteError::Timeout(message) => message,
        }
    }
}
