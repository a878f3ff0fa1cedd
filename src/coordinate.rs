use geo::{HaversineDistance, Point};

use crate::error::InvalidCoordinate;

/// Fixed-point scale used when coordinates are persisted.
pub const COORDINATE_PRECISION: f64 = 1e6;

/// A WGS84 position in degrees.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Coordinate {
    lon: f64,
    lat: f64,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Result<Self, InvalidCoordinate> {
        if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
            return Err(InvalidCoordinate { lon, lat });
        }

        Ok(Self { lon, lat })
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    /// Great-circle distance in meters.
    pub fn haversine_distance(&self, other: &Coordinate) -> f64 {
        Point::new(self.lon, self.lat).haversine_distance(&Point::new(other.lon, other.lat))
    }

    pub(crate) fn to_fixed(self) -> (i32, i32) {
        (
            (self.lon * COORDINATE_PRECISION).round() as i32,
            (self.lat * COORDINATE_PRECISION).round() as i32,
        )
    }

    pub(crate) fn from_fixed(lon: i32, lat: i32) -> Result<Self, InvalidCoordinate> {
        Self::new(
            lon as f64 / COORDINATE_PRECISION,
            lat as f64 / COORDINATE_PRECISION,
        )
    }
}
