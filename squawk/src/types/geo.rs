//! Geographic bounding boxes.
//!
//! Points and boxes follow the RFC7946 conventions: coordinates are
//! `(longitude, latitude)` in that order, and a box is the southwesterly
//! corner followed by the northeasterly corner. A box whose east bound is
//! west of its west bound crosses the antimeridian.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum GeoError {
    #[error("Longitude out of range")]
    LongitudeRange,
    #[error("Latitude out of range")]
    LatitudeRange,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "(f32, f32, f32, f32)", into = "(f32, f32, f32, f32)")]
pub struct BBox {
    pub west: f32,
    pub south: f32,
    pub east: f32,
    pub north: f32,
}

impl From<(f32, f32, f32, f32)> for BBox {
    fn from((west, south, east, north): (f32, f32, f32, f32)) -> Self {
        BBox {
            west,
            south,
            east,
            north,
        }
    }
}

impl From<BBox> for (f32, f32, f32, f32) {
    fn from(bbox: BBox) -> Self {
        (bbox.west, bbox.south, bbox.east, bbox.north)
    }
}

fn check_coordinates(lon: f32, lat: f32) -> Result<(), GeoError> {
    if !(lon.abs() <= 180.0) {
        return Err(GeoError::LongitudeRange);
    }
    if !(lat.abs() <= 90.0) {
        return Err(GeoError::LatitudeRange);
    }
    Ok(())
}

impl BBox {
    pub fn validate(&self) -> Result<(), GeoError> {
        check_coordinates(self.west, self.south)?;
        check_coordinates(self.east, self.north)
    }

    /// Inclusive containment of `(lon, lat)`, wrapping across the
    /// antimeridian when `east < west`. Out-of-range coordinates on either
    /// the point or the box fail closed.
    pub fn contains(&self, lon: f32, lat: f32) -> Result<bool, GeoError> {
        check_coordinates(lon, lat)?;
        self.validate()?;

        if lat > self.north || lat < self.south {
            return Ok(false);
        }

        if self.east < self.west {
            Ok(lon >= self.west || lon <= self.east)
        } else {
            Ok(lon >= self.west && lon <= self.east)
        }
    }
}
