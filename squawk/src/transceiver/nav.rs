//! Navigation sources.

use crate::types::geo::BBox;
use crate::types::state::StateUpdate;
use chrono::{DateTime, Utc};
use rand::Rng;

pub trait NavSource: Send + Sync {
    fn get_state(&self, toa: DateTime<Utc>) -> StateUpdate;
}

/// Uniform-random state reports inside a bounding box. Stands in for real
/// avionics in the proof of concept.
pub struct RandomNav {
    bbox: BBox,
}

impl RandomNav {
    pub fn new(bbox: Option<BBox>) -> Self {
        Self {
            bbox: bbox.unwrap_or(BBox {
                west: -180.0,
                south: -90.0,
                east: 180.0,
                north: 90.0,
            }),
        }
    }
}

fn uniform<R: Rng>(rng: &mut R, low: f32, high: f32) -> f32 {
    if high > low {
        rng.gen_range(low, high)
    } else {
        low
    }
}

impl NavSource for RandomNav {
    fn get_state(&self, toa: DateTime<Utc>) -> StateUpdate {
        let mut rng = rand::thread_rng();
        StateUpdate {
            lat_deg: uniform(&mut rng, self.bbox.south, self.bbox.north),
            lon_deg: uniform(&mut rng, self.bbox.west, self.bbox.east),
            alt_hae_ft: uniform(&mut rng, 0.0, 10_000.0),
            vel_ew_fps: uniform(&mut rng, -250.0, 250.0),
            vel_ns_fps: uniform(&mut rng, -250.0, 250.0),
            vel_vert_fps: uniform(&mut rng, -50.0, 50.0),
            toa_utc: (toa.timestamp_millis() as f64 / 1000.0) as f32,
        }
    }
}
