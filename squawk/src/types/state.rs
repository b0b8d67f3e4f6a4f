//! Vehicle state reports.

use crate::types::UnpackError;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// A single position/velocity report. Packs as seven big-endian `f32`s.
///
/// `toa_utc` is a POSIX timestamp; like every other field it travels as an
/// `f32`, so sub-second precision is not preserved on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    pub lat_deg: f32,
    pub lon_deg: f32,
    pub alt_hae_ft: f32,
    pub vel_ew_fps: f32,
    pub vel_ns_fps: f32,
    pub vel_vert_fps: f32,
    pub toa_utc: f32,
}

impl StateUpdate {
    pub const PACKED_LEN: usize = 28;

    pub fn pack(&self) -> [u8; Self::PACKED_LEN] {
        let mut bytes = [0u8; Self::PACKED_LEN];
        let mut buf = &mut bytes[..];
        buf.put_f32(self.lat_deg);
        buf.put_f32(self.lon_deg);
        buf.put_f32(self.alt_hae_ft);
        buf.put_f32(self.vel_ew_fps);
        buf.put_f32(self.vel_ns_fps);
        buf.put_f32(self.vel_vert_fps);
        buf.put_f32(self.toa_utc);
        bytes
    }

    pub fn unpack(data: &[u8]) -> Result<Self, UnpackError> {
        if data.len() != Self::PACKED_LEN {
            return Err(UnpackError::Length {
                what: "state update",
                expected: Self::PACKED_LEN,
                actual: data.len(),
            });
        }
        let mut buf = data;
        Ok(StateUpdate {
            lat_deg: buf.get_f32(),
            lon_deg: buf.get_f32(),
            alt_hae_ft: buf.get_f32(),
            vel_ew_fps: buf.get_f32(),
            vel_ns_fps: buf.get_f32(),
            vel_vert_fps: buf.get_f32(),
            toa_utc: buf.get_f32(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_roundtrip() {
        let state = StateUpdate {
            lat_deg: 42.36,
            lon_deg: -71.06,
            alt_hae_ft: 1250.0,
            vel_ew_fps: -103.5,
            vel_ns_fps: 88.25,
            vel_vert_fps: -4.0,
            toa_utc: 1_700_000_000.0,
        };
        let packed = state.pack();
        assert_eq!(packed.len(), StateUpdate::PACKED_LEN);
        assert_eq!(StateUpdate::unpack(&packed).unwrap(), state);
    }

    #[test]
    fn unpack_rejects_short_input() {
        assert!(matches!(
            StateUpdate::unpack(&[0u8; 27]),
            Err(UnpackError::Length { .. })
        ));
    }
}
