//! Authorization tokens and their payloads.

use crate::types::geo::BBox;
use crate::types::time::{decode_datetime, encode_datetime, Rounding, TimeError};
use crate::types::UnpackError;
use bytes::{Buf, BufMut};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The signed body of a token: identity, validity window, spatial bounds.
///
/// Packs as 16 gufi bytes, two big-endian `u32` tick counts, and four
/// big-endian `f32` box coordinates. `nbf` is floor-encoded and `exp` is
/// ceiling-encoded so the quantized window always covers the requested one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TokenPayload {
    pub gufi: Uuid,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub bbox: BBox,
}

impl TokenPayload {
    pub const PACKED_LEN: usize = 40;

    pub fn pack(&self) -> Result<[u8; Self::PACKED_LEN], TimeError> {
        let mut bytes = [0u8; Self::PACKED_LEN];
        let mut buf = &mut bytes[..];
        buf.put_slice(self.gufi.as_bytes());
        buf.put_u32(encode_datetime(self.nbf, Rounding::Floor)?);
        buf.put_u32(encode_datetime(self.exp, Rounding::Ceiling)?);
        buf.put_f32(self.bbox.west);
        buf.put_f32(self.bbox.south);
        buf.put_f32(self.bbox.east);
        buf.put_f32(self.bbox.north);
        Ok(bytes)
    }

    pub fn unpack(data: &[u8]) -> Result<Self, UnpackError> {
        if data.len() != Self::PACKED_LEN {
            return Err(UnpackError::Length {
                what: "token payload",
                expected: Self::PACKED_LEN,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let mut gufi = [0u8; 16];
        buf.copy_to_slice(&mut gufi);
        Ok(TokenPayload {
            gufi: Uuid::from_bytes(gufi),
            nbf: decode_datetime(buf.get_u32()),
            exp: decode_datetime(buf.get_u32()),
            bbox: BBox {
                west: buf.get_f32(),
                south: buf.get_f32(),
                east: buf.get_f32(),
                north: buf.get_f32(),
            },
        })
    }
}

/// A token: payload, the key epoch that signed it, and the detached
/// conventional signature over the packed payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Token {
    pub payload: TokenPayload,
    pub kid: u32,
    pub signature: [u8; 64],
}

impl Token {
    pub const PACKED_LEN: usize = 108;

    pub fn pack(&self) -> Result<[u8; Self::PACKED_LEN], TimeError> {
        let mut bytes = [0u8; Self::PACKED_LEN];
        let mut buf = &mut bytes[..];
        buf.put_slice(&self.payload.pack()?);
        buf.put_u32(self.kid);
        buf.put_slice(&self.signature);
        Ok(bytes)
    }

    /// Unpack from the 108-byte binary form, or from its base64 ASCII
    /// transport form as used in API responses.
    pub fn unpack(data: &[u8]) -> Result<Self, UnpackError> {
        if data.len() != Self::PACKED_LEN {
            let ascii = std::str::from_utf8(data).map_err(|_| UnpackError::Length {
                what: "token",
                expected: Self::PACKED_LEN,
                actual: data.len(),
            })?;
            return Self::unpack_binary(&base64::decode(ascii)?);
        }
        Self::unpack_binary(data)
    }

    fn unpack_binary(data: &[u8]) -> Result<Self, UnpackError> {
        if data.len() != Self::PACKED_LEN {
            return Err(UnpackError::Length {
                what: "token",
                expected: Self::PACKED_LEN,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let payload = TokenPayload::unpack(&buf.copy_to_bytes(TokenPayload::PACKED_LEN))?;
        let kid = buf.get_u32();
        let mut signature = [0u8; 64];
        buf.copy_to_slice(&mut signature);
        Ok(Token {
            payload,
            kid,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::time::{min_datetime, time_resolution};

    fn sample_payload() -> TokenPayload {
        TokenPayload {
            gufi: Uuid::new_v4(),
            nbf: min_datetime(),
            exp: min_datetime() + time_resolution(),
            bbox: BBox::from((-40.0, 30.0, -30.0, 40.0)),
        }
    }

    #[test]
    fn payload_roundtrips_on_tick_boundaries() {
        let payload = sample_payload();
        let packed = payload.pack().unwrap();
        assert_eq!(packed.len(), TokenPayload::PACKED_LEN);
        assert_eq!(TokenPayload::unpack(&packed).unwrap(), payload);
    }

    #[test]
    fn payload_quantizes_off_boundary_times() {
        let mut payload = sample_payload();
        let fraction = time_resolution() * 3 / 10;
        payload.nbf = payload.nbf + fraction;
        payload.exp = payload.exp + fraction;

        let unpacked = TokenPayload::unpack(&payload.pack().unwrap()).unwrap();
        // nbf floors, exp ceils.
        assert_eq!(unpacked.nbf, min_datetime());
        assert_eq!(unpacked.exp, min_datetime() + time_resolution() * 2);
    }

    #[test]
    fn token_roundtrips_byte_for_byte() {
        let mut signature = [0u8; 64];
        for (i, byte) in signature.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let token = Token {
            payload: sample_payload(),
            kid: 7,
            signature,
        };
        let packed = token.pack().unwrap();
        assert_eq!(packed.len(), Token::PACKED_LEN);
        let unpacked = Token::unpack(&packed).unwrap();
        assert_eq!(unpacked, token);
        assert_eq!(unpacked.pack().unwrap(), packed);
    }

    #[test]
    fn token_unpacks_from_base64_ascii() {
        let token = Token {
            payload: sample_payload(),
            kid: 0,
            signature: [0x5a; 64],
        };
        let packed = token.pack().unwrap();
        let ascii = base64::encode(packed);
        assert_eq!(Token::unpack(ascii.as_bytes()).unwrap(), token);
    }

    #[test]
    fn unpack_rejects_malformed_input() {
        assert!(Token::unpack(&[0u8; 12]).is_err());
        assert!(Token::unpack("definitely-not-base64!!".as_bytes()).is_err());
        // Valid base64 of the wrong decoded length.
        assert!(Token::unpack(base64::encode([0u8; 16]).as_bytes()).is_err());
    }
}
