//! The broadcast message: token, state payload, and identity signature.

use crate::types::state::StateUpdate;
use crate::types::time::TimeError;
use crate::types::token::Token;
use crate::types::UnpackError;
use bytes::{Buf, BufMut};
use squawk_crypto::waters;

/// One multicast datagram. `kid` names the root-key epoch whose public
/// parameters verify the identity signature; the signing identity is the
/// string form of `token.payload.gufi`.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub token: Token,
    pub kid: u32,
    pub payload: StateUpdate,
    pub signature: waters::Signature,
}

impl Message {
    pub const PACKED_LEN: usize =
        Token::PACKED_LEN + 4 + StateUpdate::PACKED_LEN + waters::SIGNATURE_LENGTH;

    pub fn pack(&self) -> Result<[u8; Self::PACKED_LEN], TimeError> {
        let mut bytes = [0u8; Self::PACKED_LEN];
        let mut buf = &mut bytes[..];
        buf.put_slice(&self.token.pack()?);
        buf.put_u32(self.kid);
        buf.put_slice(&self.payload.pack());
        buf.put_slice(&self.signature.to_bytes());
        Ok(bytes)
    }

    pub fn unpack(data: &[u8]) -> Result<Self, UnpackError> {
        if data.len() != Self::PACKED_LEN {
            return Err(UnpackError::Length {
                what: "message",
                expected: Self::PACKED_LEN,
                actual: data.len(),
            });
        }
        let mut buf = data;
        let token = Token::unpack(&buf.copy_to_bytes(Token::PACKED_LEN))?;
        let kid = buf.get_u32();
        let payload = StateUpdate::unpack(&buf.copy_to_bytes(StateUpdate::PACKED_LEN))?;
        let signature = waters::Signature::from_bytes(buf)?;
        Ok(Message {
            token,
            kid,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::geo::BBox;
    use crate::types::time::{min_datetime, time_resolution};
    use crate::types::token::TokenPayload;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_message() -> Message {
        let payload = TokenPayload {
            gufi: Uuid::new_v4(),
            nbf: min_datetime(),
            exp: min_datetime() + time_resolution() * 1200,
            bbox: BBox::from((-71.79, 41.945, -70.57, 42.725)),
        };
        let token = Token {
            payload,
            kid: 3,
            signature: [0x11; 64],
        };
        let state = StateUpdate {
            lat_deg: 42.0,
            lon_deg: -71.0,
            alt_hae_ft: 900.0,
            vel_ew_fps: 12.0,
            vel_ns_fps: -8.0,
            vel_vert_fps: 0.0,
            toa_utc: Utc::now().timestamp() as f32,
        };
        let (params, master) = waters::setup();
        let key = waters::extract(&payload.gufi.to_string(), &params, &master);
        let signature = waters::sign(&state.pack(), &params, &key);
        Message {
            token,
            kid: 5,
            payload: state,
            signature,
        }
    }

    #[test]
    fn message_roundtrips() {
        let message = sample_message();
        let packed = message.pack().unwrap();
        assert_eq!(packed.len(), Message::PACKED_LEN);
        let unpacked = Message::unpack(&packed).unwrap();
        assert_eq!(unpacked, message);
        assert_eq!(unpacked.pack().unwrap(), packed);
    }

    #[test]
    fn unpack_rejects_wrong_length() {
        let message = sample_message();
        let packed = message.pack().unwrap();
        assert!(matches!(
            Message::unpack(&packed[..Message::PACKED_LEN - 1]),
            Err(UnpackError::Length { .. })
        ));
    }

    #[test]
    fn unpack_rejects_corrupted_signature_elements() {
        let message = sample_message();
        let mut packed = message.pack().unwrap().to_vec();
        for byte in packed[Message::PACKED_LEN - waters::SIGNATURE_LENGTH..].iter_mut() {
            *byte = 0xff;
        }
        assert!(matches!(
            Message::unpack(&packed),
            Err(UnpackError::Signature(_))
        ));
    }
}
