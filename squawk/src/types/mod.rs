//! Domain types and their fixed-layout wire codecs.
//!
//! Every multi-byte scalar on the wire is big-endian. Each type carries its
//! own `pack`/`unpack` pair; `unpack` is the exact inverse of `pack` modulo
//! the time quantization (`nbf` floors, `exp` ceils).

pub mod geo;
pub mod message;
pub mod state;
pub mod time;
pub mod token;

pub use geo::{BBox, GeoError};
pub use message::Message;
pub use state::StateUpdate;
pub use token::{Token, TokenPayload};

#[derive(Debug, thiserror::Error)]
pub enum UnpackError {
    #[error("expected {expected} bytes for {what}, received {actual}")]
    Length {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("token is not valid base64")]
    Base64(#[from] base64::DecodeError),
    #[error(transparent)]
    Signature(#[from] squawk_crypto::waters::WatersError),
}
