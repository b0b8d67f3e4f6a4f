//! Signature primitives for the squawk attestation fabric.
//!
//! Two schemes, two modules:
//! - [`ed25519`]: the conventional scheme that signs authorization tokens.
//!   32-byte keys, 64-byte detached signatures.
//! - [`waters`]: a Waters-style identity-based signature over BLS12-381 that
//!   signs broadcast state payloads. Verifiers need only the root public
//!   parameters and the signer's identity string.

pub mod ed25519;
pub mod waters;
