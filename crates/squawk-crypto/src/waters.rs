//! Identity-based signature scheme in the Waters style over BLS12-381.
//!
//! The authority runs [`setup`] per root-key epoch and publishes the
//! resulting [`PublicParams`]; vehicles receive per-identity signing keys
//! via [`extract`]. A verifier needs only the root parameters and the
//! signer's identity string, no per-signer certificate.
//!
//! Identities and messages are mapped to `z` blocks of `l` bits each before
//! entering the algebra. Binary message input is hashed through its base64
//! ASCII form so that signatures interoperate with peers that treat
//! payloads as text.

use blstrs::{pairing, G1Affine, G1Projective, G2Affine, G2Projective, Scalar};
use ff::Field;
use group::{prime::PrimeCurveAffine, Curve, Group};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compressed size of one signature element on this curve.
pub const SIG_ELEMENT_LENGTH: usize = 48;
/// Total wire size of a packed signature (S1 ∥ S2 ∥ S3).
pub const SIGNATURE_LENGTH: usize = 3 * SIG_ELEMENT_LENGTH;

// Block decomposition of hashed identities and messages.
const ID_BLOCKS: usize = 5;
const BLOCK_BITS: u32 = 32;

#[derive(Debug, thiserror::Error)]
pub enum WatersError {
    #[error("waters: expected {expected} signature bytes, received {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("waters: byte string is not a valid group element")]
    MalformedElement,
}

/// Root public parameters for one key epoch.
///
/// The verification constant of the scheme lives in the target group, which
/// has no serializable form in this pairing backend; it is carried in the
/// factored form `(h, a = g2·α)` and re-paired during verification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PublicParams {
    g1: G1Affine,
    g2: G2Affine,
    h: G1Affine,
    a: G2Affine,
    u1t: G1Affine,
    u2t: G1Affine,
    u: Vec<G1Affine>,
    u1b: G2Affine,
    u2b: G2Affine,
    ub: Vec<G2Affine>,
    z: u32,
    l: u32,
}

/// Master extraction secret paired with one [`PublicParams`]. Never leaves
/// the authority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MasterSecret(G1Affine);

/// Per-identity signing secret: the two group elements produced by
/// [`extract`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdentitySecret {
    k1: G1Affine,
    k2: G1Affine,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub s1: G1Affine,
    pub s2: G1Affine,
    pub s3: G1Affine,
}

impl Signature {
    /// Raw compressed elements, S1 ∥ S2 ∥ S3.
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LENGTH] {
        let mut bytes = [0u8; SIGNATURE_LENGTH];
        bytes[..SIG_ELEMENT_LENGTH].copy_from_slice(&self.s1.to_compressed());
        bytes[SIG_ELEMENT_LENGTH..2 * SIG_ELEMENT_LENGTH]
            .copy_from_slice(&self.s2.to_compressed());
        bytes[2 * SIG_ELEMENT_LENGTH..].copy_from_slice(&self.s3.to_compressed());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WatersError> {
        if bytes.len() != SIGNATURE_LENGTH {
            return Err(WatersError::InvalidLength {
                expected: SIGNATURE_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            s1: element_from_bytes(&bytes[..SIG_ELEMENT_LENGTH])?,
            s2: element_from_bytes(&bytes[SIG_ELEMENT_LENGTH..2 * SIG_ELEMENT_LENGTH])?,
            s3: element_from_bytes(&bytes[2 * SIG_ELEMENT_LENGTH..])?,
        })
    }
}

fn element_from_bytes(bytes: &[u8]) -> Result<G1Affine, WatersError> {
    let mut compressed = [0u8; SIG_ELEMENT_LENGTH];
    compressed.copy_from_slice(bytes);
    Option::from(G1Affine::from_compressed(&compressed)).ok_or(WatersError::MalformedElement)
}

/// Sample fresh public parameters and the matching master secret.
pub fn setup() -> (PublicParams, MasterSecret) {
    let mut rng = OsRng;

    let alpha = Scalar::random(&mut rng);
    let h = G1Projective::random(&mut rng);
    let g1 = G1Projective::random(&mut rng);
    let g2 = G2Projective::random(&mut rng);

    // The u-families share exponents across G1 and G2 so the verification
    // pairings cancel.
    let y1t = Scalar::random(&mut rng);
    let y2t = Scalar::random(&mut rng);
    let ys: Vec<Scalar> = (0..ID_BLOCKS).map(|_| Scalar::random(&mut rng)).collect();

    let params = PublicParams {
        g1: g1.to_affine(),
        g2: g2.to_affine(),
        h: h.to_affine(),
        a: (g2 * alpha).to_affine(),
        u1t: (g1 * y1t).to_affine(),
        u2t: (g1 * y2t).to_affine(),
        u: ys.iter().map(|y| (g1 * y).to_affine()).collect(),
        u1b: (g2 * y1t).to_affine(),
        u2b: (g2 * y2t).to_affine(),
        ub: ys.iter().map(|y| (g2 * y).to_affine()).collect(),
        z: ID_BLOCKS as u32,
        l: BLOCK_BITS,
    };
    let master = MasterSecret((h * alpha).to_affine());
    (params, master)
}

/// Derive the signing secret bound to `identity` under the given root.
pub fn extract(identity: &str, params: &PublicParams, master: &MasterSecret) -> IdentitySecret {
    let mut rng = OsRng;
    let id_blocks = hash_blocks(identity, params.u.len());
    let r = Scalar::random(&mut rng);

    let mut q = params.u1t.to_curve();
    for (u_i, k_i) in params.u.iter().zip(&id_blocks) {
        q += u_i.to_curve() * k_i;
    }

    IdentitySecret {
        k1: (master.0.to_curve() + q * r).to_affine(),
        k2: (-(params.g1.to_curve() * r)).to_affine(),
    }
}

/// Sign `msg` under an identity secret. The identity binding is implicit in
/// the key; verifiers supply the identity string.
pub fn sign(msg: &[u8], params: &PublicParams, key: &IdentitySecret) -> Signature {
    let mut rng = OsRng;
    let msg_blocks = message_blocks(msg, params.u.len());
    let s = Scalar::random(&mut rng);

    let mut q = params.u2t.to_curve();
    for (u_i, m_i) in params.u.iter().zip(&msg_blocks) {
        q += u_i.to_curve() * m_i;
    }

    Signature {
        s1: (key.k1.to_curve() + q * s).to_affine(),
        s2: key.k2,
        s3: (-(params.g1.to_curve() * s)).to_affine(),
    }
}

/// Check `sig` over `msg` for the signer claiming `identity`. Never errors;
/// any mismatch of root, identity, or message yields `false`.
pub fn verify(params: &PublicParams, identity: &str, msg: &[u8], sig: &Signature) -> bool {
    let id_blocks = hash_blocks(identity, params.u.len());
    let msg_blocks = message_blocks(msg, params.u.len());

    let mut q_id = params.u1b.to_curve();
    for (u_i, k_i) in params.ub.iter().zip(&id_blocks) {
        q_id += u_i.to_curve() * k_i;
    }
    let mut q_msg = params.u2b.to_curve();
    for (u_i, m_i) in params.ub.iter().zip(&msg_blocks) {
        q_msg += u_i.to_curve() * m_i;
    }

    let lhs = pairing(&sig.s1, &params.g2)
        + pairing(&sig.s2, &q_id.to_affine())
        + pairing(&sig.s3, &q_msg.to_affine());
    lhs == pairing(&params.h, &params.a)
}

/// Binary payloads are hashed through their base64 ASCII rendering; both
/// ends of the wire must agree on this.
fn message_blocks(msg: &[u8], blocks: usize) -> Vec<Scalar> {
    hash_blocks(&base64::encode(msg), blocks)
}

fn hash_blocks(input: &str, blocks: usize) -> Vec<Scalar> {
    let digest = Sha256::digest(input.as_bytes());
    digest
        .chunks((BLOCK_BITS / 8) as usize)
        .take(blocks)
        .map(|chunk| {
            let mut block = [0u8; 4];
            block.copy_from_slice(chunk);
            Scalar::from(u32::from_be_bytes(block) as u64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::de::DeserializeOwned;
    use uuid::Uuid;

    fn json_serde<T: Serialize + DeserializeOwned>(value: &T) -> T {
        serde_json::from_str(&serde_json::to_string(value).unwrap()).unwrap()
    }

    #[test]
    fn sign_verify_roundtrip() {
        let (params, master) = setup();
        let identity = Uuid::new_v4().to_string();
        let key = extract(&identity, &params, &master);

        let msg = b"position report";
        let sig = sign(msg, &params, &key);
        assert!(verify(&params, &identity, msg, &sig));
    }

    #[test]
    fn cross_product_of_roots_identities_and_messages() {
        // Generate signatures for each combination of identity, message,
        // and root key, pass everything through JSON serde, then check that
        // exactly the signing triple verifies.
        let identities = [Uuid::new_v4().to_string(), "janedoe@email.com".to_string()];
        let msgs: [&[u8]; 2] = [
            b"\x4d\x48\xac\xe0\x88\xe9\x07\x16\xc5\x12\x19\x76\x5c\x0d\x36\x78",
            b"this is a message!",
        ];
        let roots = [setup(), setup()];

        let mut signatures = Vec::new();
        for (ri, (params, master)) in roots.iter().enumerate() {
            for (ii, identity) in identities.iter().enumerate() {
                let key = json_serde(&extract(identity, params, master));
                for (mi, msg) in msgs.iter().enumerate() {
                    let sig = json_serde(&sign(msg, params, &key));
                    signatures.push((ri, ii, mi, sig));
                }
            }
        }

        for (ri, ii, mi, sig) in &signatures {
            for (tri, (params, _)) in roots.iter().enumerate() {
                let params = json_serde(params);
                for (tii, identity) in identities.iter().enumerate() {
                    for (tmi, msg) in msgs.iter().enumerate() {
                        let expected = (*ri, *ii, *mi) == (tri, tii, tmi);
                        assert_eq!(verify(&params, identity, msg, sig), expected);
                    }
                }
            }
        }
    }

    #[test]
    fn signature_bytes_roundtrip() {
        let (params, master) = setup();
        let key = extract("aircraft-1", &params, &master);
        let sig = sign(b"payload", &params, &key);

        let bytes = sig.to_bytes();
        assert_eq!(bytes.len(), SIGNATURE_LENGTH);
        let restored = Signature::from_bytes(&bytes).unwrap();
        assert_eq!(sig, restored);
    }

    #[test]
    fn signature_from_bytes_rejects_garbage() {
        assert!(matches!(
            Signature::from_bytes(&[0u8; 10]),
            Err(WatersError::InvalidLength { .. })
        ));
        // All-0xff is not a valid compressed point.
        assert!(matches!(
            Signature::from_bytes(&[0xffu8; SIGNATURE_LENGTH]),
            Err(WatersError::MalformedElement)
        ));
    }

    #[test]
    fn fresh_setup_samples_fresh_params() {
        let (a, _) = setup();
        let (b, _) = setup();
        assert_ne!(a, b);
    }
}
