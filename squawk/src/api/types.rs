//! REST wire types.
//!
//! Byte-valued fields travel as base64 ASCII inside JSON bodies. Key
//! records expose public halves only; the extracted identity signing keys
//! in a load set are the one sanctioned secret export.

use crate::authority::store::{
    Authorization, Operator, RootKeyEpoch, SigningKeyRow, TokenKeyEpoch, TokenRow,
};
use crate::types::geo::BBox;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squawk_crypto::waters;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OperatorInfo {
    pub name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
}

impl From<&Operator> for OperatorInfo {
    fn from(operator: &Operator) -> Self {
        OperatorInfo {
            name: operator.name.clone(),
            email: operator.email.clone(),
            address: operator.address.clone(),
            phone: operator.phone.clone(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AuthorizationDetails {
    pub gufi: Uuid,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub bbox: BBox,
    pub granted: DateTime<Utc>,
}

impl From<&Authorization> for AuthorizationDetails {
    fn from(authorization: &Authorization) -> Self {
        AuthorizationDetails {
            gufi: authorization.gufi,
            nbf: authorization.nbf,
            exp: authorization.exp,
            bbox: authorization.bbox,
            granted: authorization.granted,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PrivilegedAuthorizationDetails {
    #[serde(flatten)]
    pub details: AuthorizationDetails,
    pub operator: OperatorInfo,
}

/// A minted token: validity window plus the packed 108-byte wire form,
/// base64-transported.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenRecord {
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub value: String,
}

impl From<&TokenRow> for TokenRecord {
    fn from(row: &TokenRow) -> Self {
        TokenRecord {
            nbf: row.nbf,
            exp: row.exp,
            value: base64::encode(&row.value),
        }
    }
}

/// Public half of a conventional key epoch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenKeyRecord {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub value: String,
}

impl From<&TokenKeyEpoch> for TokenKeyRecord {
    fn from(epoch: &TokenKeyEpoch) -> Self {
        TokenKeyRecord {
            kid: epoch.kid,
            nbf: epoch.nbf,
            exp: epoch.exp,
            value: base64::encode(epoch.keys.public_key_bytes()),
        }
    }
}

/// Public parameters of a root key epoch.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MessageKeyRecord {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub value: waters::PublicParams,
}

impl From<&RootKeyEpoch> for MessageKeyRecord {
    fn from(epoch: &RootKeyEpoch) -> Self {
        MessageKeyRecord {
            kid: epoch.kid,
            nbf: epoch.nbf,
            exp: epoch.exp,
            value: epoch.params.clone(),
        }
    }
}

/// An extracted identity signing secret, bound to the root key epoch named
/// by `kid`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SigningKeyRecord {
    pub kid: u32,
    pub value: waters::IdentitySecret,
}

impl From<&SigningKeyRow> for SigningKeyRecord {
    fn from(row: &SigningKeyRow) -> Self {
        SigningKeyRecord {
            kid: row.kid,
            value: row.secret.clone(),
        }
    }
}

/// Everything a vehicle needs to broadcast authentically and validate
/// peers for the duration of its authorization.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoadSet {
    pub gufi: Uuid,
    pub tokens: Vec<TokenRecord>,
    pub token_keys: Vec<TokenKeyRecord>,
    pub signing_keys: Vec<SigningKeyRecord>,
    pub message_keys: Vec<MessageKeyRecord>,
}

impl LoadSet {
    pub fn assemble(
        authorization: &Authorization,
        token_keys: &[Arc<TokenKeyEpoch>],
        root_keys: &[Arc<RootKeyEpoch>],
    ) -> Self {
        LoadSet {
            gufi: authorization.gufi,
            tokens: authorization.tokens.iter().map(TokenRecord::from).collect(),
            token_keys: token_keys
                .iter()
                .map(|epoch| TokenKeyRecord::from(epoch.as_ref()))
                .collect(),
            signing_keys: authorization
                .signing_keys
                .iter()
                .map(SigningKeyRecord::from)
                .collect(),
            message_keys: root_keys
                .iter()
                .map(|epoch| MessageKeyRecord::from(epoch.as_ref()))
                .collect(),
        }
    }
}
