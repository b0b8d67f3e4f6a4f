//! Credential issuance.
//!
//! The authority maintains two rolling key-epoch families (conventional
//! token-signing keys and identity-based root keys) and converts
//! authorization requests into pre-signed tokens plus extracted identity
//! signing keys covering the requested window.

pub mod store;

use crate::config::Settings;
use crate::types::geo::{BBox, GeoError};
use crate::types::time::TimeError;
use crate::types::token::{Token, TokenPayload};
use chrono::{DateTime, Duration, Utc};
use squawk_crypto::{ed25519, waters};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub use store::{Authorization, RootKeyEpoch, SigningKeyRow, Store, TokenKeyEpoch, TokenRow};

/// Wall-clock source for epoch anchoring and grant timestamps. Injected so
/// tests can freeze it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A settable clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IssuanceError {
    #[error("Expiration must be after NBF")]
    NbfAfterExp,
    #[error(transparent)]
    Coordinates(#[from] GeoError),
    #[error("authorization for gufi already exists")]
    DuplicateAuthorization,
    #[error("token keys do not cover time range")]
    NoTokenKeyCoverage,
    #[error("root keys do not cover time range")]
    NoRootKeyCoverage,
    #[error("Authorization not found")]
    AuthorizationNotFound,
    #[error("Key not found")]
    KeyNotFound,
    #[error(transparent)]
    Time(#[from] TimeError),
}

#[derive(Clone, Copy, Debug, serde::Deserialize, serde::Serialize)]
pub struct AuthorizationRequest {
    pub gufi: Uuid,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub bbox: BBox,
}

pub struct Authority {
    store: Store,
    clock: Arc<dyn Clock>,
}

impl Authority {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            store: Store::new(),
            clock,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    fn key_interval(&self) -> Duration {
        Settings::global().key_interval()
    }

    fn key_expiration_buffer(&self) -> Duration {
        Settings::global().key_expiration_buffer()
    }

    /// Anchor for a fresh epoch family: the current wall clock quantized
    /// down to the key interval (relative to the Unix epoch).
    fn fresh_anchor(&self) -> DateTime<Utc> {
        let now = self.clock.now();
        let interval_ms = self.key_interval().num_milliseconds();
        now - Duration::milliseconds(now.timestamp_millis().rem_euclid(interval_ms))
    }

    /// Windows for the epochs extending a family out to `horizon` from
    /// `anchor`: one per key interval, each expiration padded by the
    /// overlap buffer.
    fn epoch_windows(
        &self,
        anchor: DateTime<Utc>,
        horizon: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        if horizon <= anchor {
            return Vec::new();
        }
        let interval = self.key_interval();
        let buffer = self.key_expiration_buffer();
        let span_ms = (horizon - anchor).num_milliseconds();
        let interval_ms = interval.num_milliseconds();
        let count = (span_ms + interval_ms - 1) / interval_ms + 1;
        (0..count)
            .map(|i| {
                let nbf = anchor + interval * i as i32;
                (nbf, nbf + interval + buffer)
            })
            .collect()
    }

    /// Extend the token key family so its last epoch expires at or after
    /// `horizon`. No-op when already covered; the generated batch commits
    /// atomically.
    pub fn add_token_epochs(&self, horizon: DateTime<Utc>) {
        let anchor = match self.store.last_token_key_window() {
            None => self.fresh_anchor(),
            Some((last_nbf, last_exp)) if last_exp < horizon => last_nbf + self.key_interval(),
            Some(_) => return,
        };
        let batch = self
            .epoch_windows(anchor, horizon)
            .into_iter()
            .map(|(nbf, exp)| (nbf, exp, ed25519::Keys::generate()))
            .collect();
        self.store.append_token_keys(batch);
    }

    pub fn add_root_epochs(&self, horizon: DateTime<Utc>) {
        let anchor = match self.store.last_root_key_window() {
            None => self.fresh_anchor(),
            Some((last_nbf, last_exp)) if last_exp < horizon => last_nbf + self.key_interval(),
            Some(_) => return,
        };
        let batch = self
            .epoch_windows(anchor, horizon)
            .into_iter()
            .map(|(nbf, exp)| {
                let (params, master) = waters::setup();
                (nbf, exp, params, master)
            })
            .collect();
        self.store.append_root_keys(batch);
    }

    /// Token key epochs covering `[start, end)`: overlap is strict on both
    /// ends, result ascends by `nbf`, and the last epoch must outlive `end`.
    pub fn choose_token_keys(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Arc<TokenKeyEpoch>>, IssuanceError> {
        let keys = self.store.token_keys_overlapping(start, end);
        let covered = keys.last().map_or(false, |last| last.exp >= end);
        if !covered {
            return Err(IssuanceError::NoTokenKeyCoverage);
        }
        Ok(keys)
    }

    pub fn choose_root_keys(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Arc<RootKeyEpoch>>, IssuanceError> {
        let keys = self.store.root_keys_overlapping(start, end);
        let covered = keys.last().map_or(false, |last| last.exp >= end);
        if !covered {
            return Err(IssuanceError::NoRootKeyCoverage);
        }
        Ok(keys)
    }

    /// Grant an authorization: extend both epoch families over the
    /// requested window, mint one token per covering token key epoch and
    /// one identity signing key per covering root key epoch, and commit the
    /// result atomically.
    pub fn authorize(
        &self,
        request: &AuthorizationRequest,
        operator_id: u32,
    ) -> Result<Authorization, IssuanceError> {
        if request.exp <= request.nbf {
            return Err(IssuanceError::NbfAfterExp);
        }
        request.bbox.validate()?;
        if self.store.contains_authorization(request.gufi) {
            return Err(IssuanceError::DuplicateAuthorization);
        }

        self.add_token_epochs(request.exp);
        self.add_root_epochs(request.exp);

        let tokens = self
            .choose_token_keys(request.nbf, request.exp)?
            .iter()
            .map(|key| mint_token(request, key))
            .collect::<Result<Vec<_>, _>>()?;

        let identity = request.gufi.to_string();
        let signing_keys = self
            .choose_root_keys(request.nbf, request.exp)?
            .iter()
            .map(|key| SigningKeyRow {
                kid: key.kid,
                secret: waters::extract(&identity, &key.params, &key.master),
            })
            .collect();

        let authorization = Authorization {
            gufi: request.gufi,
            operator_id,
            nbf: request.nbf,
            exp: request.exp,
            bbox: request.bbox,
            granted: self.clock.now(),
            tokens,
            signing_keys,
        };
        self.store
            .insert_authorization(authorization.clone())
            .map_err(|_| IssuanceError::DuplicateAuthorization)?;
        Ok(authorization)
    }
}

impl Default for Authority {
    fn default() -> Self {
        Self::new()
    }
}

fn mint_token(
    request: &AuthorizationRequest,
    key: &TokenKeyEpoch,
) -> Result<TokenRow, IssuanceError> {
    let payload = TokenPayload {
        gufi: request.gufi,
        nbf: request.nbf.max(key.nbf),
        exp: request.exp.min(key.exp),
        bbox: request.bbox,
    };
    let packed_payload = payload.pack()?;
    let token = Token {
        payload,
        kid: key.kid,
        signature: key.keys.sign(&packed_payload),
    };
    Ok(TokenRow {
        kid: key.kid,
        nbf: payload.nbf,
        exp: payload.exp,
        value: token.pack()?.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::time::min_datetime;

    fn frozen_authority(now: DateTime<Utc>) -> Authority {
        Authority::with_clock(Arc::new(ManualClock::new(now)))
    }

    // An on-interval instant well past the time epoch.
    fn anchor_time() -> DateTime<Utc> {
        min_datetime() + Duration::days(30)
    }

    fn request(nbf: DateTime<Utc>, exp: DateTime<Utc>) -> AuthorizationRequest {
        AuthorizationRequest {
            gufi: Uuid::new_v4(),
            nbf,
            exp,
            bbox: BBox::from((-71.79, 41.945, -70.57, 42.725)),
        }
    }

    #[test]
    fn fresh_family_anchors_on_quantized_wall_clock() {
        let now = anchor_time() + Duration::minutes(2);
        let authority = frozen_authority(now);

        authority.add_token_epochs(now + Duration::minutes(10));
        let keys = authority.store().token_keys_page(None, None, 0, 100);
        assert!(!keys.is_empty());
        assert_eq!(keys[0].nbf, anchor_time());
        assert_eq!(
            keys[0].exp,
            anchor_time() + Duration::minutes(5) + Duration::milliseconds(500)
        );
        // Consecutive epochs step by the interval and overlap by the buffer.
        for pair in keys.windows(2) {
            assert_eq!(pair[1].nbf, pair[0].nbf + Duration::minutes(5));
        }
        assert!(keys.last().unwrap().exp >= now + Duration::minutes(10));
    }

    #[test]
    fn covered_horizon_is_a_no_op() {
        let now = anchor_time();
        let authority = frozen_authority(now);
        authority.add_token_epochs(now + Duration::minutes(10));
        let before = authority.store().token_keys_page(None, None, 0, 100).len();

        authority.add_token_epochs(now + Duration::minutes(1));
        let after = authority.store().token_keys_page(None, None, 0, 100).len();
        assert_eq!(before, after);
    }

    #[test]
    fn extension_anchors_one_interval_past_the_last_epoch() {
        let now = anchor_time();
        let authority = frozen_authority(now);
        authority.add_token_epochs(now + Duration::minutes(6));
        let last_nbf = authority
            .store()
            .token_keys_page(None, None, 0, 100)
            .last()
            .unwrap()
            .nbf;

        authority.add_token_epochs(now + Duration::minutes(30));
        let keys = authority.store().token_keys_page(None, None, 0, 100);
        let first_new = keys.iter().find(|key| key.nbf > last_nbf).unwrap();
        assert_eq!(first_new.nbf, last_nbf + Duration::minutes(5));
        assert!(keys.last().unwrap().exp >= now + Duration::minutes(30));
    }

    #[test]
    fn choose_fails_without_coverage() {
        let now = anchor_time();
        let authority = frozen_authority(now);
        assert!(matches!(
            authority.choose_token_keys(now, now + Duration::minutes(5)),
            Err(IssuanceError::NoTokenKeyCoverage)
        ));

        authority.add_token_epochs(now + Duration::minutes(5));
        // Beyond the last epoch's expiration.
        assert!(matches!(
            authority.choose_token_keys(now, now + Duration::hours(2)),
            Err(IssuanceError::NoTokenKeyCoverage)
        ));
    }

    #[test]
    fn authorize_mints_clamped_sorted_tokens() {
        let now = anchor_time() + Duration::minutes(1);
        let authority = frozen_authority(now);
        let request = request(now, now + Duration::minutes(10));
        let authorization = authority.authorize(&request, 1).unwrap();

        // A ten-minute window over five-minute epochs needs at least three
        // credentials per family.
        assert!(authorization.tokens.len() >= 3);
        assert!(authorization.signing_keys.len() >= 3);

        let mut previous_nbf = None;
        for row in &authorization.tokens {
            let token = Token::unpack(&row.value).unwrap();
            let key = authority.store().token_key(row.kid).unwrap();
            assert_eq!(token.payload.nbf, request.nbf.max(key.nbf));
            assert_eq!(token.payload.exp, request.exp.min(key.exp));
            assert!(token.payload.exp > token.payload.nbf);
            assert!(ed25519::verify(
                key.keys.public_key(),
                &token.payload.pack().unwrap(),
                &token.signature
            ));
            if let Some(previous) = previous_nbf {
                assert!(token.payload.nbf >= previous);
            }
            previous_nbf = Some(token.payload.nbf);
        }

        for row in &authorization.signing_keys {
            let root = authority.store().root_key(row.kid).unwrap();
            let sig = waters::sign(b"probe", &root.params, &row.secret);
            assert!(waters::verify(
                &root.params,
                &request.gufi.to_string(),
                b"probe",
                &sig
            ));
        }
    }

    #[test]
    fn authorize_rejects_bad_requests() {
        let now = anchor_time();
        let authority = frozen_authority(now);

        let zero_length = request(now, now);
        assert!(matches!(
            authority.authorize(&zero_length, 1),
            Err(IssuanceError::NbfAfterExp)
        ));

        let mut bad_box = request(now, now + Duration::minutes(5));
        bad_box.bbox = BBox::from((-40.0, -91.0, -30.0, 40.0));
        assert!(matches!(
            authority.authorize(&bad_box, 1),
            Err(IssuanceError::Coordinates(GeoError::LatitudeRange))
        ));

        let first = request(now, now + Duration::minutes(5));
        authority.authorize(&first, 1).unwrap();
        assert!(matches!(
            authority.authorize(&first, 1),
            Err(IssuanceError::DuplicateAuthorization)
        ));
    }
}
