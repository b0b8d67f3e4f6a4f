//! In-process backing store for the authority.
//!
//! The relational layer proper is an external collaborator; this module
//! keeps its interface shape: keyed entities, overlap queries ordered by
//! `nbf`, a uniqueness constraint on gufi, and atomic multi-row commits
//! under one lock.

use crate::types::geo::BBox;
use chrono::{DateTime, Utc};
use squawk_crypto::{ed25519, waters};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct Operator {
    pub id: u32,
    pub name: String,
    pub email: String,
    pub address: String,
    pub phone: String,
}

/// One conventional key epoch. The secret half signs token payloads and
/// never leaves the authority.
#[derive(Debug)]
pub struct TokenKeyEpoch {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub keys: ed25519::Keys,
}

/// One identity-based root key epoch.
#[derive(Debug)]
pub struct RootKeyEpoch {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub params: waters::PublicParams,
    pub master: waters::MasterSecret,
}

/// A minted token row: the packed wire bytes plus its window and the key
/// epoch that signed it.
#[derive(Clone, Debug)]
pub struct TokenRow {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub value: Vec<u8>,
}

/// An extracted identity signing key row, tied to its root key epoch.
#[derive(Clone, Debug)]
pub struct SigningKeyRow {
    pub kid: u32,
    pub secret: waters::IdentitySecret,
}

#[derive(Clone, Debug)]
pub struct Authorization {
    pub gufi: Uuid,
    pub operator_id: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub bbox: BBox,
    pub granted: DateTime<Utc>,
    pub tokens: Vec<TokenRow>,
    pub signing_keys: Vec<SigningKeyRow>,
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("authorization for gufi already exists")]
    DuplicateGufi,
}

#[derive(Default)]
struct Inner {
    operators: BTreeMap<u32, Operator>,
    authorizations: BTreeMap<Uuid, Authorization>,
    token_keys: Vec<Arc<TokenKeyEpoch>>,
    root_keys: Vec<Arc<RootKeyEpoch>>,
    next_operator_id: u32,
    next_token_kid: u32,
    next_root_kid: u32,
}

#[derive(Default)]
pub struct Store {
    inner: Mutex<Inner>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // Entity data cannot be poisoned into an inconsistent state: every
        // write happens through a single commit call.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The well-known operator that grants proof-of-concept requests,
    /// seeded on first use.
    pub fn default_operator(&self) -> Operator {
        let mut inner = self.lock();
        if let Some(operator) = inner.operators.values().next() {
            return operator.clone();
        }
        let id = inner.next_operator_id + 1;
        inner.next_operator_id = id;
        let operator = Operator {
            id,
            name: "jane doe".to_string(),
            email: "jane.doe@future.v2v".to_string(),
            address: "99 foo bar rd".to_string(),
            phone: "999-999-9999".to_string(),
        };
        inner.operators.insert(id, operator.clone());
        operator
    }

    pub fn operators(&self, skip: usize, limit: usize) -> Vec<Operator> {
        self.lock()
            .operators
            .values()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn operator(&self, id: u32) -> Option<Operator> {
        self.lock().operators.get(&id).cloned()
    }

    pub fn authorizations(&self, skip: usize, limit: usize) -> Vec<Authorization> {
        self.lock()
            .authorizations
            .values()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn authorization(&self, gufi: Uuid) -> Option<Authorization> {
        self.lock().authorizations.get(&gufi).cloned()
    }

    pub fn contains_authorization(&self, gufi: Uuid) -> bool {
        self.lock().authorizations.contains_key(&gufi)
    }

    /// Commit an authorization with all its tokens and signing keys. The
    /// gufi uniqueness constraint resolves concurrent issuance races.
    pub fn insert_authorization(&self, authorization: Authorization) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.authorizations.contains_key(&authorization.gufi) {
            return Err(StoreError::DuplicateGufi);
        }
        inner
            .authorizations
            .insert(authorization.gufi, authorization);
        Ok(())
    }

    /// Window of the token key epoch with the greatest `exp`, if any.
    pub fn last_token_key_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let inner = self.lock();
        inner
            .token_keys
            .iter()
            .max_by_key(|key| key.exp)
            .map(|key| (key.nbf, key.exp))
    }

    pub fn last_root_key_window(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let inner = self.lock();
        inner
            .root_keys
            .iter()
            .max_by_key(|key| key.exp)
            .map(|key| (key.nbf, key.exp))
    }

    /// Assign kids and commit a freshly generated batch of token key epochs
    /// in one transaction.
    pub fn append_token_keys(
        &self,
        batch: Vec<(DateTime<Utc>, DateTime<Utc>, ed25519::Keys)>,
    ) -> Vec<Arc<TokenKeyEpoch>> {
        let mut inner = self.lock();
        let mut appended = Vec::with_capacity(batch.len());
        for (nbf, exp, keys) in batch {
            let kid = inner.next_token_kid + 1;
            inner.next_token_kid = kid;
            let epoch = Arc::new(TokenKeyEpoch {
                kid,
                nbf,
                exp,
                keys,
            });
            inner.token_keys.push(epoch.clone());
            appended.push(epoch);
        }
        appended
    }

    pub fn append_root_keys(
        &self,
        batch: Vec<(
            DateTime<Utc>,
            DateTime<Utc>,
            waters::PublicParams,
            waters::MasterSecret,
        )>,
    ) -> Vec<Arc<RootKeyEpoch>> {
        let mut inner = self.lock();
        let mut appended = Vec::with_capacity(batch.len());
        for (nbf, exp, params, master) in batch {
            let kid = inner.next_root_kid + 1;
            inner.next_root_kid = kid;
            let epoch = Arc::new(RootKeyEpoch {
                kid,
                nbf,
                exp,
                params,
                master,
            });
            inner.root_keys.push(epoch.clone());
            appended.push(epoch);
        }
        appended
    }

    /// Token key epochs with `exp > start` and `nbf < end` (strict on both
    /// ends), ascending by `nbf`.
    pub fn token_keys_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Arc<TokenKeyEpoch>> {
        let inner = self.lock();
        let mut keys: Vec<_> = inner
            .token_keys
            .iter()
            .filter(|key| key.exp > start && key.nbf < end)
            .cloned()
            .collect();
        keys.sort_by_key(|key| key.nbf);
        keys
    }

    pub fn root_keys_overlapping(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<Arc<RootKeyEpoch>> {
        let inner = self.lock();
        let mut keys: Vec<_> = inner
            .root_keys
            .iter()
            .filter(|key| key.exp > start && key.nbf < end)
            .cloned()
            .collect();
        keys.sort_by_key(|key| key.nbf);
        keys
    }

    /// Paged key listing with optional window filters, for the key
    /// distribution endpoints.
    pub fn token_keys_page(
        &self,
        nbf: Option<DateTime<Utc>>,
        exp: Option<DateTime<Utc>>,
        skip: usize,
        limit: usize,
    ) -> Vec<Arc<TokenKeyEpoch>> {
        let inner = self.lock();
        inner
            .token_keys
            .iter()
            .filter(|key| nbf.map_or(true, |nbf| key.exp > nbf))
            .filter(|key| exp.map_or(true, |exp| key.nbf < exp))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn root_keys_page(
        &self,
        nbf: Option<DateTime<Utc>>,
        exp: Option<DateTime<Utc>>,
        skip: usize,
        limit: usize,
    ) -> Vec<Arc<RootKeyEpoch>> {
        let inner = self.lock();
        inner
            .root_keys
            .iter()
            .filter(|key| nbf.map_or(true, |nbf| key.exp > nbf))
            .filter(|key| exp.map_or(true, |exp| key.nbf < exp))
            .skip(skip)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn token_key(&self, kid: u32) -> Option<Arc<TokenKeyEpoch>> {
        self.lock()
            .token_keys
            .iter()
            .find(|key| key.kid == kid)
            .cloned()
    }

    pub fn root_key(&self, kid: u32) -> Option<Arc<RootKeyEpoch>> {
        self.lock()
            .root_keys
            .iter()
            .find(|key| key.kid == kid)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn minute(n: i64) -> DateTime<Utc> {
        crate::types::time::min_datetime() + Duration::minutes(n)
    }

    #[test]
    fn default_operator_is_seeded_once() {
        let store = Store::new();
        let first = store.default_operator();
        let second = store.default_operator();
        assert_eq!(first.id, second.id);
        assert_eq!(store.operators(0, 100).len(), 1);
    }

    #[test]
    fn kids_are_assigned_monotonically_per_family() {
        let store = Store::new();
        let token_keys = store.append_token_keys(vec![
            (minute(0), minute(5), ed25519::Keys::generate()),
            (minute(5), minute(10), ed25519::Keys::generate()),
        ]);
        assert_eq!(
            token_keys.iter().map(|k| k.kid).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let (params, master) = waters::setup();
        let root_keys = store.append_root_keys(vec![(minute(0), minute(5), params, master)]);
        assert_eq!(root_keys[0].kid, 1);
    }

    #[test]
    fn overlap_query_is_strict_and_sorted() {
        let store = Store::new();
        store.append_token_keys(vec![
            (minute(0), minute(5), ed25519::Keys::generate()),
            (minute(5), minute(10), ed25519::Keys::generate()),
            (minute(10), minute(15), ed25519::Keys::generate()),
        ]);

        // exp == start excluded; nbf == end excluded.
        let chosen = store.token_keys_overlapping(minute(5), minute(10));
        assert_eq!(chosen.iter().map(|k| k.kid).collect::<Vec<_>>(), vec![2]);

        let chosen = store.token_keys_overlapping(minute(1), minute(11));
        assert_eq!(
            chosen.iter().map(|k| k.kid).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn duplicate_gufi_is_rejected() {
        let store = Store::new();
        let operator = store.default_operator();
        let authorization = Authorization {
            gufi: Uuid::new_v4(),
            operator_id: operator.id,
            nbf: minute(0),
            exp: minute(10),
            bbox: BBox::from((-71.79, 41.945, -70.57, 42.725)),
            granted: minute(0),
            tokens: vec![],
            signing_keys: vec![],
        };
        store.insert_authorization(authorization.clone()).unwrap();
        assert_eq!(
            store.insert_authorization(authorization),
            Err(StoreError::DuplicateGufi)
        );
    }
}
