//! Transceiver applications.
//!
//! [`Baseline`] periodically broadcasts signed state reports and validates
//! everything it hears. [`BlackHat`] never originates state: it validates
//! captured peer messages, forges a fresh payload inside the captured
//! token's bounds, and re-emits the message unsigned. That replay is what
//! the validation pipeline must defeat.

use crate::api::types::{LoadSet, MessageKeyRecord, TokenKeyRecord};
use crate::config::Settings;
use crate::transceiver::nav::{NavSource, RandomNav};
use crate::transceiver::{Application, ReceivedDatagram};
use crate::types::geo::GeoError;
use crate::types::message::Message;
use crate::types::state::StateUpdate;
use crate::types::time::TimeError;
use crate::types::token::Token;
use crate::types::UnpackError;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, error, info, warn};
use squawk_crypto::{ed25519, waters};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use uuid::Uuid;

/// Verification half of a conventional key epoch, as loaded on a vehicle.
pub struct TokenKey {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub public_key: ed25519_dalek::PublicKey,
}

/// Verification half of a root key epoch.
pub struct MessageKey {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub params: waters::PublicParams,
}

/// An identity signing key bound to this vehicle's gufi. Window and public
/// parameters are inherited from the matching message key.
pub struct SigningKey {
    pub kid: u32,
    pub nbf: DateTime<Utc>,
    pub exp: DateTime<Utc>,
    pub identity: String,
    pub params: waters::PublicParams,
    pub secret: waters::IdentitySecret,
}

#[derive(Debug, thiserror::Error)]
pub enum LoadSetError {
    #[error("no message key found for signing key {kid}")]
    MissingMessageKey { kid: u32 },
    #[error("load set token failed to unpack: {0}")]
    Token(#[from] UnpackError),
    #[error("load set token key is malformed: {0}")]
    TokenKey(#[from] ed25519::KeyError),
    #[error("load set field is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum AssembleError {
    #[error("no valid signing key found in loadset")]
    NoValidSigningKey,
    #[error("no valid token found in loadset")]
    NoValidToken,
    #[error(transparent)]
    Pack(#[from] TimeError),
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("message key {kid} not found in load set")]
    NoMessageKey { kid: u32 },
    #[error("message key expired")]
    MessageKeyExpired,
    #[error("message key not yet valid")]
    MessageKeyNotYetValid,
    #[error("token key {kid} not found in load set")]
    NoTokenKey { kid: u32 },
    #[error("token key expired")]
    TokenKeyExpired,
    #[error("token key not yet valid")]
    TokenKeyNotYetValid,
    #[error("token expired")]
    TokenExpired,
    #[error("token not yet valid")]
    TokenNotYetValid,
    #[error("token spatial bounds exceeded")]
    TokenSpatialBoundsExceeded,
    #[error("token signature invalid")]
    TokenSignatureInvalid,
    #[error("message signature invalid")]
    MessageSignatureInvalid,
    #[error(transparent)]
    Coordinates(#[from] GeoError),
    #[error(transparent)]
    Pack(#[from] TimeError),
}

/// What the consume path did with one datagram.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Disposition {
    /// Our own broadcast came back around; discarded before validation.
    SelfEcho,
    Rejected,
    Sighted,
}

/// The public key material shared by both application roles.
pub struct Keyring {
    pub token_keys: HashMap<u32, TokenKey>,
    pub message_keys: HashMap<u32, MessageKey>,
}

impl Keyring {
    pub fn build(
        token_keys: &[TokenKeyRecord],
        message_keys: &[MessageKeyRecord],
    ) -> Result<Self, LoadSetError> {
        let token_keys = token_keys
            .iter()
            .map(|record| {
                let bytes = base64::decode(&record.value)?;
                Ok((
                    record.kid,
                    TokenKey {
                        kid: record.kid,
                        nbf: record.nbf,
                        exp: record.exp,
                        public_key: ed25519::public_key_from_bytes(&bytes)?,
                    },
                ))
            })
            .collect::<Result<HashMap<_, _>, LoadSetError>>()?;
        let message_keys = message_keys
            .iter()
            .map(|record| {
                (
                    record.kid,
                    MessageKey {
                        kid: record.kid,
                        nbf: record.nbf,
                        exp: record.exp,
                        params: record.value.clone(),
                    },
                )
            })
            .collect();
        Ok(Self {
            token_keys,
            message_keys,
        })
    }
}

/// Join each signing key in a load set to its message key (same kid),
/// inheriting that key's window and public parameters. A signing key
/// without its message key fails the whole load set.
pub fn bind_signing_keys(
    load_set: &LoadSet,
    keyring: &Keyring,
) -> Result<Vec<SigningKey>, LoadSetError> {
    let identity = load_set.gufi.to_string();
    load_set
        .signing_keys
        .iter()
        .map(|record| {
            let message_key = keyring
                .message_keys
                .get(&record.kid)
                .ok_or(LoadSetError::MissingMessageKey { kid: record.kid })?;
            Ok(SigningKey {
                kid: record.kid,
                nbf: message_key.nbf,
                exp: message_key.exp,
                identity: identity.clone(),
                params: message_key.params.clone(),
                secret: record.value.clone(),
            })
        })
        .collect()
}

/// Fixed-size pool for CPU-bound crypto work. Sign and verify never run on
/// the I/O tasks.
#[derive(Clone)]
pub struct ComputePool {
    semaphore: Arc<Semaphore>,
}

impl ComputePool {
    pub fn new(workers: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Run `f` on a blocking worker and await its result.
    pub async fn run<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let result = tokio::task::spawn_blocking(move || {
            let result = f();
            drop(permit);
            result
        })
        .await?;
        Ok(result)
    }

    /// Hand `f` to a worker without awaiting its completion. Waits only for
    /// a free worker slot.
    pub async fn submit<F>(&self, f: F) -> anyhow::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let _detached = tokio::task::spawn_blocking(move || {
            f();
            drop(permit);
        });
        Ok(())
    }
}

/// First token whose window strictly contains `now`.
pub fn choose_token(tokens: &[Token], now: DateTime<Utc>) -> Result<&Token, AssembleError> {
    tokens
        .iter()
        .find(|token| token.payload.exp > now && token.payload.nbf < now)
        .ok_or(AssembleError::NoValidToken)
}

/// First signing key whose window strictly contains `now`.
pub fn choose_signing_key(
    keys: &[SigningKey],
    now: DateTime<Utc>,
) -> Result<&SigningKey, AssembleError> {
    keys.iter()
        .find(|key| key.exp > now && key.nbf < now)
        .ok_or(AssembleError::NoValidSigningKey)
}

/// Build a broadcast message: pick the active signing key and token, then
/// sign the packed state payload under this vehicle's identity.
pub fn assemble_msg(
    signing_keys: &[SigningKey],
    tokens: &[Token],
    payload: StateUpdate,
    now: DateTime<Utc>,
) -> Result<Message, AssembleError> {
    let signing_key = choose_signing_key(signing_keys, now)?;
    let token = choose_token(tokens, now)?;
    let signature = waters::sign(&payload.pack(), &signing_key.params, &signing_key.secret);
    Ok(Message {
        token: token.clone(),
        kid: signing_key.kid,
        payload,
        signature,
    })
}

/// The ordered validation pipeline. `loc` is the receiver's own
/// `(longitude, latitude)`; the first failed check is reported.
pub fn validate_msg(
    message_keys: &HashMap<u32, MessageKey>,
    token_keys: &HashMap<u32, TokenKey>,
    msg: &Message,
    time: DateTime<Utc>,
    loc: (f32, f32),
) -> Result<(), ValidationError> {
    let message_key = message_keys
        .get(&msg.kid)
        .ok_or(ValidationError::NoMessageKey { kid: msg.kid })?;
    if time > message_key.exp {
        return Err(ValidationError::MessageKeyExpired);
    }
    if time < message_key.nbf {
        return Err(ValidationError::MessageKeyNotYetValid);
    }

    let token_key = token_keys
        .get(&msg.token.kid)
        .ok_or(ValidationError::NoTokenKey { kid: msg.token.kid })?;
    if time > token_key.exp {
        return Err(ValidationError::TokenKeyExpired);
    }
    if time < token_key.nbf {
        return Err(ValidationError::TokenKeyNotYetValid);
    }

    let payload = &msg.token.payload;
    if time > payload.exp {
        return Err(ValidationError::TokenExpired);
    }
    if time < payload.nbf {
        return Err(ValidationError::TokenNotYetValid);
    }
    if !payload.bbox.contains(loc.0, loc.1)? {
        return Err(ValidationError::TokenSpatialBoundsExceeded);
    }

    if !ed25519::verify(
        &token_key.public_key,
        &payload.pack()?,
        &msg.token.signature,
    ) {
        return Err(ValidationError::TokenSignatureInvalid);
    }

    if !waters::verify(
        &message_key.params,
        &payload.gufi.to_string(),
        &msg.payload.pack(),
        &msg.signature,
    ) {
        return Err(ValidationError::MessageSignatureInvalid);
    }

    Ok(())
}

/// The broadcasting role.
pub struct Baseline {
    gufi: Uuid,
    tokens: Arc<Vec<Token>>,
    signing_keys: Arc<Vec<SigningKey>>,
    keyring: Arc<Keyring>,
    nav: Arc<dyn NavSource>,
    pool: ComputePool,
    receive: mpsc::Receiver<ReceivedDatagram>,
    transmit: mpsc::Sender<Vec<u8>>,
    broadcast_period: std::time::Duration,
}

impl Baseline {
    pub fn new(
        load_set: &LoadSet,
        nav: Arc<dyn NavSource>,
        receive: mpsc::Receiver<ReceivedDatagram>,
        transmit: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self, LoadSetError> {
        let settings = Settings::global();
        let keyring = Keyring::build(&load_set.token_keys, &load_set.message_keys)?;

        let tokens = load_set
            .tokens
            .iter()
            .map(|record| Token::unpack(record.value.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let signing_keys = bind_signing_keys(load_set, &keyring)?;

        Ok(Self {
            gufi: load_set.gufi,
            tokens: Arc::new(tokens),
            signing_keys: Arc::new(signing_keys),
            keyring: Arc::new(keyring),
            nav,
            pool: ComputePool::new(settings.num_threads),
            receive,
            transmit,
            broadcast_period: settings.broadcast_period(),
        })
    }
}

impl Application for Baseline {
    async fn run(self) -> anyhow::Result<()> {
        let Baseline {
            gufi,
            tokens,
            signing_keys,
            keyring,
            nav,
            pool,
            receive,
            transmit,
            broadcast_period,
        } = self;
        futures::try_join!(
            produce(
                signing_keys,
                tokens,
                nav.clone(),
                pool.clone(),
                transmit,
                broadcast_period,
            ),
            consume(receive, keyring, gufi, nav, pool),
        )?;
        Ok(())
    }
}

async fn produce(
    signing_keys: Arc<Vec<SigningKey>>,
    tokens: Arc<Vec<Token>>,
    nav: Arc<dyn NavSource>,
    pool: ComputePool,
    transmit: mpsc::Sender<Vec<u8>>,
    period: std::time::Duration,
) -> anyhow::Result<()> {
    loop {
        let started = tokio::time::Instant::now();
        let toa = Utc::now();
        let payload = nav.get_state(toa);

        let signing_keys = signing_keys.clone();
        let tokens = tokens.clone();
        let message = pool
            .run(move || assemble_msg(&signing_keys, &tokens, payload, toa))
            .await??;

        if transmit.try_send(message.pack()?.to_vec()).is_err() {
            error!("transmit queue full - message dropped");
        }

        match period.checked_sub(started.elapsed()) {
            Some(delay) => tokio::time::sleep(delay).await,
            None => error!("broadcast producer slipping!"),
        }
    }
}

async fn consume(
    mut receive: mpsc::Receiver<ReceivedDatagram>,
    keyring: Arc<Keyring>,
    gufi: Uuid,
    nav: Arc<dyn NavSource>,
    pool: ComputePool,
) -> anyhow::Result<()> {
    while let Some((tomr, data)) = receive.recv().await {
        let keyring = keyring.clone();
        let nav = nav.clone();
        pool.submit(move || {
            receive_one(&keyring, gufi, nav.as_ref(), tomr, &data);
        })
        .await?;
    }
    Ok(())
}

/// Handle one received datagram on a worker: unpack, drop self-echoes
/// before any crypto, validate the rest against our own position at the
/// time of receipt.
pub fn receive_one(
    keyring: &Keyring,
    own_gufi: Uuid,
    nav: &dyn NavSource,
    tomr: DateTime<Utc>,
    data: &[u8],
) -> Disposition {
    let message = match Message::unpack(data) {
        Ok(message) => message,
        Err(err) => {
            warn!("message validation FAILED: {err}");
            return Disposition::Rejected;
        }
    };

    if message.token.payload.gufi == own_gufi {
        debug!("ignoring message from self");
        return Disposition::SelfEcho;
    }
    info!("received message from {}", message.token.payload.gufi);

    let own_state = nav.get_state(tomr);
    let loc = (own_state.lon_deg, own_state.lat_deg);
    match validate_msg(&keyring.message_keys, &keyring.token_keys, &message, tomr, loc) {
        Ok(()) => {
            info!(
                "sighted {} at ({}, {})",
                message.token.payload.gufi, message.payload.lon_deg, message.payload.lat_deg
            );
            Disposition::Sighted
        }
        Err(err) => {
            warn!("message validation FAILED: {err}");
            Disposition::Rejected
        }
    }
}

/// The adversarial role: validate, forge a payload, replay.
pub struct BlackHat {
    keyring: Arc<Keyring>,
    pool: ComputePool,
    receive: mpsc::Receiver<ReceivedDatagram>,
    transmit: mpsc::Sender<Vec<u8>>,
}

impl BlackHat {
    /// The black-hat role carries no credentials of its own; it needs only
    /// the fleet's public keys.
    pub fn new(
        token_keys: &[TokenKeyRecord],
        message_keys: &[MessageKeyRecord],
        receive: mpsc::Receiver<ReceivedDatagram>,
        transmit: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self, LoadSetError> {
        Ok(Self {
            keyring: Arc::new(Keyring::build(token_keys, message_keys)?),
            pool: ComputePool::new(Settings::global().num_threads),
            receive,
            transmit,
        })
    }
}

impl Application for BlackHat {
    async fn run(self) -> anyhow::Result<()> {
        let BlackHat {
            keyring,
            pool,
            mut receive,
            transmit,
        } = self;
        while let Some((tomr, data)) = receive.recv().await {
            let keyring = keyring.clone();
            let transmit = transmit.clone();
            pool.submit(move || {
                if let Some(bytes) = forge_replay(&keyring, tomr, &data) {
                    if transmit.try_send(bytes).is_err() {
                        error!("transmit queue full - message dropped");
                    }
                }
            })
            .await?;
        }
        Ok(())
    }
}

/// Validate a captured message and, if genuine, rebuild its payload with a
/// forged state inside the captured token's bounds at the captured
/// timestamp. The signature is left untouched; the repacked bytes are the
/// replay to transmit.
pub fn forge_replay(keyring: &Keyring, tomr: DateTime<Utc>, data: &[u8]) -> Option<Vec<u8>> {
    let mut message = match Message::unpack(data) {
        Ok(message) => message,
        Err(err) => {
            warn!("message validation FAILED: {err}");
            return None;
        }
    };
    info!("received message from {}", message.token.payload.gufi);

    // Validate from the sender's claimed position: the captured state is
    // the only location estimate this role has.
    let loc = (message.payload.lon_deg, message.payload.lat_deg);
    if let Err(err) = validate_msg(
        &keyring.message_keys,
        &keyring.token_keys,
        &message,
        tomr,
        loc,
    ) {
        warn!("message validation FAILED: {err}.  Not using for replay");
        return None;
    }

    let nav = RandomNav::new(Some(message.token.payload.bbox));
    let toa = Utc
        .timestamp_opt(message.payload.toa_utc as i64, 0)
        .single()
        .unwrap_or(tomr);
    message.payload = nav.get_state(toa);

    match message.pack() {
        Ok(bytes) => Some(bytes.to_vec()),
        Err(err) => {
            warn!("failed to repack replay message: {err}");
            None
        }
    }
}
