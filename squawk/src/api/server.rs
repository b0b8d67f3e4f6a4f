//! The authority's HTTP surface.
//!
//! Thin glue over [`crate::authority`]: request bodies and responses are
//! the types in [`crate::api::types`], and issuance errors map onto status
//! codes (422 domain rejection, 409 conflict, 404 lookup).

use crate::api::types::{
    AuthorizationDetails, LoadSet, MessageKeyRecord, OperatorInfo, PrivilegedAuthorizationDetails,
    TokenKeyRecord,
};
use crate::authority::{Authority, AuthorizationRequest, IssuanceError};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use uuid::Uuid;

pub fn router(authority: Arc<Authority>) -> Router {
    Router::new()
        .route("/operators", get(get_operators))
        .route("/operator/:id", get(get_operator))
        .route("/authorizations", get(get_authorizations))
        .route("/authorization/:gufi", get(get_authorization))
        .route("/authorization", post(post_authorization))
        .route("/token_keys", get(get_token_keys))
        .route("/token_key/:kid", get(get_token_key))
        .route("/message_keys", get(get_message_keys))
        .route("/message_key/:kid", get(get_message_key))
        .route("/loadset/:gufi", get(get_loadset))
        .with_state(authority)
}

pub async fn serve(listen: SocketAddr, authority: Arc<Authority>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    info!("authority listening on {}", listener.local_addr()?);
    axum::serve(listener, router(authority)).await?;
    Ok(())
}

struct ApiError(IssuanceError);

impl From<IssuanceError> for ApiError {
    fn from(err: IssuanceError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            IssuanceError::NbfAfterExp
            | IssuanceError::Coordinates(_)
            | IssuanceError::Time(_) => StatusCode::UNPROCESSABLE_ENTITY,
            IssuanceError::DuplicateAuthorization => StatusCode::CONFLICT,
            IssuanceError::AuthorizationNotFound | IssuanceError::KeyNotFound => {
                StatusCode::NOT_FOUND
            }
            IssuanceError::NoTokenKeyCoverage | IssuanceError::NoRootKeyCoverage => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    privileged: bool,
}

#[derive(Debug, Deserialize)]
struct KeyQuery {
    #[serde(default)]
    skip: usize,
    #[serde(default = "default_limit")]
    limit: usize,
    nbf: Option<DateTime<Utc>>,
    exp: Option<DateTime<Utc>>,
}

fn default_limit() -> usize {
    100
}

#[derive(Serialize)]
#[serde(untagged)]
enum AuthorizationView {
    Privileged(PrivilegedAuthorizationDetails),
    Public(AuthorizationDetails),
}

fn authorization_view(
    authority: &Authority,
    authorization: &crate::authority::Authorization,
    privileged: bool,
) -> AuthorizationView {
    if privileged {
        let operator = authority
            .store()
            .operator(authorization.operator_id)
            .map(|operator| OperatorInfo::from(&operator))
            .unwrap_or_else(|| OperatorInfo {
                name: String::new(),
                email: String::new(),
                address: String::new(),
                phone: String::new(),
            });
        AuthorizationView::Privileged(PrivilegedAuthorizationDetails {
            details: AuthorizationDetails::from(authorization),
            operator,
        })
    } else {
        AuthorizationView::Public(AuthorizationDetails::from(authorization))
    }
}

async fn get_operators(
    State(authority): State<Arc<Authority>>,
    Query(page): Query<PageQuery>,
) -> Json<Vec<OperatorInfo>> {
    let operators = authority
        .store()
        .operators(page.skip, page.limit)
        .iter()
        .map(OperatorInfo::from)
        .collect();
    Json(operators)
}

async fn get_operator(
    State(authority): State<Arc<Authority>>,
    Path(id): Path<u32>,
) -> Result<Json<OperatorInfo>, ApiError> {
    let operator = authority
        .store()
        .operator(id)
        .ok_or(IssuanceError::KeyNotFound)?;
    Ok(Json(OperatorInfo::from(&operator)))
}

async fn get_authorizations(
    State(authority): State<Arc<Authority>>,
    Query(page): Query<PageQuery>,
) -> Json<Vec<AuthorizationView>> {
    let views = authority
        .store()
        .authorizations(page.skip, page.limit)
        .iter()
        .map(|authorization| authorization_view(&authority, authorization, page.privileged))
        .collect();
    Json(views)
}

async fn get_authorization(
    State(authority): State<Arc<Authority>>,
    Path(gufi): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<Json<AuthorizationView>, ApiError> {
    let authorization = authority
        .store()
        .authorization(gufi)
        .ok_or(IssuanceError::AuthorizationNotFound)?;
    Ok(Json(authorization_view(
        &authority,
        &authorization,
        page.privileged,
    )))
}

async fn post_authorization(
    State(authority): State<Arc<Authority>>,
    Json(request): Json<AuthorizationRequest>,
) -> Result<Json<LoadSet>, ApiError> {
    let operator = authority.store().default_operator();
    authority.authorize(&request, operator.id)?;
    load_set(&authority, request.gufi).map(Json)
}

async fn get_token_keys(
    State(authority): State<Arc<Authority>>,
    Query(query): Query<KeyQuery>,
) -> Json<Vec<TokenKeyRecord>> {
    let keys = authority
        .store()
        .token_keys_page(query.nbf, query.exp, query.skip, query.limit)
        .iter()
        .map(|epoch| TokenKeyRecord::from(epoch.as_ref()))
        .collect();
    Json(keys)
}

async fn get_token_key(
    State(authority): State<Arc<Authority>>,
    Path(kid): Path<u32>,
) -> Result<Json<TokenKeyRecord>, ApiError> {
    let epoch = authority
        .store()
        .token_key(kid)
        .ok_or(IssuanceError::KeyNotFound)?;
    Ok(Json(TokenKeyRecord::from(epoch.as_ref())))
}

async fn get_message_keys(
    State(authority): State<Arc<Authority>>,
    Query(query): Query<KeyQuery>,
) -> Json<Vec<MessageKeyRecord>> {
    let keys = authority
        .store()
        .root_keys_page(query.nbf, query.exp, query.skip, query.limit)
        .iter()
        .map(|epoch| MessageKeyRecord::from(epoch.as_ref()))
        .collect();
    Json(keys)
}

async fn get_message_key(
    State(authority): State<Arc<Authority>>,
    Path(kid): Path<u32>,
) -> Result<Json<MessageKeyRecord>, ApiError> {
    let epoch = authority
        .store()
        .root_key(kid)
        .ok_or(IssuanceError::KeyNotFound)?;
    Ok(Json(MessageKeyRecord::from(epoch.as_ref())))
}

async fn get_loadset(
    State(authority): State<Arc<Authority>>,
    Path(gufi): Path<Uuid>,
) -> Result<Json<LoadSet>, ApiError> {
    load_set(&authority, gufi).map(Json)
}

fn load_set(authority: &Authority, gufi: Uuid) -> Result<LoadSet, ApiError> {
    let authorization = authority
        .store()
        .authorization(gufi)
        .ok_or(IssuanceError::AuthorizationNotFound)?;
    let token_keys = authority
        .store()
        .token_keys_overlapping(authorization.nbf, authorization.exp);
    let root_keys = authority
        .store()
        .root_keys_overlapping(authorization.nbf, authorization.exp);
    Ok(LoadSet::assemble(&authorization, &token_keys, &root_keys))
}
