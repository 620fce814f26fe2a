//! HTTP handlers: the eight operations of the loyalty API.
//!
//! Handlers translate requests into cache-layer calls and map outcomes
//! through [`ApiError`]; nothing below this layer knows about HTTP.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use super::types::{Credentials, OrderView, WithdrawRequest};
use crate::auth::{auth_cookie, password_hash, AuthUser, AUTH_COOKIE, JWT_COOKIE};
use crate::luhn;
use crate::models::{Order, User};
use crate::store::Saved;

type JsonBody<T> = Result<Json<T>, JsonRejection>;

/// 200 response carrying the token in the `Authorization` header and in
/// both auth cookies.
fn authorized(state: &AppState, user_id: Uuid) -> Result<Response, ApiError> {
    let token = state.auth.mint(user_id).map_err(|e| {
        tracing::error!("cannot mint token: {e:#}");
        ApiError::Internal
    })?;

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();

    let value = |s: String| HeaderValue::from_str(&s).map_err(|_| ApiError::Internal);
    headers.insert(header::AUTHORIZATION, value(token.clone())?);
    headers.append(header::SET_COOKIE, value(auth_cookie(AUTH_COOKIE, &token))?);
    headers.append(header::SET_COOKIE, value(auth_cookie(JWT_COOKIE, &token))?);

    Ok(response)
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/api/user/register",
    request_body = Credentials,
    responses(
        (status = 200, description = "Registered; token set in header and cookies"),
        (status = 400, description = "Missing field or malformed body"),
        (status = 409, description = "Login already taken"),
        (status = 500, description = "Internal error")
    ),
    tag = "auth"
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    body: JsonBody<Credentials>,
) -> Result<Response, ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest("malformed request body"))?;
    if creds.login.is_empty() || creds.password.is_empty() {
        return Err(ApiError::BadRequest("login and password are required"));
    }

    let user = User {
        id: Uuid::new_v4(),
        email: creds.login.clone(),
        hash: password_hash(&creds.login, &creds.password),
        name: creds.name,
    };

    let saved = state.cache.insert_user(user).await?;
    if saved.is_existing() {
        return Err(ApiError::LoginTaken);
    }

    tracing::info!(login = %creds.login, "user registered");
    authorized(&state, saved.row().id)
}

/// Log an existing user in
#[utoipa::path(
    post,
    path = "/api/user/login",
    request_body = Credentials,
    responses(
        (status = 200, description = "Authenticated; token set in header and cookies"),
        (status = 400, description = "Malformed body"),
        (status = 401, description = "Unknown login or wrong password"),
        (status = 500, description = "Internal error")
    ),
    tag = "auth"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    body: JsonBody<Credentials>,
) -> Result<Response, ApiError> {
    let Json(creds) = body.map_err(|_| ApiError::BadRequest("malformed request body"))?;

    let user = state.cache.user(&creds.login).ok_or(ApiError::Unauthorized)?;
    if user.hash != password_hash(&creds.login, &creds.password) {
        return Err(ApiError::Unauthorized);
    }

    authorized(&state, user.id)
}

/// Upload an order number
#[utoipa::path(
    post,
    path = "/api/user/orders",
    request_body(content = String, content_type = "text/plain"),
    responses(
        (status = 200, description = "Already uploaded by this user"),
        (status = 202, description = "Accepted for accrual processing"),
        (status = 400, description = "Body is not a decimal number"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Uploaded by another user"),
        (status = 422, description = "Checksum verification failed"),
        (status = 500, description = "Internal error")
    ),
    tag = "orders"
)]
pub async fn submit_order(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let number = body.trim();
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ApiError::BadRequest("order number must be a decimal number"));
    }
    if !luhn::is_valid(number) {
        return Err(ApiError::InvalidNumber);
    }

    match state.cache.insert_order(Order::new(number, user_id)).await? {
        Saved::Fresh(_) => {
            tracing::info!(number, "order accepted");
            Ok(StatusCode::ACCEPTED)
        }
        Saved::Existing(existing) if existing.user_id == user_id => Ok(StatusCode::OK),
        Saved::Existing(_) => Err(ApiError::ForeignOrder),
    }
}

/// List the user's orders, newest first
#[utoipa::path(
    get,
    path = "/api/user/orders",
    responses(
        (status = 200, description = "Order listing", body = [OrderView]),
        (status = 204, description = "No orders uploaded yet"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal error")
    ),
    tag = "orders"
)]
pub async fn list_orders(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Response {
    let orders = state.cache.user_orders(user_id);
    if orders.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let views: Vec<OrderView> = orders.iter().map(OrderView::from).collect();
    Json(views).into_response()
}

/// Current balance and total withdrawn
#[utoipa::path(
    get,
    path = "/api/user/balance",
    responses(
        (status = 200, description = "Balance", body = crate::models::BalanceSummary),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal error")
    ),
    tag = "balance"
)]
pub async fn balance(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let summary = state.cache.balance(user_id).await?;
    Ok(Json(summary).into_response())
}

/// Spend points against a future order
#[utoipa::path(
    post,
    path = "/api/user/balance/withdraw",
    request_body = WithdrawRequest,
    responses(
        (status = 200, description = "Withdrawal recorded"),
        (status = 400, description = "Malformed body or non-positive sum"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient balance"),
        (status = 422, description = "Checksum verification failed"),
        (status = 500, description = "Internal error")
    ),
    tag = "balance"
)]
pub async fn withdraw(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
    body: JsonBody<WithdrawRequest>,
) -> Result<StatusCode, ApiError> {
    let Json(req) = body.map_err(|_| ApiError::BadRequest("malformed request body"))?;

    if req.sum <= Decimal::ZERO {
        return Err(ApiError::BadRequest("withdrawal sum must be positive"));
    }
    if !luhn::is_valid(&req.order) {
        return Err(ApiError::InvalidNumber);
    }

    state.cache.withdraw(user_id, &req.order, req.sum).await?;
    tracing::info!(order = %req.order, "withdrawal recorded");
    Ok(StatusCode::OK)
}

/// List the user's withdrawals, oldest first
#[utoipa::path(
    get,
    path = "/api/user/withdrawals",
    responses(
        (status = 200, description = "Withdrawal listing", body = [crate::models::WithdrawalRecord]),
        (status = 204, description = "No withdrawals yet"),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal error")
    ),
    tag = "balance"
)]
pub async fn list_withdrawals(
    State(state): State<Arc<AppState>>,
    Extension(AuthUser(user_id)): Extension<AuthUser>,
) -> Result<Response, ApiError> {
    let withdrawals = state.cache.withdrawals(user_id).await?;
    if withdrawals.is_empty() {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Ok(Json(withdrawals).into_response())
}

/// Readiness probe: verifies store connectivity
#[utoipa::path(
    get,
    path = "/ping",
    responses(
        (status = 200, description = "Store reachable"),
        (status = 500, description = "Store unreachable")
    ),
    tag = "ops"
)]
pub async fn ping(State(state): State<Arc<AppState>>) -> StatusCode {
    if state.cache.ping().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
