//! Access gate in front of every run operation.
//!
//! One predicate, evaluated before any state is touched: a configured
//! skip flag allows everything; otherwise the presented bearer token
//! must exactly match the configured secret. Missing or malformed
//! credentials and wrong tokens are distinct failures, and a missing
//! secret while auth is required fails closed as a server fault.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use tradeflow_core::RunError;

use crate::errors::AppError;
use crate::state::AppState;

pub async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    if state.settings.skip_token_auth {
        return Ok(next.run(request).await);
    }

    let Some(secret) = state.settings.internal_api_token.as_deref() else {
        return Err(RunError::Misconfigured.into());
    };

    let token = extract_bearer_token(&request)?;
    if token != secret {
        return Err(RunError::Forbidden.into());
    }

    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::from(RunError::Unauthenticated))?;

    if !auth_header.starts_with("Bearer ") {
        return Err(RunError::Unauthenticated.into());
    }

    Ok(auth_header[7..].to_string())
}
