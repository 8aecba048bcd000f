//! Loader Middleware
//!
//! `require_session` admits only callers holding a live session token from
//! the address that negotiated it, and hands the session to the handler.
//! `require_fresh_request` applies the replay guard to the signed request
//! headers and the raw body.

use crate::application::replay_guard::SignedRequest;
use crate::domain::repository::{LicenseAuthority, LoaderStore};
use crate::error::LoaderError;
use crate::presentation::extract::resolve_origin;
use crate::presentation::handlers::LoaderAppState;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use platform::client::extract_bearer;

pub const NONCE_HEADER: &str = "x-loader-nonce";
pub const TIMESTAMP_HEADER: &str = "x-loader-timestamp";
pub const SIGNATURE_HEADER: &str = "x-loader-signature";

/// Largest request body the replay guard will buffer
const MAX_SIGNED_BODY: usize = 64 * 1024;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, LoaderError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| LoaderError::Protocol(format!("missing {name}")))
}

/// Middleware that requires a live session token
pub async fn require_session<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    mut req: Request,
    next: Next,
) -> Result<Response, LoaderError>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let token = extract_bearer(req.headers()).ok_or(LoaderError::InvalidSessionToken)?;
    let origin = resolve_origin(req.extensions(), req.headers(), &state.config)?;
    let session = state.sessions.authenticate(token, origin).await?;
    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Middleware that rejects unsigned, stale and replayed requests
pub async fn require_fresh_request<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    req: Request,
    next: Next,
) -> Result<Response, LoaderError>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let (parts, body) = req.into_parts();

    let nonce = header(&parts.headers, NONCE_HEADER)?.to_string();
    let timestamp_ms: i64 = header(&parts.headers, TIMESTAMP_HEADER)?
        .parse()
        .map_err(|_| LoaderError::Protocol("malformed timestamp".into()))?;
    let signature = header(&parts.headers, SIGNATURE_HEADER)?.to_string();

    let bytes = to_bytes(body, MAX_SIGNED_BODY)
        .await
        .map_err(|_| LoaderError::Protocol("unreadable body".into()))?;

    state
        .replay
        .check_request(SignedRequest {
            nonce: &nonce,
            timestamp_ms,
            signature: &signature,
            body: &bytes,
        })
        .await?;

    let req = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(req).await)
}
