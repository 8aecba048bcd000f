//! Request Extractors
//!
//! `ClientOrigin` resolves the caller's address the same way for every route.
//! `Sealed<T>` opens a session-bound request body with the session key.

use crate::application::config::LoaderConfig;
use crate::domain::entities::LoaderSession;
use crate::domain::repository::{LicenseAuthority, LoaderStore};
use crate::error::{LoaderError, LoaderResult};
use crate::presentation::dto::SealedRequest;
use crate::presentation::handlers::LoaderAppState;
use axum::Json;
use axum::extract::{ConnectInfo, FromRequest, FromRequestParts, Request};
use axum::http::request::Parts;
use axum::http::{Extensions, HeaderMap};
use platform::client::extract_client_ip;
use platform::crypto::SealedBox;
use serde::de::DeserializeOwned;
use std::net::{IpAddr, SocketAddr};

/// Client address from the TCP peer, or from X-Forwarded-For when the peer
/// is a configured trusted proxy
pub fn resolve_origin(
    extensions: &Extensions,
    headers: &HeaderMap,
    config: &LoaderConfig,
) -> LoaderResult<IpAddr> {
    let peer = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .ok_or_else(|| LoaderError::Protocol("peer address unknown".into()))?;
    Ok(extract_client_ip(headers, peer, &config.trusted_proxies))
}

#[derive(Debug, Clone, Copy)]
pub struct ClientOrigin(pub IpAddr);

impl<R, A> FromRequestParts<LoaderAppState<R, A>> for ClientOrigin
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    type Rejection = LoaderError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &LoaderAppState<R, A>,
    ) -> Result<Self, Self::Rejection> {
        resolve_origin(&parts.extensions, &parts.headers, &state.config).map(ClientOrigin)
    }
}

/// JSON payload decrypted with the caller's session key
///
/// Only valid behind `require_session`. A tag mismatch is rejected as an
/// integrity failure and the payload is never parsed.
#[derive(Debug)]
pub struct Sealed<T>(pub T);

impl<R, A, T> FromRequest<LoaderAppState<R, A>> for Sealed<T>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
    T: DeserializeOwned,
{
    type Rejection = LoaderError;

    async fn from_request(
        req: Request,
        state: &LoaderAppState<R, A>,
    ) -> Result<Self, Self::Rejection> {
        let session = req
            .extensions()
            .get::<LoaderSession>()
            .cloned()
            .ok_or(LoaderError::InvalidSessionToken)?;

        let Json(envelope) = Json::<SealedRequest>::from_request(req, state)
            .await
            .map_err(|e| LoaderError::Protocol(format!("sealed envelope: {}", e.body_text())))?;

        let sealed = SealedBox::from_hex(&envelope.encrypted_payload, &envelope.iv, &envelope.tag)?;
        let plaintext = match state.crypto.aes_decrypt(&session.session_key, &sealed) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::warn!(loader_session_id = %session.id, "Sealed payload failed authentication");
                return Err(e.into());
            }
        };

        serde_json::from_slice(&plaintext)
            .map(Sealed)
            .map_err(|e| LoaderError::Protocol(format!("sealed payload: {e}")))
    }
}
