//! Loader Router

use crate::domain::repository::{LicenseAuthority, LoaderStore};
use crate::presentation::handlers::{self, LoaderAppState};
use crate::presentation::middleware;
use axum::{Router, middleware::from_fn_with_state, routing::post};

/// Create the loader router
///
/// `/handshake` and `/challenge-response` are open. Every other route needs
/// a live session token and a fresh signed request; bodies are sealed under
/// the session key.
pub fn loader_router<R, A>(state: LoaderAppState<R, A>) -> Router
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let protected = Router::new()
        .route("/login", post(handlers::login::<R, A>))
        .route("/heartbeat", post(handlers::heartbeat::<R, A>))
        .route("/verify", post(handlers::verify))
        .route("/license", post(handlers::activate_license::<R, A>))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_fresh_request::<R, A>,
        ))
        .route_layer(from_fn_with_state(
            state.clone(),
            middleware::require_session::<R, A>,
        ));

    Router::new()
        .route("/handshake", post(handlers::handshake::<R, A>))
        .route(
            "/challenge-response",
            post(handlers::challenge_response::<R, A>),
        )
        .merge(protected)
        .with_state(state)
}
