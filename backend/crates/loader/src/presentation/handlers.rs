//! HTTP Handlers

use crate::application::admit_device::{AdmissionDecision, AdmitDeviceInput, AdmitDeviceUseCase};
use crate::application::config::LoaderConfig;
use crate::application::fingerprint::DeviceFingerprintEngine;
use crate::application::handshake::{CompleteHandshakeInput, HandshakeCoordinator};
use crate::application::login::{LoginInput, LoginUseCase};
use crate::application::replay_guard::ReplayGuard;
use crate::application::risk_scoring::RiskScoringEngine;
use crate::application::session::SessionManager;
use crate::domain::entities::LoaderSession;
use crate::domain::repository::{LicenseAuthority, LoaderStore};
use crate::error::{LoaderError, LoaderResult};
use crate::presentation::dto::{
    ChallengeResponseRequest, ChallengeResponseResponse, HandshakeRequest, HandshakeResponse,
    HeartbeatRequest, HeartbeatResponse, LicenseRequest, LicenseResponse, LoginRequest,
    LoginResponse, VerifyResponse,
};
use crate::presentation::extract::{ClientOrigin, Sealed};
use axum::Json;
use axum::extract::{Extension, State};
use axum::http::HeaderMap;
use kernel::id::HandshakeSessionId;
use platform::client::extract_user_agent;
use platform::crypto::CryptoProvider;
use std::sync::Arc;

/// Longest accepted device fingerprint
const MAX_FINGERPRINT_LEN: usize = 512;

/// Shared state for loader handlers
pub struct LoaderAppState<R, A>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    pub handshake: Arc<HandshakeCoordinator<R>>,
    pub sessions: Arc<SessionManager<R>>,
    pub replay: Arc<ReplayGuard<R>>,
    pub login: Arc<LoginUseCase<A, R, R, R>>,
    pub admit: Arc<AdmitDeviceUseCase<R, R, R>>,
    pub crypto: Arc<CryptoProvider>,
    pub config: Arc<LoaderConfig>,
}

// Manual impl: derive would demand R: Clone and A: Clone
impl<R, A> Clone for LoaderAppState<R, A>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            handshake: self.handshake.clone(),
            sessions: self.sessions.clone(),
            replay: self.replay.clone(),
            login: self.login.clone(),
            admit: self.admit.clone(),
            crypto: self.crypto.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R, A> LoaderAppState<R, A>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    /// Wire every use case over one store and one authority
    pub fn new(
        repo: Arc<R>,
        authority: Arc<A>,
        crypto: Arc<CryptoProvider>,
        config: LoaderConfig,
    ) -> Self {
        let config = Arc::new(config);
        let fingerprints =
            DeviceFingerprintEngine::new(repo.clone(), crypto.clone(), config.clone());
        let risk = RiskScoringEngine::new(repo.clone(), repo.clone(), repo.clone(), config.clone());
        let admit = Arc::new(AdmitDeviceUseCase::new(
            repo.clone(),
            fingerprints,
            risk,
            config.clone(),
        ));

        Self {
            handshake: Arc::new(HandshakeCoordinator::new(
                repo.clone(),
                crypto.clone(),
                config.clone(),
            )),
            sessions: Arc::new(SessionManager::new(
                repo.clone(),
                crypto.clone(),
                config.clone(),
            )),
            replay: Arc::new(ReplayGuard::new(repo.clone(), crypto.clone(), config.clone())),
            login: Arc::new(LoginUseCase::new(
                authority,
                repo,
                admit.clone(),
                config.clone(),
            )),
            admit,
            crypto,
            config,
        }
    }
}

/// POST /api/loader/handshake
pub async fn handshake<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    ClientOrigin(origin): ClientOrigin,
    Json(req): Json<HandshakeRequest>,
) -> LoaderResult<Json<HandshakeResponse>>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let fingerprint = req.device_fingerprint.trim();
    if fingerprint.is_empty() || fingerprint.len() > MAX_FINGERPRINT_LEN {
        return Err(LoaderError::Protocol("invalid device fingerprint".into()));
    }

    let output = state.handshake.initiate(fingerprint, origin).await?;

    Ok(Json(HandshakeResponse {
        session_id: output.session_id.into_uuid(),
        challenge: output.challenge,
        public_key: output.server_public_key,
    }))
}

/// POST /api/loader/challenge-response
pub async fn challenge_response<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    ClientOrigin(origin): ClientOrigin,
    Json(req): Json<ChallengeResponseRequest>,
) -> LoaderResult<Json<ChallengeResponseResponse>>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let input = CompleteHandshakeInput {
        session_id: HandshakeSessionId::from_uuid(req.session_id),
        signed_challenge: req.signed_challenge,
        client_public_key: req.client_public_key,
    };

    let output = state.handshake.complete(input, origin).await?;
    let established = state
        .sessions
        .establish(output.session_key, &output.device_fingerprint, origin)
        .await?;

    Ok(Json(ChallengeResponseResponse {
        session_token: established.token,
        encrypted_session_key: output.encrypted_session_key,
        expires_at: established.session.expires_at_ms,
    }))
}

/// POST /api/loader/login
///
/// An admitted (or challenged) device binds the authority identity to the
/// session; a denied one loses the session.
pub async fn login<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    Extension(session): Extension<LoaderSession>,
    ClientOrigin(origin): ClientOrigin,
    headers: HeaderMap,
    Sealed(req): Sealed<LoginRequest>,
) -> LoaderResult<Json<LoginResponse>>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    tracing::debug!(loader_session_id = %session.id, username = %req.username, "Loader login");

    let output = state
        .login
        .execute(LoginInput {
            username: req.username,
            password: req.password,
            components: req.components,
            source_ip: Some(origin),
            geo_location: req.geo_location,
            user_agent: extract_user_agent(&headers),
        })
        .await?;

    let admission = output.admission;
    if admission.decision == AdmissionDecision::Deny {
        state.sessions.revoke(session.id, "login denied").await?;
    } else {
        state
            .sessions
            .bind_user(session.id, &output.user_id, &output.license_id)
            .await?;
    }

    Ok(Json(LoginResponse {
        user_id: output.user_id,
        decision: admission.decision,
        similarity: admission.similarity.value(),
        risk_score: admission.risk_score.value(),
        action: admission.action,
        vm_type: admission.vm_type,
    }))
}

/// POST /api/loader/heartbeat
///
/// Re-admits the device under the session's identity. A denied device
/// loses the session.
pub async fn heartbeat<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    Extension(session): Extension<LoaderSession>,
    ClientOrigin(origin): ClientOrigin,
    Sealed(req): Sealed<HeartbeatRequest>,
) -> LoaderResult<Json<HeartbeatResponse>>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let (user_id, license_id) = session
        .identity()
        .ok_or_else(|| LoaderError::Protocol("heartbeat before login".into()))?;

    let admission = state
        .admit
        .execute(AdmitDeviceInput {
            user_id: user_id.to_string(),
            license_id: license_id.to_string(),
            components: req.components,
            source_ip: Some(origin),
            geo_location: req.geo_location,
        })
        .await?;

    if admission.decision == AdmissionDecision::Deny {
        state.sessions.revoke(session.id, "heartbeat denied").await?;
    } else {
        state.sessions.record_heartbeat(session.id).await?;
    }

    Ok(Json(HeartbeatResponse {
        decision: admission.decision,
        risk_score: admission.risk_score.value(),
        action: admission.action,
        expires_at: session.expires_at_ms,
    }))
}

/// POST /api/loader/verify
pub async fn verify(Extension(session): Extension<LoaderSession>) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        valid: true,
        user_id: session.user_id,
        license_id: session.license_id,
        expires_at: session.expires_at_ms,
        last_heartbeat: session.last_heartbeat_ms,
    })
}

/// POST /api/loader/license
pub async fn activate_license<R, A>(
    State(state): State<LoaderAppState<R, A>>,
    Sealed(req): Sealed<LicenseRequest>,
) -> LoaderResult<Json<LicenseResponse>>
where
    R: LoaderStore,
    A: LicenseAuthority + Send + Sync + 'static,
{
    let verdict = state
        .login
        .activate_license(&req.license_key, &req.components)
        .await?;

    Ok(Json(LicenseResponse {
        success: verdict.success,
        message: verdict.message,
    }))
}
