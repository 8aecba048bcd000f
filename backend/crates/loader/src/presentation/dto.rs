//! API DTOs (Data Transfer Objects)

use crate::application::admit_device::AdmissionDecision;
use crate::domain::value_objects::{AutoFlagAction, FingerprintComponents};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request for POST /api/loader/handshake
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeRequest {
    pub device_fingerprint: String,
}

/// Response for POST /api/loader/handshake
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakeResponse {
    pub session_id: Uuid,
    pub challenge: String,
    pub public_key: String,
}

/// Request for POST /api/loader/challenge-response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponseRequest {
    pub session_id: Uuid,
    pub signed_challenge: String,
    pub client_public_key: String,
}

/// Response for POST /api/loader/challenge-response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponseResponse {
    pub session_token: String,
    pub encrypted_session_key: String,
    /// Session expiry, unix milliseconds
    pub expires_at: i64,
}

/// Body of every session-bound request: AES-256-GCM under the session key,
/// hex encoded, tag detached
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedRequest {
    pub encrypted_payload: String,
    pub iv: String,
    pub tag: String,
}

/// Request for POST /api/loader/login
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
    pub components: FingerprintComponents,
    #[serde(default)]
    pub geo_location: Option<String>,
}

/// Response for POST /api/loader/login
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub user_id: String,
    pub decision: AdmissionDecision,
    pub similarity: f64,
    pub risk_score: u8,
    pub action: AutoFlagAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_type: Option<&'static str>,
}

/// Request for POST /api/loader/heartbeat
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    pub components: FingerprintComponents,
    #[serde(default)]
    pub geo_location: Option<String>,
}

/// Response for POST /api/loader/heartbeat
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub decision: AdmissionDecision,
    pub risk_score: u8,
    pub action: AutoFlagAction,
    pub expires_at: i64,
}

/// Response for POST /api/loader/verify
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub valid: bool,
    pub user_id: Option<String>,
    pub license_id: Option<String>,
    pub expires_at: i64,
    pub last_heartbeat: Option<i64>,
}

/// Request for POST /api/loader/license
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseRequest {
    pub license_key: String,
    pub components: FingerprintComponents,
}

/// Response for POST /api/loader/license
#[derive(Debug, Clone, Serialize)]
pub struct LicenseResponse {
    pub success: bool,
    pub message: String,
}
