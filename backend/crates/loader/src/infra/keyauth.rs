//! KeyAuth License Authority Client
//!
//! JSON-over-POST client for the KeyAuth API. An application session is
//! opened lazily with an `init` call and reused until KeyAuth reports it
//! invalid; the call is then retried once on a fresh session.

use crate::domain::repository::{AuthorityVerdict, LicenseAuthority};
use crate::error::{LoaderError, LoaderResult};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::RwLock;

/// KeyAuth connection settings
#[derive(Debug, Clone)]
pub struct KeyAuthConfig {
    pub api_url: String,
    pub owner_id: String,
    pub app_name: String,
    pub timeout: Duration,
}

impl Default for KeyAuthConfig {
    fn default() -> Self {
        Self {
            api_url: "https://keyauth.win/api/1.2/".to_string(),
            owner_id: String::new(),
            app_name: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KeyAuthResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sessionid: Option<String>,
    #[serde(default)]
    info: Option<KeyAuthUserInfo>,
}

#[derive(Debug, Deserialize)]
struct KeyAuthUserInfo {
    username: String,
    #[serde(default)]
    subscriptions: Vec<KeyAuthSubscription>,
}

#[derive(Debug, Deserialize)]
struct KeyAuthSubscription {
    subscription: String,
}

impl KeyAuthResponse {
    /// KeyAuth answers a dead or unknown application session with a plain
    /// failure whose message names the session
    fn is_session_invalid(&self) -> bool {
        !self.success
            && self
                .message
                .as_deref()
                .is_some_and(|m| m.to_ascii_lowercase().contains("session"))
    }

    fn into_verdict(self) -> AuthorityVerdict {
        let message = self.message.unwrap_or_default();
        if !self.success {
            return AuthorityVerdict::denied(message);
        }
        let (user_id, license_id) = match self.info {
            Some(info) => (
                Some(info.username),
                info.subscriptions.into_iter().next().map(|s| s.subscription),
            ),
            None => (None, None),
        };
        AuthorityVerdict {
            success: true,
            message,
            user_id,
            license_id,
        }
    }
}

pub struct KeyAuthClient {
    http: reqwest::Client,
    config: KeyAuthConfig,
    session_id: RwLock<Option<String>>,
}

impl KeyAuthClient {
    pub fn new(config: KeyAuthConfig) -> LoaderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LoaderError::Internal(format!("http client: {e}")))?;
        Ok(Self {
            http,
            config,
            session_id: RwLock::new(None),
        })
    }

    async fn post(&self, body: serde_json::Value) -> LoaderResult<KeyAuthResponse> {
        let response = self
            .http
            .post(&self.config.api_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LoaderError::TransientUnavailable(format!("license authority: {e}")))?;

        if !response.status().is_success() {
            return Err(LoaderError::TransientUnavailable(format!(
                "license authority returned status: {}",
                response.status()
            )));
        }

        response
            .json::<KeyAuthResponse>()
            .await
            .map_err(|e| LoaderError::TransientUnavailable(format!("license authority body: {e}")))
    }

    async fn init(&self) -> LoaderResult<String> {
        let response = self
            .post(json!({
                "type": "init",
                "name": self.config.app_name,
                "ownerid": self.config.owner_id,
            }))
            .await?;

        match (response.success, response.sessionid) {
            (true, Some(session_id)) => {
                tracing::info!("License authority session initialized");
                Ok(session_id)
            }
            _ => {
                tracing::error!(
                    message = ?response.message,
                    "License authority session initialization failed"
                );
                Err(LoaderError::TransientUnavailable(
                    "license authority init rejected".into(),
                ))
            }
        }
    }

    /// Current session id, opening one if none is cached
    async fn session(&self) -> LoaderResult<String> {
        if let Some(id) = self.session_id.read().await.as_ref() {
            return Ok(id.clone());
        }

        let mut slot = self.session_id.write().await;
        // Another caller may have initialized while we waited
        if let Some(id) = slot.as_ref() {
            return Ok(id.clone());
        }
        let id = self.init().await?;
        *slot = Some(id.clone());
        Ok(id)
    }

    /// Drop `stale` from the cache unless someone already replaced it
    async fn invalidate(&self, stale: &str) {
        let mut slot = self.session_id.write().await;
        if slot.as_deref() == Some(stale) {
            *slot = None;
        }
    }

    /// Send a session-bound request, renewing the session once if KeyAuth
    /// no longer recognizes it
    async fn call<F>(&self, build: F) -> LoaderResult<KeyAuthResponse>
    where
        F: Fn(&str) -> serde_json::Value,
    {
        let session_id = self.session().await?;
        let response = self.post(build(&session_id)).await?;
        if !response.is_session_invalid() {
            return Ok(response);
        }

        tracing::warn!(
            message = ?response.message,
            "License authority session rejected, reinitializing"
        );
        self.invalidate(&session_id).await;

        let session_id = self.session().await?;
        let response = self.post(build(&session_id)).await?;
        if response.is_session_invalid() {
            return Err(LoaderError::TransientUnavailable(
                "license authority session rejected after renewal".into(),
            ));
        }
        Ok(response)
    }
}

impl LicenseAuthority for KeyAuthClient {
    async fn verify(
        &self,
        username: &str,
        password: &str,
        hwid: &str,
    ) -> LoaderResult<AuthorityVerdict> {
        let response = self
            .call(|session_id| {
                json!({
                    "type": "login",
                    "username": username,
                    "pass": password,
                    "hwid": hwid,
                    "sessionid": session_id,
                    "name": self.config.app_name,
                    "ownerid": self.config.owner_id,
                })
            })
            .await?;
        Ok(response.into_verdict())
    }

    async fn verify_license(&self, license_key: &str, hwid: &str) -> LoaderResult<AuthorityVerdict> {
        let response = self
            .call(|session_id| {
                json!({
                    "type": "license",
                    "key": license_key,
                    "hwid": hwid,
                    "sessionid": session_id,
                    "name": self.config.app_name,
                    "ownerid": self.config.owner_id,
                })
            })
            .await?;
        Ok(response.into_verdict())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Local KeyAuth stand-in. Session ids are `s1`, `s2`, ... in init order;
    /// logins on a session listed in `dead` are answered as KeyAuth does for
    /// an expired session.
    struct FakeKeyAuth {
        inits: AtomicUsize,
        logins: AtomicUsize,
        dead: Vec<&'static str>,
    }

    async fn fake_endpoint(
        State(fake): State<Arc<FakeKeyAuth>>,
        Json(body): Json<serde_json::Value>,
    ) -> Json<serde_json::Value> {
        match body["type"].as_str() {
            Some("init") => {
                let n = fake.inits.fetch_add(1, Ordering::SeqCst) + 1;
                Json(json!({ "success": true, "sessionid": format!("s{n}") }))
            }
            _ => {
                fake.logins.fetch_add(1, Ordering::SeqCst);
                let session = body["sessionid"].as_str().unwrap_or_default();
                if fake.dead.iter().any(|dead| *dead == session) {
                    Json(json!({ "success": false, "message": "Session not found." }))
                } else {
                    Json(json!({
                        "success": true,
                        "message": "Logged in!",
                        "info": { "username": "alice", "subscriptions": [{ "subscription": "premium" }] }
                    }))
                }
            }
        }
    }

    async fn spawn_fake(dead: Vec<&'static str>) -> (KeyAuthClient, Arc<FakeKeyAuth>) {
        let fake = Arc::new(FakeKeyAuth {
            inits: AtomicUsize::new(0),
            logins: AtomicUsize::new(0),
            dead,
        });
        let app = Router::new()
            .route("/", post(fake_endpoint))
            .with_state(fake.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = KeyAuthClient::new(KeyAuthConfig {
            api_url: format!("http://{addr}/"),
            ..Default::default()
        })
        .unwrap();
        (client, fake)
    }

    #[tokio::test]
    async fn test_session_reused_across_calls() {
        let (client, fake) = spawn_fake(vec![]).await;

        assert!(client.verify("alice", "pw", "hwid").await.unwrap().success);
        assert!(client.verify_license("KEY", "hwid").await.unwrap().success);

        assert_eq!(fake.inits.load(Ordering::SeqCst), 1);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_session_renewed_once() {
        let (client, fake) = spawn_fake(vec!["s1"]).await;

        let verdict = client.verify("alice", "pw", "hwid").await.unwrap();

        assert!(verdict.success);
        assert_eq!(verdict.user_id.as_deref(), Some("alice"));
        assert_eq!(fake.inits.load(Ordering::SeqCst), 2);
        assert_eq!(fake.logins.load(Ordering::SeqCst), 2);

        // The renewed session is the one cached
        client.verify("alice", "pw", "hwid").await.unwrap();
        assert_eq!(fake.inits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_session_still_rejected_after_renewal_is_transient() {
        let (client, fake) = spawn_fake(vec!["s1", "s2"]).await;

        let result = client.verify("alice", "pw", "hwid").await;

        assert!(matches!(result, Err(LoaderError::TransientUnavailable(_))));
        assert_eq!(fake.inits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_session_invalid_detection() {
        let expired: KeyAuthResponse =
            serde_json::from_str(r#"{"success": false, "message": "Invalid session ID"}"#).unwrap();
        let wrong_password: KeyAuthResponse =
            serde_json::from_str(r#"{"success": false, "message": "Invalid password"}"#).unwrap();

        assert!(expired.is_session_invalid());
        assert!(!wrong_password.is_session_invalid());
    }

    #[test]
    fn test_successful_login_verdict() {
        let body = r#"{
            "success": true,
            "message": "Logged in!",
            "info": {
                "username": "alice",
                "subscriptions": [{"subscription": "premium", "expiry": "1900000000"}],
                "ip": "1.2.3.4"
            }
        }"#;
        let verdict = serde_json::from_str::<KeyAuthResponse>(body)
            .unwrap()
            .into_verdict();

        assert!(verdict.success);
        assert_eq!(verdict.user_id.as_deref(), Some("alice"));
        assert_eq!(verdict.license_id.as_deref(), Some("premium"));
    }

    #[test]
    fn test_rejected_login_verdict() {
        let body = r#"{"success": false, "message": "Invalid password"}"#;
        let verdict = serde_json::from_str::<KeyAuthResponse>(body)
            .unwrap()
            .into_verdict();

        assert_eq!(verdict, AuthorityVerdict::denied("Invalid password"));
    }

    #[tokio::test]
    async fn test_unreachable_authority_is_transient() {
        let client = KeyAuthClient::new(KeyAuthConfig {
            api_url: "http://127.0.0.1:9/".into(),
            timeout: Duration::from_millis(500),
            ..Default::default()
        })
        .unwrap();

        let result = client.verify("alice", "pw", "hwid").await;
        assert!(matches!(result, Err(LoaderError::TransientUnavailable(_))));
    }
}
