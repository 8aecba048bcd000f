//! Session Tokens
//!
//! Opaque token = `<session uuid>.<hex HMAC-SHA256(secret, uuid)>`.
//! The MAC rejects forgeries before any store lookup; the session row
//! decides whether the token is still live.

use crate::error::{LoaderError, LoaderResult};
use kernel::id::LoaderSessionId;
use platform::crypto::CryptoProvider;
use uuid::Uuid;

/// Create a signed session token
pub fn create_session_token(
    crypto: &CryptoProvider,
    session_id: &LoaderSessionId,
    secret: &[u8],
) -> LoaderResult<String> {
    let id = session_id.to_string();
    let mac = crypto.hmac_sign(id.as_bytes(), secret)?;
    Ok(format!("{id}.{mac}"))
}

/// Verify a session token and recover the session id
pub fn verify_session_token(
    crypto: &CryptoProvider,
    token: &str,
    secret: &[u8],
) -> LoaderResult<LoaderSessionId> {
    let (id, mac) = token
        .split_once('.')
        .ok_or(LoaderError::InvalidSessionToken)?;

    if !crypto.hmac_verify(id.as_bytes(), mac, secret) {
        return Err(LoaderError::InvalidSessionToken);
    }

    let uuid = Uuid::parse_str(id).map_err(|_| LoaderError::InvalidSessionToken)?;
    Ok(LoaderSessionId::from_uuid(uuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    static CRYPTO: LazyLock<CryptoProvider> =
        LazyLock::new(|| CryptoProvider::generate().unwrap());

    const SECRET: [u8; 32] = [7u8; 32];

    #[test]
    fn test_token_verifies_to_same_session() {
        let id = LoaderSessionId::new();
        let token = create_session_token(&CRYPTO, &id, &SECRET).unwrap();
        assert_eq!(verify_session_token(&CRYPTO, &token, &SECRET).unwrap(), id);
    }

    #[test]
    fn test_token_rejected_under_other_secret() {
        let token = create_session_token(&CRYPTO, &LoaderSessionId::new(), &SECRET).unwrap();
        assert!(matches!(
            verify_session_token(&CRYPTO, &token, &[8u8; 32]),
            Err(LoaderError::InvalidSessionToken)
        ));
    }

    #[test]
    fn test_token_tampered_or_truncated() {
        let id = LoaderSessionId::new();
        let token = create_session_token(&CRYPTO, &id, &SECRET).unwrap();
        let (_, mac) = token.split_once('.').unwrap();

        // Someone else's id under this token's MAC
        let swapped = format!("{}.{mac}", LoaderSessionId::new());
        assert!(verify_session_token(&CRYPTO, &swapped, &SECRET).is_err());

        assert!(verify_session_token(&CRYPTO, &token[..token.len() - 2], &SECRET).is_err());
        assert!(verify_session_token(&CRYPTO, &id.to_string(), &SECRET).is_err());
        assert!(verify_session_token(&CRYPTO, "not a token", &SECRET).is_err());
    }
}
