//! Cryptographic Utilities
//!
//! [`CryptoProvider`] owns the process-wide RSA keypair and is the single entry
//! point for every cryptographic primitive the loader backend uses:
//! - RSA-OAEP (SHA-1 MGF, the loader client's padding) encrypt/decrypt
//! - RSA PKCS#1 v1.5 / SHA-256 signatures
//! - AES-256-GCM with detached IV and tag
//! - HMAC-SHA256 with constant-time verification
//! - SHA-256 and OS randomness
//!
//! The keypair is generated once at startup and never written again, so the
//! provider is shared through `Arc` without any locking.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use rand::{RngCore, rngs::OsRng};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

type HmacSha256 = Hmac<Sha256>;

/// Smallest accepted RSA modulus
pub const MIN_RSA_KEY_BITS: usize = 2048;
/// AES-256 key length in bytes
pub const SESSION_KEY_LEN: usize = 32;
/// AES-GCM IV length in bytes (96-bit)
pub const GCM_IV_LEN: usize = 12;
/// AES-GCM tag length in bytes
pub const GCM_TAG_LEN: usize = 16;
/// Handshake challenge length in bytes
pub const CHALLENGE_LEN: usize = 64;
/// Request nonce length in bytes
pub const NONCE_LEN: usize = 32;

/// Errors raised by cryptographic operations
///
/// Variants carry no key material and no partial plaintext.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),

    /// RSA ciphertext could not be decrypted
    #[error("Decryption failed")]
    Decryption,

    #[error("Encryption failed")]
    Encryption,

    /// AEAD tag mismatch or malformed sealed payload
    #[error("Integrity check failed")]
    Integrity,

    #[error("Signature verification failed")]
    SignatureInvalid,
}

/// Generate cryptographically secure random bytes
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Encode bytes as base64
pub fn to_base64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 to bytes
pub fn from_base64(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    general_purpose::STANDARD.decode(s)
}

/// Compute HMAC-SHA256
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<[u8; 32], CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

fn parse_public_key(pem: &str) -> Result<RsaPublicKey, CryptoError> {
    // Loader clients export either SPKI ("PUBLIC KEY") or PKCS#1 ("RSA PUBLIC KEY")
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// AES-256 session key, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

/// Output of authenticated encryption: ciphertext with detached IV and tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBox {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; GCM_IV_LEN],
    pub tag: [u8; GCM_TAG_LEN],
}

impl SealedBox {
    /// Parse the hex wire form `(encrypted, iv, tag)` used by the loader client
    pub fn from_hex(ciphertext: &str, iv: &str, tag: &str) -> Result<Self, CryptoError> {
        let ciphertext =
            hex::decode(ciphertext).map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let mut iv_bytes = [0u8; GCM_IV_LEN];
        hex::decode_to_slice(iv, &mut iv_bytes).map_err(|_| CryptoError::Integrity)?;
        let mut tag_bytes = [0u8; GCM_TAG_LEN];
        hex::decode_to_slice(tag, &mut tag_bytes).map_err(|_| CryptoError::Integrity)?;
        Ok(Self {
            ciphertext,
            iv: iv_bytes,
            tag: tag_bytes,
        })
    }

    /// Hex wire form `(encrypted, iv, tag)`
    pub fn to_hex(&self) -> (String, String, String) {
        (
            hex::encode(&self.ciphertext),
            hex::encode(self.iv),
            hex::encode(self.tag),
        )
    }
}

/// Process-wide cryptographic provider
pub struct CryptoProvider {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
    public_key_pem: String,
}

impl fmt::Debug for CryptoProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoProvider")
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}

impl CryptoProvider {
    /// Generate a fresh 2048-bit keypair
    ///
    /// This is CPU-bound (hundreds of milliseconds); call it once at startup.
    pub fn generate() -> Result<Self, CryptoError> {
        Self::with_key_bits(MIN_RSA_KEY_BITS)
    }

    pub fn with_key_bits(bits: usize) -> Result<Self, CryptoError> {
        if bits < MIN_RSA_KEY_BITS {
            return Err(CryptoError::InvalidKey(format!(
                "RSA modulus must be at least {MIN_RSA_KEY_BITS} bits, got {bits}"
            )));
        }
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_key = private_key.to_public_key();
        let public_key_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self {
            private_key,
            public_key,
            public_key_pem,
        })
    }

    /// SPKI PEM of the process public key
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }

    // ========================================================================
    // Asymmetric
    // ========================================================================

    /// Decrypt base64 RSA-OAEP ciphertext addressed to the process key
    pub fn rsa_decrypt(&self, ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = from_base64(ciphertext_b64).map_err(|_| CryptoError::Decryption)?;
        self.private_key
            .decrypt(Oaep::new::<Sha1>(), &ciphertext)
            .map_err(|_| CryptoError::Decryption)
    }

    /// Encrypt under `recipient_pem`, or under the process key when `None`.
    /// Returns base64 ciphertext.
    pub fn rsa_encrypt(
        &self,
        plaintext: &[u8],
        recipient_pem: Option<&str>,
    ) -> Result<String, CryptoError> {
        let ciphertext = match recipient_pem {
            Some(pem) => {
                parse_public_key(pem)?.encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
            }
            None => self
                .public_key
                .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext),
        }
        .map_err(|_| CryptoError::Encryption)?;
        Ok(to_base64(&ciphertext))
    }

    /// Sign `message` with the process key (PKCS#1 v1.5, SHA-256), base64 output
    pub fn sign(&self, message: &[u8]) -> Result<String, CryptoError> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign(message)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Ok(to_base64(&signature.to_bytes()))
    }

    /// Verify a base64 PKCS#1 v1.5 / SHA-256 signature made by `signer_pem`
    pub fn verify_signature(
        &self,
        signer_pem: &str,
        message: &[u8],
        signature_b64: &str,
    ) -> Result<(), CryptoError> {
        let verifying_key = VerifyingKey::<Sha256>::new(parse_public_key(signer_pem)?);
        let raw = from_base64(signature_b64)
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        let signature =
            Signature::try_from(raw.as_slice()).map_err(|_| CryptoError::SignatureInvalid)?;
        verifying_key
            .verify(message, &signature)
            .map_err(|_| CryptoError::SignatureInvalid)
    }

    // ========================================================================
    // Symmetric
    // ========================================================================

    /// Fresh 256-bit session key from the OS RNG
    pub fn generate_session_key(&self) -> SessionKey {
        let mut bytes = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        SessionKey(bytes)
    }

    /// AES-256-GCM encrypt with a fresh random IV per call
    pub fn aes_encrypt(&self, key: &SessionKey, plaintext: &[u8]) -> Result<SealedBox, CryptoError> {
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let mut iv = [0u8; GCM_IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let mut buffer = plaintext.to_vec();
        let tag = cipher
            .encrypt_in_place_detached(Nonce::from_slice(&iv), b"", &mut buffer)
            .map_err(|_| CryptoError::Encryption)?;

        let mut tag_bytes = [0u8; GCM_TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(SealedBox {
            ciphertext: buffer,
            iv,
            tag: tag_bytes,
        })
    }

    /// AES-256-GCM decrypt. Fails closed with [`CryptoError::Integrity`].
    pub fn aes_decrypt(&self, key: &SessionKey, sealed: &SealedBox) -> Result<Vec<u8>, CryptoError> {
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let mut buffer = sealed.ciphertext.clone();
        if cipher
            .decrypt_in_place_detached(
                Nonce::from_slice(&sealed.iv),
                b"",
                &mut buffer,
                Tag::from_slice(&sealed.tag),
            )
            .is_err()
        {
            buffer.zeroize();
            return Err(CryptoError::Integrity);
        }
        Ok(buffer)
    }

    // ========================================================================
    // MAC, hashing, randomness
    // ========================================================================

    /// HMAC-SHA256, hex output
    pub fn hmac_sign(&self, data: &[u8], secret: &[u8]) -> Result<String, CryptoError> {
        hmac_sha256(secret, data).map(hex::encode)
    }

    /// Verify a hex HMAC-SHA256 signature in constant time
    pub fn hmac_verify(&self, data: &[u8], signature_hex: &str, secret: &[u8]) -> bool {
        let Ok(provided) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(secret) else {
            return false;
        };
        mac.update(data);
        mac.verify_slice(&provided).is_ok()
    }

    pub fn random_bytes(&self, len: usize) -> Vec<u8> {
        random_bytes(len)
    }

    /// 64 random bytes, hex encoded (128 chars)
    pub fn generate_challenge(&self) -> String {
        hex::encode(random_bytes(CHALLENGE_LEN))
    }

    /// 32 random bytes, hex encoded (64 chars)
    pub fn generate_nonce(&self) -> String {
        hex::encode(random_bytes(NONCE_LEN))
    }

    /// SHA-256, lowercase hex
    pub fn sha256_hex(&self, data: &[u8]) -> String {
        hex::encode(sha256(data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::LazyLock;

    static PROVIDER: LazyLock<CryptoProvider> =
        LazyLock::new(|| CryptoProvider::generate().unwrap());
    static OTHER: LazyLock<CryptoProvider> = LazyLock::new(|| CryptoProvider::generate().unwrap());

    #[test]
    fn test_sha256_known_values() {
        let hash = sha256(b"");
        let expected =
            hex::decode("e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855")
                .unwrap();
        assert_eq!(hash.to_vec(), expected);

        assert_eq!(
            PROVIDER.sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_random_sizes() {
        assert_eq!(random_bytes(32).len(), 32);
        assert!(random_bytes(32).iter().any(|&b| b != 0));

        let challenge = PROVIDER.generate_challenge();
        assert_eq!(challenge.len(), 128);
        assert!(challenge.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(PROVIDER.generate_nonce().len(), 64);
        assert_ne!(PROVIDER.generate_nonce(), PROVIDER.generate_nonce());
    }

    #[test]
    fn test_public_key_is_spki_pem() {
        assert!(
            PROVIDER
                .public_key_pem()
                .starts_with("-----BEGIN PUBLIC KEY-----")
        );
    }

    #[test]
    fn test_rejects_short_modulus() {
        assert!(matches!(
            CryptoProvider::with_key_bits(1024),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_rsa_roundtrip_own_key() {
        let ciphertext = PROVIDER.rsa_encrypt(b"session material", None).unwrap();
        assert_eq!(PROVIDER.rsa_decrypt(&ciphertext).unwrap(), b"session material");
    }

    #[test]
    fn test_rsa_encrypt_for_foreign_key() {
        let ciphertext = PROVIDER
            .rsa_encrypt(b"for the client", Some(OTHER.public_key_pem()))
            .unwrap();
        assert_eq!(OTHER.rsa_decrypt(&ciphertext).unwrap(), b"for the client");
        assert_eq!(PROVIDER.rsa_decrypt(&ciphertext), Err(CryptoError::Decryption));
    }

    #[test]
    fn test_rsa_decrypt_malformed() {
        assert_eq!(PROVIDER.rsa_decrypt("not base64!"), Err(CryptoError::Decryption));
        assert_eq!(
            PROVIDER.rsa_decrypt(&to_base64(&[7u8; 256])),
            Err(CryptoError::Decryption)
        );
    }

    #[test]
    fn test_signature_verification() {
        let message = b"challenge bytes";
        let signature = OTHER.sign(message).unwrap();

        assert!(
            PROVIDER
                .verify_signature(OTHER.public_key_pem(), message, &signature)
                .is_ok()
        );
        assert_eq!(
            PROVIDER.verify_signature(OTHER.public_key_pem(), b"other bytes", &signature),
            Err(CryptoError::SignatureInvalid)
        );
        // Signed by a different key than the one declared
        assert_eq!(
            PROVIDER.verify_signature(PROVIDER.public_key_pem(), message, &signature),
            Err(CryptoError::SignatureInvalid)
        );
    }

    #[test]
    fn test_signature_rejects_bad_key() {
        let result = PROVIDER.verify_signature("-----BEGIN PUBLIC KEY-----", b"m", "AAAA");
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_aes_roundtrip_and_fresh_iv() {
        let key = PROVIDER.generate_session_key();
        let first = PROVIDER.aes_encrypt(&key, b"{\"hwid\":\"abc\"}").unwrap();
        let second = PROVIDER.aes_encrypt(&key, b"{\"hwid\":\"abc\"}").unwrap();

        assert_ne!(first.iv, second.iv);
        assert_eq!(
            PROVIDER.aes_decrypt(&key, &first).unwrap(),
            b"{\"hwid\":\"abc\"}"
        );
    }

    #[test]
    fn test_aes_tampering_fails_closed() {
        let key = PROVIDER.generate_session_key();
        let sealed = PROVIDER.aes_encrypt(&key, b"payload").unwrap();

        let mut bad_tag = sealed.clone();
        bad_tag.tag[0] ^= 0x01;
        assert_eq!(PROVIDER.aes_decrypt(&key, &bad_tag), Err(CryptoError::Integrity));

        let mut bad_body = sealed.clone();
        bad_body.ciphertext[0] ^= 0x01;
        assert_eq!(PROVIDER.aes_decrypt(&key, &bad_body), Err(CryptoError::Integrity));

        let other_key = PROVIDER.generate_session_key();
        assert_eq!(PROVIDER.aes_decrypt(&other_key, &sealed), Err(CryptoError::Integrity));
    }

    #[test]
    fn test_sealed_box_hex_form() {
        let key = PROVIDER.generate_session_key();
        let sealed = PROVIDER.aes_encrypt(&key, b"payload").unwrap();
        let (ciphertext, iv, tag) = sealed.to_hex();

        let parsed = SealedBox::from_hex(&ciphertext, &iv, &tag).unwrap();
        assert_eq!(parsed, sealed);
        assert_eq!(
            SealedBox::from_hex(&ciphertext, "00", &tag),
            Err(CryptoError::Integrity)
        );
    }

    #[test]
    fn test_session_key_hex() {
        let key = PROVIDER.generate_session_key();
        let restored = SessionKey::from_hex(&key.to_hex()).unwrap();
        assert_eq!(restored.as_bytes(), key.as_bytes());
        assert_eq!(format!("{:?}", key), "SessionKey(..)");
    }

    #[test]
    fn test_hmac_sign_verify() {
        let signature = PROVIDER.hmac_sign(b"payload", b"secret").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(PROVIDER.hmac_verify(b"payload", &signature, b"secret"));
        assert!(!PROVIDER.hmac_verify(b"payload", &signature, b"other"));
        assert!(!PROVIDER.hmac_verify(b"payload!", &signature, b"secret"));
        assert!(!PROVIDER.hmac_verify(b"payload", "zz", b"secret"));
        assert!(!PROVIDER.hmac_verify(b"payload", &signature[..62], b"secret"));
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256(b"Jefe", b"what do ya want for nothing?").unwrap();
        assert_eq!(
            hex::encode(mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_base64_roundtrip() {
        let encoded = to_base64(b"hello world");
        assert_eq!(from_base64(&encoded).unwrap(), b"hello world");
    }
}
