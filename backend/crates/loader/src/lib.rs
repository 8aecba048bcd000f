//! Loader Device-Trust Backend Module
//!
//! Clean Architecture structure:
//! - `domain/` - Entities, pure scoring logic, repository traits
//! - `application/` - Use cases (handshake, sessions, replay guard, fingerprinting, risk)
//! - `infra/` - PostgreSQL and in-memory stores, KeyAuth client
//! - `presentation/` - HTTP handlers and middleware
//!
//! ## Security Model
//! - One RSA keypair per process; every cryptographic operation goes through
//!   `platform::crypto::CryptoProvider`
//! - Handshake sessions are single-use and live at most 60s
//! - The client proves key possession with a real signature over the challenge
//! - The negotiated key lives in a 24h loader session bound to the origin
//!   address; protected request bodies are sealed under it
//! - Signed requests are checked for MAC, timestamp window and nonce reuse
//! - X-Forwarded-For is only believed from configured trusted proxies
//! - Protocol and security failures all surface as the same bodiless 401

pub mod application;
pub mod domain;
pub mod error;
pub mod infra;
pub mod presentation;

// Re-exports for convenience
pub use application::config::LoaderConfig;
pub use application::sweeper::{
    spawn_handshake_sweeper, spawn_nonce_sweeper, spawn_session_sweeper,
};
pub use error::{ErrorClass, LoaderError, LoaderResult};
pub use infra::keyauth::{KeyAuthClient, KeyAuthConfig};
pub use infra::memory::MemoryLoaderRepository;
pub use infra::postgres::PgLoaderRepository;
pub use presentation::handlers::LoaderAppState;
pub use presentation::router::loader_router;

// Re-export kernel error types for unified error handling
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};
