//! Platform Crate - Technical Infrastructure
//!
//! This crate provides shared technical foundations:
//! - The process-wide cryptographic provider (RSA-OAEP, RSA signatures,
//!   AES-256-GCM, HMAC-SHA256, SHA-256, secure randomness)
//! - Client origin extraction from request headers

pub mod client;
pub mod crypto;
