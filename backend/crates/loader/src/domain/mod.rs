//! Domain Layer - Business logic and entities
//!
//! This layer contains:
//! - Domain entities (HandshakeSession, LoaderSession, DeviceRecord, RiskEvent, LoginAttempt)
//! - Domain value objects (FingerprintComponents, scores, flag decisions)
//! - Domain services (fingerprint similarity, VM heuristic, risk factor table)
//! - Repository traits (interfaces)

pub mod entities;
pub mod repository;
pub mod services;
pub mod value_objects;
