//! Shared Kernel - Domain-crossing minimal core
//!
//! This crate contains the smallest shared vocabulary of the loader backend:
//! - The unified error type and its classification
//! - Typed identifier wrappers for persisted and ephemeral entities
//!
//! Only things with a stable meaning across every crate belong here.

pub mod error {
    pub mod app_error;
    pub mod conversions;
    pub mod kind;
}
pub mod id;
