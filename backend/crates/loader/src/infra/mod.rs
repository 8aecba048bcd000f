//! Infrastructure Layer
//!
//! Store and license-authority implementations.

pub mod keyauth;
pub mod memory;
pub mod postgres;
