//! Voxway Core - Shared infrastructure for the control plane
//!
//! This crate provides:
//! - The platform error type and HTTP status mapping
//! - Service runtime with graceful shutdown
//! - Sealed-secret encryption (the only type allowed to hold secret material)
//! - Phone number normalization helpers

pub mod crypto;
pub mod error;
pub mod phone;
pub mod service;

pub use crypto::{sha256_hex, EncryptionKey, SealedSecret};
pub use error::{Result, VoxwayError};
pub use service::{HealthStatus, ServiceRuntime, VoxwayService};
