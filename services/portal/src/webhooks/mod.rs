//! Webhook verification
//!
//! Raw request bytes are captured before any JSON parsing; each processor's
//! signature scheme is checked with constant-time comparison. An
//! unconfigured secret only passes in development mode, loudly.

pub mod verify;
