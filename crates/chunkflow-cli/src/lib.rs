//! Library surface of the `chunkflow` CLI: the daemon HTTP client.
//!
//! Kept separate from the binary so the client can be exercised against a
//! mocked daemon in integration tests.

/// HTTP client for the daemon control plane.
pub mod client;

pub use client::{CliError, DaemonClient};
