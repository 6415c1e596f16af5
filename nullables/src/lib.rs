//! Nullable infrastructure for deterministic testing.
//!
//! External dependencies (clock, transport) sit behind small interfaces.
//! This crate provides test-friendly implementations that:
//! - Return deterministic values
//! - Can be scripted programmatically
//! - Never touch the network
//!
//! Usage: swap real implementations for nullables in tests.

pub mod clock;
pub mod transport;

pub use clock::NullClock;
pub use transport::{DialRecord, NullStream, NullTransport};
