//! Shared fixtures for PeerLink integration tests.

pub mod fixtures;
