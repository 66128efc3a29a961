//! Testing utilities and mock implementations
//!
//! Mocks for testing the agent core without an MQTT broker or sensor hardware.

pub mod mocks;

pub use mocks::*;
