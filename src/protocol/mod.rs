//! Topic scheme and message types published by the sensor agent
//!
//! This module defines the wire contract with the broker and the
//! home-automation hub: topic names, payload shapes and delivery settings.

pub mod messages;
pub mod topics;

pub use messages::*;
pub use topics::*;
