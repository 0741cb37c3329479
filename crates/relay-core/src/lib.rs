//! Core of the chat relay: bus envelopes, the platform-agnostic channel
//! adapter and its supporting services.
//!
//! This crate is framework-agnostic. The chat platform and the speech-to-text
//! backend live behind ports (traits) implemented in adapter crates.

pub mod bus;
pub mod channel;
pub mod config;
pub mod download;
pub mod errors;
pub mod logging;
pub mod media;
pub mod security;
pub mod transcription;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
