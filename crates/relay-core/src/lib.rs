//! Core domain + application logic for the Telegram batch relay bot.
//!
//! This crate is intentionally framework-agnostic. The Bot API and MTProto clients
//! live behind ports (traits) implemented in adapter crates.

pub mod batch;
pub mod config;
pub mod conversation;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod link;
pub mod logging;
pub mod messaging;
pub mod ports;
pub mod progress;
pub mod registry;
pub mod security;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
