//! Core of the chat client: the local mirror of teams, channels and users,
//! and the event layer that keeps it in sync and turns push events into messages.
//!
//! This crate is transport-agnostic. The REST API and the event socket live
//! behind ports (traits) implemented in adapter crates.

pub mod cache;
pub mod client;
pub mod config;
pub mod dedup;
pub mod domain;
pub mod errors;
pub mod events;
pub mod logging;
pub mod ports;
pub mod refresh;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use errors::{Error, Result};
