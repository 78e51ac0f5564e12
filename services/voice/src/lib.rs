//! Native voice client for the medical assistant agent.
//!
//! Wires the session core to real devices and services: a websocket
//! transport, credential providers, cpal speaker and microphone, the
//! clinical-note functions and a terminal console. The `medvoice` binary
//! is a thin wrapper around this library.

pub mod audio;
pub mod config;
pub mod console;
pub mod credentials;
pub mod notes;
pub mod transport;
