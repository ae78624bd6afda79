//! EcoWatt gateway firmware library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection. All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

pub mod acquisition;
pub mod app;
pub mod buffer;
pub mod compression;
pub mod config;
pub mod deadline;
pub mod error;
pub mod faults;
pub mod net;
pub mod ota;
pub mod peripheral;
pub mod pipeline;
pub mod power;
pub mod protocol;
pub mod registers;
pub mod remote;
pub mod scheduler;
pub mod security;
pub mod uploader;

pub mod pins;

// Hardware-facing modules; their ESP-IDF backends are cfg-gated inside and
// the host builds get simulation twins.
pub mod adapters;
pub mod drivers;
