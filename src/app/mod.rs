//! Application core: gateway orchestration, zero direct I/O.
//!
//! This module ties acquisition, the pipeline, the uploader, remote
//! configuration, commands and OTA to the cooperative scheduler.  All
//! interaction with hardware and the network happens through **port
//! traits** defined in [`ports`], keeping this layer fully testable without
//! real peripherals.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
