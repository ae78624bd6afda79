//! Integration test driver for `tests/integration/` submodule.
//!
//! Each `mod` below maps to a file that exercises a specific subsystem
//! against the simulated cloud, inverter and host adapters.  All tests run
//! on the host (x86_64) with no real hardware required.

mod mock_hw;
mod ota_tests;
mod recovery_tests;
mod remote_tests;
mod security_tests;
mod service_tests;
