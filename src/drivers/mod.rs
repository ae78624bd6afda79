//! Low-level drivers that sit below the port traits.

pub mod watchdog;
