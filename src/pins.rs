//! GPIO assignments for the EcoWatt gateway board.
//!
//! The inverter sits behind a MAX3485 RS-485 transceiver whose driver and
//! receiver enables are tied together.  The peripheral gate switches this
//! line to keep the transceiver unpowered between polls.

/// RS-485 DE/RE enable: HIGH powers the transceiver.
pub const RS485_ENABLE_GPIO: i32 = 4;
