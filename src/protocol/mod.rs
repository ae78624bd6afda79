//! Modbus RTU framing and the HTTP transport to the inverter simulator.

pub mod adapter;
pub mod crc;
pub mod frame;

pub use adapter::{AdapterStats, ProtocolAdapter};
pub use frame::DecodedValues;
