//! One poll of the inverter: selection in, timestamped sample out.

use log::warn;

use crate::error::Result;
use crate::net::NetIo;
use crate::protocol::ProtocolAdapter;
use crate::registers::{MAX_SELECTION, RegisterId, RegisterSelection};

/// Raw register values read in one poll, parallel to `selection`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub selection: RegisterSelection,
    pub values: heapless::Vec<u16, MAX_SELECTION>,
}

impl Sample {
    /// `(register, value)` pairs in selection order.
    pub fn pairs(&self) -> impl Iterator<Item = (RegisterId, u16)> + '_ {
        self.selection.iter().zip(self.values.iter().copied())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AcquisitionStats {
    pub polls: u32,
    pub samples: u32,
    pub failures: u32,
}

/// Polls the inverter through the protocol adapter.
pub struct Acquisition {
    adapter: ProtocolAdapter,
    slave: u8,
    stats: AcquisitionStats,
}

impl Acquisition {
    pub fn new(adapter: ProtocolAdapter, slave: u8) -> Self {
        Self {
            adapter,
            slave,
            stats: AcquisitionStats::default(),
        }
    }

    /// Read every register in `selection`.  A failure after all retries is
    /// returned as-is; callers drop the sample and carry on.
    pub fn poll(&mut self, net: &mut NetIo<'_>, selection: &RegisterSelection) -> Result<Sample> {
        self.stats.polls += 1;
        match self.adapter.read_registers(net, self.slave, selection) {
            Ok(decoded) => {
                self.stats.samples += 1;
                Ok(Sample {
                    timestamp_ms: net.clock.now_ms(),
                    selection: selection.clone(),
                    values: decoded.values,
                })
            }
            Err(fault) => {
                self.stats.failures += 1;
                warn!("Acquisition: poll failed ({}), sample dropped", fault);
                Err(fault)
            }
        }
    }

    /// Write one register through the same adapter (command path).
    pub fn write_register(&mut self, net: &mut NetIo<'_>, address: u16, value: u16) -> Result<()> {
        self.adapter.write_register(net, self.slave, address, value)
    }

    pub fn stats(&self) -> AcquisitionStats {
        self.stats
    }

    pub fn adapter_stats(&self) -> crate::protocol::AdapterStats {
        self.adapter.stats()
    }
}
