//! Inverter register catalogue and runtime register selections.
//!
//! The catalogue is a static table: ten holding registers at consecutive
//! Modbus addresses in canonical order. A [`RegisterSelection`] is the
//! ordered, duplicate-free subset polled on every acquisition tick.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Number of registers in the catalogue.
pub const REGISTER_COUNT: usize = 10;

/// Upper bound on selection length.
pub const MAX_SELECTION: usize = 10;

/// Holding register written by power-limit commands.
pub const EXPORT_POWER_REGISTER: u16 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RegisterId {
    Vac1 = 0,
    Iac1 = 1,
    Fac1 = 2,
    Vpv1 = 3,
    Vpv2 = 4,
    Ipv1 = 5,
    Ipv2 = 6,
    Temperature = 7,
    ExportPower = 8,
    Pac = 9,
}

/// Register semantic class, used by the semantic RLE codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SemanticClass {
    Voltage = 0,
    Current = 1,
    Frequency = 2,
    PvVoltage = 3,
    PvCurrent = 4,
    Temperature = 5,
    Power = 6,
    Unknown = 7,
}

impl SemanticClass {
    pub const ALL: [Self; 8] = [
        Self::Voltage,
        Self::Current,
        Self::Frequency,
        Self::PvVoltage,
        Self::PvCurrent,
        Self::Temperature,
        Self::Power,
        Self::Unknown,
    ];

    pub fn from_type_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Run tolerance in raw counts.
    pub const fn tolerance(self) -> u16 {
        match self {
            Self::Voltage => 10,
            Self::Current => 5,
            Self::Frequency => 1,
            Self::PvVoltage => 15,
            Self::PvCurrent => 3,
            Self::Temperature => 5,
            Self::Power => 50,
            Self::Unknown => 0,
        }
    }

    /// Nominal bit width for run base values.
    pub const fn bit_width(self) -> u8 {
        match self {
            Self::Voltage => 12,
            Self::Current => 8,
            Self::Frequency => 6,
            Self::PvVoltage => 9,
            Self::PvCurrent => 7,
            Self::Temperature => 10,
            Self::Power => 13,
            Self::Unknown => 16,
        }
    }
}

/// One catalogue row.
#[derive(Debug, Clone, Copy)]
pub struct RegisterDef {
    pub id: RegisterId,
    pub address: u16,
    pub name: &'static str,
    pub unit: &'static str,
    /// Raw value divided by `gain` yields engineering units.
    pub gain: f32,
    pub class: SemanticClass,
}

pub const CATALOGUE: [RegisterDef; REGISTER_COUNT] = [
    RegisterDef { id: RegisterId::Vac1, address: 0, name: "Vac1", unit: "V", gain: 10.0, class: SemanticClass::Voltage },
    RegisterDef { id: RegisterId::Iac1, address: 1, name: "Iac1", unit: "A", gain: 10.0, class: SemanticClass::Current },
    RegisterDef { id: RegisterId::Fac1, address: 2, name: "Fac1", unit: "Hz", gain: 100.0, class: SemanticClass::Frequency },
    RegisterDef { id: RegisterId::Vpv1, address: 3, name: "Vpv1", unit: "V", gain: 10.0, class: SemanticClass::PvVoltage },
    RegisterDef { id: RegisterId::Vpv2, address: 4, name: "Vpv2", unit: "V", gain: 10.0, class: SemanticClass::PvVoltage },
    RegisterDef { id: RegisterId::Ipv1, address: 5, name: "Ipv1", unit: "A", gain: 10.0, class: SemanticClass::PvCurrent },
    RegisterDef { id: RegisterId::Ipv2, address: 6, name: "Ipv2", unit: "A", gain: 10.0, class: SemanticClass::PvCurrent },
    RegisterDef { id: RegisterId::Temperature, address: 7, name: "Temperature", unit: "C", gain: 10.0, class: SemanticClass::Temperature },
    RegisterDef { id: RegisterId::ExportPower, address: 8, name: "Export_power", unit: "%", gain: 1.0, class: SemanticClass::Unknown },
    RegisterDef { id: RegisterId::Pac, address: 9, name: "Pac", unit: "W", gain: 1.0, class: SemanticClass::Power },
];

impl RegisterId {
    pub const ALL: [Self; REGISTER_COUNT] = [
        Self::Vac1,
        Self::Iac1,
        Self::Fac1,
        Self::Vpv1,
        Self::Vpv2,
        Self::Ipv1,
        Self::Ipv2,
        Self::Temperature,
        Self::ExportPower,
        Self::Pac,
    ];

    pub fn from_u8(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub const fn def(self) -> &'static RegisterDef {
        &CATALOGUE[self as usize]
    }

    pub const fn address(self) -> u16 {
        self.def().address
    }

    pub const fn name(self) -> &'static str {
        self.def().name
    }

    pub const fn class(self) -> SemanticClass {
        self.def().class
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ───────────────────────────────────────────────────────────────
// Selection
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionError {
    Duplicate(RegisterId),
    TooMany,
    Empty,
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicate(id) => write!(f, "register {id} selected twice"),
            Self::TooMany => write!(f, "selection exceeds {MAX_SELECTION} registers"),
            Self::Empty => write!(f, "selection is empty"),
        }
    }
}

/// Ordered, duplicate-free list of registers polled each tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterSelection {
    ids: heapless::Vec<RegisterId, MAX_SELECTION>,
}

impl RegisterSelection {
    pub fn new(ids: &[RegisterId]) -> Result<Self, SelectionError> {
        if ids.is_empty() {
            return Err(SelectionError::Empty);
        }
        let mut out = heapless::Vec::new();
        for &id in ids {
            if out.contains(&id) {
                return Err(SelectionError::Duplicate(id));
            }
            out.push(id).map_err(|_| SelectionError::TooMany)?;
        }
        Ok(Self { ids: out })
    }

    /// Every catalogue register in canonical order.
    pub fn all() -> Self {
        Self {
            ids: RegisterId::ALL.iter().copied().collect(),
        }
    }

    /// Rebuild from a cloud bitmask (bit *i* = register *i*), canonical order,
    /// truncated to `count`. Returns `None` when nothing valid is selected.
    pub fn from_bitmask(mask: u32, count: usize) -> Option<Self> {
        let ids: heapless::Vec<RegisterId, MAX_SELECTION> = RegisterId::ALL
            .iter()
            .copied()
            .filter(|id| mask & (1 << *id as u32) != 0)
            .take(count.min(MAX_SELECTION))
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(Self { ids })
        }
    }

    pub fn to_bitmask(&self) -> u32 {
        self.ids.iter().fold(0, |acc, id| acc | (1 << *id as u32))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn as_slice(&self) -> &[RegisterId] {
        &self.ids
    }

    pub fn iter(&self) -> impl Iterator<Item = RegisterId> + '_ {
        self.ids.iter().copied()
    }

    pub fn contains(&self, id: RegisterId) -> bool {
        self.ids.contains(&id)
    }

    /// Contiguous `[min_addr, max_addr + 1)` covering every selected register,
    /// returned as `(start, count)`.
    pub fn span(&self) -> (u16, u16) {
        let min = self.iter().map(RegisterId::address).min().unwrap_or(0);
        let max = self.iter().map(RegisterId::address).max().unwrap_or(0);
        (min, max - min + 1)
    }
}

impl Default for RegisterSelection {
    fn default() -> Self {
        Self::all()
    }
}
