//! Inbound remote commands.
//!
//! The cloud queues commands per device; the
//! [`CommandExecutor`](crate::remote::commands::CommandExecutor) pulls them
//! and turns the JSON `{command_type, parameters}` pair into a
//! [`GatewayCommand`] before dispatching.

use core::fmt;

use serde_json::Value;

/// Commands the cloud can send to the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayCommand {
    /// Limit export power to an absolute wattage (converted to % of nominal).
    SetPower { watts: f64 },
    /// Limit export power to a percentage of nominal capacity.
    SetPowerPercentage { percent: f64 },
    /// Write one holding register.
    WriteRegister { address: u16, value: u16 },
    GetPowerStats,
    ResetPowerStats,
    GetPeripheralStats,
    ResetPeripheralStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandParseError {
    UnknownType(String),
    MissingParameter(&'static str),
    InvalidParameter(&'static str),
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownType(t) => write!(f, "unknown command type '{t}'"),
            Self::MissingParameter(p) => write!(f, "missing parameter '{p}'"),
            Self::InvalidParameter(p) => write!(f, "invalid parameter '{p}'"),
        }
    }
}

fn number(params: &Value, name: &'static str) -> Result<f64, CommandParseError> {
    let v = params
        .get(name)
        .ok_or(CommandParseError::MissingParameter(name))?;
    match v {
        Value::Number(n) => n.as_f64().ok_or(CommandParseError::InvalidParameter(name)),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CommandParseError::InvalidParameter(name)),
        _ => Err(CommandParseError::InvalidParameter(name)),
    }
}

fn register_word(params: &Value, name: &'static str) -> Result<u16, CommandParseError> {
    let n = number(params, name)?;
    if n.fract() != 0.0 || !(0.0..=f64::from(u16::MAX)).contains(&n) {
        return Err(CommandParseError::InvalidParameter(name));
    }
    Ok(n as u16)
}

impl GatewayCommand {
    pub fn parse(command_type: &str, params: &Value) -> Result<Self, CommandParseError> {
        match command_type {
            "set_power" => Ok(Self::SetPower {
                watts: number(params, "power_watts")?,
            }),
            "set_power_percentage" => Ok(Self::SetPowerPercentage {
                percent: number(params, "percentage")?,
            }),
            "write_register" => Ok(Self::WriteRegister {
                address: register_word(params, "register_address")?,
                value: register_word(params, "value")?,
            }),
            "get_power_stats" => Ok(Self::GetPowerStats),
            "reset_power_stats" => Ok(Self::ResetPowerStats),
            "get_peripheral_stats" => Ok(Self::GetPeripheralStats),
            "reset_peripheral_stats" => Ok(Self::ResetPeripheralStats),
            other => Err(CommandParseError::UnknownType(other.to_string())),
        }
    }
}
