//! Remote command executor.
//!
//! Pulls at most one queued command per poll from
//! `GET /commands/poll/<device>`, runs it, and reports the outcome to
//! `POST /commands/result`.  An empty object means nothing is queued.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::acquisition::Acquisition;
use crate::app::commands::GatewayCommand;
use crate::app::ports::{HttpMethod, HttpRequest, TransceiverPort};
use crate::error::{Fault, Result};
use crate::net::{NetIo, UPLOAD_TIMEOUT_MS};
use crate::power::PowerManager;
use crate::registers::EXPORT_POWER_REGISTER;

const MODULE: &str = "Commands";

#[derive(Debug, Default, Deserialize)]
struct PollResponse {
    #[serde(default)]
    command: Option<PendingCommand>,
}

#[derive(Debug, Clone, Deserialize)]
struct PendingCommand {
    /// Echoed back verbatim; the cloud uses both numeric and string ids.
    command_id: Value,
    command_type: String,
    #[serde(default)]
    parameters: Value,
}

#[derive(Serialize)]
struct CommandResult<'a> {
    command_id: &'a Value,
    status: &'static str,
    result: &'a str,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CommandStats {
    pub executed: u32,
    pub successful: u32,
    pub failed: u32,
}

/// What one executed command produced.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub command_type: String,
    pub success: bool,
    pub result: String,
    /// The result POST reached the cloud.
    pub reported: bool,
}

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub acquisition: &'a mut Acquisition,
    pub power: &'a mut PowerManager,
    pub transceiver: &'a mut dyn TransceiverPort,
}

/// Watts as a whole percentage of nominal capacity, clamped to 0..=100.
pub fn power_percentage(watts: f64, nominal_w: u32) -> u16 {
    if nominal_w == 0 || !watts.is_finite() {
        return 0;
    }
    clamp_percent(watts * 100.0 / f64::from(nominal_w))
}

fn clamp_percent(percent: f64) -> u16 {
    if percent.is_nan() {
        return 0;
    }
    percent.clamp(0.0, 100.0).round() as u16
}

pub struct CommandExecutor {
    poll_url: String,
    result_url: String,
    nominal_power_w: u32,
    stats: CommandStats,
}

impl CommandExecutor {
    pub fn new(cloud_url: &str, device_id: &str, nominal_power_w: u32) -> Self {
        let base = cloud_url.trim_end_matches('/');
        Self {
            poll_url: format!("{}/commands/poll/{}", base, device_id),
            result_url: format!("{}/commands/result", base),
            nominal_power_w,
            stats: CommandStats::default(),
        }
    }

    pub fn stats(&self) -> CommandStats {
        self.stats
    }

    /// Fetch and run the next queued command, if any.
    pub fn poll(
        &mut self,
        net: &mut NetIo<'_>,
        ctx: &mut CommandContext<'_>,
    ) -> Result<Option<CommandOutcome>> {
        let request = HttpRequest {
            method: HttpMethod::Get,
            url: &self.poll_url,
            headers: &[("Accept", "application/json")],
            body: &[],
            timeout_ms: UPLOAD_TIMEOUT_MS,
        };
        let response = net.send(MODULE, &request)?;
        let body: PollResponse = if response.body.iter().all(u8::is_ascii_whitespace) {
            PollResponse::default()
        } else {
            serde_json::from_slice(&response.body).map_err(|_| {
                warn!("{}: unparseable poll response", MODULE);
                Fault::CorruptFrame
            })?
        };
        let Some(pending) = body.command else {
            return Ok(None);
        };

        info!(
            "{}: executing '{}' (id {})",
            MODULE, pending.command_type, pending.command_id
        );
        let (success, result) = match GatewayCommand::parse(&pending.command_type, &pending.parameters)
        {
            Ok(command) => match self.execute(net, ctx, &command) {
                Ok(text) => (true, text),
                Err(text) => (false, text),
            },
            Err(e) => (false, e.to_string()),
        };

        self.stats.executed += 1;
        if success {
            self.stats.successful += 1;
        } else {
            self.stats.failed += 1;
            warn!("{}: '{}' failed: {}", MODULE, pending.command_type, result);
        }

        let reported = self.report(net, &pending.command_id, success, &result);
        Ok(Some(CommandOutcome {
            command_type: pending.command_type,
            success,
            result,
            reported,
        }))
    }

    fn execute(
        &mut self,
        net: &mut NetIo<'_>,
        ctx: &mut CommandContext<'_>,
        command: &GatewayCommand,
    ) -> core::result::Result<String, String> {
        match *command {
            GatewayCommand::SetPower { watts } => {
                let percent = power_percentage(watts, self.nominal_power_w);
                write_register(net, ctx, EXPORT_POWER_REGISTER, percent)
                    .map(|()| format!("export power limited to {}% ({} W requested)", percent, watts))
            }
            GatewayCommand::SetPowerPercentage { percent } => {
                let percent = clamp_percent(percent);
                write_register(net, ctx, EXPORT_POWER_REGISTER, percent)
                    .map(|()| format!("export power limited to {}%", percent))
            }
            GatewayCommand::WriteRegister { address, value } => {
                write_register(net, ctx, address, value)
                    .map(|()| format!("register {} set to {}", address, value))
            }
            GatewayCommand::GetPowerStats => {
                serde_json::to_string(&ctx.power.stats()).map_err(|e| e.to_string())
            }
            GatewayCommand::ResetPowerStats => {
                ctx.power.reset_stats();
                Ok("power statistics reset".into())
            }
            GatewayCommand::GetPeripheralStats => {
                serde_json::to_string(&ctx.transceiver.stats()).map_err(|e| e.to_string())
            }
            GatewayCommand::ResetPeripheralStats => {
                ctx.transceiver.reset_stats();
                Ok("peripheral statistics reset".into())
            }
        }
    }

    fn report(&mut self, net: &mut NetIo<'_>, command_id: &Value, success: bool, result: &str) -> bool {
        let body = CommandResult {
            command_id,
            status: if success { "completed" } else { "failed" },
            result,
        };
        let Ok(json) = serde_json::to_vec(&body) else {
            return false;
        };
        let request = HttpRequest {
            method: HttpMethod::Post,
            url: &self.result_url,
            headers: &[("Content-Type", "application/json")],
            body: &json,
            timeout_ms: UPLOAD_TIMEOUT_MS,
        };
        match net.send(MODULE, &request) {
            Ok(_) => true,
            Err(fault) => {
                warn!("{}: result for {} not delivered ({})", MODULE, command_id, fault);
                false
            }
        }
    }
}

/// Register write with the transceiver powered for the duration.
fn write_register(
    net: &mut NetIo<'_>,
    ctx: &mut CommandContext<'_>,
    address: u16,
    value: u16,
) -> core::result::Result<(), String> {
    ctx.transceiver.uart_on(net.clock.now_ms());
    let result = ctx.acquisition.write_register(net, address, value);
    ctx.transceiver.uart_off(net.clock.now_ms());
    result.map_err(|fault| fault.to_string())
}
