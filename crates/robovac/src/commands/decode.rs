//! Offline decoding of captured Data Points and discovery datagrams.

use serde::Serialize;
use serde_json::Value;

use robovac_api::{DiscoveredDevice, decode_datagram};
use robovac_core::{CleaningMode, DeviceStatus, DpsMap, FanSpeed, VacuumDps, WorkCommand};

use crate::cli::{DecodeArgs, DecodeCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

/// The typed reading of a DPS map.
#[derive(Serialize)]
struct Decoded {
    status: DeviceStatus,
    battery: Option<u8>,
    fan_speed: Option<FanSpeed>,
    mode: Option<CleaningMode>,
    error_code: Option<i64>,
    last_command: Option<WorkCommand>,
    /// DPS 153 bytes as hex.
    work_status: Option<String>,
    errors: Vec<String>,
    unknown: DpsMap,
}

impl From<&VacuumDps> for Decoded {
    fn from(dps: &VacuumDps) -> Self {
        Self {
            status: dps.status(),
            battery: dps.battery_level(),
            fan_speed: dps.fan_speed(),
            mode: dps.mode(),
            error_code: dps.error_code(),
            last_command: dps.last_command(),
            work_status: dps
                .work_status
                .as_ref()
                .and_then(|r| r.as_ref().ok())
                .map(hex::encode),
            errors: dps.errors().iter().map(ToString::to_string).collect(),
            unknown: dps.unknown.clone(),
        }
    }
}

fn decoded_detail(d: &Decoded, color: bool) -> String {
    fn or_dash<T: ToString>(value: Option<T>) -> String {
        value.map_or_else(|| "-".to_owned(), |v| v.to_string())
    }

    let mut lines = vec![
        format!("Status:       {}", output::paint_status(d.status, color)),
        format!("Battery:      {}", or_dash(d.battery.map(|b| format!("{b}%")))),
        format!("Fan speed:    {}", or_dash(d.fan_speed)),
        format!("Mode:         {}", or_dash(d.mode.as_ref())),
        format!("Error code:   {}", or_dash(d.error_code)),
        format!("Last command: {}", or_dash(d.last_command)),
        format!("Work status:  {}", or_dash(d.work_status.as_deref())),
    ];
    if !d.unknown.is_empty() {
        lines.push(format!("Other DPS:    {}", d.unknown.to_json()));
    }
    for error in &d.errors {
        lines.push(format!("Warning:      {error}"));
    }
    lines.join("\n")
}

fn device_detail(d: &DiscoveredDevice) -> String {
    [
        format!("Device ID:   {}", d.device_id),
        format!("IP:          {}", d.ip),
        format!("Version:     {}", d.version),
        format!(
            "Product key: {}",
            d.product_key.as_deref().unwrap_or("-")
        ),
    ]
    .join("\n")
}

/// Accept either a bare DPS object or a whole payload carrying `dps`.
fn parse_dps(raw: &str) -> Result<DpsMap, CliError> {
    let value: Value = serde_json::from_str(raw)?;
    let Some(object) = value.as_object() else {
        return Err(CliError::Validation {
            field: "dps".into(),
            reason: "expected a JSON object such as {\"153\": \"BgoAEAUyAA==\"}".into(),
        });
    };

    if object.contains_key("dps") || object.contains_key("data") {
        Ok(DpsMap::from_payload(&value))
    } else {
        Ok(DpsMap::from_json_object(object))
    }
}

pub fn handle(args: DecodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let color = output::should_color(&global.color);

    let out = match args.command {
        DecodeCommand::Status { dps } => {
            let decoded = Decoded::from(&VacuumDps::decode(&parse_dps(&dps)?));
            output::render_single(
                &global.output,
                &decoded,
                |d| decoded_detail(d, color),
                |d| d.status.to_string(),
            )?
        }
        DecodeCommand::Datagram { hex: raw } => {
            let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
            let bytes = hex::decode(&compact).map_err(|e| CliError::Validation {
                field: "hex".into(),
                reason: e.to_string(),
            })?;
            let device = decode_datagram(&bytes).map_err(|e| CliError::Protocol {
                message: e.to_string(),
            })?;
            output::render_single(&global.output, &device, device_detail, |d| {
                d.device_id.clone()
            })?
        }
    };

    output::print_output(&out, global.quiet);
    Ok(())
}
