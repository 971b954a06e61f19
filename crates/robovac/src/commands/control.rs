//! Vacuum command handlers.

use serde::Serialize;
use serde_json::Value;

use robovac_core::{Controller, DeviceConfig, DpsValue, VacuumCommand};

use crate::cli::{GlobalOpts, SetArgs};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct Sent {
    command: String,
    sequence_numbers: Vec<u32>,
}

fn describe(command: &VacuumCommand) -> String {
    match command {
        VacuumCommand::Start => "start".into(),
        VacuumCommand::Pause => "pause".into(),
        VacuumCommand::Stop => "stop".into(),
        VacuumCommand::ReturnHome => "return to dock".into(),
        VacuumCommand::SetFanSpeed(speed) => format!("fan speed {speed}"),
        VacuumCommand::CleanRoom(room) => format!("clean room {room}"),
        VacuumCommand::Raw { index, value } => format!("set DPS {index} = {value}"),
    }
}

/// Parse a command-line value: JSON if it parses, else a bare string.
fn parse_value(raw: &str) -> DpsValue {
    serde_json::from_str::<Value>(raw).map_or_else(
        |_| DpsValue::String(raw.to_owned()),
        |value| DpsValue::from_json(&value),
    )
}

pub async fn execute(
    device: DeviceConfig,
    command: VacuumCommand,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let label = describe(&command);
    tracing::debug!(command = %label, "sending");

    let result = Controller::oneshot(device, |controller, device_id| async move {
        controller.execute(&device_id, command).await
    })
    .await?;

    let sent = Sent {
        command: label,
        sequence_numbers: result.sequence_numbers,
    };
    let out = output::render_single(
        &global.output,
        &sent,
        |s| format!("✓ {}", s.command),
        |s| s.command.clone(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn set(device: DeviceConfig, args: SetArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let command = VacuumCommand::Raw {
        index: args.index,
        value: parse_value(&args.value),
    };
    execute(device, command, global).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use robovac_core::FanSpeed;

    #[test]
    fn values_parse_as_json_first() {
        assert_eq!(parse_value("true"), DpsValue::Boolean(true));
        assert_eq!(parse_value("42"), DpsValue::Integer(42));
        assert_eq!(parse_value("\"AggO\""), DpsValue::String("AggO".into()));
        assert_eq!(parse_value("AggO"), DpsValue::String("AggO".into()));
    }

    #[test]
    fn labels_read_naturally() {
        assert_eq!(describe(&VacuumCommand::SetFanSpeed(FanSpeed::Max)), "fan speed max");
        assert_eq!(
            describe(&VacuumCommand::Raw {
                index: 5,
                value: DpsValue::String("smart".into()),
            }),
            "set DPS 5 = smart"
        );
    }
}
