//! Command dispatch: bridges CLI args -> core commands -> output formatting.

pub mod config_cmd;
pub mod control;
pub mod decode;
pub mod status;
pub mod watch;

use robovac_core::{DeviceConfig, VacuumCommand};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a device-bound command to the appropriate handler.
pub async fn dispatch(
    cmd: Command,
    device: DeviceConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let address = format!("{}:{}", device.host, device.port);

    let result = match cmd {
        Command::Status => status::status(device, global).await,
        Command::Query => status::query(device, global).await,
        Command::Watch(args) => watch::handle(device, args, global).await,
        Command::Start => control::execute(device, VacuumCommand::Start, global).await,
        Command::Pause => control::execute(device, VacuumCommand::Pause, global).await,
        Command::Stop => control::execute(device, VacuumCommand::Stop, global).await,
        Command::Return => control::execute(device, VacuumCommand::ReturnHome, global).await,
        Command::FanSpeed(args) => {
            control::execute(device, VacuumCommand::SetFanSpeed(args.speed), global).await
        }
        Command::CleanRoom(args) => {
            control::execute(device, VacuumCommand::CleanRoom(args.room), global).await
        }
        Command::Set(args) => control::set(device, args, global).await,
        // Offline commands are handled before dispatch
        Command::Rooms | Command::Decode(_) | Command::Config(_) | Command::Completions(_) => {
            unreachable!()
        }
    };

    result.map_err(|err| with_address(err, &address))
}

/// Fill in the address a connection failure refers to.
fn with_address(err: CliError, address: &str) -> CliError {
    match err {
        CliError::ConnectionFailed { reason, .. } => CliError::ConnectionFailed {
            host: address.to_owned(),
            reason,
        },
        other => other,
    }
}
