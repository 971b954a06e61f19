// ── Command API ──
//
// High-level vacuum commands and the Data Point writes they expand to.
// Planning is pure; the controller walks the steps against a session.

use std::collections::BTreeMap;
use std::time::Duration;

use robovac_api::{DpsMap, DpsValue};

use crate::error::CoreError;
use crate::model::{
    CleaningMode, DeviceStatus, FanSpeed, StatusTracker, VacuumDps, WorkCommand, encode_command,
    index,
};

/// Pause after a work command before writing the follow-up mode.
pub const COMMAND_SETTLE: Duration = Duration::from_millis(500);
/// Pause after the follow-up mode.
pub const MODE_SETTLE: Duration = Duration::from_secs(1);
/// Pause between `start` and the confirming `clean` of a fresh run.
pub const START_SETTLE: Duration = Duration::from_secs(2);

/// A command envelope sent through a device's command channel.
pub(crate) struct CommandEnvelope {
    pub command: VacuumCommand,
    pub response_tx: tokio::sync::oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// Everything a caller can ask the vacuum to do.
#[derive(Debug, Clone, PartialEq)]
pub enum VacuumCommand {
    /// Start cleaning, or resume if the current run is paused.
    Start,
    Pause,
    /// Same as pause: the device has no separate stop.
    Stop,
    ReturnHome,
    SetFanSpeed(FanSpeed),
    /// Clean one room, by its configured name.
    CleanRoom(String),
    /// Write one Data Point verbatim.
    Raw { index: u8, value: DpsValue },
}

/// One step of a command plan.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Send(DpsMap),
    Settle(Duration),
}

/// The expansion of a [`VacuumCommand`].
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub steps: Vec<Step>,
    /// New value of the "was paused" flag once the plan has run.
    pub was_paused: Option<bool>,
    /// Query the device afterwards so the store catches up.
    pub refresh: bool,
}

/// Outcome of an executed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Sequence numbers of every frame written, in order.
    pub sequence_numbers: Vec<u32>,
}

/// Whether a start should resume an interrupted run rather than begin a new one.
pub fn should_resume(tracker: &StatusTracker, dps: &VacuumDps) -> bool {
    tracker.was_paused()
        || tracker.current() == Some(DeviceStatus::Paused)
        || dps.status() == DeviceStatus::Paused
        || dps.last_command() == Some(WorkCommand::Pause)
}

/// Expand a command into Data Point writes and pauses.
///
/// `resume` only affects [`VacuumCommand::Start`]. Fails only for a room
/// that is not in `rooms`.
pub fn plan(
    command: &VacuumCommand,
    resume: bool,
    rooms: &BTreeMap<String, String>,
) -> Result<Plan, CoreError> {
    let mut steps = Vec::new();

    let (was_paused, refresh) = match command {
        VacuumCommand::Start if resume => {
            push_work(&mut steps, WorkCommand::Resume);
            (Some(false), true)
        }
        VacuumCommand::Start => {
            push_fresh_start(&mut steps);
            (Some(false), true)
        }
        VacuumCommand::Pause | VacuumCommand::Stop => {
            push_work(&mut steps, WorkCommand::Pause);
            (Some(true), true)
        }
        VacuumCommand::ReturnHome => {
            push_work(&mut steps, WorkCommand::ReturnHome);
            (Some(false), true)
        }
        VacuumCommand::SetFanSpeed(speed) => {
            let mut dps = encode_command(index::FAN_SPEED, speed.to_string());
            dps.insert(index::FAN_SPEED_APP, speed.app_label());
            steps.push(Step::Send(dps));
            (None, false)
        }
        VacuumCommand::CleanRoom(room) => {
            let payload = rooms.get(room).ok_or_else(|| CoreError::UnknownRoom {
                room: room.clone(),
                available: available_rooms(rooms),
            })?;
            steps.push(Step::Send(encode_command(
                index::ROOM_SELECTION,
                payload.as_str(),
            )));
            steps.push(Step::Settle(COMMAND_SETTLE));
            push_fresh_start(&mut steps);
            (Some(false), true)
        }
        VacuumCommand::Raw { index, value } => {
            steps.push(Step::Send(encode_command(*index, value.clone())));
            (None, false)
        }
    };

    Ok(Plan {
        steps,
        was_paused,
        refresh,
    })
}

/// `start`, let it settle, then `clean` to confirm.
fn push_fresh_start(steps: &mut Vec<Step>) {
    push_work(steps, WorkCommand::Start);
    steps.push(Step::Settle(START_SETTLE));
    push_work(steps, WorkCommand::Resume);
}

/// Write a work command, then the matching mode.
fn push_work(steps: &mut Vec<Step>, command: WorkCommand) {
    steps.push(Step::Send(encode_command(index::COMMAND, command.encoded())));
    steps.push(Step::Settle(COMMAND_SETTLE));
    if let Some(mode) = command.follow_up_mode() {
        steps.push(Step::Send(mode_command(&mode)));
    }
    steps.push(Step::Settle(MODE_SETTLE));
}

fn mode_command(mode: &CleaningMode) -> DpsMap {
    encode_command(index::MODE, mode.as_str())
}

fn available_rooms(rooms: &BTreeMap<String, String>) -> String {
    if rooms.is_empty() {
        "none".into()
    } else {
        rooms.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
