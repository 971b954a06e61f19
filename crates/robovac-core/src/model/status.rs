// ── Status decoding ──
//
// Maps the DPS 153 work-status bytes (with DPS 152/6/7 as fallbacks) to a
// `DeviceStatus`. The byte patterns live in an ordered table so a new
// firmware pattern is one more row.

use std::fmt;

use serde::Serialize;
use strum::{Display, IntoStaticStr};

use super::dps::WorkCommand;

/// DPS 6 values at or above this are fault codes.
pub const ERROR_CODE_FLOOR: i64 = 100;

/// Battery level at which an all-zero DPS 6/7 pair means the vacuum is on
/// its dock rather than idle somewhere on the floor.
const DOCKED_BATTERY: u8 = 95;

// ── DeviceStatus ─────────────────────────────────────────────────────

/// What the vacuum is doing, derived from its latest Data Points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum DeviceStatus {
    Idle,
    Cleaning,
    Paused,
    Returning,
    Docked(DockSubstatus),
    Error(i64),
    Unknown,
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("Idle"),
            Self::Cleaning => f.write_str("Cleaning"),
            Self::Paused => f.write_str("Paused"),
            Self::Returning => f.write_str("Returning to dock"),
            Self::Docked(DockSubstatus::Idle) => f.write_str("Docked"),
            Self::Docked(sub) => write!(f, "Docked ({})", sub.description()),
            Self::Error(code) => write!(f, "Error {code}"),
            Self::Unknown => f.write_str("Unknown"),
        }
    }
}

/// What the vacuum is doing while on its station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DockSubstatus {
    Charging,
    FullyCharged,
    DustCollecting,
    MopWashing,
    MopDrying,
    MopOperations,
    WaterRefilling,
    MopPrewashing,
    Idle,
}

impl DockSubstatus {
    pub fn description(self) -> &'static str {
        match self {
            Self::Charging => "charging",
            Self::FullyCharged => "fully charged",
            Self::DustCollecting => "collecting dust",
            Self::MopWashing => "washing mop",
            Self::MopDrying => "drying mop",
            Self::MopOperations => "mop operations",
            Self::WaterRefilling => "refilling water",
            Self::MopPrewashing => "pre-washing mop",
            Self::Idle => "idle",
        }
    }
}

// ── Rule table ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Length {
    Any,
    Exactly(usize),
    AtLeast(usize),
}

impl Length {
    fn admits(self, len: usize) -> bool {
        match self {
            Self::Any => true,
            Self::Exactly(n) => len == n,
            Self::AtLeast(n) => len >= n,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Fixed(DeviceStatus),
    /// On the dock; substatus from bytes 2..=4.
    Dock,
    /// Base-station mop or water cycle.
    Station,
}

struct Rule {
    name: &'static str,
    length: Length,
    /// `(offset, byte)` pairs that must all match.
    markers: &'static [(usize, u8)],
    outcome: Outcome,
}

impl Rule {
    fn matches(&self, bytes: &[u8]) -> bool {
        self.length.admits(bytes.len())
            && self
                .markers
                .iter()
                .all(|&(at, expected)| bytes.get(at) == Some(&expected))
    }
}

/// Evaluated top to bottom; the first match wins.
static RULES: &[Rule] = &[
    Rule {
        name: "paused",
        length: Length::AtLeast(9),
        markers: &[(1, 0x0a), (2, 0x00), (3, 0x10), (4, 0x05), (6, 0x02)],
        outcome: Outcome::Fixed(DeviceStatus::Paused),
    },
    Rule {
        name: "cleaning",
        length: Length::Exactly(7),
        markers: &[(1, 0x0a), (2, 0x00), (3, 0x10), (4, 0x05)],
        outcome: Outcome::Fixed(DeviceStatus::Cleaning),
    },
    Rule {
        name: "returning",
        length: Length::Any,
        markers: &[(1, 0x10), (2, 0x07), (3, 0x42)],
        outcome: Outcome::Fixed(DeviceStatus::Returning),
    },
    Rule {
        name: "docked",
        length: Length::Any,
        markers: &[(1, 0x10)],
        outcome: Outcome::Dock,
    },
    Rule {
        name: "station",
        length: Length::Any,
        markers: &[(1, 0x0a), (2, 0x00), (3, 0x10), (4, 0x09)],
        outcome: Outcome::Station,
    },
];

fn dock_substatus(bytes: &[u8]) -> DockSubstatus {
    match bytes.get(2) {
        Some(0x03) if bytes.get(4) == Some(&0x02) => DockSubstatus::FullyCharged,
        Some(0x03) => DockSubstatus::Charging,
        Some(0x09) => match bytes.get(3) {
            Some(0xfa) => DockSubstatus::DustCollecting,
            Some(0x1a) => DockSubstatus::MopDrying,
            Some(0x3a) => DockSubstatus::MopWashing,
            _ => DockSubstatus::MopOperations,
        },
        _ => DockSubstatus::Idle,
    }
}

fn station_substatus(bytes: &[u8]) -> DockSubstatus {
    if bytes.get(11) == Some(&0x3a) {
        DockSubstatus::MopPrewashing
    } else {
        DockSubstatus::WaterRefilling
    }
}

// ── Decoder ──────────────────────────────────────────────────────────

/// Derive the status from raw Data Points. Never fails.
///
/// `work_status` and `command` are the base64-decoded DPS 153 and DPS 152
/// bytes; `status_code` and `status_detail` are DPS 6 and DPS 7. `battery`
/// (DPS 8) only tells a docked vacuum from an idle one when DPS 6/7 are
/// both zero.
pub fn decode(
    work_status: Option<&[u8]>,
    command: Option<&[u8]>,
    status_code: Option<i64>,
    status_detail: Option<i64>,
    battery: Option<u8>,
) -> DeviceStatus {
    if let Some(bytes) = work_status {
        if let Some(rule) = RULES.iter().find(|rule| rule.matches(bytes)) {
            tracing::trace!(rule = rule.name, len = bytes.len(), "work status matched");
            return match rule.outcome {
                Outcome::Fixed(status) => status,
                Outcome::Dock => DeviceStatus::Docked(dock_substatus(bytes)),
                Outcome::Station => DeviceStatus::Docked(station_substatus(bytes)),
            };
        }
        tracing::debug!(bytes = ?bytes, "unrecognized work status pattern");
    }

    if let Some(code) = status_code.filter(|code| *code >= ERROR_CODE_FLOOR) {
        return DeviceStatus::Error(code);
    }

    match command.and_then(WorkCommand::from_bytes) {
        Some(WorkCommand::Resume) => return DeviceStatus::Cleaning,
        Some(WorkCommand::Pause) => return DeviceStatus::Paused,
        Some(WorkCommand::ReturnHome) => return DeviceStatus::Returning,
        Some(WorkCommand::Start) | None => {}
    }

    match (status_code, status_detail) {
        (Some(2), Some(3)) => DeviceStatus::Cleaning,
        (Some(3), Some(4)) => DeviceStatus::Paused,
        (Some(1), Some(2)) => DeviceStatus::Returning,
        (Some(0), Some(0)) if battery.is_some_and(|level| level >= DOCKED_BATTERY) => {
            DeviceStatus::Docked(DockSubstatus::Idle)
        }
        (Some(0), Some(0)) => DeviceStatus::Idle,
        _ => DeviceStatus::Unknown,
    }
}

// ── StatusTracker ────────────────────────────────────────────────────

/// A change from one status to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: Option<DeviceStatus>,
    pub to: DeviceStatus,
}

/// Remembers the previous status of one device.
///
/// Also keeps the "was paused" flag: a start issued after a pause resumes
/// the interrupted run instead of beginning a new one.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    current: Option<DeviceStatus>,
    was_paused: bool,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<DeviceStatus> {
        self.current
    }

    pub fn was_paused(&self) -> bool {
        self.was_paused
    }

    pub fn set_was_paused(&mut self, paused: bool) {
        self.was_paused = paused;
    }

    /// Record a freshly decoded status. Returns the transition if it changed.
    pub fn observe(&mut self, status: DeviceStatus) -> Option<Transition> {
        match status {
            DeviceStatus::Paused => self.was_paused = true,
            DeviceStatus::Cleaning | DeviceStatus::Returning | DeviceStatus::Docked(_) => {
                self.was_paused = false;
            }
            DeviceStatus::Idle | DeviceStatus::Error(_) | DeviceStatus::Unknown => {}
        }

        if self.current == Some(status) {
            return None;
        }
        let from = self.current.replace(status);
        Some(Transition { from, to: status })
    }
}
