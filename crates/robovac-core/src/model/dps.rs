// ── Vacuum Data Points ──
//
// Typed accessors over the raw `DpsMap`. Every known field decodes on its
// own: a malformed value yields a `DecodeError` for that field and leaves
// the others untouched. Indices the model does not know are kept as-is.

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use robovac_api::{DpsMap, DpsValue};
use serde::{Serialize, Serializer};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use thiserror::Error;

use super::status::{self, DeviceStatus};

/// Data Point indices used by the vacuum.
pub mod index {
    /// Work mode (`smart`, `pause`, `charge`, ...).
    pub const MODE: u8 = 5;
    /// Coarse status code. Values of 100 and above are fault codes.
    pub const STATUS_CODE: u8 = 6;
    /// Coarse status detail, read together with [`STATUS_CODE`].
    pub const STATUS_DETAIL: u8 = 7;
    pub const BATTERY: u8 = 8;
    pub const FAN_SPEED: u8 = 9;
    /// Work command, base64 bytes. The device echoes the last one.
    pub const COMMAND: u8 = 152;
    /// Observed work status, base64 bytes.
    pub const WORK_STATUS: u8 = 153;
    /// Fan speed in the vendor app's vocabulary.
    pub const FAN_SPEED_APP: u8 = 158;
    pub const BATTERY_ALT: u8 = 163;
    /// Room selection, opaque base64 captured from the vendor app.
    pub const ROOM_SELECTION: u8 = 173;

    pub const KNOWN: [u8; 10] = [
        MODE,
        STATUS_CODE,
        STATUS_DETAIL,
        BATTERY,
        FAN_SPEED,
        COMMAND,
        WORK_STATUS,
        FAN_SPEED_APP,
        BATTERY_ALT,
        ROOM_SELECTION,
    ];

    /// Short label for a known index.
    pub fn name(index: u8) -> Option<&'static str> {
        let name = match index {
            MODE => "mode",
            STATUS_CODE => "status code",
            STATUS_DETAIL => "status detail",
            BATTERY | BATTERY_ALT => "battery",
            FAN_SPEED => "fan speed",
            COMMAND => "work command",
            WORK_STATUS => "work status",
            FAN_SPEED_APP => "fan speed (app)",
            ROOM_SELECTION => "room selection",
            _ => return None,
        };
        Some(name)
    }
}

// ── DecodeError ──────────────────────────────────────────────────────

/// Why one known field could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("DPS {index}: expected {expected}, got {found}")]
    WrongType {
        index: u8,
        expected: &'static str,
        found: &'static str,
    },

    #[error("DPS {index}: value {value} is out of range")]
    OutOfRange { index: u8, value: i64 },

    #[error("DPS {index}: invalid base64: {reason}")]
    Base64 { index: u8, reason: String },

    #[error("DPS {index}: unrecognized value {value:?}")]
    UnknownVariant { index: u8, value: String },
}

/// One decoded field: `None` when the device did not report it.
pub type Field<T> = Option<Result<T, DecodeError>>;

// ── FanSpeed ─────────────────────────────────────────────────────────

/// Suction level.
///
/// Parses both the DPS 9 vocabulary (`gentle`, `normal`, `strong`, `max`)
/// and the app vocabulary of DPS 158 (`Quiet`, `Standard`, `Turbo`, `Max`).
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    Serialize,
    serde::Deserialize,
)]
#[strum(ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum FanSpeed {
    #[strum(to_string = "gentle", serialize = "quiet")]
    Gentle,
    #[strum(to_string = "normal", serialize = "standard", serialize = "middle")]
    Normal,
    #[strum(to_string = "strong", serialize = "turbo")]
    Strong,
    #[strum(to_string = "max", serialize = "maximum")]
    Max,
}

impl FanSpeed {
    /// The DPS 158 value.
    pub fn app_label(self) -> &'static str {
        match self {
            Self::Gentle => "Quiet",
            Self::Normal => "Standard",
            Self::Strong => "Turbo",
            Self::Max => "Max",
        }
    }
}

// ── CleaningMode ─────────────────────────────────────────────────────

/// The DPS 5 work mode. Values the model does not know are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString)]
pub enum CleaningMode {
    #[strum(serialize = "smart")]
    Smart,
    #[strum(serialize = "pause")]
    Pause,
    #[strum(serialize = "charge")]
    Charge,
    #[strum(default)]
    Other(String),
}

impl CleaningMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Smart => "smart",
            Self::Pause => "pause",
            Self::Charge => "charge",
            Self::Other(raw) => raw,
        }
    }
}

impl fmt::Display for CleaningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CleaningMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ── WorkCommand ──────────────────────────────────────────────────────

/// The well-known DPS 152 work commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WorkCommand {
    /// Begin a fresh cleaning run (`AA==`).
    Start,
    /// Clean, or resume after a pause (`AggO`).
    Resume,
    /// `AggN`.
    Pause,
    /// Return to the dock (`AggG`).
    ReturnHome,
}

impl WorkCommand {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Self::Start => &[0x00],
            Self::Resume => &[0x02, 0x08, 0x0e],
            Self::Pause => &[0x02, 0x08, 0x0d],
            Self::ReturnHome => &[0x02, 0x08, 0x06],
        }
    }

    /// The base64 form written to DPS 152.
    pub fn encoded(self) -> String {
        STANDARD.encode(self.bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        Self::iter().find(|command| command.bytes() == bytes)
    }

    /// DPS 5 mode written after the command.
    pub fn follow_up_mode(self) -> Option<CleaningMode> {
        match self {
            Self::Start => Some(CleaningMode::Smart),
            Self::Pause => Some(CleaningMode::Pause),
            Self::ReturnHome => Some(CleaningMode::Charge),
            Self::Resume => None,
        }
    }
}

/// A control map writing one Data Point.
pub fn encode_command(index: u8, value: impl Into<DpsValue>) -> DpsMap {
    DpsMap::single(index, value)
}

// ── VacuumDps ────────────────────────────────────────────────────────

/// Typed view of a vacuum's Data Points.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VacuumDps {
    /// Percent, from DPS 8 or DPS 163.
    pub battery: Field<u8>,
    /// From DPS 9 or DPS 158.
    pub fan_speed: Field<FanSpeed>,
    pub mode: Field<CleaningMode>,
    /// DPS 152, decoded from base64.
    pub command: Field<Vec<u8>>,
    /// DPS 153, decoded from base64.
    pub work_status: Field<Vec<u8>>,
    pub status_code: Field<i64>,
    pub status_detail: Field<i64>,
    pub room_selection: Field<String>,
    /// Indices the model does not interpret.
    pub unknown: DpsMap,
}

impl VacuumDps {
    pub fn decode(dps: &DpsMap) -> Self {
        let unknown = dps
            .iter()
            .filter(|(idx, _)| !index::KNOWN.contains(*idx))
            .map(|(idx, value)| (*idx, value.clone()))
            .collect();

        Self {
            battery: prefer(battery(dps, index::BATTERY), || {
                battery(dps, index::BATTERY_ALT)
            }),
            fan_speed: prefer(fan_speed(dps, index::FAN_SPEED), || {
                fan_speed(dps, index::FAN_SPEED_APP)
            }),
            mode: string(dps, index::MODE).map(|r| {
                r.map(|s| {
                    CleaningMode::from_str(s).unwrap_or_else(|_| CleaningMode::Other(s.to_owned()))
                })
            }),
            command: bytes(dps, index::COMMAND),
            work_status: bytes(dps, index::WORK_STATUS),
            status_code: integer(dps, index::STATUS_CODE),
            status_detail: integer(dps, index::STATUS_DETAIL),
            room_selection: string(dps, index::ROOM_SELECTION).map(|r| r.map(str::to_owned)),
            unknown,
        }
    }

    pub fn battery_level(&self) -> Option<u8> {
        ok(&self.battery)
    }

    pub fn fan_speed(&self) -> Option<FanSpeed> {
        ok(&self.fan_speed)
    }

    pub fn mode(&self) -> Option<CleaningMode> {
        ok(&self.mode)
    }

    /// The fault code, when DPS 6 reports one.
    pub fn error_code(&self) -> Option<i64> {
        ok(&self.status_code).filter(|code| *code >= status::ERROR_CODE_FLOOR)
    }

    /// The last work command the device echoed on DPS 152.
    pub fn last_command(&self) -> Option<WorkCommand> {
        ok_ref(&self.command).and_then(|bytes| WorkCommand::from_bytes(bytes))
    }

    /// Derive the device status from the decoded fields.
    pub fn status(&self) -> DeviceStatus {
        status::decode(
            ok_ref(&self.work_status).map(Vec::as_slice),
            ok_ref(&self.command).map(Vec::as_slice),
            ok(&self.status_code),
            ok(&self.status_detail),
            self.battery_level(),
        )
    }

    /// Every field that failed to decode.
    pub fn errors(&self) -> Vec<&DecodeError> {
        [
            self.battery.as_ref().and_then(|r| r.as_ref().err()),
            self.fan_speed.as_ref().and_then(|r| r.as_ref().err()),
            self.mode.as_ref().and_then(|r| r.as_ref().err()),
            self.command.as_ref().and_then(|r| r.as_ref().err()),
            self.work_status.as_ref().and_then(|r| r.as_ref().err()),
            self.status_code.as_ref().and_then(|r| r.as_ref().err()),
            self.status_detail.as_ref().and_then(|r| r.as_ref().err()),
            self.room_selection.as_ref().and_then(|r| r.as_ref().err()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

// ── Field decoders ───────────────────────────────────────────────────

fn ok<T: Clone>(field: &Field<T>) -> Option<T> {
    ok_ref(field).cloned()
}

fn ok_ref<T>(field: &Field<T>) -> Option<&T> {
    field.as_ref().and_then(|r| r.as_ref().ok())
}

/// Use `primary` if it decoded; otherwise try `fallback`, keeping the
/// primary's error when neither decodes.
fn prefer<T>(primary: Field<T>, fallback: impl FnOnce() -> Field<T>) -> Field<T> {
    match primary {
        Some(Ok(value)) => Some(Ok(value)),
        primary => match fallback() {
            Some(Ok(value)) => Some(Ok(value)),
            fallback => primary.or(fallback),
        },
    }
}

fn wrong_type(index: u8, expected: &'static str, value: &DpsValue) -> DecodeError {
    DecodeError::WrongType {
        index,
        expected,
        found: value.type_name(),
    }
}

fn integer(dps: &DpsMap, index: u8) -> Field<i64> {
    dps.get(index).map(|value| match value {
        DpsValue::Integer(i) => Ok(*i),
        DpsValue::String(s) => s
            .trim()
            .parse()
            .map_err(|_| wrong_type(index, "integer", value)),
        other => Err(wrong_type(index, "integer", other)),
    })
}

fn string(dps: &DpsMap, index: u8) -> Field<&str> {
    dps.get(index).map(|value| {
        value
            .as_str()
            .ok_or_else(|| wrong_type(index, "string", value))
    })
}

fn bytes(dps: &DpsMap, index: u8) -> Field<Vec<u8>> {
    string(dps, index).map(|r| {
        r.and_then(|s| {
            STANDARD.decode(s).map_err(|e| DecodeError::Base64 {
                index,
                reason: e.to_string(),
            })
        })
    })
}

fn battery(dps: &DpsMap, index: u8) -> Field<u8> {
    integer(dps, index).map(|r| {
        r.and_then(|value| {
            u8::try_from(value)
                .ok()
                .filter(|percent| *percent <= 100)
                .ok_or(DecodeError::OutOfRange { index, value })
        })
    })
}

fn fan_speed(dps: &DpsMap, index: u8) -> Field<FanSpeed> {
    string(dps, index).map(|r| {
        r.and_then(|s| {
            s.parse().map_err(|_| DecodeError::UnknownVariant {
                index,
                value: s.to_owned(),
            })
        })
    })
}
