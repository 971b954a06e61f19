// ── Domain model ──
//
// Typed views over raw Data Points, and the status derived from them.

pub mod dps;
pub mod status;

pub use dps::{
    CleaningMode, DecodeError, FanSpeed, Field, VacuumDps, WorkCommand, encode_command, index,
};
pub use status::{DeviceStatus, DockSubstatus, StatusTracker, Transition};
