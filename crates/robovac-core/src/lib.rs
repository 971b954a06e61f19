//! Device model and controller between `robovac-api` and the CLI.
//!
//! - **[`Controller`]**: registers vacuums, owns one [`Session`] per device,
//!   and runs per-device background tasks that fold pushed Data Points into
//!   the store. [`Controller::oneshot()`](Controller::oneshot) wraps a
//!   single connect / act / shut down cycle for CLI invocations.
//!
//! - **[`DeviceStore`]**: `DashMap` of [`DeviceSnapshot`]s, one per
//!   registered vacuum.
//!
//! - **[`VacuumCommand`]**: high-level commands (start, pause, return, fan
//!   speed, room cleaning) expanded into ordered Data Point writes and run
//!   one at a time per device through an `mpsc` command processor.
//!
//! - **Domain model** ([`model`]): the known Data Point indices,
//!   [`VacuumDps`] typed decoding, and the [`DeviceStatus`] decoder for the
//!   base64 work-status blob.
//!
//! [`Session`]: robovac_api::Session

pub mod command;
pub mod config;
pub mod controller;
pub mod error;
pub mod model;
pub mod store;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandResult, VacuumCommand};
pub use config::{DeviceConfig, ReconnectConfig};
pub use controller::{Controller, DeviceEvent};
pub use error::CoreError;
pub use store::{DeviceSnapshot, DeviceStore};

pub use model::{
    CleaningMode, DecodeError, DeviceStatus, DockSubstatus, FanSpeed, StatusTracker, VacuumDps,
    WorkCommand,
};

// Protocol types callers need alongside the controller.
pub use robovac_api::{ConnectionState, DpsMap, DpsValue};
