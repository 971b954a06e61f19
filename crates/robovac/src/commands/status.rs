//! Status, raw query, and room listing handlers.

use serde::Serialize;
use tabled::Tabled;

use robovac_core::model::index;
use robovac_core::{Controller, DeviceConfig, DeviceSnapshot, DpsMap, DpsValue};

use crate::cli::GlobalOpts;
use crate::config::Config;
use crate::error::CliError;
use crate::output;

// ── Table rows ──────────────────────────────────────────────────────

#[derive(Tabled)]
struct DpsRow {
    #[tabled(rename = "Index")]
    index: u8,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Serialize)]
struct DpsEntry {
    index: u8,
    name: Option<&'static str>,
    value: DpsValue,
}

impl From<&DpsEntry> for DpsRow {
    fn from(e: &DpsEntry) -> Self {
        Self {
            index: e.index,
            name: e.name.unwrap_or("-").to_owned(),
            value: e.value.to_string(),
        }
    }
}

#[derive(Tabled)]
struct RoomRow {
    #[tabled(rename = "Room")]
    name: String,
    #[tabled(rename = "Payload")]
    payload: String,
}

#[derive(Serialize)]
struct Room<'a> {
    name: &'a str,
    payload: &'a str,
}

fn detail(s: &DeviceSnapshot, color: bool) -> String {
    let dash = || "-".to_owned();
    [
        format!("Name:      {}", s.name),
        format!("Device ID: {}", s.device_id),
        format!("Host:      {}", s.host),
        format!("Status:    {}", output::paint_status(s.status, color)),
        format!(
            "Battery:   {}",
            s.battery.map_or_else(dash, |b| format!("{b}%"))
        ),
        format!(
            "Fan speed: {}",
            s.fan_speed.map_or_else(dash, |f| f.to_string())
        ),
        format!(
            "Mode:      {}",
            s.mode.as_ref().map_or_else(dash, ToString::to_string)
        ),
        format!(
            "Error:     {}",
            s.error_code.map_or_else(dash, |c| c.to_string())
        ),
        format!(
            "Updated:   {}",
            s.last_update.map_or_else(dash, |t| t.to_rfc3339())
        ),
    ]
    .join("\n")
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn status(device: DeviceConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let snapshot = Controller::oneshot(device, |controller, device_id| async move {
        controller.refresh(&device_id).await
    })
    .await?;

    let color = output::should_color(&global.color);
    let out = output::render_single(
        &global.output,
        snapshot.as_ref(),
        |s| detail(s, color),
        |s| s.status.to_string(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub async fn query(device: DeviceConfig, global: &GlobalOpts) -> Result<(), CliError> {
    let dps: DpsMap = Controller::oneshot(device, |controller, device_id| async move {
        Ok(controller.refresh(&device_id).await?.dps.clone())
    })
    .await?;

    let entries: Vec<DpsEntry> = dps
        .iter()
        .map(|(idx, value)| DpsEntry {
            index: *idx,
            name: index::name(*idx),
            value: value.clone(),
        })
        .collect();

    let out = output::render_list(&global.output, &entries, |e| DpsRow::from(e), |e| {
        format!("{}={}", e.index, e.value)
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}

pub fn rooms(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let (_, profile) = cfg.device(global.device.as_deref())?;
    let rooms: Vec<Room<'_>> = profile
        .rooms
        .iter()
        .map(|(name, payload)| Room { name, payload })
        .collect();

    let out = output::render_list(
        &global.output,
        &rooms,
        |r| RoomRow {
            name: r.name.to_owned(),
            payload: r.payload.to_owned(),
        },
        |r| r.name.to_owned(),
    )?;
    output::print_output(&out, global.quiet);
    Ok(())
}
