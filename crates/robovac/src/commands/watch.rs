//! Live event streaming.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures_util::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use robovac_core::{Controller, DeviceConfig, DeviceEvent};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

pub async fn handle(
    mut device: DeviceConfig,
    args: WatchArgs,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    if let Some(secs) = args.poll {
        device.poll_interval = Some(Duration::from_secs(secs.max(1)));
    }
    let device_id = device.device_id.clone();

    let controller = Controller::default();
    controller.add_device(device).await?;
    let mut events = BroadcastStream::new(controller.events());
    controller.keep_connected(&device_id).await?;

    let color = output::should_color(&global.color);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            item = events.next() => match item {
                Some(Ok(event)) => {
                    if let Some(line) = render_event(&event, &global.output, args.raw, color)? {
                        output::print_output(&line, global.quiet);
                    }
                }
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "event stream lagged");
                }
                None => break,
            },
        }
    }

    controller.shutdown().await;
    Ok(())
}

/// One output line per event; `None` for raw updates unless `raw` is set.
fn render_event(
    event: &Arc<DeviceEvent>,
    format: &OutputFormat,
    raw: bool,
    color: bool,
) -> Result<Option<String>, CliError> {
    if !raw && matches!(event.as_ref(), DeviceEvent::DpsUpdated { .. }) {
        return Ok(None);
    }

    match format {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            Ok(Some(serde_json::to_string(event.as_ref())?))
        }
        OutputFormat::Yaml => Ok(Some(format!(
            "---\n{}",
            serde_yaml::to_string(event.as_ref())
                .map_err(|e| CliError::Internal(format!("YAML output failed: {e}")))?
        ))),
        OutputFormat::Table | OutputFormat::Plain => {
            let time = Local::now().format("%H:%M:%S");
            let text = match event.as_ref() {
                DeviceEvent::StatusChanged {
                    status, previous, ..
                } => match previous {
                    Some(previous) => format!(
                        "status  {} -> {}",
                        output::paint_status(*previous, color),
                        output::paint_status(*status, color)
                    ),
                    None => format!("status  {}", output::paint_status(*status, color)),
                },
                DeviceEvent::ConnectivityChanged { online, .. } => {
                    format!("link    {}", if *online { "online" } else { "offline" })
                }
                DeviceEvent::DpsUpdated { dps, .. } => format!("dps     {}", dps.to_json()),
            };
            Ok(Some(format!("{time}  {text}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use robovac_core::{DeviceStatus, DpsMap};

    fn status_event() -> Arc<DeviceEvent> {
        Arc::new(DeviceEvent::StatusChanged {
            device_id: "eb01".into(),
            status: DeviceStatus::Cleaning,
            previous: Some(DeviceStatus::Paused),
        })
    }

    #[test]
    fn raw_updates_are_hidden_by_default() {
        let event = Arc::new(DeviceEvent::DpsUpdated {
            device_id: "eb01".into(),
            dps: DpsMap::single(8, "90"),
        });
        let hidden = render_event(&event, &OutputFormat::Plain, false, false);
        assert!(matches!(hidden, Ok(None)));

        let shown = render_event(&event, &OutputFormat::Plain, true, false);
        assert!(matches!(shown, Ok(Some(line)) if line.ends_with(r#"dps     {"8":"90"}"#)));
    }

    #[test]
    fn status_lines_show_the_transition() {
        let line = render_event(&status_event(), &OutputFormat::Plain, false, false);
        assert!(matches!(line, Ok(Some(line)) if line.ends_with("status  Paused -> Cleaning")));
    }

    #[test]
    fn json_lines_are_tagged() {
        let line = render_event(&status_event(), &OutputFormat::Json, false, false);
        assert!(matches!(line, Ok(Some(line)) if line.starts_with(r#"{"event":"status_changed""#)));
    }
}
