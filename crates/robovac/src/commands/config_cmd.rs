//! Config subcommand handlers.

use std::fmt::Write as _;

use secrecy::SecretString;
use serde::Serialize;
use tabled::Tabled;

use robovac_config::{load_config_or_default, store_local_key};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;
use crate::output;

const MASK: &str = "****";

// ── Helpers ─────────────────────────────────────────────────────────

/// Replace plaintext local keys so the config can be shown safely.
fn redact(cfg: &mut Config) {
    for profile in cfg.devices.values_mut() {
        if profile.local_key.is_some() {
            profile.local_key = Some(MASK.into());
        }
    }
}

/// Format a redacted config as TOML-like text.
fn format_config(cfg: &Config) -> String {
    let mut out = String::new();

    if let Some(ref default) = cfg.default_device {
        let _ = writeln!(out, "default_device = \"{default}\"");
        let _ = writeln!(out);
    }
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);
    let _ = writeln!(out, "keepalive_interval = {}", cfg.defaults.keepalive_interval);
    let _ = writeln!(out, "keepalive_timeout = {}", cfg.defaults.keepalive_timeout);

    for name in cfg.device_names() {
        let Some(p) = cfg.devices.get(&name) else {
            continue;
        };
        let _ = writeln!(out);
        let _ = writeln!(out, "[devices.{name}]");
        let _ = writeln!(out, "device_id = \"{}\"", p.device_id);
        let _ = writeln!(out, "host = \"{}\"", p.host);
        if let Some(port) = p.port {
            let _ = writeln!(out, "port = {port}");
        }
        if let Some(ref label) = p.name {
            let _ = writeln!(out, "name = \"{label}\"");
        }
        if let Some(ref key) = p.local_key {
            let _ = writeln!(out, "local_key = \"{key}\"");
        }
        if let Some(ref env) = p.local_key_env {
            let _ = writeln!(out, "local_key_env = \"{env}\"");
        }
        if let Some(timeout) = p.timeout {
            let _ = writeln!(out, "timeout = {timeout}");
        }
        if let Some(poll) = p.poll_interval {
            let _ = writeln!(out, "poll_interval = {poll}");
        }
        if !p.rooms.is_empty() {
            let _ = writeln!(out, "rooms = {}", p.rooms.len());
        }
    }

    out.trim_end().to_owned()
}

#[derive(Serialize)]
struct DeviceEntry<'a> {
    name: &'a str,
    device_id: &'a str,
    host: &'a str,
    rooms: usize,
    default: bool,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "")]
    marker: &'static str,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Device ID")]
    device_id: String,
    #[tabled(rename = "Host")]
    host: String,
    #[tabled(rename = "Rooms")]
    rooms: usize,
}

fn device_entries<'a>(cfg: &'a Config, names: &'a [String]) -> Vec<DeviceEntry<'a>> {
    // The implicit default is the only device when none is set.
    let default = cfg.device(None).ok().map(|(name, _)| name);

    names
        .iter()
        .filter_map(|name| {
            cfg.devices.get(name).map(|p| DeviceEntry {
                name: name.as_str(),
                device_id: &p.device_id,
                host: &p.host,
                rooms: p.rooms.len(),
                default: default == Some(name.as_str()),
            })
        })
        .collect()
}

fn unknown_device(cfg: &Config, name: String) -> CliError {
    let available = cfg.device_names();
    CliError::NotFound {
        resource_type: "device".into(),
        identifier: name,
        available: if available.is_empty() {
            "(none)".into()
        } else {
            available.join(", ")
        },
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Show => {
            let mut cfg = config::load_config()?;
            redact(&mut cfg);
            let out = output::render_single(&global.output, &cfg, format_config, |_| {
                config::config_path().display().to_string()
            })?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&config::config_path().display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Devices => {
            let cfg = config::load_config()?;
            if cfg.devices.is_empty() {
                eprintln!(
                    "No devices configured. Add a [devices.<name>] table to {}",
                    config::config_path().display()
                );
                return Ok(());
            }
            let names = cfg.device_names();
            let entries = device_entries(&cfg, &names);
            let out = output::render_list(
                &global.output,
                &entries,
                |e| DeviceRow {
                    marker: if e.default { "*" } else { "" },
                    name: e.name.to_owned(),
                    device_id: e.device_id.to_owned(),
                    host: e.host.to_owned(),
                    rooms: e.rooms,
                },
                |e| e.name.to_owned(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = load_config_or_default();
            if !cfg.devices.contains_key(&name) {
                return Err(unknown_device(&cfg, name));
            }
            cfg.default_device = Some(name.clone());
            config::save_config(&cfg)?;
            eprintln!("✓ Default device set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetKey { name } => {
            let cfg = load_config_or_default();
            let name = match name.or_else(|| global.device.clone()) {
                Some(name) => name,
                None => cfg.device(None)?.0.to_owned(),
            };
            if !cfg.devices.contains_key(&name) {
                return Err(unknown_device(&cfg, name));
            }

            let key = rpassword::prompt_password("Local key: ").map_err(|e| {
                CliError::Validation {
                    field: "local_key".into(),
                    reason: format!("prompt failed: {e}"),
                }
            })?;
            store_local_key(&name, &SecretString::from(key))?;
            eprintln!("✓ Local key for '{name}' stored in system keyring");
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use robovac_config::DeviceProfile;

    fn sample() -> Config {
        let mut cfg = Config::default();
        cfg.devices.insert(
            "hall".into(),
            DeviceProfile {
                device_id: "eb0123456789abcdef".into(),
                host: "192.168.1.50".into(),
                local_key: Some("0123456789abcdef".into()),
                rooms: [("kitchen".to_owned(), "AggB".to_owned())].into(),
                ..DeviceProfile::default()
            },
        );
        cfg
    }

    #[test]
    fn show_masks_local_keys() {
        let mut cfg = sample();
        redact(&mut cfg);
        let text = format_config(&cfg);

        assert!(text.contains("[devices.hall]"));
        assert!(text.contains("local_key = \"****\""));
        assert!(!text.contains("\"0123456789abcdef\""));
    }

    #[test]
    fn single_device_is_the_implicit_default() {
        let cfg = sample();
        let names = cfg.device_names();
        let entries = device_entries(&cfg, &names);

        assert_eq!(entries.len(), 1);
        assert!(entries[0].default);
        assert_eq!(entries[0].rooms, 1);
    }
}
