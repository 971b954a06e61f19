//! CLI configuration: thin wrapper around `robovac_config` shared types.
//!
//! Adds resolution that respects `GlobalOpts` flag overrides
//! (--host, --device-id, --local-key, ...).

use secrecy::SecretString;

use robovac_config::DeviceProfile;
use robovac_core::DeviceConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use robovac_config::{Config, config_path, load_config, save_config};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Pick the device profile and apply flag overrides.
///
/// With no profiles configured and no `--device`, the device is built from
/// `--device-id`, `--host`, and `--local-key` alone.
pub fn resolve_device(global: &GlobalOpts, cfg: &Config) -> Result<DeviceConfig, CliError> {
    if global.device.is_none() && cfg.devices.is_empty() {
        return device_from_flags(global, cfg);
    }

    let (name, profile) = cfg.device(global.device.as_deref())?;
    let mut profile = profile.clone();
    apply_overrides(&mut profile, global);

    // Local key: flag > env/keyring/plaintext chain
    let local_key = match global.local_key {
        Some(ref key) => SecretString::from(key.clone()),
        None => robovac_config::resolve_local_key(&profile, name)?,
    };

    Ok(robovac_config::profile_with_key(
        &profile,
        name,
        &cfg.defaults,
        local_key,
    )?)
}

fn apply_overrides(profile: &mut DeviceProfile, global: &GlobalOpts) {
    if let Some(ref host) = global.host {
        profile.host.clone_from(host);
    }
    if let Some(ref device_id) = global.device_id {
        profile.device_id.clone_from(device_id);
    }
    if global.port.is_some() {
        profile.port = global.port;
    }
    if global.timeout.is_some() {
        profile.timeout = global.timeout;
    }
}

fn device_from_flags(global: &GlobalOpts, cfg: &Config) -> Result<DeviceConfig, CliError> {
    let (Some(device_id), Some(_)) = (global.device_id.as_deref(), global.host.as_deref()) else {
        return Err(CliError::NoConfig {
            path: config_path().display().to_string(),
        });
    };
    let local_key = global
        .local_key
        .clone()
        .ok_or_else(|| CliError::NoLocalKey {
            device: device_id.to_owned(),
        })?;

    let mut profile = DeviceProfile::default();
    apply_overrides(&mut profile, global);

    Ok(robovac_config::profile_with_key(
        &profile,
        device_id,
        &cfg.defaults,
        SecretString::from(local_key),
    )?)
}
