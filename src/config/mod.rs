use std::env;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::types::Result;

/// Default config file location, overridable with `SVID_SIDECAR_CONFIG`
const DEFAULT_CONFIG_PATH: &str = "sidecar.yaml";

/// Main configuration structure for the sidecar
///
/// Every legacy camelCase field name is still accepted; specifying both the
/// legacy and the canonical form of the same field is rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Workload API socket of the local agent
    pub agent_address: String,
    #[serde(rename = "agentAddress")]
    pub agent_address_deprecated: String,

    /// Command to run and reload when certificates rotate
    pub cmd: String,

    /// Argument string for `cmd`, tokenized with quote-aware splitting
    pub cmd_args: String,
    #[serde(rename = "cmdArgs")]
    pub cmd_args_deprecated: String,

    /// Directory the three artifact files are written into
    pub cert_dir: String,
    #[serde(rename = "certDir")]
    pub cert_dir_deprecated: String,

    /// Merge intermediate certificates into the bundle file instead of the
    /// SVID file, the format expected by consumers such as MySQL
    pub add_intermediates_to_bundle: Option<bool>,
    #[serde(rename = "addIntermediatesToBundle")]
    pub add_intermediates_to_bundle_deprecated: Option<bool>,

    /// File name for the SVID certificate chain
    pub svid_file_name: String,
    #[serde(rename = "svidFileName")]
    pub svid_file_name_deprecated: String,

    /// File name for the SVID private key
    pub svid_key_file_name: String,
    #[serde(rename = "svidKeyFileName")]
    pub svid_key_file_name_deprecated: String,

    /// File name for the trust bundle
    pub svid_bundle_file_name: String,
    #[serde(rename = "svidBundleFileName")]
    pub svid_bundle_file_name_deprecated: String,

    /// Signal delivered to the running child on rotation, e.g. "SIGHUP"
    pub renew_signal: String,
    #[serde(rename = "renewSignal")]
    pub renew_signal_deprecated: String,
}

impl SidecarConfig {
    /// Whether intermediates are relocated into the bundle file
    pub fn merge_intermediates(&self) -> bool {
        self.add_intermediates_to_bundle.unwrap_or(false)
    }
}

/// Load configuration from the default location
pub fn load_config() -> Result<SidecarConfig> {
    let config_path =
        env::var("SVID_SIDECAR_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    load_config_from(&config_path)
}

/// Load configuration from an explicit file path
pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<SidecarConfig> {
    let path = path.as_ref();
    debug!("Loading configuration from {}", path.display());

    let config_str = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

    let mut config: SidecarConfig = serde_yaml::from_str(&config_str)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))?;

    resolve_deprecated(&mut config)?;
    apply_env_overrides(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Move a value from a deprecated field into its canonical twin
fn take_deprecated(canonical: &mut String, deprecated: &mut String, old: &str, new: &str) -> Result<()> {
    if deprecated.is_empty() {
        return Ok(());
    }
    if !canonical.is_empty() {
        return Err(Error::ConfigConflict(format!("both {} and {} are set", old, new)));
    }
    warn!("{} is deprecated, use {} instead", old, new);
    *canonical = std::mem::take(deprecated);
    Ok(())
}

/// Resolve every legacy field name to its canonical form
fn resolve_deprecated(config: &mut SidecarConfig) -> Result<()> {
    let c = config;

    take_deprecated(
        &mut c.agent_address,
        &mut c.agent_address_deprecated,
        "agentAddress",
        "agent_address",
    )?;
    take_deprecated(&mut c.cmd_args, &mut c.cmd_args_deprecated, "cmdArgs", "cmd_args")?;
    take_deprecated(&mut c.cert_dir, &mut c.cert_dir_deprecated, "certDir", "cert_dir")?;
    take_deprecated(
        &mut c.svid_file_name,
        &mut c.svid_file_name_deprecated,
        "svidFileName",
        "svid_file_name",
    )?;
    take_deprecated(
        &mut c.svid_key_file_name,
        &mut c.svid_key_file_name_deprecated,
        "svidKeyFileName",
        "svid_key_file_name",
    )?;
    take_deprecated(
        &mut c.svid_bundle_file_name,
        &mut c.svid_bundle_file_name_deprecated,
        "svidBundleFileName",
        "svid_bundle_file_name",
    )?;
    take_deprecated(
        &mut c.renew_signal,
        &mut c.renew_signal_deprecated,
        "renewSignal",
        "renew_signal",
    )?;

    if c.add_intermediates_to_bundle_deprecated.is_some() {
        if c.add_intermediates_to_bundle.is_some() {
            return Err(Error::ConfigConflict(
                "both addIntermediatesToBundle and add_intermediates_to_bundle are set".into(),
            ));
        }
        warn!("addIntermediatesToBundle is deprecated, use add_intermediates_to_bundle instead");
        c.add_intermediates_to_bundle = c.add_intermediates_to_bundle_deprecated.take();
    }

    Ok(())
}

/// Apply environment variable overrides to configuration
fn apply_env_overrides(config: &mut SidecarConfig) {
    if config.agent_address.is_empty() {
        if let Ok(addr) = env::var("SPIRE_AGENT_ADDRESS") {
            config.agent_address = addr;
        }
    }
}

/// Validate configuration values
fn validate_config(config: &SidecarConfig) -> Result<()> {
    if config.agent_address.is_empty() {
        return Err(Error::Config("agent_address is required".into()));
    }
    if config.svid_file_name.is_empty() {
        return Err(Error::Config("svid_file_name is required".into()));
    }
    if config.svid_key_file_name.is_empty() {
        return Err(Error::Config("svid_key_file_name is required".into()));
    }
    if config.svid_bundle_file_name.is_empty() {
        return Err(Error::Config("svid_bundle_file_name is required".into()));
    }
    if !config.cmd.is_empty() && config.renew_signal.is_empty() {
        return Err(Error::Config("renew_signal is required when cmd is set".into()));
    }

    Ok(())
}
