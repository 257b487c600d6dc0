//! Node configuration (§6 "Configuration (recognized options,
//! enumerated)"): `serde`-deserializable from TOML, every recognized
//! option present and documented, unknown keys rejected at load time
//! rather than silently ignored.

use aidmesh_dtn::DtnConfig;
use aidmesh_mesh::adapters::LoraConfig;
use aidmesh_mesh::{AdapterKind, MeshConfig};
use aidmesh_session::TrustMode;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::AidmeshError;

/// Mirrors [`AdapterKind`] for TOML (de)serialization — `AdapterKind`
/// itself carries no serde derive since it is an internal mesh-crate
/// concept, not a wire or config format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    Ble,
    LocalNet,
    Lora,
}

impl From<TransportKind> for AdapterKind {
    fn from(kind: TransportKind) -> Self {
        match kind {
            TransportKind::Ble => AdapterKind::Ble,
            TransportKind::LocalNet => AdapterKind::LocalNet,
            TransportKind::Lora => AdapterKind::Lora,
        }
    }
}

impl From<AdapterKind> for TransportKind {
    fn from(kind: AdapterKind) -> Self {
        match kind {
            AdapterKind::Ble => TransportKind::Ble,
            AdapterKind::LocalNet => TransportKind::LocalNet,
            AdapterKind::Lora => TransportKind::Lora,
        }
    }
}

/// Mirrors [`TrustMode`] for TOML (de)serialization, for the same
/// reason as [`TransportKind`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustModeSetting {
    Strict,
    Tofu,
}

impl From<TrustModeSetting> for TrustMode {
    fn from(mode: TrustModeSetting) -> Self {
        match mode {
            TrustModeSetting::Strict => TrustMode::Strict,
            TrustModeSetting::Tofu => TrustMode::Tofu,
        }
    }
}

/// `lora: { channel, region }` (§6, only meaningful when `lora` is
/// among `enabled_transports`).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoraSettings {
    pub channel: u32,
    pub region: String,
}

impl From<&LoraSettings> for LoraConfig {
    fn from(settings: &LoraSettings) -> Self {
        LoraConfig {
            channel: settings.channel,
            region: settings.region.clone(),
        }
    }
}

fn default_enabled_transports() -> Vec<TransportKind> {
    vec![TransportKind::LocalNet]
}

fn default_true() -> bool {
    true
}

fn default_dtn_budget_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_dtn_default_ttl_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_message_ttl() -> u8 {
    8
}

fn default_peer_idle_eviction_ms() -> u64 {
    10 * 60 * 1000
}

fn default_sync_debounce_ms() -> u64 {
    200
}

fn default_sync_deadline_ms() -> u64 {
    10_000
}

fn default_trust_mode() -> TrustModeSetting {
    // Open Question resolved (SPEC_FULL §9): tofu is the default.
    TrustModeSetting::Tofu
}

fn default_key_derivation_work_factor() -> u32 {
    19 * 1024
}

/// A node's full runtime configuration (§6). Deserialized from TOML
/// with `#[serde(deny_unknown_fields)]` so a typo or stale key is
/// caught at load time instead of silently ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_enabled_transports")]
    pub enabled_transports: Vec<TransportKind>,

    #[serde(default = "default_true")]
    pub dtn_enabled: bool,

    #[serde(default = "default_dtn_budget_bytes")]
    pub dtn_budget_bytes: u64,

    #[serde(default = "default_dtn_default_ttl_ms")]
    pub dtn_default_ttl_ms: u64,

    #[serde(default = "default_message_ttl")]
    pub message_ttl: u8,

    #[serde(default = "default_peer_idle_eviction_ms")]
    pub peer_idle_eviction_ms: u64,

    #[serde(default = "default_sync_debounce_ms")]
    pub sync_debounce_ms: u64,

    #[serde(default = "default_sync_deadline_ms")]
    pub sync_deadline_ms: u64,

    #[serde(default = "default_trust_mode")]
    pub trust_mode: TrustModeSetting,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lora: Option<LoraSettings>,

    #[serde(default = "default_key_derivation_work_factor")]
    pub key_derivation_work_factor: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled_transports: default_enabled_transports(),
            dtn_enabled: default_true(),
            dtn_budget_bytes: default_dtn_budget_bytes(),
            dtn_default_ttl_ms: default_dtn_default_ttl_ms(),
            message_ttl: default_message_ttl(),
            peer_idle_eviction_ms: default_peer_idle_eviction_ms(),
            sync_debounce_ms: default_sync_debounce_ms(),
            sync_deadline_ms: default_sync_deadline_ms(),
            trust_mode: default_trust_mode(),
            lora: None,
            key_derivation_work_factor: default_key_derivation_work_factor(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, AidmeshError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, AidmeshError> {
        let config: Self = toml::from_str(text).map_err(|err| AidmeshError::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AidmeshError> {
        if self.enabled_transports.contains(&TransportKind::Lora) && self.lora.is_none() {
            return Err(AidmeshError::Config(
                "lora is enabled but no [lora] settings were provided".into(),
            ));
        }
        Ok(())
    }

    pub fn mesh_config(&self) -> MeshConfig {
        MeshConfig {
            message_ttl: self.message_ttl,
            peer_idle_eviction_ms: self.peer_idle_eviction_ms,
            deadline_ms: self.sync_deadline_ms,
            seen_cache_capacity: 4096,
        }
    }

    pub fn dtn_config(&self) -> DtnConfig {
        DtnConfig {
            budget_bytes: self.dtn_budget_bytes,
            default_ttl_ms: self.dtn_default_ttl_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = Config::default();
        let text = toml::to_string(&config).unwrap();
        let reloaded = Config::parse(&text).unwrap();
        assert_eq!(reloaded.message_ttl, config.message_ttl);
        assert_eq!(reloaded.trust_mode, TrustModeSetting::Tofu);
    }

    #[test]
    fn unknown_key_is_rejected() {
        let err = Config::parse("message_ttl = 4\nbogus_option = true\n").unwrap_err();
        assert!(matches!(err, AidmeshError::Config(_)));
    }

    #[test]
    fn lora_enabled_without_settings_is_rejected() {
        let err = Config::parse("enabled_transports = [\"lora\"]\n").unwrap_err();
        assert!(matches!(err, AidmeshError::Config(_)));
    }

    #[test]
    fn lora_settings_parse_when_enabled() {
        let config = Config::parse(
            "enabled_transports = [\"lora\"]\n[lora]\nchannel = 3\nregion = \"US915\"\n",
        )
        .unwrap();
        assert_eq!(config.lora.unwrap().channel, 3);
    }
}
