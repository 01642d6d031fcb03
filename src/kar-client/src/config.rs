//! Configuration management for kar-client

use crate::cli::RunArgs;
use anyhow::{bail, Context, Result};
use kar_bridge::{AddressOverride, AddressTable, BridgeConfig, ChecklistLayout, HealthBand};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_SERVER: &str = "archipelago.gg:38281";
pub const DEFAULT_PLATFORM: &str = "gkye01";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeathConfig {
    pub dead_below: f32,
    pub alive_above: f32,
    /// After a run starts, deaths are not detected and items wait
    pub grace_ms: u64,
}

impl Default for DeathConfig {
    fn default() -> Self {
        let band = HealthBand::default();
        Self {
            dead_below: band.dead_below,
            alive_above: band.alive_above,
            grace_ms: 6000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1000,
            max_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slot: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub platform: String,
    pub poll_interval_ms: u64,
    pub tick_timeout_ms: u64,
    pub reattach_interval_ms: u64,
    pub death_link: bool,
    pub death: DeathConfig,
    pub backoff: BackoffConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checklist: Option<ChecklistLayout>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub addresses: BTreeMap<String, AddressOverride>,
    /// Goal location name to checklist location id, on top of the built-in names
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub goals: BTreeMap<String, i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: DEFAULT_SERVER.to_string(),
            slot: None,
            password: None,
            platform: DEFAULT_PLATFORM.to_string(),
            poll_interval_ms: 250,
            tick_timeout_ms: 2000,
            reattach_interval_ms: 5000,
            death_link: false,
            death: DeathConfig::default(),
            backoff: BackoffConfig::default(),
            checklist: None,
            addresses: BTreeMap::new(),
            goals: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Get the path to the config file
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("kar-client");

        Ok(config_dir.join("config.toml"))
    }

    /// Directory holding per-session watermark files
    pub fn data_dir() -> Result<PathBuf> {
        Ok(dirs::data_dir()
            .context("Could not determine data directory")?
            .join("kar-client"))
    }

    /// Load configuration from file, or defaults if it doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory at {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    /// Command-line flags win over the file
    pub fn apply_args(&mut self, args: &RunArgs) {
        if let Some(server) = &args.server {
            self.server = server.clone();
        }
        if let Some(slot) = &args.slot {
            self.slot = Some(slot.clone());
        }
        if let Some(password) = &args.password {
            self.password = Some(password.clone());
        }
        if let Some(platform) = &args.platform {
            self.platform = platform.clone();
        }
        if let Some(poll) = args.poll_ms {
            self.poll_interval_ms = poll;
        }
        if args.death_link {
            self.death_link = true;
        }
    }

    /// Set a single top-level value by key, as used by `configure`
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "server" => self.server = value.to_string(),
            "slot" => self.slot = Some(value.to_string()),
            "password" => self.password = Some(value.to_string()),
            "platform" => {
                AddressTable::builtin(value)?;
                self.platform = value.to_string();
            }
            "poll_interval_ms" => {
                self.poll_interval_ms = value.parse().context("poll_interval_ms must be a number")?
            }
            "death_link" => {
                self.death_link = value.parse().context("death_link must be true or false")?
            }
            other => bail!("Unknown config key: {}", other),
        }
        Ok(())
    }

    /// Builtin profile with configured overrides applied
    pub fn address_table(&self) -> Result<AddressTable> {
        let mut table = AddressTable::builtin(&self.platform)
            .with_context(|| format!("Invalid platform profile '{}'", self.platform))?;
        table
            .apply_overrides(&self.addresses)
            .context("Invalid address override")?;
        if let Some(layout) = self.checklist {
            table.set_checklist(layout);
        }
        Ok(table)
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            band: HealthBand {
                dead_below: self.death.dead_below,
                alive_above: self.death.alive_above,
            },
            grace_ticks: self.death.grace_ms.div_ceil(self.poll_interval_ms.max(1)),
        }
    }

    /// WebSocket URL for the server, `ws://` unless a scheme is given
    pub fn server_url(&self) -> String {
        if self.server.contains("://") {
            self.server.clone()
        } else {
            format!("ws://{}", self.server)
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms)
    }

    pub fn reattach_interval(&self) -> Duration {
        Duration::from_millis(self.reattach_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kar_bridge::{Endianness, Field};
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server, DEFAULT_SERVER);
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            slot = "Kirby"
            death_link = true

            [death]
            alive_above = 10.0
            "#,
        )
        .unwrap();

        assert_eq!(config.slot.as_deref(), Some("Kirby"));
        assert!(config.death_link);
        assert_eq!(config.death.alive_above, 10.0);
        assert_eq!(config.death.dead_below, 0.5);
        assert_eq!(config.backoff.max_ms, 30_000);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.slot = Some("Meta".to_string());
        config.checklist = Some(ChecklistLayout::default());
        config.addresses.insert(
            "vehicle_id".to_string(),
            AddressOverride {
                address: 0x8055_AA40,
                width: None,
                endian: None,
                deref: None,
            },
        );
        config.save_to(&path).unwrap();

        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_address_overrides() {
        let mut config = Config::default();
        config.addresses.insert(
            "vehicle_id".to_string(),
            AddressOverride {
                address: 0x8055_AA40,
                width: None,
                endian: Some(Endianness::Little),
                deref: None,
            },
        );

        let table = config.address_table().unwrap();
        let entry = table.resolve(Field::VehicleId).unwrap();
        assert_eq!(entry.address, 0x8055_AA40);
        assert_eq!(entry.width, 2);
        assert_eq!(entry.endian, Endianness::Little);
    }

    #[test]
    fn test_bad_profile_and_field_are_errors() {
        let mut config = Config::default();
        config.platform = "pal".to_string();
        assert!(config.address_table().is_err());

        let mut config = Config::default();
        config.addresses.insert(
            "warp_star".to_string(),
            AddressOverride {
                address: 0,
                width: None,
                endian: None,
                deref: None,
            },
        );
        assert!(config.address_table().is_err());
    }

    #[test]
    fn test_goal_names_from_file() {
        let config: Config = toml::from_str(
            r#"
            [goals]
            "In one match, complete both Dragoon and Hydra!" = 112
            "#,
        )
        .unwrap();

        assert_eq!(
            config.goals.get("In one match, complete both Dragoon and Hydra!"),
            Some(&112)
        );
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        let args = RunArgs {
            server: Some("localhost:38281".to_string()),
            slot: Some("Kirby".to_string()),
            poll_ms: Some(100),
            death_link: true,
            ..Default::default()
        };
        config.apply_args(&args);

        assert_eq!(config.server, "localhost:38281");
        assert_eq!(config.slot.as_deref(), Some("Kirby"));
        assert_eq!(config.poll_interval_ms, 100);
        assert!(config.death_link);
        assert_eq!(config.platform, DEFAULT_PLATFORM);
    }

    #[test]
    fn test_server_url() {
        let mut config = Config::default();
        assert_eq!(config.server_url(), "ws://archipelago.gg:38281");

        config.server = "wss://archipelago.gg:38281".to_string();
        assert_eq!(config.server_url(), "wss://archipelago.gg:38281");
    }

    #[test]
    fn test_grace_ticks_round_up() {
        let mut config = Config::default();
        assert_eq!(config.bridge_config().grace_ticks, 24);

        config.poll_interval_ms = 400;
        assert_eq!(config.bridge_config().grace_ticks, 15);

        config.poll_interval_ms = 0;
        assert_eq!(config.bridge_config().grace_ticks, 6000);
    }

    #[test]
    fn test_set_keys() {
        let mut config = Config::default();
        config.set("slot", "Kirby").unwrap();
        config.set("death_link", "true").unwrap();
        config.set("platform", "gkye01-host").unwrap();

        assert_eq!(config.slot.as_deref(), Some("Kirby"));
        assert!(config.death_link);
        assert_eq!(config.platform, "gkye01-host");

        assert!(config.set("platform", "nope").is_err());
        assert!(config.set("poll_interval_ms", "fast").is_err());
        assert!(config.set("color", "pink").is_err());
    }
}
