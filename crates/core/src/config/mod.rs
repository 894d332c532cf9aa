use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{CdgError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub player: PlayerConfig,
    pub render: RenderConfig,
}

impl AppConfig {
    /// Parses a JSON document. Missing fields fall back to their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.player.validate()?;
        self.render.validate()
    }
}

/// Timing constants of the packet stream and the host tick loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlayerConfig {
    pub packets_per_sector: u32,
    pub sectors_per_second: u32,
    /// Delay between host ticks when the crate drives its own loop.
    pub tick_interval_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            packets_per_sector: 4,
            sectors_per_second: 75,
            tick_interval_ms: 4,
        }
    }
}

impl PlayerConfig {
    /// Packets consumed per second of audio.
    pub fn packet_rate(&self) -> u64 {
        u64::from(self.packets_per_sector) * u64::from(self.sectors_per_second)
    }

    pub fn validate(&self) -> Result<()> {
        if self.packets_per_sector == 0 {
            return Err(CdgError::InvalidConfig(
                "player.packets_per_sector must be at least 1",
            ));
        }
        if self.sectors_per_second == 0 {
            return Err(CdgError::InvalidConfig(
                "player.sectors_per_second must be at least 1",
            ));
        }
        if self
            .packets_per_sector
            .checked_mul(self.sectors_per_second)
            .is_none()
        {
            return Err(CdgError::InvalidConfig(
                "player packet rate does not fit in 32 bits",
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(CdgError::InvalidConfig(
                "player.tick_interval_ms must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Configuration for presenting rendered frames.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderConfig {
    /// Integer nearest-neighbour upscaling factor.
    pub scale: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self { scale: 1 }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.scale == 0 {
            return Err(CdgError::InvalidConfig("render.scale must be at least 1"));
        }
        Ok(())
    }
}
