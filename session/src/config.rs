//! Session configuration

use shared::SessionSettings;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceConfig {
    /// Capacity requested when creating a lobby.
    pub max_members: usize,
    /// Published under the `name` metadata key.
    pub lobby_name: String,
    /// Ticks per second for the driver loop.
    pub tick_rate: u32,
    /// Toggles written when a lobby is created.
    pub settings: SessionSettings,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            max_members: 8,
            lobby_name: "Presence Lobby".to_string(),
            tick_rate: 30,
            settings: SessionSettings::default(),
        }
    }
}

impl PresenceConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_rate.max(1) as f32)
    }
}
