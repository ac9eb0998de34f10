//! What the session layer needs from the game around it

use log::{debug, info};
use shared::{EffectEvent, EntityId, SessionInfo};

/// Game-side collaborator: navigation, level lookup and user-facing notices.
pub trait Host {
    /// Return to the game's idle screen (main menu or equivalent).
    fn load_idle_screen(&mut self);

    /// Identifier of the level currently loaded.
    fn current_level(&self) -> String;

    /// Show a message to the local user.
    fn notify(&mut self, message: &str);

    /// Called whenever the session is entered or left.
    fn session_changed(&mut self, _session: Option<&SessionInfo>) {}

    /// Play an effect that landed on `entity` this tick.
    fn play_effect(&mut self, _entity: EntityId, _effect: &EffectEvent) {}
}

/// Host without a game attached. Logs everything and records what it was
/// asked to do so callers can inspect it afterwards.
#[derive(Debug, Clone, Default)]
pub struct HeadlessHost {
    pub level: String,
    pub notifications: Vec<String>,
    pub idle_screen_loads: usize,
    pub session_changes: usize,
    pub effects: Vec<(EntityId, EffectEvent)>,
}

impl HeadlessHost {
    pub fn new(level: &str) -> Self {
        Self {
            level: level.to_string(),
            ..Self::default()
        }
    }
}

impl Host for HeadlessHost {
    fn load_idle_screen(&mut self) {
        info!("Loading idle screen");
        self.idle_screen_loads += 1;
    }

    fn current_level(&self) -> String {
        self.level.clone()
    }

    fn notify(&mut self, message: &str) {
        info!("Notice: {}", message);
        self.notifications.push(message.to_string());
    }

    fn session_changed(&mut self, session: Option<&SessionInfo>) {
        match session {
            Some(info) => info!("Now in {} owned by {}", info.id, info.owner),
            None => info!("No longer in a session"),
        }
        self.session_changes += 1;
    }

    fn play_effect(&mut self, entity: EntityId, effect: &EffectEvent) {
        debug!("Effect {} on {} from {}", effect.effect, entity, effect.source);
        self.effects.push((entity, *effect));
    }
}
