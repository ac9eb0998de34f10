//! Session metadata keys and the gameplay toggles stored under them
//!
//! Values are plain strings on the relay's key/value store. Booleans are
//! written as `"true"` / `"false"`; anything else reads back as `false`.

use std::collections::BTreeMap;

/// Compatibility marker. Sessions without it never appear in public listings.
pub const MARKER_KEY: &str = "presence-sync";
pub const PROTOCOL_VERSION: &str = "1";

pub const NAME_KEY: &str = "name";
pub const LEVEL_KEY: &str = "level";
pub const PVP_KEY: &str = "pvp";
pub const CHEATS_KEY: &str = "cheats";
pub const MODS_KEY: &str = "mods";
pub const HEAL_BOSSES_KEY: &str = "heal-bosses";

/// Gameplay toggles published by the session owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub pvp: bool,
    pub cheats: bool,
    pub mods: bool,
    pub heal_bosses: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pvp: true,
            cheats: false,
            mods: false,
            heal_bosses: true,
        }
    }
}

impl SessionSettings {
    pub fn entries(&self) -> [(&'static str, &'static str); 4] {
        [
            (PVP_KEY, flag(self.pvp)),
            (CHEATS_KEY, flag(self.cheats)),
            (MODS_KEY, flag(self.mods)),
            (HEAL_BOSSES_KEY, flag(self.heal_bosses)),
        ]
    }

    /// Reads toggles through an arbitrary lookup, e.g. the relay's `get_data`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            pvp: parse_flag(lookup(PVP_KEY).as_deref()),
            cheats: parse_flag(lookup(CHEATS_KEY).as_deref()),
            mods: parse_flag(lookup(MODS_KEY).as_deref()),
            heal_bosses: parse_flag(lookup(HEAL_BOSSES_KEY).as_deref()),
        }
    }

    pub fn from_metadata(metadata: &BTreeMap<String, String>) -> Self {
        Self::from_lookup(|key| metadata.get(key).cloned())
    }
}

pub fn flag(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn parse_flag(value: Option<&str>) -> bool {
    matches!(value, Some("true"))
}

pub fn is_compatible(metadata: &BTreeMap<String, String>) -> bool {
    metadata.contains_key(MARKER_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_round_trip_through_metadata() {
        let settings = SessionSettings {
            pvp: false,
            cheats: true,
            mods: true,
            heal_bosses: false,
        };
        let metadata: BTreeMap<String, String> = settings
            .entries()
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        assert_eq!(SessionSettings::from_metadata(&metadata), settings);
    }

    #[test]
    fn test_missing_or_garbled_flags_read_false() {
        let mut metadata = BTreeMap::new();
        metadata.insert(PVP_KEY.to_string(), "yes".to_string());

        let settings = SessionSettings::from_metadata(&metadata);
        assert!(!settings.pvp);
        assert!(!settings.heal_bosses);
    }

    #[test]
    fn test_marker_presence_decides_compatibility() {
        let mut metadata = BTreeMap::new();
        metadata.insert(NAME_KEY.to_string(), "open".to_string());
        assert!(!is_compatible(&metadata));

        metadata.insert(MARKER_KEY.to_string(), PROTOCOL_VERSION.to_string());
        assert!(is_compatible(&metadata));
    }
}
