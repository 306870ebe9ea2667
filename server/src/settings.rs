//! Game settings and their persistence
//!
//! Settings are loaded once at startup and then only change through
//! [`SettingsHandle::update`], which writes the new values back to the store
//! before returning. Operator access by name goes through [`SettingKey`],
//! a fixed table of the integer settings.

use crate::error::ConfigError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub countdown_seconds: u32,
    /// Pause between warping everyone to a new preset and the countdown.
    pub warp_delay_seconds: u32,
    pub cooldown_seconds: u32,
    /// Automatic rounds are force-ended after this long.
    pub max_round_seconds: u32,
    pub max_games_per_preset: u32,
    /// Automatic rounds start with `max(1, population / infected_divisor)` infected.
    pub infected_divisor: u32,
    pub auto_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            countdown_seconds: 5,
            warp_delay_seconds: 5,
            cooldown_seconds: 10,
            max_round_seconds: 300,
            max_games_per_preset: 3,
            infected_divisor: 6,
            auto_enabled: false,
        }
    }
}

impl Settings {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_seconds.into())
    }

    pub fn warp_delay(&self) -> Duration {
        Duration::from_secs(self.warp_delay_seconds.into())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds.into())
    }

    pub fn max_round(&self) -> Duration {
        Duration::from_secs(self.max_round_seconds.into())
    }
}

/// The settings an operator can read and write by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingKey {
    CountdownSeconds,
    WarpDelaySeconds,
    CooldownSeconds,
    MaxRoundSeconds,
    MaxGamesPerPreset,
    InfectedDivisor,
}

impl SettingKey {
    pub const ALL: [SettingKey; 6] = [
        SettingKey::CountdownSeconds,
        SettingKey::WarpDelaySeconds,
        SettingKey::CooldownSeconds,
        SettingKey::MaxRoundSeconds,
        SettingKey::MaxGamesPerPreset,
        SettingKey::InfectedDivisor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SettingKey::CountdownSeconds => "countdown_seconds",
            SettingKey::WarpDelaySeconds => "warp_delay_seconds",
            SettingKey::CooldownSeconds => "cooldown_seconds",
            SettingKey::MaxRoundSeconds => "max_round_seconds",
            SettingKey::MaxGamesPerPreset => "max_games_per_preset",
            SettingKey::InfectedDivisor => "infected_divisor",
        }
    }

    pub fn from_name(name: &str) -> Option<SettingKey> {
        Self::ALL.into_iter().find(|key| key.name() == name)
    }

    fn minimum(self) -> u32 {
        match self {
            SettingKey::MaxGamesPerPreset | SettingKey::InfectedDivisor => 1,
            _ => 0,
        }
    }

    pub fn get(self, settings: &Settings) -> u32 {
        match self {
            SettingKey::CountdownSeconds => settings.countdown_seconds,
            SettingKey::WarpDelaySeconds => settings.warp_delay_seconds,
            SettingKey::CooldownSeconds => settings.cooldown_seconds,
            SettingKey::MaxRoundSeconds => settings.max_round_seconds,
            SettingKey::MaxGamesPerPreset => settings.max_games_per_preset,
            SettingKey::InfectedDivisor => settings.infected_divisor,
        }
    }

    pub fn set(self, settings: &mut Settings, value: u32) {
        let field = match self {
            SettingKey::CountdownSeconds => &mut settings.countdown_seconds,
            SettingKey::WarpDelaySeconds => &mut settings.warp_delay_seconds,
            SettingKey::CooldownSeconds => &mut settings.cooldown_seconds,
            SettingKey::MaxRoundSeconds => &mut settings.max_round_seconds,
            SettingKey::MaxGamesPerPreset => &mut settings.max_games_per_preset,
            SettingKey::InfectedDivisor => &mut settings.infected_divisor,
        };
        *field = value;
    }

    /// Type-checks a raw operator value for this setting.
    pub fn parse(self, raw: &str) -> Result<u32, String> {
        let value: u32 = raw.parse().map_err(|_| {
            format!(
                "`{}` expects a whole number, got `{}`",
                self.name(),
                raw
            )
        })?;
        if value < self.minimum() {
            return Err(format!(
                "`{}` must be at least {}",
                self.name(),
                self.minimum()
            ));
        }
        Ok(value)
    }
}

/// Durable storage for [`Settings`]
pub trait SettingsStore: Send + Sync {
    fn load(&self) -> Result<Settings, ConfigError>;
    fn save(&self, settings: &Settings) -> Result<(), ConfigError>;
}

/// Settings kept as a pretty-printed JSON document on disk
#[derive(Debug, Clone)]
pub struct JsonSettingsFile {
    path: PathBuf,
}

impl JsonSettingsFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SettingsStore for JsonSettingsFile {
    fn load(&self) -> Result<Settings, ConfigError> {
        let raw = std::fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(settings)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

/// Settings store that lives only as long as the process
#[derive(Debug, Clone, Default)]
pub struct MemorySettingsStore {
    saved: Arc<Mutex<Option<Settings>>>,
}

impl MemorySettingsStore {
    pub fn with(settings: Settings) -> Self {
        Self {
            saved: Arc::new(Mutex::new(Some(settings))),
        }
    }

    /// The last settings written, if any.
    pub fn saved(&self) -> Option<Settings> {
        self.saved.lock().ok().and_then(|guard| guard.clone())
    }
}

impl SettingsStore for MemorySettingsStore {
    fn load(&self) -> Result<Settings, ConfigError> {
        self.saved().ok_or_else(|| {
            ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no settings saved",
            ))
        })
    }

    fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        if let Ok(mut guard) = self.saved.lock() {
            *guard = Some(settings.clone());
        }
        Ok(())
    }
}

/// The process-wide settings plus the store every change is written to
pub struct SettingsHandle {
    current: Settings,
    store: Box<dyn SettingsStore>,
}

impl SettingsHandle {
    /// Loads settings from the store. A missing or unreadable document is
    /// replaced with the defaults, which are written back immediately.
    pub fn load(store: Box<dyn SettingsStore>) -> Self {
        let current = match store.load() {
            Ok(settings) => {
                info!("Loaded settings: {:?}", settings);
                settings
            }
            Err(e) => {
                if e.is_not_found() {
                    info!("No settings found, writing defaults");
                } else {
                    warn!("Settings unreadable ({}), falling back to defaults", e);
                }
                let defaults = Settings::default();
                if let Err(e) = store.save(&defaults) {
                    warn!("Failed to write default settings: {}", e);
                }
                defaults
            }
        };

        Self { current, store }
    }

    pub fn get(&self) -> &Settings {
        &self.current
    }

    /// Applies `change` and persists the result. The in-memory value is
    /// updated even when writing fails; the error is returned for reporting.
    pub fn update<F>(&mut self, change: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut Settings),
    {
        change(&mut self.current);
        self.store.save(&self.current)
    }
}
