//! Host settings

use crate::error::SettingsError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Script host settings, usually read from a JSON file.
///
/// Missing sections and fields fall back to their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    pub script: ScriptSettings,
    pub output: OutputSettings,
    pub timer: TimerSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptSettings {
    pub path: PathBuf,
    /// Entry point invoked by a bare `run`.
    pub entry_point: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Prefix of every guest output line.
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerSettings {
    /// Global name of the timer capability inside the guest.
    pub binding: String,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scripts/script.js"),
            entry_point: "sayHelloSoon".to_string(),
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            label: "JS Console".to_string(),
        }
    }
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self {
            binding: "hostTimer".to_string(),
        }
    }
}

impl HostSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, SettingsError> {
        let settings: Self = serde_json::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if !is_identifier(&self.timer.binding) {
            return Err(SettingsError::Invalid {
                key: "timer.binding",
                reason: format!("'{}' is not a valid identifier", self.timer.binding),
            });
        }
        if self.script.entry_point.is_empty() {
            return Err(SettingsError::Invalid {
                key: "script.entry_point",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
