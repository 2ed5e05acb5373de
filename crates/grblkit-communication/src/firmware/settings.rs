//! Device settings store
//!
//! Holds the `$n=value` pairs last reported by the device. The map is filled
//! lazily by `$$` and individual writes, so it is never assumed to be fresh.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::grbl::utils::{get_setting_name, normalize_setting_key};

/// A firmware setting parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareSetting {
    /// Setting key including the `$` prefix
    pub id: String,
    /// Current value
    pub value: String,
    /// Setting description
    pub description: String,
}

impl FirmwareSetting {
    /// Numeric value, if the setting holds a number
    pub fn numeric(&self) -> Option<f64> {
        self.value.parse().ok()
    }
}

/// Settings last reported by the device, keyed by `$n`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    values: BTreeMap<String, String>,
}

impl DeviceSettings {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a value; the key is normalized to carry a `$` prefix
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(normalize_setting_key(key), value.into());
    }

    /// Look up a raw value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(&normalize_setting_key(key))
            .map(String::as_str)
    }

    /// Look up a setting with its description
    pub fn get_setting(&self, key: &str) -> Option<FirmwareSetting> {
        let id = normalize_setting_key(key);
        let value = self.values.get(&id)?.clone();
        let description = id[1..]
            .parse::<u16>()
            .map(get_setting_name)
            .unwrap_or("Unknown setting")
            .to_string();
        Some(FirmwareSetting {
            id,
            value,
            description,
        })
    }

    /// Number of known settings
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no settings are known
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Forget everything (on disconnect)
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Copy of the raw key/value map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.values.clone()
    }
}
