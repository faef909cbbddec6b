pub mod completions;
pub mod delete;
pub mod import;
pub mod list;
pub mod sync;

use glancing_core::Settings;
use glancing_registry::RegistryClient;
use glancing_remote::MarketplaceConfig;
use std::fmt::Display;
use std::path::Path;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// Errors starting with this prefix exit with `EXIT_CONFIG_ERROR`.
pub const CONFIG_ERROR_PREFIX: &str = "config error:";

pub fn config_error(e: impl Display) -> String {
    format!("{CONFIG_ERROR_PREFIX} {e}")
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn load_settings(path: Option<&Path>) -> Result<Settings, String> {
    Settings::resolve(path).map_err(config_error)
}

pub fn marketplace_config(settings: &Settings) -> Result<MarketplaceConfig, String> {
    settings.marketplace().map_err(config_error)
}

pub fn check_registry(registry: &dyn RegistryClient) -> Result<(), String> {
    registry
        .available()
        .map_err(|e| format!("image registry unavailable: {e}"))
}
