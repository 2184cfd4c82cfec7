//! Compile-time registry of built-in aggregate plugins.
//!
//! Display metadata for each plugin is embedded via `include_str!`. Adding
//! a plugin requires a TOML file in `plugins/`, an entry in
//! [`DISPLAY_TOMLS`], and a constructor in [`all_plugins`].

use std::sync::Arc;

use zonestat_aggregates::plugin::AggregatePlugin;
use zonestat_aggregates::registry::{AggregateRegistry, RegistryError};
use zonestat_aggregates_models::AggregateDisplay;

use crate::rent::RentPlugin;

/// Number of built-in plugins. Enforced by a test.
#[cfg(test)]
const EXPECTED_PLUGIN_COUNT: usize = 1;

/// Embedded TOML display definitions, keyed by aggregate id.
const DISPLAY_TOMLS: &[(&str, &str)] = &[("rent.v1", include_str!("../plugins/rent.toml"))];

/// Returns the embedded display metadata for `id`.
///
/// # Panics
///
/// Panics if `id` has no embedded TOML or the TOML fails to parse. Both
/// are compile-time constants, so failures are development errors caught
/// by tests.
#[must_use]
pub fn display_for(id: &str) -> AggregateDisplay {
    let (_, toml_str) = DISPLAY_TOMLS
        .iter()
        .find(|(name, _)| *name == id)
        .unwrap_or_else(|| panic!("No display metadata embedded for aggregate '{id}'"));

    toml::de::from_str(toml_str)
        .unwrap_or_else(|e| panic!("Failed to parse display metadata for '{id}': {e}"))
}

/// Returns one instance of every built-in plugin.
#[must_use]
pub fn all_plugins() -> Vec<Arc<dyn AggregatePlugin>> {
    vec![Arc::new(RentPlugin::new())]
}

/// Builds a registry containing every built-in plugin.
///
/// # Errors
///
/// Returns [`RegistryError`] if a built-in plugin is malformed or two
/// share an id.
pub fn default_registry() -> Result<AggregateRegistry, RegistryError> {
    let mut registry = AggregateRegistry::new();
    for plugin in all_plugins() {
        registry.register(plugin)?;
    }
    log::info!("Registered {} built-in aggregates", registry.len());
    Ok(registry)
}
