//! Registry of aggregate plugins.
//!
//! Built once at process start and shared read-only afterwards, so
//! concurrent readers need no synchronization. Registration is
//! write-once per id: a second plugin with the same id is rejected
//! rather than silently shadowing the first.

use std::collections::BTreeMap;
use std::sync::Arc;

use zonestat_aggregates_models::AggregateDisplay;

use crate::plugin::AggregatePlugin;

/// Errors raised while registering plugins.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A plugin with the same id is already registered.
    #[error("Aggregate already registered: {aggregate_id}")]
    DuplicateAggregate {
        /// The conflicting id.
        aggregate_id: String,
    },

    /// The plugin failed registration-time validation.
    #[error("Invalid aggregate plugin '{aggregate_id}': {message}")]
    InvalidPlugin {
        /// The plugin's id.
        aggregate_id: String,
        /// Description of what was wrong.
        message: String,
    },
}

/// Maps aggregate ids to their plugins.
#[derive(Default)]
pub struct AggregateRegistry {
    plugins: BTreeMap<String, Arc<dyn AggregatePlugin>>,
}

impl std::fmt::Debug for AggregateRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRegistry")
            .field("ids", &self.plugins.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AggregateRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers `plugin`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateAggregate`] if the id is taken, or
    /// [`RegistryError::InvalidPlugin`] if the plugin is malformed.
    pub fn register(&mut self, plugin: Arc<dyn AggregatePlugin>) -> Result<(), RegistryError> {
        validate_plugin(plugin.as_ref())?;

        let id = plugin.id().to_string();
        if self.plugins.contains_key(&id) {
            return Err(RegistryError::DuplicateAggregate { aggregate_id: id });
        }

        log::debug!("Registered aggregate {id}");
        self.plugins.insert(id, plugin);
        Ok(())
    }

    /// Returns the plugin registered under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&dyn AggregatePlugin> {
        self.plugins.get(id).map(|p| &**p)
    }

    /// Returns every registered plugin, ordered by id.
    #[must_use]
    pub fn list(&self) -> Vec<&dyn AggregatePlugin> {
        self.plugins.values().map(|p| &**p).collect()
    }

    /// Returns the display metadata of the plugin registered under `id`.
    #[must_use]
    pub fn get_display(&self, id: &str) -> Option<&AggregateDisplay> {
        self.get(id).map(|p| p.display())
    }

    /// Returns the display metadata of every plugin, ordered by id.
    #[must_use]
    pub fn displays(&self) -> Vec<&AggregateDisplay> {
        self.plugins.values().map(|p| p.display()).collect()
    }

    /// Number of registered plugins.
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugins are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}

/// Checks that an id looks like `<name>.v<N>`, all lowercase.
fn is_valid_id(id: &str) -> bool {
    let Some((name, version)) = id.rsplit_once(".v") else {
        return false;
    };

    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
        && !version.is_empty()
        && version.chars().all(|c| c.is_ascii_digit())
}

fn validate_plugin(plugin: &dyn AggregatePlugin) -> Result<(), RegistryError> {
    let id = plugin.id();
    let invalid = |message: String| RegistryError::InvalidPlugin {
        aggregate_id: id.to_string(),
        message,
    };

    if !is_valid_id(id) {
        return Err(invalid(
            "id must be lowercase and versioned like 'name.v1'".to_string(),
        ));
    }

    let display = plugin.display();
    if display.id != id {
        return Err(invalid(format!(
            "display metadata describes '{}'",
            display.id
        )));
    }
    if display.label.trim().is_empty() {
        return Err(invalid("display label is empty".to_string()));
    }
    if plugin.params_schema().name().is_empty() || plugin.output_schema().name().is_empty() {
        return Err(invalid("schemas must be named".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ZoneAggregateError;
    use crate::plugin::ComputeContext;
    use crate::schema::{Schema, SerdeSchema};
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use zonestat_aggregates_models::AggregateResult;

    #[derive(Serialize, Deserialize)]
    struct Empty {}

    struct Stub {
        id: String,
        display: AggregateDisplay,
        schema: SerdeSchema<Empty>,
    }

    impl Stub {
        fn new(id: &str, label: &str) -> Self {
            Self {
                id: id.to_string(),
                display: AggregateDisplay {
                    id: id.to_string(),
                    label: label.to_string(),
                    description: String::new(),
                    category: "test".to_string(),
                    unit: None,
                },
                schema: SerdeSchema::new("empty"),
            }
        }
    }

    #[async_trait]
    impl AggregatePlugin for Stub {
        fn id(&self) -> &str {
            &self.id
        }

        fn display(&self) -> &AggregateDisplay {
            &self.display
        }

        fn params_schema(&self) -> &dyn Schema {
            &self.schema
        }

        fn output_schema(&self) -> &dyn Schema {
            &self.schema
        }

        async fn compute(
            &self,
            ctx: &ComputeContext<'_>,
        ) -> Result<AggregateResult, ZoneAggregateError> {
            Err(ctx.no_data("stub"))
        }
    }

    #[test]
    fn registers_and_looks_up() {
        let mut registry = AggregateRegistry::new();
        registry.register(Arc::new(Stub::new("b.v1", "B"))).unwrap();
        registry.register(Arc::new(Stub::new("a.v2", "A"))).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("a.v2").map(|p| p.id()), Some("a.v2"));
        assert!(registry.get("c.v1").is_none());
        assert_eq!(
            registry.list().iter().map(|p| p.id()).collect::<Vec<_>>(),
            vec!["a.v2", "b.v1"]
        );
        assert_eq!(registry.get_display("b.v1").map(|d| d.label.as_str()), Some("B"));
        assert!(registry.get_display("c.v1").is_none());
        assert_eq!(registry.displays().len(), 2);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = AggregateRegistry::new();
        registry.register(Arc::new(Stub::new("rent.v1", "Rent"))).unwrap();

        let err = registry
            .register(Arc::new(Stub::new("rent.v1", "Other rent")))
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::DuplicateAggregate { ref aggregate_id } if aggregate_id == "rent.v1"
        ));
        assert_eq!(registry.get_display("rent.v1").unwrap().label, "Rent");
    }

    #[test]
    fn malformed_plugins_are_rejected() {
        let mut registry = AggregateRegistry::new();

        for id in ["", "rent", "Rent.v1", "rent.v", "rent.vX", ".v1"] {
            assert!(
                matches!(
                    registry.register(Arc::new(Stub::new(id, "Rent"))),
                    Err(RegistryError::InvalidPlugin { .. })
                ),
                "id {id:?} should be rejected"
            );
        }

        assert!(matches!(
            registry.register(Arc::new(Stub::new("rent.v1", "  "))),
            Err(RegistryError::InvalidPlugin { .. })
        ));

        let mut mismatched = Stub::new("rent.v1", "Rent");
        mismatched.display.id = "rent.v2".to_string();
        assert!(matches!(
            registry.register(Arc::new(mismatched)),
            Err(RegistryError::InvalidPlugin { .. })
        ));

        assert!(registry.is_empty());
    }

    #[test]
    fn accepts_dotted_and_multi_digit_versions() {
        assert!(is_valid_id("rent.v1"));
        assert!(is_valid_id("rent_yield.v12"));
        assert!(is_valid_id("uk.rent.v3"));
    }
}
