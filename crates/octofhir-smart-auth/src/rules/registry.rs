//! Compartment name to rule builder registration.

use std::collections::HashMap;
use std::sync::Arc;

use crate::compartment::CompartmentDefinition;
use crate::config::SmartAuthConfig;
use crate::error::AuthError;

use super::builder::{CompartmentRuleBuilder, StandardCompartmentRuleBuilder};

/// Immutable mapping from compartment name to its rule builders.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Default, Clone)]
pub struct CompartmentRegistry {
    builders: HashMap<String, Vec<Arc<dyn CompartmentRuleBuilder>>>,
}

impl CompartmentRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a builder for `compartment_name`. Several builders may serve
    /// the same compartment; they run in registration order.
    #[must_use]
    pub fn register(
        mut self,
        compartment_name: &str,
        builder: Arc<dyn CompartmentRuleBuilder>,
    ) -> Self {
        self.builders
            .entry(compartment_name.to_ascii_lowercase())
            .or_default()
            .push(builder);
        self
    }

    /// Patient, Encounter and Practitioner builders.
    #[must_use]
    pub fn standard() -> Self {
        [
            StandardCompartmentRuleBuilder::patient(),
            StandardCompartmentRuleBuilder::encounter(),
            StandardCompartmentRuleBuilder::practitioner(),
        ]
        .into_iter()
        .fold(Self::new(), |registry, builder| {
            let name = builder.name().to_string();
            registry.register(&name, Arc::new(builder))
        })
    }

    /// Registers a standard builder for each configured compartment.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Configuration` for an unknown compartment name.
    pub fn from_config(config: &SmartAuthConfig) -> Result<Self, AuthError> {
        let mut registry = Self::new();
        for name in &config.compartments {
            let definition = CompartmentDefinition::standard(name).ok_or_else(|| {
                AuthError::configuration(format!("unknown compartment '{name}'"))
            })?;
            registry = registry.register(
                name,
                Arc::new(StandardCompartmentRuleBuilder::new(definition)),
            );
        }

        tracing::info!(
            compartments = ?registry.compartments(),
            "Compartment rule builders registered"
        );
        Ok(registry)
    }

    /// Builders serving `compartment_name`, in registration order.
    pub fn builders_for<'a>(
        &'a self,
        compartment_name: &'a str,
    ) -> impl Iterator<Item = &'a Arc<dyn CompartmentRuleBuilder>> + 'a {
        self.builders
            .get(&compartment_name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .filter(move |b| b.has_registered_resource(compartment_name))
    }

    /// Registered compartment names, sorted.
    #[must_use]
    pub fn compartments(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builders.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.builders.is_empty()
    }
}
