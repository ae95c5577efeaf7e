//! Plugin registry and provider index
//!
//! The registry owns every [`PluginSpec`] in discovery order (user plugins
//! first, then builtins). The [`ProviderIndex`] maps each slot to the plugins
//! that provide it, preserving that order.

use std::collections::{BTreeMap, HashMap};

use super::resolve::ResolveError;
use super::spec::{PluginSpec, SpecError};

/// All plugins known to a run, keyed by name
#[derive(Debug, Default)]
pub struct PluginRegistry {
    specs: Vec<PluginSpec>,
    by_name: HashMap<String, usize>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting duplicate names
    pub fn from_specs(specs: impl IntoIterator<Item = PluginSpec>) -> Result<Self, SpecError> {
        let mut registry = Self::new();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }

    /// Adds a plugin after all previously registered ones
    pub fn register(&mut self, spec: PluginSpec) -> Result<(), SpecError> {
        if self.by_name.contains_key(spec.name()) {
            return Err(SpecError::DuplicateName(spec.name().to_string()));
        }
        self.by_name.insert(spec.name().to_string(), self.specs.len());
        self.specs.push(spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&PluginSpec> {
        self.by_name.get(name).map(|&idx| &self.specs[idx])
    }

    /// Iterates plugins in discovery order
    pub fn iter(&self) -> impl Iterator<Item = &PluginSpec> {
        self.specs.iter()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Builds the provider index over every registered plugin
    pub fn providers(&self) -> ProviderIndex<'_> {
        ProviderIndex::build(&self.specs)
    }
}

/// Slot name to providers, in discovery order
#[derive(Debug, Default)]
pub struct ProviderIndex<'a> {
    slots: HashMap<&'a str, Vec<&'a PluginSpec>>,
}

impl<'a> ProviderIndex<'a> {
    pub fn build(specs: impl IntoIterator<Item = &'a PluginSpec>) -> Self {
        let mut slots: HashMap<&'a str, Vec<&'a PluginSpec>> = HashMap::new();
        for spec in specs {
            for slot in spec.provides() {
                slots.entry(slot.as_str()).or_default().push(spec);
            }
        }
        Self { slots }
    }

    /// Providers of `slot`; empty if nothing provides it
    pub fn providers(&self, slot: &str) -> &[&'a PluginSpec] {
        self.slots.get(slot).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.slots.contains_key(slot)
    }

    /// Number of distinct provided slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slots with more than one provider, sorted by slot name
    pub fn contested(&self) -> Vec<(&'a str, Vec<&'a str>)> {
        let mut contested: Vec<_> = self
            .slots
            .iter()
            .filter(|(_, providers)| providers.len() > 1)
            .map(|(slot, providers)| (*slot, providers.iter().map(|p| p.name()).collect()))
            .collect();
        contested.sort_by(|a, b| a.0.cmp(b.0));
        contested
    }
}

/// Every slot requested anywhere, with who requested it
#[derive(Debug, Default, Clone)]
pub struct Requirements {
    by_slot: BTreeMap<String, Vec<String>>,
}

impl Requirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collects the `use` lists of every plugin
    pub fn from_plugins<'a>(specs: impl IntoIterator<Item = &'a PluginSpec>) -> Self {
        let mut requirements = Self::new();
        for spec in specs {
            for slot in spec.uses() {
                requirements.add(slot, format!("'{}' plugin", spec.name()));
            }
        }
        requirements
    }

    pub fn add(&mut self, slot: impl Into<String>, requester: impl Into<String>) {
        self.by_slot.entry(slot.into()).or_default().push(requester.into());
    }

    pub fn len(&self) -> usize {
        self.by_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_slot.is_empty()
    }

    /// First-pass check: every requested slot has at least one provider
    pub fn check(&self, index: &ProviderIndex<'_>) -> Result<(), ResolveError> {
        let missing: Vec<(String, Vec<String>)> = self
            .by_slot
            .iter()
            .filter(|(slot, _)| !index.contains(slot))
            .map(|(slot, requesters)| (slot.clone(), requesters.clone()))
            .collect();

        if missing.is_empty() {
            tracing::info!(
                "Plugin check first pass OK; {} slots provided, {} slots requested.",
                index.len(),
                self.len()
            );
            Ok(())
        } else {
            Err(ResolveError::Unmet { missing })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::spec::Pipeline;

    fn plugin(name: &str, provides: &[&str], uses: &[&str]) -> PluginSpec {
        PluginSpec::user(name, Pipeline::project("main"), format!("./{}", name))
            .with_provides(provides.iter().copied())
            .with_uses(uses.iter().copied())
    }

    #[test]
    fn index_preserves_discovery_order() {
        let registry = PluginRegistry::from_specs([
            plugin("second", &["html"], &[]),
            plugin("first", &["html"], &[]),
        ])
        .unwrap();
        let index = registry.providers();

        let names: Vec<_> = index.providers("html").iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[test]
    fn own_name_is_a_slot() {
        let registry = PluginRegistry::from_specs([plugin("render", &[], &[])]).unwrap();
        let index = registry.providers();

        assert!(index.contains("render"));
        assert!(index.providers("missing").is_empty());
    }

    #[test]
    fn duplicate_names_rejected() {
        let result = PluginRegistry::from_specs([plugin("a", &[], &[]), plugin("a", &[], &[])]);
        assert!(matches!(result, Err(SpecError::DuplicateName(name)) if name == "a"));
    }

    #[test]
    fn registry_lookup() {
        let registry = PluginRegistry::from_specs([plugin("a", &[], &[])]).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.get("a").is_some());
        assert!(registry.get("b").is_none());
    }

    #[test]
    fn contested_slots_listed() {
        let registry = PluginRegistry::from_specs([
            plugin("a", &["html"], &[]),
            plugin("b", &["html"], &[]),
            plugin("c", &["css"], &[]),
        ])
        .unwrap();

        let contested = registry.providers().contested();
        assert_eq!(contested, vec![("html", vec!["a", "b"])]);
    }

    #[test]
    fn unmet_requirements_name_slot_and_requesters() {
        let registry = PluginRegistry::from_specs([
            plugin("render", &[], &["html"]),
            plugin("lint", &[], &["html", "render"]),
        ])
        .unwrap();

        let mut requirements = Requirements::from_plugins(registry.iter());
        requirements.add("html", "'preprocess' action");

        let err = requirements.check(&registry.providers()).unwrap_err();
        match err {
            ResolveError::Unmet { missing } => {
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].0, "html");
                assert_eq!(
                    missing[0].1,
                    vec!["'render' plugin", "'lint' plugin", "'preprocess' action"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn satisfied_requirements_pass() {
        let registry = PluginRegistry::from_specs([
            plugin("render", &[], &["html"]),
            plugin("parser", &["html"], &[]),
        ])
        .unwrap();

        let requirements = Requirements::from_plugins(registry.iter());
        assert!(requirements.check(&registry.providers()).is_ok());
        assert_eq!(requirements.len(), 1);
    }
}
