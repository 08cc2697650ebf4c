//! Plugin registry: turns a [`PipelineDefinition`] into runnable plugins.
//!
//! Constructed explicitly and handed to the pipeline runner. Entries that
//! name an unknown plugin or carry invalid options stay in the plan as
//! configuration errors so they fail at their position in the stage.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::PluginConfigError;
use crate::models::pipeline::{BuildSettings, PipelineDefinition, PluginEntry, Stage};
use crate::services::pipeline::plugin::Plugin;

pub type PluginFactory = Arc<
    dyn Fn(&serde_json::Value, &BuildSettings) -> Result<Box<dyn Plugin>, PluginConfigError>
        + Send
        + Sync,
>;

#[derive(Clone, Default)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in plugin.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::plugins::register_defaults(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&serde_json::Value, &BuildSettings) -> Result<Box<dyn Plugin>, PluginConfigError>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(name.to_string(), Arc::new(factory));
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn create(
        &self,
        entry: &PluginEntry,
        settings: &BuildSettings,
    ) -> Result<Box<dyn Plugin>, PluginConfigError> {
        let factory = self
            .factories
            .get(entry.plugin.as_str())
            .ok_or_else(|| PluginConfigError::UnknownPlugin(entry.plugin.clone()))?;
        factory(&entry.options, settings)
    }

    /// Resolve every entry of every stage.
    pub fn plan(&self, pipeline: &PipelineDefinition) -> StagePlan {
        let stages = Stage::ALL
            .into_iter()
            .map(|stage| {
                let planned = pipeline
                    .entries(stage)
                    .iter()
                    .map(|entry| PlannedPlugin {
                        entry: entry.clone(),
                        plugin: self.create(entry, &pipeline.build_settings),
                    })
                    .collect();
                (stage, planned)
            })
            .collect();
        StagePlan { stages }
    }
}

pub struct PlannedPlugin {
    pub entry: PluginEntry,
    pub plugin: Result<Box<dyn Plugin>, PluginConfigError>,
}

impl PlannedPlugin {
    pub fn name(&self) -> &str {
        &self.entry.plugin
    }
}

pub struct StagePlan {
    stages: Vec<(Stage, Vec<PlannedPlugin>)>,
}

impl StagePlan {
    pub fn stage(&self, stage: Stage) -> &[PlannedPlugin] {
        self.stages
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, planned)| planned.as_slice())
            .unwrap_or(&[])
    }

    /// Every configuration error, in stage order.
    pub fn problems(&self) -> impl Iterator<Item = (Stage, &str, &PluginConfigError)> {
        self.stages.iter().flat_map(|(stage, planned)| {
            planned
                .iter()
                .filter_map(move |p| p.plugin.as_ref().err().map(|e| (*stage, p.name(), e)))
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unknown_and_invalid_entries_are_planned_as_errors() {
        let registry = PluginRegistry::with_defaults();
        let pipeline = PipelineDefinition {
            test: vec![
                PluginEntry::new("php_cpd", json!({ "path": "src" })),
                PluginEntry::new("php_lint", json!({})),
                PluginEntry::new("php_cpd", json!({ "standard": "PSR2" })),
            ],
            ..Default::default()
        };

        let plan = registry.plan(&pipeline);
        assert_eq!(plan.stage(Stage::Test).len(), 3);
        assert!(plan.stage(Stage::Setup).is_empty());

        let problems: Vec<_> = plan.problems().collect();
        assert_eq!(problems.len(), 2);
        assert!(matches!(problems[0].2, PluginConfigError::UnknownPlugin(name) if name == "php_lint"));
        assert!(matches!(problems[1].2, PluginConfigError::InvalidOptions { .. }));
    }

    #[test]
    fn defaults_are_registered() {
        let registry = PluginRegistry::with_defaults();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(names, ["php_cpd", "php_spec", "php_unit", "shell"]);
    }
}
