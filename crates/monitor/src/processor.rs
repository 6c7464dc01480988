//! The pluggable processor contract and the registry it is resolved from.

use std::{collections::HashMap, path::Path, sync::Arc};

use {anyhow::Result, async_trait::async_trait, tracing::warn};

use crate::{
    processor_default::DefaultProcessor,
    processor_shell::{ShellProcessor, ShellProcessorConfig},
};

/// Handler invoked once per logical change of a monitored file.
///
/// Any error is caught by the controller and turned into a retryable status.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Identifier the processor is selected by in configuration.
    fn id(&self) -> &str;

    /// A new file appeared. The returned id is stored and handed back on
    /// later update and delete calls.
    async fn process_create(&self, path: &Path) -> Result<Option<String>>;

    async fn process_update(&self, path: &Path, external_id: Option<&str>) -> Result<()>;

    async fn process_delete(&self, path: &Path, external_id: Option<&str>) -> Result<()>;
}

/// Lookup table of available processors keyed by [`Processor::id`].
pub struct ProcessorRegistry {
    processors: HashMap<String, Arc<dyn Processor>>,
}

impl Default for ProcessorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    /// Registry holding the built-in processors. The shell processor is only
    /// registered when a command is configured.
    pub fn with_builtins(shell: Option<ShellProcessorConfig>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(DefaultProcessor::new()));
        if let Some(config) = shell {
            registry.register(Arc::new(ShellProcessor::from_config(config)));
        }
        registry
    }

    pub fn register(&mut self, processor: Arc<dyn Processor>) {
        self.processors
            .insert(processor.id().to_string(), processor);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Processor>> {
        self.processors.get(id).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.processors.keys().map(|s| s.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    /// Resolve `id`, falling back to the default processor when it is not
    /// registered.
    pub fn resolve(&self, id: &str) -> Arc<dyn Processor> {
        if let Some(processor) = self.get(id) {
            return processor;
        }
        warn!(
            requested = id,
            fallback = DefaultProcessor::ID,
            "unknown processor id, using default"
        );
        self.get(DefaultProcessor::ID)
            .unwrap_or_else(|| Arc::new(DefaultProcessor::new()))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct NamedProcessor(&'static str);

    #[async_trait]
    impl Processor for NamedProcessor {
        fn id(&self) -> &str {
            self.0
        }

        async fn process_create(&self, _path: &Path) -> Result<Option<String>> {
            Ok(None)
        }

        async fn process_update(&self, _path: &Path, _external_id: Option<&str>) -> Result<()> {
            Ok(())
        }

        async fn process_delete(&self, _path: &Path, _external_id: Option<&str>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn builtins_without_shell_command() {
        let registry = ProcessorRegistry::with_builtins(None);
        assert_eq!(registry.list(), vec!["Default"]);
    }

    #[test]
    fn builtins_with_shell_command() {
        let registry = ProcessorRegistry::with_builtins(Some(ShellProcessorConfig {
            command: "true".into(),
            timeout: None,
        }));
        assert_eq!(registry.list(), vec!["Default", "Shell"]);
        assert_eq!(registry.resolve("Shell").id(), "Shell");
    }

    #[test]
    fn resolve_registered_processor() {
        let mut registry = ProcessorRegistry::with_builtins(None);
        registry.register(Arc::new(NamedProcessor("indexer")));
        assert_eq!(registry.resolve("indexer").id(), "indexer");
    }

    #[test]
    fn resolve_unknown_falls_back_to_default() {
        let registry = ProcessorRegistry::with_builtins(None);
        assert_eq!(registry.resolve("uploader").id(), DefaultProcessor::ID);

        // Even an empty registry hands out the default.
        assert_eq!(ProcessorRegistry::new().resolve("x").id(), DefaultProcessor::ID);
    }
}
