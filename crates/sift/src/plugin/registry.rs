use std::collections::HashMap;
use std::sync::Arc;

use super::{PluginClass, PluginError};

/// Maps symbolic plugin paths to plugin types.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    classes: HashMap<String, Arc<dyn PluginClass>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the plugins shipped in [`super::builtin`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        super::builtin::register_all(&mut registry);
        registry
    }

    /// Registers `class` under `path`, replacing any previous entry.
    pub fn register(&mut self, path: &str, class: Arc<dyn PluginClass>) {
        if self.classes.insert(path.to_string(), class).is_some() {
            log::warn!("Plugin path '{}' registered twice, keeping the latest", path);
        }
    }

    pub fn resolve(&self, path: &str) -> Result<Arc<dyn PluginClass>, PluginError> {
        self.classes
            .get(path)
            .cloned()
            .ok_or_else(|| PluginError::UnknownPath(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.classes.contains_key(path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut paths: Vec<&str> = self.paths().collect();
        paths.sort_unstable();
        f.debug_struct("PluginRegistry").field("paths", &paths).finish()
    }
}
