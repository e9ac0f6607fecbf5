use crate::config::Settings;
use crate::plugin::PluginConfig;

/// Chooses the execution queue for a plugin config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRouter {
    queues: Vec<String>,
    default_queue: String,
    prefix: Option<String>,
}

impl QueueRouter {
    pub fn new(queues: Vec<String>, default_queue: &str, prefix: Option<String>) -> Self {
        Self {
            queues,
            default_queue: default_queue.to_string(),
            prefix: prefix.filter(|p| !p.is_empty()),
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.queues.clone(),
            &settings.default_queue,
            settings.queue_prefix.clone(),
        )
    }

    /// Namespaced name of a queue: `"{prefix}.{queue}"`, or `queue` unprefixed.
    pub fn queue_name(&self, queue: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}.{}", prefix, queue),
            None => queue.to_string(),
        }
    }

    /// Routed queue for `config`. Unknown or empty queues fall back to the default.
    pub fn queue_for(&self, config: &PluginConfig) -> String {
        self.route(&config.queue)
    }

    /// Routed name for a raw queue, with the same fallback as [`Self::queue_for`].
    pub fn route(&self, queue: &str) -> String {
        if queue.is_empty() || !self.queues.iter().any(|q| q == queue) {
            if !queue.is_empty() {
                log::warn!(
                    "Queue '{}' is not configured, using '{}'",
                    queue,
                    self.default_queue
                );
            }
            return self.queue_name(&self.default_queue);
        }
        self.queue_name(queue)
    }

    /// Raw name of the default queue.
    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    /// Routed name of the default queue.
    pub fn default_queue_name(&self) -> String {
        self.queue_name(&self.default_queue)
    }

    /// Routed names of every configured queue.
    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| self.queue_name(q)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::PluginKind;

    fn config_on(queue: &str) -> PluginConfig {
        let mut config = PluginConfig::new("P", PluginKind::Analyzer, "x.P");
        config.queue = queue.to_string();
        config
    }

    fn router(prefix: Option<&str>) -> QueueRouter {
        QueueRouter::new(
            vec!["default".to_string(), "long".to_string()],
            "default",
            prefix.map(str::to_string),
        )
    }

    #[test]
    fn test_known_queue_is_kept() {
        assert_eq!(router(None).queue_for(&config_on("long")), "long");
    }

    #[test]
    fn test_unknown_or_empty_queue_falls_back() {
        let router = router(None);
        assert_eq!(router.queue_for(&config_on("gpu")), "default");
        assert_eq!(router.queue_for(&config_on("")), "default");
    }

    #[test]
    fn test_prefix_namespaces_every_queue() {
        let router = router(Some("prod"));
        assert_eq!(router.queue_for(&config_on("long")), "prod.long");
        assert_eq!(router.queue_for(&config_on("gpu")), "prod.default");
        assert_eq!(router.default_queue_name(), "prod.default");
        assert_eq!(router.queue_names(), vec!["prod.default", "prod.long"]);
        assert_eq!(router.default_queue(), "default");
    }

    #[test]
    fn test_empty_prefix_is_ignored() {
        let router = QueueRouter::new(vec!["default".to_string()], "default", Some(String::new()));
        assert_eq!(router.default_queue_name(), "default");
    }

    #[test]
    fn test_from_settings() {
        let settings = Settings {
            queues: vec!["default".to_string(), "local".to_string()],
            queue_prefix: Some("stage".to_string()),
            ..Settings::default()
        };
        let router = QueueRouter::from_settings(&settings);
        assert_eq!(router.route("local"), "stage.local");
    }
}
