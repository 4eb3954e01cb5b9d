use serde::{Deserialize, Serialize};

/// Thread pool executor configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Worker thread count. Defaults to available parallelism.
    pub workers: Option<usize>,
    /// Prefix for worker thread names (default "flowrt-worker").
    pub thread_name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pool_config_deserializes_with_defaults() {
        let cfg: PoolConfig = serde_json::from_value(json!({})).expect("empty config");
        assert!(cfg.workers.is_none());
        assert!(cfg.thread_name.is_none());

        let cfg: PoolConfig =
            serde_json::from_value(json!({"workers": 4, "thread_name": "dataflow"}))
                .expect("full config");
        assert_eq!(cfg.workers, Some(4));
        assert_eq!(cfg.thread_name.as_deref(), Some("dataflow"));
    }

    #[test]
    fn logger_config_deserializes_with_defaults() {
        use crate::utils::logger::LoggerConfig;
        let cfg: LoggerConfig = serde_json::from_value(json!({"level": "debug"})).expect("config");
        assert_eq!(cfg.level, "debug");
        assert_eq!(cfg.max_files, 0);
        assert!(cfg.file_dir.is_none());
    }
}
