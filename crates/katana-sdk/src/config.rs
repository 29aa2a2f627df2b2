use std::collections::BTreeMap;
use std::time::Duration;

use katana_frame::FrameConfig;
use katana_payload::FieldNames;

/// Default per-request time budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Workers per available CPU.
const WORKERS_PER_CPU: usize = 5;

/// Settings for the request dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time a handler may run before a timeout error is sent instead.
    pub timeout: Duration,
    /// Size of the worker pool.
    pub workers: usize,
    /// Field-name table for payloads, `None` to use long names on the wire.
    pub field_names: Option<FieldNames>,
    /// Log payload values at debug level.
    pub debug: bool,
    /// Variables passed on the command line.
    pub variables: BTreeMap<String, String>,
    /// Frame limits for each connection.
    pub frame: FrameConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map_or(1, usize::from);
        Self {
            timeout: DEFAULT_TIMEOUT,
            workers: cpus * WORKERS_PER_CPU,
            field_names: Some(FieldNames::compact()),
            debug: false,
            variables: BTreeMap::new(),
            frame: FrameConfig::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_field_names(mut self, names: Option<FieldNames>) -> Self {
        self.field_names = names;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_frame_config(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.workers >= WORKERS_PER_CPU);
        assert!(config.field_names.is_some());
        assert!(!config.debug);
    }

    #[test]
    fn builders_override() {
        let config = DispatcherConfig::default()
            .with_timeout(Duration::from_millis(100))
            .with_workers(0)
            .with_field_names(None)
            .with_debug(true);
        assert_eq!(config.timeout, Duration::from_millis(100));
        assert_eq!(config.workers, 1);
        assert!(config.field_names.is_none());
        assert!(config.debug);
    }
}
