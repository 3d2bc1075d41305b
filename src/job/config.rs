//! Job configuration and YAML loading

use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

use crate::core::{EngineError, Result};
use crate::flow::spec::{default_enabled, deserialize_id, ChainSpec};

/// Default schedule: one run per second
pub const DEFAULT_INTERVAL_MS: u64 = 1000;

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub description: String,
    /// Delay before each run, in milliseconds
    #[serde(default = "default_interval_ms", alias = "intervalMs")]
    pub interval_ms: u64,
    /// Stop scheduling after the first completed run
    #[serde(default, alias = "runOnce")]
    pub run_once: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub verbose: bool,
    /// The root chain
    #[serde(default)]
    pub task: ChainSpec,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            id: None,
            description: String::new(),
            interval_ms: DEFAULT_INTERVAL_MS,
            run_once: false,
            enabled: true,
            verbose: false,
            task: ChainSpec::default(),
        }
    }
}

impl JobConfig {
    pub fn new(task: ChainSpec) -> Self {
        Self {
            task,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn run_once(mut self) -> Self {
        self.run_once = true;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: JobConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn load_yaml_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let mut file = File::open(file_path)
            .map_err(|e| EngineError::config(format!("Failed to open file {}: {}", file_path.display(), e)))?;

        let mut yaml_content = String::new();
        file.read_to_string(&mut yaml_content)
            .map_err(|e| EngineError::config(format!("Failed to read file {}: {}", file_path.display(), e)))?;

        serde_yaml::from_str(&yaml_content)
            .map_err(|e| EngineError::config(format!("Failed to parse YAML file {}: {}", file_path.display(), e)))
    }

    /// Load every `.yaml`/`.yml` file of a directory, in file name order.
    /// Files that fail to load are logged and skipped.
    pub fn load_yaml_dir(dir_path: impl AsRef<Path>) -> Result<Vec<Self>> {
        let dir_path = dir_path.as_ref();
        let entries = std::fs::read_dir(dir_path)
            .map_err(|e| EngineError::config(format!("Failed to read directory {}: {}", dir_path.display(), e)))?;

        let mut paths: Vec<PathBuf> = Vec::new();
        for entry in entries {
            match entry {
                Ok(entry) => {
                    let path = entry.path();
                    let is_yaml = matches!(
                        path.extension().and_then(|ext| ext.to_str()),
                        Some("yaml") | Some("yml")
                    );
                    if path.is_file() && is_yaml {
                        paths.push(path);
                    }
                }
                Err(err) => error!("Failed to read directory entry: {}", err),
            }
        }
        paths.sort();

        let mut configs = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_yaml_file(&path) {
                Ok(config) => {
                    debug!("Loaded job configuration {}", path.display());
                    configs.push(config);
                }
                Err(err) => error!("{}", err),
            }
        }
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NodeId;

    const PING_JOB: &str = r#"
id: 42
description: ping the gateway
runOnce: true
interval_ms: 50
task:
  - action: echo
    data: { host: 10.0.0.1 }
    timeout: 2000
"#;

    #[test]
    fn test_defaults() {
        let config = JobConfig::from_yaml_str("task: []").unwrap();
        assert_eq!(config.interval_ms, DEFAULT_INTERVAL_MS);
        assert!(config.enabled);
        assert!(!config.run_once);
        assert!(config.id.is_none());
    }

    #[test]
    fn test_from_yaml_str() {
        let config = JobConfig::from_yaml_str(PING_JOB).unwrap();
        assert_eq!(config.id.as_deref(), Some("42"));
        assert!(config.run_once);
        assert_eq!(config.interval_ms, 50);
        assert_eq!(config.task.stages(&NodeId::from("42.c")).unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        assert!(JobConfig::from_yaml_str("cronTime: '* * * * * *'").is_err());
    }

    #[test]
    fn test_load_yaml_dir() {
        let dir = std::env::temp_dir().join(format!("taskchain-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.yaml"), PING_JOB).unwrap();
        std::fs::write(dir.join("b.yml"), "id: second\ntask: []\n").unwrap();
        std::fs::write(dir.join("c.yaml"), "task: [[[").unwrap();
        std::fs::write(dir.join("notes.txt"), "not a job").unwrap();

        let configs = JobConfig::load_yaml_dir(&dir).unwrap();
        let ids: Vec<Option<String>> = configs.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec![Some("42".to_string()), Some("second".to_string())]);

        assert!(JobConfig::load_yaml_file(dir.join("missing.yaml")).is_err());
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
