//! Layered configuration: `config/base/master.toml`, overridden by
//! `config/environments/{env}/master.toml`, overridden by `DAGMASTER__...`
//! environment variables, with `.env` loaded first via `dotenvy` so local
//! overrides reach the process environment before the `config` crate reads it.

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::errors::MasterResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterSection {
    pub host: String,
    pub exec_threads: usize,
    pub exec_task_threads: usize,
    pub heartbeat_interval_seconds: u64,
    pub sleep_interval_ms: u64,
    pub task_resource_cpu_threshold: f32,
    pub task_resource_mem_threshold: f32,
    pub warn_times_failover: u32,
    pub shutdown_drain_seconds: u64,
}

impl Default for MasterSection {
    fn default() -> Self {
        Self {
            host: "localhost:0".to_string(),
            exec_threads: 100,
            exec_task_threads: 20,
            heartbeat_interval_seconds: 10,
            sleep_interval_ms: 1000,
            task_resource_cpu_threshold: 0.9,
            task_resource_mem_threshold: 0.9,
            warn_times_failover: 3,
            shutdown_drain_seconds: 2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationSection {
    pub root_path: String,
    pub connect_string: String,
}

impl Default for CoordinationSection {
    fn default() -> Self {
        Self {
            root_path: "/dagmaster".to_string(),
            connect_string: "localhost:2181".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/dagmaster".to_string(),
        }
    }
}

/// Resolved configuration for one `MasterServer` process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    pub master: MasterSection,
    pub coordination: CoordinationSection,
    pub database: DatabaseSection,
}

/// Where the layered sources come from, before building the resolved config.
#[derive(Debug, Clone)]
pub struct ConfigSources {
    pub base_path: String,
    pub environment: String,
}

impl Default for ConfigSources {
    fn default() -> Self {
        Self {
            base_path: "config".to_string(),
            environment: std::env::var("DAGMASTER_ENV").unwrap_or_else(|_| "development".to_string()),
        }
    }
}

/// Loads `.env`, then layers `base/master` < `environments/{env}/master` <
/// `DAGMASTER__SECTION__KEY` environment variables into a `MasterConfig`.
/// Missing files at either layer are tolerated; a malformed one is not.
pub fn load(sources: &ConfigSources) -> MasterResult<MasterConfig> {
    let _ = dotenvy::dotenv();

    let base = format!("{}/base/master", sources.base_path);
    let environment = format!("{}/environments/{}/master", sources.base_path, sources.environment);

    let config = Config::builder()
        .add_source(File::with_name(&base).required(false))
        .add_source(File::with_name(&environment).required(false))
        .add_source(Environment::with_prefix("DAGMASTER").separator("__"))
        .build()?;

    Ok(config.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_apply_when_no_files_or_env_present() {
        let dir = tempfile::tempdir().unwrap();
        let sources = ConfigSources {
            base_path: dir.path().to_string_lossy().into_owned(),
            environment: "development".to_string(),
        };
        let config = load(&sources).unwrap();
        assert_eq!(config.master.heartbeat_interval_seconds, 10);
        assert_eq!(config.coordination.root_path, "/dagmaster");
    }

    #[test]
    fn environment_layer_overrides_base_layer() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("base")).unwrap();
        std::fs::create_dir_all(dir.path().join("environments/staging")).unwrap();

        let mut base = std::fs::File::create(dir.path().join("base/master.toml")).unwrap();
        writeln!(base, "[master]\nheartbeat_interval_seconds = 30").unwrap();

        let mut env_file = std::fs::File::create(dir.path().join("environments/staging/master.toml")).unwrap();
        writeln!(env_file, "[master]\nheartbeat_interval_seconds = 5").unwrap();

        let sources = ConfigSources {
            base_path: dir.path().to_string_lossy().into_owned(),
            environment: "staging".to_string(),
        };
        let config = load(&sources).unwrap();
        assert_eq!(config.master.heartbeat_interval_seconds, 5);
    }

    #[test]
    fn env_var_override_wins_over_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("base")).unwrap();
        let mut base = std::fs::File::create(dir.path().join("base/master.toml")).unwrap();
        writeln!(base, "[master]\nheartbeat_interval_seconds = 30").unwrap();

        // Safety: test runs single-threaded within this process's env-var
        // mutation window; no other test reads DAGMASTER__MASTER__*.
        std::env::set_var("DAGMASTER__MASTER__HEARTBEAT_INTERVAL_SECONDS", "7");
        let sources = ConfigSources {
            base_path: dir.path().to_string_lossy().into_owned(),
            environment: "development".to_string(),
        };
        let config = load(&sources).unwrap();
        std::env::remove_var("DAGMASTER__MASTER__HEARTBEAT_INTERVAL_SECONDS");
        assert_eq!(config.master.heartbeat_interval_seconds, 7);
    }
}
