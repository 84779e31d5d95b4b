use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub ports: PortsConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Filesystem roots for the copy-on-write layer stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Per-layer writable upper directories live under here.
    pub layers_dir: PathBuf,
    /// Per-layer overlay scratch (work) directories.
    pub work_dir: PathBuf,
    /// Per-layer mount targets; each running engine points at one of these.
    pub mounts_dir: PathBuf,
    /// The immutable base snapshot, deepest lower directory of every mount.
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub binary: String,
    pub user: String,
    pub bind_address: String,
    pub readiness_timeout_secs: u64,
    pub stop_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortsConfig {
    pub base: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub listen_addr: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("FORKDB").separator("__"))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { url: "sqlite://forkdb.db".to_string(), max_connections: 5 }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            layers_dir: PathBuf::from("/app/layers"),
            work_dir: PathBuf::from("/app/tmp"),
            mounts_dir: PathBuf::from("/app/mysql"),
            base_dir: PathBuf::from("/app/layers/base"),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: "mysqld".to_string(),
            user: "mysql".to_string(),
            bind_address: "127.0.0.1".to_string(),
            readiness_timeout_secs: 30,
            stop_timeout_secs: 30,
        }
    }
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self { base: 33061 }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { listen_addr: "127.0.0.1:8080".to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_values() {
        let config = Config::default();

        assert_eq!(config.database.url, "sqlite://forkdb.db");
        assert_eq!(config.database.max_connections, 5);

        assert_eq!(config.paths.layers_dir, PathBuf::from("/app/layers"));
        assert_eq!(config.paths.work_dir, PathBuf::from("/app/tmp"));
        assert_eq!(config.paths.mounts_dir, PathBuf::from("/app/mysql"));
        assert_eq!(config.paths.base_dir, PathBuf::from("/app/layers/base"));

        assert_eq!(config.engine.binary, "mysqld");
        assert_eq!(config.engine.bind_address, "127.0.0.1");
        assert_eq!(config.engine.readiness_timeout_secs, 30);
        assert_eq!(config.engine.stop_timeout_secs, 30);

        assert_eq!(config.ports.base, 33061);
        assert_eq!(config.api.listen_addr, "127.0.0.1:8080");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let json = serde_json::to_string(&config);
        assert!(json.is_ok());
    }

    #[test]
    fn test_config_deserialization() {
        let json = r#"{
            "database": {
                "url": "sqlite::memory:",
                "max_connections": 1
            },
            "paths": {
                "layers_dir": "/data/layers",
                "work_dir": "/data/tmp",
                "mounts_dir": "/data/mysql",
                "base_dir": "/data/layers/base"
            },
            "engine": {
                "binary": "mysqld",
                "user": "mysql",
                "bind_address": "127.0.0.1",
                "readiness_timeout_secs": 5,
                "stop_timeout_secs": 5
            },
            "ports": {
                "base": 43061
            },
            "api": {
                "listen_addr": "127.0.0.1:9090"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.database.max_connections, 1);
        assert_eq!(config.paths.layers_dir, PathBuf::from("/data/layers"));
        assert_eq!(config.ports.base, 43061);
        assert_eq!(config.engine.readiness_timeout_secs, 5);
    }
}
