// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

pub const DEFAULT_MAX_PACKAGE_SIZE: usize = 2 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub max_package_size: usize,
    pub conn_read_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "0.0.0.0".to_string(),
            port: 9001,
            max_connection: 1024,
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            conn_read_buffer_size: 4 * 1024,
        }
    }
}

/// Identity this process advertises in the registry.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub service: String,
    pub version: i32,
    /// registry field name; generated from ip and port when empty
    pub node_id: String,
    /// address other processes dial; falls back to `network.ip`
    pub advertise_ip: String,
    /// attach timing telemetry to action results
    pub debug: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            service: "Echo".to_string(),
            version: 1,
            node_id: String::new(),
            advertise_ip: String::new(),
            debug: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RegistryConfig {
    /// redis connection url; an empty url selects the in-process store
    pub redis_url: String,
    pub prefix: String,
    /// seconds a node stays eligible after its last heartbeat
    pub ttl: i64,
    /// seconds between two heartbeats of a serving node
    pub heartbeat_interval: u64,
    pub connect_timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            prefix: "relayrpc_registry".to_string(),
            ttl: 30,
            heartbeat_interval: 10,
            connect_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ClientConfig {
    pub max_package_size: usize,
    pub timeout_ms: u64,
    pub appid: String,
    pub secret: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            max_package_size: DEFAULT_MAX_PACKAGE_SIZE,
            timeout_ms: 3000,
            appid: String::new(),
            secret: String::new(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    /// accepted clock skew of a signature, in seconds, both directions
    pub max_skew: i64,
    /// appid -> shared secret
    pub secrets: HashMap<String, String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            enabled: false,
            max_skew: 60,
            secrets: HashMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RpcConfig {
    pub network: NetworkConfig,
    pub node: NodeConfig,
    pub registry: RegistryConfig,
    pub client: ClientConfig,
    pub auth: AuthConfig,
}

impl RpcConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<RpcConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("RELAYRPC").separator("__"))
            .build()?;

        let rpc_config: RpcConfig = config.try_deserialize()?;
        rpc_config.validate()?;
        Ok(rpc_config)
    }

    fn validate(&self) -> AppResult<()> {
        if self.registry.ttl <= 0 {
            return Err(AppError::InvalidValue(format!(
                "registry ttl must be positive, got {}",
                self.registry.ttl
            )));
        }
        if self.network.max_package_size == 0 || self.client.max_package_size == 0 {
            return Err(AppError::InvalidValue(
                "max_package_size must be positive".to_string(),
            ));
        }
        if self.node.service.is_empty() {
            return Err(AppError::InvalidValue(
                "node.service must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Address other processes use to reach this node.
    pub fn advertise_ip(&self) -> &str {
        if self.node.advertise_ip.is_empty() {
            &self.network.ip
        } else {
            &self.node.advertise_ip
        }
    }

    /// Registry key of this process when it listens on `port`.
    pub fn node_id(&self, port: u16) -> String {
        if self.node.node_id.is_empty() {
            format!("{}:{}", self.advertise_ip(), port)
        } else {
            self.node.node_id.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_conf(contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let file = write_conf(
            r#"
            [network]
            ip = "127.0.0.1"
            port = 9100

            [node]
            service = "Echo"
            advertise_ip = "10.0.0.7"

            [auth]
            enabled = true
            [auth.secrets]
            app1 = "s3cret"
            "#,
        );
        let config = RpcConfig::set_up_config(file.path()).unwrap();
        assert_eq!(config.network.port, 9100);
        assert_eq!(config.registry.ttl, 30);
        assert_eq!(config.client.timeout_ms, 3000);
        assert_eq!(config.auth.max_skew, 60);
        assert_eq!(config.auth.secrets.get("app1").unwrap(), "s3cret");
        assert_eq!(config.advertise_ip(), "10.0.0.7");
        assert_eq!(config.node_id(config.network.port), "10.0.0.7:9100");
    }

    #[test]
    fn test_reject_non_positive_ttl() {
        let file = write_conf(
            r#"
            [registry]
            ttl = 0
            "#,
        );
        let result = RpcConfig::set_up_config(file.path());
        assert!(matches!(result, Err(AppError::InvalidValue(_))));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = RpcConfig::set_up_config("/nonexistent/relayrpc.toml");
        assert!(matches!(result, Err(AppError::ConfigFileError(_))));
    }
}
