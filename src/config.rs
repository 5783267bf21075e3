//! Gateway configuration: TOML file, then environment, then command line.
//!
//! The result is an immutable [`GatewayConfig`] shared by every request.

use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

pub const DEFAULT_CONFIG_PATH: &str = "portgate.toml";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8080";
const DEFAULT_TARGET_HOST: &str = "localhost";
const DEFAULT_STATIC_DIR: &str = "./assets/static";
const DEFAULT_MAX_REDIRECTS: usize = 10;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    target: TargetSection,
    #[serde(default)]
    auth: AuthSection,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServerSection {
    #[serde(default = "default_listen")]
    listen: String,
    #[serde(default = "default_static_dir")]
    static_dir: PathBuf,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TargetSection {
    #[serde(default = "default_target_host")]
    host: String,
    #[serde(default = "default_max_redirects")]
    max_redirects: usize,
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
    #[serde(default)]
    allowed_ports: Vec<u16>,
    #[serde(default)]
    forbidden_ports: Vec<u16>,
}

impl Default for TargetSection {
    fn default() -> Self {
        Self {
            host: default_target_host(),
            max_redirects: default_max_redirects(),
            timeout_secs: default_timeout_secs(),
            allowed_ports: Vec::new(),
            forbidden_ports: Vec::new(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthSection {
    key: Option<String>,
    jwt_secret: Option<String>,
}

fn default_listen() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}
fn default_static_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATIC_DIR)
}
fn default_target_host() -> String {
    DEFAULT_TARGET_HOST.to_string()
}
fn default_max_redirects() -> usize {
    DEFAULT_MAX_REDIRECTS
}
fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

/// Values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_path: Option<PathBuf>,
    pub listen: Option<String>,
    pub target_host: Option<String>,
    pub key: Option<String>,
    pub jwt_secret: Option<String>,
}

impl ConfigOverrides {
    pub fn from_env() -> Self {
        Self {
            config_path: env_value("PORTGATE_CONFIG").map(PathBuf::from),
            listen: env_value("PORTGATE_LISTEN"),
            target_host: env_value("PORTGATE_TARGET_HOST"),
            key: env_value("PORTGATE_KEY"),
            jwt_secret: env_value("PORTGATE_JWT_SECRET"),
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub listen: SocketAddr,
    pub target_host: String,
    /// Shared key visitors type into the login page.
    pub key: String,
    /// Secret the session tokens are signed with.
    pub jwt_secret: String,
    pub static_dir: PathBuf,
    pub max_redirects: usize,
    pub upstream_timeout: Duration,
    pub allowed_ports: Vec<u16>,
    pub forbidden_ports: Vec<u16>,
}

impl GatewayConfig {
    /// Config with defaults for everything but the target and the secrets.
    pub fn new(
        target_host: impl Into<String>,
        key: impl Into<String>,
        jwt_secret: impl Into<String>,
    ) -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
            target_host: target_host.into(),
            key: key.into(),
            jwt_secret: jwt_secret.into(),
            static_dir: default_static_dir(),
            max_redirects: DEFAULT_MAX_REDIRECTS,
            upstream_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            allowed_ports: Vec::new(),
            forbidden_ports: Vec::new(),
        }
    }

    /// Reads the config file and applies `overrides` on top.
    ///
    /// A missing default config file is fine; a missing file that was named
    /// explicitly is an error.
    pub fn load(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let content = match overrides.config_path.as_deref() {
            Some(path) => Some(read_config(path)?),
            None => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Some(read_config(path)?)
                } else {
                    info!(path = %path.display(), "config file not found, using defaults");
                    None
                }
            }
        };

        Self::from_toml(content.as_deref().unwrap_or(""), overrides)
    }

    pub fn from_toml(content: &str, overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;

        let listen = overrides.listen.unwrap_or(file.server.listen);
        let listen = listen
            .parse::<SocketAddr>()
            .map_err(|error| ConfigError::Invalid(format!("listen address `{listen}`: {error}")))?;

        let target_host = overrides.target_host.unwrap_or(file.target.host);
        if target_host.trim().is_empty() {
            return Err(ConfigError::Invalid("target host must not be empty".to_string()));
        }

        let key = overrides
            .key
            .or(file.auth.key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid("missing shared key (auth.key or PORTGATE_KEY)".to_string())
            })?;
        let jwt_secret = overrides
            .jwt_secret
            .or(file.auth.jwt_secret)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ConfigError::Invalid(
                    "missing signing secret (auth.jwt_secret or PORTGATE_JWT_SECRET)".to_string(),
                )
            })?;

        Ok(Self {
            listen,
            target_host,
            key,
            jwt_secret,
            static_dir: file.server.static_dir,
            max_redirects: file.target.max_redirects,
            upstream_timeout: Duration::from_secs(file.target.timeout_secs),
            allowed_ports: file.target.allowed_ports,
            forbidden_ports: file.target.forbidden_ports,
        })
    }

    /// `host:port` of the destination server, also used as its `Host` header.
    pub fn target_address(&self, port: u16) -> String {
        format!("{}:{}", self.target_host, port)
    }

    pub fn target_url(&self, port: u16, resource_path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) if !query.is_empty() => {
                format!("http://{}{}?{}", self.target_address(port), resource_path, query)
            }
            _ => format!("http://{}{}", self.target_address(port), resource_path),
        }
    }

    /// Forbidden ports always lose; an empty allow list allows everything else.
    pub fn port_allowed(&self, port: i64) -> bool {
        if self
            .forbidden_ports
            .iter()
            .any(|forbidden| i64::from(*forbidden) == port)
        {
            return false;
        }

        self.allowed_ports.is_empty()
            || self
                .allowed_ports
                .iter()
                .any(|allowed| i64::from(*allowed) == port)
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    info!(path = %path.display(), "loading config file");
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets() -> ConfigOverrides {
        ConfigOverrides {
            key: Some("key".to_string()),
            jwt_secret: Some("secret".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[test]
    fn defaults_apply_to_empty_file() {
        let config = GatewayConfig::from_toml("", secrets()).unwrap();
        assert_eq!(config.listen, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.target_host, "localhost");
        assert_eq!(config.max_redirects, 10);
        assert_eq!(config.upstream_timeout, Duration::from_secs(30));
        assert!(config.allowed_ports.is_empty());
        assert!(config.forbidden_ports.is_empty());
    }

    #[test]
    fn file_values_are_read() {
        let config = GatewayConfig::from_toml(
            r#"
            [server]
            listen = "0.0.0.0:9000"
            static_dir = "/srv/portgate"

            [target]
            host = "10.0.0.5"
            max_redirects = 3
            allowed_ports = [3000, 8080]
            forbidden_ports = [22]

            [auth]
            key = "from-file"
            jwt_secret = "file-secret"
            "#,
            ConfigOverrides::default(),
        )
        .unwrap();

        assert_eq!(config.listen.port(), 9000);
        assert_eq!(config.static_dir, PathBuf::from("/srv/portgate"));
        assert_eq!(config.target_host, "10.0.0.5");
        assert_eq!(config.max_redirects, 3);
        assert_eq!(config.allowed_ports, vec![3000, 8080]);
        assert_eq!(config.forbidden_ports, vec![22]);
        assert_eq!(config.key, "from-file");
        assert_eq!(config.jwt_secret, "file-secret");
    }

    #[test]
    fn overrides_win_over_file() {
        let overrides = ConfigOverrides {
            listen: Some("127.0.0.1:7000".to_string()),
            target_host: Some("box.lan".to_string()),
            ..secrets()
        };
        let config = GatewayConfig::from_toml(
            "[target]\nhost = \"ignored\"\n[auth]\nkey = \"ignored\"\n",
            overrides,
        )
        .unwrap();

        assert_eq!(config.listen.port(), 7000);
        assert_eq!(config.target_host, "box.lan");
        assert_eq!(config.key, "key");
    }

    #[test]
    fn missing_secrets_are_rejected() {
        assert!(matches!(
            GatewayConfig::from_toml("", ConfigOverrides::default()),
            Err(ConfigError::Invalid(_))
        ));
        let only_key = ConfigOverrides {
            key: Some("key".to_string()),
            ..ConfigOverrides::default()
        };
        assert!(matches!(
            GatewayConfig::from_toml("", only_key),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn bad_input_is_rejected() {
        assert!(matches!(
            GatewayConfig::from_toml("[server]\nlisten = \"nope\"\n", secrets()),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            GatewayConfig::from_toml("[target]\nunknown = 1\n", secrets()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let overrides = ConfigOverrides {
            config_path: Some(PathBuf::from("/nonexistent/portgate.toml")),
            ..secrets()
        };
        assert!(matches!(
            GatewayConfig::load(overrides),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn builds_target_urls() {
        let config = GatewayConfig::new("localhost", "key", "secret");
        assert_eq!(config.target_address(8080), "localhost:8080");
        assert_eq!(
            config.target_url(8080, "/app/index.html", None),
            "http://localhost:8080/app/index.html"
        );
        assert_eq!(
            config.target_url(3000, "/search", Some("q=rust")),
            "http://localhost:3000/search?q=rust"
        );
        assert_eq!(config.target_url(3000, "/", Some("")), "http://localhost:3000/");
    }

    #[test]
    fn port_policy() {
        let mut config = GatewayConfig::new("localhost", "key", "secret");
        assert!(config.port_allowed(22));
        assert!(config.port_allowed(8080));

        config.forbidden_ports = vec![22];
        assert!(!config.port_allowed(22));
        assert!(config.port_allowed(8080));

        config.allowed_ports = vec![8080, 22];
        assert!(config.port_allowed(8080));
        assert!(!config.port_allowed(22));
        assert!(!config.port_allowed(3000));
        assert!(!config.port_allowed(-1));
    }
}
