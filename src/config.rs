//! Configuration management

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use cert_policy::{DEFAULT_TTL_SECS, GLOBAL_MAX_TTL_SECS, PolicyLimits};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP listener
    pub server: ServerConfig,
    /// Token store
    pub tokens: TokenStoreConfig,
    /// CA signing program
    pub signer: SignerConfig,
    /// TTL limits
    pub policy: PolicyConfig,
}

impl Config {
    /// Load configuration from defaults, an optional YAML file and the
    /// environment (`CERT_SIGNER_` prefix, `__` separates sections).
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be parsed,
    /// or holds values that fail [`Config::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("CERT_SIGNER_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.policy.default_ttl == 0 {
            return Err(Error::Config("policy.default_ttl must be positive".into()));
        }
        if self.policy.global_max_ttl == 0 {
            return Err(Error::Config(
                "policy.global_max_ttl must be positive".into(),
            ));
        }
        if self.signer.timeout.is_zero() {
            return Err(Error::Config("signer.timeout must be positive".into()));
        }
        if self.signer.program.trim().is_empty() {
            return Err(Error::Config("signer.program must not be empty".into()));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Whole-request timeout; must exceed `signer.timeout`
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    /// Take the audit client address from `X-Forwarded-For` / `X-Real-IP`.
    /// Only enable behind a reverse proxy that sets these headers.
    pub trust_forwarded_for: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5001,
            request_timeout: Duration::from_secs(60),
            max_body_size: 64 * 1024,
            trust_forwarded_for: false,
        }
    }
}

/// Token store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStoreConfig {
    /// JSON file holding `{"tokens": {...}}`
    pub path: PathBuf,
    /// Reuse a loaded snapshot for this long. `0s` re-reads on every request.
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
}

impl Default for TokenStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/tunnel/tunnel_tokens.json"),
            cache_ttl: Duration::ZERO,
        }
    }
}

/// CA signing program configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Program invoked as `<program> -s <ca_key> -I <id> -n <principal> -V +<ttl>s <file>`
    pub program: String,
    /// CA private key
    pub ca_key: PathBuf,
    /// Parent directory for per-request staging directories (system temp dir if unset)
    pub work_dir: Option<PathBuf>,
    /// Kill the signing program if it runs longer than this
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            program: "ssh-keygen".to_string(),
            ca_key: PathBuf::from("/etc/ssh/ca/ssh_ca"),
            work_dir: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// TTL policy configuration (seconds)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// TTL used when a request omits `ttl`; also the cap for tokens without `max_ttl`
    pub default_ttl: u64,
    /// Hard ceiling applied after the token cap
    pub global_max_ttl: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_TTL_SECS,
            global_max_ttl: GLOBAL_MAX_TTL_SECS,
        }
    }
}

impl From<PolicyConfig> for PolicyLimits {
    fn from(config: PolicyConfig) -> Self {
        Self {
            default_ttl: config.default_ttl,
            global_max_ttl: config.global_max_ttl,
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // "ms" before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn parses_units() {
            assert_eq!(parse("30s").unwrap(), Duration::from_secs(30));
            assert_eq!(parse("5m").unwrap(), Duration::from_secs(300));
            assert_eq!(parse("100ms").unwrap(), Duration::from_millis(100));
            assert_eq!(parse("7").unwrap(), Duration::from_secs(7));
            assert!(parse("soon").is_err());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_match_deployment_layout() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 5001);
        assert_eq!(
            config.tokens.path,
            PathBuf::from("/etc/tunnel/tunnel_tokens.json")
        );
        assert_eq!(config.signer.ca_key, PathBuf::from("/etc/ssh/ca/ssh_ca"));
        assert_eq!(config.policy.default_ttl, 3600);
        assert_eq!(config.policy.global_max_ttl, 31_536_000);
        assert!(config.tokens.cache_ttl.is_zero());
        config.validate().unwrap();
    }

    #[test]
    fn yaml_overrides_defaults() {
        let yaml = r#"
server:
  port: 6001
tokens:
  path: /srv/tokens.json
  cache_ttl: 5s
signer:
  timeout: 10s
policy:
  default_ttl: 600
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 6001);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.tokens.path, PathBuf::from("/srv/tokens.json"));
        assert_eq!(config.tokens.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.signer.timeout, Duration::from_secs(10));
        assert_eq!(config.signer.program, "ssh-keygen");
        assert_eq!(config.policy.default_ttl, 600);
        assert_eq!(config.policy.global_max_ttl, 31_536_000);
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signer.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "signer:\n  program: /usr/local/bin/fake-keygen").unwrap();
        drop(f);

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.signer.program, "/usr/local/bin/fake-keygen");
        assert_eq!(config.server.port, 5001);
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/signer.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let mut config = Config::default();
        config.policy.default_ttl = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.signer.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.signer.program = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn policy_config_converts_to_limits() {
        let limits: PolicyLimits = PolicyConfig {
            default_ttl: 60,
            global_max_ttl: 120,
        }
        .into();
        assert_eq!(limits.default_ttl, 60);
        assert_eq!(limits.global_max_ttl, 120);
    }
}
