use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub socket_path: String,
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    /// Inspection mailbox for anything that is not part of the token workflow
    pub forward_to: String,
    /// Replace an already stored token when the service sends another one
    #[serde(default = "default_overwrite_tokens")]
    pub overwrite_tokens: bool,
    pub identity: IdentityConfig,
    pub service: ServiceConfig,
    pub store: StoreConfig,
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub domain: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_noun_categories")]
    pub noun_categories: Vec<WordCategory>,
    #[serde(default = "default_adjective_categories")]
    pub adjective_categories: Vec<WordCategory>,
}

/// Word categories available to the identity generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WordCategory {
    Technology,
    Time,
    Transportation,
    Quantity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Subject marker every message from the upstream service carries
    pub subject_marker: String,
    pub verification_subject: String,
    pub welcome_subject: String,
    /// Verification URL prefix, the extracted token is appended verbatim
    pub verify_base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    Memory,
    File { path: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchConfig {
    Spool {
        path: String,
    },
    Webhook {
        url: String,
        timeout_seconds: Option<u64>,
    },
}

fn default_pid_file() -> String {
    "/var/run/token-harvester.pid".to_string()
}

fn default_overwrite_tokens() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    64
}

fn default_noun_categories() -> Vec<WordCategory> {
    vec![
        WordCategory::Technology,
        WordCategory::Time,
        WordCategory::Transportation,
    ]
}

fn default_adjective_categories() -> Vec<WordCategory> {
    vec![WordCategory::Time, WordCategory::Quantity]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            socket_path: "/var/run/token-harvester.sock".to_string(),
            pid_file: default_pid_file(),
            forward_to: "postmaster@localhost".to_string(),
            overwrite_tokens: default_overwrite_tokens(),
            identity: IdentityConfig {
                domain: "transitrid.ing".to_string(),
                max_attempts: default_max_attempts(),
                noun_categories: default_noun_categories(),
                adjective_categories: default_adjective_categories(),
            },
            service: ServiceConfig::default(),
            store: StoreConfig::File {
                path: "/var/lib/token-harvester/identities.json".to_string(),
            },
            dispatch: DispatchConfig::Spool {
                path: "/var/lib/token-harvester/verify-queue.jsonl".to_string(),
            },
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            subject_marker: "511 SF Bay:".to_string(),
            verification_subject: "Developer Token Request".to_string(),
            welcome_subject: "Welcome to Open APIs".to_string(),
            verify_base_url: "https://511.org/request-verify?verification-token=".to_string(),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {path}"))?;
        let config: Config = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let service = &self.service;
        for (name, marker) in [
            ("subject_marker", &service.subject_marker),
            ("verification_subject", &service.verification_subject),
            ("welcome_subject", &service.welcome_subject),
        ] {
            if marker.trim().is_empty() {
                bail!("service.{name} must not be empty");
            }
        }

        let base = Url::parse(&service.verify_base_url).with_context(|| {
            format!("Invalid verify_base_url: {}", service.verify_base_url)
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("verify_base_url must be http(s), got {}", base.scheme());
        }

        if self.identity.domain.is_empty() || self.identity.domain.contains('@') {
            bail!("identity.domain must be a bare domain name");
        }
        if self.identity.max_attempts == 0 {
            bail!("identity.max_attempts must be at least 1");
        }
        if self.identity.noun_categories.is_empty()
            || self.identity.adjective_categories.is_empty()
        {
            bail!("identity word categories must not be empty");
        }
        if !self.forward_to.contains('@') {
            bail!("forward_to must be an email address");
        }

        if let DispatchConfig::Webhook { url, .. } = &self.dispatch {
            Url::parse(url).with_context(|| format!("Invalid dispatch webhook url: {url}"))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.overwrite_tokens);
        assert_eq!(config.identity.max_attempts, 64);
    }

    #[test]
    fn test_yaml_round_trip_keeps_tagged_sections() {
        let yaml = r#"
socket_path: /tmp/th.sock
forward_to: inspect@example.com
overwrite_tokens: false
identity:
  domain: example.org
service:
  subject_marker: "511 SF Bay:"
  verification_subject: Developer Token Request
  welcome_subject: Welcome to Open APIs
  verify_base_url: "https://511.org/request-verify?verification-token="
store:
  type: memory
dispatch:
  type: webhook
  url: http://127.0.0.1:9000/verify
  timeout_seconds: 3
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.overwrite_tokens);
        assert_eq!(config.pid_file, "/var/run/token-harvester.pid");
        assert_eq!(config.identity.max_attempts, 64);
        assert_eq!(
            config.identity.adjective_categories,
            vec![WordCategory::Time, WordCategory::Quantity]
        );
        assert!(matches!(config.store, StoreConfig::Memory));
        assert!(matches!(
            config.dispatch,
            DispatchConfig::Webhook {
                timeout_seconds: Some(3),
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.service.verify_base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.identity.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.service.subject_marker = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.identity.domain = "user@transitrid.ing".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let path = path.to_str().unwrap();

        let mut config = Config::default();
        config.forward_to = "someone@example.net".to_string();
        config.to_file(path).unwrap();

        let loaded = Config::from_file(path).unwrap();
        assert_eq!(loaded.forward_to, "someone@example.net");
        assert_eq!(loaded.identity.domain, "transitrid.ing");
    }
}
