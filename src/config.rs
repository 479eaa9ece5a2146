/// Service configuration: an optional TOML file, then environment overrides.
///
/// ```toml
/// listen_addr = "0.0.0.0:8080"
/// database_url = "postgres://localhost/evidence"
///
/// [anchor]
/// network = "preview"
/// broadcast_enabled = true
/// blockfrost_project_id = "preview..."
/// signing_key = "/etc/evidence-anchor/payment.skey"
/// payment_address = "addr_test1..."
///
/// [ipfs]
/// api_url = "http://localhost:5001"
/// ```
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::anchor::blockfrost::{self, BlockfrostClient};
use crate::anchor::cardano::CardanoLedger;
use crate::anchor::cardano_cli::{self, CardanoCliConfig, CardanoCliSubmitter};
use crate::anchor::AnchorService;
use crate::error::{IntegrityError, Result};
use crate::storage::ipfs::{IpfsConfig, IpfsStore};
use crate::storage::ContentStore;
use crate::worker::DEFAULT_QUEUE_CAPACITY;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub listen_addr: String,
    /// PostgreSQL URL. Without one, state is kept in memory.
    pub database_url: Option<String>,
    pub anchor: AnchorSettings,
    pub ipfs: Option<IpfsSettings>,
    pub worker: WorkerSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            anchor: AnchorSettings::default(),
            ipfs: None,
            worker: WorkerSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorSettings {
    /// "preview", "preprod" or "mainnet".
    pub network: String,
    pub broadcast_enabled: bool,
    pub blockfrost_project_id: Option<String>,
    /// Overrides the hosted Blockfrost URL for `network`.
    pub blockfrost_url: Option<String>,
    pub signing_key: Option<PathBuf>,
    pub payment_address: Option<String>,
    pub cardano_cli: PathBuf,
    pub confirmation_threshold: i64,
    pub request_timeout_secs: u64,
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            network: "preview".to_string(),
            broadcast_enabled: false,
            blockfrost_project_id: None,
            blockfrost_url: None,
            signing_key: None,
            payment_address: None,
            cardano_cli: PathBuf::from("cardano-cli"),
            confirmation_threshold: 1,
            request_timeout_secs: 15,
        }
    }
}

impl AnchorSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsSettings {
    pub api_url: String,
    #[serde(default = "default_gateway")]
    pub gateway_url: String,
}

fn default_gateway() -> String {
    "https://ipfs.io".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub queue_capacity: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| IntegrityError::Config(format!("invalid value for {key}: {value:?}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(IntegrityError::Config(format!(
            "invalid value for {key}: {value:?}"
        ))),
    }
}

impl Config {
    /// Parse a TOML config file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|err| IntegrityError::Config(format!("unable to parse config: {err}")))
    }

    /// Load from an optional file, apply process environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (the process environment in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some(v) = lookup("LISTEN_ADDR") {
            self.listen_addr = v;
        }
        if let Some(v) = lookup("CARDANO_NETWORK") {
            self.anchor.network = v.trim().to_ascii_lowercase();
        }
        if let Some(v) = lookup("BLOCKFROST_PROJECT_ID") {
            self.anchor.blockfrost_project_id = Some(v);
        }
        if let Some(v) = lookup("ANCHOR_BROADCAST_ENABLED") {
            self.anchor.broadcast_enabled = parse_bool("ANCHOR_BROADCAST_ENABLED", &v)?;
        }
        if let Some(v) = lookup("ANCHOR_SIGNING_KEY") {
            self.anchor.signing_key = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ANCHOR_PAYMENT_ADDRESS") {
            self.anchor.payment_address = Some(v);
        }
        if let Some(v) = lookup("ANCHOR_CONFIRMATION_THRESHOLD") {
            self.anchor.confirmation_threshold = parse_env("ANCHOR_CONFIRMATION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("ANCHOR_REQUEST_TIMEOUT_SECS") {
            self.anchor.request_timeout_secs = parse_env("ANCHOR_REQUEST_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("IPFS_API_URL") {
            let gateway_url = self
                .ipfs
                .as_ref()
                .map(|i| i.gateway_url.clone())
                .unwrap_or_else(default_gateway);
            self.ipfs = Some(IpfsSettings {
                api_url: v,
                gateway_url,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        cardano_cli::network_args(&self.anchor.network)?;
        if self.anchor.confirmation_threshold < 1 {
            return Err(IntegrityError::Config(
                "anchor.confirmation_threshold must be at least 1".into(),
            ));
        }
        if self.anchor.request_timeout_secs == 0 {
            return Err(IntegrityError::Config(
                "anchor.request_timeout_secs must be positive".into(),
            ));
        }
        if self.worker.queue_capacity == 0 {
            return Err(IntegrityError::Config(
                "worker.queue_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Build the anchor service. Broadcasting needs the flag and a
    /// Blockfrost project id; without them every anchor is simulated.
    pub fn anchor_service(&self) -> Result<AnchorService> {
        let settings = &self.anchor;
        let project_id = match (&settings.blockfrost_project_id, settings.broadcast_enabled) {
            (Some(id), true) if !id.trim().is_empty() => id.clone(),
            (_, true) => {
                warn!(
                    "Broadcasting enabled but no Blockfrost project id configured, \
                     simulating anchors"
                );
                return Ok(AnchorService::simulated(&settings.network));
            }
            (_, false) => {
                info!(network = %settings.network, "Broadcasting disabled, anchors are simulated");
                return Ok(AnchorService::simulated(&settings.network));
            }
        };

        let base_url = settings
            .blockfrost_url
            .clone()
            .unwrap_or_else(|| blockfrost::default_base_url(&settings.network));
        let client = BlockfrostClient::new(base_url, project_id, settings.request_timeout())?;

        let submitter = match (&settings.signing_key, &settings.payment_address) {
            (Some(key), Some(address)) => Some(CardanoCliSubmitter::new(
                CardanoCliConfig {
                    binary: settings.cardano_cli.clone(),
                    signing_key: key.clone(),
                    payment_address: address.clone(),
                    network: settings.network.clone(),
                },
                client.clone(),
            )?),
            _ => {
                warn!(
                    "No signing key or payment address configured, \
                     submissions will fall back to simulation"
                );
                None
            }
        };

        let ledger = CardanoLedger::new(&settings.network, client, submitter);
        info!(network = %settings.network, "Anchor broadcasting enabled");
        Ok(AnchorService::broadcasting(
            Arc::new(ledger),
            settings.request_timeout(),
        ))
    }

    /// Build the content store, if one is configured.
    pub fn content_store(&self) -> Result<Option<Arc<dyn ContentStore>>> {
        match &self.ipfs {
            Some(ipfs) => {
                let store = IpfsStore::new(
                    IpfsConfig {
                        api_url: ipfs.api_url.clone(),
                        gateway_url: ipfs.gateway_url.clone(),
                    },
                    self.anchor.request_timeout(),
                )?;
                Ok(Some(Arc::new(store)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.anchor.network, "preview");
        assert!(!config.anchor.broadcast_enabled);
        assert_eq!(config.anchor.confirmation_threshold, 1);
        assert_eq!(config.anchor.request_timeout(), Duration::from_secs(15));
        assert_eq!(config.worker.queue_capacity, 256);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_sections() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
listen_addr = "127.0.0.1:9000"

[anchor]
network = "preprod"
confirmation_threshold = 3

[ipfs]
api_url = "http://localhost:5001"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.anchor.network, "preprod");
        assert_eq!(config.anchor.confirmation_threshold, 3);
        assert_eq!(config.anchor.request_timeout_secs, 15);
        assert_eq!(config.ipfs.unwrap().gateway_url, "https://ipfs.io");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(env(&[
                ("CARDANO_NETWORK", "Mainnet"),
                ("ANCHOR_BROADCAST_ENABLED", "true"),
                ("BLOCKFROST_PROJECT_ID", "mainnetabc"),
                ("ANCHOR_CONFIRMATION_THRESHOLD", "6"),
                ("IPFS_API_URL", "http://ipfs:5001"),
            ]))
            .unwrap();

        assert_eq!(config.anchor.network, "mainnet");
        assert!(config.anchor.broadcast_enabled);
        assert_eq!(config.anchor.confirmation_threshold, 6);
        assert_eq!(config.ipfs.as_ref().unwrap().api_url, "http://ipfs:5001");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_overrides_rejected() {
        let mut config = Config::default();
        assert!(config
            .apply_overrides(env(&[("ANCHOR_REQUEST_TIMEOUT_SECS", "soon")]))
            .is_err());
        assert!(config
            .apply_overrides(env(&[("ANCHOR_BROADCAST_ENABLED", "maybe")]))
            .is_err());

        config.anchor.network = "guildnet".into();
        assert!(matches!(config.validate(), Err(IntegrityError::Config(_))));
    }

    #[test]
    fn test_anchor_service_simulates_without_credentials() {
        let mut config = Config::default();
        assert!(!config.anchor_service().unwrap().is_broadcasting());

        config.anchor.broadcast_enabled = true;
        assert!(!config.anchor_service().unwrap().is_broadcasting());

        config.anchor.blockfrost_project_id = Some("previewabc".into());
        let service = config.anchor_service().unwrap();
        assert!(service.is_broadcasting());
        assert_eq!(service.network(), "preview");
    }
}
