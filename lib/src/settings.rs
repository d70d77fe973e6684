use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use shellexpand::tilde;

use crate::error::{Error, Result};

pub const DEFAULT_SETTINGS_PATH: &str = "~/.config/cloudnode/settings.json";
const DEFAULT_PRIVATE_KEY: &str = "~/.ssh/id_ed25519";
const DEFAULT_RCLONE_CONFIG: &str = "~/.config/rclone/rclone.conf";

/// One named kind of node that can be made.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct InstanceConfig {
    #[serde(default)]
    pub family: String,
    #[serde(default)]
    pub hardware: String,
    /// Boot disk size in GB. Absent or zero keeps the image's size.
    #[serde(default)]
    pub disk_size: Option<u64>,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub post_bootstrap_command: Option<String>,
    #[serde(default)]
    pub git_host: Option<String>,
    #[serde(default)]
    pub user_data: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub project_id: String,
    pub default_zone: String,
    #[serde(default)]
    pub instance_types: HashMap<String, InstanceConfig>,
    #[serde(default)]
    pub user_data: Option<String>,
    #[serde(default)]
    pub ssh_private_key: Option<String>,
    #[serde(default)]
    pub ssh_public_key: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub git_credential: Option<String>,
    #[serde(default)]
    pub rclone_config: Option<String>,
    #[serde(default)]
    pub kopia_reconnection: Option<String>,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(tilde(path).to_string())
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

impl Settings {
    pub fn read(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| Error::Settings(format!("no config file {}: {}", path.display(), e)))?;
        let settings: Settings = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Settings(format!("error parsing {}: {}", path.display(), e)))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn read_default() -> Result<Self> {
        Self::read(&expand(DEFAULT_SETTINGS_PATH))
    }

    fn validate(&self) -> Result<()> {
        if self.project_id.is_empty() {
            return Err(Error::Settings("projectId must be set".into()));
        }
        if self.default_zone.is_empty() {
            return Err(Error::Settings("defaultZone must be set".into()));
        }
        Ok(())
    }

    /// Looks up a configuration that can actually be used to make a node.
    pub fn instance_config(&self, name: &str) -> Result<&InstanceConfig> {
        let config = self
            .instance_types
            .get(name)
            .ok_or_else(|| Error::UnknownConfig(name.to_string()))?;
        if config.family.is_empty() {
            return Err(Error::MissingField {
                config: name.to_string(),
                field: "family",
            });
        }
        if config.hardware.is_empty() {
            return Err(Error::MissingField {
                config: name.to_string(),
                field: "hardware",
            });
        }
        Ok(config)
    }

    pub fn zone(&self, name: &str) -> &str {
        self.instance_types
            .get(name)
            .and_then(|c| non_empty(&c.zone))
            .unwrap_or(&self.default_zone)
    }

    pub fn description(&self, name: &str, instance: &str) -> String {
        match self.instance_types.get(name).and_then(|c| non_empty(&c.description)) {
            Some(description) => description.to_string(),
            None => format!("cloudnode {} node {}", name, instance),
        }
    }

    pub fn user_data_file(&self, name: &str) -> Result<PathBuf> {
        self.instance_types
            .get(name)
            .and_then(|c| non_empty(&c.user_data))
            .or_else(|| non_empty(&self.user_data))
            .map(expand)
            .ok_or(Error::MissingField {
                config: name.to_string(),
                field: "userData",
            })
    }

    pub fn private_key_file(&self) -> PathBuf {
        expand(non_empty(&self.ssh_private_key).unwrap_or(DEFAULT_PRIVATE_KEY))
    }

    pub fn public_key_file(&self) -> PathBuf {
        match non_empty(&self.ssh_public_key) {
            Some(path) => expand(path),
            None => {
                let mut path = self.private_key_file().into_os_string();
                path.push(".pub");
                PathBuf::from(path)
            }
        }
    }

    pub fn rclone_config_file(&self) -> PathBuf {
        expand(non_empty(&self.rclone_config).unwrap_or(DEFAULT_RCLONE_CONFIG))
    }

    /// Username on the node, also used to log in over ssh.
    pub fn username(&self) -> Result<String> {
        if let Some(name) = non_empty(&self.username) {
            return Ok(name.to_string());
        }
        std::env::var("USER")
            .or_else(|_| std::env::var("LOGNAME"))
            .map_err(|_| Error::Settings("can't determine username, set USER".into()))
    }

    pub fn unique_families(&self) -> Vec<String> {
        self.instance_types
            .values()
            .filter(|c| !c.family.is_empty())
            .map(|c| c.family.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}
