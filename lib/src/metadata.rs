use std::collections::BTreeMap;
use std::fmt;
use std::fs::read_to_string;
use std::path::Path;

use log::{debug, warn};
use rand::{rngs::OsRng, RngCore};

use crate::compute::{Metadata, MetadataItem};
use crate::error::{Error, Result};
use crate::settings::Settings;

pub const USERNAME: &str = "username";
pub const INSTANCE_TOKEN: &str = "instancetoken";
pub const GIT_CREDENTIAL: &str = "gitcredential";
pub const SSH_KEY: &str = "sshkey";
pub const RCLONE_CONFIG: &str = "rcloneconfig";
pub const USER_DATA: &str = "user-data";
pub const GIT_HOST: &str = "githost";
pub const KOPIA_RECONNECTION: &str = "kopiareconnection";

const KEYCHAIN_SERVICE: &str = "cloudnode";

/// 16 bytes from the OS RNG, base64 encoded. One per provisioning attempt.
pub fn fresh_token() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    base64::encode(bytes)
}

/// The key/value set handed to a new node as its instance metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct MetadataBundle {
    entries: BTreeMap<String, String>,
}

impl MetadataBundle {
    /// An empty bundle carrying only a fresh instance token.
    pub fn with_fresh_token() -> Self {
        let mut entries = BTreeMap::new();
        entries.insert(INSTANCE_TOKEN.to_string(), fresh_token());
        Self { entries }
    }

    /// Assembles everything a node of kind `config_name` needs.
    pub fn build(settings: &Settings, config_name: &str) -> Result<Self> {
        let config = settings.instance_config(config_name)?;
        let mut bundle = Self::with_fresh_token();

        bundle.insert(USERNAME, settings.username()?);
        bundle.insert(GIT_CREDENTIAL, git_credential(settings));

        let pubkey = settings.public_key_file();
        let sshkey = read_to_string(&pubkey).map_err(|e| Error::SshKey {
            path: pubkey.display().to_string(),
            reason: e.to_string(),
        })?;
        bundle.insert(SSH_KEY, sshkey);

        let rclone = settings.rclone_config_file();
        bundle.insert(RCLONE_CONFIG, read_optional(&rclone));

        let userdata = settings.user_data_file(config_name)?;
        let contents = read_to_string(&userdata).map_err(|e| {
            Error::Settings(format!(
                "can't read userdata file {}: {}",
                userdata.display(),
                e
            ))
        })?;
        bundle.insert(USER_DATA, contents);

        if let Some(host) = config.git_host.as_ref().filter(|h| !h.is_empty()) {
            bundle.insert(GIT_HOST, host.clone());
        }
        if let Some(kopia) = settings.kopia_reconnection.as_ref().filter(|k| !k.is_empty()) {
            bundle.insert(KOPIA_RECONNECTION, kopia.clone());
        }

        debug!("metadata keys for {}: {:?}", config_name, bundle.keys());
        Ok(bundle)
    }

    fn insert(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn token(&self) -> &str {
        self.get(INSTANCE_TOKEN).unwrap_or_default()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    /// Entries with the instance token blanked out, for display.
    pub fn redacted(&self) -> BTreeMap<&str, &str> {
        self.entries
            .iter()
            .map(|(k, v)| {
                if k == INSTANCE_TOKEN {
                    (k.as_str(), "<redacted>")
                } else {
                    (k.as_str(), v.as_str())
                }
            })
            .collect()
    }

    pub fn to_metadata(&self) -> Metadata {
        Metadata {
            items: self
                .entries
                .iter()
                .map(|(key, value)| MetadataItem {
                    key: key.clone(),
                    value: Some(value.clone()),
                })
                .collect(),
            fingerprint: None,
        }
    }
}

impl fmt::Debug for MetadataBundle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map().entries(self.redacted()).finish()
    }
}

fn read_optional(path: &Path) -> String {
    match read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            debug!("no {}: {}", path.display(), e);
            String::new()
        }
    }
}

/// Keychain first (macOS), then the settings' fallback credential.
fn git_credential(settings: &Settings) -> String {
    if cfg!(target_os = "macos") {
        let cmd = execute::command_args!(
            "/usr/bin/security",
            "find-generic-password",
            "-s",
            KEYCHAIN_SERVICE,
            "-g",
            "-w"
        );
        match crate::command_output(cmd) {
            Ok(out) => return out.trim().to_string(),
            Err(e) => warn!("can't run keychain inquiry: {}", e),
        }
    }
    settings.git_credential.clone().unwrap_or_default()
}
