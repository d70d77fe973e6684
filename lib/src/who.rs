//! Roster of the login sessions on this machine.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use log::{debug, warn};
use tokio::process::Command;

use crate::error::{Error, Result};

pub const DEV_ROOT: &str = "/dev";

/// Session tty path to the last time it saw activity.
pub type WhoList = BTreeMap<String, SystemTime>;

/// Source of the raw session listing.
#[async_trait]
pub trait SessionRoster: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<u8>>;
}

/// Runs `who`.
pub struct WhoCommand;

#[async_trait]
impl SessionRoster for WhoCommand {
    async fn list_sessions(&self) -> Result<Vec<u8>> {
        let output = Command::new("who")
            .stdin(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;
        if !output.status.success() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("who failed: {}", String::from_utf8_lossy(&output.stderr).trim()),
            )));
        }
        Ok(output.stdout)
    }
}

/// Parses `who` output. The second word of each line names the tty under
/// `dev_root`; new sessions start at the epoch until they're timestamped.
pub fn parse_who(output: &[u8], dev_root: &Path) -> WhoList {
    let mut list = WhoList::new();
    for line in String::from_utf8_lossy(output).lines() {
        match line.split_whitespace().nth(1) {
            Some(tty) => {
                let path = dev_root.join(tty);
                list.insert(path.to_string_lossy().into_owned(), UNIX_EPOCH);
            }
            None => warn!("who line {:?} is not in the expected format, skipping", line),
        }
    }
    list
}

/// Adds sessions we haven't seen; known sessions keep their timestamps.
pub fn merge(current: &mut WhoList, fresh: WhoList) {
    for (session, t) in fresh {
        current.entry(session).or_insert(t);
    }
}

/// Sets every session to its tty's modification time, dropping sessions
/// whose tty is gone.
pub fn refresh_timestamps(list: &mut WhoList) {
    list.retain(|session, t| match fs::metadata(session).and_then(|m| m.modified()) {
        Ok(modified) => {
            *t = modified;
            true
        }
        Err(e) => {
            debug!("dropping {}: {}", session, e);
            false
        }
    });
}

/// Merges a fresh roster into `list` and refreshes every timestamp.
pub async fn update<R: SessionRoster + ?Sized>(
    list: &mut WhoList,
    roster: &R,
    dev_root: &Path,
) -> Result<()> {
    let raw = roster.list_sessions().await?;
    merge(list, parse_who(&raw, dev_root));
    refresh_timestamps(list);
    Ok(())
}

/// True when no session has been active within `threshold` of `now`. An
/// empty list is idle.
pub fn are_idle(list: &WhoList, threshold: Duration, now: SystemTime) -> bool {
    list.values().all(|t| match now.duration_since(*t) {
        Ok(elapsed) => elapsed >= threshold,
        // From the future: treat as active.
        Err(_) => false,
    })
}
