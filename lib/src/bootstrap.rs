use log::info;

use crate::error::{Error, Result};
use crate::provision::NodeInfo;
use crate::settings::Settings;
use crate::ssh::AdminSession;

/// Runs the instance type's post-bootstrap command, if it has one.
pub async fn bootstrap<S: AdminSession + ?Sized>(
    session: &S,
    settings: &Settings,
    node: &NodeInfo,
) -> Result<()> {
    let config = settings.instance_config(&node.config_name)?;
    let command = match config.post_bootstrap_command.as_deref() {
        Some(cmd) if !cmd.trim().is_empty() => cmd,
        _ => {
            info!("nothing to run on {}", node.name);
            return Ok(());
        }
    };

    info!("running {:?} on {}", command, node.name);
    session
        .run(command)
        .await
        .map_err(|e| Error::Bootstrap {
            node: node.name.clone(),
            command: command.to_string(),
            reason: e.to_string(),
        })
}
