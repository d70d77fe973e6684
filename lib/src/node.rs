//! The operator-side lifecycle: create, reach, verify, bootstrap.

use log::{info, warn};

use crate::backoff::Backoff;
use crate::bootstrap::bootstrap;
use crate::compute::ComputeApi;
use crate::error::Result;
use crate::metadata::MetadataBundle;
use crate::provision::{create_and_await, NodeInfo};
use crate::settings::Settings;
use crate::ssh::{wait_for_ssh, AdminDialer, AdminSession};
use crate::ssh_config::add_ssh_alias;
use crate::verify::verify_identity;

/// Knobs for one `make_node` run.
#[derive(Debug, Clone, Copy)]
pub struct MakeOptions {
    pub backoff: Backoff,
    /// Write a `~/.ssh/config` alias for the new node.
    pub ssh_alias: bool,
}

impl Default for MakeOptions {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            ssh_alias: true,
        }
    }
}

/// Makes a node of kind `config_name` called `instance_name` and brings it
/// to a usable state. Each step runs only after the one before succeeded.
pub async fn make_node<C, D>(
    api: &C,
    dialer: &D,
    settings: &Settings,
    config_name: &str,
    instance_name: &str,
    options: MakeOptions,
) -> Result<NodeInfo>
where
    C: ComputeApi + ?Sized,
    D: AdminDialer + ?Sized,
{
    let bundle = MetadataBundle::build(settings, config_name)?;
    let node = create_and_await(
        api,
        settings,
        config_name,
        instance_name,
        &bundle,
        options.backoff,
    )
    .await?;
    info!("{} is running at {}", node.name, node.addr);

    let session = wait_for_ssh(dialer, &node, options.backoff).await?;
    let res = configure(&session, settings, &node).await;
    session.close().await;
    res?;

    if options.ssh_alias {
        if let Err(e) = add_ssh_alias(&node.name, &node.addr) {
            warn!("can't add ssh alias for {}: {}", node.name, e);
        }
    }
    Ok(node)
}

async fn configure<S: AdminSession + ?Sized>(
    session: &S,
    settings: &Settings,
    node: &NodeInfo,
) -> Result<()> {
    verify_identity(session, node).await?;
    if let Err(e) = bootstrap(session, settings, node).await {
        // The node stays up for a look around.
        warn!("{}", e);
    }
    Ok(())
}
