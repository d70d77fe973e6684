use log::info;

use crate::error::{Error, Result};
use crate::metadata::INSTANCE_TOKEN;
use crate::provision::NodeInfo;
use crate::ssh::AdminSession;

/// Checks that the host behind `session` is the node we created.
///
/// The node's metadata server is asked for the instance token through the
/// node's own network, so a host that took over the address after creation
/// can't answer with the token we generated. The read travels over the
/// channel being checked, so an on-path attacker who also captured the
/// token when the node was created would still pass.
pub async fn verify_identity<S: AdminSession + ?Sized>(session: &S, node: &NodeInfo) -> Result<()> {
    let got = session.proxied_read(INSTANCE_TOKEN).await?;
    if got != node.token {
        return Err(Error::TokenMismatch {
            got,
            want: node.token.clone(),
        });
    }
    info!("{} presented the expected instance token", node.name);
    Ok(())
}
