use std::env;

use log::debug;

use crate::error::{Error, Result};
use crate::gce_metadata::MetadataServer;

pub const TOKEN_ENV: &str = "CLOUDNODE_ACCESS_TOKEN";

/// An OAuth access token for the compute API: the environment, then the
/// node's service account, then the operator's gcloud login.
pub async fn access_token(server: &MetadataServer) -> Result<String> {
    if let Ok(token) = env::var(TOKEN_ENV) {
        if !token.trim().is_empty() {
            debug!("access token from {}", TOKEN_ENV);
            return Ok(token.trim().to_string());
        }
    }

    if server.on_gce().await {
        match server.access_token().await {
            Ok(token) => {
                debug!("access token from the metadata server");
                return Ok(token);
            }
            Err(e) => debug!("no service account token: {}", e),
        }
    }

    let cmd = execute::command_args!("gcloud", "auth", "print-access-token");
    let token = crate::command_output(cmd)
        .map_err(|e| Error::Auth(format!("no token in ${}, not on a node, and gcloud said: {}", TOKEN_ENV, e)))?;
    let token = token.trim();
    if token.is_empty() {
        return Err(Error::Auth("gcloud printed an empty access token".into()));
    }
    debug!("access token from gcloud");
    Ok(token.to_string())
}
