use async_trait::async_trait;
use log::{info, warn};

use crate::compute::{ComputeApi, GceClient};
use crate::credentials::access_token;
use crate::error::{Error, Result};
use crate::gce_metadata::MetadataServer;
use crate::idle::Terminator;

const USAGE: &str = "endsession [project zone instance]";

/// Where a node lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceTarget {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl InstanceTarget {
    pub fn from_args(args: &[String]) -> Result<Self> {
        match args {
            [project, zone, name] => Ok(Self {
                project: project.clone(),
                zone: zone.clone(),
                name: name.clone(),
            }),
            _ => Err(Error::Usage(USAGE.into())),
        }
    }

    /// On a node, asks the metadata server, taking any coordinate it can't
    /// answer from `args` in order. Elsewhere `args` must name all three.
    pub async fn resolve(server: &MetadataServer, args: &[String]) -> Result<Self> {
        if !server.on_gce().await {
            return Self::from_args(args);
        }

        let mut rest = args.iter();
        let mut or_arg = |what: &str, found: Result<String>| match found {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("couldn't fetch the {}: {}", what, e);
                rest.next()
                    .cloned()
                    .ok_or_else(|| Error::Usage(format!("no {} from argument or metadata", what)))
            }
        };
        let project = or_arg("project id", server.project_id().await)?;
        let zone = or_arg("zone", server.zone().await)?;
        let name = or_arg("instance name", server.instance_name().await)?;
        Ok(Self { project, zone, name })
    }
}

/// Deletes the node. A node that is already gone counts as deleted.
pub async fn end_session<C: ComputeApi + ?Sized>(api: &C, target: &InstanceTarget) -> Result<()> {
    match api
        .delete_instance(&target.project, &target.zone, &target.name)
        .await
    {
        Ok(()) => {
            info!("deleted {} in {}/{}", target.name, target.project, target.zone);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            info!("{} is already gone", target.name);
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Ends the node this process runs on.
pub struct SelfTeardown {
    server: MetadataServer,
}

impl SelfTeardown {
    pub fn new() -> Result<Self> {
        Ok(Self {
            server: MetadataServer::new()?,
        })
    }
}

#[async_trait]
impl Terminator for SelfTeardown {
    async fn terminate(&self) -> Result<()> {
        let target = InstanceTarget::resolve(&self.server, &[]).await?;
        let api = GceClient::new(access_token(&self.server).await?)?;
        end_session(&api, &target).await
    }
}
