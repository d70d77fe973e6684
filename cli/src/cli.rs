use std::path::Path;

use anyhow::{bail, Context, Result};
use cloudnode_lib::{
    compute::{ComputeApi, Fetched, GceClient, Instance},
    credentials::access_token,
    gce_metadata::MetadataServer,
    images::{list_project_images, select_stable},
    metadata::{MetadataBundle, INSTANCE_TOKEN},
    node::{make_node, MakeOptions},
    settings::Settings,
    ssh::{SshConfig, SshDialer},
    teardown::{end_session as delete_node, InstanceTarget},
};
use colored::*;
use log::*;
use prettytable::{cell, row, Table};

fn load(settings: &Path) -> Result<Settings> {
    Settings::read(settings).with_context(|| format!("can't load settings {}", settings.display()))
}

async fn client() -> Result<GceClient> {
    let server = MetadataServer::new()?;
    let token = access_token(&server).await?;
    Ok(GceClient::new(token)?)
}

pub(crate) async fn make(settings: &Path, config: &str, name: &str, alias: bool) -> Result<()> {
    let settings = load(settings)?;
    let ssh = SshConfig::load(&settings).context("ssh setup")?;
    let dialer = SshDialer::new(ssh)?;
    let api = client().await?;

    let options = MakeOptions {
        ssh_alias: alias,
        ..Default::default()
    };
    let node = make_node(&api, &dialer, &settings, config, name, options)
        .await
        .with_context(|| format!("making {} node {}", config, name))?;

    println!("{} {} at {}", "ready".green(), node.name, node.addr);
    Ok(())
}

pub(crate) async fn end_session(args: &[String]) -> Result<()> {
    let server = MetadataServer::new()?;
    let target = InstanceTarget::resolve(&server, args).await?;
    info!("ending {} in {}/{}", target.name, target.project, target.zone);
    let api = GceClient::new(access_token(&server).await?)?;
    delete_node(&api, &target)
        .await
        .with_context(|| format!("deleting {}", target.name))?;
    Ok(())
}

fn status(instance: &Instance) -> ColoredString {
    let status = instance.status.as_deref().unwrap_or("UNKNOWN");
    if instance.is_running() {
        status.green()
    } else {
        status.yellow()
    }
}

pub(crate) async fn list(
    settings: &Path,
    project: Option<String>,
    zone: Option<String>,
) -> Result<()> {
    let (project, zone) = match (project, zone) {
        (Some(project), Some(zone)) => (project, zone),
        (project, _) => {
            let settings = load(settings)?;
            (
                project.unwrap_or_else(|| settings.project_id.clone()),
                settings.default_zone.clone(),
            )
        }
    };

    let api = client().await?;
    let instances = api
        .list_instances(&project, &zone)
        .await
        .with_context(|| format!("listing {}/{}", project, zone))?;

    let mut table = Table::new();
    table.add_row(row!["Name", "Machine Type", "Status", "External IP"]);
    for instance in instances.iter() {
        let machine = instance
            .machine_type
            .rsplit('/')
            .next()
            .unwrap_or_default();
        table.add_row(row![
            instance.name,
            machine,
            status(instance),
            instance.external_ip().unwrap_or("-")
        ]);
    }
    table.printstd();
    Ok(())
}

pub(crate) async fn describe(settings: &Path, name: &str, keys_only: bool) -> Result<()> {
    let settings = load(settings)?;
    let api = client().await?;
    let mut instance = match api
        .get_instance(&settings.project_id, &settings.default_zone, name, None)
        .await?
    {
        Fetched::Changed { instance, .. } => instance,
        Fetched::NotModified => bail!("{} came back unmodified", name),
    };

    if keys_only {
        for key in instance.metadata_keys() {
            println!("{}", key);
        }
        return Ok(());
    }

    if let Some(metadata) = instance.metadata.as_mut() {
        for item in metadata.items.iter_mut().filter(|i| i.key == INSTANCE_TOKEN) {
            item.value = Some("<redacted>".into());
        }
    }
    println!("{}", serde_json::to_string_pretty(&instance)?);
    Ok(())
}

pub(crate) async fn images(settings: &Path) -> Result<()> {
    let settings = load(settings)?;
    let api = client().await?;

    for family in settings.unique_families() {
        let images = list_project_images(&api, &family).await?;
        let mut table = Table::new();
        table.add_row(row!["Image", "Family"]);
        for image in images.iter() {
            table.add_row(row![image.name, image.family.as_deref().unwrap_or("-")]);
        }
        println!("{}", family.bold());
        table.printstd();

        match select_stable(&family, &images) {
            Ok(image) => println!("newest stable: {}", image.name.green()),
            Err(e) => println!("{}", e.to_string().red()),
        }
    }
    Ok(())
}

pub(crate) fn show_meta(settings: &Path, config: &str) -> Result<()> {
    let settings = load(settings)?;
    let bundle = MetadataBundle::build(&settings, config)
        .with_context(|| format!("building metadata for {}", config))?;
    for (key, value) in bundle.redacted() {
        println!("{}: {}", key.bold(), value);
    }
    Ok(())
}

pub(crate) async fn print_meta() -> Result<()> {
    let server = MetadataServer::new()?;
    if !server.on_gce().await {
        bail!("printmeta only works on a cloud node");
    }
    println!("{}", server.project_id().await.context("fetching the project id")?);
    println!("{}", server.zone().await.context("fetching the zone")?);
    println!("{}", server.instance_name().await.context("fetching the instance name")?);
    Ok(())
}
