use std::fmt;

use log::{debug, info};
use tokio::sync::Mutex;

use crate::backoff::{Attempt, Backoff};
use crate::compute::{
    AccessConfig, AttachedDisk, ComputeApi, DiskInitializeParams, Fetched, Instance,
    NetworkInterface, ServiceAccount, SCOPE_CLOUD_PLATFORM, SCOPE_COMPUTE, SCOPE_DEVSTORAGE_FULL,
};
use crate::error::{Error, Result};
use crate::images::{find_newest_stable_image, image_url};
use crate::metadata::MetadataBundle;
use crate::settings::Settings;

pub const SSH_PORT: u16 = 22;

/// What the later lifecycle steps need to reach a freshly made node.
#[derive(Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub config_name: String,
    pub addr: String,
    /// Copied out of the metadata bundle; the node must prove it knows this.
    pub token: String,
}

impl NodeInfo {
    pub fn ssh_addr(&self) -> String {
        format!("{}:{}", self.addr, SSH_PORT)
    }
}

impl fmt::Debug for NodeInfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("NodeInfo")
            .field("name", &self.name)
            .field("config_name", &self.config_name)
            .field("addr", &self.addr)
            .field("token", &"<redacted>")
            .finish()
    }
}

fn api_prefix(project: &str) -> String {
    format!("https://www.googleapis.com/compute/v1/projects/{}", project)
}

/// Describes the instance to create. Pure so the request can be inspected.
pub fn instance_spec(
    settings: &Settings,
    config_name: &str,
    instance_name: &str,
    source_image: String,
    bundle: &MetadataBundle,
) -> Result<Instance> {
    let config = settings.instance_config(config_name)?;
    let prefix = api_prefix(&settings.project_id);
    let zone = settings.zone(config_name);

    Ok(Instance {
        name: instance_name.to_string(),
        description: Some(settings.description(config_name, instance_name)),
        machine_type: format!("{}/zones/{}/machineTypes/{}", prefix, zone, config.hardware),
        disks: vec![AttachedDisk {
            auto_delete: true,
            boot: true,
            disk_type: Some("PERSISTENT".into()),
            initialize_params: Some(DiskInitializeParams {
                disk_name: Some(format!("{}-root", instance_name)),
                disk_size_gb: config.disk_size.filter(|sz| *sz > 0),
                source_image,
            }),
        }],
        metadata: Some(bundle.to_metadata()),
        network_interfaces: vec![NetworkInterface {
            network: Some(format!("{}/global/networks/default", prefix)),
            access_configs: vec![AccessConfig {
                config_type: "ONE_TO_ONE_NAT".into(),
                name: "External NAT".into(),
                nat_ip: None,
            }],
            ..Default::default()
        }],
        service_accounts: vec![ServiceAccount {
            email: "default".into(),
            scopes: vec![
                SCOPE_DEVSTORAGE_FULL.into(),
                SCOPE_COMPUTE.into(),
                SCOPE_CLOUD_PLATFORM.into(),
            ],
        }],
        ..Default::default()
    })
}

/// Creates the node and waits until it is running with an external address.
pub async fn create_and_await<C: ComputeApi + ?Sized>(
    api: &C,
    settings: &Settings,
    config_name: &str,
    instance_name: &str,
    bundle: &MetadataBundle,
    backoff: Backoff,
) -> Result<NodeInfo> {
    let config = settings.instance_config(config_name)?;
    let image = find_newest_stable_image(api, &config.family).await?;
    let spec = instance_spec(
        settings,
        config_name,
        instance_name,
        image_url(&config.family, &image),
        bundle,
    )?;

    let project = settings.project_id.as_str();
    let zone = settings.zone(config_name);
    info!("creating {} in {}/{} from {}", instance_name, project, zone, image.name);

    let op = api
        .insert_instance(project, zone, &spec)
        .await
        .map_err(|e| Error::Create {
            name: instance_name.to_string(),
            reason: e.to_string(),
        })?;
    debug!("insert operation {} etag {:?}", op.name, op.etag);

    let etag = &Mutex::new(op.etag);
    let what = format!("{} to be running", instance_name);
    backoff
        .poll(&what, move |_| async move {
            let mut etag = etag.lock().await;
            match api
                .get_instance(project, zone, instance_name, etag.as_deref())
                .await
            {
                Ok(Fetched::NotModified) => Attempt::Pending("not modified".into()),
                Ok(Fetched::Changed { instance, etag: fresh }) => {
                    info!("got {:?}, status {:?}", instance.name, instance.status);
                    match (instance.is_running(), instance.external_ip()) {
                        (true, Some(ip)) => Attempt::Ready(NodeInfo {
                            name: instance.name.clone(),
                            config_name: config_name.to_string(),
                            addr: ip.to_string(),
                            token: bundle.token().to_string(),
                        }),
                        (_, ip) => {
                            *etag = fresh;
                            Attempt::Pending(format!(
                                "status {:?}, external ip {:?}",
                                instance.status, ip
                            ))
                        }
                    }
                }
                Err(e) => Attempt::Failed(e),
            }
        })
        .await
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::compute::{Image, Operation};
    use crate::settings::InstanceConfig;

    /// In-memory compute API that replays scripted `get` results.
    #[derive(Default)]
    pub(crate) struct FakeCompute {
        pub images: Vec<Image>,
        pub gets: StdMutex<VecDeque<Result<Fetched>>>,
        pub inserted: StdMutex<Vec<Instance>>,
        pub etags_seen: StdMutex<Vec<Option<String>>>,
        pub deleted: StdMutex<Vec<String>>,
        pub existing: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ComputeApi for FakeCompute {
        async fn insert_instance(
            &self,
            _project: &str,
            _zone: &str,
            instance: &Instance,
        ) -> Result<Operation> {
            self.inserted.lock().unwrap().push(instance.clone());
            Ok(Operation {
                name: "op-1".into(),
                status: Some("PENDING".into()),
                etag: Some("etag-0".into()),
            })
        }

        async fn get_instance(
            &self,
            _project: &str,
            _zone: &str,
            _name: &str,
            etag: Option<&str>,
        ) -> Result<Fetched> {
            self.etags_seen.lock().unwrap().push(etag.map(str::to_string));
            self.gets
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(Fetched::NotModified))
        }

        async fn delete_instance(&self, _project: &str, _zone: &str, name: &str) -> Result<()> {
            let mut existing = self.existing.lock().unwrap();
            match existing.iter().position(|n| n == name) {
                Some(i) => {
                    existing.remove(i);
                    self.deleted.lock().unwrap().push(name.to_string());
                    Ok(())
                }
                None => Err(Error::NotFound(name.to_string())),
            }
        }

        async fn list_instances(&self, _project: &str, _zone: &str) -> Result<Vec<Instance>> {
            Ok(Vec::new())
        }

        async fn list_images(&self, _project: &str) -> Result<Vec<Image>> {
            Ok(self.images.clone())
        }
    }

    pub(crate) fn settings() -> Settings {
        let mut types = HashMap::new();
        types.insert(
            "ween".to_string(),
            InstanceConfig {
                family: "cos-cloud".into(),
                hardware: "e2-standard-4".into(),
                disk_size: Some(50),
                ..Default::default()
            },
        );
        Settings {
            project_id: "liqui".into(),
            default_zone: "us-west1-b".into(),
            instance_types: types,
            ..Default::default()
        }
    }

    fn instance(status: &str, ip: Option<&str>) -> Instance {
        Instance {
            name: "ween-1".into(),
            status: Some(status.into()),
            network_interfaces: vec![NetworkInterface {
                access_configs: vec![AccessConfig {
                    nat_ip: ip.map(str::to_string),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn changed(status: &str, ip: Option<&str>, etag: &str) -> Result<Fetched> {
        Ok(Fetched::Changed {
            instance: instance(status, ip),
            etag: Some(etag.into()),
        })
    }

    fn fake(gets: Vec<Result<Fetched>>) -> FakeCompute {
        FakeCompute {
            images: vec![
                Image {
                    name: "cos-stable-105-17412-156-30".into(),
                    ..Default::default()
                },
                Image {
                    name: "cos-beta-109-1-0-0".into(),
                    ..Default::default()
                },
            ],
            gets: StdMutex::new(gets.into()),
            ..Default::default()
        }
    }

    #[test]
    fn spec_describes_the_node() {
        let bundle = MetadataBundle::with_fresh_token();
        let spec = instance_spec(&settings(), "ween", "ween-1", "img".into(), &bundle).unwrap();
        assert!(spec.machine_type.ends_with("/zones/us-west1-b/machineTypes/e2-standard-4"));
        let disk = spec.disks[0].initialize_params.as_ref().unwrap();
        assert_eq!(disk.disk_size_gb, Some(50));
        assert_eq!(disk.source_image, "img");
        assert_eq!(spec.network_interfaces[0].access_configs[0].config_type, "ONE_TO_ONE_NAT");
        assert_eq!(spec.metadata.unwrap().items[0].value.as_deref(), Some(bundle.token()));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_running_with_address() {
        let api = fake(vec![
            Ok(Fetched::NotModified),
            changed("PROVISIONING", None, "etag-1"),
            changed("RUNNING", None, "etag-2"),
            changed("RUNNING", Some("34.1.2.3"), "etag-3"),
        ]);
        let bundle = MetadataBundle::with_fresh_token();

        let node = create_and_await(&api, &settings(), "ween", "ween-1", &bundle, Backoff::default())
            .await
            .unwrap();

        assert_eq!(node.addr, "34.1.2.3");
        assert_eq!(node.name, "ween-1");
        assert_eq!(node.config_name, "ween");
        assert_eq!(node.token, bundle.token());
        assert_eq!(api.inserted.lock().unwrap().len(), 1);
        assert_eq!(
            *api.etags_seen.lock().unwrap(),
            vec![
                Some("etag-0".to_string()),
                Some("etag-0".to_string()),
                Some("etag-1".to_string()),
                Some("etag-2".to_string()),
            ]
        );
        let image = &api.inserted.lock().unwrap()[0].disks[0];
        assert!(image
            .initialize_params
            .as_ref()
            .unwrap()
            .source_image
            .ends_with("/cos-cloud/global/images/cos-stable-105-17412-156-30"));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_the_last_attempt() {
        let api = fake(Vec::new());
        let bundle = MetadataBundle::with_fresh_token();
        let backoff = Backoff {
            attempts: 3,
            base: Duration::from_millis(1),
        };
        let err = create_and_await(&api, &settings(), "ween", "ween-1", &bundle, backoff)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExhaustedAttempts { attempts: 3, .. }));
        assert_eq!(api.etags_seen.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn get_errors_are_fatal() {
        let api = fake(vec![Err(Error::Api {
            status: 403,
            message: "denied".into(),
        })]);
        let bundle = MetadataBundle::with_fresh_token();
        let err = create_and_await(&api, &settings(), "ween", "ween-1", &bundle, Backoff::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Api { status: 403, .. }));
    }

    #[tokio::test]
    async fn no_stable_image_means_no_insert() {
        let mut api = fake(Vec::new());
        api.images.retain(|im| !im.name.contains("stable"));
        let bundle = MetadataBundle::with_fresh_token();
        let err = create_and_await(&api, &settings(), "ween", "ween-1", &bundle, Backoff::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoStableImage(_)));
        assert!(api.inserted.lock().unwrap().is_empty());
    }
}
