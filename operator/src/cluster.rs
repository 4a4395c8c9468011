use crate::errors::Error;
use xyna_api as api;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment as KubeDeployment;
use k8s_openapi::api::core::v1::Pod as KubePod;
use k8s_openapi::api::core::v1::Service as KubeService;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::api::AttachParams as KubeAttachParams;
use kube::api::DeleteParams as KubeDeleteParams;
use kube::api::ListParams as KubeListParams;
use kube::api::Patch as KubePatch;
use kube::api::PatchParams as KubePatchParams;
use kube::api::PostParams as KubePostParams;
use log;
use serde_json::json;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;

#[cfg(test)]
use mockall::automock;

/* A pod and the container commands are run in */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRef {
    pub name: String,
    pub container: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/*
 * Everything the reconciler needs from the cluster. KubeCluster talks to the
 * API server, tests use the generated MockClusterApi.
 */
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodRef>, Error>;

    async fn create_service(&self, namespace: &str, service: &KubeService) -> Result<CreateOutcome, Error>;

    async fn create_deployment(&self, namespace: &str, deployment: &KubeDeployment) -> Result<CreateOutcome, Error>;

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<(), Error>;

    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool, Error>;

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error>;

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error>;

    /*
     * Runs argv in the pod's container and returns stdout followed by stderr.
     * A command that cannot be started or does not exit successfully is an
     * Error::Exec.
     */
    async fn exec(&self, namespace: &str, pod: &PodRef, argv: &[String]) -> Result<String, Error>;

    async fn patch_status(&self, namespace: &str, name: &str, status: &api::XynaFactoryServiceStatus) -> Result<(), Error>;
}

#[derive(Clone)]
pub struct KubeCluster {
    kube_client: KubeClient,
}

fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == code)
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
	reader.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

impl KubeCluster {

    pub fn new(kube_client: KubeClient) -> Self {
	Self{
	    kube_client,
	}
    }

    fn pods(&self, namespace: &str) -> KubeApi<KubePod> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }

    fn services(&self, namespace: &str) -> KubeApi<KubeService> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }

    fn deployments(&self, namespace: &str) -> KubeApi<KubeDeployment> {
	KubeApi::namespaced(self.kube_client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<PodRef>, Error> {
	let params = KubeListParams::default().labels(selector);
	let pods = self.pods(namespace).list(&params).await?;

	let refs = pods.items.into_iter()
	    .filter_map(|pod| {
		let name = pod.metadata.name?;
		let container = pod.spec?.containers.into_iter().next()?.name;
		Some(PodRef{ name, container })
	    })
	    .collect();
	Ok(refs)
    }

    async fn create_service(&self, namespace: &str, service: &KubeService) -> Result<CreateOutcome, Error> {
	match self.services(namespace).create(&KubePostParams::default(), service).await {
	    Ok(_) => Ok(CreateOutcome::Created),
	    Err(err) if is_status(&err, 409) => Ok(CreateOutcome::AlreadyExists),
	    Err(err) => Err(err.into()),
	}
    }

    async fn create_deployment(&self, namespace: &str, deployment: &KubeDeployment) -> Result<CreateOutcome, Error> {
	match self.deployments(namespace).create(&KubePostParams::default(), deployment).await {
	    Ok(_) => Ok(CreateOutcome::Created),
	    Err(err) if is_status(&err, 409) => Ok(CreateOutcome::AlreadyExists),
	    Err(err) => Err(err.into()),
	}
    }

    async fn patch_deployment(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<(), Error> {
	let params = KubePatchParams::default();
	self.deployments(namespace).patch(name, &params, &KubePatch::Merge(patch)).await?;
	Ok(())
    }

    async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool, Error> {
	Ok(self.deployments(namespace).get_opt(name).await?.is_some())
    }

    async fn delete_deployment(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
	match self.deployments(namespace).delete(name, &KubeDeleteParams::default()).await {
	    Ok(_) => Ok(DeleteOutcome::Deleted),
	    Err(err) if is_status(&err, 404) => Ok(DeleteOutcome::NotFound),
	    Err(err) => Err(err.into()),
	}
    }

    async fn delete_service(&self, namespace: &str, name: &str) -> Result<DeleteOutcome, Error> {
	match self.services(namespace).delete(name, &KubeDeleteParams::default()).await {
	    Ok(_) => Ok(DeleteOutcome::Deleted),
	    Err(err) if is_status(&err, 404) => Ok(DeleteOutcome::NotFound),
	    Err(err) => Err(err.into()),
	}
    }

    async fn exec(&self, namespace: &str, pod: &PodRef, argv: &[String]) -> Result<String, Error> {
	log::debug!("executing {:?} in pod {}/{}", argv, namespace, pod.name);

	let params = KubeAttachParams::default()
	    .container(pod.container.clone())
	    .stdin(false)
	    .stdout(true)
	    .stderr(true);
	let mut attached = self.pods(namespace).exec(&pod.name, argv.to_vec(), &params).await
	    .map_err(|err| Error::exec(&pod.name, argv, err.to_string()))?;

	let stdout = read_all(attached.stdout());
	let stderr = read_all(attached.stderr());
	let status = attached.take_status();

	let (stdout, stderr) = tokio::join!(stdout, stderr);
	let mut output = stdout.map_err(|err| Error::exec(&pod.name, argv, err.to_string()))?;
	output.push_str(&stderr.map_err(|err| Error::exec(&pod.name, argv, err.to_string()))?);

	let status = match status {
	    Some(status) => status.await,
	    None => None,
	};
	if let Err(err) = attached.join().await {
	    return Err(Error::exec(&pod.name, argv, err.to_string()));
	}

	match status {
	    Some(status) if status.status.as_deref() != Some("Success") => {
		let reason = status.message
		    .or(status.reason)
		    .unwrap_or_else(|| String::from("command failed"));
		Err(Error::exec(&pod.name, argv, format!("{} (output: {})", reason, output.trim())))
	    },
	    _ => Ok(output),
	}
    }

    async fn patch_status(&self, namespace: &str, name: &str, status: &api::XynaFactoryServiceStatus) -> Result<(), Error> {
	let factories: KubeApi<api::XynaFactoryService> = KubeApi::namespaced(self.kube_client.clone(), namespace);
	let patch = json!({ "status": status });
	factories.patch_status(name, &KubePatchParams::default(), &KubePatch::Merge(&patch)).await?;
	Ok(())
    }
}
