use kube_derive::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_IMAGE: &str = "xynafactory/xynafactory:latest";
pub const DEFAULT_PROTOCOL: &str = "TCP";
pub const DEFAULT_PORT: i32 = 8080;

fn default_image() -> String {
    String::from(DEFAULT_IMAGE)
}

fn default_replicas() -> i32 {
    1
}

fn default_protocol() -> String {
    String::from(DEFAULT_PROTOCOL)
}

fn default_port() -> i32 {
    DEFAULT_PORT
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FactoryState {
    /*
     * The resource was just observed and its services are being created
     */
    Creating,

    /*
     * Services exist, the deployment is being created or patched
     */
    Provisioning,

    /*
     * Waiting until every pod of the deployment reports a running factory
     */
    WaitingReady,

    /*
     * Applications are being installed and started inside the pods
     */
    Converging,

    /*
     * Every pod runs every requested application
     */
    Ready,

    /*
     * The last reconciliation failed, see status.message
     */
    Failed,
}

impl FactoryState {
    pub fn as_str(&self) -> &'static str {
	match self {
	    FactoryState::Creating => "creating",
	    FactoryState::Provisioning => "provisioning",
	    FactoryState::WaitingReady => "waitingReady",
	    FactoryState::Converging => "converging",
	    FactoryState::Ready => "ready",
	    FactoryState::Failed => "failed",
	}
    }
}

impl fmt::Display for FactoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
	f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppSpec {

    /* Name of the application as listed by the factory */
    pub name: String,

    /* Where the application archive is downloaded from */
    pub app_url: String,

    /*
     * Installation order, lower first. Applications without an order
     * are installed after all ordered ones, keeping their list position.
     */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl AppSpec {

    /*
     * The file name the archive is stored under inside the pod, taken from the
     * last path segment of the url.
     */
    pub fn archive_name(&self) -> String {
	let path = self.app_url.split(['?', '#']).next().unwrap_or_default();
	match path.rsplit('/').next() {
	    Some(segment) if !segment.is_empty() => segment.to_string(),
	    _ => format!("{}.zip", self.name),
	}
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    #[serde(default = "default_protocol")]
    pub protocol: String,

    #[serde(default = "default_port")]
    pub port: i32,

    #[serde(default = "default_port")]
    pub target_port: i32,
}

impl Default for PortSpec {
    fn default() -> Self {
	Self{
	    service_name: None,
	    protocol: default_protocol(),
	    port: default_port(),
	    target_port: default_port(),
	}
    }
}

impl PortSpec {

    /*
     * Explicit service name, or one derived from the port so that distinct
     * ports always end up in distinct services.
     */
    pub fn service_name(&self) -> String {
	match &self.service_name {
	    Some(name) => name.clone(),
	    None => format!("service{}", self.port),
	}
    }

    pub fn is_tcp(&self) -> bool {
	self.protocol == DEFAULT_PROTOCOL
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NodeLabel {
    pub key: String,
    pub value: String,
}

#[derive(CustomResource, Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "xyna.com", version = "v1alpha1", kind = "XynaFactoryService", namespaced)]
#[kube(status = "XynaFactoryServiceStatus", shortname = "xfs")]
#[kube(printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#)]
#[serde(rename_all = "camelCase")]
pub struct XynaFactoryServiceSpec {

    /* container image running the factory */
    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_replicas")]
    #[schemars(range(min = 0))]
    pub replicas: i32,

    /* applications to install into every pod */
    #[serde(default)]
    pub applications: Vec<AppSpec>,

    /* one ClusterIP service is created per entry */
    #[serde(default)]
    pub service_ports: Vec<PortSpec>,

    /*
     * Every label must match on the node the pods get scheduled on
     */
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_labels: Option<Vec<NodeLabel>>,
}

impl XynaFactoryServiceSpec {

    /*
     * Target port of the first TCP service port, used for the readiness probe
     */
    pub fn probe_port(&self) -> Option<i32> {
	self.service_ports.iter()
	    .find(|port| port.is_tcp())
	    .map(|port| port.target_port)
    }

    pub fn ordered_applications(&self) -> Vec<&AppSpec> {
	install_order(&self.applications)
    }
}

/*
 * Sort applications by their order, the ones without order last. The sort is
 * stable so ties keep their original position.
 */
pub fn install_order(apps: &[AppSpec]) -> Vec<&AppSpec> {
    let mut ordered: Vec<&AppSpec> = apps.iter().collect();
    ordered.sort_by_key(|app| (app.order.is_none(), app.order.unwrap_or_default()));
    ordered
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct XynaFactoryServiceStatus {

    // one of the FactoryState values
    pub state: Option<String>,

    // reason of the last failure, cleared once ready
    pub message: Option<String>,

    // the generation of the spec the state refers to
    pub observed_generation: Option<i64>,

    // when all pods last ran every application, seconds since the epoch
    pub last_converged: Option<u64>,
}

impl XynaFactoryServiceStatus {

    pub fn with_state(state: FactoryState, message: Option<String>, generation: Option<i64>) -> Self {
	Self{
	    state: Some(state.to_string()),
	    message,
	    observed_generation: generation,
	    last_converged: None,
	}
    }

    pub fn converged_at(mut self, epoch_secs: u64) -> Self {
	self.last_converged = Some(epoch_secs);
	self
    }
}
