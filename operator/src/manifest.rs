use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::core::v1::Affinity;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::NodeAffinity;
use k8s_openapi::api::core::v1::NodeSelector;
use k8s_openapi::api::core::v1::NodeSelectorRequirement;
use k8s_openapi::api::core::v1::NodeSelectorTerm;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::api::core::v1::Probe;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec;
use k8s_openapi::api::core::v1::TCPSocketAction;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use serde_json::json;
use std::collections::BTreeMap;
use xyna_api as api;

/* the one container of every factory pod */
pub const CONTAINER_NAME: &str = "xynafactory";
pub const APP_LABEL: &str = "app";

/* readiness probe timings */
const PROBE_INITIAL_DELAY: i32 = 20;
const PROBE_PERIOD: i32 = 10;
const PROBE_TIMEOUT: i32 = 1;
const PROBE_FAILURE_THRESHOLD: i32 = 10;
const PROBE_SUCCESS_THRESHOLD: i32 = 1;

pub fn deployment_name(resource_name: &str) -> String {
    format!("{}-deployment", resource_name)
}

pub fn app_labels(app_label: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(String::from(APP_LABEL), app_label.to_string())])
}

/* label selector matching the pods of a resource */
pub fn label_selector(app_label: &str) -> String {
    format!("{}={}", APP_LABEL, app_label)
}

pub fn build_service(port: &api::PortSpec, app_label: &str, namespace: &str) -> Service {
    Service{
	metadata: ObjectMeta{
	    name: Some(port.service_name()),
	    namespace: Some(namespace.to_string()),
	    labels: Some(app_labels(app_label)),
	    ..Default::default()
	},
	spec: Some(ServiceSpec{
	    selector: Some(app_labels(app_label)),
	    type_: Some(String::from("ClusterIP")),
	    ports: Some(vec![ServicePort{
		protocol: Some(port.protocol.clone()),
		port: port.port,
		target_port: Some(IntOrString::Int(port.target_port)),
		..Default::default()
	    }]),
	    ..Default::default()
	}),
	..Default::default()
    }
}

pub fn readiness_probe(port: i32) -> Probe {
    Probe{
	tcp_socket: Some(TCPSocketAction{
	    port: IntOrString::Int(port),
	    ..Default::default()
	}),
	initial_delay_seconds: Some(PROBE_INITIAL_DELAY),
	period_seconds: Some(PROBE_PERIOD),
	timeout_seconds: Some(PROBE_TIMEOUT),
	failure_threshold: Some(PROBE_FAILURE_THRESHOLD),
	success_threshold: Some(PROBE_SUCCESS_THRESHOLD),
	..Default::default()
    }
}

/*
 * Required node affinity where every label has to match (one "In" expression
 * per label, all within a single term). No labels means no affinity at all:
 * an empty affinity object keeps pods from ever being scheduled on some clusters.
 */
pub fn node_affinity(labels: &[api::NodeLabel]) -> Option<Affinity> {
    if labels.is_empty() {
	return None;
    }

    let match_expressions = labels.iter()
	.map(|label| NodeSelectorRequirement{
	    key: label.key.clone(),
	    operator: String::from("In"),
	    values: Some(vec![label.value.clone()]),
	})
	.collect();

    Some(Affinity{
	node_affinity: Some(NodeAffinity{
	    required_during_scheduling_ignored_during_execution: Some(NodeSelector{
		node_selector_terms: vec![NodeSelectorTerm{
		    match_expressions: Some(match_expressions),
		    ..Default::default()
		}],
	    }),
	    ..Default::default()
	}),
	..Default::default()
    })
}

pub fn build_deployment(
    name: &str,
    namespace: &str,
    replicas: i32,
    image: &str,
    node_labels: Option<&[api::NodeLabel]>,
    probe_port: Option<i32>,
) -> Deployment {
    let labels = app_labels(name);

    let container = Container{
	name: String::from(CONTAINER_NAME),
	image: Some(image.to_string()),
	readiness_probe: probe_port.map(readiness_probe),
	..Default::default()
    };

    Deployment{
	metadata: ObjectMeta{
	    name: Some(deployment_name(name)),
	    namespace: Some(namespace.to_string()),
	    ..Default::default()
	},
	spec: Some(DeploymentSpec{
	    replicas: Some(replicas),
	    selector: LabelSelector{
		match_labels: Some(labels.clone()),
		..Default::default()
	    },
	    template: PodTemplateSpec{
		metadata: Some(ObjectMeta{
		    labels: Some(labels),
		    ..Default::default()
		}),
		spec: Some(PodSpec{
		    containers: vec![container],
		    affinity: node_affinity(node_labels.unwrap_or_default()),
		    ..Default::default()
		}),
	    },
	    ..Default::default()
	}),
	..Default::default()
    }
}

/* merge patch touching nothing but the replica count */
pub fn replicas_patch(replicas: i32) -> serde_json::Value {
    json!({ "spec": { "replicas": replicas } })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(key: &str, value: &str) -> api::NodeLabel {
	api::NodeLabel{ key: key.to_string(), value: value.to_string() }
    }

    fn pod_spec(deployment: &Deployment) -> &PodSpec {
	deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
    }

    #[test]
    fn deployment_name_depends_on_resource_name_only() {
	assert_eq!(deployment_name("billing"), "billing-deployment");

	let small = build_deployment("billing", "ns", 1, "x:1", None, None);
	let large = build_deployment("billing", "other", 7, "y:2", Some(&[label("a", "b")]), Some(80));
	assert_eq!(small.metadata.name.as_deref(), Some("billing-deployment"));
	assert_eq!(small.metadata.name, large.metadata.name);
    }

    #[test]
    fn service_selects_app_pods() {
	let port = api::PortSpec{ port: 9090, target_port: 4245, ..Default::default() };
	let service = build_service(&port, "billing", "factories");

	assert_eq!(service.metadata.name.as_deref(), Some("service9090"));
	assert_eq!(service.metadata.namespace.as_deref(), Some("factories"));

	let spec = service.spec.unwrap();
	assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
	assert_eq!(spec.selector, Some(app_labels("billing")));

	let ports = spec.ports.unwrap();
	assert_eq!(ports.len(), 1);
	assert_eq!(ports[0].port, 9090);
	assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
	assert_eq!(ports[0].target_port, Some(IntOrString::Int(4245)));
    }

    #[test]
    fn deployment_has_single_named_container() {
	let deployment = build_deployment("x", "ns", 2, "x:1", None, None);
	let spec = deployment.spec.as_ref().unwrap();

	assert_eq!(spec.replicas, Some(2));
	assert_eq!(spec.selector.match_labels, Some(app_labels("x")));
	assert_eq!(spec.template.metadata.as_ref().unwrap().labels, Some(app_labels("x")));

	let containers = &pod_spec(&deployment).containers;
	assert_eq!(containers.len(), 1);
	assert_eq!(containers[0].name, CONTAINER_NAME);
	assert_eq!(containers[0].image.as_deref(), Some("x:1"));
	assert!(containers[0].readiness_probe.is_none());
    }

    #[test]
    fn readiness_probe_uses_fixed_timings() {
	let deployment = build_deployment("x", "ns", 1, "x:1", None, Some(4245));
	let probe = pod_spec(&deployment).containers[0].readiness_probe.clone().unwrap();

	assert_eq!(probe.tcp_socket.unwrap().port, IntOrString::Int(4245));
	assert_eq!(probe.initial_delay_seconds, Some(20));
	assert_eq!(probe.period_seconds, Some(10));
	assert_eq!(probe.timeout_seconds, Some(1));
	assert_eq!(probe.failure_threshold, Some(10));
	assert_eq!(probe.success_threshold, Some(1));
    }

    #[test]
    fn affinity_only_with_labels() {
	let none = build_deployment("x", "ns", 1, "x:1", None, None);
	assert!(pod_spec(&none).affinity.is_none());

	let empty = build_deployment("x", "ns", 1, "x:1", Some(&[]), None);
	assert!(pod_spec(&empty).affinity.is_none());

	let labels = [label("zone", "a"), label("disk", "ssd")];
	let placed = build_deployment("x", "ns", 1, "x:1", Some(&labels), None);
	let terms = pod_spec(&placed).affinity.clone().unwrap()
	    .node_affinity.unwrap()
	    .required_during_scheduling_ignored_during_execution.unwrap()
	    .node_selector_terms;

	assert_eq!(terms.len(), 1);
	let expressions = terms[0].match_expressions.clone().unwrap();
	assert_eq!(expressions.len(), 2);
	assert_eq!(expressions[0].key, "zone");
	assert_eq!(expressions[0].operator, "In");
	assert_eq!(expressions[0].values, Some(vec![String::from("a")]));
	assert_eq!(expressions[1].key, "disk");
	assert_eq!(expressions[1].values, Some(vec![String::from("ssd")]));
    }

    #[test]
    fn replicas_patch_only_touches_replicas() {
	assert_eq!(replicas_patch(5), json!({"spec": {"replicas": 5}}));
	assert_eq!(label_selector("billing"), "app=billing");
    }
}
