use crate::cluster::ClusterApi;
use crate::commands::FactoryCommands;

use log;
use std::time::Duration;
use tokio::time::Instant;

/* what the status command prints once the factory is usable */
pub const RUNNING_MARKER: &str = "running";

/*
 * One pass over the pods matched by the selector. A pass only succeeds when
 * there is at least one pod and every pod reports a running factory; the
 * first pod that fails the check ends the pass.
 */
async fn all_pods_running(
    cluster: &dyn ClusterApi,
    commands: &FactoryCommands,
    namespace: &str,
    selector: &str,
) -> bool {
    let pods = match cluster.list_pods(namespace, selector).await {
	Ok(pods) => pods,
	Err(err) => {
	    log::warn!("Unable to list pods {} in {}: {}", selector, namespace, err);
	    return false;
	}
    };

    if pods.is_empty() {
	log::debug!("No pods matching {} in {} yet", selector, namespace);
	return false;
    }

    let status_cmd = commands.status();
    for pod in &pods {
	match cluster.exec(namespace, pod, &status_cmd).await {
	    Ok(output) if output.contains(RUNNING_MARKER) => {
		log::debug!("Factory in pod {} is running", pod.name);
	    },
	    Ok(output) => {
		log::debug!("Factory in pod {} is not running yet: {}", pod.name, output.trim());
		return false;
	    },
	    Err(err) => {
		log::debug!("Unable to get factory status of pod {}: {}", pod.name, err);
		return false;
	    }
	}
    }

    true
}

/*
 * Polls the pods matching `selector` every `interval` until all of them run
 * the factory. Returns false when `timeout` passes first.
 */
pub async fn wait_for_ready(
    cluster: &dyn ClusterApi,
    commands: &FactoryCommands,
    namespace: &str,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
	if all_pods_running(cluster, commands, namespace, selector).await {
	    return true;
	}
	tokio::time::sleep(interval).await;
    }

    log::warn!("Pods {} in {} did not get ready within {:?}", selector, namespace, timeout);
    false
}
