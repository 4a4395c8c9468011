use crate::cluster::ClusterApi;
use crate::cluster::CreateOutcome;
use crate::cluster::DeleteOutcome;
use crate::cluster::KubeCluster;
use crate::commands::FactoryCommands;
use crate::config::Settings;
use crate::errors::Error;
use crate::installer;
use crate::installer::Convergence;
use crate::manifest;
use crate::prober;
use xyna_api as api;

use futures::StreamExt;
use kube::Api as KubeApi;
use kube::Client as KubeClient;
use kube::Resource;
use kube::runtime::WatchStreamExt;
use kube::runtime::controller::Action as KubeAction;
use kube::runtime::controller::Controller as KubeController;
use kube::runtime::finalizer as kube_finalizer;
use kube::runtime::finalizer::Event as FinalizerEvent;
use kube::runtime::reflector as kube_reflector;
use kube::runtime::watcher as kube_watcher;
use kube::runtime::watcher::Config as KubeWatcherConfig;
use log;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use std::time::SystemTime;

pub const FINALIZER: &str = "xyna.com/cleanup";

/*
 * Everything a reconciliation needs, created once at startup and handed to
 * every invocation.
 */
pub struct Context {
    pub cluster: Arc<dyn ClusterApi>,
    pub settings: Settings,
    pub commands: FactoryCommands,
}

impl Context {

    pub fn new(cluster: Arc<dyn ClusterApi>, settings: Settings) -> Self {
	let commands = FactoryCommands::from_settings(&settings);
	Self{
	    cluster,
	    settings,
	    commands,
	}
    }
}

fn names(factory: &api::XynaFactoryService) -> Result<(String, String), Error> {
    let name = factory.metadata.name.clone()
	.ok_or_else(|| Error::Other(String::from("XynaFactoryService without a name")))?;
    let namespace = factory.metadata.namespace.clone()
	.ok_or_else(|| Error::Other(format!("XynaFactoryService {} without a namespace", name)))?;

    Ok((name, namespace))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
	.duration_since(SystemTime::UNIX_EPOCH)
	.map(|elapsed| elapsed.as_secs())
	.unwrap_or_default()
}

/*
 * Status updates never fail a reconciliation, they are only logged.
 */
async fn patch_status(factory: &api::XynaFactoryService, ctx: &Context, status: api::XynaFactoryServiceStatus) {
    let (name, namespace) = match names(factory) {
	Ok(names) => names,
	Err(_) => return,
    };

    if let Err(err) = ctx.cluster.patch_status(&namespace, &name, &status).await {
	log::warn!("Unable to update status of {}/{} to {:?}: {}", namespace, name, status.state, err);
    }
}

async fn set_state(factory: &api::XynaFactoryService, ctx: &Context, state: api::FactoryState, message: Option<String>) {
    let status = api::XynaFactoryServiceStatus::with_state(state, message, factory.metadata.generation);
    patch_status(factory, ctx, status).await;
}

async fn set_converged(factory: &api::XynaFactoryService, ctx: &Context) {
    let status = api::XynaFactoryServiceStatus::with_state(api::FactoryState::Ready, None, factory.metadata.generation)
	.converged_at(epoch_secs());
    patch_status(factory, ctx, status).await;
}

/*
 * Time left until the next resync when the resource is ready for its current
 * generation and converged less than `resync` ago, None when work is due.
 * Watch events caused by our own status writes end up here.
 */
pub fn settled_for(factory: &api::XynaFactoryService, now: u64, resync: Duration) -> Option<Duration> {
    let status = factory.status.as_ref()?;
    if status.state.as_deref() != Some(api::FactoryState::Ready.as_str()) {
	return None;
    }
    if status.observed_generation.is_none() || status.observed_generation != factory.metadata.generation {
	return None;
    }

    let age = now.saturating_sub(status.last_converged?);
    match resync.as_secs().checked_sub(age) {
	Some(left) if left > 0 => Some(Duration::from_secs(left)),
	_ => None,
    }
}

/*
 * Waits for the pods of the resource and brings the applications into them.
 */
async fn converge(factory: &api::XynaFactoryService, ctx: &Context) -> Result<KubeAction, Error> {
    let (name, namespace) = names(factory)?;
    let settings = &ctx.settings;

    if factory.spec.replicas == 0 {
	log::info!("{}/{} is scaled to zero, no pods to converge", namespace, name);
	set_converged(factory, ctx).await;
	return Ok(KubeAction::requeue(settings.resync_interval));
    }

    set_state(factory, ctx, api::FactoryState::WaitingReady, None).await;
    let selector = manifest::label_selector(&name);
    let ready = prober::wait_for_ready(
	ctx.cluster.as_ref(), &ctx.commands, &namespace, &selector,
	settings.ready_timeout, settings.ready_interval,
    ).await;
    if !ready {
	log::error!("Failed to finish deployment {}/{}, pods didn't get ready", namespace, name);
	return Err(Error::NotReady{
	    namespace,
	    name,
	    timeout: settings.ready_timeout,
	});
    }

    set_state(factory, ctx, api::FactoryState::Converging, None).await;
    let apps = &factory.spec.applications;
    match installer::converge_applications(ctx.cluster.as_ref(), &ctx.commands, apps, &namespace, &name).await? {
	Convergence::Converged => {
	    log::info!("{}/{} runs {} application(s)", namespace, name, apps.len());
	    set_converged(factory, ctx).await;
	    Ok(KubeAction::requeue(settings.resync_interval))
	},
	Convergence::Requeue => {
	    let message = format!("no pods of {}/{} are visible yet", namespace, name);
	    set_state(factory, ctx, api::FactoryState::WaitingReady, Some(message)).await;
	    Ok(KubeAction::requeue(settings.requeue_interval))
	},
    }
}

pub async fn on_create(factory: &api::XynaFactoryService, ctx: &Context) -> Result<KubeAction, Error> {
    let (name, namespace) = names(factory)?;
    let spec = &factory.spec;
    log::debug!("creating deployment '{}' in namespace {}", name, namespace);

    set_state(factory, ctx, api::FactoryState::Creating, None).await;
    for port in &spec.service_ports {
	let service = manifest::build_service(port, &name, &namespace);
	match ctx.cluster.create_service(&namespace, &service).await? {
	    CreateOutcome::Created => log::info!("Created service {} in namespace {}", port.service_name(), namespace),
	    CreateOutcome::AlreadyExists => log::info!("Service {} already exists in namespace {}", port.service_name(), namespace),
	}
    }

    set_state(factory, ctx, api::FactoryState::Provisioning, None).await;
    let mut deployment = manifest::build_deployment(
	&name,
	&namespace,
	spec.replicas,
	&spec.image,
	spec.node_labels.as_deref(),
	spec.probe_port(),
    );
    let owner = factory.controller_owner_ref(&())
	.ok_or_else(|| Error::Other(format!("XynaFactoryService {}/{} has no uid to own its deployment", namespace, name)))?;
    deployment.metadata.owner_references = Some(vec![owner]);

    let deployment_name = manifest::deployment_name(&name);
    match ctx.cluster.create_deployment(&namespace, &deployment).await? {
	CreateOutcome::Created => log::info!("Created Deployment {}", deployment_name),
	CreateOutcome::AlreadyExists => {
	    let patch = serde_json::to_value(&deployment)?;
	    ctx.cluster.patch_deployment(&namespace, &deployment_name, &patch).await?;
	    log::info!("Patched existing Deployment {}", deployment_name);
	}
    }

    converge(factory, ctx).await
}

pub async fn on_update(factory: &api::XynaFactoryService, ctx: &Context) -> Result<KubeAction, Error> {
    let (name, namespace) = names(factory)?;
    let deployment_name = manifest::deployment_name(&name);
    let replicas = factory.spec.replicas;

    let patch = manifest::replicas_patch(replicas);
    if let Err(err) = ctx.cluster.patch_deployment(&namespace, &deployment_name, &patch).await {
	log::error!("Failed to patch deployment replicas of {}: {}", deployment_name, err);
	return Err(err);
    }
    log::info!("Scaled deployment {} to {} replicas", deployment_name, replicas);

    converge(factory, ctx).await
}

/*
 * Removes the deployment and the services of the resource. Failures are
 * logged, every object is tried regardless.
 */
pub async fn on_delete(factory: &api::XynaFactoryService, ctx: &Context) -> KubeAction {
    let (name, namespace) = match names(factory) {
	Ok(names) => names,
	Err(err) => {
	    log::error!("Unable to clean up: {}", err);
	    return KubeAction::await_change();
	}
    };

    let deployment_name = manifest::deployment_name(&name);
    match ctx.cluster.delete_deployment(&namespace, &deployment_name).await {
	Ok(DeleteOutcome::Deleted) => log::info!("Deleted deployment {} in {}", deployment_name, namespace),
	Ok(DeleteOutcome::NotFound) => log::info!("Deployment {} in {} is already gone", deployment_name, namespace),
	Err(err) => log::error!("Failed to delete deployment {}: {}", deployment_name, err),
    }

    for port in &factory.spec.service_ports {
	let service_name = port.service_name();
	match ctx.cluster.delete_service(&namespace, &service_name).await {
	    Ok(DeleteOutcome::Deleted) => log::info!("Deleted service {} in {}", service_name, namespace),
	    Ok(DeleteOutcome::NotFound) => log::info!("Service {} in {} is already gone", service_name, namespace),
	    Err(err) => log::error!("Failed to delete service {}: {}", service_name, err),
	}
    }

    KubeAction::await_change()
}

/*
 * Create when the deployment does not exist yet, update otherwise. An
 * existing resource that is already converged is left alone until its resync.
 */
pub async fn apply(factory: &api::XynaFactoryService, ctx: &Context) -> Result<KubeAction, Error> {
    let (name, namespace) = names(factory)?;

    let exists = ctx.cluster.deployment_exists(&namespace, &manifest::deployment_name(&name)).await?;
    if exists {
	if let Some(left) = settled_for(factory, epoch_secs(), ctx.settings.resync_interval) {
	    log::debug!("{}/{} is converged, next resync in {:?}", namespace, name, left);
	    return Ok(KubeAction::requeue(left));
	}
    }

    let result = if exists {
	on_update(factory, ctx).await
    } else {
	on_create(factory, ctx).await
    };

    if let Err(err) = &result {
	set_state(factory, ctx, api::FactoryState::Failed, Some(err.to_string())).await;
    }
    result
}

/*
 * FactoryManager implementation
 */
#[derive(Clone)]
pub struct FactoryManager {
    kube_client: KubeClient,
    factory_api: KubeApi<api::XynaFactoryService>,
    context: Arc<Context>,
}

struct FactoryManagerCtx {
    manager: FactoryManager,
}

async fn reconcile(factory: Arc<api::XynaFactoryService>, ctx: Arc<FactoryManagerCtx>) -> Result<KubeAction, Error> {
    let (_, namespace) = names(&factory)?;
    let factories: KubeApi<api::XynaFactoryService> = KubeApi::namespaced(ctx.manager.kube_client.clone(), &namespace);
    let context = ctx.manager.context.clone();

    kube_finalizer::finalizer(&factories, FINALIZER, factory, move |event| async move {
	match event {
	    FinalizerEvent::Apply(factory) => apply(&factory, &context).await,
	    FinalizerEvent::Cleanup(factory) => Ok(on_delete(&factory, &context).await),
	}
    })
    .await
    .map_err(|err| Error::Finalizer(Box::new(err)))
}

fn error_policy(factory: Arc<api::XynaFactoryService>, error: &Error, ctx: Arc<FactoryManagerCtx>) -> KubeAction {
    log::error!("Reconciling {:?} failed: {}", factory.metadata.name, error);
    KubeAction::requeue(ctx.manager.context.settings.error_backoff)
}

impl FactoryManager {

    pub fn watcher(&self) -> impl Future<Output = ()> {
	let (_reader, writer) = kube_reflector::store();

	let watcher = kube_watcher(self.factory_api.clone(), KubeWatcherConfig::default());
	kube_reflector::reflector(writer, watcher)
	    .default_backoff()
	    .applied_objects()
	    .for_each(|obj| {
		match obj {
		    Ok(factory) => log::debug!("Received an update for {:?}", factory.metadata.name),
		    Err(err) => log::warn!("Watching XynaFactoryServices failed: {}", err),
		}

		futures::future::ready(())
	    })
    }

    pub fn controller(&self) -> impl Future<Output = ()> {
	let ctx = Arc::new(FactoryManagerCtx{
	    manager: self.clone()
	});

	KubeController::new(self.factory_api.clone(), KubeWatcherConfig::default())
	    .run(reconcile, error_policy, ctx)
	    .for_each(|reconcile| async move {
		match reconcile {
		    Ok((obj, _)) => log::debug!("Reconciled {}/{:?}", obj.name, obj.namespace),
		    Err(err) => log::error!("Failed to reconcile with error {:?}", err),
		}
	    })
    }

    pub fn new(kube_client: KubeClient, settings: Settings) -> Self {
	let cluster = Arc::new(KubeCluster::new(kube_client.clone()));
	Self{
	    kube_client: kube_client.clone(),
	    factory_api: KubeApi::all(kube_client),
	    context: Arc::new(Context::new(cluster, settings)),
	}
    }
}
