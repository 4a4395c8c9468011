mod cluster;
mod commands;
mod config;
mod errors;
mod installer;
mod manifest;
mod prober;
mod reconciler;
use config::Args;
use config::Settings;
use reconciler::FactoryManager;

use clap::Parser;
use kube::Client as KubeClient;
use log;

#[tokio::main]
async fn main() -> Result<(), errors::Error> {
    env_logger::init();

    let settings = Settings::from(Args::parse());
    let kube_client = KubeClient::try_default().await?;

    log::info!("starting xyna-operator with {:?}", settings);
    let mgr = FactoryManager::new(kube_client, settings);
    tokio::select! {
	_ = mgr.watcher() => {},
	_ = mgr.controller() => {},

	// handle CTRL^C as gracefully as we can.
	_ = tokio::signal::ctrl_c() => {},
    }
    log::info!("xyna-operator stopped");

    Ok(())
}
