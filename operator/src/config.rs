use clap::Parser;
use std::time::Duration;

pub const FACTORY_SCRIPT: &str = "/opt/xyna/xyna_001/server/xynafactory.sh";
pub const DOWNLOAD_DIR: &str = "/tmp";

/*
 * Command line of the operator. Every flag can be given through the
 * environment as well, which is how the operator deployment configures it.
 */
#[derive(Parser, Debug, Clone)]
#[command(name = "xyna-operator", version, about = "Operator for XynaFactoryService resources")]
pub struct Args {

    /// Seconds to wait for all factory pods to report running
    #[arg(long, env = "XYNA_READY_TIMEOUT", default_value_t = 120)]
    pub ready_timeout: u64,

    /// Seconds between two readiness polls
    #[arg(long, env = "XYNA_READY_INTERVAL", default_value_t = 5)]
    pub ready_interval: u64,

    /// Seconds until a converged resource is reconciled again
    #[arg(long, env = "XYNA_RESYNC_INTERVAL", default_value_t = 300)]
    pub resync_interval: u64,

    /// Seconds to back off after a failed reconciliation
    #[arg(long, env = "XYNA_ERROR_BACKOFF", default_value_t = 60)]
    pub error_backoff: u64,

    /// Seconds to wait before looking for pods again when none exist yet
    #[arg(long, env = "XYNA_REQUEUE_INTERVAL", default_value_t = 15)]
    pub requeue_interval: u64,

    /// Path of the factory control script inside the container
    #[arg(long, env = "XYNA_FACTORY_SCRIPT", default_value = FACTORY_SCRIPT)]
    pub factory_script: String,

    /// Directory inside the container where application archives are downloaded to
    #[arg(long, env = "XYNA_DOWNLOAD_DIR", default_value = DOWNLOAD_DIR)]
    pub download_dir: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub ready_timeout: Duration,
    pub ready_interval: Duration,
    pub resync_interval: Duration,
    pub error_backoff: Duration,
    pub requeue_interval: Duration,
    pub factory_script: String,
    pub download_dir: String,
}

impl Default for Settings {
    fn default() -> Self {
	Self{
	    ready_timeout: Duration::from_secs(120),
	    ready_interval: Duration::from_secs(5),
	    resync_interval: Duration::from_secs(300),
	    error_backoff: Duration::from_secs(60),
	    requeue_interval: Duration::from_secs(15),
	    factory_script: String::from(FACTORY_SCRIPT),
	    download_dir: String::from(DOWNLOAD_DIR),
	}
    }
}

impl From<Args> for Settings {
    fn from(args: Args) -> Self {
	Self{
	    ready_timeout: Duration::from_secs(args.ready_timeout),
	    ready_interval: Duration::from_secs(args.ready_interval),
	    resync_interval: Duration::from_secs(args.resync_interval),
	    error_backoff: Duration::from_secs(args.error_backoff),
	    requeue_interval: Duration::from_secs(args.requeue_interval),
	    factory_script: args.factory_script,
	    download_dir: args.download_dir.trim_end_matches('/').to_string(),
	}
    }
}
