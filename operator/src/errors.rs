use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {

    /* encapsulate a kube-rust error */
    #[error("kube error: {0}")]
    Kube(#[from] kube::Error),

    /* a command inside a pod could not run or did not succeed */
    #[error("exec of `{command}` in pod {pod} failed: {reason}")]
    Exec {
	pod: String,
	command: String,
	reason: String,
    },

    #[error("pods of {namespace}/{name} did not get ready within {}s", .timeout.as_secs())]
    NotReady {
	namespace: String,
	name: String,
	timeout: Duration,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Install Error: {0}")]
    Install(String),

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("`{0}`")]
    Other(String),
}

impl Error {

    pub fn exec(pod: &str, argv: &[String], reason: impl Into<String>) -> Self {
	Error::Exec{
	    pod: pod.to_string(),
	    command: argv.join(" "),
	    reason: reason.into(),
	}
    }
}
