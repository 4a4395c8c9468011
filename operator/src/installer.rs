use crate::cluster::ClusterApi;
use crate::cluster::PodRef;
use crate::commands::FactoryCommands;
use crate::errors::Error;
use crate::manifest;
use xyna_api as api;

use log;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Convergence {
    /* every pod runs every application */
    Converged,

    /* no pods are visible yet, try again later */
    Requeue,
}

/*
 * Single-quoted tokens of one listing line, e.g.
 *
 *   'Base' '1.0.4' RUNNING
 *
 * yields `Base` and `1.0.4`. A trailing unclosed quote yields nothing.
 */
fn quoted_tokens(line: &str) -> Vec<&str> {
    let parts: Vec<&str> = line.split('\'').collect();
    let closed = parts.len().saturating_sub(1);
    parts.into_iter()
	.enumerate()
	.filter(|(idx, _)| idx % 2 == 1 && *idx < closed)
	.map(|(_, token)| token)
	.collect()
}

/*
 * Version of `name` as listed by `listapplications`: the second quoted token
 * of the line whose first quoted token is exactly the application name.
 */
pub fn installed_version(listing: &str, name: &str) -> Option<String> {
    let version = listing.lines()
	.map(quoted_tokens)
	.find(|tokens| tokens.first() == Some(&name))
	.and_then(|tokens| tokens.get(1).copied())
	.filter(|version| !version.is_empty())
	.map(String::from);

    version
}

struct Installer<'a> {
    cluster: &'a dyn ClusterApi,
    commands: &'a FactoryCommands,
    namespace: &'a str,
}

impl Installer<'_> {

    async fn run(&self, pod: &PodRef, argv: &[String]) -> Result<String, Error> {
	let output = self.cluster.exec(self.namespace, pod, argv).await?;
	log::debug!("output of {:?} in pod {}: {}", argv, pod.name, output.trim());
	Ok(output)
    }

    async fn probe(&self, pod: &PodRef, app: &api::AppSpec) -> Result<Option<String>, Error> {
	log::info!("Getting app-info for {} in pod {}", app.name, pod.name);
	let listing = self.run(pod, &self.commands.list_applications()).await?;

	Ok(installed_version(&listing, &app.name))
    }

    async fn install(&self, pod: &PodRef, app: &api::AppSpec) -> Result<String, Error> {
	log::info!("Downloading {} (application '{}') inside pod {}", app.app_url, app.name, pod.name);
	self.run(pod, &self.commands.download(app)).await?;

	log::info!("Importing {} in pod {}", self.commands.archive_path(app), pod.name);
	self.run(pod, &self.commands.import_application(app)).await?;

	match self.probe(pod, app).await? {
	    Some(version) => Ok(version),
	    None => {
		let errmsg = format!("application '{}' is not listed in pod {} after importing {}",
				     app.name, pod.name, app.app_url);
		Err(Error::Install(errmsg))
	    }
	}
    }

    async fn converge(&self, pod: &PodRef, app: &api::AppSpec) -> Result<(), Error> {
	let version = match self.probe(pod, app).await? {
	    Some(version) => {
		log::debug!("Application {} {} already present in pod {}", app.name, version, pod.name);
		version
	    },
	    None => self.install(pod, app).await?,
	};

	log::info!("Starting application {} {} in pod {}", app.name, version, pod.name);
	self.run(pod, &self.commands.start_application(&app.name, &version)).await?;
	Ok(())
    }
}

/*
 * Installs and starts `apps` in every pod of the resource. Pods are handled one
 * after the other, applications in install order. Already installed
 * applications are only started again, never downloaded twice.
 */
pub async fn converge_applications(
    cluster: &dyn ClusterApi,
    commands: &FactoryCommands,
    apps: &[api::AppSpec],
    namespace: &str,
    resource_name: &str,
) -> Result<Convergence, Error> {
    let selector = manifest::label_selector(resource_name);
    let pods = cluster.list_pods(namespace, &selector).await?;
    if pods.is_empty() {
	log::info!("No pods found for {}/{} yet, will requeue", namespace, resource_name);
	return Ok(Convergence::Requeue);
    }

    let installer = Installer{
	cluster,
	commands,
	namespace,
    };
    let ordered = api::install_order(apps);

    for pod in &pods {
	for app in &ordered {
	    installer.converge(pod, app).await?;
	}
    }

    Ok(Convergence::Converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterApi;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    const SCRIPT: &str = "/opt/xyna/xynafactory.sh";

    fn commands() -> FactoryCommands {
	FactoryCommands::new(SCRIPT, "/tmp")
    }

    fn app(name: &str, order: Option<i64>) -> api::AppSpec {
	api::AppSpec{
	    name: name.to_string(),
	    app_url: format!("https://repo.example/apps/{}.zip", name),
	    order,
	}
    }

    fn pod(name: &str) -> PodRef {
	PodRef{ name: name.to_string(), container: String::from("xynafactory") }
    }

    /*
     * A factory per pod, remembering imported applications. Every exec is
     * logged as "<pod>: <argv>".
     */
    #[derive(Clone, Default)]
    struct Factories {
	installed: Arc<Mutex<BTreeMap<String, Vec<String>>>>,
	log: Arc<Mutex<Vec<String>>>,
    }

    impl Factories {

	fn preinstall(&self, pod: &str, app: &str) {
	    self.installed.lock().unwrap().entry(pod.to_string()).or_default().push(app.to_string());
	}

	fn exec(&self, pod: &PodRef, argv: &[String]) -> Result<String, Error> {
	    self.log.lock().unwrap().push(format!("{}: {}", pod.name, argv.join(" ")));
	    let mut installed = self.installed.lock().unwrap();
	    let apps = installed.entry(pod.name.clone()).or_default();

	    match argv.get(1).map(String::as_str) {
		Some("listapplications") => Ok(apps.iter()
		    .map(|name| format!("'{}' '1.0' RUNNING\n", name))
		    .collect()),
		Some("importapplication") => {
		    let file = argv[3].trim_start_matches("/tmp/").trim_end_matches(".zip");
		    apps.push(file.to_string());
		    Ok(String::from("Import successful"))
		},
		_ => Ok(String::new()),
	    }
	}

	fn calls(&self) -> Vec<String> {
	    self.log.lock().unwrap().clone()
	}

	fn mock(&self, pods: Vec<PodRef>) -> MockClusterApi {
	    let mut cluster = MockClusterApi::new();
	    cluster.expect_list_pods()
		.withf(|namespace, selector| namespace == "ns" && selector == "app=x")
		.returning(move |_, _| Ok(pods.clone()));
	    let factories = self.clone();
	    cluster.expect_exec()
		.returning(move |_, pod, argv| factories.exec(pod, argv));
	    cluster
	}
    }

    #[test]
    fn version_is_second_quoted_token() {
	let listing = "'Base' '1.0.4' RUNNING\n'Billing' '2.1' AUDIT_MODE\n";
	assert_eq!(installed_version(listing, "Billing"), Some(String::from("2.1")));
	assert_eq!(installed_version(listing, "Base"), Some(String::from("1.0.4")));
	assert_eq!(installed_version(listing, "Missing"), None);
	assert_eq!(installed_version("", "Base"), None);
    }

    #[test]
    fn names_containing_the_application_are_not_matches() {
	let listing = "'BaseExtensions' '2.0' RUNNING\n";
	assert_eq!(installed_version(listing, "Base"), None);

	let both = "'BaseExtensions' '2.0' RUNNING\n'Base' '1.0.4' RUNNING\n";
	assert_eq!(installed_version(both, "Base"), Some(String::from("1.0.4")));
	assert_eq!(installed_version(both, "Extensions"), None);
    }

    #[tokio::test]
    async fn similar_named_application_does_not_prevent_install() {
	let factories = Factories::default();
	factories.preinstall("x-1", "BaseExtensions");
	let cluster = factories.mock(vec![pod("x-1")]);

	converge_applications(&cluster, &commands(), &[app("Base", None)], "ns", "x").await.unwrap();

	let calls = factories.calls();
	assert!(calls.iter().any(|call| call.contains("curl -f -o /tmp/Base.zip")));
	assert!(calls.iter().any(|call| call.ends_with("-applicationName \"Base\" -versionName \"1.0\"")));
    }

    #[test]
    fn unbalanced_quotes_do_not_pair_across_lines() {
	assert_eq!(installed_version("'Base' '1.0\nBase' x", "Base"), None);
	assert_eq!(installed_version("Base: 'Base'", "Base"), None);
	assert_eq!(installed_version("'Base' ''", "Base"), None);
    }

    #[tokio::test]
    async fn installs_in_order_and_starts_after_import() {
	let factories = Factories::default();
	let cluster = factories.mock(vec![pod("x-1")]);
	let apps = vec![app("b", None), app("a", Some(1))];

	let result = converge_applications(&cluster, &commands(), &apps, "ns", "x").await.unwrap();
	assert_eq!(result, Convergence::Converged);

	let expected = vec![
	    format!("x-1: {} listapplications", SCRIPT),
	    String::from("x-1: curl -f -o /tmp/a.zip https://repo.example/apps/a.zip"),
	    format!("x-1: {} importapplication -filename /tmp/a.zip", SCRIPT),
	    format!("x-1: {} listapplications", SCRIPT),
	    format!("x-1: {} startapplication -applicationName \"a\" -versionName \"1.0\"", SCRIPT),
	    format!("x-1: {} listapplications", SCRIPT),
	    String::from("x-1: curl -f -o /tmp/b.zip https://repo.example/apps/b.zip"),
	    format!("x-1: {} importapplication -filename /tmp/b.zip", SCRIPT),
	    format!("x-1: {} listapplications", SCRIPT),
	    format!("x-1: {} startapplication -applicationName \"b\" -versionName \"1.0\"", SCRIPT),
	];
	assert_eq!(factories.calls(), expected);
    }

    #[tokio::test]
    async fn second_run_does_not_download_again() {
	let factories = Factories::default();
	let cluster = factories.mock(vec![pod("x-1"), pod("x-2")]);
	let apps = vec![app("a", Some(1)), app("b", Some(2))];

	converge_applications(&cluster, &commands(), &apps, "ns", "x").await.unwrap();
	let first = factories.calls().len();
	converge_applications(&cluster, &commands(), &apps, "ns", "x").await.unwrap();

	let second: Vec<String> = factories.calls().split_off(first);
	assert_eq!(second.len(), 8);
	assert!(second.iter().all(|call| !call.contains("curl") && !call.contains("importapplication")));
	assert_eq!(second.iter().filter(|call| call.contains("startapplication")).count(), 4);
    }

    #[tokio::test]
    async fn pods_are_converged_one_after_the_other() {
	let factories = Factories::default();
	factories.preinstall("x-1", "a");
	let cluster = factories.mock(vec![pod("x-1"), pod("x-2")]);

	converge_applications(&cluster, &commands(), &[app("a", None)], "ns", "x").await.unwrap();

	let calls = factories.calls();
	let pods: Vec<&str> = calls.iter().map(|call| &call[..3]).collect();
	assert_eq!(pods, vec!["x-1", "x-1", "x-2", "x-2", "x-2", "x-2", "x-2"]);
	assert_eq!(calls.iter().filter(|call| call.contains("curl")).count(), 1);
    }

    #[tokio::test]
    async fn no_pods_requeues() {
	let mut cluster = MockClusterApi::new();
	cluster.expect_list_pods().returning(|_, _| Ok(vec![]));
	cluster.expect_exec().never();

	let result = converge_applications(&cluster, &commands(), &[app("a", None)], "ns", "x").await.unwrap();
	assert_eq!(result, Convergence::Requeue);
    }

    #[tokio::test]
    async fn download_fault_propagates_without_import() {
	let mut cluster = MockClusterApi::new();
	cluster.expect_list_pods().returning(|_, _| Ok(vec![pod("x-1")]));
	cluster.expect_exec()
	    .withf(|_, _, argv| argv[0] == "curl")
	    .returning(|_, pod, argv| Err(Error::exec(&pod.name, argv, "exit code 22")));
	cluster.expect_exec()
	    .withf(|_, _, argv| argv.get(1).is_some_and(|cmd| cmd == "listapplications"))
	    .returning(|_, _, _| Ok(String::new()));
	cluster.expect_exec()
	    .withf(|_, _, argv| argv.get(1).is_some_and(|cmd| cmd == "importapplication"))
	    .never();

	let result = converge_applications(&cluster, &commands(), &[app("a", None)], "ns", "x").await;
	assert!(matches!(result, Err(Error::Exec{ .. })));
    }

    #[tokio::test]
    async fn missing_after_import_is_an_install_error() {
	let mut cluster = MockClusterApi::new();
	cluster.expect_list_pods().returning(|_, _| Ok(vec![pod("x-1")]));
	cluster.expect_exec()
	    .withf(|_, _, argv| argv.get(1).is_some_and(|cmd| cmd == "startapplication"))
	    .never();
	cluster.expect_exec()
	    .withf(|_, _, argv| !argv.iter().any(|arg| arg == "startapplication"))
	    .returning(|_, _, _| Ok(String::new()));

	let result = converge_applications(&cluster, &commands(), &[app("a", None)], "ns", "x").await;
	assert!(matches!(result, Err(Error::Install(_))));
    }
}
