use crate::config::Settings;
use xyna_api as api;

/*
 * Builds the command lines run inside the factory container.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct FactoryCommands {
    script: String,
    download_dir: String,
}

impl FactoryCommands {

    pub fn new(script: &str, download_dir: &str) -> Self {
	Self{
	    script: script.to_string(),
	    download_dir: download_dir.to_string(),
	}
    }

    pub fn from_settings(settings: &Settings) -> Self {
	Self::new(&settings.factory_script, &settings.download_dir)
    }

    /* prints the state of the factory, "running" once it is usable */
    pub fn status(&self) -> Vec<String> {
	vec![
	    String::from("/bin/sh"),
	    String::from("-c"),
	    format!("{} status", self.script),
	]
    }

    pub fn list_applications(&self) -> Vec<String> {
	vec![self.script.clone(), String::from("listapplications")]
    }

    pub fn archive_path(&self, app: &api::AppSpec) -> String {
	format!("{}/{}", self.download_dir, app.archive_name())
    }

    pub fn download(&self, app: &api::AppSpec) -> Vec<String> {
	vec![
	    String::from("curl"),
	    String::from("-f"),
	    String::from("-o"),
	    self.archive_path(app),
	    app.app_url.clone(),
	]
    }

    pub fn import_application(&self, app: &api::AppSpec) -> Vec<String> {
	vec![
	    self.script.clone(),
	    String::from("importapplication"),
	    String::from("-filename"),
	    self.archive_path(app),
	]
    }

    pub fn start_application(&self, name: &str, version: &str) -> Vec<String> {
	vec![
	    self.script.clone(),
	    String::from("startapplication"),
	    String::from("-applicationName"),
	    format!("\"{}\"", name),
	    String::from("-versionName"),
	    format!("\"{}\"", version),
	]
    }
}
