//! Manifest loader: mirrors a directory of `*.toml` manifests into the
//! state store.
//!
//! ```toml
//! [[template]]
//! name = "shared/smoke"
//!
//! [[template.schedule]]
//! cron = "*/30 * * * *"
//!
//! [[workflow]]
//! name = "nightly"
//! use = ["shared/smoke"]
//!
//! [[workflow.schedule]]
//! cron = "0 3 * * *"
//! timezone = "Europe/Warsaw"
//! config = { browser = "firefox" }
//! ```
//!
//! Each scan writes only resources whose content changed and deletes the
//! ones that disappeared from disk. A file that fails to parse keeps its
//! previously loaded resources untouched.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use warpcron_core::resource::internal_template_name;
use warpcron_core::{
    Event, ScheduleSpec, Template, TemplateRef, TemplateSpec, Workflow, WorkflowSpec,
};
use warpcron_state::StateStore;

#[derive(Debug, Default, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    workflow: Vec<WorkflowManifest>,
    #[serde(default)]
    template: Vec<TemplateManifest>,
}

#[derive(Debug, Deserialize)]
struct WorkflowManifest {
    name: String,
    #[serde(default, rename = "use")]
    uses: Vec<String>,
    #[serde(default)]
    schedule: Vec<ScheduleSpec>,
}

#[derive(Debug, Deserialize)]
struct TemplateManifest {
    /// Display name; stored under its internal name.
    name: String,
    #[serde(default)]
    schedule: Vec<ScheduleSpec>,
}

impl WorkflowManifest {
    fn into_resource(self) -> Workflow {
        Workflow::new(
            self.name,
            WorkflowSpec {
                uses: self.uses.into_iter().map(TemplateRef::new).collect(),
                events: self.schedule.into_iter().map(Event::cron).collect(),
            },
        )
    }
}

impl TemplateManifest {
    fn into_resource(self) -> Template {
        Template::new(
            internal_template_name(&self.name),
            TemplateSpec {
                events: self.schedule.into_iter().map(Event::cron).collect(),
            },
        )
    }
}

/// Resources last loaded from one file, keyed by stored name.
#[derive(Debug, Default, Clone)]
struct Loaded {
    workflows: HashMap<String, Workflow>,
    templates: HashMap<String, Template>,
}

impl Loaded {
    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let file: ManifestFile = toml::from_str(content)?;
        let mut loaded = Loaded::default();
        for manifest in file.template {
            let template = manifest.into_resource();
            loaded.templates.insert(template.name.clone(), template);
        }
        for manifest in file.workflow {
            let workflow = manifest.into_resource();
            loaded.workflows.insert(workflow.name.clone(), workflow);
        }
        Ok(loaded)
    }
}

/// Counts from one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub upserted: usize,
    pub deleted: usize,
    pub failed_files: usize,
}

pub struct ManifestLoader {
    dir: PathBuf,
    store: StateStore,
    environment_id: String,
    files: HashMap<PathBuf, Loaded>,
}

impl ManifestLoader {
    pub fn new(dir: impl Into<PathBuf>, store: StateStore, environment_id: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            store,
            environment_id: environment_id.into(),
            files: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bring the store in line with the manifest directory.
    pub fn scan(&mut self) -> anyhow::Result<ScanReport> {
        let mut report = ScanReport::default();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut next: HashMap<PathBuf, Loaded> = HashMap::new();
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|content| Loaded::parse(&content).map_err(anyhow::Error::from));
            match parsed {
                Ok(loaded) => {
                    next.insert(path, loaded);
                }
                Err(e) => {
                    error!(path = %path.display(), error = %e, "failed to load manifest");
                    report.failed_files += 1;
                    if let Some(previous) = self.files.get(&path) {
                        next.insert(path, previous.clone());
                    }
                }
            }
        }

        let before = merged(&self.files, false);
        let after = merged(&next, true);
        let env = self.environment_id.as_str();

        // Templates first so workflows resolve against current templates.
        for (name, template) in &after.templates {
            if before.templates.get(name) != Some(template) {
                self.store.put_template(env, template)?;
                report.upserted += 1;
            }
        }
        for (name, workflow) in &after.workflows {
            if before.workflows.get(name) != Some(workflow) {
                self.store.put_workflow(env, workflow)?;
                report.upserted += 1;
            }
        }
        for name in before.workflows.keys() {
            if !after.workflows.contains_key(name) && self.store.delete_workflow(env, name)? {
                report.deleted += 1;
            }
        }
        for name in before.templates.keys() {
            if !after.templates.contains_key(name) && self.store.delete_template(env, name)? {
                report.deleted += 1;
            }
        }

        self.files = next;
        Ok(report)
    }

    /// Scan now and then every `interval` until shutdown.
    ///
    /// Scans do blocking file and database I/O, so they run on the blocking
    /// pool.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(dir = %self.dir.display(), ?interval, "manifest loader started");
        let mut loader = self;
        loop {
            let scanned = tokio::task::spawn_blocking(move || {
                let report = loader.scan();
                (loader, report)
            })
            .await;
            let report = match scanned {
                Ok((returned, report)) => {
                    loader = returned;
                    report
                }
                Err(e) => {
                    error!(error = %e, "manifest scan task failed");
                    break;
                }
            };

            match report {
                Ok(report) if report.upserted > 0 || report.deleted > 0 => {
                    info!(
                        upserted = report.upserted,
                        deleted = report.deleted,
                        failed_files = report.failed_files,
                        "manifests applied"
                    );
                }
                Ok(report) => debug!(failed_files = report.failed_files, "manifests unchanged"),
                Err(e) => warn!(dir = %loader.dir.display(), error = %e, "manifest scan failed"),
            }

            let stop = async {
                let _ = shutdown.wait_for(|stop| *stop).await;
            };
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = stop => break,
            }
        }
        info!("manifest loader stopped");
    }
}

/// Union of every file's resources, visiting files in path order so the
/// first file to define a name wins on every scan.
fn merged(files: &HashMap<PathBuf, Loaded>, report_duplicates: bool) -> Loaded {
    let mut paths: Vec<&PathBuf> = files.keys().collect();
    paths.sort();

    let mut all = Loaded::default();
    for path in paths {
        let loaded = &files[path];
        for (name, workflow) in &loaded.workflows {
            if all.workflows.contains_key(name) {
                if report_duplicates {
                    warn!(path = %path.display(), workflow = %name, "duplicate workflow ignored");
                }
                continue;
            }
            all.workflows.insert(name.clone(), workflow.clone());
        }
        for (name, template) in &loaded.templates {
            if all.templates.contains_key(name) {
                if report_duplicates {
                    warn!(path = %path.display(), template = %name, "duplicate template ignored");
                }
                continue;
            }
            all.templates.insert(name.clone(), template.clone());
        }
    }
    all
}
