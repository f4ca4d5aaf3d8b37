use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::warn;
use xds_build::{ConfigSnapshot, Project};
use xds_exec::SdkId;
use xds_util::{
    env_or, env_u64, state_file_path, write_json_atomic, DEFAULT_EXEC_TIMEOUT_SECS,
    DEFAULT_SHELL,
};

const CLI_CONFIG_FILE: &str = "cli-config.json";
const DEFAULT_SDK_ROOT: &str = "/xdt/sdk";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct AppConfig {
    pub(crate) projects: Vec<Project>,
    pub(crate) sdk_root: String,
    pub(crate) shell: String,
    pub(crate) exec_timeout_secs: u64,
    pub(crate) merge_stderr: bool,
    pub(crate) last_project_id: String,
    pub(crate) last_subpath: String,
    pub(crate) last_args: String,
    pub(crate) last_sdk_id: String,
}

/// Project, sub-path and make arguments of one `make` run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct RunSelection {
    pub(crate) project_id: String,
    pub(crate) subpath: String,
    pub(crate) args: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            sdk_root: env_or("XDS_SDK_ROOT", DEFAULT_SDK_ROOT),
            shell: env_or("XDS_SHELL", DEFAULT_SHELL),
            exec_timeout_secs: env_u64("XDS_EXEC_TIMEOUT").unwrap_or(DEFAULT_EXEC_TIMEOUT_SECS),
            merge_stderr: true,
            last_project_id: String::new(),
            last_subpath: String::new(),
            last_args: String::new(),
            last_sdk_id: String::new(),
        }
    }
}

impl AppConfig {
    pub(crate) fn load() -> Self {
        Self::load_from(&config_path())
    }

    /// Environment variables win over the file; a missing or unreadable file
    /// yields the defaults.
    pub(crate) fn load_from(path: &Path) -> Self {
        let mut cfg = AppConfig::default();
        match fs::read_to_string(path) {
            Ok(data) => match serde_json::from_str::<AppConfig>(&data) {
                Ok(file_cfg) => {
                    if std::env::var("XDS_SDK_ROOT").is_err() && !file_cfg.sdk_root.is_empty() {
                        cfg.sdk_root = file_cfg.sdk_root;
                    }
                    if std::env::var("XDS_SHELL").is_err() && !file_cfg.shell.is_empty() {
                        cfg.shell = file_cfg.shell;
                    }
                    if env_u64("XDS_EXEC_TIMEOUT").is_none() && file_cfg.exec_timeout_secs > 0 {
                        cfg.exec_timeout_secs = file_cfg.exec_timeout_secs;
                    }
                    cfg.projects = file_cfg.projects;
                    cfg.merge_stderr = file_cfg.merge_stderr;
                    cfg.last_project_id = file_cfg.last_project_id;
                    cfg.last_subpath = file_cfg.last_subpath;
                    cfg.last_args = file_cfg.last_args;
                    cfg.last_sdk_id = file_cfg.last_sdk_id;
                }
                Err(err) => warn!("failed to parse {}: {err}", path.display()),
            },
            Err(err) => {
                if err.kind() != io::ErrorKind::NotFound {
                    warn!("failed to read {}: {err}", path.display());
                }
            }
        }
        cfg
    }

    pub(crate) fn save(&self) -> io::Result<()> {
        self.save_to(&config_path())
    }

    pub(crate) fn save_to(&self, path: &Path) -> io::Result<()> {
        write_json_atomic(path, self)
    }

    pub(crate) fn project(&self, id: &str) -> Option<&Project> {
        self.projects.iter().find(|project| project.id == id)
    }

    /// Replaces a project with the same id, otherwise appends.
    pub(crate) fn upsert_project(&mut self, project: Project) {
        match self.projects.iter_mut().find(|p| p.id == project.id) {
            Some(existing) => *existing = project,
            None => self.projects.push(project),
        }
    }

    pub(crate) fn remove_project(&mut self, id: &str) -> bool {
        let before = self.projects.len();
        self.projects.retain(|project| project.id != id);
        self.projects.len() != before
    }

    /// Fills whatever the command line left out from the previous run.
    pub(crate) fn selection(
        &self,
        project: Option<String>,
        subpath: Option<String>,
        args: &[String],
    ) -> RunSelection {
        RunSelection {
            project_id: project.unwrap_or_else(|| self.last_project_id.clone()),
            subpath: subpath.unwrap_or_else(|| self.last_subpath.clone()),
            args: if args.is_empty() {
                self.last_args.clone()
            } else {
                args.join(" ")
            },
        }
    }

    pub(crate) fn remember(&mut self, run: &RunSelection, sdk: Option<SdkId>) {
        self.last_project_id = run.project_id.clone();
        self.last_subpath = run.subpath.clone();
        self.last_args = run.args.clone();
        if let Some(sdk) = sdk {
            self.last_sdk_id = sdk.to_string();
        }
    }

    /// Project list with `active` moved to the front, since the first project of a
    /// snapshot is the active one.
    pub(crate) fn snapshot_with_active(&self, active: &str) -> ConfigSnapshot {
        let mut projects = self.projects.clone();
        if let Some(pos) = projects.iter().position(|project| project.id == active) {
            let project = projects.remove(pos);
            projects.insert(0, project);
        }
        ConfigSnapshot::with_projects(projects)
    }
}

fn config_path() -> PathBuf {
    state_file_path(CLI_CONFIG_FILE)
}
