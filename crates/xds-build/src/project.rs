use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Project {
    pub id: String,
    pub label: String,
    pub path: PathBuf,
}

/// One state of the configuration source. `projects: None` means the source has
/// no project list at all, which clears the active project.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigSnapshot {
    pub projects: Option<Vec<Project>>,
}

impl ConfigSnapshot {
    pub fn with_projects(projects: Vec<Project>) -> Self {
        Self {
            projects: Some(projects),
        }
    }

    /// The first listed project is the active one.
    pub fn active_project(&self) -> Option<&Project> {
        self.projects.as_ref().and_then(|projects| projects.first())
    }

    pub fn is_valid(&self) -> bool {
        self.active_project()
            .map(|project| !project.id.trim().is_empty())
            .unwrap_or(false)
    }
}
