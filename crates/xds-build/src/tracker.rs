use std::collections::HashMap;
use std::sync::Arc;

use chrono::Local;
use tracing::{debug, info, warn};
use xds_exec::{BuildApi, BuildApiError, BuildRequest, CommandId, ExecExit, ExecOutput, SdkId};

use crate::alerts::{Alert, AlertSink};
use crate::clock::Clock;
use crate::elapsed::duration_status;
use crate::output::{exit_footer, output_header, OutputBuffer};
use crate::project::{ConfigSnapshot, Project};
use crate::sdk::SdkSelector;
use crate::view::{ViewEvent, ViewEventSender};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    #[error("No active project")]
    NoActiveProject,
    #[error("build request rejected: {0}")]
    RequestRejected(String),
}

/// A request that passed local checks and is waiting for the build API.
#[derive(Debug, Clone)]
pub struct PendingBuild {
    pub request: BuildRequest,
    started_at_ms: f64,
}

impl PendingBuild {
    pub fn started_at_ms(&self) -> f64 {
        self.started_at_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExitOutcome {
    /// The id was tracked; its duration is now in the status line.
    Completed { elapsed_ms: f64 },
    /// Never recorded here, so no duration is reported.
    Untracked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub cmd_id: CommandId,
    pub elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub status: String,
    pub output_len: usize,
    pub in_flight: Vec<CommandId>,
    pub active_project: Option<Project>,
    pub config_valid: bool,
    pub last_exit: Option<(CommandId, i32)>,
}

/// Issues builds for the active project and reconciles their asynchronous
/// completion.
///
/// Each accepted request is timed from the moment it was submitted; the start time
/// lives under its command id until the first exit carrying that id arrives. All
/// output goes to one shared [`OutputBuffer`] regardless of which command wrote it.
pub struct Tracker {
    clock: Box<dyn Clock>,
    alerts: Arc<dyn AlertSink>,
    sdk: Arc<dyn SdkSelector>,
    view: Option<ViewEventSender>,
    active_project: Option<Project>,
    config_valid: bool,
    started: HashMap<CommandId, f64>,
    output: OutputBuffer,
    status: String,
    last_exit: Option<(CommandId, i32)>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("active_project", &self.active_project)
            .field("started", &self.started)
            .field("status", &self.status)
            .field("output_len", &self.output.len())
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub fn new(
        clock: impl Clock + 'static,
        alerts: Arc<dyn AlertSink>,
        sdk: Arc<dyn SdkSelector>,
    ) -> Self {
        Self {
            clock: Box::new(clock),
            alerts,
            sdk,
            view: None,
            active_project: None,
            config_valid: false,
            started: HashMap::new(),
            output: OutputBuffer::new(),
            status: String::new(),
            last_exit: None,
        }
    }

    pub fn with_view(mut self, view: ViewEventSender) -> Self {
        self.view = Some(view);
        self
    }

    pub fn apply_config(&mut self, snapshot: &ConfigSnapshot) {
        self.active_project = snapshot.active_project().cloned();
        self.config_valid = snapshot.is_valid();
        debug!(
            active = self.active_project.as_ref().map(|p| p.id.as_str()),
            valid = self.config_valid,
            "config applied"
        );
    }

    /// Submits a build and waits for the API to accept or reject it. The exit is
    /// reported later through [`Tracker::on_exit`].
    pub async fn submit_build<A>(
        &mut self,
        api: &A,
        subpath: &str,
        args: &str,
        sdk: Option<SdkId>,
    ) -> Result<CommandId, TrackerError>
    where
        A: BuildApi + ?Sized,
    {
        let pending = self.begin_submit(subpath, args, sdk)?;
        let result = api.request_build(pending.request.clone()).await;
        self.complete_submit(pending, result)
    }

    /// Local half of a submission: checks the active project, writes the header,
    /// starts the clock and builds the request. `sdk` falls back to the selector.
    pub fn begin_submit(
        &mut self,
        subpath: &str,
        args: &str,
        sdk: Option<SdkId>,
    ) -> Result<PendingBuild, TrackerError> {
        let Some(project) = self.active_project.as_ref() else {
            self.alerts
                .alert(Alert::warning(TrackerError::NoActiveProject.to_string(), true));
            return Err(TrackerError::NoActiveProject);
        };
        let project_id = project.id.clone();

        self.append_output(&output_header(&Local::now()));

        let sdk_id = sdk.or_else(|| self.sdk.current_id());
        let started_at_ms = self.clock.now_ms();
        self.set_status(format!("Start build of {project_id} at {started_at_ms}"));

        let request = BuildRequest {
            project_id,
            subpath: subpath.trim().to_string(),
            args: args.split_whitespace().map(str::to_string).collect(),
            sdk_id,
        };
        info!(project = %request.project_id, subpath = %request.subpath, "submitting build");
        Ok(PendingBuild {
            request,
            started_at_ms,
        })
    }

    /// Reconciles the build API's answer for a request started by
    /// [`Tracker::begin_submit`].
    pub fn complete_submit(
        &mut self,
        pending: PendingBuild,
        result: Result<CommandId, BuildApiError>,
    ) -> Result<CommandId, TrackerError> {
        match result {
            Ok(cmd_id) => {
                if self.started.contains_key(&cmd_id) {
                    warn!(%cmd_id, "command id issued twice, keeping first start time");
                } else {
                    self.started.insert(cmd_id, pending.started_at_ms);
                }
                debug!(%cmd_id, "build accepted");
                Ok(cmd_id)
            }
            Err(err) => {
                let elapsed = self.clock.now_ms() - pending.started_at_ms;
                self.set_status(duration_status(elapsed));
                self.alerts.alert(Alert::error(format!("ERROR: {err}")));
                warn!("build request failed: {err}");
                Err(TrackerError::RequestRejected(err.to_string()))
            }
        }
    }

    pub fn on_output_chunk(&mut self, chunk: &ExecOutput) {
        let mut text = String::with_capacity(chunk.stdout.len() + 1);
        text.push_str(&chunk.stdout);
        text.push('\n');
        self.append_output(&text);
    }

    pub fn on_exit(&mut self, exit: &ExecExit) -> ExitOutcome {
        let outcome = match self.started.remove(&exit.cmd_id) {
            Some(started_at_ms) => {
                let elapsed_ms = self.clock.now_ms() - started_at_ms;
                self.set_status(duration_status(elapsed_ms));
                ExitOutcome::Completed { elapsed_ms }
            }
            None => {
                debug!(cmd_id = %exit.cmd_id, "exit for untracked command");
                ExitOutcome::Untracked
            }
        };

        if !exit.success() {
            self.append_output(&exit_footer(exit.code));
        }
        self.last_exit = Some((exit.cmd_id, exit.code));
        outcome
    }

    /// Clears the output only; running commands keep their start times.
    pub fn reset_output(&mut self) {
        self.output.reset();
        if let Some(view) = &self.view {
            view.send(ViewEvent::OutputReset);
        }
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn is_tracking(&self, cmd_id: &CommandId) -> bool {
        self.started.contains_key(cmd_id)
    }

    /// Commands still waiting for their exit, oldest first. Entries that never
    /// complete stay here.
    pub fn in_flight(&self) -> Vec<InFlight> {
        let now = self.clock.now_ms();
        let mut items: Vec<_> = self
            .started
            .iter()
            .map(|(cmd_id, started)| (*started, *cmd_id))
            .collect();
        items.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        items
            .into_iter()
            .map(|(started, cmd_id)| InFlight {
                cmd_id,
                elapsed_ms: now - started,
            })
            .collect()
    }

    pub fn active_project(&self) -> Option<&Project> {
        self.active_project.as_ref()
    }

    pub fn config_valid(&self) -> bool {
        self.config_valid
    }

    pub fn last_exit(&self) -> Option<(CommandId, i32)> {
        self.last_exit
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            status: self.status.clone(),
            output_len: self.output.len(),
            in_flight: self.in_flight().into_iter().map(|item| item.cmd_id).collect(),
            active_project: self.active_project.clone(),
            config_valid: self.config_valid,
            last_exit: self.last_exit,
        }
    }

    fn append_output(&mut self, text: &str) {
        self.output.append(text);
        if let Some(view) = &self.view {
            view.send(ViewEvent::OutputAppended(text.to_string()));
        }
    }

    fn set_status(&mut self, status: String) {
        if let Some(view) = &self.view {
            view.send(ViewEvent::StatusChanged(status.clone()));
        }
        self.status = status;
    }
}
