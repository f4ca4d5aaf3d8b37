mod config;

use std::{
    io::{self, Write},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use xds_build::{
    Alert, AlertLevel, BuildSession, MonotonicClock, Project, SessionError,
    SessionInputs, Tracker, ViewEvent, ViewEventQueue,
};
use xds_exec::{EventHub, ExecutorConfig, LocalExecutor, SdkId, SdkRegistry};
use xds_util::expand_user;

use crate::config::{AppConfig, RunSelection};

#[derive(Parser)]
#[command(name = "xds-cli", version, about = "Run and track cross builds of XDS projects")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run make in a project and stream its output
    Make {
        /// Project id (defaults to the last one used)
        #[arg(long)]
        project: Option<String>,
        /// Directory inside the project (defaults to the last one used)
        #[arg(long)]
        subpath: Option<String>,
        /// SDK id (defaults to the first SDK found)
        #[arg(long)]
        sdk: Option<String>,
        /// Kill the build after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Arguments passed to make (default to the last ones used)
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Manage configured projects
    Projects {
        #[command(subcommand)]
        cmd: Option<ProjectsCmd>,
    },
    /// List installed cross SDKs
    Sdks,
}

#[derive(Subcommand)]
enum ProjectsCmd {
    /// List projects
    List,
    /// Add or replace a project
    Add {
        id: String,
        path: String,
        #[arg(long)]
        label: Option<String>,
    },
    /// Remove a project
    Remove { id: String },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    xds_util::init_tracing()?;
    let cli = Cli::parse();
    let mut cfg = AppConfig::load();

    match cli.cmd {
        Cmd::Make {
            project,
            subpath,
            sdk,
            timeout,
            args,
        } => {
            let run = cfg.selection(project, subpath, &args);
            let sdk = match sdk {
                Some(raw) => Some(raw.parse::<SdkId>()?),
                None => None,
            };
            let code = run_make(&mut cfg, run, sdk, timeout).await?;
            Ok(exit_code(code))
        }
        Cmd::Projects { cmd } => {
            match cmd.unwrap_or(ProjectsCmd::List) {
                ProjectsCmd::List => {
                    for project in &cfg.projects {
                        println!("{}\t{}\t{}", project.id, project.label, project.path.display());
                    }
                }
                ProjectsCmd::Add { id, path, label } => {
                    let path = expand_user(&path);
                    if !path.is_dir() {
                        return Err(format!("not a directory: {}", path.display()).into());
                    }
                    cfg.upsert_project(Project {
                        label: label.unwrap_or_else(|| id.clone()),
                        id,
                        path,
                    });
                    cfg.save()?;
                }
                ProjectsCmd::Remove { id } => {
                    if !cfg.remove_project(&id) {
                        return Err(format!("unknown project: {id}").into());
                    }
                    cfg.save()?;
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Sdks => {
            let registry = SdkRegistry::scan(&expand_user(&cfg.sdk_root));
            let current = registry.current_id();
            for sdk in registry.list() {
                let marker = if Some(sdk.id) == current { "*" } else { " " };
                println!("{marker} {}\t{}\t{}", sdk.id, sdk.name, sdk.path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_make(
    cfg: &mut AppConfig,
    run: RunSelection,
    sdk: Option<SdkId>,
    timeout: Option<u64>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let project_id = run.project_id.as_str();
    if !project_id.is_empty() && cfg.project(project_id).is_none() {
        return Err(format!("unknown project: {project_id}").into());
    }

    let mut registry = SdkRegistry::scan(&expand_user(&cfg.sdk_root));
    if let Ok(last) = cfg.last_sdk_id.parse::<SdkId>() {
        registry.select(last);
    }

    let hub = EventHub::default();
    let executor_cfg = ExecutorConfig {
        shell: cfg.shell.clone(),
        default_timeout: Duration::from_secs(timeout.unwrap_or(cfg.exec_timeout_secs)),
        merge_stderr: cfg.merge_stderr,
    };
    let mut executor = LocalExecutor::new(executor_cfg, registry.clone(), hub.clone());
    for project in &cfg.projects {
        executor.add_project(project.id.clone(), project.path.clone());
    }

    let (queue, mut wake) = ViewEventQueue::new(xds_build::view::DEFAULT_VIEW_QUEUE_SIZE);
    let view = queue.sender();
    let (_config_tx, config_rx) = watch::channel(cfg.snapshot_with_active(project_id));
    let tracker = Tracker::new(MonotonicClock::new(), Arc::new(view.clone()), Arc::new(registry))
        .with_view(view);
    let session = BuildSession::spawn(
        tracker,
        Arc::new(executor),
        SessionInputs {
            output: hub.subscribe_output(),
            exits: hub.subscribe_exit(),
            config: Some(config_rx),
        },
    );

    let cmd_id = match session.submit(run.subpath.as_str(), run.args.as_str(), sdk).await {
        Ok(cmd_id) => cmd_id,
        Err(SessionError::Closed) => return Err("build session stopped unexpectedly".into()),
        Err(SessionError::Tracker(_)) => {
            render_to_terminal(&queue.drain())?;
            return Ok(1);
        }
    };

    cfg.remember(&run, sdk);
    if let Err(err) = cfg.save() {
        tracing::warn!("failed to save config: {err}");
    }

    let code = loop {
        if wake.recv().await.is_none() {
            break 1;
        }
        render_to_terminal(&queue.drain())?;
        let snapshot = session.snapshot().await?;
        if !snapshot.in_flight.contains(&cmd_id) {
            break match snapshot.last_exit {
                Some((id, code)) if id == cmd_id => code,
                _ => 1,
            };
        }
    };
    render_to_terminal(&queue.drain())?;
    session.shutdown().await?;
    Ok(code)
}

/// Fails once stdout is gone (`xds-cli make | head`), which ends the run and
/// kills the build.
fn render_to_terminal(events: &[ViewEvent]) -> io::Result<()> {
    render(events, &mut io::stdout().lock(), &mut io::stderr().lock())
}

fn render(events: &[ViewEvent], out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
    for event in events {
        match event {
            ViewEvent::OutputAppended(text) => out.write_all(text.as_bytes())?,
            ViewEvent::OutputReset => {}
            ViewEvent::StatusChanged(status) => writeln!(err, "[xds] {status}")?,
            ViewEvent::Alert(alert) => {
                writeln!(err, "[xds] {}: {}", level_label(alert), alert.message)?
            }
        }
    }
    out.flush()
}

fn level_label(alert: &Alert) -> &'static str {
    match alert.level {
        AlertLevel::Warning => "warning",
        AlertLevel::Error => "error",
    }
}

fn exit_code(code: i32) -> ExitCode {
    match u8::try_from(code) {
        Ok(code) => ExitCode::from(code),
        Err(_) => ExitCode::FAILURE,
    }
}
