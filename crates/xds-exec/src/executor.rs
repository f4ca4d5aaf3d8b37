use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, Command},
    sync::mpsc,
};
use tracing::{debug, info, warn};
use xds_util::{now_millis, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_SHELL};

use crate::api::{BuildApi, BuildApiError};
use crate::events::EventHub;
use crate::ids::{CommandId, SdkId};
use crate::messages::{BuildRequest, ExecExit, ExecOutput, ExecRequest};
use crate::sdk::SdkRegistry;

const LINE_CHANNEL_CAPACITY: usize = 256;
const MAX_READ_ERRORS: u32 = 8;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Invalid id")]
    InvalidId,
    #[error("Unknown id: {0}")]
    UnknownProject(String),
    #[error("Unknown sdk id: {0}")]
    UnknownSdk(SdkId),
    #[error("failed to spawn command: {0}")]
    Spawn(#[source] io::Error),
    #[error("failed to capture {0}")]
    MissingPipe(&'static str),
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    pub shell: String,
    pub default_timeout: Duration,
    /// Publish stderr lines in the `stdout` field so plain output consumers see them.
    pub merge_stderr: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.into(),
            default_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            merge_stderr: false,
        }
    }
}

/// Runs commands for registered projects on this machine and publishes their output
/// and exit on an [`EventHub`].
pub struct LocalExecutor {
    config: ExecutorConfig,
    projects: HashMap<String, PathBuf>,
    sdks: SdkRegistry,
    hub: EventHub,
    next_id: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: StreamKind,
    line: String,
}

impl LocalExecutor {
    pub fn new(config: ExecutorConfig, sdks: SdkRegistry, hub: EventHub) -> Self {
        Self {
            config,
            projects: HashMap::new(),
            sdks,
            hub,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn with_project(mut self, id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.add_project(id, path);
        self
    }

    pub fn add_project(&mut self, id: impl Into<String>, path: impl Into<PathBuf>) {
        self.projects.insert(id.into(), path.into());
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    /// Starts `req.cmd` inside the project folder. Returns as soon as the process is
    /// running; output and exit arrive on the hub under the returned id.
    pub fn exec(&self, req: ExecRequest) -> Result<CommandId, ExecError> {
        let project_id = req.id.trim();
        if project_id.is_empty() {
            return Err(ExecError::InvalidId);
        }
        let project_dir = self
            .projects
            .get(project_id)
            .ok_or_else(|| ExecError::UnknownProject(project_id.to_string()))?;

        let env_cmd = match req.sdk_id {
            Some(sdk_id) => {
                let sdk = self.sdks.get(&sdk_id).ok_or(ExecError::UnknownSdk(sdk_id))?;
                Some(sdk.env_cmd())
            }
            None => None,
        };

        let work_dir = full_path(project_dir, &req.rpath);
        let mut line = format!("cd {}", shell_quote(&work_dir.display().to_string()));
        if let Some([source, env_file]) = env_cmd {
            line.push_str(&format!(" && {source} {}", shell_quote(&env_file)));
        }
        line.push_str(" && ");
        line.push_str(&req.cmd);
        if !req.args.is_empty() {
            line.push(' ');
            line.push_str(&req.args.join(" "));
        }

        let timeout = if req.timeout_secs == 0 {
            self.config.default_timeout
        } else {
            Duration::from_secs(req.timeout_secs)
        };

        let mut child = Command::new(&self.config.shell)
            .arg("-c")
            .arg(&line)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecError::Spawn)?;
        let stdout = child.stdout.take().ok_or(ExecError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(ExecError::MissingPipe("stderr"))?;

        let cmd_id = CommandId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        info!(%cmd_id, project = project_id, "execute: {line}");

        let (line_tx, line_rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        tokio::spawn(read_lines(stdout, StreamKind::Stdout, line_tx.clone()));
        tokio::spawn(read_lines(stderr, StreamKind::Stderr, line_tx));
        tokio::spawn(supervise(
            self.hub.clone(),
            cmd_id,
            child,
            line_rx,
            timeout,
            self.config.merge_stderr,
        ));

        Ok(cmd_id)
    }
}

#[async_trait]
impl BuildApi for LocalExecutor {
    async fn request_build(&self, req: BuildRequest) -> Result<CommandId, BuildApiError> {
        self.exec(req.into())
            .map_err(|err| BuildApiError::Rejected(err.to_string()))
    }
}

fn full_path(project_dir: &Path, rpath: &str) -> PathBuf {
    let rel = rpath.trim().trim_start_matches('/');
    if rel.is_empty() {
        project_dir.to_path_buf()
    } else {
        project_dir.join(rel)
    }
}

fn shell_quote(raw: &str) -> String {
    format!("'{}'", raw.replace('\'', r"'\''"))
}

async fn read_lines<R>(reader: R, stream: StreamKind, tx: mpsc::Sender<OutputLine>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    let mut errors = 0;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                errors = 0;
                let line = decode_line(&buf);
                if tx.send(OutputLine { stream, line }).await.is_err() {
                    break;
                }
            }
            // Keep draining so the child never sees a closed pipe.
            Err(err) => {
                warn!(?stream, "failed to read command output: {err}");
                errors += 1;
                if errors >= MAX_READ_ERRORS {
                    break;
                }
            }
        }
    }
}

/// Lossy decode without the trailing `\n` or `\r\n`.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

async fn supervise(
    hub: EventHub,
    cmd_id: CommandId,
    mut child: Child,
    mut line_rx: mpsc::Receiver<OutputLine>,
    timeout: Duration,
    merge_stderr: bool,
) {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut lines_open = true;
    let mut timed_out = false;
    let mut status: Option<io::Result<std::process::ExitStatus>> = None;

    while lines_open || status.is_none() {
        tokio::select! {
            line = line_rx.recv(), if lines_open => match line {
                Some(line) => hub.publish_output(to_output(cmd_id, line, merge_stderr)),
                None => lines_open = false,
            },
            result = child.wait(), if status.is_none() => {
                status = Some(result);
            }
            _ = &mut deadline, if status.is_none() && !timed_out => {
                warn!(%cmd_id, "command timed out after {}s, killing", timeout.as_secs());
                timed_out = true;
                if let Err(err) = child.start_kill() {
                    warn!(%cmd_id, "failed to kill command: {err}");
                }
            }
        }
    }

    let (code, error) = match status {
        Some(Ok(_)) if timed_out => (
            -1,
            Some(format!("command timed out after {}s", timeout.as_secs())),
        ),
        Some(Ok(status)) => (status.code().unwrap_or(-1), None),
        Some(Err(err)) => (-1, Some(err.to_string())),
        None => (-1, Some("missing exit status".into())),
    };
    debug!(%cmd_id, code, ?error, "command exited");

    hub.publish_exit(ExecExit {
        cmd_id,
        timestamp: now_millis(),
        code,
        error,
    });
}

fn to_output(cmd_id: CommandId, line: OutputLine, merge_stderr: bool) -> ExecOutput {
    let mut msg = ExecOutput {
        cmd_id,
        timestamp: now_millis(),
        ..ExecOutput::default()
    };
    match line.stream {
        StreamKind::Stdout => msg.stdout = line.line,
        StreamKind::Stderr if merge_stderr => msg.stdout = line.line,
        StreamKind::Stderr => msg.stderr = line.line,
    }
    msg
}
