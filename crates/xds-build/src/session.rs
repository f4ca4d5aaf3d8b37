use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};
use xds_exec::{BuildApi, BuildApiError, CommandId, ExecExit, ExecOutput, SdkId};

use crate::project::ConfigSnapshot;
use crate::tracker::{PendingBuild, Tracker, TrackerError, TrackerSnapshot};

const COMMAND_QUEUE_SIZE: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("build session has stopped")]
    Closed,
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

type SubmitReply = oneshot::Sender<Result<CommandId, TrackerError>>;
type InProgress = BoxFuture<
    'static,
    (
        PendingBuild,
        Result<CommandId, BuildApiError>,
        SubmitReply,
    ),
>;

enum SessionCommand {
    Submit {
        subpath: String,
        args: String,
        sdk: Option<SdkId>,
        reply: SubmitReply,
    },
    Reset,
    Snapshot {
        reply: oneshot::Sender<TrackerSnapshot>,
    },
    Shutdown,
}

/// Streams a session listens to. Subscribe before the first build is submitted or
/// early events are missed.
pub struct SessionInputs {
    pub output: broadcast::Receiver<ExecOutput>,
    pub exits: broadcast::Receiver<ExecExit>,
    pub config: Option<watch::Receiver<ConfigSnapshot>>,
}

/// Owns a [`Tracker`] on its own task and feeds it from the output/exit streams.
///
/// The subscriptions live exactly as long as the session: dropping it aborts the
/// task and releases them.
pub struct BuildSession {
    commands: mpsc::Sender<SessionCommand>,
    task: Option<JoinHandle<Tracker>>,
}

impl BuildSession {
    pub fn spawn(tracker: Tracker, api: Arc<dyn BuildApi>, inputs: SessionInputs) -> Self {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let task = tokio::spawn(run(tracker, api, inputs, command_rx));
        Self {
            commands,
            task: Some(task),
        }
    }

    /// Resolves once the build API has accepted or rejected the request.
    pub async fn submit(
        &self,
        subpath: impl Into<String>,
        args: impl Into<String>,
        sdk: Option<SdkId>,
    ) -> Result<CommandId, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Submit {
            subpath: subpath.into(),
            args: args.into(),
            sdk,
            reply,
        })
        .await?;
        let result = reply_rx.await.map_err(|_| SessionError::Closed)?;
        Ok(result?)
    }

    pub async fn reset_output(&self) -> Result<(), SessionError> {
        self.send(SessionCommand::Reset).await
    }

    pub async fn snapshot(&self) -> Result<TrackerSnapshot, SessionError> {
        let (reply, reply_rx) = oneshot::channel();
        self.send(SessionCommand::Snapshot { reply }).await?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Stops listening and hands the tracker back. Requests still waiting on the
    /// build API are dropped.
    pub async fn shutdown(mut self) -> Result<Tracker, SessionError> {
        let task = self.task.take().ok_or(SessionError::Closed)?;
        let _ = self.commands.send(SessionCommand::Shutdown).await;
        task.await.map_err(|_| SessionError::Closed)
    }

    async fn send(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

impl Drop for BuildSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run(
    mut tracker: Tracker,
    api: Arc<dyn BuildApi>,
    inputs: SessionInputs,
    mut commands: mpsc::Receiver<SessionCommand>,
) -> Tracker {
    let SessionInputs {
        output,
        exits,
        mut config,
    } = inputs;
    let mut output = BroadcastStream::new(output);
    let mut exits = BroadcastStream::new(exits);
    let mut in_progress: FuturesUnordered<InProgress> = FuturesUnordered::new();

    if let Some(rx) = config.as_mut() {
        let snapshot = rx.borrow_and_update().clone();
        tracker.apply_config(&snapshot);
    }

    loop {
        // Answers first so a command id is known before its exit is looked at, and
        // output before exits so trailing lines land ahead of the footer.
        tokio::select! {
            biased;

            Some((pending, result, reply)) = in_progress.next(), if !in_progress.is_empty() => {
                let result = tracker.complete_submit(pending, result);
                let _ = reply.send(result);
            }
            snapshot = config_changed(&mut config) => match snapshot {
                Some(snapshot) => tracker.apply_config(&snapshot),
                None => {
                    debug!("config source closed");
                    config = None;
                }
            },
            Some(item) = output.next() => match item {
                Ok(chunk) => tracker.on_output_chunk(&chunk),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!("output stream lagged, {missed} chunks lost");
                }
            },
            Some(item) = exits.next() => match item {
                Ok(exit) => {
                    tracker.on_exit(&exit);
                }
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!("exit stream lagged, {missed} notifications lost");
                }
            },
            command = commands.recv() => match command {
                Some(SessionCommand::Submit { subpath, args, sdk, reply }) => {
                    match tracker.begin_submit(&subpath, &args, sdk) {
                        Ok(pending) => {
                            let api = Arc::clone(&api);
                            in_progress.push(
                                async move {
                                    let result = api.request_build(pending.request.clone()).await;
                                    (pending, result, reply)
                                }
                                .boxed(),
                            );
                        }
                        Err(err) => {
                            let _ = reply.send(Err(err));
                        }
                    }
                }
                Some(SessionCommand::Reset) => tracker.reset_output(),
                Some(SessionCommand::Snapshot { reply }) => {
                    let _ = reply.send(tracker.snapshot());
                }
                Some(SessionCommand::Shutdown) | None => break,
            },
        }
    }

    debug!(in_flight = tracker.in_flight().len(), "build session stopped");
    tracker
}

async fn config_changed(rx: &mut Option<watch::Receiver<ConfigSnapshot>>) -> Option<ConfigSnapshot> {
    match rx {
        Some(rx) => match rx.changed().await {
            Ok(()) => Some(rx.borrow_and_update().clone()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::RecordedAlerts;
    use crate::clock::ManualClock;
    use crate::project::Project;
    use crate::view::{ViewEvent, ViewEventQueue};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;
    use xds_exec::{BuildRequest, EventHub};

    /// Accepts everything with increasing ids.
    #[derive(Default)]
    struct CountingApi {
        next: AtomicU64,
    }

    #[async_trait]
    impl BuildApi for CountingApi {
        async fn request_build(&self, _req: BuildRequest) -> Result<CommandId, BuildApiError> {
            Ok(CommandId::new(self.next.fetch_add(1, Ordering::Relaxed) + 1))
        }
    }

    fn project(id: &str) -> Project {
        Project {
            id: id.into(),
            ..Project::default()
        }
    }

    fn start(
        clock: &ManualClock,
        api: Arc<dyn BuildApi>,
        hub: &EventHub,
    ) -> (BuildSession, watch::Sender<ConfigSnapshot>) {
        let (config_tx, config_rx) =
            watch::channel(ConfigSnapshot::with_projects(vec![project("prj")]));
        let tracker = Tracker::new(
            clock.clone(),
            Arc::new(RecordedAlerts::new()),
            Arc::new(None::<SdkId>),
        );
        let session = BuildSession::spawn(
            tracker,
            api,
            SessionInputs {
                output: hub.subscribe_output(),
                exits: hub.subscribe_exit(),
                config: Some(config_rx),
            },
        );
        (session, config_tx)
    }

    fn exit(id: u64, code: i32) -> ExecExit {
        ExecExit {
            cmd_id: CommandId::new(id),
            code,
            ..ExecExit::default()
        }
    }

    #[tokio::test]
    async fn reverse_ordered_exits_remove_only_their_own_id() {
        let clock = ManualClock::at(0.0);
        let hub = EventHub::new(16);
        let (session, _config) = start(&clock, Arc::new(CountingApi::default()), &hub);

        let first = session.submit("", "", None).await.expect("first");
        clock.set(100.0);
        let second = session.submit("", "", None).await.expect("second");
        assert_eq!(
            session.snapshot().await.expect("snapshot").in_flight,
            vec![first, second]
        );

        clock.set(400.0);
        hub.publish_exit(exit(second.get(), 0));
        let snapshot = session.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.in_flight, vec![first]);
        assert_eq!(snapshot.status, "Last command duration: 300.00 ms");

        hub.publish_exit(exit(first.get(), 0));
        let snapshot = session.snapshot().await.expect("snapshot");
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.status, "Last command duration: 400.00 ms");
    }

    #[tokio::test]
    async fn output_and_footer_reach_the_buffer_in_order() {
        let clock = ManualClock::at(0.0);
        let hub = EventHub::new(16);
        let (session, _config) = start(&clock, Arc::new(CountingApi::default()), &hub);

        let id = session.submit("", "", None).await.expect("submit");
        session.reset_output().await.expect("reset");
        session.snapshot().await.expect("reset applied");
        hub.publish_output(ExecOutput {
            cmd_id: id,
            stdout: "cc main.c".into(),
            ..ExecOutput::default()
        });
        hub.publish_exit(exit(id.get(), 2));

        let tracker = session.shutdown().await.expect("shutdown");
        assert_eq!(
            tracker.output().as_str(),
            "cc main.c\n--- Command exited with code 2 ---\n\n"
        );
        assert_eq!(tracker.last_exit(), Some((id, 2)));
    }

    #[tokio::test]
    async fn cleared_config_blocks_submission() {
        let clock = ManualClock::at(0.0);
        let hub = EventHub::new(16);
        let (session, config) = start(&clock, Arc::new(CountingApi::default()), &hub);

        config.send(ConfigSnapshot::default()).expect("config");
        let err = session.submit("", "", None).await.expect_err("no project");

        assert_eq!(err, SessionError::Tracker(TrackerError::NoActiveProject));
        assert!(session.snapshot().await.expect("snapshot").active_project.is_none());
    }

    #[tokio::test]
    async fn rejected_request_is_reported_to_the_caller() {
        struct Refusing;

        #[async_trait]
        impl BuildApi for Refusing {
            async fn request_build(&self, _req: BuildRequest) -> Result<CommandId, BuildApiError> {
                Err(BuildApiError::Unavailable("connection refused".into()))
            }
        }

        let clock = ManualClock::at(0.0);
        let hub = EventHub::new(16);
        let (session, _config) = start(&clock, Arc::new(Refusing), &hub);

        let err = session.submit("", "", None).await.expect_err("refused");

        assert!(matches!(
            err,
            SessionError::Tracker(TrackerError::RequestRejected(_))
        ));
        let snapshot = session.snapshot().await.expect("snapshot");
        assert!(snapshot.in_flight.is_empty());
        assert_eq!(snapshot.status, "Last command duration: 0.00 ms");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn local_executor_round_trip() {
        use crate::clock::MonotonicClock;
        use xds_exec::{ExecRequest, ExecutorConfig, LocalExecutor, SdkRegistry};

        /// Runs `echo <args>` instead of make.
        struct EchoApi(LocalExecutor);

        #[async_trait]
        impl BuildApi for EchoApi {
            async fn request_build(&self, req: BuildRequest) -> Result<CommandId, BuildApiError> {
                let mut exec = ExecRequest::from(req);
                exec.cmd = "echo".into();
                self.0
                    .exec(exec)
                    .map_err(|err| BuildApiError::Rejected(err.to_string()))
            }
        }

        let tmp = tempfile::tempdir().expect("tempdir");
        let hub = EventHub::new(64);
        let executor = LocalExecutor::new(ExecutorConfig::default(), SdkRegistry::default(), hub.clone())
            .with_project("prj", tmp.path());
        let (queue, mut wake) = ViewEventQueue::new(64);
        let (_config_tx, config_rx) =
            watch::channel(ConfigSnapshot::with_projects(vec![project("prj")]));
        let tracker = Tracker::new(
            MonotonicClock::new(),
            Arc::new(RecordedAlerts::new()),
            Arc::new(None::<SdkId>),
        )
        .with_view(queue.sender());
        let session = BuildSession::spawn(
            tracker,
            Arc::new(EchoApi(executor)),
            SessionInputs {
                output: hub.subscribe_output(),
                exits: hub.subscribe_exit(),
                config: Some(config_rx),
            },
        );

        let id = session.submit("", "built ok", None).await.expect("submit");

        let mut appended = String::new();
        let finished = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if wake.recv().await.is_none() {
                    return false;
                }
                for event in queue.drain() {
                    if let ViewEvent::OutputAppended(text) = event {
                        appended.push_str(&text);
                    }
                }
                let snapshot = session.snapshot().await.expect("snapshot");
                if !snapshot.in_flight.contains(&id) {
                    return snapshot.status.starts_with("Last command duration: ");
                }
            }
        })
        .await
        .expect("build finished in time");

        assert!(finished);
        for event in queue.drain() {
            if let ViewEvent::OutputAppended(text) = event {
                appended.push_str(&text);
            }
        }
        assert!(appended.ends_with("built ok\n"));
    }
}
