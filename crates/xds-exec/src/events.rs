use tokio::sync::broadcast;
use tracing::debug;

use crate::messages::{ExecExit, ExecOutput};

pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Fan-out point for command output and exit notifications.
///
/// Events are not keyed by subscriber: every receiver sees every command.
#[derive(Clone, Debug)]
pub struct EventHub {
    output: broadcast::Sender<ExecOutput>,
    exit: broadcast::Sender<ExecExit>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (output, _) = broadcast::channel(capacity.max(1));
        let (exit, _) = broadcast::channel(capacity.max(1));
        Self { output, exit }
    }

    pub fn subscribe_output(&self) -> broadcast::Receiver<ExecOutput> {
        self.output.subscribe()
    }

    pub fn subscribe_exit(&self) -> broadcast::Receiver<ExecExit> {
        self.exit.subscribe()
    }

    pub fn publish_output(&self, msg: ExecOutput) {
        if self.output.send(msg).is_err() {
            debug!("exec:output not delivered: no subscriber");
        }
    }

    pub fn publish_exit(&self, msg: ExecExit) {
        let cmd_id = msg.cmd_id;
        if self.exit.send(msg).is_err() {
            debug!(%cmd_id, "exec:exit not delivered: no subscriber");
        }
    }
}
