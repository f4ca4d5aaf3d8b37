use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::alerts::{Alert, AlertSink};

pub const DEFAULT_VIEW_QUEUE_SIZE: usize = 512;

/// Change notification for whatever renders the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    OutputAppended(String),
    OutputReset,
    StatusChanged(String),
    Alert(Alert),
}

#[derive(Clone)]
pub struct ViewEventSender {
    inner: Arc<ViewEventQueue>,
}

impl std::fmt::Debug for ViewEventSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEventSender").finish_non_exhaustive()
    }
}

/// Bounded queue drained by the renderer. A unit is sent on the wake-up channel
/// whenever the queue goes from empty to non-empty.
pub struct ViewEventQueue {
    queue: Mutex<VecDeque<ViewEvent>>,
    notify: mpsc::Sender<()>,
    max_len: usize,
}

impl ViewEventQueue {
    pub fn new(max_len: usize) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (notify, notify_rx) = mpsc::channel(1);
        (
            Arc::new(Self {
                queue: Mutex::new(VecDeque::new()),
                notify,
                max_len: max_len.max(1),
            }),
            notify_rx,
        )
    }

    pub fn sender(self: &Arc<Self>) -> ViewEventSender {
        ViewEventSender {
            inner: Arc::clone(self),
        }
    }

    pub fn drain(&self) -> Vec<ViewEvent> {
        let mut queue = self.lock();
        queue.drain(..).collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ViewEvent>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(&self, event: ViewEvent) {
        let mut queue = self.lock();
        let was_empty = queue.is_empty();

        let Some(event) = merge_into_back(&mut queue, event) else {
            return;
        };
        let event = if queue.len() >= self.max_len {
            compact(&mut queue);
            if queue.len() >= self.max_len {
                evict(&mut queue);
            }
            match merge_into_back(&mut queue, event) {
                Some(event) => event,
                None => return,
            }
        } else {
            event
        };

        queue.push_back(event);
        if was_empty {
            let _ = self.notify.try_send(());
        }
    }
}

/// Folds `event` into the last queued one when they combine. Returns the event
/// if it still has to be queued.
fn merge_into_back(queue: &mut VecDeque<ViewEvent>, event: ViewEvent) -> Option<ViewEvent> {
    match (queue.back_mut(), event) {
        (Some(ViewEvent::OutputAppended(pending)), ViewEvent::OutputAppended(text)) => {
            pending.push_str(&text);
            None
        }
        (Some(last @ ViewEvent::StatusChanged(_)), event @ ViewEvent::StatusChanged(_)) => {
            *last = event;
            None
        }
        (_, event) => Some(event),
    }
}

/// Last resort once compaction could not free a slot: a reset goes before an
/// alert, and output text goes last.
fn evict(queue: &mut VecDeque<ViewEvent>) {
    let pos = queue
        .iter()
        .position(|ev| matches!(ev, ViewEvent::OutputReset))
        .or_else(|| queue.iter().position(|ev| matches!(ev, ViewEvent::Alert(_))))
        .unwrap_or(0);
    queue.remove(pos);
}

/// Frees room without losing output text. The oldest status goes first. Failing
/// that, output erased by a later reset is dropped and the remaining output is
/// merged into one event, which keeps the text in order but may move it ahead of
/// alerts queued between its parts.
fn compact(queue: &mut VecDeque<ViewEvent>) {
    if let Some(pos) = queue
        .iter()
        .position(|ev| matches!(ev, ViewEvent::StatusChanged(_)))
    {
        queue.remove(pos);
        return;
    }

    let last_reset = queue
        .iter()
        .rposition(|ev| matches!(ev, ViewEvent::OutputReset));
    let mut compacted = VecDeque::with_capacity(queue.len());
    let mut merged_at: Option<usize> = None;
    for (idx, event) in queue.drain(..).enumerate() {
        let erased = last_reset.is_some_and(|reset| idx < reset);
        match event {
            ViewEvent::OutputReset if Some(idx) == last_reset => compacted.push_back(event),
            ViewEvent::OutputReset | ViewEvent::StatusChanged(_) => {}
            ViewEvent::OutputAppended(_) if erased => {}
            ViewEvent::OutputAppended(text) => match merged_at {
                Some(slot) => {
                    if let Some(ViewEvent::OutputAppended(pending)) = compacted.get_mut(slot) {
                        pending.push_str(&text);
                    }
                }
                None => {
                    merged_at = Some(compacted.len());
                    compacted.push_back(ViewEvent::OutputAppended(text));
                }
            },
            ViewEvent::Alert(_) => compacted.push_back(event),
        }
    }
    *queue = compacted;
}

impl ViewEventSender {
    pub fn send(&self, event: ViewEvent) {
        self.inner.push(event);
    }
}

impl AlertSink for ViewEventSender {
    fn alert(&self, alert: Alert) {
        self.send(ViewEvent::Alert(alert));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consecutive_output_coalesces() {
        let (queue, _rx) = ViewEventQueue::new(8);
        let tx = queue.sender();
        tx.send(ViewEvent::OutputAppended("a\n".into()));
        tx.send(ViewEvent::OutputAppended("b\n".into()));
        tx.send(ViewEvent::OutputReset);
        tx.send(ViewEvent::OutputAppended("c\n".into()));

        assert_eq!(
            queue.drain(),
            vec![
                ViewEvent::OutputAppended("a\nb\n".into()),
                ViewEvent::OutputReset,
                ViewEvent::OutputAppended("c\n".into()),
            ]
        );
    }

    #[test]
    fn latest_status_wins() {
        let (queue, _rx) = ViewEventQueue::new(8);
        let tx = queue.sender();
        tx.send(ViewEvent::StatusChanged("one".into()));
        tx.send(ViewEvent::StatusChanged("two".into()));

        assert_eq!(queue.drain(), vec![ViewEvent::StatusChanged("two".into())]);
    }

    #[test]
    fn full_queue_keeps_alerts_over_a_reset() {
        let (queue, _rx) = ViewEventQueue::new(2);
        let tx = queue.sender();
        tx.alert(Alert::error("boom"));
        tx.send(ViewEvent::OutputReset);
        tx.send(ViewEvent::StatusChanged("done".into()));

        assert_eq!(
            queue.drain(),
            vec![
                ViewEvent::Alert(Alert::error("boom")),
                ViewEvent::StatusChanged("done".into()),
            ]
        );
    }

    #[test]
    fn full_queue_drops_status_before_output() {
        let (queue, _rx) = ViewEventQueue::new(2);
        let tx = queue.sender();
        tx.send(ViewEvent::OutputAppended("line 1\n".into()));
        tx.send(ViewEvent::StatusChanged("building".into()));
        tx.send(ViewEvent::OutputAppended("line 2\n".into()));

        assert_eq!(
            queue.drain(),
            vec![ViewEvent::OutputAppended("line 1\nline 2\n".into())]
        );
    }

    #[test]
    fn full_queue_merges_output_split_by_alerts() {
        let (queue, _rx) = ViewEventQueue::new(3);
        let tx = queue.sender();
        tx.send(ViewEvent::OutputAppended("a\n".into()));
        tx.alert(Alert::warning("slow", false));
        tx.send(ViewEvent::OutputAppended("b\n".into()));
        tx.alert(Alert::error("boom"));

        assert_eq!(
            queue.drain(),
            vec![
                ViewEvent::OutputAppended("a\nb\n".into()),
                ViewEvent::Alert(Alert::warning("slow", false)),
                ViewEvent::Alert(Alert::error("boom")),
            ]
        );
    }

    #[test]
    fn full_queue_forgets_output_cleared_by_a_reset() {
        let (queue, _rx) = ViewEventQueue::new(3);
        let tx = queue.sender();
        tx.send(ViewEvent::OutputAppended("old\n".into()));
        tx.send(ViewEvent::OutputReset);
        tx.send(ViewEvent::OutputAppended("new\n".into()));
        tx.alert(Alert::error("boom"));

        assert_eq!(
            queue.drain(),
            vec![
                ViewEvent::OutputReset,
                ViewEvent::OutputAppended("new\n".into()),
                ViewEvent::Alert(Alert::error("boom")),
            ]
        );
    }

    #[test]
    fn wakes_only_on_first_event() {
        let (queue, mut rx) = ViewEventQueue::new(8);
        let tx = queue.sender();
        tx.send(ViewEvent::OutputReset);
        tx.send(ViewEvent::StatusChanged("x".into()));

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        queue.drain();
        tx.send(ViewEvent::OutputReset);
        assert!(rx.try_recv().is_ok());
    }
}
