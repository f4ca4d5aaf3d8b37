use std::sync::Arc;
#[cfg(test)]
use std::sync::{Mutex, PoisonError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Error,
}

/// Human-readable message for the user. `persist` alerts stay visible until
/// dismissed instead of fading out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    pub persist: bool,
}

impl Alert {
    pub fn warning(message: impl Into<String>, persist: bool) -> Self {
        Self {
            level: AlertLevel::Warning,
            message: message.into(),
            persist,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: AlertLevel::Error,
            message: message.into(),
            persist: false,
        }
    }
}

pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: Alert);
}

impl<T: AlertSink + ?Sized> AlertSink for Arc<T> {
    fn alert(&self, alert: Alert) {
        (**self).alert(alert)
    }
}

/// Keeps every alert in memory; clones share the same list.
#[cfg(test)]
#[derive(Debug, Default, Clone)]
pub struct RecordedAlerts {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

#[cfg(test)]
impl RecordedAlerts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
impl AlertSink for RecordedAlerts {
    fn alert(&self, alert: Alert) {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(alert);
    }
}
