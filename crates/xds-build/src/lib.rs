//! Client-side tracking of build invocations: submits builds for the active
//! project, times them until their exit arrives and collects their output.

pub mod alerts;
pub mod clock;
pub mod elapsed;
pub mod output;
pub mod project;
pub mod sdk;
pub mod session;
pub mod tracker;
pub mod view;

pub use alerts::{Alert, AlertLevel, AlertSink};
pub use clock::{Clock, MonotonicClock};
pub use elapsed::format_elapsed;
pub use output::OutputBuffer;
pub use project::{ConfigSnapshot, Project};
pub use sdk::SdkSelector;
pub use session::{BuildSession, SessionError, SessionInputs};
pub use tracker::{ExitOutcome, InFlight, PendingBuild, Tracker, TrackerError, TrackerSnapshot};
pub use view::{ViewEvent, ViewEventQueue, ViewEventSender};
