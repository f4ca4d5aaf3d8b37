//! Command execution side of the build API: wire messages, the `BuildApi` seam,
//! the event hub carrying output/exit notifications, cross SDK discovery and a
//! local executor.

pub mod api;
pub mod events;
pub mod executor;
pub mod ids;
pub mod messages;
pub mod sdk;

pub use api::{BuildApi, BuildApiError};
pub use events::EventHub;
pub use executor::{ExecError, ExecutorConfig, LocalExecutor};
pub use ids::{CommandId, SdkId};
pub use messages::{BuildRequest, ExecExit, ExecOutput, ExecRequest};
pub use sdk::{CrossSdk, SdkError, SdkRegistry};
