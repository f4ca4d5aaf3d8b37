use std::sync::Arc;

use async_trait::async_trait;

use crate::ids::CommandId;
use crate::messages::BuildRequest;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildApiError {
    #[error("{0}")]
    Rejected(String),
    #[error("build service unavailable: {0}")]
    Unavailable(String),
}

/// Remote side of a build: accepts a request and hands back the command id under
/// which its output and exit will later be published.
#[async_trait]
pub trait BuildApi: Send + Sync {
    async fn request_build(&self, req: BuildRequest) -> Result<CommandId, BuildApiError>;
}

#[async_trait]
impl<T: BuildApi + ?Sized> BuildApi for Arc<T> {
    async fn request_build(&self, req: BuildRequest) -> Result<CommandId, BuildApiError> {
        (**self).request_build(req).await
    }
}
