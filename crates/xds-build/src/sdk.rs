use std::sync::{Arc, RwLock};

use xds_exec::{SdkId, SdkRegistry};

/// Answers "which SDK is selected right now", asked once per build submission.
pub trait SdkSelector: Send + Sync {
    fn current_id(&self) -> Option<SdkId>;
}

impl SdkSelector for Option<SdkId> {
    fn current_id(&self) -> Option<SdkId> {
        *self
    }
}

impl SdkSelector for SdkRegistry {
    fn current_id(&self) -> Option<SdkId> {
        SdkRegistry::current_id(self)
    }
}

impl<T: SdkSelector + ?Sized> SdkSelector for Arc<T> {
    fn current_id(&self) -> Option<SdkId> {
        (**self).current_id()
    }
}

impl<T: SdkSelector> SdkSelector for RwLock<T> {
    fn current_id(&self) -> Option<SdkId> {
        self.read()
            .map(|inner| inner.current_id())
            .unwrap_or_else(|poisoned| poisoned.into_inner().current_id())
    }
}
