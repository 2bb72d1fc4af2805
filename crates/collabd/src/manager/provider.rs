//! Construction of the running manager and its helper.

use std::sync::Arc;

use collab_config::ConfigStore;

use crate::helper::{HelperWorker, ManagerHelper, helper_interval};
use crate::log_sink::LogSink;

use super::{
    BasicConnectionManager, ConnectionManager, HoldOpenSession, ManagerSelection,
    SessionHandler, StorageConnectionManager,
};

/// Builds the collaborators the lifecycle controller starts.
///
/// Construction must not launch any background activity; the lifecycle
/// starts the manager and then the helper in that order.
pub trait ManagerProvider: Send + Sync {
    /// Builds the manager for the selected variant.
    fn manager(&self, selection: ManagerSelection, log: &LogSink) -> Arc<dyn ConnectionManager>;

    /// Builds the helper coupled to `manager`.
    fn helper(
        &self,
        manager: Arc<dyn ConnectionManager>,
        config: &ConfigStore,
        log: &LogSink,
    ) -> Box<dyn HelperWorker>;
}

/// Provider of the production manager variants and [`ManagerHelper`].
#[derive(Clone)]
pub struct DefaultManagerProvider {
    sessions: Option<Arc<dyn SessionHandler>>,
}

impl std::fmt::Debug for DefaultManagerProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("DefaultManagerProvider")
            .field("custom_sessions", &self.sessions.is_some())
            .finish()
    }
}

impl Default for DefaultManagerProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl DefaultManagerProvider {
    /// Provider whose managers hold each client open until it disconnects.
    #[must_use]
    pub fn new() -> Self {
        Self { sessions: None }
    }

    /// Provider whose managers serve clients with `handler`.
    #[must_use]
    pub fn with_sessions(handler: Arc<dyn SessionHandler>) -> Self {
        Self {
            sessions: Some(handler),
        }
    }

    fn sessions(&self, log: &LogSink) -> Arc<dyn SessionHandler> {
        match &self.sessions {
            Some(handler) => Arc::clone(handler),
            None => Arc::new(HoldOpenSession::new(log.clone())),
        }
    }
}

impl ManagerProvider for DefaultManagerProvider {
    fn manager(&self, selection: ManagerSelection, log: &LogSink) -> Arc<dyn ConnectionManager> {
        let sessions = self.sessions(log);
        match selection {
            ManagerSelection::Basic => Arc::new(BasicConnectionManager::new(sessions, log)),
            ManagerSelection::Storage(handle) => {
                Arc::new(StorageConnectionManager::new(handle, sessions, log))
            }
        }
    }

    fn helper(
        &self,
        manager: Arc<dyn ConnectionManager>,
        config: &ConfigStore,
        log: &LogSink,
    ) -> Box<dyn HelperWorker> {
        Box::new(ManagerHelper::new(manager, helper_interval(config), log))
    }
}
