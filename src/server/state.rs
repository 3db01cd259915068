use axum::extract::FromRef;

use crate::job_store::MailJobStore;
use crate::scheduler::SchedulerHandle;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedMailJobStore = Arc<dyn MailJobStore>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub job_store: GuardedMailJobStore,
    pub scheduler: SchedulerHandle,
}

impl FromRef<ServerState> for GuardedMailJobStore {
    fn from_ref(input: &ServerState) -> Self {
        input.job_store.clone()
    }
}

impl FromRef<ServerState> for SchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
