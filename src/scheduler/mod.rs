mod engine;
mod handle;
mod trigger;

pub use engine::{create_scheduler, SchedulerEngine};
pub use handle::{JobInfo, RunInfo, SchedulerError, SchedulerHandle, SharedSchedulerState};
pub use trigger::{local_to_utc, utc_to_local_naive, ScheduleError, TriggerSpec};
