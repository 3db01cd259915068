//! The report data collector contract.
//!
//! Concrete collectors live outside the scheduler core; each one knows how
//! to gather the rows for a single report type. The engine looks collectors
//! up by report type id at fire time.

use super::ReportData;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Failure while gathering report data.
///
/// Collectors wrap their underlying cause instead of leaking raw transport
/// or storage errors to the scheduler.
#[derive(Debug, Error)]
#[error("report data collection failed: {message}")]
pub struct CollectError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl CollectError {
    pub fn new(message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }
}

/// A pluggable gatherer of report data for one report type.
///
/// `collect` must be a pure function of its parameters and the persisted
/// state it reads: no writes, no other side effects.
pub trait ReportCollector: Send + Sync {
    /// Human-readable description of what the collector gathers.
    fn description(&self) -> &str;

    fn collect(&self, parameters: &serde_json::Value) -> Result<ReportData, CollectError>;
}

/// Registry mapping report type ids to their collectors.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: HashMap<String, Arc<dyn ReportCollector>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, report_type_id: impl Into<String>, collector: Arc<dyn ReportCollector>) {
        self.collectors.insert(report_type_id.into(), collector);
    }

    pub fn get(&self, report_type_id: &str) -> Option<Arc<dyn ReportCollector>> {
        self.collectors.get(report_type_id).cloned()
    }

    pub fn report_type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.collectors.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }
}
