//! Run report aggregated from per-item outcomes.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::RecordId;
use super::state::ItemFailure;

/// Final outcome of one item
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Completed {
        item_id: String,
        record_id: RecordId,
        /// Already stored before this run; nothing was downloaded
        skipped: bool,
    },
    Failed {
        item_id: String,
        failure: ItemFailure,
    },
}

impl ItemOutcome {
    pub fn item_id(&self) -> &str {
        match self {
            ItemOutcome::Completed { item_id, .. } | ItemOutcome::Failed { item_id, .. } => item_id,
        }
    }
}

/// Summary of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub source_url: String,
    pub total_items: usize,
    pub succeeded: BTreeSet<String>,
    pub records: BTreeMap<String, RecordId>,

    /// Subset of `succeeded` that was already in the store
    pub skipped: BTreeSet<String>,
    pub failed: BTreeMap<String, ItemFailure>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Process exit code for this report.
    ///
    /// Failed items only fail the process when nothing completed, unless
    /// `fail_on_partial` is set.
    pub fn exit_code(&self, fail_on_partial: bool) -> i32 {
        if self.failed.is_empty() {
            return 0;
        }
        if self.succeeded.is_empty() || fail_on_partial {
            1
        } else {
            0
        }
    }
}

/// Accumulates item outcomes in any order
#[derive(Debug)]
pub struct ReportBuilder {
    run_id: Uuid,
    source_url: String,
    total_items: usize,
    succeeded: BTreeSet<String>,
    records: BTreeMap<String, RecordId>,
    skipped: BTreeSet<String>,
    failed: BTreeMap<String, ItemFailure>,
    warnings: Vec<String>,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl ReportBuilder {
    pub fn new(run_id: Uuid, source_url: impl Into<String>) -> Self {
        Self {
            run_id,
            source_url: source_url.into(),
            total_items: 0,
            succeeded: BTreeSet::new(),
            records: BTreeMap::new(),
            skipped: BTreeSet::new(),
            failed: BTreeMap::new(),
            warnings: Vec::new(),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    pub fn set_total(&mut self, total_items: usize) {
        self.total_items = total_items;
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Record a terminal outcome. Later outcomes for the same id replace earlier ones.
    pub fn record(&mut self, outcome: ItemOutcome) {
        match outcome {
            ItemOutcome::Completed {
                item_id,
                record_id,
                skipped,
            } => {
                self.failed.remove(&item_id);
                if skipped {
                    self.skipped.insert(item_id.clone());
                }
                self.records.insert(item_id.clone(), record_id);
                self.succeeded.insert(item_id);
            }
            ItemOutcome::Failed { item_id, failure } => {
                self.succeeded.remove(&item_id);
                self.skipped.remove(&item_id);
                self.records.remove(&item_id);
                self.failed.insert(item_id, failure);
            }
        }
    }

    /// Number of outcomes recorded so far
    pub fn recorded(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    pub fn finish(self) -> RunReport {
        RunReport {
            run_id: self.run_id,
            source_url: self.source_url,
            total_items: self.total_items,
            succeeded: self.succeeded,
            records: self.records,
            skipped: self.skipped,
            failed: self.failed,
            warnings: self.warnings,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration: self.clock.elapsed(),
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
