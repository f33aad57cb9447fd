//! Simulated workload feed
//!
//! Replays a recorded job arrival trace against the virtual clock. Each
//! record enters the global queue once its relative arrival time has
//! elapsed, exactly as a scheduler poll would have seen it.

use crate::clock::Clock;
use crate::error::Result;
use crate::provisioner::JobSource;
use crate::types::{Job, JobDescription, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One job arrival in a workload trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadRecord {
    pub id: JobId,
    /// Scheduler the job is queued at
    pub tenant_address: String,
    /// Seconds after simulation start when the job appears
    pub relative_time: i64,
    /// Expected execution time in seconds on `instance_type`
    pub duration: f64,
    /// Instance type the duration was recorded on
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default = "one")]
    pub cpus: u32,
    #[serde(default = "one")]
    pub memory: u32,
    #[serde(default = "one")]
    pub disk: u32,
    #[serde(default)]
    pub ondemand: bool,
}

fn one() -> u32 {
    1
}

/// Job source backed by a workload trace and the virtual clock.
pub struct SimJobFeed {
    clock: Clock,
    start: DateTime<Utc>,
    records: Vec<WorkloadRecord>,
}

impl SimJobFeed {
    pub fn new(clock: Clock, mut records: Vec<WorkloadRecord>) -> Self {
        records.sort_by_key(|r| r.relative_time);
        let start = clock.now();
        SimJobFeed {
            clock,
            start,
            records,
        }
    }

    /// Parse a JSON array of workload records.
    pub fn from_json(clock: Clock, json: &str) -> Result<Self> {
        let records: Vec<WorkloadRecord> = serde_json::from_str(json)?;
        Ok(Self::new(clock, records))
    }

    pub fn total_jobs(&self) -> usize {
        self.records.len()
    }

    /// Whether every record has entered the queue.
    pub fn exhausted(&self) -> bool {
        let elapsed = (self.clock.now() - self.start).num_seconds();
        self.records.iter().all(|r| r.relative_time <= elapsed)
    }

    fn to_job(&self, record: &WorkloadRecord) -> Job {
        Job::new(
            record.id.clone(),
            record.tenant_address.clone(),
            self.start + chrono::Duration::seconds(record.relative_time),
            record.cpus,
            record.memory,
            record.disk,
            JobDescription {
                ondemand: record.ondemand,
                duration: record.duration,
                instance_type: record.instance_type.clone(),
            },
        )
    }
}

#[async_trait]
impl JobSource for SimJobFeed {
    async fn global_queue(&self) -> Result<Vec<Job>> {
        let elapsed = (self.clock.now() - self.start).num_seconds();
        Ok(self
            .records
            .iter()
            .filter(|r| r.relative_time <= elapsed)
            .map(|r| self.to_job(r))
            .collect())
    }
}
