//! Persistent store capability interface
//!
//! The engine treats durable state as row-level reads and upserts behind a
//! trait. Live deployments back this with a relational database through
//! parameterized queries; [`MemoryStore`] backs simulation and tests.
//! Every mutation commits as it happens, so reconciliation re-checks state
//! before inserting rather than relying on transactions.

use crate::error::Result;
use crate::types::{ForecastSample, JobId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A persisted capacity request, keyed by the provider request identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Provider-side request id (spot request id, or instance id for on-demand)
    pub request_id: String,
    pub tenant: i64,
    /// The job this request currently serves
    pub job_id: JobId,
    pub instance_type_id: i64,
    pub instance_type: String,
    pub zone: String,
    pub bid: f64,
    pub ondemand: bool,
    pub request_time: DateTime<Utc>,
    /// Predicted near-term price recorded for offline evaluation
    pub near_term: Option<f64>,
    /// Predicted price at the job-duration horizon
    pub horizon: Option<f64>,
    /// Set once the request has been cancelled at the provider
    pub cancelled_time: Option<DateTime<Utc>>,
}

/// A fulfilled instance, created only once its request has been matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub instance_id: String,
    /// Back-reference to the originating request
    pub request_id: String,
    pub fulfilled_time: DateTime<Utc>,
    pub terminate_time: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
}

/// Audit record of one request migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub request_id: String,
    pub from_job: JobId,
    pub to_job: JobId,
    pub migration_time: DateTime<Utc>,
}

/// Launch-timing statistics: how long a request took to become an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchStat {
    pub request_id: String,
    pub instance_type: String,
    pub zone: String,
    pub bid: f64,
    pub request_time: DateTime<Utc>,
    pub instance_id: Option<String>,
    pub fulfilled_time: Option<DateTime<Utc>>,
}

/// Row-level operations the engine needs from durable storage.
#[async_trait]
pub trait ProvisionStore: Send + Sync {
    /// Persist a newly submitted request.
    async fn insert_request(&self, record: RequestRecord) -> Result<()>;

    /// All persisted requests currently assigned to a job.
    async fn requests_for_job(&self, tenant: i64, job_id: &JobId) -> Result<Vec<RequestRecord>>;

    /// Persisted requests matching a set of provider request ids.
    async fn requests_by_ids(&self, tenant: i64, ids: &[String]) -> Result<Vec<RequestRecord>>;

    /// Point a request at a different job.
    async fn reassign_request(&self, request_id: &str, to_job: &JobId) -> Result<()>;

    /// Mark a request cancelled; only the first report sticks.
    async fn record_cancellation(&self, request_id: &str, time: DateTime<Utc>) -> Result<()>;

    /// Write a migration audit record.
    async fn insert_migration(&self, record: MigrationRecord) -> Result<()>;

    /// The resource fulfilled from a request, if any.
    async fn resource_for_request(&self, request_id: &str) -> Result<Option<ResourceRecord>>;

    /// Persist a fulfilled resource.
    async fn insert_resource(&self, record: ResourceRecord) -> Result<()>;

    /// Record an instance termination; only the first report for an
    /// instance sticks.
    async fn record_termination(
        &self,
        instance_id: &str,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<()>;

    /// Start a launch-stats row at request time.
    async fn insert_launch_stat(&self, stat: LaunchStat) -> Result<()>;

    /// Complete a launch-stats row once the instance appears.
    async fn complete_launch_stat(
        &self,
        request_id: &str,
        instance_id: &str,
        fulfilled_time: DateTime<Utc>,
    ) -> Result<()>;

    /// The predicted price curve for one (type, zone), sorted by horizon.
    async fn forecast_curve(
        &self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Vec<ForecastSample>>;
}

#[derive(Debug, Default)]
struct MemoryState {
    requests: Vec<RequestRecord>,
    resources: HashMap<String, ResourceRecord>,
    migrations: Vec<MigrationRecord>,
    launch_stats: Vec<LaunchStat>,
    forecasts: Vec<ForecastSample>,
}

/// In-memory store used by the simulator and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the forecast table, replacing any existing curve data.
    pub async fn load_forecasts(&self, samples: Vec<ForecastSample>) {
        self.state.lock().await.forecasts = samples;
    }

    /// Snapshot of all migration audit records.
    pub async fn migrations(&self) -> Vec<MigrationRecord> {
        self.state.lock().await.migrations.clone()
    }

    /// Snapshot of all resource rows.
    pub async fn resources(&self) -> Vec<ResourceRecord> {
        self.state.lock().await.resources.values().cloned().collect()
    }

    /// Snapshot of all launch-stat rows.
    pub async fn launch_stats(&self) -> Vec<LaunchStat> {
        self.state.lock().await.launch_stats.clone()
    }

    /// Snapshot of all persisted requests.
    pub async fn all_requests(&self) -> Vec<RequestRecord> {
        self.state.lock().await.requests.clone()
    }
}

#[async_trait]
impl ProvisionStore for MemoryStore {
    async fn insert_request(&self, record: RequestRecord) -> Result<()> {
        self.state.lock().await.requests.push(record);
        Ok(())
    }

    async fn requests_for_job(&self, tenant: i64, job_id: &JobId) -> Result<Vec<RequestRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| r.tenant == tenant && &r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn requests_by_ids(&self, tenant: i64, ids: &[String]) -> Result<Vec<RequestRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .requests
            .iter()
            .filter(|r| r.tenant == tenant && ids.contains(&r.request_id))
            .cloned()
            .collect())
    }

    async fn reassign_request(&self, request_id: &str, to_job: &JobId) -> Result<()> {
        let mut state = self.state.lock().await;
        for request in state.requests.iter_mut() {
            if request.request_id == request_id {
                request.job_id = to_job.clone();
            }
        }
        Ok(())
    }

    async fn record_cancellation(&self, request_id: &str, time: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        for request in state.requests.iter_mut() {
            if request.request_id == request_id && request.cancelled_time.is_none() {
                request.cancelled_time = Some(time);
            }
        }
        Ok(())
    }

    async fn insert_migration(&self, record: MigrationRecord) -> Result<()> {
        self.state.lock().await.migrations.push(record);
        Ok(())
    }

    async fn resource_for_request(&self, request_id: &str) -> Result<Option<ResourceRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .values()
            .find(|r| r.request_id == request_id)
            .cloned())
    }

    async fn insert_resource(&self, record: ResourceRecord) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .resources
            .entry(record.instance_id.clone())
            .or_insert(record);
        Ok(())
    }

    async fn record_termination(
        &self,
        instance_id: &str,
        time: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(resource) = state.resources.get_mut(instance_id) {
            if resource.terminate_time.is_none() {
                resource.terminate_time = Some(time);
                resource.termination_reason = Some(reason.to_string());
            }
        }
        Ok(())
    }

    async fn insert_launch_stat(&self, stat: LaunchStat) -> Result<()> {
        self.state.lock().await.launch_stats.push(stat);
        Ok(())
    }

    async fn complete_launch_stat(
        &self,
        request_id: &str,
        instance_id: &str,
        fulfilled_time: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        for stat in state.launch_stats.iter_mut() {
            if stat.request_id == request_id && stat.instance_id.is_none() {
                stat.instance_id = Some(instance_id.to_string());
                stat.fulfilled_time = Some(fulfilled_time);
            }
        }
        Ok(())
    }

    async fn forecast_curve(
        &self,
        instance_type: &str,
        zone: &str,
    ) -> Result<Vec<ForecastSample>> {
        let state = self.state.lock().await;
        let mut curve: Vec<ForecastSample> = state
            .forecasts
            .iter()
            .filter(|f| f.instance_type == instance_type && f.zone == zone)
            .cloned()
            .collect();
        curve.sort_by(|a, b| {
            a.horizon_hours
                .partial_cmp(&b.horizon_hours)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(curve)
    }
}
