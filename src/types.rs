//! Core data model: tenants, jobs, instance types, and request candidates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price assigned to a candidate when a forecast lookup finds no sample,
/// so it sorts last instead of being dropped.
pub const FORECAST_MISS_PRICE: f64 = 1000.0;

/// An isolated pool with its own credentials, queue, and bidding policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    /// Store row id
    pub id: i64,
    /// Pool name, also used as the provider-side tag value
    pub name: String,
    /// Address of the pool's scheduler, used to claim jobs from the global queue
    pub scheduler_address: String,
    /// Availability zone -> subnet identifier
    pub subnets: HashMap<String, String>,
    /// Ceiling on any bid or on-demand price, USD per hour
    pub max_bid_price: f64,
    /// Spot bid as a percentage of the on-demand price
    pub bid_percent: f64,
    /// Seconds a job may stay idle before on-demand escalation kicks in (0 disables)
    pub timeout: i64,
    /// Seconds a job must be queued before it is eligible for provisioning
    pub idle_threshold: i64,
    /// Minimum seconds between successive requests for one job
    pub request_rate: i64,
    /// All jobs currently known for this tenant, reloaded each cycle
    #[serde(skip)]
    pub jobs: Vec<Job>,
    /// Jobs currently eligible for provisioning, a shrinking subset of `jobs`
    #[serde(skip)]
    pub idle_jobs: Vec<JobId>,
}

impl Tenant {
    /// Drop a job from this cycle's idle set.
    pub fn remove_idle(&mut self, job_id: &JobId) {
        self.idle_jobs.retain(|id| id != job_id);
    }

    /// Whether the job is in this cycle's idle set.
    pub fn is_idle(&self, job_id: &JobId) -> bool {
        self.idle_jobs.contains(job_id)
    }

    /// Mutable access to a job by id.
    pub fn job_mut(&mut self, job_id: &JobId) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| &j.id == job_id)
    }

    /// Shared access to a job by id.
    pub fn job(&self, job_id: &JobId) -> Option<&Job> {
        self.jobs.iter().find(|j| &j.id == job_id)
    }
}

/// Scheduler-assigned job identifier.
pub type JobId = String;

/// Job lifecycle state as tracked by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Queued, waiting for capacity
    Idle,
    /// Running on a resource
    Executing,
    /// Left the queue
    Finished,
}

/// Recognized keys of a scheduler job description.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobDescription {
    /// Job must run on an on-demand instance
    #[serde(default)]
    pub ondemand: bool,
    /// Expected execution time in seconds on the source instance type
    #[serde(default)]
    pub duration: f64,
    /// Instance type the recorded duration was measured on
    #[serde(default)]
    pub instance_type: Option<String>,
}

/// A queued unit of work observed in a tenant's scheduler queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Address of the owning tenant's scheduler
    pub tenant_address: String,
    /// When the job entered the queue
    pub queued_at: DateTime<Utc>,
    pub req_cpus: u32,
    /// Required memory in GB
    pub req_mem: u32,
    /// Required disk in GB
    pub req_disk: u32,
    /// Job requires (or has escalated to) an on-demand instance
    pub ondemand: bool,
    /// Expected execution time in seconds on `source_type`
    pub duration: f64,
    /// Instance type the duration was recorded on
    pub source_type: Option<String>,
    /// Enough capacity has been acquired for this job
    pub fulfilled: bool,
    /// Simulator lifecycle state; always `Idle` in live mode
    pub state: JobState,
    /// The request selected by the decision engine this cycle
    pub launch: Option<Candidate>,
}

impl Job {
    /// Build a job from queue data and its parsed description.
    pub fn new(
        id: impl Into<JobId>,
        tenant_address: impl Into<String>,
        queued_at: DateTime<Utc>,
        req_cpus: u32,
        req_mem: u32,
        req_disk: u32,
        description: JobDescription,
    ) -> Self {
        Job {
            id: id.into(),
            tenant_address: tenant_address.into(),
            queued_at,
            req_cpus,
            req_mem,
            req_disk,
            ondemand: description.ondemand,
            duration: description.duration,
            source_type: description.instance_type,
            fulfilled: false,
            state: JobState::Idle,
            launch: None,
        }
    }

    /// Seconds the job has been waiting in the queue.
    pub fn time_idle(&self, now: DateTime<Utc>) -> i64 {
        (now - self.queued_at).num_seconds()
    }
}

/// A catalog entry: one purchasable instance shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceType {
    /// Store row id
    pub id: i64,
    /// Provider type name, e.g. "c3.2xlarge"
    pub name: String,
    pub cpus: u32,
    /// Memory in GB
    pub memory: u32,
    /// Disk in GB
    pub disk: u32,
    /// Boot image identifier
    pub ami: String,
    /// Fixed on-demand price, USD per hour
    pub ondemand_price: f64,
    /// Current spot price per availability zone, refreshed each cycle
    #[serde(default)]
    pub spot: HashMap<String, f64>,
}

impl InstanceType {
    /// Whether this shape satisfies a job's resource requirements.
    pub fn meets_requirements(&self, job: &Job) -> bool {
        self.cpus >= job.req_cpus && self.memory >= job.req_mem && self.disk >= job.req_disk
    }
}

/// A candidate capacity request produced by the decision engine.
///
/// Becomes a live ask once the submitter places it with the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    /// Catalog id of the instance type
    pub instance_type_id: i64,
    pub instance_type: String,
    /// Availability zone; empty for on-demand
    pub zone: String,
    pub ami: String,
    pub count: u32,
    /// The bid actually placed; for on-demand asks this is the on-demand price
    pub bid: f64,
    pub ondemand: bool,
    /// On-demand price of the type, used by the escalation rules
    pub odp: f64,
    /// Ranking price: live spot price, or the forecast value in forecast modes
    pub price: f64,
    /// Current market price, used to break ranking ties between zones
    pub live_price: f64,
    /// Predicted price just past the one-hour mark, when forecasting
    pub near_term: Option<f64>,
    /// Predicted price past the job's expected duration, when forecasting
    pub horizon: Option<f64>,
}

impl Candidate {
    /// An on-demand candidate priced at the type's on-demand rate.
    pub fn ondemand(instance: &InstanceType) -> Self {
        Candidate {
            instance_type_id: instance.id,
            instance_type: instance.name.clone(),
            zone: String::new(),
            ami: instance.ami.clone(),
            count: 1,
            bid: instance.ondemand_price,
            ondemand: true,
            odp: instance.ondemand_price,
            price: instance.ondemand_price,
            live_price: instance.ondemand_price,
            near_term: None,
            horizon: None,
        }
    }

    /// A spot candidate for one (type, zone) pair at the given ranking price.
    pub fn spot(instance: &InstanceType, zone: impl Into<String>, price: f64) -> Self {
        Candidate {
            instance_type_id: instance.id,
            instance_type: instance.name.clone(),
            zone: zone.into(),
            ami: instance.ami.clone(),
            count: 1,
            bid: 0.0,
            ondemand: false,
            odp: instance.ondemand_price,
            price,
            live_price: price,
            near_term: None,
            horizon: None,
        }
    }
}

/// One observed spot market price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSample {
    pub instance_type: String,
    pub zone: String,
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// One point on a predicted price curve: the price expected to hold for
/// `horizon_hours` from now.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSample {
    pub instance_type: String,
    pub zone: String,
    pub horizon_hours: f64,
    pub price: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn catalog_entry(name: &str, cpus: u32, memory: u32, disk: u32, odp: f64) -> InstanceType {
        InstanceType {
            id: 1,
            name: name.to_string(),
            cpus,
            memory,
            disk,
            ami: "ami-test".to_string(),
            ondemand_price: odp,
            spot: HashMap::new(),
        }
    }

    pub(crate) fn small_job(id: &str) -> Job {
        Job::new(id, "pool.example.org", Utc::now(), 1, 1, 1, JobDescription::default())
    }

    #[test]
    fn requirements_check_covers_cpu_memory_and_disk() {
        let instance = catalog_entry("c3.2xlarge", 8, 15, 160, 0.42);
        let mut job = small_job("1");
        assert!(instance.meets_requirements(&job));

        job.req_cpus = 16;
        assert!(!instance.meets_requirements(&job));
        job.req_cpus = 8;
        job.req_mem = 32;
        assert!(!instance.meets_requirements(&job));
        job.req_mem = 15;
        job.req_disk = 200;
        assert!(!instance.meets_requirements(&job));
    }

    #[test]
    fn ondemand_candidate_prices_at_ondemand_rate() {
        let instance = catalog_entry("m3.2xlarge", 8, 30, 160, 0.532);
        let candidate = Candidate::ondemand(&instance);
        assert!(candidate.ondemand);
        assert_eq!(candidate.price, 0.532);
        assert_eq!(candidate.bid, 0.532);
        assert!(candidate.zone.is_empty());
    }

    #[test]
    fn idle_time_is_relative_to_queue_entry() {
        let mut job = small_job("2");
        job.queued_at = Utc::now() - chrono::Duration::seconds(700);
        assert!(job.time_idle(Utc::now()) >= 700);
    }
}
