//! Discrete-event simulation driver
//!
//! Runs the real decision, admission, submission, and reconciliation code
//! against the simulated cloud on a virtual clock. Each tick advances the
//! world a fixed step; the decision cycle fires on its configured period
//! just as the live loop would.

use crate::clock::Clock;
use crate::config::ProvisionerConfig;
use crate::error::Result;
use crate::provisioner::{JobSource, Provisioner, assign_jobs};
use crate::sim::cloud::{SimCloud, SimEvent};
use crate::sim::feed::{SimJobFeed, WorkloadRecord};
use crate::store::MemoryStore;
use crate::types::{InstanceType, Job, JobId, JobState, PriceSample, Tenant};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Counters accumulated over one simulation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SimulationReport {
    pub simulated_seconds: i64,
    pub ticks: u64,
    pub jobs_seen: usize,
    pub jobs_started: u64,
    pub jobs_completed: u64,
    /// Jobs whose worker was reclaimed mid-execution
    pub preemptions: u64,
    pub fulfillments: u64,
    pub requests_placed: usize,
    pub terminations: HashMap<String, u64>,
    /// The run hit the wall-clock cap before draining
    pub aborted: bool,
}

/// Drives the provisioning engine through a replayed workload and market.
pub struct SimulationEngine {
    clock: Clock,
    cloud: Arc<SimCloud>,
    feed: Arc<SimJobFeed>,
    store: Arc<MemoryStore>,
    provisioner: Provisioner,
    tenants: Vec<Tenant>,
    /// Job id -> (worker instance id, completion time)
    executing: HashMap<JobId, (String, DateTime<Utc>)>,
    finished: HashSet<JobId>,
}

impl SimulationEngine {
    pub fn new(
        config: ProvisionerConfig,
        catalog: Vec<InstanceType>,
        tenants: Vec<Tenant>,
        workload: Vec<WorkloadRecord>,
        prices: Vec<PriceSample>,
    ) -> Result<Self> {
        let clock = Clock::virtual_at(Utc::now());
        let cloud = Arc::new(SimCloud::new(
            clock.clone(),
            config.sim.clone(),
            prices,
            catalog.clone(),
        )?);
        let feed = Arc::new(SimJobFeed::new(clock.clone(), workload));
        let store = Arc::new(MemoryStore::new());
        let provisioner = Provisioner::new(
            cloud.clone(),
            store.clone(),
            feed.clone(),
            config,
            clock.clone(),
            catalog,
        );
        Ok(SimulationEngine {
            clock,
            cloud,
            feed,
            store,
            provisioner,
            tenants,
            executing: HashMap::new(),
            finished: HashSet::new(),
        })
    }

    /// The store backing the run, for seeding forecasts or inspecting
    /// records afterwards.
    pub fn store(&self) -> Arc<MemoryStore> {
        self.store.clone()
    }

    fn stamp_states(&self, queue: &mut [Job]) {
        for job in queue.iter_mut() {
            if self.finished.contains(&job.id) {
                job.state = JobState::Finished;
            } else if self.executing.contains_key(&job.id) {
                job.state = JobState::Executing;
            }
        }
    }

    /// Complete executing jobs whose time is up, freeing their workers.
    async fn finish_due_jobs(&mut self, now: DateTime<Utc>, report: &mut SimulationReport) {
        let due: Vec<(JobId, String)> = self
            .executing
            .iter()
            .filter(|(_, (_, done_at))| *done_at <= now)
            .map(|(job, (instance, _))| (job.clone(), instance.clone()))
            .collect();
        for (job_id, instance) in due {
            self.executing.remove(&job_id);
            self.finished.insert(job_id.clone());
            self.cloud.finish_job(&instance, now).await;
            report.jobs_completed += 1;
            info!("job {} completed on {}", job_id, instance);
        }
    }

    /// The negotiation stand-in: match idle workers to idle jobs they can
    /// hold and start them, scaling the recorded duration onto the
    /// worker's type.
    async fn deploy_jobs(&mut self, now: DateTime<Utc>, report: &mut SimulationReport) {
        let scaling = self.provisioner.config().sim.duration_scaling.clone();
        let catalog: Vec<_> = self.provisioner.catalog().to_vec();
        for tenant in &mut self.tenants {
            let workers = self.cloud.idle_workers(&tenant.name).await;
            let mut taken: HashSet<JobId> = HashSet::new();
            for (instance, instance_type) in workers {
                let Some(shape) = catalog.iter().find(|i| i.name == instance_type) else {
                    continue;
                };
                let Some((job_id, source_type, duration)) = tenant
                    .jobs
                    .iter()
                    .find(|j| {
                        j.state == JobState::Idle
                            && shape.meets_requirements(j)
                            && !taken.contains(&j.id)
                            && !self.executing.contains_key(&j.id)
                            && !self.finished.contains(&j.id)
                    })
                    .map(|j| (j.id.clone(), j.source_type.clone(), j.duration))
                else {
                    continue;
                };
                let factor = scaling.factor(source_type.as_deref(), &instance_type);
                let runtime = (duration * factor).max(1.0) as i64;
                self.cloud.start_job(&instance).await;
                self.executing.insert(
                    job_id.clone(),
                    (instance.clone(), now + chrono::Duration::seconds(runtime)),
                );
                tenant.remove_idle(&job_id);
                taken.insert(job_id.clone());
                report.jobs_started += 1;
                info!(
                    "job {} started on {} ({}), expected {}s",
                    job_id, instance, instance_type, runtime
                );
            }
            for job_id in &taken {
                if let Some(job) = tenant.job_mut(job_id) {
                    job.state = JobState::Executing;
                }
            }
        }
    }

    fn handle_events(&mut self, events: Vec<SimEvent>, report: &mut SimulationReport) {
        for event in events {
            match event {
                SimEvent::Fulfilled { .. } => report.fulfillments += 1,
                SimEvent::Reclaimed { instance_id, reason } => {
                    *report.terminations.entry(reason.clone()).or_insert(0) += 1;
                    let preempted = self
                        .executing
                        .iter()
                        .find(|(_, (instance, _))| instance == &instance_id)
                        .map(|(job, _)| job.clone());
                    if let Some(job_id) = preempted {
                        self.executing.remove(&job_id);
                        report.preemptions += 1;
                        warn!("job {} preempted: {} {}", job_id, instance_id, reason);
                    }
                }
            }
        }
    }

    /// Run the workload to completion, or to the wall-clock cap.
    pub async fn run(&mut self) -> Result<SimulationReport> {
        let start = self.clock.now();
        let step = self.provisioner.config().sim.step_seconds;
        let cap = self.provisioner.config().sim.wall_clock_cap;
        let run_rate = self.provisioner.config().run_rate;
        let mut last_decide = start - chrono::Duration::seconds(run_rate);
        let mut report = SimulationReport::default();

        loop {
            let now = self.clock.now();
            if (now - start).num_seconds() > cap {
                warn!("simulation hit the wall-clock cap at {}s", cap);
                report.aborted = true;
                break;
            }

            let mut queue = self.feed.global_queue().await?;
            self.stamp_states(&mut queue);
            report.jobs_seen = report.jobs_seen.max(queue.len());
            assign_jobs(&mut self.tenants, queue, now);

            self.finish_due_jobs(now, &mut report).await;

            for tenant in &mut self.tenants {
                if let Err(err) = self.provisioner.filter_tenant(tenant).await {
                    error!("admission failed for tenant {}: {}", tenant.name, err);
                }
            }

            self.deploy_jobs(now, &mut report).await;

            let events = self.cloud.step(now, &self.tenants).await;
            self.handle_events(events, &mut report);

            for tenant in &mut self.tenants {
                if let Err(err) = self.provisioner.reconcile_tenant(tenant).await {
                    error!("reconcile failed for tenant {}: {}", tenant.name, err);
                }
            }

            if (now - last_decide).num_seconds() >= run_rate {
                last_decide = now;
                for index in 0..self.tenants.len() {
                    let tenant = &mut self.tenants[index];
                    if let Err(err) = self.provisioner.refresh_spot_prices(tenant).await {
                        error!("price refresh failed for tenant {}: {}", tenant.name, err);
                        continue;
                    }
                    if let Err(err) = self.provisioner.decide_and_submit(tenant).await {
                        error!("decision failed for tenant {}: {}", tenant.name, err);
                    }
                }
            }

            let drained = self.feed.exhausted()
                && self.finished.len() == self.feed.total_jobs()
                && !self.cloud.has_live_capacity().await;
            if drained {
                info!("workload drained after {}s", (now - start).num_seconds());
                break;
            }

            self.clock.advance(step);
            report.ticks += 1;
        }

        report.simulated_seconds = (self.clock.now() - start).num_seconds();
        report.requests_placed = self.store.all_requests().await.len();
        Ok(report)
    }
}
