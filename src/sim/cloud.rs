//! Closed-world cloud
//!
//! Reimplements the provider capability surface over replayed spot price
//! history. Requests fulfill after sampled delays, instances walk a
//! contextualize / negotiate / work lifecycle, and reclamation follows the
//! configured termination policy plus a periodic outbid sweep.

use crate::clock::Clock;
use crate::config::{SimConfig, TerminationPolicy};
use crate::error::Result;
use crate::provider::{CloudProvider, OpenSpotRequest, ProviderInstance, ProviderInstanceState};
use crate::sim::distributions::LatencyModel;
use crate::types::{Candidate, InstanceType, Job, JobState, PriceSample, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

/// Lifecycle of a simulated instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState {
    /// Booting and configuring, not yet visible to the pool
    Contextualizing,
    /// Booted, waiting for a negotiation cycle to match it
    Unclaimed,
    /// In the pool with no work assigned
    Idle,
    /// Running a job
    Executing,
    Terminated,
}

/// What the world did during one step, for the engine to react to.
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A request produced an instance
    Fulfilled { request_id: String, instance_id: String },
    /// An instance was reclaimed; any job on it was preempted
    Reclaimed { instance_id: String, reason: String },
}

#[derive(Debug, Clone)]
struct SimRequest {
    id: String,
    tenant: String,
    instance_type: String,
    zone: String,
    bid: f64,
    ondemand: bool,
    /// Earliest time the provider will act on the request
    ready_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct SimResource {
    instance_id: String,
    /// Spot request id, or the instance id itself for on-demand
    request_id: String,
    tenant: String,
    instance_type: String,
    zone: String,
    bid: f64,
    ondemand: bool,
    state: ResourceState,
    launched_at: DateTime<Utc>,
    /// End of the current contextualize or negotiate phase
    phase_until: DateTime<Utc>,
    idle_since: DateTime<Utc>,
    terminated_reason: Option<String>,
}

struct SimState {
    latency: LatencyModel,
    open: Vec<SimRequest>,
    /// Ordered map so a replay visits resources in a stable order
    resources: BTreeMap<String, SimResource>,
    tags: HashMap<String, HashMap<String, String>>,
    last_price_check: DateTime<Utc>,
    next_id: u64,
}

impl SimState {
    /// Sequential ids keep a seeded run bit-identical.
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-sim-{:08}", self.next_id)
    }
}

/// The simulated provider. Shared with the engine through `Arc`.
pub struct SimCloud {
    clock: Clock,
    config: SimConfig,
    /// Replayed market history, sorted by timestamp per (type, zone)
    prices: Vec<PriceSample>,
    /// Instance shapes, consulted when matching workers to queued jobs
    catalog: Vec<InstanceType>,
    state: Mutex<SimState>,
}

impl SimCloud {
    pub fn new(
        clock: Clock,
        config: SimConfig,
        mut prices: Vec<PriceSample>,
        catalog: Vec<InstanceType>,
    ) -> Result<Self> {
        let latency = LatencyModel::new(&config.latency, config.seed)?;
        prices.sort_by_key(|p| p.timestamp);
        let start = clock.now();
        Ok(SimCloud {
            clock,
            config,
            prices,
            catalog,
            state: Mutex::new(SimState {
                latency,
                open: Vec::new(),
                resources: BTreeMap::new(),
                tags: HashMap::new(),
                last_price_check: start,
                next_id: 0,
            }),
        })
    }

    /// Market price for a (type, zone) at a point in the replay, or `None`
    /// before the first sample.
    fn price_at(&self, instance_type: &str, zone: &str, now: DateTime<Utc>) -> Option<f64> {
        self.prices
            .iter()
            .filter(|p| {
                p.instance_type == instance_type && p.zone == zone && p.timestamp <= now
            })
            .next_back()
            .map(|p| p.price)
    }

    /// Advance the world to `now`. Tenants are consulted so unclaimed
    /// instances only join pools that still have idle work.
    pub async fn step(&self, now: DateTime<Utc>, tenants: &[Tenant]) -> Vec<SimEvent> {
        let mut state = self.state.lock().await;
        let mut events = Vec::new();

        // Fulfill due requests. A spot request stays open while the market
        // sits above its bid, exactly like a live persistent request.
        let mut still_open = Vec::new();
        for request in std::mem::take(&mut state.open) {
            if request.ready_at > now {
                still_open.push(request);
                continue;
            }
            if !request.ondemand {
                let price = self.price_at(&request.instance_type, &request.zone, now);
                let affordable = price.map(|p| request.bid >= p).unwrap_or(false);
                if !affordable {
                    still_open.push(request);
                    continue;
                }
            }
            let instance_id = if request.ondemand {
                request.id.clone()
            } else {
                state.next_id("i")
            };
            let boot = state.latency.contextualization_delay();
            state.resources.insert(
                instance_id.clone(),
                SimResource {
                    instance_id: instance_id.clone(),
                    request_id: request.id.clone(),
                    tenant: request.tenant.clone(),
                    instance_type: request.instance_type.clone(),
                    zone: request.zone.clone(),
                    bid: request.bid,
                    ondemand: request.ondemand,
                    state: ResourceState::Contextualizing,
                    launched_at: now,
                    phase_until: now + chrono::Duration::seconds(boot),
                    idle_since: now,
                    terminated_reason: None,
                },
            );
            events.push(SimEvent::Fulfilled {
                request_id: request.id,
                instance_id,
            });
        }
        state.open = still_open;

        // Lifecycle transitions.
        let ids: Vec<String> = state.resources.keys().cloned().collect();
        for id in &ids {
            let (res_state, phase_until, tenant_name, type_name) = {
                let r = &state.resources[id];
                (r.state, r.phase_until, r.tenant.clone(), r.instance_type.clone())
            };
            match res_state {
                ResourceState::Contextualizing if phase_until <= now => {
                    let wait = state.latency.negotiation_delay();
                    if let Some(r) = state.resources.get_mut(id) {
                        r.state = ResourceState::Unclaimed;
                        r.phase_until = now + chrono::Duration::seconds(wait);
                    }
                }
                ResourceState::Unclaimed if phase_until <= now => {
                    // Matches only when the tenant's queue holds an idle job
                    // this worker's shape can actually run, like a real
                    // negotiation cycle evaluating machine ads.
                    let shape = self.catalog.iter().find(|i| i.name == type_name);
                    let has_work = tenants
                        .iter()
                        .find(|t| t.name == tenant_name)
                        .map(|t| {
                            t.jobs.iter().any(|j| {
                                j.state == JobState::Idle
                                    && shape.map(|i| i.meets_requirements(j)).unwrap_or(false)
                            })
                        })
                        .unwrap_or(false);
                    let wait = state.latency.negotiation_delay();
                    if let Some(r) = state.resources.get_mut(id) {
                        if has_work {
                            r.state = ResourceState::Idle;
                            r.idle_since = now;
                        } else {
                            // Nothing to match; wait out another cycle.
                            r.phase_until = now + chrono::Duration::seconds(wait);
                        }
                    }
                }
                _ => {}
            }
        }

        // Reclamation.
        let lifetime = self.config.lifetime_seconds;
        for id in &ids {
            let Some(r) = state.resources.get(id) else { continue };
            if matches!(r.state, ResourceState::Executing | ResourceState::Terminated) {
                continue;
            }
            let elapsed = (now - r.launched_at).num_seconds();
            let reclaim = match self.config.termination {
                TerminationPolicy::Hourly => elapsed % 3600 >= lifetime,
                TerminationPolicy::FixedLifetime => elapsed >= lifetime,
                TerminationPolicy::IdleTimeout => {
                    r.state == ResourceState::Idle
                        && (now - r.idle_since).num_seconds() >= self.config.idle_reclaim_seconds
                }
            };
            if reclaim {
                let reason = match self.config.termination {
                    TerminationPolicy::IdleTimeout => "idle",
                    _ => "lifetime",
                };
                if let Some(r) = state.resources.get_mut(id) {
                    r.state = ResourceState::Terminated;
                    r.terminated_reason = Some(reason.to_string());
                }
                debug!("reclaimed {} ({})", id, reason);
                events.push(SimEvent::Reclaimed {
                    instance_id: id.clone(),
                    reason: reason.to_string(),
                });
            }
        }

        // Outbid sweep, on its own cadence, against every live spot
        // instance including executing ones.
        if (now - state.last_price_check).num_seconds() >= self.config.price_check_seconds {
            state.last_price_check = now;
            for id in &ids {
                let Some(r) = state.resources.get(id) else { continue };
                if r.ondemand || r.state == ResourceState::Terminated {
                    continue;
                }
                let outbid = self
                    .price_at(&r.instance_type, &r.zone, now)
                    .map(|p| p > r.bid)
                    .unwrap_or(false);
                if outbid {
                    if let Some(r) = state.resources.get_mut(id) {
                        r.state = ResourceState::Terminated;
                        r.terminated_reason = Some("outbid".to_string());
                    }
                    debug!("reclaimed {} (outbid)", id);
                    events.push(SimEvent::Reclaimed {
                        instance_id: id.clone(),
                        reason: "outbid".to_string(),
                    });
                }
            }
        }

        events
    }

    /// Idle workers in a tenant's pool: (instance id, instance type).
    pub async fn idle_workers(&self, tenant: &str) -> Vec<(String, String)> {
        let state = self.state.lock().await;
        state
            .resources
            .values()
            .filter(|r| r.tenant == tenant && r.state == ResourceState::Idle)
            .map(|r| (r.instance_id.clone(), r.instance_type.clone()))
            .collect()
    }

    /// Mark a worker as running a job.
    pub async fn start_job(&self, instance_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(r) = state.resources.get_mut(instance_id) {
            if r.state == ResourceState::Idle {
                r.state = ResourceState::Executing;
            }
        }
    }

    /// Return a worker to the idle pool after its job completes.
    pub async fn finish_job(&self, instance_id: &str, now: DateTime<Utc>) {
        let mut state = self.state.lock().await;
        if let Some(r) = state.resources.get_mut(instance_id) {
            if r.state == ResourceState::Executing {
                r.state = ResourceState::Idle;
                r.idle_since = now;
            }
        }
    }

    /// Whether any request or non-terminated instance remains.
    pub async fn has_live_capacity(&self) -> bool {
        let state = self.state.lock().await;
        !state.open.is_empty()
            || state
                .resources
                .values()
                .any(|r| r.state != ResourceState::Terminated)
    }
}

#[async_trait]
impl CloudProvider for SimCloud {
    async fn submit_spot_request(
        &self,
        tenant: &Tenant,
        candidate: &Candidate,
        _job: &Job,
    ) -> Result<Vec<String>> {
        let mut state = self.state.lock().await;
        let delay = state.latency.fulfillment_delay();
        let id = state.next_id("sir");
        state.open.push(SimRequest {
            id: id.clone(),
            tenant: tenant.name.clone(),
            instance_type: candidate.instance_type.clone(),
            zone: candidate.zone.clone(),
            bid: candidate.bid,
            ondemand: false,
            ready_at: self.clock.now() + chrono::Duration::seconds(delay),
        });
        Ok(vec![id])
    }

    async fn submit_on_demand(
        &self,
        tenant: &Tenant,
        candidate: &Candidate,
        _job: &Job,
    ) -> Result<String> {
        let mut state = self.state.lock().await;
        let delay = state.latency.fulfillment_delay();
        let id = state.next_id("i");
        state.open.push(SimRequest {
            id: id.clone(),
            tenant: tenant.name.clone(),
            instance_type: candidate.instance_type.clone(),
            zone: candidate.zone.clone(),
            bid: candidate.odp,
            ondemand: true,
            ready_at: self.clock.now() + chrono::Duration::seconds(delay),
        });
        Ok(id)
    }

    async fn cancel_spot_requests(&self, _tenant: &Tenant, request_ids: &[String]) -> Result<()> {
        let mut state = self.state.lock().await;
        state.open.retain(|r| !request_ids.contains(&r.id));
        Ok(())
    }

    async fn list_instances(&self, tenant: &Tenant) -> Result<Vec<ProviderInstance>> {
        let state = self.state.lock().await;
        Ok(state
            .resources
            .values()
            .filter(|r| r.tenant == tenant.name)
            .map(|r| ProviderInstance {
                id: r.instance_id.clone(),
                spot_request_id: (!r.ondemand).then(|| r.request_id.clone()),
                state: match r.state {
                    ResourceState::Contextualizing => ProviderInstanceState::Pending,
                    ResourceState::Terminated => ProviderInstanceState::Terminated,
                    _ => ProviderInstanceState::Running,
                },
                launch_time: r.launched_at,
                state_reason: r.terminated_reason.clone(),
            })
            .collect())
    }

    async fn list_open_spot_requests(&self, tenant: &Tenant) -> Result<Vec<OpenSpotRequest>> {
        let state = self.state.lock().await;
        Ok(state
            .open
            .iter()
            .filter(|r| !r.ondemand && r.tenant == tenant.name)
            .map(|r| OpenSpotRequest {
                id: r.id.clone(),
                instance_type: r.instance_type.clone(),
                zone: r.zone.clone(),
                bid: r.bid,
            })
            .collect())
    }

    async fn tag_resource(&self, _tenant: &Tenant, id: &str, key: &str, value: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .tags
            .entry(id.to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn spot_price_history(
        &self,
        _tenant: &Tenant,
        instance_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>> {
        Ok(self
            .prices
            .iter()
            .filter(|p| {
                p.instance_type == instance_type && p.timestamp >= start && p.timestamp <= end
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InstanceType, JobDescription};

    fn catalog_type() -> InstanceType {
        InstanceType {
            id: 1,
            name: "c3.2xlarge".to_string(),
            cpus: 8,
            memory: 15,
            disk: 160,
            ami: "ami-test".to_string(),
            ondemand_price: 0.42,
            spot: HashMap::new(),
        }
    }

    fn tenant() -> Tenant {
        Tenant {
            id: 1,
            name: "pool-a".to_string(),
            scheduler_address: "pool-a.example.org".to_string(),
            subnets: HashMap::new(),
            max_bid_price: 1.0,
            bid_percent: 50.0,
            timeout: 600,
            idle_threshold: 0,
            request_rate: 120,
            jobs: vec![job()],
            idle_jobs: vec!["job-1".to_string()],
        }
    }

    fn sample(at: DateTime<Utc>, price: f64) -> PriceSample {
        PriceSample {
            instance_type: "c3.2xlarge".to_string(),
            zone: "us-east-1a".to_string(),
            timestamp: at,
            price,
        }
    }

    fn job() -> Job {
        Job::new(
            "job-1",
            "pool-a.example.org",
            Utc::now(),
            1,
            1,
            1,
            JobDescription::default(),
        )
    }

    async fn advance_until_idle(cloud: &SimCloud, clock: &Clock, tenant: &Tenant) -> String {
        // Generous bound; sampled delays total a few minutes at most.
        for _ in 0..4000 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(tenant)).await;
            let idle = cloud.idle_workers(&tenant.name).await;
            if let Some((id, _)) = idle.into_iter().next() {
                return id;
            }
        }
        panic!("instance never reached the idle pool");
    }

    #[tokio::test]
    async fn spot_request_fulfills_and_joins_the_pool() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![sample(start - chrono::Duration::hours(1), 0.20)],
            vec![catalog_type()],
        )
        .unwrap();
        let tenant = tenant();
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;

        let ids = cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();
        assert_eq!(ids.len(), 1);

        let instance = advance_until_idle(&cloud, &clock, &tenant).await;
        let listed = cloud.list_instances(&tenant).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, instance);
        assert_eq!(listed[0].spot_request_id.as_deref(), Some(ids[0].as_str()));
        assert!(cloud.list_open_spot_requests(&tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn underbid_request_waits_for_the_price_to_drop() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![
                sample(start - chrono::Duration::hours(1), 0.50),
                sample(start + chrono::Duration::seconds(600), 0.10),
            ],
            vec![catalog_type()],
        )
        .unwrap();
        let tenant = tenant();
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.50);
        candidate.bid = 0.30;

        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();

        // Market above the bid: the request stays open.
        for _ in 0..100 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(&tenant)).await;
        }
        assert_eq!(cloud.list_open_spot_requests(&tenant).await.unwrap().len(), 1);
        assert!(cloud.list_instances(&tenant).await.unwrap().is_empty());

        // After the drop it fulfills.
        advance_until_idle(&cloud, &clock, &tenant).await;
    }

    #[tokio::test]
    async fn hourly_policy_reclaims_near_the_hour_boundary() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![sample(start - chrono::Duration::hours(1), 0.20)],
            vec![catalog_type()],
        )
        .unwrap();
        let tenant = tenant();
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;
        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();
        advance_until_idle(&cloud, &clock, &tenant).await;

        // Idle through to the last two minutes of the instance hour.
        let mut reclaimed = Vec::new();
        for _ in 0..1800 {
            clock.advance(2);
            reclaimed.extend(cloud.step(clock.now(), std::slice::from_ref(&tenant)).await);
        }
        assert!(reclaimed.iter().any(|e| matches!(
            e,
            SimEvent::Reclaimed { reason, .. } if reason == "lifetime"
        )));
        let listed = cloud.list_instances(&tenant).await.unwrap();
        assert_eq!(listed[0].state, ProviderInstanceState::Terminated);
    }

    #[tokio::test]
    async fn executing_instances_survive_lifetime_reclaim_but_not_outbid() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![
                sample(start - chrono::Duration::hours(1), 0.20),
                sample(start + chrono::Duration::seconds(4000), 0.90),
            ],
            vec![catalog_type()],
        )
        .unwrap();
        let tenant = tenant();
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;
        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();
        let instance = advance_until_idle(&cloud, &clock, &tenant).await;
        cloud.start_job(&instance).await;

        // Executing through the hour boundary: no lifetime reclaim.
        let mut events = Vec::new();
        while (clock.now() - start).num_seconds() < 3900 {
            clock.advance(2);
            events.extend(cloud.step(clock.now(), std::slice::from_ref(&tenant)).await);
        }
        assert!(events.is_empty());

        // The price spike at 4000s outbids it even while executing.
        while (clock.now() - start).num_seconds() < 4200 {
            clock.advance(2);
            events.extend(cloud.step(clock.now(), std::slice::from_ref(&tenant)).await);
        }
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::Reclaimed { instance_id, reason } if instance_id == &instance && reason == "outbid"
        )));
    }

    #[tokio::test]
    async fn unclaimed_worker_waits_for_idle_work_without_hanging() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![sample(start - chrono::Duration::hours(1), 0.20)],
            vec![catalog_type()],
        )
        .unwrap();
        let mut tenant = tenant();
        tenant.jobs.clear(); // no idle work in the queue
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;
        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();

        // Several negotiation cycles pass without a match.
        for _ in 0..300 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(&tenant)).await;
        }
        assert!(cloud.idle_workers(&tenant.name).await.is_empty());
        assert_eq!(cloud.list_instances(&tenant).await.unwrap().len(), 1);

        // Work arrives; the next negotiation cycle claims the worker.
        tenant.jobs.push(job());
        for _ in 0..200 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(&tenant)).await;
            if !cloud.idle_workers(&tenant.name).await.is_empty() {
                return;
            }
        }
        panic!("worker never joined the pool after work arrived");
    }

    #[tokio::test]
    async fn undersized_worker_is_never_matched_to_a_bigger_job() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let cloud = SimCloud::new(
            clock.clone(),
            SimConfig::default(),
            vec![sample(start - chrono::Duration::hours(1), 0.20)],
            vec![catalog_type()],
        )
        .unwrap();
        let mut tenant = tenant();
        // The only queued job wants 64 cpus; the 8-cpu worker cannot run it.
        tenant.jobs.clear();
        tenant.jobs.push(Job::new(
            "job-big",
            "pool-a.example.org",
            Utc::now(),
            64,
            1,
            1,
            JobDescription::default(),
        ));
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;
        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();

        for _ in 0..500 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(&tenant)).await;
        }
        assert!(cloud.idle_workers(&tenant.name).await.is_empty());

        // A job the shape can run gets claimed.
        tenant.jobs.push(job());
        for _ in 0..200 {
            clock.advance(2);
            cloud.step(clock.now(), std::slice::from_ref(&tenant)).await;
            if !cloud.idle_workers(&tenant.name).await.is_empty() {
                return;
            }
        }
        panic!("worker never matched the runnable job");
    }

    #[tokio::test]
    async fn idle_timeout_policy_reclaims_idle_workers() {
        let start = Utc::now();
        let clock = Clock::virtual_at(start);
        let mut config = SimConfig::default();
        config.termination = TerminationPolicy::IdleTimeout;
        let cloud = SimCloud::new(
            clock.clone(),
            config,
            vec![sample(start - chrono::Duration::hours(1), 0.20)],
            vec![catalog_type()],
        )
        .unwrap();
        let tenant = tenant();
        let mut candidate = Candidate::spot(&catalog_type(), "us-east-1a", 0.20);
        candidate.bid = 0.30;
        cloud
            .submit_spot_request(&tenant, &candidate, &job())
            .await
            .unwrap();
        advance_until_idle(&cloud, &clock, &tenant).await;

        let mut events = Vec::new();
        for _ in 0..400 {
            clock.advance(2);
            events.extend(cloud.step(clock.now(), std::slice::from_ref(&tenant)).await);
        }
        assert!(events.iter().any(|e| matches!(
            e,
            SimEvent::Reclaimed { reason, .. } if reason == "idle"
        )));
    }
}
