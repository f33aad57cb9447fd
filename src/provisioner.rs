//! Provisioner orchestration
//!
//! Owns one cycle: pull the global queue, assign jobs to tenants, refresh
//! spot prices, reconcile, filter, decide, submit. A failure in one
//! tenant's pass is logged and never stops the others.

use crate::admission;
use crate::clock::Clock;
use crate::config::ProvisionerConfig;
use crate::decision;
use crate::error::Result;
use crate::provider::CloudProvider;
use crate::reconcile;
use crate::store::ProvisionStore;
use crate::submit;
use crate::types::{InstanceType, Job, JobState, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Where queued jobs come from: a live scheduler query, or the simulator's
/// workload feed.
#[async_trait]
pub trait JobSource: Send + Sync {
    /// Every queued job across all schedulers, as of now.
    async fn global_queue(&self) -> Result<Vec<Job>>;
}

/// Distribute the global queue onto tenants by scheduler address and
/// rebuild each tenant's idle set.
///
/// A job is idle-eligible once it has waited past the tenant's idle
/// threshold; younger jobs usually find capacity already coming.
pub fn assign_jobs(tenants: &mut [Tenant], queue: Vec<Job>, now: DateTime<Utc>) {
    for tenant in tenants.iter_mut() {
        tenant.jobs.clear();
        tenant.idle_jobs.clear();
    }
    for job in queue {
        let Some(tenant) = tenants
            .iter_mut()
            .find(|t| t.scheduler_address == job.tenant_address)
        else {
            debug!("job {} references unknown scheduler {}", job.id, job.tenant_address);
            continue;
        };
        if job.state == JobState::Idle && job.time_idle(now) >= tenant.idle_threshold {
            tenant.idle_jobs.push(job.id.clone());
        }
        tenant.jobs.push(job);
    }
}

/// The decision-and-reconciliation engine, generic over its provider,
/// store, and job source.
pub struct Provisioner {
    provider: Arc<dyn CloudProvider>,
    store: Arc<dyn ProvisionStore>,
    source: Arc<dyn JobSource>,
    config: ProvisionerConfig,
    clock: Clock,
    catalog: Vec<InstanceType>,
}

impl Provisioner {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        store: Arc<dyn ProvisionStore>,
        source: Arc<dyn JobSource>,
        config: ProvisionerConfig,
        clock: Clock,
        catalog: Vec<InstanceType>,
    ) -> Self {
        Provisioner {
            provider,
            store,
            source,
            config,
            clock,
            catalog,
        }
    }

    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &[InstanceType] {
        &self.catalog
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Refresh the per-zone spot price of every catalog type, polling the
    /// provider with bounded concurrency. The newest sample per zone wins.
    ///
    /// Prices are market-wide; the tenant only supplies the credentials
    /// for the poll, so one refresh per cycle is enough for everyone.
    pub async fn refresh_spot_prices(&mut self, tenant: &Tenant) -> Result<()> {
        let now = self.clock.now();
        let start = now - chrono::Duration::minutes(10);

        let provider = &self.provider;
        let samples: Vec<_> = futures::stream::iter(self.catalog.iter().map(|instance| {
            let name = instance.name.clone();
            async move {
                let history = provider
                    .spot_price_history(tenant, &name, start, now)
                    .await;
                (name, history)
            }
        }))
        .buffer_unordered(self.config.poll_concurrency)
        .collect()
        .await;

        for (name, history) in samples {
            let history = match history {
                Ok(history) => history,
                Err(err) => {
                    error!("price poll failed for {}: {}", name, err);
                    continue;
                }
            };
            let mut latest: HashMap<String, (DateTime<Utc>, f64)> = HashMap::new();
            for sample in history {
                let entry = latest
                    .entry(sample.zone.clone())
                    .or_insert((sample.timestamp, sample.price));
                if sample.timestamp >= entry.0 {
                    *entry = (sample.timestamp, sample.price);
                }
            }
            if let Some(instance) = self.catalog.iter_mut().find(|i| i.name == name) {
                instance.spot = latest.into_iter().map(|(z, (_, p))| (z, p)).collect();
            }
        }
        Ok(())
    }

    /// Reconcile one tenant against the provider.
    pub async fn reconcile_tenant(&self, tenant: &mut Tenant) -> Result<()> {
        reconcile::process_resources(
            tenant,
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.catalog,
            &self.config,
            self.clock.now(),
        )
        .await
    }

    /// Narrow one tenant's idle set through the admission filter.
    pub async fn filter_tenant(&self, tenant: &mut Tenant) -> Result<()> {
        let now = self.clock.now();
        admission::ignore_fulfilled_jobs(
            tenant,
            self.store.as_ref(),
            &self.catalog,
            &self.config,
            now,
        )
        .await?;
        admission::stop_over_requesting(tenant, self.store.as_ref(), &self.config, now).await
    }

    /// Run the decision engine and place the selected requests.
    pub async fn decide_and_submit(&self, tenant: &mut Tenant) -> Result<()> {
        let now = self.clock.now();
        decision::select_instance_types(
            tenant,
            &self.catalog,
            self.store.as_ref(),
            &self.config,
            now,
        )
        .await?;
        submit::request_resources(
            tenant,
            self.provider.as_ref(),
            self.store.as_ref(),
            &self.config,
            now,
        )
        .await
    }

    /// One full cycle over all tenants.
    pub async fn run_cycle(&mut self, tenants: &mut [Tenant]) -> Result<()> {
        let queue = self.source.global_queue().await?;
        assign_jobs(tenants, queue, self.clock.now());

        for index in 0..tenants.len() {
            let tenant = &mut tenants[index];
            if let Err(err) = self.cycle_tenant_inner(tenant).await {
                error!("cycle failed for tenant {}: {}", tenant.name, err);
            }
        }
        Ok(())
    }

    async fn cycle_tenant_inner(&mut self, tenant: &mut Tenant) -> Result<()> {
        self.reconcile_tenant(tenant).await?;
        self.filter_tenant(tenant).await?;
        self.refresh_spot_prices(tenant).await?;
        self.decide_and_submit(tenant).await
    }

    /// Run cycles on the configured period until `shutdown` flips.
    ///
    /// The sleep is drift-compensated: a slow cycle shortens the wait
    /// instead of pushing every later cycle back.
    pub async fn run(
        &mut self,
        tenants: &mut [Tenant],
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let period = std::time::Duration::from_secs(self.config.run_rate.max(1) as u64);
        info!("provisioner running every {:?}", period);
        loop {
            let started = tokio::time::Instant::now();
            if let Err(err) = self.run_cycle(tenants).await {
                error!("cycle failed: {}", err);
            }

            let wait = period.saturating_sub(started.elapsed());
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("provisioner shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}
