//! Reconciler
//!
//! Aligns durable state with what the provider actually did: records
//! fulfillments and terminations, then re-homes or cancels requests whose
//! job no longer needs them. Every step is idempotent, so a crashed cycle
//! simply replays.

use crate::config::ProvisionerConfig;
use crate::error::Result;
use crate::provider::{CloudProvider, OpenSpotRequest, ProviderInstanceState, tag_request, with_retries};
use crate::store::{MigrationRecord, ProvisionStore, RequestRecord};
use crate::store::ResourceRecord;
use crate::types::{InstanceType, JobState, Tenant};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

/// One full reconciliation pass for a tenant.
///
/// Order matters: fulfillments are recorded before orphan handling so a
/// request that just produced an instance is never treated as open. The
/// orphan set is computed once; whatever migration cannot re-home gets
/// cancelled.
pub async fn process_resources(
    tenant: &mut Tenant,
    provider: &dyn CloudProvider,
    store: &dyn ProvisionStore,
    catalog: &[InstanceType],
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    update_database(tenant, provider, store, config, now).await?;
    let open = provider.list_open_spot_requests(tenant).await?;
    let orphans = orphaned_requests(tenant, store, &open).await?;
    let unmigrated = migrate_requests(tenant, store, catalog, orphans, now).await?;
    cancel_requests(tenant, provider, store, config, unmigrated, now).await?;
    Ok(())
}

/// Record provider-side fulfillments and terminations.
pub async fn update_database(
    tenant: &mut Tenant,
    provider: &dyn CloudProvider,
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    let instances = with_retries(&config.retry, "list instances", || {
        provider.list_instances(tenant)
    })
    .await?;

    // A record's request_id is the spot request id, or the instance id
    // itself for on-demand launches.
    let ids: Vec<String> = instances
        .iter()
        .flat_map(|i| {
            i.spot_request_id
                .iter()
                .cloned()
                .chain(std::iter::once(i.id.clone()))
        })
        .collect();
    let records = store.requests_by_ids(tenant.id, &ids).await?;

    for instance in &instances {
        let Some(record) = records.iter().find(|r| {
            Some(&r.request_id) == instance.spot_request_id.as_ref()
                || r.request_id == instance.id
        }) else {
            continue;
        };

        match instance.state {
            ProviderInstanceState::Pending | ProviderInstanceState::Running => {
                let known = store.resource_for_request(&record.request_id).await?;
                store
                    .insert_resource(ResourceRecord {
                        instance_id: instance.id.clone(),
                        request_id: record.request_id.clone(),
                        fulfilled_time: now,
                        terminate_time: None,
                        termination_reason: None,
                    })
                    .await?;
                if known.is_none() {
                    info!(
                        "request {} fulfilled by {} for job {}",
                        record.request_id, instance.id, record.job_id
                    );
                    if !record.ondemand {
                        store
                            .complete_launch_stat(&record.request_id, &instance.id, now)
                            .await?;
                        if let Err(err) =
                            tag_request(provider, &config.retry, tenant, &instance.id).await
                        {
                            error!("could not tag instance {}: {}", instance.id, err);
                        }
                    }
                }
                if let Some(job) = tenant.job_mut(&record.job_id) {
                    job.fulfilled = true;
                }
            }
            ProviderInstanceState::Terminated => {
                let reason = instance.state_reason.as_deref().unwrap_or("terminated");
                store.record_termination(&instance.id, now, reason).await?;
            }
        }
    }
    Ok(())
}

/// Open requests whose job no longer waits in the queue.
///
/// Classified by scheduler state, not by this cycle's filtered idle set:
/// the admission filter drops recently requested jobs from that set, and
/// their requests are anything but orphaned.
async fn orphaned_requests(
    tenant: &Tenant,
    store: &dyn ProvisionStore,
    open: &[OpenSpotRequest],
) -> Result<Vec<RequestRecord>> {
    let ids: Vec<String> = open.iter().map(|r| r.id.clone()).collect();
    let records = store.requests_by_ids(tenant.id, &ids).await?;
    Ok(records
        .into_iter()
        .filter(|record| {
            !tenant
                .jobs
                .iter()
                .any(|job| job.id == record.job_id && job.state == JobState::Idle)
        })
        .collect())
}

/// Re-home orphaned open requests onto idle jobs they can serve,
/// returning the orphans nothing could take over.
///
/// A claimed job leaves the idle set immediately so the decision engine
/// does not also request for it this cycle.
pub async fn migrate_requests(
    tenant: &mut Tenant,
    store: &dyn ProvisionStore,
    catalog: &[InstanceType],
    orphans: Vec<RequestRecord>,
    now: DateTime<Utc>,
) -> Result<Vec<RequestRecord>> {
    let mut unmigrated = Vec::new();
    for orphan in orphans {
        let target = catalog
            .iter()
            .find(|i| i.name == orphan.instance_type)
            .and_then(|instance| {
                tenant
                    .idle_jobs
                    .iter()
                    .filter_map(|id| tenant.job(id))
                    .find(|job| !job.fulfilled && instance.meets_requirements(job))
                    .map(|job| job.id.clone())
            });

        let Some(target) = target else {
            debug!(
                "no idle job can take over request {} ({})",
                orphan.request_id, orphan.instance_type
            );
            unmigrated.push(orphan);
            continue;
        };

        store.reassign_request(&orphan.request_id, &target).await?;
        store
            .insert_migration(MigrationRecord {
                request_id: orphan.request_id.clone(),
                from_job: orphan.job_id.clone(),
                to_job: target.clone(),
                migration_time: now,
            })
            .await?;
        info!(
            "migrated request {} from job {} to job {}",
            orphan.request_id, orphan.job_id, target
        );
        tenant.remove_idle(&target);
    }
    Ok(unmigrated)
}

/// Cancel the open requests no idle job could take over.
///
/// Each cancelled row is marked in the store so later cycles stop
/// counting it as open.
pub async fn cancel_requests(
    tenant: &Tenant,
    provider: &dyn CloudProvider,
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    orphans: Vec<RequestRecord>,
    now: DateTime<Utc>,
) -> Result<()> {
    if orphans.is_empty() {
        return Ok(());
    }

    let ids: Vec<String> = orphans.iter().map(|r| r.request_id.clone()).collect();
    info!("cancelling {} unneeded open request(s): {:?}", ids.len(), ids);
    with_retries(&config.retry, "cancel spot requests", || {
        provider.cancel_spot_requests(tenant, &ids)
    })
    .await?;
    for id in &ids {
        store.record_cancellation(id, now).await?;
    }
    Ok(())
}
