//! Admission filter
//!
//! Narrows each tenant's idle-job set before the decision engine runs:
//! fulfilled jobs drop out, recently requested jobs wait, and jobs at the
//! outstanding-request cap are held back.

use crate::config::ProvisionerConfig;
use crate::error::Result;
use crate::store::{ProvisionStore, RequestRecord, ResourceRecord};
use crate::types::{InstanceType, JobState, Tenant};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

fn cpus_for(catalog: &[InstanceType], type_name: &str) -> u32 {
    catalog
        .iter()
        .find(|i| i.name == type_name)
        .map(|i| i.cpus)
        .unwrap_or(0)
}

/// Fulfilled requests for a job: each persisted request paired with its
/// resource, newest request first.
async fn fulfilled_requests(
    store: &dyn ProvisionStore,
    tenant: &Tenant,
    job_id: &str,
) -> Result<Vec<(RequestRecord, ResourceRecord)>> {
    let mut rows = Vec::new();
    for request in store.requests_for_job(tenant.id, &job_id.to_string()).await? {
        if let Some(resource) = store.resource_for_request(&request.request_id).await? {
            rows.push((request, resource));
        }
    }
    rows.sort_by(|a, b| b.0.request_time.cmp(&a.0.request_time));
    Ok(rows)
}

/// Open requests for a job: persisted requests that were not cancelled
/// and have no resource yet.
pub async fn open_requests(
    store: &dyn ProvisionStore,
    tenant: &Tenant,
    job_id: &str,
) -> Result<Vec<RequestRecord>> {
    let mut rows = Vec::new();
    for request in store.requests_for_job(tenant.id, &job_id.to_string()).await? {
        if request.cancelled_time.is_none()
            && store.resource_for_request(&request.request_id).await?.is_none()
        {
            rows.push(request);
        }
    }
    Ok(rows)
}

/// Drop jobs from the idle set once enough capacity has been acquired.
///
/// A job is fulfilled when the cpus of its fulfilled instances cover its
/// request, or when any on-demand instance is linked. If the most recent
/// fulfilling instance was acquired longer than the revocation window ago
/// and the job is still idle, the instance evidently died before the
/// scheduler recorded a start: the flag reverts and the job re-enters the
/// idle set next cycle.
pub async fn ignore_fulfilled_jobs(
    tenant: &mut Tenant,
    store: &dyn ProvisionStore,
    catalog: &[InstanceType],
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    for job_id in tenant.idle_jobs.clone() {
        let Some(job) = tenant.job(&job_id) else {
            continue;
        };
        if job.state != JobState::Idle {
            continue;
        }
        let req_cpus = job.req_cpus;

        let fulfilled = match fulfilled_requests(store, tenant, &job_id).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("store lookup failed for job {}: {}", job_id, err);
                continue;
            }
        };

        let revoked = fulfilled
            .first()
            .map(|(request, _)| (now - request.request_time).num_seconds() > config.revocation_window)
            .unwrap_or(false);

        let fulfilled_cpus: u32 = fulfilled
            .iter()
            .map(|(request, _)| cpus_for(catalog, &request.instance_type))
            .sum();
        let ondemand_fulfilled = fulfilled.iter().any(|(request, _)| request.ondemand);

        if let Some(job) = tenant.job_mut(&job_id) {
            if revoked && !ondemand_fulfilled {
                debug!("job {} had its capacity revoked, back to idle", job_id);
                job.fulfilled = false;
            } else if ondemand_fulfilled || fulfilled_cpus >= req_cpus {
                job.fulfilled = true;
            }
        }
    }

    let fulfilled_ids: Vec<_> = tenant
        .idle_jobs
        .iter()
        .filter(|id| tenant.job(id).map(|j| j.fulfilled).unwrap_or(false))
        .cloned()
        .collect();
    for id in fulfilled_ids {
        tenant.remove_idle(&id);
    }
    Ok(())
}

/// Hold back jobs that were asked for too recently or that sit at the
/// outstanding-request cap.
pub async fn stop_over_requesting(
    tenant: &mut Tenant,
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    for job_id in tenant.idle_jobs.clone() {
        if tenant
            .job(&job_id)
            .map(|j| j.state != JobState::Idle)
            .unwrap_or(true)
        {
            continue;
        }

        let open = match open_requests(store, tenant, &job_id).await {
            Ok(rows) => rows,
            Err(err) => {
                warn!("store lookup failed for job {}: {}", job_id, err);
                continue;
            }
        };

        let recently_requested = open
            .iter()
            .any(|r| (now - r.request_time).num_seconds() <= tenant.request_rate);
        if recently_requested {
            debug!("job {} requested within the rate window, holding back", job_id);
            tenant.remove_idle(&job_id);
            continue;
        }

        if open.len() >= config.max_requests {
            warn!(
                "job {} capped at {} outstanding requests, holding back",
                job_id, config.max_requests
            );
            tenant.remove_idle(&job_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{Job, JobDescription};
    use std::collections::HashMap;

    fn tenant_with_job(job: Job) -> Tenant {
        let id = job.id.clone();
        Tenant {
            id: 1,
            name: "pool-a".to_string(),
            scheduler_address: "pool-a.example.org".to_string(),
            subnets: HashMap::new(),
            max_bid_price: 1.0,
            bid_percent: 50.0,
            timeout: 600,
            idle_threshold: 120,
            request_rate: 120,
            jobs: vec![job],
            idle_jobs: vec![id],
        }
    }

    fn job(id: &str, cpus: u32) -> Job {
        let mut job = Job::new(
            id,
            "pool-a.example.org",
            Utc::now(),
            cpus,
            1,
            1,
            JobDescription::default(),
        );
        job.queued_at = Utc::now() - chrono::Duration::seconds(300);
        job
    }

    fn request(id: &str, job: &str, cpus_type: &str, age_seconds: i64, ondemand: bool) -> RequestRecord {
        RequestRecord {
            request_id: id.to_string(),
            tenant: 1,
            job_id: job.to_string(),
            instance_type_id: 1,
            instance_type: cpus_type.to_string(),
            zone: "us-east-1a".to_string(),
            bid: 0.30,
            ondemand,
            request_time: Utc::now() - chrono::Duration::seconds(age_seconds),
            near_term: None,
            horizon: None,
            cancelled_time: None,
        }
    }

    fn resource(instance: &str, request: &str) -> ResourceRecord {
        ResourceRecord {
            instance_id: instance.to_string(),
            request_id: request.to_string(),
            fulfilled_time: Utc::now(),
            terminate_time: None,
            termination_reason: None,
        }
    }

    fn catalog() -> Vec<InstanceType> {
        vec![InstanceType {
            id: 1,
            name: "c3.2xlarge".to_string(),
            cpus: 8,
            memory: 15,
            disk: 160,
            ami: "ami-test".to_string(),
            ondemand_price: 0.42,
            spot: HashMap::new(),
        }]
    }

    #[tokio::test]
    async fn cpu_sum_fulfillment_removes_job_from_idle_set() {
        let store = MemoryStore::new();
        store.insert_request(request("sir-1", "job-1", "c3.2xlarge", 30, false)).await.unwrap();
        store.insert_resource(resource("i-1", "sir-1")).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 8));
        let config = ProvisionerConfig::default();
        ignore_fulfilled_jobs(&mut tenant, &store, &catalog(), &config, Utc::now())
            .await
            .unwrap();

        assert!(tenant.idle_jobs.is_empty());
        assert!(tenant.jobs[0].fulfilled);
    }

    #[tokio::test]
    async fn stale_fulfillment_reverts_the_flag() {
        let store = MemoryStore::new();
        // Fulfilled 700s after the request was made; job is still idle,
        // so the instance must have died.
        store.insert_request(request("sir-1", "job-1", "c3.2xlarge", 700, false)).await.unwrap();
        store.insert_resource(resource("i-1", "sir-1")).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 8));
        tenant.jobs[0].fulfilled = true;
        let config = ProvisionerConfig::default();
        ignore_fulfilled_jobs(&mut tenant, &store, &catalog(), &config, Utc::now())
            .await
            .unwrap();

        assert!(!tenant.jobs[0].fulfilled);
        assert_eq!(tenant.idle_jobs.len(), 1);
    }

    #[tokio::test]
    async fn recent_open_request_rate_limits_the_job() {
        let store = MemoryStore::new();
        store.insert_request(request("sir-1", "job-1", "c3.2xlarge", 30, false)).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 1));
        let config = ProvisionerConfig::default();
        stop_over_requesting(&mut tenant, &store, &config, Utc::now())
            .await
            .unwrap();

        assert!(tenant.idle_jobs.is_empty());
    }

    #[tokio::test]
    async fn request_cap_holds_back_the_job() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store
                .insert_request(request(&format!("sir-{n}"), "job-1", "c3.2xlarge", 500, false))
                .await
                .unwrap();
        }

        let mut tenant = tenant_with_job(job("job-1", 1));
        let config = ProvisionerConfig::default();
        stop_over_requesting(&mut tenant, &store, &config, Utc::now())
            .await
            .unwrap();

        assert!(tenant.idle_jobs.is_empty());
    }

    #[tokio::test]
    async fn old_open_requests_below_cap_leave_the_job_idle() {
        let store = MemoryStore::new();
        store.insert_request(request("sir-1", "job-1", "c3.2xlarge", 500, false)).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 1));
        let config = ProvisionerConfig::default();
        stop_over_requesting(&mut tenant, &store, &config, Utc::now())
            .await
            .unwrap();

        assert_eq!(tenant.idle_jobs.len(), 1);
    }

    #[tokio::test]
    async fn cancelled_requests_do_not_count_against_the_cap() {
        let store = MemoryStore::new();
        for n in 0..3 {
            store
                .insert_request(request(&format!("sir-{n}"), "job-1", "c3.2xlarge", 500, false))
                .await
                .unwrap();
        }
        store.record_cancellation("sir-0", Utc::now()).await.unwrap();
        store.record_cancellation("sir-1", Utc::now()).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 1));
        let config = ProvisionerConfig::default();
        stop_over_requesting(&mut tenant, &store, &config, Utc::now())
            .await
            .unwrap();

        assert_eq!(tenant.idle_jobs.len(), 1);
        let open = open_requests(&store, &tenant, "job-1").await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].request_id, "sir-2");
    }

    #[tokio::test]
    async fn ondemand_instance_fulfills_regardless_of_cpus() {
        let store = MemoryStore::new();
        store.insert_request(request("i-od-1", "job-1", "c3.2xlarge", 30, true)).await.unwrap();
        store.insert_resource(resource("i-od-1", "i-od-1")).await.unwrap();

        let mut tenant = tenant_with_job(job("job-1", 32));
        let config = ProvisionerConfig::default();
        ignore_fulfilled_jobs(&mut tenant, &store, &catalog(), &config, Utc::now())
            .await
            .unwrap();

        assert!(tenant.idle_jobs.is_empty());
    }
}
