//! Request submitter
//!
//! Turns the decision engine's per-job selections into live provider asks
//! and persists one request row per provider id. Submission failures are
//! per-job: the job stays idle and the cycle moves on.

use crate::config::ProvisionerConfig;
use crate::error::Result;
use crate::provider::{CloudProvider, tag_request, with_retries};
use crate::store::{LaunchStat, ProvisionStore, RequestRecord};
use crate::types::{Candidate, Job, Tenant};
use chrono::{DateTime, Utc};
use tracing::{error, info};

/// Place every selected launch for the tenant's idle jobs.
pub async fn request_resources(
    tenant: &Tenant,
    provider: &dyn CloudProvider,
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    for job_id in &tenant.idle_jobs {
        let Some(job) = tenant.job(job_id) else {
            continue;
        };
        if job.fulfilled {
            continue;
        }
        let Some(candidate) = &job.launch else {
            continue;
        };

        if let Err(err) = submit_one(tenant, provider, store, config, job, candidate, now).await {
            error!(
                "could not submit {} for job {}: {}",
                candidate.instance_type, job.id, err
            );
        }
    }
    Ok(())
}

async fn submit_one(
    tenant: &Tenant,
    provider: &dyn CloudProvider,
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    job: &Job,
    candidate: &Candidate,
    now: DateTime<Utc>,
) -> Result<()> {
    let request_ids = if candidate.ondemand {
        let instance_id = with_retries(&config.retry, "launch on-demand", || {
            provider.submit_on_demand(tenant, candidate, job)
        })
        .await?;
        info!(
            "launched on-demand {} as {} for job {}",
            candidate.instance_type, instance_id, job.id
        );
        vec![instance_id]
    } else {
        let ids = with_retries(&config.retry, "place spot request", || {
            provider.submit_spot_request(tenant, candidate, job)
        })
        .await?;
        info!(
            "placed spot request(s) {:?}: {} in {} at bid {:.4} for job {}",
            ids, candidate.instance_type, candidate.zone, candidate.bid, job.id
        );
        ids
    };

    for request_id in request_ids {
        if let Err(err) = tag_request(provider, &config.retry, tenant, &request_id).await {
            // Tags are discovery hints; the request row below is the record.
            error!("could not tag {}: {}", request_id, err);
        }

        store
            .insert_request(RequestRecord {
                request_id: request_id.clone(),
                tenant: tenant.id,
                job_id: job.id.clone(),
                instance_type_id: candidate.instance_type_id,
                instance_type: candidate.instance_type.clone(),
                zone: candidate.zone.clone(),
                bid: candidate.bid,
                ondemand: candidate.ondemand,
                request_time: now,
                near_term: candidate.near_term,
                horizon: candidate.horizon,
                cancelled_time: None,
            })
            .await?;

        if !candidate.ondemand {
            store
                .insert_launch_stat(LaunchStat {
                    request_id,
                    instance_type: candidate.instance_type.clone(),
                    zone: candidate.zone.clone(),
                    bid: candidate.bid,
                    request_time: now,
                    instance_id: None,
                    fulfilled_time: None,
                })
                .await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::provider::{OpenSpotRequest, ProviderInstance};
    use crate::store::MemoryStore;
    use crate::types::{InstanceType, JobDescription, PriceSample};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProvider {
        spot_calls: Mutex<Vec<String>>,
        ondemand_calls: Mutex<Vec<String>>,
        tags: Mutex<Vec<(String, String, String)>>,
        fail_spot: bool,
    }

    #[async_trait]
    impl CloudProvider for RecordingProvider {
        async fn submit_spot_request(
            &self,
            _tenant: &Tenant,
            candidate: &Candidate,
            _job: &Job,
        ) -> crate::error::Result<Vec<String>> {
            if self.fail_spot {
                return Err(ProvisionError::provider("request limit exceeded"));
            }
            let mut calls = self.spot_calls.lock().unwrap();
            let id = format!("sir-{}", calls.len() + 1);
            calls.push(candidate.instance_type.clone());
            Ok(vec![id])
        }

        async fn submit_on_demand(
            &self,
            _tenant: &Tenant,
            candidate: &Candidate,
            _job: &Job,
        ) -> crate::error::Result<String> {
            let mut calls = self.ondemand_calls.lock().unwrap();
            let id = format!("i-od-{}", calls.len() + 1);
            calls.push(candidate.instance_type.clone());
            Ok(id)
        }

        async fn cancel_spot_requests(
            &self,
            _tenant: &Tenant,
            _request_ids: &[String],
        ) -> crate::error::Result<()> {
            Ok(())
        }

        async fn list_instances(
            &self,
            _tenant: &Tenant,
        ) -> crate::error::Result<Vec<ProviderInstance>> {
            Ok(Vec::new())
        }

        async fn list_open_spot_requests(
            &self,
            _tenant: &Tenant,
        ) -> crate::error::Result<Vec<OpenSpotRequest>> {
            Ok(Vec::new())
        }

        async fn tag_resource(
            &self,
            _tenant: &Tenant,
            id: &str,
            key: &str,
            value: &str,
        ) -> crate::error::Result<()> {
            self.tags
                .lock()
                .unwrap()
                .push((id.to_string(), key.to_string(), value.to_string()));
            Ok(())
        }

        async fn spot_price_history(
            &self,
            _tenant: &Tenant,
            _instance_type: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> crate::error::Result<Vec<PriceSample>> {
            Ok(Vec::new())
        }
    }

    fn instance() -> InstanceType {
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

    fn tenant_with(job: Job) -> Tenant {
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

    fn job_with_spot_launch() -> Job {
        let mut job = Job::new(
            "job-1",
            "pool-a.example.org",
            Utc::now(),
            1,
            1,
            1,
            JobDescription::default(),
        );
        let mut candidate = Candidate::spot(&instance(), "us-east-1a", 0.25);
        candidate.bid = 0.21;
        job.launch = Some(candidate);
        job
    }

    #[tokio::test]
    async fn spot_launch_persists_request_and_launch_stat() {
        let provider = RecordingProvider::default();
        let store = MemoryStore::new();
        let config = ProvisionerConfig::default();
        let tenant = tenant_with(job_with_spot_launch());

        request_resources(&tenant, &provider, &store, &config, Utc::now())
            .await
            .unwrap();

        let requests = store.all_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_id, "sir-1");
        assert_eq!(requests[0].bid, 0.21);
        assert!(!requests[0].ondemand);

        let stats = store.launch_stats().await;
        assert_eq!(stats.len(), 1);
        assert!(stats[0].instance_id.is_none());

        let tags = provider.tags.lock().unwrap();
        assert!(tags.iter().any(|(id, k, v)| id == "sir-1" && k == "tenant" && v == "pool-a"));
        assert!(tags.iter().any(|(id, k, v)| id == "sir-1" && k == "Name" && v == "worker@pool-a"));
    }

    #[tokio::test]
    async fn ondemand_launch_records_instance_id_without_launch_stat() {
        let provider = RecordingProvider::default();
        let store = MemoryStore::new();
        let config = ProvisionerConfig::default();
        let mut job = job_with_spot_launch();
        job.ondemand = true;
        job.launch = Some(Candidate::ondemand(&instance()));
        let tenant = tenant_with(job);

        request_resources(&tenant, &provider, &store, &config, Utc::now())
            .await
            .unwrap();

        let requests = store.all_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].request_id, "i-od-1");
        assert!(requests[0].ondemand);
        assert!(store.launch_stats().await.is_empty());
    }

    #[tokio::test]
    async fn submission_failure_leaves_no_request_row() {
        let provider = RecordingProvider {
            fail_spot: true,
            ..RecordingProvider::default()
        };
        let store = MemoryStore::new();
        let mut config = ProvisionerConfig::default();
        config.retry.backoff = std::time::Duration::from_millis(1);
        let tenant = tenant_with(job_with_spot_launch());

        request_resources(&tenant, &provider, &store, &config, Utc::now())
            .await
            .unwrap();

        assert!(store.all_requests().await.is_empty());
        assert_eq!(tenant.idle_jobs.len(), 1);
    }

    #[tokio::test]
    async fn jobs_without_a_selection_are_skipped() {
        let provider = RecordingProvider::default();
        let store = MemoryStore::new();
        let config = ProvisionerConfig::default();
        let mut job = job_with_spot_launch();
        job.launch = None;
        let tenant = tenant_with(job);

        request_resources(&tenant, &provider, &store, &config, Utc::now())
            .await
            .unwrap();

        assert!(store.all_requests().await.is_empty());
        assert!(provider.spot_calls.lock().unwrap().is_empty());
    }
}
