//! Cloud provider capability interface
//!
//! The decision engine, submitter, and reconciler hold only this trait;
//! the live implementation wraps the provider SDK in the runner, and
//! [`crate::sim::SimCloud`] reimplements it for closed-world simulation.

use crate::config::RetryPolicy;
use crate::error::{ProvisionError, Result};
use crate::types::{Candidate, Job, PriceSample, Tenant};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Provider-side instance state, reduced to what the reconciler needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderInstanceState {
    Pending,
    Running,
    Terminated,
}

/// One instance as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInstance {
    pub id: String,
    /// Set when the instance fulfills a spot request
    pub spot_request_id: Option<String>,
    pub state: ProviderInstanceState,
    pub launch_time: DateTime<Utc>,
    /// Provider-reported reason for a terminated state
    pub state_reason: Option<String>,
}

/// An open (unfulfilled) spot request as reported by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenSpotRequest {
    pub id: String,
    pub instance_type: String,
    pub zone: String,
    pub bid: f64,
}

/// Capability surface of the cloud provider, per tenant credentials.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Place a spot request for the candidate on behalf of a job, returning
    /// the provider request ids.
    async fn submit_spot_request(
        &self,
        tenant: &Tenant,
        candidate: &Candidate,
        job: &Job,
    ) -> Result<Vec<String>>;

    /// Launch an on-demand instance, returning its instance id.
    async fn submit_on_demand(
        &self,
        tenant: &Tenant,
        candidate: &Candidate,
        job: &Job,
    ) -> Result<String>;

    /// Cancel open spot requests by id.
    async fn cancel_spot_requests(&self, tenant: &Tenant, request_ids: &[String]) -> Result<()>;

    /// All instances visible to the tenant's credentials.
    async fn list_instances(&self, tenant: &Tenant) -> Result<Vec<ProviderInstance>>;

    /// Open spot requests tagged with the tenant's name.
    async fn list_open_spot_requests(&self, tenant: &Tenant) -> Result<Vec<OpenSpotRequest>>;

    /// Attach a key/value tag to an instance or request.
    async fn tag_resource(&self, tenant: &Tenant, id: &str, key: &str, value: &str) -> Result<()>;

    /// Spot price history for one instance type over a time window.
    async fn spot_price_history(
        &self,
        tenant: &Tenant,
        instance_type: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PriceSample>>;
}

/// Run a provider operation with bounded retries and fixed backoff.
///
/// Only transient errors are retried; anything else propagates immediately.
pub async fn with_retries<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.attempts => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    what, attempt, policy.attempts, err
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Tag a freshly created request or instance with the tenant identity so
/// later discovery can filter on it.
pub async fn tag_request(
    provider: &dyn CloudProvider,
    policy: &RetryPolicy,
    tenant: &Tenant,
    id: &str,
) -> Result<()> {
    with_retries(policy, "tag tenant", || {
        provider.tag_resource(tenant, id, "tenant", &tenant.name)
    })
    .await?;
    let worker_name = format!("worker@{}", tenant.name);
    with_retries(policy, "tag name", || {
        provider.tag_resource(tenant, id, "Name", &worker_name)
    })
    .await
}

/// A convenience constructor for transient failures in provider impls.
pub fn transient(msg: impl Into<String>) -> ProvisionError {
    ProvisionError::Provider(msg.into())
}
