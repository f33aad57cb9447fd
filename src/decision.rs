//! Decision engine
//!
//! For each idle job, ranks (type, zone) purchase options by price — live
//! spot price, or a forecast of future price movement — and selects the
//! request to place, escalating to on-demand when the job has waited too
//! long or spot pricing is no longer worth the revocation risk.

use crate::admission::open_requests;
use crate::config::{ForecastMode, ProvisionerConfig};
use crate::error::Result;
use crate::store::ProvisionStore;
use crate::types::{Candidate, FORECAST_MISS_PRICE, InstanceType, Job, JobState, Tenant};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info};

/// Instance types whose cpu/memory/disk cover the job's requirements.
pub fn restrict_instances<'a>(catalog: &'a [InstanceType], job: &Job) -> Vec<&'a InstanceType> {
    catalog.iter().filter(|i| i.meets_requirements(job)).collect()
}

/// Minimum predicted price past a horizon, over a (type, zone) forecast
/// curve read through the zone-affinity map.
///
/// Predictions at or below the live price are stale and ignored. A miss
/// returns `None`; callers substitute [`FORECAST_MISS_PRICE`] so the
/// candidate sorts last instead of crashing the ranking.
async fn forecast_price(
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    instance_type: &str,
    zone: &str,
    live_price: f64,
    horizon_hours: f64,
) -> Option<f64> {
    let mapped = config.forecast_zone(zone);
    let curve = match store.forecast_curve(instance_type, mapped).await {
        Ok(curve) => curve,
        Err(err) => {
            debug!("forecast lookup failed for {} {}: {}", instance_type, mapped, err);
            return None;
        }
    };
    curve
        .iter()
        .filter(|s| s.price > live_price && s.horizon_hours > horizon_hours)
        .map(|s| s.price)
        .fold(None, |min, p| match min {
            Some(m) if m <= p => Some(m),
            _ => Some(p),
        })
}

/// Build and rank all purchase options for a job.
///
/// Emits one on-demand candidate per eligible type and, unless the job is
/// pinned to on-demand, one spot candidate per (type, zone) with a known
/// price. Sorted ascending by ranking price, ties broken by the zone's
/// live price.
pub async fn potential_instances(
    eligible: &[&InstanceType],
    job: &Job,
    config: &ProvisionerConfig,
    store: &dyn ProvisionStore,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    for instance in eligible {
        candidates.push(Candidate::ondemand(instance));
        if job.ondemand {
            continue;
        }
        for (zone, &live) in &instance.spot {
            let mut candidate = Candidate::spot(instance, zone.clone(), live);
            match config.forecast {
                ForecastMode::Off => {}
                ForecastMode::NearTerm | ForecastMode::Horizon => {
                    let near = forecast_price(store, config, &instance.name, zone, live, 1.0).await;
                    let horizon_hours = job.duration / 3600.0;
                    let horizon =
                        forecast_price(store, config, &instance.name, zone, live, horizon_hours)
                            .await;
                    candidate.near_term = near;
                    candidate.horizon = horizon;
                    candidate.price = match config.forecast {
                        ForecastMode::NearTerm => near.unwrap_or(FORECAST_MISS_PRICE),
                        _ => horizon.unwrap_or(FORECAST_MISS_PRICE),
                    };
                }
            }
            candidates.push(candidate);
        }
    }

    candidates.sort_by(|a, b| {
        (a.price, a.live_price)
            .partial_cmp(&(b.price, b.live_price))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates
}

/// Whether this job must be served by an on-demand instance this cycle.
///
/// True when any of: the job is flagged on-demand; the job has idled past
/// the tenant timeout and some on-demand option fits under the ceiling;
/// the cheapest option overall is on-demand and under the ceiling; or the
/// cheapest spot price is within `ondemand_price_threshold` of its type's
/// on-demand rate (near-parity makes guaranteed capacity the better buy).
fn ondemand_needed(
    tenant: &Tenant,
    sorted: &[Candidate],
    job: &Job,
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> bool {
    if job.ondemand {
        return true;
    }
    let Some(cheapest) = sorted.first() else {
        return false;
    };

    if tenant.timeout > 0 && job.time_idle(now) > tenant.timeout {
        let cheapest_odp = sorted
            .iter()
            .map(|c| c.odp)
            .fold(f64::INFINITY, f64::min);
        if cheapest_odp < tenant.max_bid_price {
            info!(
                "job {} idle for {}s (timeout {}s), escalating to on-demand",
                job.id,
                job.time_idle(now),
                tenant.timeout
            );
            return true;
        }
    }

    if cheapest.ondemand && cheapest.odp < tenant.max_bid_price {
        debug!("job {}: on-demand is the cheapest option", job.id);
        return true;
    }

    if cheapest.price > config.ondemand_price_threshold * cheapest.odp
        && cheapest.price < tenant.max_bid_price
    {
        debug!(
            "job {}: spot price {} is near the on-demand rate {}",
            job.id, cheapest.price, cheapest.odp
        );
        return true;
    }

    false
}

/// The bid to place for a selected spot candidate.
///
/// Forecast modes bid the predicted price itself; classic mode bids a
/// percentage of the on-demand rate, falling back to a small fixed bid if
/// that would exceed the tenant ceiling.
fn bid_price(tenant: &Tenant, candidate: &Candidate, config: &ProvisionerConfig) -> f64 {
    if config.forecast.enabled() {
        return candidate.price;
    }
    let bid = tenant.bid_percent / 100.0 * candidate.odp;
    if bid <= tenant.max_bid_price {
        bid
    } else {
        config.fallback_bid
    }
}

/// Log the head of the ranked candidate list, for operator forensics.
fn log_cheapest_options(sorted: &[Candidate]) {
    for candidate in sorted.iter().take(3) {
        debug!(
            "option: {} {} price {:.4} (live {:.4}, odp {:.4})",
            candidate.instance_type, candidate.zone, candidate.price, candidate.live_price,
            candidate.odp
        );
    }
}

/// Select the request to place for each of the tenant's idle jobs,
/// writing the choice into `Job::launch`.
pub async fn select_instance_types(
    tenant: &mut Tenant,
    catalog: &[InstanceType],
    store: &dyn ProvisionStore,
    config: &ProvisionerConfig,
    now: DateTime<Utc>,
) -> Result<()> {
    for job_id in tenant.idle_jobs.clone() {
        let Some(job) = tenant.job(&job_id).cloned() else {
            continue;
        };
        if job.state != JobState::Idle {
            continue;
        }

        let eligible = restrict_instances(catalog, &job);
        if eligible.is_empty() {
            error!("no eligible instance types for job {}", job.id);
            continue;
        }

        let sorted = potential_instances(&eligible, &job, config, store).await;
        if sorted.is_empty() {
            error!("no candidates produced for job {}", job.id);
            continue;
        }

        if ondemand_needed(tenant, &sorted, &job, config, now) {
            // Redo the list restricted to on-demand and take the cheapest.
            let mut ondemand_job = job.clone();
            ondemand_job.ondemand = true;
            let ondemand_sorted = potential_instances(&eligible, &ondemand_job, config, store).await;
            if let Some(job) = tenant.job_mut(&job_id) {
                job.ondemand = true;
                job.launch = ondemand_sorted.into_iter().next();
                debug!("job {}: launching on-demand {:?}", job_id, job.launch.as_ref().map(|c| &c.instance_type));
            }
            continue;
        }

        log_cheapest_options(&sorted);

        let existing = match open_requests(store, tenant, &job_id).await {
            Ok(rows) => rows,
            Err(err) => {
                error!("could not read open requests for job {}: {}", job_id, err);
                continue;
            }
        };

        let mut selected = None;
        for candidate in sorted {
            let duplicate = existing.iter().any(|r| {
                r.instance_type == candidate.instance_type && r.zone == candidate.zone
            });
            if duplicate {
                continue;
            }
            if candidate.price < tenant.max_bid_price {
                let mut chosen = candidate;
                if !chosen.ondemand {
                    chosen.bid = bid_price(tenant, &chosen, config);
                }
                selected = Some(chosen);
                break;
            } else {
                error!(
                    "cannot request {} in {}: price {:.4} exceeds max bid {:.4}",
                    candidate.instance_type, candidate.zone, candidate.price, tenant.max_bid_price
                );
            }
        }

        if let Some(job) = tenant.job_mut(&job_id) {
            job.launch = selected;
            if job.launch.is_none() {
                info!("job {} has no affordable candidate this cycle", job_id);
            }
        }
    }
    Ok(())
}
