//! Latency distributions fit from recorded launch data
//!
//! Request fulfillment, contextualization, and negotiation delays are
//! sampled instead of fixed so simulated timelines spread the way live
//! ones do. One seeded generator drives every sample: fixed seed plus
//! fixed inputs gives a bit-identical run.

use crate::config::LatencyParams;
use crate::error::{ProvisionError, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, LogNormal, Normal};

/// Sampler for the simulator's three launch-path delays.
pub struct LatencyModel {
    rng: StdRng,
    negotiate: LogNormal<f64>,
    contextualize: LogNormal<f64>,
    fulfill: Normal<f64>,
}

// rand_distr only rejects non-finite parameters; a negative spread would
// quietly mirror the distribution, so it gets rejected here.
fn check_spread(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(ProvisionError::config(format!(
            "{what} distribution: spread must be finite and non-negative, got {value}"
        )));
    }
    Ok(())
}

impl LatencyModel {
    pub fn new(params: &LatencyParams, seed: u64) -> Result<Self> {
        let (neg_mu, neg_sigma) = params.negotiate;
        let (ctx_mu, ctx_sigma) = params.contextualize;
        let (ful_mean, ful_sd) = params.fulfill;
        check_spread("negotiate", neg_sigma)?;
        check_spread("contextualize", ctx_sigma)?;
        check_spread("fulfill", ful_sd)?;
        Ok(LatencyModel {
            rng: StdRng::seed_from_u64(seed),
            negotiate: LogNormal::new(neg_mu, neg_sigma)
                .map_err(|e| ProvisionError::config(format!("negotiate distribution: {e}")))?,
            contextualize: LogNormal::new(ctx_mu, ctx_sigma)
                .map_err(|e| ProvisionError::config(format!("contextualize distribution: {e}")))?,
            fulfill: Normal::new(ful_mean, ful_sd)
                .map_err(|e| ProvisionError::config(format!("fulfill distribution: {e}")))?,
        })
    }

    /// Seconds until the next negotiation cycle reaches a worker.
    pub fn negotiation_delay(&mut self) -> i64 {
        self.negotiate.sample(&mut self.rng).max(1.0) as i64
    }

    /// Seconds a fresh instance spends booting and joining the pool.
    pub fn contextualization_delay(&mut self) -> i64 {
        self.contextualize.sample(&mut self.rng).max(1.0) as i64
    }

    /// Seconds before the provider fulfills a request.
    pub fn fulfillment_delay(&mut self) -> i64 {
        self.fulfill.sample(&mut self.rng).max(1.0) as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_replays_the_same_samples() {
        let params = LatencyParams::default();
        let mut a = LatencyModel::new(&params, 42).unwrap();
        let mut b = LatencyModel::new(&params, 42).unwrap();
        for _ in 0..50 {
            assert_eq!(a.negotiation_delay(), b.negotiation_delay());
            assert_eq!(a.fulfillment_delay(), b.fulfillment_delay());
        }
    }

    #[test]
    fn delays_are_always_positive() {
        let params = LatencyParams::default();
        let mut model = LatencyModel::new(&params, 7).unwrap();
        for _ in 0..200 {
            assert!(model.negotiation_delay() >= 1);
            assert!(model.contextualization_delay() >= 1);
            assert!(model.fulfillment_delay() >= 1);
        }
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let mut params = LatencyParams::default();
        params.fulfill = (7.0, -1.0);
        assert!(LatencyModel::new(&params, 42).is_err());

        let mut params = LatencyParams::default();
        params.negotiate = (3.2, f64::NAN);
        assert!(LatencyModel::new(&params, 42).is_err());

        let mut params = LatencyParams::default();
        params.contextualize = (4.1, -0.5);
        assert!(LatencyModel::new(&params, 42).is_err());
    }
}
