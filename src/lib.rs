//! Spot-market provisioning engine for batch pools
//!
//! Watches tenant scheduler queues and acquires the cheapest capacity that
//! satisfies each idle job: spot instances ranked by live or predicted
//! price, escalating to on-demand when jobs wait too long or spot pricing
//! loses its edge. A reconciliation pass keeps durable state aligned with
//! what the provider actually did, re-homing or cancelling requests whose
//! job has moved on.
//!
//! The cloud and the store sit behind capability traits
//! ([`provider::CloudProvider`], [`store::ProvisionStore`]), so the same
//! engine runs live or inside the discrete-event simulator in [`sim`].

pub mod admission;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod provider;
pub mod provisioner;
pub mod reconcile;
pub mod sim;
pub mod store;
pub mod submit;
pub mod types;

pub use clock::Clock;
pub use config::{ForecastMode, ProvisionerConfig, SimConfig, TerminationPolicy};
pub use error::{ProvisionError, Result};
pub use provider::CloudProvider;
pub use provisioner::{JobSource, Provisioner};
pub use store::{MemoryStore, ProvisionStore};
pub use types::{Candidate, InstanceType, Job, JobId, Tenant};
