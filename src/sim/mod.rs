//! Discrete-event simulation of the provisioning engine
//!
//! The same decision, admission, and reconciliation code that runs live
//! is driven here against a closed-world cloud replaying recorded spot
//! price history, on a virtual clock.

pub mod cloud;
pub mod distributions;
pub mod engine;
pub mod feed;

pub use cloud::{ResourceState, SimCloud, SimEvent};
pub use distributions::LatencyModel;
pub use engine::{SimulationEngine, SimulationReport};
pub use feed::{SimJobFeed, WorkloadRecord};
