//! Configuration types for neural_kpcn.
//!
//! Burn-style configuration structs for the training driver and the
//! reference network. Both serialize to JSON through `Config::save`.

mod network;
mod training;

pub use network::ReferenceNetConfig;
pub use training::{NetworkModel, OffsetPolicy, TrainerConfig};
