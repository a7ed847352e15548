//! Group controller library for virtualized clusters
//!
//! This crate provides the decision core of a group manager:
//! - Resource demand estimation and host/VM ranking
//! - Placement, relocation and consolidation policies
//! - Anomaly detection and resolution
//! - Migration plan enforcement with watchdogs
//! - The state machine that serializes every cluster-mutating workflow
//! - Health checks and observability

pub mod anomaly;
pub mod enforcement;
pub mod error;
pub mod estimator;
pub mod health;
pub mod models;
pub mod monitoring;
pub mod observability;
pub mod policy;
pub mod power;
pub mod ranking;
pub mod reconfiguration;
pub mod remote;
pub mod repository;
pub mod settings;
pub mod state_machine;

#[cfg(test)]
mod test_support;

pub use error::{ControlError, RepositoryError, ResolutionError, StateMachineError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ControllerMetrics, EventLogger};
pub use settings::ControllerSettings;
pub use state_machine::{
    ControllerState, StateMachine, StateMachineBuilder, SubmissionRequest, SubmissionResponse,
};
