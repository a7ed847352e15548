//! Anomaly handling
//!
//! This module provides:
//! - Host classification against utilization thresholds (detector)
//! - Cluster-level resolution of OVERLOADED and UNDERLOADED hosts (resolver)

mod detector;
mod resolver;

pub use detector::{classify_utilization, AnomalyDetectionLoop, AnomalyDetector};
pub use resolver::{AnomalyResolver, ResolutionReport, ResolverPhase};
