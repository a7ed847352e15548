//! Windowed demand estimator
//!
//! Aggregates the most recent N samples of a history. Samples are aligned by
//! recency only, never by timestamp.

use super::ResourceDemandEstimator;
use crate::models::{
    LocalControllerDescription, MonitoringSample, Resource, ResourceVector,
    VirtualMachineMetaData, NUMBER_OF_RESOURCES,
};

/// How samples inside the window are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Arithmetic mean
    Average,
    /// Peak value
    Maximum,
}

/// Estimator over the latest `window_size` samples
#[derive(Debug, Clone)]
pub struct WindowedEstimator {
    aggregation: Aggregation,
    window_size: usize,
}

impl WindowedEstimator {
    /// Create an estimator; the window is clamped to the history capacity
    pub fn new(aggregation: Aggregation, window_size: usize, history_capacity: usize) -> Self {
        let window_size = if history_capacity > 0 {
            window_size.min(history_capacity)
        } else {
            window_size
        };

        Self {
            aggregation,
            window_size: window_size.max(1),
        }
    }

    fn aggregate<'a, I>(&self, samples: I) -> ResourceVector
    where
        I: Iterator<Item = &'a MonitoringSample>,
    {
        let mut acc = [0.0; NUMBER_OF_RESOURCES];
        let mut count = 0usize;

        for sample in samples {
            for (slot, value) in acc.iter_mut().zip(sample.usage.iter()) {
                match self.aggregation {
                    Aggregation::Average => *slot += value,
                    Aggregation::Maximum => *slot = slot.max(value),
                }
            }
            count += 1;
        }

        if count == 0 {
            return ResourceVector::zero();
        }

        if self.aggregation == Aggregation::Average {
            for slot in acc.iter_mut() {
                *slot /= count as f64;
            }
        }

        ResourceVector::from(acc)
    }
}

impl ResourceDemandEstimator for WindowedEstimator {
    fn name(&self) -> &str {
        match self.aggregation {
            Aggregation::Average => "average",
            Aggregation::Maximum => "max",
        }
    }

    fn window_size(&self) -> usize {
        self.window_size
    }

    fn estimate_vm_demand(&self, vm: &VirtualMachineMetaData) -> ResourceVector {
        self.aggregate(vm.history.latest(self.window_size))
    }

    fn estimate_host_resource(&self, host: &LocalControllerDescription, resource: Resource) -> f64 {
        self.aggregate(host.history.latest(self.window_size))
            .get(resource)
    }

    fn estimate_host_overhead(&self, host: &LocalControllerDescription) -> ResourceVector {
        self.aggregate(host.history.latest(self.window_size))
    }
}
