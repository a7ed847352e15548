//! Core data models for the group controller
//!
//! Resource vectors, bounded monitoring histories, virtual machine and
//! host descriptions, and the plans produced by the scheduling policies.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Virtual machine identifier
pub type VmId = String;

/// Host (local controller) identifier
pub type HostId = String;

/// Number of tracked resource dimensions
pub const NUMBER_OF_RESOURCES: usize = 4;

/// Default number of monitoring samples kept per VM or host
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

/// Tolerance used by capacity comparisons to absorb float accumulation error
const CAPACITY_EPSILON: f64 = 1e-9;

/// Resource dimension, in the fixed order shared by every vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Cpu,
    Memory,
    NetworkRx,
    NetworkTx,
}

impl Resource {
    pub const ALL: [Resource; NUMBER_OF_RESOURCES] = [
        Resource::Cpu,
        Resource::Memory,
        Resource::NetworkRx,
        Resource::NetworkTx,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::NetworkRx => write!(f, "network_rx"),
            Resource::NetworkTx => write!(f, "network_tx"),
        }
    }
}

/// Ordered (CPU, memory, network-receive, network-transmit) tuple
///
/// Serialized as a plain four-element array. Components are never negative:
/// constructors clamp and subtraction saturates at zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct ResourceVector([f64; NUMBER_OF_RESOURCES]);

impl ResourceVector {
    pub fn new(cpu: f64, memory: f64, network_rx: f64, network_tx: f64) -> Self {
        Self::from([cpu, memory, network_rx, network_tx])
    }

    pub fn zero() -> Self {
        Self([0.0; NUMBER_OF_RESOURCES])
    }

    pub fn get(&self, resource: Resource) -> f64 {
        self.0[resource.index()]
    }

    pub fn set(&mut self, resource: Resource, value: f64) {
        self.0[resource.index()] = value.max(0.0);
    }

    pub fn components(&self) -> &[f64; NUMBER_OF_RESOURCES] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.0.iter().copied()
    }

    /// Component-wise subtraction clamped at zero
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = [0.0; NUMBER_OF_RESOURCES];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = (self.0[i] - other.0[i]).max(0.0);
        }
        ResourceVector(out)
    }

    /// Component-wise division; a zero divisor yields zero for that component
    pub fn divide(&self, divisor: &ResourceVector) -> ResourceVector {
        let mut out = [0.0; NUMBER_OF_RESOURCES];
        for (i, slot) in out.iter_mut().enumerate() {
            *slot = if divisor.0[i] > 0.0 {
                self.0[i] / divisor.0[i]
            } else {
                0.0
            };
        }
        ResourceVector(out)
    }

    pub fn scale(&self, factor: f64) -> ResourceVector {
        Self::from(self.0.map(|v| v * factor))
    }

    /// True iff every component is at most the matching capacity component
    pub fn fits_within(&self, capacity: &ResourceVector) -> bool {
        self.0
            .iter()
            .zip(capacity.0.iter())
            .all(|(used, total)| *used <= *total + CAPACITY_EPSILON)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|v| *v == 0.0)
    }
}

impl From<[f64; NUMBER_OF_RESOURCES]> for ResourceVector {
    fn from(values: [f64; NUMBER_OF_RESOURCES]) -> Self {
        ResourceVector(values.map(|v| if v.is_finite() { v.max(0.0) } else { 0.0 }))
    }
}

impl From<ResourceVector> for [f64; NUMBER_OF_RESOURCES] {
    fn from(vector: ResourceVector) -> Self {
        vector.0
    }
}

impl Add for ResourceVector {
    type Output = ResourceVector;

    fn add(mut self, rhs: ResourceVector) -> ResourceVector {
        self += rhs;
        self
    }
}

impl AddAssign for ResourceVector {
    fn add_assign(&mut self, rhs: ResourceVector) {
        for (lhs, rhs) in self.0.iter_mut().zip(rhs.0.iter()) {
            *lhs += rhs;
        }
    }
}

impl Sum for ResourceVector {
    fn sum<I: Iterator<Item = ResourceVector>>(iter: I) -> Self {
        iter.fold(ResourceVector::zero(), Add::add)
    }
}

impl<'a> Sum<&'a ResourceVector> for ResourceVector {
    fn sum<I: Iterator<Item = &'a ResourceVector>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

impl fmt::Display for ResourceVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:.2}, {:.2}, {:.2}, {:.2}]",
            self.0[0], self.0[1], self.0[2], self.0[3]
        )
    }
}

/// Resource usage observed at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonitoringSample {
    pub timestamp: i64,
    pub usage: ResourceVector,
}

impl MonitoringSample {
    pub fn new(timestamp: i64, usage: ResourceVector) -> Self {
        Self { timestamp, usage }
    }
}

/// Fixed-capacity, insertion-ordered history
///
/// Pushing into a full history evicts the oldest entry, so the length never
/// exceeds the capacity chosen at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    from = "BoundedHistoryRepr<T>",
    bound(deserialize = "T: Deserialize<'de>")
)]
pub struct BoundedHistory<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

#[derive(Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct BoundedHistoryRepr<T> {
    capacity: usize,
    #[serde(default)]
    entries: VecDeque<T>,
}

impl<T> From<BoundedHistoryRepr<T>> for BoundedHistory<T> {
    fn from(repr: BoundedHistoryRepr<T>) -> Self {
        let mut history = BoundedHistory::new(repr.capacity);
        for entry in repr.entries {
            history.push(entry);
        }
        history
    }
}

impl<T> BoundedHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append an entry, evicting the oldest one when full
    pub fn push(&mut self, entry: T) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// The `n` most recent entries, oldest first
    pub fn latest(&self, n: usize) -> impl Iterator<Item = &T> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keep only the `n` most recent entries (capacity is unchanged)
    pub fn retain_latest(&mut self, n: usize) {
        while self.entries.len() > n {
            self.entries.pop_front();
        }
    }
}

impl<T> Default for BoundedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Virtual machine lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmStatus {
    #[default]
    Pending,
    Running,
    Paused,
    ShutOff,
    Migrating,
    Error,
    Unknown,
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VmStatus::Pending => "PENDING",
            VmStatus::Running => "RUNNING",
            VmStatus::Paused => "PAUSED",
            VmStatus::ShutOff => "SHUTOFF",
            VmStatus::Migrating => "MIGRATING",
            VmStatus::Error => "ERROR",
            VmStatus::Unknown => "UNKNOWN",
        };
        write!(f, "{}", s)
    }
}

/// Reason recorded on a VM that ended up in the `Error` status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmErrorCode {
    NotEnoughResources,
    StartFailed,
    MigrationFailed,
    /// Submitted id is already placed or repeated in the batch
    DuplicateId,
}

impl fmt::Display for VmErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmErrorCode::NotEnoughResources => write!(f, "not_enough_resources"),
            VmErrorCode::StartFailed => write!(f, "start_failed"),
            VmErrorCode::MigrationFailed => write!(f, "migration_failed"),
            VmErrorCode::DuplicateId => write!(f, "duplicate_id"),
        }
    }
}

/// Virtual machine description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineMetaData {
    pub id: VmId,
    #[serde(default)]
    pub status: VmStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<VmErrorCode>,
    /// Hosting local controller; `None` while unassigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
    pub requested: ResourceVector,
    #[serde(default)]
    pub history: BoundedHistory<MonitoringSample>,
}

impl VirtualMachineMetaData {
    pub fn new(id: impl Into<VmId>, requested: ResourceVector, history_capacity: usize) -> Self {
        Self {
            id: id.into(),
            status: VmStatus::Pending,
            error_code: None,
            host_id: None,
            requested,
            history: BoundedHistory::new(history_capacity),
        }
    }

    pub fn is_assigned(&self) -> bool {
        self.host_id.is_some()
    }

    /// Mark the VM failed with the given reason
    pub fn set_error(&mut self, code: VmErrorCode) {
        self.status = VmStatus::Error;
        self.error_code = Some(code);
    }
}

/// Power state of a local controller as seen by the group manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    #[default]
    Active,
    Passive,
    WokenUp,
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Active => write!(f, "ACTIVE"),
            HostStatus::Passive => write!(f, "PASSIVE"),
            HostStatus::WokenUp => write!(f, "WOKENUP"),
        }
    }
}

/// Lower and upper utilization bounds for one resource, as capacity fractions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdPair {
    pub min: f64,
    pub max: f64,
}

impl ThresholdPair {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl Default for ThresholdPair {
    fn default() -> Self {
        Self { min: 0.2, max: 0.9 }
    }
}

/// Per-resource utilization thresholds used by anomaly detection
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringThresholds {
    pub cpu: ThresholdPair,
    pub memory: ThresholdPair,
    pub network_rx: ThresholdPair,
    pub network_tx: ThresholdPair,
}

impl MonitoringThresholds {
    /// Same bounds for every resource
    pub fn uniform(min: f64, max: f64) -> Self {
        let pair = ThresholdPair::new(min, max);
        Self {
            cpu: pair,
            memory: pair,
            network_rx: pair,
            network_tx: pair,
        }
    }

    pub fn get(&self, resource: Resource) -> ThresholdPair {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
            Resource::NetworkRx => self.network_rx,
            Resource::NetworkTx => self.network_tx,
        }
    }

    pub fn max_vector(&self) -> ResourceVector {
        ResourceVector::new(
            self.cpu.max,
            self.memory.max,
            self.network_rx.max,
            self.network_tx.max,
        )
    }
}

/// Host description maintained by the group manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalControllerDescription {
    pub id: HostId,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub status: HostStatus,
    pub total_capacity: ResourceVector,
    #[serde(default)]
    pub virtual_machines: BTreeMap<VmId, VirtualMachineMetaData>,
    /// Host's own resource usage (hypervisor and host overhead)
    #[serde(default)]
    pub history: BoundedHistory<MonitoringSample>,
    #[serde(default)]
    pub thresholds: MonitoringThresholds,
}

impl LocalControllerDescription {
    pub fn new(id: impl Into<HostId>, total_capacity: ResourceVector, history_capacity: usize) -> Self {
        Self {
            id: id.into(),
            address: String::new(),
            status: HostStatus::Active,
            total_capacity,
            virtual_machines: BTreeMap::new(),
            history: BoundedHistory::new(history_capacity),
            thresholds: MonitoringThresholds::default(),
        }
    }

    /// Sum of the requested capacity of every assigned VM
    pub fn requested_capacity(&self) -> ResourceVector {
        self.virtual_machines.values().map(|vm| &vm.requested).sum()
    }

    pub fn free_capacity(&self) -> ResourceVector {
        self.total_capacity.saturating_sub(&self.requested_capacity())
    }

    /// Assign a VM to this host, updating the VM's location
    pub fn assign_virtual_machine(&mut self, mut vm: VirtualMachineMetaData) {
        vm.host_id = Some(self.id.clone());
        self.virtual_machines.insert(vm.id.clone(), vm);
    }

    pub fn remove_virtual_machine(&mut self, vm_id: &str) -> Option<VirtualMachineMetaData> {
        self.virtual_machines.remove(vm_id)
    }

    pub fn has_virtual_machines(&self) -> bool {
        !self.virtual_machines.is_empty()
    }

    pub fn is_passive(&self) -> bool {
        self.status == HostStatus::Passive
    }
}

/// Result of classifying a host against its thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocalControllerState {
    Stable,
    Overloaded,
    Underloaded,
}

impl LocalControllerState {
    pub fn is_anomaly(&self) -> bool {
        !matches!(self, LocalControllerState::Stable)
    }
}

impl fmt::Display for LocalControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LocalControllerState::Stable => write!(f, "STABLE"),
            LocalControllerState::Overloaded => write!(f, "OVERLOADED"),
            LocalControllerState::Underloaded => write!(f, "UNDERLOADED"),
        }
    }
}

/// One VM relocation inside a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Migration {
    pub vm_id: VmId,
    pub source: Option<HostId>,
    pub destination: HostId,
}

/// VM → destination mapping with host accounting
///
/// Each VM appears at most once. An empty plan is a valid no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconfigurationPlan {
    pub migrations: BTreeMap<VmId, Migration>,
    pub hosts_used: usize,
    pub hosts_released: usize,
}

impl ReconfigurationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a move; a VM already in the plan keeps its original source
    pub fn add(&mut self, vm_id: &str, source: Option<HostId>, destination: HostId) {
        let source = self
            .migrations
            .get(vm_id)
            .map(|existing| existing.source.clone())
            .unwrap_or(source);

        if source.as_deref() == Some(destination.as_str()) {
            self.migrations.remove(vm_id);
            return;
        }

        self.migrations.insert(
            vm_id.to_string(),
            Migration {
                vm_id: vm_id.to_string(),
                source,
                destination,
            },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    pub fn destination_of(&self, vm_id: &str) -> Option<&HostId> {
        self.migrations.get(vm_id).map(|m| &m.destination)
    }

    pub fn destinations(&self) -> BTreeSet<HostId> {
        self.migrations
            .values()
            .map(|m| m.destination.clone())
            .collect()
    }
}

/// A VM chosen for a host by a placement policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub vm: VirtualMachineMetaData,
    pub host_id: HostId,
}

impl Assignment {
    /// The VM carries its destination as well
    pub fn new(mut vm: VirtualMachineMetaData, host_id: HostId) -> Self {
        vm.host_id = Some(host_id.clone());
        Self { vm, host_id }
    }
}

/// Outcome of placing a batch of VMs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementPlan {
    pub assignments: Vec<Assignment>,
    pub unassigned: Vec<VirtualMachineMetaData>,
}

impl PlacementPlan {
    /// Assigned VMs grouped per destination host
    pub fn by_host(&self) -> BTreeMap<HostId, Vec<VirtualMachineMetaData>> {
        let mut grouped: BTreeMap<HostId, Vec<VirtualMachineMetaData>> = BTreeMap::new();
        for assignment in &self.assignments {
            grouped
                .entry(assignment.host_id.clone())
                .or_default()
                .push(assignment.vm.clone());
        }
        grouped
    }

    pub fn host_of(&self, vm_id: &str) -> Option<&HostId> {
        self.assignments
            .iter()
            .find(|a| a.vm.id == vm_id)
            .map(|a| &a.host_id)
    }
}

/// Operator action on a single VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "action")]
pub enum VmAction {
    Suspend,
    Resume,
    Shutdown,
    Reboot,
    Destroy,
    Migrate { destination: HostId },
}

impl fmt::Display for VmAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmAction::Suspend => write!(f, "suspend"),
            VmAction::Resume => write!(f, "resume"),
            VmAction::Shutdown => write!(f, "shutdown"),
            VmAction::Reboot => write!(f, "reboot"),
            VmAction::Destroy => write!(f, "destroy"),
            VmAction::Migrate { destination } => write!(f, "migrate to {}", destination),
        }
    }
}

/// How an idle host is powered down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerAction {
    #[default]
    Shutdown,
    SuspendToRam,
    SuspendToDisk,
    SuspendToBoth,
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerAction::Shutdown => write!(f, "shutdown"),
            PowerAction::SuspendToRam => write!(f, "suspend_to_ram"),
            PowerAction::SuspendToDisk => write!(f, "suspend_to_disk"),
            PowerAction::SuspendToBoth => write!(f, "suspend_to_both"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_vector_clamps_negative_components() {
        let v = ResourceVector::new(-1.0, 2.0, f64::NAN, 4.0);
        assert_eq!(v.components(), &[0.0, 2.0, 0.0, 4.0]);
    }

    #[test]
    fn test_resource_vector_arithmetic() {
        let a = ResourceVector::new(1.0, 100.0, 10.0, 20.0);
        let b = ResourceVector::new(2.0, 50.0, 5.0, 5.0);

        assert_eq!(a + b, ResourceVector::new(3.0, 150.0, 15.0, 25.0));
        assert_eq!(a.saturating_sub(&b), ResourceVector::new(0.0, 50.0, 5.0, 15.0));
        assert_eq!(
            a.divide(&ResourceVector::new(2.0, 0.0, 10.0, 40.0)),
            ResourceVector::new(0.5, 0.0, 1.0, 0.5)
        );
    }

    #[test]
    fn test_fits_within_is_component_wise() {
        let capacity = ResourceVector::new(8.0, 16384.0, 1000.0, 1000.0);
        assert!(ResourceVector::new(8.0, 16384.0, 1000.0, 1000.0).fits_within(&capacity));
        assert!(!ResourceVector::new(1.0, 1.0, 1001.0, 1.0).fits_within(&capacity));
    }

    #[test]
    fn test_bounded_history_evicts_oldest() {
        let mut history = BoundedHistory::new(3);
        for i in 0..5 {
            history.push(i);
        }

        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(history.latest(2).copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(history.latest(10).count(), 3);
    }

    #[test]
    fn test_bounded_history_zero_capacity_keeps_nothing() {
        let mut history = BoundedHistory::new(0);
        history.push(1);
        assert!(history.is_empty());
    }

    #[test]
    fn test_bounded_history_deserialization_truncates() {
        let history: BoundedHistory<i32> =
            serde_json::from_str(r#"{"capacity": 2, "entries": [1, 2, 3]}"#).unwrap();
        assert_eq!(history.iter().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn test_sample_history_survives_json() {
        let mut history = BoundedHistory::new(2);
        history.push(MonitoringSample::new(10, ResourceVector::new(1.0, 512.0, 5.0, 5.0)));
        history.push(MonitoringSample::new(20, ResourceVector::new(2.0, 1024.0, 0.0, 0.0)));

        let json = serde_json::to_string(&history).unwrap();
        let restored: BoundedHistory<MonitoringSample> = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, history);

        let empty: BoundedHistory<MonitoringSample> =
            serde_json::from_str(r#"{"capacity": 4}"#).unwrap();
        assert!(empty.is_empty());
        assert_eq!(empty.capacity(), 4);
    }

    #[test]
    fn test_host_requested_capacity() {
        let mut host =
            LocalControllerDescription::new("h1", ResourceVector::new(8.0, 16384.0, 1000.0, 1000.0), 10);
        host.assign_virtual_machine(VirtualMachineMetaData::new(
            "vm1",
            ResourceVector::new(4.0, 8192.0, 200.0, 200.0),
            10,
        ));

        assert_eq!(
            host.requested_capacity(),
            ResourceVector::new(4.0, 8192.0, 200.0, 200.0)
        );
        assert_eq!(
            host.free_capacity(),
            ResourceVector::new(4.0, 8192.0, 800.0, 800.0)
        );
        assert_eq!(host.virtual_machines["vm1"].host_id.as_deref(), Some("h1"));
    }

    #[test]
    fn test_plan_keeps_original_source_on_repeated_moves() {
        let mut plan = ReconfigurationPlan::new();
        plan.add("vm1", Some("a".to_string()), "b".to_string());
        plan.add("vm1", Some("b".to_string()), "c".to_string());

        assert_eq!(plan.len(), 1);
        let migration = &plan.migrations["vm1"];
        assert_eq!(migration.source.as_deref(), Some("a"));
        assert_eq!(migration.destination, "c");
    }

    #[test]
    fn test_plan_move_back_to_source_is_dropped() {
        let mut plan = ReconfigurationPlan::new();
        plan.add("vm1", Some("a".to_string()), "b".to_string());
        plan.add("vm1", Some("b".to_string()), "a".to_string());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_resource_vector_serializes_as_array() {
        let v = ResourceVector::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(serde_json::to_string(&v).unwrap(), "[1.0,2.0,3.0,4.0]");
    }
}
