//! Group manager state machine
//!
//! The single gate in front of every cluster-mutating workflow: VM
//! submission, anomaly resolution, reconfiguration, migration and idle-host
//! power-down. A busy flag is tested-and-set before a workflow starts; a
//! caller that finds it set gets [`StateMachineError::Busy`] and is expected
//! to skip, not queue. The state machine is also the only component that
//! commits plan outcomes back to the repository.

use crate::anomaly::{AnomalyResolver, ResolutionReport, ResolverPhase};
use crate::enforcement::{EnforcementReport, MigrationOutcome, MigrationPlanEnforcer};
use crate::error::{ControlError, StateMachineError};
use crate::models::{
    HostId, HostStatus, LocalControllerState, PowerAction, ReconfigurationPlan, ResourceVector,
    VirtualMachineMetaData, VmAction, VmErrorCode, VmId, VmStatus,
};
use crate::observability::{ControllerMetrics, EventLogger};
use crate::policy::{
    overload_policy_from_name, placement_policy_from_name, reconfiguration_policy_from_name,
    underload_policy_from_name, PlacementPolicy, ReconfigurationPolicy, RelocationPolicies,
};
use crate::power::WakeupCoordinator;
use crate::remote::NodeControl;
use crate::repository::GroupManagerRepository;
use crate::settings::ControllerSettings;
use anyhow::{anyhow, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Identifier handed out for an asynchronous submission
pub type TaskId = String;

/// Workflow currently holding the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Submitting,
    ResolvingAnomaly,
    Reconfiguring,
    Migrating,
    PowerManagement,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Submitting => "submitting",
            ControllerState::ResolvingAnomaly => "resolving_anomaly",
            ControllerState::Reconfiguring => "reconfiguring",
            ControllerState::Migrating => "migrating",
            ControllerState::PowerManagement => "power_management",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch of VMs to start
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionRequest {
    pub virtual_machines: Vec<VirtualMachineMetaData>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedVirtualMachine {
    pub vm_id: VmId,
    pub host_id: HostId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedVirtualMachine {
    pub vm_id: VmId,
    pub error_code: VmErrorCode,
}

/// Result of a submission, collected later by task id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub task_id: TaskId,
    pub placed: Vec<PlacedVirtualMachine>,
    pub failed: Vec<FailedVirtualMachine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconfigurationReport {
    pub plan: ReconfigurationPlan,
    pub enforcement: EnforcementReport,
}

/// Holds the busy flag for the lifetime of one workflow
struct BusyGuard {
    busy: Arc<AtomicBool>,
    state: Arc<watch::Sender<ControllerState>>,
    workflow: ControllerState,
    started: Instant,
    metrics: ControllerMetrics,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.metrics
            .observe_workflow(self.workflow.as_str(), self.started.elapsed().as_secs_f64());
        self.state.send_replace(ControllerState::Idle);
        self.busy.store(false, Ordering::SeqCst);
        self.metrics.set_busy(false);
        debug!(workflow = %self.workflow, "State machine released");
    }
}

struct Inner {
    repository: Arc<dyn GroupManagerRepository>,
    control: Arc<dyn NodeControl>,
    placement: Arc<dyn PlacementPolicy>,
    reconfiguration: Arc<dyn ReconfigurationPolicy>,
    resolver: AnomalyResolver,
    enforcer: MigrationPlanEnforcer,
    wakeup: WakeupCoordinator,
    busy: Arc<AtomicBool>,
    state: Arc<watch::Sender<ControllerState>>,
    submissions: DashMap<TaskId, SubmissionResponse>,
    history_entries: usize,
    metrics: ControllerMetrics,
    logger: EventLogger,
}

/// Cheaply cloneable handle to the group manager state machine
#[derive(Clone)]
pub struct StateMachine {
    inner: Arc<Inner>,
}

impl StateMachine {
    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ControllerState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.inner.state.subscribe()
    }

    pub fn resolver_phase(&self) -> ResolverPhase {
        self.inner.resolver.phase()
    }

    pub fn repository(&self) -> &Arc<dyn GroupManagerRepository> {
        &self.inner.repository
    }

    pub fn wakeup(&self) -> &WakeupCoordinator {
        &self.inner.wakeup
    }

    fn try_acquire(&self, workflow: ControllerState) -> Result<BusyGuard, StateMachineError> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(workflow = %workflow, current = %self.state(), "State machine busy");
            return Err(StateMachineError::Busy);
        }

        self.inner.state.send_replace(workflow);
        self.inner.metrics.set_busy(true);
        debug!(workflow = %workflow, "State machine acquired");
        Ok(BusyGuard {
            busy: self.inner.busy.clone(),
            state: self.inner.state.clone(),
            workflow,
            started: Instant::now(),
            metrics: self.inner.metrics.clone(),
        })
    }

    /// Accept a batch of VMs and place them in the background
    ///
    /// Returns the task id immediately; the outcome is collected with
    /// [`get_submission_response`](Self::get_submission_response).
    pub fn start_virtual_machines(
        &self,
        request: SubmissionRequest,
    ) -> Result<TaskId, StateMachineError> {
        let guard = self.try_acquire(ControllerState::Submitting)?;
        let task_id = Uuid::new_v4().to_string();
        self.inner.metrics.inc_submissions();
        info!(
            task_id = %task_id,
            vms = request.virtual_machines.len(),
            "Submission accepted"
        );

        let this = self.clone();
        let id = task_id.clone();
        tokio::spawn(async move {
            let response = this.run_submission(id.clone(), request).await;
            this.inner.submissions.insert(id, response);
            drop(guard);
        });

        Ok(task_id)
    }

    /// Take the response of a finished submission
    ///
    /// `None` while the task is still running or when the id is unknown.
    pub fn get_submission_response(&self, task_id: &str) -> Option<SubmissionResponse> {
        self.inner
            .submissions
            .remove(task_id)
            .map(|(_, response)| response)
    }

    async fn run_submission(&self, task_id: TaskId, request: SubmissionRequest) -> SubmissionResponse {
        let mut response = SubmissionResponse {
            task_id,
            placed: Vec::new(),
            failed: Vec::new(),
        };

        let mut seen = HashSet::new();
        let mut vms = Vec::with_capacity(request.virtual_machines.len());
        for mut vm in request.virtual_machines {
            if !seen.insert(vm.id.clone()) || self.is_placed(&vm.id).await {
                warn!(vm_id = %vm.id, "Rejecting duplicate virtual machine id");
                self.inner
                    .logger
                    .log_vm_unplaced(&vm.id, &VmErrorCode::DuplicateId.to_string());
                response.failed.push(FailedVirtualMachine {
                    vm_id: vm.id,
                    error_code: VmErrorCode::DuplicateId,
                });
                continue;
            }
            vm.host_id = None;
            vm.status = VmStatus::Pending;
            vm.error_code = None;
            vms.push(vm);
        }

        let mut hosts = match self
            .inner
            .repository
            .get_host_descriptions(self.inner.history_entries, true, false)
            .await
        {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(error = %e, "Cannot read hosts for submission");
                Vec::new()
            }
        };

        let plan = self.inner.placement.place(vms, &mut hosts);

        for (host_id, vms) in plan.by_host() {
            let started = match self.inner.control.start_virtual_machines(&host_id, &vms).await {
                Ok(started) => started,
                Err(e) => {
                    warn!(host_id = %host_id, error = %e, "Failed to start virtual machines");
                    Vec::new()
                }
            };

            for mut vm in vms {
                if started.contains(&vm.id) {
                    vm.host_id = Some(host_id.clone());
                    vm.status = VmStatus::Running;
                    let vm_id = vm.id.clone();
                    let requested = vm.requested;
                    match self.inner.repository.add_virtual_machine(vm).await {
                        Ok(true) => {
                            self.inner.logger.log_vm_placed(&vm_id, &host_id, &requested);
                            response.placed.push(PlacedVirtualMachine {
                                vm_id,
                                host_id: host_id.clone(),
                            });
                        }
                        Ok(false) | Err(_) => {
                            warn!(vm_id = %vm_id, host_id = %host_id, "Host vanished before commit");
                            self.record_failure(&mut response, vm_id, requested, VmErrorCode::StartFailed)
                                .await;
                        }
                    }
                } else {
                    self.record_failure(&mut response, vm.id.clone(), vm.requested, VmErrorCode::StartFailed)
                        .await;
                }
            }
        }

        for vm in plan.unassigned {
            self.record_failure(&mut response, vm.id, vm.requested, VmErrorCode::NotEnoughResources)
                .await;
        }

        self.inner.metrics.add_vms_placed(response.placed.len() as u64);
        self.inner.metrics.add_vms_unplaced(response.failed.len() as u64);
        info!(
            task_id = %response.task_id,
            placed = response.placed.len(),
            failed = response.failed.len(),
            "Submission finished"
        );
        response
    }

    /// A VM that already lives on a host; failed leftovers may be resubmitted
    async fn is_placed(&self, vm_id: &str) -> bool {
        match self.inner.repository.get_virtual_machine(vm_id).await {
            Ok(existing) => existing.is_some_and(|vm| vm.host_id.is_some()),
            Err(e) => {
                warn!(vm_id = %vm_id, error = %e, "Cannot check for an existing virtual machine");
                false
            }
        }
    }

    async fn record_failure(
        &self,
        response: &mut SubmissionResponse,
        vm_id: VmId,
        requested: ResourceVector,
        code: VmErrorCode,
    ) {
        let mut vm = VirtualMachineMetaData::new(vm_id.clone(), requested, 0);
        vm.set_error(code);
        if let Err(e) = self.inner.repository.add_virtual_machine(vm).await {
            warn!(vm_id = %vm_id, error = %e, "Failed to record unplaced virtual machine");
        }
        self.inner.logger.log_vm_unplaced(&vm_id, &code.to_string());
        response.failed.push(FailedVirtualMachine {
            vm_id,
            error_code: code,
        });
    }

    /// Apply an operator action to a single VM
    ///
    /// Migration goes through the enforcer and holds the busy flag; the other
    /// actions are forwarded to the VM's host.
    pub async fn control_virtual_machine(
        &self,
        vm_id: &str,
        action: VmAction,
    ) -> Result<(), StateMachineError> {
        if let VmAction::Migrate { destination } = &action {
            return self.migrate_virtual_machine(vm_id, destination).await;
        }

        let vm = self
            .inner
            .repository
            .get_virtual_machine(vm_id)
            .await?
            .ok_or_else(|| StateMachineError::UnknownVirtualMachine(vm_id.to_string()))?;
        let host_id = vm
            .host_id
            .ok_or_else(|| StateMachineError::UnassignedVirtualMachine(vm_id.to_string()))?;

        self.inner
            .control
            .control_virtual_machine(&host_id, vm_id, &action)
            .await?;

        let repository = &self.inner.repository;
        match action {
            VmAction::Suspend => {
                repository
                    .update_virtual_machine_status(vm_id, VmStatus::Paused, None)
                    .await?
            }
            VmAction::Resume | VmAction::Reboot => {
                repository
                    .update_virtual_machine_status(vm_id, VmStatus::Running, None)
                    .await?
            }
            VmAction::Shutdown | VmAction::Destroy => {
                repository.remove_virtual_machine(vm_id).await?;
            }
            VmAction::Migrate { .. } => {}
        }
        info!(vm_id = %vm_id, host_id = %host_id, action = %action, "Virtual machine controlled");
        Ok(())
    }

    async fn migrate_virtual_machine(
        &self,
        vm_id: &str,
        destination: &str,
    ) -> Result<(), StateMachineError> {
        let _guard = self.try_acquire(ControllerState::Migrating)?;
        let repository = &self.inner.repository;

        let vm = repository
            .get_virtual_machine(vm_id)
            .await?
            .ok_or_else(|| StateMachineError::UnknownVirtualMachine(vm_id.to_string()))?;
        let source = vm
            .host_id
            .clone()
            .ok_or_else(|| StateMachineError::UnassignedVirtualMachine(vm_id.to_string()))?;

        let target = repository
            .get_host_description(destination, 0)
            .await?
            .filter(|host| host.status != HostStatus::Passive && host.id != source)
            .ok_or_else(|| StateMachineError::InvalidDestination(destination.to_string()))?;
        if !(target.requested_capacity() + vm.requested).fits_within(&target.total_capacity) {
            return Err(StateMachineError::InvalidDestination(destination.to_string()));
        }

        let mut plan = ReconfigurationPlan::new();
        plan.add(vm_id, Some(source), destination.to_string());
        let report = self.inner.enforcer.enforce(&plan).await;
        self.commit(&report).await;

        match report.outcome_of(vm_id) {
            Some(MigrationOutcome::Failed { reason }) => Err(ControlError::Rejected {
                host_id: destination.to_string(),
                reason: reason.clone(),
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Resolve an anomaly reported for a host
    pub async fn resolve_anomaly(
        &self,
        host_id: &str,
        state: LocalControllerState,
    ) -> Result<ResolutionReport, StateMachineError> {
        let _guard = self.try_acquire(ControllerState::ResolvingAnomaly)?;

        match self.inner.resolver.resolve(host_id, state).await {
            Ok(report) => {
                self.on_anomaly_resolved(&report).await;
                Ok(report)
            }
            Err(e) => {
                self.inner.metrics.inc_resolutions("failed");
                self.inner
                    .logger
                    .log_resolution_failed(host_id, state, &e.to_string());
                Err(e.into())
            }
        }
    }

    async fn on_anomaly_resolved(&self, report: &ResolutionReport) {
        self.commit(&report.enforcement).await;
        self.inner.metrics.inc_resolutions("resolved");
        if report.plan.hosts_released > 0 && report.enforcement.failed() == 0 {
            self.inner
                .metrics
                .add_hosts_released(report.plan.hosts_released as u64);
        }
        self.inner.logger.log_anomaly_resolved(
            &report.host_id,
            report.state,
            report.enforcement.len(),
            report.enforcement.failed(),
        );
        self.inner.resolver.finish();
    }

    /// Run the consolidation policy over the whole cluster and enforce it
    pub async fn start_reconfiguration(&self) -> Result<ReconfigurationReport, StateMachineError> {
        let _guard = self.try_acquire(ControllerState::Reconfiguring)?;

        let hosts = self
            .inner
            .repository
            .get_host_descriptions(self.inner.history_entries, true, true)
            .await?;
        let plan = self.inner.reconfiguration.reconfigure(hosts);

        let enforcement = if plan.is_empty() {
            EnforcementReport::default()
        } else {
            self.inner.enforcer.enforce(&plan).await
        };
        self.commit(&enforcement).await;

        self.inner.metrics.inc_reconfigurations();
        self.inner
            .metrics
            .add_hosts_released(plan.hosts_released as u64);
        self.inner
            .logger
            .log_reconfiguration_finished(plan.len(), plan.hosts_used, plan.hosts_released);

        Ok(ReconfigurationReport { plan, enforcement })
    }

    /// Wake PASSIVE hosts; true when every listed host is awake
    pub async fn on_wakeup_local_controllers(&self, host_ids: &[HostId]) -> bool {
        self.inner.wakeup.wake(host_ids).await.is_ok()
    }

    /// Power down ACTIVE hosts without VMs, keeping `reserved` of them on
    pub async fn power_down_idle_hosts(
        &self,
        reserved: usize,
        action: PowerAction,
    ) -> Result<Vec<HostId>, StateMachineError> {
        let _guard = self.try_acquire(ControllerState::PowerManagement)?;
        let repository = &self.inner.repository;

        let idle: Vec<_> = repository
            .get_host_descriptions(0, true, false)
            .await?
            .into_iter()
            .filter(|host| host.status == HostStatus::Active && !host.has_virtual_machines())
            .collect();

        let mut powered_down = Vec::new();
        for host in idle.into_iter().skip(reserved) {
            if !repository
                .compare_and_set_host_status(&host.id, HostStatus::Active, HostStatus::Passive)
                .await?
            {
                continue;
            }

            match self.inner.control.power_down(&host.id, action).await {
                Ok(()) => {
                    self.inner.metrics.inc_hosts_powered_down();
                    self.inner
                        .logger
                        .log_power_transition(&host.id, Some(action), true);
                    powered_down.push(host.id);
                }
                Err(e) => {
                    warn!(host_id = %host.id, error = %e, "Power action failed, keeping host active");
                    repository
                        .compare_and_set_host_status(&host.id, HostStatus::Passive, HostStatus::Active)
                        .await?;
                    self.inner
                        .logger
                        .log_power_transition(&host.id, Some(action), false);
                }
            }
        }

        Ok(powered_down)
    }

    /// Completion signal from a host for a running migration
    pub fn on_migration_completed(&self, vm_id: &str, success: bool) -> bool {
        self.inner.enforcer.signal_completion(vm_id, success)
    }

    async fn commit(&self, report: &EnforcementReport) {
        let repository = &self.inner.repository;
        for result in &report.results {
            let migration = &result.migration;
            self.inner.metrics.inc_migrations(result.outcome.label());
            self.inner.logger.log_migration_finished(
                &migration.vm_id,
                migration.source.as_deref(),
                &migration.destination,
                result.outcome.label(),
            );

            let committed = if result.outcome.is_relocated() {
                match repository
                    .move_virtual_machine(&migration.vm_id, &migration.destination)
                    .await
                {
                    Ok(()) => {
                        repository
                            .update_virtual_machine_status(&migration.vm_id, VmStatus::Running, None)
                            .await
                    }
                    Err(e) => Err(e),
                }
            } else {
                repository
                    .update_virtual_machine_status(
                        &migration.vm_id,
                        VmStatus::Error,
                        Some(VmErrorCode::MigrationFailed),
                    )
                    .await
            };

            if let Err(e) = committed {
                warn!(vm_id = %migration.vm_id, error = %e, "Failed to commit migration outcome");
            }
        }
    }
}

/// Builder for [`StateMachine`]
pub struct StateMachineBuilder {
    repository: Option<Arc<dyn GroupManagerRepository>>,
    control: Option<Arc<dyn NodeControl>>,
    settings: ControllerSettings,
    node_name: String,
}

impl StateMachineBuilder {
    pub fn new() -> Self {
        Self {
            repository: None,
            control: None,
            settings: ControllerSettings::default(),
            node_name: "group-manager".to_string(),
        }
    }

    pub fn repository(mut self, repository: Arc<dyn GroupManagerRepository>) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn control(mut self, control: Arc<dyn NodeControl>) -> Self {
        self.control = Some(control);
        self
    }

    pub fn settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = node_name.into();
        self
    }

    pub fn build(self) -> Result<StateMachine> {
        let repository = self
            .repository
            .ok_or_else(|| anyhow!("Repository is required"))?;
        let control = self.control.ok_or_else(|| anyhow!("Node control is required"))?;

        let settings = &self.settings;
        let estimator = settings.estimator();
        let ranking = settings.ranking();
        let policies = RelocationPolicies::new(
            overload_policy_from_name(&settings.policies.overload_relocation, ranking.clone()),
            underload_policy_from_name(&settings.policies.underload_relocation, ranking.clone()),
        );
        let placement = placement_policy_from_name(&settings.policies.placement, estimator);
        let reconfiguration =
            reconfiguration_policy_from_name(&settings.policies.reconfiguration, ranking);

        let logger = EventLogger::new(self.node_name);
        let history_entries = settings.estimator.window_size;
        let enforcer =
            MigrationPlanEnforcer::new(control.clone(), settings.enforcement.migration_timeout());
        let wakeup = WakeupCoordinator::new(repository.clone(), control.clone(), logger.clone());
        let resolver = AnomalyResolver::new(
            repository.clone(),
            policies,
            wakeup.clone(),
            enforcer.clone(),
            history_entries,
        );
        let (state, _) = watch::channel(ControllerState::Idle);

        info!(
            placement = placement.name(),
            reconfiguration = reconfiguration.name(),
            migration_timeout_secs = enforcer.timeout().as_secs(),
            "State machine configured"
        );

        Ok(StateMachine {
            inner: Arc::new(Inner {
                repository,
                control,
                placement,
                reconfiguration,
                resolver,
                enforcer,
                wakeup,
                busy: Arc::new(AtomicBool::new(false)),
                state: Arc::new(state),
                submissions: DashMap::new(),
                history_entries,
                metrics: ControllerMetrics::new(),
                logger,
            }),
        })
    }
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
