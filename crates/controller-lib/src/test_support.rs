//! Shared doubles and fixtures for unit tests

use crate::error::ControlError;
use crate::models::{
    HostId, LocalControllerDescription, Migration, MonitoringSample, PowerAction, ResourceVector,
    VirtualMachineMetaData, VmAction, VmId,
};
use crate::remote::{MigrationStart, NodeControl};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

pub(crate) const HISTORY: usize = 10;

pub(crate) fn vm(id: &str, usage: [f64; 4]) -> VirtualMachineMetaData {
    let usage = ResourceVector::from(usage);
    let mut vm = VirtualMachineMetaData::new(id, usage, HISTORY);
    vm.history.push(MonitoringSample::new(0, usage));
    vm
}

pub(crate) fn host(id: &str, capacity: f64, vms: Vec<VirtualMachineMetaData>) -> LocalControllerDescription {
    let mut host = LocalControllerDescription::new(
        id,
        ResourceVector::new(capacity, capacity, capacity, capacity),
        HISTORY,
    );
    for vm in vms {
        host.assign_virtual_machine(vm);
    }
    host
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MigrationMode {
    Complete,
    Pending,
    /// The migrate call never returns
    Hang,
    Reject,
}

/// Control surface whose answers are scripted per VM and per host
pub(crate) struct ScriptedNodeControl {
    default_migration: Mutex<MigrationMode>,
    migrations: Mutex<HashMap<VmId, MigrationMode>>,
    failing_hosts: Mutex<HashSet<HostId>>,
    suspend_fails: AtomicBool,
    suspend_calls: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedNodeControl {
    pub(crate) fn new() -> Self {
        Self {
            default_migration: Mutex::new(MigrationMode::Complete),
            migrations: Mutex::new(HashMap::new()),
            failing_hosts: Mutex::new(HashSet::new()),
            suspend_fails: AtomicBool::new(false),
            suspend_calls: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_default_migration(self, mode: MigrationMode) -> Self {
        *self.default_migration.lock().unwrap() = mode;
        self
    }

    pub(crate) fn set_migration(&self, vm_id: &str, mode: MigrationMode) {
        self.migrations
            .lock()
            .unwrap()
            .insert(vm_id.to_string(), mode);
    }

    /// Every call naming this host fails as unreachable
    pub(crate) fn fail_host(&self, host_id: &str) {
        self.failing_hosts
            .lock()
            .unwrap()
            .insert(host_id.to_string());
    }

    pub(crate) fn fail_suspend(&self) {
        self.suspend_fails.store(true, Ordering::SeqCst);
    }

    pub(crate) fn suspend_calls(&self) -> usize {
        self.suspend_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn check_host(&self, host_id: &str) -> Result<(), ControlError> {
        if self.failing_hosts.lock().unwrap().contains(host_id) {
            return Err(ControlError::Unreachable {
                host_id: host_id.to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NodeControl for ScriptedNodeControl {
    async fn start_virtual_machines(
        &self,
        host_id: &str,
        vms: &[VirtualMachineMetaData],
    ) -> Result<Vec<VmId>, ControlError> {
        self.record(format!("start:{}", host_id));
        self.check_host(host_id)?;
        Ok(vms.iter().map(|vm| vm.id.clone()).collect())
    }

    async fn migrate_virtual_machine(&self, migration: &Migration) -> Result<MigrationStart, ControlError> {
        self.record(format!("migrate:{}->{}", migration.vm_id, migration.destination));
        self.check_host(&migration.destination)?;
        let mode = self
            .migrations
            .lock()
            .unwrap()
            .get(&migration.vm_id)
            .copied()
            .unwrap_or(*self.default_migration.lock().unwrap());
        match mode {
            MigrationMode::Complete => Ok(MigrationStart::Completed),
            MigrationMode::Pending => Ok(MigrationStart::Started),
            MigrationMode::Hang => std::future::pending().await,
            MigrationMode::Reject => Err(ControlError::Rejected {
                host_id: migration.destination.clone(),
                reason: "scripted rejection".to_string(),
            }),
        }
    }

    async fn suspend_virtual_machine_on_migration(
        &self,
        host_id: &str,
        vm_id: &str,
    ) -> Result<(), ControlError> {
        self.suspend_calls.fetch_add(1, Ordering::SeqCst);
        self.record(format!("suspend:{}:{}", host_id, vm_id));
        if self.suspend_fails.load(Ordering::SeqCst) {
            return Err(ControlError::Rejected {
                host_id: host_id.to_string(),
                reason: "suspend refused".to_string(),
            });
        }
        Ok(())
    }

    async fn control_virtual_machine(
        &self,
        host_id: &str,
        vm_id: &str,
        action: &VmAction,
    ) -> Result<(), ControlError> {
        self.record(format!("control:{}:{}:{}", host_id, vm_id, action));
        self.check_host(host_id)
    }

    async fn power_down(&self, host_id: &str, action: PowerAction) -> Result<(), ControlError> {
        self.record(format!("power:{}:{}", host_id, action));
        self.check_host(host_id)
    }

    async fn wake_up(&self, host_id: &str) -> Result<(), ControlError> {
        self.record(format!("wake:{}", host_id));
        self.check_host(host_id)
    }
}
