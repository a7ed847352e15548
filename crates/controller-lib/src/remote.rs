//! Control surface of the local controllers
//!
//! The group controller never talks to a hypervisor directly. Everything it
//! asks of a host goes through [`NodeControl`]; transport and power drivers
//! live behind that trait.

use crate::error::ControlError;
use crate::models::{Migration, PowerAction, VirtualMachineMetaData, VmAction, VmId};
use async_trait::async_trait;
use tracing::info;

/// How a migration request was accepted by the hosts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStart {
    /// Running asynchronously; completion is signaled later
    Started,
    /// Already finished when the call returned
    Completed,
}

/// Remote operations on hosts and their VMs
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Start a batch of VMs on one host, returning the ids that started
    async fn start_virtual_machines(
        &self,
        host_id: &str,
        vms: &[VirtualMachineMetaData],
    ) -> Result<Vec<VmId>, ControlError>;

    async fn migrate_virtual_machine(&self, migration: &Migration) -> Result<MigrationStart, ControlError>;

    /// Suspend the source copy so a lingering migration can converge
    async fn suspend_virtual_machine_on_migration(
        &self,
        host_id: &str,
        vm_id: &str,
    ) -> Result<(), ControlError>;

    async fn control_virtual_machine(
        &self,
        host_id: &str,
        vm_id: &str,
        action: &VmAction,
    ) -> Result<(), ControlError>;

    async fn power_down(&self, host_id: &str, action: PowerAction) -> Result<(), ControlError>;

    async fn wake_up(&self, host_id: &str) -> Result<(), ControlError>;
}

/// Dry-run control surface that accepts every request
///
/// Migrations complete synchronously. Useful for running the controller
/// without hosts attached and for previewing decisions.
#[derive(Debug, Default, Clone)]
pub struct LoggingNodeControl;

impl LoggingNodeControl {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NodeControl for LoggingNodeControl {
    async fn start_virtual_machines(
        &self,
        host_id: &str,
        vms: &[VirtualMachineMetaData],
    ) -> Result<Vec<VmId>, ControlError> {
        info!(host_id = %host_id, count = vms.len(), "dry-run: start virtual machines");
        Ok(vms.iter().map(|vm| vm.id.clone()).collect())
    }

    async fn migrate_virtual_machine(&self, migration: &Migration) -> Result<MigrationStart, ControlError> {
        info!(
            vm_id = %migration.vm_id,
            source = ?migration.source,
            destination = %migration.destination,
            "dry-run: migrate virtual machine"
        );
        Ok(MigrationStart::Completed)
    }

    async fn suspend_virtual_machine_on_migration(
        &self,
        host_id: &str,
        vm_id: &str,
    ) -> Result<(), ControlError> {
        info!(host_id = %host_id, vm_id = %vm_id, "dry-run: suspend on migration");
        Ok(())
    }

    async fn control_virtual_machine(
        &self,
        host_id: &str,
        vm_id: &str,
        action: &VmAction,
    ) -> Result<(), ControlError> {
        info!(host_id = %host_id, vm_id = %vm_id, action = %action, "dry-run: control virtual machine");
        Ok(())
    }

    async fn power_down(&self, host_id: &str, action: PowerAction) -> Result<(), ControlError> {
        info!(host_id = %host_id, action = %action, "dry-run: power down host");
        Ok(())
    }

    async fn wake_up(&self, host_id: &str) -> Result<(), ControlError> {
        info!(host_id = %host_id, "dry-run: wake up host");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceVector;

    #[tokio::test]
    async fn test_logging_control_accepts_everything() {
        let control = LoggingNodeControl::new();
        let vms = vec![
            VirtualMachineMetaData::new("v1", ResourceVector::zero(), 1),
            VirtualMachineMetaData::new("v2", ResourceVector::zero(), 1),
        ];

        let started = control.start_virtual_machines("h1", &vms).await.unwrap();
        assert_eq!(started, vec!["v1".to_string(), "v2".to_string()]);

        let migration = Migration {
            vm_id: "v1".to_string(),
            source: Some("h1".to_string()),
            destination: "h2".to_string(),
        };
        assert_eq!(
            control.migrate_virtual_machine(&migration).await.unwrap(),
            MigrationStart::Completed
        );
        assert!(control.power_down("h1", PowerAction::SuspendToRam).await.is_ok());
        assert!(control.wake_up("h1").await.is_ok());
    }
}
