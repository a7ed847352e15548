//! Cluster-state repository
//!
//! The repository owns the canonical host and VM descriptions. Workflows read
//! snapshots from it and only the state machine writes plans back. Host
//! status changes are compare-and-set so racing workflows cannot clobber
//! each other.

use crate::error::RepositoryError;
use crate::models::{
    HostId, HostStatus, LocalControllerDescription, MonitoringSample, VirtualMachineMetaData,
    VmErrorCode, VmId, VmStatus,
};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

/// Read/write contract of the cluster-state store
#[async_trait]
pub trait GroupManagerRepository: Send + Sync {
    /// Snapshot of host descriptions, sorted by host id
    ///
    /// Histories are cut down to the `number_of_history_entries` most recent
    /// samples, or emptied when `include_monitoring_data` is false.
    async fn get_host_descriptions(
        &self,
        number_of_history_entries: usize,
        exclude_passive: bool,
        include_monitoring_data: bool,
    ) -> Result<Vec<LocalControllerDescription>, RepositoryError>;

    async fn get_host_description(
        &self,
        host_id: &str,
        number_of_history_entries: usize,
    ) -> Result<Option<LocalControllerDescription>, RepositoryError>;

    /// Register a host; replaces an existing one with the same id
    async fn add_host(&self, host: LocalControllerDescription) -> Result<(), RepositoryError>;

    async fn host_status(&self, host_id: &str) -> Result<HostStatus, RepositoryError>;

    /// Unconditional status change; false if the host is unknown
    async fn change_host_status(
        &self,
        host_id: &str,
        new_status: HostStatus,
    ) -> Result<bool, RepositoryError>;

    /// Atomic status transition; true only if the current status was `expected`
    async fn compare_and_set_host_status(
        &self,
        host_id: &str,
        expected: HostStatus,
        new_status: HostStatus,
    ) -> Result<bool, RepositoryError>;

    /// Store a VM on its `host_id`, or as unassigned when it has none
    ///
    /// Returns false when the VM names a host that is not known.
    async fn add_virtual_machine(&self, vm: VirtualMachineMetaData) -> Result<bool, RepositoryError>;

    async fn get_virtual_machine(
        &self,
        vm_id: &str,
    ) -> Result<Option<VirtualMachineMetaData>, RepositoryError>;

    async fn update_virtual_machine_status(
        &self,
        vm_id: &str,
        status: VmStatus,
        error_code: Option<VmErrorCode>,
    ) -> Result<(), RepositoryError>;

    /// Relocate a VM to another host, keeping its history
    async fn move_virtual_machine(&self, vm_id: &str, destination: &str) -> Result<(), RepositoryError>;

    async fn remove_virtual_machine(
        &self,
        vm_id: &str,
    ) -> Result<Option<VirtualMachineMetaData>, RepositoryError>;

    async fn add_host_monitoring_sample(
        &self,
        host_id: &str,
        sample: MonitoringSample,
    ) -> Result<(), RepositoryError>;

    async fn add_vm_monitoring_sample(
        &self,
        vm_id: &str,
        sample: MonitoringSample,
    ) -> Result<(), RepositoryError>;
}

/// In-process repository with per-host entries
///
/// Each host is its own map entry, so operations on different hosts do not
/// contend. A VM index maps every assigned VM to its host.
#[derive(Default)]
pub struct InMemoryRepository {
    hosts: DashMap<HostId, LocalControllerDescription>,
    vm_index: DashMap<VmId, HostId>,
    unassigned: DashMap<VmId, VirtualMachineMetaData>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a repository pre-populated with hosts and their VMs
    pub fn with_hosts(hosts: impl IntoIterator<Item = LocalControllerDescription>) -> Self {
        let repository = Self::new();
        for host in hosts {
            repository.insert_host(host);
        }
        repository
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn unassigned_count(&self) -> usize {
        self.unassigned.len()
    }

    fn insert_host(&self, host: LocalControllerDescription) {
        for vm_id in host.virtual_machines.keys() {
            self.vm_index.insert(vm_id.clone(), host.id.clone());
        }
        self.hosts.insert(host.id.clone(), host);
    }

    fn host_of(&self, vm_id: &str) -> Option<HostId> {
        self.vm_index.get(vm_id).map(|entry| entry.value().clone())
    }
}

fn trim_history(host: &mut LocalControllerDescription, entries: usize, include: bool) {
    let keep = if include { entries } else { 0 };
    host.history.retain_latest(keep);
    for vm in host.virtual_machines.values_mut() {
        vm.history.retain_latest(keep);
    }
}

#[async_trait]
impl GroupManagerRepository for InMemoryRepository {
    async fn get_host_descriptions(
        &self,
        number_of_history_entries: usize,
        exclude_passive: bool,
        include_monitoring_data: bool,
    ) -> Result<Vec<LocalControllerDescription>, RepositoryError> {
        let mut hosts: Vec<_> = self
            .hosts
            .iter()
            .filter(|entry| !(exclude_passive && entry.is_passive()))
            .map(|entry| {
                let mut host = entry.value().clone();
                trim_history(&mut host, number_of_history_entries, include_monitoring_data);
                host
            })
            .collect();
        hosts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(hosts)
    }

    async fn get_host_description(
        &self,
        host_id: &str,
        number_of_history_entries: usize,
    ) -> Result<Option<LocalControllerDescription>, RepositoryError> {
        Ok(self.hosts.get(host_id).map(|entry| {
            let mut host = entry.value().clone();
            trim_history(&mut host, number_of_history_entries, true);
            host
        }))
    }

    async fn add_host(&self, host: LocalControllerDescription) -> Result<(), RepositoryError> {
        debug!(host_id = %host.id, "Adding host to repository");
        if let Some((_, previous)) = self.hosts.remove(&host.id) {
            for vm_id in previous.virtual_machines.keys() {
                self.vm_index.remove(vm_id);
            }
        }
        self.insert_host(host);
        Ok(())
    }

    async fn host_status(&self, host_id: &str) -> Result<HostStatus, RepositoryError> {
        self.hosts
            .get(host_id)
            .map(|entry| entry.status)
            .ok_or_else(|| RepositoryError::HostNotFound(host_id.to_string()))
    }

    async fn change_host_status(
        &self,
        host_id: &str,
        new_status: HostStatus,
    ) -> Result<bool, RepositoryError> {
        match self.hosts.get_mut(host_id) {
            Some(mut entry) => {
                entry.status = new_status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn compare_and_set_host_status(
        &self,
        host_id: &str,
        expected: HostStatus,
        new_status: HostStatus,
    ) -> Result<bool, RepositoryError> {
        let mut entry = self
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| RepositoryError::HostNotFound(host_id.to_string()))?;
        if entry.status != expected {
            return Ok(false);
        }
        entry.status = new_status;
        debug!(host_id = %host_id, from = %expected, to = %new_status, "Host status changed");
        Ok(true)
    }

    async fn add_virtual_machine(&self, vm: VirtualMachineMetaData) -> Result<bool, RepositoryError> {
        let vm_id = vm.id.clone();
        let target = vm.host_id.clone();
        let previous = self.host_of(&vm_id);

        match &target {
            None => {
                self.unassigned.insert(vm_id.clone(), vm);
                self.vm_index.remove(&vm_id);
            }
            Some(host_id) => {
                match self.hosts.get_mut(host_id) {
                    Some(mut host) => host.assign_virtual_machine(vm),
                    None => return Ok(false),
                }
                self.unassigned.remove(&vm_id);
                self.vm_index.insert(vm_id.clone(), host_id.clone());
            }
        }

        // A VM is stored in exactly one place
        if let Some(previous) = previous.filter(|p| target.as_ref() != Some(p)) {
            if let Some(mut host) = self.hosts.get_mut(&previous) {
                host.remove_virtual_machine(&vm_id);
            }
            debug!(vm_id = %vm_id, from = %previous, "Dropped previous placement");
        }
        Ok(true)
    }

    async fn get_virtual_machine(
        &self,
        vm_id: &str,
    ) -> Result<Option<VirtualMachineMetaData>, RepositoryError> {
        if let Some(host_id) = self.host_of(vm_id) {
            let vm = self
                .hosts
                .get(&host_id)
                .and_then(|host| host.virtual_machines.get(vm_id).cloned());
            return Ok(vm);
        }
        Ok(self.unassigned.get(vm_id).map(|entry| entry.value().clone()))
    }

    async fn update_virtual_machine_status(
        &self,
        vm_id: &str,
        status: VmStatus,
        error_code: Option<VmErrorCode>,
    ) -> Result<(), RepositoryError> {
        let apply = |vm: &mut VirtualMachineMetaData| {
            vm.status = status;
            vm.error_code = error_code;
        };

        if let Some(host_id) = self.host_of(vm_id) {
            let mut host = self
                .hosts
                .get_mut(&host_id)
                .ok_or_else(|| RepositoryError::HostNotFound(host_id.clone()))?;
            let vm = host
                .virtual_machines
                .get_mut(vm_id)
                .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;
            apply(vm);
            return Ok(());
        }

        let mut vm = self
            .unassigned
            .get_mut(vm_id)
            .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;
        apply(vm.value_mut());
        Ok(())
    }

    async fn move_virtual_machine(&self, vm_id: &str, destination: &str) -> Result<(), RepositoryError> {
        if !self.hosts.contains_key(destination) {
            return Err(RepositoryError::HostNotFound(destination.to_string()));
        }
        let source = self
            .host_of(vm_id)
            .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;
        if source == destination {
            return Ok(());
        }

        let vm = self
            .hosts
            .get_mut(&source)
            .and_then(|mut host| host.remove_virtual_machine(vm_id))
            .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;

        let placed = match self.hosts.get_mut(destination) {
            Some(mut host) => {
                host.assign_virtual_machine(vm);
                None
            }
            None => Some(vm),
        };

        // Destination vanished between the check and the insert
        if let Some(vm) = placed {
            if let Some(mut host) = self.hosts.get_mut(&source) {
                host.assign_virtual_machine(vm);
            }
            return Err(RepositoryError::HostNotFound(destination.to_string()));
        }

        self.vm_index.insert(vm_id.to_string(), destination.to_string());
        Ok(())
    }

    async fn remove_virtual_machine(
        &self,
        vm_id: &str,
    ) -> Result<Option<VirtualMachineMetaData>, RepositoryError> {
        if let Some((_, host_id)) = self.vm_index.remove(vm_id) {
            return Ok(self
                .hosts
                .get_mut(&host_id)
                .and_then(|mut host| host.remove_virtual_machine(vm_id)));
        }
        Ok(self.unassigned.remove(vm_id).map(|(_, vm)| vm))
    }

    async fn add_host_monitoring_sample(
        &self,
        host_id: &str,
        sample: MonitoringSample,
    ) -> Result<(), RepositoryError> {
        let mut host = self
            .hosts
            .get_mut(host_id)
            .ok_or_else(|| RepositoryError::HostNotFound(host_id.to_string()))?;
        host.history.push(sample);
        Ok(())
    }

    async fn add_vm_monitoring_sample(
        &self,
        vm_id: &str,
        sample: MonitoringSample,
    ) -> Result<(), RepositoryError> {
        let host_id = self
            .host_of(vm_id)
            .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;
        let mut host = self
            .hosts
            .get_mut(&host_id)
            .ok_or_else(|| RepositoryError::HostNotFound(host_id.clone()))?;
        let vm = host
            .virtual_machines
            .get_mut(vm_id)
            .ok_or_else(|| RepositoryError::VmNotFound(vm_id.to_string()))?;
        vm.history.push(sample);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceVector;
    use std::sync::Arc;

    fn host(id: &str) -> LocalControllerDescription {
        LocalControllerDescription::new(id, ResourceVector::new(8.0, 8.0, 8.0, 8.0), 5)
    }

    fn vm(id: &str, host_id: Option<&str>) -> VirtualMachineMetaData {
        let mut vm = VirtualMachineMetaData::new(id, ResourceVector::new(1.0, 1.0, 1.0, 1.0), 5);
        vm.host_id = host_id.map(str::to_string);
        vm
    }

    #[tokio::test]
    async fn test_snapshot_is_sorted_and_filters_passive() {
        let mut passive = host("b");
        passive.status = HostStatus::Passive;
        let repo = InMemoryRepository::with_hosts(vec![host("c"), passive, host("a")]);

        let all = repo.get_host_descriptions(5, false, true).await.unwrap();
        let ids: Vec<_> = all.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let active = repo.get_host_descriptions(5, true, true).await.unwrap();
        assert_eq!(active.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot_trims_history() {
        let repo = InMemoryRepository::with_hosts(vec![host("a")]);
        repo.add_virtual_machine(vm("v1", Some("a"))).await.unwrap();
        for t in 0..5 {
            let sample = MonitoringSample::new(t, ResourceVector::new(1.0, 1.0, 1.0, 1.0));
            repo.add_host_monitoring_sample("a", sample).await.unwrap();
            repo.add_vm_monitoring_sample("v1", sample).await.unwrap();
        }

        let hosts = repo.get_host_descriptions(2, false, true).await.unwrap();
        assert_eq!(hosts[0].history.len(), 2);
        assert_eq!(hosts[0].virtual_machines["v1"].history.len(), 2);

        let hosts = repo.get_host_descriptions(2, false, false).await.unwrap();
        assert!(hosts[0].history.is_empty());
    }

    #[tokio::test]
    async fn test_compare_and_set_status() {
        let repo = InMemoryRepository::with_hosts(vec![host("a")]);

        assert!(repo
            .compare_and_set_host_status("a", HostStatus::Active, HostStatus::Passive)
            .await
            .unwrap());
        assert!(!repo
            .compare_and_set_host_status("a", HostStatus::Active, HostStatus::Passive)
            .await
            .unwrap());
        assert_eq!(repo.host_status("a").await.unwrap(), HostStatus::Passive);
        assert!(repo
            .compare_and_set_host_status("missing", HostStatus::Active, HostStatus::Passive)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_concurrent_cas_has_single_winner() {
        let repo = Arc::new(InMemoryRepository::with_hosts(vec![host("a")]));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.compare_and_set_host_status("a", HostStatus::Active, HostStatus::Passive)
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_move_virtual_machine() {
        let repo = InMemoryRepository::with_hosts(vec![host("a"), host("b")]);
        repo.add_virtual_machine(vm("v1", Some("a"))).await.unwrap();

        repo.move_virtual_machine("v1", "b").await.unwrap();

        let moved = repo.get_virtual_machine("v1").await.unwrap().unwrap();
        assert_eq!(moved.host_id.as_deref(), Some("b"));
        let a = repo.get_host_description("a", 0).await.unwrap().unwrap();
        assert!(!a.has_virtual_machines());

        assert!(matches!(
            repo.move_virtual_machine("v1", "zz").await,
            Err(RepositoryError::HostNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_unassigned_virtual_machines() {
        let repo = InMemoryRepository::with_hosts(vec![host("a")]);

        assert!(repo.add_virtual_machine(vm("lost", None)).await.unwrap());
        assert!(!repo.add_virtual_machine(vm("orphan", Some("zz"))).await.unwrap());
        assert_eq!(repo.unassigned_count(), 1);

        repo.update_virtual_machine_status(
            "lost",
            VmStatus::Error,
            Some(VmErrorCode::NotEnoughResources),
        )
        .await
        .unwrap();
        let lost = repo.get_virtual_machine("lost").await.unwrap().unwrap();
        assert_eq!(lost.error_code, Some(VmErrorCode::NotEnoughResources));

        assert!(repo.remove_virtual_machine("lost").await.unwrap().is_some());
        assert!(repo.get_virtual_machine("lost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_readding_virtual_machine_replaces_previous_copy() {
        let repo = InMemoryRepository::with_hosts(vec![host("a"), host("b")]);
        repo.add_virtual_machine(vm("v1", Some("a"))).await.unwrap();

        assert!(repo.add_virtual_machine(vm("v1", Some("b"))).await.unwrap());

        let hosts = repo.get_host_descriptions(0, false, true).await.unwrap();
        let holders: Vec<_> = hosts
            .iter()
            .filter(|h| h.virtual_machines.contains_key("v1"))
            .map(|h| h.id.as_str())
            .collect();
        assert_eq!(holders, vec!["b"]);

        repo.add_virtual_machine(vm("v1", None)).await.unwrap();
        let hosts = repo.get_host_descriptions(0, false, true).await.unwrap();
        assert!(hosts.iter().all(|h| !h.has_virtual_machines()));
        let v1 = repo.get_virtual_machine("v1").await.unwrap().unwrap();
        assert!(v1.host_id.is_none());
    }
}
