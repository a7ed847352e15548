//! Cluster snapshot files for offline planning

use anyhow::{Context, Result};
use controller_lib::{
    models::{LocalControllerDescription, VirtualMachineMetaData},
    ControllerSettings,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Hosts with their VMs and monitoring history, plus the settings to plan with
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    pub hosts: Vec<LocalControllerDescription>,
    #[serde(default)]
    pub settings: ControllerSettings,
}

impl ClusterSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read snapshot {}", path.display()))?;
        let mut snapshot: ClusterSnapshot = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse snapshot {}", path.display()))?;

        // VM locations are implied by the host they are listed under
        for host in &mut snapshot.hosts {
            let host_id = host.id.clone();
            for vm in host.virtual_machines.values_mut() {
                vm.host_id = Some(host_id.clone());
            }
        }

        Ok(snapshot)
    }

    pub fn host(&self, host_id: &str) -> Option<&LocalControllerDescription> {
        self.hosts.iter().find(|host| host.id == host_id)
    }
}

/// Load a JSON array of virtual machines to place
pub fn load_virtual_machines(path: &Path) -> Result<Vec<VirtualMachineMetaData>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_assigns_vm_locations() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "hosts": [{{
                    "id": "lc-1",
                    "total_capacity": [8, 8, 8, 8],
                    "virtual_machines": {{
                        "vm-1": {{"id": "vm-1", "requested": [1, 1, 1, 1]}}
                    }}
                }}]
            }}"#
        )
        .unwrap();

        let snapshot = ClusterSnapshot::load(file.path()).unwrap();
        let host = snapshot.host("lc-1").unwrap();
        assert_eq!(host.virtual_machines["vm-1"].host_id.as_deref(), Some("lc-1"));
        assert_eq!(snapshot.settings, ControllerSettings::default());
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        assert!(ClusterSnapshot::load(Path::new("/nonexistent/snapshot.json")).is_err());
    }
}
