//! Offline plan previews
//!
//! Each command loads a snapshot, runs the same policies the controller
//! would, and prints the resulting plan without touching any host.

use anyhow::{bail, Result};
use colored::Colorize;
use controller_lib::{
    anomaly::AnomalyDetector,
    models::{HostStatus, LocalControllerState, ReconfigurationPlan, ResourceVector},
    policy::{
        overload_policy_from_name, placement_policy_from_name, reconfiguration_policy_from_name,
        underload_policy_from_name, RelocationPolicies,
    },
};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    format_resources, format_utilization, paint, print_info, print_json, print_success,
    print_table, print_warning, OutputFormat, Tone, Toned,
};
use crate::snapshot::{load_virtual_machines, ClusterSnapshot};

#[derive(Tabled)]
struct PlacementRow {
    #[tabled(rename = "VM")]
    vm_id: String,
    #[tabled(rename = "Requested")]
    requested: String,
    #[tabled(rename = "Host")]
    host: String,
}

#[derive(Tabled)]
struct DetectionRow {
    #[tabled(rename = "Host")]
    host_id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "VMs")]
    vms: usize,
    #[tabled(rename = "Utilization (cpu/mem/rx/tx)")]
    utilization: String,
    #[tabled(rename = "State")]
    state: String,
}

#[derive(Tabled)]
struct MigrationRow {
    #[tabled(rename = "VM")]
    vm_id: String,
    #[tabled(rename = "From")]
    source: String,
    #[tabled(rename = "To")]
    destination: String,
}

#[derive(Serialize)]
struct HostClassification {
    host_id: String,
    status: HostStatus,
    utilization: ResourceVector,
    state: LocalControllerState,
}

#[derive(Serialize)]
struct RelocationPreview {
    host_id: String,
    state: LocalControllerState,
    policy: String,
    plan: ReconfigurationPlan,
}

/// Preview where a batch of new VMs would land
pub fn place(
    snapshot_path: &Path,
    vms_path: &Path,
    policy: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = ClusterSnapshot::load(snapshot_path)?;
    let vms = load_virtual_machines(vms_path)?;
    let settings = &snapshot.settings;
    let policy_name = policy.unwrap_or(&settings.policies.placement);
    let placement = placement_policy_from_name(policy_name, settings.estimator());

    let mut hosts: Vec<_> = snapshot
        .hosts
        .into_iter()
        .filter(|host| !host.is_passive())
        .collect();
    let plan = placement.place(vms, &mut hosts);

    match format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Table => {
            print_info(&format!("Placement policy: {}", placement.name()));
            let mut rows: Vec<PlacementRow> = plan
                .assignments
                .iter()
                .map(|assignment| PlacementRow {
                    vm_id: assignment.vm.id.clone(),
                    requested: format_resources(&assignment.vm.requested),
                    host: assignment.host_id.clone(),
                })
                .collect();
            rows.extend(plan.unassigned.iter().map(|vm| PlacementRow {
                vm_id: vm.id.clone(),
                requested: format_resources(&vm.requested),
                host: paint("unplaced", Tone::Critical),
            }));
            print_table(&rows, "No virtual machines to place");

            if plan.unassigned.is_empty() {
                print_success(&format!("{} virtual machines placed", plan.assignments.len()));
            } else {
                print_warning(&format!(
                    "{} virtual machines could not be placed",
                    plan.unassigned.len()
                ));
            }
        }
    }

    Ok(())
}

/// Classify every host of the snapshot
pub fn detect(snapshot_path: &Path, format: OutputFormat) -> Result<()> {
    let snapshot = ClusterSnapshot::load(snapshot_path)?;
    let detector = AnomalyDetector::new(snapshot.settings.estimator());

    let classifications: Vec<HostClassification> = snapshot
        .hosts
        .iter()
        .map(|host| {
            let (utilization, state) = detector.evaluate(host);
            HostClassification {
                host_id: host.id.clone(),
                status: host.status,
                utilization,
                state,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&classifications)?,
        OutputFormat::Table => {
            let rows: Vec<DetectionRow> = classifications
                .iter()
                .zip(&snapshot.hosts)
                .map(|(classification, host)| DetectionRow {
                    host_id: classification.host_id.clone(),
                    status: classification.status.painted(),
                    vms: host.virtual_machines.len(),
                    utilization: format_utilization(&classification.utilization),
                    state: classification.state.painted(),
                })
                .collect();
            print_table(&rows, "Snapshot has no hosts");

            let anomalies = classifications
                .iter()
                .filter(|c| c.status == HostStatus::Active && c.state.is_anomaly())
                .count();
            if anomalies > 0 {
                print_warning(&format!("{} active hosts need relocation", anomalies));
            }
        }
    }

    Ok(())
}

/// Preview the relocation plan for one host
pub fn relocate(snapshot_path: &Path, host_id: &str, format: OutputFormat) -> Result<()> {
    let snapshot = ClusterSnapshot::load(snapshot_path)?;
    let settings = &snapshot.settings;
    let Some(source) = snapshot.host(host_id) else {
        bail!("Host {} is not in the snapshot", host_id);
    };

    let state = AnomalyDetector::new(settings.estimator()).classify(source);
    let ranking = settings.ranking();
    let policies = RelocationPolicies::new(
        overload_policy_from_name(&settings.policies.overload_relocation, ranking.clone()),
        underload_policy_from_name(&settings.policies.underload_relocation, ranking),
    );
    let Some(policy) = policies.for_state(state) else {
        print_info(&format!("Host {} is {}, nothing to relocate", host_id, state));
        return Ok(());
    };

    let mut destinations: Vec<_> = snapshot
        .hosts
        .iter()
        .filter(|host| host.id != source.id)
        .filter(|host| policy.includes_passive_destinations() || !host.is_passive())
        .cloned()
        .collect();
    let plan = policy.relocate(source, &mut destinations);

    match format {
        OutputFormat::Json => print_json(&RelocationPreview {
            host_id: host_id.to_string(),
            state,
            policy: policy.name().to_string(),
            plan,
        })?,
        OutputFormat::Table => {
            println!(
                "{} {} is {} ({})",
                "Host".bold(),
                host_id.cyan(),
                state.painted(),
                policy.name()
            );
            print_migrations(&plan);
            if plan.hosts_released > 0 {
                print_success(&format!("Host {} would be released", host_id));
            }
        }
    }

    Ok(())
}

/// Preview a consolidation run over the whole snapshot
pub fn consolidate(snapshot_path: &Path, format: OutputFormat) -> Result<()> {
    let snapshot = ClusterSnapshot::load(snapshot_path)?;
    let settings = &snapshot.settings;
    let policy = reconfiguration_policy_from_name(&settings.policies.reconfiguration, settings.ranking());
    let plan = policy.reconfigure(snapshot.hosts.clone());

    match format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Table => {
            print_info(&format!("Consolidation policy: {}", policy.name()));
            print_migrations(&plan);
            println!("Hosts used:             {}", plan.hosts_used);
            println!("Hosts released:         {}", plan.hosts_released);
        }
    }

    Ok(())
}

fn print_migrations(plan: &ReconfigurationPlan) {
    let rows: Vec<MigrationRow> = plan
        .iter()
        .map(|migration| MigrationRow {
            vm_id: migration.vm_id.clone(),
            source: migration.source.clone().unwrap_or_else(|| "-".to_string()),
            destination: migration.destination.clone(),
        })
        .collect();
    print_table(&rows, "No migrations");
}
