//! Controller status command

use anyhow::Result;
use colored::Colorize;
use controller_lib::health::HealthResponse;
use serde::Serialize;
use tabled::Tabled;

use crate::client::{ApiClient, ControllerStatus};
use crate::output::{print_json, print_table, OutputFormat, Toned};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

#[derive(Serialize)]
struct StatusReport {
    status: ControllerStatus,
    health: HealthResponse,
}

/// Show controller state, host counts and component health
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status = client.status().await?;
    let health = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&StatusReport { status, health })?,
        OutputFormat::Table => {
            
            println!("{}", "Group Controller".bold());
            println!("{}", "=".repeat(50));
            println!("Health:                 {}", health.status.painted());
            println!("State:                  {}", status.state.painted());
            println!("Resolver phase:         {}", status.resolver_phase.painted());
            println!(
                "Busy:                   {}",
                if status.busy { "yes".yellow() } else { "no".green() }
            );
            println!();

            println!("{}", "Hosts".bold());
            println!("{}", "-".repeat(50));
            println!("Active:                 {}", status.hosts.active);
            println!("Woken up:               {}", status.hosts.woken_up);
            println!("Passive:                {}", status.hosts.passive);
            println!("Virtual machines:       {}", status.hosts.virtual_machines);
            println!();

            let rows: Vec<ComponentRow> = health
                .components
                .iter()
                .map(|(name, component)| ComponentRow {
                    name: name.clone(),
                    status: component.status.painted(),
                    message: component.message.clone().unwrap_or_default(),
                })
                .collect();
            print_table(&rows, "No components registered");
        }
    }

    Ok(())
}
