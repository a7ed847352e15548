//! Terminal rendering for controller status and plan previews

use clap::ValueEnum;
use colored::Colorize;
use controller_lib::{
    anomaly::ResolverPhase,
    health::ComponentStatus,
    models::{HostStatus, LocalControllerState, Resource, ResourceVector},
    ControllerState,
};
use serde::Serialize;
use std::fmt;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Attention,
    Critical,
    Asleep,
}

/// Controller values printed with a status color
pub trait Toned: fmt::Display {
    fn tone(&self) -> Tone;

    fn painted(&self) -> String {
        paint(&self.to_string(), self.tone())
    }
}

impl Toned for HostStatus {
    fn tone(&self) -> Tone {
        match self {
            HostStatus::Active => Tone::Good,
            HostStatus::WokenUp => Tone::Attention,
            HostStatus::Passive => Tone::Asleep,
        }
    }
}

impl Toned for LocalControllerState {
    fn tone(&self) -> Tone {
        match self {
            LocalControllerState::Stable => Tone::Good,
            LocalControllerState::Underloaded => Tone::Attention,
            LocalControllerState::Overloaded => Tone::Critical,
        }
    }
}

impl Toned for ComponentStatus {
    fn tone(&self) -> Tone {
        match self {
            ComponentStatus::Healthy => Tone::Good,
            ComponentStatus::Degraded => Tone::Attention,
            ComponentStatus::Unhealthy => Tone::Critical,
        }
    }
}

impl Toned for ControllerState {
    fn tone(&self) -> Tone {
        match self {
            ControllerState::Idle => Tone::Good,
            _ => Tone::Attention,
        }
    }
}

impl Toned for ResolverPhase {
    fn tone(&self) -> Tone {
        match self {
            ResolverPhase::Idle | ResolverPhase::Resolved => Tone::Good,
            _ => Tone::Attention,
        }
    }
}

pub fn paint(text: &str, tone: Tone) -> String {
    match tone {
        Tone::Good => text.green().to_string(),
        Tone::Attention => text.yellow().to_string(),
        Tone::Critical => text.red().to_string(),
        Tone::Asleep => text.dimmed().to_string(),
    }
}

pub fn print_table<T: Tabled>(rows: &[T], empty_message: &str) {
    if rows.is_empty() {
        println!("{}", empty_message.yellow());
        return;
    }
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Absolute amounts, one labelled component per resource
pub fn format_resources(vector: &ResourceVector) -> String {
    Resource::ALL
        .iter()
        .map(|&resource| format!("{} {:.2}", short_name(resource), vector.get(resource)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Normalized utilization; components above 100% are shown in red
pub fn format_utilization(utilization: &ResourceVector) -> String {
    Resource::ALL
        .iter()
        .map(|&resource| {
            let value = utilization.get(resource);
            let percent = format!("{:.0}%", value * 100.0);
            if value > 1.0 {
                paint(&percent, Tone::Critical)
            } else {
                percent
            }
        })
        .collect::<Vec<_>>()
        .join(" / ")
}

fn short_name(resource: Resource) -> &'static str {
    match resource {
        Resource::Cpu => "cpu",
        Resource::Memory => "mem",
        Resource::NetworkRx => "rx",
        Resource::NetworkTx => "tx",
    }
}
