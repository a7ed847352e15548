//! Group controller - autonomic manager for a cluster of VM hosts
//!
//! Wires the repository, the node control surface and the state machine,
//! then runs the monitoring, anomaly detection, energy saving and
//! reconfiguration loops until SIGINT.

use anyhow::Result;
use controller_lib::{
    anomaly::{AnomalyDetectionLoop, AnomalyDetector},
    health::{components, HealthRegistry},
    monitoring::MonitoringConsumer,
    observability::{ControllerMetrics, EventLogger},
    power::EnergySaver,
    reconfiguration::ReconfigurationTrigger,
    remote::LoggingNodeControl,
    repository::{GroupManagerRepository, InMemoryRepository},
    StateMachineBuilder,
};
use group_controller::{api, config::ControllerConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting group-controller");

    let config = ControllerConfig::load()?;
    let settings = config.settings.clone();
    info!(
        node_name = %config.node_name,
        hosts = config.hosts.len(),
        "Controller configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register_all(&components::ALL).await;

    let metrics = ControllerMetrics::new();
    let logger = EventLogger::new(&config.node_name);

    let repository = Arc::new(InMemoryRepository::with_hosts(config.host_descriptions()));
    let repository: Arc<dyn GroupManagerRepository> = repository;
    let control = Arc::new(LoggingNodeControl::new());

    let state_machine = StateMachineBuilder::new()
        .repository(repository.clone())
        .control(control)
        .settings(settings.clone())
        .node_name(&config.node_name)
        .build()?;
    health_registry.set_healthy(components::STATE_MACHINE).await;

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut tasks = Vec::new();

    let (consumer, monitoring_tx) = MonitoringConsumer::new(
        repository.clone(),
        state_machine.wakeup().clone(),
        settings.monitoring.queue_size,
        health_registry.clone(),
    );
    tasks.push(tokio::spawn(consumer.run(shutdown_tx.subscribe())));

    let detection = AnomalyDetectionLoop::new(
        AnomalyDetector::new(settings.estimator()),
        repository.clone(),
        state_machine.clone(),
        settings.monitoring.anomaly_check_interval(),
        settings.estimator.window_size,
        health_registry.clone(),
        logger.clone(),
    );
    tasks.push(tokio::spawn(detection.run(shutdown_tx.subscribe())));

    if settings.energy.enabled {
        let saver = EnergySaver::new(
            state_machine.clone(),
            settings.energy.idle_check_interval(),
            settings.energy.reserved_hosts,
            settings.energy.power_action,
            health_registry.clone(),
        );
        tasks.push(tokio::spawn(saver.run(shutdown_tx.subscribe())));
    } else {
        health_registry.set_healthy(components::ENERGY_SAVER).await;
    }

    if settings.reconfiguration.enabled {
        match ReconfigurationTrigger::new(
            &settings.reconfiguration.cron,
            state_machine.clone(),
            health_registry.clone(),
        ) {
            Ok(trigger) => tasks.push(tokio::spawn(trigger.run(shutdown_tx.subscribe()))),
            Err(e) => {
                warn!(error = %e, "Reconfiguration trigger disabled");
                health_registry
                    .set_degraded(components::RECONFIGURATION, e.to_string())
                    .await;
            }
        }
    } else {
        health_registry.set_healthy(components::RECONFIGURATION).await;
    }

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        state_machine.clone(),
        monitoring_tx,
    ));

    logger.log_startup(CONTROLLER_VERSION, config.hosts.len());
    health_registry.set_ready(true).await;

    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Err(e)) => error!(error = %e, "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
                Ok(Ok(())) => {}
            }
            logger.log_shutdown("API server stopped");
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "Background task ended abnormally");
        }
    }
    info!("Shutting down");

    Ok(())
}
