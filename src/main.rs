//! cadence - task scheduler and workflow engine.
//!
//! Usage:
//!   cadence run <config.yaml>       Run the scheduler, workflow engine and API
//!   cadence validate <config.yaml>  Validate a configuration without running
//!   cadence list <config.yaml>      List the tasks and workflows a config seeds
//!   cadence templates               List the built-in workflow templates

use async_trait::async_trait;
use cadence::actions::collaborators::{Notification, NotificationSink};
use cadence::config::{StorageConfig, WorkflowSeed};
use cadence::{
    ActionDispatcher, ActionError, CadenceConfig, Collaborators, ConfigBuilder, Event, EventBus,
    EventHandler, InMemoryStorage, ProcessCommandRunner, Schedule, Storage, TaskScheduler,
    WorkflowEngine, YamlLoader, api, workflow,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// cadence - task scheduler and workflow engine
#[derive(Parser)]
#[command(name = "cadence")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, workflow engine and HTTP API until Ctrl+C
    Run {
        /// Path to the configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Override the API port from the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Validate a configuration file without running
    Validate {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the tasks and workflows a configuration seeds
    List {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the built-in workflow templates
    Templates,
}

/// Logs every lifecycle event.
struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskStarted {
                task_id,
                retry_count,
                ..
            } => {
                info!(%task_id, retry_count, "Task started");
            }
            Event::TaskCompleted {
                task_id, duration, ..
            } => {
                info!(%task_id, duration_ms = duration.as_millis() as u64, "Task completed");
            }
            Event::TaskRetrying {
                task_id,
                error,
                retry_count,
                max_retries,
                delay,
                ..
            } => {
                warn!(
                    %task_id,
                    %error,
                    retry_count,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Task failed, retrying"
                );
            }
            Event::TaskError {
                task_id,
                error,
                retry_count,
                ..
            } => {
                error!(%task_id, %error, retry_count, "Task failed");
            }
            Event::WorkflowStepFailed {
                workflow_id,
                step,
                name,
                error,
                ..
            } => {
                warn!(%workflow_id, step, %name, %error, "Workflow step failed");
            }
            Event::WorkflowCompleted {
                workflow_id,
                duration,
                ..
            } => {
                info!(
                    %workflow_id,
                    duration_ms = duration.as_millis() as u64,
                    "Workflow completed"
                );
            }
            Event::WorkflowError {
                workflow_id,
                step,
                error,
                ..
            } => {
                error!(%workflow_id, step, %error, "Workflow aborted");
            }
            other => {
                info!(event = other.name(), "Event");
            }
        }
    }
}

/// Delivers notifications to the log.
struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), ActionError> {
        info!(
            priority = ?notification.priority,
            category = %notification.category,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }

    async fn cleanup(&self, _older_than: Duration) -> Result<u64, ActionError> {
        Ok(0)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, port } => {
            run(config, port).await?;
        }
        Commands::Validate { config } => {
            validate(config)?;
        }
        Commands::List { config } => {
            list(config)?;
        }
        Commands::Templates => {
            templates();
        }
    }

    Ok(())
}

/// Run everything described by a configuration file.
async fn run(path: PathBuf, port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    info!("Loading configuration from: {}", path.display());
    let mut config = YamlLoader::load_config(&path)?;
    if let Some(port) = port {
        config.api.port = port;
    }

    match config.storage.clone() {
        StorageConfig::Memory => {
            info!("Using in-memory storage");
            serve(Arc::new(InMemoryStorage::new()), config).await
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!(%path, "Using SQLite storage");
            let store = cadence::SqliteStorage::new(&path).await?;
            serve(Arc::new(store), config).await
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("SQLite storage requires the 'sqlite' feature".into())
        }
    }
}

async fn serve<S: Storage + 'static>(
    store: Arc<S>,
    config: CadenceConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let notifier = Arc::new(LogNotifier);
    let dispatcher = Arc::new(ActionDispatcher::with_builtins(
        Collaborators::new()
            .with_commands(Arc::new(ProcessCommandRunner::new()))
            .with_notifier(notifier.clone()),
    ));

    let workflows = WorkflowEngine::builder(store.clone(), dispatcher.clone())
        .with_event_bus(event_bus.clone())
        .build();
    workflows.start().await?;

    let settings = ConfigBuilder::scheduler_settings(&config)?;
    let scheduler = TaskScheduler::new(store, dispatcher)
        .with_event_bus(event_bus)
        .with_notifier(notifier)
        .with_settings(settings)
        .start()
        .await?;

    let report = ConfigBuilder::seed(&config, &scheduler, &workflows).await?;
    info!(
        tasks = report.tasks_created,
        workflows = report.workflows_created,
        skipped = report.skipped.len(),
        "Seeded configuration"
    );

    let state = api::create_api_state(scheduler.clone(), workflows);
    let server = api::start_server(&config.api, state).await?;

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down...");
    server.abort();
    scheduler.shutdown().await;

    info!("Goodbye!");
    Ok(())
}

/// Validate a configuration without running.
fn validate(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", path.display());

    match YamlLoader::load_config(&path) {
        Ok(config) => {
            info!(
                "Configuration is valid: {} task(s), {} workflow(s)",
                config.tasks.len(),
                config.workflows.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Print the tasks and workflows a configuration seeds.
fn list(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = YamlLoader::load_config(&path)?;
    let timezone = ConfigBuilder::scheduler_settings(&config)?.timezone;
    let now = chrono::Utc::now();

    if config.tasks.is_empty() && config.workflows.is_empty() {
        println!("No tasks or workflows in {}", path.display());
        return Ok(());
    }

    println!("Tasks in {}:", path.display());
    println!();
    for task in &config.tasks {
        println!("Name: {}", task.name);
        if let Some(description) = &task.description {
            println!("  Description: {}", description);
        }
        if let (Some(task_type), Some(schedule)) = (&task.task_type, &task.schedule) {
            println!("  Schedule: {} {}", task_type, schedule);
            match Schedule::parse(*task_type, schedule, timezone, now) {
                Ok(parsed) => {
                    for at in parsed.next_n_after(now, 3) {
                        println!("    next: {}", at.with_timezone(&timezone));
                    }
                }
                Err(e) => println!("    not schedulable: {}", e),
            }
        }
        println!("  Action: {}", task.action);
        println!("  Enabled: {}", task.enabled);
        println!();
    }

    println!("Workflows:");
    println!();
    for seed in &config.workflows {
        match seed {
            WorkflowSeed::Template {
                template,
                overrides,
            } => {
                let name = overrides.name.as_deref().unwrap_or(template);
                println!("Name: {} (from template '{}')", name, template);
            }
            WorkflowSeed::Definition(definition) => {
                println!("Name: {}", definition.name);
                for (i, step) in definition.steps.iter().enumerate() {
                    let critical = if step.is_critical() { "" } else { " (non-critical)" };
                    println!("    {}. {} -> {}{}", i + 1, step.name, step.action, critical);
                }
            }
        }
        println!();
    }

    Ok(())
}

/// Print the built-in workflow templates.
fn templates() {
    for template in workflow::builtin_templates() {
        println!("{}: {}", template.id, template.name);
        println!("  {}", template.description);
        for (i, step) in template.steps.iter().enumerate() {
            println!("    {}. {} -> {}", i + 1, step.name, step.action);
        }
        println!();
    }
}
