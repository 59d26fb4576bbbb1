// ABOUTME: Entry point for the peleka-engine CLI - a smoke-test harness over `Engine<BollardRuntime>`.
// ABOUTME: Parses a compose-like project file, detects a local runtime, and dispatches one Operation.

mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use peleka::config::Project;
use peleka::engine::{Engine, OperationOutcome};
use peleka::loader::{self, LoadError};
use peleka::operation::{
    ContainerEvent, DownOptions, ImagesPolicy, KillOptions, LogStreamKind, LogsOptions, Operation,
    PsOptions, RemoveOptions, ServiceScopedOptions, StatusLevel, StopOptions, UpOptions,
    WaitOptions,
};
use peleka::runtime::{BollardRuntime, DetectionError, RuntimeInfoError};
use peleka::types::{ReplicaIndex, ReplicaIndexError, ServiceName, ServiceNameError};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("no container runtime found on this host: {0}")]
    Detect(#[from] DetectionError),
    #[error("failed to connect to the container runtime: {0}")]
    Connect(#[from] RuntimeInfoError),
    #[error("invalid service name {0:?}: {1}")]
    ServiceName(String, ServiceNameError),
    #[error(transparent)]
    ReplicaIndex(#[from] ReplicaIndexError),
    #[error(transparent)]
    Engine(#[from] peleka::error::EngineError),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(true)
        .init();

    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let project = loader::load_project(&cli.file)?;

    let runtime_info = peleka::runtime::detect_local(None)?;
    let runtime = BollardRuntime::connect(&runtime_info)?;
    let engine = Engine::new(runtime);

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_for_signal.cancel();
    });

    let sink = Arc::new(PrintingSink);

    let outcome = dispatch(&engine, &project, cli.command, sink, cancel).await?;

    if let OperationOutcome::Containers(containers) = outcome {
        print_containers(&containers);
    }

    Ok(())
}

async fn dispatch(
    engine: &Engine<BollardRuntime>,
    project: &Project,
    command: Commands,
    sink: Arc<dyn peleka::operation::EventSink>,
    cancel: CancellationToken,
) -> Result<OperationOutcome, AppError> {
    let operation = match command {
        Commands::Up {
            services,
            build,
            quiet_pull,
            force_recreate,
            no_recreate,
            remove_orphans,
            wait,
            wait_timeout,
            attach,
        } => Operation::Up(UpOptions {
            services: to_service_names(services)?,
            build,
            quiet_pull,
            force_recreate,
            no_recreate,
            remove_orphans,
            wait,
            wait_timeout,
            attach_to: to_service_names(attach)?.unwrap_or_default(),
            inherit: false,
            timeout: None,
        }),
        Commands::Down {
            services,
            remove_orphans,
            volumes,
            timeout,
        } => Operation::Down(DownOptions {
            remove_orphans,
            volumes,
            images: ImagesPolicy::None,
            timeout,
            services: to_service_names(services)?,
        }),
        Commands::Start { services } => Operation::Start(ServiceScopedOptions {
            services: to_service_names(services)?,
        }),
        Commands::Stop { services, timeout } => Operation::Stop(StopOptions {
            services: to_service_names(services)?,
            timeout,
        }),
        Commands::Restart { services, timeout } => Operation::Restart(StopOptions {
            services: to_service_names(services)?,
            timeout,
        }),
        Commands::Kill { services, signal } => Operation::Kill(KillOptions {
            services: to_service_names(services)?,
            signal,
        }),
        Commands::Remove {
            services,
            force,
            volumes,
        } => Operation::Remove(RemoveOptions {
            services: to_service_names(services)?,
            force,
            volumes,
        }),
        Commands::Ps { services, all } => Operation::Ps(PsOptions {
            services: to_service_names(services)?,
            all,
        }),
        Commands::Logs {
            services,
            follow,
            tail,
            timestamps,
            index,
        } => Operation::Logs(LogsOptions {
            services: to_service_names(services)?,
            follow,
            tail,
            since: None,
            until: None,
            timestamps,
            index: index.map(ReplicaIndex::new).transpose()?,
        }),
        Commands::Wait {
            services,
            down_project_on_container_exit,
        } => Operation::Wait(WaitOptions {
            services: to_service_names(services)?,
            down_project_on_container_exit,
        }),
    };

    Ok(engine.run(project, operation, sink, cancel).await?)
}

fn to_service_names(raw: Option<Vec<String>>) -> Result<Option<Vec<ServiceName>>, AppError> {
    match raw {
        None => Ok(None),
        Some(names) => names
            .into_iter()
            .map(|n| ServiceName::new(&n).map_err(|e| AppError::ServiceName(n.clone(), e)))
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
    }
}

fn print_containers(containers: &[peleka::runtime::ContainerSummary]) {
    println!("{:<24} {:<24} {:<12} {}", "NAME", "IMAGE", "STATE", "ID");
    for c in containers {
        println!("{:<24} {:<24} {:<12} {}", c.name, c.image, c.state, c.id.as_str());
    }
}

/// Renders events to the terminal - the smoke-test CLI's only consumer of
/// the event bus; a real frontend would use `CollectingSink` or its own
/// `EventSink` over a channel instead.
struct PrintingSink;

impl peleka::operation::EventSink for PrintingSink {
    fn emit(&self, event: ContainerEvent) {
        match event {
            ContainerEvent::Attach { service, index } => {
                println!("[{service}:{index}] attached");
            }
            ContainerEvent::Log { service, index, line, stream } => {
                let marker = match stream {
                    LogStreamKind::Out => "out",
                    LogStreamKind::Err => "err",
                };
                println!("[{service}:{index}|{marker}] {line}");
            }
            ContainerEvent::Exit {
                service,
                index,
                exit_code,
                restarting,
            } => {
                println!("[{service}:{index}] exited {exit_code} (restarting={restarting})");
            }
            ContainerEvent::Stopped { service, index } => {
                println!("[{service}:{index}] stopped");
            }
            ContainerEvent::Recreated { service, old_id, new_id } => {
                println!("[{service}] recreated {old_id} -> {new_id}");
            }
            ContainerEvent::Restarted { service, index } => {
                println!("[{service}:{index}] restarted");
            }
            ContainerEvent::Hook { service, line } => {
                println!("[{service}|hook] {line}");
            }
            ContainerEvent::Status { level, text } => {
                let marker = match level {
                    StatusLevel::Working => "...",
                    StatusLevel::Done => " ok",
                    StatusLevel::Error => "ERR",
                };
                println!("[{marker}] {text}");
            }
        }
    }
}
