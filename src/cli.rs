// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: One subcommand per `Operation` variant, option fields mirroring `operation::*Options`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "peleka-engine")]
#[command(about = "Convergence engine for declarative multi-container application orchestration")]
#[command(version)]
pub struct Cli {
    /// Path to the project file (compose-like YAML).
    #[arg(short = 'f', long, global = true, default_value = "peleka.yml")]
    pub file: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

fn parse_services(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring a project up: create/recreate/start every in-scope service.
    Up {
        /// Comma-separated list of services to scope to (default: all).
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        build: bool,
        #[arg(long)]
        quiet_pull: bool,
        #[arg(long)]
        force_recreate: bool,
        #[arg(long)]
        no_recreate: bool,
        #[arg(long)]
        remove_orphans: bool,
        #[arg(long)]
        wait: bool,
        #[arg(long, value_parser = humantime::parse_duration)]
        wait_timeout: Option<Duration>,
        /// Comma-separated list of services whose logs to attach to.
        #[arg(long, value_parser = parse_services)]
        attach: Option<Vec<String>>,
    },

    /// Tear a project down: stop and remove every in-scope service.
    Down {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        remove_orphans: bool,
        #[arg(long)]
        volumes: bool,
        #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
        timeout: Duration,
    },

    /// Start existing containers for the given services without recreating them.
    Start {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
    },

    /// Stop containers for the given services without removing them.
    Stop {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
        timeout: Duration,
    },

    /// Stop then start containers for the given services.
    Restart {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long, value_parser = humantime::parse_duration, default_value = "10s")]
        timeout: Duration,
    },

    /// Send a signal to the containers for the given services.
    Kill {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        signal: Option<String>,
    },

    /// Remove stopped containers for the given services.
    Remove {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        volumes: bool,
    },

    /// List running containers.
    Ps {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        all: bool,
    },

    /// Stream container logs.
    Logs {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        follow: bool,
        #[arg(long)]
        tail: Option<u64>,
        #[arg(long)]
        timestamps: bool,
        #[arg(long)]
        index: Option<u32>,
    },

    /// Block until every in-scope container exits.
    Wait {
        #[arg(long, value_parser = parse_services)]
        services: Option<Vec<String>>,
        #[arg(long)]
        down_project_on_container_exit: bool,
    },
}
