//! SyncFlow - Rule-driven status sync between paired Jira projects
//!
//! Main entry point for the SyncFlow CLI.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use syncflow::config::{default_config_dir, load_tenants};
use syncflow::logging::LogFormat;
use syncflow::supervisor::{
    ProcessLauncher, Supervisor, SupervisorConfig, DEFAULT_HEALTH_ADDR, EXIT_CONFIG, EXIT_OK,
};

/// SyncFlow - Mirror issue status between paired Jira projects
#[derive(Parser, Debug)]
#[command(name = "syncflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log as JSON lines instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one worker per tenant and keep them alive
    Supervise {
        /// Directory of tenant configs (default: ~/.config/syncflow/tenants)
        #[arg(short, long, env = "SYNCFLOW_CONFIG_DIR")]
        config_dir: Option<PathBuf>,

        /// Address of the /health and /metrics endpoint
        #[arg(long, env = "SYNCFLOW_HEALTH_ADDR", default_value = DEFAULT_HEALTH_ADDR)]
        health_addr: String,

        /// Do not serve the health endpoint
        #[arg(long)]
        no_health: bool,
    },

    /// Run the sync loop for a single tenant (started by the supervisor)
    #[command(hide = true)]
    Worker {
        /// Tenant config file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Run one sync cycle and print its report
    SyncOnce {
        /// Tenant config file
        #[arg(short, long)]
        config: PathBuf,

        /// Fetch every issue instead of changes since the last cycle
        #[arg(long)]
        full: bool,
    },

    /// Check every tenant config in a directory
    Validate {
        /// Directory of tenant configs (default: ~/.config/syncflow/tenants)
        #[arg(short, long, env = "SYNCFLOW_CONFIG_DIR")]
        config_dir: Option<PathBuf>,
    },
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let format = if cli.json {
        LogFormat::Json
    } else {
        LogFormat::Text
    };
    if let Err(e) = syncflow::logging::init(format) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match run(cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> syncflow::Result<i32> {
    match cli.command {
        Commands::Supervise {
            config_dir,
            health_addr,
            no_health,
        } => {
            let config = SupervisorConfig::new(config_dir.unwrap_or_else(default_config_dir))
                .with_health_addr((!no_health).then_some(health_addr));
            handle_supervise(config, cli.json)
        }
        Commands::Worker { config } => Ok(syncflow::worker::run(&config)),
        Commands::SyncOnce { config, full } => handle_sync_once(&config, full),
        Commands::Validate { config_dir } => {
            handle_validate(&config_dir.unwrap_or_else(default_config_dir))
        }
    }
}

fn handle_supervise(config: SupervisorConfig, json: bool) -> syncflow::Result<i32> {
    let mut launcher = ProcessLauncher::current_exe()?;
    if json {
        launcher = launcher.with_leading_args(["--json"]);
    }

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let mut supervisor = Supervisor::from_config_dir(config, Arc::new(launcher))?;
        supervisor.run().await
    })?;

    Ok(EXIT_OK)
}

fn handle_sync_once(config_path: &Path, full: bool) -> syncflow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let report = runtime.block_on(async {
        let orchestrator = syncflow::worker::prepare(config_path).await?;
        orchestrator.run_cycle(full).await
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(if report.errors == 0 { EXIT_OK } else { 1 })
}

fn handle_validate(config_dir: &Path) -> syncflow::Result<i32> {
    let report = load_tenants(config_dir)?;

    for tenant in &report.tenants {
        println!(
            "ok       {} ({} -> {}, {} rules) {}",
            tenant.name,
            tenant.config.source_project_key,
            tenant.config.target_project_key,
            tenant.config.rules.len(),
            tenant.path.display()
        );
    }
    for (path, reason) in &report.rejected {
        println!("invalid  {}", path.display());
        for line in reason.split("; ") {
            println!("         {}", line);
        }
    }

    println!();
    println!(
        "{} valid, {} rejected",
        report.tenants.len(),
        report.rejected.len()
    );

    Ok(if report.rejected.is_empty() && !report.tenants.is_empty() {
        EXIT_OK
    } else {
        EXIT_CONFIG
    })
}
