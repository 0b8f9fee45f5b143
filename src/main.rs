mod cache;
mod config;
mod controller;
mod kubectl;
mod kustomize;
mod logging;
mod manifest;
mod minikube;
mod process;
mod progress;
mod reconciler;
mod resource;
mod routing;
mod tui;

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;

use crate::cache::Cache;
use crate::config::Config;
use crate::controller::Controller;
use crate::manifest::SCALABLE_KINDS;
use crate::reconciler::apply_overlay;
use crate::routing::CleanupRegistry;

#[derive(Parser)]
#[command(name = "devexy", version, about = "Reconcile a kustomize overlay against minikube and route traffic interactively")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the app version.
    Version,
    /// Minikube cluster lifecycle.
    Mk {
        #[command(subcommand)]
        action: MkAction,
    },
    /// Query the cluster for scalable workloads and enter the interactive table.
    Workon {
        #[arg(long)]
        apply: bool,
    },
    /// Tail or display the app log.
    Logs {
        #[arg(long, default_value_t = 100)]
        lines: usize,
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Subcommand)]
enum MkAction {
    /// Ensure minikube is running.
    Start {
        #[arg(long)]
        force: bool,
    },
    /// Stop minikube.
    Stop,
    /// Reconcile the overlay, then enter the interactive table.
    Inspect {
        #[arg(long)]
        kustomize_root: Option<String>,
        #[arg(long)]
        overlay: Option<String>,
        #[arg(long)]
        rebuild: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env();
    let app_dir = crate::config::app_dir();
    logging::init(&app_dir, config.noisy)?;

    let result = match cli.command {
        Commands::Version => {
            println!("devexy {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Mk { action } => run_mk(action, &config, &app_dir).await,
        Commands::Workon { apply } => run_workon(apply, &config, &app_dir).await,
        Commands::Logs { lines, follow } => run_logs(&app_dir, lines, follow),
    };

    if let Err(e) = &result {
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
    Ok(())
}

async fn run_mk(action: MkAction, config: &Config, app_dir: &std::path::Path) -> anyhow::Result<()> {
    match action {
        MkAction::Start { force } => {
            if !minikube::is_installed().await {
                anyhow::bail!("minikube is not installed");
            }
            if force {
                minikube::start_forced().await?;
            } else {
                minikube::start().await?;
            }
            println!("{}", "minikube is running".green());
            Ok(())
        }
        MkAction::Stop => {
            minikube::stop().await?;
            println!("{}", "minikube stopped".green());
            Ok(())
        }
        MkAction::Inspect { kustomize_root, overlay, rebuild } => {
            let mut config = config.clone();
            if let Some(root) = kustomize_root {
                config.kustomize_root = root.into();
            }
            if let Some(overlay) = overlay {
                config.overlay = overlay;
            }

            let cache = Arc::new(Cache::new(app_dir, &config.absolute_overlay_path()));
            if rebuild {
                cache.clear_all().await?;
            }

            let report = apply_overlay(&config.overlay_path(), Arc::clone(&cache)).await?;
            println!(
                "{} unchanged={} changed={} skipped={}",
                "reconciled:".cyan(),
                report.tally.unchanged,
                report.tally.changed,
                report.tally.skipped
            );

            enter_interactive_table(scalable_only(report.resources).await).await
        }
    }
}

/// Only scalable kinds participate in status polling, routing, and the
/// interactive table; Services, ConfigMaps, etc. are applied but never
/// tabled.
async fn scalable_only(resources: Vec<Arc<resource::Resource>>) -> Vec<Arc<resource::Resource>> {
    let mut out = Vec::with_capacity(resources.len());
    for resource in resources {
        if reconciler::is_scalable_kind(&resource.kind().await) {
            out.push(resource);
        }
    }
    out
}

async fn run_workon(apply: bool, config: &Config, app_dir: &std::path::Path) -> anyhow::Result<()> {
    let cache = Arc::new(Cache::new(app_dir, &config.absolute_overlay_path()));

    if apply {
        cache.clear_all().await?;
        let report = apply_overlay(&config.overlay_path(), Arc::clone(&cache)).await?;
        println!(
            "{} unchanged={} changed={} skipped={}",
            "reconciled:".cyan(),
            report.tally.unchanged,
            report.tally.changed,
            report.tally.skipped
        );
    }

    let mut resources = Vec::new();
    for kind in SCALABLE_KINDS {
        for namespace in kubectl::list_namespaces().await? {
            for live in kubectl::list(kind, &namespace).await? {
                let doc = live
                    .last_applied_configuration()
                    .unwrap_or(live);
                resources.push(Arc::new(resource::Resource::new(doc, Arc::clone(&cache)).await));
            }
        }
    }

    enter_interactive_table(resources).await
}

async fn enter_interactive_table(resources: Vec<Arc<resource::Resource>>) -> anyhow::Result<()> {
    let registry = CleanupRegistry::new();
    registry.install_signal_handler();
    for resource in &resources {
        resource.start_status_poller().await;
        registry.register(Arc::clone(resource)).await;
    }

    let controller = Controller::new(resources);
    tui::run(controller).await?;
    registry.run_once().await;
    Ok(())
}

fn run_logs(app_dir: &std::path::Path, lines: usize, follow: bool) -> anyhow::Result<()> {
    let log_path = app_dir.join("app.log");
    print_tail(&log_path, lines)?;

    if follow {
        let mut file = std::fs::File::open(&log_path)?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        loop {
            std::thread::sleep(std::time::Duration::from_millis(500));
            let len = file.metadata()?.len();
            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                let mut buf = String::new();
                file.read_to_string(&mut buf)?;
                print!("{buf}");
                offset = len;
            }
        }
    }
    Ok(())
}

fn print_tail(path: &std::path::Path, lines: usize) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = contents.lines().collect();
    let start = all.len().saturating_sub(lines);
    for line in &all[start..] {
        println!("{line}");
    }
    Ok(())
}
