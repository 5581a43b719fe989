use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use cli::output;
use drillr::analytics::Analytics;
use drillr::backend::{HttpBackend, HttpBackendConfig};
use drillr::config::Config;
use drillr::domain::{ItemKind, SubjectId};
use drillr::id::generate_instance_id;
use drillr::scheduler::{PassResult, RunTrigger, SchedulerWorker, WorkerHandle};
use drillr::store::{SqliteStore, Stores};
use tokio_util::sync::CancellationToken;

fn setup_logging(config: &Config) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("drillr")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("drillr.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = config.log_level.as_deref().unwrap_or("info");
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Everything a command needs, opened once.
struct App {
    worker: Arc<SchedulerWorker>,
    analytics: Analytics,
}

fn open_app(config: &Config) -> Result<App> {
    let store = SqliteStore::open(&config.storage.db_path)
        .context(format!("Failed to open database at {}", config.storage.db_path.display()))?;
    let stores = Stores::from_sqlite(Arc::new(store));
    let backend = HttpBackend::new(HttpBackendConfig::from_config(&config.backend, &config.dispatch))
        .context("Failed to create generation backend")?;
    let worker = Arc::new(SchedulerWorker::new(config, stores.clone(), Arc::new(backend)));
    let analytics = Analytics::new(worker.engine(), stores, config.scheduler.healthy_heartbeat_secs)
        .with_stale_after(config.scheduler.stale_after_secs);
    Ok(App { worker, analytics })
}

async fn run_application(cli: &Cli, mut config: Config) -> Result<()> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    if let Commands::Run { instance: Some(instance) } = &cli.command {
        config.scheduler.instance_id = if instance == "auto" {
            generate_instance_id("drillr")
        } else {
            instance.clone()
        };
    }
    let app = open_app(&config)?;
    let json = cli.json;
    if cli.command.is_pause_control() {
        info!("Changing pause state: {:?}", cli.command);
    }

    match &cli.command {
        Commands::Run { .. } => handle_run_command(&app).await,
        Commands::Trigger => handle_trigger_command(&app, json).await,
        Commands::Status { history } => {
            let status = app.worker.status()?;
            let runs = app.worker.history(*history)?;
            if json {
                let value = serde_json::json!({ "status": status, "runs": runs });
                output::emit(true, &value, |_| {})
            } else {
                output::print_status(&status, &runs);
                Ok(())
            }
        }
        Commands::Pause => {
            let status = app.worker.set_instance_paused(true)?;
            println!("{} {}", "Paused instance:".yellow(), status.instance_id);
            Ok(())
        }
        Commands::Resume => {
            let status = app.worker.set_instance_paused(false)?;
            println!("{} {}", "Resumed instance:".green(), status.instance_id);
            Ok(())
        }
        Commands::PauseGlobal => {
            app.worker.set_global_pause(true)?;
            println!("{}", "Global pause enabled".yellow());
            Ok(())
        }
        Commands::ResumeGlobal => {
            app.worker.set_global_pause(false)?;
            println!("{}", "Global pause cleared".green());
            Ok(())
        }
        Commands::PauseSubject { subject } => {
            app.worker.set_subject_pause(SubjectId(*subject), true)?;
            println!("{} {}", "Paused subject:".yellow(), subject);
            Ok(())
        }
        Commands::ResumeSubject { subject } => {
            app.worker.set_subject_pause(SubjectId(*subject), false)?;
            println!("{} {}", "Resumed subject:".green(), subject);
            Ok(())
        }
        Commands::Hint {
            subject,
            kind,
            ttl_minutes,
        } => {
            let Some(kind) = ItemKind::parse(kind) else {
                eyre::bail!("Unknown item kind: {}", kind);
            };
            if *ttl_minutes <= 0 {
                eyre::bail!("--ttl-minutes must be positive");
            }
            let hint = app
                .worker
                .hint_generation(SubjectId(*subject), kind, chrono::Duration::minutes(*ttl_minutes))?;
            output::emit(json, &hint, output::print_hint)
        }
        Commands::Distribution { subject } => {
            let distribution = app.worker.engine().distribution(subject.map(SubjectId))?;
            output::emit(json, &distribution, output::print_distribution)
        }
        Commands::Gaps { subject } => {
            let gaps = app.worker.engine().gap_analysis(subject.map(SubjectId))?;
            output::emit(json, &gaps, |g| output::print_gaps(g))
        }
        Commands::Health => {
            let health = app.analytics.system_health()?;
            output::emit(json, &health, output::print_health)
        }
        Commands::Compare { subjects } => {
            let ids: Vec<SubjectId> = subjects.iter().copied().map(SubjectId).collect();
            let summaries = app.analytics.comparison(&ids)?;
            output::emit(json, &summaries, |s| output::print_comparison(s))
        }
        Commands::Summary { subject } => {
            let summary = app.analytics.user_performance_summary(SubjectId(*subject))?;
            output::emit(json, &summary, output::print_summary)
        }
        Commands::Suggestions => {
            let suggestions = app.analytics.generation_suggestions()?;
            output::emit(json, &suggestions, |s| output::print_suggestions(s))
        }
    }
}

async fn handle_run_command(app: &App) -> Result<()> {
    let handle = WorkerHandle::start(app.worker.clone()).context("Failed to start scheduler worker")?;
    println!(
        "{} {} (Ctrl-C to stop)",
        "Scheduler running:".green(),
        app.worker.instance_id()
    );

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    println!("{}", "Shutting down...".cyan());

    let status = handle.shutdown().await.context("Failed to stop scheduler worker")?;
    info!("Worker {} stopped after {} runs", status.instance_id, status.total_runs);
    Ok(())
}

async fn handle_trigger_command(app: &App, json: bool) -> Result<()> {
    let result = app
        .worker
        .run_pass(RunTrigger::Manual, &CancellationToken::new())
        .await
        .context("Generation pass failed")?;
    if json {
        match &result {
            PassResult::Completed(run) => output::emit(true, run, |_| {}),
            PassResult::Busy => output::emit(true, &serde_json::json!({ "result": "busy" }), |_| {}),
            PassResult::Paused(scope) => {
                output::emit(true, &serde_json::json!({ "result": "paused", "scope": scope }), |_| {})
            }
        }
    } else {
        output::print_pass(&result);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, config).await.context("Application failed")?;

    Ok(())
}
