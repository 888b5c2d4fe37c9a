use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use zonochat_bootstrap::{AppConfig, CliOverrides, cancel_on_shutdown, init_logging};
use zonochat_db::{ConnectOpts, DbHandle, redact_credentials_in_dsn};
use zonochat_migrate::{
    MigrationRunner, MigrationStep, RunReport, assemble, builtin_steps, lint_dir, load_sql_dir,
};

/// Exit code for a run stopped by a shutdown signal.
const EXIT_CANCELLED: u8 = 2;

/// `ZonoChat` migrator - idempotent schema migrations and data backfills
#[derive(Parser)]
#[command(name = "zonochat-migrator")]
#[command(about = "ZonoChat migrator - idempotent schema migrations and data backfills")]
#[command(version)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database connection string (overrides config)
    #[arg(long, global = true)]
    dsn: Option<String>,

    /// Directory of NNN_description.sql files (overrides config)
    #[arg(long, global = true)]
    sql_dir: Option<PathBuf>,

    /// Print reports as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Print effective configuration (JSON) and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Apply every pending step (default)
    Run,
    /// Show which steps are pending without changing anything
    Status,
    /// Check SQL files for statements that are not safe to re-run
    Lint,
    /// Validate configuration and exit
    Check,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Layered config:
    // 1) defaults -> 2) YAML (if provided) -> 3) DB_* -> 4) env (ZONOCHAT__*) -> 5) CLI overrides
    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply_cli_overrides(&CliOverrides {
        dsn: cli.dsn.clone(),
        sql_dir: cli.sql_dir.clone(),
    });

    let _log_guard = init_logging(&config.logging, cli.verbose)?;

    if cli.print_config {
        println!("{}", config.to_pretty_json()?);
        return Ok(ExitCode::SUCCESS);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_migrations(&config, cli.json).await,
        Commands::Status => show_status(&config, cli.json).await,
        Commands::Lint => lint_sql_dir(&config, cli.json).await,
        Commands::Check => check_config(&config),
    }
}

fn check_config(config: &AppConfig) -> Result<ExitCode> {
    tracing::info!("Checking configuration...");
    config.validate()?;
    println!("Configuration is valid");
    println!("{}", config.to_pretty_json()?);
    Ok(ExitCode::SUCCESS)
}

async fn run_migrations(config: &AppConfig, json: bool) -> Result<ExitCode> {
    config.validate()?;
    let cancel = CancellationToken::new();
    let runner = MigrationRunner::new(
        build_steps(config).await?,
        config.runner_options(cancel.clone())?,
    )?;

    let db = connect(config).await?;
    let signals = cancel_on_shutdown(cancel);
    let result = runner.run(&db).await;
    signals.abort();
    close(db).await;

    let report = result?;
    print_report(&report, json)?;
    Ok(exit_code(&report))
}

async fn show_status(config: &AppConfig, json: bool) -> Result<ExitCode> {
    config.validate()?;
    let runner = MigrationRunner::new(
        build_steps(config).await?,
        config.runner_options(CancellationToken::new())?,
    )?;

    let db = connect(config).await?;
    let result = runner.plan(&db).await;
    close(db).await;

    let plan = result?;
    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        print!("{}", plan.render_text());
    }
    Ok(ExitCode::SUCCESS)
}

async fn lint_sql_dir(config: &AppConfig, json: bool) -> Result<ExitCode> {
    let dir = config
        .migrations
        .sql_dir
        .as_deref()
        .context("no SQL directory configured (use --sql-dir or migrations.sql_dir)")?;
    // Parse in the dialect of the configured database.
    let engine = DbHandle::detect(&config.database_dsn()?)?;
    let findings = lint_dir(dir, engine.backend()).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&findings)?);
    } else if findings.is_empty() {
        println!("{}: no findings", dir.display());
    } else {
        for finding in &findings {
            println!("{finding}");
        }
    }

    if findings.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        tracing::warn!(count = findings.len(), "SQL files are not safe to re-run");
        Ok(ExitCode::FAILURE)
    }
}

/// SQL files first, then the built-in steps.
async fn build_steps(config: &AppConfig) -> Result<Vec<Box<dyn MigrationStep>>> {
    let sql_files = match config.migrations.sql_dir.as_deref() {
        Some(dir) => load_sql_files(dir).await?,
        None => Vec::new(),
    };
    let builtins = if config.migrations.builtin {
        builtin_steps(&config.tenancy, &config.channels)
    } else {
        Vec::new()
    };
    Ok(assemble(sql_files, builtins))
}

async fn load_sql_files(dir: &Path) -> Result<Vec<zonochat_migrate::SqlFileStep>> {
    load_sql_dir(dir)
        .await
        .with_context(|| format!("failed to load SQL migrations from {}", dir.display()))
}

async fn connect(config: &AppConfig) -> Result<DbHandle> {
    let dsn = config.database_dsn()?;
    tracing::info!(dsn = %redact_credentials_in_dsn(Some(&dsn)), "Connecting to database");
    DbHandle::connect(&dsn, ConnectOpts::default())
        .await
        .context("failed to connect to database")
}

async fn close(db: DbHandle) {
    if let Err(e) = db.close().await {
        tracing::warn!(error = %e, "failed to close database connection");
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}

fn exit_code(report: &RunReport) -> ExitCode {
    if report.cancelled {
        ExitCode::from(EXIT_CANCELLED)
    } else if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
