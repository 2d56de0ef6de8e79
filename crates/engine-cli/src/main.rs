mod budget_cmd;
mod cancel_cmd;
mod config;
mod resume_cmd;
mod retry_cmd;
mod run_cmd;
mod sandbox_local;
mod status_cmd;

#[cfg(test)]
mod test_util;

use std::sync::Arc;

use clap::{Parser, Subcommand};

use engine_core::agent::registry::default_registry;
use engine_core::budget::BudgetManager;
use engine_core::cost::{PricingRegistry, PricingResolver};
use engine_core::engine::RunEngine;
use engine_core::llm::{HttpAiService, LlmGateway};
use engine_core::sandbox::Sandbox;
use engine_core::token::guard;
use engine_db::pool;

use config::EngineConfig;
use sandbox_local::LocalSandbox;

#[derive(Parser)]
#[command(name = "engine", about = "Durable execution engine for multi-step AI agent runs")]
struct Cli {
    /// Database URL (overrides ENGINE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Workspace directory the sandbox operates on (defaults to the current directory)
    #[arg(long, global = true)]
    workspace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write an engine config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/engine")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the engine database (requires config file or env vars)
    DbInit,
    /// Start and drive a new run to completion
    Run {
        /// Agent type: coding, review, or ci
        #[arg(long, default_value = "coding")]
        agent_type: String,
        /// Session this run belongs to (groups runs for session-level budget)
        #[arg(long)]
        session: String,
        /// The prompt describing the work to do
        prompt: String,
        /// Override provider (must be paired with --model)
        #[arg(long, requires = "model")]
        provider: Option<String>,
        /// Override model (must be paired with --provider)
        #[arg(long, requires = "provider")]
        model: Option<String>,
    },
    /// Show a run's status, or list runs for a session
    Status {
        /// Run ID to show
        run_id: Option<String>,
        /// List all runs for this session instead
        #[arg(long)]
        session: Option<String>,
    },
    /// Resume a run interrupted by a crash
    Resume {
        /// Run ID to resume
        run_id: String,
    },
    /// Retry a failed run
    Retry {
        /// Run ID to retry
        run_id: String,
    },
    /// Cancel a run
    Cancel {
        /// Run ID to cancel
        run_id: String,
    },
    /// Show cost totals for a run or session
    Budget {
        /// Run ID to show cost totals for
        run_id: Option<String>,
        /// Show session-level cost totals instead
        #[arg(long)]
        session: Option<String>,
    },
}

/// Execute the `engine init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: Some(db_url.to_string()),
        },
        provider: config::ProviderSection::default(),
        budget: config::BudgetSection::default(),
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `engine db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `engine db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = EngineConfig::resolve(cli_db_url)?;

    println!("Initializing engine database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("engine db-init complete.");
    Ok(())
}

/// Build the engine's full dependency stack (agents, gateway, budget,
/// sandbox) from resolved configuration. Shared by every subcommand that
/// drives a run.
fn build_engine(config: &EngineConfig, db_pool: sqlx::PgPool, workspace: &str) -> anyhow::Result<RunEngine> {
    let agents = default_registry()?;

    let service = Arc::new(HttpAiService::new(
        config.provider_base_url.clone(),
        config.provider_api_key.clone(),
        config.default_model.clone(),
    ));
    let pricing_registry = PricingRegistry::new(config.fail_on_unseeded_pricing);
    let pricing_resolver = PricingResolver::new(pricing_registry, config.unknown_pricing_mode);
    let budget = BudgetManager::new(config.budget_config);
    let gateway = LlmGateway::new(
        db_pool.clone(),
        service,
        budget.clone(),
        pricing_resolver,
        "default",
        config.default_model.clone(),
    );

    let sandbox: Arc<dyn Sandbox> = Arc::new(LocalSandbox::new(workspace.to_string()));

    Ok(RunEngine::new(
        db_pool,
        agents,
        gateway,
        sandbox,
        budget,
        config.retry_policy,
        config.concurrency_limit,
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let workspace = cli.workspace.clone().unwrap_or_else(|| ".".to_string());

    // Every command below is an operator command. This build carries the
    // scoped-token mechanism for authenticating the sandbox/agent callback
    // surface (see `engine-core::token`) but exposes no agent-facing CLI
    // commands for it to gate, so `ENGINE_AGENT_TOKEN` being set simply
    // blocks the whole operator surface rather than switching to one.
    if let Err(err) = guard::require_operator_mode() {
        eprintln!("{err} ({} is set)", guard::AGENT_TOKEN_ENV);
        std::process::exit(1);
    }

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Run {
            agent_type,
            session,
            prompt,
            provider,
            model,
        } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let engine = build_engine(&resolved, db_pool.clone(), &workspace)?;
            let result = run_cmd::run_run(&engine, &agent_type, &session, &prompt, provider, model).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { run_id, session } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, run_id.as_deref(), session.as_deref()).await;
            db_pool.close().await;
            result?;
        }
        Commands::Resume { run_id } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let engine = build_engine(&resolved, db_pool.clone(), &workspace)?;
            let result = resume_cmd::run_resume(&engine, &run_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Retry { run_id } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let engine = build_engine(&resolved, db_pool.clone(), &workspace)?;
            let result = retry_cmd::run_retry(&engine, &run_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Cancel { run_id } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let engine = build_engine(&resolved, db_pool.clone(), &workspace)?;
            let result = cancel_cmd::run_cancel(&engine, &run_id).await;
            db_pool.close().await;
            result?;
        }
        Commands::Budget { run_id, session } => {
            let resolved = EngineConfig::resolve(cli.database_url.as_deref())?;
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = budget_cmd::run_budget(&db_pool, &resolved, run_id.as_deref(), session.as_deref()).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
