//! stacks CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde::Serialize;
use stacks::{
    commands::{
        cancel_on_ctrl_c, cmd_ask, cmd_index, cmd_init, cmd_query, cmd_status, cmd_task_cancel,
        cmd_task_enqueue, cmd_task_list, cmd_task_resume, cmd_task_retry, cmd_task_run,
        cmd_task_show, cmd_vacuum, parse_payload, print_ask_result, print_index_report,
        print_index_status, print_init, print_query_results, print_status, print_task,
        print_tasks, AskOptions, IndexOptions, InitOptions, QueryOptions,
    },
    config::Config,
    coverage::QueryScope,
    engine::Engine,
    error::{Error, Result},
    progress::{bar_callback, chunk_progress_bar, LogWriterFactory},
};
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "stacks")]
#[command(
    version,
    about = "Hybrid dense + BM25 retrieval over workspace chunk stores",
    long_about = None
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Workspace to operate on
    #[arg(short, long, global = true, env = "STACKS_WORKSPACE", default_value = "default")]
    workspace: String,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show workspace index status
    Status,

    /// Build or refresh the dense index (Ctrl-C stops after the current batch)
    Index {
        /// Drop existing vectors first
        #[arg(long)]
        reset: bool,

        /// Only index these documents
        #[arg(long = "doc")]
        doc_ids: Vec<String>,

        /// Chunks per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Also rebuild the BM25 index
        #[arg(long)]
        bm25: bool,
    },

    /// Remove orphan chunks and repair both indexes
    Vacuum,

    /// Retrieve chunks for a query
    Query {
        /// The search query
        query: String,

        /// vector, bm25 or hybrid
        #[arg(short, long)]
        mode: Option<String>,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Restrict to these documents
        #[arg(long = "doc")]
        doc_ids: Vec<String>,

        /// Restrict to these document types
        #[arg(long = "doc-type")]
        doc_types: Vec<String>,

        /// Spread results across documents
        #[arg(long)]
        diverse: bool,
    },

    /// Answer a question; scope-wide questions use every unit of --scope
    Ask {
        question: String,

        /// Scope (course, project) for scope-wide questions
        #[arg(long)]
        scope: Option<String>,

        /// Always answer from the whole scope
        #[arg(long, conflicts_with = "local")]
        global: bool,

        /// Always answer from retrieval
        #[arg(long)]
        local: bool,
    },

    /// Manage background tasks
    Task {
        #[command(subcommand)]
        action: TaskAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum TaskAction {
    /// Queue a task (types: index, vacuum)
    Enqueue {
        task_type: String,

        /// JSON object payload, e.g. '{"reset": true, "rebuild_sparse": true}'
        #[arg(long)]
        payload: Option<String>,

        /// Execute immediately and wait
        #[arg(long)]
        run: bool,
    },

    /// List tasks of the workspace
    List {
        /// Include every workspace
        #[arg(long)]
        all: bool,
    },

    /// Show one task
    Show { task_id: String },

    /// Execute a queued task and wait
    Run { task_id: String },

    /// Cancel a task
    Cancel { task_id: String },

    /// Restart a failed or cancelled task and wait
    Retry { task_id: String },

    /// Restart a failed or cancelled task and wait
    Resume { task_id: String },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        if let Error::Retrieval {
            setup_required: true,
            ..
        } = e
        {
            eprintln!(
                "Check the [embedding] section of your config and that the backend is running."
            );
        }
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool, log_json: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if log_json {
        registry
            .with(fmt::layer().json().with_writer(LogWriterFactory))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(LogWriterFactory))
            .init();
    }
}

fn emit<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "stacks", &mut std::io::stdout());
        return Ok(());
    }

    if let Commands::Init { force } = cli.command {
        let base_dir = match cli.config.as_deref().and_then(Path::parent) {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => Config::default_base_dir(),
        };
        let report = cmd_init(InitOptions {
            base_dir,
            force,
            workspace: cli.workspace.clone(),
        })
        .await?;
        return emit(cli.json, &report, print_init);
    }

    let config = load_config(cli.config.as_deref())?;
    let engine = Engine::open(config).await?;
    let workspace = cli.workspace.as_str();

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Status => {
            let status = cmd_status(&engine, workspace).await?;
            emit(cli.json, &status, print_status)?;
        }

        Commands::Index {
            reset,
            doc_ids,
            batch_size,
            bm25,
        } => {
            let options = IndexOptions {
                reset,
                doc_ids,
                batch_size,
                rebuild_sparse: bm25,
            };
            let cancel = cancel_on_ctrl_c();
            let bar = (!cli.json).then(|| chunk_progress_bar("Embedding chunks"));
            let progress = bar.as_ref().map(bar_callback);

            let result = cmd_index(&engine, workspace, &options, progress, &cancel).await;
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            emit(cli.json, &result?, print_index_report)?;
        }

        Commands::Vacuum => {
            let cancel = cancel_on_ctrl_c();
            let status = cmd_vacuum(&engine, workspace, &cancel).await?;
            emit(cli.json, &status, print_index_status)?;
        }

        Commands::Query {
            query,
            mode,
            top_k,
            doc_ids,
            doc_types,
            diverse,
        } => {
            let options = QueryOptions {
                mode,
                top_k,
                doc_ids,
                doc_types,
                diverse,
            };
            let result = cmd_query(&engine, workspace, &query, &options).await?;
            emit(cli.json, &result, print_query_results)?;
        }

        Commands::Ask {
            question,
            scope,
            global,
            local,
        } => {
            let force_scope = match (global, local) {
                (true, _) => Some(QueryScope::Global),
                (_, true) => Some(QueryScope::Local),
                _ => None,
            };
            let options = AskOptions { scope, force_scope };
            let result = cmd_ask(&engine, workspace, &question, &options).await?;
            emit(cli.json, &result, print_ask_result)?;
        }

        Commands::Task {
            action: TaskAction::List { all },
        } => {
            let tasks = cmd_task_list(engine.db(), (!all).then_some(workspace)).await?;
            emit(cli.json, &tasks, |t| print_tasks(t))?;
        }

        Commands::Task {
            action: TaskAction::Show { task_id },
        } => {
            let task = cmd_task_show(engine.db(), &task_id).await?;
            emit(cli.json, &task, print_task)?;
        }

        Commands::Task { action } => {
            let scheduler = engine.start_scheduler().await?;
            let outcome = handle_task(&scheduler, workspace, action, cli.json).await;
            scheduler.shutdown().await;
            outcome?;
        }
    }

    Ok(())
}

async fn handle_task(
    scheduler: &stacks::tasks::Scheduler,
    workspace: &str,
    action: TaskAction,
    json: bool,
) -> Result<()> {
    let task = match action {
        TaskAction::List { .. } | TaskAction::Show { .. } => {
            unreachable!("read-only task commands run without a scheduler")
        }
        TaskAction::Enqueue {
            task_type,
            payload,
            run,
        } => {
            let payload = parse_payload(payload.as_deref())?;
            cmd_task_enqueue(scheduler, workspace, &task_type, payload, run).await?
        }
        TaskAction::Run { task_id } => cmd_task_run(scheduler, &task_id).await?,
        TaskAction::Cancel { task_id } => cmd_task_cancel(scheduler, &task_id).await?,
        TaskAction::Retry { task_id } => cmd_task_retry(scheduler, &task_id).await?,
        TaskAction::Resume { task_id } => cmd_task_resume(scheduler, &task_id).await?,
    };
    emit(json, &task, print_task)
}

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = match config_path {
        Some(path) => Config::load(path)?,
        None => Config::load_from(None)?,
    };

    if !config.is_initialized() {
        return Err(Error::NotInitialized);
    }

    Ok(config)
}
