use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use clap::{Args as ClapArgs, Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradeflow_core::{
    PipelineSignal, RunSubmission, ScriptedPipeline, executor::execute_blocking,
};
use tradeflow_server::{config::Settings, routes::create_router, state::AppState};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "tradeflow-server")]
#[command(about = "HTTP interface for executing analysis runs with real-time SSE streaming")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Socket address to bind
    #[arg(long, env = "TRADEFLOW_BIND", default_value = "0.0.0.0:8000")]
    bind: SocketAddr,

    /// Shared secret required by the access gate
    #[arg(long, env = "INTERNAL_API_TOKEN")]
    internal_api_token: Option<String>,

    /// Disable the access gate entirely
    #[arg(long, env = "SKIP_TOKEN_AUTH", default_value_t = false)]
    skip_token_auth: bool,

    /// Evict terminal runs after this many seconds (off when unset)
    #[arg(long, env = "TRADEFLOW_EVICT_TERMINAL_AFTER_SECS")]
    evict_terminal_after_secs: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default)
    Serve(ServeArgs),
    /// Execute one pipeline run directly, printing JSONL events
    Run(RunArgs),
}

#[derive(ClapArgs, Debug)]
struct RunArgs {
    /// Ticker symbol to analyze
    #[arg(long)]
    ticker: String,

    /// Evaluation date, e.g. 2024-01-01
    #[arg(long)]
    date: String,

    /// JSON string with configuration overrides
    #[arg(long)]
    config: Option<String>,

    /// Path to a JSON file with configuration overrides
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// File path to persist the final result payload
    #[arg(long)]
    result_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tradeflow_server=info,tradeflow_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::Run(args)) => run_once(args),
        Some(Command::Serve(args)) => serve(args).await,
        None => serve(cli.serve).await,
    }
}

async fn serve(args: ServeArgs) -> anyhow::Result<()> {
    let settings = Settings {
        bind_addr: args.bind,
        internal_api_token: args.internal_api_token,
        skip_token_auth: args.skip_token_auth,
        evict_terminal_after_secs: args.evict_terminal_after_secs,
    };

    if settings.auth_required() && settings.internal_api_token.is_none() {
        warn!("access gate enabled but INTERNAL_API_TOKEN is not set; all requests will fail");
    }

    // The real reasoning pipeline attaches behind this trait object;
    // the scripted stand-in keeps the service runnable without one.
    let state = AppState::new(Arc::new(ScriptedPipeline::echo()), settings);

    if let Some(secs) = state.settings.evict_terminal_after_secs {
        spawn_eviction_sweeper(state.clone(), secs);
    }

    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", state.settings.bind_addr))?;
    info!("listening on {}", state.settings.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Background sweep removing terminal runs past the retention window.
fn spawn_eviction_sweeper(state: AppState, window_secs: u64) {
    let period = Duration::from_secs((window_secs / 2).max(30));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;
        loop {
            interval.tick().await;
            let cutoff = Utc::now() - chrono::Duration::seconds(window_secs as i64);
            let evicted = state.registry.evict_terminal_before(cutoff).await;
            if evicted > 0 {
                info!("evicted {evicted} terminal runs older than {window_secs}s");
            }
        }
    });
}

/// Direct runner: no registry, no HTTP. Events go to stdout as JSON
/// lines and pipeline errors propagate into the exit code.
fn run_once(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(raw) => {
            let parsed: Value =
                serde_json::from_str(raw).context("--config must be a JSON object")?;
            match parsed {
                Value::Object(map) => Some(map),
                _ => anyhow::bail!("--config must be a JSON object"),
            }
        }
        None => None,
    };

    let submission = RunSubmission {
        ticker: args.ticker,
        trade_date: args.date,
        config,
        config_path: args.config_file,
        result_path: args.result_path,
    };

    let pipeline = ScriptedPipeline::echo();
    let emit = |signal: PipelineSignal| {
        let line = match signal {
            PipelineSignal::Progress { message, percent } => {
                json!({ "event": "progress", "message": message, "percent": percent })
            }
            PipelineSignal::State { snapshot } => {
                json!({ "event": "state", "snapshot": snapshot })
            }
        };
        println!("{line}");
    };

    match execute_blocking(&pipeline, &submission, &emit) {
        Ok(outcome) => {
            println!(
                "{}",
                json!({ "event": "complete", "status": "success", "result": outcome.result })
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                json!({ "event": "error", "status": "failed", "message": err.to_string() })
            );
            Err(err.into())
        }
    }
}
