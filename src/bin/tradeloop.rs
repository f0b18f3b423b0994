//! tradeloop CLI: run one pipeline operation against a JSON request.
//!
//! Every operation reads its request from a file (or stdin when the path is
//! `-` or omitted) and prints the JSON response envelope.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::de::DeserializeOwned;
use serde::Serialize;

use tradeloop::config::Config;
use tradeloop::decision::DecisionContext;
use tradeloop::persistence::SledStore;
use tradeloop::service::{
    DecideRequest, EvaluateRequest, Pipeline, ProposeRequest, Response, RiskRequest, ScoreRequest,
};
use tradeloop::utils::init_logging;

#[derive(Debug, Parser)]
#[command(name = "tradeloop", author, version, about = "Signal-to-decision pipeline", long_about = None)]
struct Args {
    /// Path to the configuration file (TOML); defaults to the standard search path
    #[arg(short, long, env = "TRADELOOP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level when TRADELOOP_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Score a batch of signals: {"signals": [...]}
    Score {
        #[arg(value_name = "JSON")]
        input: Option<PathBuf>,
    },
    /// Assess risk for a basket: {"assets", "size_pct", "horizon_days", "market"}
    Risk {
        #[arg(value_name = "JSON")]
        input: Option<PathBuf>,
    },
    /// Synthesize a proposal from scored signals
    Propose {
        #[arg(value_name = "JSON")]
        input: Option<PathBuf>,
    },
    /// Decide on a proposal: {"proposal", "context"}
    Decide {
        #[arg(value_name = "JSON")]
        input: Option<PathBuf>,
    },
    /// Evaluate a realized outcome: {"proposal", "outcome"}
    Evaluate {
        #[arg(value_name = "JSON")]
        input: Option<PathBuf>,
    },
    /// Inspect persisted model state
    State {
        #[command(subcommand)]
        command: StateCommand,
    },
    /// Print the default configuration to stdout
    PrintDefaultConfig,
    /// Write a default configuration file
    Init {
        #[arg(short, long, default_value = "tradeloop.toml")]
        config: PathBuf,
        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum StateCommand {
    /// Print the current model state
    Show,
}

fn read_request<T: DeserializeOwned>(input: Option<&Path>) -> Result<T> {
    let raw = match input {
        | Some(p) if p != Path::new("-") => std::fs::read_to_string(p)
            .with_context(|| format!("reading request from {}", p.display()))?,
        | _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("request is not valid JSON for this operation")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut cfg = match path {
        | Some(p) => Config::from_file(p)
            .with_context(|| format!("loading config from {}", p.display()))?,
        | None => Config::load().context("loading config")?,
    };
    cfg.merge_env()?;
    cfg.validate()?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    match &args.command {
        | Command::PrintDefaultConfig => {
            print!("{}", Config::default_toml()?);
            return Ok(());
        }
        | Command::Init { config, force } => {
            if config.exists() && !force {
                anyhow::bail!("{} exists; use --force to overwrite", config.display());
            }
            Config::default().save(config)?;
            println!("Wrote default configuration to {}", config.display());
            return Ok(());
        }
        | _ => {}
    }

    if let Err(e) = tradeloop::metrics::init() {
        tracing::warn!(error = %e, "metrics recorder not installed");
    }

    let cfg = load_config(args.config.as_deref())?;
    let data_dir = cfg.data_dir();
    let store = SledStore::open(&data_dir)
        .await
        .with_context(|| format!("opening store at {}", data_dir.display()))?;
    let pipeline = Pipeline::with_store(cfg, store.clone())?;

    match args.command {
        | Command::Score { input } => {
            let req: ScoreRequest = read_request(input.as_deref())?;
            print_json(&Response::batch(pipeline.score_signals(req.signals).await))?;
        }
        | Command::Risk { input } => {
            let req: RiskRequest = read_request(input.as_deref())?;
            print_json(&Response::from(pipeline.assess_risk(req).await))?;
        }
        | Command::Propose { input } => {
            let req: ProposeRequest = read_request(input.as_deref())?;
            print_json(&Response::from(pipeline.synthesize_proposal(req).await))?;
        }
        | Command::Decide { input } => {
            let req: DecideRequest = read_request(input.as_deref())?;
            let ctx = req.context.unwrap_or_else(|| DecisionContext::at(Utc::now()));
            print_json(&Response::from(pipeline.decide(req.proposal, ctx).await))?;
        }
        | Command::Evaluate { input } => {
            let req: EvaluateRequest = read_request(input.as_deref())?;
            print_json(&Response::from(
                pipeline.evaluate_outcome(&req.proposal, &req.outcome).await,
            ))?;
        }
        | Command::State { command: StateCommand::Show } => {
            print_json(&Response::from(pipeline.state().await))?;
        }
        | Command::PrintDefaultConfig | Command::Init { .. } => unreachable!(),
    }

    store.flush().await?;
    Ok(())
}
