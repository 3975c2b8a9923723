use clap::{Parser, Subcommand};
use elastic_core::access::StaticCapabilities;
use elastic_core::config::{ConfigError, ProtocolConfig};
use elastic_core::consensus::RoundView;
use elastic_core::storage::{SnapshotStore, StorageError};
use elastic_core::types::{AccountId, Balance, IndexValue};
use elastic_core::{Operation, Protocol, ProtocolError, ProtocolState};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "elastic-ledger")]
#[command(about = "Elastic-supply ledger: genesis, operation replay and state inspection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a genesis snapshot from a config file
    Init {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        snapshot: PathBuf,
    },
    /// Apply a JSON array of operations to a snapshot, printing events as JSON lines
    Replay {
        #[arg(short, long)]
        snapshot: PathBuf,
        #[arg(short, long)]
        ops: PathBuf,
        /// Stop at the first failing operation instead of skipping it
        #[arg(long)]
        strict: bool,
    },
    /// Print round and supply state
    Show {
        #[arg(short, long)]
        snapshot: PathBuf,
        /// Also print the balance of this identity
        #[arg(long)]
        holder: Option<AccountId>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse operations: {0}")]
    Ops(#[source] serde_json::Error),
    #[error("no snapshot at {0}")]
    MissingSnapshot(PathBuf),
    #[error("operation {index} failed: {source}")]
    Operation {
        index: usize,
        #[source]
        source: ProtocolError,
    },
}

#[derive(Serialize)]
struct Summary {
    round: Option<RoundView>,
    last_finalized: Option<(IndexValue, u64)>,
    submitters: Vec<AccountId>,
    total_supply: Balance,
    scale_factor: Balance,
    internal_supply: Balance,
    reward_beneficiary: Option<AccountId>,
    epoch: u64,
    holders: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    balance: Option<Balance>,
}

type Ledger = Protocol<StaticCapabilities>;

fn load_ledger(path: &Path) -> Result<Ledger, CliError> {
    let state: ProtocolState<StaticCapabilities> = SnapshotStore::at(path)
        .load()?
        .ok_or_else(|| CliError::MissingSnapshot(path.to_path_buf()))?;
    Ok(Protocol::restore(state))
}

fn init(config: &Path, snapshot: &Path) -> Result<(), CliError> {
    let cfg = ProtocolConfig::load(config)?;
    let ledger = Protocol::from_config(cfg)?;
    SnapshotStore::at(snapshot).save(&ledger.snapshot())?;
    info!(snapshot = %snapshot.display(), total_supply = ledger.total_supply(), "genesis written");
    Ok(())
}

fn replay(snapshot: &Path, ops_path: &Path, strict: bool) -> Result<(), CliError> {
    let mut ledger = load_ledger(snapshot)?;
    let raw = fs::read_to_string(ops_path).map_err(|source| CliError::Read {
        path: ops_path.to_path_buf(),
        source,
    })?;
    let ops: Vec<Operation> = serde_json::from_str(&raw).map_err(CliError::Ops)?;

    let mut failed = 0usize;
    for (index, op) in ops.iter().enumerate() {
        match ledger.execute(op) {
            Ok(events) => {
                for ev in events {
                    match serde_json::to_string(&ev) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!(index, error = %e, "cannot encode event"),
                    }
                }
            }
            Err(source) if strict => return Err(CliError::Operation { index, source }),
            Err(e) => {
                failed += 1;
                warn!(index, error = %e, kind = ?e.kind(), "operation failed");
            }
        }
    }

    SnapshotStore::at(snapshot).save(&ledger.snapshot())?;
    info!(applied = ops.len() - failed, failed, epoch = ledger.epoch(), "replay complete");
    Ok(())
}

fn show(snapshot: &Path, holder: Option<AccountId>) -> Result<(), CliError> {
    let ledger = load_ledger(snapshot)?;
    let summary = Summary {
        round: ledger.get_round(),
        last_finalized: ledger.last_finalized(),
        submitters: ledger.submitters(),
        total_supply: ledger.total_supply(),
        scale_factor: ledger.scale_factor(),
        internal_supply: ledger.internal_supply(),
        reward_beneficiary: ledger.reward_beneficiary(),
        epoch: ledger.epoch(),
        holders: ledger.holder_count(),
        balance: holder.map(|h| ledger.balance_of(&h)),
    };
    let out = serde_json::to_string_pretty(&summary).map_err(StorageError::from)?;
    println!("{}", out);
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Init { config, snapshot } => init(&config, &snapshot),
        Commands::Replay {
            snapshot,
            ops,
            strict,
        } => replay(&snapshot, &ops, strict),
        Commands::Show { snapshot, holder } => show(&snapshot, holder),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
