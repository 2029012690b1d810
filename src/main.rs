use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use loyalty_ledger::{
    config::{LedgerConfig, DEFAULT_MAX_SUPPLY, DEFAULT_STATE_DIR},
    context::{unix_now, Invocation},
    store::LedgerStore,
    types::{CouponId, Points, Timestamp},
    SharedLedger,
};

/// loyalty - expiring loyalty points ledger
#[derive(Parser, Debug)]
#[command(name = "loyalty")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Directory holding config.json, ledger.json and events.jsonl
    #[arg(long, default_value = DEFAULT_STATE_DIR)]
    state_dir: PathBuf,

    /// Principal making the call
    #[arg(long, default_value = "")]
    caller: String,

    /// Override the call time (unix seconds)
    #[arg(long)]
    now: Option<Timestamp>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new ledger owned by --owner
    Init {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value_t = DEFAULT_MAX_SUPPLY)]
        max_supply: Points,
    },

    /// Grant points to a user as a new coupon
    Allocate {
        user: String,
        points: Points,
        /// Absolute expiry (unix seconds)
        #[arg(long, conflicts_with = "ttl")]
        expiry: Option<Timestamp>,
        /// Expiry relative to the call time, in seconds
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long, default_value = "")]
        reference: String,
    },

    /// Report a user's unexpired points
    Balance { user: String },

    /// Overwrite the points of a coupon
    Modify { coupon_id: CouponId, points: Points },

    /// Redeem points from a user, soonest expiry first
    Redeem { user: String, points: Points },

    /// Propose a new owner
    ProposeOwner { candidate: String },

    /// Accept a pending ownership proposal (run as the candidate)
    ConfirmOwner,

    /// Withdraw a pending ownership proposal
    CancelTransfer,

    /// Bar a principal from every restricted operation
    Blacklist { target: String },

    /// Show a coupon
    Coupon { coupon_id: CouponId },

    /// Show total and maximum supply
    Supply,

    /// Write ledger metadata for a front end
    Export {
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Serialize)]
struct ExportData {
    owner: String,
    pending_owner: Option<String>,
    max_supply: Points,
    total_supply: Points,
    height: u64,
    merkle_root: String,
    state_dir: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match cli.command {
        Commands::Init { owner, max_supply } => init(&cli.state_dir, &owner, max_supply),
        command => run(&cli.state_dir, &cli.caller, cli.now, command),
    }
}

fn run(state_dir: &Path, caller: &str, now: Option<Timestamp>, command: Commands) -> Result<()> {
    let config = LedgerConfig::load(state_dir).with_context(|| {
        format!("no ledger in {}, run `loyalty init` first", state_dir.display())
    })?;
    let ledger = SharedLedger::bootstrap(&config).context("open ledger")?;
    let now = now.unwrap_or_else(unix_now);
    let ctx = Invocation::new(caller, now);

    match command {
        Commands::Init { .. } => bail!("ledger already initialized in {}", state_dir.display()),
        Commands::Allocate {
            user,
            points,
            expiry,
            ttl,
            reference,
        } => {
            let expiry = match (expiry, ttl) {
                (Some(expiry), _) => expiry,
                (None, Some(ttl)) => now.saturating_add(ttl),
                (None, None) => bail!("one of --expiry or --ttl is required"),
            };
            let receipt = ledger.allocate(&ctx, &user, points, expiry, &reference)?;
            print_json(&receipt.events)?;
        }
        Commands::Balance { user } => {
            let receipt = ledger.balance_of(&ctx, &user)?;
            print_json(&receipt.events)?;
        }
        Commands::Modify { coupon_id, points } => {
            let receipt = ledger.modify(&ctx, coupon_id, points)?;
            print_json(&receipt.events)?;
        }
        Commands::Redeem { user, points } => {
            let receipt = ledger.redeem(&ctx, &user, points)?;
            print_json(&serde_json::json!({
                "redeemed": receipt.value,
                "events": receipt.events,
            }))?;
        }
        Commands::ProposeOwner { candidate } => {
            print_json(&ledger.propose_owner(&ctx, &candidate)?.events)?;
        }
        Commands::ConfirmOwner => {
            print_json(&ledger.confirm_owner(&ctx)?.events)?;
        }
        Commands::CancelTransfer => {
            print_json(&ledger.cancel_transfer(&ctx)?.events)?;
        }
        Commands::Blacklist { target } => {
            print_json(&ledger.blacklist(&ctx, &target)?.events)?;
        }
        Commands::Coupon { coupon_id } => {
            print_json(&ledger.coupon(coupon_id)?)?;
        }
        Commands::Supply => {
            print_json(&serde_json::json!({
                "total_supply": ledger.total_supply(),
                "max_supply": ledger.max_supply(),
            }))?;
        }
        Commands::Export { out } => {
            let snapshot = ledger.snapshot();
            let data = ExportData {
                owner: snapshot.access.owner().clone(),
                pending_owner: snapshot.access.pending_owner().cloned(),
                max_supply: snapshot.supply.max_supply(),
                total_supply: snapshot.supply.total_supply(),
                height: snapshot.meta.height,
                merkle_root: hex::encode(snapshot.merkle_root),
                state_dir: config.state_dir.clone(),
            };
            if let Some(parent) = out.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::write(&out, serde_json::to_vec_pretty(&data)?)
                .with_context(|| format!("write {}", out.display()))?;
            println!("ledger data exported → {}", out.display());
        }
    }
    Ok(())
}

fn init(state_dir: &Path, owner: &str, max_supply: Points) -> Result<()> {
    if LedgerStore::new(state_dir).exists() {
        bail!("ledger already exists in {}", state_dir.display());
    }
    let config = LedgerConfig::new(state_dir, owner).with_max_supply(max_supply);
    config.save()?;
    SharedLedger::bootstrap(&config)?;
    println!("ledger initialized → {}", state_dir.display());
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
