use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::{rngs::OsRng, RngCore};
use serde::Serialize;
use tracing::{error, info};

use offset_ledger::{
    clock::{Clock, FixedClock, SystemClock},
    config::EngineConfig,
    engine::Transaction,
    ledger::{format_amount, parse_amount, AccountId, Amount, Timestamp},
    submit::{submit_signed, KeyRegistry, SignedTransaction},
    yield_pool::{Custody, InMemoryCustody},
    Engine, LedgerEvent,
};

//==================== CLI definition ====================//

#[derive(Parser)]
#[command(name = "offset-ledger", version, about = "Offset ledger and yield position CLI")]
struct Cli {
    /// JSON file holding the engine state.
    #[arg(long, global = true, default_value = "ledger.state.json")]
    state: PathBuf,

    /// Override "now" (unix seconds) instead of reading the system clock.
    #[arg(long, global = true)]
    at: Option<Timestamp>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a fresh state file from a JSON config.
    Init {
        #[arg(long)]
        config: PathBuf,
        #[arg(long)]
        force: bool,
    },
    /// Credit external (custody-side) units to a wallet.
    Fund {
        #[arg(long)]
        account: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
    },
    /// Pre-authorize the manager to pull external units from a wallet.
    Approve {
        #[arg(long)]
        account: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
    },
    Mint {
        #[arg(long)]
        caller: AccountId,
        #[arg(long)]
        account: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
        #[arg(long)]
        attestation: String,
    },
    Burn {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
    },
    Deposit {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
    },
    Withdraw {
        #[arg(long)]
        caller: AccountId,
        #[arg(long, value_parser = amount_arg)]
        amount: Amount,
    },
    Claim {
        #[arg(long)]
        caller: AccountId,
    },
    EmergencyWithdraw {
        #[arg(long)]
        caller: AccountId,
    },
    TransferAuthority {
        #[arg(long)]
        caller: AccountId,
        #[arg(long = "new")]
        new_authority: AccountId,
    },
    /// Ledger balance, offset and external wallet of an account.
    Balance {
        #[arg(long)]
        account: AccountId,
    },
    /// Yield position and pending yield of an account.
    Position {
        #[arg(long)]
        account: AccountId,
    },
    /// Print the full snapshot with its state root.
    Snapshot,
    /// Write a fresh Ed25519 keypair as sk.hex / pk.hex.
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },
    /// Sign a JSON transaction and print the base64 envelope.
    Sign {
        #[arg(long)]
        sk_hex: String,
        #[arg(long)]
        caller: AccountId,
        #[arg(long)]
        nonce: u64,
        /// e.g. '{"type":"burn","amount":"5000000000000000000"}'
        #[arg(long)]
        tx_json: String,
    },
    /// Verify and apply a base64 envelope produced by `sign`.
    SubmitSigned {
        /// JSON map of account -> hex public key.
        #[arg(long)]
        keys: PathBuf,
        #[arg(long)]
        envelope: String,
    },
}

fn amount_arg(raw: &str) -> Result<Amount, String> {
    parse_amount(raw).ok_or_else(|| format!("invalid token amount '{raw}'"))
}

//==================== state file ====================//

fn load_engine(path: &Path) -> Result<Engine> {
    let raw = fs::read(path)
        .with_context(|| format!("read state {} (run `init` first)", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parse state {}", path.display()))
}

fn save_engine(path: &Path, engine: &Engine) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
    }
    let json = serde_json::to_vec_pretty(engine).context("encode state")?;
    fs::write(path, json).with_context(|| format!("write state {}", path.display()))
}

#[derive(Serialize)]
struct PositionView<'a> {
    account: &'a str,
    principal: String,
    deposit_time: Option<Timestamp>,
    last_claim_time: Option<Timestamp>,
    total_accumulated: String,
    pending_yield: String,
    total_staked: String,
    custody_held: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one transaction against the state file, persisting only on success.
fn run_tx(state: &Path, caller: &str, tx: Transaction, now: Timestamp) -> Result<()> {
    let mut engine = load_engine(state)?;
    match engine.execute(caller, tx, now) {
        Ok(events) => {
            save_engine(state, &engine)?;
            print_events(&events)
        }
        Err(err) => bail!("rejected [{}]: {err}", err.code()),
    }
}

fn print_events(events: &[LedgerEvent]) -> Result<()> {
    for event in events {
        info!(event = event.name(), "emitted");
    }
    print_json(&events)
}

//==================== signing helpers ====================//

fn parse_sk_hex(sk_hex: &str) -> Result<SigningKey> {
    let bytes = hex::decode(sk_hex.trim()).context("--sk-hex is not valid hex")?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow!("--sk-hex must be exactly 32 bytes (64 hex chars)"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("create {}", out_dir.display()))?;
    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    fs::write(out_dir.join("sk.hex"), hex::encode(sk_bytes))?;
    fs::write(out_dir.join("pk.hex"), hex::encode(sk.verifying_key().as_bytes()))?;
    println!("keypair written → {}", out_dir.display());
    Ok(())
}

//==================== main ====================//

fn main() -> Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let now = match cli.at {
        Some(at) => FixedClock(at).now(),
        None => SystemClock.now(),
    };
    let state = cli.state.as_path();

    match cli.command {
        Command::Init { config, force } => {
            if state.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", state.display());
            }
            let config = EngineConfig::load(&config)?;
            let engine = Engine::new(&config, InMemoryCustody::new());
            save_engine(state, &engine)?;
            info!(authority = %config.authority, rate_bps = config.annual_rate_bps, "state initialised");
            Ok(())
        }
        Command::Fund { account, amount } => {
            let mut engine = load_engine(state)?;
            engine.custody_mut().fund(&account, amount)?;
            save_engine(state, &engine)?;
            println!("{account} external wallet: {}", format_amount(engine.custody().wallet_of(&account)));
            Ok(())
        }
        Command::Approve { account, amount } => {
            let mut engine = load_engine(state)?;
            engine.custody_mut().approve(&account, amount);
            save_engine(state, &engine)?;
            println!("{account} approved {}", format_amount(amount));
            Ok(())
        }
        Command::Mint {
            caller,
            account,
            amount,
            attestation,
        } => run_tx(
            state,
            &caller,
            Transaction::Mint {
                account,
                amount,
                attestation,
            },
            now,
        ),
        Command::Burn { caller, amount } => run_tx(state, &caller, Transaction::Burn { amount }, now),
        Command::Deposit { caller, amount } => {
            run_tx(state, &caller, Transaction::Deposit { amount }, now)
        }
        Command::Withdraw { caller, amount } => {
            run_tx(state, &caller, Transaction::Withdraw { amount }, now)
        }
        Command::Claim { caller } => run_tx(state, &caller, Transaction::ClaimYield, now),
        Command::EmergencyWithdraw { caller } => {
            run_tx(state, &caller, Transaction::EmergencyWithdraw, now)
        }
        Command::TransferAuthority {
            caller,
            new_authority,
        } => run_tx(
            state,
            &caller,
            Transaction::TransferAuthority { new_authority },
            now,
        ),
        Command::Balance { account } => {
            let engine = load_engine(state)?;
            let mut view = BTreeMap::new();
            view.insert("balance", format_amount(engine.balance_of(&account)));
            view.insert("offset", format_amount(engine.offset_of(&account)));
            view.insert("external_wallet", format_amount(engine.custody().wallet_of(&account)));
            view.insert("total_supply", format_amount(engine.total_supply()));
            view.insert("total_offset", format_amount(engine.total_offset()));
            print_json(&view)
        }
        Command::Position { account } => {
            let engine = load_engine(state)?;
            let pending = engine
                .pending_yield(&account, now)
                .map_err(|err| anyhow!("pending yield [{}]: {err}", err.code()))?;
            let position = engine.position(&account);
            print_json(&PositionView {
                account: &account,
                principal: format_amount(position.map(|p| p.principal).unwrap_or(0)),
                deposit_time: position.map(|p| p.deposit_time),
                last_claim_time: position.map(|p| p.last_claim_time),
                total_accumulated: format_amount(
                    position.map(|p| p.total_accumulated).unwrap_or(0),
                ),
                pending_yield: format_amount(pending),
                total_staked: format_amount(engine.total_staked()),
                custody_held: format_amount(engine.custody().held()),
            })
        }
        Command::Snapshot => {
            let engine = load_engine(state)?;
            let snapshot = engine.snapshot();
            if let Err(violation) = engine.check_invariants() {
                error!(%violation, "state invariant violated");
            }
            println!("state_root: {}", hex::encode(snapshot.state_root));
            print_json(&snapshot)
        }
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Sign {
            sk_hex,
            caller,
            nonce,
            tx_json,
        } => {
            let sk = parse_sk_hex(&sk_hex)?;
            let tx: Transaction = serde_json::from_str(&tx_json).context("parse --tx-json")?;
            let signed = SignedTransaction::sign(&sk, caller, nonce, tx);
            println!("{}", signed.to_base64()?);
            Ok(())
        }
        Command::SubmitSigned { keys, envelope } => {
            let raw = fs::read_to_string(&keys)
                .with_context(|| format!("read keys {}", keys.display()))?;
            let entries: BTreeMap<AccountId, String> =
                serde_json::from_str(&raw).context("parse keys file")?;
            let registry = KeyRegistry::from_hex_map(&entries)?;
            let signed = SignedTransaction::from_base64(&envelope)?;
            let mut engine = load_engine(state)?;
            let events = submit_signed(&mut engine, &registry, signed, now)?;
            save_engine(state, &engine)?;
            print_events(&events)
        }
    }
}
