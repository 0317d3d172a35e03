use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use restock_api::{OrderRequest, ReconcileRequest, RestockApi};
use restock_core::{CategoryThresholds, ProductRecord, ReviewDecision};
use serde_json::Value;

const CLI_CONTRACT_VERSION: &str = "cli.v1";

#[derive(Debug, Parser)]
#[command(name = "rk")]
#[command(about = "Restock Kernel CLI")]
struct Cli {
    #[arg(long, default_value = "./restock.sqlite3")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Memory {
        #[command(subcommand)]
        command: MemoryCommand,
    },
    Reconcile(ReconcileArgs),
    Order(OrderArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum MemoryCommand {
    Confirm(MemoryConfirmArgs),
    Forget(MemoryForgetArgs),
    List,
}

#[derive(Debug, Args)]
struct MemoryConfirmArgs {
    #[arg(long)]
    pos_name: String,
    #[arg(long)]
    production_name: String,
}

#[derive(Debug, Args)]
struct MemoryForgetArgs {
    #[arg(long)]
    pos_name: String,
}

#[derive(Debug, Args)]
struct ReconcileArgs {
    /// JSON file with the POS product list.
    #[arg(long)]
    pos_file: PathBuf,

    /// JSON file with the production product list.
    #[arg(long)]
    production_file: PathBuf,

    #[arg(long, default_value = "main")]
    location: String,

    /// Review decision as `<pos_index>:confirm:<production_index>` or
    /// `<pos_index>:reject:<production_index>`; repeatable.
    #[arg(long = "override")]
    overrides: Vec<String>,
}

#[derive(Debug, Args)]
struct OrderArgs {
    #[command(flatten)]
    reconcile: ReconcileArgs,

    /// Optional JSON file overriding the standard category threshold table.
    #[arg(long)]
    thresholds_file: Option<PathBuf>,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let api = RestockApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(&command, &api),
        Command::Memory { command } => run_memory(&command, &api),
        Command::Reconcile(args) => run_reconcile(&args, &api),
        Command::Order(args) => run_order(args, &api),
    }
}

fn run_db(command: &DbCommand, api: &RestockApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result)?)
        }
    }
}

fn run_memory(command: &MemoryCommand, api: &RestockApi) -> Result<()> {
    match command {
        MemoryCommand::Confirm(args) => {
            let entry = api.confirm_match(&args.pos_name, &args.production_name)?;
            emit_json(serde_json::to_value(&entry)?)
        }
        MemoryCommand::Forget(args) => {
            let removed = api.forget_match(&args.pos_name)?;
            emit_json(serde_json::json!({
                "pos_name": args.pos_name,
                "removed": removed
            }))
        }
        MemoryCommand::List => {
            let entries = api.list_memory()?;
            emit_json(serde_json::json!({
                "count": entries.len(),
                "entries": entries
            }))
        }
    }
}

fn run_reconcile(args: &ReconcileArgs, api: &RestockApi) -> Result<()> {
    let request = reconcile_request(args)?;
    let report = api.reconcile(request)?;
    emit_json(serde_json::to_value(&report)?)
}

fn run_order(args: OrderArgs, api: &RestockApi) -> Result<()> {
    let request = reconcile_request(&args.reconcile)?;
    let thresholds = match args.thresholds_file.as_ref() {
        Some(path) => Some(read_thresholds(path)?),
        None => None,
    };

    let report = api.build_order(OrderRequest {
        location: request.location,
        pos_products: request.pos_products,
        production_products: request.production_products,
        overrides: request.overrides,
        thresholds,
    })?;
    emit_json(serde_json::to_value(&report)?)
}

fn reconcile_request(args: &ReconcileArgs) -> Result<ReconcileRequest> {
    Ok(ReconcileRequest {
        location: args.location.clone(),
        pos_products: read_products(&args.pos_file)?,
        production_products: read_products(&args.production_file)?,
        overrides: parse_overrides(&args.overrides)?,
    })
}

fn read_products(path: &Path) -> Result<Vec<ProductRecord>> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read product file {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse product JSON {}", path.display()))
}

fn read_thresholds(path: &Path) -> Result<CategoryThresholds> {
    let body = fs::read_to_string(path)
        .with_context(|| format!("failed to read threshold file {}", path.display()))?;
    serde_json::from_str(&body)
        .with_context(|| format!("failed to parse threshold JSON {}", path.display()))
}

fn parse_overrides(raw: &[String]) -> Result<BTreeMap<usize, ReviewDecision>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let (pos_index, decision) = parse_override(entry)?;
        if overrides.insert(pos_index, decision).is_some() {
            return Err(anyhow!("duplicate override for POS index {pos_index}"));
        }
    }
    Ok(overrides)
}

fn parse_override(entry: &str) -> Result<(usize, ReviewDecision)> {
    let mut parts = entry.split(':');
    let (Some(pos_raw), Some(verb), Some(production_raw), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(anyhow!(
            "invalid override `{entry}`; expected <pos_index>:confirm|reject:<production_index>"
        ));
    };

    let pos_index: usize = pos_raw
        .parse()
        .with_context(|| format!("invalid POS index in override `{entry}`"))?;
    let production_index: usize = production_raw
        .parse()
        .with_context(|| format!("invalid production index in override `{entry}`"))?;

    let decision = match verb {
        "confirm" => ReviewDecision::Confirm { production_index },
        "reject" => ReviewDecision::Reject { production_index },
        other => {
            return Err(anyhow!("invalid override verb `{other}`; expected confirm or reject"));
        }
    };

    Ok((pos_index, decision))
}
