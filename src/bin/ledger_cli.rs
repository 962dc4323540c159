use std::{fs, path::PathBuf, str::FromStr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use inventory_ledger::{
    config::{self, LedgerConfig},
    db::{self, DbPool},
    entities::stock_movement::{self, MovementReason},
    events::{process_events, EventSender},
    services::{ledger::StockMoveCommand, LedgerServices, LedgerSettings},
    snapshot_to_csv,
};
use serde::Serialize;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => handle_migrate(&context).await?,
        Commands::Stock(args) => handle_stock(&context, args, cli.json).await?,
        Commands::History(args) => handle_history(&context, args, cli.json).await?,
        Commands::Snapshot(args) => handle_snapshot(&context, args).await?,
        Commands::Transfer(args) => handle_transfer(&context, args, cli.json).await?,
        Commands::Adjust(args) => handle_adjust(&context, args, cli.json).await?,
        Commands::Reconcile => handle_reconcile(&context, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "ledger-cli", about = "Operator tooling for the inventory ledger", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Show on-hand quantity for a variant
    Stock(StockArgs),
    /// List movements, newest first
    History(HistoryArgs),
    /// Export every stock row as CSV
    Snapshot(SnapshotArgs),
    /// Move stock between two locations
    Transfer(TransferArgs),
    /// Apply a signed correction, or set a pair to a counted quantity
    Adjust(AdjustArgs),
    /// Report pairs whose quantity disagrees with their movement history
    Reconcile,
}

#[derive(Args)]
struct StockArgs {
    variant: i64,
    /// Omit to sum across all locations
    location: Option<i64>,
}

#[derive(Args)]
struct HistoryArgs {
    #[arg(long)]
    variant: Option<i64>,
    #[arg(long)]
    location: Option<i64>,
    #[arg(long, default_value_t = 1)]
    page: u64,
    #[arg(long, default_value_t = 0)]
    limit: u64,
}

#[derive(Args)]
struct SnapshotArgs {
    /// Write to this file instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct TransferArgs {
    #[arg(long)]
    variant: i64,
    #[arg(long)]
    quantity: i64,
    #[arg(long)]
    from: i64,
    #[arg(long)]
    to: i64,
    #[arg(long, default_value_t = 0)]
    actor: i64,
}

#[derive(Args)]
struct AdjustArgs {
    #[arg(long)]
    location: i64,
    #[arg(long)]
    variant: i64,
    #[arg(long, allow_hyphen_values = true, conflicts_with = "target", required_unless_present = "target")]
    delta: Option<i64>,
    #[arg(long)]
    target: Option<i64>,
    #[arg(long, default_value = "ADJUSTMENT", value_parser = parse_reason)]
    reason: MovementReason,
    #[arg(long, default_value_t = 0)]
    actor: i64,
}

fn parse_reason(raw: &str) -> std::result::Result<MovementReason, String> {
    MovementReason::from_str(raw).map_err(|_| format!("unknown movement reason '{}'", raw))
}

async fn handle_migrate(context: &CliContext) -> Result<()> {
    db::run_migrations(&context.db)
        .await
        .context("failed to run migrations")?;
    println!("Migrations applied");
    Ok(())
}

async fn handle_stock(context: &CliContext, args: StockArgs, json: bool) -> Result<()> {
    let ledger = &context.services.ledger;
    let quantity = match args.location {
        Some(location_id) => ledger.get_stock_level(args.variant, location_id).await,
        None => ledger.total_on_hand(args.variant).await,
    }
    .context("failed to read stock level")?;

    if json {
        #[derive(Serialize)]
        struct StockView {
            variant_id: i64,
            location_id: Option<i64>,
            quantity: i64,
        }
        print_json(&StockView {
            variant_id: args.variant,
            location_id: args.location,
            quantity,
        })?;
    } else {
        match args.location {
            Some(location_id) => println!(
                "Variant {} at location {}: {}",
                args.variant, location_id, quantity
            ),
            None => println!("Variant {} across all locations: {}", args.variant, quantity),
        }
    }
    Ok(())
}

async fn handle_history(context: &CliContext, args: HistoryArgs, json: bool) -> Result<()> {
    let movements = context
        .services
        .ledger
        .movement_history(args.variant, args.location, args.page, args.limit)
        .await
        .context("failed to load movement history")?;

    if json {
        print_json(&movements)?;
    } else if movements.is_empty() {
        println!("No movements found");
    } else {
        for movement in &movements {
            render_movement(movement);
        }
    }
    Ok(())
}

async fn handle_snapshot(context: &CliContext, args: SnapshotArgs) -> Result<()> {
    let rows = context
        .services
        .reports
        .export_snapshot()
        .await
        .context("failed to export stock snapshot")?;
    let body = snapshot_to_csv(&rows)?;

    match args.output {
        Some(path) => {
            fs::write(&path, body)
                .with_context(|| format!("failed to write snapshot to {}", path.display()))?;
            println!("Wrote {} rows to {}", rows.len(), path.display());
        }
        None => print!("{}", body),
    }
    Ok(())
}

async fn handle_transfer(context: &CliContext, args: TransferArgs, json: bool) -> Result<()> {
    let transfer = context
        .services
        .transfers
        .transfer(args.variant, args.quantity, args.from, args.to, args.actor)
        .await
        .context("transfer failed")?;

    if json {
        print_json(&transfer)?;
    } else {
        println!(
            "Transfer {} moved {} of variant {} from {} to {}",
            transfer.transfer_number,
            transfer.quantity,
            transfer.variant_id,
            transfer.from_location_id,
            transfer.to_location_id
        );
    }
    Ok(())
}

async fn handle_adjust(context: &CliContext, args: AdjustArgs, json: bool) -> Result<()> {
    let movement = match (args.delta, args.target) {
        (Some(delta), _) => Some(
            context
                .services
                .ledger
                .execute_movement(StockMoveCommand::new(
                    args.location,
                    args.variant,
                    delta,
                    args.reason,
                    args.actor,
                ))
                .await
                .context("adjustment failed")?,
        ),
        (None, Some(target)) => context
            .services
            .adjustments
            .adjust_to_target(args.location, args.variant, target, args.reason, args.actor)
            .await
            .context("adjustment failed")?,
        (None, None) => return Err(anyhow!("either --delta or --target is required")),
    };

    if json {
        print_json(&movement)?;
    } else {
        match &movement {
            Some(movement) => render_movement(movement),
            None => println!("Stock already matches; nothing recorded"),
        }
    }
    Ok(())
}

async fn handle_reconcile(context: &CliContext, json: bool) -> Result<()> {
    let discrepancies = context
        .services
        .ledger
        .reconcile()
        .await
        .context("failed to reconcile ledger")?;

    if json {
        print_json(&discrepancies)?;
    } else if discrepancies.is_empty() {
        println!("Ledger is consistent");
    } else {
        for d in &discrepancies {
            println!(
                "- location {} variant {}: recorded {} but movements sum to {}",
                d.location_id, d.variant_id, d.recorded_quantity, d.movement_total
            );
        }
    }

    if !discrepancies.is_empty() {
        return Err(anyhow!("{} discrepancies found", discrepancies.len()));
    }
    Ok(())
}

struct CliContext {
    _config: LedgerConfig,
    db: Arc<DbPool>,
    services: LedgerServices,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config = config::load_config().context("failed to load ledger config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_config(&config)
            .await
            .context("failed to connect to database")?;
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(process_events(event_rx));
        debug!(target: "ledger_cli", "event consumer started");

        let services = LedgerServices::new(
            db.clone(),
            LedgerSettings::from(&config),
            Some(Arc::new(event_sender)),
        );

        Ok(Self {
            _config: config,
            db,
            services,
        })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_movement(movement: &stock_movement::Model) {
    let reference = match (movement.reference_type, movement.reference_id) {
        (Some(kind), Some(id)) => format!(" • {} {}", kind, id),
        _ => String::new(),
    };
    println!(
        "- #{} {} • location {} • variant {} • {:+} • {}{}",
        movement.id,
        movement.created_at.format("%Y-%m-%d %H:%M:%S"),
        movement.location_id,
        movement.variant_id,
        movement.quantity_change,
        movement.reason,
        reference
    );
}
