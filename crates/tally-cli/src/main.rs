use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Record numbering and line-item reconciliation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> site -> local...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Identifier allocation and duplicate repair
    Seq {
        #[command(subcommand)]
        cmd: SeqCmd,
    },

    /// Create numbered records
    Record {
        #[command(subcommand)]
        cmd: RecordCmd,
    },

    /// Manage the product catalog used for line-item synthesis
    Catalog {
        #[command(subcommand)]
        cmd: CatalogCmd,
    },

    /// Line-item reconciliation
    Reconcile {
        #[command(subcommand)]
        cmd: ReconcileCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,
    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum SeqCmd {
    /// Issue the next identifier for a series.
    Allocate {
        #[arg(long)]
        series: String,

        /// Layered config paths in merge order (built-in series when omitted)
        #[arg(long = "config")]
        config_paths: Vec<String>,
    },

    /// Renumber every record sharing a number, except the earliest one.
    Repair {
        #[arg(long)]
        series: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RecordCmd {
    /// Allocate a number, persist the record and reconcile its line items.
    Create {
        #[arg(long)]
        series: String,

        /// Decimal total, e.g. 519.80
        #[arg(long)]
        total: String,

        #[arg(long = "config")]
        config_paths: Vec<String>,
    },
}

#[derive(Subcommand)]
enum CatalogCmd {
    /// Add an active catalog item.
    Add {
        #[arg(long)]
        name: String,

        /// Decimal unit price, e.g. 25.99
        #[arg(long)]
        price: String,
    },

    /// Deactivate a catalog item; it is no longer used for synthesis.
    Deactivate {
        #[arg(long)]
        catalog_item_id: String,
    },
}

#[derive(Subcommand)]
enum ReconcileCmd {
    /// Reconcile a single record.
    One {
        #[arg(long)]
        aggregate_id: String,
    },

    /// Sweep every record in creation order.
    All,
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let pool = tally_db::connect_from_env(2).await?;
            match cmd {
                DbCmd::Status => {
                    let s = tally_db::status(&pool).await?;
                    println!("db_ok={} has_counters_table={}", s.ok, s.has_counters_table);
                }
                DbCmd::Migrate => {
                    tally_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = tally_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Seq { cmd } => match cmd {
            SeqCmd::Allocate {
                series,
                config_paths,
            } => commands::seq::allocate(&series, &config_paths).await?,
            SeqCmd::Repair {
                series,
                config_paths,
            } => commands::seq::repair(&series, &config_paths).await?,
        },

        Commands::Record { cmd } => match cmd {
            RecordCmd::Create {
                series,
                total,
                config_paths,
            } => commands::record::create(&series, &total, &config_paths).await?,
        },

        Commands::Catalog { cmd } => match cmd {
            CatalogCmd::Add { name, price } => commands::record::catalog_add(&name, &price).await?,
            CatalogCmd::Deactivate { catalog_item_id } => {
                commands::record::catalog_deactivate(&catalog_item_id).await?
            }
        },

        Commands::Reconcile { cmd } => match cmd {
            ReconcileCmd::One { aggregate_id } => commands::reconcile::one(&aggregate_id).await?,
            ReconcileCmd::All => commands::reconcile::all().await?,
        },
    }

    Ok(())
}
