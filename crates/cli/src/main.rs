//! Gallery CLI - Database migrations and order inspection.
//!
//! # Usage
//!
//! ```bash
//! # Run billing database migrations
//! gallery-cli migrate
//!
//! # Show an order with items and audit trail
//! gallery-cli orders show ORD-LOYW3V28-ZZZ
//!
//! # List orders, newest first
//! gallery-cli orders list --status pending --page 2
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `orders show` - Inspect a single order
//! - `orders list` - Page through orders

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "gallery-cli")]
#[command(author, version, about = "Gallery billing CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run billing database migrations
    Migrate,
    /// Inspect orders
    Orders {
        #[command(subcommand)]
        action: OrdersAction,
    },
}

#[derive(Subcommand)]
enum OrdersAction {
    /// Show an order with its items and events
    Show {
        /// Order number (`ORD-...`)
        order_id: String,
    },
    /// List orders, newest first
    List {
        /// 1-based page number
        #[arg(short, long, default_value_t = 1)]
        page: u32,

        /// Orders per page (at most 100)
        #[arg(short, long, default_value_t = 20)]
        limit: u32,

        /// Only orders in this status (`pending`, `paid`, ...)
        #[arg(short, long)]
        status: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), commands::CommandError> {
    match cli.command {
        Commands::Migrate => commands::migrate::billing().await?,
        Commands::Orders { action } => match action {
            OrdersAction::Show { order_id } => commands::orders::show(&order_id).await?,
            OrdersAction::List {
                page,
                limit,
                status,
            } => commands::orders::list(page, limit, status.as_deref()).await?,
        },
    }
    Ok(())
}
