//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! gallery-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `BILLING_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Billing migrations live in `crates/billing/migrations/` and are embedded
//! into the binary at build time.

use gallery_billing::db;

use super::{CommandError, database_url};

/// Run billing database migrations.
///
/// # Errors
///
/// Returns an error if the database URL is missing, the connection fails or a
/// migration fails to apply.
pub async fn billing() -> Result<(), CommandError> {
    let database_url = database_url()?;

    tracing::info!("Connecting to billing database...");
    let pool = db::create_pool(&database_url).await?;

    tracing::info!("Running billing migrations...");
    sqlx::migrate!("../billing/migrations").run(&pool).await?;

    tracing::info!("Billing migrations complete!");
    Ok(())
}
