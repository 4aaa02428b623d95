//! CLI subcommand implementations.

pub mod migrate;
pub mod orders;

use secrecy::SecretString;
use thiserror::Error;

/// Errors shared by commands that talk to the billing database.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Order store error.
    #[error("Order store error: {0}")]
    Repository(#[from] gallery_billing::db::RepositoryError),

    /// Bad argument value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Read the billing database URL, falling back to `DATABASE_URL`.
///
/// # Errors
///
/// Returns [`CommandError::MissingEnvVar`] if neither is set.
pub fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("BILLING_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("BILLING_DATABASE_URL"))
}
