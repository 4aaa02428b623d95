//! Billing configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `BILLING_BASE_URL` - Public URL of the shop, used for payment redirects
//! - `BILLING_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`; not needed when `BILLING_STORE=memory`)
//!
//! ## Optional
//! - `BILLING_HOST` - Bind address (default: 127.0.0.1)
//! - `BILLING_PORT` - Listen port (default: 3002)
//! - `BILLING_STORE` - `postgres` or `memory` (default: postgres)
//! - `STORE_NAME` - Shown on payment pages and emails (default: Gallery)
//! - `PAYMENT_PROVIDER` - `sandbox` or `hosted` (default: sandbox)
//! - `PAYMENT_TEST_MODE` - Use the provider's sandbox (default: true)
//! - `PAYMENT_CURRENCY` - ISO 4217 code (default: ZAR)
//! - `PAYMENT_MERCHANT_ID`, `PAYMENT_MERCHANT_KEY` - Required for `hosted`
//! - `PAYMENT_PASSPHRASE` - Webhook/form signing passphrase
//! - `SMTP_HOST` - Enables email; then `SMTP_USERNAME`, `SMTP_PASSWORD` and
//!   `EMAIL_FROM` are required, `SMTP_PORT` defaults to 587
//! - `SENTRY_DSN`, `SENTRY_ENVIRONMENT` - Sentry error tracking
//! - `SENTRY_SAMPLE_RATE` (default: 1.0), `SENTRY_TRACES_SAMPLE_RATE` (default: 0.1)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use url::Url;

use gallery_core::CurrencyCode;

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Where orders are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    /// Process memory; orders are lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected `postgres` or `memory`, got `{other}`")),
        }
    }
}

/// Which payment gateway to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Sandbox,
    Hosted,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "mock" => Ok(Self::Sandbox),
            "hosted" => Ok(Self::Hosted),
            other => Err(format!("expected `sandbox` or `hosted`, got `{other}`")),
        }
    }
}

/// Billing application configuration.
#[derive(Debug, Clone)]
pub struct BillingConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Public base URL used to build payment return and notify URLs
    pub base_url: Url,
    /// Order storage backend
    pub store: StoreBackend,
    /// Shop name shown to payers
    pub store_name: String,
    /// Payment gateway configuration
    pub payment: PaymentConfig,
    /// SMTP configuration; `None` logs notifications instead of sending them
    pub email: Option<EmailConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Fraction of errors sent to Sentry
    pub sentry_sample_rate: f32,
    /// Fraction of requests traced
    pub sentry_traces_sample_rate: f32,
}

/// Payment gateway configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct PaymentConfig {
    pub provider: ProviderKind,
    pub test_mode: bool,
    pub currency: CurrencyCode,
    pub merchant_id: Option<String>,
    pub merchant_key: Option<SecretString>,
    pub passphrase: Option<SecretString>,
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("provider", &self.provider)
            .field("test_mode", &self.test_mode)
            .field("currency", &self.currency)
            .field("merchant_id", &self.merchant_id)
            .field("merchant_key", &self.merchant_key.as_ref().map(|_| "[REDACTED]"))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// SMTP configuration for customer emails.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Environment variable lookup.
///
/// `from_env` reads the process environment; tests pass a map.
struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Get an optional environment variable. Empty values count as unset.
    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a required environment variable.
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
    }

    /// Get an environment variable with a default value.
    fn or_default(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse an environment variable, falling back to a default.
    fn parsed<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.or_default(key, default)
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }

    /// Parse a boolean flag (`true/false`, `1/0`, `yes/no`).
    fn flag(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.optional(key) {
            None => Ok(default),
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" => Ok(false),
                other => Err(ConfigError::InvalidEnvVar(
                    key.to_string(),
                    format!("expected a boolean, got `{other}`"),
                )),
            },
        }
    }

    /// Get database URL with fallback to generic `DATABASE_URL` (used by Fly.io postgres attach).
    fn database_url(&self, primary_key: &str) -> Option<SecretString> {
        self.optional(primary_key)
            .or_else(|| self.optional("DATABASE_URL"))
            .map(SecretString::from)
    }

    /// Load an optional secret, validating its strength when `strict`.
    fn secret(&self, key: &str, strict: bool) -> Result<Option<SecretString>, ConfigError> {
        let Some(value) = self.optional(key) else {
            return Ok(None);
        };
        if strict {
            validate_secret_strength(&value, key)?;
        }
        Ok(Some(SecretString::from(value)))
    }
}

impl BillingConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if live payment secrets fail validation (placeholder detection,
    /// entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`BillingConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let store: StoreBackend = env.parsed("BILLING_STORE", "postgres")?;
        let database_url = env.database_url("BILLING_DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "BILLING_DATABASE_URL".to_string(),
            ));
        }

        let host: IpAddr = env.parsed("BILLING_HOST", "127.0.0.1")?;
        let port: u16 = env.parsed("BILLING_PORT", "3002")?;
        let base_url = Url::parse(&env.required("BILLING_BASE_URL")?).map_err(|e| {
            ConfigError::InvalidEnvVar("BILLING_BASE_URL".to_string(), e.to_string())
        })?;

        let payment = PaymentConfig::load(&env)?;
        let email = EmailConfig::load(&env)?;

        Ok(Self {
            database_url,
            host,
            port,
            base_url,
            store,
            store_name: env.or_default("STORE_NAME", "Gallery"),
            payment,
            email,
            sentry_dsn: env.optional("SENTRY_DSN"),
            sentry_environment: env.optional("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: env.parsed("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: env.parsed("SENTRY_TRACES_SAMPLE_RATE", "0.1")?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Expose the database URL, if configured.
    #[must_use]
    pub fn database_url(&self) -> Option<&SecretString> {
        self.database_url.as_ref()
    }

    /// Whether the configured provider signs with a passphrase.
    #[must_use]
    pub fn has_passphrase(&self) -> bool {
        self.payment
            .passphrase
            .as_ref()
            .is_some_and(|p| !p.expose_secret().is_empty())
    }

    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }
}

impl PaymentConfig {
    fn load<F>(env: &Env<F>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let provider: ProviderKind = env.parsed("PAYMENT_PROVIDER", "sandbox")?;
        let test_mode = env.flag("PAYMENT_TEST_MODE", true)?;
        let currency: CurrencyCode = env.parsed("PAYMENT_CURRENCY", "ZAR")?;

        // Live credentials must be real secrets; sandbox ones are public.
        let strict = !test_mode;
        let merchant_id = env.optional("PAYMENT_MERCHANT_ID");
        let merchant_key = env.secret("PAYMENT_MERCHANT_KEY", strict)?;
        let passphrase = env.secret("PAYMENT_PASSPHRASE", strict)?;

        if provider == ProviderKind::Hosted {
            if merchant_id.is_none() {
                return Err(ConfigError::MissingEnvVar(
                    "PAYMENT_MERCHANT_ID".to_string(),
                ));
            }
            if merchant_key.is_none() {
                return Err(ConfigError::MissingEnvVar(
                    "PAYMENT_MERCHANT_KEY".to_string(),
                ));
            }
        }

        Ok(Self {
            provider,
            test_mode,
            currency,
            merchant_id,
            merchant_key,
            passphrase,
        })
    }
}

impl EmailConfig {
    fn load<F>(env: &Env<F>) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(smtp_host) = env.optional("SMTP_HOST") else {
            return Ok(None);
        };

        Ok(Some(Self {
            smtp_host,
            smtp_port: env.parsed("SMTP_PORT", "587")?,
            smtp_username: env.required("SMTP_USERNAME")?,
            smtp_password: SecretString::from(env.required("SMTP_PASSWORD")?),
            from_address: env.required("EMAIL_FROM")?,
        }))
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<BillingConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BillingConfig::from_lookup(|key| map.get(key).cloned())
    }

    const MINIMAL: &[(&str, &str)] = &[
        ("BILLING_BASE_URL", "https://gallery.test"),
        ("BILLING_DATABASE_URL", "postgres://localhost/gallery_billing"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(MINIMAL).unwrap();
        assert_eq!(config.port, 3002);
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3002");
        assert_eq!(config.store, StoreBackend::Postgres);
        assert_eq!(config.store_name, "Gallery");
        assert_eq!(config.payment.provider, ProviderKind::Sandbox);
        assert!(config.payment.test_mode);
        assert_eq!(config.payment.currency, CurrencyCode::ZAR);
        assert!(config.email.is_none());
        assert_eq!(config.base_url(), "https://gallery.test");
    }

    #[test]
    fn test_database_url_fallback() {
        let config = load(&[
            ("BILLING_BASE_URL", "https://gallery.test"),
            ("DATABASE_URL", "postgres://fly/attach"),
        ])
        .unwrap();
        assert_eq!(
            config.database_url().unwrap().expose_secret(),
            "postgres://fly/attach"
        );
    }

    #[test]
    fn test_memory_store_needs_no_database() {
        let config = load(&[
            ("BILLING_BASE_URL", "https://gallery.test"),
            ("BILLING_STORE", "memory"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.database_url().is_none());

        let err = load(&[("BILLING_BASE_URL", "https://gallery.test")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(v) if v == "BILLING_DATABASE_URL"));
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("BILLING_PORT", "not-a-port"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::InvalidEnvVar(_, _)
        ));

        let mut vars = MINIMAL.to_vec();
        vars.push(("PAYMENT_TEST_MODE", "maybe"));
        assert!(load(&vars).is_err());

        let err = load(&[("BILLING_DATABASE_URL", "postgres://x")]).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(v) if v == "BILLING_BASE_URL"));
    }

    #[test]
    fn test_hosted_requires_credentials() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("PAYMENT_PROVIDER", "hosted"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::MissingEnvVar(v) if v == "PAYMENT_MERCHANT_ID"
        ));

        vars.push(("PAYMENT_MERCHANT_ID", "10000100"));
        vars.push(("PAYMENT_MERCHANT_KEY", "46f0cd694581a"));
        let config = load(&vars).unwrap();
        assert_eq!(config.payment.provider, ProviderKind::Hosted);
    }

    #[test]
    fn test_live_mode_rejects_placeholder_secrets() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("PAYMENT_TEST_MODE", "false"));
        vars.push(("PAYMENT_PASSPHRASE", "changeme"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::InsecureSecret(_, _)
        ));

        // The same passphrase is fine against the sandbox.
        let mut vars = MINIMAL.to_vec();
        vars.push(("PAYMENT_PASSPHRASE", "changeme"));
        assert!(load(&vars).unwrap().has_passphrase());
    }

    #[test]
    fn test_email_requires_credentials_once_enabled() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("SMTP_HOST", "smtp.gallery.test"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::MissingEnvVar(v) if v == "SMTP_USERNAME"
        ));

        vars.push(("SMTP_USERNAME", "billing"));
        vars.push(("SMTP_PASSWORD", "hunter2"));
        vars.push(("EMAIL_FROM", "Gallery <orders@gallery.test>"));
        let email = load(&vars).unwrap().email.unwrap();
        assert_eq!(email.smtp_port, 587);
        assert!(!format!("{email:?}").contains("hunter2"));
    }

    #[test]
    fn test_debug_redacts_payment_secrets() {
        let mut vars = MINIMAL.to_vec();
        vars.push(("PAYMENT_MERCHANT_KEY", "super-private-key"));
        let config = load(&vars).unwrap();
        assert!(!format!("{config:?}").contains("super-private-key"));
    }

    #[test]
    fn test_shannon_entropy() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("aaaaaaa") - 0.0).abs() < f64::EPSILON);
        assert!((shannon_entropy("ab") - 1.0).abs() < 0.01);
        assert!(shannon_entropy("aB3$xY9!mK2@nL5#") > 3.3);
    }

    #[test]
    fn test_validate_secret_strength() {
        assert!(validate_secret_strength("your-api-key-here", "TEST_VAR").is_err());
        assert!(validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR").is_err());
        assert!(validate_secret_strength("aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6", "TEST_VAR").is_ok());
    }
}
