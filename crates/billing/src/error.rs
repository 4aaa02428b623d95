//! Unified error handling with Sentry integration.
//!
//! Route handlers return `Result<T, AppError>`. Server-side failures are
//! captured to Sentry before responding; clients only ever see a generic
//! message and a status code.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::payment::PaymentError;
use crate::services::BillingError;

/// Application-level error type for the billing API.
#[derive(Debug, Error)]
pub enum AppError {
    /// Billing operation failed.
    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl AppError {
    const fn status(&self) -> StatusCode {
        match self {
            Self::Billing(err) => match err {
                BillingError::InvalidOrder(_)
                | BillingError::InvalidStatus(_)
                | BillingError::Repository(RepositoryError::InvalidInput(_))
                | BillingError::Payment(PaymentError::MalformedWebhook(_)) => {
                    StatusCode::BAD_REQUEST
                }
                BillingError::Payment(_) => StatusCode::BAD_GATEWAY,
                BillingError::Repository(_) | BillingError::InvalidUrl(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message safe to show to clients.
    fn public_message(&self) -> String {
        match self {
            Self::Billing(err) => match err {
                BillingError::InvalidOrder(msg) => msg.clone(),
                BillingError::InvalidStatus(status) => format!("Unknown order status: {status}"),
                BillingError::Repository(RepositoryError::InvalidInput(msg)) => msg.clone(),
                BillingError::Payment(PaymentError::MalformedWebhook(_)) => {
                    "Malformed payment notification".to_string()
                }
                BillingError::Payment(_) => "Payment provider error".to_string(),
                BillingError::Repository(_) | BillingError::InvalidUrl(_) => {
                    "Internal server error".to_string()
                }
            },
            Self::NotFound(what) => format!("Not found: {what}"),
            Self::BadRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        (status, Json(json!({ "error": self.public_message() }))).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Add a breadcrumb for a billing step.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of steps
/// leading up to an error.
pub fn add_breadcrumb(category: &str, message: &str, data: &[(&str, &str)]) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    for (key, value) in data {
        breadcrumb.data.insert(
            (*key).to_string(),
            serde_json::Value::String((*value).to_string()),
        );
    }

    sentry::add_breadcrumb(breadcrumb);
}
