//! Application state shared across handlers.

use std::sync::Arc;

use crate::services::BillingService;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Holds the single [`BillingService`] built at
/// startup and the public base URL used for payment redirects.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    billing: BillingService,
    base_url: String,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `billing` - The billing service, already wired to a store, provider and notifier
    /// * `base_url` - Public URL of the shop, without a trailing slash
    #[must_use]
    pub fn new(billing: BillingService, base_url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                billing,
                base_url: base_url.into(),
            }),
        }
    }

    /// Get a reference to the billing service.
    #[must_use]
    pub fn billing(&self) -> &BillingService {
        &self.inner.billing
    }

    /// Get the public base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }
}
