//! Routing of unexpected request failures to whoever operates the service.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use super::error::ApiError;

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn alert(&self, context: &str, message: &str);
}

/// Logs alerts. Outside production it only notes that nothing was sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlerter {
    pub production: bool,
}

#[async_trait]
impl Alerter for LogAlerter {
    async fn alert(&self, context: &str, message: &str) {
        if self.production {
            error!(context = %context, error = %message, "ALERT: unexpected error while serving a request.");
        } else {
            info!(context = %context, error = %message, "Not in production, alert not sent.");
        }
    }
}

/// Hands `err` to the alerter on its own task so the response is not held up.
pub(crate) fn raise(alerter: &Arc<dyn Alerter>, context: &'static str, err: &ApiError) {
    if !err.is_unexpected() {
        return;
    }
    let alerter = Arc::clone(alerter);
    let message = err.to_string();
    tokio::spawn(async move {
        alerter.alert(context, &message).await;
    });
}
