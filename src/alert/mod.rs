pub mod email;

use async_trait::async_trait;
use thiserror::Error;

use crate::monitoring::diff::ScanDiff;

pub use email::EmailAlertChannel;

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("invalid recipient: {0}")]
    Recipient(String),

    #[error("send error: {0}")]
    Send(String),
}

/// Everything a monitoring alert needs to render
#[derive(Debug, Clone)]
pub struct AlertContext {
    pub site_url: String,
    pub diff: ScanDiff,
}

/// Delivery channel for monitoring alerts. Delivery failure never rolls back
/// scan or monitoring state.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertChannel: Send + Sync {
    async fn send_alert(&self, recipient: &str, context: &AlertContext) -> Result<(), AlertError>;
}
