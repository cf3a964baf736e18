//! Outbound notification of high-severity error reports.

use std::time::Duration;

use futures_util::future::BoxFuture;

use super::report::ErrorReport;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webhook returned status {0}")]
    Status(u16),
}

/// Notification sink. Sends are spawned, so implementations may take their time.
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    fn send<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Writes the report to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            tracing::error!(
                error_id = %report.error_id,
                name = %report.name,
                severity = report.severity.as_str(),
                occurrences = report.occurrence_count,
                path = %report.context.path,
                "Error notification: {}",
                report.message
            );
            Ok(())
        })
    }
}

/// POSTs the JSON report to a webhook.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn send<'a>(&'a self, report: &'a ErrorReport) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let response = self.client.post(&self.url).json(report).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(NotifyError::Status(status.as_u16()));
            }
            Ok(())
        })
    }
}
