use async_trait::async_trait;
use reqwest::Client;
use snare_core::SessionReport;
use snare_engine::{Notifier, NotifyError, NotifyReceipt};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts the finalization report as JSON to a fixed URL. Non-2xx is a rejection.
pub struct HttpNotifier {
    client: Client,
    url: String,
}

impl HttpNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify(&self, report: &SessionReport) -> Result<NotifyReceipt, NotifyError> {
        debug!(
            event = "callback_send",
            session_id = %report.session_id,
            url = %self.url
        );
        let response = self
            .client
            .post(&self.url)
            .json(report)
            .send()
            .await
            .map_err(|err| NotifyError::Transport(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
            });
        }
        Ok(NotifyReceipt {
            status: status.as_u16(),
        })
    }
}
