//! Push notification client. Notifications are advisory: delivery failures
//! are logged and swallowed, and an unconfigured client is a silent no-op.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, title: &str, body: &str, tag: Option<&str>, click_url: Option<&str>);
}

pub struct PushNotifier {
    client: Client,
    /// Fully resolved target: `{endpoint}/{channel}`. None means unconfigured.
    target: Option<String>,
}

impl PushNotifier {
    pub fn new(endpoint: Option<&str>, channel: Option<&str>) -> Self {
        let target = match (endpoint, channel) {
            (Some(endpoint), Some(channel)) => {
                Some(format!("{}/{}", endpoint.trim_end_matches('/'), channel))
            }
            _ => None,
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, target }
    }
}

#[async_trait]
impl Notifier for PushNotifier {
    async fn notify(&self, title: &str, body: &str, tag: Option<&str>, click_url: Option<&str>) {
        let Some(target) = &self.target else {
            debug!(title, "Push not configured, dropping notification");
            return;
        };

        let mut request = self
            .client
            .post(target)
            .header("Title", title)
            .body(body.to_string());
        if let Some(tag) = tag {
            request = request.header("Tags", tag);
        }
        if let Some(url) = click_url {
            request = request.header("Click", url);
        }

        match request.send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(title, "Notification delivered");
            }
            Ok(resp) => {
                warn!(title, status = %resp.status(), "Push endpoint rejected notification");
            }
            Err(e) => {
                warn!(title, error = %e, "Failed to deliver notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_notifier_is_a_no_op() {
        // Must not panic or attempt network I/O.
        let notifier = PushNotifier::new(None, None);
        notifier.notify("t", "b", None, None).await;

        let half = PushNotifier::new(Some("https://ntfy.sh"), None);
        half.notify("t", "b", None, None).await;
    }

    #[test]
    fn target_joins_endpoint_and_channel() {
        let notifier = PushNotifier::new(Some("https://ntfy.sh/"), Some("minder"));
        assert_eq!(notifier.target.as_deref(), Some("https://ntfy.sh/minder"));
    }
}
