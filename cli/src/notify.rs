use anyhow::{Context, Result};
use tracing::warn;

use cmv_core::alert::{AlertNotifier, PriceAlert};
use cmv_core::service::CmvService;

/// Posts alert embeds to a Discord-compatible webhook.
pub struct DiscordNotifier {
    url: String,
    client: reqwest::Client,
    rt: tokio::runtime::Handle,
}

impl DiscordNotifier {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            url,
            client,
            rt: tokio::runtime::Handle::current(),
        }
    }
}

impl AlertNotifier for DiscordNotifier {
    fn notify(&self, alert: &PriceAlert) -> Result<()> {
        let payload = alert.webhook_payload();
        tokio::task::block_in_place(|| {
            self.rt.block_on(async {
                let resp = self
                    .client
                    .post(&self.url)
                    .json(&payload)
                    .send()
                    .await
                    .context("Failed to reach webhook")?;
                resp.error_for_status()
                    .context("Webhook rejected the alert")?;
                Ok(())
            })
        })
    }
}

/// Send alerts to the configured webhook, if any. Delivery problems are
/// logged and swallowed; a dead webhook must never fail a price update.
pub fn deliver_alerts(service: &CmvService, alerts: &[PriceAlert]) {
    if alerts.is_empty() {
        return;
    }
    let url = match service.webhook_url() {
        Ok(Some(url)) => url,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "could not read webhook setting");
            return;
        }
    };
    let notifier = DiscordNotifier::new(url);
    for alert in alerts {
        if let Err(e) = notifier.notify(alert) {
            warn!(ingredient = %alert.ingredient_name, error = %e, "alert delivery failed");
        }
    }
}
