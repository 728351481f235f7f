use std::sync::Arc;

use crate::metrics::TrafficSample;
use crate::panel::models::bytes;
use crate::panel::{Inbound, PanelError, SessionClient};

/// Periodic full-snapshot reader of the panel's traffic counters.
/// Holds no state between scrapes.
pub struct PullScraper {
    client: Arc<SessionClient>,
}

impl PullScraper {
    pub fn new(client: Arc<SessionClient>) -> Self {
        Self { client }
    }

    /// Fetch the inbound list and flatten it. A failed fetch fails the
    /// whole scrape; nothing is returned partially.
    pub async fn scrape(&self) -> Result<Vec<TrafficSample>, PanelError> {
        let inbounds = self.client.fetch_inbounds().await?;
        Ok(flatten(inbounds))
    }

    /// Emails of the clients currently connected.
    pub async fn scrape_online(&self) -> Result<Vec<String>, PanelError> {
        self.client.fetch_onlines().await
    }
}

/// Reshape inbounds into per-client samples that carry their inbound's
/// remark and protocol. Inbounds without client stats add nothing.
///
/// The inbound's own `up`/`down` are running totals; the inbound family
/// holds the agent's pushed deltas, so they are not emitted here.
pub fn flatten(inbounds: Vec<Inbound>) -> Vec<TrafficSample> {
    let mut samples = Vec::with_capacity(inbounds.iter().map(|i| i.client_stats.len()).sum());

    for inbound in inbounds {
        for stat in inbound.client_stats {
            samples.push(TrafficSample {
                name: inbound.remark.clone(),
                protocol: inbound.protocol.clone(),
                email: stat.email,
                up: bytes(stat.up),
                down: bytes(stat.down),
            });
        }
    }

    samples
}
