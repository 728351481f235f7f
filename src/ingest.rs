//! Push side of the pipeline.
//!
//! The panel agent POSTs traffic payloads; [`IngestHub`] decodes each one
//! and hands it to a single consumer. The producer waits until the
//! consumer has taken the message, which throttles pushes to the pace of
//! consumption. Closing the hub turns every pending and future handoff
//! into [`HubClosed`] instead of leaving producers waiting.

use futures::stream::{self, Stream};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{ClientSample, InboundSample};
use crate::panel::models::null_as_default;

// ─── Payload ─────────────────────────────────────────────────────

/// Body of `POST /metric`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrafficUpdates {
    #[serde(rename = "clientTraffics", deserialize_with = "null_as_default")]
    pub clients: Vec<ClientTraffic>,
    #[serde(rename = "inboundTraffics", deserialize_with = "null_as_default")]
    pub inbounds: Vec<InboundTraffic>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientTraffic {
    pub id: u64,
    pub inbound_id: u64,
    pub enable: bool,
    pub email: String,
    pub up: u64,
    pub down: u64,
    pub expiry_time: i64,
    pub total: u64,
    pub reset: u64,
}

/// The agent sends these keys capitalised; the lowercase form is accepted too.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundTraffic {
    #[serde(alias = "IsInbound")]
    pub is_inbound: bool,
    #[serde(alias = "IsOutbound")]
    pub is_outbound: bool,
    #[serde(alias = "Tag")]
    pub tag: String,
    #[serde(alias = "Up")]
    pub up: u64,
    #[serde(alias = "Down")]
    pub down: u64,
}

impl From<&ClientTraffic> for ClientSample {
    fn from(t: &ClientTraffic) -> Self {
        Self {
            email: t.email.clone(),
            up: t.up,
            down: t.down,
            total: Some(t.total),
        }
    }
}

impl From<&InboundTraffic> for InboundSample {
    fn from(t: &InboundTraffic) -> Self {
        Self {
            tag: t.tag.clone(),
            up: t.up,
            down: t.down,
        }
    }
}

// ─── Messages ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to decode traffic stats from request: {0}")]
    Decode(#[from] serde_json::Error),
}

/// What the consumer receives per push: the payload or why it was unusable.
pub type IngestMessage = Result<TrafficUpdates, IngestError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("ingest hub is closed")]
pub struct HubClosed;

struct Handoff {
    message: IngestMessage,
    taken: oneshot::Sender<()>,
}

// ─── IngestHub ───────────────────────────────────────────────────

pub struct IngestHub {
    tx: mpsc::Sender<Handoff>,
    rx: Mutex<Option<mpsc::Receiver<Handoff>>>,
    closed: CancellationToken,
}

impl Default for IngestHub {
    fn default() -> Self {
        Self::new()
    }
}

impl IngestHub {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            closed: CancellationToken::new(),
        }
    }

    /// Decode a pushed body and hand the result to the consumer.
    ///
    /// Decode failures are forwarded too; only a closed hub is reported
    /// back to the caller.
    pub async fn accept(&self, payload: &[u8]) -> Result<(), HubClosed> {
        let message = serde_json::from_slice::<TrafficUpdates>(payload).map_err(IngestError::from);
        self.publish(message).await
    }

    /// Wait until the consumer has taken `message`, or the hub closes.
    pub async fn publish(&self, message: IngestMessage) -> Result<(), HubClosed> {
        if self.closed.is_cancelled() {
            return Err(HubClosed);
        }

        let (taken, ack) = oneshot::channel();

        tokio::select! {
            biased;
            _ = self.closed.cancelled() => return Err(HubClosed),
            sent = self.tx.send(Handoff { message, taken }) => sent.map_err(|_| HubClosed)?,
        }

        // A consumer that took the message wins over a concurrent close.
        tokio::select! {
            biased;
            taken = ack => taken.map_err(|_| HubClosed),
            _ = self.closed.cancelled() => Err(HubClosed),
        }
    }

    /// Stream of pushed messages, ending when `ctx` is cancelled or the hub
    /// closes. Only the first subscription receives anything; messages are
    /// never replayed.
    pub fn subscribe(
        &self,
        ctx: CancellationToken,
    ) -> impl Stream<Item = IngestMessage> + Send + 'static {
        let rx = self.rx.lock().take();
        if rx.is_none() {
            warn!("ingest hub already subscribed, new subscription will stay empty");
        }

        let closed = self.closed.clone();

        stream::unfold((rx, ctx, closed), |(rx, ctx, closed)| async move {
            let mut rx = rx?;

            let handoff = tokio::select! {
                biased;
                _ = ctx.cancelled() => return None,
                _ = closed.cancelled() => return None,
                next = rx.recv() => next?,
            };

            // Releases the waiting producer.
            let _ = handoff.taken.send(());
            debug!("push message taken by consumer");

            Some((handoff.message, (Some(rx), ctx, closed)))
        })
    }

    /// Stop accepting pushes for good.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            info!("ingest hub closed");
        }
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

// ─── Tests ───────────────────────────────────────────────────────
