pub mod store;

pub use store::{MetricStore, StoreError};

/// Per-client traffic keyed by email, as pushed by the panel agent.
/// `total` is only present when the source carries a quota figure.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSample {
    pub email: String,
    pub up: u64,
    pub down: u64,
    pub total: Option<u64>,
}

/// Per-inbound traffic keyed by the inbound's routing tag.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundSample {
    pub tag: String,
    pub up: u64,
    pub down: u64,
}

/// One client as seen through its inbound during a pull scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct TrafficSample {
    /// The inbound's display name (remark)
    pub name: String,
    pub protocol: String,
    pub email: String,
    pub up: u64,
    pub down: u64,
}

/// The closed set of shapes the store knows how to apply.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Client(ClientSample),
    Inbound(InboundSample),
    Combined(TrafficSample),
}

/// Metric families, each behind its own lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Client,
    Inbound,
    Combined,
    Online,
    Exporter,
}

impl Family {
    /// Order in which families appear in the scrape output.
    pub const ALL: [Family; 5] = [
        Family::Client,
        Family::Inbound,
        Family::Combined,
        Family::Online,
        Family::Exporter,
    ];
}
