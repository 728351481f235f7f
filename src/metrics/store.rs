use std::collections::HashSet;

use parking_lot::RwLock;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};

use super::{ClientSample, Family, InboundSample, Sample, TrafficSample};

// ─── Public types ────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("exposition is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Labeled traffic gauges shared by the push consumer, the pull loop
/// and scrape requests.
///
/// Each family sits behind its own reader/writer lock. A write holds the
/// lock for one batch of related label updates, so a scrape never sees a
/// half-applied batch, and writers to one family never stall readers of
/// another. Series are never removed once observed.
pub struct MetricStore {
    client: RwLock<ClientFamily>,
    inbound: RwLock<InboundFamily>,
    combined: RwLock<CombinedFamily>,
    online: RwLock<OnlineFamily>,
    exporter: RwLock<ExporterFamily>,
}

// ─── Families ────────────────────────────────────────────────────

struct ClientFamily {
    registry: Registry,
    up: GaugeVec,
    down: GaugeVec,
    total: GaugeVec,
}

struct InboundFamily {
    registry: Registry,
    up: GaugeVec,
    down: GaugeVec,
}

struct CombinedFamily {
    registry: Registry,
    up: GaugeVec,
    down: GaugeVec,
}

struct OnlineFamily {
    registry: Registry,
    online: GaugeVec,
    seen: HashSet<String>,
}

struct ExporterFamily {
    registry: Registry,
    scrape_cycles: IntCounterVec,
    push_messages: IntCounterVec,
    last_scrape_success: Gauge,
}

impl ClientFamily {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            up: gauge_vec(&registry, "client_traffic_up", "3X-UI client upload bytes", &["email"])?,
            down: gauge_vec(&registry, "client_traffic_down", "3X-UI client download bytes", &["email"])?,
            total: gauge_vec(&registry, "client_traffic_total", "3X-UI client traffic quota bytes", &["email"])?,
            registry,
        })
    }

    fn set(&self, s: &ClientSample) {
        let labels = [s.email.as_str()];
        self.up.with_label_values(&labels).set(s.up as f64);
        self.down.with_label_values(&labels).set(s.down as f64);
        if let Some(total) = s.total {
            self.total.with_label_values(&labels).set(total as f64);
        }
    }
}

impl InboundFamily {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            up: gauge_vec(&registry, "inbound_traffic_up", "3X-UI inbound upload bytes", &["tag"])?,
            down: gauge_vec(&registry, "inbound_traffic_down", "3X-UI inbound download bytes", &["tag"])?,
            registry,
        })
    }

    fn set(&self, s: &InboundSample) {
        let labels = [s.tag.as_str()];
        self.up.with_label_values(&labels).set(s.up as f64);
        self.down.with_label_values(&labels).set(s.down as f64);
    }
}

impl CombinedFamily {
    const LABELS: &'static [&'static str] = &["name", "proto", "email"];

    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            up: gauge_vec(&registry, "inbound_all_up", "3X-UI client upload bytes per inbound", Self::LABELS)?,
            down: gauge_vec(&registry, "inbound_all_down", "3X-UI client download bytes per inbound", Self::LABELS)?,
            registry,
        })
    }

    fn set(&self, s: &TrafficSample) {
        let labels = [s.name.as_str(), s.protocol.as_str(), s.email.as_str()];
        self.up.with_label_values(&labels).set(s.up as f64);
        self.down.with_label_values(&labels).set(s.down as f64);
    }
}

impl OnlineFamily {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        Ok(Self {
            online: gauge_vec(&registry, "client_online", "1 while the client is connected", &["email"])?,
            seen: HashSet::new(),
            registry,
        })
    }
}

impl ExporterFamily {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let scrape_cycles = IntCounterVec::new(
            Opts::new("x3ui_exporter_scrape_cycles_total", "Pull scrape cycles by result"),
            &["result"],
        )?;
        registry.register(Box::new(scrape_cycles.clone()))?;

        let push_messages = IntCounterVec::new(
            Opts::new("x3ui_exporter_push_messages_total", "Pushed traffic payloads by result"),
            &["result"],
        )?;
        registry.register(Box::new(push_messages.clone()))?;

        let last_scrape_success = Gauge::new(
            "x3ui_exporter_last_scrape_success_timestamp_seconds",
            "Unix time of the last successful pull scrape",
        )?;
        registry.register(Box::new(last_scrape_success.clone()))?;

        Ok(Self {
            registry,
            scrape_cycles,
            push_messages,
            last_scrape_success,
        })
    }
}

fn gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<GaugeVec> {
    let vec = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(vec.clone()))?;
    Ok(vec)
}

fn result_label(ok: bool) -> &'static str {
    if ok {
        "ok"
    } else {
        "error"
    }
}

// ─── MetricStore impl ────────────────────────────────────────────

impl MetricStore {
    pub fn new() -> Result<Self, StoreError> {
        Ok(Self {
            client: RwLock::new(ClientFamily::new()?),
            inbound: RwLock::new(InboundFamily::new()?),
            combined: RwLock::new(CombinedFamily::new()?),
            online: RwLock::new(OnlineFamily::new()?),
            exporter: RwLock::new(ExporterFamily::new()?),
        })
    }

    pub fn update_client(&self, sample: &ClientSample) {
        self.client.write().set(sample);
    }

    pub fn update_clients<'a>(&self, samples: impl IntoIterator<Item = &'a ClientSample>) {
        let family = self.client.write();
        for sample in samples {
            family.set(sample);
        }
    }

    pub fn update_inbound(&self, sample: &InboundSample) {
        self.inbound.write().set(sample);
    }

    pub fn update_inbounds<'a>(&self, samples: impl IntoIterator<Item = &'a InboundSample>) {
        let family = self.inbound.write();
        for sample in samples {
            family.set(sample);
        }
    }

    pub fn update_combined(&self, sample: &TrafficSample) {
        self.combined.write().set(sample);
    }

    /// Apply a pull batch in enumeration order under one lock.
    pub fn update_combined_batch<'a>(&self, samples: impl IntoIterator<Item = &'a TrafficSample>) {
        let family = self.combined.write();
        for sample in samples {
            family.set(sample);
        }
    }

    pub fn apply(&self, sample: &Sample) {
        match sample {
            Sample::Client(s) => self.update_client(s),
            Sample::Inbound(s) => self.update_inbound(s),
            Sample::Combined(s) => self.update_combined(s),
        }
    }

    /// Mark the listed emails online and every other known email offline.
    pub fn update_online(&self, emails: &[String]) {
        let mut family = self.online.write();

        for email in &family.seen {
            family.online.with_label_values(&[email.as_str()]).set(0.0);
        }
        for email in emails {
            family.online.with_label_values(&[email.as_str()]).set(1.0);
            family.seen.insert(email.clone());
        }
    }

    pub fn record_scrape_cycle(&self, ok: bool) {
        let family = self.exporter.write();
        family.scrape_cycles.with_label_values(&[result_label(ok)]).inc();
        if ok {
            family
                .last_scrape_success
                .set(chrono::Utc::now().timestamp() as f64);
        }
    }

    pub fn record_push_message(&self, ok: bool) {
        self.exporter
            .write()
            .push_messages
            .with_label_values(&[result_label(ok)])
            .inc();
    }

    /// Snapshot one family under its read lock.
    pub fn gather(&self, family: Family) -> Vec<MetricFamily> {
        match family {
            Family::Client => self.client.read().registry.gather(),
            Family::Inbound => self.inbound.read().registry.gather(),
            Family::Combined => self.combined.read().registry.gather(),
            Family::Online => self.online.read().registry.gather(),
            Family::Exporter => self.exporter.read().registry.gather(),
        }
    }

    /// Full exposition body in the Prometheus text format.
    ///
    /// Families are read one after another, each under its own read lock,
    /// so a scrape only ever waits on a writer of the family it is
    /// currently reading.
    pub fn render_scrape(&self) -> Result<String, StoreError> {
        let families: Vec<MetricFamily> = Family::ALL
            .into_iter()
            .flat_map(|family| self.gather(family))
            .collect();

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_owned()
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    fn value(store: &MetricStore, family: Family, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        store
            .gather(family)
            .into_iter()
            .filter(|mf| mf.get_name() == name)
            .flat_map(|mf| mf.get_metric().to_vec())
            .find(|m| {
                labels.iter().all(|(k, v)| {
                    m.get_label()
                        .iter()
                        .any(|l| l.get_name() == *k && l.get_value() == *v)
                })
            })
            .map(|m| m.get_gauge().get_value())
    }

    fn client(email: &str, up: u64, down: u64, total: Option<u64>) -> ClientSample {
        ClientSample {
            email: email.into(),
            up,
            down,
            total,
        }
    }

    #[test]
    fn test_same_sample_twice_is_not_additive() {
        let store = MetricStore::new().unwrap();
        let s = client("a@x", 100, 50, Some(1000));

        store.update_client(&s);
        store.update_client(&s);

        assert_eq!(value(&store, Family::Client, "client_traffic_up", &[("email", "a@x")]), Some(100.0));
        assert_eq!(value(&store, Family::Client, "client_traffic_down", &[("email", "a@x")]), Some(50.0));
        assert_eq!(value(&store, Family::Client, "client_traffic_total", &[("email", "a@x")]), Some(1000.0));
    }

    #[test]
    fn test_last_write_wins() {
        let store = MetricStore::new().unwrap();
        store.update_client(&client("a@x", 100, 50, None));
        store.update_client(&client("a@x", 7, 3, None));

        assert_eq!(value(&store, Family::Client, "client_traffic_up", &[("email", "a@x")]), Some(7.0));
        assert_eq!(value(&store, Family::Client, "client_traffic_down", &[("email", "a@x")]), Some(3.0));
    }

    #[test]
    fn test_total_untouched_without_total_view() {
        let store = MetricStore::new().unwrap();
        store.update_client(&client("a@x", 1, 1, Some(500)));
        store.update_client(&client("a@x", 2, 2, None));

        assert_eq!(value(&store, Family::Client, "client_traffic_total", &[("email", "a@x")]), Some(500.0));
        assert_eq!(value(&store, Family::Client, "client_traffic_total", &[("email", "b@x")]), None);
    }

    #[test]
    fn test_apply_dispatches_by_shape() {
        let store = MetricStore::new().unwrap();

        store.apply(&Sample::Inbound(InboundSample { tag: "inbound-443".into(), up: 9, down: 8 }));
        store.apply(&Sample::Combined(TrafficSample {
            name: "edge".into(),
            protocol: "vless".into(),
            email: "a@x".into(),
            up: 5,
            down: 6,
        }));

        assert_eq!(value(&store, Family::Inbound, "inbound_traffic_up", &[("tag", "inbound-443")]), Some(9.0));
        assert_eq!(
            value(&store, Family::Combined, "inbound_all_down", &[("name", "edge"), ("proto", "vless"), ("email", "a@x")]),
            Some(6.0)
        );
        assert!(store.gather(Family::Client).iter().all(|mf| mf.get_metric().is_empty()));
    }

    #[test]
    fn test_online_resets_clients_no_longer_listed() {
        let store = MetricStore::new().unwrap();
        store.update_online(&["a@x".into(), "b@x".into()]);
        store.update_online(&["b@x".into()]);

        assert_eq!(value(&store, Family::Online, "client_online", &[("email", "a@x")]), Some(0.0));
        assert_eq!(value(&store, Family::Online, "client_online", &[("email", "b@x")]), Some(1.0));
    }

    #[test]
    fn test_render_contains_series() {
        let store = MetricStore::new().unwrap();
        store.update_client(&client("a@x", 100, 50, Some(0)));
        store.record_scrape_cycle(false);

        let body = store.render_scrape().unwrap();
        assert!(body.contains(r#"client_traffic_up{email="a@x"} 100"#), "{body}");
        assert!(body.contains(r#"client_traffic_down{email="a@x"} 50"#), "{body}");
        assert!(body.contains(r#"x3ui_exporter_scrape_cycles_total{result="error"} 1"#), "{body}");
        assert!(store.content_type().starts_with("text/plain"));
    }

    #[test]
    fn test_reads_proceed_while_other_family_is_written() {
        let store = Arc::new(MetricStore::new().unwrap());
        store.update_client(&client("a@x", 1, 2, None));

        // Simulate an in-flight writer on the inbound family.
        let writer = store.inbound.write();

        let (tx, rx) = mpsc::channel();
        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let tx = tx.clone();
                thread::spawn(move || {
                    let families = store.gather(Family::Client);
                    tx.send(families.len()).unwrap();
                })
            })
            .collect();

        for _ in 0..8 {
            let n = rx
                .recv_timeout(Duration::from_secs(5))
                .expect("reader blocked on a disjoint family writer");
            assert!(n > 0);
        }

        drop(writer);
        for r in readers {
            r.join().unwrap();
        }
    }

    #[test]
    fn test_concurrent_readers_share_a_family() {
        let store = Arc::new(MetricStore::new().unwrap());
        store.update_client(&client("a@x", 1, 2, None));

        // A held read guard must not exclude other readers.
        let reader = store.client.read();
        let other = Arc::clone(&store);
        let handle = thread::spawn(move || other.render_scrape().unwrap());
        let body = handle.join().unwrap();
        drop(reader);

        assert!(body.contains("client_traffic_up"));
    }
}
