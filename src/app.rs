//! Composition root: one push consumer, one timed pull loop and the HTTP
//! server, all writing into the same [`MetricStore`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::connect_info::IntoMakeServiceWithConnectInfo;
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use futures::Stream;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::ingest::{IngestHub, IngestMessage};
use crate::metrics::{ClientSample, InboundSample, MetricStore};
use crate::panel::{PanelError, SessionClient};
use crate::scrape::PullScraper;
use crate::{server, AppState};

// ─── Entry points ────────────────────────────────────────────────

/// Bind the configured address and run until `shutdown` is cancelled.
pub async fn run(cfg: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = cfg.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    serve(listener, cfg, shutdown).await
}

/// Run the exporter on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    cfg: Config,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let local = listener.local_addr()?;

    // ── 1. Upstream client ───────────────────────────────────────
    let client = SessionClient::new(cfg.panel_options())
        .context("failed to init 3x-ui api client")?;
    let scraper = PullScraper::new(Arc::new(client));

    // ── 2. Shared state ──────────────────────────────────────────
    let store = Arc::new(MetricStore::new().context("failed to register metrics")?);
    let hub = Arc::new(IngestHub::new());
    let state = Arc::new(AppState {
        store: Arc::clone(&store),
        hub: Arc::clone(&hub),
    });

    // ── 3. Workers ───────────────────────────────────────────────
    let mut workers = JoinSet::new();
    workers.spawn(consume_pushes(
        hub.subscribe(shutdown.clone()),
        Arc::clone(&store),
    ));
    workers.spawn(scrape_loop(
        scraper,
        Arc::clone(&store),
        cfg.scrape_interval(),
        cfg.track_online,
        shutdown.clone(),
    ));

    // ── 4. HTTP surface ──────────────────────────────────────────
    let app = server::create_router(state)
        .into_make_service_with_connect_info::<SocketAddr>();
    let stop = {
        let shutdown = shutdown.clone();
        let hub = Arc::clone(&hub);
        async move {
            shutdown.cancelled().await;
            // Releases pushes still waiting for the consumer.
            hub.close();
        }
    };
    let served = match cfg.tls_files() {
        Some((cert, key)) => {
            info!(listen = %local, "metrics server listening (tls)");
            serve_tls(listener, app, cert, key, stop, cfg.shutdown_grace()).await
        }
        None => {
            info!(listen = %local, "metrics server listening");
            axum::serve(listener, app)
                .with_graceful_shutdown(stop)
                .await
                .context("server closed with error")
        }
    };

    // A server failure takes the workers down with it.
    shutdown.cancel();
    hub.close();

    // ── 5. Drain ─────────────────────────────────────────────────
    let grace = cfg.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(grace_secs = grace.as_secs(), "workers still running after grace period, aborting");
        workers.abort_all();
    }

    served
}

/// Serve HTTPS on `listener` with the PEM pair. After `stop` resolves,
/// open connections get `grace` to finish.
async fn serve_tls(
    listener: TcpListener,
    app: IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
    cert: &Path,
    key: &Path,
    stop: impl Future<Output = ()> + Send + 'static,
    grace: Duration,
) -> anyhow::Result<()> {
    // ring is the only provider built in; a second install is a no-op error.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let tls = RustlsConfig::from_pem_file(cert, key)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS pair {} / {}",
                cert.display(),
                key.display()
            )
        })?;

    let handle = axum_server::Handle::new();
    let on_stop = handle.clone();
    tokio::spawn(async move {
        stop.await;
        on_stop.graceful_shutdown(Some(grace));
    });

    axum_server::from_tcp_rustls(listener.into_std()?, tls)
        .handle(handle)
        .serve(app)
        .await
        .context("server closed with error")
}

// ─── Push path ───────────────────────────────────────────────────

/// Apply every pushed payload until the subscription ends.
pub async fn consume_pushes(
    updates: impl Stream<Item = IngestMessage>,
    store: Arc<MetricStore>,
) {
    tokio::pin!(updates);

    while let Some(message) = updates.next().await {
        debug!("got new traffic stats");

        let payload = match message {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to update traffic stats: {e}");
                store.record_push_message(false);
                continue;
            }
        };

        let clients: Vec<ClientSample> = payload.clients.iter().map(ClientSample::from).collect();
        let inbounds: Vec<InboundSample> = payload.inbounds.iter().map(InboundSample::from).collect();

        store.update_clients(&clients);
        store.update_inbounds(&inbounds);
        store.record_push_message(true);
    }

    debug!("push consumer stopped");
}

// ─── Pull path ───────────────────────────────────────────────────

/// Scrape on every tick until `shutdown` is cancelled. The first tick
/// fires immediately. A cycle in progress is never interrupted; the
/// request timeout bounds it.
pub async fn scrape_loop(
    scraper: PullScraper,
    store: Arc<MetricStore>,
    every: Duration,
    track_online: bool,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = IntervalStream::new(interval);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            tick = ticks.next() => if tick.is_none() { break },
        }

        // Counted inside; the next tick retries.
        if let Err(e) = run_scrape_cycle(&scraper, &store, track_online).await {
            error!("scrape cycle failed: {e}");
        }
    }

    debug!("scrape loop stopped");
}

/// One pull cycle. Either every fetch succeeds and the whole result is
/// applied, or nothing is applied, the failure is counted and prior
/// values stay in place.
pub async fn run_scrape_cycle(
    scraper: &PullScraper,
    store: &MetricStore,
    track_online: bool,
) -> Result<(), PanelError> {
    debug!("scrape stats started");

    let outcome = async {
        let batch = scraper.scrape().await?;
        let online = if track_online {
            Some(scraper.scrape_online().await?)
        } else {
            None
        };
        Ok::<_, PanelError>((batch, online))
    }
    .await;

    let (batch, online) = match outcome {
        Ok(result) => result,
        Err(e) => {
            store.record_scrape_cycle(false);
            return Err(e);
        }
    };

    store.update_combined_batch(&batch);
    if let Some(online) = online {
        store.update_online(&online);
    }
    store.record_scrape_cycle(true);

    debug!(clients = batch.len(), "stats scraped");
    Ok(())
}
