//! uabrowser - headless monitor
//!
//! Connects to the in-memory demo server, expands the whole tree and prints
//! every live value until the run time elapses.
//!
//! Usage: `uabrowser [endpoint] [seconds]`

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uabrowser::{
    config::{app_state_path, LoggingConfig},
    AppConfig, BrowserSession, MockAddressSpace, MockClientBackend, UiEvent,
};

const DEFAULT_RUN_SECS: u64 = 10;

fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "uabrowser.log".into());
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    guard
}

fn main() -> anyhow::Result<()> {
    let config = AppConfig::default_path()
        .map(|path| AppConfig::load_or_default(&path))
        .unwrap_or_default();
    let _log_guard = init_logging(&config.logging);

    let mut args = std::env::args().skip(1);
    let endpoint = args.next().unwrap_or_else(|| config.client.endpoint.clone());
    let run_for = match args.next() {
        Some(secs) => Duration::from_secs(secs.parse().context("run time must be whole seconds")?),
        None => Duration::from_secs(DEFAULT_RUN_SECS),
    };

    tracing::info!("Starting uabrowser monitor");

    let client = Arc::new(MockClientBackend::new(MockAddressSpace::demo()));
    let (session, ui) = BrowserSession::new(client.clone(), &config)?;
    let mut session = match app_state_path() {
        Some(path) => session.with_state_file(path),
        None => session,
    };

    let root = session.connect(&endpoint)?;
    if let Some(node) = session.app_state().last_node {
        tracing::info!("Last selected node: {}", node);
    }

    session.expand_all(root);
    if !session.wait_idle(Duration::from_secs(5)) {
        tracing::warn!("Tree still loading, monitoring what is subscribed so far");
    }

    let nodes = session.subscribed_nodes();
    tracing::info!("Monitoring {} nodes for {:?}", nodes.len(), run_for);
    let receivers: Vec<_> = nodes
        .iter()
        .filter_map(|node| session.subscribe_node(node))
        .collect();

    let interval = Duration::from_millis(config.client.publishing_interval_ms.max(10));
    let deadline = Instant::now() + run_for;
    while Instant::now() < deadline {
        client.tick();
        for rx in &receivers {
            for n in rx.try_iter() {
                println!("{} {} = {}", n.timestamp.format("%H:%M:%S%.3f"), n.node, n.value);
            }
        }
        for event in ui.drain() {
            match event {
                UiEvent::SubscriptionError(failure) => {
                    eprintln!("{} failed at {}: {}", failure.kind, failure.position, failure.error)
                }
                UiEvent::ExpandAllFinished(summary) => {
                    tracing::info!("Expanded {} rows", summary.expanded)
                }
                UiEvent::EventFired(event) => println!("{}", event),
                UiEvent::EventSubscriptionFailed { node, error } => {
                    eprintln!("event subscription on {} failed: {}", node, error)
                }
                UiEvent::DescriptionLoaded(_) | UiEvent::ConnectionStatus(_) => {}
            }
        }
        std::thread::sleep(interval);
    }

    let stats = session.subscription_stats();
    tracing::info!(
        "{} notifications delivered, {} monitored items created, avg call {:.1} us",
        session.delivered_notifications(),
        stats.subscribed,
        stats.avg_call_time_us()
    );

    session.disconnect();
    session.shutdown();
    Ok(())
}
