
use kv_watcher::CancellationToken;
use kv_watcher::Error;
use kv_watcher::Result;
use kv_watcher::StatsSnapshot;
use kv_watcher::Watcher;
use kv_watcher::WatcherConfig;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::task::JoinHandle;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = WatcherConfig::new()?.validate()?;

    // Initializing Logs
    init_observability();

    let keys: Vec<String> = std::env::args().skip(1).collect();
    if keys.is_empty() {
        return Err(Error::Fatal("usage: kv-watcher <key>...".to_string()));
    }

    let watcher = Watcher::consul(&settings)?;
    info!(address = %settings.consul.address, ?keys, "watching keys");

    let cancel = CancellationToken::new();
    let printers: Vec<_> = keys
        .into_iter()
        .map(|key| {
            let mut sub = watcher.watch(cancel.clone(), key);
            tokio::spawn(async move {
                while let Some(value) = sub.recv().await {
                    println!("{} = {}", sub.key(), String::from_utf8_lossy(&value));
                }
            })
        })
        .collect();

    info!("Application started. Waiting for CTRL+C signal...");
    graceful_shutdown().await?;

    cancel.cancel();
    if let Err(e) = watcher.close().await {
        error!("Failed to close watcher: {:?}", e);
    }
    join_printers(printers).await;

    watcher.collect_stats(&log_stats);
    println!("Exiting program.");
    Ok(())
}

/// Returns the number of printer tasks that panicked or were aborted
async fn join_printers(printers: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for printer in printers {
        if let Err(e) = printer.await {
            error!("Printer task failed: {:?}", e);
            failed += 1;
        }
    }
    failed
}

async fn graceful_shutdown() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    info!("Shutdown watcher..");
    Ok(())
}

fn log_stats(stats: StatsSnapshot) {
    info!(
        watch_calls = stats.key_watch_count,
        keys = stats.key_new_watch_count,
        changes = stats.key_new_value_detected,
        fetch_errors = stats.key_fetch_error_count,
        fetch_mean_ms = stats.key_fetch_duration.mean().unwrap_or_default(),
        fetch_p99_ms = stats.key_fetch_duration.quantile(0.99).unwrap_or_default(),
        closed_by_cancellation = stats.watcher_closed_by_cancellation,
        closed_by_watcher_close = stats.watcher_closed_by_watcher_close,
        "final stats"
    );
}

fn init_observability() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);
    tracing_subscriber::registry().with(base_subscriber).init();
}
