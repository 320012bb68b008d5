use std::collections::HashSet;
use std::path::PathBuf;
use anyhow::{bail, Context};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use listing_uploader::{AggregatorEvent, AppConfig, HttpTransport, JobState, Snapshot, UploadAggregator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let files = unique_paths(std::env::args().skip(1));
    if files.is_empty() {
        bail!("usage: listing-uploader <image>...");
    }

    let config_path = std::env::var("LISTING_UPLOADER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("failed to load {config_path}"))?;

    let transport = HttpTransport::new(config.transport.clone())?;
    let handle = UploadAggregator::new(transport, config.aggregator.clone());
    let aggregator = handle.aggregator.clone();

    let mut events = aggregator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                AggregatorEvent::Progress { id, progress } => {
                    info!(job = %id, "{:.0}%", progress * 100.0);
                }
                AggregatorEvent::StateChanged { id, new_state: JobState::Failed { message }, .. } => {
                    warn!(job = %id, "{message}");
                }
                _ => {}
            }
        }
    });

    // In-flight uploads are cancelled before any error is reported
    let snapshot = match upload_all(&aggregator, &files).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            let _ = handle.shutdown().await;
            return Err(err);
        }
    };
    for url in &snapshot.completed_urls {
        println!("{url}");
    }

    handle.shutdown().await?;

    if snapshot.any_failed {
        bail!("some uploads failed");
    }

    Ok(())
}

/// Each path once, in the order first given. A path is also the job id.
fn unique_paths(args: impl IntoIterator<Item = String>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    args.into_iter()
        .map(PathBuf::from)
        .filter(|path| seen.insert(path.clone()))
        .collect()
}

async fn upload_all(aggregator: &UploadAggregator, files: &[PathBuf]) -> anyhow::Result<Snapshot> {
    for file in files {
        let payload = tokio::fs::read(file)
            .await
            .with_context(|| format!("failed to read {}", file.display()))?;
        aggregator.add_job(file.display().to_string(), payload).await?;
    }

    Ok(aggregator.wait_until_settled().await?)
}
