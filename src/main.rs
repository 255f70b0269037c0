use std::path::{Path, PathBuf};

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bankruptcy_scoring::config::Config;
use bankruptcy_scoring::csv_io;
use bankruptcy_scoring::normalizer::infer_source_tag;
use bankruptcy_scoring::pipeline::Pipeline;

/// Batch runner: reads a CSV of raw leads, runs the pipeline batch by
/// batch, and writes the scored rows next to the input.
///
/// Ctrl-C stops new leads, abandons pending source calls, and still
/// writes everything scored so far, partial profiles included.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bankruptcy_scoring=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().ok_or_else(|| {
        anyhow::anyhow!("usage: bankruptcy-scoring <input.csv> [output.csv]")
    })?);
    let output = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| default_output(&input));

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⚠️ Ctrl-C received, winding down enrichment");
            let _ = cancel_tx.send(true);
        }
    });

    let mut pipeline = Pipeline::new(&config, cancel_rx.clone()).await?;

    let file_name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("input.csv");
    let default_tag = infer_source_tag(file_name);

    let rows = csv_io::read_rows(&input)?;
    tracing::info!("✓ Read {} rows from {}", rows.len(), input.display());

    let batch_size = config.batch_size.max(1);
    let total_batches = rows.len().div_ceil(batch_size);
    let mut scored = Vec::with_capacity(rows.len());
    for (i, chunk) in rows.chunks(batch_size).enumerate() {
        if *cancel_rx.borrow() {
            tracing::warn!(
                "⚠️ Shutdown requested, {} of {} batches left unprocessed",
                total_batches - i,
                total_batches
            );
            break;
        }
        tracing::info!(
            "Batch {}/{}: processing {} rows",
            i + 1,
            total_batches,
            chunk.len()
        );
        let outcome = pipeline.run_batch(chunk.to_vec(), &default_tag).await?;
        scored.extend(outcome.scored);
    }

    csv_io::write_scored(&output, &scored)?;
    tracing::info!("✓ Wrote {} scored leads to {}", scored.len(), output.display());

    let stats = pipeline.get_stats();
    tracing::info!(
        "✓ Run complete: {} rows read, {} skipped, {} duplicates merged, {} unique leads",
        stats.rows_read,
        stats.rows_skipped,
        stats.duplicates_merged,
        stats.unique_leads
    );
    tracing::info!(
        "✓ Scored {}: {} high, {} medium, {} low, {} unqualified ({} degraded, {} errors logged)",
        stats.leads_scored,
        stats.groups.high_priority,
        stats.groups.medium_priority,
        stats.groups.low_priority,
        stats.groups.unqualified,
        stats.leads_degraded,
        stats.errors_logged
    );
    for source in pipeline.get_api_stats().sources {
        if source.calls > 0 {
            tracing::info!(
                "  {}: {} calls, {} ok, {} not found, {} failed, avg {}ms",
                source.source,
                source.calls,
                source.successes,
                source.not_found,
                source.failures + source.timeouts + source.circuit_open,
                source.avg_latency_ms
            );
        }
    }

    Ok(())
}

fn default_output(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("leads");
    input.with_file_name(format!("{stem}_scored.csv"))
}
