//! Host adapter: batches in on stdin, records out on stdout
//!
//! Each input line is a JSON batch `{"tag": ..., "records": [...]}`. Each
//! output line is one emitted record `{"tag": ..., "time": ..., "record": {...}}`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use health_lib::ingest::InputBatch;
use health_lib::{
    AgentHealth, BatchOutcome, ClusterInventory, CycleReport, HealthModelPipeline,
    InventoryRegistry, PipelineError,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Serialize)]
struct EmittedLine<'a, T: Serialize> {
    tag: &'a str,
    time: DateTime<Utc>,
    record: &'a T,
}

/// Totals for one run of [`pump`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PumpSummary {
    pub batches: usize,
    pub rejected: usize,
    pub lines_written: usize,
}

/// Feed batches from `reader` through the pipeline until EOF
pub async fn pump<R, W>(
    pipeline: &mut HealthModelPipeline,
    health: &AgentHealth,
    reader: R,
    writer: &mut W,
) -> Result<PumpSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut summary = PumpSummary::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("Failed to read batch")? {
        if line.trim().is_empty() {
            continue;
        }

        let batch: InputBatch = match serde_json::from_str(&line) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, "Discarding unparsable batch");
                summary.rejected += 1;
                continue;
            }
        };
        summary.batches += 1;

        match pipeline.run_cycle(batch) {
            Ok(BatchOutcome::Emitted(output)) => {
                let now = Utc::now();
                for record in &output.records {
                    write_line(writer, &output.tag, now, record).await?;
                    summary.lines_written += 1;
                }
                health.report_cycle(&output.health_report()).await;
            }
            Ok(BatchOutcome::PassThrough(rows)) => {
                let now = Utc::now();
                let tag = pipeline.settings().router.output_tag().to_string();
                for row in &rows {
                    write_line(writer, &tag, now, row).await?;
                    summary.lines_written += 1;
                }
            }
            Ok(BatchOutcome::Buffered { pending }) => {
                debug!(pending, "Batch buffered");
            }
            Ok(BatchOutcome::Disabled) => {}
            Err(PipelineError::InvalidBatch(tag)) => {
                warn!(tag = %tag, "Rejected batch with unrecognized tag");
                summary.rejected += 1;
            }
            Err(e) => {
                health
                    .report_cycle(&CycleReport {
                        error: Some(e.to_string()),
                        persisted: false,
                        inventory_empty: pipeline.inventory().snapshot().is_empty(),
                    })
                    .await;
            }
        }
        writer.flush().await.context("Failed to flush output")?;
    }

    Ok(summary)
}

async fn write_line<W, T>(writer: &mut W, tag: &str, time: DateTime<Utc>, record: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(&EmittedLine { tag, time, record })?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .context("Failed to write record")
}

/// Read an inventory document (`{"nodes": [...], "workloads": [...]}`)
pub async fn load_inventory(path: &Path) -> Result<ClusterInventory> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read inventory {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid inventory document {}", path.display()))
}

/// Periodically reload the inventory file into the registry
pub async fn refresh_inventory(
    path: PathBuf,
    registry: InventoryRegistry,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match load_inventory(&path).await {
                    Ok(inventory) => registry.replace(inventory),
                    // Keep serving the previous snapshot
                    Err(e) => warn!(error = %e, "Inventory refresh failed"),
                }
            }
            _ = shutdown.recv() => {
                info!("Inventory refresh stopped");
                break;
            }
        }
    }
}
