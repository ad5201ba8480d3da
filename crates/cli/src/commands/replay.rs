//! Replay recorded batches through the pipeline offline

use anyhow::{Context, Result};
use health_lib::ingest::InputBatch;
use health_lib::{
    BatchOutcome, ClusterInventory, InventoryRegistry, MonitorConfigProvider, MonitorState,
    OutputRecord, PipelineBuilder, PipelineSettings,
};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::Tabled;

use super::topology::load_definition;
use crate::output::{
    color_state, format_old_state, print_error, print_json, print_success, print_table, truncate,
    OutputFormat,
};

/// Inputs of one replay run
pub struct ReplayOptions {
    pub definition: PathBuf,
    pub batches: PathBuf,
    pub monitor_config: Option<PathBuf>,
    pub inventory: Option<PathBuf>,
    pub cluster_id: String,
    pub state_file: Option<PathBuf>,
}

#[derive(Tabled, Serialize)]
struct RecordRow {
    #[tabled(rename = "Cycle")]
    cycle: usize,
    #[tabled(rename = "Monitor")]
    monitor: String,
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Old")]
    old_state: String,
    #[tabled(rename = "New")]
    new_state: String,
    #[tabled(rename = "Parent")]
    parent: String,
}

#[derive(Serialize)]
struct ReplayReport {
    cycles: usize,
    rejected: usize,
    cluster_state: Option<MonitorState>,
    records: Vec<CycleRecord>,
}

#[derive(Serialize)]
struct CycleRecord {
    cycle: usize,
    #[serde(flatten)]
    record: OutputRecord,
}

/// Parse a file of JSON lines, one batch per line
pub fn read_batches(path: &Path) -> Result<Vec<InputBatch>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read batches {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Invalid batch on line {}", n + 1))
        })
        .collect()
}

fn load_inventory(path: &Path) -> Result<ClusterInventory> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory {}", path.display()))?;
    serde_json::from_str(&content).context("Invalid inventory document")
}

pub fn replay(options: ReplayOptions, format: OutputFormat) -> Result<()> {
    let definition = load_definition(&options.definition)?;
    let configs = match &options.monitor_config {
        Some(path) => MonitorConfigProvider::load_configs(path)
            .context("Failed to load monitor configuration")?,
        None => HashMap::new(),
    };

    let inventory = InventoryRegistry::new();
    if let Some(path) = &options.inventory {
        inventory.replace(load_inventory(path)?);
    }

    let mut pipeline = PipelineBuilder::new()
        .settings(PipelineSettings {
            cluster_id: options.cluster_id,
            state_path: options.state_file,
            ..Default::default()
        })
        .definition(Arc::new(definition))
        .configs(configs)
        .inventory(inventory)
        .build()?;

    let mut report = ReplayReport {
        cycles: 0,
        rejected: 0,
        cluster_state: None,
        records: Vec::new(),
    };

    for batch in read_batches(&options.batches)? {
        match pipeline.run_cycle(batch) {
            Ok(BatchOutcome::Emitted(output)) => {
                report.cycles += 1;
                report.cluster_state = Some(output.cluster_state);
                report
                    .records
                    .extend(output.records.into_iter().map(|record| CycleRecord {
                        cycle: report.cycles,
                        record,
                    }));
            }
            Ok(_) => {}
            Err(e) => {
                print_error(&format!("Batch rejected: {}", e));
                report.rejected += 1;
            }
        }
    }

    if format == OutputFormat::Json {
        print_json(&report);
        return Ok(());
    }

    let rows: Vec<RecordRow> = report
        .records
        .iter()
        .map(|r| RecordRow {
            cycle: r.cycle,
            monitor: r.record.monitor_id.clone(),
            instance: truncate(&r.record.monitor_instance_id, 40),
            old_state: format_old_state(r.record.old_state),
            new_state: color_state(r.record.new_state),
            parent: r
                .record
                .parent_monitor_instance_id
                .as_deref()
                .map(|p| truncate(p, 40))
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();
    print_table(&rows, format);

    let cluster = report
        .cluster_state
        .map(color_state)
        .unwrap_or_else(|| "-".to_string());
    print_success(&format!(
        "Replayed {} cycles, {} records emitted, cluster {}",
        report.cycles,
        report.records.len(),
        cluster
    ));
    Ok(())
}
