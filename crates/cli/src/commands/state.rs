//! Inspect a persisted state snapshot

use anyhow::{bail, Context, Result};
use health_lib::state::{MonitorStateRecord, StateSnapshot, SNAPSHOT_VERSION};
use health_lib::MonitorState;
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{
    color_state, format_old_state, format_time, print_info, print_json, print_table,
    print_warning, truncate, OutputFormat,
};

#[derive(Tabled, Serialize)]
struct StateRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Previous")]
    previous: String,
    #[tabled(rename = "Pending")]
    pending: String,
    #[tabled(rename = "Last Transition")]
    last_transition: String,
    #[tabled(rename = "Send")]
    should_send: String,
}

#[derive(Tabled, Serialize)]
struct FieldRow {
    #[tabled(rename = "Field")]
    field: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Serialize)]
struct InstanceState<'a> {
    monitor_instance_id: &'a str,
    #[serde(flatten)]
    record: &'a MonitorStateRecord,
}

/// Read a snapshot, failing loudly where the agent would start fresh
pub fn load_snapshot(path: &Path) -> Result<StateSnapshot> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state snapshot {}", path.display()))?;
    let snapshot: StateSnapshot = serde_json::from_str(&content)
        .with_context(|| format!("Invalid state snapshot {}", path.display()))?;

    if snapshot.version != SNAPSHOT_VERSION {
        bail!(
            "Unsupported snapshot version {} (expected {})",
            snapshot.version,
            SNAPSHOT_VERSION
        );
    }
    Ok(snapshot)
}

pub fn list_states(
    path: &Path,
    state: Option<MonitorState>,
    prefix: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = load_snapshot(path)?;

    let selected: Vec<(&String, &MonitorStateRecord)> = snapshot
        .states
        .iter()
        .filter(|(_, r)| state.map(|s| r.new_state == s).unwrap_or(true))
        .filter(|(id, _)| prefix.map(|p| id.starts_with(p)).unwrap_or(true))
        .collect();

    if format == OutputFormat::Json {
        let items: Vec<_> = selected
            .iter()
            .map(|(id, record)| InstanceState {
                monitor_instance_id: id,
                record,
            })
            .collect();
        print_json(&items);
        return Ok(());
    }

    let rows: Vec<StateRow> = selected
        .iter()
        .map(|(id, r)| StateRow {
            instance: truncate(id, 48),
            state: color_state(r.new_state),
            previous: format_old_state(r.old_state),
            pending: r
                .pending_state
                .map(|p| format!("{} ({})", p, r.streak))
                .unwrap_or_else(|| "-".to_string()),
            last_transition: format_time(r.last_transition_time),
            should_send: if r.should_send { "yes" } else { "no" }.to_string(),
        })
        .collect();

    print_table(&rows, format);
    print_info(&format!(
        "{} of {} instances, saved {}",
        rows.len(),
        snapshot.states.len(),
        format_time(Some(snapshot.saved_at))
    ));
    Ok(())
}

pub fn show_state(path: &Path, instance_id: &str, format: OutputFormat) -> Result<()> {
    let snapshot = load_snapshot(path)?;
    let Some(record) = snapshot.states.get(instance_id) else {
        print_warning(&format!("No state recorded for '{}'", instance_id));
        bail!("instance not found");
    };

    if format == OutputFormat::Json {
        print_json(&InstanceState {
            monitor_instance_id: instance_id,
            record,
        });
        return Ok(());
    }

    let rows = vec![
        FieldRow {
            field: "Instance",
            value: instance_id.to_string(),
        },
        FieldRow {
            field: "State",
            value: color_state(record.new_state),
        },
        FieldRow {
            field: "Previous",
            value: format_old_state(record.old_state),
        },
        FieldRow {
            field: "First Observed",
            value: format_time(Some(record.time_first_observed)),
        },
        FieldRow {
            field: "Last Transition",
            value: format_time(record.last_transition_time),
        },
        FieldRow {
            field: "Last Updated",
            value: format_time(record.last_updated),
        },
        FieldRow {
            field: "Pending",
            value: format_old_state(record.pending_state),
        },
        FieldRow {
            field: "Streak",
            value: record.streak.to_string(),
        },
        FieldRow {
            field: "Occurrences",
            value: record.occurrences.to_string(),
        },
    ];
    print_table(&rows, format);

    if let Some(details) = record.recent_details.back() {
        println!("Latest details:");
        print_json(details);
    }
    Ok(())
}
