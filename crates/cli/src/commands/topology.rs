//! Validate and render a monitor topology

use anyhow::{Context, Result};
use colored::Colorize;
use health_lib::model::{HealthModelDefinition, MonitorDefinition, MonitorKind, ParentRef};
use health_lib::ResourceKind;
use serde::Serialize;
use std::path::Path;

use crate::output::{print_json, print_success, OutputFormat};

#[derive(Serialize)]
struct TopologyNode {
    monitor_id: String,
    kind: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    conditional: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TopologyNode>,
}

#[derive(Serialize)]
struct CheckSummary<'a> {
    valid: bool,
    root: &'a str,
    monitors: usize,
    unit_monitors: usize,
}

pub fn load_definition(path: &Path) -> Result<HealthModelDefinition> {
    HealthModelDefinition::from_path(path)
        .with_context(|| format!("Invalid health model definition {}", path.display()))
}

pub fn check(path: &Path, format: OutputFormat) -> Result<()> {
    let definition = load_definition(path)?;
    let summary = CheckSummary {
        valid: true,
        root: definition.root_id(),
        monitors: definition.len(),
        unit_monitors: definition.unit_monitors().count(),
    };

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => print_success(&format!(
            "{} is valid: {} monitors ({} unit), root '{}'",
            path.display(),
            summary.monitors,
            summary.unit_monitors,
            summary.root
        )),
    }
    Ok(())
}

pub fn tree(path: &Path, format: OutputFormat) -> Result<()> {
    let definition = load_definition(path)?;
    let root = build_node(&definition, definition.root_id());

    match format {
        OutputFormat::Json => print_json(&root),
        OutputFormat::Table => {
            let mut out = String::new();
            render(&root, "", true, true, &mut out);
            print!("{}", out);
        }
    }
    Ok(())
}

fn kind_label(monitor: &MonitorDefinition) -> String {
    match &monitor.kind {
        MonitorKind::Aggregate(rule) => match rule {
            health_lib::model::AggregationRule::WorstOf => "worstOf".to_string(),
            health_lib::model::AggregationRule::Percentage { state_threshold } => {
                format!("percentage {}%", state_threshold)
            }
        },
        MonitorKind::Unit { resource_kind, .. } => match resource_kind {
            ResourceKind::Cluster => "unit/cluster".to_string(),
            ResourceKind::Node => "unit/node".to_string(),
            ResourceKind::Workload => "unit/workload".to_string(),
        },
    }
}

fn build_node(definition: &HealthModelDefinition, monitor_id: &str) -> TopologyNode {
    let monitor = definition.get(monitor_id);
    TopologyNode {
        monitor_id: monitor_id.to_string(),
        kind: monitor.map(kind_label).unwrap_or_default(),
        conditional: monitor
            .map(|m| matches!(m.parent, ParentRef::Conditional { .. }))
            .unwrap_or(false),
        children: definition
            .children_of(monitor_id)
            .map(|child| build_node(definition, &child.monitor_id))
            .collect(),
    }
}

fn render(node: &TopologyNode, prefix: &str, is_last: bool, is_root: bool, out: &mut String) {
    let (branch, child_prefix) = if is_root {
        (String::new(), String::new())
    } else if is_last {
        ("└── ".to_string(), format!("{}    ", prefix))
    } else {
        ("├── ".to_string(), format!("{}│   ", prefix))
    };

    let marker = if node.conditional { " (conditional)" } else { "" };
    out.push_str(&format!(
        "{}{}{} {}{}\n",
        prefix,
        branch,
        node.monitor_id.bold(),
        format!("[{}]", node.kind).dimmed(),
        marker
    ));

    for (i, child) in node.children.iter().enumerate() {
        render(child, &child_prefix, i + 1 == node.children.len(), false, out);
    }
}
