//! End-to-end cycle tests for the health model pipeline

use super::*;
use crate::error::PipelineError;
use crate::ingest::InputBatch;
use crate::inventory::{ClusterInventory, InventoryRegistry};
use crate::model::HealthModelDefinition;
use crate::models::{monitor_instance_id, MonitorState};
use crate::provider::{MonitorConfigProvider, OutputRecord};
use crate::signals::{AffectedMonitors, KubeApiAction, KubeApiDownHandler, KUBE_API_MONITOR_ID};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tempfile::TempDir;

const NODES_TOPOLOGY: &str = r#"[
    {"monitor_id": "cluster", "aggregation": {"algorithm": "worstOf"}},
    {"monitor_id": "all_nodes", "parent_monitor_id": "cluster"},
    {"monitor_id": "node", "parent_monitor_id": "all_nodes", "labels": ["kubernetes.io/hostname"]},
    {"monitor_id": "pod_ready", "parent_monitor_id": "node", "resource_kind": "node"}
]"#;

const API_TOPOLOGY: &str = r#"[
    {"monitor_id": "cluster"},
    {"monitor_id": "node", "parent_monitor_id": "cluster", "labels": ["kubernetes.io/hostname"]},
    {"monitor_id": "node_condition", "parent_monitor_id": "node", "resource_kind": "node"},
    {"monitor_id": "kube_api_status", "parent_monitor_id": "cluster"}
]"#;

const ACCUMULATE: &str = "kubehealth.DaemonSet.Node";
const TRIGGER: &str = "kubehealth.ReplicaSet";

fn t(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

fn row(monitor_id: &str, node: &str, state: &str, minute: i64) -> Value {
    json!({
        "monitor_id": monitor_id,
        "node_name": node,
        "time_first_observed": t(minute).to_rfc3339(),
        "details": {"state": state, "timestamp": t(minute).to_rfc3339()}
    })
}

fn cluster_row(monitor_id: &str, state: &str, minute: i64) -> Value {
    json!({
        "monitor_id": monitor_id,
        "monitor_instance_id": monitor_id,
        "time_first_observed": t(minute).to_rfc3339(),
        "details": {"state": state}
    })
}

fn settings() -> PipelineSettings {
    PipelineSettings {
        cluster_id: "c1".to_string(),
        ..Default::default()
    }
}

fn pipeline_with(
    topology: &str,
    settings: PipelineSettings,
    configs: HashMap<String, crate::provider::MonitorConfig>,
    nodes: &[&str],
) -> (HealthModelPipeline, InventoryRegistry) {
    let registry = InventoryRegistry::new();
    let mut inventory = ClusterInventory::new();
    for node in nodes {
        inventory = inventory.with_node(node, &[]);
    }
    registry.replace(inventory);

    let pipeline = PipelineBuilder::new()
        .settings(settings)
        .definition(Arc::new(HealthModelDefinition::from_json(topology).unwrap()))
        .configs(configs)
        .inventory(registry.clone())
        .build()
        .unwrap();
    (pipeline, registry)
}

fn nodes_pipeline(nodes: &[&str]) -> (HealthModelPipeline, InventoryRegistry) {
    pipeline_with(NODES_TOPOLOGY, settings(), HashMap::new(), nodes)
}

fn emit(pipeline: &mut HealthModelPipeline, rows: Vec<Value>, minute: i64) -> CycleOutput {
    match pipeline
        .run_cycle_at(InputBatch::new(TRIGGER, rows), t(minute))
        .unwrap()
    {
        BatchOutcome::Emitted(output) => output,
        other => panic!("expected emitted output, got {:?}", other),
    }
}

fn pod(node: &str) -> String {
    monitor_instance_id("pod_ready", &["c1", node])
}

fn node(name: &str) -> String {
    monitor_instance_id("node", &[name])
}

fn by_id(output: &CycleOutput) -> BTreeMap<String, &OutputRecord> {
    output
        .records
        .iter()
        .map(|r| (r.monitor_instance_id.clone(), r))
        .collect()
}

mod scenario_tests {
    use super::*;

    #[test]
    fn test_first_cycle_emits_everything() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B"]);
        let output = emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 0), row("pod_ready", "B", "pass", 0)],
            1,
        );

        let records = by_id(&output);
        let expected = [
            "cluster".to_string(),
            "all_nodes".to_string(),
            node("A"),
            node("B"),
            pod("A"),
            pod("B"),
        ];
        assert_eq!(records.len(), expected.len());
        for id in &expected {
            let record = records[id];
            assert_eq!(record.new_state, MonitorState::Pass, "{}", id);
            assert_eq!(record.old_state, None, "{}", id);
        }
        assert_eq!(output.cluster_state, MonitorState::Pass);
        assert_eq!(records[&pod("A")].parent_monitor_instance_id, Some(node("A")));
        assert_eq!(records["all_nodes"].parent_monitor_instance_id, Some("cluster".to_string()));
        assert_eq!(records["cluster"].parent_monitor_instance_id, None);
        assert_eq!(output.tag, "kubehealth.AgentCollectionTime");
    }

    #[test]
    fn test_deleted_object_is_dropped() {
        let (mut pipeline, registry) = nodes_pipeline(&["A", "B"]);
        emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 0), row("pod_ready", "B", "pass", 0)],
            1,
        );

        registry.remove_node("B");
        let output = emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 1), row("pod_ready", "B", "pass", 1)],
            2,
        );

        // Nothing changed for A; B is gone and not synthesized as missing
        let ids: Vec<&str> = output
            .records
            .iter()
            .map(|r| r.monitor_instance_id.as_str())
            .collect();
        assert_eq!(ids, vec!["cluster"]);
        assert_eq!(output.counts.reduced, 1);
        assert_eq!(output.counts.missing, 0);
        assert_eq!(output.cluster_state, MonitorState::Pass);
    }

    #[test]
    fn test_transition_reemits_changed_ancestors_only() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B"]);
        emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 0), row("pod_ready", "B", "pass", 0)],
            1,
        );

        let output = emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "fail", 1), row("pod_ready", "B", "pass", 1)],
            2,
        );

        let records = by_id(&output);
        let mut ids: Vec<&String> = records.keys().collect();
        ids.sort();
        let mut expected = vec![
            "cluster".to_string(),
            "all_nodes".to_string(),
            node("A"),
            pod("A"),
        ];
        expected.sort();
        assert_eq!(ids, expected.iter().collect::<Vec<_>>());

        for id in &expected {
            assert_eq!(records[id].old_state, Some(MonitorState::Pass), "{}", id);
            assert_eq!(records[id].new_state, MonitorState::Fail, "{}", id);
        }
        assert_eq!(
            output.cluster_event,
            Some(ClusterStateChanged {
                old_state: MonitorState::Pass,
                new_state: MonitorState::Fail,
                monitor_count: 6,
            })
        );
    }
}

mod property_tests {
    use super::*;

    #[test]
    fn test_root_emitted_every_cycle() {
        let (mut pipeline, _) = nodes_pipeline(&["A"]);
        for minute in 0..4 {
            let output = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", minute)], minute);
            assert!(output
                .records
                .iter()
                .any(|r| r.monitor_instance_id == "cluster"));
        }
    }

    #[test]
    fn test_root_exists_without_signals() {
        let (mut pipeline, _) = nodes_pipeline(&[]);
        let output = emit(&mut pipeline, Vec::new(), 0);

        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].monitor_id, "cluster");
        assert_eq!(output.cluster_state, MonitorState::Unknown);
    }

    #[test]
    fn test_aggregate_is_worst_of_children() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B", "C"]);
        let output = emit(
            &mut pipeline,
            vec![
                row("pod_ready", "A", "pass", 0),
                row("pod_ready", "B", "warning", 0),
                row("pod_ready", "C", "unknown", 0),
            ],
            0,
        );

        let records = by_id(&output);
        assert_eq!(records["all_nodes"].new_state, MonitorState::Warning);
        assert_eq!(records["cluster"].new_state, MonitorState::Warning);
        assert_eq!(
            records["all_nodes"].details["details"]["warning"],
            json!([node("B")])
        );
    }

    #[test]
    fn test_missing_signals_none_then_unknown() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B", "C"]);

        // C never reports
        let output = emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 0), row("pod_ready", "B", "pass", 0)],
            0,
        );
        assert_eq!(by_id(&output)[&pod("C")].new_state, MonitorState::None);
        assert_eq!(output.counts.missing, 1);

        // B goes silent
        let output = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 1)], 1);
        let records = by_id(&output);
        assert_eq!(records[&pod("B")].new_state, MonitorState::Unknown);
        assert_eq!(records[&pod("B")].old_state, Some(MonitorState::Pass));
        assert!(!records.contains_key(&pod("C")));
        assert_eq!(output.cluster_state, MonitorState::Unknown);
    }

    #[test]
    fn test_duplicate_rows_keep_latest() {
        let (mut pipeline, _) = nodes_pipeline(&["A"]);
        let output = emit(
            &mut pipeline,
            vec![
                row("pod_ready", "A", "fail", 5),
                row("pod_ready", "A", "pass", 3),
            ],
            6,
        );
        assert_eq!(by_id(&output)[&pod("A")].new_state, MonitorState::Fail);
        assert_eq!(output.counts.received, 2);
        assert_eq!(output.counts.reduced, 1);
    }

    #[test]
    fn test_thresholded_unit_holds_state() {
        let configs = MonitorConfigProvider::parse_configs(
            r#"{"pod_ready": {"ConsecutiveSamplesForStateTransition": 2}}"#,
        )
        .unwrap();
        let (mut pipeline, _) = pipeline_with(NODES_TOPOLOGY, settings(), configs, &["A"]);

        let first = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 0)], 0);
        assert_eq!(by_id(&first)[&pod("A")].new_state, MonitorState::None);

        let second = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 1)], 1);
        let records = by_id(&second);
        assert_eq!(records[&pod("A")].new_state, MonitorState::Pass);
        assert_eq!(records[&pod("A")].details.as_array().map(Vec::len), Some(2));
        assert_eq!(second.cluster_state, MonitorState::Pass);

        // One failing sample is not enough to flip the unit or its ancestors
        let third = emit(&mut pipeline, vec![row("pod_ready", "A", "fail", 2)], 2);
        assert_eq!(third.records.len(), 1);
        assert_eq!(third.cluster_state, MonitorState::Pass);
    }
}

mod kube_api_tests {
    use super::*;

    fn outage_rows() -> Vec<Value> {
        vec![
            cluster_row(KUBE_API_MONITOR_ID, "fail", 0),
            row("node_condition", "A", "fail", 0),
        ]
    }

    #[test]
    fn test_outage_coerces_dependent_signals() {
        let (mut pipeline, _) = pipeline_with(API_TOPOLOGY, settings(), HashMap::new(), &["A"]);
        let output = emit(&mut pipeline, outage_rows(), 0);
        let records = by_id(&output);

        let condition = records[&monitor_instance_id("node_condition", &["c1", "A"])];
        assert_eq!(condition.new_state, MonitorState::Unknown);
        assert_eq!(condition.details["state"], "unknown");

        let api = records[KUBE_API_MONITOR_ID];
        assert_eq!(api.new_state, MonitorState::Fail);
        assert_eq!(api.details, json!({"state": "fail"}));
    }

    #[test]
    fn test_outage_drop_mode() {
        let settings = PipelineSettings {
            kube_api: KubeApiDownHandler::new(
                KUBE_API_MONITOR_ID,
                AffectedMonitors::All,
                KubeApiAction::Drop,
            ),
            ..settings()
        };
        let (mut pipeline, _) = pipeline_with(API_TOPOLOGY, settings, HashMap::new(), &["A"]);
        let output = emit(&mut pipeline, outage_rows(), 0);

        // The dropped signal was never received, so it is synthesized as None
        let records = by_id(&output);
        let condition = records[&monitor_instance_id("node_condition", &["c1", "A"])];
        assert_eq!(condition.new_state, MonitorState::None);
        assert_eq!(records[KUBE_API_MONITOR_ID].new_state, MonitorState::Fail);
    }
}

mod batch_tests {
    use super::*;

    #[test]
    fn test_accumulate_then_trigger() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B"]);

        let outcome = pipeline
            .run_cycle_at(
                InputBatch::new(ACCUMULATE, vec![row("pod_ready", "A", "pass", 0)]),
                t(0),
            )
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Buffered { pending: 1 });

        let output = emit(&mut pipeline, vec![row("pod_ready", "B", "pass", 0)], 0);
        assert_eq!(output.counts.received, 2);
        assert_eq!(output.counts.missing, 0);
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_invalid_tag_leaves_buffer_untouched() {
        let (mut pipeline, _) = nodes_pipeline(&["A"]);
        pipeline
            .run_cycle_at(
                InputBatch::new(ACCUMULATE, vec![row("pod_ready", "A", "pass", 0)]),
                t(0),
            )
            .unwrap();

        let result = pipeline.run_cycle_at(InputBatch::new("oms.api.other", Vec::new()), t(0));
        assert!(matches!(result, Err(PipelineError::InvalidBatch(_))));
        assert_eq!(pipeline.pending(), 1);
    }

    #[test]
    fn test_passthrough_returns_rows() {
        let (mut pipeline, _) = nodes_pipeline(&["A"]);
        let rows = vec![json!({"collection_time": "2024-01-01T00:00:00Z"})];

        let outcome = pipeline
            .run_cycle_at(
                InputBatch::new("kubehealth.AgentCollectionTime", rows.clone()),
                t(0),
            )
            .unwrap();
        assert_eq!(outcome, BatchOutcome::PassThrough(rows));
        assert_eq!(pipeline.pending(), 0);
    }

    #[test]
    fn test_disabled_pipeline_ignores_batches() {
        let settings = PipelineSettings {
            enabled: false,
            ..settings()
        };
        let (mut pipeline, _) = pipeline_with(NODES_TOPOLOGY, settings, HashMap::new(), &["A"]);

        let outcome = pipeline
            .run_cycle_at(InputBatch::new("anything", vec![json!({})]), t(0))
            .unwrap();
        assert_eq!(outcome, BatchOutcome::Disabled);
    }

    #[test]
    fn test_malformed_rows_are_skipped() {
        let (mut pipeline, _) = nodes_pipeline(&["A"]);
        let output = emit(
            &mut pipeline,
            vec![json!(42), json!({"details": {}}), row("pod_ready", "A", "pass", 0)],
            0,
        );
        assert_eq!(output.counts.received, 3);
        assert_eq!(output.counts.reduced, 1);
    }

    #[test]
    fn test_builder_requires_cluster_id() {
        let result = PipelineBuilder::new()
            .definition(Arc::new(HealthModelDefinition::from_json(NODES_TOPOLOGY).unwrap()))
            .build();
        assert!(matches!(result, Err(PipelineError::Config(_))));
    }
}

mod persistence_tests {
    use super::*;

    fn persistent_settings(dir: &TempDir) -> PipelineSettings {
        PipelineSettings {
            state_path: Some(dir.path().join("health_state.json")),
            ..settings()
        }
    }

    #[test]
    fn test_state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let (mut pipeline, _) =
            pipeline_with(NODES_TOPOLOGY, persistent_settings(&dir), HashMap::new(), &["A"]);
        let output = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 0)], 0);
        assert_eq!(output.persistence, PersistenceStatus::Saved);
        let before = pipeline.store().states().clone();

        let (mut restarted, _) =
            pipeline_with(NODES_TOPOLOGY, persistent_settings(&dir), HashMap::new(), &["A"]);
        assert_eq!(restarted.restored_instances(), before.len());
        assert_eq!(restarted.store().states(), &before);

        // Unchanged states are not re-emitted after the restart
        let output = emit(&mut restarted, vec![row("pod_ready", "A", "pass", 1)], 1);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.records[0].old_state, Some(MonitorState::Pass));
    }

    #[test]
    fn test_persistence_failure_is_not_fatal() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"file, not a directory").unwrap();
        let settings = PipelineSettings {
            state_path: Some(blocker.join("health_state.json")),
            ..settings()
        };
        let (mut pipeline, _) = pipeline_with(NODES_TOPOLOGY, settings, HashMap::new(), &["A"]);

        let output = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 0)], 0);
        assert!(matches!(output.persistence, PersistenceStatus::Failed(_)));
        assert!(!output.records.is_empty());
        assert!(!output.health_report().persisted);
    }
}

mod instance_id_tests {
    use super::*;

    fn with_instance_id(mut row: Value, instance_id: &str) -> Value {
        row["monitor_instance_id"] = json!(instance_id);
        row
    }

    #[test]
    fn test_supplied_instance_ids_match_synthesized_expectations() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B"]);
        let output = emit(
            &mut pipeline,
            vec![
                with_instance_id(row("pod_ready", "A", "pass", 0), "inst-A"),
                with_instance_id(row("pod_ready", "B", "pass", 0), "inst-B"),
            ],
            1,
        );

        assert_eq!(output.counts.missing, 0);
        assert_eq!(output.cluster_state, MonitorState::Pass);
        let records = by_id(&output);
        assert_eq!(records.len(), 6);
        assert_eq!(records[&pod("A")].new_state, MonitorState::Pass);
        assert!(!records.contains_key("inst-A"));

        // Still recognised as the same instances on the next cycle
        let output = emit(
            &mut pipeline,
            vec![
                with_instance_id(row("pod_ready", "A", "pass", 1), "inst-A"),
                with_instance_id(row("pod_ready", "B", "pass", 1), "inst-B"),
            ],
            2,
        );
        assert_eq!(output.counts.missing, 0);
        assert_eq!(output.records.len(), 1);
    }

    #[test]
    fn test_instance_id_naming_an_aggregate_does_not_abort_cycle() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B"]);
        let output = emit(
            &mut pipeline,
            vec![
                with_instance_id(row("pod_ready", "A", "pass", 0), "all_nodes"),
                row("pod_ready", "B", "pass", 0),
            ],
            1,
        );

        let records = by_id(&output);
        assert_eq!(output.cluster_state, MonitorState::Pass);
        assert!(records["all_nodes"].parent_monitor_instance_id.is_some());
        assert_eq!(records[&pod("A")].new_state, MonitorState::Pass);
        assert_eq!(records[&pod("B")].new_state, MonitorState::Pass);
    }
}

mod rollback_tests {
    use super::*;

    #[test]
    fn test_failed_cycle_leaves_committed_state_untouched() {
        let (mut pipeline, _) = nodes_pipeline(&["A", "B", "C"]);
        emit(
            &mut pipeline,
            vec![row("pod_ready", "A", "pass", 0), row("pod_ready", "B", "pass", 0)],
            0,
        );
        let committed = pipeline.store().states().clone();

        pipeline.set_fail_before_commit(true);
        let result = pipeline.run_cycle_at(
            InputBatch::new(TRIGGER, vec![row("pod_ready", "A", "fail", 1)]),
            t(1),
        );
        assert!(matches!(result, Err(PipelineError::Model(_))));
        assert_eq!(pipeline.store().states(), &committed);
        assert_eq!(pipeline.pending(), 0);

        // B was received in the last committed cycle, so its silence reads as Unknown
        pipeline.set_fail_before_commit(false);
        let output = emit(&mut pipeline, vec![row("pod_ready", "A", "pass", 2)], 2);
        let records = by_id(&output);
        assert_eq!(records[&pod("B")].new_state, MonitorState::Unknown);
        assert_eq!(records[&pod("B")].old_state, Some(MonitorState::Pass));
        assert!(!records.contains_key(&pod("A")));
        assert!(!records.contains_key(&pod("C")));
        assert_eq!(output.counts.missing, 2);
        assert_eq!(output.cluster_state, MonitorState::Unknown);
    }
}
