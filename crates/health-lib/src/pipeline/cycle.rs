//! The evaluation-cycle pipeline
//!
//! [`HealthModelPipeline::run_cycle`] is the single entry point. Sub-batches
//! are buffered until the trigger batch arrives; the buffered rows are then
//! evaluated in one pass:
//!
//! rows -> signals -> reduce -> kube-api handling -> state update (units)
//! -> missing signals -> state update (synthesized) -> tree + aggregates
//! -> state update (aggregates) -> should-send filter -> render -> persist

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use super::announcer::{ClusterStateAnnouncer, ClusterStateChanged};
use super::settings::PipelineSettings;
use crate::error::PipelineError;
use crate::health::CycleReport;
use crate::ingest::{parse_rows, BatchKind, InputBatch, RecordBuffer, SignalResolver};
use crate::inventory::InventoryRegistry;
use crate::model::{HealthModelDefinition, HierarchyBuilder};
use crate::models::{HealthSignal, MonitorState};
use crate::observability::{CycleCounts, PipelineMetrics, StructuredLogger};
use crate::provider::{MonitorConfig, MonitorConfigProvider, OutputRecord};
use crate::signals::{MissingSignalGenerator, SignalReducer};
use crate::state::{
    LoadedState, MonitorStateStore, Observation, StateDeserializer, StateSerializer,
};

/// What the pipeline did with a batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The pipeline is switched off; the batch was ignored
    Disabled,
    Buffered { pending: usize },
    Emitted(CycleOutput),
    /// Rows that are not health data, returned unchanged
    PassThrough(Vec<Value>),
}

/// Result of writing the state snapshot at the end of a cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceStatus {
    Saved,
    Failed(String),
    Disabled,
}

/// Everything one evaluated cycle produced
#[derive(Debug, Clone, PartialEq)]
pub struct CycleOutput {
    /// Tag the records are emitted under
    pub tag: String,
    pub records: Vec<OutputRecord>,
    pub cluster_state: MonitorState,
    pub cluster_event: Option<ClusterStateChanged>,
    pub counts: CycleCounts,
    pub persistence: PersistenceStatus,
    pub inventory_empty: bool,
}

impl CycleOutput {
    pub fn health_report(&self) -> CycleReport {
        CycleReport {
            error: None,
            persisted: !matches!(self.persistence, PersistenceStatus::Failed(_)),
            inventory_empty: self.inventory_empty,
        }
    }
}

pub struct HealthModelPipeline {
    settings: PipelineSettings,
    definition: Arc<HealthModelDefinition>,
    provider: MonitorConfigProvider,
    inventory: InventoryRegistry,
    buffer: RecordBuffer,
    reducer: SignalReducer,
    generator: MissingSignalGenerator,
    hierarchy: HierarchyBuilder,
    store: MonitorStateStore,
    serializer: Option<StateSerializer>,
    announcer: ClusterStateAnnouncer,
    restored_instances: usize,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
    #[cfg(test)]
    fail_before_commit: bool,
}

impl HealthModelPipeline {
    /// Build a pipeline, restoring state from the snapshot file when one is configured
    pub fn new(
        settings: PipelineSettings,
        definition: Arc<HealthModelDefinition>,
        configs: HashMap<String, MonitorConfig>,
        inventory: InventoryRegistry,
    ) -> Self {
        let provider = MonitorConfigProvider::new(
            settings.cluster_id.clone(),
            settings.cluster_labels.clone(),
            configs,
        );

        let mut store = MonitorStateStore::new(definition.root_id());
        let mut restored_instances = 0;
        if let Some(path) = &settings.state_path {
            if let LoadedState::Restored(snapshot) = StateDeserializer::new(path).load() {
                restored_instances = snapshot.states.len();
                store.load(snapshot.states);
            }
        }

        let metrics = PipelineMetrics::new();
        metrics.set_tracked_instances(store.len());

        Self {
            generator: MissingSignalGenerator::new(definition.clone(), settings.silence_policy),
            hierarchy: HierarchyBuilder::new(definition.clone(), settings.aggregation.clone()),
            serializer: settings.state_path.as_ref().map(StateSerializer::new),
            logger: StructuredLogger::new(settings.cluster_id.clone()),
            reducer: SignalReducer::new(),
            buffer: RecordBuffer::new(),
            announcer: ClusterStateAnnouncer::new(),
            settings,
            definition,
            provider,
            inventory,
            store,
            restored_instances,
            metrics,
            #[cfg(test)]
            fail_before_commit: false,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn definition(&self) -> &HealthModelDefinition {
        &self.definition
    }

    pub fn inventory(&self) -> &InventoryRegistry {
        &self.inventory
    }

    pub fn store(&self) -> &MonitorStateStore {
        &self.store
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Instances restored from the snapshot at startup
    pub fn restored_instances(&self) -> usize {
        self.restored_instances
    }

    #[cfg(test)]
    pub(crate) fn set_fail_before_commit(&mut self, fail: bool) {
        self.fail_before_commit = fail;
    }

    /// Rows waiting for the trigger batch
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn run_cycle(&mut self, batch: InputBatch) -> Result<BatchOutcome, PipelineError> {
        self.run_cycle_at(batch, Utc::now())
    }

    /// [`run_cycle`](Self::run_cycle) with an explicit cycle time
    pub fn run_cycle_at(
        &mut self,
        batch: InputBatch,
        now: DateTime<Utc>,
    ) -> Result<BatchOutcome, PipelineError> {
        if !self.settings.enabled {
            return Ok(BatchOutcome::Disabled);
        }

        let kind = match self.settings.router.classify(&batch.tag) {
            Ok(kind) => kind,
            Err(e) => {
                self.metrics.inc_invalid_batches();
                return Err(e);
            }
        };

        match kind {
            BatchKind::PassThrough => Ok(BatchOutcome::PassThrough(batch.records)),
            BatchKind::Accumulate => {
                self.buffer.add(batch.records);
                self.metrics.set_buffered_rows(self.buffer.len());
                Ok(BatchOutcome::Buffered {
                    pending: self.buffer.len(),
                })
            }
            BatchKind::Trigger => {
                self.buffer.add(batch.records);
                let rows = self.buffer.drain();
                self.buffer.reset();
                self.metrics.set_buffered_rows(0);

                let start = Instant::now();
                match self.evaluate(rows, now) {
                    Ok(output) => {
                        let elapsed = start.elapsed();
                        self.metrics
                            .observe_cycle(elapsed.as_secs_f64(), output.counts);
                        self.metrics.set_cluster_state(output.cluster_state);
                        self.metrics.set_tracked_instances(self.store.len());
                        self.logger
                            .log_cycle(output.counts, output.cluster_state, elapsed.as_millis());
                        Ok(BatchOutcome::Emitted(output))
                    }
                    Err(e) => {
                        self.metrics.inc_cycle_failures();
                        self.logger.log_cycle_failed(&e.to_string());
                        Err(e)
                    }
                }
            }
        }
    }

    fn evaluate(&mut self, rows: Vec<Value>, now: DateTime<Utc>) -> Result<CycleOutput, PipelineError> {
        let inventory = self.inventory.snapshot();
        let received = rows.len();

        let records = parse_rows(rows);
        let signals = SignalResolver::new(&self.definition, &self.provider, &inventory, now)
            .resolve_all(records);
        let reduced = self.reducer.reduce(signals, &inventory);
        let reduced_count = reduced.len();

        let kube_api = &self.settings.kube_api;
        if kube_api.is_api_down(&reduced) {
            self.logger.log_kube_api_down(kube_api.affected_count(&reduced));
        }
        let mut handled = kube_api.handle(reduced);

        // Work on copies so a failed cycle leaves the committed state untouched
        let mut store = self.store.clone();
        apply_observations(&mut store, &mut handled, now);

        let mut generator = self.generator.clone();
        let mut missing = generator.missing(&handled, &inventory, &self.provider, now);
        generator.update_last_received(&handled);
        apply_observations(&mut store, &mut missing, now);
        let missing_count = missing.len();

        let mut signals = handled;
        signals.append(&mut missing);

        let mut builder = self.hierarchy.model_builder(now);
        builder.process(&signals)?;
        if builder.skipped() > 0 {
            debug!(skipped = builder.skipped(), "Signals left out of the model");
        }
        let model = builder.finalize();

        for node in model.iter().filter(|n| n.is_aggregate()) {
            let config = self.provider.config(&node.monitor_id);
            store.update(
                &node.monitor_instance_id,
                Observation {
                    state: node.state,
                    observed_at: node.time_first_observed,
                    details: &node.details,
                    config: &config,
                },
                now,
            );
        }

        let mut records = Vec::new();
        for node in model.iter() {
            let state = store.get(&node.monitor_instance_id);
            if !state.should_send {
                continue;
            }
            let parent = model
                .parent_of(node)
                .map(|p| p.monitor_instance_id.as_str());
            records.push(self.provider.render(node, parent, &state, now)?);
        }

        #[cfg(test)]
        if self.fail_before_commit {
            return Err(PipelineError::Model("cycle aborted before commit".to_string()));
        }

        let root = store.get(store.root_instance_id());
        self.store = store;
        self.generator = generator;

        let cluster_event = self
            .announcer
            .observe(root.old_state, root.new_state, model.len());
        if let Some(event) = &cluster_event {
            self.logger
                .log_cluster_state_change(event.old_state, event.new_state);
        }

        let persistence = self.persist(now);

        info!(
            emitted = records.len(),
            instances = model.len(),
            "Health model evaluated"
        );

        Ok(CycleOutput {
            tag: self.settings.router.output_tag().to_string(),
            counts: CycleCounts {
                received,
                reduced: reduced_count,
                missing: missing_count,
                emitted: records.len(),
            },
            records,
            cluster_state: root.new_state,
            cluster_event,
            persistence,
            inventory_empty: inventory.is_empty(),
        })
    }

    fn persist(&self, now: DateTime<Utc>) -> PersistenceStatus {
        let Some(serializer) = &self.serializer else {
            return PersistenceStatus::Disabled;
        };

        match serializer.save(&self.store, now) {
            Ok(()) => PersistenceStatus::Saved,
            Err(e) => {
                self.metrics.inc_persistence_failures();
                self.logger
                    .log_persistence_failure(&serializer.path().display().to_string(), &e.to_string());
                PersistenceStatus::Failed(e.to_string())
            }
        }
    }
}

/// Feed unit signals to the store; each signal then carries the store's
/// (possibly thresholded) state into the tree
fn apply_observations(store: &mut MonitorStateStore, signals: &mut [HealthSignal], now: DateTime<Utc>) {
    for signal in signals.iter_mut() {
        let record = store.update(
            &signal.monitor_instance_id,
            Observation {
                state: signal.state,
                observed_at: signal.time_first_observed,
                details: &signal.details,
                config: &signal.config,
            },
            now,
        );
        signal.state = record.new_state;
    }
}

/// Builder for [`HealthModelPipeline`]
pub struct PipelineBuilder {
    settings: PipelineSettings,
    definition: Option<Arc<HealthModelDefinition>>,
    configs: HashMap<String, MonitorConfig>,
    inventory: Option<InventoryRegistry>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            settings: PipelineSettings::default(),
            definition: None,
            configs: HashMap::new(),
            inventory: None,
        }
    }

    pub fn settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn definition(mut self, definition: Arc<HealthModelDefinition>) -> Self {
        self.definition = Some(definition);
        self
    }

    pub fn configs(mut self, configs: HashMap<String, MonitorConfig>) -> Self {
        self.configs = configs;
        self
    }

    pub fn inventory(mut self, inventory: InventoryRegistry) -> Self {
        self.inventory = Some(inventory);
        self
    }

    pub fn build(self) -> Result<HealthModelPipeline, PipelineError> {
        let definition = self
            .definition
            .ok_or_else(|| PipelineError::Config("health model definition is required".to_string()))?;
        if self.settings.cluster_id.is_empty() {
            return Err(PipelineError::Config("cluster id is required".to_string()));
        }

        Ok(HealthModelPipeline::new(
            self.settings,
            definition,
            self.configs,
            self.inventory.unwrap_or_default(),
        ))
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
