//! Fluent map/filter/reduce pipeline over one swarm, with phase-barrier
//! execution: each step waits for the previous one to finish completely
//! before it starts, matching [`evolve_swarm`]'s own
//! join-before-continuing idiom for a single operator call.

use std::sync::Arc;
use std::time::Instant;

use evolve_config::OperatorOptions;
use evolve_core::{PipelineOutput, PipelineResult, StepResult, SwarmResult, SwarmResultList, ValidationMode};
use evolve_swarm::Swarm;
use evolve_validate::SchemaDescriptor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::events::{PipelineEvent, PipelineEventBus, PipelineEventSubscription};

type PromptFn<S> = Arc<dyn Fn(&S) -> String + Send + Sync>;
type ConditionFn<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;

enum Step<S> {
    Map {
        prompt_for: PromptFn<S>,
        schema: Arc<dyn SchemaDescriptor + Send + Sync>,
        schema_mode: ValidationMode,
        options: OperatorOptions,
    },
    Filter {
        prompt_for: PromptFn<S>,
        condition: ConditionFn<S>,
        schema: Arc<dyn SchemaDescriptor + Send + Sync>,
        schema_mode: ValidationMode,
        options: OperatorOptions,
    },
}

impl<S> Step<S> {
    fn name(&self) -> &'static str {
        match self {
            Step::Map { .. } => "map",
            Step::Filter { .. } => "filter",
        }
    }
}

/// A builder chaining `map`/`filter` steps over one swarm, terminated by
/// either [`Pipeline::run`] (returning the last step's per-item results)
/// or [`Pipeline::reduce`] (collapsing everything into one result).
pub struct Pipeline<'a, S> {
    swarm: &'a Swarm,
    steps: Vec<Step<S>>,
    events: PipelineEventBus,
}

impl<'a, S> Pipeline<'a, S>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start a pipeline over `swarm`.
    pub fn new(swarm: &'a Swarm) -> Self {
        Pipeline { swarm, steps: Vec::new(), events: PipelineEventBus::new() }
    }

    /// Subscribe to this pipeline's events before calling `run`/`reduce`.
    pub fn subscribe(&self) -> PipelineEventSubscription {
        self.events.subscribe()
    }

    /// Add a `map` step.
    #[must_use]
    pub fn map(
        mut self,
        prompt_for: impl Fn(&S) -> String + Send + Sync + 'static,
        schema: Arc<dyn SchemaDescriptor + Send + Sync>,
        schema_mode: ValidationMode,
        options: OperatorOptions,
    ) -> Self {
        self.steps.push(Step::Map { prompt_for: Arc::new(prompt_for), schema, schema_mode, options });
        self
    }

    /// Add a `filter` step.
    #[must_use]
    pub fn filter(
        mut self,
        prompt_for: impl Fn(&S) -> String + Send + Sync + 'static,
        condition: impl Fn(&S) -> bool + Send + Sync + 'static,
        schema: Arc<dyn SchemaDescriptor + Send + Sync>,
        schema_mode: ValidationMode,
        options: OperatorOptions,
    ) -> Self {
        self.steps.push(Step::Filter {
            prompt_for: Arc::new(prompt_for),
            condition: Arc::new(condition),
            schema,
            schema_mode,
            options,
        });
        self
    }

    /// Turn this into a pipeline that terminates in a `reduce` step,
    /// collapsing every surviving item from the map/filter chain into one
    /// result of type `R`.
    #[must_use]
    pub fn reduce<R>(
        self,
        prompt: impl Into<String>,
        schema: Arc<dyn SchemaDescriptor + Send + Sync>,
        schema_mode: ValidationMode,
        options: OperatorOptions,
    ) -> TerminalPipeline<'a, S, R>
    where
        R: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        TerminalPipeline {
            swarm: self.swarm,
            steps: self.steps,
            events: self.events,
            reduce_prompt: prompt.into(),
            reduce_schema: schema,
            reduce_schema_mode: schema_mode,
            reduce_options: options,
        }
    }

    /// Run every step against `items`, returning the last step's per-item
    /// results.
    pub async fn run(self, items: Vec<S>) -> PipelineResult<S> {
        let pipeline_run_id = evolve_core::random_hex_id();
        let start = Instant::now();
        let mut step_summaries = Vec::with_capacity(self.steps.len());
        let mut current = items;
        let mut last_list = SwarmResultList { results: Vec::new() };

        for (index, step) in self.steps.iter().enumerate() {
            let (list, summary) =
                run_step(self.swarm, &self.events, &pipeline_run_id, index, step, current).await;
            current = list.success().into_iter().filter_map(|r| r.data.clone()).collect();
            step_summaries.push(summary);
            last_list = list;
        }

        PipelineResult {
            pipeline_run_id,
            steps: step_summaries,
            total_duration_ms: start.elapsed().as_millis() as u64,
            output: PipelineOutput::Items(last_list),
        }
    }
}

/// A [`Pipeline`] whose last step is a terminating `reduce`, producing one
/// result of type `R` instead of a per-item list.
pub struct TerminalPipeline<'a, S, R> {
    swarm: &'a Swarm,
    steps: Vec<Step<S>>,
    events: PipelineEventBus,
    reduce_prompt: String,
    reduce_schema: Arc<dyn SchemaDescriptor + Send + Sync>,
    reduce_schema_mode: ValidationMode,
    reduce_options: OperatorOptions,
}

impl<'a, S, R> TerminalPipeline<'a, S, R>
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Subscribe to this pipeline's events before calling `run`.
    pub fn subscribe(&self) -> PipelineEventSubscription {
        self.events.subscribe()
    }

    /// Run the map/filter chain, then reduce the survivors to a single
    /// result.
    pub async fn run(self, items: Vec<S>) -> PipelineResult<R> {
        let pipeline_run_id = evolve_core::random_hex_id();
        let start = Instant::now();
        let mut step_summaries = Vec::with_capacity(self.steps.len() + 1);
        let mut current = items;

        for (index, step) in self.steps.iter().enumerate() {
            let (list, summary) =
                run_step(self.swarm, &self.events, &pipeline_run_id, index, step, current).await;
            current = list.success().into_iter().filter_map(|r| r.data.clone()).collect();
            step_summaries.push(summary);
        }

        let reduce_index = self.steps.len();
        let step_start = Instant::now();
        let item_count = current.len();
        self.events.publish(PipelineEvent::StepStart {
            step_index: reduce_index,
            step_name: "reduce".into(),
            item_count,
        });

        let (stop_tx, stop_rx) = oneshot::channel();
        let forward = spawn_forwarder(self.swarm, &self.events, reduce_index, "reduce", stop_rx);

        let mut result: SwarmResult<R> = evolve_swarm::reduce(
            self.swarm,
            current,
            &self.reduce_prompt,
            self.reduce_schema.as_ref(),
            self.reduce_schema_mode,
            &self.reduce_options,
        )
        .await;
        result.meta.pipeline_run_id = Some(pipeline_run_id.clone());
        result.meta.pipeline_step_index = Some(reduce_index);

        let _ = stop_tx.send(());
        forward.await.ok();

        let success_count = usize::from(result.status == evolve_core::SwarmStatus::Success);
        let error_count = usize::from(result.status == evolve_core::SwarmStatus::Error);
        let summary = StepResult {
            index: reduce_index,
            name: "reduce".into(),
            duration_ms: step_start.elapsed().as_millis() as u64,
            success_count,
            filtered_count: 0,
            error_count,
        };
        self.events.publish(PipelineEvent::StepComplete {
            step_index: reduce_index,
            step_name: "reduce".into(),
            duration_ms: summary.duration_ms,
            success_count,
            filtered_count: 0,
            error_count,
        });
        step_summaries.push(summary);

        PipelineResult {
            pipeline_run_id,
            steps: step_summaries,
            total_duration_ms: start.elapsed().as_millis() as u64,
            output: PipelineOutput::Reduced(result),
        }
    }
}

async fn run_step<S>(
    swarm: &Swarm,
    events: &PipelineEventBus,
    pipeline_run_id: &str,
    index: usize,
    step: &Step<S>,
    items: Vec<S>,
) -> (SwarmResultList<S>, StepResult)
where
    S: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let name = step.name();
    let step_start = Instant::now();
    tracing::debug!(target: "evolve.pipeline", step = name, step_index = index, item_count = items.len(), "running pipeline step");
    events.publish(PipelineEvent::StepStart { step_index: index, step_name: name.into(), item_count: items.len() });

    let (stop_tx, stop_rx) = oneshot::channel();
    let forward = spawn_forwarder(swarm, events, index, name, stop_rx);

    let mut list = match step {
        Step::Map { prompt_for, schema, schema_mode, options } => {
            evolve_swarm::map(swarm, items, |item: &S| (**prompt_for)(item), schema.as_ref(), *schema_mode, options).await
        }
        Step::Filter { prompt_for, condition, schema, schema_mode, options } => {
            evolve_swarm::filter(
                swarm,
                items,
                |item: &S| (**prompt_for)(item),
                |item: &S| (**condition)(item),
                schema.as_ref(),
                *schema_mode,
                options,
            )
            .await
        }
    };

    for result in list.results.iter_mut() {
        result.meta.pipeline_run_id = Some(pipeline_run_id.to_string());
        result.meta.pipeline_step_index = Some(index);
    }

    let _ = stop_tx.send(());
    forward.await.ok();

    let summary = StepResult {
        index,
        name: name.to_string(),
        duration_ms: step_start.elapsed().as_millis() as u64,
        success_count: list.success().len(),
        filtered_count: list.filtered().len(),
        error_count: list.errors().len(),
    };
    events.publish(PipelineEvent::StepComplete {
        step_index: index,
        step_name: name.into(),
        duration_ms: summary.duration_ms,
        success_count: summary.success_count,
        filtered_count: summary.filtered_count,
        error_count: summary.error_count,
    });
    tracing::debug!(
        target: "evolve.pipeline",
        step = name,
        step_index = index,
        success = summary.success_count,
        filtered = summary.filtered_count,
        errors = summary.error_count,
        "pipeline step complete"
    );

    (list, summary)
}

/// Subscribe to the swarm's event bus and forward every event onto the
/// pipeline's bus, tagged with step identity, until told to stop. A final
/// `try_recv` drain after the stop signal picks up anything the swarm
/// published between the last polled `recv` and the operator call
/// returning — relevant under a fully synchronous test double, which
/// never yields control back to this task on its own.
fn spawn_forwarder(
    swarm: &Swarm,
    events: &PipelineEventBus,
    step_index: usize,
    step_name: &str,
    mut stop_rx: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let mut sub = swarm.subscribe();
    let events = events.clone();
    let step_name = step_name.to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                event = sub.recv() => {
                    match event {
                        Some(event) => events.publish(PipelineEvent::Unit {
                            step_index,
                            step_name: step_name.clone(),
                            event,
                        }),
                        None => break,
                    }
                }
                _ = &mut stop_rx => break,
            }
        }
        while let Some(event) = sub.try_recv() {
            events.publish(PipelineEvent::Unit { step_index, step_name: step_name.clone(), event });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_capability::driver::AgentDriver;
    use evolve_core::{AgentType, FileContent, FileMap};
    use evolve_mock::{MockAgentDriver, MockSandboxProvider, ScriptedRun};

    #[derive(Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
    struct Item {
        value: u32,
    }

    #[derive(Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
    struct Sum {
        sum: u32,
    }

    fn scripted(json: &str) -> ScriptedRun {
        let mut files = FileMap::new();
        files.insert("result.json".to_string(), FileContent::text(json));
        ScriptedRun { exit_code: 0, stdout: json.to_string(), output_files: files }
    }

    fn swarm_scripted(scripts: Vec<ScriptedRun>, permits: usize) -> Swarm {
        let provider = Arc::new(MockSandboxProvider::new());
        let driver: Arc<dyn AgentDriver> =
            Arc::new(MockAgentDriver::with_provider(AgentType::Claude, scripts, provider.clone()));
        Swarm::new(provider, vec![driver], evolve_swarm::SessionTemplate::default(), evolve_config::SwarmConfig { permits, ..Default::default() })
            .unwrap()
    }

    fn item_schema() -> evolve_validate::TypedSchema<Item> {
        evolve_validate::TypedSchema::default()
    }

    fn sum_schema() -> evolve_validate::TypedSchema<Sum> {
        evolve_validate::TypedSchema::default()
    }

    /// Four items map to `{value: i}` (scripts 0-3), the filter re-confirms
    /// each one (scripts 4-7, same values so item 0's `value: 1` fails the
    /// `value > 1` condition and the rest survive), and reduce sums the
    /// three survivors (2 + 3 + 4) to 9 (script 8).
    #[tokio::test]
    async fn map_filter_reduce_runs_three_phases_in_order() {
        let swarm = swarm_scripted(
            vec![
                scripted(r#"{"value": 1}"#),
                scripted(r#"{"value": 2}"#),
                scripted(r#"{"value": 3}"#),
                scripted(r#"{"value": 4}"#),
                scripted(r#"{"value": 1}"#),
                scripted(r#"{"value": 2}"#),
                scripted(r#"{"value": 3}"#),
                scripted(r#"{"value": 4}"#),
                scripted(r#"{"sum": 9}"#),
            ],
            4,
        );

        let map_schema: Arc<dyn SchemaDescriptor + Send + Sync> = Arc::new(item_schema());
        let filter_schema: Arc<dyn SchemaDescriptor + Send + Sync> = Arc::new(item_schema());
        let reduce_schema: Arc<dyn SchemaDescriptor + Send + Sync> = Arc::new(sum_schema());

        let pipeline = Pipeline::<Item>::new(&swarm)
            .map(
                |n: &Item| format!("produce {}", n.value),
                map_schema,
                ValidationMode::default(),
                OperatorOptions::new(None, None, None, None).unwrap(),
            )
            .filter(
                |item: &Item| format!("keep {}?", item.value),
                |item: &Item| item.value > 1,
                filter_schema,
                ValidationMode::default(),
                OperatorOptions::new(None, None, None, None).unwrap(),
            )
            .reduce::<Sum>(
                "sum the survivors",
                reduce_schema,
                ValidationMode::default(),
                OperatorOptions::new(None, None, None, None).unwrap(),
            );

        let mut sub = pipeline.subscribe();
        let seed: Vec<Item> = (1..=4).map(|value| Item { value }).collect();
        let result = pipeline.run(seed).await;

        assert_eq!(result.steps.len(), 3);
        assert_eq!(result.steps[0].name, "map");
        assert_eq!(result.steps[1].name, "filter");
        assert_eq!(result.steps[2].name, "reduce");
        assert_eq!(result.steps[1].filtered_count, 1);

        match &result.output {
            PipelineOutput::Reduced(reduced) => {
                assert_eq!(reduced.data, Some(Sum { sum: 9 }));
                assert_eq!(reduced.meta.pipeline_run_id.as_deref(), Some(result.pipeline_run_id.as_str()));
                assert_eq!(reduced.meta.pipeline_step_index, Some(2));
            }
            PipelineOutput::Items(_) => panic!("expected a reduced output"),
        }

        let mut step_starts = 0;
        let mut step_completes = 0;
        while let Ok(Some(event)) = tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await {
            match event {
                PipelineEvent::StepStart { .. } => step_starts += 1,
                PipelineEvent::StepComplete { .. } => step_completes += 1,
                _ => {}
            }
        }
        assert_eq!(step_starts, 3);
        assert_eq!(step_completes, 3);
    }

    #[tokio::test]
    async fn map_only_pipeline_returns_item_results() {
        let swarm = swarm_scripted(vec![scripted(r#"{"value": 9}"#)], 1);
        let schema: Arc<dyn SchemaDescriptor + Send + Sync> = Arc::new(item_schema());
        let pipeline = Pipeline::<Item>::new(&swarm).map(
            |n: &Item| format!("produce {}", n.value),
            schema,
            ValidationMode::default(),
            OperatorOptions::new(None, None, None, None).unwrap(),
        );
        let result = pipeline.run(vec![Item { value: 1 }]).await;
        match result.output {
            PipelineOutput::Items(list) => {
                assert_eq!(list.results.len(), 1);
                assert_eq!(list.results[0].data, Some(Item { value: 9 }));
            }
            PipelineOutput::Reduced(_) => panic!("expected an item list"),
        }
    }
}
