//! The composition operators: `map`, `filter`, `reduce`, and `best_of`,
//! plus the `verify` decorator shared by all of them.

use std::cell::{Cell, RefCell};

use evolve_config::{resolve_skills, BestOfConfig, OperatorOptions, VerifyConfig};
use evolve_core::{
    AgentType, BaseMeta, BestOfInfo, FileContent, FileMap, Operation, OperatorRole, SwarmResult,
    SwarmResultList, SwarmStatus, ValidationMode, VerifyDecision, VerifyInfo,
};
use evolve_retry::RetryConfig;
use evolve_validate::{SchemaDescriptor, TypedSchema};
use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::events::SwarmEvent;
use crate::swarm::Swarm;

/// The judge's verdict on a `best_of` candidate set.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema)]
struct JudgeVerdict {
    winner_index: usize,
    reasoning: String,
}

fn item_context(json: String) -> FileMap {
    let mut map = FileMap::new();
    map.insert("item.json".to_string(), FileContent::text(json));
    map
}

fn identify(mut meta: BaseMeta, swarm: &Swarm, options: &OperatorOptions) -> BaseMeta {
    meta.swarm_name = swarm.config().name.clone();
    meta.operation_name = options.operation_name.clone();
    meta
}

/// Run `unit` under this swarm's concurrency bound, wrapped in
/// [`evolve_retry::execute`]: the permit is held during each attempt and
/// released for the backoff sleep between attempts, and an `ItemRetry`
/// event is published each time a retry is about to happen.
async fn retry_with_events<T, Fut, Unit, RetryOn>(
    swarm: &Swarm,
    meta: &BaseMeta,
    retry: RetryConfig,
    mut unit: Unit,
    retry_on: RetryOn,
) -> evolve_retry::RetryOutcome<T>
where
    Unit: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = T>,
    RetryOn: Fn(&T) -> bool,
{
    let permit = RefCell::new(Some(swarm.acquire_permit().await));
    let last_attempt = Cell::new(0u32);

    evolve_retry::execute(
        retry,
        |attempt| {
            last_attempt.set(attempt);
            unit(attempt)
        },
        retry_on,
        || {
            permit.borrow_mut().take();
            swarm.publish(SwarmEvent::ItemRetry { meta: meta.clone(), attempt: last_attempt.get() });
            std::future::ready(())
        },
        || async {
            *permit.borrow_mut() = Some(swarm.acquire_permit().await);
        },
    )
    .await
}

/// Run one worker unit (no verify/best_of decorator), wrapped in the swarm's
/// permit-aware Retry Executor.
async fn run_plain<S>(
    swarm: &Swarm,
    meta: BaseMeta,
    prompt: &str,
    context: FileMap,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    retry: RetryConfig,
    agent: Option<AgentType>,
    skills: &[String],
) -> SwarmResult<S>
where
    S: DeserializeOwned,
{
    let outcome = retry_with_events(
        swarm,
        &meta,
        retry,
        |attempt| {
            let unit_meta = meta.clone().with_error_retry(attempt - 1);
            swarm.run_attempt::<S>(unit_meta, prompt, context.clone(), Some(schema), schema_mode, agent, skills)
        },
        |result: &SwarmResult<S>| result.status == SwarmStatus::Error,
    )
    .await;
    outcome.value
}

/// Run one worker through the `verify` decorator: after a worker attempt
/// succeeds, a verifier judges it; on failure with attempts remaining the
/// worker re-runs with the verifier's feedback appended to its prompt.
/// Wrapped, as a whole, in the swarm's permit-aware Retry Executor.
#[allow(clippy::too_many_arguments)]
async fn run_with_verify<S>(
    swarm: &Swarm,
    meta: BaseMeta,
    prompt: &str,
    context: FileMap,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    retry: RetryConfig,
    verify_cfg: &VerifyConfig,
    agent: Option<AgentType>,
    skills: &[String],
) -> SwarmResult<S>
where
    S: DeserializeOwned + Serialize,
{
    let verify_schema = TypedSchema::<VerifyDecision>::default();

    let outcome = retry_with_events(
        swarm,
        &meta,
        retry,
        |error_attempt| {
            let worker_meta = meta.clone().with_error_retry(error_attempt - 1);
            let verify_schema = &verify_schema;
            // Fresh clone per Retry Executor attempt: the owned `context` can't be
            // moved into more than one of this `FnMut` closure's invocations.
            let context = context.clone();
            async move {
                let mut current_prompt = prompt.to_string();
                let mut verify_attempt = 1u32;

                loop {
                    let worker_meta = worker_meta.clone().with_verify_retry(verify_attempt - 1);
                    let worker_result: SwarmResult<S> = swarm
                        .run_attempt(worker_meta.clone(), &current_prompt, context.clone(), Some(schema), schema_mode, agent, skills)
                        .await;

                    if worker_result.status != SwarmStatus::Success {
                        return worker_result;
                    }

                    let verifier_meta = BaseMeta::new(meta.operation_id.clone(), Operation::Verify, OperatorRole::Verifier)
                        .with_item_index(meta.item_index.unwrap_or_default());
                    let verifier_prompt = format!(
                        "Judge whether the following result satisfies this criteria: {}\n\nResult:\n{}",
                        verify_cfg_criteria(verify_cfg),
                        worker_result.raw_data.clone().unwrap_or_default()
                    );
                    let verdict: SwarmResult<VerifyDecision> = swarm
                        .run_attempt(verifier_meta.clone(), &verifier_prompt, FileMap::new(), Some(verify_schema), schema_mode, verify_cfg.agent, skills)
                        .await;

                    let decision = match verdict.data {
                        Some(decision) => decision,
                        None => {
                            return SwarmResult::error(
                                verdict.error.unwrap_or_else(|| "verifier produced no decision".to_string()),
                                worker_result.meta,
                            )
                        }
                    };

                    swarm.publish(SwarmEvent::VerifierComplete { meta: verifier_meta, passed: decision.passed });

                    if decision.passed {
                        let info = VerifyInfo {
                            passed: true,
                            reasoning: decision.reasoning,
                            attempts: verify_attempt,
                            verify_meta: worker_meta,
                        };
                        return worker_result.with_verify(info);
                    }

                    if verify_attempt >= verify_cfg.max_attempts {
                        let mut result = SwarmResult::<S>::error(
                            format!("verify exhausted after {verify_attempt} attempts: {}", decision.reasoning),
                            worker_result.meta,
                        );
                        result.verify = Some(VerifyInfo {
                            passed: false,
                            reasoning: decision.reasoning,
                            attempts: verify_attempt,
                            verify_meta: worker_meta,
                        });
                        return result;
                    }

                    if let Some(feedback) = &decision.feedback {
                        current_prompt = format!("{current_prompt}\n\nVerifier feedback from the previous attempt:\n{feedback}");
                    }
                    verify_attempt += 1;
                }
            }
        },
        |result: &SwarmResult<S>| result.status == SwarmStatus::Error,
    )
    .await;

    outcome.value
}

fn verify_cfg_criteria(_cfg: &VerifyConfig) -> &'static str {
    "the worker's output is correct, complete, and internally consistent"
}

/// Run `n` independent candidates concurrently, then a judge that picks a
/// winner once every candidate has terminated. The judge runs under its
/// own fixed retry policy, independent of `retry` (which governs candidates
/// only).
#[allow(clippy::too_many_arguments)]
async fn run_best_of<S>(
    swarm: &Swarm,
    meta: BaseMeta,
    prompt: &str,
    context: &FileMap,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    retry: RetryConfig,
    cfg: &BestOfConfig,
    agent: Option<AgentType>,
    skills: &[String],
) -> SwarmResult<S>
where
    S: DeserializeOwned + Serialize,
{
    let candidate_skills = resolve_skills(&[&cfg.skills, skills]).to_vec();

    let candidate_futures = (0..cfg.n).map(|candidate_index| {
        let candidate_meta = BaseMeta::new(meta.operation_id.clone(), Operation::BestofCandidate, OperatorRole::Candidate)
            .with_candidate_index(candidate_index)
            .with_item_index(meta.item_index.unwrap_or_default());
        let candidate_skills = &candidate_skills;
        async move { run_plain::<S>(swarm, candidate_meta, prompt, context.clone(), schema, schema_mode, retry, agent, candidate_skills).await }
    });

    let candidates = join_all(candidate_futures).await;
    for candidate in &candidates {
        swarm.publish(SwarmEvent::CandidateComplete { meta: candidate.meta.clone(), status: candidate.status });
    }

    let judge_meta = BaseMeta::new(meta.operation_id.clone(), Operation::BestofJudge, OperatorRole::Judge)
        .with_item_index(meta.item_index.unwrap_or_default());
    let judge_schema = TypedSchema::<JudgeVerdict>::default();
    let judge_skills = resolve_skills(&[cfg.effective_judge_skills(), skills]).to_vec();
    let judge_retry = RetryConfig::new(2, 500);

    let candidates_summary: Vec<String> = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| match candidate.status {
            SwarmStatus::Success => format!(
                "Candidate {index}: {}",
                candidate.data.as_ref().and_then(|d| serde_json::to_string(d).ok()).unwrap_or_default()
            ),
            _ => format!("Candidate {index}: errored ({})", candidate.error.clone().unwrap_or_default()),
        })
        .collect();
    let judge_prompt = format!(
        "Pick the best candidate using this criteria: {}\n\n{}",
        cfg.judge_criteria,
        candidates_summary.join("\n\n")
    );

    let judge_outcome = retry_with_events(
        swarm,
        &judge_meta,
        judge_retry,
        |attempt| {
            let judge_meta = judge_meta.clone().with_error_retry(attempt - 1);
            swarm.run_attempt::<JudgeVerdict>(judge_meta, &judge_prompt, FileMap::new(), Some(&judge_schema), schema_mode, cfg.judge_agent.or(agent), &judge_skills)
        },
        |result: &SwarmResult<JudgeVerdict>| result.status == SwarmStatus::Error,
    )
    .await;

    let judge_result = judge_outcome.value;
    let Some(verdict) = judge_result.data else {
        return SwarmResult::error(
            judge_result.error.unwrap_or_else(|| "best_of judge failed to produce a verdict".to_string()),
            meta,
        );
    };

    swarm.publish(SwarmEvent::JudgeComplete { meta: judge_result.meta.clone(), winner_index: verdict.winner_index });

    let Some(winner) = candidates.into_iter().nth(verdict.winner_index) else {
        return SwarmResult::error(format!("judge chose out-of-range candidate {}", verdict.winner_index), meta);
    };

    winner.with_best_of(BestOfInfo { winner_index: verdict.winner_index, judge_reasoning: verdict.reasoning, judge_meta: judge_result.meta })
}

async fn run_unit<S>(
    swarm: &Swarm,
    meta: BaseMeta,
    prompt: &str,
    context: FileMap,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    options: &OperatorOptions,
    skills: &[String],
) -> SwarmResult<S>
where
    S: DeserializeOwned + Serialize,
{
    let retry = options.retry.unwrap_or_default();

    if let Some(best_of_cfg) = &options.best_of {
        return run_best_of(swarm, meta, prompt, &context, schema, schema_mode, retry, best_of_cfg, None, skills).await;
    }
    if let Some(verify_cfg) = &options.verify {
        return run_with_verify(swarm, meta, prompt, context, schema, schema_mode, retry, verify_cfg, None, skills).await;
    }
    run_plain(swarm, meta, prompt, context, schema, schema_mode, retry, None, skills).await
}

/// Run `prompt_for(item)` against every item in `items`, concurrently
/// bounded by the swarm's permits, returning one [`SwarmResult`] per item
/// in input order.
pub async fn map<Item, S>(
    swarm: &Swarm,
    items: Vec<Item>,
    prompt_for: impl Fn(&Item) -> String,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    options: &OperatorOptions,
) -> SwarmResultList<S>
where
    Item: Serialize,
    S: DeserializeOwned + Serialize,
{
    let operation_id = evolve_core::random_hex_id();
    let skills = resolve_skills(&[&options.skills, &swarm.config().default_skills]).to_vec();

    let futures = items.iter().enumerate().map(|(index, item)| {
        let meta = identify(BaseMeta::new(operation_id.clone(), Operation::Map, OperatorRole::Worker).with_item_index(index), swarm, options);
        let prompt = prompt_for(item);
        let context = item_context(serde_json::to_string_pretty(item).unwrap_or_default());
        let skills = &skills;
        async move { run_unit(swarm, meta, &prompt, context, schema, schema_mode, options, skills).await }
    });

    let results = join_all(futures).await;
    for result in &results {
        swarm.publish(SwarmEvent::WorkerComplete { meta: result.meta.clone(), status: result.status });
    }
    SwarmResultList { results }
}

/// Run `prompt_for(item)` against every item, then apply `condition` to
/// each successful result locally (no permit held) to decide whether it
/// passes the filter.
pub async fn filter<Item, S>(
    swarm: &Swarm,
    items: Vec<Item>,
    prompt_for: impl Fn(&Item) -> String,
    condition: impl Fn(&S) -> bool,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    options: &OperatorOptions,
) -> SwarmResultList<S>
where
    Item: Serialize,
    S: DeserializeOwned + Serialize,
{
    let operation_id = evolve_core::random_hex_id();
    let skills = resolve_skills(&[&options.skills, &swarm.config().default_skills]).to_vec();

    let futures = items.iter().enumerate().map(|(index, item)| {
        let meta = identify(BaseMeta::new(operation_id.clone(), Operation::Filter, OperatorRole::Worker).with_item_index(index), swarm, options);
        let prompt = prompt_for(item);
        let context = item_context(serde_json::to_string_pretty(item).unwrap_or_default());
        let skills = &skills;
        async move { run_unit::<S>(swarm, meta, &prompt, context, schema, schema_mode, options, skills).await }
    });

    let mut results = join_all(futures).await;
    for result in results.iter_mut() {
        if result.status == SwarmStatus::Success {
            let passes = result.data.as_ref().map(&condition).unwrap_or(false);
            if !passes {
                result.status = SwarmStatus::Filtered;
            }
        }
    }
    for result in &results {
        swarm.publish(SwarmEvent::WorkerComplete { meta: result.meta.clone(), status: result.status });
    }
    SwarmResultList { results }
}

/// Reduce every item in `items` to a single result in one session, each
/// item uploaded under `context/item_<index>/data.json`. `best_of` is not
/// supported for `reduce`; `verify` and plain retry both are.
pub async fn reduce<Item, S>(
    swarm: &Swarm,
    items: Vec<Item>,
    prompt: &str,
    schema: &(dyn SchemaDescriptor + Send + Sync),
    schema_mode: ValidationMode,
    options: &OperatorOptions,
) -> SwarmResult<S>
where
    Item: Serialize,
    S: DeserializeOwned + Serialize,
{
    let operation_id = evolve_core::random_hex_id();
    let skills = resolve_skills(&[&options.skills, &swarm.config().default_skills]).to_vec();
    let meta = identify(BaseMeta::new(operation_id, Operation::Reduce, OperatorRole::Worker), swarm, options);

    let mut context = FileMap::new();
    for (index, item) in items.iter().enumerate() {
        let json = serde_json::to_string_pretty(item).unwrap_or_default();
        context.insert(format!("item_{index}/data.json"), FileContent::text(json));
    }

    let retry = options.retry.unwrap_or_default();
    let result = if let Some(verify_cfg) = &options.verify {
        run_with_verify(swarm, meta, prompt, context, schema, schema_mode, retry, verify_cfg, None, &skills).await
    } else {
        run_plain(swarm, meta, prompt, context, schema, schema_mode, retry, None, &skills).await
    };

    swarm.publish(SwarmEvent::WorkerComplete { meta: result.meta.clone(), status: result.status });
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_capability::driver::AgentDriver;
    use evolve_mock::{MockAgentDriver, MockSandboxProvider, ScriptedRun};
    use std::sync::Arc;

    #[derive(Debug, Clone, serde::Deserialize, serde::Serialize, schemars::JsonSchema, PartialEq)]
    struct Item {
        value: u32,
    }

    /// A scripted run whose `output_files` actually carries `result.json`,
    /// the way a real agent leaves its result in the sandbox.
    fn scripted(json: &str) -> ScriptedRun {
        let mut files = FileMap::new();
        files.insert("result.json".to_string(), FileContent::text(json));
        ScriptedRun { exit_code: 0, stdout: json.to_string(), output_files: files }
    }

    fn swarm_scripted(scripts: Vec<ScriptedRun>, permits: usize) -> Swarm {
        let provider = Arc::new(MockSandboxProvider::new());
        let driver: Arc<dyn AgentDriver> = Arc::new(MockAgentDriver::with_provider(AgentType::Claude, scripts, provider.clone()));
        Swarm::new(provider, vec![driver], crate::template::SessionTemplate::default(), evolve_config::SwarmConfig { permits, ..Default::default() }).unwrap()
    }

    fn swarm_with(stdout_json: &str, permits: usize) -> Swarm {
        swarm_scripted(vec![scripted(stdout_json)], permits)
    }

    fn item_schema() -> evolve_validate::TypedSchema<Item> {
        evolve_validate::TypedSchema::default()
    }

    #[tokio::test]
    async fn map_runs_one_unit_per_item_in_order() {
        let swarm = swarm_with(r#"{"value": 1}"#, 2);
        let schema = item_schema();
        let options = OperatorOptions::default();
        let items = vec![1u32, 2, 3];
        let results: SwarmResultList<Item> =
            map(&swarm, items, |n| format!("produce {n}"), &schema, ValidationMode::default(), &options).await;
        assert_eq!(results.results.len(), 3);
        for (index, result) in results.results.iter().enumerate() {
            assert_eq!(result.meta.item_index, Some(index));
        }
    }

    #[tokio::test]
    async fn map_shares_one_operation_id_across_items() {
        let swarm = swarm_with(r#"{"value": 1}"#, 2);
        let schema = item_schema();
        let options = OperatorOptions::default();
        let results: SwarmResultList<Item> =
            map(&swarm, vec![1u32, 2], |n| format!("produce {n}"), &schema, ValidationMode::default(), &options).await;
        assert_eq!(results.results[0].meta.operation_id, results.results[1].meta.operation_id);
    }

    #[tokio::test]
    async fn filter_marks_rejected_items_as_filtered() {
        let swarm = swarm_with(r#"{"value": 1}"#, 2);
        let schema = item_schema();
        let options = OperatorOptions::default();
        let results: SwarmResultList<Item> = filter(
            &swarm,
            vec![1u32, 2],
            |n| format!("produce {n}"),
            |item: &Item| item.value > 10,
            &schema,
            ValidationMode::default(),
            &options,
        )
        .await;
        assert!(results.results.iter().all(|r| r.status == SwarmStatus::Filtered));
    }

    #[tokio::test]
    async fn verify_and_best_of_together_is_rejected_before_scheduling() {
        let verify = evolve_config::VerifyConfig::default();
        let best_of = evolve_config::BestOfConfig {
            n: 2,
            judge_criteria: "best".into(),
            judge_agent: None,
            skills: Vec::new(),
            judge_skills: Vec::new(),
        };
        let err = OperatorOptions::new(None, Some(verify), Some(best_of), None).unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::MutualExclusion);
    }

    #[tokio::test]
    async fn best_of_schedules_all_candidates_before_the_judge() {
        // Three candidate scripts, consumed in order by the three
        // concurrently-scheduled candidates; the fourth (judge) script is
        // whatever is left once the candidates have drained the queue.
        let swarm = swarm_scripted(
            vec![
                scripted(r#"{"value": 1}"#),
                scripted(r#"{"value": 2}"#),
                scripted(r#"{"value": 3}"#),
                scripted(r#"{"winner_index": 1, "reasoning": "highest value"}"#),
            ],
            4,
        );
        let schema = item_schema();
        let best_of = evolve_config::BestOfConfig {
            n: 3,
            judge_criteria: "highest value".into(),
            judge_agent: None,
            skills: Vec::new(),
            judge_skills: Vec::new(),
        };
        let options = OperatorOptions::new(None, None, Some(best_of), None).unwrap();
        let results: SwarmResultList<Item> =
            map(&swarm, vec![1u32], |n| format!("produce {n}"), &schema, ValidationMode::default(), &options).await;
        let result = &results.results[0];
        assert_eq!(result.status, SwarmStatus::Success);
        assert_eq!(result.data, Some(Item { value: 2 }));
        let best_of_info = result.best_of.as_ref().unwrap();
        assert_eq!(best_of_info.winner_index, 1);
    }

    #[tokio::test]
    async fn reduce_uploads_every_item_under_its_own_context_path() {
        let swarm = swarm_with(r#"{"value": 6}"#, 2);
        let schema = item_schema();
        let options = OperatorOptions::default();
        let result: SwarmResult<Item> =
            reduce(&swarm, vec![Item { value: 1 }, Item { value: 2 }], "sum these", &schema, ValidationMode::default(), &options).await;
        assert_eq!(result.status, SwarmStatus::Success);
    }

    #[tokio::test]
    async fn retry_then_success_recovers_after_a_transient_failure() {
        let swarm = swarm_scripted(vec![ScriptedRun::failing(1, "boom"), scripted(r#"{"value": 5}"#)], 2);
        let schema = item_schema();
        let options = OperatorOptions::new(Some(RetryConfig::new(2, 1)), None, None, None).unwrap();
        let results: SwarmResultList<Item> =
            map(&swarm, vec![1u32], |n| format!("produce {n}"), &schema, ValidationMode::default(), &options).await;
        let result = &results.results[0];
        assert_eq!(result.status, SwarmStatus::Success);
        assert_eq!(result.data, Some(Item { value: 5 }));
        assert_eq!(result.meta.error_retry, Some(1));
    }

    #[tokio::test]
    async fn verify_retry_appends_feedback_before_the_next_attempt() {
        let swarm = swarm_scripted(
            vec![
                scripted(r#"{"value": 5}"#),
                scripted(r#"{"passed": false, "reasoning": "needs more detail", "feedback": "add more detail"}"#),
                scripted(r#"{"value": 7}"#),
                scripted(r#"{"passed": true, "reasoning": "looks complete", "feedback": null}"#),
            ],
            2,
        );
        let schema = item_schema();
        let verify = evolve_config::VerifyConfig { max_attempts: 2, agent: None, skills: Vec::new() };
        let options = OperatorOptions::new(None, Some(verify), None, None).unwrap();
        let results: SwarmResultList<Item> =
            map(&swarm, vec![1u32], |n| format!("produce {n}"), &schema, ValidationMode::default(), &options).await;
        let result = &results.results[0];
        assert_eq!(result.status, SwarmStatus::Success);
        assert_eq!(result.data, Some(Item { value: 7 }));
        let verify_info = result.verify.as_ref().unwrap();
        assert!(verify_info.passed);
        assert_eq!(verify_info.attempts, 2);
    }
}
