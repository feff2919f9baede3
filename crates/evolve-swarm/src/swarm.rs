//! The swarm: a shared concurrency bound plus the machinery every
//! composition operator runs a unit through.

use std::sync::Arc;

use evolve_capability::driver::AgentDriver;
use evolve_capability::sandbox::SandboxProvider;
use evolve_config::SwarmConfig;
use evolve_core::{AgentType, BaseMeta, FileMap, SwarmResult};
use evolve_error::{EvolveError, Result};
use evolve_session::{RunOptions, SessionController};
use evolve_validate::SchemaDescriptor;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use crate::events::{SwarmEvent, SwarmEventBus, SwarmEventSubscription};
use crate::template::SessionTemplate;

/// Bounds total parallelism across every unit scheduled on it, and owns
/// the capability seams (`SandboxProvider`, `AgentDriver`s) and session
/// defaults every operator call builds ephemeral sessions from.
pub struct Swarm {
    provider: Arc<dyn SandboxProvider>,
    drivers: Vec<Arc<dyn AgentDriver>>,
    template: SessionTemplate,
    config: SwarmConfig,
    semaphore: Arc<Semaphore>,
    bus: Arc<SwarmEventBus>,
}

impl Swarm {
    /// Construct a swarm. `drivers` must contain at least one driver; the
    /// first one is used as the fallback when an operator call requests an
    /// agent family with no matching driver.
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        drivers: Vec<Arc<dyn AgentDriver>>,
        template: SessionTemplate,
        config: SwarmConfig,
    ) -> Result<Self> {
        config.validate()?;
        if drivers.is_empty() {
            return Err(EvolveError::Internal("swarm requires at least one agent driver".into()));
        }
        Ok(Swarm {
            provider,
            drivers,
            template,
            semaphore: Arc::new(Semaphore::new(config.permits)),
            config,
            bus: Arc::new(SwarmEventBus::new()),
        })
    }

    /// The swarm's validated configuration.
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Subscribe to every [`SwarmEvent`] this swarm publishes.
    pub fn subscribe(&self) -> SwarmEventSubscription {
        self.bus.subscribe()
    }

    pub(crate) fn publish(&self, event: SwarmEvent) {
        self.bus.publish(event);
    }

    fn driver_for(&self, agent_type: AgentType) -> Arc<dyn AgentDriver> {
        self.drivers
            .iter()
            .find(|d| d.agent_type() == agent_type)
            .cloned()
            .unwrap_or_else(|| Arc::clone(&self.drivers[0]))
    }

    fn build_session(&self, context: FileMap, agent_override: Option<AgentType>, skills: &[String]) -> Result<SessionController> {
        let config = self.template.build_config(context, agent_override, skills);
        let driver = self.driver_for(config.agent_type);
        SessionController::new(Arc::clone(&self.provider), driver, config)
    }

    /// Run a single attempt of one unit: build an ephemeral session, run
    /// `prompt`, download and (if `schema` is set) validate its output,
    /// then kill the sandbox. Returns a `SwarmResult` that is never a
    /// propagated `Err` — failures at any step are captured as
    /// `status = "error"`, per the "expected failures are data" design.
    pub async fn run_attempt<S>(
        &self,
        meta: BaseMeta,
        prompt: &str,
        context: FileMap,
        schema: Option<&(dyn SchemaDescriptor + Send + Sync)>,
        schema_mode: evolve_core::ValidationMode,
        agent_override: Option<AgentType>,
        skills: &[String],
    ) -> SwarmResult<S>
    where
        S: DeserializeOwned,
    {
        let session = match self.build_session(context, agent_override, skills) {
            Ok(session) => session,
            Err(e) => return SwarmResult::error(e.to_string(), meta),
        };

        let result = self.run_attempt_on(&session, meta.clone(), prompt, schema, schema_mode).await;
        let _ = session.kill().await;
        result
    }

    async fn run_attempt_on<S>(
        &self,
        session: &SessionController,
        meta: BaseMeta,
        prompt: &str,
        schema: Option<&(dyn SchemaDescriptor + Send + Sync)>,
        schema_mode: evolve_core::ValidationMode,
    ) -> SwarmResult<S>
    where
        S: DeserializeOwned,
    {
        let response = match session.run(prompt, RunOptions::default()).await {
            Ok(response) => response,
            Err(e) => return SwarmResult::error(e.to_string(), meta),
        };

        if response.exit_code != 0 {
            let detail = if response.stderr.is_empty() { response.stdout } else { response.stderr };
            return SwarmResult::error(format!("agent exited with code {}: {detail}", response.exit_code), meta);
        }

        let output = match session.get_output_files(false).await {
            Ok(output) => output,
            Err(e) => return SwarmResult::error(e.to_string(), meta),
        };

        let Some(descriptor) = schema else {
            return SwarmResult {
                status: evolve_core::SwarmStatus::Error,
                data: None,
                files: output.files,
                sandbox_id: Some(response.sandbox_id),
                error: Some("map/filter/reduce require a declared schema".to_string()),
                raw_data: None,
                meta,
                verify: None,
                best_of: None,
            };
        };

        let Some(result_file) = output.files.get("result.json") else {
            return SwarmResult {
                status: evolve_core::SwarmStatus::Error,
                data: None,
                files: output.files,
                sandbox_id: Some(response.sandbox_id),
                error: Some("schema provided but agent did not create output/result.json".to_string()),
                raw_data: None,
                meta,
                verify: None,
                best_of: None,
            };
        };

        let raw = result_file.as_text_lossy();
        match evolve_validate::validate::<S>(&raw, descriptor, schema_mode) {
            Ok(data) => SwarmResult::success(data, output.files, Some(response.sandbox_id), meta),
            Err(e) => SwarmResult {
                status: evolve_core::SwarmStatus::Error,
                data: None,
                files: output.files,
                sandbox_id: Some(response.sandbox_id),
                error: Some(e.to_string()),
                raw_data: Some(raw),
                meta,
                verify: None,
                best_of: None,
            },
        }
    }

    /// Acquire one concurrency permit. The retry/event-aware wrapper around
    /// this (holding the permit across an attempt, releasing it for the
    /// backoff sleep between attempts) lives in
    /// [`crate::operators`], which also needs to publish `ItemRetry`
    /// between attempts.
    pub async fn acquire_permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        Arc::clone(&self.semaphore).acquire_owned().await.expect("swarm semaphore never closes")
    }

    /// Current number of available permits, for tests asserting the
    /// concurrency bound.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_core::{Operation, OperatorRole};
    use evolve_mock::{MockAgentDriver, MockSandboxProvider};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn swarm(permits: usize) -> Swarm {
        let provider = Arc::new(MockSandboxProvider::new());
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        Swarm::new(provider, vec![driver], SessionTemplate::default(), SwarmConfig { permits, ..SwarmConfig::default() }).unwrap()
    }

    #[tokio::test]
    async fn run_attempt_with_no_schema_errors() {
        let swarm = swarm(1);
        let meta = BaseMeta::new("abc", Operation::Map, OperatorRole::Worker);
        let result: SwarmResult<serde_json::Value> =
            swarm.run_attempt(meta, "hi", FileMap::new(), None, evolve_core::ValidationMode::default(), None, &[]).await;
        assert_eq!(result.status, evolve_core::SwarmStatus::Error);
    }

    #[tokio::test]
    async fn observed_concurrency_never_exceeds_permits() {
        let swarm = Arc::new(swarm(2));
        let max_observed = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let permit_fut = swarm.acquire_permit();
            let in_flight = Arc::clone(&in_flight);
            let max_observed = Arc::clone(&max_observed);
            handles.push(tokio::spawn(async move {
                let _permit = permit_fut.await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_observed.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
