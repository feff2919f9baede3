//! The Session Controller: one sandbox, one agent, serialised state
//! transitions behind an init-lock and a run-lock.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{DateTime, Utc};
use evolve_capability::driver::{AgentDriver, AgentEvent, AgentEventKind, ContentEvent};
use evolve_capability::sandbox::SandboxProvider;
use evolve_checkpoint::{FilesystemCheckpointStore, PutOptions};
use evolve_core::{
    AgentResponse, AgentState, AgentType, CheckpointInfo, LifecycleEvent, LifecycleReason, OutputResult,
    SandboxState, SessionStatus, ValidationMode, WorkspaceMode,
};
use evolve_cost::{CostClient, RunLookup};
use evolve_error::{EvolveError, Result};
use evolve_observe::bus::{ChannelBus, ChannelSubscription, SessionEvent};
use evolve_observe::log::ObservabilityLog;
use evolve_validate::SchemaDescriptor;
use evolve_workspace::McpServer;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify, OnceCell};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credential::{resolve_credential, Credential, CredentialProvider, ExplicitCredentials, NoCredentials};
use crate::options::{ExecOptions, RunOptions};

const DEFAULT_TIMEOUT_MS: u64 = 3_600_000;

/// Everything needed to construct a [`SessionController`], mirroring the
/// constructor arguments of the original SDK's top-level entry point.
pub struct SessionConfig {
    /// The coding-agent family this session drives.
    pub agent_type: AgentType,
    /// Working directory inside the sandbox.
    pub working_directory: String,
    /// Knowledge-work vs. software-engineering workspace layout.
    pub workspace_mode: WorkspaceMode,
    /// Caller-supplied system prompt, combined with the workspace preamble.
    pub system_prompt: Option<String>,
    /// Files uploaded to `context/` before the first run.
    pub context: evolve_core::FileMap,
    /// Files uploaded to the working directory before the first run.
    pub files: evolve_core::FileMap,
    /// MCP server configurations to materialize in the workspace.
    pub mcp_servers: Vec<McpServer>,
    /// An existing sandbox id to reconnect to, instead of booting fresh.
    pub sandbox_id: Option<String>,
    /// Semantic label prefix for the observability log and checkpoint tag;
    /// defaults to `"evolve"`.
    pub session_tag_prefix: Option<String>,
    /// Declared output schema, if any.
    pub schema: Option<Box<dyn SchemaDescriptor + Send + Sync>>,
    /// Validation strictness for the declared schema.
    pub schema_mode: ValidationMode,
    /// Model identifier recorded on auto-captured checkpoints.
    pub model: Option<String>,
    /// Checkpoint store, if checkpointing is enabled for this session.
    pub storage: Option<Arc<FilesystemCheckpointStore>>,
    /// Cost accounting client, if configured.
    pub cost_client: Option<Arc<dyn CostClient>>,
    /// Directory the observability `.jsonl` log is written under, if enabled.
    pub observability_dir: Option<std::path::PathBuf>,
    /// Credentials explicitly supplied by the caller.
    pub credentials: ExplicitCredentials,
    /// Environment-variable credential fallback strategy.
    pub credential_env: Arc<dyn CredentialProvider>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            agent_type: AgentType::Claude,
            working_directory: "/home/user/workspace".to_string(),
            workspace_mode: WorkspaceMode::Knowledge,
            system_prompt: None,
            context: evolve_core::FileMap::new(),
            files: evolve_core::FileMap::new(),
            mcp_servers: Vec::new(),
            sandbox_id: None,
            session_tag_prefix: None,
            schema: None,
            schema_mode: ValidationMode::default(),
            model: None,
            storage: None,
            cost_client: None,
            observability_dir: None,
            credentials: ExplicitCredentials::default(),
            credential_env: Arc::new(NoCredentials),
        }
    }
}

struct Inner {
    sandbox_id: Option<String>,
    sandbox_state: SandboxState,
    agent_state: AgentState,
    active_process_id: Option<String>,
    has_run: bool,
    last_run_started_at_ms: Option<i64>,
    last_checkpoint_id: Option<String>,
    restore_source_id: Option<String>,
    run_count: u64,
}

/// Single-sandbox, single-agent session controller.
///
/// Serialises `run()`/`execute_command()` behind a run-lock and boots the
/// sandbox/agent exactly once behind an init-lock. Lock order is fixed:
/// init-lock is acquired and released before the run-lock is ever taken;
/// the two never overlap.
pub struct SessionController {
    provider: Arc<dyn SandboxProvider>,
    driver: Arc<dyn AgentDriver>,
    config: SessionConfig,
    credential: Option<Credential>,
    session_tag: String,
    created_at: DateTime<Utc>,
    init_lock: AsyncMutex<bool>,
    run_lock: Arc<AsyncMutex<()>>,
    state: Arc<StdMutex<Inner>>,
    bus: Arc<ChannelBus>,
    log: Arc<OnceCell<ObservabilityLog>>,
    active_interrupt: StdMutex<Option<Arc<Notify>>>,
}

impl SessionController {
    /// Construct a new controller. Validates the credential combination
    /// eagerly; does not touch the sandbox or agent until the first call
    /// that requires them.
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        driver: Arc<dyn AgentDriver>,
        config: SessionConfig,
    ) -> Result<Self> {
        let credential = resolve_credential(&config.credentials, config.credential_env.as_ref(), config.agent_type)?;

        let prefix = config.session_tag_prefix.clone().unwrap_or_else(|| "evolve".to_string());
        let session_tag = format!("{prefix}-{}", evolve_core::random_hex_id());

        Ok(SessionController {
            provider,
            driver,
            credential,
            session_tag,
            created_at: Utc::now(),
            init_lock: AsyncMutex::new(false),
            run_lock: Arc::new(AsyncMutex::new(())),
            state: Arc::new(StdMutex::new(Inner {
                sandbox_id: config.sandbox_id.clone(),
                sandbox_state: SandboxState::Stopped,
                agent_state: AgentState::Idle,
                active_process_id: None,
                has_run: false,
                last_run_started_at_ms: None,
                last_checkpoint_id: None,
                restore_source_id: None,
                run_count: 0,
            })),
            bus: Arc::new(ChannelBus::new()),
            log: Arc::new(OnceCell::new()),
            active_interrupt: StdMutex::new(None),
            config,
        })
    }

    /// The credential resolved for this session, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Subscribe to every channel; filter by [`SessionEvent::channel`] to
    /// mirror `on(channel, callback)` registration at a higher layer. No
    /// events are buffered for a subscriber that registers late.
    pub fn subscribe(&self) -> ChannelSubscription {
        self.bus.subscribe()
    }

    /// The session tag in effect: `<prefix>-<16 hex chars>`.
    pub fn session_tag(&self) -> &str {
        &self.session_tag
    }

    /// When this controller was constructed.
    pub fn session_timestamp(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The checkpoint store backing this session, if storage was configured.
    pub fn storage(&self) -> Option<Arc<FilesystemCheckpointStore>> {
        self.config.storage.clone()
    }

    /// A consistent snapshot of sandbox/agent state.
    pub fn status(&self) -> SessionStatus {
        let inner = self.state.lock().unwrap();
        SessionStatus {
            sandbox_id: inner.sandbox_id.clone(),
            sandbox: inner.sandbox_state,
            agent: inner.agent_state,
            active_process_id: inner.active_process_id.clone(),
            has_run: inner.has_run,
            timestamp: Utc::now(),
        }
    }

    async fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.init_lock.lock().await;
        if *initialized {
            return Ok(());
        }

        let (sandbox_id, reason) = match &self.config.sandbox_id {
            Some(id) => {
                self.provider.resume(id).await?;
                debug!(target: "evolve.session", sandbox_id = %id, session_tag = %self.session_tag, "resumed bound sandbox");
                (id.clone(), LifecycleReason::SandboxConnected)
            }
            None => {
                let handle = self.provider.boot().await?;
                info!(target: "evolve.session", sandbox_id = %handle.sandbox_id, session_tag = %self.session_tag, "booted sandbox");
                (handle.sandbox_id, LifecycleReason::SandboxBoot)
            }
        };

        {
            let mut inner = self.state.lock().unwrap();
            inner.sandbox_id = Some(sandbox_id.clone());
            inner.sandbox_state = SandboxState::Ready;
        }
        self.emit_lifecycle(reason).await;
        if !matches!(reason, LifecycleReason::SandboxConnected) {
            self.emit_lifecycle(LifecycleReason::SandboxReady).await;
        }

        let plan = evolve_workspace::plan(
            self.config.workspace_mode,
            self.config.agent_type,
            self.config.system_prompt.as_deref(),
            &self.config.mcp_servers,
        );
        self.provider.upload_files(&sandbox_id, &self.config.working_directory, &plan.files).await?;

        if !self.config.context.is_empty() {
            let context_root = format!("{}/context", self.config.working_directory);
            self.provider.upload_files(&sandbox_id, &context_root, &self.config.context).await?;
        }
        if !self.config.files.is_empty() {
            self.provider.upload_files(&sandbox_id, &self.config.working_directory, &self.config.files).await?;
        }

        if let Some(dir) = &self.config.observability_dir {
            let log = ObservabilityLog::create(dir, &self.session_tag, self.config.agent_type).await?;
            // `ensure_initialized` only ever runs this branch once, guarded
            // by `init_lock` above, so `set` never races another writer.
            let _ = self.log.set(log);
        }

        *initialized = true;
        Ok(())
    }

    fn bound_sandbox_id(&self) -> Result<String> {
        self.state
            .lock()
            .unwrap()
            .sandbox_id
            .clone()
            .ok_or_else(|| EvolveError::Internal("session has no bound sandbox".into()))
    }

    async fn emit_lifecycle(&self, reason: LifecycleReason) {
        let (sandbox_id, sandbox, agent) = {
            let inner = self.state.lock().unwrap();
            (inner.sandbox_id.clone(), inner.sandbox_state, inner.agent_state)
        };
        let event = LifecycleEvent { sandbox_id, sandbox, agent, reason, timestamp: Utc::now() };
        if let Some(log) = self.log.get() {
            let _ = log.record_lifecycle(&event).await;
        }
        self.bus.publish(SessionEvent::Lifecycle(event));
    }

    /// Run the agent on `prompt`. Fails with `ConcurrentOperation` if
    /// another `run`/`execute_command` is already in flight.
    pub async fn run(&self, prompt: &str, opts: RunOptions) -> Result<AgentResponse> {
        self.ensure_initialized().await?;

        if opts.from_checkpoint.is_some() && self.config.sandbox_id.is_some() {
            return Err(EvolveError::MutualExclusion("from_checkpoint with a pre-bound sandbox_id"));
        }

        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| EvolveError::ConcurrentOperation("run"))?;

        let run_id = Uuid::new_v4();
        let sandbox_id = self.bound_sandbox_id()?;
        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        let mut restore_source_id = None;
        if let Some(checkpoint_ref) = &opts.from_checkpoint {
            let store = self
                .config
                .storage
                .as_ref()
                .ok_or_else(|| EvolveError::Internal("from_checkpoint requires storage".into()))?;
            let info = store.get(checkpoint_ref, None)?;
            let archive = store.download_archive(&info.id, None).await?;
            self.provider.restore(&sandbox_id, &archive).await?;
            restore_source_id = Some(info.id.clone());
        }

        let checkpoint_parent_id = {
            let mut inner = self.state.lock().unwrap();
            inner.agent_state = AgentState::Running;
            inner.active_process_id = Some(run_id.to_string());
            inner.last_run_started_at_ms = Some(Utc::now().timestamp_millis());
            if let Some(source) = restore_source_id {
                inner.restore_source_id = Some(source);
            }
            inner.restore_source_id.clone().or_else(|| inner.last_checkpoint_id.clone())
        };
        self.emit_lifecycle(LifecycleReason::RunStart).await;
        if let Some(log) = self.log.get() {
            let _ = log.record_prompt(prompt).await;
        }
        debug!(target: "evolve.session", %run_id, sandbox_id = %sandbox_id, background = opts.background, "starting run");

        if opts.background {
            let controller_bus = Arc::clone(&self.bus);
            let controller_log = Arc::clone(&self.log);
            let controller_state = Arc::clone(&self.state);
            let provider = Arc::clone(&self.provider);
            let driver = Arc::clone(&self.driver);
            let checkpoint_store = self.config.storage.clone();
            let agent_type = self.config.agent_type;
            let workspace_mode = self.config.workspace_mode;
            let model = self.config.model.clone();
            let session_tag = self.session_tag.clone();
            let prompt_owned = prompt.to_string();
            let sandbox_id_owned = sandbox_id.clone();
            let checkpoint_comment = opts.checkpoint_comment.clone();

            tokio::spawn(async move {
                let _guard = guard;
                let checkpoint_provider = Arc::clone(&provider);
                let outcome = drive_run(
                    provider,
                    driver,
                    &controller_bus,
                    controller_log.get(),
                    &sandbox_id_owned,
                    run_id,
                    &prompt_owned,
                    timeout_ms,
                    None,
                )
                .await;

                match outcome {
                    Ok(driver_outcome) if driver_outcome.exit_code == 0 => {
                        if let Some(store) = &checkpoint_store {
                            if let Ok(info) = auto_checkpoint(
                                &checkpoint_provider,
                                store,
                                &sandbox_id_owned,
                                &session_tag,
                                agent_type,
                                workspace_mode,
                                model,
                                checkpoint_comment,
                                checkpoint_parent_id,
                            )
                            .await
                            {
                                let mut inner = controller_state.lock().unwrap();
                                inner.last_checkpoint_id = Some(info.id);
                            }
                        }
                        {
                            let mut inner = controller_state.lock().unwrap();
                            inner.agent_state = AgentState::Idle;
                            inner.active_process_id = None;
                            inner.has_run = true;
                            inner.run_count += 1;
                        }
                        publish_lifecycle(&controller_bus, controller_log.get(), &sandbox_id_owned, LifecycleReason::RunBackgroundComplete).await;
                        debug!(target: "evolve.session", %run_id, sandbox_id = %sandbox_id_owned, "background run complete");
                    }
                    _ => {
                        {
                            let mut inner = controller_state.lock().unwrap();
                            inner.agent_state = AgentState::Idle;
                            inner.active_process_id = None;
                        }
                        warn!(target: "evolve.session", %run_id, sandbox_id = %sandbox_id_owned, "background run failed");
                        publish_lifecycle(&controller_bus, controller_log.get(), &sandbox_id_owned, LifecycleReason::RunBackgroundFailed).await;
                    }
                }
            });

            return Ok(AgentResponse {
                sandbox_id,
                run_id: Some(run_id),
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                checkpoint: None,
            });
        }

        let interrupt_notify = Arc::new(Notify::new());
        *self.active_interrupt.lock().unwrap() = Some(Arc::clone(&interrupt_notify));

        let outcome = drive_run(
            Arc::clone(&self.provider),
            Arc::clone(&self.driver),
            &self.bus,
            self.log.get(),
            &sandbox_id,
            run_id,
            prompt,
            timeout_ms,
            Some(interrupt_notify),
        )
        .await;

        *self.active_interrupt.lock().unwrap() = None;
        drop(guard);

        match outcome {
            Ok(driver_outcome) => {
                let mut checkpoint = None;
                if driver_outcome.exit_code == 0 {
                    if let Some(store) = &self.config.storage {
                        checkpoint = auto_checkpoint(
                            &self.provider,
                            store,
                            &sandbox_id,
                            &self.session_tag,
                            self.config.agent_type,
                            self.config.workspace_mode,
                            self.config.model.clone(),
                            opts.checkpoint_comment.clone(),
                            checkpoint_parent_id,
                        )
                        .await
                        .ok();
                    }
                }

                {
                    let mut inner = self.state.lock().unwrap();
                    inner.agent_state = AgentState::Idle;
                    inner.active_process_id = None;
                    inner.has_run = true;
                    inner.run_count += 1;
                    if let Some(info) = &checkpoint {
                        inner.last_checkpoint_id = Some(info.id.clone());
                    }
                }

                let reason = if driver_outcome.interrupted {
                    LifecycleReason::RunInterrupted
                } else if driver_outcome.exit_code == 0 {
                    LifecycleReason::RunComplete
                } else {
                    LifecycleReason::RunFailed
                };
                self.emit_lifecycle(reason).await;
                debug!(target: "evolve.session", %run_id, exit_code = driver_outcome.exit_code, "run finished");

                Ok(AgentResponse {
                    sandbox_id,
                    run_id: Some(run_id),
                    exit_code: driver_outcome.exit_code,
                    stdout: driver_outcome.stdout,
                    stderr: driver_outcome.stderr,
                    checkpoint,
                })
            }
            Err(e) => {
                {
                    let mut inner = self.state.lock().unwrap();
                    inner.agent_state = AgentState::Idle;
                    inner.active_process_id = None;
                }
                self.emit_lifecycle(LifecycleReason::RunFailed).await;
                warn!(target: "evolve.session", %run_id, error = %e, "run errored before completion");
                Err(e)
            }
        }
    }

    /// Execute a shell command directly, bypassing the agent.
    pub async fn execute_command(&self, command: &str, opts: ExecOptions) -> Result<AgentResponse> {
        self.ensure_initialized().await?;

        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| EvolveError::ConcurrentOperation("execute_command"))?;

        let sandbox_id = self.bound_sandbox_id()?;
        let timeout_ms = opts.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS);

        {
            let mut inner = self.state.lock().unwrap();
            inner.agent_state = AgentState::Running;
            inner.active_process_id = Some(command.to_string());
        }
        self.emit_lifecycle(LifecycleReason::CommandStart).await;

        if opts.background {
            let provider = Arc::clone(&self.provider);
            let bus = Arc::clone(&self.bus);
            let log = Arc::clone(&self.log);
            let state = Arc::clone(&self.state);
            let sandbox_id_owned = sandbox_id.clone();
            let command_owned = command.to_string();
            let cwd = opts.cwd.clone();
            let envs = opts.envs.clone();
            let user = opts.user.clone();

            tokio::spawn(async move {
                let _guard = guard;
                let result = provider
                    .execute_command(&sandbox_id_owned, &command_owned, cwd.as_deref(), Some(&envs), user.as_deref(), timeout_ms)
                    .await;
                let reason = match &result {
                    Ok(outcome) if outcome.exit_code == 0 => LifecycleReason::CommandBackgroundComplete,
                    _ => LifecycleReason::CommandBackgroundFailed,
                };
                {
                    let mut inner = state.lock().unwrap();
                    inner.agent_state = AgentState::Idle;
                    inner.active_process_id = None;
                }
                publish_lifecycle(&bus, log.get(), &sandbox_id_owned, reason).await;
            });

            return Ok(AgentResponse {
                sandbox_id,
                run_id: None,
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                checkpoint: None,
            });
        }

        let result = self
            .provider
            .execute_command(&sandbox_id, command, opts.cwd.as_deref(), Some(&opts.envs), opts.user.as_deref(), timeout_ms)
            .await;

        {
            let mut inner = self.state.lock().unwrap();
            inner.agent_state = AgentState::Idle;
            inner.active_process_id = None;
        }
        drop(guard);

        match result {
            Ok(outcome) => {
                let reason = if outcome.exit_code == 0 { LifecycleReason::CommandComplete } else { LifecycleReason::CommandFailed };
                self.emit_lifecycle(reason).await;
                Ok(AgentResponse {
                    sandbox_id,
                    run_id: None,
                    exit_code: outcome.exit_code,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                    checkpoint: None,
                })
            }
            Err(e) => {
                self.emit_lifecycle(LifecycleReason::CommandFailed).await;
                Err(e)
            }
        }
    }

    /// Upload files to `context/` immediately.
    pub async fn upload_context(&self, files: evolve_core::FileMap) -> Result<()> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        let root = format!("{}/context", self.config.working_directory);
        self.provider.upload_files(&sandbox_id, &root, &files).await
    }

    /// Upload files to the working directory immediately.
    pub async fn upload_files(&self, files: evolve_core::FileMap) -> Result<()> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        self.provider.upload_files(&sandbox_id, &self.config.working_directory, &files).await
    }

    /// Upload a local host directory to the sandbox. `remote_path` is
    /// resolved relative to the working directory unless absolute;
    /// defaults to the working directory itself.
    pub async fn upload_dir(&self, local_path: &str, remote_path: Option<&str>, recursive: bool) -> Result<()> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        let root = match remote_path {
            Some(p) => join_path(&self.config.working_directory, p),
            None => self.config.working_directory.clone(),
        };
        let files = collect_local_files(std::path::Path::new(local_path), recursive).await?;
        self.provider.upload_files(&sandbox_id, &root, &files).await
    }

    /// Download a sandbox directory to a local host path. `remote_path` is
    /// resolved relative to the working directory unless absolute.
    pub async fn download_dir(&self, remote_path: &str, local_path: &str, recursive: bool) -> Result<()> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        let root = join_path(&self.config.working_directory, remote_path);
        let files = self.provider.download_dir(&sandbox_id, &root).await?;
        write_local_files(std::path::Path::new(local_path), &files, recursive).await
    }

    /// Read a single file's contents.
    pub async fn read_file(&self, path: &str) -> Result<evolve_core::FileMap> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        self.provider.read_file(&sandbox_id, path).await
    }

    /// Files under `output/` modified since the start of the last `run()`,
    /// with the declared schema applied to `result.json` if present.
    pub async fn get_output_files(&self, recursive: bool) -> Result<OutputResult<Value>> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        let since_ms = self.state.lock().unwrap().last_run_started_at_ms.unwrap_or(0);
        let root = format!("{}/output", self.config.working_directory);
        let mut files = self.provider.download_files_since(&sandbox_id, &root, since_ms).await?;
        if !recursive {
            files.retain(|path, _| !path.contains('/'));
        }

        let Some(descriptor) = &self.config.schema else {
            return Ok(OutputResult::files_only(files));
        };

        match files.get("result.json") {
            None => Ok(OutputResult::invalid(files, "schema provided but agent did not create output/result.json", "")),
            Some(content) => {
                let raw = content.as_text_lossy();
                match evolve_validate::validate::<Value>(&raw, descriptor.as_ref(), self.config.schema_mode) {
                    Ok(data) => Ok(OutputResult::validated(files, data)),
                    Err(e) => Ok(OutputResult::invalid(files, e.to_string(), raw)),
                }
            }
        }
    }

    /// Capture an explicit checkpoint of the current sandbox state.
    pub async fn checkpoint(&self, comment: Option<String>) -> Result<CheckpointInfo> {
        self.ensure_initialized().await?;
        let sandbox_id = self.bound_sandbox_id()?;
        let store = self
            .config
            .storage
            .as_ref()
            .ok_or_else(|| EvolveError::Internal("checkpoint requires storage".into()))?;
        let parent_id = self.state.lock().unwrap().last_checkpoint_id.clone();
        let info = auto_checkpoint(
            &self.provider,
            store,
            &sandbox_id,
            &self.session_tag,
            self.config.agent_type,
            self.config.workspace_mode,
            self.config.model.clone(),
            comment,
            parent_id,
        )
        .await?;
        self.state.lock().unwrap().last_checkpoint_id = Some(info.id.clone());
        Ok(info)
    }

    /// List checkpoints, newest-first, optionally scoped to `tag`.
    /// Requires storage but not a running sandbox.
    pub fn list_checkpoints(&self, limit: Option<usize>, tag: Option<String>) -> Result<(Vec<CheckpointInfo>, bool)> {
        let store = self
            .config
            .storage
            .as_ref()
            .ok_or_else(|| EvolveError::Internal("list_checkpoints requires storage".into()))?;
        Ok(store.list(&evolve_checkpoint::ListFilter { tag, limit }))
    }

    /// Suspend the sandbox without destroying it.
    pub async fn pause(&self) -> Result<()> {
        let sandbox_id = self.bound_sandbox_id()?;
        self.provider.pause(&sandbox_id).await?;
        self.state.lock().unwrap().sandbox_state = SandboxState::Paused;
        self.emit_lifecycle(LifecycleReason::SandboxPause).await;
        Ok(())
    }

    /// Resume a paused sandbox.
    pub async fn resume(&self) -> Result<()> {
        let sandbox_id = self.bound_sandbox_id()?;
        self.provider.resume(&sandbox_id).await?;
        self.state.lock().unwrap().sandbox_state = SandboxState::Ready;
        self.emit_lifecycle(LifecycleReason::SandboxResume).await;
        Ok(())
    }

    /// Terminate the sandbox. Idempotent: killing a session with no bound
    /// sandbox, or one already killed, returns `Ok(())`.
    pub async fn kill(&self) -> Result<()> {
        let sandbox_id = { self.state.lock().unwrap().sandbox_id.clone() };
        let Some(sandbox_id) = sandbox_id else { return Ok(()) };
        self.provider.kill(&sandbox_id).await?;
        self.state.lock().unwrap().sandbox_state = SandboxState::Killed;
        self.emit_lifecycle(LifecycleReason::SandboxKilled).await;
        info!(target: "evolve.session", sandbox_id = %sandbox_id, "sandbox killed");
        Ok(())
    }

    /// Signal the in-flight process to stop. Returns `true` iff something
    /// was actually running and signalled.
    pub async fn interrupt(&self) -> Result<bool> {
        let sandbox_id = { self.state.lock().unwrap().sandbox_id.clone() };
        let Some(sandbox_id) = sandbox_id else { return Ok(false) };
        if self.state.lock().unwrap().agent_state != AgentState::Running {
            return Ok(false);
        }
        let signalled = self.provider.interrupt(&sandbox_id).await?;
        if signalled {
            if let Some(notify) = self.active_interrupt.lock().unwrap().as_ref() {
                notify.notify_one();
            }
        }
        Ok(signalled)
    }

    /// Resolve a host URL for a port exposed by the sandbox.
    pub async fn get_host(&self, port: u16) -> Result<String> {
        let sandbox_id = self.bound_sandbox_id()?;
        self.provider.get_host(&sandbox_id, port).await
    }

    /// Cost attribution for a single run, by id or 1-based (possibly
    /// negative) index.
    pub async fn get_run_cost(&self, lookup: RunLookup) -> Result<evolve_core::RunCost> {
        lookup.validate()?;
        let client = self
            .config
            .cost_client
            .as_ref()
            .ok_or_else(|| EvolveError::Internal("no cost client configured".into()))?;
        client.get_run_cost(&self.session_tag, lookup).await
    }

    /// Cost attribution across the whole session so far.
    pub async fn get_session_cost(&self) -> Result<evolve_core::SessionCost> {
        let client = self
            .config
            .cost_client
            .as_ref()
            .ok_or_else(|| EvolveError::Internal("no cost client configured".into()))?;
        client.get_session_cost(&self.session_tag).await
    }
}

fn join_path(base: &str, relative: &str) -> String {
    if relative.starts_with('/') {
        relative.to_string()
    } else {
        format!("{base}/{relative}")
    }
}

/// Read a local host directory into a [`FileMap`], keyed by path relative to
/// `root`. Binary files are base64-encoded; everything else is read as UTF-8.
async fn collect_local_files(root: &std::path::Path, recursive: bool) -> Result<evolve_core::FileMap> {
    let mut files = evolve_core::FileMap::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                if recursive {
                    stack.push(path);
                }
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            let bytes = tokio::fs::read(&path).await?;
            let content = match String::from_utf8(bytes) {
                Ok(text) => evolve_core::FileContent::Text { content: text },
                Err(err) => evolve_core::FileContent::Base64 {
                    content: evolve_core::encode_base64(&err.into_bytes()),
                },
            };
            files.insert(relative, content);
        }
    }
    Ok(files)
}

/// Write a [`FileMap`] out under a local host directory, creating parent
/// directories as needed. Entries whose path contains a nested directory
/// component are skipped unless `recursive` is set.
async fn write_local_files(root: &std::path::Path, files: &evolve_core::FileMap, recursive: bool) -> Result<()> {
    for (relative, content) in files {
        if !recursive && relative.contains('/') {
            continue;
        }
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = match content {
            evolve_core::FileContent::Text { content } => content.clone().into_bytes(),
            evolve_core::FileContent::Base64 { content } => {
                evolve_core::decode_base64(content).unwrap_or_default()
            }
        };
        tokio::fs::write(&path, bytes).await?;
    }
    Ok(())
}

struct RunOutcome {
    exit_code: i32,
    stdout: String,
    stderr: String,
    interrupted: bool,
}

#[allow(clippy::too_many_arguments)]
async fn drive_run(
    provider: Arc<dyn SandboxProvider>,
    driver: Arc<dyn AgentDriver>,
    bus: &ChannelBus,
    log: Option<&ObservabilityLog>,
    sandbox_id: &str,
    _run_id: Uuid,
    prompt: &str,
    timeout_ms: u64,
    interrupt_notify: Option<Arc<Notify>>,
) -> Result<RunOutcome> {
    let (events_tx, mut events_rx) = mpsc::channel::<AgentEvent>(256);

    let sandbox_id_owned = sandbox_id.to_string();
    let prompt_owned = prompt.to_string();
    let mut driver_handle = tokio::spawn(async move { driver.run(&sandbox_id_owned, &prompt_owned, timeout_ms, events_tx).await });

    let mut stdout_acc = String::new();
    let mut stderr_acc = String::new();
    let mut interrupted = false;

    loop {
        tokio::select! {
            ev = events_rx.recv() => {
                match ev {
                    Some(ev) => forward_event(bus, log, ev, &mut stdout_acc, &mut stderr_acc).await,
                    None => break,
                }
            }
            _ = notify_or_pending(&interrupt_notify) => {
                interrupted = true;
                let _ = provider_interrupt(&provider, sandbox_id).await;
            }
            res = &mut driver_handle => {
                let outcome = res.map_err(|e| EvolveError::Internal(format!("agent driver task panicked: {e}")))??;
                drain_remaining(bus, log, &mut events_rx, &mut stdout_acc, &mut stderr_acc).await;
                return Ok(RunOutcome {
                    exit_code: outcome.exit_code,
                    stdout: if outcome.stdout.is_empty() { stdout_acc } else { outcome.stdout },
                    stderr: if outcome.stderr.is_empty() { stderr_acc } else { outcome.stderr },
                    interrupted,
                });
            }
        }
    }

    let outcome = driver_handle
        .await
        .map_err(|e| EvolveError::Internal(format!("agent driver task panicked: {e}")))??;
    Ok(RunOutcome {
        exit_code: outcome.exit_code,
        stdout: if outcome.stdout.is_empty() { stdout_acc } else { outcome.stdout },
        stderr: if outcome.stderr.is_empty() { stderr_acc } else { outcome.stderr },
        interrupted,
    })
}

async fn notify_or_pending(notify: &Option<Arc<Notify>>) {
    match notify {
        Some(n) => n.notified().await,
        None => std::future::pending::<()>().await,
    }
}

async fn provider_interrupt(provider: &Arc<dyn SandboxProvider>, sandbox_id: &str) -> Result<bool> {
    provider.interrupt(sandbox_id).await
}

async fn drain_remaining(
    bus: &ChannelBus,
    log: Option<&ObservabilityLog>,
    rx: &mut mpsc::Receiver<AgentEvent>,
    stdout_acc: &mut String,
    stderr_acc: &mut String,
) {
    while let Some(ev) = rx.recv().await {
        forward_event(bus, log, ev, stdout_acc, stderr_acc).await;
    }
}

async fn forward_event(
    bus: &ChannelBus,
    log: Option<&ObservabilityLog>,
    event: AgentEvent,
    stdout_acc: &mut String,
    stderr_acc: &mut String,
) {
    match event.kind {
        AgentEventKind::Stdout(chunk) => {
            stdout_acc.push_str(&chunk);
            if let Some(log) = log {
                let _ = log.record_stdout(&chunk).await;
            }
            bus.publish(SessionEvent::Stdout(chunk));
        }
        AgentEventKind::Stderr(chunk) => {
            stderr_acc.push_str(&chunk);
            if let Some(log) = log {
                let _ = log.record_stderr(&chunk).await;
            }
            bus.publish(SessionEvent::Stderr(chunk));
        }
        AgentEventKind::Content(content) => {
            let value = content_event_to_json(&content);
            if let Some(log) = log {
                let _ = log.record_content(&value).await;
            }
            bus.publish(SessionEvent::Content(value));
        }
    }
}

fn content_event_to_json(event: &ContentEvent) -> Value {
    match event {
        ContentEvent::AgentMessageChunk { text } => json!({ "sessionUpdate": "agent_message_chunk", "text": text }),
        ContentEvent::AgentThoughtChunk { text } => json!({ "sessionUpdate": "agent_thought_chunk", "text": text }),
        ContentEvent::ToolCall { name, id } => json!({ "sessionUpdate": "tool_call", "name": name, "id": id }),
        ContentEvent::ToolCallUpdate { id, status } => json!({ "sessionUpdate": "tool_call_update", "id": id, "status": status }),
        ContentEvent::Plan { steps } => json!({ "sessionUpdate": "plan", "steps": steps }),
    }
}

async fn publish_lifecycle(bus: &ChannelBus, log: Option<&ObservabilityLog>, sandbox_id: &str, reason: LifecycleReason) {
    let event = LifecycleEvent {
        sandbox_id: Some(sandbox_id.to_string()),
        sandbox: SandboxState::Ready,
        agent: AgentState::Idle,
        reason,
        timestamp: Utc::now(),
    };
    if let Some(log) = log {
        let _ = log.record_lifecycle(&event).await;
    }
    bus.publish(SessionEvent::Lifecycle(event));
}

#[allow(clippy::too_many_arguments)]
async fn auto_checkpoint(
    provider: &Arc<dyn SandboxProvider>,
    store: &Arc<FilesystemCheckpointStore>,
    sandbox_id: &str,
    session_tag: &str,
    agent_type: AgentType,
    workspace_mode: WorkspaceMode,
    model: Option<String>,
    comment: Option<String>,
    parent_id: Option<String>,
) -> Result<CheckpointInfo> {
    let archive = provider.snapshot(sandbox_id).await?;
    store
        .put(&archive, session_tag, agent_type, workspace_mode, PutOptions { parent_id, comment, model })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use evolve_capability::driver::DriverOutcome;
    use evolve_core::files::FileContent;
    use evolve_mock::{MockAgentDriver, MockSandboxProvider};
    use evolve_validate::RawSchema;
    use std::time::Duration;

    fn controller(driver: Arc<dyn AgentDriver>, config: SessionConfig) -> SessionController {
        SessionController::new(Arc::new(MockSandboxProvider::new()), driver, config).unwrap()
    }

    #[tokio::test]
    async fn run_boots_sandbox_and_returns_exit_code() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());

        let response = session.run("do the thing", RunOptions::default()).await.unwrap();

        assert_eq!(response.exit_code, 0);
        assert_eq!(response.stdout, "done");
        assert!(session.status().has_run);
        assert_eq!(session.status().sandbox, SandboxState::Ready);
    }

    #[tokio::test]
    async fn second_ensure_initialized_does_not_reboot() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());

        session.run("first", RunOptions::default()).await.unwrap();
        let sandbox_after_first = session.status().sandbox_id;
        session.run("second", RunOptions::default()).await.unwrap();
        assert_eq!(session.status().sandbox_id, sandbox_after_first);
    }

    struct SlowDriver {
        inner: MockAgentDriver,
        delay: Duration,
    }

    #[async_trait]
    impl AgentDriver for SlowDriver {
        fn agent_type(&self) -> AgentType {
            self.inner.agent_type()
        }

        async fn run(
            &self,
            sandbox_id: &str,
            prompt: &str,
            timeout_ms: u64,
            events_tx: mpsc::Sender<AgentEvent>,
        ) -> Result<DriverOutcome> {
            tokio::time::sleep(self.delay).await;
            self.inner.run(sandbox_id, prompt, timeout_ms, events_tx).await
        }

        async fn interrupt(&self, sandbox_id: &str) -> Result<bool> {
            self.inner.interrupt(sandbox_id).await
        }
    }

    #[tokio::test]
    async fn concurrent_run_is_rejected() {
        let driver = Arc::new(SlowDriver {
            inner: MockAgentDriver::always_ok(AgentType::Claude, "done"),
            delay: Duration::from_millis(150),
        });
        let session = Arc::new(controller(driver, SessionConfig::default()));

        let first_session = Arc::clone(&session);
        let first = tokio::spawn(async move { first_session.run("first", RunOptions::default()).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        let err = session.run("second", RunOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::ConcurrentOperation);

        first.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn checkpoint_is_auto_captured_after_successful_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FilesystemCheckpointStore::open(dir.path()).await.unwrap());
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let config = SessionConfig { storage: Some(Arc::clone(&store)), ..SessionConfig::default() };
        let session = controller(driver, config);

        let response = session.run("do the thing", RunOptions::default()).await.unwrap();

        assert!(response.checkpoint.is_some());
        let (entries, _) = session.list_checkpoints(None, None).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_without_storage_errors() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());
        let err = session.checkpoint(None).await.unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::InternalError);
    }

    #[tokio::test]
    async fn get_output_files_validates_against_declared_schema() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let schema = RawSchema(json!({
            "type": "object",
            "properties": { "count": {"type": "integer"} },
            "required": ["count"]
        }));
        let config = SessionConfig { schema: Some(Box::new(schema)), ..SessionConfig::default() };
        let session = controller(driver, config);

        let mut seed = evolve_core::FileMap::new();
        seed.insert("output/result.json".into(), FileContent::text(r#"{"count": 3}"#));
        session.upload_files(seed).await.unwrap();

        session.run("do the thing", RunOptions::default()).await.unwrap();

        let result = session.get_output_files(false).await.unwrap();
        assert_eq!(result.data.unwrap()["count"], 3);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn get_output_files_excludes_nested_paths_unless_recursive() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());

        let mut seed = evolve_core::FileMap::new();
        seed.insert("output/top.txt".into(), FileContent::text("top"));
        seed.insert("output/nested/deep.txt".into(), FileContent::text("deep"));
        session.upload_files(seed).await.unwrap();

        session.run("do the thing", RunOptions::default()).await.unwrap();

        let shallow = session.get_output_files(false).await.unwrap();
        assert!(shallow.files.contains_key("top.txt"));
        assert!(!shallow.files.contains_key("nested/deep.txt"));

        let deep = session.get_output_files(true).await.unwrap();
        assert!(deep.files.contains_key("top.txt"));
        assert!(deep.files.contains_key("nested/deep.txt"));
    }

    #[tokio::test]
    async fn upload_dir_reads_local_files_into_the_sandbox() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());

        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("a.txt"), "hello").unwrap();
        std::fs::create_dir(local.path().join("sub")).unwrap();
        std::fs::write(local.path().join("sub/b.txt"), "nested").unwrap();

        session.upload_dir(local.path().to_str().unwrap(), None, true).await.unwrap();

        let remote_path = format!("{}/sub/b.txt", SessionConfig::default().working_directory);
        let files = session.read_file(&remote_path).await.unwrap();
        assert_eq!(files.get(&remote_path).unwrap().as_text_lossy(), "nested");
    }

    #[tokio::test]
    async fn download_dir_writes_sandbox_files_to_the_local_host() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());

        let mut seed = evolve_core::FileMap::new();
        seed.insert("results/a.txt".into(), FileContent::text("hello"));
        session.upload_files(seed).await.unwrap();

        let local = tempfile::tempdir().unwrap();
        session.download_dir("results", local.path().to_str().unwrap(), true).await.unwrap();

        let contents = std::fs::read_to_string(local.path().join("a.txt")).unwrap();
        assert_eq!(contents, "hello");
    }

    #[tokio::test]
    async fn execute_command_runs_against_booted_sandbox() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "unused"));
        let session = controller(driver, SessionConfig::default());
        let response = session.execute_command("echo hi", ExecOptions::default()).await.unwrap();
        assert_eq!(response.exit_code, 0);
        assert!(response.run_id.is_none());
    }

    #[tokio::test]
    async fn interrupt_on_idle_session_returns_false() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());
        session.run("warm up", RunOptions::default()).await.unwrap();
        assert!(!session.interrupt().await.unwrap());
    }

    #[tokio::test]
    async fn kill_with_no_bound_sandbox_is_a_no_op() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let session = controller(driver, SessionConfig::default());
        session.kill().await.unwrap();
    }

    #[tokio::test]
    async fn run_from_checkpoint_with_bound_sandbox_id_is_rejected() {
        let driver = Arc::new(MockAgentDriver::always_ok(AgentType::Claude, "done"));
        let config = SessionConfig { sandbox_id: Some("preexisting".into()), ..SessionConfig::default() };
        let provider = Arc::new(MockSandboxProvider::new());
        provider.seed("preexisting", evolve_core::FileMap::new());
        let session = SessionController::new(provider, driver, config).unwrap();

        let opts = RunOptions { from_checkpoint: Some("latest".into()), ..RunOptions::default() };
        let err = session.run("go", opts).await.unwrap_err();
        assert_eq!(err.kind(), evolve_error::ErrorKind::MutualExclusion);
    }
}
