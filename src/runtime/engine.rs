use std::collections::HashMap;
use std::sync::Arc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use crate::compiler::core::Compiler;
use crate::config::{Conventions, EngineConfig};
use crate::dsl::{Direction, Process};
use crate::error::{EngineError, ExecutionError};
use crate::handlers::{ActivityHandler, HandlerCall, HandlerOutcome};
use crate::runtime::activation::{Activation, ActivationReason};
use crate::runtime::blueprint::{Blueprint, BlueprintSocket, SocketRef};
use crate::runtime::context::{Lifecycle, TokenContext};
use crate::runtime::node::{Next, NodeScope, Transition};
use crate::runtime::registry::ExecutorRegistry;
use crate::runtime::script::{EvalexprScriptFactory, ScriptEngineFactory};
use crate::runtime::storage::{ActivationQueue, ContextStore, InMemoryActivationQueue, InMemoryContextStore};
use crate::runtime::task::{TaskStatus, WorkflowTask};
use crate::runtime::visual::VisualAdapter;

/// The driver: owns the process library and the collaborators, and runs
/// token contexts from socket to socket.
pub struct Engine {
    processes: DashMap<String, Arc<Blueprint>>,
    registry: ExecutorRegistry,
    handlers: HashMap<String, Arc<dyn ActivityHandler>>,
    scripts: Arc<dyn ScriptEngineFactory>,
    visual: Option<Arc<dyn VisualAdapter>>,
    store: Arc<dyn ContextStore>,
    queue: Arc<dyn ActivationQueue>,
    // single writer per context while driving or mutating it
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
    config: EngineConfig,
}

impl Engine {
    /// In-memory engine with default settings.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryContextStore::new());
        let queue = Arc::new(InMemoryActivationQueue::new(config.queue_capacity));
        Self::new_with_storage(store, queue, config)
    }

    pub fn new_with_storage(
        store: Arc<dyn ContextStore>,
        queue: Arc<dyn ActivationQueue>,
        config: EngineConfig,
    ) -> Self {
        Self {
            processes: DashMap::new(),
            registry: ExecutorRegistry::standard(),
            handlers: HashMap::new(),
            scripts: Arc::new(EvalexprScriptFactory::new(config.script_pool_size)),
            visual: None,
            store,
            queue,
            locks: DashMap::new(),
            config,
        }
    }

    pub fn with_visual_adapter(mut self, adapter: Arc<dyn VisualAdapter>) -> Self {
        self.visual = Some(adapter);
        self
    }

    pub fn with_script_factory(mut self, factory: Arc<dyn ScriptEngineFactory>) -> Self {
        self.scripts = factory;
        self
    }

    // --- Registration ---

    pub fn register_blueprint(&self, blueprint: Blueprint) {
        info!(process = %blueprint.name, nodes = blueprint.nodes.len(), "Registering process");
        self.processes.insert(blueprint.name.clone(), Arc::new(blueprint));
    }

    pub fn register_process(&self, process: Process) -> Result<(), EngineError> {
        let blueprint = Compiler::new().compile(process).map_err(EngineError::Compile)?;
        self.register_blueprint(blueprint);
        Ok(())
    }

    pub fn register_handler(&mut self, handler: Arc<dyn ActivityHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    /// Replaces the executor for one node type.
    pub fn register_executor(&mut self, executor: Arc<dyn crate::runtime::node::NodeExecutor>) {
        self.registry.register(executor);
    }

    // --- Services for executors ---

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn conventions(&self) -> &Conventions {
        &self.config.conventions
    }

    pub fn store(&self) -> &Arc<dyn ContextStore> {
        &self.store
    }

    pub fn visual_adapter(&self) -> Option<&Arc<dyn VisualAdapter>> {
        self.visual.as_ref()
    }

    pub fn has_process(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    pub fn blueprint(&self, name: &str) -> Result<Arc<Blueprint>, ExecutionError> {
        self.processes.get(name)
            .map(|bp| bp.value().clone())
            .ok_or_else(|| ExecutionError::UnknownProcess(name.to_string()))
    }

    fn socket_of<'a>(&self, blueprint: &'a Blueprint, socket: &SocketRef) -> Result<&'a BlueprintSocket, ExecutionError> {
        blueprint.sockets.get(socket.index).ok_or_else(|| ExecutionError::SocketNotFound {
            name: format!("#{}", socket.index),
            from: blueprint.name.clone(),
        })
    }

    /// Acquires the single-writer lock of a context.
    pub async fn lock_context(&self, id: Uuid) -> ContextGuard<'_> {
        let lock = self.locks.entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        ContextGuard { id, locks: &self.locks, guard: Some(lock.lock_owned().await) }
    }

    /// Number of contexts with an entry in the lock table.
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    pub async fn schedule(&self, activation: Activation) -> Result<(), ExecutionError> {
        debug!(context_id = %activation.context_id, reason = ?activation.reason, "Scheduling activation");
        self.queue.push(activation).await.map_err(ExecutionError::Store)
    }

    /// Resolves an exit socket by name.
    ///
    /// Search order: `Node.socket` in the process of `from`, the exit sockets
    /// of `from`'s own node, then the nodes of the call-stack ancestors,
    /// innermost first.
    pub fn resolve_socket(
        &self,
        name: &str,
        from: &SocketRef,
        ctx: &TokenContext,
        required: bool,
    ) -> Result<Option<SocketRef>, ExecutionError> {
        let bp = self.blueprint(&from.process)?;

        if let Some((node_name, socket_name)) = name.split_once('.') {
            if let Some(found) = bp.qualified_exit(node_name, socket_name) {
                return Ok(Some(SocketRef::new(bp.name.clone(), found)));
            }
        } else {
            let node = self.socket_of(&bp, from)?.node;
            if let Some(found) = bp.exit_socket(node, name) {
                return Ok(Some(SocketRef::new(bp.name.clone(), found)));
            }
            for frame in ctx.call_stack.ancestors() {
                let frame_bp = self.blueprint(&frame.socket.process)?;
                let frame_node = self.socket_of(&frame_bp, &frame.socket)?.node;
                if let Some(found) = frame_bp.exit_socket(frame_node, name) {
                    return Ok(Some(SocketRef::new(frame_bp.name.clone(), found)));
                }
            }
        }

        if required {
            Err(ExecutionError::SocketNotFound {
                name: name.to_string(),
                from: bp.describe(from.index),
            })
        } else {
            Ok(None)
        }
    }

    /// `resolve_socket` with `required = true`.
    pub fn require_socket(&self, name: &str, from: &SocketRef, ctx: &TokenContext) -> Result<SocketRef, ExecutionError> {
        self.resolve_socket(name, from, ctx, true)?.ok_or_else(|| ExecutionError::SocketNotFound {
            name: name.to_string(),
            from: from.to_string(),
        })
    }

    /// Runs the handler registered as `handler` for an Activity node.
    pub async fn execute_handler(
        &self,
        handler: &str,
        call: HandlerCall,
        ctx: &mut TokenContext,
    ) -> Result<HandlerOutcome, ExecutionError> {
        let h = self.handlers.get(handler)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownHandler(handler.to_string()))?;
        debug!(context_id = %ctx.id, handler, node = %call.node, "Executing handler");
        h.execute(ctx, call).await.map_err(ExecutionError::Handler)
    }

    /// Evaluates `expr` with visibility scoped to `socket`.
    pub fn evaluate(
        &self,
        expr: &str,
        label: &str,
        socket: &SocketRef,
        ctx: &TokenContext,
    ) -> Result<Value, ExecutionError> {
        let mut script = self.scripts.acquire();
        let result = script.prepare_socket(socket, ctx)
            .and_then(|_| script.execute_script(expr, label, &ctx.id.to_string()));
        script.finish_socket(socket);
        self.scripts.release(script);
        result.map_err(ExecutionError::Script)
    }

    /// Binds the declared literal/expression values of `socket` that are
    /// still unbound.
    pub fn bind_declared(&self, socket: &SocketRef, ctx: &mut TokenContext) -> Result<(), ExecutionError> {
        let bp = self.blueprint(&socket.process)?;
        let declared = &self.socket_of(&bp, socket)?.params;
        for param in declared {
            if ctx.is_bound(socket, &param.name) {
                continue;
            }
            if let Some(value) = &param.value {
                ctx.bind(socket, param.name.clone(), value.clone());
            } else if let Some(expr) = &param.expr {
                let label = format!("{}:{}", bp.describe(socket.index), param.name);
                let value = self.evaluate(expr, &label, socket, ctx)?;
                ctx.bind(socket, param.name.clone(), value);
            }
        }
        Ok(())
    }

    // --- Public execution API ---

    /// Starts `process` at its Initial node named `entry` and drives it until
    /// the first suspension or stop.
    pub async fn start_process(
        &self,
        process: &str,
        entry: &str,
        params: HashMap<String, Value>,
    ) -> Result<TokenContext, EngineError> {
        self.start_process_as(process, entry, params, None).await
    }

    pub async fn start_process_as(
        &self,
        process: &str,
        entry: &str,
        params: HashMap<String, Value>,
        creator: Option<String>,
    ) -> Result<TokenContext, EngineError> {
        let bp = self.blueprint(process)?;
        let node_index = initial_node_of(&bp, entry)?;
        let node = bp.node(node_index);
        let exit = bp.default_exit(node_index)
            .map(|s| SocketRef::new(bp.name.clone(), s))
            .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: node.name.clone() })?;

        let mut ctx = TokenContext::new_root(process, creator);
        ctx.variables = bp.variables.clone();
        ctx.current = Some(exit.clone());
        ctx.bind_all(&exit, params);

        let guard = self.lock_context(ctx.id).await;
        info!(context_id = %ctx.id, process, entry, "Starting process instance");

        let executor = self.registry.get(node.kind.tag())
            .ok_or_else(|| ExecutionError::UnknownNodeType(node.kind.tag().to_string()))?;
        let scope = NodeScope { blueprint: &bp, node, node_index, entry: &exit };
        let mut spawned = Vec::new();
        match executor.execute(self, &scope, &mut ctx).await {
            Ok(transition) => self.apply(&mut ctx, transition, &mut spawned),
            Err(e) => return Err(self.abort(&bp, &exit, &ctx, e)),
        }
        if let Err(e) = self.bind_declared(&exit, &mut ctx) {
            return Err(self.abort(&bp, &exit, &ctx, e));
        }

        self.drive_locked(ctx, guard, spawned).await
    }

    /// Loads a saved context and drives it.
    pub async fn drive_context(&self, id: Uuid) -> Result<TokenContext, EngineError> {
        let guard = self.lock_context(id).await;
        let ctx = self.load(id).await?;
        self.drive_locked(ctx, guard, Vec::new()).await
    }

    /// External event for a suspended context: continue at the exit socket
    /// `exit` of the node it waits on (default exit socket if `None`), with
    /// `values` bound there.
    pub async fn resume(
        &self,
        id: Uuid,
        exit: Option<&str>,
        values: HashMap<String, Value>,
    ) -> Result<TokenContext, EngineError> {
        let guard = self.lock_context(id).await;
        let mut ctx = self.load(id).await?;
        if ctx.lifecycle != Lifecycle::SuspendImmediate {
            return Err(ExecutionError::NotSuspended(id).into());
        }
        let current = ctx.current.clone().ok_or(ExecutionError::NoCurrentSocket(id))?;
        let target = match exit {
            Some(name) => self.resolve_socket(name, &current, &ctx, true)?,
            None => {
                let bp = self.blueprint(&current.process)?;
                let node = self.socket_of(&bp, &current)?.node;
                let default = bp.default_exit(node)
                    .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: bp.node(node).name.clone() })?;
                Some(SocketRef::new(bp.name.clone(), default))
            }
        };
        if let Some(target) = target {
            ctx.bind_all(&target, values);
            ctx.current = Some(target);
        }
        ctx.lifecycle = Lifecycle::Resume;
        info!(context_id = %id, exit = ?exit, "Resuming context");
        self.drive_locked(ctx, guard, Vec::new()).await
    }

    /// Marks a workflow task completed and resumes the context waiting on it.
    pub async fn complete_workflow_task(
        &self,
        task_id: Uuid,
        exit: Option<&str>,
        values: HashMap<String, Value>,
    ) -> Result<TokenContext, EngineError> {
        let mut task = self.workflow_task(task_id).await?;
        if !task.is_open() {
            warn!(task_id = %task_id, status = ?task.status, "Completing a task that is no longer open");
        }
        task.status = TaskStatus::Completed;
        self.store.save_workflow_task(&task).await.map_err(ExecutionError::Store)?;
        info!(task_id = %task_id, context_id = %task.context_id, "Workflow task completed");
        self.resume(task.context_id, exit, values).await
    }

    /// Requests STOP for a context; a later driver pass will not advance it.
    pub async fn cancel(&self, id: Uuid) -> Result<TokenContext, EngineError> {
        let _guard = self.lock_context(id).await;
        let mut ctx = self.load(id).await?;
        ctx.lifecycle = Lifecycle::Stop;
        self.store.save_context(&ctx).await.map_err(ExecutionError::Store)?;
        info!(context_id = %id, "Context cancelled");
        Ok(ctx)
    }

    pub async fn context(&self, id: Uuid) -> Result<TokenContext, EngineError> {
        Ok(self.load(id).await?)
    }

    pub async fn workflow_task(&self, id: Uuid) -> Result<WorkflowTask, EngineError> {
        self.store.load_workflow_task(id).await
            .map_err(ExecutionError::Store)?
            .ok_or_else(|| ExecutionError::TaskNotFound(id).into())
    }

    pub async fn live_children(&self, id: Uuid) -> Result<usize, EngineError> {
        Ok(self.store.live_children(id).await.map_err(ExecutionError::Store)?)
    }

    async fn load(&self, id: Uuid) -> Result<TokenContext, ExecutionError> {
        self.store.load_context(id).await
            .map_err(ExecutionError::Store)?
            .ok_or(ExecutionError::ContextNotFound(id))
    }

    // --- Workers ---

    /// Drives one queued activation. Contexts that are no longer waiting to
    /// be resumed are skipped.
    pub async fn handle_activation(&self, activation: Activation) -> Result<Option<TokenContext>, EngineError> {
        let guard = self.lock_context(activation.context_id).await;
        let ctx = self.load(activation.context_id).await?;
        if ctx.lifecycle != Lifecycle::Resume {
            debug!(context_id = %ctx.id, lifecycle = ?ctx.lifecycle, "Skipping stale activation");
            return Ok(None);
        }
        self.drive_locked(ctx, guard, Vec::new()).await.map(Some)
    }

    /// Drains the activation queue without waiting. Returns how many
    /// activations were handled.
    pub async fn run_pending(&self) -> Result<usize, EngineError> {
        let mut handled = 0;
        while let Some(activation) = self.queue.try_pop().await.map_err(ExecutionError::Store)? {
            self.handle_activation(activation).await?;
            handled += 1;
        }
        Ok(handled)
    }

    pub async fn run_worker(&self) {
        info!("Worker started.");
        let timeout_duration = self.config.activation_timeout();

        loop {
            let activation = match self.queue.pop().await {
                Ok(Some(a)) => a,
                Ok(None) => continue,
                Err(e) => {
                    error!(error = ?e, "Failed to pop activation");
                    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                    continue;
                }
            };
            let context_id = activation.context_id;

            match timeout(timeout_duration, self.handle_activation(activation)).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    error!(context_id = %context_id, error = %e, "Activation failed");
                }
                Err(_) => {
                    error!(context_id = %context_id, "Activation timed out after {:?}", timeout_duration);
                }
            }
        }
    }

    // --- Driver loop ---

    async fn drive_locked(
        &self,
        ctx: TokenContext,
        guard: ContextGuard<'_>,
        mut spawned: Vec<Uuid>,
    ) -> Result<TokenContext, EngineError> {
        let result = self.run(ctx, &mut spawned).await;
        drop(guard);
        // children saved before a failure still hold a slot in the parent's counter
        for child in spawned {
            self.schedule(Activation::new(child, ActivationReason::Spawned)).await?;
        }
        result
    }

    /// Dispatches executors until the lifecycle leaves CONTINUE, then
    /// checkpoints the context. The caller holds the context lock.
    async fn run(&self, mut ctx: TokenContext, spawned: &mut Vec<Uuid>) -> Result<TokenContext, EngineError> {
        if ctx.lifecycle == Lifecycle::Resume {
            ctx.lifecycle = Lifecycle::Continue;
        }
        let mut steps = 0;

        while ctx.lifecycle == Lifecycle::Continue {
            let current = ctx.current.clone().ok_or(ExecutionError::NoCurrentSocket(ctx.id))?;
            let bp = self.blueprint(&current.process)?;
            let socket = match self.socket_of(&bp, &current) {
                Ok(s) => s,
                Err(e) => return Err(self.abort(&bp, &current, &ctx, e)),
            };

            if socket.direction == Direction::Exit {
                let Some(target) = socket.target else {
                    let e = ExecutionError::UnconnectedExitSocket(bp.describe(current.index));
                    return Err(self.abort(&bp, &current, &ctx, e));
                };
                let target = SocketRef::new(bp.name.clone(), target);
                // a re-entered socket starts over from the incoming values
                let incoming = ctx.take_bindings(&current);
                ctx.set_bindings(&target, incoming);
                ctx.current = Some(target.clone());
                if let Err(e) = self.bind_declared(&target, &mut ctx) {
                    return Err(self.abort(&bp, &target, &ctx, e));
                }
                continue;
            }

            steps += 1;
            if steps > self.config.max_steps {
                let e = ExecutionError::StepLimitExceeded { context: ctx.id, limit: self.config.max_steps };
                return Err(self.abort(&bp, &current, &ctx, e));
            }

            let node_index = socket.node;
            let node = bp.node(node_index);
            let Some(executor) = self.registry.get(node.kind.tag()) else {
                let e = ExecutionError::UnknownNodeType(node.kind.tag().to_string());
                return Err(self.abort(&bp, &current, &ctx, e));
            };
            if self.config.record_trail {
                ctx.record_visit(&current, self.config.trail_limit);
            }

            debug!(context_id = %ctx.id, socket = %bp.describe(current.index), kind = node.kind.tag(), "Dispatching");
            let scope = NodeScope { blueprint: &bp, node, node_index, entry: &current };
            let transition = match executor.execute(self, &scope, &mut ctx).await {
                Ok(t) => t,
                Err(e) => return Err(self.abort(&bp, &current, &ctx, e)),
            };
            let checkpoint = transition.checkpoint;
            self.apply(&mut ctx, transition, spawned);

            if checkpoint {
                self.store.save_context(&ctx).await.map_err(ExecutionError::Store)?;
            }
        }

        self.store.save_context(&ctx).await.map_err(ExecutionError::Store)?;
        info!(
            context_id = %ctx.id,
            lifecycle = ?ctx.lifecycle,
            depth = ctx.call_stack.depth(),
            "Context checkpointed"
        );
        Ok(ctx)
    }

    fn apply(&self, ctx: &mut TokenContext, transition: Transition, spawned: &mut Vec<Uuid>) {
        if let Some(replacement) = transition.replacement {
            if replacement.id != ctx.id {
                info!(old = %ctx.id, new = %replacement.id, "Handler replaced the context");
            }
            *ctx = replacement;
        }
        spawned.extend(transition.spawned);
        match transition.next {
            Next::Advance(socket) => ctx.current = Some(socket),
            Next::Suspend => ctx.lifecycle = Lifecycle::SuspendImmediate,
            Next::Stop => ctx.lifecycle = Lifecycle::Stop,
            Next::Hold => {}
        }
    }

    fn abort(&self, bp: &Blueprint, at: &SocketRef, ctx: &TokenContext, source: ExecutionError) -> EngineError {
        let qualifier = bp.describe(at.index);
        let state = serde_json::to_string(ctx)
            .unwrap_or_else(|e| format!("<unserializable context: {}>", e));
        error!(context_id = %ctx.id, at = %qualifier, error = %source, "Execution aborted");
        EngineError::Aborted { qualifier, state, source }
    }
}

/// The Initial node called `name`, distinguishing a missing node from one of
/// another type.
pub(crate) fn initial_node_of(bp: &Blueprint, name: &str) -> Result<usize, ExecutionError> {
    if let Some(index) = bp.initial_node(name) {
        return Ok(index);
    }
    if bp.node_index(name).is_some() {
        Err(ExecutionError::NotAnInitialNode { process: bp.name.clone(), name: name.to_string() })
    } else {
        Err(ExecutionError::InitialNodeNotFound { process: bp.name.clone(), name: name.to_string() })
    }
}

/// Held lock on one context. Dropping it releases the lock and forgets the
/// table entry once nobody else holds or waits for it.
pub struct ContextGuard<'a> {
    id: Uuid,
    locks: &'a DashMap<Uuid, Arc<Mutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks.remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
