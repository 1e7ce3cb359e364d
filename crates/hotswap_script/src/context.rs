//! Execution contexts
//!
//! A context is one generation of the guest environment: its own QuickJS
//! runtime, its own console sink and its own capability bindings, all
//! confined to a dedicated execution thread. Callers reach that thread
//! through a mailbox, so guest evaluation is never concurrent within one
//! context and nothing guest-side survives into the next generation.

use crate::bridge::{self, Applied, Fired};
use crate::error::{InvocationError, ScriptLoadError};
use crate::generation::{ContextId, Generation};
use crate::log::{LogSink, Tag, TracingLog};
use crate::output::OutputSink;
use crate::settings::is_identifier;
use crate::source::ScriptSource;
use crate::stats;
use crate::timer::{CallbackId, TimerBridge, TimerCapability};
use hotswap_metrics::Counter;
use parking_lot::Mutex;
use rquickjs::{Context, Ctx, Function, Runtime, Value};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

/// Work posted to a context's execution thread.
pub(crate) enum Task {
    Invoke {
        name: String,
        args: String,
        reply: mpsc::Sender<Result<Invocation, InvocationError>>,
    },
    Fire {
        callback: CallbackId,
    },
    Close,
}

pub(crate) type Mailbox = mpsc::Sender<Task>;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ContextState {
    Active,
    Closing,
    Closed,
}

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new() -> Self {
        Self(AtomicU8::new(ACTIVE))
    }

    fn get(&self) -> ContextState {
        match self.0.load(Ordering::Acquire) {
            ACTIVE => ContextState::Active,
            CLOSING => ContextState::Closing,
            _ => ContextState::Closed,
        }
    }

    fn is_active(&self) -> bool {
        self.get() == ContextState::Active
    }

    /// Returns true for the one caller that moved Active -> Closing.
    fn begin_closing(&self) -> bool {
        self.0
            .compare_exchange(ACTIVE, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn mark_closed(&self) {
        self.0.store(CLOSED, Ordering::Release);
    }
}

/// Value produced by a successful invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// JSON encoding of the returned value (`undefined` becomes `null`).
    Returned(serde_json::Value),
    /// The entry point returned a promise; its settlement is logged later.
    Deferred,
}

impl Invocation {
    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Invocation::Returned(value) => Some(value),
            Invocation::Deferred => None,
        }
    }
}

/// A host capability exposed to guest code.
#[derive(Clone)]
pub enum Capability {
    Timer(Arc<dyn TimerCapability>),
}

/// Capability name -> capability, installed as guest globals.
#[derive(Clone, Default)]
pub struct Bindings {
    entries: BTreeMap<String, Capability>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timer(mut self, name: impl Into<String>, timer: Arc<dyn TimerCapability>) -> Self {
        self.insert(name, Capability::Timer(timer));
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, capability: Capability) {
        self.entries.insert(name.into(), capability);
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// Host-side environment shared by every context built from it.
#[derive(Clone)]
pub struct ContextConfig {
    /// Prefix of guest output lines.
    pub label: String,
    pub log: Arc<dyn LogSink>,
    pub generation: Arc<Generation>,
    pub metrics: Arc<Counter>,
}

impl ContextConfig {
    pub fn new(log: Arc<dyn LogSink>) -> Self {
        Self {
            label: "JS Console".to_string(),
            log,
            generation: Arc::new(Generation::new()),
            metrics: Arc::new(Counter::new()),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::new(Arc::new(TracingLog))
    }
}

/// Handle to one isolated guest environment.
///
/// Dropping the handle closes the context.
pub struct ExecutionContext {
    id: ContextId,
    state: Arc<StateCell>,
    mailbox: Mailbox,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_thread: ThreadId,
    bindings: Vec<String>,
    log: Arc<dyn LogSink>,
}

impl ExecutionContext {
    /// Read `source` and build a context from it.
    pub fn load(
        source: &dyn ScriptSource,
        bindings: Bindings,
        config: &ContextConfig,
    ) -> Result<Self, ScriptLoadError> {
        let locator = source.locator();
        let bytes = source
            .read_script()
            .map_err(|source| ScriptLoadError::Read {
                locator: locator.clone(),
                source,
            })?;
        let text = String::from_utf8(bytes).map_err(|_| ScriptLoadError::Encoding { locator })?;
        Self::create(&text, bindings, config)
    }

    /// Build a context: install bindings, then evaluate `source` once.
    ///
    /// Blocks until the script's top level has run. On failure the
    /// execution thread is gone and nothing usable is returned.
    pub fn create(
        source: &str,
        bindings: Bindings,
        config: &ContextConfig,
    ) -> Result<Self, ScriptLoadError> {
        let id = ContextId::next();
        let state = Arc::new(StateCell::new());
        let (mailbox, inbox) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel(1);
        let names = bindings.names();

        let boot = Boot {
            id,
            source: source.to_string(),
            bindings,
            config: config.clone(),
            mailbox: mailbox.clone(),
            state: Arc::clone(&state),
        };
        let worker = thread::Builder::new()
            .name(format!("hotswap-ctx-{id}"))
            .spawn(move || match boot.start() {
                Ok(engine) => {
                    if ready_tx.send(Ok(())).is_ok() {
                        engine.serve(inbox);
                    }
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                }
            })
            .map_err(ScriptLoadError::Spawn)?;

        let failure = match ready_rx.recv() {
            Ok(Ok(())) => {
                debug!(context = %id, bindings = ?names, "context ready");
                return Ok(Self {
                    id,
                    state,
                    mailbox,
                    worker_thread: worker.thread().id(),
                    worker: Mutex::new(Some(worker)),
                    bindings: names,
                    log: Arc::clone(&config.log),
                });
            }
            Ok(Err(err)) => err,
            Err(_) => ScriptLoadError::Engine {
                message: "execution thread exited during load".to_string(),
            },
        };

        state.mark_closed();
        if worker.join().is_err() {
            warn!(context = %id, "execution thread panicked during load");
        }
        debug!(context = %id, error = %failure, "context build failed");
        Err(failure)
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn binding_names(&self) -> &[String] {
        &self.bindings
    }

    /// Call the global function `name` with JSON arguments.
    pub fn invoke(
        &self,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<Invocation, InvocationError> {
        let closed = || InvocationError::ContextClosed { id: self.id };
        if !self.state.is_active() {
            return Err(closed());
        }

        let args = serde_json::to_string(args).map_err(|source| {
            InvocationError::InvalidArguments {
                name: name.to_string(),
                source,
            }
        })?;
        let (reply, response) = mpsc::channel();
        self.mailbox
            .send(Task::Invoke {
                name: name.to_string(),
                args,
                reply,
            })
            .map_err(|_| closed())?;

        // A dropped reply means the thread shut down before serving us
        response.recv().map_err(|_| closed())?
    }

    /// Idempotent. Waits for an in-flight evaluation to finish; queued
    /// invocations and callbacks are rejected.
    ///
    /// Every caller returns only once the context is `Closed`, except a call
    /// made from the execution thread itself, which returns while `Closing`.
    pub fn close(&self) {
        if self.state.begin_closing() {
            debug!(context = %self.id, "closing context");
            let _ = self.mailbox.send(Task::Close);
        }
        if self.worker_thread == thread::current().id() {
            // The loop exits after the current task
            return;
        }

        // Later callers block here until the first one has joined
        let mut worker = self.worker.lock();
        let Some(handle) = worker.take() else {
            return;
        };
        if handle.join().is_err() {
            self.log.log_line(
                &format!("context {} execution thread panicked", self.id),
                Tag::Error,
            );
        }
        self.state.mark_closed();
        self.log
            .log_line(&format!("context {} closed", self.id), Tag::Lifecycle);
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("bindings", &self.bindings)
            .finish()
    }
}

/// Everything the execution thread needs to build its engine.
struct Boot {
    id: ContextId,
    source: String,
    bindings: Bindings,
    config: ContextConfig,
    mailbox: Mailbox,
    state: Arc<StateCell>,
}

impl Boot {
    fn start(self) -> Result<Engine, ScriptLoadError> {
        let engine_error = |err: rquickjs::Error| ScriptLoadError::Engine {
            message: err.to_string(),
        };
        let runtime = Runtime::new().map_err(engine_error)?;
        let context = Context::full(&runtime).map_err(engine_error)?;
        let sink = Rc::new(RefCell::new(OutputSink::new(
            self.config.label.clone(),
            Arc::clone(&self.config.log),
        )));

        context.with(|ctx| {
            bridge::install_host(&ctx, Rc::clone(&sink), Arc::clone(&self.config.log)).map_err(
                |err| ScriptLoadError::Engine {
                    message: bridge::describe(&ctx, err),
                },
            )?;

            let mut shims_installed = false;
            for (name, capability) in &self.bindings.entries {
                match capability {
                    Capability::Timer(timer) => {
                        let timer_bridge = TimerBridge {
                            owner: self.id,
                            mailbox: self.mailbox.clone(),
                            generation: Arc::clone(&self.config.generation),
                            metrics: Arc::clone(&self.config.metrics),
                            timer: Arc::clone(timer),
                        };
                        bridge::install_timer(&ctx, name, timer_bridge, !shims_installed)
                            .map_err(|err| ScriptLoadError::Engine {
                                message: bridge::describe(&ctx, err),
                            })?;
                        shims_installed = true;
                    }
                }
            }

            ctx.eval::<(), _>(self.source.as_str())
                .map_err(|err| ScriptLoadError::Evaluate {
                    message: bridge::describe(&ctx, err),
                })
        })?;

        let engine = Engine {
            id: self.id,
            context,
            runtime,
            sink,
            state: self.state,
            config: self.config,
        };
        engine.drain_jobs();
        Ok(engine)
    }
}

/// Resolve `name` through the script's top-level scope, which also holds
/// `let`/`const` declarations that never become global properties.
fn lexical_function<'js>(ctx: &Ctx<'js>, name: &str) -> Option<Function<'js>> {
    if !is_identifier(name) {
        return None;
    }
    let lookup = format!("typeof {name} === 'function' ? {name} : undefined");
    match ctx.eval::<Value, _>(lookup) {
        Ok(value) => value.into_function(),
        Err(_) => {
            // Declared but uninitialized (TDZ) or a reserved word
            let _ = ctx.catch();
            None
        }
    }
}

/// Take the exception left behind in `context`.
fn pending_exception(context: &Context) -> String {
    context.with(|ctx| bridge::describe(&ctx, rquickjs::Error::Exception))
}

/// The guest engine, owned by the execution thread.
struct Engine {
    id: ContextId,
    context: Context,
    runtime: Runtime,
    sink: Rc<RefCell<OutputSink>>,
    state: Arc<StateCell>,
    config: ContextConfig,
}

impl Engine {
    fn serve(self, inbox: mpsc::Receiver<Task>) {
        while let Ok(task) = inbox.recv() {
            match task {
                Task::Invoke { name, args, reply } => {
                    let result = if self.state.is_active() {
                        self.invoke(&name, &args)
                    } else {
                        Err(InvocationError::ContextClosed { id: self.id })
                    };
                    let _ = reply.send(result);
                }
                Task::Fire { callback } => self.fire(callback),
                Task::Close => break,
            }
        }
        self.teardown();
    }

    fn invoke(&self, name: &str, args: &str) -> Result<Invocation, InvocationError> {
        trace!(context = %self.id, entry = name, "invoking");
        let guest_error = |message: String| InvocationError::GuestRuntime {
            name: name.to_string(),
            message,
        };

        let applied = self.context.with(|ctx| {
            let candidate: Value = ctx
                .globals()
                .get(name)
                .map_err(|err| guest_error(bridge::describe(&ctx, err)))?;
            let entry = match candidate.as_function() {
                Some(entry) => Some(entry.clone()),
                None => lexical_function(&ctx, name),
            };
            let Some(entry) = entry else {
                return Err(InvocationError::EntryPointNotFound {
                    name: name.to_string(),
                });
            };
            bridge::apply(&ctx, entry, name, args)
                .map_err(|err| guest_error(bridge::describe(&ctx, err)))
        });
        self.drain_jobs();

        match applied? {
            Applied::Returned(json) => serde_json::from_str(&json)
                .map(Invocation::Returned)
                .map_err(|err| guest_error(format!("unreadable return value: {err}"))),
            Applied::Deferred => Ok(Invocation::Deferred),
            Applied::Raised(message) => Err(guest_error(message)),
        }
    }

    fn fire(&self, callback: CallbackId) {
        // Second check, on the execution thread, right before touching guest state
        if self.config.generation.is_superseded(self.id) || !self.state.is_active() {
            trace!(context = %self.id, callback = callback.0, "dropping callback of retired context");
            self.config.metrics.increment(stats::TIMERS_DROPPED_STALE, 1);
            return;
        }

        let fired = self.context.with(|ctx| {
            bridge::fire(&ctx, callback).map_err(|err| bridge::describe(&ctx, err))
        });
        match fired {
            Ok(Fired::Ran) => self.config.metrics.increment(stats::TIMERS_EXECUTED, 1),
            Ok(Fired::Cleared) => trace!(context = %self.id, callback = callback.0, "callback was cleared"),
            Ok(Fired::Raised(message)) | Err(message) => {
                self.config.metrics.increment(stats::TIMERS_EXECUTED, 1);
                self.config.log.log_line(
                    &format!("Error in timer callback (context {}): {message}", self.id),
                    Tag::Error,
                );
            }
        }
        self.drain_jobs();
    }

    /// Run queued promise jobs until the queue is empty.
    fn drain_jobs(&self) {
        loop {
            match self.runtime.execute_pending_job() {
                Ok(true) => continue,
                Ok(false) => break,
                Err(failed) => {
                    let message = pending_exception(&failed.0);
                    warn!(context = %self.id, error = %message, "pending job raised");
                    self.config.log.log_line(
                        &format!("Error in pending job (context {}): {message}", self.id),
                        Tag::Error,
                    );
                }
            }
        }
    }

    fn teardown(self) {
        self.sink.borrow_mut().flush();
        self.state.mark_closed();
        debug!(context = %self.id, "engine released");
    }
}
