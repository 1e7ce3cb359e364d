//! Context manager and the hot swap protocol
//!
//! The manager owns the single published ("current") context. A swap builds
//! the replacement completely before publishing it with one write under the
//! slot lock; the old context is then torn down on a retirement thread so
//! callers of [`ContextManager::run`] never wait on teardown.

use crate::context::{Bindings, ContextConfig, ExecutionContext, Invocation};
use crate::error::{InvocationError, ScriptLoadError, StartupError};
use crate::generation::ContextId;
use crate::log::{LogSink, Tag};
use crate::settings::HostSettings;
use crate::source::{FileSource, ScriptSource};
use crate::stats::{self, ManagerStats};
use crate::timer::{TimerCapability, TimerService};
use hotswap_metrics::RingBuffer;
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Number of swap durations kept for the rolling average.
const SWAP_SAMPLES: usize = 32;

/// Configures and starts a [`ContextManager`].
pub struct ManagerBuilder {
    source: Arc<dyn ScriptSource>,
    log: Arc<dyn LogSink>,
    settings: HostSettings,
    timer: Option<Arc<dyn TimerCapability>>,
}

impl ManagerBuilder {
    pub fn log(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    pub fn settings(mut self, settings: HostSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the default [`TimerService`].
    pub fn timer(mut self, timer: Arc<dyn TimerCapability>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Build and publish the first context. Failure is fatal.
    pub fn initialize(self) -> Result<ContextManager, StartupError> {
        let log = self.log;
        let fail = |err: ScriptLoadError| {
            log.log_line(&format!("Error loading script: {err}"), Tag::Error);
            StartupError(err)
        };

        let timer: Arc<dyn TimerCapability> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TimerService::new().map_err(|err| fail(ScriptLoadError::Spawn(err)))?),
        };
        let bindings = Bindings::new().with_timer(self.settings.timer.binding.clone(), timer);
        let config = ContextConfig::new(Arc::clone(&log)).with_label(self.settings.output.label.clone());

        log.log_line("Initializing new context...", Tag::Lifecycle);
        let first = ExecutionContext::load(self.source.as_ref(), bindings.clone(), &config)
            .map_err(fail)?;
        config.generation.publish(first.id());
        info!(context = %first.id(), source = %self.source.locator(), "script host started");

        Ok(ContextManager {
            source: self.source,
            bindings,
            config,
            current: RwLock::new(Arc::new(first)),
            swap_lock: Mutex::new(()),
            retiring: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            swap_times: Mutex::new(RingBuffer::new(SWAP_SAMPLES)),
        })
    }
}

/// Single source of truth for the live context.
pub struct ContextManager {
    source: Arc<dyn ScriptSource>,
    bindings: Bindings,
    config: ContextConfig,
    current: RwLock<Arc<ExecutionContext>>,
    swap_lock: Mutex<()>,
    retiring: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
    swap_times: Mutex<RingBuffer<Duration>>,
}

impl ContextManager {
    pub fn builder(source: Arc<dyn ScriptSource>) -> ManagerBuilder {
        ManagerBuilder {
            source,
            log: Arc::new(crate::log::TracingLog),
            settings: HostSettings::default(),
            timer: None,
        }
    }

    /// Start from a script file with default settings.
    pub fn initialize(
        script_path: impl Into<PathBuf>,
        log: Arc<dyn LogSink>,
    ) -> Result<Self, StartupError> {
        Self::builder(Arc::new(FileSource::new(script_path)))
            .log(log)
            .initialize()
    }

    /// Stable handle to the context published right now.
    ///
    /// Do not cache it across calls; a swap retires it.
    pub fn current(&self) -> Arc<ExecutionContext> {
        Arc::clone(&self.current.read())
    }

    pub fn current_id(&self) -> ContextId {
        self.current.read().id()
    }

    /// Invoke `entry` on the current context.
    ///
    /// `ContextClosed` means a swap raced this call; retry against the manager.
    pub fn run(
        &self,
        entry: &str,
        args: &[serde_json::Value],
    ) -> Result<Invocation, InvocationError> {
        let context = self.current();
        context.invoke(entry, args).map_err(|err| {
            self.config
                .log
                .log_line(&format!("Error running {entry}: {err}"), Tag::Error);
            err
        })
    }

    /// Rebuild the environment from a fresh read of the script.
    ///
    /// All or nothing: on failure the current context stays published and
    /// fully usable.
    pub fn hot_swap(&self) -> Result<ContextId, ScriptLoadError> {
        let _swap = self.swap_lock.lock();
        if self.shut_down.load(Ordering::Acquire) {
            return Err(self.swap_failed(ScriptLoadError::ShutDown));
        }

        let started = Instant::now();
        self.config
            .log
            .log_line("Initializing new context...", Tag::Lifecycle);
        let fresh =
            match ExecutionContext::load(self.source.as_ref(), self.bindings.clone(), &self.config) {
                Ok(context) => Arc::new(context),
                Err(err) => return Err(self.swap_failed(err)),
            };
        let id = fresh.id();

        let previous = {
            let mut current = self.current.write();
            self.config.generation.publish(id);
            std::mem::replace(&mut *current, fresh)
        };
        debug!(old = %previous.id(), new = %id, "context published");
        self.retire(previous);

        let elapsed = started.elapsed();
        hotswap_metrics::metrics! {
            self.swap_times.lock().push(elapsed);
        }
        self.config.metrics.increment(stats::SWAPS_COMPLETED, 1);
        self.config.log.log_line("Hot swap completed.", Tag::Lifecycle);
        info!(context = %id, ?elapsed, "hot swap completed");
        Ok(id)
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats::collect(
            self.current_id(),
            &self.config.metrics,
            self.swap_times.lock().spread(),
        )
    }

    /// Close the current context and wait for every retired one.
    /// Idempotent; called on drop.
    pub fn shutdown(&self) {
        let _swap = self.swap_lock.lock();
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.current().close();
        let retiring = std::mem::take(&mut *self.retiring.lock());
        for handle in retiring {
            if handle.join().is_err() {
                warn!("retirement thread panicked");
            }
        }
        info!("script host shut down");
    }

    fn swap_failed(&self, err: ScriptLoadError) -> ScriptLoadError {
        self.config.metrics.increment(stats::SWAPS_FAILED, 1);
        self.config.log.log_line(
            &format!(
                "Hot swap failed, keeping context {}: {err}",
                self.current_id()
            ),
            Tag::Error,
        );
        err
    }

    /// Tear `previous` down without blocking the caller.
    fn retire(&self, previous: Arc<ExecutionContext>) {
        let id = previous.id();
        let mut retiring = self.retiring.lock();
        retiring.retain(|handle| !handle.is_finished());

        // Keep a handle so a failed spawn can still close inline
        let fallback = Arc::clone(&previous);
        match thread::Builder::new()
            .name(format!("hotswap-retire-{id}"))
            .spawn(move || previous.close())
        {
            Ok(handle) => retiring.push(handle),
            Err(err) => {
                warn!(context = %id, error = %err, "retiring inline");
                drop(retiring);
                fallback.close();
            }
        }
    }
}

impl Drop for ContextManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextState;
    use crate::log::MemoryLog;
    use crate::source::MemorySource;
    use crate::timer::{FireOutcome, ManualTimer};
    use serde_json::json;

    const ENTRY_A: &str = "function entryA() { return 'ok'; }";

    fn manager(script: &str) -> (ContextManager, Arc<MemorySource>, Arc<MemoryLog>) {
        let source = Arc::new(MemorySource::new("test", script));
        let log = Arc::new(MemoryLog::new());
        let manager = ContextManager::builder(source.clone())
            .log(log.clone())
            .initialize()
            .unwrap();
        (manager, source, log)
    }

    #[test]
    fn test_run_swap_run() {
        let (manager, _, log) = manager(ENTRY_A);
        let first = manager.current_id();
        assert_eq!(manager.run("entryA", &[]).unwrap(), Invocation::Returned(json!("ok")));

        let second = manager.hot_swap().unwrap();

        assert_ne!(second, first);
        assert_eq!(manager.current_id(), second);
        assert_eq!(manager.run("entryA", &[]).unwrap(), Invocation::Returned(json!("ok")));
        assert!(log.texts(Tag::Lifecycle).contains(&"Hot swap completed.".to_string()));
    }

    #[test]
    fn test_ids_strictly_increase_across_swaps() {
        let (manager, _, _) = manager(ENTRY_A);
        let mut last = manager.current_id();
        for _ in 0..5 {
            let id = manager.hot_swap().unwrap();
            assert!(id > last);
            assert_eq!(manager.current_id(), id);
            last = id;
        }
        if cfg!(feature = "metrics") {
            let stats = manager.stats();
            assert_eq!(stats.swaps_completed, 5);
            assert_eq!(stats.swap_times.samples, 5);
            assert!(stats.swap_times.fastest <= stats.swap_times.slowest);
        }
    }

    #[test]
    fn test_swap_picks_up_edited_source() {
        let (manager, source, _) = manager("function version() { return 1; }");
        source.replace("function version() { return 2; }");
        assert_eq!(manager.run("version", &[]).unwrap(), Invocation::Returned(json!(1)));

        manager.hot_swap().unwrap();
        assert_eq!(manager.run("version", &[]).unwrap(), Invocation::Returned(json!(2)));
    }

    #[test]
    fn test_failed_swap_keeps_current() {
        let (manager, source, log) = manager(ENTRY_A);
        let before = manager.current_id();

        source.replace("function entryA( {");
        let err = manager.hot_swap().unwrap_err();

        assert!(matches!(err, ScriptLoadError::Evaluate { .. }));
        assert_eq!(manager.current_id(), before);
        assert_eq!(manager.current().state(), ContextState::Active);
        assert_eq!(manager.run("entryA", &[]).unwrap(), Invocation::Returned(json!("ok")));
        assert!(log
            .texts(Tag::Error)
            .iter()
            .any(|line| line.starts_with("Hot swap failed")));
        if cfg!(feature = "metrics") {
            assert_eq!(manager.stats().swaps_failed, 1);
        }
    }

    #[test]
    fn test_startup_failure_is_reported() {
        let log = Arc::new(MemoryLog::new());
        let dir = tempfile::tempdir().unwrap();
        let result = ContextManager::initialize(dir.path().join("script.js"), log.clone());

        assert!(matches!(result, Err(StartupError(ScriptLoadError::Read { .. }))));
        assert!(log
            .texts(Tag::Error)
            .iter()
            .any(|line| line.starts_with("Error loading script")));
    }

    #[test]
    fn test_initialize_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script.js");
        std::fs::write(&path, ENTRY_A).unwrap();
        let manager = ContextManager::initialize(&path, Arc::new(MemoryLog::new())).unwrap();

        std::fs::write(&path, "function entryA() { return 'edited'; }").unwrap();
        manager.hot_swap().unwrap();
        assert_eq!(
            manager.run("entryA", &[]).unwrap(),
            Invocation::Returned(json!("edited"))
        );
    }

    #[test]
    fn test_old_handle_stays_old_and_closes() {
        let (manager, _, _) = manager(ENTRY_A);
        let old = manager.current();
        manager.hot_swap().unwrap();

        // The pre-swap handle never turns into the new context
        assert_ne!(old.id(), manager.current_id());
        manager.shutdown();
        assert_eq!(old.state(), ContextState::Closed);
        assert!(matches!(
            old.invoke("entryA", &[]),
            Err(InvocationError::ContextClosed { .. })
        ));
    }

    #[test]
    fn test_run_errors_are_logged_and_local() {
        let (manager, _, log) = manager("function boom() { throw new TypeError('bad'); }");

        assert!(matches!(
            manager.run("nothing", &[]),
            Err(InvocationError::EntryPointNotFound { .. })
        ));
        assert!(matches!(
            manager.run("boom", &[]),
            Err(InvocationError::GuestRuntime { .. })
        ));
        assert_eq!(log.texts(Tag::Error).len(), 2);
        assert!(manager.current().is_active());
    }

    #[test]
    fn test_shutdown_is_final() {
        let (manager, _, _) = manager(ENTRY_A);
        manager.shutdown();
        manager.shutdown();

        assert!(matches!(
            manager.run("entryA", &[]),
            Err(InvocationError::ContextClosed { .. })
        ));
        assert!(matches!(manager.hot_swap(), Err(ScriptLoadError::ShutDown)));
    }

    #[test]
    fn test_stale_callback_never_runs_with_manual_timer() {
        let source = Arc::new(MemorySource::new(
            "test",
            "function arm() { setTimeout(() => print('fired'), 50); }\nfunction ping() {}",
        ));
        let log = Arc::new(MemoryLog::new());
        let timer = Arc::new(ManualTimer::new());
        let manager = ContextManager::builder(source)
            .log(log.clone())
            .timer(timer.clone())
            .initialize()
            .unwrap();

        manager.run("arm", &[]).unwrap();
        manager.hot_swap().unwrap();

        assert_eq!(timer.fire_all(), vec![FireOutcome::Stale]);
        manager.run("ping", &[]).unwrap();
        assert!(!log.contains("fired"));
        if cfg!(feature = "metrics") {
            assert_eq!(manager.stats().timers_dropped_stale, 1);
            assert_eq!(manager.stats().timers_executed, 0);
        }
    }

    #[test]
    fn test_deferred_callback_dropped_after_swap() {
        let (manager, _, log) = manager(
            "function arm() { setTimeout(() => print('fired'), 50); }\nfunction ping() {}",
        );

        manager.run("arm", &[]).unwrap();
        manager.hot_swap().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        manager.run("ping", &[]).unwrap();

        assert!(!log.contains("fired"));
        if cfg!(feature = "metrics") {
            assert_eq!(manager.stats().timers_executed, 0);
        }
    }

    #[test]
    fn test_deferred_callback_runs_without_swap() {
        let (manager, _, log) = manager(
            "function arm() { setTimeout(() => print('fired'), 20); }\nfunction ping() {}",
        );

        manager.run("arm", &[]).unwrap();
        std::thread::sleep(Duration::from_millis(200));
        manager.run("ping", &[]).unwrap();

        assert_eq!(log.texts(Tag::GuestOutput), vec!["JS Console: fired"]);
    }

    #[test]
    fn test_concurrent_runs_during_swaps() {
        let (manager, _, _) = manager(ENTRY_A);
        let manager = Arc::new(manager);

        let callers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        match manager.run("entryA", &[]) {
                            Ok(result) => assert_eq!(result, Invocation::Returned(json!("ok"))),
                            Err(err) => assert!(err.is_retryable(), "{err}"),
                        }
                    }
                })
            })
            .collect();
        for _ in 0..5 {
            manager.hot_swap().unwrap();
        }
        for caller in callers {
            caller.join().unwrap();
        }

        assert_eq!(manager.run("entryA", &[]).unwrap(), Invocation::Returned(json!("ok")));
    }

    #[test]
    fn test_manager_drops_inside_async_code() {
        let host = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let returned = host.block_on(async {
            let (manager, _, _) = manager(ENTRY_A);
            let returned = manager.run("entryA", &[]).unwrap();
            drop(manager);
            returned
        });
        assert_eq!(returned, Invocation::Returned(json!("ok")));
    }
}
