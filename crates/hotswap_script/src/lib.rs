//! Hotswap Scripting Host
//!
//! Loads a JavaScript payload into an isolated QuickJS context, runs
//! script-defined entry points and can discard and rebuild the whole
//! environment without restarting the host.
//!
//! ## Architecture
//!
//! - **ExecutionContext:** one generation of the guest, confined to its own
//!   execution thread and fed through a mailbox
//! - **ContextManager:** owns the published context; `run` and `hot_swap`
//! - **TimerService:** host capability behind the guest's `setTimeout`;
//!   callbacks of superseded contexts are dropped at fire time
//! - **OutputSink:** per-context line buffering of guest console output
//!
//! Swaps are "nuke and rebuild": no guest state survives into the next
//! generation.
//!
//! ```ignore
//! use hotswap_script::{ContextManager, TracingLog};
//! use std::sync::Arc;
//!
//! let manager = ContextManager::initialize("scripts/script.js", Arc::new(TracingLog))?;
//! manager.run("sayHelloSoon", &[])?;
//! manager.hot_swap()?;
//! ```

mod bridge;
pub mod context;
pub mod error;
pub mod generation;
pub mod log;
pub mod manager;
pub mod output;
pub mod settings;
pub mod source;
pub mod stats;
pub mod timer;

pub use context::{Bindings, Capability, ContextConfig, ContextState, ExecutionContext, Invocation};
pub use error::{InvocationError, ScriptLoadError, SettingsError, StartupError};
pub use generation::{ContextId, Generation};
pub use log::{LogLine, LogSink, MemoryLog, Tag, TracingLog};
pub use manager::{ContextManager, ManagerBuilder};
pub use output::OutputSink;
pub use settings::HostSettings;
pub use source::{FileSource, MemorySource, ScriptSource};
pub use stats::ManagerStats;
pub use timer::{CallbackId, FireOutcome, ManualTimer, PendingCallback, TimerCapability, TimerService};

pub use rquickjs;
