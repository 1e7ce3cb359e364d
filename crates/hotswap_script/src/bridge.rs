//! Host/guest bridging
//!
//! Installs the host functions and the small JavaScript shims every context
//! gets before the script runs: console routing, entry point application,
//! and `setTimeout`/`clearTimeout` on top of the timer capability.

use crate::log::{LogSink, Tag};
use crate::output::OutputSink;
use crate::timer::{CallbackId, TimerBridge};
use rquickjs::{Ctx, Function, Object, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

pub(crate) const APPLY: &str = "__hotswap_apply";
pub(crate) const FIRE: &str = "__hotswap_fire";

/// Console routing and entry point application. Evaluates to an installer
/// taking the host `write(chunk)` and `settle(entry, ok, text)` functions.
const HOST_PRELUDE: &str = r#"
((write, settle) => {
  const format = (value) => {
    if (typeof value === "string") return value;
    if (value instanceof Error) return String(value);
    try {
      const json = JSON.stringify(value);
      return json === undefined ? String(value) : json;
    } catch (_) {
      return String(value);
    }
  };
  const describe = (error) =>
    error instanceof Error && error.stack
      ? `${error}\n${error.stack}`.trimEnd()
      : String(error);
  const emit = (...args) => write(args.map(format).join(" ") + "\n");

  globalThis.console = { log: emit, info: emit, warn: emit, error: emit, debug: emit };
  globalThis.print = emit;

  Object.defineProperty(globalThis, "__hotswap_describe", { value: describe });
  Object.defineProperty(globalThis, "__hotswap_apply", {
    value: (entry, name, argsJson) => {
      try {
        const result = entry.apply(undefined, JSON.parse(argsJson));
        if (
          result !== null &&
          (typeof result === "object" || typeof result === "function") &&
          typeof result.then === "function"
        ) {
          result.then(
            (value) => settle(name, true, format(value)),
            (error) => settle(name, false, describe(error)),
          );
          return { deferred: true };
        }
        const encoded = JSON.stringify(result);
        return { value: encoded === undefined ? "null" : encoded };
      } catch (error) {
        return { error: describe(error) };
      }
    },
  });
})
"#;

/// Guest-side timer table. Evaluates to an installer taking the timer binding.
/// The host only ever sees numeric callback ids.
const TIMER_PRELUDE: &str = r#"
((timer) => {
  const pending = new Map();
  let nextId = 1;

  globalThis.setTimeout = (callback, delay, ...args) => {
    if (typeof callback !== "function") {
      throw new TypeError("setTimeout callback must be a function");
    }
    const id = nextId++;
    pending.set(id, () => callback(...args));
    const ms = Number(delay);
    timer.scheduleAfter(id, Number.isFinite(ms) && ms > 0 ? ms : 0);
    return id;
  };
  globalThis.clearTimeout = (id) => {
    pending.delete(id);
  };

  Object.defineProperty(globalThis, "__hotswap_fire", {
    value: (id) => {
      const callback = pending.get(id);
      if (callback === undefined) return false;
      pending.delete(id);
      try {
        callback();
        return true;
      } catch (error) {
        return globalThis.__hotswap_describe(error);
      }
    },
  });
})
"#;

/// Readable message for an engine error, pulling the pending exception
/// out of the context when there is one.
pub(crate) fn describe(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if !matches!(err, rquickjs::Error::Exception) {
        return err.to_string();
    }

    let caught = ctx.catch();
    if let Some(exception) = caught.as_exception() {
        let message = exception.message().unwrap_or_else(|| "uncaught exception".into());
        return match exception.stack() {
            Some(stack) if !stack.trim().is_empty() => {
                format!("{message}\n{}", stack.trim_end())
            }
            _ => message,
        };
    }
    if let Some(text) = caught.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    "uncaught exception".to_string()
}

pub(crate) fn install_host<'js>(
    ctx: &Ctx<'js>,
    sink: Rc<RefCell<OutputSink>>,
    log: Arc<dyn LogSink>,
) -> rquickjs::Result<()> {
    let write = Function::new(ctx.clone(), move |chunk: String| {
        sink.borrow_mut().write_str(&chunk);
    })?;
    let settle = Function::new(ctx.clone(), move |entry: String, ok: bool, text: String| {
        if ok {
            log.log_line(&format!("{entry} resolved with: {text}"), Tag::Lifecycle);
        } else {
            log.log_line(&format!("{entry} rejected: {text}"), Tag::Error);
        }
    })?;

    let installer: Function = ctx.eval(HOST_PRELUDE)?;
    installer.call::<_, ()>((write, settle))
}

pub(crate) fn install_timer<'js>(
    ctx: &Ctx<'js>,
    name: &str,
    bridge: TimerBridge,
    with_shims: bool,
) -> rquickjs::Result<()> {
    let schedule = Function::new(ctx.clone(), move |callback: f64, delay_ms: f64| {
        bridge.schedule(CallbackId(callback as u64), delay_ms);
    })?;
    let binding = Object::new(ctx.clone())?;
    binding.set("scheduleAfter", schedule)?;
    ctx.globals().set(name, binding.clone())?;

    if with_shims {
        let installer: Function = ctx.eval(TIMER_PRELUDE)?;
        installer.call::<_, ()>((binding,))?;
    }
    Ok(())
}

/// Result of applying an entry point, as reported by the guest shim.
pub(crate) enum Applied {
    Returned(String),
    Deferred,
    Raised(String),
}

pub(crate) fn apply<'js>(
    ctx: &Ctx<'js>,
    entry: Function<'js>,
    name: &str,
    args_json: &str,
) -> rquickjs::Result<Applied> {
    let apply: Function = ctx.globals().get(APPLY)?;
    let outcome: Object = apply.call((entry, name.to_string(), args_json.to_string()))?;

    if let Some(message) = outcome.get::<_, Option<String>>("error")? {
        return Ok(Applied::Raised(message));
    }
    if outcome.get::<_, Option<bool>>("deferred")?.unwrap_or(false) {
        return Ok(Applied::Deferred);
    }
    let value = outcome
        .get::<_, Option<String>>("value")?
        .unwrap_or_else(|| "null".to_string());
    Ok(Applied::Returned(value))
}

/// Outcome of running a fired timer closure.
pub(crate) enum Fired {
    Ran,
    Cleared,
    Raised(String),
}

pub(crate) fn fire<'js>(ctx: &Ctx<'js>, callback: CallbackId) -> rquickjs::Result<Fired> {
    let globals = ctx.globals();
    if !globals.contains_key(FIRE)? {
        return Ok(Fired::Cleared);
    }
    let fire: Function = globals.get(FIRE)?;
    let outcome: Value = fire.call((callback.0 as f64,))?;

    if let Some(text) = outcome.as_string() {
        return Ok(Fired::Raised(text.to_string()?));
    }
    match outcome.as_bool() {
        Some(true) => Ok(Fired::Ran),
        _ => Ok(Fired::Cleared),
    }
}
