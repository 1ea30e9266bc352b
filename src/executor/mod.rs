//! Script execution for one mounted mini-app.
//!
//! A `ScriptRealm` is a fresh boa `Context` whose global object plays the
//! instrumented window. Scripts are compiled into strict functions that take
//! the root, the window, the document and the scheduling functions as explicit
//! parameters, and run strictly in order. After mount the realm keeps driving
//! the mini-app: due timers and frames, dispatched events, resizes.

mod bridge;
mod console;

use std::{cell::RefCell, rc::Rc};

use boa_engine::{
    context::ContextBuilder,
    object::{
        builtins::{JsArray, JsFunction},
        ObjectInitializer,
    },
    Context, JsValue, NativeFunction, Source,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub use bridge::JsCallback;
pub use console::{ConsoleEntry, ConsoleLevel, ConsoleLog};

use crate::{
    config::errors::{ERR_CALLBACK, ERR_REALM_SETUP, ERR_SCRIPT_COMPILE, ERR_SCRIPT_RUNTIME},
    core::{SandboxConfig, LOG_TARGET},
    host::{DueKind, EventTarget},
    loader::LoadError,
    scope::{Guarded, Instrumented, SharedHost, SharedRoot},
    ticket::TicketGuard,
    transform::ScriptUnit,
};

const PRELUDE: &str = include_str!("prelude.js");

/// Name the normalised root reference is bound to inside every script.
pub const ROOT_PARAM: &str = "__miniappRoot";

const SCRIPT_PARAMS: &str = "__miniappRoot, window, document, setTimeout, clearTimeout, \
    setInterval, clearInterval, requestAnimationFrame, cancelAnimationFrame, ResizeObserver, console";

static GUARDED_ROOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"document\s*\.\s*currentScript\s*&&\s*document\s*\.\s*currentScript\s*(?:\?\.|\.)\s*getRootNode\s*\(\s*\)",
    )
    .expect("guarded root regex compiles")
});

static ROOT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"document\s*\.\s*currentScript\s*(?:\?\.|\.)\s*getRootNode\s*\(\s*\)")
        .expect("root regex compiles")
});

/// Replace "root of the currently executing script" with the bound root parameter.
pub fn normalize_root_references(source: &str) -> String {
    let guarded = GUARDED_ROOT_RE.replace_all(source, ROOT_PARAM);
    ROOT_RE.replace_all(&guarded, ROOT_PARAM).into_owned()
}

fn wrap_source(source: &str) -> String {
    format!(
        "(function ({SCRIPT_PARAMS}) {{\n\"use strict\";\n{}\n}})",
        normalize_root_references(source)
    )
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub executed: usize,
    pub failed: usize,
    /// Set when a newer load superseded this one before every script ran.
    pub cancelled: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveReport {
    pub fired: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct ScriptRealm {
    scope: Instrumented<JsCallback>,
    host: SharedHost<JsCallback>,
    root: SharedRoot,
    bindings: Vec<JsValue>,
    console: Rc<RefCell<ConsoleLog>>,
    // Native functions reach this through weak references only.
    _bridge: Rc<bridge::BridgeState>,
    generation: u64,
    // INVARIANT: declared last so it drops after every JS value above.
    context: Context,
}

impl std::fmt::Debug for ScriptRealm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRealm")
            .field("generation", &self.generation)
            .field("ledger", &self.scope.ledger)
            .finish_non_exhaustive()
    }
}

impl ScriptRealm {
    /// Build a realm bound to the generation currently mounted in `root`.
    pub fn new(
        root: SharedRoot,
        host: SharedHost<JsCallback>,
        config: &SandboxConfig,
    ) -> Result<Self, LoadError> {
        let mut context = ContextBuilder::new().build().map_err(|err| {
            LoadError::Realm(format!("{ERR_REALM_SETUP}: failed to construct JS context: {err}"))
        })?;
        context
            .runtime_limits_mut()
            .set_loop_iteration_limit(config.loop_iteration_limit);
        context
            .runtime_limits_mut()
            .set_recursion_limit(config.recursion_limit);

        let scope = crate::scope::instrument(root.clone(), host.clone());
        let generation = scope.ledger.generation();
        let console = Rc::new(RefCell::new(ConsoleLog::new(config.max_console_entries)));
        let state = Rc::new(bridge::BridgeState {
            window: scope.window.clone(),
            document: scope.document.clone(),
            console: console.clone(),
        });
        let bridge_object = bridge::build(&mut context, &state);

        let setup = |err: boa_engine::JsError| {
            LoadError::Realm(format!("{ERR_REALM_SETUP}: prelude failed: {err}"))
        };
        let prelude = context
            .eval(Source::from_bytes(PRELUDE.as_bytes()))
            .map_err(setup)?;
        let prelude = prelude
            .as_object()
            .cloned()
            .and_then(JsFunction::from_object)
            .ok_or_else(|| LoadError::Realm(format!("{ERR_REALM_SETUP}: prelude is not a function")))?;
        let exported = prelude
            .call(&JsValue::undefined(), &[bridge_object.into()], &mut context)
            .map_err(setup)?;
        let exported = exported
            .as_object()
            .cloned()
            .ok_or_else(|| LoadError::Realm(format!("{ERR_REALM_SETUP}: prelude returned no bindings")))?;
        let count = SCRIPT_PARAMS.split(',').count();
        let mut bindings = Vec::with_capacity(count);
        for idx in 0..count {
            bindings.push(exported.get(idx as u32, &mut context).map_err(setup)?);
        }

        tracing::debug!(target: LOG_TARGET, generation, "script realm ready");
        Ok(Self {
            scope,
            host,
            root,
            bindings,
            console,
            _bridge: state,
            generation,
            context,
        })
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn ledger_len(&self) -> usize {
        self.scope.ledger.len()
    }

    pub fn console(&self) -> Vec<ConsoleEntry> {
        self.console.borrow().entries()
    }

    fn now_ms(&self) -> u64 {
        self.host.borrow().now_ms()
    }

    fn record_error(&self, message: String) {
        let at = self.now_ms();
        self.console
            .borrow_mut()
            .push(ConsoleLevel::Error, &message, at);
    }

    fn compile(&mut self, unit: &ScriptUnit) -> Result<JsFunction, String> {
        let compiled = unit.compiled().get_or_try_init(|| {
            let wrapped = wrap_source(unit.source());
            let value = self
                .context
                .eval(Source::from_bytes(wrapped.as_bytes()))
                .map_err(|err| err.to_string())?;
            value
                .as_object()
                .cloned()
                .and_then(JsFunction::from_object)
                .ok_or_else(|| "script did not compile to a function".to_string())
        })?;
        Ok(compiled.clone())
    }

    /// Run `scripts` in order. A failing script is logged and counted; the
    /// rest still run. Stops silently once `guard` goes stale.
    pub fn run(&mut self, scripts: &[ScriptUnit], guard: &TicketGuard) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        for (index, unit) in scripts.iter().enumerate() {
            if guard.is_stale() {
                report.cancelled = true;
                break;
            }
            let origin = unit.src().unwrap_or("inline");
            let func = match self.compile(unit) {
                Ok(func) => func,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: LOG_TARGET,
                        code = ERR_SCRIPT_COMPILE,
                        index,
                        origin,
                        error = %err,
                        "script failed to compile"
                    );
                    self.record_error(format!("{ERR_SCRIPT_COMPILE}: {origin}: {err}"));
                    continue;
                }
            };
            match func.call(&JsValue::undefined(), &self.bindings, &mut self.context) {
                Ok(_) => report.executed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(
                        target: LOG_TARGET,
                        code = ERR_SCRIPT_RUNTIME,
                        index,
                        origin,
                        error = %err,
                        "script threw"
                    );
                    self.record_error(format!("{ERR_SCRIPT_RUNTIME}: {origin}: {err}"));
                }
            }
            self.context.run_jobs();
        }
        tracing::debug!(
            target: LOG_TARGET,
            ticket = guard.ticket(),
            executed = report.executed,
            failed = report.failed,
            "scripts executed"
        );
        report
    }

    fn invoke(&mut self, callback: &JsCallback, args: &[JsValue], what: &str) -> bool {
        let result = callback
            .func
            .call(&JsValue::undefined(), args, &mut self.context);
        self.context.run_jobs();
        match result {
            Ok(_) => true,
            Err(err) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    code = ERR_CALLBACK,
                    callback = what,
                    error = %err,
                    "callback threw"
                );
                self.record_error(format!("{ERR_CALLBACK}: {what}: {err}"));
                false
            }
        }
    }

    /// The callback if it belongs to this realm's live generation.
    fn live<'a>(&self, guarded: &'a Guarded<JsCallback>) -> Option<&'a JsCallback> {
        if guarded.generation() != self.generation {
            return None;
        }
        guarded.live()
    }

    /// Advance the virtual clock by `ms`, firing due timers and frames in order.
    pub fn advance(&mut self, ms: u64) -> DriveReport {
        let mut report = DriveReport::default();
        let until = self.now_ms().saturating_add(ms);
        loop {
            // INVARIANT: the host borrow ends before any callback runs.
            let due = self.host.borrow_mut().next_due(until);
            let Some(due) = due else {
                break;
            };
            let Some(callback) = self.live(&due.callback).cloned() else {
                report.skipped += 1;
                if let DueKind::Timer {
                    handle,
                    repeating: true,
                } = due.kind
                {
                    self.host.borrow_mut().clear_timer(handle);
                }
                continue;
            };
            self.scope.window.settle(due.kind);
            let (args, what) = match due.kind {
                DueKind::Timer { .. } => (callback.args.clone(), "timer"),
                DueKind::Frame { .. } => (vec![JsValue::from(due.at_ms as f64)], "animation frame"),
            };
            if self.invoke(&callback, &args, what) {
                report.fired += 1;
            } else {
                report.failed += 1;
            }
        }
        self.host.borrow_mut().finish(until);
        report
    }

    /// Invoke every live listener for `event_type` on `target`.
    pub fn dispatch_event(&mut self, target: EventTarget, event_type: &str) -> DriveReport {
        let mut report = DriveReport::default();
        let listeners = self.host.borrow().listeners_for(target, event_type);
        for (_, guarded) in listeners {
            let Some(callback) = self.live(&guarded).cloned() else {
                report.skipped += 1;
                continue;
            };
            let event = self.event_object(event_type);
            if self.invoke(&callback, &[event], "event listener") {
                report.fired += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    fn event_object(&mut self, event_type: &str) -> JsValue {
        let noop = NativeFunction::from_copy_closure(|_this, _args, _ctx| Ok(JsValue::undefined()));
        let stop = NativeFunction::from_copy_closure(|_this, _args, _ctx| Ok(JsValue::undefined()));
        let now = self.now_ms() as f64;
        ObjectInitializer::new(&mut self.context)
            .property(
                boa_engine::js_string!("type"),
                boa_engine::JsString::from(event_type),
                boa_engine::property::Attribute::all(),
            )
            .property(
                boa_engine::js_string!("timeStamp"),
                now,
                boa_engine::property::Attribute::all(),
            )
            .function(noop, boa_engine::js_string!("preventDefault"), 0)
            .function(stop, boa_engine::js_string!("stopPropagation"), 0)
            .build()
            .into()
    }

    /// Update the viewport, notify resize observers watching the root or any
    /// element in it, then dispatch `resize` on the window.
    pub fn resize(&mut self, width: u32, height: u32) -> DriveReport {
        self.host.borrow_mut().set_viewport(width, height);
        let keys = self.root.borrow().attached_keys();
        let observers = self.host.borrow().observers_for(&keys);
        let mut report = DriveReport::default();
        for (_, guarded, watched) in observers {
            let Some(callback) = self.live(&guarded).cloned() else {
                report.skipped += 1;
                continue;
            };
            let entries: Vec<JsValue> = watched
                .into_iter()
                .map(|key| {
                    JsArray::from_iter(
                        [
                            JsValue::from(key.0 as f64),
                            JsValue::from(width),
                            JsValue::from(height),
                        ],
                        &mut self.context,
                    )
                    .into()
                })
                .collect();
            let entries = JsArray::from_iter(entries, &mut self.context);
            if self.invoke(&callback, &[entries.into()], "resize observer") {
                report.fired += 1;
            } else {
                report.failed += 1;
            }
        }
        let window = self.dispatch_event(EventTarget::Window, "resize");
        report.fired += window.fired;
        report.skipped += window.skipped;
        report.failed += window.failed;
        report
    }
}

impl Drop for ScriptRealm {
    /// Release this generation's timers, frames, listeners and observers while
    /// the context that created their JS functions is still alive.
    fn drop(&mut self) {
        self.scope.ledger.dispose();
        let report = self.scope.ledger.drain();
        self.bindings.clear();
        if report.released > 0 || report.failed > 0 {
            tracing::debug!(
                target: LOG_TARGET,
                generation = self.generation,
                released = report.released,
                failed = report.failed,
                "script realm dropped with live resources"
            );
        }
    }
}
