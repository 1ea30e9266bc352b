//! Native functions the JS prelude builds its facades on.
//!
//! Every resource-creating native goes through the instrumented facades, so a
//! script can only reach the host through the ledger.

use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};

use boa_engine::{
    object::{
        builtins::{JsArray, JsFunction},
        ObjectInitializer,
    },
    Context, JsArgs, JsNativeError, JsObject, JsResult, JsString, JsValue, NativeFunction,
};

use super::console::{ConsoleLevel, ConsoleLog};
use crate::{
    dom::NodeKey,
    scope::{InstrumentedDocument, InstrumentedWindow},
};

/// A JS function plus the extra arguments it was scheduled with.
#[derive(Debug, Clone)]
pub struct JsCallback {
    pub func: JsFunction,
    pub args: Vec<JsValue>,
}

impl JsCallback {
    pub fn new(func: JsFunction) -> Self {
        Self {
            func,
            args: Vec::new(),
        }
    }

    fn is(&self, other: &JsFunction) -> bool {
        JsObject::equals(&self.func, other)
    }
}

pub(crate) struct BridgeState {
    pub window: InstrumentedWindow<JsCallback>,
    pub document: InstrumentedDocument<JsCallback>,
    pub console: Rc<RefCell<ConsoleLog>>,
}

type Native = fn(&BridgeState, &[JsValue], &mut Context) -> JsResult<JsValue>;

fn bind(state: &Rc<BridgeState>, f: Native) -> NativeFunction {
    let state: Weak<BridgeState> = Rc::downgrade(state);
    // SAFETY: the closure captures a `Weak<BridgeState>` and a fn pointer.
    // Neither owns a GC-managed value, and dropping the closure never drops
    // one: the only strong reference lives in `ScriptRealm`, outside the JS
    // heap, and the realm releases its host entries before its context drops.
    unsafe {
        NativeFunction::from_closure(move |_this, args, ctx| match state.upgrade() {
            Some(state) => f(&state, args, ctx),
            None => Err(type_error("the mini-app this function belonged to is unloaded")),
        })
    }
}

/// Build the object handed to the prelude.
pub(crate) fn build(context: &mut Context, state: &Rc<BridgeState>) -> JsObject {
    let natives: [(&str, usize, Native); 27] = [
        ("setTimeout", 2, set_timeout),
        ("setInterval", 2, set_interval),
        ("clearTimer", 1, clear_timer),
        ("requestFrame", 1, request_frame),
        ("cancelFrame", 1, cancel_frame),
        ("addListener", 4, add_listener),
        ("removeListener", 4, remove_listener),
        ("createObserver", 1, create_observer),
        ("observe", 2, observe),
        ("unobserve", 2, unobserve),
        ("disconnect", 1, disconnect),
        ("now", 0, now),
        ("viewport", 0, viewport),
        ("dpr", 0, dpr),
        ("rootKey", 0, root_key),
        ("getById", 1, get_by_id),
        ("createElement", 1, create_element),
        ("tagName", 1, tag_name),
        ("getText", 1, get_text),
        ("setText", 2, set_text),
        ("getAttr", 2, get_attr),
        ("setAttr", 3, set_attr),
        ("appendChild", 2, append_child),
        ("remove", 1, remove),
        ("isConnected", 1, is_connected),
        ("takeDropped", 0, take_dropped),
        ("console", 2, console),
    ];
    let mut bridge = ObjectInitializer::new(context);
    for (name, length, f) in natives {
        bridge.function(bind(state, f), JsString::from(name), length);
    }
    bridge.build()
}

// ----------------------------------------------------------------------------
// Argument helpers
// ----------------------------------------------------------------------------

fn type_error(message: &str) -> boa_engine::JsError {
    JsNativeError::typ().with_message(message).into()
}

fn arg_string(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<String> {
    Ok(args.get_or_undefined(idx).to_string(ctx)?.to_std_string_escaped())
}

fn arg_u32(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<u32> {
    let n = args.get_or_undefined(idx).to_number(ctx)?;
    Ok(if n.is_finite() && n > 0.0 { n as u32 } else { 0 })
}

fn arg_key(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<NodeKey> {
    let n = args.get_or_undefined(idx).to_number(ctx)?;
    if n.is_finite() && n >= 0.0 {
        Ok(NodeKey(n as u64))
    } else {
        Err(type_error("expected an element of this mini-app"))
    }
}

fn arg_delay(args: &[JsValue], idx: usize, ctx: &mut Context) -> JsResult<u64> {
    let value = args.get_or_undefined(idx);
    if value.is_undefined() {
        return Ok(0);
    }
    let n = value.to_number(ctx)?;
    Ok(if n.is_finite() && n > 0.0 { n as u64 } else { 0 })
}

fn arg_function(args: &[JsValue], idx: usize) -> Option<JsFunction> {
    args.get_or_undefined(idx)
        .as_object()
        .cloned()
        .and_then(JsFunction::from_object)
}

fn arg_callback(args: &[JsValue], idx: usize) -> JsResult<JsFunction> {
    arg_function(args, idx).ok_or_else(|| type_error("callback must be a function"))
}

fn opt_string(value: Option<String>) -> JsValue {
    match value {
        Some(s) => JsValue::from(JsString::from(s.as_str())),
        None => JsValue::null(),
    }
}

fn key_value(key: NodeKey) -> JsValue {
    JsValue::from(key.0 as f64)
}

// ----------------------------------------------------------------------------
// Timers and frames
// ----------------------------------------------------------------------------

fn schedule(s: &BridgeState, args: &[JsValue], ctx: &mut Context, repeat: bool) -> JsResult<JsValue> {
    let func = arg_callback(args, 0)?;
    let delay = arg_delay(args, 1, ctx)?;
    let callback = JsCallback {
        func,
        args: args.iter().skip(2).cloned().collect(),
    };
    let handle = if repeat {
        s.window.set_interval(callback, delay)
    } else {
        s.window.set_timeout(callback, delay)
    };
    Ok(JsValue::from(handle))
}

fn set_timeout(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    schedule(s, args, ctx, false)
}

fn set_interval(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    schedule(s, args, ctx, true)
}

fn clear_timer(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let handle = arg_u32(args, 0, ctx)?;
    s.window.clear_timer(handle);
    Ok(JsValue::undefined())
}

fn request_frame(s: &BridgeState, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let func = arg_callback(args, 0)?;
    Ok(JsValue::from(s.window.request_animation_frame(JsCallback::new(func))))
}

fn cancel_frame(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let handle = arg_u32(args, 0, ctx)?;
    s.window.cancel_animation_frame(handle);
    Ok(JsValue::undefined())
}

// ----------------------------------------------------------------------------
// Listeners and observers
// ----------------------------------------------------------------------------

/// Listener target encoding shared with the prelude: 0 window, 1 document, 2 element.
fn add_listener(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let kind = arg_u32(args, 0, ctx)?;
    let event_type = arg_string(args, 2, ctx)?;
    let Some(func) = arg_function(args, 3) else {
        return Ok(JsValue::undefined());
    };
    let callback = JsCallback::new(func);
    match kind {
        0 => s.window.add_event_listener(&event_type, callback),
        1 => s.document.add_event_listener(&event_type, callback),
        _ => {
            let key = arg_key(args, 1, ctx)?;
            s.document.add_element_listener(key, &event_type, callback)
        }
    };
    Ok(JsValue::undefined())
}

fn remove_listener(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let kind = arg_u32(args, 0, ctx)?;
    let event_type = arg_string(args, 2, ctx)?;
    let Some(func) = arg_function(args, 3) else {
        return Ok(JsValue::from(false));
    };
    let matches = |cb: &JsCallback| cb.is(&func);
    let removed = match kind {
        0 => s.window.remove_event_listener(&event_type, matches),
        1 => s.document.remove_event_listener(&event_type, matches),
        _ => {
            let key = arg_key(args, 1, ctx)?;
            s.document.remove_element_listener(key, &event_type, matches)
        }
    };
    Ok(JsValue::from(removed))
}

fn create_observer(s: &BridgeState, args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    let func = arg_callback(args, 0)?;
    Ok(JsValue::from(s.window.create_resize_observer(JsCallback::new(func))))
}

fn observe(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let id = arg_u32(args, 0, ctx)?;
    let key = arg_key(args, 1, ctx)?;
    Ok(JsValue::from(s.window.observe(id, key)))
}

fn unobserve(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let id = arg_u32(args, 0, ctx)?;
    let key = arg_key(args, 1, ctx)?;
    s.window.unobserve(id, key);
    Ok(JsValue::undefined())
}

fn disconnect(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let id = arg_u32(args, 0, ctx)?;
    s.window.disconnect_observer(id);
    Ok(JsValue::undefined())
}

// ----------------------------------------------------------------------------
// Pass-through window and document
// ----------------------------------------------------------------------------

fn now(s: &BridgeState, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(s.window.now_ms() as f64))
}

fn viewport(s: &BridgeState, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let (width, height) = s.window.viewport();
    let size = JsArray::from_iter([JsValue::from(width), JsValue::from(height)], ctx);
    Ok(size.into())
}

fn dpr(s: &BridgeState, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(JsValue::from(s.window.device_pixel_ratio()))
}

fn root_key(s: &BridgeState, _args: &[JsValue], _ctx: &mut Context) -> JsResult<JsValue> {
    Ok(key_value(s.document.root_key()))
}

fn get_by_id(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let id = arg_string(args, 0, ctx)?;
    Ok(s.document
        .get_element_by_id(&id)
        .map(key_value)
        .unwrap_or_else(JsValue::null))
}

fn create_element(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let tag = arg_string(args, 0, ctx)?;
    Ok(key_value(s.document.create_element(&tag)))
}

fn tag_name(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    Ok(opt_string(s.document.tag_name(key)))
}

fn get_text(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    Ok(opt_string(s.document.text_content(key)))
}

fn set_text(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    let text = arg_string(args, 1, ctx)?;
    Ok(JsValue::from(s.document.set_text_content(key, &text)))
}

fn get_attr(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    let name = arg_string(args, 1, ctx)?;
    Ok(opt_string(s.document.get_attribute(key, &name)))
}

fn set_attr(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    let name = arg_string(args, 1, ctx)?;
    let value = arg_string(args, 2, ctx)?;
    Ok(JsValue::from(s.document.set_attribute(key, &name, &value)))
}

fn append_child(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let parent = arg_key(args, 0, ctx)?;
    let child = arg_key(args, 1, ctx)?;
    if !s.document.append_child(parent, child) {
        return Err(JsNativeError::error()
            .with_message("appendChild: the new child cannot be inserted here")
            .into());
    }
    Ok(JsValue::undefined())
}

fn remove(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    Ok(JsValue::from(s.document.remove(key)))
}

fn is_connected(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let key = arg_key(args, 0, ctx)?;
    Ok(JsValue::from(s.document.is_connected(key)))
}

fn take_dropped(s: &BridgeState, _args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let keys = s.document.take_dropped().into_iter().map(key_value);
    Ok(JsArray::from_iter(keys, ctx).into())
}

fn console(s: &BridgeState, args: &[JsValue], ctx: &mut Context) -> JsResult<JsValue> {
    let level = ConsoleLevel::parse(&arg_string(args, 0, ctx)?);
    let message = arg_string(args, 1, ctx)?;
    let at = s.window.now_ms();
    s.console.borrow_mut().push(level, &message, at);
    Ok(JsValue::undefined())
}
