//! The ambient window/document services a mini-app schedules work on.
//!
//! `HostWindow` owns a deterministic virtual clock plus the timer, animation
//! frame, event listener and resize observer registries. It never invokes a
//! callback itself: `next_due` hands due work back to the caller, which keeps
//! this type independent of the script engine and keeps borrows short.

use std::collections::{BTreeMap, VecDeque};

use serde::Serialize;

use crate::{config::limits, dom::NodeKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "key")]
pub enum EventTarget {
    Window,
    Document,
    Element(NodeKey),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DueKind {
    Timer { handle: u32, repeating: bool },
    Frame { handle: u32 },
}

#[derive(Debug, Clone)]
pub struct Due<C> {
    pub kind: DueKind,
    pub callback: C,
    pub at_ms: u64,
}

struct Timer<C> {
    callback: C,
    due_ms: u64,
    interval_ms: Option<u64>,
    seq: u64,
}

struct Listener<C> {
    id: u32,
    target: EventTarget,
    event_type: String,
    callback: C,
}

struct Observer<C> {
    callback: C,
    observed: Vec<NodeKey>,
}

pub struct HostWindow<C> {
    now_ms: u64,
    frame_interval_ms: u64,
    next_id: u32,
    seq: u64,
    timers: BTreeMap<u32, Timer<C>>,
    frames: Vec<(u32, C)>,
    frame_batch: VecDeque<(u32, C)>,
    listeners: Vec<Listener<C>>,
    observers: BTreeMap<u32, Observer<C>>,
    viewport: (u32, u32),
}

impl<C> Default for HostWindow<C> {
    fn default() -> Self {
        Self::new(limits::DEFAULT_FRAME_INTERVAL_MS)
    }
}

impl<C> HostWindow<C> {
    pub fn new(frame_interval_ms: u64) -> Self {
        Self {
            now_ms: 0,
            frame_interval_ms: frame_interval_ms.max(1),
            next_id: 1,
            seq: 0,
            timers: BTreeMap::new(),
            frames: Vec::new(),
            frame_batch: VecDeque::new(),
            listeners: Vec::new(),
            observers: BTreeMap::new(),
            viewport: limits::DEFAULT_VIEWPORT,
        }
    }

    fn mint_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.frame_interval_ms
    }

    // ------------------------------------------------------------------
    // Timers
    // ------------------------------------------------------------------

    pub fn set_timer(&mut self, callback: C, delay_ms: u64, repeat: bool) -> u32 {
        let delay = delay_ms.max(limits::MIN_TIMER_DELAY_MS);
        let handle = self.mint_id();
        let seq = self.next_seq();
        self.timers.insert(
            handle,
            Timer {
                callback,
                due_ms: self.now_ms + delay,
                interval_ms: repeat.then_some(delay),
                seq,
            },
        );
        handle
    }

    /// Returns whether a live timer was removed.
    pub fn clear_timer(&mut self, handle: u32) -> bool {
        self.timers.remove(&handle).is_some()
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    // ------------------------------------------------------------------
    // Animation frames
    // ------------------------------------------------------------------

    pub fn request_frame(&mut self, callback: C) -> u32 {
        let handle = self.mint_id();
        self.frames.push((handle, callback));
        handle
    }

    pub fn cancel_frame(&mut self, handle: u32) -> bool {
        let before = self.frames.len() + self.frame_batch.len();
        self.frames.retain(|(h, _)| *h != handle);
        self.frame_batch.retain(|(h, _)| *h != handle);
        before != self.frames.len() + self.frame_batch.len()
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len() + self.frame_batch.len()
    }

    fn next_frame_boundary(&self) -> u64 {
        (self.now_ms / self.frame_interval_ms + 1) * self.frame_interval_ms
    }

    // ------------------------------------------------------------------
    // Event listeners
    // ------------------------------------------------------------------

    pub fn add_listener(&mut self, target: EventTarget, event_type: &str, callback: C) -> u32 {
        let id = self.mint_id();
        self.listeners.push(Listener {
            id,
            target,
            event_type: event_type.to_string(),
            callback,
        });
        id
    }

    pub fn remove_listener(&mut self, id: u32) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|l| l.id != id);
        before != self.listeners.len()
    }

    /// Id of the first listener on `target`/`event_type` whose callback matches.
    pub fn find_listener<P>(&self, target: EventTarget, event_type: &str, mut matches: P) -> Option<u32>
    where
        P: FnMut(&C) -> bool,
    {
        self.listeners
            .iter()
            .find(|l| l.target == target && l.event_type == event_type && matches(&l.callback))
            .map(|l| l.id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // ------------------------------------------------------------------
    // Resize observers
    // ------------------------------------------------------------------

    pub fn create_observer(&mut self, callback: C) -> u32 {
        let id = self.mint_id();
        self.observers.insert(
            id,
            Observer {
                callback,
                observed: Vec::new(),
            },
        );
        id
    }

    pub fn observe(&mut self, id: u32, key: NodeKey) -> bool {
        match self.observers.get_mut(&id) {
            Some(observer) => {
                if !observer.observed.contains(&key) {
                    observer.observed.push(key);
                }
                true
            }
            None => false,
        }
    }

    pub fn unobserve(&mut self, id: u32, key: NodeKey) {
        if let Some(observer) = self.observers.get_mut(&id) {
            observer.observed.retain(|k| *k != key);
        }
    }

    pub fn disconnect(&mut self, id: u32) -> bool {
        self.observers.remove(&id).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    /// Move the clock forward to `until` once no more work is due.
    pub fn finish(&mut self, until_ms: u64) {
        self.now_ms = self.now_ms.max(until_ms);
    }
}

impl<C: Clone> HostWindow<C> {
    /// Pop the next unit of work due at or before `until_ms`, advancing the clock to it.
    ///
    /// Timers fire before a frame batch scheduled for the same instant. Frames
    /// requested while a batch is running wait for the following boundary.
    pub fn next_due(&mut self, until_ms: u64) -> Option<Due<C>> {
        if let Some((handle, callback)) = self.frame_batch.pop_front() {
            return Some(Due {
                kind: DueKind::Frame { handle },
                callback,
                at_ms: self.now_ms,
            });
        }

        let next_timer = self
            .timers
            .iter()
            .min_by_key(|(_, t)| (t.due_ms, t.seq))
            .map(|(handle, t)| (*handle, t.due_ms));
        let next_frame = (!self.frames.is_empty()).then(|| self.next_frame_boundary());

        match (next_timer, next_frame) {
            (Some((handle, due)), frame) if frame.map_or(true, |f| due <= f) => {
                if due > until_ms {
                    return None;
                }
                self.now_ms = self.now_ms.max(due);
                self.fire_timer(handle)
            }
            (_, Some(boundary)) => {
                if boundary > until_ms {
                    return None;
                }
                self.now_ms = boundary;
                self.frame_batch.extend(self.frames.drain(..));
                let (handle, callback) = self.frame_batch.pop_front()?;
                Some(Due {
                    kind: DueKind::Frame { handle },
                    callback,
                    at_ms: self.now_ms,
                })
            }
            _ => None,
        }
    }

    fn fire_timer(&mut self, handle: u32) -> Option<Due<C>> {
        let seq = self.next_seq();
        let now = self.now_ms;
        let timer = self.timers.get_mut(&handle)?;
        let interval = timer.interval_ms;
        match interval {
            Some(interval) => {
                timer.due_ms = now + interval;
                timer.seq = seq;
                Some(Due {
                    kind: DueKind::Timer {
                        handle,
                        repeating: true,
                    },
                    callback: timer.callback.clone(),
                    at_ms: now,
                })
            }
            None => {
                let timer = self.timers.remove(&handle)?;
                Some(Due {
                    kind: DueKind::Timer {
                        handle,
                        repeating: false,
                    },
                    callback: timer.callback,
                    at_ms: now,
                })
            }
        }
    }

    pub fn listeners_for(&self, target: EventTarget, event_type: &str) -> Vec<(u32, C)> {
        self.listeners
            .iter()
            .filter(|l| l.target == target && l.event_type == event_type)
            .map(|l| (l.id, l.callback.clone()))
            .collect()
    }

    /// Observers watching any of `keys`, with the keys they watch.
    pub fn observers_for(&self, keys: &[NodeKey]) -> Vec<(u32, C, Vec<NodeKey>)> {
        self.observers
            .iter()
            .filter_map(|(id, o)| {
                let hits: Vec<NodeKey> = o
                    .observed
                    .iter()
                    .copied()
                    .filter(|k| keys.contains(k))
                    .collect();
                (!hits.is_empty()).then(|| (*id, o.callback.clone(), hits))
            })
            .collect()
    }
}
