// SPDX-License-Identifier: GPL-3.0-or-later

//! C3 — device-event core.
//!
//! Accepts events produced by drivers, runs them through per-device
//! filter chains, dispatches survivors to application callbacks matched
//! by glob. Grounded in `ve_dev_intf.c`.

pub mod callback;
pub mod expr;
pub mod filter;
pub mod glob;
pub mod pseudo;
pub mod registry;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

pub use callback::CallbackRegistry;
pub use filter::{FilterChain, FilterOutcome};
pub use registry::DeviceRegistry;

/// A typed event element value. A filter may change a content's variant
/// only by replacing the content wholesale; fields in the original are
/// never overwritten across variants (§3 invariant).
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    Trigger,
    Switch { state: i32 },
    Keyboard { keysym: u32, state: i32 },
    Valuator { value: f64, min: f64, max: f64 },
    Vector { values: Vec<(f64, f64, f64)> },
}

impl Content {
    pub fn variant_name(&self) -> &'static str {
        match self {
            Content::Trigger => "trigger",
            Content::Switch { .. } => "switch",
            Content::Keyboard { .. } => "keyboard",
            Content::Valuator { .. } => "valuator",
            Content::Vector { .. } => "vector",
        }
    }

    /// True when min and max are both zero — "unbounded" (§3).
    pub fn is_unbounded_range(min: f64, max: f64) -> bool {
        min == 0.0 && max == 0.0
    }
}

/// A timestamp (monotonic milliseconds), a device name, an element
/// name, and typed content (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEvent {
    pub timestamp_ms: u64,
    pub device: String,
    pub element: String,
    pub content: Content,
}

impl DeviceEvent {
    pub fn new(device: impl Into<String>, element: impl Into<String>, content: Content) -> Self {
        DeviceEvent {
            timestamp_ms: now_ms(),
            device: device.into(),
            element: element.into(),
            content,
        }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.device, self.element)
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single-process FIFO queue with a head-push primitive, used by the
/// `copy` filter to re-inject a modified duplicate ahead of everything
/// else (§4.3). Serialized by a mutex; head-push and tail-pop are
/// atomic with respect to each other.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<VecDeque<Box<DeviceEvent>>>,
    not_empty: Condvar,
}

impl EventQueue {
    pub fn new() -> Self {
        EventQueue {
            inner: Mutex::new(VecDeque::new()),
            not_empty: Condvar::new(),
        }
    }

    /// Enqueues an event at the tail (a driver calling `insert`).
    pub fn insert(&self, event: DeviceEvent) {
        let mut q = self.inner.lock().unwrap();
        q.push_back(Box::new(event));
        self.not_empty.notify_one();
    }

    /// Enqueues an event at the head (used by the `copy` filter).
    pub fn push_front(&self, event: DeviceEvent) {
        let mut q = self.inner.lock().unwrap();
        q.push_front(Box::new(event));
        self.not_empty.notify_one();
    }

    /// Dequeues the oldest event, taking ownership; the processing loop
    /// frees it after dispatch by simply dropping it.
    pub fn pop(&self) -> Option<Box<DeviceEvent>> {
        let mut q = self.inner.lock().unwrap();
        q.pop_front()
    }

    /// Blocks until an event is available or the timeout elapses.
    pub fn pop_wait(&self, timeout: std::time::Duration) -> Option<Box<DeviceEvent>> {
        let mut q = self.inner.lock().unwrap();
        if q.is_empty() {
            let (guard, _result) = self
                .not_empty
                .wait_timeout_while(q, timeout, |q| q.is_empty())
                .unwrap();
            q = guard;
        }
        q.pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_is_fifo() {
        let q = EventQueue::new();
        q.insert(DeviceEvent::new("d", "a", Content::Trigger));
        q.insert(DeviceEvent::new("d", "b", Content::Trigger));
        assert_eq!(q.pop().unwrap().element, "a");
        assert_eq!(q.pop().unwrap().element, "b");
        assert!(q.pop().is_none());
    }

    #[test]
    fn push_front_jumps_the_queue() {
        let q = EventQueue::new();
        q.insert(DeviceEvent::new("d", "a", Content::Trigger));
        q.push_front(DeviceEvent::new("d", "z", Content::Trigger));
        assert_eq!(q.pop().unwrap().element, "z");
        assert_eq!(q.pop().unwrap().element, "a");
    }
}
