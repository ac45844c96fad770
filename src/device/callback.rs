// SPDX-License-Identifier: GPL-3.0-or-later

//! Application callback dispatch (§4.3): a glob pattern, a function
//! pointer, and opaque userdata, matched against `device.element` in
//! registration order. Grounded in `ve_dev_intf.c`'s handler list walk.

use std::sync::RwLock;

use super::glob;
use super::DeviceEvent;

pub type Callback = Box<dyn Fn(&DeviceEvent, &dyn std::any::Any) + Send + Sync>;

struct Entry {
    pattern: String,
    callback: Callback,
    userdata: Box<dyn std::any::Any + Send + Sync>,
}

/// Registered callbacks, tried in registration order; every pattern
/// that matches fires, there is no first-match-wins short-circuit
/// (unlike the exact/wildcard handler table in the MP coordinator).
#[derive(Default)]
pub struct CallbackRegistry {
    entries: RwLock<Vec<Entry>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry::default()
    }

    pub fn register(
        &self,
        pattern: impl Into<String>,
        userdata: impl std::any::Any + Send + Sync,
        callback: Callback,
    ) {
        self.entries.write().unwrap().push(Entry {
            pattern: pattern.into(),
            callback,
            userdata: Box::new(userdata),
        });
    }

    /// Dispatches `event` to every registered callback whose pattern
    /// matches `device.element`.
    pub fn dispatch(&self, event: &DeviceEvent) {
        let qualified = event.qualified_name();
        for entry in self.entries.read().unwrap().iter() {
            if glob::matches(&entry.pattern, &qualified) {
                (entry.callback)(event, entry.userdata.as_ref());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Content;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_matches_in_registration_order() {
        let registry = CallbackRegistry::new();
        let order: Arc<std::sync::Mutex<Vec<&'static str>>> = Arc::new(std::sync::Mutex::new(Vec::new()));

        let order_a = order.clone();
        registry.register(
            "joy.*",
            (),
            Box::new(move |_ev, _ud| order_a.lock().unwrap().push("joy-star")),
        );
        let order_b = order.clone();
        registry.register(
            "*",
            (),
            Box::new(move |_ev, _ud| order_b.lock().unwrap().push("catch-all")),
        );

        let event = DeviceEvent::new("joy", "ax0", Content::Trigger);
        registry.dispatch(&event);

        assert_eq!(*order.lock().unwrap(), vec!["joy-star", "catch-all"]);
    }

    #[test]
    fn dispatch_skips_non_matching_patterns() {
        let registry = CallbackRegistry::new();
        let hit = Arc::new(AtomicUsize::new(0));
        let hit_clone = hit.clone();
        registry.register(
            "mouse.*",
            (),
            Box::new(move |_ev, _ud| {
                hit_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        let event = DeviceEvent::new("joy", "ax0", Content::Trigger);
        registry.dispatch(&event);
        assert_eq!(hit.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn userdata_is_passed_through() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(std::sync::Mutex::new(0i32));
        let seen_clone = seen.clone();
        registry.register(
            "*",
            42i32,
            Box::new(move |_ev, ud| {
                let n = *ud.downcast_ref::<i32>().unwrap();
                *seen_clone.lock().unwrap() = n;
            }),
        );
        registry.dispatch(&DeviceEvent::new("d", "e", Content::Trigger));
        assert_eq!(*seen.lock().unwrap(), 42);
    }
}
