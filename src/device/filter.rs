// SPDX-License-Identifier: GPL-3.0-or-later

//! Filter chain semantics (§4.3): rename, copy, clamp, dump, and the
//! `convert` family (`to_trigger`, `to_switch`, `to_valuator`,
//! `to_keyboard`, `to_oneshot`). Each filter instance holds a pointer to
//! a shared filter definition plus per-instance parameters, modeled
//! here as a capability set behind a trait (§9 "Plain-function 'virtual
//! dispatch'").

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use super::expr;
use super::glob;
use super::registry::DeviceRegistry;
use super::{Content, DeviceEvent, EventQueue};
use crate::error::DeviceError;

/// Result of running one filter instance over an event.
pub enum FilterOutcome {
    /// The event (possibly modified in place) passes through.
    Continue,
    /// The event is dropped silently.
    Discard,
    /// The event is dropped and a warning is logged (§4.3 failure
    /// model: "A filter returning ERROR drops the event and logs
    /// once").
    Error(DeviceError),
}

/// Per-instance configuration, the named-parameter grammar shared by
/// `rename`/`copy` (dotted pattern) and `convert` (key=value pairs).
#[derive(Debug, Clone, Default)]
pub struct FilterParams {
    values: HashMap<String, String>,
}

impl FilterParams {
    pub fn new() -> Self {
        FilterParams::default()
    }

    pub fn with(mut self, key: &str, value: impl ToString) -> Self {
        self.values.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.values.get(key).and_then(|s| s.parse().ok())
    }

    pub fn get_i32(&self, key: &str) -> Option<i32> {
        self.values.get(key).and_then(|s| s.parse().ok())
    }
}

/// A filter instance: a named handler plus bound parameters, matched
/// against a device/element glob pattern.
pub struct FilterInstance {
    pub pattern: String,
    pub kind: FilterKind,
    pub params: FilterParams,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Rename,
    Copy,
    Clamp,
    Dump,
    ToTrigger,
    ToSwitch,
    ToValuator,
    ToKeyboard,
    ToOneshot,
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Rename => "rename",
            FilterKind::Copy => "copy",
            FilterKind::Clamp => "clamp",
            FilterKind::Dump => "dump",
            FilterKind::ToTrigger => "to_trigger",
            FilterKind::ToSwitch => "to_switch",
            FilterKind::ToValuator => "to_valuator",
            FilterKind::ToKeyboard => "to_keyboard",
            FilterKind::ToOneshot => "to_oneshot",
        }
    }
}

impl FilterInstance {
    pub fn new(pattern: impl Into<String>, kind: FilterKind, params: FilterParams) -> Self {
        FilterInstance { pattern: pattern.into(), kind, params }
    }

    /// Applies this filter in place. `queue` is the head of the event
    /// queue, used by `copy` to re-inject a duplicate. `registry` is
    /// only consulted by `dump`, to flag events from a device/element
    /// pair nobody registered.
    fn apply(&self, event: &mut DeviceEvent, queue: &EventQueue, registry: Option<&DeviceRegistry>) -> FilterOutcome {
        match self.kind {
            FilterKind::Rename => {
                rename_pattern(&self.params_pattern(), &mut event.device, &mut event.element);
                FilterOutcome::Continue
            }
            FilterKind::Copy => {
                let mut copy = event.clone();
                rename_pattern(&self.params_pattern(), &mut copy.device, &mut copy.element);
                queue.push_front(copy);
                FilterOutcome::Continue
            }
            FilterKind::Clamp => apply_clamp(&mut event.content),
            FilterKind::Dump => {
                let unregistered = registry
                    .map(|r| !r.is_registered(&event.device, &event.element))
                    .unwrap_or(false);
                let note = if unregistered { " (unregistered)" } else { "" };
                debug!(
                    device = %event.device,
                    element = %event.element,
                    timestamp = event.timestamp_ms,
                    content = ?event.content,
                    unregistered,
                    "device event{}", note
                );
                FilterOutcome::Continue
            }
            FilterKind::ToTrigger
            | FilterKind::ToSwitch
            | FilterKind::ToValuator
            | FilterKind::ToKeyboard
            | FilterKind::ToOneshot => apply_convert(self.kind, &self.params, event),
        }
    }

    /// `rename`/`copy` take their dotted pattern as the filter's own
    /// (otherwise-unused) glob pattern slot, consistent with the
    /// original's `filter foo.bar { copy }` configuration syntax.
    fn params_pattern(&self) -> String {
        self.params
            .get_str("pattern")
            .unwrap_or(&self.pattern)
            .to_string()
    }
}

/// `d.e` replaces both; `d.` leaves element untouched; `.e` leaves
/// device untouched; either half may be empty (§8 round-trip law).
fn rename_pattern(pattern: &str, device: &mut String, element: &mut String) {
    if let Some((d, e)) = pattern.split_once('.') {
        if !d.is_empty() {
            *device = d.to_string();
        }
        if !e.is_empty() {
            *element = e.to_string();
        }
    }
}

fn apply_clamp(content: &mut Content) -> FilterOutcome {
    match content {
        Content::Switch { state } | Content::Keyboard { state, .. } => {
            *state = if *state != 0 { 1 } else { 0 };
            FilterOutcome::Continue
        }
        Content::Valuator { value, min, max } => {
            if !Content::is_unbounded_range(*min, *max) {
                *value = value.clamp(min.min(*max), min.max(*max));
            }
            FilterOutcome::Continue
        }
        Content::Vector { values } => {
            for (value, min, max) in values.iter_mut() {
                if !Content::is_unbounded_range(*min, *max) {
                    *value = (*value).clamp(min.min(*max), min.max(*max));
                }
            }
            FilterOutcome::Continue
        }
        Content::Trigger => FilterOutcome::Continue,
    }
}

fn apply_convert(kind: FilterKind, params: &FilterParams, event: &mut DeviceEvent) -> FilterOutcome {
    match kind {
        FilterKind::ToTrigger => {
            event.content = Content::Trigger;
            FilterOutcome::Continue
        }
        FilterKind::ToSwitch => match convert_to_switch_state(params, &event.content) {
            Ok(state) => {
                event.content = Content::Switch { state };
                FilterOutcome::Continue
            }
            Err(e) => FilterOutcome::Error(e),
        },
        FilterKind::ToOneshot => match convert_to_switch_state(params, &event.content) {
            Ok(1) => {
                event.content = Content::Trigger;
                FilterOutcome::Continue
            }
            Ok(_) => FilterOutcome::Discard,
            Err(e) => FilterOutcome::Error(e),
        },
        FilterKind::ToKeyboard => match convert_to_switch_state(params, &event.content) {
            Ok(state) => {
                let keysym = parse_keysym(params.get_str("key"));
                event.content = Content::Keyboard { keysym, state };
                FilterOutcome::Continue
            }
            Err(e) => FilterOutcome::Error(e),
        },
        FilterKind::ToValuator => match convert_to_valuator(params, &event.content) {
            Ok(content) => {
                event.content = content;
                FilterOutcome::Continue
            }
            Err(e) => FilterOutcome::Error(e),
        },
        _ => unreachable!("non-convert kind routed to apply_convert"),
    }
}

/// Shared by `to_switch`, `to_oneshot`, and `to_keyboard`: `state=`
/// trumps all else; otherwise a valuator is thresholded (default 0,
/// optionally inverted); a switch/keyboard input passes its state
/// through unchanged; anything else without a `state=` hint errors.
fn convert_to_switch_state(params: &FilterParams, content: &Content) -> Result<i32, DeviceError> {
    if let Some(forced) = params.get_i32("state") {
        return Ok(if forced != 0 { 1 } else { 0 });
    }
    let raw = match content {
        Content::Valuator { value, .. } => {
            let threshold = params.get_f64("threshold").unwrap_or(0.0);
            if *value < threshold {
                0
            } else {
                1
            }
        }
        Content::Switch { state } => *state,
        Content::Keyboard { state, .. } => *state,
        Content::Trigger => 1,
        Content::Vector { .. } => {
            return Err(DeviceError::UnconvertibleContent("vector"));
        }
    };
    let inverted = if params.get_i32("invert").unwrap_or(0) != 0 {
        if raw != 0 {
            0
        } else {
            1
        }
    } else {
        raw
    };
    Ok(inverted)
}

/// Resolves a `key=` filter parameter to a portable keysym: a bare
/// integer is taken as-is, anything else is looked up by name through
/// `xkbcommon` (e.g. `key=Return`), the same table the `keyboard`
/// pseudo-device's elements are named after.
fn parse_keysym(raw: Option<&str>) -> u32 {
    let Some(raw) = raw else { return 0 };
    if let Ok(n) = raw.parse::<u32>() {
        return n;
    }
    xkbcommon::xkb::keysym_from_name(raw, xkbcommon::xkb::KEYSYM_NO_FLAGS).into()
}

fn convert_to_valuator(params: &FilterParams, content: &Content) -> Result<Content, DeviceError> {
    let min = params.get_f64("min").unwrap_or(0.0);
    let max = params.get_f64("max").unwrap_or(0.0);

    if let Some(forced) = params.get_f64("value") {
        return Ok(Content::Valuator { value: forced, min, max });
    }

    let current = match content {
        Content::Valuator { value, .. } => *value,
        Content::Switch { state } | Content::Keyboard { state, .. } => *state as f64,
        Content::Trigger => 1.0,
        Content::Vector { .. } => return Err(DeviceError::UnconvertibleContent("vector")),
    };

    let value = match params.get_str("expr") {
        Some(src) => expr::eval(src, current)?,
        None => current,
    };
    Ok(Content::Valuator { value, min, max })
}

/// An ordered list of filter instances attached to a device/element
/// pattern. A device event walks only the instances whose pattern
/// matches `device.element`. An optional [`DeviceRegistry`] lets the
/// `dump` filter (and the error log below) flag events from a
/// device/element pair nobody registered.
#[derive(Default)]
pub struct FilterChain {
    instances: Vec<Arc<FilterInstance>>,
    registry: Option<Arc<DeviceRegistry>>,
}

impl FilterChain {
    pub fn new() -> Self {
        FilterChain::default()
    }

    pub fn with_registry(registry: Arc<DeviceRegistry>) -> Self {
        FilterChain { instances: Vec::new(), registry: Some(registry) }
    }

    pub fn set_registry(&mut self, registry: Arc<DeviceRegistry>) {
        self.registry = Some(registry);
    }

    pub fn push(&mut self, instance: FilterInstance) {
        self.instances.push(Arc::new(instance));
    }

    /// Runs the matching filter instances over `event` in order.
    /// Returns `Some(())` if the event survives, `None` if dropped.
    pub fn run(&self, event: &mut DeviceEvent, queue: &EventQueue) -> Option<()> {
        let registry = self.registry.as_deref();
        for instance in &self.instances {
            let qualified = event.qualified_name();
            if !glob::matches(&instance.pattern, &qualified) && !instance.pattern.is_empty() {
                continue;
            }
            match instance.apply(event, queue, registry) {
                FilterOutcome::Continue => continue,
                FilterOutcome::Discard => return None,
                FilterOutcome::Error(e) => {
                    let unregistered = registry
                        .map(|r| !r.is_registered(&event.device, &event.element))
                        .unwrap_or(false);
                    let note = if unregistered { " (unregistered)" } else { "" };
                    warn!(filter = instance.kind.name(), error = %e, "filter error, dropping event{}", note);
                    return None;
                }
            }
        }
        Some(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joy_event() -> DeviceEvent {
        DeviceEvent::new("joy", "ax0", Content::Valuator { value: 0.3, min: 0.0, max: 0.0 })
    }

    #[test]
    fn rename_d_e_replaces_both() {
        let mut device = "A".to_string();
        let mut element = "B".to_string();
        rename_pattern("d.e", &mut device, &mut element);
        assert_eq!((device.as_str(), element.as_str()), ("d", "e"));
    }

    #[test]
    fn rename_d_dot_leaves_element() {
        let mut device = "A".to_string();
        let mut element = "B".to_string();
        rename_pattern("d.", &mut device, &mut element);
        assert_eq!((device.as_str(), element.as_str()), ("d", "B"));
    }

    #[test]
    fn rename_dot_e_leaves_device() {
        let mut device = "A".to_string();
        let mut element = "B".to_string();
        rename_pattern(".e", &mut device, &mut element);
        assert_eq!((device.as_str(), element.as_str()), ("A", "e"));
    }

    #[test]
    fn scenario_rename_filter() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "joy.ax0",
            FilterKind::Rename,
            FilterParams::new().with("pattern", "wheel.steering"),
        ));
        let mut event = joy_event();
        assert!(chain.run(&mut event, &queue).is_some());
        assert_eq!(event.qualified_name(), "wheel.steering");
        assert_eq!(event.content, Content::Valuator { value: 0.3, min: 0.0, max: 0.0 });
    }

    #[test]
    fn scenario_copy_then_convert() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "joy.ax0",
            FilterKind::Copy,
            FilterParams::new().with("pattern", ".button"),
        ));
        chain.push(FilterInstance::new(
            "joy.ax0",
            FilterKind::ToSwitch,
            FilterParams::new().with("threshold", 0.5),
        ));
        let mut event = joy_event();
        assert!(chain.run(&mut event, &queue).is_some());
        assert_eq!(event.content, Content::Switch { state: 0 });
        assert_eq!(event.qualified_name(), "joy.ax0");

        let copy = queue.pop().unwrap();
        assert_eq!(copy.qualified_name(), "joy.button");
        assert_eq!(copy.content, Content::Valuator { value: 0.3, min: 0.0, max: 0.0 });
    }

    #[test]
    fn clamp_switch_coerces_to_zero_or_one() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new("*", FilterKind::Clamp, FilterParams::new()));
        let mut event = DeviceEvent::new("d", "e", Content::Switch { state: 42 });
        chain.run(&mut event, &queue);
        assert_eq!(event.content, Content::Switch { state: 1 });
    }

    #[test]
    fn clamp_valuator_respects_proper_range() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new("*", FilterKind::Clamp, FilterParams::new()));
        let mut event =
            DeviceEvent::new("d", "e", Content::Valuator { value: 99.0, min: 0.0, max: 10.0 });
        chain.run(&mut event, &queue);
        assert_eq!(event.content, Content::Valuator { value: 10.0, min: 0.0, max: 10.0 });
    }

    #[test]
    fn clamp_valuator_unbounded_range_is_untouched() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new("*", FilterKind::Clamp, FilterParams::new()));
        let mut event =
            DeviceEvent::new("d", "e", Content::Valuator { value: 99.0, min: 0.0, max: 0.0 });
        chain.run(&mut event, &queue);
        assert_eq!(event.content, Content::Valuator { value: 99.0, min: 0.0, max: 0.0 });
    }

    #[test]
    fn to_oneshot_discards_on_zero_and_triggers_on_one() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "*",
            FilterKind::ToOneshot,
            FilterParams::new().with("threshold", 0.5),
        ));
        let mut zero_event =
            DeviceEvent::new("d", "e", Content::Valuator { value: 0.1, min: 0.0, max: 0.0 });
        assert!(chain.run(&mut zero_event, &queue).is_none());

        let mut one_event =
            DeviceEvent::new("d", "e", Content::Valuator { value: 0.9, min: 0.0, max: 0.0 });
        assert!(chain.run(&mut one_event, &queue).is_some());
        assert_eq!(one_event.content, Content::Trigger);
    }

    #[test]
    fn vector_to_switch_without_state_errors() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new("*", FilterKind::ToSwitch, FilterParams::new()));
        let mut event = DeviceEvent::new(
            "d",
            "e",
            Content::Vector { values: vec![(0.1, 0.0, 0.0)] },
        );
        assert!(chain.run(&mut event, &queue).is_none());
    }

    #[test]
    fn to_valuator_expr_param() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "*",
            FilterKind::ToValuator,
            FilterParams::new().with("expr", "x * 2"),
        ));
        let mut event =
            DeviceEvent::new("d", "e", Content::Valuator { value: 3.0, min: 0.0, max: 0.0 });
        chain.run(&mut event, &queue);
        assert_eq!(event.content, Content::Valuator { value: 6.0, min: 0.0, max: 0.0 });
    }

    #[test]
    fn to_keyboard_resolves_key_by_name_or_number() {
        let queue = EventQueue::new();
        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "*",
            FilterKind::ToKeyboard,
            FilterParams::new().with("state", 1).with("key", "Return"),
        ));
        let mut event = DeviceEvent::new("d", "e", Content::Trigger);
        chain.run(&mut event, &queue);
        let by_name = match event.content {
            Content::Keyboard { keysym, state } => (keysym, state),
            other => panic!("expected Keyboard, got {other:?}"),
        };
        assert_eq!(by_name.1, 1);
        assert_ne!(by_name.0, 0);

        let mut chain = FilterChain::new();
        chain.push(FilterInstance::new(
            "*",
            FilterKind::ToKeyboard,
            FilterParams::new().with("state", 1).with("key", "65"),
        ));
        let mut event = DeviceEvent::new("d", "e", Content::Trigger);
        chain.run(&mut event, &queue);
        assert_eq!(event.content, Content::Keyboard { keysym: 65, state: 1 });
    }

    #[test]
    fn dump_survives_events_from_an_unregistered_device() {
        // The registry is advisory: dump never drops the event, it
        // just flags it (§4.3 "drivers are trusted").
        let registry = Arc::new(DeviceRegistry::new());
        registry.register_device(
            "joy",
            vec![super::super::pseudo::ElementSpec { name: "ax0".to_string(), default: Content::Trigger }],
        );
        let queue = EventQueue::new();
        let mut chain = FilterChain::with_registry(registry);
        chain.push(FilterInstance::new("*", FilterKind::Dump, FilterParams::new()));

        let mut registered = joy_event();
        assert!(chain.run(&mut registered, &queue).is_some());

        let mut unregistered = DeviceEvent::new("joy", "ax1", Content::Trigger);
        assert!(chain.run(&mut unregistered, &queue).is_some());
    }
}
