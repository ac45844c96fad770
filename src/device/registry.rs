// SPDX-License-Identifier: GPL-3.0-or-later

//! Device model registration (§3 "Device model", `ve_dev_intf.c`'s
//! permissive runtime device table): drivers advertise the elements
//! they emit before emitting, but the table is advisory rather than
//! enforced — an `insert` for an unregistered device/element pair still
//! succeeds, since drivers are trusted. The registry exists so the
//! `dump` filter and diagnostics can flag events nobody declared.

use std::collections::HashMap;
use std::sync::RwLock;

use super::pseudo::ElementSpec;

/// Table of device name -> advertised element specs, populated by
/// drivers via [`DeviceRegistry::register_device`] before they start
/// emitting events.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<String, Vec<ElementSpec>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        DeviceRegistry::default()
    }

    /// Advertises the element set for `name`, replacing any previous
    /// registration under the same name (a driver re-registering after
    /// a hot reload is not an error).
    pub fn register_device(&self, name: impl Into<String>, elements: Vec<ElementSpec>) {
        self.devices.write().unwrap().insert(name.into(), elements);
    }

    /// True if `device` was registered and advertises an element named
    /// `element`. An unknown device is simply unregistered, not an
    /// error — callers decide what to do with that (§4.3 failure model).
    pub fn is_registered(&self, device: &str, element: &str) -> bool {
        self.devices
            .read()
            .unwrap()
            .get(device)
            .map(|elements| elements.iter().any(|e| e.name == element))
            .unwrap_or(false)
    }

    pub fn device_count(&self) -> usize {
        self.devices.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Content;

    #[test]
    fn unregistered_device_is_not_registered() {
        let registry = DeviceRegistry::new();
        assert!(!registry.is_registered("joy", "ax0"));
    }

    #[test]
    fn registered_element_is_found_by_name() {
        let registry = DeviceRegistry::new();
        registry.register_device(
            "joy",
            vec![ElementSpec { name: "ax0".to_string(), default: Content::Valuator { value: 0.0, min: 0.0, max: 0.0 } }],
        );
        assert!(registry.is_registered("joy", "ax0"));
        assert!(!registry.is_registered("joy", "ax1"));
        assert!(!registry.is_registered("wheel", "ax0"));
    }

    #[test]
    fn re_registering_replaces_the_previous_element_set() {
        let registry = DeviceRegistry::new();
        registry.register_device(
            "joy",
            vec![ElementSpec { name: "ax0".to_string(), default: Content::Trigger }],
        );
        registry.register_device(
            "joy",
            vec![ElementSpec { name: "ax1".to_string(), default: Content::Trigger }],
        );
        assert!(!registry.is_registered("joy", "ax0"));
        assert!(registry.is_registered("joy", "ax1"));
    }
}
