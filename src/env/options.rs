// SPDX-License-Identifier: GPL-3.0-or-later

//! Option lists (§3 "Option list", `ve_env.h`'s `VeOption`): a
//! name → string value map attached to Environment, Wall, or Window,
//! with innermost-wins resolution (Window > Wall > Environment) and
//! typed accessors mirroring the original's `veXxxGetSOpt`/
//! `veXxxGetIOpt`/`veXxxGetFOpt` family.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionList {
    values: BTreeMap<String, String>,
}

impl OptionList {
    pub fn new() -> Self {
        OptionList::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(|s| s.as_str())
    }

    pub fn get_int(&self, name: &str) -> Option<i64> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    pub fn get_float(&self, name: &str) -> Option<f64> {
        self.get_str(name).and_then(|s| s.parse().ok())
    }

    /// Accepts `"1"`/`"true"`/`"yes"`/`"on"` (case-insensitive) as
    /// true and `"0"`/`"false"`/`"no"`/`"off"` as false; anything else
    /// is not a boolean.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get_str(name)?.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

/// Resolves `name` against window/wall/environment option lists in
/// that order, the innermost-wins rule from §3.
pub fn resolve_str<'a>(
    name: &str,
    window: Option<&'a OptionList>,
    wall: Option<&'a OptionList>,
    env: Option<&'a OptionList>,
) -> Option<&'a str> {
    window
        .and_then(|o| o.get_str(name))
        .or_else(|| wall.and_then(|o| o.get_str(name)))
        .or_else(|| env.and_then(|o| o.get_str(name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_getters_parse_values() {
        let mut opts = OptionList::new();
        opts.set("width", "1024");
        opts.set("gamma", "2.2");
        opts.set("fullscreen", "yes");
        assert_eq!(opts.get_int("width"), Some(1024));
        assert_eq!(opts.get_float("gamma"), Some(2.2));
        assert_eq!(opts.get_bool("fullscreen"), Some(true));
        assert_eq!(opts.get_str("missing"), None);
    }

    #[test]
    fn resolution_is_innermost_wins() {
        let mut env = OptionList::new();
        env.set("gamma", "1.0");
        let mut wall = OptionList::new();
        wall.set("gamma", "1.5");
        let mut window = OptionList::new();
        window.set("gamma", "2.2");

        assert_eq!(
            resolve_str("gamma", Some(&window), Some(&wall), Some(&env)),
            Some("2.2")
        );
        assert_eq!(resolve_str("gamma", None, Some(&wall), Some(&env)), Some("1.5"));
        assert_eq!(resolve_str("gamma", None, None, Some(&env)), Some("1.0"));
        assert_eq!(resolve_str("missing", Some(&window), Some(&wall), Some(&env)), None);
    }
}
