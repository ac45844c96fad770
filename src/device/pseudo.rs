// SPDX-License-Identifier: GPL-3.0-or-later

//! Pseudo-device element tables (§4.3): the fixed `keyboard` and
//! `mouse` devices every environment exposes regardless of what real
//! drivers are attached. Pure data — no X11/AGL backing driver, which
//! stays out of scope (Non-goals).

use super::Content;

/// The shape of one element of a pseudo-device: its name and the
/// `Content` variant it produces (with placeholder values describing
/// defaults/ranges, not live readings).
#[derive(Debug, Clone)]
pub struct ElementSpec {
    pub name: String,
    pub default: Content,
}

#[derive(Debug, Clone)]
pub struct PseudoDeviceSpec {
    pub name: &'static str,
    pub elements: Vec<ElementSpec>,
}

/// Keys whose element name is a portable keysym (§4.3), resolved
/// through the same `xkbcommon` name table `to_keyboard`'s `key=`
/// parameter uses. Covers the common editing/navigation keys and the
/// alphanumeric row rather than the full keysym space, which is open
/// ended and has no fixed enumeration.
const KEYBOARD_KEY_NAMES: &[&str] = &[
    "Return", "Escape", "Tab", "BackSpace", "space", "Delete",
    "Shift_L", "Shift_R", "Control_L", "Control_R", "Alt_L", "Alt_R",
    "Left", "Right", "Up", "Down",
    "a", "b", "c", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m",
    "n", "o", "p", "q", "r", "s", "t", "u", "v", "w", "x", "y", "z",
    "0", "1", "2", "3", "4", "5", "6", "7", "8", "9",
];

/// `keyboard.<keysym-name>` keyboard-content elements, one per portable
/// keysym this environment cares about (§4.3).
pub fn keyboard_spec() -> PseudoDeviceSpec {
    let elements = KEYBOARD_KEY_NAMES
        .iter()
        .map(|name| ElementSpec {
            name: (*name).to_string(),
            default: Content::Keyboard {
                keysym: xkbcommon::xkb::keysym_from_name(name, xkbcommon::xkb::KEYSYM_NO_FLAGS)
                    .into(),
                state: 0,
            },
        })
        .collect();
    PseudoDeviceSpec { name: "keyboard", elements }
}

const MOUSE_BUTTON_NAMES: [&str; 3] = ["left", "middle", "right"];

/// `mouse.left`/`mouse.middle`/`mouse.right` switches and a
/// `mouse.position` vector of (x, y) normalized to [-1, +1] across the
/// screen (§4.3).
pub fn mouse_spec() -> PseudoDeviceSpec {
    let mut elements: Vec<ElementSpec> = MOUSE_BUTTON_NAMES
        .iter()
        .map(|name| ElementSpec {
            name: (*name).to_string(),
            default: Content::Switch { state: 0 },
        })
        .collect();
    elements.push(ElementSpec {
        name: "position".to_string(),
        default: Content::Vector {
            values: vec![(0.0, -1.0, 1.0), (0.0, -1.0, 1.0)],
        },
    });
    PseudoDeviceSpec { name: "mouse", elements }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyboard_elements_are_named_by_keysym() {
        let spec = keyboard_spec();
        assert_eq!(spec.name, "keyboard");
        let ret = spec.elements.iter().find(|e| e.name == "Return").expect("Return element");
        match &ret.default {
            Content::Keyboard { keysym, .. } => assert_ne!(*keysym, 0),
            other => panic!("expected Keyboard content, got {other:?}"),
        }
        assert!(spec.elements.iter().any(|e| e.name == "a"));
    }

    #[test]
    fn mouse_has_left_middle_right_and_normalized_position() {
        let spec = mouse_spec();
        assert_eq!(spec.elements.len(), 4);
        for name in MOUSE_BUTTON_NAMES {
            assert!(spec.elements.iter().any(|e| e.name == name));
        }
        let position = spec.elements.iter().find(|e| e.name == "position").unwrap();
        match &position.default {
            Content::Vector { values } => {
                for (_, min, max) in values {
                    assert_eq!((*min, *max), (-1.0, 1.0));
                }
            }
            other => panic!("expected Vector content, got {other:?}"),
        }
    }
}
