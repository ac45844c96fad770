// SPDX-License-Identifier: GPL-3.0-or-later

//! Environment tree: `Environment` → `Wall` → `Window` (§3, `ve_env.h`'s
//! `VeEnv`/`VeWall`/`VeView`/`VeWindow`). Window ids are assigned by a
//! single process-wide monotonically increasing counter at
//! configuration time (§4.4, Open Question resolved in SPEC_FULL §9 —
//! the two legacy id-allocation strategies from the original are not
//! carried forward).

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

use super::frame::Frame;
use super::options::OptionList;

static NEXT_WINDOW_ID: AtomicU32 = AtomicU32::new(1);

fn allocate_window_id() -> u32 {
    NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeMode {
    Mono,
    Left,
    Right,
    Stereo,
}

impl Default for EyeMode {
    fn default() -> Self {
        EyeMode::Mono
    }
}

/// What a wall's view frame is relative to: the world origin, or the
/// current eye (a cave wall vs. an HMD's screen, per `VE_REL_ORIGIN`/
/// `VE_REL_EYE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewBase {
    Origin,
    Eye,
}

impl Default for ViewBase {
    fn default() -> Self {
        ViewBase::Origin
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub frame: Frame,
    pub width: f64,
    pub height: f64,
    pub base: ViewBase,
}

/// The (node, process, thread) triple identifying which MP slave
/// should render a window. `None` for any field means `"auto"` —
/// decided by the coordinator at run time (§4.2 naming rules).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSlaveTriple {
    pub node: Option<String>,
    pub process: Option<String>,
    pub thread: Option<String>,
}

impl WindowSlaveTriple {
    pub fn auto() -> Self {
        WindowSlaveTriple::default()
    }
}

/// A 2-D affine distortion matrix, externally represented as the
/// upper-left 3x3 of a full 4x4 (§3: "a 4x4 distortion matrix (2-D
/// affine used as 3x3)").
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistortionMatrix(pub [[f64; 3]; 3]);

impl Default for DistortionMatrix {
    fn default() -> Self {
        DistortionMatrix([[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]])
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Viewport {
    /// `[0, 0, 0, 0]` means "use the full window" per §3.
    pub fn is_full_window(&self) -> bool {
        *self == Viewport::default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    pub id: u32,
    pub name: String,
    pub display: String,
    pub geometry: String,
    pub width_err: f64,
    pub height_err: f64,
    pub offset_x: f64,
    pub offset_y: f64,
    pub distort: DistortionMatrix,
    pub eye: EyeMode,
    pub viewport: Option<Viewport>,
    pub slave: WindowSlaveTriple,
    pub options: OptionList,
}

impl Window {
    pub fn new(name: impl Into<String>, display: impl Into<String>, geometry: impl Into<String>) -> Self {
        Window {
            id: allocate_window_id(),
            name: name.into(),
            display: display.into(),
            geometry: geometry.into(),
            width_err: 0.0,
            height_err: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            distort: DistortionMatrix::default(),
            eye: EyeMode::Mono,
            viewport: None,
            slave: WindowSlaveTriple::auto(),
            options: OptionList::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wall {
    pub name: String,
    pub view: View,
    pub windows: Vec<Window>,
    pub options: OptionList,
}

impl Wall {
    pub fn new(name: impl Into<String>, view: View) -> Self {
        Wall { name: name.into(), view, windows: Vec::new(), options: OptionList::new() }
    }

    pub fn add_window(&mut self, window: Window) {
        self.windows.push(window);
    }

    pub fn find_window(&self, name: &str) -> Option<&Window> {
        self.windows.iter().find(|w| w.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub desc: Option<String>,
    pub walls: Vec<Wall>,
    pub options: OptionList,
}

impl Environment {
    pub fn new(name: impl Into<String>) -> Self {
        Environment { name: name.into(), desc: None, walls: Vec::new(), options: OptionList::new() }
    }

    pub fn add_wall(&mut self, wall: Wall) {
        self.walls.push(wall);
    }

    pub fn find_wall(&self, name: &str) -> Option<&Wall> {
        self.walls.iter().find(|w| w.name == name)
    }

    /// Finds the first window across all walls matching `name`, the
    /// original's `veFindWindow`.
    pub fn find_window(&self, name: &str) -> Option<&Window> {
        self.walls.iter().find_map(|w| w.find_window(name))
    }

    pub fn window_count(&self) -> usize {
        self.walls.iter().map(|w| w.windows.len()).sum()
    }

    pub fn to_toml(&self) -> Result<String, EnvironmentError> {
        toml::to_string_pretty(self).map_err(|e| EnvironmentError::Serialize(e.to_string()))
    }

    pub fn from_toml(text: &str) -> Result<Self, EnvironmentError> {
        toml::from_str(text).map_err(|e| EnvironmentError::Deserialize(e.to_string()))
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, EnvironmentError> {
        rmp_serde::to_vec(self).map_err(|e| EnvironmentError::Serialize(e.to_string()))
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, EnvironmentError> {
        rmp_serde::from_slice(bytes).map_err(|e| EnvironmentError::Deserialize(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_env() -> Environment {
        let mut env = Environment::new("cave");
        env.options.set("renderer", "gl");
        let view = View {
            frame: Frame::new((0.0, 0.0, 0.0), (0.0, 0.0, -1.0), (0.0, 1.0, 0.0)).unwrap(),
            width: 3.0,
            height: 2.4,
            base: ViewBase::Origin,
        };
        let mut wall = Wall::new("front", view);
        wall.add_window(Window::new("front-0", "default", "1024x768+0+0"));
        env.add_wall(wall);
        env
    }

    #[test]
    fn window_ids_are_dense_and_increasing() {
        let w1 = Window::new("a", "d", "g");
        let w2 = Window::new("b", "d", "g");
        assert!(w2.id > w1.id);
    }

    #[test]
    fn find_wall_and_window() {
        let env = sample_env();
        assert!(env.find_wall("front").is_some());
        assert!(env.find_wall("back").is_none());
        assert!(env.find_window("front-0").is_some());
        assert_eq!(env.window_count(), 1);
    }

    #[test]
    fn toml_round_trip_preserves_name_options_and_window_ids() {
        let env = sample_env();
        let text = env.to_toml().unwrap();
        let back = Environment::from_toml(&text).unwrap();
        assert_eq!(back.name, env.name);
        assert_eq!(back.options, env.options);
        assert_eq!(
            back.find_window("front-0").unwrap().id,
            env.find_window("front-0").unwrap().id
        );
    }

    #[test]
    fn msgpack_round_trip_is_identical() {
        let env = sample_env();
        let bytes = env.to_msgpack().unwrap();
        let back = Environment::from_msgpack(&bytes).unwrap();
        assert_eq!(back.name, env.name);
        assert_eq!(back.walls.len(), env.walls.len());
        assert_eq!(back.find_window("front-0").unwrap().id, env.find_window("front-0").unwrap().id);
    }

    #[test]
    fn toml_round_trip_survives_a_real_file_on_disk() {
        let env = sample_env();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cave.env.toml");
        std::fs::write(&path, env.to_toml().unwrap()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back = Environment::from_toml(&text).unwrap();
        assert_eq!(back.name, env.name);
        assert_eq!(back.find_window("front-0").unwrap().id, env.find_window("front-0").unwrap().id);
    }
}
