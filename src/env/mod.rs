// SPDX-License-Identifier: GPL-3.0-or-later

//! C4 — environment & profile data model.
//!
//! Holds the Environment tree (walls, windows, options), answers
//! lookups by name, and round-trips the tree through serde for the
//! wire (`rmp-serde`) and for on-disk authoring (`toml`). Grounded in
//! `ve_env.h`.

pub mod environment;
pub mod frame;
pub mod options;
pub mod profile;

pub use environment::{Environment, Wall, Window, WindowSlaveTriple};
pub use frame::Frame;
pub use options::OptionList;
pub use profile::{ProfileModule, UserProfile};
