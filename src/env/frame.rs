// SPDX-License-Identifier: GPL-3.0-or-later

//! Coordinate frames (§3 "Frame", `ve_env.h`'s `VeFrame`): a location
//! plus direction and up vectors. Direction need not be unit length,
//! and direction/up need not be mutually orthogonal — the rendering
//! collaborator orthonormalizes at draw time (Non-goal: no GL here),
//! but the orthonormalization itself is pure enough to live here and
//! be tested without one.

use serde::{Deserialize, Serialize};

use crate::error::EnvironmentError;

pub type Vec3 = (f64, f64, f64);

fn dot(a: Vec3, b: Vec3) -> f64 {
    a.0 * b.0 + a.1 * b.1 + a.2 * b.2
}

fn cross(a: Vec3, b: Vec3) -> Vec3 {
    (
        a.1 * b.2 - a.2 * b.1,
        a.2 * b.0 - a.0 * b.2,
        a.0 * b.1 - a.1 * b.0,
    )
}

fn length(a: Vec3) -> f64 {
    dot(a, a).sqrt()
}

fn normalize(a: Vec3) -> Vec3 {
    let len = length(a);
    (a.0 / len, a.1 / len, a.2 / len)
}

fn scale(a: Vec3, s: f64) -> Vec3 {
    (a.0 * s, a.1 * s, a.2 * s)
}

fn sub(a: Vec3, b: Vec3) -> Vec3 {
    (a.0 - b.0, a.1 - b.1, a.2 - b.2)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub loc: Vec3,
    pub dir: Vec3,
    pub up: Vec3,
}

impl Frame {
    pub fn new(loc: Vec3, dir: Vec3, up: Vec3) -> Result<Self, EnvironmentError> {
        let frame = Frame { loc, dir, up };
        frame.validate()?;
        Ok(frame)
    }

    /// Direction and up must not be parallel (§3 invariant).
    fn validate(&self) -> Result<(), EnvironmentError> {
        let c = cross(self.dir, self.up);
        if length(c) < 1e-9 {
            return Err(EnvironmentError::ParallelFrame);
        }
        Ok(())
    }

    /// Produces a right-handed orthonormal (right, up, forward) basis
    /// from `dir`/`up`, Gram-Schmidt style: `up` is reprojected
    /// orthogonal to `dir`, then `right = dir x up`. Used by the
    /// render collaborator and by tests of the invariant above.
    pub fn orthonormal_basis(&self) -> Result<(Vec3, Vec3, Vec3), EnvironmentError> {
        self.validate()?;
        let forward = normalize(self.dir);
        let up_proj = sub(self.up, scale(forward, dot(self.up, forward)));
        let up = normalize(up_proj);
        let right = normalize(cross(forward, up));
        Ok((right, up, forward))
    }
}
