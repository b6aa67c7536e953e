// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scene-building helpers shared by the integration tests.

use glam::Vec3;
use helion::{ColorRgb, Patch};

pub const BLACK: ColorRgb = ColorRgb {
    r: 0.0,
    g: 0.0,
    b: 0.0,
};

/// An axis-aligned quad in the plane z = `z`, spanning [0,1]², facing +z.
pub fn floor_quad(reflectance: ColorRgb, emittance: ColorRgb) -> Patch {
    Patch::new(
        &[
            Vec3::ZERO,
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
        ],
        reflectance,
        emittance,
    )
}

/// The same quad at z = `z`, facing -z (downwards).
pub fn ceiling_quad(z: f32, reflectance: ColorRgb, emittance: ColorRgb) -> Patch {
    Patch::new(
        &[
            Vec3::new(0.0, 0.0, z),
            Vec3::new(0.0, 1.0, z),
            Vec3::new(1.0, 1.0, z),
            Vec3::new(1.0, 0.0, z),
        ],
        reflectance,
        emittance,
    )
}

/// A quad from explicit corners (given counter-clockwise around the
/// desired normal).
pub fn quad(corners: [Vec3; 4], reflectance: ColorRgb, emittance: ColorRgb) -> Patch {
    Patch::new(&corners, reflectance, emittance)
}
