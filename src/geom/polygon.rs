// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A world-space convex polygon with at most four vertices, as used by the
//! shaft constructor.

use glam::Vec3;

use super::BoundingBox;
use crate::constants::MAX_PATCH_VERTICES;

#[derive(Clone, Copy, Debug)]
pub struct Polygon {
    pub normal: Vec3,
    pub plane_constant: f32,
    vertices: [Vec3; MAX_PATCH_VERTICES],
    num_vertices: usize,
    pub bounds: BoundingBox,
}

impl Polygon {
    pub fn new(vertices: &[Vec3], normal: Vec3, plane_constant: f32) -> Self {
        debug_assert!((3..=MAX_PATCH_VERTICES).contains(&vertices.len()));
        let mut v = [Vec3::ZERO; MAX_PATCH_VERTICES];
        v[..vertices.len()].copy_from_slice(vertices);
        Self {
            normal,
            plane_constant,
            vertices: v,
            num_vertices: vertices.len(),
            bounds: BoundingBox::from_points(vertices),
        }
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices[..self.num_vertices]
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn centre(&self) -> Vec3 {
        self.vertices().iter().copied().sum::<Vec3>() / self.num_vertices as f32
    }
}
