// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Axis-aligned bounding boxes.

use glam::{Mat4, Vec3};

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    /// An inverted box that any point or box enlarges correctly.
    pub const EMPTY: BoundingBox = BoundingBox {
        min: Vec3::splat(f32::INFINITY),
        max: Vec3::splat(f32::NEG_INFINITY),
    };

    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    pub fn from_points(points: &[Vec3]) -> Self {
        let mut b = Self::EMPTY;
        for &p in points {
            b.enlarge_point(p);
        }
        b
    }

    pub fn enlarge_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    pub fn enlarge(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    pub fn centre(&self) -> Vec3 {
        0.5 * (self.min + self.max)
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn volume(&self) -> f32 {
        let e = self.extent();
        e.x * e.y * e.z
    }

    /// Coordinate `axis` of the minimum (`lo = true`) or maximum corner.
    pub fn coord(&self, axis: usize, lo: bool) -> f32 {
        let corner = if lo { self.min } else { self.max };
        corner[axis]
    }

    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn disjoint(&self, other: &BoundingBox) -> bool {
        self.min.x > other.max.x
            || other.min.x > self.max.x
            || self.min.y > other.max.y
            || other.min.y > self.max.y
            || self.min.z > other.max.z
            || other.min.z > self.max.z
    }

    /// Whether the whole box lies on the negative side of the plane
    /// `n·x + d = 0`. The corner farthest along the normal decides.
    pub fn behind_plane(&self, normal: Vec3, d: f32) -> bool {
        let far = Vec3::new(
            if normal.x > 0.0 { self.max.x } else { self.min.x },
            if normal.y > 0.0 { self.max.y } else { self.min.y },
            if normal.z > 0.0 { self.max.z } else { self.min.z },
        );
        normal.dot(far) + d <= 0.0
    }

    /// Clips the parametric segment `origin + t·dir`, `t ∈ [t_min, t_max]`,
    /// against the box. Returns the clipped interval, or `None` when the
    /// segment misses the box entirely.
    pub fn clip_segment(
        &self,
        origin: Vec3,
        dir: Vec3,
        mut t_min: f32,
        mut t_max: f32,
    ) -> Option<(f32, f32)> {
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            if d.abs() < f32::EPSILON {
                if o < self.min[axis] || o > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (self.min[axis] - o) * inv;
            let mut t1 = (self.max[axis] - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some((t_min, t_max))
    }

    /// Bounding box of this box after transforming its eight corners.
    pub fn transformed(&self, m: &Mat4) -> BoundingBox {
        let mut out = BoundingBox::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            );
            out.enlarge_point(m.transform_point3(corner));
        }
        out
    }
}
