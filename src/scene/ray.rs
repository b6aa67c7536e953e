// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Ray/patch intersection and the scene-wide ray oracle.
//!
//! The solver treats "ray vs. whole scene" as a black box behind
//! [`RayOracle`] so that callers can plug in an accelerated implementation
//! (a voxel grid, a BVH). [`PatchListOracle`] is the reference
//! implementation that simply walks the patch list.

use glam::Vec3;

use super::{Patch, PatchId, Scene};

#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction.
    pub dir: Vec3,
}

impl Ray {
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + t * self.dir
    }
}

/// Which intersections qualify.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RayFlags {
    /// Accept hits on front faces.
    pub front: bool,
    /// Accept hits on back faces.
    pub back: bool,
    /// Any qualifying hit will do; the first found is returned.
    pub any: bool,
}

impl RayFlags {
    pub const FRONT_ANY: RayFlags = RayFlags {
        front: true,
        back: false,
        any: true,
    };
    pub const FRONT_AND_BACK: RayFlags = RayFlags {
        front: true,
        back: true,
        any: false,
    };
}

#[derive(Clone, Copy, Debug)]
pub struct RayHit {
    pub patch: PatchId,
    pub t: f32,
    pub point: Vec3,
}

impl Patch {
    /// Intersects a ray with this patch. Hits with `t` outside
    /// `(t_min, t_max)` are rejected, as are face orientations excluded by
    /// `flags`.
    pub fn intersect(&self, ray: &Ray, t_min: f32, t_max: f32, flags: RayFlags) -> Option<RayHit> {
        let denom = self.normal.dot(ray.dir);
        if denom.abs() < 1e-12 {
            return None;
        }
        let front_hit = denom < 0.0;
        if front_hit && !flags.front {
            return None;
        }
        if !front_hit && !flags.back {
            return None;
        }
        let t = -(self.plane_constant + self.normal.dot(ray.origin)) / denom;
        if !(t > t_min && t < t_max) || !t.is_finite() {
            return None;
        }
        let point = ray.at(t);
        if !self.contains_projected(point) {
            return None;
        }
        Some(RayHit {
            patch: self.id,
            t,
            point,
        })
    }

    /// Point-in-polygon test in the dominant projection plane of the patch.
    fn contains_projected(&self, p: Vec3) -> bool {
        let n = self.normal.abs();
        // Drop the dominant axis.
        let (a, b) = if n.x >= n.y && n.x >= n.z {
            (1, 2)
        } else if n.y >= n.z {
            (0, 2)
        } else {
            (0, 1)
        };
        let verts = self.vertices();
        let mut sign = 0.0f32;
        for i in 0..verts.len() {
            let v0 = verts[i];
            let v1 = verts[(i + 1) % verts.len()];
            let cross = (v1[a] - v0[a]) * (p[b] - v0[b]) - (v1[b] - v0[b]) * (p[a] - v0[a]);
            if cross.abs() < 1e-10 {
                continue;
            }
            if sign == 0.0 {
                sign = cross;
            } else if sign * cross < 0.0 {
                return false;
            }
        }
        true
    }
}

/// The scene-level intersection service.
pub trait RayOracle {
    /// Finds an intersection in `(t_min, t_max)`, skipping the patches in
    /// `dont_intersect` (the self-intersection mask, at most 4 entries).
    fn intersect(
        &self,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        flags: RayFlags,
        dont_intersect: &[PatchId],
    ) -> Option<RayHit>;
}

/// Reference oracle: linear walk over every patch in the scene.
pub struct PatchListOracle<'a> {
    scene: &'a Scene,
}

impl<'a> PatchListOracle<'a> {
    pub fn new(scene: &'a Scene) -> Self {
        Self { scene }
    }
}

impl RayOracle for PatchListOracle<'_> {
    fn intersect(
        &self,
        ray: &Ray,
        t_min: f32,
        t_max: f32,
        flags: RayFlags,
        dont_intersect: &[PatchId],
    ) -> Option<RayHit> {
        let mut best: Option<RayHit> = None;
        let mut t_far = t_max;
        for patch in &self.scene.patches {
            if dont_intersect.contains(&patch.id) {
                continue;
            }
            if let Some(hit) = patch.intersect(ray, t_min, t_far, flags) {
                // A hit at negative t would mean an inconsistent oracle;
                // intersect() already rejects those via the range check.
                if flags.any {
                    return Some(hit);
                }
                t_far = hit.t;
                best = Some(hit);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorRgb, BLACK};
    use approx::assert_abs_diff_eq;

    fn floor_quad() -> Patch {
        Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            BLACK,
        )
    }

    #[test]
    fn ray_hits_front_face() {
        let p = floor_quad();
        let ray = Ray {
            origin: Vec3::new(0.5, 0.5, 1.0),
            dir: Vec3::new(0.0, 0.0, -1.0),
        };
        let hit = p.intersect(&ray, 0.0, 10.0, RayFlags::FRONT_ANY).unwrap();
        assert_abs_diff_eq!(hit.t, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn back_face_needs_back_flag() {
        let p = floor_quad();
        let ray = Ray {
            origin: Vec3::new(0.5, 0.5, -1.0),
            dir: Vec3::new(0.0, 0.0, 1.0),
        };
        assert!(p.intersect(&ray, 0.0, 10.0, RayFlags::FRONT_ANY).is_none());
        assert!(p
            .intersect(&ray, 0.0, 10.0, RayFlags::FRONT_AND_BACK)
            .is_some());
    }

    #[test]
    fn miss_outside_polygon() {
        let p = floor_quad();
        let ray = Ray {
            origin: Vec3::new(2.0, 2.0, 1.0),
            dir: Vec3::new(0.0, 0.0, -1.0),
        };
        assert!(p.intersect(&ray, 0.0, 10.0, RayFlags::FRONT_ANY).is_none());
    }

    #[test]
    fn oracle_respects_dont_intersect() {
        let scene = Scene::new(vec![floor_quad()]);
        let oracle = PatchListOracle::new(&scene);
        let ray = Ray {
            origin: Vec3::new(0.5, 0.5, 1.0),
            dir: Vec3::new(0.0, 0.0, -1.0),
        };
        assert!(oracle
            .intersect(&ray, 0.0, 10.0, RayFlags::FRONT_ANY, &[])
            .is_some());
        assert!(oracle
            .intersect(&ray, 0.0, 10.0, RayFlags::FRONT_ANY, &[PatchId(0)])
            .is_none());
    }
}
