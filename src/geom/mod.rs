// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Geometric primitives: 2D parameter-space transforms, axis-aligned
//! bounding boxes and world-space polygons.

mod aabb;
mod polygon;

pub use aabb::BoundingBox;
pub use polygon::Polygon;

use glam::{Vec2, Vec3};

/// An affine transform of (u,v) parameter coordinates:
///
/// ```text
/// |u'|   |m00 m01|   |u|   |t0|
/// |  | = |       | * | | + |  |
/// |v'|   |m10 m11|   |v|   |t1|
/// ```
///
/// Used to relate the parameter domain of a regular sub-element to that of
/// its parent surface element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat2x2 {
    pub m: [[f32; 2]; 2],
    pub t: [f32; 2],
}

impl Mat2x2 {
    pub const IDENTITY: Mat2x2 = Mat2x2 {
        m: [[1.0, 0.0], [0.0, 1.0]],
        t: [0.0, 0.0],
    };

    pub fn transform_point(&self, p: Vec2) -> Vec2 {
        Vec2::new(
            self.m[0][0] * p.x + self.m[0][1] * p.y + self.t[0],
            self.m[1][0] * p.x + self.m[1][1] * p.y + self.t[1],
        )
    }

    /// The composition `outer ∘ inner`: first apply `inner`, then `outer`.
    pub fn concat(outer: &Mat2x2, inner: &Mat2x2) -> Mat2x2 {
        let mut m = [[0.0; 2]; 2];
        for i in 0..2 {
            for j in 0..2 {
                m[i][j] = outer.m[i][0] * inner.m[0][j] + outer.m[i][1] * inner.m[1][j];
            }
        }
        let t = [
            outer.m[0][0] * inner.t[0] + outer.m[0][1] * inner.t[1] + outer.t[0],
            outer.m[1][0] * inner.t[0] + outer.m[1][1] * inner.t[1] + outer.t[1],
        ];
        Mat2x2 { m, t }
    }
}

const HALF_SCALE: [[f32; 2]; 2] = [[0.5, 0.0], [0.0, 0.5]];

/// Up-transforms of the four regular sub-elements of a quadrilateral: four
/// half-scale translates of the unit square.
pub const QUAD_UP_TRANSFORMS: [Mat2x2; 4] = [
    Mat2x2 { m: HALF_SCALE, t: [0.0, 0.0] },
    Mat2x2 { m: HALF_SCALE, t: [0.5, 0.0] },
    Mat2x2 { m: HALF_SCALE, t: [0.0, 0.5] },
    Mat2x2 { m: HALF_SCALE, t: [0.5, 0.5] },
];

/// Up-transforms of the four regular sub-elements of a triangle: the three
/// corner triangles plus the point-mirrored centre triangle.
pub const TRI_UP_TRANSFORMS: [Mat2x2; 4] = [
    Mat2x2 { m: HALF_SCALE, t: [0.0, 0.0] },
    Mat2x2 { m: HALF_SCALE, t: [0.5, 0.0] },
    Mat2x2 { m: HALF_SCALE, t: [0.0, 0.5] },
    Mat2x2 {
        m: [[-0.5, 0.0], [0.0, -0.5]],
        t: [0.5, 0.5],
    },
];

/// Normal of the plane through `a`, `b` and `c` (not normalised).
pub fn triple_cross(a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    (b - a).cross(c - b)
}

/// Position-dependent absolute tolerance for plane-side predicates.
pub(crate) fn vector_tolerance(p: Vec3) -> f64 {
    crate::constants::EPSILON
        * (p.x.abs().max(p.y.abs()).max(p.z.abs()) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn quad_up_transforms_tile_the_unit_square() {
        // The four children map the unit square onto its four quadrants.
        let corners = [Vec2::ZERO, Vec2::X, Vec2::Y, Vec2::ONE];
        for (sigma, xf) in QUAD_UP_TRANSFORMS.iter().enumerate() {
            for c in corners {
                let p = xf.transform_point(c);
                assert!(
                    (0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y),
                    "child {sigma} escapes the parent domain"
                );
            }
        }
        // Child centres land in distinct quadrants.
        let centres: Vec<Vec2> = QUAD_UP_TRANSFORMS
            .iter()
            .map(|xf| xf.transform_point(Vec2::splat(0.5)))
            .collect();
        assert_abs_diff_eq!(centres[0].x, 0.25);
        assert_abs_diff_eq!(centres[3].x, 0.75);
        assert_abs_diff_eq!(centres[3].y, 0.75);
    }

    #[test]
    fn tri_centre_child_is_point_mirrored() {
        // Vertices of the centre child map to edge midpoints of the parent.
        let xf = &TRI_UP_TRANSFORMS[3];
        let p = xf.transform_point(Vec2::ZERO);
        assert_abs_diff_eq!(p.x, 0.5);
        assert_abs_diff_eq!(p.y, 0.5);
        let p = xf.transform_point(Vec2::X);
        assert_abs_diff_eq!(p.x, 0.0);
        assert_abs_diff_eq!(p.y, 0.5);
    }

    #[test]
    fn concat_applies_inner_first() {
        let outer = QUAD_UP_TRANSFORMS[1];
        let inner = QUAD_UP_TRANSFORMS[2];
        let c = Mat2x2::concat(&outer, &inner);
        let p = Vec2::new(0.2, 0.4);
        let expected = outer.transform_point(inner.transform_point(p));
        let got = c.transform_point(p);
        assert_abs_diff_eq!(got.x, expected.x, epsilon = 1e-6);
        assert_abs_diff_eq!(got.y, expected.y, epsilon = 1e-6);
    }
}
