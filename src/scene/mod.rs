// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The static input scene: patches, the geometry hierarchy and the derived
//! per-scene statistics.
//!
//! Everything in here is read-only to the solver. Patches and geometry
//! nodes are addressed by 32-bit arena indices; back-references from
//! geometry to radiosity elements live in the element arena, not here.

mod cluster;
mod ray;

pub use cluster::build_cluster_octree;
pub use ray::{PatchListOracle, Ray, RayFlags, RayHit, RayOracle};

use glam::Vec3;
use log::debug;

use crate::color::ColorRgb;
use crate::constants::MAX_PATCH_VERTICES;
use crate::geom::{BoundingBox, Polygon};

/// Index of a patch in [`Scene::patches`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchId(pub u32);

impl PatchId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// An input planar triangle or quadrilateral.
///
/// Derived quantities (normal, plane constant, area, midpoint, bounds) are
/// computed once at construction.
#[derive(Clone, Debug)]
pub struct Patch {
    pub id: PatchId,
    vertices: [Vec3; MAX_PATCH_VERTICES],
    num_vertices: usize,
    pub normal: Vec3,
    pub plane_constant: f32,
    pub area: f32,
    pub midpoint: Vec3,
    pub bounds: BoundingBox,
    /// Linear area-density correction for non-parallelogram quadrilaterals:
    /// `J(u,v) = j0 + j1·u + j2·v`. Absent for triangles and parallelograms.
    pub jacobian: Option<[f32; 3]>,
    /// Diffuse reflectance per band.
    pub reflectance: ColorRgb,
    /// Diffuse self-emitted radiance per band.
    pub emittance: ColorRgb,
    /// Directly received view potential, supplied by the caller when
    /// importance-driven refinement is used.
    pub direct_potential: f32,
}

impl Patch {
    pub fn new(vertices: &[Vec3], reflectance: ColorRgb, emittance: ColorRgb) -> Self {
        assert!(
            (3..=MAX_PATCH_VERTICES).contains(&vertices.len()),
            "a patch has 3 or 4 vertices"
        );
        let mut v = [Vec3::ZERO; MAX_PATCH_VERTICES];
        v[..vertices.len()].copy_from_slice(vertices);

        let e1 = v[1] - v[0];
        let e2 = v[2] - v[0];
        let mut normal = e1.cross(e2);
        let mut area = 0.5 * normal.length();
        if vertices.len() == 4 {
            let n2 = (v[2] - v[0]).cross(v[3] - v[0]);
            area += 0.5 * n2.length();
            normal += n2;
        }
        let normal = normal.normalize_or_zero();
        let plane_constant = -normal.dot(v[0]);
        let midpoint =
            vertices.iter().copied().sum::<Vec3>() / vertices.len() as f32;

        let jacobian = if vertices.len() == 4 {
            quad_jacobian(&v, normal)
        } else {
            None
        };

        Self {
            id: PatchId(0),
            vertices: v,
            num_vertices: vertices.len(),
            normal,
            plane_constant,
            area,
            midpoint,
            bounds: BoundingBox::from_points(vertices),
            jacobian,
            reflectance,
            emittance,
            direct_potential: 0.0,
        }
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices[..self.num_vertices]
    }

    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }

    pub fn is_light_source(&self) -> bool {
        !self.emittance.is_black()
    }

    /// Maps uniform (u,v) coordinates to a world-space position: barycentric
    /// on triangles, bilinear on quadrilaterals.
    pub fn uniform_point(&self, u: f32, v: f32) -> Vec3 {
        let p = &self.vertices;
        if self.num_vertices == 3 {
            p[0] + u * (p[1] - p[0]) + v * (p[2] - p[0])
        } else {
            (1.0 - u) * (1.0 - v) * p[0]
                + u * (1.0 - v) * p[1]
                + u * v * p[2]
                + (1.0 - u) * v * p[3]
        }
    }

    pub fn polygon(&self) -> Polygon {
        Polygon::new(self.vertices(), self.normal, self.plane_constant)
    }

    /// Whether light can travel between the front faces of two patches:
    /// each midpoint must not be behind the other's plane.
    pub fn facing(&self, other: &Patch) -> bool {
        let eps = crate::constants::EPSILON_F32;
        self.normal.dot(other.midpoint) + self.plane_constant > -eps
            && other.normal.dot(self.midpoint) + other.plane_constant > -eps
    }
}

/// Area-density coefficients for a non-parallelogram quadrilateral; `None`
/// when the bilinear map is affine (within tolerance).
fn quad_jacobian(v: &[Vec3; MAX_PATCH_VERTICES], normal: Vec3) -> Option<[f32; 3]> {
    let a = v[1] - v[0];
    let b = v[3] - v[0];
    let c = v[0] - v[1] + v[2] - v[3];
    let j0 = normal.dot(a.cross(b));
    let j1 = normal.dot(a.cross(c));
    let j2 = normal.dot(c.cross(b));
    let eps = crate::constants::EPSILON_F32 * j0.abs();
    if j1.abs() <= eps && j2.abs() <= eps {
        None
    } else {
        Some([j0, j1, j2])
    }
}

/// Index of a node in the [`GeometryArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GeometryId(pub u32);

impl GeometryId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub enum GeometryKind {
    /// An aggregate of child geometries.
    Compound(Vec<GeometryId>),
    /// A leaf holding patches.
    PatchSet(Vec<PatchId>),
}

#[derive(Clone, Debug)]
pub struct Geometry {
    pub kind: GeometryKind,
    pub bounds: BoundingBox,
}

impl Geometry {
    pub fn is_compound(&self) -> bool {
        matches!(self.kind, GeometryKind::Compound(_))
    }
}

/// Flat storage for the geometry tree.
#[derive(Clone, Debug, Default)]
pub struct GeometryArena {
    nodes: Vec<Geometry>,
}

impl GeometryArena {
    pub fn push(&mut self, geometry: Geometry) -> GeometryId {
        let id = GeometryId(self.nodes.len() as u32);
        self.nodes.push(geometry);
        id
    }

    pub fn get(&self, id: GeometryId) -> &Geometry {
        &self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All patch ids below `id`, in tree order.
    pub fn collect_patches(&self, id: GeometryId, out: &mut Vec<PatchId>) {
        match &self.get(id).kind {
            GeometryKind::Compound(children) => {
                for &c in children {
                    self.collect_patches(c, out);
                }
            }
            GeometryKind::PatchSet(patches) => out.extend_from_slice(patches),
        }
    }
}

/// The static scene handed to the solver.
#[derive(Clone, Debug)]
pub struct Scene {
    pub patches: Vec<Patch>,
    pub geometries: GeometryArena,
    /// Top-level nodes of the input geometry hierarchy.
    pub top_level: Vec<GeometryId>,
    /// Root of the pre-built octree of patch clusters.
    pub clustered_root: GeometryId,
}

impl Scene {
    /// Builds a scene from a bare patch list. A flat patch-set node serves
    /// as the input hierarchy and a cluster octree is built over it.
    pub fn new(mut patches: Vec<Patch>) -> Self {
        for (i, p) in patches.iter_mut().enumerate() {
            p.id = PatchId(i as u32);
        }
        let mut geometries = GeometryArena::default();
        let all: Vec<PatchId> = patches.iter().map(|p| p.id).collect();
        let mut bounds = BoundingBox::EMPTY;
        for p in &patches {
            bounds.enlarge(&p.bounds);
        }
        let flat = geometries.push(Geometry {
            kind: GeometryKind::PatchSet(all),
            bounds,
        });
        let clustered_root = build_cluster_octree(&patches, &mut geometries);
        debug!(
            "scene: {} patches, {} geometry nodes",
            patches.len(),
            geometries.len()
        );
        Self {
            patches,
            geometries,
            top_level: vec![flat],
            clustered_root,
        }
    }

    pub fn patch(&self, id: PatchId) -> &Patch {
        &self.patches[id.index()]
    }
}

/// Per-scene aggregates, computed once and immutable afterwards.
#[derive(Clone, Copy, Debug)]
pub struct Statistics {
    pub total_area: f32,
    /// Band-wise maximum self-emitted radiance over all patches.
    pub max_self_emitted_radiance: ColorRgb,
    /// Band-wise maximum self-emitted power (`π·A·Ed`) over all patches.
    pub max_self_emitted_power: ColorRgb,
    pub max_direct_potential: f32,
    /// Crude steady-state estimate used by the constant-radiance start and
    /// the ambient display term.
    pub estimated_average_radiance: ColorRgb,
}

impl Statistics {
    pub fn compute(scene: &Scene) -> Self {
        let mut total_area = 0.0f32;
        let mut max_rad = crate::color::BLACK;
        let mut max_power = crate::color::BLACK;
        let mut max_direct_potential = 0.0f32;
        let mut emitted = crate::color::BLACK;
        let mut weighted_reflectance = crate::color::BLACK;
        for p in &scene.patches {
            total_area += p.area;
            max_rad = max_rad.max(p.emittance);
            max_power = max_power.max(p.emittance * (std::f32::consts::PI * p.area));
            max_direct_potential = max_direct_potential.max(p.direct_potential);
            emitted = emitted.add_scaled(p.area, p.emittance);
            weighted_reflectance = weighted_reflectance.add_scaled(p.area, p.reflectance);
        }
        let average_emitted = emitted * (1.0 / total_area.max(f32::MIN_POSITIVE));
        let average_reflectance =
            weighted_reflectance * (1.0 / total_area.max(f32::MIN_POSITIVE));
        // Geometric series estimate of the steady state radiance.
        let estimated_average_radiance = ColorRgb::new(
            average_emitted.r / (1.0 - average_reflectance.r).max(1e-3),
            average_emitted.g / (1.0 - average_reflectance.g).max(1e-3),
            average_emitted.b / (1.0 - average_reflectance.b).max(1e-3),
        );
        Self {
            total_area,
            max_self_emitted_radiance: max_rad,
            max_self_emitted_power: max_power,
            max_direct_potential,
            estimated_average_radiance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn unit_quad() -> Patch {
        Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            crate::color::BLACK,
        )
    }

    #[test]
    fn unit_quad_derived_quantities() {
        let p = unit_quad();
        assert_abs_diff_eq!(p.area, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.normal.z, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.plane_constant, 0.0, epsilon = 1e-6);
        assert!(p.jacobian.is_none());
        let mid = p.uniform_point(0.5, 0.5);
        assert_abs_diff_eq!(mid.x, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(mid.y, 0.5, epsilon = 1e-6);
    }

    #[test]
    fn triangle_area_and_mapping() {
        let p = Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(2.0, 0.0, 0.0),
                Vec3::new(0.0, 2.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            crate::color::BLACK,
        );
        assert_abs_diff_eq!(p.area, 2.0, epsilon = 1e-6);
        let q = p.uniform_point(1.0, 0.0);
        assert_abs_diff_eq!(q.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn skewed_quad_has_jacobian() {
        let p = Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(2.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            crate::color::BLACK,
        );
        assert!(p.jacobian.is_some());
    }

    #[test]
    fn facing_patches() {
        // Two unit quads, one at z = 0 facing up, one at z = 1 facing down.
        let lower = unit_quad();
        let upper = Patch::new(
            &[
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(0.0, 1.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
            ],
            ColorRgb::monochrome(0.5),
            crate::color::BLACK,
        );
        assert!(lower.facing(&upper));
        // The same quad facing away cannot exchange light.
        let averted = Patch::new(
            &[
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(0.0, 1.0, 1.0),
            ],
            ColorRgb::monochrome(0.5),
            crate::color::BLACK,
        );
        assert!(!lower.facing(&averted));
    }

    #[test]
    fn statistics_of_two_quads() {
        let mut top = Patch::new(
            &[
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(0.0, 1.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
            ],
            crate::color::BLACK,
            ColorRgb::monochrome(1.0),
        );
        top.direct_potential = 0.25;
        let scene = Scene::new(vec![unit_quad(), top]);
        let stats = Statistics::compute(&scene);
        assert_abs_diff_eq!(stats.total_area, 2.0, epsilon = 1e-5);
        assert_abs_diff_eq!(stats.max_self_emitted_radiance.r, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(
            stats.max_self_emitted_power.r,
            std::f32::consts::PI,
            epsilon = 1e-5
        );
        assert_abs_diff_eq!(stats.max_direct_potential, 0.25, epsilon = 1e-6);
    }
}
