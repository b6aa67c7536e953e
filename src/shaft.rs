// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shaft culling: reducing the candidate occluder list between two elements
//! to the geometry that can actually lie between them.
//!
//! A shaft is the convex envelope of two reference regions, bounded by
//! their common extent box and a set of at most sixteen planes. Despite
//! the name it is a convex envelope rather than a cylinder (Haines &
//! Wallace, "Shaft culling for efficient ray-traced radiosity", 1991).

use glam::Vec3;

use crate::config::ShaftCullStrategy;
use crate::constants::{EPSILON, MAX_PATCH_VERTICES};
use crate::geom::{triple_cross, vector_tolerance, BoundingBox, Polygon};
use crate::scene::{GeometryId, GeometryKind, Patch, PatchId, Ray, RayFlags, Scene};

/// Classification of geometry against a shaft or one of its planes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaftPlanePosition {
    Inside,
    Overlap,
    Outside,
    Coplanar,
}

/// One bounding plane of a shaft. Geometry on the negative side is inside.
#[derive(Clone, Copy, Debug)]
pub struct ShaftPlane {
    pub n: [f64; 3],
    pub d: f64,
    /// Per axis: whether the box corner nearest along the normal is the
    /// minimum corner. Gives constant-time box classification.
    near_min: [bool; 3],
}

impl ShaftPlane {
    fn new(nx: f64, ny: f64, nz: f64, d: f64) -> Self {
        Self {
            n: [nx, ny, nz],
            d,
            near_min: [nx > 0.0, ny > 0.0, nz > 0.0],
        }
    }

    fn nearest_corner_value(&self, b: &BoundingBox) -> f64 {
        (0..3)
            .map(|i| self.n[i] * b.coord(i, self.near_min[i]) as f64)
            .sum::<f64>()
            + self.d
    }

    fn farthest_corner_value(&self, b: &BoundingBox) -> f64 {
        (0..3)
            .map(|i| self.n[i] * b.coord(i, !self.near_min[i]) as f64)
            .sum::<f64>()
            + self.d
    }

    /// Ordering key for duplicate elimination; assumes normalised normals.
    fn compare(&self, other: &ShaftPlane) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        for i in 0..3 {
            if self.n[i] < other.n[i] - EPSILON {
                return Ordering::Less;
            }
            if self.n[i] > other.n[i] + EPSILON {
                return Ordering::Greater;
            }
        }
        let tolerance = (self.d.abs().max(other.d.abs())) * EPSILON;
        if self.d < other.d - tolerance {
            Ordering::Less
        } else if self.d > other.d + tolerance {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }
}

/// A candidate occluder: either a node of the scene's geometry tree, or a
/// patch subset produced by opening one during an earlier culling pass.
#[derive(Clone, Debug)]
pub enum Occluder {
    Geometry(GeometryId),
    PatchSet(Vec<PatchId>),
}

/// A list of candidate occluders between two elements.
#[derive(Clone, Debug, Default)]
pub struct CandidateList {
    pub occluders: Vec<Occluder>,
    /// True while the list still stands for the entire (clustered) scene,
    /// in which case ray tests may go through the scene-wide oracle.
    pub whole_scene: bool,
}

impl CandidateList {
    pub fn whole_scene(root: GeometryId) -> Self {
        Self {
            occluders: vec![Occluder::Geometry(root)],
            whole_scene: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.occluders.is_empty()
    }
}

const MAX_SKIP: usize = 2;
const MAX_PLANES: usize = 16;

/// The convex envelope between two reference regions.
#[derive(Clone, Debug)]
pub struct Shaft {
    ref1: Option<BoundingBox>,
    ref2: Option<BoundingBox>,
    extent: BoundingBox,
    planes: Vec<ShaftPlane>,
    omit: Vec<PatchId>,
    dont_open: Vec<GeometryId>,
    /// The segment centre1→centre2 is guaranteed to lie inside the shaft.
    centre1: Vec3,
    centre2: Vec3,
    /// Set during culling when a single patch cuts right through the
    /// shaft: there is full occlusion and culling may stop early.
    cut: bool,
}

impl Shaft {
    pub fn is_cut(&self) -> bool {
        self.cut
    }

    pub fn planes(&self) -> &[ShaftPlane] {
        &self.planes
    }

    /// The patch will never be returned as an occluder.
    pub fn omit(&mut self, patch: PatchId) {
        debug_assert!(self.omit.len() < MAX_SKIP);
        self.omit.push(patch);
    }

    /// The geometry will be kept closed during culling.
    pub fn dont_open(&mut self, geometry: GeometryId) {
        debug_assert!(self.dont_open.len() < MAX_SKIP);
        self.dont_open.push(geometry);
    }

    /// Constructs a shaft between two bounding boxes: up to eight planes,
    /// each through an edge of one box and tangent to the other.
    pub fn from_bounding_boxes(box1: BoundingBox, box2: BoundingBox) -> Self {
        let mut extent = box1;
        extent.enlarge(&box2);

        let coord = |b: &BoundingBox, i: usize| -> f32 {
            if i < 3 {
                b.min[i]
            } else {
                b.max[i - 3]
            }
        };

        // Which coordinates of which box become the extent minimum or
        // maximum. Exactly shared coordinates count for box1 only.
        let mut has_min_max1 = [false; 6];
        let mut has_min_max2 = [false; 6];
        for i in 0..3 {
            if box1.min[i] < box2.min[i] {
                has_min_max1[i] = true;
            } else if (box1.min[i] - box2.min[i]).abs() > EPSILON as f32 {
                has_min_max2[i] = true;
            }
        }
        for i in 0..3 {
            if box1.max[i] > box2.max[i] {
                has_min_max1[i + 3] = true;
            } else if (box1.max[i] - box2.max[i]).abs() > EPSILON as f32 {
                has_min_max2[i + 3] = true;
            }
        }

        let mut planes = Vec::new();
        for i in 0..6 {
            if !has_min_max1[i] {
                continue;
            }
            for j in 0..6 {
                let a = i % 3;
                let b = j % 3;
                if !has_min_max2[j] || a == b {
                    continue;
                }
                let u1 = coord(&box1, i) as f64;
                let v1 = coord(&box1, j) as f64;
                let u2 = coord(&box2, i) as f64;
                let v2 = coord(&box2, j) as f64;
                // Orient the normal outwards.
                let (du, dv) = if (i < 3 && j < 3) || (i >= 3 && j >= 3) {
                    (v2 - v1, u1 - u2)
                } else {
                    (v1 - v2, u2 - u1)
                };
                let mut n = [0.0f64; 3];
                n[a] = du;
                n[b] = dv;
                let d = -(du * u1 + dv * v1);
                if planes.len() < MAX_PLANES {
                    planes.push(ShaftPlane::new(n[0], n[1], n[2], d));
                }
            }
        }

        Self {
            ref1: Some(box1),
            ref2: Some(box2),
            extent,
            planes,
            omit: Vec::new(),
            dont_open: Vec::new(),
            centre1: box1.centre(),
            centre2: box2.centre(),
            cut: false,
        }
    }

    /// Constructs the exact shaft between two polygons: for each edge of
    /// one polygon and vertex of the other, a plane is accepted iff both
    /// polygons lie entirely on its negative side.
    pub fn from_polygon_to_polygon(p1: &Polygon, p2: &Polygon) -> Self {
        let mut extent = p1.bounds;
        extent.enlarge(&p2.bounds);
        let mut shaft = Self {
            ref1: None,
            ref2: None,
            extent,
            planes: Vec::new(),
            omit: Vec::new(),
            dont_open: Vec::new(),
            centre1: p1.centre(),
            centre2: p2.centre(),
            cut: false,
        };
        shaft.construct_polygon_planes(p1, p2);
        shaft.construct_polygon_planes(p2, p1);
        shaft
    }

    fn push_unique_plane(&mut self, plane: ShaftPlane) {
        if self.planes.len() == MAX_PLANES {
            return;
        }
        if self
            .planes
            .iter()
            .all(|p| p.compare(&plane) != std::cmp::Ordering::Equal)
        {
            self.planes.push(plane);
        }
    }

    /// Planes through the edges of `p1` and vertices of `p2`.
    fn construct_polygon_planes(&mut self, p1: &Polygon, p2: &Polygon) {
        // The supporting plane of p1 itself is a shaft plane when p2 lies
        // entirely on one of its sides.
        let n1 = p1.normal.as_dvec3();
        let max_planes_per_edge = match test_polygon_vs_plane(p2, n1.x, n1.y, n1.z, p1.plane_constant as f64) {
            ShaftPlanePosition::Inside => {
                self.push_unique_plane(ShaftPlane::new(n1.x, n1.y, n1.z, p1.plane_constant as f64));
                1
            }
            ShaftPlanePosition::Outside => {
                self.push_unique_plane(ShaftPlane::new(
                    -n1.x,
                    -n1.y,
                    -n1.z,
                    -(p1.plane_constant as f64),
                ));
                1
            }
            ShaftPlanePosition::Overlap => 2,
            // Coplanar polygons: a degenerate shaft with no planes, just
            // the thin extent box.
            ShaftPlanePosition::Coplanar => return,
        };

        let v1 = p1.vertices();
        let v2 = p2.vertices();
        for i in 0..v1.len() {
            let cur = v1[i];
            let next = v1[(i + 1) % v1.len()];
            let mut planes_found = 0;
            for &other in v2 {
                if planes_found >= max_planes_per_edge {
                    break;
                }
                let normal = triple_cross(cur, next, other);
                let norm = normal.length();
                if (norm as f64) < EPSILON {
                    // Co-linear points; try the next vertex.
                    continue;
                }
                let normal = normal / norm;
                let nd = normal.as_dvec3();
                let d = -(nd.dot(cur.as_dvec3()));

                // Side of p1, ignoring the vertices that define the plane.
                let mut side = test_point_vs_plane(v1[(i + 2) % v1.len()], nd.x, nd.y, nd.z, d);
                let mut k = (i + 3) % v1.len();
                while k != i {
                    let s = test_point_vs_plane(v1[k], nd.x, nd.y, nd.z, d);
                    if side == ShaftPlanePosition::Coplanar {
                        side = s;
                    } else if s != ShaftPlanePosition::Coplanar && s != side {
                        side = ShaftPlanePosition::Overlap;
                    }
                    k = (k + 1) % v1.len();
                }
                if side != ShaftPlanePosition::Inside && side != ShaftPlanePosition::Outside {
                    continue;
                }

                if verify_polygon_vs_plane(p2, nd.x, nd.y, nd.z, d, side) {
                    planes_found += 1;
                    if side == ShaftPlanePosition::Inside {
                        self.push_unique_plane(ShaftPlane::new(nd.x, nd.y, nd.z, d));
                    } else {
                        self.push_unique_plane(ShaftPlane::new(-nd.x, -nd.y, -nd.z, -d));
                    }
                }
            }
        }
    }

    /// Classifies a bounding box against the shaft in constant time per
    /// plane.
    pub fn bounding_box_test(&self, b: &BoundingBox) -> ShaftPlanePosition {
        if b.disjoint(&self.extent) {
            return ShaftPlanePosition::Outside;
        }

        // If the nearest corner is outside any plane the box is outside.
        for plane in &self.planes {
            if plane.nearest_corner_value(b) > -(plane.d * EPSILON).abs() {
                return ShaftPlanePosition::Outside;
            }
        }

        // Anything touching the reference boxes overlaps the shaft.
        if self.ref1.map_or(false, |r| !b.disjoint(&r))
            || self.ref2.map_or(false, |r| !b.disjoint(&r))
        {
            return ShaftPlanePosition::Overlap;
        }

        // If the farthest corner is outside any plane the box overlaps;
        // otherwise it is fully inside.
        for plane in &self.planes {
            if plane.farthest_corner_value(b) > (plane.d * EPSILON).abs() {
                return ShaftPlanePosition::Overlap;
            }
        }
        ShaftPlanePosition::Inside
    }

    /// The definitive patch-level test. Classifies the patch against the
    /// shaft; as a side effect sets [`Shaft::is_cut`] when the patch cuts
    /// clean through the shaft (full occlusion by a single patch).
    pub fn patch_test(&mut self, patch: &Patch) -> ShaftPlanePosition {
        let verts = patch.vertices();
        let nv = verts.len();
        let mut some_out = false;
        let mut in_all = [true; MAX_PATCH_VERTICES];
        // Per edge: the parameter interval that may lie inside the shaft.
        let mut t_min = [0.0f64; MAX_PATCH_VERTICES];
        let mut t_max = [1.0f64; MAX_PATCH_VERTICES];
        let p_tol: Vec<f64> = verts.iter().map(|&v| vector_tolerance(v)).collect();

        for plane in &self.planes {
            let mut e = [0.0f64; MAX_PATCH_VERTICES];
            let mut side = [ShaftPlanePosition::Coplanar; MAX_PATCH_VERTICES];
            let mut any_in = false;
            let mut any_out = false;
            for (j, &v) in verts.iter().enumerate() {
                e[j] = plane.n[0] * v.x as f64
                    + plane.n[1] * v.y as f64
                    + plane.n[2] * v.z as f64
                    + plane.d;
                let tolerance = plane.d.abs() * EPSILON + p_tol[j];
                if e[j] > tolerance {
                    side[j] = ShaftPlanePosition::Outside;
                    any_out = true;
                } else if e[j] < -tolerance {
                    side[j] = ShaftPlanePosition::Inside;
                    any_in = true;
                }
                if side[j] != ShaftPlanePosition::Inside {
                    in_all[j] = false;
                }
            }

            if !any_in {
                // No vertex on the inside of this plane.
                return ShaftPlanePosition::Outside;
            }

            if any_out {
                some_out = true;
                // Shrink each edge's inside interval.
                for j in 0..nv {
                    let k = (j + 1) % nv;
                    if side[j] != side[k] {
                        if side[k] == ShaftPlanePosition::Outside {
                            if side[j] == ShaftPlanePosition::Inside {
                                if t_max[j] > t_min[j] {
                                    let t = e[j] / (e[j] - e[k]);
                                    if t < t_max[j] {
                                        t_max[j] = t;
                                    }
                                }
                            } else {
                                t_max[j] = -EPSILON;
                            }
                        } else if side[j] == ShaftPlanePosition::Outside {
                            if side[k] == ShaftPlanePosition::Inside {
                                if t_min[j] < t_max[j] {
                                    let t = e[j] / (e[j] - e[k]);
                                    if t > t_min[j] {
                                        t_min[j] = t;
                                    }
                                }
                            } else {
                                t_min[j] = 1.0 + EPSILON;
                            }
                        }
                    } else if side[j] == ShaftPlanePosition::Outside {
                        t_max[j] = -EPSILON;
                    }
                }
            }
        }

        // The remaining tests only work when the planes alone bound the
        // shaft (polygon-to-polygon construction).
        if self.ref1.is_some() || self.ref2.is_some() {
            return ShaftPlanePosition::Overlap;
        }

        if !some_out {
            return ShaftPlanePosition::Inside;
        }
        if in_all[..nv].iter().any(|&x| x) {
            // At least one vertex strictly inside.
            return ShaftPlanePosition::Overlap;
        }
        // Any edge segment still inside?
        for j in 0..nv {
            if t_min[j] + EPSILON < t_max[j] - EPSILON {
                return ShaftPlanePosition::Overlap;
            }
        }

        // All vertices and edges are outside. Either the patch is fully
        // outside, or it cuts the shaft: decided by intersecting the
        // centre segment.
        let ray = Ray {
            origin: self.centre1,
            dir: self.centre2 - self.centre1,
        };
        if patch
            .intersect(
                &ray,
                EPSILON as f32,
                1.0 - EPSILON as f32,
                RayFlags::FRONT_AND_BACK,
            )
            .is_some()
        {
            self.cut = true;
            return ShaftPlanePosition::Overlap;
        }
        ShaftPlanePosition::Outside
    }

    fn is_omitted(&self, patch: PatchId) -> bool {
        self.omit.contains(&patch)
    }

    fn keep_closed(&self, geometry: GeometryId) -> bool {
        self.dont_open.contains(&geometry)
    }

    /// Keeps the inside/overlapping patches of `patches`.
    fn cull_patches(&mut self, scene: &Scene, patches: &[PatchId]) -> Vec<PatchId> {
        let mut culled = Vec::new();
        for &id in patches {
            if self.cut {
                break;
            }
            if self.is_omitted(id) {
                continue;
            }
            let patch = scene.patch(id);
            match self.bounding_box_test(&patch.bounds) {
                ShaftPlanePosition::Outside => {}
                ShaftPlanePosition::Inside => culled.push(id),
                _ => {
                    if self.patch_test(patch) != ShaftPlanePosition::Outside {
                        culled.push(id);
                    }
                }
            }
        }
        culled
    }

    fn keep(&self, occluder: &Occluder, out: &mut Vec<Occluder>) {
        out.push(occluder.clone());
    }

    /// Breaks an occluder into its components and culls those.
    fn open(
        &mut self,
        scene: &Scene,
        occluder: &Occluder,
        out: &mut Vec<Occluder>,
        strategy: ShaftCullStrategy,
    ) {
        match occluder {
            Occluder::Geometry(id) => match &scene.geometries.get(*id).kind {
                GeometryKind::Compound(children) => {
                    let children: Vec<Occluder> =
                        children.iter().map(|&g| Occluder::Geometry(g)).collect();
                    self.cull_list(scene, &children, out, strategy);
                }
                GeometryKind::PatchSet(patches) => {
                    let culled = self.cull_patches(scene, patches);
                    if !culled.is_empty() {
                        out.push(Occluder::PatchSet(culled));
                    }
                }
            },
            Occluder::PatchSet(patches) => {
                let culled = self.cull_patches(scene, patches);
                if !culled.is_empty() {
                    out.push(Occluder::PatchSet(culled));
                }
            }
        }
    }

    /// Tests one occluder and keeps, opens or drops it.
    pub fn cull_occluder(
        &mut self,
        scene: &Scene,
        occluder: &Occluder,
        out: &mut Vec<Occluder>,
        strategy: ShaftCullStrategy,
    ) {
        let (bounds, closed) = match occluder {
            Occluder::Geometry(id) => (
                scene.geometries.get(*id).bounds,
                self.keep_closed(*id),
            ),
            Occluder::PatchSet(patches) => {
                let mut b = BoundingBox::EMPTY;
                for &p in patches {
                    b.enlarge(&scene.patch(p).bounds);
                }
                (b, false)
            }
        };
        match self.bounding_box_test(&bounds) {
            ShaftPlanePosition::Inside => {
                if strategy == ShaftCullStrategy::AlwaysOpen && !closed {
                    self.open(scene, occluder, out, strategy);
                } else {
                    self.keep(occluder, out);
                }
            }
            ShaftPlanePosition::Overlap => {
                if closed || strategy == ShaftCullStrategy::KeepClosed {
                    self.keep(occluder, out);
                } else {
                    self.open(scene, occluder, out, strategy);
                }
            }
            _ => {}
        }
    }

    fn cull_list(
        &mut self,
        scene: &Scene,
        occluders: &[Occluder],
        out: &mut Vec<Occluder>,
        strategy: ShaftCullStrategy,
    ) {
        for occluder in occluders {
            if self.cut {
                break;
            }
            self.cull_occluder(scene, occluder, out, strategy);
        }
    }

    /// Culls a candidate list, producing the reduced list for this shaft.
    /// When [`Shaft::is_cut`] is set afterwards, one patch fully occludes
    /// the shaft; the returned list is then incomplete and the caller must
    /// treat the pair as fully blocked.
    pub fn cull(
        &mut self,
        scene: &Scene,
        candidates: &CandidateList,
        strategy: ShaftCullStrategy,
    ) -> CandidateList {
        let mut out = Vec::new();
        self.cull_list(scene, &candidates.occluders, &mut out, strategy);
        CandidateList {
            occluders: out,
            whole_scene: false,
        }
    }
}

/// Position of a polygon with respect to the plane `n·x + d = 0`.
fn test_polygon_vs_plane(
    polygon: &Polygon,
    nx: f64,
    ny: f64,
    nz: f64,
    d: f64,
) -> ShaftPlanePosition {
    let mut any_out = false;
    let mut any_in = false;
    for &v in polygon.vertices() {
        let e = nx * v.x as f64 + ny * v.y as f64 + nz * v.z as f64 + d;
        let tolerance = d.abs() * EPSILON + vector_tolerance(v);
        any_out |= e > tolerance;
        any_in |= e < -tolerance;
        if any_out && any_in {
            return ShaftPlanePosition::Overlap;
        }
    }
    if any_out {
        ShaftPlanePosition::Outside
    } else if any_in {
        ShaftPlanePosition::Inside
    } else {
        ShaftPlanePosition::Coplanar
    }
}

/// Whether the polygon is on the given side of the plane.
fn verify_polygon_vs_plane(
    polygon: &Polygon,
    nx: f64,
    ny: f64,
    nz: f64,
    d: f64,
    side: ShaftPlanePosition,
) -> bool {
    use ShaftPlanePosition::*;
    let mut any_out = false;
    let mut any_in = false;
    for &v in polygon.vertices() {
        let e = nx * v.x as f64 + ny * v.y as f64 + nz * v.z as f64 + d;
        let tolerance = d.abs() * EPSILON + vector_tolerance(v);
        any_out |= e > tolerance;
        if any_out && (side == Inside || side == Coplanar) {
            return false;
        }
        any_in |= e < -tolerance;
        if any_in && (side == Outside || side == Coplanar || (any_out && side != Overlap)) {
            return false;
        }
    }
    match (any_in, any_out) {
        (true, true) => side == Overlap,
        (true, false) => side == Inside,
        (false, true) => side == Outside,
        (false, false) => side == Coplanar,
    }
}

/// Position of a point with respect to the plane `n·x + d = 0`.
fn test_point_vs_plane(p: Vec3, nx: f64, ny: f64, nz: f64, d: f64) -> ShaftPlanePosition {
    let e = nx * p.x as f64 + ny * p.y as f64 + nz * p.z as f64 + d;
    let tolerance = (d * EPSILON).abs() + vector_tolerance(p);
    if e < -tolerance {
        ShaftPlanePosition::Inside
    } else if e > tolerance {
        ShaftPlanePosition::Outside
    } else {
        ShaftPlanePosition::Coplanar
    }
}
