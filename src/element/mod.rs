// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The element hierarchy: surface quadtrees and the cluster octree.
//!
//! One record serves both element variants. Surface elements belong to a
//! patch and subdivide regularly into exactly four children related to the
//! parent by fixed affine parameter transforms. Cluster elements belong to
//! a geometry node, always use a constant basis, and have only irregular
//! children. All elements live in a single arena and refer to each other
//! by 32-bit indices.

mod pushpull;

pub use pushpull::{push_pull_potential, push_pull_radiance};

use glam::{Vec2, Vec3};
use log::trace;

use crate::basis::basis_for_vertices;
use crate::color::{ColorRgb, BLACK};
use crate::config::BasisType;
use crate::geom::{BoundingBox, Mat2x2, Polygon, QUAD_UP_TRANSFORMS, TRI_UP_TRANSFORMS};
use crate::interaction::{Interaction, LinkCounts};
use crate::scene::{GeometryId, GeometryKind, PatchId, Scene};

/// Index of an element in the [`ElementArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ElementId(pub u32);

impl ElementId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
pub enum ElementKind {
    Surface {
        patch: PatchId,
        /// Transform from this element's (u,v) domain to the parent surface
        /// element's domain; `None` for a patch's top-level element.
        up_trans: Option<Mat2x2>,
        /// Which of the four regular children this element is.
        child_index: u8,
    },
    Cluster {
        geometry: GeometryId,
    },
}

/// A node of the multi-resolution radiance representation.
#[derive(Clone, Debug)]
pub struct GalerkinElement {
    pub id: ElementId,
    pub kind: ElementKind,
    pub parent: Option<ElementId>,
    pub regular_children: Option<[ElementId; 4]>,
    pub irregular_children: Vec<ElementId>,

    /// The element is, or contains, a self-emitting surface.
    pub is_light_source: bool,
    /// All initial interactions have been created for this top-level
    /// element.
    pub interactions_created: bool,

    /// Surface area; for a cluster, total area of the contained surfaces.
    pub area: f32,
    /// Smallest contained surface area.
    pub minimum_area: f32,
    /// Equivalent blocker diameter, for multi-resolution visibility.
    pub blocker_size: f32,
    pub num_patches: usize,

    /// Accumulated total radiance, per basis coefficient.
    pub radiance: Vec<ColorRgb>,
    /// Radiance accepted during the current iteration; cleared by
    /// push-pull.
    pub received_radiance: Vec<ColorRgb>,
    /// Radiance received but not yet propagated (shooting only).
    pub un_shot_radiance: Vec<ColorRgb>,

    pub potential: f32,
    pub received_potential: f32,
    pub un_shot_potential: f32,
    pub direct_potential: f32,

    pub basis_size: usize,
    /// Coefficients effectively used so far (`<= basis_size`).
    pub basis_used: usize,

    pub interactions: Vec<Interaction>,

    /// Pixel tally for the z-visibility scratch renders.
    pub scratch_pixels: u32,
}

impl GalerkinElement {
    pub fn is_cluster(&self) -> bool {
        matches!(self.kind, ElementKind::Cluster { .. })
    }

    pub fn is_leaf(&self) -> bool {
        self.regular_children.is_none() && self.irregular_children.is_empty()
    }

    pub fn patch_id(&self) -> Option<PatchId> {
        match self.kind {
            ElementKind::Surface { patch, .. } => Some(patch),
            ElementKind::Cluster { .. } => None,
        }
    }

    pub fn geometry_id(&self) -> Option<GeometryId> {
        match self.kind {
            ElementKind::Cluster { geometry } => Some(geometry),
            ElementKind::Surface { .. } => None,
        }
    }

    pub fn up_trans(&self) -> Option<&Mat2x2> {
        match &self.kind {
            ElementKind::Surface { up_trans, .. } => up_trans.as_ref(),
            ElementKind::Cluster { .. } => None,
        }
    }

    /// (Re)allocates the three coefficient vectors for `basis_size`
    /// entries, keeping existing coefficients. Only ever grows.
    pub fn realloc_coefficients(&mut self) {
        let n = self.basis_size;
        if self.radiance.len() < n {
            self.radiance.resize(n, BLACK);
            self.received_radiance.resize(n, BLACK);
            self.un_shot_radiance.resize(n, BLACK);
        }
    }
}

/// Equivalent blocker diameter of a flat area: the diameter of the disc
/// with the same mean projected area.
fn equivalent_blocker_size(projected_area: f32) -> f32 {
    2.0 * (projected_area / std::f32::consts::PI).max(0.0).sqrt()
}

/// Flat storage for every element of the hierarchy, plus the cross indices
/// from patches and geometries to their elements.
#[derive(Debug, Default)]
pub struct ElementArena {
    elements: Vec<GalerkinElement>,
    /// Top-level surface element per patch.
    patch_elements: Vec<Option<ElementId>>,
    /// Cluster element per geometry node.
    geometry_elements: Vec<Option<ElementId>>,
}

impl ElementArena {
    pub fn get(&self, id: ElementId) -> &GalerkinElement {
        &self.elements[id.index()]
    }

    pub fn get_mut(&mut self, id: ElementId) -> &mut GalerkinElement {
        &mut self.elements[id.index()]
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &GalerkinElement> {
        self.elements.iter()
    }

    pub fn patch_element(&self, patch: PatchId) -> Option<ElementId> {
        self.patch_elements.get(patch.index()).copied().flatten()
    }

    pub fn geometry_element(&self, geometry: GeometryId) -> Option<ElementId> {
        self.geometry_elements
            .get(geometry.index())
            .copied()
            .flatten()
    }

    fn push(&mut self, mut element: GalerkinElement) -> ElementId {
        let id = ElementId(self.elements.len() as u32);
        element.id = id;
        self.elements.push(element);
        id
    }

    /// Creates the top-level element for a patch.
    pub fn create_toplevel(
        &mut self,
        scene: &Scene,
        patch: PatchId,
        basis_type: BasisType,
    ) -> ElementId {
        let p = scene.patch(patch);
        let basis_size = basis_type.basis_size();
        let element = GalerkinElement {
            id: ElementId(0),
            kind: ElementKind::Surface {
                patch,
                up_trans: None,
                child_index: 0,
            },
            parent: None,
            regular_children: None,
            irregular_children: Vec::new(),
            is_light_source: p.is_light_source(),
            interactions_created: false,
            area: p.area,
            minimum_area: p.area,
            blocker_size: equivalent_blocker_size(p.area),
            num_patches: 1,
            radiance: vec![BLACK; basis_size],
            received_radiance: vec![BLACK; basis_size],
            un_shot_radiance: vec![BLACK; basis_size],
            potential: 0.0,
            received_potential: 0.0,
            un_shot_potential: 0.0,
            direct_potential: 0.0,
            basis_size,
            basis_used: 1,
            interactions: Vec::new(),
            scratch_pixels: 0,
        };
        let id = self.push(element);
        if self.patch_elements.len() <= patch.index() {
            self.patch_elements.resize(patch.index() + 1, None);
        }
        self.patch_elements[patch.index()] = Some(id);
        id
    }

    /// Creates the cluster hierarchy for the geometry subtree rooted at
    /// `geometry` and returns its top cluster element. Top-level surface
    /// elements must already exist for every patch; they become irregular
    /// children of the leaf clusters.
    pub fn create_cluster_hierarchy(&mut self, scene: &Scene, geometry: GeometryId) -> ElementId {
        if self.geometry_elements.len() < scene.geometries.len() {
            self.geometry_elements.resize(scene.geometries.len(), None);
        }
        let id = self.create_cluster(scene, geometry);
        trace!(
            "cluster hierarchy below geometry {:?}: {} elements",
            geometry,
            self.len()
        );
        id
    }

    fn create_cluster(&mut self, scene: &Scene, geometry: GeometryId) -> ElementId {
        let element = GalerkinElement {
            id: ElementId(0),
            kind: ElementKind::Cluster { geometry },
            parent: None,
            regular_children: None,
            irregular_children: Vec::new(),
            is_light_source: false,
            interactions_created: false,
            area: 0.0,
            minimum_area: f32::INFINITY,
            blocker_size: 0.0,
            num_patches: 0,
            radiance: vec![BLACK],
            received_radiance: vec![BLACK],
            un_shot_radiance: vec![BLACK],
            potential: 0.0,
            received_potential: 0.0,
            un_shot_potential: 0.0,
            direct_potential: 0.0,
            basis_size: 1,
            basis_used: 1,
            interactions: Vec::new(),
            scratch_pixels: 0,
        };
        let id = self.push(element);
        self.geometry_elements[geometry.index()] = Some(id);

        let kind = scene.geometries.get(geometry).kind.clone();
        let mut children = Vec::new();
        match kind {
            GeometryKind::Compound(geos) => {
                for g in geos {
                    children.push(self.create_cluster(scene, g));
                }
            }
            GeometryKind::PatchSet(patches) => {
                for p in patches {
                    let child = self
                        .patch_element(p)
                        .expect("top-level surface elements are created before clustering");
                    children.push(child);
                }
            }
        }

        let mut area = 0.0;
        let mut minimum_area = f32::INFINITY;
        let mut num_patches = 0;
        let mut is_light_source = false;
        for &c in &children {
            self.get_mut(c).parent = Some(id);
            let child = self.get(c);
            area += child.area;
            minimum_area = minimum_area.min(child.minimum_area);
            num_patches += child.num_patches;
            is_light_source |= child.is_light_source;
        }

        let e = self.get_mut(id);
        e.irregular_children = children;
        e.area = area;
        e.minimum_area = minimum_area;
        e.num_patches = num_patches;
        e.is_light_source = is_light_source;
        // A cluster blocks like a disc with its mean projected area A/4.
        e.blocker_size = equivalent_blocker_size(0.25 * area);
        id
    }

    /// Regularly subdivides a surface element into its four children,
    /// pushing the current radiance representation down so the children
    /// are usable immediately. Returns the existing children when the
    /// element is already subdivided.
    pub fn regular_subdivide(&mut self, scene: &Scene, id: ElementId) -> [ElementId; 4] {
        if let Some(children) = self.get(id).regular_children {
            return children;
        }
        let (patch, num_vertices) = {
            let e = self.get(id);
            let patch = e
                .patch_id()
                .expect("only surface elements subdivide regularly");
            (patch, scene.patch(patch).num_vertices())
        };
        let transforms = if num_vertices == 3 {
            &TRI_UP_TRANSFORMS
        } else {
            &QUAD_UP_TRANSFORMS
        };
        let basis = basis_for_vertices(num_vertices);

        let parent = self.get(id);
        let parent_area = parent.area;
        let parent_basis_size = parent.basis_size;
        let parent_light = parent.is_light_source;
        let parent_radiance = parent.radiance.clone();
        let parent_un_shot = parent.un_shot_radiance.clone();
        let parent_potential = parent.potential;
        let parent_un_shot_potential = parent.un_shot_potential;
        let parent_direct_potential = parent.direct_potential;

        let mut ids = [ElementId(0); 4];
        for (sigma, xf) in transforms.iter().enumerate() {
            let mut radiance = vec![BLACK; parent_basis_size];
            let mut un_shot = vec![BLACK; parent_basis_size];
            pushpull::push_coefficients(
                basis,
                sigma,
                &parent_radiance,
                &mut radiance,
            );
            pushpull::push_coefficients(basis, sigma, &parent_un_shot, &mut un_shot);

            let child = GalerkinElement {
                id: ElementId(0),
                kind: ElementKind::Surface {
                    patch,
                    up_trans: Some(*xf),
                    child_index: sigma as u8,
                },
                parent: Some(id),
                regular_children: None,
                irregular_children: Vec::new(),
                is_light_source: parent_light,
                interactions_created: false,
                area: 0.25 * parent_area,
                minimum_area: 0.25 * parent_area,
                blocker_size: equivalent_blocker_size(0.25 * parent_area),
                num_patches: 1,
                radiance,
                received_radiance: vec![BLACK; parent_basis_size],
                un_shot_radiance: un_shot,
                potential: parent_potential,
                received_potential: 0.0,
                un_shot_potential: parent_un_shot_potential,
                direct_potential: parent_direct_potential,
                basis_size: parent_basis_size,
                basis_used: 1,
                interactions: Vec::new(),
                scratch_pixels: 0,
            };
            ids[sigma] = self.push(child);
        }
        self.get_mut(id).regular_children = Some(ids);
        ids
    }

    /// Transform mapping (u,v) on this element to (u,v) on the patch's
    /// top-level element, or `None` when the element is itself top-level.
    pub fn top_transform(&self, id: ElementId) -> Option<Mat2x2> {
        let mut e = self.get(id);
        let mut xf = *e.up_trans()?;
        while let Some(parent) = e.parent {
            e = self.get(parent);
            match e.up_trans() {
                Some(up) => xf = Mat2x2::concat(up, &xf),
                None => break,
            }
        }
        Some(xf)
    }

    /// World-space corner vertices: 3 or 4 for a surface element, 8 for a
    /// cluster.
    pub fn vertices(&self, scene: &Scene, id: ElementId) -> Vec<Vec3> {
        let e = self.get(id);
        match &e.kind {
            ElementKind::Cluster { geometry } => {
                let b = scene.geometries.get(*geometry).bounds;
                (0..8)
                    .map(|i| {
                        Vec3::new(
                            if i & 1 == 0 { b.min.x } else { b.max.x },
                            if i & 2 == 0 { b.min.y } else { b.max.y },
                            if i & 4 == 0 { b.min.z } else { b.max.z },
                        )
                    })
                    .collect()
            }
            ElementKind::Surface { patch, .. } => {
                let p = scene.patch(*patch);
                let corners: &[Vec2] = if p.num_vertices() == 3 {
                    &[Vec2::ZERO, Vec2::X, Vec2::Y]
                } else {
                    &[Vec2::ZERO, Vec2::X, Vec2::ONE, Vec2::Y]
                };
                let xf = self.top_transform(id);
                corners
                    .iter()
                    .map(|&c| {
                        let uv = match &xf {
                            Some(m) => m.transform_point(c),
                            None => c,
                        };
                        p.uniform_point(uv.x, uv.y)
                    })
                    .collect()
            }
        }
    }

    pub fn bounds(&self, scene: &Scene, id: ElementId) -> BoundingBox {
        let e = self.get(id);
        match &e.kind {
            ElementKind::Cluster { geometry } => scene.geometries.get(*geometry).bounds,
            ElementKind::Surface { .. } => BoundingBox::from_points(&self.vertices(scene, id)),
        }
    }

    pub fn midpoint(&self, scene: &Scene, id: ElementId) -> Vec3 {
        let e = self.get(id);
        match &e.kind {
            ElementKind::Cluster { geometry } => scene.geometries.get(*geometry).bounds.centre(),
            ElementKind::Surface { .. } => {
                let v = self.vertices(scene, id);
                v.iter().copied().sum::<Vec3>() / v.len() as f32
            }
        }
    }

    /// Shaft-culling polygon of a surface element.
    pub fn polygon(&self, scene: &Scene, id: ElementId) -> Option<Polygon> {
        let e = self.get(id);
        let patch = e.patch_id()?;
        let p = scene.patch(patch);
        Some(Polygon::new(
            &self.vertices(scene, id),
            p.normal,
            p.plane_constant,
        ))
    }

    /// Descends one level: the regular child containing (u,v), with the
    /// point rewritten into that child's coordinates. Returns the element
    /// itself when it has no regular children.
    pub fn regular_child_at_point(
        &self,
        scene: &Scene,
        id: ElementId,
        u: f32,
        v: f32,
    ) -> (ElementId, f32, f32) {
        let e = self.get(id);
        let Some(children) = e.regular_children else {
            return (id, u, v);
        };
        let patch = e.patch_id().expect("regular children imply a surface");
        if scene.patch(patch).num_vertices() == 3 {
            if u + v <= 0.5 {
                (children[0], 2.0 * u, 2.0 * v)
            } else if u > 0.5 {
                (children[1], 2.0 * u - 1.0, 2.0 * v)
            } else if v > 0.5 {
                (children[2], 2.0 * u, 2.0 * v - 1.0)
            } else {
                (children[3], 1.0 - 2.0 * u, 1.0 - 2.0 * v)
            }
        } else if v <= 0.5 {
            if u <= 0.5 {
                (children[0], 2.0 * u, 2.0 * v)
            } else {
                (children[1], 2.0 * u - 1.0, 2.0 * v)
            }
        } else if u <= 0.5 {
            (children[2], 2.0 * u, 2.0 * v - 1.0)
        } else {
            (children[3], 2.0 * u - 1.0, 2.0 * v - 1.0)
        }
    }

    /// The leaf element under `top` at uniform point (u,v), with the point
    /// rewritten into leaf coordinates.
    pub fn regular_leaf_at_point(
        &self,
        scene: &Scene,
        top: ElementId,
        mut u: f32,
        mut v: f32,
    ) -> (ElementId, f32, f32) {
        let mut current = top;
        while self.get(current).regular_children.is_some() {
            let (child, cu, cv) = self.regular_child_at_point(scene, current, u, v);
            current = child;
            u = cu;
            v = cv;
        }
        (current, u, v)
    }

    /// Evaluates the radiance approximation of a surface element at the
    /// given point of its own parameter domain.
    pub fn radiance_at(&self, scene: &Scene, id: ElementId, u: f32, v: f32) -> ColorRgb {
        let e = self.get(id);
        let Some(patch) = e.patch_id() else {
            return e.radiance[0];
        };
        let basis = basis_for_vertices(scene.patch(patch).num_vertices());
        let mut rad = BLACK;
        for (alpha, &coeff) in e.radiance.iter().enumerate().take(e.basis_size) {
            rad = rad.add_scaled((basis.functions[alpha])(u as f64, v as f64) as f32, coeff);
        }
        rad
    }

    /// Every surface leaf below `id`, in depth-first order.
    pub fn surface_leaves(&self, id: ElementId, out: &mut Vec<ElementId>) {
        let e = self.get(id);
        if let Some(children) = e.regular_children {
            for c in children {
                self.surface_leaves(c, out);
            }
            return;
        }
        if e.irregular_children.is_empty() {
            if !e.is_cluster() {
                out.push(id);
            }
            return;
        }
        for &c in &e.irregular_children {
            self.surface_leaves(c, out);
        }
    }

    /// Surface elements directly below a cluster (the cluster's surface
    /// "leaves" regardless of their own regular subdivision).
    pub fn cluster_surfaces(&self, id: ElementId, out: &mut Vec<ElementId>) {
        let e = self.get(id);
        if !e.is_cluster() {
            out.push(id);
            return;
        }
        for &c in &e.irregular_children {
            self.cluster_surfaces(c, out);
        }
    }

    /// Number of elements, clusters and links currently alive.
    pub fn census(&self) -> (usize, usize, LinkCounts) {
        let mut clusters = 0;
        let mut counts = LinkCounts::default();
        for e in &self.elements {
            if e.is_cluster() {
                clusters += 1;
            }
            for link in &e.interactions {
                let rc = self.get(link.receiver).is_cluster();
                let sc = self.get(link.source).is_cluster();
                match (sc, rc) {
                    (true, true) => counts.cluster_to_cluster += 1,
                    (true, false) => counts.cluster_to_surface += 1,
                    (false, true) => counts.surface_to_cluster += 1,
                    (false, false) => counts.surface_to_surface += 1,
                }
            }
        }
        (self.elements.len(), clusters, counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::BLACK;
    use crate::scene::Patch;
    use approx::assert_abs_diff_eq;

    fn one_quad_scene() -> Scene {
        Scene::new(vec![Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            BLACK,
        )])
    }

    fn one_triangle_scene() -> Scene {
        Scene::new(vec![Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(0.5),
            BLACK,
        )])
    }

    #[test]
    fn subdivision_conserves_area() {
        for scene in [one_quad_scene(), one_triangle_scene()] {
            let mut arena = ElementArena::default();
            let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
            let children = arena.regular_subdivide(&scene, top);
            let sum: f32 = children.iter().map(|&c| arena.get(c).area).sum();
            assert_abs_diff_eq!(sum, arena.get(top).area, epsilon = 1e-4);
        }
    }

    #[test]
    fn subdivision_children_tile_the_patch() {
        let scene = one_quad_scene();
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.regular_subdivide(&scene, top);
        // Walking down at a few sample points lands on children whose
        // mapped-back position is the sample point again.
        for &(u, v) in &[(0.1, 0.1), (0.9, 0.2), (0.3, 0.8), (0.7, 0.6)] {
            let (leaf, lu, lv) = arena.regular_leaf_at_point(&scene, top, u, v);
            assert_ne!(leaf, top);
            let xf = arena.top_transform(leaf).unwrap();
            let back = xf.transform_point(Vec2::new(lu, lv));
            assert_abs_diff_eq!(back.x, u, epsilon = 1e-5);
            assert_abs_diff_eq!(back.y, v, epsilon = 1e-5);
        }
    }

    #[test]
    fn triangle_centre_child_at_point() {
        let scene = one_triangle_scene();
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        let children = arena.regular_subdivide(&scene, top);
        let (leaf, lu, lv) = arena.regular_leaf_at_point(&scene, top, 0.3, 0.3);
        assert_eq!(leaf, children[3]);
        let xf = arena.top_transform(leaf).unwrap();
        let back = xf.transform_point(Vec2::new(lu, lv));
        assert_abs_diff_eq!(back.x, 0.3, epsilon = 1e-5);
        assert_abs_diff_eq!(back.y, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn cluster_hierarchy_aggregates() {
        let mut patches = Vec::new();
        for i in 0..6 {
            let x = i as f32 * 2.0;
            patches.push(Patch::new(
                &[
                    Vec3::new(x, 0.0, 0.0),
                    Vec3::new(x + 1.0, 0.0, 0.0),
                    Vec3::new(x + 1.0, 1.0, 0.0),
                    Vec3::new(x, 1.0, 0.0),
                ],
                ColorRgb::monochrome(0.5),
                if i == 0 { ColorRgb::monochrome(1.0) } else { BLACK },
            ));
        }
        let scene = Scene::new(patches);
        let mut arena = ElementArena::default();
        for i in 0..scene.patches.len() {
            arena.create_toplevel(&scene, PatchId(i as u32), BasisType::Constant);
        }
        let top = arena.create_cluster_hierarchy(&scene, scene.clustered_root);
        let root = arena.get(top);
        assert!(root.is_cluster());
        assert_abs_diff_eq!(root.area, 6.0, epsilon = 1e-4);
        assert_eq!(root.num_patches, 6);
        assert!(root.is_light_source);
        assert_abs_diff_eq!(root.minimum_area, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn subdivision_pushes_radiance_down() {
        let scene = one_quad_scene();
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.get_mut(top).radiance[0] = ColorRgb::monochrome(2.0);
        let children = arena.regular_subdivide(&scene, top);
        for c in children {
            assert_abs_diff_eq!(arena.get(c).radiance[0].r, 2.0, epsilon = 1e-6);
        }
    }
}
