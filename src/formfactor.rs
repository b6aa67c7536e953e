// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The form-factor kernel: filling in a link's coupling coefficients,
//! error estimate and visibility by numerical cubature.
//!
//! References: Bekaert & Willems, "Error Control for Radiosity" (EGRW
//! 1996) for the higher-order form factors and error estimates; Sillion,
//! "A Unified Hierarchical Algorithm for Global Illumination with
//! Scattering Volumes and Object Clusters" (IEEE TVCG 1995) for the
//! cluster treatment and multi-resolution visibility.

use glam::Vec3;
use log::warn;
use ndarray::Array2;

use crate::basis::basis_for_vertices;
use crate::color::{ColorRgb, BLACK};
use crate::config::ClusteringStrategy;
use crate::constants::EPSILON;
use crate::cubature::CubatureRule;
use crate::element::{ElementArena, ElementId};
use crate::interaction::Interaction;
use crate::scene::{
    GeometryId, GeometryKind, PatchId, Ray, RayFlags, RayOracle, Scene,
};
use crate::shaft::{CandidateList, Occluder};
use crate::solver::GalerkinContext;

const SHADOW_CACHE_SIZE: usize = 5;

/// A tiny cache of recently hit occluder patches, consulted before any
/// other visibility machinery. Presumes serial evaluation.
pub(crate) struct ShadowCache {
    patches: [Option<PatchId>; SHADOW_CACHE_SIZE],
    /// Slot the next insertion overwrites; wraps around the cache.
    next: usize,
}

impl ShadowCache {
    fn new() -> Self {
        Self {
            patches: [None; SHADOW_CACHE_SIZE],
            next: 0,
        }
    }

    fn hit(&self, scene: &Scene, ray: &Ray, max_distance: f32) -> bool {
        for patch in self.patches.iter().flatten() {
            let p = scene.patch(*patch);
            if p.intersect(
                ray,
                EPSILON as f32 * max_distance,
                max_distance,
                RayFlags::FRONT_ANY,
            )
            .is_some()
            {
                return true;
            }
        }
        false
    }

    /// Replaces the least recently added entry.
    fn add(&mut self, patch: PatchId) {
        self.patches[self.next] = Some(patch);
        self.next = (self.next + 1) % SHADOW_CACHE_SIZE;
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Role {
    Receiver,
    Source,
}

/// Evaluates form factors for one link at a time, holding the "last
/// receiver / last source" sample caches. Instantiate one per iteration;
/// the caches presume serial execution.
pub(crate) struct FormFactorEvaluator {
    last_receiver: Option<ElementId>,
    last_source: Option<ElementId>,
    rcv_rule: CubatureRule,
    src_rule: CubatureRule,
    rcv_nodes: Vec<Vec3>,
    src_nodes: Vec<Vec3>,
}

impl FormFactorEvaluator {
    pub fn new() -> Self {
        Self {
            last_receiver: None,
            last_source: None,
            rcv_rule: CubatureRule { nodes: Vec::new() },
            src_rule: CubatureRule { nodes: Vec::new() },
            rcv_nodes: Vec::new(),
            src_nodes: Vec::new(),
        }
    }

    /// Picks the cubature rule for `element` in `role` and places its
    /// nodes on the element (world space).
    fn determine_nodes(
        &self,
        arena: &ElementArena,
        scene: &Scene,
        ctx: &GalerkinContext,
        element: ElementId,
        role: Role,
    ) -> (CubatureRule, Vec<Vec3>) {
        let e = arena.get(element);
        if e.is_cluster() {
            let rule = ctx.rules.cluster.clone();
            let bounds = arena.bounds(scene, element);
            let extent = bounds.extent();
            let nodes = rule
                .nodes
                .iter()
                .map(|n| {
                    bounds.min
                        + Vec3::new(
                            n.u as f32 * extent.x,
                            n.v as f32 * extent.y,
                            n.t as f32 * extent.z,
                        )
                })
                .collect();
            (rule, nodes)
        } else {
            let patch = scene.patch(e.patch_id().expect("surface element"));
            let rule = match (role, patch.num_vertices()) {
                (Role::Receiver, 3) => ctx.rules.receiver_triangle.clone(),
                (Role::Receiver, _) => ctx.rules.receiver_quad.clone(),
                (Role::Source, 3) => ctx.rules.source_triangle.clone(),
                (Role::Source, _) => ctx.rules.source_quad.clone(),
            };
            let top = arena.top_transform(element);
            let nodes = rule
                .nodes
                .iter()
                .map(|n| {
                    let mut uv = glam::Vec2::new(n.u as f32, n.v as f32);
                    if let Some(xf) = &top {
                        uv = xf.transform_point(uv);
                    }
                    patch.uniform_point(uv.x, uv.y)
                })
                .collect();
            (rule, nodes)
        }
    }

    /// Computes `link.k`, `link.delta_k` and `link.visibility` for the
    /// pair of elements referenced by the link. `candidates` is the
    /// reduced occluder list for the pair, `None` when full visibility is
    /// already proven.
    pub fn area_to_area_form_factor(
        &mut self,
        arena: &ElementArena,
        scene: &Scene,
        oracle: &dyn RayOracle,
        candidates: Option<&CandidateList>,
        link: &mut Interaction,
        ctx: &GalerkinContext,
    ) {
        let rcv = link.receiver;
        let src = link.source;
        let rcv_is_cluster = arena.get(rcv).is_cluster();
        let src_is_cluster = arena.get(src).is_cluster();

        if rcv_is_cluster || src_is_cluster {
            // No interactions between overlapping volumes.
            let rcv_bounds = arena.bounds(scene, rcv);
            let src_bounds = arena.bounds(scene, src);
            if !rcv_bounds.disjoint(&src_bounds) {
                link.clear_k();
                link.delta_k = vec![1.0];
                link.error_coefficients = 1;
                link.visibility = 128;
                link.exact_visibility_proven = false;
                return;
            }
        } else if rcv == src {
            // No self transport between a surface element and itself.
            link.clear_k();
            link.delta_k = vec![0.0];
            link.error_coefficients = 1;
            link.visibility = 0;
            link.exact_visibility_proven = true;
            return;
        }

        // Re-use the cubature rule and sample positions when an element
        // repeats from the previous call.
        if self.last_receiver != Some(rcv) {
            let (rule, nodes) = self.determine_nodes(arena, scene, ctx, rcv, Role::Receiver);
            self.rcv_rule = rule;
            self.rcv_nodes = nodes;
        }
        if self.last_source != Some(src) {
            let (rule, nodes) = self.determine_nodes(arena, scene, ctx, src, Role::Source);
            self.src_rule = rule;
            self.src_nodes = nodes;
        }
        self.last_receiver = Some(rcv);
        self.last_source = Some(src);

        // Mask the endpoint patches (and cluster geometries) against
        // self-intersection during the visibility tests.
        let mut dont_intersect = Vec::with_capacity(4);
        if let Some(p) = arena.get(rcv).patch_id() {
            dont_intersect.push(p);
        }
        if let Some(p) = arena.get(src).patch_id() {
            dont_intersect.push(p);
        }
        let mut excluded_geometry = Vec::with_capacity(2);
        if let Some(g) = arena.get(rcv).geometry_id() {
            excluded_geometry.push(g);
        }
        if let Some(g) = arena.get(src).geometry_id() {
            excluded_geometry.push(g);
        }

        let mut shadow_cache = ShadowCache::new();
        let nr = self.rcv_nodes.len();
        let ns = self.src_nodes.len();
        let mut gxy = Array2::<f64>::zeros((nr, ns));
        let mut max_kernel = 0.0f64;
        let mut visibility_count = 0usize;
        for k in 0..nr {
            for l in 0..ns {
                let g = self.kernel(
                    arena,
                    scene,
                    oracle,
                    candidates,
                    &mut shadow_cache,
                    &dont_intersect,
                    &excluded_geometry,
                    self.rcv_nodes[k],
                    self.src_nodes[l],
                    rcv,
                    src,
                    ctx,
                );
                gxy[(k, l)] = g;
                if g > max_kernel {
                    max_kernel = g;
                }
                if g.abs() > EPSILON {
                    visibility_count += 1;
                }
            }
        }

        if visibility_count != 0 {
            if link.nrcv == 1 && link.nsrc == 1 {
                self.constant_form_factor(arena, link, &gxy);
            } else {
                self.higher_order_form_factor(arena, scene, ctx, link, &gxy);
            }
        } else {
            link.clear_k();
            link.delta_k = vec![0.0];
            link.error_coefficients = 1;
        }

        // With isotropic clustering the directional variation term is
        // unavailable; bound the error by the maximum kernel value.
        if ctx.config.clustering_strategy == ClusteringStrategy::Isotropic
            && (rcv_is_cluster || src_is_cluster)
        {
            link.delta_k = vec![(max_kernel * arena.get(src).area as f64) as f32];
            link.error_coefficients = 1;
        }

        // Fraction of sample rays that passed all occluders.
        link.visibility = ((255.0 * visibility_count as f64) / (nr * ns) as f64) as u8;
        link.exact_visibility_proven = candidates.map_or(true, |c| c.is_empty());
        if ctx.config.exact_visibility
            && candidates.map_or(false, |c| !c.is_empty())
            && link.visibility == 255
        {
            // All shadow rays passed, but an occluder may still hide
            // between the samples.
            link.visibility = 254;
            link.exact_visibility_proven = false;
        }
    }

    /// The point-to-point radiosity kernel `cosθx·cosθy / (π·d²) · vis`,
    /// without the receiver reflectance.
    #[allow(clippy::too_many_arguments)]
    fn kernel(
        &self,
        arena: &ElementArena,
        scene: &Scene,
        oracle: &dyn RayOracle,
        candidates: Option<&CandidateList>,
        shadow_cache: &mut ShadowCache,
        dont_intersect: &[PatchId],
        excluded_geometry: &[GeometryId],
        x: Vec3,
        y: Vec3,
        rcv: ElementId,
        src: ElementId,
        ctx: &GalerkinContext,
    ) -> f64 {
        // Trace from source to receiver so one-sided surfaces are handled
        // correctly.
        let diff = x - y;
        let distance = diff.length() as f64;
        if distance < EPSILON {
            warn!(
                "cubature nodes too close together (receiver {:?}, source {:?})",
                rcv, src
            );
            return 0.0;
        }
        let dir = diff / distance as f32;
        let ray = Ray { origin: y, dir };

        // Emitter cosine; 0.25 is Sillion's constant for volumes.
        let cos_y = if arena.get(src).is_cluster() {
            0.25
        } else {
            let n = scene.patch(arena.get(src).patch_id().unwrap()).normal;
            let c = dir.dot(n) as f64;
            if c <= 0.0 {
                return 0.0;
            }
            c
        };

        // Receiver cosine.
        let cos_x = if arena.get(rcv).is_cluster() {
            0.25
        } else {
            let n = scene.patch(arena.get(rcv).patch_id().unwrap()).normal;
            let c = -(dir.dot(n) as f64);
            if c <= 0.0 {
                return 0.0;
            }
            c
        };

        let unoccluded = cos_x * cos_y / (std::f64::consts::PI * distance * distance);
        let shortened = (distance * (1.0 - EPSILON)) as f32;

        let visibility = match candidates {
            None => 1.0,
            Some(c) if c.is_empty() => 1.0,
            Some(c) => {
                if !ctx.config.multi_resolution_visibility {
                    if self.shadow_test(
                        scene,
                        oracle,
                        c,
                        shadow_cache,
                        &ray,
                        shortened,
                        dont_intersect,
                    ) {
                        0.0
                    } else {
                        1.0
                    }
                } else if shadow_cache.hit(scene, &ray, shortened) {
                    0.0
                } else {
                    let min_feature_size = 2.0
                        * (ctx.statistics.total_area as f64
                            * ctx.config.rel_min_elem_area as f64
                            / std::f64::consts::PI)
                            .sqrt() as f32;
                    multi_resolution_visibility(
                        arena,
                        scene,
                        shadow_cache,
                        excluded_geometry,
                        &c.occluders,
                        &ray,
                        shortened,
                        arena.get(src).blocker_size,
                        min_feature_size,
                        dont_intersect,
                    )
                }
            }
        };

        unoccluded * visibility
    }

    /// Whether an occluder blocks the ray within `max_distance`.
    fn shadow_test(
        &self,
        scene: &Scene,
        oracle: &dyn RayOracle,
        candidates: &CandidateList,
        shadow_cache: &mut ShadowCache,
        ray: &Ray,
        max_distance: f32,
        dont_intersect: &[PatchId],
    ) -> bool {
        if shadow_cache.hit(scene, ray, max_distance) {
            return true;
        }
        let t_min = EPSILON as f32 * max_distance;
        let hit = if candidates.whole_scene {
            oracle.intersect(ray, t_min, max_distance, RayFlags::FRONT_ANY, dont_intersect)
        } else {
            intersect_occluders(
                scene,
                &candidates.occluders,
                ray,
                t_min,
                max_distance,
                dont_intersect,
            )
        };
        match hit {
            Some(h) => {
                shadow_cache.add(h.patch);
                true
            }
            None => false,
        }
    }

    /// Constant/constant form factor with the min/max error estimate.
    fn constant_form_factor(
        &self,
        arena: &ElementArena,
        link: &mut Interaction,
        gxy: &Array2<f64>,
    ) {
        let src_area = arena.get(link.source).area as f64;
        let rcv_area = arena.get(link.receiver).area as f64;
        let mut g = 0.0f64;
        let mut g_min = f64::INFINITY;
        let mut g_max = f64::NEG_INFINITY;
        for (k, node) in self.rcv_rule.nodes.iter().enumerate() {
            let mut gx = 0.0;
            for (l, src_node) in self.src_rule.nodes.iter().enumerate() {
                gx += src_node.w * gxy[(k, l)];
            }
            gx *= src_area;
            g += node.w * gx;
            g_min = g_min.min(gx);
            g_max = g_max.max(gx);
        }
        link.k[0] = (rcv_area * g) as f32;
        link.delta_k = vec![(g - g_min).max(g_max - g) as f32];
        link.error_coefficients = 1;
    }

    /// Higher-order form factors after Bekaert & Willems.
    fn higher_order_form_factor(
        &self,
        arena: &ElementArena,
        scene: &Scene,
        ctx: &GalerkinContext,
        link: &mut Interaction,
        gxy: &Array2<f64>,
    ) {
        let receiver = arena.get(link.receiver);
        let source = arena.get(link.source);
        let rcv_area = receiver.area as f64;
        let src_area = source.area as f64;
        let shooting = !ctx.config.iteration_method.is_gathering();
        let src_rad: &[ColorRgb] = if shooting {
            &source.un_shot_radiance
        } else {
            &source.radiance
        };

        let nr = self.rcv_rule.nodes.len();
        let ns = self.src_rule.nodes.len();

        // Basis function values at the receiver sample positions; clusters
        // use the constant approximation.
        let mut rcv_phi = vec![vec![1.0f64; nr]; link.nrcv];
        if let Some(p) = receiver.patch_id() {
            let basis = basis_for_vertices(scene.patch(p).num_vertices());
            for alpha in 0..link.nrcv {
                for (k, node) in self.rcv_rule.nodes.iter().enumerate() {
                    rcv_phi[alpha][k] = (basis.functions[alpha])(node.u, node.v);
                }
            }
        }

        let src_basis = source
            .patch_id()
            .map(|p| basis_for_vertices(scene.patch(p).num_vertices()));

        let mut delta_radiance = vec![BLACK; nr];
        let mut g_min = f64::INFINITY;
        let mut g_max = f64::NEG_INFINITY;
        let mut src_phi = vec![1.0f64; ns];

        for beta in 0..link.nsrc {
            if let Some(basis) = src_basis {
                for (l, node) in self.src_rule.nodes.iter().enumerate() {
                    src_phi[l] = (basis.functions[beta])(node.u, node.v);
                }
            }

            // Point-to-patch form factors for basis function β.
            let mut g_beta = vec![0.0f64; nr];
            let mut delta_beta = vec![0.0f64; nr];
            for k in 0..nr {
                let mut g = 0.0;
                for (l, node) in self.src_rule.nodes.iter().enumerate() {
                    g += node.w * gxy[(k, l)] * src_phi[l];
                }
                g *= src_area;
                g_beta[k] = g;
                delta_beta[k] = -g;
            }

            for alpha in 0..link.nrcv {
                let mut g_alpha_beta = 0.0;
                for (k, node) in self.rcv_rule.nodes.iter().enumerate() {
                    g_alpha_beta += node.w * rcv_phi[alpha][k] * g_beta[k];
                }
                link.set_k(alpha, beta, (rcv_area * g_alpha_beta) as f32);
                for k in 0..nr {
                    delta_beta[k] += g_alpha_beta * rcv_phi[alpha][k];
                }
            }

            let rad_beta = src_rad.get(beta).copied().unwrap_or(BLACK);
            for k in 0..nr {
                delta_radiance[k] = delta_radiance[k].add_scaled(delta_beta[k] as f32, rad_beta);
            }

            if beta == 0 {
                for &g in &g_beta {
                    g_min = g_min.min(g);
                    g_max = g_max.max(g);
                }
            }
        }

        // Error estimate: residual of the radiance approximation at the
        // receiver nodes, relative to the constant source radiance; when
        // the source is black, fall back to the constant-kernel spread.
        let mut delta = 0.0f32;
        if src_rad.first().map_or(true, |c| c.is_black()) {
            let g_av = link.k[0] as f64 / rcv_area;
            delta = ((g_max - g_av).max(g_av - g_min)) as f32;
        } else {
            let src0 = src_rad[0];
            for dr in &delta_radiance {
                let rel = dr.safe_divide(src0);
                delta = delta.max(rel.max_component().abs());
            }
        }
        link.delta_k = vec![delta];
        link.error_coefficients = 1;
    }
}

/// Walks a candidate occluder list for a blocking patch, with bounding-box
/// early outs on geometry nodes.
fn intersect_occluders(
    scene: &Scene,
    occluders: &[Occluder],
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    dont_intersect: &[PatchId],
) -> Option<crate::scene::RayHit> {
    for occluder in occluders {
        let hit = match occluder {
            Occluder::Geometry(g) => {
                intersect_geometry(scene, *g, ray, t_min, t_max, dont_intersect)
            }
            Occluder::PatchSet(patches) => {
                intersect_patches(scene, patches, ray, t_min, t_max, dont_intersect)
            }
        };
        if hit.is_some() {
            return hit;
        }
    }
    None
}

fn intersect_geometry(
    scene: &Scene,
    id: GeometryId,
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    dont_intersect: &[PatchId],
) -> Option<crate::scene::RayHit> {
    let g = scene.geometries.get(id);
    g.bounds.clip_segment(ray.origin, ray.dir, t_min, t_max)?;
    match &g.kind {
        GeometryKind::Compound(children) => {
            for &c in children {
                let hit = intersect_geometry(scene, c, ray, t_min, t_max, dont_intersect);
                if hit.is_some() {
                    return hit;
                }
            }
            None
        }
        GeometryKind::PatchSet(patches) => {
            intersect_patches(scene, patches, ray, t_min, t_max, dont_intersect)
        }
    }
}

fn intersect_patches(
    scene: &Scene,
    patches: &[PatchId],
    ray: &Ray,
    t_min: f32,
    t_max: f32,
    dont_intersect: &[PatchId],
) -> Option<crate::scene::RayHit> {
    for &p in patches {
        if dont_intersect.contains(&p) {
            continue;
        }
        let hit = scene
            .patch(p)
            .intersect(ray, t_min, t_max, RayFlags::FRONT_ANY);
        if hit.is_some() {
            return hit;
        }
    }
    None
}

/// Multi-resolution visibility along a ray: occluder subtrees whose
/// equivalent blocker casts features smaller than `min_feature_size` are
/// treated as an isotropic participating medium with extinction
/// `κ = area / (4·volume)`; larger subtrees are opened, and primitives are
/// ray-cast exactly.
#[allow(clippy::too_many_arguments)]
fn multi_resolution_visibility(
    arena: &ElementArena,
    scene: &Scene,
    shadow_cache: &mut ShadowCache,
    excluded_geometry: &[GeometryId],
    occluders: &[Occluder],
    ray: &Ray,
    rcv_dist: f32,
    src_size: f32,
    min_feature_size: f32,
    dont_intersect: &[PatchId],
) -> f64 {
    let mut vis = 1.0f64;
    for occluder in occluders {
        let v = match occluder {
            Occluder::Geometry(g) => geometry_multi_resolution_visibility(
                arena,
                scene,
                shadow_cache,
                excluded_geometry,
                *g,
                ray,
                rcv_dist,
                src_size,
                min_feature_size,
                dont_intersect,
            ),
            Occluder::PatchSet(patches) => {
                match intersect_patches(
                    scene,
                    patches,
                    ray,
                    rcv_dist * EPSILON as f32,
                    rcv_dist,
                    dont_intersect,
                ) {
                    Some(hit) => {
                        shadow_cache.add(hit.patch);
                        0.0
                    }
                    None => 1.0,
                }
            }
        };
        if v < EPSILON {
            return 0.0;
        }
        vis *= v;
    }
    vis
}

#[allow(clippy::too_many_arguments)]
fn geometry_multi_resolution_visibility(
    arena: &ElementArena,
    scene: &Scene,
    shadow_cache: &mut ShadowCache,
    excluded_geometry: &[GeometryId],
    geometry: GeometryId,
    ray: &Ray,
    rcv_dist: f32,
    src_size: f32,
    min_feature_size: f32,
    dont_intersect: &[PatchId],
) -> f64 {
    if excluded_geometry.contains(&geometry) {
        return 1.0;
    }
    let g = scene.geometries.get(geometry);
    let cluster = arena.geometry_element(geometry);

    let mut t_min = rcv_dist * EPSILON as f32;
    let mut t_max = rcv_dist;
    let mut feature_size = f32::INFINITY;
    if !g.bounds.contains(ray.at(t_min)) {
        match g.bounds.clip_segment(ray.origin, ray.dir, t_min, t_max) {
            None => return 1.0,
            Some((t0, t1)) => {
                t_min = t0;
                t_max = t1;
            }
        }
        if let Some(cluster) = cluster {
            // Centre the equivalent blocker halfway through the box.
            let t_mid = 0.5 * (t_min + t_max);
            let blocker = arena.get(cluster).blocker_size;
            feature_size = src_size + rcv_dist / t_mid * (blocker - src_size);
        }
    }

    if feature_size < min_feature_size {
        // Too fine to matter individually: attenuate like an isotropic
        // participating medium filling the bounding box.
        let e = g.bounds.extent();
        let volume = (e.x as f64 + EPSILON) * (e.y as f64 + EPSILON) * (e.z as f64 + EPSILON);
        let kappa = match cluster {
            Some(c) => arena.get(c).area as f64 / (4.0 * volume),
            None => 0.0,
        };
        return (-kappa * (t_max - t_min) as f64).exp();
    }

    match &g.kind {
        GeometryKind::Compound(children) => {
            let child_occluders: Vec<Occluder> =
                children.iter().map(|&c| Occluder::Geometry(c)).collect();
            multi_resolution_visibility(
                arena,
                scene,
                shadow_cache,
                excluded_geometry,
                &child_occluders,
                ray,
                rcv_dist,
                src_size,
                min_feature_size,
                dont_intersect,
            )
        }
        GeometryKind::PatchSet(patches) => {
            match intersect_patches(
                scene,
                patches,
                ray,
                rcv_dist * EPSILON as f32,
                rcv_dist,
                dont_intersect,
            ) {
                Some(hit) => {
                    shadow_cache.add(hit.patch);
                    0.0
                }
                None => 1.0,
            }
        }
    }
}
