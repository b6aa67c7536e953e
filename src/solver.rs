// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! The solver driver: Jacobi / Gauss-Seidel gathering and Southwell
//! shooting over the hierarchical interaction graph.
//!
//! One [`GalerkinSolver`] owns the element arena and all mutable solver
//! state; the scene and the ray oracle stay outside, read-only. Each call
//! to [`GalerkinSolver::do_step`] runs one complete iteration: linking,
//! oracle-driven refinement with light transport, and the push-pull pass
//! that commits received radiance into the hierarchy.

use std::time::Instant;

use log::{debug, info};

use crate::color::{ColorRgb, BLACK};
use crate::config::{ClusteringStrategy, GalerkinConfig, IterationMethod};
use crate::cubature::CubatureRule;
use crate::element::{push_pull_potential, push_pull_radiance, ElementArena, ElementId};
use crate::error::HelionError;
use crate::formfactor::FormFactorEvaluator;
use crate::interaction::LinkCounts;
use crate::linking::{self, Role};
use crate::refine::{refine_interactions, RefineEnv};
use crate::scene::{PatchId, RayOracle, Scene, Statistics};
use crate::scratch::ScratchContext;

/// The cubature rules selected by the configured degrees, one per role
/// and shape. The receiver rules are of higher degree than the source
/// rules so the outer integral dominates the error.
pub(crate) struct CubatureRules {
    pub receiver_triangle: CubatureRule,
    pub receiver_quad: CubatureRule,
    pub source_triangle: CubatureRule,
    pub source_quad: CubatureRule,
    pub cluster: CubatureRule,
}

impl CubatureRules {
    pub(crate) fn new(config: &GalerkinConfig) -> Self {
        Self {
            receiver_triangle: CubatureRule::standard_triangle(config.receiver_degree),
            receiver_quad: CubatureRule::unit_square(config.receiver_degree),
            source_triangle: CubatureRule::standard_triangle(config.source_degree),
            source_quad: CubatureRule::unit_square(config.source_degree),
            cluster: CubatureRule::unit_cube(config.cluster_degree),
        }
    }
}

/// All solver state that is threaded explicitly through the refinement
/// and clustering code. There is no process-wide state anywhere.
pub(crate) struct GalerkinContext {
    pub config: GalerkinConfig,
    pub statistics: Statistics,
    pub rules: CubatureRules,
    pub scratch: Option<ScratchContext>,
    pub iteration_number: u32,
    pub cpu_seconds: f32,
    pub top_cluster: Option<ElementId>,
    /// Estimate of the radiance not yet accounted for, for display.
    pub ambient_radiance: ColorRgb,
    /// The constant-radiosity-step base radiance.
    pub constant_radiance: ColorRgb,
}

/// What one iteration produced.
#[derive(Clone, Copy, Debug)]
pub struct IterationStats {
    pub iteration_number: u32,
    /// Accumulated solver CPU time over all iterations so far.
    pub cpu_seconds: f32,
    /// Shooting only: no patch with un-shot power was left.
    pub converged: bool,
    pub num_elements: usize,
    pub num_clusters: usize,
    pub links: LinkCounts,
}

/// A hierarchical Galerkin radiosity solver over a static scene.
pub struct GalerkinSolver<'a> {
    scene: &'a Scene,
    oracle: &'a dyn RayOracle,
    arena: ElementArena,
    ctx: GalerkinContext,
}

impl<'a> GalerkinSolver<'a> {
    /// Validates the configuration, derives the scene statistics and sets
    /// up the element hierarchy (top-level surface elements plus the
    /// cluster hierarchy over the pre-built octree).
    pub fn new(
        scene: &'a Scene,
        oracle: &'a dyn RayOracle,
        config: GalerkinConfig,
    ) -> Result<Self, HelionError> {
        config.validate()?;
        if scene.patches.is_empty() {
            return Err(HelionError::EmptyScene);
        }
        let statistics = Statistics::compute(scene);
        debug!(
            "scene statistics: total area {}, max self-emitted radiance {}",
            statistics.total_area, statistics.max_self_emitted_radiance
        );

        let rules = CubatureRules::new(&config);
        let scratch = (config.clustering_strategy == ClusteringStrategy::ZVisibility)
            .then(|| ScratchContext::new(config.scratch_frame_buffer_size));

        let constant_radiance = if config.use_constant_radiance {
            statistics.estimated_average_radiance
        } else {
            BLACK
        };
        let ambient_radiance = if config.use_constant_radiance {
            BLACK
        } else {
            statistics.estimated_average_radiance
        };

        let mut ctx = GalerkinContext {
            config,
            statistics,
            rules,
            scratch,
            iteration_number: 0,
            cpu_seconds: 0.0,
            top_cluster: None,
            ambient_radiance,
            constant_radiance,
        };

        let mut arena = ElementArena::default();
        for i in 0..scene.patches.len() {
            let id = arena.create_toplevel(scene, PatchId(i as u32), ctx.config.basis_type);
            patch_init(&mut arena, scene, &ctx, id);
        }
        ctx.top_cluster = Some(arena.create_cluster_hierarchy(scene, scene.clustered_root));

        Ok(Self {
            scene,
            oracle,
            arena,
            ctx,
        })
    }

    pub fn arena(&self) -> &ElementArena {
        &self.arena
    }

    pub fn iteration_number(&self) -> u32 {
        self.ctx.iteration_number
    }

    /// Largest un-shot radiance component anywhere in the hierarchy; the
    /// natural convergence measure for Southwell shooting.
    pub fn max_un_shot_radiance(&self) -> f32 {
        self.arena
            .iter()
            .filter(|e| !e.is_cluster())
            .map(|e| e.un_shot_radiance[0].abs().max_component())
            .fold(0.0, f32::max)
    }

    /// Queries the radiance leaving the patch at uniform coordinates
    /// (u,v). The direction argument of the full radiance query is
    /// omitted: only Lambertian diffuse radiance is represented.
    pub fn radiance_at(&self, patch: PatchId, u: f32, v: f32) -> ColorRgb {
        let Some(top) = self.arena.patch_element(patch) else {
            return BLACK;
        };
        let (leaf, lu, lv) = self.arena.regular_leaf_at_point(self.scene, top, u, v);
        let mut rad = self.arena.radiance_at(self.scene, leaf, lu, lv);
        if self.ctx.config.use_ambient_radiance {
            rad += self
                .scene
                .patch(patch)
                .reflectance
                .scalar_product(self.ctx.ambient_radiance);
        }
        rad
    }

    /// Runs one complete iteration and reports what it did.
    pub fn do_step(&mut self) -> IterationStats {
        let started = Instant::now();
        self.ctx.iteration_number += 1;
        info!("galerkin iteration {}", self.ctx.iteration_number);

        let converged = match self.ctx.config.iteration_method {
            IterationMethod::Jacobi | IterationMethod::GaussSeidel => {
                if self.ctx.config.clustered {
                    self.gathering_iteration_clustered()
                } else {
                    self.gathering_iteration_simple()
                }
            }
            IterationMethod::Southwell => self.shooting_step(),
        };

        self.ctx.cpu_seconds += started.elapsed().as_secs_f32();
        let (num_elements, num_clusters, links) = self.arena.census();
        debug!(
            "iteration {}: {} elements ({} clusters), {} links",
            self.ctx.iteration_number,
            num_elements,
            num_clusters,
            links.total()
        );
        IterationStats {
            iteration_number: self.ctx.iteration_number,
            cpu_seconds: self.ctx.cpu_seconds,
            converged,
            num_elements,
            num_clusters,
            links,
        }
    }

    fn env<'b>(
        arena: &'b mut ElementArena,
        scene: &'b Scene,
        oracle: &'b dyn RayOracle,
        ctx: &'b mut GalerkinContext,
        evaluator: &'b mut FormFactorEvaluator,
    ) -> RefineEnv<'b> {
        RefineEnv {
            arena,
            scene,
            oracle,
            ctx,
            evaluator,
        }
    }

    /// Propagates the caller-supplied per-patch direct potential into the
    /// element hierarchy; run on the first iteration when importance
    /// drives refinement.
    fn update_direct_potential(&mut self) {
        let shooting = !self.ctx.config.iteration_method.is_gathering();
        for patch in &self.scene.patches {
            let top = self
                .arena
                .patch_element(patch.id)
                .expect("all patches have elements");
            let increment = patch.direct_potential - self.arena.get(top).direct_potential;
            if increment != 0.0 {
                add_direct_potential(&mut self.arena, top, increment, shooting);
            }
        }
        if let Some(top_cluster) = self.ctx.top_cluster {
            update_cluster_potential(&mut self.arena, top_cluster, shooting);
        }
    }

    /// One gathering sweep without clustering: per-patch initial links,
    /// refinement, then the radiance update per the iteration method.
    fn gathering_iteration_simple(&mut self) -> bool {
        let gauss_seidel = self.ctx.config.iteration_method == IterationMethod::GaussSeidel;
        if self.ctx.config.importance_driven && self.ctx.iteration_number <= 1 {
            self.update_direct_potential();
        }

        let mut evaluator = FormFactorEvaluator::new();

        // Lazy linking: a patch is linked as a source once it has radiance
        // to distribute (first iterations then only touch the lights).
        if self.ctx.config.lazy_linking {
            for i in 0..self.scene.patches.len() {
                let top = self.arena.patch_element(PatchId(i as u32)).expect("all patches have elements");
                let e = self.arena.get(top);
                if !e.radiance[0].is_black() && !e.interactions_created {
                    let mut env = Self::env(
                        &mut self.arena,
                        self.scene,
                        self.oracle,
                        &mut self.ctx,
                        &mut evaluator,
                    );
                    linking::create_initial_links(&mut env, top, Role::Source);
                    self.arena.get_mut(top).interactions_created = true;
                }
            }
        }

        self.ctx.ambient_radiance = BLACK;

        for i in 0..self.scene.patches.len() {
            let top = self.arena.patch_element(PatchId(i as u32)).expect("all patches have elements");

            // Patches without importance receive nothing worth refining.
            if self.ctx.config.importance_driven
                && self.arena.get(top).potential
                    < self.ctx.statistics.max_direct_potential * crate::constants::EPSILON_F32
            {
                continue;
            }

            if (gauss_seidel || !self.ctx.config.lazy_linking || self.ctx.config.importance_driven)
                && !self.arena.get(top).interactions_created
            {
                let mut env = Self::env(
                    &mut self.arena,
                    self.scene,
                    self.oracle,
                    &mut self.ctx,
                    &mut evaluator,
                );
                linking::create_initial_links(&mut env, top, Role::Receiver);
                self.arena.get_mut(top).interactions_created = true;
            }

            let mut env = Self::env(
                &mut self.arena,
                self.scene,
                self.oracle,
                &mut self.ctx,
                &mut evaluator,
            );
            refine_interactions(&mut env, top);

            if gauss_seidel {
                // The new radiance takes part in the remaining gathers of
                // this same iteration.
                push_pull_radiance(&mut self.arena, self.scene, top, true);
            }
        }

        if !gauss_seidel {
            for i in 0..self.scene.patches.len() {
                let top = self.arena.patch_element(PatchId(i as u32)).expect("all patches have elements");
                push_pull_radiance(&mut self.arena, self.scene, top, true);
            }
        }

        if self.ctx.config.importance_driven {
            for i in 0..self.scene.patches.len() {
                let top = self.arena.patch_element(PatchId(i as u32)).expect("all patches have elements");
                push_pull_potential(&mut self.arena, top, 0.0, false);
            }
        }

        false
    }

    /// One clustered gathering sweep: the seed self-link on the root
    /// cluster, refinement of the whole graph, one global push-pull.
    fn gathering_iteration_clustered(&mut self) -> bool {
        if self.ctx.config.importance_driven && self.ctx.iteration_number <= 1 {
            self.update_direct_potential();
        }
        let top_cluster = self.ctx.top_cluster.expect("clustered iteration");

        let mut evaluator = FormFactorEvaluator::new();
        // Initial linking collapses to a single self-link on the root
        // cluster, created exactly once.
        if !self.arena.get(top_cluster).interactions_created {
            let mut env = Self::env(
                &mut self.arena,
                self.scene,
                self.oracle,
                &mut self.ctx,
                &mut evaluator,
            );
            linking::create_initial_link_with_top_cluster(&mut env, top_cluster, Role::Receiver);
            self.arena.get_mut(top_cluster).interactions_created = true;
        }

        let mut env = Self::env(
            &mut self.arena,
            self.scene,
            self.oracle,
            &mut self.ctx,
            &mut evaluator,
        );
        refine_interactions(&mut env, top_cluster);

        push_pull_radiance(&mut self.arena, self.scene, top_cluster, true);
        if self.ctx.config.importance_driven {
            push_pull_potential(&mut self.arena, top_cluster, 0.0, false);
        }

        self.ctx.ambient_radiance = BLACK;
        false
    }

    /// One Southwell step: propagate the un-shot power of the strongest
    /// patch. Returns true when nothing is left to shoot.
    fn shooting_step(&mut self) -> bool {
        if self.ctx.config.importance_driven {
            if self.ctx.iteration_number <= 1 {
                self.update_direct_potential();
            }
            if let Some(patch) = self.choose_potential_shooting_patch() {
                self.propagate_from(patch);
            }
        }

        match self.choose_radiance_shooting_patch() {
            Some(patch) => {
                self.propagate_from(patch);
                false
            }
            None => true,
        }
    }

    /// The patch with the highest un-shot power, weighted with indirect
    /// importance when importance-driven (Bekaert & Willems, EGRW '95).
    fn choose_radiance_shooting_patch(&self) -> Option<PatchId> {
        let mut best = None;
        let mut best_importance = None;
        let mut max_power = 0.0f32;
        let mut max_power_importance = 0.0f32;
        for patch in &self.scene.patches {
            let top = self.arena.patch_element(patch.id)?;
            let e = self.arena.get(top);
            let power = std::f32::consts::PI * patch.area * e.un_shot_radiance[0].sum_abs();
            if power > max_power {
                best = Some(patch.id);
                max_power = power;
            }
            if self.ctx.config.importance_driven {
                let power_importance = (e.potential - e.direct_potential) * power;
                if power_importance > max_power_importance {
                    best_importance = Some(patch.id);
                    max_power_importance = power_importance;
                }
            }
        }
        if self.ctx.config.importance_driven && best_importance.is_some() {
            return best_importance;
        }
        best
    }

    /// The patch with the highest un-shot importance (potential × area).
    fn choose_potential_shooting_patch(&self) -> Option<PatchId> {
        let mut best = None;
        let mut max_importance = 0.0f32;
        for patch in &self.scene.patches {
            let top = self.arena.patch_element(patch.id)?;
            let importance = patch.area * self.arena.get(top).un_shot_potential.abs();
            if importance > max_importance {
                best = Some(patch.id);
                max_importance = importance;
            }
        }
        best
    }

    /// Creates links for the shooting patch if needed, refines them (which
    /// transports its un-shot radiance into the scene), clears its un-shot
    /// quantities and re-establishes hierarchy consistency.
    fn propagate_from(&mut self, patch: PatchId) {
        let top = self.arena.patch_element(patch).expect("patch element");
        let mut evaluator = FormFactorEvaluator::new();

        if !self.arena.get(top).interactions_created {
            let mut env = Self::env(
                &mut self.arena,
                self.scene,
                self.oracle,
                &mut self.ctx,
                &mut evaluator,
            );
            if env.ctx.config.clustered {
                linking::create_initial_link_with_top_cluster(&mut env, top, Role::Source);
            } else {
                linking::create_initial_links(&mut env, top, Role::Source);
            }
            self.arena.get_mut(top).interactions_created = true;
        }

        {
            let mut env = Self::env(
                &mut self.arena,
                self.scene,
                self.oracle,
                &mut self.ctx,
                &mut evaluator,
            );
            refine_interactions(&mut env, top);
        }

        clear_un_shot(&mut self.arena, top);

        if self.ctx.config.clustered {
            let top_cluster = self.ctx.top_cluster.expect("clustered shooting");
            if self.ctx.config.importance_driven {
                push_pull_potential(&mut self.arena, top_cluster, 0.0, true);
            }
            push_pull_radiance(&mut self.arena, self.scene, top_cluster, false);
            self.ctx.ambient_radiance = self.arena.get(top_cluster).un_shot_radiance[0];
        } else {
            let mut ambient = BLACK;
            for i in 0..self.scene.patches.len() {
                let id = PatchId(i as u32);
                let e = self.arena.patch_element(id).expect("all patches have elements");
                if self.ctx.config.importance_driven {
                    push_pull_potential(&mut self.arena, e, 0.0, true);
                }
                push_pull_radiance(&mut self.arena, self.scene, e, false);
                ambient = ambient.add_scaled(
                    self.scene.patch(id).area,
                    self.arena.get(e).un_shot_radiance[0],
                );
            }
            self.ctx.ambient_radiance = ambient * (1.0 / self.ctx.statistics.total_area);
        }
    }
}

/// Seeds the radiance representation of a fresh top-level element from
/// its patch: self-emittance, or the constant-radiosity step when that is
/// configured (Neumann et al., EGRW '95).
fn patch_init(arena: &mut ElementArena, scene: &Scene, ctx: &GalerkinContext, element: ElementId) {
    let patch = scene.patch(arena.get(element).patch_id().expect("top-level element"));
    let shooting = ctx.config.iteration_method == IterationMethod::Southwell;

    let radiance = if ctx.config.use_constant_radiance {
        patch.reflectance.scalar_product(ctx.constant_radiance) + patch.emittance
    } else {
        patch.emittance
    };
    let e = arena.get_mut(element);
    e.radiance[0] = radiance;
    if shooting {
        e.un_shot_radiance[0] = if ctx.config.use_constant_radiance {
            radiance - ctx.constant_radiance
        } else {
            radiance
        };
    }
    if ctx.config.importance_driven {
        e.potential = patch.direct_potential;
        e.direct_potential = patch.direct_potential;
        if shooting {
            e.un_shot_potential = patch.direct_potential;
        }
    }
}

/// Adds a direct-potential increment throughout a surface element's
/// quadtree.
fn add_direct_potential(arena: &mut ElementArena, element: ElementId, increment: f32, shooting: bool) {
    if let Some(children) = arena.get(element).regular_children {
        for child in children {
            add_direct_potential(arena, child, increment, shooting);
        }
    }
    let e = arena.get_mut(element);
    e.direct_potential += increment;
    e.potential += increment;
    if shooting {
        e.un_shot_potential += increment;
    }
}

/// Recomputes cluster potentials bottom-up as area-weighted means of
/// their children.
fn update_cluster_potential(arena: &mut ElementArena, cluster: ElementId, shooting: bool) -> (f32, f32) {
    if !arena.get(cluster).is_cluster() {
        let e = arena.get(cluster);
        return (e.potential, e.un_shot_potential);
    }
    let children = arena.get(cluster).irregular_children.clone();
    let mut potential = 0.0;
    let mut un_shot = 0.0;
    for child in children {
        let (p, u) = update_cluster_potential(arena, child, shooting);
        let area = arena.get(child).area;
        potential += area * p;
        un_shot += area * u;
    }
    let area = arena.get(cluster).area;
    let e = arena.get_mut(cluster);
    e.potential = potential / area;
    if shooting {
        e.un_shot_potential = un_shot / area;
    }
    (e.potential, e.un_shot_potential)
}

/// Clears the un-shot radiance and potential at all levels of a subtree,
/// after its contributions have been propagated.
fn clear_un_shot(arena: &mut ElementArena, element: ElementId) {
    if let Some(children) = arena.get(element).regular_children {
        for child in children {
            clear_un_shot(arena, child);
        }
    }
    for child in arena.get(element).irregular_children.clone() {
        clear_un_shot(arena, child);
    }
    let e = arena.get_mut(element);
    for c in e.un_shot_radiance.iter_mut() {
        *c = BLACK;
    }
    e.un_shot_potential = 0.0;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasisType;
    use crate::scene::{Patch, PatchListOracle};
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    fn floor_quad(reflectance: f32, emittance: f32) -> Patch {
        Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(reflectance),
            ColorRgb::monochrome(emittance),
        )
    }

    fn ceiling_quad(reflectance: f32, emittance: f32) -> Patch {
        Patch::new(
            &[
                Vec3::new(0.0, 0.0, 1.0),
                Vec3::new(0.0, 1.0, 1.0),
                Vec3::new(1.0, 1.0, 1.0),
                Vec3::new(1.0, 0.0, 1.0),
            ],
            ColorRgb::monochrome(reflectance),
            ColorRgb::monochrome(emittance),
        )
    }

    fn config(method: IterationMethod, clustered: bool) -> GalerkinConfig {
        GalerkinConfig {
            iteration_method: method,
            clustered,
            basis_type: BasisType::Constant,
            ..GalerkinConfig::default()
        }
    }

    #[test]
    fn zero_emittance_scene_stays_black() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 0.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut solver =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, false)).unwrap();
        solver.do_step();
        for e in solver.arena().iter() {
            for c in &e.radiance {
                assert!(c.is_black(), "non-zero radiance without any emitter");
            }
        }
    }

    /// An extra push-pull after a shooting step must not change anything:
    /// all received radiance has been consumed already.
    #[test]
    fn shooting_push_pull_is_idempotent() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 1.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut solver =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Southwell, false))
                .unwrap();
        solver.do_step();

        let before: Vec<ColorRgb> = solver.arena().iter().map(|e| e.radiance[0]).collect();
        for i in 0..scene.patches.len() {
            let top = solver.arena.patch_element(PatchId(i as u32)).unwrap();
            push_pull_radiance(&mut solver.arena, &scene, top, false);
        }
        let after: Vec<ColorRgb> = solver.arena().iter().map(|e| e.radiance[0]).collect();
        for (b, a) in before.iter().zip(after.iter()) {
            assert_abs_diff_eq!(b.r, a.r, epsilon = 1e-6);
            assert_abs_diff_eq!(b.g, a.g, epsilon = 1e-6);
            assert_abs_diff_eq!(b.b, a.b, epsilon = 1e-6);
        }
    }

    /// Area conservation throughout refinement: every parent's area is
    /// the sum of its children's.
    #[test]
    fn refinement_conserves_area() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 5.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut cfg = config(IterationMethod::Jacobi, false);
        cfg.rel_link_error_threshold = 2e-3;
        let mut solver = GalerkinSolver::new(&scene, &oracle, cfg).unwrap();
        for _ in 0..3 {
            solver.do_step();
        }
        assert!(
            solver.arena().iter().any(|e| e.regular_children.is_some()),
            "the threshold must trigger some refinement"
        );
        for e in solver.arena().iter() {
            if let Some(children) = e.regular_children {
                let sum: f32 = children.iter().map(|&c| solver.arena().get(c).area).sum();
                assert!(
                    (sum - e.area).abs() <= 1e-4 * e.area,
                    "area not conserved: {} vs {}",
                    sum,
                    e.area
                );
            }
        }
    }

    /// Subdivision refuses to go below the configured area floor.
    #[test]
    fn subdivision_respects_minimum_area() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 5.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut cfg = config(IterationMethod::Jacobi, false);
        // An aggressive threshold would refine forever without the floor.
        cfg.rel_link_error_threshold = 1e-9;
        cfg.rel_min_elem_area = 0.05;
        let mut solver = GalerkinSolver::new(&scene, &oracle, cfg).unwrap();
        for _ in 0..4 {
            solver.do_step();
        }
        let floor = 0.05 * solver.ctx.statistics.total_area;
        for e in solver.arena().iter() {
            if !e.is_cluster() {
                // Only elements above the floor may have been subdivided.
                assert!(
                    e.area > floor / 4.0 - 1e-6,
                    "element below the subdivision floor: {}",
                    e.area
                );
            }
        }
    }

    /// The clustered and unclustered gathering paths agree on a simple
    /// two-quad scene.
    #[test]
    fn clustered_matches_unclustered() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 1.0)]);
        let oracle = PatchListOracle::new(&scene);

        let mut plain =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, false)).unwrap();
        let mut clustered =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, true)).unwrap();
        for _ in 0..4 {
            plain.do_step();
            clustered.do_step();
        }
        let a = patch_average(&plain, PatchId(0));
        let b = patch_average(&clustered, PatchId(0));
        assert!(a.r > 0.05, "floor should be lit, got {a}");
        assert!(
            (a.r - b.r).abs() <= 0.05 * a.r.max(b.r),
            "clustered {b} vs unclustered {a}"
        );
    }

    /// Southwell reaches the same fixed point as Jacobi.
    #[test]
    fn shooting_matches_gathering() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 1.0)]);
        let oracle = PatchListOracle::new(&scene);

        let mut jacobi =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, false)).unwrap();
        for _ in 0..16 {
            jacobi.do_step();
        }
        let mut southwell =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Southwell, false))
                .unwrap();
        for _ in 0..32 {
            let stats = southwell.do_step();
            if stats.converged || southwell.max_un_shot_radiance() < 1e-6 {
                break;
            }
        }
        let a = patch_average(&jacobi, PatchId(0));
        let b = patch_average(&southwell, PatchId(0));
        assert!(
            (a.r - b.r).abs() <= 0.02 * a.r.max(b.r).max(1e-6),
            "southwell {b} vs jacobi {a}"
        );
    }

    #[test]
    fn gauss_seidel_converges_like_jacobi() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 1.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut gs = GalerkinSolver::new(&scene, &oracle, config(IterationMethod::GaussSeidel, false))
            .unwrap();
        let mut jacobi =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, false)).unwrap();
        for _ in 0..16 {
            gs.do_step();
            jacobi.do_step();
        }
        let a = patch_average(&jacobi, PatchId(1));
        let b = patch_average(&gs, PatchId(1));
        assert!(
            (a.r - b.r).abs() <= 0.02 * a.r.max(b.r).max(1e-6),
            "gauss-seidel {b} vs jacobi {a}"
        );
    }

    #[test]
    fn iteration_stats_are_reported() {
        let scene = Scene::new(vec![floor_quad(0.5, 0.0), ceiling_quad(0.5, 1.0)]);
        let oracle = PatchListOracle::new(&scene);
        let mut solver =
            GalerkinSolver::new(&scene, &oracle, config(IterationMethod::Jacobi, false)).unwrap();
        let stats = solver.do_step();
        assert_eq!(stats.iteration_number, 1);
        assert!(stats.num_elements >= 2);
        assert!(stats.links.total() >= 2);
        assert_eq!(stats.num_clusters, stats.num_elements - count_surfaces(&solver));
        assert!(!stats.converged);
    }

    fn count_surfaces(solver: &GalerkinSolver) -> usize {
        solver.arena().iter().filter(|e| !e.is_cluster()).count()
    }

    /// Area-weighted average radiance of a patch: the top-level constant
    /// coefficient after push-pull.
    fn patch_average(solver: &GalerkinSolver, id: PatchId) -> ColorRgb {
        let arena = solver.arena();
        arena.get(arena.patch_element(id).unwrap()).radiance[0]
    }

    #[test]
    fn empty_scene_is_rejected() {
        let scene = Scene {
            patches: Vec::new(),
            geometries: crate::scene::GeometryArena::default(),
            top_level: Vec::new(),
            clustered_root: crate::scene::GeometryId(0),
        };
        let oracle = PatchListOracle::new(&scene);
        assert!(matches!(
            GalerkinSolver::new(&scene, &oracle, GalerkinConfig::default()),
            Err(HelionError::EmptyScene)
        ));
    }
}
