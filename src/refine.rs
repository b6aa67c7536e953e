// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hierarchical refinement of the interaction graph.
//!
//! The driver walks the element hierarchy bottom-up and asks the oracle,
//! for every link, whether its error estimate is below the configured
//! threshold. Accurate links transport light; inaccurate links are
//! replaced by links with the children of their larger endpoint, with the
//! candidate occluder list re-culled per child. Refined parents are
//! dropped in a deferred pass so lists are never mutated mid-iteration.

use log::trace;

use crate::clustering;
use crate::color::ColorRgb;
use crate::config::{ErrorNorm, IterationMethod, ShaftCullMode};
use crate::element::{ElementArena, ElementId};
use crate::formfactor::FormFactorEvaluator;
use crate::interaction::Interaction;
use crate::scene::{RayOracle, Scene};
use crate::shaft::{CandidateList, Shaft};
use crate::solver::GalerkinContext;

/// Everything the refinement recursion threads through explicitly.
pub(crate) struct RefineEnv<'a> {
    pub arena: &'a mut ElementArena,
    pub scene: &'a Scene,
    pub oracle: &'a dyn RayOracle,
    pub ctx: &'a mut GalerkinContext,
    pub evaluator: &'a mut FormFactorEvaluator,
}

/// The oracle's verdict on a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EvaluationCode {
    AccurateEnough,
    RegularSubdivideSource,
    RegularSubdivideReceiver,
    SubdivideSourceCluster,
    SubdivideReceiverCluster,
}

fn colour_to_error(c: ColorRgb) -> f64 {
    c.max_component() as f64
}

/// Reflectance of an element's patch; unity for clusters.
fn reflectance(env: &RefineEnv, element: ElementId) -> ColorRgb {
    match env.arena.get(element).patch_id() {
        Some(p) => env.scene.patch(p).reflectance,
        None => ColorRgb::monochrome(1.0),
    }
}

/// The error threshold the link must stay below, expressed in the
/// radiance norm regardless of the configured error norm (the power norm
/// folds the receiver area into the threshold instead of the error).
fn link_error_threshold(env: &RefineEnv, link: &Interaction, rcv_area: f64) -> f64 {
    let stats = &env.ctx.statistics;
    let rel = env.ctx.config.rel_link_error_threshold as f64;
    let mut threshold = match env.ctx.config.error_norm {
        ErrorNorm::RadianceError => colour_to_error(stats.max_self_emitted_radiance) * rel,
        ErrorNorm::PowerError => {
            colour_to_error(stats.max_self_emitted_power) * rel / (std::f64::consts::PI * rcv_area)
        }
    };
    // With view-importance-driven gathering, weight the threshold by the
    // receiver's potential instead of weighting the error. The average
    // direct potential is assumed to be about half of the maximum.
    if env.ctx.config.importance_driven
        && env.ctx.config.iteration_method.is_gathering()
        && stats.max_direct_potential > 0.0
    {
        let p = env.arena.get(link.receiver).potential as f64;
        if p > 0.0 {
            threshold /= 2.0 * p / stats.max_direct_potential as f64;
        }
    }
    threshold
}

/// Estimated error committed by transporting over the link as-is.
fn approximation_error(
    env: &mut RefineEnv,
    link: &Interaction,
    src_rho: ColorRgb,
    rcv_rho: ColorRgb,
) -> f64 {
    let src_is_cluster = env.arena.get(link.source).is_cluster();
    let distinct = link.source != link.receiver;
    let delta = link.delta_k[0];

    match env.ctx.config.iteration_method {
        IterationMethod::Jacobi | IterationMethod::GaussSeidel => {
            let src_rad = if src_is_cluster && distinct {
                clustering::max_cluster_radiance(env.arena, link.source, false)
            } else {
                env.arena.get(link.source).radiance[0]
            };
            colour_to_error(rcv_rho.scalar_product(src_rad * delta).abs())
        }
        IterationMethod::Southwell => {
            let src_rad = if src_is_cluster && distinct {
                clustering::source_cluster_radiance(env.arena, env.scene, env.ctx, link)
            } else {
                env.arena.get(link.source).un_shot_radiance[0]
            };
            let mut error = colour_to_error(rcv_rho.scalar_product(src_rad * delta).abs());

            if env.ctx.config.importance_driven && env.arena.get(link.receiver).is_cluster() {
                // The link must also carry un-shot potential accurately.
                let stats = &env.ctx.statistics;
                let mut error2 = colour_to_error(src_rho)
                    * delta as f64
                    * env.arena.get(link.source).un_shot_potential as f64;
                if stats.max_direct_potential > 0.0 {
                    error2 *= match env.ctx.config.error_norm {
                        ErrorNorm::RadianceError => {
                            colour_to_error(stats.max_self_emitted_radiance)
                                / stats.max_direct_potential as f64
                        }
                        ErrorNorm::PowerError => {
                            colour_to_error(stats.max_self_emitted_power)
                                / std::f64::consts::PI
                                / stats.max_direct_potential as f64
                        }
                    };
                    error = error.max(error2);
                }
            }
            error
        }
    }
}

/// Error due to the variation of the source-cluster radiance over the
/// receiver, sampled at the receiver's corner vertices. Expensive under
/// z-visibility, so only called when the link would otherwise pass.
fn source_cluster_radiance_variation_error(
    env: &mut RefineEnv,
    link: &Interaction,
    rcv_rho: ColorRgb,
    rcv_area: f64,
) -> f64 {
    let k = link.k[0];
    if k == 0.0
        || rcv_rho.is_black()
        || env.arena.get(link.source).radiance[0].is_black()
    {
        return 0.0;
    }
    let vertices = env.arena.vertices(env.scene, link.receiver);
    let mut min_rad = ColorRgb::monochrome(f32::INFINITY);
    let mut max_rad = ColorRgb::monochrome(f32::NEG_INFINITY);
    for v in vertices {
        let rad =
            clustering::cluster_radiance_to_sample_point(env.arena, env.scene, env.ctx, link.source, v);
        min_rad = min_rad.min(rad);
        max_rad = max_rad.max(rad);
    }
    let spread = max_rad - min_rad;
    colour_to_error(rcv_rho.scalar_product(spread * (k / rcv_area as f32)).abs())
}

/// The refinement oracle.
fn evaluate_interaction(env: &mut RefineEnv, link: &Interaction) -> EvaluationCode {
    use EvaluationCode::*;

    if !env.ctx.config.hierarchical {
        // Simply don't refine.
        return AccurateEnough;
    }

    let rcv_is_cluster = env.arena.get(link.receiver).is_cluster();
    let src_is_cluster = env.arena.get(link.source).is_cluster();

    // Receiver area (projected visible area for a cluster) and the two
    // reflectances.
    let rcv_rho = if rcv_is_cluster {
        ColorRgb::monochrome(1.0)
    } else {
        reflectance(env, link.receiver)
    };
    let rcv_area = if rcv_is_cluster {
        clustering::receiver_cluster_area(env.arena, env.scene, env.ctx, link) as f64
    } else {
        env.arena.get(link.receiver).area as f64
    };
    let src_rho = if src_is_cluster {
        ColorRgb::monochrome(1.0)
    } else {
        reflectance(env, link.source)
    };

    let threshold = link_error_threshold(env, link, rcv_area);
    let mut error = approximation_error(env, link, src_rho, rcv_rho);

    if src_is_cluster
        && error < threshold
        && env.ctx.config.clustering_strategy != crate::config::ClusteringStrategy::Isotropic
    {
        error += source_cluster_radiance_variation_error(env, link, rcv_rho, rcv_area);
    }

    if error <= threshold {
        return AccurateEnough;
    }

    let minimum_area =
        (env.ctx.statistics.total_area * env.ctx.config.rel_min_elem_area) as f64;
    let src_area = env.arena.get(link.source).area as f64;
    let src_is_light_cluster = src_is_cluster && env.arena.get(link.source).is_light_source;

    // Subdivide the larger of the two elements; a light-source cluster on
    // the source side always goes first. On equal areas the receiver is
    // subdivided, preferring regular subdivision over cluster subdivision.
    let subdivide_receiver = if src_is_light_cluster {
        false
    } else if (rcv_area - src_area).abs() < f64::EPSILON * rcv_area.max(src_area) {
        !rcv_is_cluster || src_is_cluster
    } else {
        rcv_area > src_area
    };

    if subdivide_receiver {
        if rcv_area > minimum_area {
            if rcv_is_cluster {
                return SubdivideReceiverCluster;
            }
            return RegularSubdivideReceiver;
        }
    } else if src_is_cluster {
        return SubdivideSourceCluster;
    } else if src_area > minimum_area {
        return RegularSubdivideSource;
    }

    AccurateEnough
}

/// Computes light transport over a link that is accurate enough.
/// Everything is staged into `received_radiance`; renormalisation and
/// reflection happen once during push-pull.
fn compute_light_transport(env: &mut RefineEnv, link: &Interaction) {
    // Track how many coefficients are effectively in use.
    {
        let a = link.nrcv.min(env.arena.get(link.receiver).basis_size);
        let b = link.nsrc.min(env.arena.get(link.source).basis_size);
        let rcv = env.arena.get_mut(link.receiver);
        rcv.basis_used = rcv.basis_used.max(a);
        let src = env.arena.get_mut(link.source);
        src.basis_used = src.basis_used.max(b);
    }

    let shooting = !env.ctx.config.iteration_method.is_gathering();
    let src_is_cluster = env.arena.get(link.source).is_cluster();
    let rcv_is_cluster = env.arena.get(link.receiver).is_cluster();
    let distinct = link.source != link.receiver;

    let src_rad: Vec<ColorRgb> = if src_is_cluster && distinct {
        vec![clustering::source_cluster_radiance(env.arena, env.scene, env.ctx, link)]
    } else {
        let src = env.arena.get(link.source);
        if shooting {
            src.un_shot_radiance.clone()
        } else {
            src.radiance.clone()
        }
    };

    if rcv_is_cluster && distinct {
        clustering::cluster_gather_radiance(env.arena, env.scene, env.ctx, link, &src_rad);
    } else {
        let a = link.nrcv.min(env.arena.get(link.receiver).basis_size);
        let b = link.nsrc.min(src_rad.len());
        let rcv = env.arena.get_mut(link.receiver);
        if link.nrcv == 1 && link.nsrc == 1 {
            rcv.received_radiance[0] = rcv.received_radiance[0].add_scaled(link.k[0], src_rad[0]);
        } else {
            for alpha in 0..a {
                for beta in 0..b {
                    rcv.received_radiance[alpha] = rcv.received_radiance[alpha]
                        .add_scaled(link.k_at(alpha, beta), src_rad[beta]);
                }
            }
        }
    }

    if env.ctx.config.importance_driven {
        let k = link.k[0];
        if env.ctx.config.iteration_method.is_gathering() {
            // Importance flows against the light: from receiver to source.
            let rcv_rho = if rcv_is_cluster {
                ColorRgb::monochrome(1.0)
            } else {
                reflectance(env, link.receiver)
            };
            let p = env.arena.get(link.receiver).potential;
            env.arena.get_mut(link.source).received_potential +=
                k * rcv_rho.max_component() * p;
        } else {
            let src_rho = if src_is_cluster {
                ColorRgb::monochrome(1.0)
            } else {
                reflectance(env, link.source)
            };
            let p = env.arena.get(link.source).un_shot_potential;
            env.arena.get_mut(link.receiver).received_potential +=
                k * src_rho.max_component() * p;
        }
    }
}

/// Shaft culling for a link, when the configuration asks for it. Returns
/// the reduced candidate list, or `None` when culling is disabled and the
/// parent list should be used as-is.
fn cull_for_link(
    env: &mut RefineEnv,
    link: &Interaction,
    candidates: Option<&CandidateList>,
) -> Option<CandidateList> {
    let candidates = candidates?;
    match env.ctx.config.shaft_cull_mode {
        ShaftCullMode::DoShaftCullingForRefinement | ShaftCullMode::AlwaysDoShaftCulling => {}
        ShaftCullMode::Never => return None,
    }

    let rcv_is_cluster = env.arena.get(link.receiver).is_cluster();
    let src_is_cluster = env.arena.get(link.source).is_cluster();

    let mut shaft = if env.ctx.config.exact_visibility && !rcv_is_cluster && !src_is_cluster {
        let rcv_poly = env
            .arena
            .polygon(env.scene, link.receiver)
            .expect("surface receiver");
        let src_poly = env
            .arena
            .polygon(env.scene, link.source)
            .expect("surface source");
        Shaft::from_polygon_to_polygon(&rcv_poly, &src_poly)
    } else {
        Shaft::from_bounding_boxes(
            env.arena.bounds(env.scene, link.receiver),
            env.arena.bounds(env.scene, link.source),
        )
    };

    for &endpoint in &[link.receiver, link.source] {
        let e = env.arena.get(endpoint);
        match (e.geometry_id(), e.patch_id()) {
            (Some(g), _) => shaft.dont_open(g),
            (None, Some(p)) => shaft.omit(p),
            _ => {}
        }
    }

    Some(shaft.cull(env.scene, candidates, env.ctx.config.shaft_cull_strategy))
}

/// Builds a fresh sub-link between `rcv` and `src`, filling in form
/// factors and visibility. Returns `None` when the elements cannot see
/// each other at all.
fn create_subdivision_link(
    env: &mut RefineEnv,
    candidates: Option<&CandidateList>,
    rcv: ElementId,
    src: ElementId,
) -> Option<Interaction> {
    let nrcv = if env.arena.get(rcv).is_cluster() {
        1
    } else {
        env.arena.get(rcv).basis_size
    };
    let nsrc = if env.arena.get(src).is_cluster() {
        1
    } else {
        env.arena.get(src).basis_size
    };
    let mut link = Interaction::new(rcv, src, nrcv, nsrc);
    env.evaluator.area_to_area_form_factor(
        env.arena,
        env.scene,
        env.oracle,
        candidates,
        &mut link,
        env.ctx,
    );
    (link.visibility != 0).then_some(link)
}

/// Stores an accepted link with the owner dictated by the iteration
/// method: the source for shooting, the receiver for gathering.
fn store_interaction(env: &mut RefineEnv, link: Interaction) {
    let owner = if env.ctx.config.iteration_method.is_gathering() {
        link.receiver
    } else {
        link.source
    };
    env.arena.get_mut(owner).interactions.push(link);
}

/// Whether a surface child of a subdivided cluster can face the other
/// endpoint at all.
fn child_faces_endpoint(env: &RefineEnv, child: ElementId, other: ElementId) -> bool {
    let Some(child_patch) = env.arena.get(child).patch_id() else {
        return true;
    };
    let patch = env.scene.patch(child_patch);
    match env.arena.get(other).geometry_id() {
        Some(g) => {
            let bounds = env.scene.geometries.get(g).bounds;
            !bounds.behind_plane(patch.normal, patch.plane_constant)
        }
        None => {
            let other_patch = env
                .arena
                .get(other)
                .patch_id()
                .expect("an element is a surface or a cluster");
            env.scene.patch(other_patch).facing(patch)
        }
    }
}

fn refine_children(
    env: &mut RefineEnv,
    link: &Interaction,
    candidates: Option<&CandidateList>,
    children: &[ElementId],
    subdividing_receiver: bool,
) {
    let culled = cull_for_link(env, link, candidates);
    let effective = culled.as_ref().or(candidates);
    for &child in children {
        let (rcv, src, other) = if subdividing_receiver {
            (child, link.source, link.source)
        } else {
            (link.receiver, child, link.receiver)
        };
        if !child_faces_endpoint(env, child, other) {
            continue;
        }
        if let Some(mut sub) = create_subdivision_link(env, effective, rcv, src) {
            if !refine_recursive(env, &mut sub, effective) {
                store_interaction(env, sub);
            }
        }
    }
}

/// Recursively refines a link. Returns true when the link was replaced by
/// sub-links (and should be dropped by the caller); false when it was
/// kept, in which case light transport over it has been computed.
fn refine_recursive(
    env: &mut RefineEnv,
    link: &mut Interaction,
    candidates: Option<&CandidateList>,
) -> bool {
    match evaluate_interaction(env, link) {
        EvaluationCode::AccurateEnough => {
            compute_light_transport(env, link);
            false
        }
        EvaluationCode::RegularSubdivideSource => {
            let children = env.arena.regular_subdivide(env.scene, link.source);
            refine_children(env, link, candidates, &children, false);
            true
        }
        EvaluationCode::RegularSubdivideReceiver => {
            let children = env.arena.regular_subdivide(env.scene, link.receiver);
            refine_children(env, link, candidates, &children, true);
            true
        }
        EvaluationCode::SubdivideSourceCluster => {
            let children = env.arena.get(link.source).irregular_children.clone();
            refine_children(env, link, candidates, &children, false);
            true
        }
        EvaluationCode::SubdivideReceiverCluster => {
            let children = env.arena.get(link.receiver).irregular_children.clone();
            refine_children(env, link, candidates, &children, true);
            true
        }
    }
}

/// Refines and computes light transport over all interactions stored on
/// elements of the subtree rooted at `element`. Refinement starts at the
/// lowest levels so already-refined links are not revisited.
pub(crate) fn refine_interactions(env: &mut RefineEnv, element: ElementId) {
    let irregular = env.arena.get(element).irregular_children.clone();
    for child in irregular {
        refine_interactions(env, child);
    }
    if let Some(children) = env.arena.get(element).regular_children {
        for child in children {
            refine_interactions(env, child);
        }
    }

    // Take the list out; links that get refined are dropped afterwards,
    // never while the list is being iterated.
    let links = std::mem::take(&mut env.arena.get_mut(element).interactions);
    if links.is_empty() {
        return;
    }
    let whole_scene = CandidateList::whole_scene(env.scene.clustered_root);
    let mut kept = Vec::new();
    let mut refined = 0usize;
    for mut link in links {
        // Full visibility proven earlier means no occluders to consider.
        let candidates = if env.ctx.config.exact_visibility && link.visibility == 255 {
            None
        } else {
            Some(&whole_scene)
        };
        if refine_recursive(env, &mut link, candidates) {
            link.release();
            refined += 1;
        } else {
            kept.push(link);
        }
    }
    if refined > 0 {
        trace!(
            "element {:?}: {} links refined, {} kept",
            element,
            refined,
            kept.len()
        );
    }
    env.arena.get_mut(element).interactions.extend(kept);
}
