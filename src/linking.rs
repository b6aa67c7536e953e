// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Initial linking: the seed interactions refinement starts from.
//!
//! Without clustering, every top-level patch element is linked against
//! every other facing patch, with the candidate occluder list narrowed by
//! shaft culling while the geometry hierarchy is descended. With
//! clustering, the whole linking stage collapses to a single link with the
//! root cluster.

use log::trace;

use crate::element::ElementId;
use crate::interaction::Interaction;
use crate::refine::RefineEnv;
use crate::scene::{GeometryId, GeometryKind, PatchId};
use crate::shaft::{CandidateList, Shaft};

/// The part a top-level element plays in the links being created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Role {
    Source,
    Receiver,
}

/// A placeholder error bound for links whose form factor has not been
/// computed yet; forces the oracle to refine them.
const HUGE_DELTA_K: f32 = 1e30;

/// Creates the initial interactions for the top-level surface element
/// `top`, playing `role`. Links are stored at the receiver when gathering
/// and at the source when shooting.
pub(crate) fn create_initial_links(env: &mut RefineEnv, top: ElementId, role: Role) {
    debug_assert!(
        !env.arena.get(top).is_cluster(),
        "initial linking starts from surface elements"
    );
    let patch = env.arena.get(top).patch_id().expect("surface element");
    let candidates = CandidateList::whole_scene(env.scene.clustered_root);
    let mut created = 0usize;
    for &geometry in &env.scene.top_level.clone() {
        link_geometry(env, top, role, patch, geometry, &candidates, &mut created);
    }
    trace!("initial links for patch {:?}: {}", patch, created);
}

/// Walks one geometry subtree, narrowing the candidate list per node.
fn link_geometry(
    env: &mut RefineEnv,
    top: ElementId,
    role: Role,
    patch: PatchId,
    geometry: GeometryId,
    candidates: &CandidateList,
    created: &mut usize,
) {
    let p = env.scene.patch(patch);
    let bounds = env.scene.geometries.get(geometry).bounds;
    // Geometry entirely behind the linking patch cannot interact with it.
    if bounds.behind_plane(p.normal, p.plane_constant) {
        return;
    }

    let culled;
    let effective = if env.ctx.config.shaft_cull_mode == crate::config::ShaftCullMode::Never {
        candidates
    } else {
        let mut shaft = Shaft::from_bounding_boxes(p.bounds, bounds);
        shaft.omit(patch);
        culled = shaft.cull(env.scene, candidates, env.ctx.config.shaft_cull_strategy);
        &culled
    };

    match env.scene.geometries.get(geometry).kind.clone() {
        GeometryKind::Compound(children) => {
            for child in children {
                link_geometry(env, top, role, patch, child, effective, created);
            }
        }
        GeometryKind::PatchSet(patches) => {
            for other in patches {
                create_initial_link(env, top, role, patch, other, effective, created);
            }
        }
    }
}

/// Links `top` with the top-level element of `other`, unless occlusion or
/// orientation rules the pair out.
fn create_initial_link(
    env: &mut RefineEnv,
    top: ElementId,
    role: Role,
    patch: PatchId,
    other: PatchId,
    candidates: &CandidateList,
    created: &mut usize,
) {
    if other == patch || !env.scene.patch(other).facing(env.scene.patch(patch)) {
        return;
    }
    let other_element = env
        .arena
        .patch_element(other)
        .expect("all patches have top-level elements");
    let (rcv, src) = match role {
        Role::Source => (other_element, top),
        Role::Receiver => (top, other_element),
    };

    // An extra, tighter cull between the two patches themselves.
    let culled;
    let mut effective = candidates;
    if env.ctx.config.exact_visibility
        || env.ctx.config.shaft_cull_mode == crate::config::ShaftCullMode::AlwaysDoShaftCulling
    {
        let mut shaft = if env.ctx.config.exact_visibility {
            Shaft::from_polygon_to_polygon(
                &env.scene.patch(patch).polygon(),
                &env.scene.patch(other).polygon(),
            )
        } else {
            Shaft::from_bounding_boxes(
                env.scene.patch(patch).bounds,
                env.scene.patch(other).bounds,
            )
        };
        shaft.omit(patch);
        shaft.omit(other);
        culled = shaft.cull(env.scene, candidates, env.ctx.config.shaft_cull_strategy);
        if shaft.is_cut() {
            // A single patch fully occludes the pair.
            return;
        }
        effective = &culled;
    }

    let nrcv = env.arena.get(rcv).basis_size;
    let nsrc = env.arena.get(src).basis_size;
    let mut link = Interaction::new(rcv, src, nrcv, nsrc);
    env.evaluator.area_to_area_form_factor(
        env.arena,
        env.scene,
        env.oracle,
        Some(effective),
        &mut link,
        env.ctx,
    );

    if link.visibility > 0 {
        let owner = if env.ctx.config.iteration_method.is_gathering() {
            rcv
        } else {
            src
        };
        env.arena.get_mut(owner).interactions.push(link);
        *created += 1;
    }
}

/// Creates the single seed link between `element` and the root cluster
/// (the clustered counterpart of [`create_initial_links`]). The form
/// factor is left zero with a huge error bound so the first refinement
/// pass always subdivides it.
pub(crate) fn create_initial_link_with_top_cluster(
    env: &mut RefineEnv,
    element: ElementId,
    role: Role,
) {
    let top_cluster = env
        .ctx
        .top_cluster
        .expect("the root cluster exists before linking");
    let (rcv, src) = match role {
        Role::Receiver => (element, top_cluster),
        Role::Source => (top_cluster, element),
    };
    let nrcv = env.arena.get(rcv).basis_size;
    let nsrc = env.arena.get(src).basis_size;
    let mut link = Interaction::new(rcv, src, nrcv, nsrc);
    link.delta_k = vec![HUGE_DELTA_K];
    link.visibility = 128;

    let owner = if env.ctx.config.iteration_method.is_gathering() {
        rcv
    } else {
        src
    };
    env.arena.get_mut(owner).interactions.push(link);
}
