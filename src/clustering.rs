// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cluster-specific transport operations.
//!
//! Three interchangeable strategies resolve how radiance enters and leaves
//! a cluster: isotropic (the constant coefficient, no directionality),
//! oriented (cosine-weighted sum over the contained surfaces) and
//! z-visibility (intra-cluster visibility resolved with the scratch
//! z-buffer). See Sillion & Drettakis, SIGGRAPH '95.

use glam::Vec3;

use crate::color::{ColorRgb, BLACK};
use crate::config::ClusteringStrategy;
use crate::element::{ElementArena, ElementId};
use crate::interaction::Interaction;
use crate::scene::Scene;
use crate::solver::GalerkinContext;

/// Cosine of the surface normal toward `sample`, clamped to the front
/// side; the projected area of `element` is this times its area.
fn projected_cosine(arena: &ElementArena, scene: &Scene, element: ElementId, sample: Vec3) -> f32 {
    let patch = scene.patch(
        arena
            .get(element)
            .patch_id()
            .expect("projected area of a surface element"),
    );
    let dir = sample - patch.midpoint;
    let dist = dir.length();
    let cos = if dist < crate::constants::EPSILON_F32 {
        1.0
    } else {
        dir.dot(patch.normal) / dist
    };
    cos.max(0.0)
}

fn surface_constant_radiance(arena: &ElementArena, element: ElementId, shooting: bool) -> ColorRgb {
    let e = arena.get(element);
    if shooting {
        e.un_shot_radiance[0]
    } else {
        e.radiance[0]
    }
}

/// Radiance (or un-shot radiance, when shooting) emitted by the source
/// cluster towards a sample point.
pub(crate) fn cluster_radiance_to_sample_point(
    arena: &mut ElementArena,
    scene: &Scene,
    ctx: &mut GalerkinContext,
    src: ElementId,
    sample: Vec3,
) -> ColorRgb {
    let shooting = !ctx.config.iteration_method.is_gathering();
    match ctx.config.clustering_strategy {
        ClusteringStrategy::Isotropic => surface_constant_radiance(arena, src, shooting),

        ClusteringStrategy::Oriented => {
            // Power emitted towards the sample point, orientation only;
            // intra-cluster visibility is ignored.
            let mut surfaces = Vec::new();
            arena.cluster_surfaces(src, &mut surfaces);
            let mut accumulated = BLACK;
            for s in surfaces {
                let cos = projected_cosine(arena, scene, s, sample);
                if cos <= 0.0 {
                    continue;
                }
                let rad = surface_constant_radiance(arena, s, shooting);
                accumulated = accumulated.add_scaled(cos * arena.get(s).area, rad);
            }
            // Divide by the mean projected area used by the form factor
            // kernel: area/4.
            accumulated * (4.0 / arena.get(src).area)
        }

        ClusteringStrategy::ZVisibility => {
            let geometry = arena.get(src).geometry_id();
            let inside = match geometry {
                Some(g) => scene.geometries.get(g).bounds.contains(sample),
                None => true,
            };
            if inside {
                surface_constant_radiance(arena, src, shooting)
            } else {
                let scratch = ctx
                    .scratch
                    .as_mut()
                    .expect("scratch renderer is initialised for z-visibility");
                let bbx = scratch.render_elements(arena, scene, src, sample);
                let rad = scratch.radiance(arena, shooting);
                // Virtual screen area over the source area used for the
                // form factor (area/4).
                let screen = (bbx.max.x - bbx.min.x) * (bbx.max.y - bbx.min.y);
                let area_factor = screen / (0.25 * arena.get(src).area);
                rad * area_factor
            }
        }
    }
}

/// Average radiance the source cluster of `link` sends towards the
/// receiver. The source must be a cluster distinct from the receiver.
pub(crate) fn source_cluster_radiance(
    arena: &mut ElementArena,
    scene: &Scene,
    ctx: &mut GalerkinContext,
    link: &Interaction,
) -> ColorRgb {
    debug_assert!(arena.get(link.source).is_cluster() && link.source != link.receiver);
    let sample = arena.midpoint(scene, link.receiver);
    cluster_radiance_to_sample_point(arena, scene, ctx, link.source, sample)
}

/// Projected area of the receiver of `link` as seen from the source
/// midpoint; the plain area when the receiver is not a cluster.
pub(crate) fn receiver_cluster_area(
    arena: &mut ElementArena,
    scene: &Scene,
    ctx: &mut GalerkinContext,
    link: &Interaction,
) -> f32 {
    let rcv = link.receiver;
    if !arena.get(rcv).is_cluster() || link.source == link.receiver {
        return arena.get(rcv).area;
    }
    match ctx.config.clustering_strategy {
        ClusteringStrategy::Isotropic => arena.get(rcv).area,

        ClusteringStrategy::Oriented => {
            let sample = arena.midpoint(scene, link.source);
            let mut surfaces = Vec::new();
            arena.cluster_surfaces(rcv, &mut surfaces);
            surfaces
                .iter()
                .map(|&s| projected_cosine(arena, scene, s, sample) * arena.get(s).area)
                .sum()
        }

        ClusteringStrategy::ZVisibility => {
            let sample = arena.midpoint(scene, link.source);
            let geometry = arena.get(rcv).geometry_id();
            let inside = match geometry {
                Some(g) => scene.geometries.get(g).bounds.contains(sample),
                None => true,
            };
            if inside {
                return arena.get(rcv).area;
            }
            let scratch = ctx
                .scratch
                .as_mut()
                .expect("scratch renderer is initialised for z-visibility");
            let bbx = scratch.render_elements(arena, scene, rcv, sample);
            let screen = (bbx.max.x - bbx.min.x) * (bbx.max.y - bbx.min.y);
            let (w, h) = scratch.viewport();
            scratch.non_background_pixels() as f32 * screen / (w * h) as f32
        }
    }
}

/// Transport over `link` into one receiver element, with an area factor
/// correcting for the receiver area the form factor was computed with.
fn gather_to(
    arena: &mut ElementArena,
    link: &Interaction,
    receiver: ElementId,
    area_factor: f32,
    src_rad: &[ColorRgb],
) {
    let e = arena.get_mut(receiver);
    if link.nrcv == 1 && link.nsrc == 1 {
        e.received_radiance[0] =
            e.received_radiance[0].add_scaled(area_factor * link.k[0], src_rad[0]);
        return;
    }
    let a = link.nrcv.min(e.basis_size);
    let b = link.nsrc.min(src_rad.len());
    for alpha in 0..a {
        for beta in 0..b {
            e.received_radiance[alpha] = e.received_radiance[alpha]
                .add_scaled(area_factor * link.k_at(alpha, beta), src_rad[beta]);
        }
    }
}

/// Distributes the source radiance over the surface elements contained in
/// the receiver cluster of `link`.
pub(crate) fn cluster_gather_radiance(
    arena: &mut ElementArena,
    scene: &Scene,
    ctx: &mut GalerkinContext,
    link: &Interaction,
    src_rad: &[ColorRgb],
) {
    debug_assert!(arena.get(link.receiver).is_cluster() && link.source != link.receiver);
    let rcv = link.receiver;
    let sample = arena.midpoint(scene, link.source);

    match ctx.config.clustering_strategy {
        ClusteringStrategy::Isotropic => {
            gather_to(arena, link, rcv, 1.0, src_rad);
        }
        ClusteringStrategy::Oriented => oriented_gather(arena, scene, link, rcv, sample, src_rad),
        ClusteringStrategy::ZVisibility => {
            let geometry = arena.get(rcv).geometry_id();
            let inside = match geometry {
                Some(g) => scene.geometries.get(g).bounds.contains(sample),
                None => true,
            };
            if inside {
                oriented_gather(arena, scene, link, rcv, sample, src_rad);
                return;
            }
            let scratch = ctx
                .scratch
                .as_mut()
                .expect("scratch renderer is initialised for z-visibility");
            let bbx = scratch.render_elements(arena, scene, rcv, sample);
            scratch.pixels_per_element(arena);
            let screen = (bbx.max.x - bbx.min.x) * (bbx.max.y - bbx.min.y);
            let (w, h) = scratch.viewport();
            let pixel_area = screen / (w * h) as f32;

            let mut surfaces = Vec::new();
            arena.cluster_surfaces(rcv, &mut surfaces);
            for s in surfaces {
                let pixels = arena.get(s).scratch_pixels;
                if pixels == 0 {
                    continue;
                }
                let factor = pixel_area * pixels as f32 / (0.25 * arena.get(rcv).area);
                gather_to(arena, link, s, factor, src_rad);
                arena.get_mut(s).scratch_pixels = 0;
            }
        }
    }
}

/// Gathers to each contained surface weighted by its projected area
/// towards the source midpoint, ignoring intra-cluster visibility.
fn oriented_gather(
    arena: &mut ElementArena,
    scene: &Scene,
    link: &Interaction,
    rcv: ElementId,
    sample: Vec3,
    src_rad: &[ColorRgb],
) {
    let mut surfaces = Vec::new();
    arena.cluster_surfaces(rcv, &mut surfaces);
    for s in surfaces {
        // K was computed with the mean projected receiver area A/4.
        let factor = projected_cosine(arena, scene, s, sample) * arena.get(s).area
            / (0.25 * arena.get(rcv).area);
        gather_to(arena, link, s, factor, src_rad);
    }
}

/// Band-wise maximum (un-shot) radiance over the surfaces of a cluster.
pub(crate) fn max_cluster_radiance(
    arena: &ElementArena,
    cluster: ElementId,
    shooting: bool,
) -> ColorRgb {
    let mut surfaces = Vec::new();
    arena.cluster_surfaces(cluster, &mut surfaces);
    let mut max = BLACK;
    for s in surfaces {
        max = max.max(surface_constant_radiance(arena, s, shooting));
    }
    max
}
