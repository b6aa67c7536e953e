// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Push-pull: propagating received radiance through the element hierarchy.
//!
//! A single recursive pass renormalises the radiance received by every
//! element during the iteration, pushes it down to the leaves where it is
//! reflected (and, for gathering, augmented by self-emittance), and pulls
//! the result back up so that every level holds the area-weighted average
//! of its children. Afterwards `received_radiance` is zero everywhere.

use super::{ElementArena, ElementId};
use crate::basis::{basis_for_vertices, GalerkinBasis};
use crate::color::{ColorRgb, BLACK};
use crate::constants::EPSILON;
use crate::scene::Scene;

/// The push operator for the σ-th regular child:
/// `child[β] = Σ_α H[σ,α,β]·parent[α]`.
pub(crate) fn push_coefficients(
    basis: &GalerkinBasis,
    sigma: usize,
    parent: &[ColorRgb],
    child: &mut [ColorRgb],
) {
    for beta in 0..child.len() {
        let mut c = BLACK;
        for (alpha, &p) in parent.iter().enumerate() {
            let f = basis.regular_filter[[sigma, alpha, beta]];
            if f.abs() > EPSILON {
                c = c.add_scaled(f as f32, p);
            }
        }
        child[beta] = c;
    }
}

/// The pull operator for the σ-th regular child:
/// `parent[α] = (1/4)·Σ_β H[σ,α,β]·child[β]`.
fn pull_coefficients(
    basis: &GalerkinBasis,
    sigma: usize,
    child: &[ColorRgb],
    parent: &mut [ColorRgb],
) {
    for alpha in 0..parent.len() {
        let mut p = BLACK;
        for (beta, &c) in child.iter().enumerate() {
            let f = basis.regular_filter[[sigma, alpha, beta]];
            if f.abs() > EPSILON {
                p = p.add_scaled(f as f32, c);
            }
        }
        parent[alpha] = p * 0.25;
    }
}

fn push_pull_recursive(
    arena: &mut ElementArena,
    scene: &Scene,
    id: ElementId,
    b_down: &mut Vec<ColorRgb>,
    gathering: bool,
) -> Vec<ColorRgb> {
    let (basis_size, area, is_cluster, patch, regular_children, irregular_children) = {
        let e = arena.get(id);
        (
            e.basis_size,
            e.area,
            e.is_cluster(),
            e.patch_id(),
            e.regular_children,
            e.irregular_children.clone(),
        )
    };

    // Renormalise the radiance received at this level and add it to the
    // coefficients pushed down from above.
    {
        let e = arena.get_mut(id);
        for i in 0..basis_size {
            b_down[i] = b_down[i].add_scaled(1.0 / area, e.received_radiance[i]);
            e.received_radiance[i] = BLACK;
        }
    }

    let mut b_up = vec![BLACK; basis_size];

    if regular_children.is_none() && irregular_children.is_empty() {
        // A leaf: reflection happens at the lowest level only.
        if let Some(patch) = patch {
            let p = scene.patch(patch);
            for i in 0..basis_size {
                b_up[i] = p.reflectance.scalar_product(b_down[i]);
            }
            if gathering {
                // Self-emittance enters the constant term; b_up becomes the
                // new total radiance of the leaf.
                b_up[0] += p.emittance;
            }
        }
    }

    if let Some(children) = regular_children {
        let num_vertices = scene
            .patch(patch.expect("regular children imply a surface element"))
            .num_vertices();
        let basis = basis_for_vertices(num_vertices);
        for (sigma, child) in children.into_iter().enumerate() {
            let child_size = arena.get(child).basis_size;
            let mut b_down_child = vec![BLACK; child_size];
            push_coefficients(basis, sigma, b_down, &mut b_down_child);
            let child_up = push_pull_recursive(arena, scene, child, &mut b_down_child, gathering);
            let mut pulled = vec![BLACK; basis_size];
            pull_coefficients(basis, sigma, &child_up, &mut pulled);
            for i in 0..basis_size {
                b_up[i] += pulled[i];
            }
        }
    }

    for child in irregular_children {
        let child_size = arena.get(child).basis_size;
        let mut b_down_child = vec![BLACK; child_size];
        if is_cluster {
            // Constant basis on clusters: push the scalar.
            b_down_child[0] = b_down[0];
        }
        let child_up = push_pull_recursive(arena, scene, child, &mut b_down_child, gathering);
        // Pull weighted by the area ratio.
        let ratio = arena.get(child).area / area;
        b_up[0] = b_up[0].add_scaled(ratio, child_up[0]);
    }

    {
        let e = arena.get_mut(id);
        if gathering {
            e.radiance[..basis_size].copy_from_slice(&b_up);
        } else {
            for i in 0..basis_size {
                e.radiance[i] += b_up[i];
                e.un_shot_radiance[i] += b_up[i];
            }
        }
    }

    b_up
}

/// Converts the radiance received during the iteration into exitant
/// radiance, making the hierarchical representation consistent across all
/// levels of the subtree rooted at `top`.
pub fn push_pull_radiance(arena: &mut ElementArena, scene: &Scene, top: ElementId, gathering: bool) {
    let mut b_down = vec![BLACK; arena.get(top).basis_size];
    push_pull_recursive(arena, scene, top, &mut b_down, gathering);
}

/// The scalar analogue of [`push_pull_radiance`] for view potential.
/// Returns the pulled potential of `top`.
pub fn push_pull_potential(
    arena: &mut ElementArena,
    top: ElementId,
    mut down: f32,
    shooting: bool,
) -> f32 {
    let (area, is_cluster, regular_children, irregular_children) = {
        let e = arena.get(top);
        (
            e.area,
            e.is_cluster(),
            e.regular_children,
            e.irregular_children.clone(),
        )
    };

    {
        let e = arena.get_mut(top);
        down += e.received_potential / area;
        e.received_potential = 0.0;
    }

    let mut up = 0.0;
    if regular_children.is_none() && irregular_children.is_empty() {
        up = down;
    }
    if let Some(children) = regular_children {
        for child in children {
            up += 0.25 * push_pull_potential(arena, child, down, shooting);
        }
    }
    for child in irregular_children {
        // Potential is not pushed into irregular surface sub-elements.
        let pushed = if is_cluster { down } else { 0.0 };
        let ratio = arena.get(child).area / area;
        up += ratio * push_pull_potential(arena, child, pushed, shooting);
    }

    let e = arena.get_mut(top);
    e.potential += up;
    if shooting {
        e.un_shot_potential += up;
    }
    up
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BasisType;
    use crate::scene::{Patch, PatchId};
    use approx::assert_abs_diff_eq;
    use glam::Vec3;

    fn quad_scene(reflectance: f32, emittance: f32) -> Scene {
        Scene::new(vec![Patch::new(
            &[
                Vec3::ZERO,
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
            ],
            ColorRgb::monochrome(reflectance),
            ColorRgb::monochrome(emittance),
        )])
    }

    #[test]
    fn gathering_push_pull_reflects_and_emits() {
        let scene = quad_scene(0.5, 1.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.get_mut(top).received_radiance[0] = ColorRgb::monochrome(2.0);
        push_pull_radiance(&mut arena, &scene, top, true);
        let e = arena.get(top);
        // 2.0 received over area 1, reflected by 0.5, plus emittance 1.
        assert_abs_diff_eq!(e.radiance[0].r, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(e.received_radiance[0].r, 0.0);
    }

    #[test]
    fn push_pull_clears_received_everywhere() {
        let scene = quad_scene(0.5, 0.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Linear);
        let children = arena.regular_subdivide(&scene, top);
        arena.get_mut(top).received_radiance[0] = ColorRgb::monochrome(1.0);
        arena.get_mut(children[2]).received_radiance[1] = ColorRgb::monochrome(0.25);
        push_pull_radiance(&mut arena, &scene, top, true);
        for e in arena.iter() {
            for c in &e.received_radiance {
                assert_abs_diff_eq!(c.r, 0.0);
                assert_abs_diff_eq!(c.g, 0.0);
                assert_abs_diff_eq!(c.b, 0.0);
            }
        }
    }

    #[test]
    fn parent_radiance_is_area_weighted_average_of_children() {
        let scene = quad_scene(1.0, 0.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        let children = arena.regular_subdivide(&scene, top);
        // Unequal radiance received by the children.
        for (i, &c) in children.iter().enumerate() {
            arena.get_mut(c).received_radiance[0] = ColorRgb::monochrome(i as f32);
        }
        push_pull_radiance(&mut arena, &scene, top, true);
        let expected: f32 = children
            .iter()
            .map(|&c| arena.get(c).radiance[0].r * arena.get(c).area)
            .sum::<f32>()
            / arena.get(top).area;
        assert_abs_diff_eq!(arena.get(top).radiance[0].r, expected, epsilon = 1e-5);
    }

    #[test]
    fn converged_solution_is_a_fixed_point() {
        // With no received radiance, a gathering push-pull recomputes the
        // same radiance that is already stored (constant basis): leaf
        // radiance rho*0 + Ed stays Ed.
        let scene = quad_scene(0.5, 3.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.get_mut(top).radiance[0] = ColorRgb::monochrome(3.0);
        push_pull_radiance(&mut arena, &scene, top, true);
        assert_abs_diff_eq!(arena.get(top).radiance[0].r, 3.0, epsilon = 1e-6);
    }

    #[test]
    fn zero_emittance_zero_input_stays_zero() {
        let scene = quad_scene(0.5, 0.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Linear);
        arena.regular_subdivide(&scene, top);
        push_pull_radiance(&mut arena, &scene, top, true);
        for e in arena.iter() {
            for c in &e.radiance {
                assert!(c.is_black());
            }
        }
    }

    #[test]
    fn shooting_push_pull_accumulates() {
        let scene = quad_scene(0.5, 0.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.get_mut(top).radiance[0] = ColorRgb::monochrome(1.0);
        arena.get_mut(top).received_radiance[0] = ColorRgb::monochrome(2.0);
        push_pull_radiance(&mut arena, &scene, top, false);
        let e = arena.get(top);
        // received 2 over area 1 → reflected 1.0 is added to both totals.
        assert_abs_diff_eq!(e.radiance[0].r, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(e.un_shot_radiance[0].r, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn potential_push_pull() {
        let scene = quad_scene(0.5, 0.0);
        let mut arena = ElementArena::default();
        let top = arena.create_toplevel(&scene, PatchId(0), BasisType::Constant);
        arena.get_mut(top).received_potential = 0.5;
        let up = push_pull_potential(&mut arena, top, 0.0, true);
        assert_abs_diff_eq!(up, 0.5, epsilon = 1e-6);
        let e = arena.get(top);
        assert_abs_diff_eq!(e.potential, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(e.un_shot_potential, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(e.received_potential, 0.0);
    }
}
