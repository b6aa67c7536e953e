// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Two parallel unit quads one metre apart: the analytically known form
//! factor F ≈ 0.1998 and the invariants around a single Jacobi iteration.

use approx::assert_abs_diff_eq;
use helion::{
    BasisType, ColorRgb, GalerkinConfig, GalerkinSolver, IterationMethod, PatchId,
    PatchListOracle, Scene,
};

use crate::common::{ceiling_quad, floor_quad, BLACK};

/// Form factor between parallel unit squares one apart.
const F_PARALLEL: f32 = 0.19982;

fn two_quad_scene() -> Scene {
    Scene::new(vec![
        floor_quad(ColorRgb::monochrome(0.5), BLACK),
        ceiling_quad(1.0, ColorRgb::monochrome(0.5), ColorRgb::monochrome(1.0)),
    ])
}

fn config() -> GalerkinConfig {
    GalerkinConfig {
        iteration_method: IterationMethod::Jacobi,
        clustered: false,
        hierarchical: false,
        basis_type: BasisType::Constant,
        exact_visibility: false,
        // High-degree rules so the cubature error stays well below the
        // assertion tolerances.
        receiver_degree: helion::CubatureDegree::Degree7,
        source_degree: helion::CubatureDegree::Degree5,
        ..GalerkinConfig::default()
    }
}

#[test]
fn one_jacobi_iteration_reproduces_the_analytic_form_factor() {
    let scene = two_quad_scene();
    let oracle = PatchListOracle::new(&scene);
    let mut solver = GalerkinSolver::new(&scene, &oracle, config()).unwrap();
    solver.do_step();

    // The stored link carries the analytic form factor.
    let mut ks = Vec::new();
    for e in solver.arena().iter() {
        for link in &e.interactions {
            assert!(link.k[0] >= -1e-6, "negative coupling {}", link.k[0]);
            ks.push(link.k[0]);
        }
    }
    assert_eq!(ks.len(), 2);
    for k in ks {
        assert_abs_diff_eq!(k, F_PARALLEL, epsilon = 5e-3);
    }

    // The receiver picked up the emitter's radiance filtered by its own
    // reflectance: ρ·F·Ed.
    let received = solver.radiance_at(PatchId(0), 0.5, 0.5);
    assert_abs_diff_eq!(received.r, 0.5 * F_PARALLEL, epsilon = 3e-3);
    assert_abs_diff_eq!(received.g, received.r, epsilon = 1e-6);
    assert_abs_diff_eq!(received.b, received.r, epsilon = 1e-6);

    // The emitter keeps its self-emittance (the receiver was black when
    // this iteration gathered).
    let emitter = solver.radiance_at(PatchId(1), 0.5, 0.5);
    assert_abs_diff_eq!(emitter.r, 1.0, epsilon = 1e-5);
}

#[test]
fn reciprocity_between_stored_links() {
    let scene = two_quad_scene();
    let oracle = PatchListOracle::new(&scene);
    let mut solver = GalerkinSolver::new(&scene, &oracle, config()).unwrap();
    solver.do_step();

    // Both directions have been stored (one per receiving patch); with
    // equal areas their form factors must agree within 1%.
    let links: Vec<_> = solver
        .arena()
        .iter()
        .flat_map(|e| e.interactions.iter())
        .collect();
    assert_eq!(links.len(), 2);
    let k_forward = links[0].k[0];
    let k_backward = links[1].k[0];
    assert!(
        (k_forward - k_backward).abs() <= 0.01 * k_forward.max(k_backward),
        "reciprocity violated: {k_forward} vs {k_backward}"
    );
    for link in links {
        assert_eq!(link.visibility, 255);
    }
}

#[test]
fn refinement_is_monotone_and_preserves_the_answer() {
    let scene = two_quad_scene();
    let oracle = PatchListOracle::new(&scene);
    let mut cfg = config();
    cfg.hierarchical = true;
    cfg.rel_link_error_threshold = 0.02;
    let mut solver = GalerkinSolver::new(&scene, &oracle, cfg).unwrap();

    let mut last_links = 0usize;
    let mut last_elements = 0usize;
    for _ in 0..4 {
        let stats = solver.do_step();
        assert!(
            stats.links.total() >= last_links,
            "link count shrank: {} -> {}",
            last_links,
            stats.links.total()
        );
        assert!(stats.num_elements >= last_elements);
        last_links = stats.links.total();
        last_elements = stats.num_elements;
    }
    assert!(last_elements > 2, "the aggressive threshold must refine");

    // Fixed point of the two-patch system in patch averages:
    // B0 = ρF·B1, B1 = E + ρF·B0. The top-level coefficients are the
    // area-weighted averages of the refined hierarchy after push-pull.
    let rho_f = 0.5 * F_PARALLEL;
    let expected_b1 = 1.0 / (1.0 - rho_f * rho_f);
    let expected_b0 = rho_f * expected_b1;
    let arena = solver.arena();
    let b0 = arena.get(arena.patch_element(PatchId(0)).unwrap()).radiance[0];
    let b1 = arena.get(arena.patch_element(PatchId(1)).unwrap()).radiance[0];
    assert_abs_diff_eq!(b0.r, expected_b0, epsilon = 0.01);
    assert_abs_diff_eq!(b1.r, expected_b1, epsilon = 0.01);
}

#[test]
fn zero_radiance_scene_is_a_fixed_point() {
    let scene = Scene::new(vec![
        floor_quad(ColorRgb::monochrome(0.5), BLACK),
        ceiling_quad(1.0, ColorRgb::monochrome(0.5), BLACK),
    ]);
    let oracle = PatchListOracle::new(&scene);
    let mut solver = GalerkinSolver::new(&scene, &oracle, config()).unwrap();
    for _ in 0..2 {
        solver.do_step();
    }
    for e in solver.arena().iter() {
        for c in &e.radiance {
            assert_eq!(*c, BLACK);
        }
        for c in &e.received_radiance {
            assert_eq!(*c, BLACK, "push-pull must clear received radiance");
        }
    }
}
