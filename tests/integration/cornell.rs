// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A Cornell-box shaped cube with a ceiling light: Southwell shooting
//! until convergence, cross-checked against clustered Jacobi gathering.

use glam::Vec3;
use helion::{
    BasisType, ColorRgb, GalerkinConfig, GalerkinSolver, IterationMethod, PatchId,
    PatchListOracle, Scene,
};

use crate::common::{quad, BLACK};

const RED: ColorRgb = ColorRgb {
    r: 0.6,
    g: 0.1,
    b: 0.1,
};
const GREEN: ColorRgb = ColorRgb {
    r: 0.1,
    g: 0.6,
    b: 0.1,
};
const WHITE: ColorRgb = ColorRgb {
    r: 0.7,
    g: 0.7,
    b: 0.7,
};

/// The box: six inward-facing walls plus the light just below the
/// ceiling. The light is patch 6.
fn cornell_scene() -> Scene {
    let p = |x: f32, y: f32, z: f32| Vec3::new(x, y, z);
    Scene::new(vec![
        // Floor (faces +z).
        quad([p(0., 0., 0.), p(1., 0., 0.), p(1., 1., 0.), p(0., 1., 0.)], WHITE, BLACK),
        // Ceiling (faces -z).
        quad([p(0., 0., 1.), p(0., 1., 1.), p(1., 1., 1.), p(1., 0., 1.)], WHITE, BLACK),
        // Left wall x = 0 (faces +x).
        quad([p(0., 0., 0.), p(0., 1., 0.), p(0., 1., 1.), p(0., 0., 1.)], RED, BLACK),
        // Right wall x = 1 (faces -x).
        quad([p(1., 0., 0.), p(1., 0., 1.), p(1., 1., 1.), p(1., 1., 0.)], GREEN, BLACK),
        // Back wall y = 1 (faces -y).
        quad([p(0., 1., 0.), p(1., 1., 0.), p(1., 1., 1.), p(0., 1., 1.)], WHITE, BLACK),
        // Front wall y = 0 (faces +y).
        quad([p(0., 0., 0.), p(0., 0., 1.), p(1., 0., 1.), p(1., 0., 0.)], WHITE, BLACK),
        // The light panel, just below the ceiling, facing down.
        quad(
            [
                p(0.25, 0.25, 0.99),
                p(0.25, 0.75, 0.99),
                p(0.75, 0.75, 0.99),
                p(0.75, 0.25, 0.99),
            ],
            BLACK,
            ColorRgb::monochrome(5.0),
        ),
    ])
}

fn southwell_config() -> GalerkinConfig {
    GalerkinConfig {
        iteration_method: IterationMethod::Southwell,
        clustered: true,
        basis_type: BasisType::Linear,
        rel_link_error_threshold: 0.05,
        ..GalerkinConfig::default()
    }
}

fn jacobi_config() -> GalerkinConfig {
    GalerkinConfig {
        iteration_method: IterationMethod::Jacobi,
        clustered: true,
        basis_type: BasisType::Linear,
        rel_link_error_threshold: 0.05,
        ..GalerkinConfig::default()
    }
}

/// Total power leaving a patch, `π·A·B` in each band, summed over bands.
fn patch_power(solver: &GalerkinSolver, scene: &Scene, id: PatchId) -> f32 {
    let arena = solver.arena();
    let e = arena.get(arena.patch_element(id).unwrap());
    std::f32::consts::PI * scene.patch(id).area * e.radiance[0].sum_abs()
}

#[test]
fn southwell_converges_and_lights_every_wall() {
    let scene = cornell_scene();
    let oracle = PatchListOracle::new(&scene);
    let mut solver = GalerkinSolver::new(&scene, &oracle, southwell_config()).unwrap();

    let mut converged = false;
    for _ in 0..200 {
        let stats = solver.do_step();
        if stats.converged || solver.max_un_shot_radiance() < 1e-3 {
            converged = true;
            break;
        }
    }
    assert!(converged, "shooting failed to converge in 200 steps");

    // Every wall sees the light, directly or indirectly.
    for i in 0..6 {
        let power = patch_power(&solver, &scene, PatchId(i));
        assert!(power > 0.0, "wall {i} stayed dark");
    }
    // The floor is directly lit and must dominate the sideways walls.
    let floor = patch_power(&solver, &scene, PatchId(0));
    let front = patch_power(&solver, &scene, PatchId(5));
    assert!(floor > front, "direct illumination should dominate");

    // Colour bleeding: the red wall reflects mostly red.
    let arena = solver.arena();
    let red_wall = arena.get(arena.patch_element(PatchId(2)).unwrap()).radiance[0];
    assert!(red_wall.r > red_wall.g && red_wall.r > red_wall.b);

    // Conservation: the scene cannot emit more power than the light
    // divided by the worst-case reflectance.
    let emitted = std::f32::consts::PI * 0.25 * 15.0;
    let max_rho = 0.7f32;
    let bound = emitted / (1.0 - max_rho);
    let total: f32 = (0..7).map(|i| patch_power(&solver, &scene, PatchId(i))).sum();
    assert!(total < bound, "total power {total} above the physical bound {bound}");
}

#[test]
fn gathering_and_shooting_agree() {
    let scene = cornell_scene();
    let oracle = PatchListOracle::new(&scene);

    // A tighter refinement threshold than the convergence test, so the
    // two discretisations land close to the same solution.
    let mut shooting_cfg = southwell_config();
    shooting_cfg.rel_link_error_threshold = 0.02;
    let mut gathering_cfg = jacobi_config();
    gathering_cfg.rel_link_error_threshold = 0.02;

    let mut shooter = GalerkinSolver::new(&scene, &oracle, shooting_cfg).unwrap();
    for _ in 0..200 {
        let stats = shooter.do_step();
        if stats.converged || shooter.max_un_shot_radiance() < 1e-3 {
            break;
        }
    }

    let mut gatherer = GalerkinSolver::new(&scene, &oracle, gathering_cfg).unwrap();
    for _ in 0..24 {
        gatherer.do_step();
    }

    // Wall powers from the two independent methods must agree: each is
    // within its own refinement tolerance of the true solution.
    for i in 0..6 {
        let a = patch_power(&shooter, &scene, PatchId(i));
        let b = patch_power(&gatherer, &scene, PatchId(i));
        assert!(
            (a - b).abs() <= 0.1 * a.max(b) + 1e-3,
            "wall {i}: shooting {a} vs gathering {b}"
        );
    }
}
