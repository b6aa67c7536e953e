// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Two clusters of random triangles separated by an opaque wall: no light
//! crosses, with oriented clustering and multi-resolution visibility on.

use glam::Vec3;
use helion::{
    BasisType, ClusteringStrategy, ColorRgb, GalerkinConfig, GalerkinSolver, IterationMethod,
    Patch, PatchId, PatchListOracle, Scene,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::common::BLACK;

/// A small random triangle near `centre`, oriented along +x or -x.
fn random_triangle(
    rng: &mut StdRng,
    centre: Vec3,
    facing_positive_x: bool,
    reflectance: ColorRgb,
    emittance: ColorRgb,
) -> Patch {
    let jitter = |rng: &mut StdRng| {
        Vec3::new(
            rng.gen_range(-0.2..0.2),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        )
    };
    let base = centre + jitter(rng);
    let mut e1 = Vec3::new(0.0, rng.gen_range(0.2..0.5), rng.gen_range(-0.1..0.1));
    let e2 = Vec3::new(0.0, rng.gen_range(-0.1..0.1), rng.gen_range(0.2..0.5));
    if !facing_positive_x {
        e1 = -e1;
    }
    Patch::new(&[base, base + e1, base + e2], reflectance, emittance)
}

fn occluded_scene() -> Scene {
    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut patches = Vec::new();
    // Cluster A: emitters around x = 0, facing +x.
    for _ in 0..20 {
        patches.push(random_triangle(
            &mut rng,
            Vec3::new(0.0, 0.0, 0.0),
            true,
            BLACK,
            ColorRgb::monochrome(5.0),
        ));
    }
    // The wall at x = 5, facing the emitters (-x side towards A is the
    // front: normal points towards negative x).
    patches.push(Patch::new(
        &[
            Vec3::new(5.0, -20.0, -20.0),
            Vec3::new(5.0, -20.0, 20.0),
            Vec3::new(5.0, 20.0, 20.0),
            Vec3::new(5.0, 20.0, -20.0),
        ],
        ColorRgb::monochrome(0.3),
        BLACK,
    ));
    // Cluster B: receivers around x = 10, facing -x.
    for _ in 0..20 {
        patches.push(random_triangle(
            &mut rng,
            Vec3::new(10.0, 0.0, 0.0),
            false,
            ColorRgb::monochrome(0.8),
            BLACK,
        ));
    }
    Scene::new(patches)
}

#[test]
fn no_light_crosses_an_opaque_wall() {
    let scene = occluded_scene();
    let oracle = PatchListOracle::new(&scene);
    let config = GalerkinConfig {
        iteration_method: IterationMethod::Jacobi,
        clustered: true,
        clustering_strategy: ClusteringStrategy::Oriented,
        multi_resolution_visibility: true,
        basis_type: BasisType::Constant,
        rel_link_error_threshold: 0.1,
        ..GalerkinConfig::default()
    };
    let mut solver = GalerkinSolver::new(&scene, &oracle, config).unwrap();
    for _ in 0..3 {
        solver.do_step();
    }

    // The wall's front catches the light. Its average radiosity is tiny
    // (a handful of small emitters spread over a huge wall), but not zero.
    let arena = solver.arena();
    let wall = arena.get(arena.patch_element(PatchId(20)).unwrap()).radiance[0];
    assert!(wall.r > 1e-7, "the wall should be lit, got {wall}");

    // Nothing reaches the far cluster.
    for i in 21..scene.patches.len() {
        let rad = solver.radiance_at(PatchId(i as u32), 0.3, 0.3);
        assert!(
            rad.max_component() < 1e-3,
            "patch {i} behind the wall received {rad}"
        );
    }

    // Links ending in the far cluster carry (near-)zero visibility, so
    // they were never stored: every stored link's receiver sits on the
    // light side or is a cluster.
    let arena = solver.arena();
    for e in arena.iter() {
        for link in &e.interactions {
            let rcv = arena.get(link.receiver);
            let src = arena.get(link.source);
            if let (Some(r), Some(s)) = (rcv.patch_id(), src.patch_id()) {
                let receiver_far = r.index() > 20;
                let source_near = s.index() < 20;
                assert!(
                    !(receiver_far && source_near && link.visibility > 3),
                    "visible link across the wall: {:?} <- {:?} (visibility {})",
                    r,
                    s,
                    link.visibility
                );
            }
        }
    }
}
