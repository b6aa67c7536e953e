// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Shaft construction determinism and the omit-set boundary behaviour.

use glam::Vec3;
use helion::shaft::{CandidateList, Occluder, Shaft};
use helion::{geom::BoundingBox, ColorRgb, PatchId, Scene, ShaftCullStrategy};

use crate::common::{ceiling_quad, floor_quad, BLACK};

/// Sorted, quantised plane set of a shaft: the determinism fingerprint.
fn plane_key(shaft: &Shaft) -> Vec<(i64, i64, i64, i64)> {
    let mut key: Vec<_> = shaft
        .planes()
        .iter()
        .map(|p| {
            (
                (p.n[0] * 1e9).round() as i64,
                (p.n[1] * 1e9).round() as i64,
                (p.n[2] * 1e9).round() as i64,
                (p.d * 1e9).round() as i64,
            )
        })
        .collect();
    key.sort();
    key
}

#[test]
fn plane_set_is_identical_across_runs() {
    let b1 = BoundingBox::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 1.0));
    let b2 = BoundingBox::new(Vec3::new(2.0, 0.25, 0.25), Vec3::new(3.0, 0.75, 0.75));
    let reference = plane_key(&Shaft::from_bounding_boxes(b1, b2));
    assert!(!reference.is_empty());
    for _ in 0..8 {
        assert_eq!(plane_key(&Shaft::from_bounding_boxes(b1, b2)), reference);
    }
}

#[test]
fn touching_boxes_drop_endpoints_via_the_omit_set() {
    // Two quads whose bounding boxes touch along z = 0.5.
    let scene = Scene::new(vec![
        floor_quad(ColorRgb::monochrome(0.5), BLACK),
        ceiling_quad(0.5, ColorRgb::monochrome(0.5), BLACK),
        // A third patch inside the (degenerate) shaft volume.
        ceiling_quad(0.25, ColorRgb::monochrome(0.5), BLACK),
    ]);
    let mut shaft = Shaft::from_bounding_boxes(
        scene.patch(PatchId(0)).bounds,
        scene.patch(PatchId(1)).bounds,
    );
    shaft.omit(PatchId(0));
    shaft.omit(PatchId(1));
    let culled = shaft.cull(
        &scene,
        &CandidateList::whole_scene(scene.clustered_root),
        ShaftCullStrategy::OverlapOpen,
    );
    let mut survivors = Vec::new();
    for occ in &culled.occluders {
        match occ {
            Occluder::PatchSet(p) => survivors.extend_from_slice(p),
            Occluder::Geometry(g) => scene.geometries.collect_patches(*g, &mut survivors),
        }
    }
    assert!(!survivors.contains(&PatchId(0)));
    assert!(!survivors.contains(&PatchId(1)));
    assert!(survivors.contains(&PatchId(2)));
}
