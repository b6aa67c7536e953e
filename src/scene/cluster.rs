// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Octree clustering of the patch list.
//!
//! Builds the cluster hierarchy the solver's cluster elements attach to,
//! following Christensen's simple scheme: a top cluster holding every
//! patch is split into up to eight octants; a patch moves into the octant
//! containing its centroid unless it is larger than half the cluster, in
//! which case it stays with the parent. Clusters with very few patches are
//! not split further.

use glam::Vec3;
use log::debug;

use super::{Geometry, GeometryArena, GeometryId, GeometryKind, Patch, PatchId};
use crate::geom::BoundingBox;

/// Clusters with this many patches or fewer are not split.
const MIN_PATCHES_IN_CLUSTER: usize = 3;

struct ClusterNode {
    bounds: BoundingBox,
    patches: Vec<PatchId>,
    children: Vec<ClusterNode>,
}

impl ClusterNode {
    fn new() -> Self {
        Self {
            bounds: BoundingBox::EMPTY,
            patches: Vec::new(),
            children: Vec::new(),
        }
    }

    fn add(&mut self, patch: &Patch) {
        self.patches.push(patch.id);
        self.bounds.enlarge(&patch.bounds);
    }
}

/// Octant index of `point` relative to `mid`, or `None` when the centroids
/// coincide and the patch should stay with the parent.
fn octant_of(mid: Vec3, point: Vec3) -> Option<usize> {
    let eps = crate::constants::EPSILON_F32;
    if (point - mid).abs().max_element() < eps {
        return None;
    }
    let mut index = 0;
    if point.x > mid.x {
        index |= 1;
    }
    if point.y > mid.y {
        index |= 2;
    }
    if point.z > mid.z {
        index |= 4;
    }
    Some(index)
}

fn split(node: &mut ClusterNode, patches: &[Patch]) {
    if node.patches.len() <= MIN_PATCHES_IN_CLUSTER {
        return;
    }
    let mid = node.bounds.centre();
    let half = 0.5 * node.bounds.extent();
    let eps = 10.0 * crate::constants::EPSILON_F32;

    let mut octants: Vec<ClusterNode> = (0..8).map(|_| ClusterNode::new()).collect();
    let mut kept = Vec::new();
    for id in node.patches.drain(..) {
        let patch = &patches[id.index()];
        let size = patch.bounds.extent();
        // Patches larger than half an octant stay with the parent.
        let too_large = (size.x > eps && size.x > half.x)
            || (size.y > eps && size.y > half.y)
            || (size.z > eps && size.z > half.z);
        let octant = if too_large {
            None
        } else {
            octant_of(mid, patch.bounds.centre())
        };
        match octant {
            Some(i) => octants[i].add(patch),
            None => kept.push(id),
        }
    }
    node.patches = kept;

    for mut octant in octants {
        if octant.patches.is_empty() {
            continue;
        }
        split(&mut octant, patches);
        node.children.push(octant);
    }
}

fn convert(node: ClusterNode, arena: &mut GeometryArena, patches: &[Patch]) -> GeometryId {
    let own_patches = if node.patches.is_empty() {
        None
    } else {
        // Bounds of just the direct patches; the compound keeps the full box.
        let mut bounds = BoundingBox::EMPTY;
        for id in &node.patches {
            bounds.enlarge(&patches[id.index()].bounds);
        }
        Some(arena.push(Geometry {
            kind: GeometryKind::PatchSet(node.patches),
            bounds,
        }))
    };

    if node.children.is_empty() {
        return own_patches.expect("a leaf cluster holds at least one patch");
    }

    let mut children: Vec<GeometryId> = node
        .children
        .into_iter()
        .map(|c| convert(c, arena, patches))
        .collect();
    if let Some(p) = own_patches {
        // The cluster's own patches are tested first for intersections.
        children.insert(0, p);
    }
    arena.push(Geometry {
        kind: GeometryKind::Compound(children),
        bounds: node.bounds,
    })
}

/// Builds the octree over `patches` and returns the root geometry id.
pub fn build_cluster_octree(patches: &[Patch], arena: &mut GeometryArena) -> GeometryId {
    let mut top = ClusterNode::new();
    for p in patches {
        top.add(p);
    }
    split(&mut top, patches);
    let root = convert(top, arena, patches);
    debug!("cluster octree: root {:?}, {} geometry nodes", root, arena.len());
    root
}
