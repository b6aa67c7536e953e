// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Scratch software renderer.
//!
//! A small orthographic z-buffer used by the z-visibility clustering
//! strategy: the surface elements of a cluster are rasterised with their
//! element id as "colour", as seen from a sample point. Average visible
//! radiance and per-element pixel counts are then read back from the frame
//! buffer. A one-entry cache keyed on (cluster, eye) avoids re-rendering
//! identical views.

use glam::{Mat4, Vec2, Vec3};
use ndarray::Array2;

use crate::element::{ElementArena, ElementId};
use crate::geom::BoundingBox;
use crate::scene::Scene;

pub(crate) struct ScratchContext {
    size: usize,
    /// Element id per pixel; `None` is background.
    frame: Array2<Option<ElementId>>,
    depth: Array2<f32>,
    vp_width: usize,
    vp_height: usize,
    last_cluster: Option<ElementId>,
    last_eye: Vec3,
    cached_bbox: BoundingBox,
}

impl ScratchContext {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            frame: Array2::from_elem((size, size), None),
            depth: Array2::from_elem((size, size), f32::INFINITY),
            vp_width: size,
            vp_height: size,
            last_cluster: None,
            last_eye: Vec3::splat(f32::INFINITY),
            cached_bbox: BoundingBox::EMPTY,
        }
    }

    pub fn viewport(&self) -> (usize, usize) {
        (self.vp_width, self.vp_height)
    }

    /// Renders the cluster's surface elements as seen from `eye` under an
    /// orthographic projection that exactly frames the cluster. Returns
    /// the camera-space bounding box of the cluster (its x/y extent is the
    /// size of the virtual screen). Re-uses the previous frame when the
    /// same cluster is viewed from the same eye point again.
    pub fn render_elements(
        &mut self,
        arena: &ElementArena,
        scene: &Scene,
        cluster: ElementId,
        eye: Vec3,
    ) -> BoundingBox {
        if self.last_cluster == Some(cluster)
            && (eye - self.last_eye).abs().max_element() < crate::constants::EPSILON_F32
        {
            return self.cached_bbox;
        }
        self.last_cluster = Some(cluster);
        self.last_eye = eye;

        let centre = arena.midpoint(scene, cluster);
        let view_dir = (centre - eye).normalize_or_zero();
        let mut up = Vec3::Z;
        if up.dot(view_dir).abs() > 1.0 - crate::constants::EPSILON_F32 {
            up = Vec3::Y;
        }
        let look_at = Mat4::look_at_rh(eye, centre, up);

        let geometry = arena
            .get(cluster)
            .geometry_id()
            .expect("scratch rendering targets cluster elements");
        let bbx = scene.geometries.get(geometry).bounds.transformed(&look_at);
        self.cached_bbox = bbx;

        // Viewport size follows the smallest surface in the cluster so
        // that every element covers at least around one pixel.
        let screen_area = (bbx.max.x - bbx.min.x) * (bbx.max.y - bbx.min.y);
        let minimum_area = arena.get(cluster).minimum_area.max(f32::MIN_POSITIVE);
        let vp = ((screen_area / minimum_area) as usize).clamp(32, self.size);
        self.vp_width = vp;
        self.vp_height = vp;

        for p in self.frame.iter_mut() {
            *p = None;
        }
        for d in self.depth.iter_mut() {
            *d = f32::INFINITY;
        }

        let mut surfaces = Vec::new();
        arena.cluster_surfaces(cluster, &mut surfaces);
        for element in surfaces {
            let patch_id = arena
                .get(element)
                .patch_id()
                .expect("cluster surfaces are surface elements");
            let patch = scene.patch(patch_id);
            // Backface culling against the eye point.
            if patch.normal.dot(eye) + patch.plane_constant < crate::constants::EPSILON_F32 {
                continue;
            }
            let projected: Vec<(Vec2, f32)> = patch
                .vertices()
                .iter()
                .map(|&v| {
                    let cam = look_at.transform_point3(v);
                    let x = (cam.x - bbx.min.x) / (bbx.max.x - bbx.min.x).max(f32::MIN_POSITIVE);
                    let y = (cam.y - bbx.min.y) / (bbx.max.y - bbx.min.y).max(f32::MIN_POSITIVE);
                    (
                        Vec2::new(x * self.vp_width as f32, y * self.vp_height as f32),
                        -cam.z,
                    )
                })
                .collect();
            // Fan triangulation covers both triangles and quads.
            for i in 1..projected.len() - 1 {
                self.rasterise(
                    element,
                    projected[0],
                    projected[i],
                    projected[i + 1],
                );
            }
        }
        bbx
    }

    fn rasterise(&mut self, element: ElementId, a: (Vec2, f32), b: (Vec2, f32), c: (Vec2, f32)) {
        let area = (b.0 - a.0).perp_dot(c.0 - a.0);
        if area.abs() < f32::MIN_POSITIVE {
            return;
        }
        let min_x = a.0.x.min(b.0.x).min(c.0.x).floor().max(0.0) as usize;
        let max_x = (a.0.x.max(b.0.x).max(c.0.x).ceil() as usize).min(self.vp_width);
        let min_y = a.0.y.min(b.0.y).min(c.0.y).floor().max(0.0) as usize;
        let max_y = (a.0.y.max(b.0.y).max(c.0.y).ceil() as usize).min(self.vp_height);
        for py in min_y..max_y {
            for px in min_x..max_x {
                let p = Vec2::new(px as f32 + 0.5, py as f32 + 0.5);
                let w0 = (b.0 - a.0).perp_dot(p - a.0) / area;
                let w1 = (c.0 - b.0).perp_dot(p - b.0) / area;
                let w2 = 1.0 - w0 - w1;
                // Barycentric sign test, orientation independent.
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let z = w1 * a.1 + w2 * b.1 + w0 * c.1;
                if z < self.depth[(py, px)] {
                    self.depth[(py, px)] = z;
                    self.frame[(py, px)] = Some(element);
                }
            }
        }
    }

    /// Average radiance over the whole virtual screen (background pixels
    /// contribute black).
    pub fn radiance(&self, arena: &ElementArena, shooting: bool) -> crate::color::ColorRgb {
        let mut rad = crate::color::BLACK;
        let mut non_background = 0usize;
        for py in 0..self.vp_height {
            for px in 0..self.vp_width {
                if let Some(element) = self.frame[(py, px)] {
                    let e = arena.get(element);
                    rad += if shooting {
                        e.un_shot_radiance[0]
                    } else {
                        e.radiance[0]
                    };
                    non_background += 1;
                }
            }
        }
        if non_background > 0 {
            rad = rad * (1.0 / (self.vp_width * self.vp_height) as f32);
        }
        rad
    }

    /// Number of pixels covered by any element.
    pub fn non_background_pixels(&self) -> usize {
        let mut n = 0;
        for py in 0..self.vp_height {
            for px in 0..self.vp_width {
                if self.frame[(py, px)].is_some() {
                    n += 1;
                }
            }
        }
        n
    }

    /// Accumulates per-element pixel counts into
    /// [`GalerkinElement::scratch_pixels`](crate::GalerkinElement). The
    /// counters must be zero beforehand.
    pub fn pixels_per_element(&self, arena: &mut ElementArena) {
        for py in 0..self.vp_height {
            for px in 0..self.vp_width {
                if let Some(element) = self.frame[(py, px)] {
                    arena.get_mut(element).scratch_pixels += 1;
                }
            }
        }
    }
}
