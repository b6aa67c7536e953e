// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Links of the interaction graph.
//!
//! An interaction is a directed edge from a source element to a receiver
//! element, carrying the generalized form factors between their basis
//! functions, an error estimate and a quantised visibility. Links are owned
//! by the receiver's interaction list when gathering and by the source's
//! when shooting; refinement replaces a link by its children's links.

use crate::element::ElementId;

/// A directed source → receiver transport link.
#[derive(Clone, Debug)]
pub struct Interaction {
    pub receiver: ElementId,
    pub source: ElementId,
    /// Generalized form factors, row-major `nrcv × nsrc`:
    /// `k[alpha * nsrc + beta]` couples receiver basis function `alpha`
    /// with source basis function `beta`.
    pub k: Vec<f32>,
    /// Error-estimation coefficients; a single entry at present.
    pub delta_k: Vec<f32>,
    /// Number of basis functions considered on the receiver.
    pub nrcv: usize,
    /// Number of basis functions considered on the source.
    pub nsrc: usize,
    /// Number of error-estimation coefficients in `delta_k`.
    pub error_coefficients: usize,
    /// 0 = fully occluded … 255 = fully visible.
    pub visibility: u8,
    /// Set when the quantised 255 is backed by exact per-ray visibility;
    /// a clamped 254 with this flag unset means "likely visible but the
    /// shadow rays may have missed an occluder".
    pub exact_visibility_proven: bool,
}

impl Interaction {
    pub fn new(receiver: ElementId, source: ElementId, nrcv: usize, nsrc: usize) -> Self {
        Self {
            receiver,
            source,
            k: vec![0.0; nrcv * nsrc],
            delta_k: vec![0.0],
            nrcv,
            nsrc,
            error_coefficients: 1,
            visibility: 0,
            exact_visibility_proven: false,
        }
    }

    pub fn k_at(&self, alpha: usize, beta: usize) -> f32 {
        self.k[alpha * self.nsrc + beta]
    }

    pub fn set_k(&mut self, alpha: usize, beta: usize, value: f32) {
        self.k[alpha * self.nsrc + beta] = value;
    }

    pub fn clear_k(&mut self) {
        self.k.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Releases the coupling storage. Called when a link is dropped after
    /// refinement replaced it.
    pub fn release(&mut self) {
        self.k = Vec::new();
        self.delta_k = Vec::new();
    }
}

/// Link tallies per endpoint kind, for the per-iteration statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkCounts {
    pub cluster_to_cluster: usize,
    pub cluster_to_surface: usize,
    pub surface_to_cluster: usize,
    pub surface_to_surface: usize,
}

impl LinkCounts {
    pub fn total(&self) -> usize {
        self.cluster_to_cluster
            + self.cluster_to_surface
            + self.surface_to_cluster
            + self.surface_to_surface
    }
}
