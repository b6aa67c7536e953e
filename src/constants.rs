// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Numeric tolerances shared across the solver.

/// General-purpose relative tolerance for geometric predicates.
pub(crate) const EPSILON: f64 = 1e-6;

/// Single-precision variant, for tests against `f32` geometry.
pub(crate) const EPSILON_F32: f32 = 1e-6;

/// Maximum number of vertices on an input patch.
pub(crate) const MAX_PATCH_VERTICES: usize = 4;

/// Maximum number of basis coefficients per element (cubic basis).
pub(crate) const MAX_BASIS_SIZE: usize = 10;
