// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Hierarchical Galerkin radiosity engine for static 3D scenes.
//!
//! The solver computes wavelength-band radiance on every surface of a scene
//! by solving the radiosity integral equation on a multi-resolution mesh: a
//! forest of surface quadtrees below an octree-shaped cluster hierarchy.
//! Light transport is carried by an interaction graph whose links are filled
//! in by a cubature-based form-factor kernel with shaft-culled visibility,
//! and refined on demand by an oracle-guided hierarchical refinement loop.

pub mod basis;
pub(crate) mod clustering;
pub mod color;
pub mod config;
pub(crate) mod constants;
pub mod cubature;
pub mod element;
pub(crate) mod error;
pub(crate) mod formfactor;
pub mod geom;
pub mod interaction;
pub(crate) mod linking;
pub(crate) mod refine;
pub mod scene;
pub(crate) mod scratch;
pub mod shaft;
pub mod solver;

// Re-exports.
pub use color::ColorRgb;
pub use config::{
    BasisType, ClusteringStrategy, ConfigError, CubatureDegree, ErrorNorm, GalerkinConfig,
    IterationMethod, ShaftCullMode, ShaftCullStrategy,
};
pub use element::{ElementArena, ElementId, GalerkinElement};
pub use error::HelionError;
pub use interaction::Interaction;
pub use scene::{
    GeometryArena, GeometryId, Patch, PatchId, PatchListOracle, Ray, RayFlags, RayHit, RayOracle,
    Scene, Statistics,
};
pub use solver::{GalerkinSolver, IterationStats};
