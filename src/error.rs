// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Error type for all fatal solver errors. This is the only error enum
//! that is publicly visible.
//!
//! Degenerate geometry, numerical underflow and ray-oracle oddities are
//! deliberately *not* errors: they are recovered locally (zero kernel,
//! identity transform, treated-as-occluded) and the iteration proceeds.

use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum HelionError {
    /// The configuration failed validation; nothing was initialised.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The scene contains no patches.
    #[error("the scene contains no patches")]
    EmptyScene,
}
