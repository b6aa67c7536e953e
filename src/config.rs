// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Solver configuration.
//!
//! All knobs are plain enums and floats, validated once when the solver is
//! created. Downstream code dispatches on the enums with exhaustive matches;
//! there is no runtime failure path for an invalid method.

use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

pub use crate::cubature::CubatureDegree;

/// How the linear system is iterated.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum IterationMethod {
    /// Gathering; radiance updates are applied after a full sweep.
    #[strum(serialize = "jacobi")]
    Jacobi,
    /// Gathering; radiance updates are applied per patch, immediately.
    #[strum(serialize = "gauss-seidel")]
    GaussSeidel,
    /// Shooting (progressive refinement): propagate the highest un-shot
    /// power first.
    #[strum(serialize = "southwell")]
    Southwell,
}

impl IterationMethod {
    /// Gathering methods own links at the receiver, shooting at the source.
    pub fn is_gathering(self) -> bool {
        matches!(self, IterationMethod::Jacobi | IterationMethod::GaussSeidel)
    }
}

/// How radiance leaving a cluster is resolved directionally.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum ClusteringStrategy {
    #[strum(serialize = "isotropic")]
    Isotropic,
    #[strum(serialize = "oriented")]
    Oriented,
    #[strum(serialize = "z-visibility")]
    ZVisibility,
}

/// When shaft culling is performed.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum ShaftCullMode {
    #[strum(serialize = "always")]
    AlwaysDoShaftCulling,
    #[strum(serialize = "refinement")]
    DoShaftCullingForRefinement,
    #[strum(serialize = "never")]
    Never,
}

/// What to do with geometry that survives the shaft test.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum ShaftCullStrategy {
    /// Break every surviving compound open.
    #[strum(serialize = "always-open")]
    AlwaysOpen,
    /// Keep surviving geometry closed where allowed.
    #[strum(serialize = "keep-closed")]
    KeepClosed,
    /// Open only geometry that overlaps the shaft boundary.
    #[strum(serialize = "overlap-open")]
    OverlapOpen,
}

/// Maximum approximation order of the radiance representation.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum BasisType {
    #[strum(serialize = "constant")]
    Constant,
    #[strum(serialize = "linear")]
    Linear,
    #[strum(serialize = "quadratic")]
    Quadratic,
    #[strum(serialize = "cubic")]
    Cubic,
}

impl BasisType {
    /// Number of coefficients on a triangle or quadrilateral element.
    pub fn basis_size(self) -> usize {
        match self {
            BasisType::Constant => 1,
            BasisType::Linear => 3,
            BasisType::Quadratic => 6,
            BasisType::Cubic => 10,
        }
    }
}

/// Which norm the refinement oracle thresholds against.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, EnumIter, EnumString)]
pub enum ErrorNorm {
    #[strum(serialize = "radiance")]
    RadianceError,
    #[strum(serialize = "power")]
    PowerError,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("cubature degree index {0} is out of range (1..=9)")]
    InvalidCubatureDegree(usize),

    #[error("rel_min_elem_area must be in [0, 1], got {0}")]
    InvalidMinElemArea(String),

    #[error("rel_link_error_threshold must be > 0, got {0}")]
    InvalidLinkErrorThreshold(String),

    #[error("scratch frame buffer must be at least 32 pixels, got {0}")]
    ScratchBufferTooSmall(usize),

    #[error("lazy linking is only available for non-importance-driven Jacobi iterations")]
    LazyLinkingUnavailable,
}

/// The complete solver configuration.
#[derive(Clone, Debug)]
pub struct GalerkinConfig {
    pub iteration_method: IterationMethod,
    /// When false the oracle always answers "accurate enough" and no
    /// refinement takes place.
    pub hierarchical: bool,
    /// Adds a potential pass and reweights the refinement threshold.
    pub importance_driven: bool,
    /// Seed each iteration from a single self-link on the root cluster
    /// instead of per-patch initial links.
    pub clustered: bool,
    pub clustering_strategy: ClusteringStrategy,
    /// Delay initial linking of a patch until it has radiance to distribute.
    pub lazy_linking: bool,
    /// Start from the constant-radiosity step instead of self-emittance.
    pub use_constant_radiance: bool,
    /// Add the un-shot ambient estimate to queried radiance.
    pub use_ambient_radiance: bool,
    /// Ray-cast every cubature pair instead of relying on shaft culling.
    pub exact_visibility: bool,
    /// Approximate fine occluders as participating media.
    pub multi_resolution_visibility: bool,
    pub shaft_cull_mode: ShaftCullMode,
    pub shaft_cull_strategy: ShaftCullStrategy,
    pub basis_type: BasisType,
    pub error_norm: ErrorNorm,
    /// Elements smaller than this fraction of the total scene area are
    /// never subdivided.
    pub rel_min_elem_area: f32,
    /// Link error threshold relative to the maximum self-emitted radiance
    /// (or power, depending on `error_norm`).
    pub rel_link_error_threshold: f32,
    pub receiver_degree: CubatureDegree,
    pub source_degree: CubatureDegree,
    pub cluster_degree: CubatureDegree,
    /// Side length, in pixels, of the scratch z-buffer used by the
    /// z-visibility clustering strategy.
    pub scratch_frame_buffer_size: usize,
}

impl Default for GalerkinConfig {
    fn default() -> Self {
        Self {
            iteration_method: IterationMethod::Jacobi,
            hierarchical: true,
            importance_driven: false,
            clustered: true,
            clustering_strategy: ClusteringStrategy::Isotropic,
            lazy_linking: false,
            use_constant_radiance: false,
            use_ambient_radiance: false,
            exact_visibility: false,
            multi_resolution_visibility: false,
            shaft_cull_mode: ShaftCullMode::DoShaftCullingForRefinement,
            shaft_cull_strategy: ShaftCullStrategy::OverlapOpen,
            basis_type: BasisType::Constant,
            error_norm: ErrorNorm::RadianceError,
            rel_min_elem_area: 1e-6,
            rel_link_error_threshold: 1e-2,
            receiver_degree: CubatureDegree::Degree5,
            source_degree: CubatureDegree::Degree3,
            cluster_degree: CubatureDegree::Degree3,
            scratch_frame_buffer_size: 200,
        }
    }
}

impl GalerkinConfig {
    /// Checks the configuration once; everything downstream may then
    /// dispatch without failure paths.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.rel_min_elem_area) || !self.rel_min_elem_area.is_finite() {
            return Err(ConfigError::InvalidMinElemArea(
                self.rel_min_elem_area.to_string(),
            ));
        }
        if !(self.rel_link_error_threshold > 0.0) || !self.rel_link_error_threshold.is_finite() {
            return Err(ConfigError::InvalidLinkErrorThreshold(
                self.rel_link_error_threshold.to_string(),
            ));
        }
        if self.scratch_frame_buffer_size < 32 {
            return Err(ConfigError::ScratchBufferTooSmall(
                self.scratch_frame_buffer_size,
            ));
        }
        if self.lazy_linking
            && (self.importance_driven || self.iteration_method != IterationMethod::Jacobi)
        {
            return Err(ConfigError::LazyLinkingUnavailable);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(GalerkinConfig::default().validate(), Ok(()));
    }

    #[test]
    fn bad_thresholds_are_rejected() {
        let mut c = GalerkinConfig::default();
        c.rel_min_elem_area = 1.5;
        assert!(matches!(c.validate(), Err(ConfigError::InvalidMinElemArea(_))));

        let mut c = GalerkinConfig::default();
        c.rel_link_error_threshold = 0.0;
        assert!(matches!(
            c.validate(),
            Err(ConfigError::InvalidLinkErrorThreshold(_))
        ));
    }

    #[test]
    fn lazy_linking_constraint() {
        let mut c = GalerkinConfig::default();
        c.lazy_linking = true;
        assert_eq!(c.validate(), Ok(()));
        c.iteration_method = IterationMethod::GaussSeidel;
        assert_eq!(c.validate(), Err(ConfigError::LazyLinkingUnavailable));
    }

    #[test]
    fn enums_parse_from_strings() {
        assert_eq!(
            IterationMethod::from_str("southwell").unwrap(),
            IterationMethod::Southwell
        );
        assert_eq!(
            ClusteringStrategy::from_str("z-visibility").unwrap(),
            ClusteringStrategy::ZVisibility
        );
        assert_eq!(BasisType::from_str("quadratic").unwrap().basis_size(), 6);
    }
}
