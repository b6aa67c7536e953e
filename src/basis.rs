// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Orthonormal polynomial bases on the standard triangle and the unit
//! square, and the precomputed push-pull filters for regular subdivision.
//!
//! The bases are orthonormal with respect to the area-normalised measure on
//! their domain: `(1/A) ∫ φ_α φ_β = δ_αβ`. Up to ten functions (cubic
//! approximation) are available per shape; how many are actually used is
//! decided per element by the configured [`BasisType`](crate::BasisType).
//!
//! The push-pull filter
//! `H[σ][α][β] = (1/A) ∫_S φ_α(χ_σ(u,v)) φ_β(u,v) du dv`,
//! with `χ_σ` the σ-th regular up-transform, is computed once per shape from
//! a cubature rule that is exact for the cubic×cubic products, and never
//! mutated afterwards.

use glam::Vec2;
use lazy_static::lazy_static;
use ndarray::Array3;

use crate::constants::MAX_BASIS_SIZE;
use crate::cubature::{CubatureDegree, CubatureRule};
use crate::geom::{Mat2x2, QUAD_UP_TRANSFORMS, TRI_UP_TRANSFORMS};

pub type BasisFn = fn(f64, f64) -> f64;

/// A basis for one element shape, with its regular-subdivision filter.
pub struct GalerkinBasis {
    pub description: &'static str,
    pub size: usize,
    pub functions: [BasisFn; MAX_BASIS_SIZE],
    /// `regular_filter[[sigma, alpha, beta]]`, see the module docs.
    pub regular_filter: Array3<f64>,
}

impl GalerkinBasis {
    fn new(
        description: &'static str,
        functions: [BasisFn; MAX_BASIS_SIZE],
        up_transforms: &[Mat2x2; 4],
        rule: &CubatureRule,
    ) -> Self {
        let mut filter = Array3::zeros((4, MAX_BASIS_SIZE, MAX_BASIS_SIZE));
        for (sigma, xf) in up_transforms.iter().enumerate() {
            for alpha in 0..MAX_BASIS_SIZE {
                for beta in 0..MAX_BASIS_SIZE {
                    let mut x = 0.0;
                    for node in &rule.nodes {
                        let up = xf.transform_point(Vec2::new(node.u as f32, node.v as f32));
                        x += node.w
                            * functions[alpha](up.x as f64, up.y as f64)
                            * functions[beta](node.u, node.v);
                    }
                    filter[[sigma, alpha, beta]] = x;
                }
            }
        }
        Self {
            description,
            size: MAX_BASIS_SIZE,
            functions,
            regular_filter: filter,
        }
    }

}

// Orthonormal basis for the standard triangle (0,0), (1,0), (0,1).

fn tg0(_u: f64, _v: f64) -> f64 {
    1.0
}

fn tg1(u: f64, _v: f64) -> f64 {
    -1.414213562373095 + 4.242640687119287 * u
}

fn tg2(u: f64, v: f64) -> f64 {
    -2.449489742783179 + 2.449489742783180 * u + 4.898979485566360 * v
}

fn tg3(u: f64, v: f64) -> f64 {
    1.133893419027696 - 4.535573676110755 * u - 4.535573676110757 * v
        + 22.677868380553690 * u * v
}

fn tg4(u: f64, v: f64) -> f64 {
    3.273268353539930 - 22.258224804071368 * u - 3.927922024247956 * v
        + 19.639610121239613 * u * v
        + 22.912878474779255 * u * u
}

fn tg5(u: f64, v: f64) -> f64 {
    3.872983346207630 - 7.745966692415757 * u - 23.237900077245097 * v
        + 23.237900077245847 * u * v
        + 3.872983346208171 * u * u
        + 23.237900077244831 * v * v
}

fn tg6(u: f64, _v: f64) -> f64 {
    -2.0 + 30.0 * u - 90.0 * u * u + 70.0 * u * u * u
}

fn tg7(u: f64, v: f64) -> f64 {
    -3.464101615137785 + 45.033320996788269 * u + 6.928203230276860 * v
        - 83.138438763305757 * u * v
        - 114.315353299539055 * u * u
        + 72.746133917888613 * u * u * u
        + 145.492267835783281 * u * u * v
}

fn tg8(u: f64, v: f64) -> f64 {
    -4.472135955000763 + 40.249223595002263 * u + 26.832815730003585 * v
        - 214.662525840012592 * u * v
        - 67.082039324999926 * u * u
        - 26.832815730002483 * v * v
        + 31.304951684997551 * u * u * u
        + 187.829710110013110 * u * u * v
        + 187.829710110001940 * u * v * v
}

fn tg9(u: f64, v: f64) -> f64 {
    -5.291502622131427 + 15.874507866401922 * u + 63.498031465565624 * v
        - 126.996062931158960 * u * v
        - 15.874507866410964 * u * u
        - 158.745078663906781 * v * v
        + 5.291502622139829 * u * u * u
        + 63.498031465601095 * u * u * v
        + 158.745078663922413 * u * v * v
        + 105.830052442603559 * v * v * v
}

// Orthonormal basis for the unit square [0,1]².

fn qg0(_u: f64, _v: f64) -> f64 {
    1.0
}

fn qg1(u: f64, _v: f64) -> f64 {
    -1.732050807568877 + 3.464101615137753 * u
}

fn qg2(_u: f64, v: f64) -> f64 {
    -1.732050807568877 + 3.464101615137753 * v
}

fn qg3(u: f64, v: f64) -> f64 {
    3.000000000000003 - 6.000000000000006 * u - 6.000000000000009 * v
        + 12.000000000000021 * u * v
}

fn qg4(u: f64, _v: f64) -> f64 {
    2.236067977499749 - 13.416407864998552 * u + 13.416407864998591 * u * u
}

fn qg5(_u: f64, v: f64) -> f64 {
    2.236067977499781 - 13.416407864998723 * v + 13.416407864998760 * v * v
}

fn qg6(u: f64, _v: f64) -> f64 {
    -2.645751311064023 + 31.749015732770424 * u - 79.372539331927356 * u * u
        + 52.915026221285316 * u * u * u
}

fn qg7(u: f64, v: f64) -> f64 {
    -3.872983346207165 + 23.237900077242056 * u + 7.745966692414697 * v
        - 46.475800154488844 * u * v
        - 23.237900077239200 * u * u
        + 46.475800154488617 * u * u * v
}

fn qg8(u: f64, v: f64) -> f64 {
    -3.872983346207866 + 7.745966692416303 * u + 23.237900077246348 * v
        - 46.475800154495623 * u * v
        - 23.237900077245619 * v * v
        + 46.475800154491409 * u * v * v
}

fn qg9(_u: f64, v: f64) -> f64 {
    -2.645751311064409 + 31.749015732781054 * v - 79.372539331951486 * v * v
        + 52.915026221299712 * v * v * v
}

lazy_static! {
    pub static ref TRI_BASIS: GalerkinBasis = GalerkinBasis::new(
        "orthonormal basis for the standard triangle",
        [tg0, tg1, tg2, tg3, tg4, tg5, tg6, tg7, tg8, tg9],
        &TRI_UP_TRANSFORMS,
        &CubatureRule::standard_triangle(CubatureDegree::Degree9),
    );
    pub static ref QUAD_BASIS: GalerkinBasis = GalerkinBasis::new(
        "orthonormal basis for the unit square",
        [qg0, qg1, qg2, qg3, qg4, qg5, qg6, qg7, qg8, qg9],
        &QUAD_UP_TRANSFORMS,
        &CubatureRule::unit_square(CubatureDegree::Degree9),
    );
}

/// The basis matching the number of vertices of a patch.
pub fn basis_for_vertices(num_vertices: usize) -> &'static GalerkinBasis {
    if num_vertices == 3 {
        &TRI_BASIS
    } else {
        &QUAD_BASIS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn check_orthonormal(basis: &GalerkinBasis, rule: &CubatureRule) {
        for a in 0..basis.size {
            for b in 0..basis.size {
                let mut x = 0.0;
                for node in &rule.nodes {
                    x += node.w
                        * (basis.functions[a])(node.u, node.v)
                        * (basis.functions[b])(node.u, node.v);
                }
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(x, expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn quad_basis_is_orthonormal() {
        check_orthonormal(&QUAD_BASIS, &CubatureRule::unit_square(CubatureDegree::Degree9));
    }

    #[test]
    fn tri_basis_is_orthonormal() {
        check_orthonormal(
            &TRI_BASIS,
            &CubatureRule::standard_triangle(CubatureDegree::Degree9),
        );
    }

    /// Pushing coefficients down to the four children and pulling them back
    /// up must be the identity: `(1/4)·Σ_σ Σ_β H[σ,α,β]·H[σ,γ,β] = δ_αγ`.
    fn check_filter_identity(basis: &GalerkinBasis) {
        for alpha in 0..basis.size {
            for gamma in 0..basis.size {
                let mut x = 0.0;
                for sigma in 0..4 {
                    for beta in 0..basis.size {
                        x += basis.regular_filter[[sigma, alpha, beta]]
                            * basis.regular_filter[[sigma, gamma, beta]];
                    }
                }
                x *= 0.25;
                let expected = if alpha == gamma { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(x, expected, epsilon = 1e-7);
            }
        }
    }

    #[test]
    fn quad_filters_compose_to_identity() {
        check_filter_identity(&QUAD_BASIS);
    }

    #[test]
    fn tri_filters_compose_to_identity() {
        check_filter_identity(&TRI_BASIS);
    }

    #[test]
    fn constant_filter_is_one() {
        for basis in [&*TRI_BASIS, &*QUAD_BASIS] {
            for sigma in 0..4 {
                assert_abs_diff_eq!(basis.regular_filter[[sigma, 0, 0]], 1.0, epsilon = 1e-12);
            }
        }
    }
}
