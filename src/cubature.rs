// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Cubature rules on the standard integration domains.
//!
//! All rules are normalised: their weights sum to one, so a rule computes
//! the *mean* of the integrand over its domain. Form factors and push-pull
//! filters are formulated against this normalised measure; the element areas
//! appear explicitly in those formulas instead.
//!
//! Rules for the unit square and unit cube are Gauss-Legendre tensor
//! products; rules for the standard triangle (0,0)-(1,0)-(0,1) are obtained
//! by collapsing a square rule (Duffy transform), with the extra polynomial
//! order of the collapse absorbed by one additional point in u.

use strum_macros::{Display, EnumIter, EnumString};

use crate::config::ConfigError;

/// Polynomial degree a cubature rule integrates exactly.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, EnumIter, EnumString)]
pub enum CubatureDegree {
    #[strum(serialize = "1")]
    Degree1,
    #[strum(serialize = "2")]
    Degree2,
    #[strum(serialize = "3")]
    Degree3,
    #[strum(serialize = "4")]
    Degree4,
    #[strum(serialize = "5")]
    Degree5,
    #[strum(serialize = "6")]
    Degree6,
    #[strum(serialize = "7")]
    Degree7,
    #[strum(serialize = "8")]
    Degree8,
    #[strum(serialize = "9")]
    Degree9,
}

impl CubatureDegree {
    pub fn as_usize(self) -> usize {
        self as usize + 1
    }

    pub fn from_index(index: usize) -> Result<Self, ConfigError> {
        use CubatureDegree::*;
        match index {
            1 => Ok(Degree1),
            2 => Ok(Degree2),
            3 => Ok(Degree3),
            4 => Ok(Degree4),
            5 => Ok(Degree5),
            6 => Ok(Degree6),
            7 => Ok(Degree7),
            8 => Ok(Degree8),
            9 => Ok(Degree9),
            _ => Err(ConfigError::InvalidCubatureDegree(index)),
        }
    }
}

/// One node of a cubature rule. `t` is zero for the 2D domains.
#[derive(Clone, Copy, Debug)]
pub struct CubatureNode {
    pub u: f64,
    pub v: f64,
    pub t: f64,
    pub w: f64,
}

/// A normalised cubature rule over one of the standard domains.
#[derive(Clone, Debug)]
pub struct CubatureRule {
    pub nodes: Vec<CubatureNode>,
}

impl CubatureRule {
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Gauss-Legendre product rule on the unit square, exact for bivariate
    /// polynomials of per-variable degree `degree`.
    pub fn unit_square(degree: CubatureDegree) -> CubatureRule {
        let g = gauss_legendre_01(points_for(degree.as_usize()));
        let mut nodes = Vec::with_capacity(g.len() * g.len());
        for &(u, wu) in &g {
            for &(v, wv) in &g {
                nodes.push(CubatureNode { u, v, t: 0.0, w: wu * wv });
            }
        }
        CubatureRule { nodes }
    }

    /// Rule on the standard triangle via the collapsed square. One extra
    /// point in u covers the degree raised by the collapse jacobian.
    pub fn standard_triangle(degree: CubatureDegree) -> CubatureRule {
        let d = degree.as_usize();
        let gu = gauss_legendre_01(points_for(d + 1));
        let gv = gauss_legendre_01(points_for(d));
        let mut nodes = Vec::with_capacity(gu.len() * gv.len());
        for &(u, wu) in &gu {
            for &(v, wv) in &gv {
                nodes.push(CubatureNode {
                    u,
                    v: v * (1.0 - u),
                    t: 0.0,
                    // The factor 2 renormalises against the triangle area.
                    w: 2.0 * wu * wv * (1.0 - u),
                });
            }
        }
        CubatureRule { nodes }
    }

    /// Gauss-Legendre product rule on the unit cube, for cluster volumes.
    pub fn unit_cube(degree: CubatureDegree) -> CubatureRule {
        let g = gauss_legendre_01(points_for(degree.as_usize()));
        let mut nodes = Vec::with_capacity(g.len().pow(3));
        for &(u, wu) in &g {
            for &(v, wv) in &g {
                for &(t, wt) in &g {
                    nodes.push(CubatureNode { u, v, t, w: wu * wv * wt });
                }
            }
        }
        CubatureRule { nodes }
    }
}

/// Number of Gauss points needed per axis to integrate `degree` exactly.
fn points_for(degree: usize) -> usize {
    degree / 2 + 1
}

/// Gauss-Legendre abscissas and weights on [0, 1].
fn gauss_legendre_01(n: usize) -> Vec<(f64, f64)> {
    // Nodes and weights on [-1, 1]; mapped below.
    let raw: &[(f64, f64)] = match n {
        1 => &[(0.0, 2.0)],
        2 => &[
            (-0.577_350_269_189_625_8, 1.0),
            (0.577_350_269_189_625_8, 1.0),
        ],
        3 => &[
            (-0.774_596_669_241_483_4, 0.555_555_555_555_555_6),
            (0.0, 0.888_888_888_888_888_9),
            (0.774_596_669_241_483_4, 0.555_555_555_555_555_6),
        ],
        4 => &[
            (-0.861_136_311_594_052_6, 0.347_854_845_137_453_86),
            (-0.339_981_043_584_856_3, 0.652_145_154_862_546_1),
            (0.339_981_043_584_856_3, 0.652_145_154_862_546_1),
            (0.861_136_311_594_052_6, 0.347_854_845_137_453_86),
        ],
        5 => &[
            (-0.906_179_845_938_664, 0.236_926_885_056_189_08),
            (-0.538_469_310_105_683_1, 0.478_628_670_499_366_47),
            (0.0, 0.568_888_888_888_888_9),
            (0.538_469_310_105_683_1, 0.478_628_670_499_366_47),
            (0.906_179_845_938_664, 0.236_926_885_056_189_08),
        ],
        // points_for() never asks for more than (9 + 1) / 2 + 1 = 6.
        _ => &[
            (-0.932_469_514_203_152_1, 0.171_324_492_379_170_36),
            (-0.661_209_386_466_264_5, 0.360_761_573_048_138_6),
            (-0.238_619_186_083_196_9, 0.467_913_934_572_691_04),
            (0.238_619_186_083_196_9, 0.467_913_934_572_691_04),
            (0.661_209_386_466_264_5, 0.360_761_573_048_138_6),
            (0.932_469_514_203_152_1, 0.171_324_492_379_170_36),
        ],
    };
    raw.iter()
        .map(|&(x, w)| (0.5 * (x + 1.0), 0.5 * w))
        .collect()
}
