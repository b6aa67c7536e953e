// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Three-band spectral radiance values.
//!
//! Radiance, radiosity, reflectance and emittance are all carried as one
//! value per wavelength band. Three fixed bands are used throughout; the
//! solver never resolves the spectrum any finer.

use std::ops::{Add, AddAssign, Mul, Sub};

/// Radiance (or reflectance, or emittance) in three wavelength bands.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorRgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

pub const BLACK: ColorRgb = ColorRgb {
    r: 0.0,
    g: 0.0,
    b: 0.0,
};

impl ColorRgb {
    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// The same value in every band.
    pub fn monochrome(v: f32) -> Self {
        Self { r: v, g: v, b: v }
    }

    pub fn is_black(&self) -> bool {
        self.r == 0.0 && self.g == 0.0 && self.b == 0.0
    }

    /// Band-wise product. Used for filtering radiance through a reflectance.
    pub fn scalar_product(&self, other: ColorRgb) -> ColorRgb {
        ColorRgb::new(self.r * other.r, self.g * other.g, self.b * other.b)
    }

    /// Band-wise quotient; bands where `other` is zero yield zero.
    pub fn safe_divide(&self, other: ColorRgb) -> ColorRgb {
        let div = |a: f32, b: f32| if b != 0.0 { a / b } else { 0.0 };
        ColorRgb::new(div(self.r, other.r), div(self.g, other.g), div(self.b, other.b))
    }

    pub fn abs(&self) -> ColorRgb {
        ColorRgb::new(self.r.abs(), self.g.abs(), self.b.abs())
    }

    pub fn max_component(&self) -> f32 {
        self.r.max(self.g).max(self.b)
    }

    pub fn sum_abs(&self) -> f32 {
        self.r.abs() + self.g.abs() + self.b.abs()
    }

    /// Band-wise minimum.
    pub fn min(&self, other: ColorRgb) -> ColorRgb {
        ColorRgb::new(self.r.min(other.r), self.g.min(other.g), self.b.min(other.b))
    }

    /// Band-wise maximum.
    pub fn max(&self, other: ColorRgb) -> ColorRgb {
        ColorRgb::new(self.r.max(other.r), self.g.max(other.g), self.b.max(other.b))
    }

    /// `self + s * other`, the accumulation primitive of the solver.
    pub fn add_scaled(&self, s: f32, other: ColorRgb) -> ColorRgb {
        ColorRgb::new(
            self.r + s * other.r,
            self.g + s * other.g,
            self.b + s * other.b,
        )
    }
}

impl Add for ColorRgb {
    type Output = ColorRgb;

    fn add(self, rhs: ColorRgb) -> ColorRgb {
        ColorRgb::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}

impl AddAssign for ColorRgb {
    fn add_assign(&mut self, rhs: ColorRgb) {
        *self = *self + rhs;
    }
}

impl Sub for ColorRgb {
    type Output = ColorRgb;

    fn sub(self, rhs: ColorRgb) -> ColorRgb {
        ColorRgb::new(self.r - rhs.r, self.g - rhs.g, self.b - rhs.b)
    }
}

impl Mul<f32> for ColorRgb {
    type Output = ColorRgb;

    fn mul(self, rhs: f32) -> ColorRgb {
        ColorRgb::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}

impl std::fmt::Display for ColorRgb {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "({:.4}, {:.4}, {:.4})", self.r, self.g, self.b)
    }
}
