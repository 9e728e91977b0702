//!
//! Implemented projections
//!

// We definitely do not want to use trait objects, so we use
// an enum for type abstraction. There are only three projection
// kinds and the null projection has no state at all, so plain
// delegation is cheap to write.

use crate::errors::{Error, Result};
use crate::math::square;

mod dstereo;
mod tmerc;

pub use dstereo::DoubleStereographic;
pub use tmerc::TransverseMercator;

/// Derived values for a spheroid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Spheroid {
    /// Semi-major axis (meters)
    pub a: f64,
    /// Flattening
    pub f: f64,
    /// First eccentricity squared
    pub es: f64,
    /// First eccentricity
    pub e: f64,
}

impl Spheroid {
    pub fn new(a: f64, f: f64) -> Result<Self> {
        if a <= 0. || f <= 0. || f >= 1. {
            return Err(Error::InvalidSpheroid);
        }
        let b = a - a * f;
        let es = (a * a - b * b) / (a * a);
        Ok(Self {
            a,
            f,
            es,
            e: es.sqrt(),
        })
    }

    #[inline]
    pub(crate) fn prime_vertical_radius(&self, sinlat: f64) -> f64 {
        self.a / (1. - self.es * square(sinlat)).sqrt()
    }
}

/// A projection between geographic and projected coordinates.
///
/// `Null` leaves coordinates untouched: the dataset is in plain
/// geographic latitude/longitude. The transform driver is expected
/// to short-circuit it rather than feed it through the kernels.
#[derive(Debug)]
pub enum Projection {
    Null,
    TransverseMercator(TransverseMercator),
    DoubleStereographic(DoubleStereographic),
}

impl Projection {
    pub fn is_null(&self) -> bool {
        matches!(self, Projection::Null)
    }

    /// Set the spheroid, recomputing cached coefficients when it
    /// actually changes. The null projection validates and discards.
    pub fn set_spheroid(&mut self, a: f64, f: f64) -> Result<()> {
        match self {
            Projection::Null => Spheroid::new(a, f).map(|_| ()),
            Projection::TransverseMercator(p) => p.set_spheroid(a, f),
            Projection::DoubleStereographic(p) => p.set_spheroid(a, f),
        }
    }

    pub fn set_scale_factor(&mut self, k0: f64) -> Result<()> {
        match self {
            Projection::Null => Err(Error::InvalidParameterValue(
                "scale factor cannot be set on geographic coordinates",
            )),
            Projection::TransverseMercator(p) => p.set_scale_factor(k0),
            Projection::DoubleStereographic(p) => p.set_scale_factor(k0),
        }
    }

    pub fn set_false_offsets(&mut self, x0: f64, y0: f64) -> Result<()> {
        match self {
            Projection::Null => Err(Error::InvalidParameterValue(
                "false offsets cannot be set on geographic coordinates",
            )),
            Projection::TransverseMercator(p) => {
                p.set_false_offsets(x0, y0);
                Ok(())
            }
            Projection::DoubleStereographic(p) => {
                p.set_false_offsets(x0, y0);
                Ok(())
            }
        }
    }

    pub fn set_high_precision(&mut self, on: bool) {
        match self {
            Projection::Null => (),
            Projection::TransverseMercator(p) => p.set_high_precision(on),
            Projection::DoubleStereographic(p) => p.set_high_precision(on),
        }
    }

    pub fn scale_factor(&self) -> f64 {
        match self {
            Projection::Null => 1.,
            Projection::TransverseMercator(p) => p.scale_factor(),
            Projection::DoubleStereographic(p) => p.scale_factor(),
        }
    }

    pub fn false_easting(&self) -> f64 {
        match self {
            Projection::Null => 0.,
            Projection::TransverseMercator(p) => p.false_easting(),
            Projection::DoubleStereographic(p) => p.false_easting(),
        }
    }

    pub fn false_northing(&self) -> f64 {
        match self {
            Projection::Null => 0.,
            Projection::TransverseMercator(p) => p.false_northing(),
            Projection::DoubleStereographic(p) => p.false_northing(),
        }
    }

    /// Project (lon, lat) degree pairs in place into projected x/y.
    pub fn from_lat_long(&self, xy: &mut [(f64, f64)]) -> Result<()> {
        match self {
            Projection::Null => Ok(()),
            Projection::TransverseMercator(p) => p.forward(xy),
            Projection::DoubleStereographic(p) => p.forward(xy),
        }
    }

    /// Unproject x/y pairs in place back to (lon, lat) degrees.
    pub fn to_lat_long(&self, xy: &mut [(f64, f64)]) -> Result<()> {
        match self {
            Projection::Null => Ok(()),
            Projection::TransverseMercator(p) => p.inverse(xy),
            Projection::DoubleStereographic(p) => p.inverse(xy),
        }
    }
}

pub(crate) fn check_scale_factor(k0: f64) -> Result<()> {
    if k0 <= 0.0001 || k0 > 10000. {
        Err(Error::InvalidParameterValue("scale factor out of range"))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spheroid_validation() {
        assert!(Spheroid::new(6_378_137.0, 1. / 298.257222099653).is_ok());
        assert!(matches!(
            Spheroid::new(0., 0.003),
            Err(Error::InvalidSpheroid)
        ));
        assert!(matches!(
            Spheroid::new(6_378_137.0, 0.),
            Err(Error::InvalidSpheroid)
        ));
        assert!(matches!(
            Spheroid::new(6_378_137.0, 1.),
            Err(Error::InvalidSpheroid)
        ));
    }

    #[test]
    fn null_projection_is_identity() {
        let p = Projection::Null;
        let mut pts = [(-66.5, 46.5), (179.9, -89.9)];
        let orig = pts;
        p.from_lat_long(&mut pts).unwrap();
        assert_eq!(pts, orig);
        p.to_lat_long(&mut pts).unwrap();
        assert_eq!(pts, orig);
    }

    #[test]
    fn null_projection_accepts_spheroid_and_rejects_overrides() {
        let mut p = Projection::Null;
        assert!(p.set_spheroid(6_378_137.0, 1. / 298.257222099653).is_ok());
        assert!(p.set_scale_factor(0.9996).is_err());
        assert!(p.set_false_offsets(500_000., 0.).is_err());
    }
}
