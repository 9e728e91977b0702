//!
//! Double Stereographic
//!
//! The ellipsoid is first mapped conformally onto a sphere, then the
//! sphere is projected stereographically from the origin. Going back
//! to the ellipsoid requires solving the conformal-latitude relation
//! for the ellipsoidal latitude by Newton iteration.
//!

use crate::errors::{Error, Result};
use crate::math::{square, Tolerance};
use crate::projections::{check_scale_factor, Spheroid};
use std::f64::consts::FRAC_PI_4;

/// Conformal-sphere parameters, cached per (spheroid, origin) pair.
#[derive(Debug, Clone, Copy)]
struct ConformalSphere {
    /// Radius of curvature of the ellipsoid at the origin
    r: f64,
    c1: f64,
    c2: f64,
    /// Origin longitude on the sphere
    slon0: f64,
    sin_slat0: f64,
    cos_slat0: f64,
}

impl ConformalSphere {
    fn new(sph: &Spheroid, lon0: f64, lat0: f64) -> Self {
        let (sinlat0, coslat0) = lat0.sin_cos();
        let es = sph.es;
        let e = sph.e;

        let r = (1. - es).sqrt() * sph.a / (1. - es * square(sinlat0));
        let c1 = (1. + es * coslat0.powi(4) / (1. - es)).sqrt();

        let sin_slat0 = sinlat0 / c1;
        let slat0 = sin_slat0.asin();

        let c2 = (FRAC_PI_4 + slat0 / 2.).tan()
            / ((FRAC_PI_4 + lat0 / 2.).tan()
                * ((1. - e * sinlat0) / (1. + e * sinlat0)).powf(e / 2.))
            .powf(c1);

        Self {
            r,
            c1,
            c2,
            slon0: c1 * lon0,
            sin_slat0,
            cos_slat0: slat0.cos(),
        }
    }
}

#[derive(Debug)]
pub struct DoubleStereographic {
    /// Origin (radians)
    lon0: f64,
    lat0: f64,
    k0: f64,
    x0: f64,
    y0: f64,
    state: Option<(Spheroid, ConformalSphere)>,
    tol: Tolerance,
}

impl DoubleStereographic {
    fn with_origin(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            lon0: lon_deg.to_radians(),
            lat0: lat_deg.to_radians(),
            k0: 0.999912,
            x0: 0.,
            y0: 0.,
            state: None,
            tol: Tolerance::default(),
        }
    }

    pub fn new(origin_lon_deg: f64, origin_lat_deg: f64) -> Result<Self> {
        if !(-180. ..=180.).contains(&origin_lon_deg) || !(-90. ..=90.).contains(&origin_lat_deg) {
            return Err(Error::InvalidParameterValue("origin out of range"));
        }
        Ok(Self::with_origin(origin_lon_deg, origin_lat_deg))
    }

    /// Standard New Brunswick origin.
    pub fn new_brunswick() -> Self {
        Self::with_origin(-66.5, 46.5)
    }

    /// Standard Prince Edward Island origin.
    pub fn prince_edward_island() -> Self {
        Self::with_origin(-63.0, 47.25)
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.lon0.to_degrees(), self.lat0.to_degrees())
    }

    pub fn scale_factor(&self) -> f64 {
        self.k0
    }

    pub fn false_easting(&self) -> f64 {
        self.x0
    }

    pub fn false_northing(&self) -> f64 {
        self.y0
    }

    pub fn set_origin(&mut self, lon_deg: f64, lat_deg: f64) -> Result<()> {
        if !(-180. ..=180.).contains(&lon_deg) || !(-90. ..=90.).contains(&lat_deg) {
            return Err(Error::InvalidParameterValue("origin out of range"));
        }
        self.lon0 = lon_deg.to_radians();
        self.lat0 = lat_deg.to_radians();
        if let Some((sph, _)) = self.state {
            self.state = Some((sph, ConformalSphere::new(&sph, self.lon0, self.lat0)));
        }
        Ok(())
    }

    pub fn set_spheroid(&mut self, a: f64, f: f64) -> Result<()> {
        if let Some((sph, _)) = &self.state {
            if sph.a == a && sph.f == f {
                return Ok(());
            }
        }
        let sph = Spheroid::new(a, f)?;
        self.state = Some((sph, ConformalSphere::new(&sph, self.lon0, self.lat0)));
        Ok(())
    }

    pub fn set_scale_factor(&mut self, k0: f64) -> Result<()> {
        check_scale_factor(k0)?;
        self.k0 = k0;
        Ok(())
    }

    pub fn set_false_offsets(&mut self, x0: f64, y0: f64) {
        self.x0 = x0;
        self.y0 = y0;
    }

    pub fn set_high_precision(&mut self, on: bool) {
        self.tol = Tolerance::new(on);
    }

    /// Project (lon, lat) degree pairs in place.
    pub fn forward(&self, xy: &mut [(f64, f64)]) -> Result<()> {
        let (sph, cs) = self.state.as_ref().ok_or(Error::CalledOutOfSequence)?;
        let e = sph.e;

        for p in xy.iter_mut() {
            let lon = p.0.to_radians();
            let lat = p.1.to_radians();

            let slon = cs.c1 * lon;
            let esinlat = e * lat.sin();
            let slat = 2.
                * ((cs.c2
                    * ((FRAC_PI_4 + lat / 2.).tan()
                        * ((1. - esinlat) / (1. + esinlat)).powf(e / 2.))
                    .powf(cs.c1))
                .atan()
                    - FRAC_PI_4);

            let (sin_dl, cos_dl) = (slon - cs.slon0).sin_cos();
            let (sin_slat, cos_slat) = slat.sin_cos();

            let common = (2. * self.k0 * cs.r)
                / (1. + sin_slat * cs.sin_slat0 + cos_slat * cs.cos_slat0 * cos_dl);

            p.0 = self.x0 + common * cos_slat * sin_dl;
            p.1 = self.y0 + common * (sin_slat * cs.cos_slat0 - cos_slat * cs.sin_slat0 * cos_dl);
        }

        Ok(())
    }

    /// Unproject x/y pairs in place back to (lon, lat) degrees.
    pub fn inverse(&self, xy: &mut [(f64, f64)]) -> Result<()> {
        let (sph, cs) = self.state.as_ref().ok_or(Error::CalledOutOfSequence)?;
        let e = sph.e;
        let es = sph.es;

        for p in xy.iter_mut() {
            let dx = (p.0 - self.x0) / self.k0;
            let dy = (p.1 - self.y0) / self.k0;
            let s = dx.hypot(dy);

            if s <= self.tol.errmax {
                // the origin itself, avoid the divide by zero below
                p.0 = self.lon0.to_degrees();
                p.1 = self.lat0.to_degrees();
                continue;
            }

            let cos_beta = dx / s;
            let sin_beta = dy / s;

            let (sin_d, cos_d) = (2. * (0.5 * s / cs.r).atan()).sin_cos();

            let slat = (cs.sin_slat0 * cos_d + sin_d * cs.cos_slat0 * sin_beta).asin();
            let slon = cs.slon0 + (sin_d * cos_beta / slat.cos()).asin();

            let lon = slon / cs.c1;

            // Newton iteration from the conformal latitude back to
            // the ellipsoidal latitude. Hitting the cap (e.g. when
            // unprojecting garbage far outside the domain) degrades
            // this point only.
            let tan_slat_45 = (FRAC_PI_4 + slat / 2.).tan();
            let mut lat = slat;
            let mut iter = 0;
            loop {
                let esinlat = e * lat.sin();
                let sec_45 = 1. / (FRAC_PI_4 + lat / 2.).cos();
                let tan_45 = (FRAC_PI_4 + lat / 2.).tan();
                let ratio = ((1. - esinlat) / (1. + esinlat)).powf(e / 2.);

                let fun = cs.c2 * (tan_45 * ratio).powf(cs.c1) - tan_slat_45;
                let fundif = cs.c1
                    * cs.c2
                    * (tan_45 * ratio).powf(cs.c1 - 1.)
                    * ratio
                    * (0.5 * square(sec_45) - es * lat.cos() * tan_45 / (1. - square(esinlat)));

                let dif = fun / fundif;
                lat -= dif;

                iter += 1;
                if dif.abs() <= self.tol.errmax || iter >= self.tol.maxiter {
                    break;
                }
            }

            p.0 = lon.to_degrees();
            p.1 = lat.to_degrees();
        }

        Ok(())
    }
}
