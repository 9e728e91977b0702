//!
//! Transverse Mercator
//!
//! Forward direction from the USGS Bulletin 1532 series, evaluated
//! up to the sixth power of the reduced longitude. The inverse
//! refines the footpoint latitude by Newton iteration seeded with
//! the classic series approximation, which usually saves one
//! iteration over seeding with the rectifying latitude itself.
//!
//! Origin latitude is fixed at the equator.
//!

use crate::errors::{Error, Result};
use crate::math::{square, Tolerance};
use crate::projections::{check_scale_factor, Spheroid};

/// Meridional-arc series coefficients, cached per spheroid.
#[derive(Debug, Clone, Copy)]
struct MeridianSeries {
    a0: f64,
    a2: f64,
    a4: f64,
    a6: f64,
    a8: f64,
    e1: f64,
    e1sq: f64,
}

impl MeridianSeries {
    fn new(sph: &Spheroid) -> Self {
        let es = sph.es;
        let sqrt_one_es = (1. - es).sqrt();

        let mut epow = es * es;
        let mut a0 = 1. - es / 4. - epow * 3. / 64.;
        let mut a2 = es + epow / 4.;
        let mut a4 = epow;

        epow *= es;
        a0 -= epow * 5. / 256.;
        a2 += epow * 15. / 128.;
        a4 += epow * 3. / 4.;
        let mut a6 = epow;

        epow *= es;
        a0 -= epow * 175. / 16384.;
        a2 -= epow * 455. / 4096.;
        a4 -= epow * 77. / 128.;
        a6 -= epow * 41. / 32.;
        let a8 = epow * -315. / 131072.;

        Self {
            a0,
            a2: a2 * (3. / 8.),
            a4: a4 * (15. / 256.),
            a6: a6 * (35. / 3072.),
            a8,
            e1: (1. - sqrt_one_es) / (1. + sqrt_one_es),
            e1sq: es / (1. - es),
        }
    }

    /// Meridional distance from the equator, in units of `a`.
    fn arc(&self, lat: f64) -> f64 {
        self.a0 * lat - self.a2 * (2. * lat).sin() + self.a4 * (4. * lat).sin()
            - self.a6 * (6. * lat).sin()
            + self.a8 * (8. * lat).sin()
    }
}

#[derive(Debug)]
pub struct TransverseMercator {
    /// Central meridian (radians)
    lon0: f64,
    k0: f64,
    x0: f64,
    y0: f64,
    state: Option<(Spheroid, MeridianSeries)>,
    tol: Tolerance,
}

impl TransverseMercator {
    /// Generic transverse mercator on the given central meridian.
    /// Scale factor and false offsets keep their base defaults
    /// (1, 0, 0) until configured.
    pub fn new(central_meridian_deg: f64) -> Result<Self> {
        if !(-180. ..=180.).contains(&central_meridian_deg) {
            return Err(Error::InvalidParameterValue(
                "central meridian out of range",
            ));
        }
        Ok(Self {
            lon0: central_meridian_deg.to_radians(),
            k0: 1.,
            x0: 0.,
            y0: 0.,
            state: None,
            tol: Tolerance::default(),
        })
    }

    /// Universal Transverse Mercator layout for a zone.
    pub fn utm(zone: u32, northern: bool) -> Result<Self> {
        if !(1..=60).contains(&zone) {
            return Err(Error::InvalidUtmZone);
        }
        let mut tm = Self::new(((zone - 1) * 6) as f64 - 180. + 3.)?;
        tm.k0 = 0.9996;
        tm.x0 = 500_000.;
        tm.y0 = if northern { 0. } else { 10_000_000. };
        Ok(tm)
    }

    /// Modified (3 degree) Transverse Mercator layout for a zone.
    ///
    /// The atlantic layout uses a zone-dependent false easting of
    /// `500000 + 1000000 * zone`; otherwise the constant 304800 m
    /// easting applies.
    pub fn mtm(zone: u32, atlantic: bool) -> Result<Self> {
        if !(1..=25).contains(&zone) {
            return Err(Error::InvalidMtmZone);
        }
        let mut tm = Self::new(-(zone as f64 * 3. + 49.5))?;
        tm.k0 = 0.9999;
        tm.x0 = if atlantic {
            500_000. + 1_000_000. * zone as f64
        } else {
            304_800.
        };
        Ok(tm)
    }

    pub fn central_meridian(&self) -> f64 {
        self.lon0.to_degrees()
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

    pub fn set_spheroid(&mut self, a: f64, f: f64) -> Result<()> {
        if let Some((sph, _)) = &self.state {
            if sph.a == a && sph.f == f {
                return Ok(());
            }
        }
        let sph = Spheroid::new(a, f)?;
        self.state = Some((sph, MeridianSeries::new(&sph)));
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
        let (sph, en) = self.state.as_ref().ok_or(Error::CalledOutOfSequence)?;

        for p in xy.iter_mut() {
            let lon = p.0.to_radians();
            let lat = p.1.to_radians();

            let (sinlat, coslat) = lat.sin_cos();
            let tanlat = sinlat / coslat;

            let n = sph.prime_vertical_radius(sinlat);
            let t = square(tanlat);
            let c = en.e1sq * square(coslat);
            let q = coslat * (lon - self.lon0);
            let q2 = q * q;
            let q3 = q2 * q;
            let q4 = q3 * q;
            let q5 = q4 * q;
            let q6 = q5 * q;

            let m = sph.a * en.arc(lat);

            p.0 = self.k0
                * n
                * (q + (1. - t + c) * q3 / 6.
                    + (5. - 18. * t + t * t + 72. * c - 58. * en.e1sq) * q5 / 120.)
                + self.x0;
            p.1 = self.k0
                * (m + n
                    * tanlat
                    * (q2 / 2.
                        + (5. - t + 9. * c + 4. * c * c) * q4 / 24.
                        + (61. - 58. * t + t * t + 600. * c - 330. * en.e1sq) * q6 / 720.))
                + self.y0;
        }

        Ok(())
    }

    /// Unproject x/y pairs in place back to (lon, lat) degrees.
    pub fn inverse(&self, xy: &mut [(f64, f64)]) -> Result<()> {
        let (sph, en) = self.state.as_ref().ok_or(Error::CalledOutOfSequence)?;

        for p in xy.iter_mut() {
            let x = p.0 - self.x0;
            let y = p.1 - self.y0;

            let m = y / self.k0;
            let mu = m / (sph.a * en.a0);

            let e1 = en.e1;
            let mut phi1 = mu
                + (3. * e1 / 2. - 27. * e1 * e1 * e1 / 32.) * (2. * mu).sin()
                + (21. * e1 * e1 / 16. - 55. * e1 * e1 * e1 * e1 / 32.) * (4. * mu).sin()
                + (151. * e1 * e1 * e1 / 96.) * (6. * mu).sin();

            // Newton refinement of the footpoint latitude. Hitting
            // the iteration cap degrades this point only.
            let mut iter = 0;
            loop {
                let (s, c) = (2. * phi1).sin_cos();
                let mut eff = en.a0 * phi1 - en.a2 * s - m / sph.a;
                let mut eff1 = en.a0 - 2. * en.a2 * c;

                let (s, c) = (4. * phi1).sin_cos();
                eff += en.a4 * s;
                eff1 += 4. * en.a4 * c;

                let (s, c) = (6. * phi1).sin_cos();
                eff -= en.a6 * s;
                eff1 -= 6. * en.a6 * c;

                let (s, c) = (8. * phi1).sin_cos();
                eff += en.a8 * s;
                eff1 -= 8. * en.a8 * c;

                let delta = eff / eff1;
                phi1 -= delta;

                iter += 1;
                if delta.abs() <= self.tol.errmax || iter >= self.tol.maxiter {
                    break;
                }
            }

            let (sinphi, cosphi) = phi1.sin_cos();
            let tanphi = sinphi / cosphi;

            let n1 = sph.prime_vertical_radius(sinphi);
            let t1 = square(tanphi);
            let c1 = en.e1sq * square(cosphi);
            let r1 = sph.a * (1. - sph.es) / (1. - sph.es * square(sinphi)).powf(1.5);
            let d = x / (n1 * self.k0);
            let d2 = d * d;
            let d3 = d2 * d;
            let d4 = d3 * d;
            let d5 = d4 * d;
            let d6 = d5 * d;

            let lat = phi1
                - (n1 * tanphi / r1)
                    * (d2 / 2. - (5. + 3. * t1 + 10. * c1 - 4. * c1 * c1 - 9. * en.e1sq) * d4 / 24.
                        + (61. + 90. * t1 + 298. * c1 + 45. * t1 * t1
                            - 252. * en.e1sq
                            - 3. * c1 * c1)
                            * d6
                            / 720.);

            let lon = (d - (1. + 2. * t1 + c1) * d3 / 6.
                + (5. - 2. * c1 + 28. * t1 - 3. * c1 * c1 + 8. * en.e1sq + 24. * t1 * t1) * d5
                    / 120.)
                / cosphi;

            p.0 = (lon + self.lon0).to_degrees();
            p.1 = lat.to_degrees();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datums::Datum;
    use approx::assert_abs_diff_eq;

    fn with_datum(mut tm: TransverseMercator, datum: Datum) -> TransverseMercator {
        let (a, f) = datum.spheroid();
        tm.set_spheroid(a, f).unwrap();
        tm
    }

    #[test]
    fn utm_zone_layout() {
        let tm = TransverseMercator::utm(17, true).unwrap();
        assert_abs_diff_eq!(tm.central_meridian(), -81.0);
        assert_abs_diff_eq!(tm.scale_factor(), 0.9996);
        assert_abs_diff_eq!(tm.false_easting(), 500_000.);
        assert_abs_diff_eq!(tm.false_northing(), 0.);

        let tm = TransverseMercator::utm(20, false).unwrap();
        assert_abs_diff_eq!(tm.false_northing(), 10_000_000.);

        assert!(TransverseMercator::utm(0, true).is_err());
        assert!(TransverseMercator::utm(61, true).is_err());
    }

    #[test]
    fn mtm_zone_layout() {
        let tm = TransverseMercator::mtm(5, true).unwrap();
        assert_abs_diff_eq!(tm.central_meridian(), -64.5);
        assert_abs_diff_eq!(tm.scale_factor(), 0.9999);
        assert_abs_diff_eq!(tm.false_easting(), 5_500_000.);

        let tm = TransverseMercator::mtm(8, false).unwrap();
        assert_abs_diff_eq!(tm.false_easting(), 304_800.);

        assert!(TransverseMercator::mtm(26, true).is_err());
    }

    #[test]
    fn utm17_nad83_anchor() {
        let tm = with_datum(TransverseMercator::utm(17, true).unwrap(), Datum::Nad83);
        let mut pts = [(-79.0, 43.0)];
        tm.forward(&mut pts).unwrap();
        assert_abs_diff_eq!(pts[0].0, 663_019.0700848296, epsilon = 1e-4);
        assert_abs_diff_eq!(pts[0].1, 4_762_755.641967547, epsilon = 1e-4);
    }

    #[test]
    fn mtm5_atlantic_nad83_anchor() {
        let tm = with_datum(TransverseMercator::mtm(5, true).unwrap(), Datum::Nad83);
        // On the central meridian: easting is exactly the zone's
        // false easting, northing is the scaled meridional arc.
        let mut pts = [(-64.5, 45.0), (-63.2, 44.65)];
        tm.forward(&mut pts).unwrap();
        assert_abs_diff_eq!(pts[0].0, 5_500_000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(pts[0].1, 4_984_445.883913348, epsilon = 1e-4);
        assert_abs_diff_eq!(pts[1].0, 5_603_112.806399377, epsilon = 1e-4);
        assert_abs_diff_eq!(pts[1].1, 4_946_377.0091078505, epsilon = 1e-4);
    }

    #[test]
    fn utm20_nad27_anchor() {
        let tm = with_datum(TransverseMercator::utm(20, true).unwrap(), Datum::Nad27);
        let mut pts = [(-66.0, 46.0)];
        tm.forward(&mut pts).unwrap();
        assert_abs_diff_eq!(pts[0].0, 267_699.6322621965, epsilon = 1e-4);
        assert_abs_diff_eq!(pts[0].1, 5_098_206.240935814, epsilon = 1e-4);
    }

    #[test]
    fn round_trip_within_tolerance() {
        let tm = with_datum(TransverseMercator::utm(20, true).unwrap(), Datum::Nad83);
        let inputs = [(-66.0, 46.0), (-63.5, 44.2), (-61.1, 47.9)];
        let mut pts = inputs;
        tm.forward(&mut pts).unwrap();
        tm.inverse(&mut pts).unwrap();
        for (out, exp) in pts.iter().zip(inputs.iter()) {
            assert_abs_diff_eq!(out.0, exp.0, epsilon = 1e-9);
            assert_abs_diff_eq!(out.1, exp.1, epsilon = 1e-9);
        }
    }

    #[test]
    fn round_trip_high_precision() {
        let mut tm = with_datum(TransverseMercator::mtm(5, true).unwrap(), Datum::Nad83);
        tm.set_high_precision(true);
        let inputs = [(-64.4, 45.2), (-64.6, 46.8)];
        let mut pts = inputs;
        tm.forward(&mut pts).unwrap();
        tm.inverse(&mut pts).unwrap();
        for (out, exp) in pts.iter().zip(inputs.iter()) {
            assert_abs_diff_eq!(out.0, exp.0, epsilon = 1e-9);
            assert_abs_diff_eq!(out.1, exp.1, epsilon = 1e-9);
        }
    }

    #[test]
    fn requires_spheroid() {
        let tm = TransverseMercator::utm(20, true).unwrap();
        let mut pts = [(-66.0, 46.0)];
        assert!(matches!(
            tm.forward(&mut pts),
            Err(Error::CalledOutOfSequence)
        ));
    }
}
