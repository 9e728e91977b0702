//!
//! Coordinate-system spec parsing
//!
//! One side of a transformation is described as
//! `projection,datum[,units]`, e.g. `utm20,nad27` or `mtm5,nad83,ft`.
//! A bare datum means geographic coordinates. Recognized projections:
//! `utm<zone>[s]`, `mtm<zone>[q]`, `tm<central_lon>`, `nbds`,
//! `peids`, `geo`.
//!
//! Non-default units fold into the projection: the scale factor is
//! divided by the meters-per-unit factor and, unless explicitly
//! overridden, the default false offsets are rescaled from meters to
//! the chosen unit. User-supplied offsets are taken verbatim in the
//! user-supplied units.
//!

use crate::datums::Datum;
use crate::errors::{Error, Result};
use crate::projections::{DoubleStereographic, Projection, TransverseMercator};
use crate::units;

/// A fully configured side of the transformation.
#[derive(Debug)]
pub struct CoordSys {
    pub projection: Projection,
    pub datum: Datum,
}

/// Build a coordinate system from its spec and the optional
/// command-line overrides (`x,y` false offsets and scale factor).
pub fn build_coordsys(
    spec: &str,
    offsets: Option<&str>,
    scale: Option<&str>,
) -> Result<CoordSys> {
    let mut tokens = spec.split([',', ';']).map(str::trim);

    let first = tokens
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(Error::InvalidParameterValue("empty coordinate system"))?;
    let (proj_token, datum_token) = match tokens.next().filter(|s| !s.is_empty()) {
        Some(datum) => (first, datum),
        None => ("geo", first),
    };
    let units_token = tokens.next().filter(|s| !s.is_empty());

    let datum =
        Datum::find(datum_token).ok_or_else(|| Error::UnrecognizedDatum(datum_token.into()))?;

    let mut projection = parse_projection(proj_token, datum)?;
    let (a, f) = datum.spheroid();
    projection.set_spheroid(a, f)?;

    let mut unit_fact = 1.;
    if let Some(unit) = units_token {
        if projection.is_null() {
            return Err(Error::InvalidParameterValue(
                "units cannot be overridden for geographic coordinates",
            ));
        }
        unit_fact =
            units::meters_per_unit(unit).ok_or_else(|| Error::UnrecognizedUnits(unit.into()))?;
    }

    if let Some(off) = offsets {
        if projection.is_null() {
            return Err(Error::InvalidParameterValue(
                "false offsets cannot be specified for geographic coordinates",
            ));
        }
        // Missing halves keep the (rescaled) defaults.
        let mut parts = off.split([',', ';']).map(str::trim);
        let x0 = match parts.next().filter(|s| !s.is_empty()) {
            Some(t) => parse_f64(t, "invalid false easting")?,
            None => projection.false_easting() / unit_fact,
        };
        let y0 = match parts.next().filter(|s| !s.is_empty()) {
            Some(t) => parse_f64(t, "invalid false northing")?,
            None => projection.false_northing() / unit_fact,
        };
        projection.set_false_offsets(x0, y0)?;
    } else if unit_fact != 1. {
        let x0 = projection.false_easting() / unit_fact;
        let y0 = projection.false_northing() / unit_fact;
        projection.set_false_offsets(x0, y0)?;
    }

    if let Some(scale) = scale {
        if projection.is_null() {
            return Err(Error::InvalidParameterValue(
                "scale factor cannot be specified for geographic coordinates",
            ));
        }
        let k0 = parse_f64(scale.trim(), "invalid scale factor")?;
        if k0 <= 0. {
            return Err(Error::InvalidParameterValue("invalid scale factor"));
        }
        projection.set_scale_factor(k0)?;
    }

    if unit_fact != 1. {
        // Shoehorn the unit factor into the scale factor: it applies
        // to both axes right where the false offsets come in.
        let k0 = projection.scale_factor() / unit_fact;
        projection.set_scale_factor(k0)?;
    }

    Ok(CoordSys { projection, datum })
}

fn parse_projection(token: &str, datum: Datum) -> Result<Projection> {
    let lower = token.to_ascii_lowercase();

    if lower == "nbds" {
        let mut ds = DoubleStereographic::new_brunswick();
        let (x0, y0) = match datum {
            Datum::Nad83 => (2_500_000., 7_500_000.),
            _ => (300_000., 800_000.),
        };
        ds.set_false_offsets(x0, y0);
        Ok(Projection::DoubleStereographic(ds))
    } else if lower == "peids" {
        let mut ds = DoubleStereographic::prince_edward_island();
        let (x0, y0) = match datum {
            Datum::Nad27 => (300_000., 300_000.),
            Datum::Ats77 => (700_000., 400_000.),
            Datum::Nad83 => (400_000., 800_000.),
        };
        ds.set_false_offsets(x0, y0);
        Ok(Projection::DoubleStereographic(ds))
    } else if let Some(rest) = lower.strip_prefix("utm") {
        let (digits, southern) = match rest.strip_suffix('s') {
            Some(digits) => (digits, true),
            None => (rest, false),
        };
        let zone = digits.parse().map_err(|_| Error::InvalidUtmZone)?;
        Ok(Projection::TransverseMercator(TransverseMercator::utm(
            zone, !southern,
        )?))
    } else if let Some(rest) = lower.strip_prefix("mtm") {
        // the 'q' suffix selects the constant 304800 m easting
        // instead of the atlantic zone-dependent layout
        let (digits, constant) = match rest.strip_suffix('q') {
            Some(digits) => (digits, true),
            None => (rest, false),
        };
        let zone = digits.parse().map_err(|_| Error::InvalidMtmZone)?;
        Ok(Projection::TransverseMercator(TransverseMercator::mtm(
            zone, !constant,
        )?))
    } else if lower.starts_with("geo") {
        Ok(Projection::Null)
    } else if let Some(rest) = lower.strip_prefix("tm") {
        let central = rest
            .parse()
            .map_err(|_| Error::UnrecognizedProjection(token.into()))?;
        let mut tm = TransverseMercator::new(central)?;
        tm.set_scale_factor(0.9999)?;
        tm.set_false_offsets(304_800., 0.);
        Ok(Projection::TransverseMercator(tm))
    } else {
        Err(Error::UnrecognizedProjection(token.into()))
    }
}

fn parse_f64(token: &str, what: &'static str) -> Result<f64> {
    token
        .parse()
        .map_err(|_| Error::InvalidParameterValue(what))
}
