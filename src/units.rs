//!
//! Predefined linear units for projected coordinate systems
//!

const M_PER_FT: f64 = 0.3048;
const M_PER_US_FT: f64 = 12. / 39.37;

/// Static units table: accepted spellings and meters per unit.
#[rustfmt::skip]
const UNITS: [(&str, f64); 22] = [
    ("meters",          1.),
    ("metres",          1.),
    ("m",               1.),
    ("kilometers",      1000.),
    ("kilometres",      1000.),
    ("km",              1000.),
    ("centimeters",     0.01),
    ("centimetres",     0.01),
    ("cm",              0.01),
    ("feet",            M_PER_FT),
    ("ft",              M_PER_FT),
    ("yards",           M_PER_FT * 3.),
    ("yd",              M_PER_FT * 3.),
    ("miles",           M_PER_FT * 5280.),
    ("mi",              M_PER_FT * 5280.),
    ("inches",          M_PER_FT / 12.),
    ("in",              M_PER_FT / 12.),
    ("us_survey_feet",  M_PER_US_FT),
    ("us_survey_ft",    M_PER_US_FT),
    ("us_ft",           M_PER_US_FT),
    ("fathoms",         M_PER_FT * 6.),
    ("fathom",          M_PER_FT * 6.),
];

/// Meters per unit for a unit name, `None` when unrecognized.
pub fn meters_per_unit(name: &str) -> Option<f64> {
    UNITS
        .iter()
        .find(|(id, _)| id.eq_ignore_ascii_case(name))
        .map(|(_, to_meter)| *to_meter)
}
