//!
//! NTv2 datum grid shifting
//!
//! A [`GridShift`] owns at most one open grid file and applies the
//! shift to batches of (lon, lat) degree pairs. Consecutive vertices
//! tend to fall in the same sub-grid, so the sub-grid that won the
//! last lookup is remembered between points and between batches.
//!

mod file;

pub use file::GridFile;

use crate::errors::{Error, Result};
use std::path::Path;

/// Degrees to NTv2 arc-seconds: longitudes are positive west.
const LON_TO_SEC: f64 = -3600.;
const LAT_TO_SEC: f64 = 3600.;

#[derive(Debug, Default)]
pub struct GridShift {
    file: Option<GridFile>,
    hint: Option<usize>,
    high_precision: bool,
}

impl GridShift {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a grid file, replacing any previously open one. When
    /// expected datum names are given they must match the file's.
    pub fn open(
        &mut self,
        path: &Path,
        expect_from: Option<&str>,
        expect_to: Option<&str>,
    ) -> Result<()> {
        self.hint = None;
        self.file = Some(GridFile::open(path, expect_from, expect_to)?);
        Ok(())
    }

    pub fn close(&mut self) {
        self.file = None;
        self.hint = None;
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn file(&self) -> Option<&GridFile> {
        self.file.as_ref()
    }

    /// High-precision mode raises the reverse iteration count.
    pub fn set_high_precision(&mut self, on: bool) {
        self.high_precision = on;
    }

    /// Apply the shift once to every (lon, lat) degree pair.
    ///
    /// A point outside every sub-grid is left unchanged and the
    /// batch continues; the error is reported once at the end.
    pub fn forward(&mut self, xy: &mut [(f64, f64)]) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::CalledOutOfSequence)?;

        let mut failed = false;
        for p in xy.iter_mut() {
            let x = p.0 * LON_TO_SEC;
            let y = p.1 * LAT_TO_SEC;

            match file.eval(x, y, self.hint) {
                Ok(shift) => {
                    self.hint = Some(shift.subgrid);
                    p.0 = (x + shift.dlon) / LON_TO_SEC;
                    p.1 = (y + shift.dlat) / LAT_TO_SEC;
                }
                Err(_) => {
                    failed = true;
                    self.hint = None;
                }
            }
        }

        if failed {
            Err(Error::PointOutsideShiftArea)
        } else {
            Ok(())
        }
    }

    /// Undo the shift: for each already-shifted point find the point
    /// whose forward shift produces it.
    ///
    /// The shift field is not a simple inverse map, so the point is
    /// recovered by fixed-point iteration. A lookup failure at any
    /// step aborts the whole batch.
    pub fn reverse(&mut self, xy: &mut [(f64, f64)]) -> Result<()> {
        let file = self.file.as_ref().ok_or(Error::CalledOutOfSequence)?;

        let iterations = if self.high_precision { 12 } else { 4 };

        for p in xy.iter_mut() {
            let x = p.0 * LON_TO_SEC;
            let y = p.1 * LAT_TO_SEC;

            let mut shift = match file.eval(x, y, self.hint) {
                Ok(s) => s,
                Err(e) => {
                    self.hint = None;
                    return Err(e);
                }
            };
            self.hint = Some(shift.subgrid);

            for _ in 0..iterations {
                // where would the forward shift from there land?
                let xw = x - shift.dlon;
                let yw = y - shift.dlat;
                shift = match file.eval(xw, yw, self.hint) {
                    Ok(s) => s,
                    Err(e) => {
                        self.hint = None;
                        return Err(e);
                    }
                };
                self.hint = Some(shift.subgrid);
            }

            p.0 = (x - shift.dlon) / LON_TO_SEC;
            p.1 = (y - shift.dlat) / LAT_TO_SEC;
        }

        Ok(())
    }
}
