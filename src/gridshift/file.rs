//!
//! NTv2 grid-shift file reader
//!
//! The file is a sequence of 16-byte records, each an 8-byte ASCII
//! label followed by an 8-byte value interpreted as int, double or
//! ASCII depending on the label. Numeric values are little-endian.
//! An overview block is followed by one header block plus data
//! records per sub-grid. Sub-grids form a forest: `PARENT` names the
//! enclosing sub-grid, the literal `NONE` marks a top-level grid.
//!
//! Coordinates are in arc-seconds with longitudes positive WEST, so
//! the numeric longitude range of a sub-grid runs from `E_LONG` (the
//! lower bound) to `W_LONG` (the upper bound).
//!

use crate::errors::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

const RECORD_SIZE: usize = 16;
const OVERVIEW_RECORDS: usize = 11;

/// A view over one 16-byte file record.
struct Record<'a>(&'a [u8]);

impl Record<'_> {
    fn has_label(&self, name: &str) -> bool {
        let mut padded = [b' '; 8];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        self.0[..8] == padded
    }

    fn int(&self) -> i32 {
        i32::from_le_bytes(self.0[8..12].try_into().unwrap())
    }

    fn double(&self) -> f64 {
        f64::from_le_bytes(self.0[8..16].try_into().unwrap())
    }

    /// Value as ASCII text with trailing blanks and NULs trimmed.
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0[8..16])
            .trim_end_matches([' ', '\0'])
            .to_string()
    }
}

/// One rectangular sub-grid of the shift lattice.
#[derive(Debug)]
pub(crate) struct SubGrid {
    pub name: String,
    pub parent: String,
    /// Bounds and cell sizes in arc-seconds (longitude positive west)
    pub south: f64,
    pub north: f64,
    pub west: f64,
    pub east: f64,
    pub dlat: f64,
    pub dlon: f64,
    pub nrows: usize,
    pub ncols: usize,
    /// 0-based record index of the first data record
    pub astart: usize,
    pub children: Vec<usize>,
}

impl SubGrid {
    fn contains_half_open(&self, lon: f64, lat: f64) -> bool {
        lat >= self.south && lat < self.north && lon >= self.west && lon < self.east
    }

    fn contains_closed(&self, lon: f64, lat: f64) -> bool {
        lat >= self.south && lat <= self.north && lon >= self.west && lon <= self.east
    }

    /// Which boundaries the point touches: bit 0 for the north edge,
    /// bit 1 for the east edge.
    fn edge_flags(&self, lon: f64, lat: f64) -> u8 {
        (lat == self.north) as u8 | (((lon == self.east) as u8) << 1)
    }
}

/// Interpolated shift at a point, in arc-seconds.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Shift {
    pub subgrid: usize,
    pub dlat: f64,
    pub dlon: f64,
}

/// An open NTv2 grid-shift file.
///
/// Sub-grid descriptors live in a flat array; the parent/child
/// relation is expressed with index lists, top-level grids in a
/// separate list. The data area stays in the memory map.
#[derive(Debug)]
pub struct GridFile {
    subgrids: Vec<SubGrid>,
    top: Vec<usize>,
    from_datum: String,
    to_datum: String,
    map: Mmap,
}

impl GridFile {
    /// Open and validate a grid file. When expected datum names are
    /// given, the file's `SYSTEM_F`/`SYSTEM_T` must match exactly.
    pub fn open(
        path: &Path,
        expect_from: Option<&str>,
        expect_to: Option<&str>,
    ) -> Result<Self> {
        let file = File::open(path)?;
        let map = unsafe { Mmap::map(&file)? };
        let nrecs = map.len() / RECORD_SIZE;

        let head = record_at(&map, 1)?;
        if !head.has_label("NUM_OREC") {
            return Err(Error::InvalidGridFormat("bad overview header"));
        }
        let norecs = head.int();
        if norecs < OVERVIEW_RECORDS as i32 {
            return Err(Error::InvalidGridFormat("bad overview header"));
        }

        let nfiles = record_at(&map, 3)?.int();
        if nfiles < 1 {
            return Err(Error::InvalidGridFormat("no sub-grids"));
        }

        let from_datum = record_at(&map, 6)?.text();
        let to_datum = record_at(&map, 7)?.text();
        if expect_from.is_some_and(|d| d != from_datum)
            || expect_to.is_some_and(|d| d != to_datum)
        {
            return Err(Error::GridDatumMismatch);
        }

        let mut subgrids = Vec::with_capacity(nfiles as usize);
        let mut count = norecs as usize;
        for _ in 0..nfiles {
            count += 1;
            let r = record_at(&map, count)?;
            if !r.has_label("SUB_NAME") {
                return Err(Error::InvalidGridFormat("missing SUB_NAME"));
            }
            let name = r.text();
            count += 1;
            let parent = record_at(&map, count)?.text();
            count += 3; // skip CREATED and UPDATED

            // S_LAT, N_LAT, E_LONG, W_LONG, LAT_INC, LONG_INC
            let mut limits = [0f64; 6];
            for v in limits.iter_mut() {
                *v = record_at(&map, count)?.double();
                count += 1;
            }
            let [south, north, west, east, dlat, dlon] = limits;
            if dlat <= 0. || dlon <= 0. {
                return Err(Error::InvalidGridFormat("bad cell size"));
            }

            let gs_count = record_at(&map, count)?.int();
            if gs_count <= 0 {
                return Err(Error::InvalidGridFormat("bad GS_COUNT"));
            }
            let gs_count = gs_count as usize;

            let nrows = ((north - south) / dlat + 1e-10) as usize + 1;
            let ncols = ((east - west) / dlon + 1e-10) as usize + 1;
            if gs_count != nrows * ncols {
                return Err(Error::InvalidGridFormat("GS_COUNT not matching"));
            }

            let astart = count; // count is 1-based, astart 0-based
            count += gs_count;
            if count > nrecs {
                return Err(Error::InvalidGridFormat("truncated data area"));
            }

            subgrids.push(SubGrid {
                name,
                parent,
                south,
                north,
                west,
                east,
                dlat,
                dlon,
                nrows,
                ncols,
                astart,
                children: Vec::new(),
            });
        }

        let top = if subgrids.len() == 1 {
            vec![0]
        } else {
            let top: Vec<usize> = subgrids
                .iter()
                .enumerate()
                .filter(|(_, g)| g.parent == "NONE")
                .map(|(i, _)| i)
                .collect();
            if top.is_empty() {
                return Err(Error::InvalidGridFormat("no top-level grid"));
            }

            let children: Vec<Vec<usize>> = subgrids
                .iter()
                .map(|g| {
                    subgrids
                        .iter()
                        .enumerate()
                        .filter(|(_, c)| c.parent != "NONE" && c.parent == g.name)
                        .map(|(j, _)| j)
                        .collect()
                })
                .collect();
            for (g, ch) in subgrids.iter_mut().zip(children) {
                g.children = ch;
            }
            top
        };

        Ok(Self {
            subgrids,
            top,
            from_datum,
            to_datum,
            map,
        })
    }

    pub fn from_datum(&self) -> &str {
        &self.from_datum
    }

    pub fn to_datum(&self) -> &str {
        &self.to_datum
    }

    pub(crate) fn subgrid_count(&self) -> usize {
        self.subgrids.len()
    }

    /// Locate the deepest sub-grid containing the point, returning
    /// its index and the boundary flags of the match.
    ///
    /// The hinted sub-grid, when it still contains the point, seeds
    /// the descent so that runs of nearby points skip the top-level
    /// scan.
    pub(crate) fn find(&self, lon: f64, lat: f64, hint: Option<usize>) -> Option<(usize, u8)> {
        if self.subgrids.len() == 1 {
            let g = &self.subgrids[0];
            return g
                .contains_closed(lon, lat)
                .then(|| (0, g.edge_flags(lon, lat)));
        }

        // Greedy descent over half-open rectangles: the first child
        // containing the point becomes the current match.
        let mut found = None;
        let hinted = hint
            .filter(|&h| h < self.subgrids.len() && self.subgrids[h].contains_half_open(lon, lat));
        let mut list: &[usize] = match &hinted {
            Some(h) => std::slice::from_ref(h),
            None => &self.top,
        };
        'descend: loop {
            for &i in list {
                if self.subgrids[i].contains_half_open(lon, lat) {
                    found = Some(i);
                    if self.subgrids[i].children.is_empty() {
                        break 'descend;
                    }
                    list = &self.subgrids[i].children;
                    continue 'descend;
                }
            }
            break;
        }
        if let Some(i) = found {
            return Some((i, 0));
        }

        // The point touches a north or east boundary somewhere (or
        // lies outside every grid). Walk again on closed rectangles,
        // preferring the smallest edge-flag value among siblings,
        // first match winning ties. A sibling matching its parent's
        // flags cannot be beaten, so the scan short-circuits.
        let mut found: Option<(usize, u8)> = None;
        let mut parent_limit = 1u8;
        let mut list = &self.top[..];
        loop {
            let mut best: Option<(usize, u8)> = None;
            for &i in list {
                let g = &self.subgrids[i];
                if !g.contains_closed(lon, lat) {
                    continue;
                }
                let limit = g.edge_flags(lon, lat);
                if best.map_or(true, |(_, b)| limit < b) {
                    best = Some((i, limit));
                    if limit == parent_limit {
                        break;
                    }
                }
            }
            let Some((i, limit)) = best else { break };
            found = Some((i, limit));
            if self.subgrids[i].children.is_empty() {
                break;
            }
            list = &self.subgrids[i].children;
            parent_limit = limit;
        }
        found
    }

    /// Bilinearly interpolate the lat/lon shift at a point given in
    /// arc-seconds (longitude positive west).
    pub(crate) fn eval(&self, lon: f64, lat: f64, hint: Option<usize>) -> Result<Shift> {
        let (idx, limflag) = self
            .find(lon, lat, hint)
            .ok_or(Error::PointOutsideShiftArea)?;
        let g = &self.subgrids[idx];

        // A point on the north edge collapses to the last row with a
        // zero fraction; same for the east edge and the last column.
        let (mut row, mut ns_frac) = (g.nrows - 1, 0.);
        if limflag & 1 == 0 {
            let t = (lat - g.south) / g.dlat;
            let i = t.trunc();
            ns_frac = t - i;
            row = (i + 1e-12) as usize;
        }
        let (mut col, mut ew_frac) = (g.ncols - 1, 0.);
        if limflag & 2 == 0 {
            let t = (lon - g.west) / g.dlon;
            let i = t.trunc();
            ew_frac = t - i;
            col = (i + 1e-12) as usize;
        }

        let base = g.astart + row * g.ncols + col;
        let north_off = if ns_frac > 1e-12 { g.ncols } else { 0 };
        let east_off = if ew_frac > 1e-12 { 1 } else { 0 };

        let (se_lat, se_lon) = self.shift_record(base)?;
        let (sw_lat, sw_lon) = self.shift_record(base + east_off)?;
        let (ne_lat, ne_lon) = self.shift_record(base + north_off)?;
        let (nw_lat, nw_lon) = self.shift_record(base + north_off + east_off)?;

        let sval = se_lat + (sw_lat - se_lat) * ew_frac;
        let nval = ne_lat + (nw_lat - ne_lat) * ew_frac;
        let dlat = sval + (nval - sval) * ns_frac;

        let sval = se_lon + (sw_lon - se_lon) * ew_frac;
        let nval = ne_lon + (nw_lon - ne_lon) * ew_frac;
        let dlon = sval + (nval - sval) * ns_frac;

        Ok(Shift { subgrid: idx, dlat, dlon })
    }

    /// The two little-endian `f32` shift values of a data record;
    /// the trailing accuracy estimates are not read.
    fn shift_record(&self, rec: usize) -> Result<(f64, f64)> {
        let bytes = self
            .map
            .get(rec * RECORD_SIZE..rec * RECORD_SIZE + 8)
            .ok_or(Error::InvalidGridFormat("data record out of range"))?;
        Ok((
            f32::from_le_bytes(bytes[0..4].try_into().unwrap()) as f64,
            f32::from_le_bytes(bytes[4..8].try_into().unwrap()) as f64,
        ))
    }
}

/// The 1-based `idx`th record of the file.
fn record_at(map: &[u8], idx: usize) -> Result<Record<'_>> {
    map.get((idx - 1) * RECORD_SIZE..idx * RECORD_SIZE)
        .map(Record)
        .ok_or(Error::InvalidGridFormat("truncated file"))
}
