//!
//! Overall dataset transformation, including reprojection and datum
//! shifting of every record of a shapefile
//!
//! The per-vertex pipeline is: inverse-project to geographic
//! coordinates on the source spheroid, shift onto NAD83 through the
//! source grid file, reverse-shift onto the target datum through the
//! target grid file, forward-project onto the target system.
//!
//! In-place mode rewrites the .shp through a writable memory map.
//! New-file mode streams records through buffered I/O and copies the
//! .dbf attribute file on a background thread while the driver does
//! the CPU work.
//!

use crate::errors::{Error, Result};
use crate::gridshift::GridShift;
use crate::projections::Projection;
use crate::shapefile::{self, BBox, IndexEntry, HEADER_LEN};
use log::{debug, warn};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Outcome of a completed run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunReport {
    pub records: u64,
    pub points: u64,
    /// Records whose transform failed; their coordinates may be
    /// left partly transformed.
    pub record_errors: u64,
}

/// A transformation session: the source and target coordinate
/// systems, the optional grid shifters tying their datums to NAD83,
/// and the cooperative cancel flag.
#[derive(Debug)]
pub struct Session {
    source: Projection,
    target: Projection,
    source_shift: Option<GridShift>,
    target_shift: Option<GridShift>,
    cancel: Arc<AtomicBool>,
}

impl Session {
    pub fn new(source: Projection, target: Projection) -> Self {
        Self {
            source,
            target,
            source_shift: None,
            target_shift: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Grid shifter applied forward (source datum onto NAD83).
    pub fn set_source_shift(&mut self, shift: GridShift) {
        self.source_shift = Some(shift);
    }

    /// Grid shifter applied in reverse (NAD83 onto target datum).
    pub fn set_target_shift(&mut self, shift: GridShift) {
        self.target_shift = Some(shift);
    }

    pub fn set_high_precision(&mut self, on: bool) {
        self.source.set_high_precision(on);
        self.target.set_high_precision(on);
        if let Some(gs) = self.source_shift.as_mut() {
            gs.set_high_precision(on);
        }
        if let Some(gs) = self.target_shift.as_mut() {
            gs.set_high_precision(on);
        }
    }

    /// The cancel flag; raising it makes the driver return
    /// [`Error::Cancelled`] at the next record boundary.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.load(Ordering::Relaxed) {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Transform `input` into new .shp/.shx files at `output`,
    /// copying the .dbf verbatim. Incomplete output files are
    /// removed on any failure.
    pub fn run(&mut self, input: &Path, output: &Path) -> Result<RunReport> {
        let out = OutputPaths::new(output);
        match self.run_copy(input, &out) {
            Ok(report) => Ok(report),
            Err(err) => {
                // Files that were already there when we started are
                // not ours to delete.
                if !matches!(
                    err,
                    Error::OutputExists(_) | Error::CannotCreate(_) | Error::InputNotFound(_)
                ) {
                    out.remove_partial();
                }
                Err(err)
            }
        }
    }

    fn run_copy(&mut self, input: &Path, out: &OutputPaths) -> Result<RunReport> {
        self.check_cancel()?;

        let mut shp_in = BufReader::new(open_input(&input.with_extension("shp"))?);
        let mut shp_head = [0u8; HEADER_LEN];
        shp_in
            .read_exact(&mut shp_head)
            .map_err(|_| Error::BadShapeHeader)?;
        shapefile::check_header(&shp_head)?;

        let mut shx_in = BufReader::new(open_input(&input.with_extension("shx"))?);
        let mut shx_head = [0u8; HEADER_LEN];
        shx_in
            .read_exact(&mut shx_head)
            .map_err(|_| Error::BadShapeHeader)?;
        shapefile::check_header(&shx_head)?;

        let mut shp_out = BufWriter::new(create_output(&out.shp)?);
        shp_out.write_all(&shp_head)?;
        let mut shx_out = BufWriter::new(create_output(&out.shx)?);
        shx_out.write_all(&shx_head)?;

        self.check_cancel()?;

        // Copy the attribute file while the record loop burns CPU.
        let dbf_in = input.with_extension("dbf");
        let dbf_out = out.dbf.clone();
        let copier = thread::spawn(move || copy_attribute_file(&dbf_in, &dbf_out));

        let loop_result =
            self.copy_records(&mut shp_in, &mut shx_in, shp_out, shx_out, &shx_head);

        let copy_result = copier
            .join()
            .unwrap_or_else(|_| Err(Error::CannotCreate(out.dbf.display().to_string())));

        let report = loop_result?;
        copy_result?;
        Ok(report)
    }

    fn copy_records(
        &mut self,
        shp_in: &mut BufReader<File>,
        shx_in: &mut BufReader<File>,
        mut shp_out: BufWriter<File>,
        mut shx_out: BufWriter<File>,
        shx_head: &[u8],
    ) -> Result<RunReport> {
        let nrecs = records_in_index(shx_head);

        let mut report = RunReport::default();
        let mut file_bbox: Option<BBox> = None;
        let mut rec_buf: Vec<u8> = Vec::new();
        let mut pts: Vec<(f64, f64)> = Vec::new();
        let mut out_pos = HEADER_LEN as u64;

        for _ in 0..nrecs {
            self.check_cancel()?;

            let mut entry_bytes = [0u8; 8];
            shx_in.read_exact(&mut entry_bytes)?;
            let entry = IndexEntry::parse(&entry_bytes);

            shp_in.seek(SeekFrom::Start(entry.byte_offset() as u64))?;
            rec_buf.resize(entry.record_len(), 0);
            shp_in.read_exact(&mut rec_buf)?;

            self.transform_record(&mut rec_buf[8..], &mut pts, &mut file_bbox, &mut report)?;

            let new_entry = IndexEntry {
                offset_words: (out_pos / 2) as u32,
                content_words: entry.content_words,
            };
            shx_out.write_all(&new_entry.to_bytes())?;
            shp_out.write_all(&rec_buf)?;
            out_pos += rec_buf.len() as u64;

            report.records += 1;
        }

        self.check_cancel()?;

        // Rewrite the length and bounding-box header fields.
        let mut shp_file = shp_out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        shp_file.seek(SeekFrom::Start(24))?;
        shp_file.write_all(&((out_pos / 2) as i32).to_be_bytes())?;

        let mut shx_file = shx_out.into_inner().map_err(|e| Error::Io(e.into_error()))?;
        if let Some(bbox) = &file_bbox {
            shp_file.seek(SeekFrom::Start(36))?;
            shp_file.write_all(&bbox.to_le_bytes())?;
            shx_file.seek(SeekFrom::Start(36))?;
            shx_file.write_all(&bbox.to_le_bytes())?;
        }

        Ok(report)
    }

    /// Transform the dataset in place through a writable memory map.
    pub fn run_in_place(&mut self, input: &Path) -> Result<RunReport> {
        let mut changed = false;
        let result = self.run_in_place_inner(input, &mut changed);
        if result.is_err() && changed {
            warn!(
                "aborted part-way through an in-place conversion: \
                 parts of {} were already modified and the file may be corrupt",
                input.display()
            );
        }
        result
    }

    fn run_in_place_inner(&mut self, input: &Path, changed: &mut bool) -> Result<RunReport> {
        self.check_cancel()?;

        let shp_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(input.with_extension("shp"))
            .map_err(map_input_err(input))?;
        let mut map = unsafe { MmapMut::map_mut(&shp_file)? };
        if map.len() < HEADER_LEN {
            return Err(Error::BadShapeHeader);
        }
        shapefile::check_header(&map[..HEADER_LEN])?;

        let mut shx_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(input.with_extension("shx"))
            .map_err(map_input_err(input))?;
        let mut shx_bytes = Vec::new();
        shx_file.read_to_end(&mut shx_bytes)?;
        if shx_bytes.len() < HEADER_LEN {
            return Err(Error::BadShapeHeader);
        }
        shapefile::check_header(&shx_bytes)?;

        let nrecs = records_in_index(&shx_bytes[..HEADER_LEN]);
        if shx_bytes.len() < HEADER_LEN + nrecs * 8 {
            return Err(Error::BadShapeHeader);
        }

        let mut report = RunReport::default();
        let mut file_bbox: Option<BBox> = None;
        let mut pts: Vec<(f64, f64)> = Vec::new();

        for i in 0..nrecs {
            self.check_cancel()?;

            let entry = IndexEntry::parse(&shx_bytes[HEADER_LEN + 8 * i..]);
            let start = entry.byte_offset();
            let payload = map
                .get_mut(start + 8..start + entry.record_len())
                .ok_or(Error::BadShapeRecord)?;

            let had_points = report.points;
            self.transform_record(payload, &mut pts, &mut file_bbox, &mut report)?;
            if report.points != had_points {
                *changed = true;
            }

            report.records += 1;
        }

        if let Some(bbox) = &file_bbox {
            shapefile::write_header_bbox(&mut map[..HEADER_LEN], bbox);
            shx_file.seek(SeekFrom::Start(36))?;
            shx_file.write_all(&bbox.to_le_bytes())?;
        }
        map.flush()?;

        Ok(report)
    }

    /// Transform one record payload in place: decode the vertices,
    /// run the pipeline, re-encode, refresh the bounding boxes.
    ///
    /// A pipeline failure degrades the record and the batch goes on;
    /// a structurally bad record is fatal.
    fn transform_record(
        &mut self,
        payload: &mut [u8],
        pts: &mut Vec<(f64, f64)>,
        file_bbox: &mut Option<BBox>,
        report: &mut RunReport,
    ) -> Result<()> {
        let Some(layout) = shapefile::vertex_layout(payload)? else {
            return Ok(());
        };
        if layout.num_points == 0 {
            return Ok(());
        }

        shapefile::read_points(payload, &layout, pts);

        if let Err(err) = self.transform_points(pts) {
            report.record_errors += 1;
            debug!("error in record {}: {}", report.records + 1, err);
        }

        shapefile::write_points(payload, &layout, pts);

        if let Some(bbox) = BBox::from_points(pts) {
            shapefile::write_record_bbox(payload, &layout, &bbox);
            match file_bbox {
                Some(fb) => fb.expand(&bbox),
                None => *file_bbox = Some(bbox),
            }
        }

        report.points += layout.num_points as u64;
        Ok(())
    }

    /// Run the pipeline over one vertex array in place.
    ///
    /// A grid-shift failure does not suppress the target projection:
    /// degraded records still end up in the target system.
    fn transform_points(&mut self, pts: &mut [(f64, f64)]) -> Result<()> {
        if !self.source.is_null() {
            self.source.to_lat_long(pts)?;
        }

        let mut grid_err = None;
        if let Some(gs) = self.source_shift.as_mut() {
            if let Err(err) = gs.forward(pts) {
                grid_err = Some(err);
            }
        }
        if grid_err.is_none() {
            if let Some(gs) = self.target_shift.as_mut() {
                if let Err(err) = gs.reverse(pts) {
                    grid_err = Some(err);
                }
            }
        }

        let proj_result = if self.target.is_null() {
            Ok(())
        } else {
            self.target.from_lat_long(pts)
        };

        match grid_err {
            Some(err) => Err(err),
            None => proj_result,
        }
    }
}

struct OutputPaths {
    shp: PathBuf,
    shx: PathBuf,
    dbf: PathBuf,
}

impl OutputPaths {
    fn new(base: &Path) -> Self {
        Self {
            shp: base.with_extension("shp"),
            shx: base.with_extension("shx"),
            dbf: base.with_extension("dbf"),
        }
    }

    /// Remove incomplete outputs after a failed run. Failure to
    /// remove is reported but never replaces the primary error.
    fn remove_partial(&self) {
        for path in [&self.shp, &self.shx, &self.dbf] {
            if let Err(err) = std::fs::remove_file(path) {
                if err.kind() != ErrorKind::NotFound {
                    warn!(
                        "could not remove incomplete output {}: {}",
                        path.display(),
                        err
                    );
                }
            }
        }
    }
}

/// Record count from an index header: the length field counts
/// 16-bit words, each record entry is 8 bytes.
fn records_in_index(shx_head: &[u8]) -> usize {
    let bytes = shapefile::file_length_words(shx_head) as usize * 2;
    bytes.saturating_sub(HEADER_LEN) / 8
}

fn copy_attribute_file(from: &Path, to: &Path) -> Result<()> {
    let mut input = open_input(from)?;
    let mut output = create_output(to)?;
    std::io::copy(&mut input, &mut output)?;
    Ok(())
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| {
        if err.kind() == ErrorKind::NotFound {
            Error::InputNotFound(path.display().to_string())
        } else {
            Error::Io(err)
        }
    })
}

fn create_output(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| {
            if err.kind() == ErrorKind::AlreadyExists {
                Error::OutputExists(path.display().to_string())
            } else {
                Error::CannotCreate(path.display().to_string())
            }
        })
}

fn map_input_err(input: &Path) -> impl FnOnce(std::io::Error) -> Error {
    let name = input.display().to_string();
    move |err| {
        if err.kind() == ErrorKind::NotFound {
            Error::InputNotFound(name)
        } else {
            Error::Io(err)
        }
    }
}
