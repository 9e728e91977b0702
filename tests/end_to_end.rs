//!
//! End-to-end shapefile transformation scenarios over synthetic
//! datasets and a synthetic NTv2 grid file.
//!

use approx::assert_abs_diff_eq;
use shpreproj::crs::build_coordsys;
use shpreproj::gridshift::GridShift;
use shpreproj::projections::DoubleStereographic;
use shpreproj::transform::Session;
use shpreproj::errors::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

// ---------------------------------------------------------------
// synthetic shapefile builder
// ---------------------------------------------------------------

const HEADER_LEN: usize = 100;

struct DataSet {
    shp: Vec<u8>,
    shx: Vec<u8>,
    nrec: i32,
    bbox: Option<(f64, f64, f64, f64)>,
}

impl DataSet {
    fn new(shape_type: i32) -> Self {
        let mut header = vec![0u8; HEADER_LEN];
        header[0..4].copy_from_slice(&9994i32.to_be_bytes());
        header[28..32].copy_from_slice(&1000i32.to_le_bytes());
        header[32..36].copy_from_slice(&shape_type.to_le_bytes());
        Self {
            shp: header.clone(),
            shx: header,
            nrec: 0,
            bbox: None,
        }
    }

    fn add_record(&mut self, payload: &[u8], pts: &[(f64, f64)]) {
        self.nrec += 1;
        let content_words = (payload.len() / 2) as i32;

        let offset_words = (self.shp.len() / 2) as i32;
        self.shx.extend(offset_words.to_be_bytes());
        self.shx.extend(content_words.to_be_bytes());

        self.shp.extend(self.nrec.to_be_bytes());
        self.shp.extend(content_words.to_be_bytes());
        self.shp.extend(payload);

        for (x, y) in pts {
            let b = self.bbox.get_or_insert((*x, *y, *x, *y));
            b.0 = b.0.min(*x);
            b.1 = b.1.min(*y);
            b.2 = b.2.max(*x);
            b.3 = b.3.max(*y);
        }
    }

    fn add_point(&mut self, x: f64, y: f64) {
        let mut payload = Vec::with_capacity(20);
        payload.extend(1i32.to_le_bytes());
        payload.extend(x.to_le_bytes());
        payload.extend(y.to_le_bytes());
        self.add_record(&payload, &[(x, y)]);
    }

    fn add_polyline(&mut self, pts: &[(f64, f64)]) {
        let mut payload = Vec::with_capacity(48 + 16 * pts.len());
        payload.extend(3i32.to_le_bytes());
        payload.extend(bbox_bytes(pts));
        payload.extend(1i32.to_le_bytes()); // nparts
        payload.extend((pts.len() as i32).to_le_bytes());
        payload.extend(0i32.to_le_bytes()); // part start
        for (x, y) in pts {
            payload.extend(x.to_le_bytes());
            payload.extend(y.to_le_bytes());
        }
        self.add_record(&payload, pts);
    }

    fn add_multipoint(&mut self, pts: &[(f64, f64)]) {
        let mut payload = Vec::with_capacity(40 + 16 * pts.len());
        payload.extend(8i32.to_le_bytes());
        payload.extend(bbox_bytes(pts));
        payload.extend((pts.len() as i32).to_le_bytes());
        for (x, y) in pts {
            payload.extend(x.to_le_bytes());
            payload.extend(y.to_le_bytes());
        }
        self.add_record(&payload, pts);
    }

    /// Write the .shp/.shx pair plus an opaque .dbf stub, returning
    /// the dataset base path.
    fn write(mut self, dir: &Path, name: &str) -> PathBuf {
        for header_of in [&mut self.shp, &mut self.shx] {
            if let Some((xmin, ymin, xmax, ymax)) = self.bbox {
                header_of[36..44].copy_from_slice(&xmin.to_le_bytes());
                header_of[44..52].copy_from_slice(&ymin.to_le_bytes());
                header_of[52..60].copy_from_slice(&xmax.to_le_bytes());
                header_of[60..68].copy_from_slice(&ymax.to_le_bytes());
            }
        }
        let shp_words = (self.shp.len() / 2) as i32;
        let shx_words = (self.shx.len() / 2) as i32;
        self.shp[24..28].copy_from_slice(&shp_words.to_be_bytes());
        self.shx[24..28].copy_from_slice(&shx_words.to_be_bytes());

        let base = dir.join(name);
        fs::write(base.with_extension("shp"), &self.shp).unwrap();
        fs::write(base.with_extension("shx"), &self.shx).unwrap();
        fs::write(base.with_extension("dbf"), dbf_stub()).unwrap();
        base
    }
}

fn bbox_bytes(pts: &[(f64, f64)]) -> [u8; 32] {
    let mut bbox = (pts[0].0, pts[0].1, pts[0].0, pts[0].1);
    for (x, y) in pts {
        bbox.0 = bbox.0.min(*x);
        bbox.1 = bbox.1.min(*y);
        bbox.2 = bbox.2.max(*x);
        bbox.3 = bbox.3.max(*y);
    }
    let mut bytes = [0u8; 32];
    bytes[0..8].copy_from_slice(&bbox.0.to_le_bytes());
    bytes[8..16].copy_from_slice(&bbox.1.to_le_bytes());
    bytes[16..24].copy_from_slice(&bbox.2.to_le_bytes());
    bytes[24..32].copy_from_slice(&bbox.3.to_le_bytes());
    bytes
}

fn dbf_stub() -> Vec<u8> {
    let mut dbf = vec![0x03u8];
    dbf.extend((0u8..=200).cycle().take(512));
    dbf
}

// ---------------------------------------------------------------
// synthetic NTv2 grid: one 3x3 sub-grid, 2 arc-second shifts over
// a square degree or two. Values are multiples of 1/8 so the f32
// storage is exact.
// ---------------------------------------------------------------

fn ntv2_record(label: &str, value: [u8; 8]) -> [u8; 16] {
    let mut rec = [b' '; 16];
    rec[..label.len()].copy_from_slice(label.as_bytes());
    rec[8..].copy_from_slice(&value);
    rec
}

fn rec_int(label: &str, v: i32) -> [u8; 16] {
    let mut value = [0u8; 8];
    value[..4].copy_from_slice(&v.to_le_bytes());
    ntv2_record(label, value)
}

fn rec_dbl(label: &str, v: f64) -> [u8; 16] {
    ntv2_record(label, v.to_le_bytes())
}

fn rec_str(label: &str, v: &str) -> [u8; 16] {
    let mut value = [b' '; 8];
    value[..v.len()].copy_from_slice(v.as_bytes());
    ntv2_record(label, value)
}

fn build_grid() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend(rec_int("NUM_OREC", 11));
    out.extend(rec_int("NUM_SREC", 11));
    out.extend(rec_int("NUM_FILE", 1));
    out.extend(rec_str("GS_TYPE", "SECONDS"));
    out.extend(rec_str("VERSION", "NTv2.0"));
    out.extend(rec_str("SYSTEM_F", "NAD27"));
    out.extend(rec_str("SYSTEM_T", "NAD83"));
    out.extend(rec_dbl("MAJOR_F", 6_378_206.4));
    out.extend(rec_dbl("MINOR_F", 6_356_583.8));
    out.extend(rec_dbl("MAJOR_T", 6_378_137.0));
    out.extend(rec_dbl("MINOR_T", 6_356_752.314));

    out.extend(rec_str("SUB_NAME", "ONLY"));
    out.extend(rec_str("PARENT", "NONE"));
    out.extend(rec_str("CREATED", "19970302"));
    out.extend(rec_str("UPDATED", "19970302"));
    out.extend(rec_dbl("S_LAT", 0.));
    out.extend(rec_dbl("N_LAT", 7200.));
    out.extend(rec_dbl("E_LONG", 0.));
    out.extend(rec_dbl("W_LONG", 7200.));
    out.extend(rec_dbl("LAT_INC", 3600.));
    out.extend(rec_dbl("LONG_INC", 3600.));
    out.extend(rec_int("GS_COUNT", 9));

    for row in 0..3u32 {
        for col in 0..3u32 {
            let lat_shift = 3.0 + 0.5 * row as f32 + 0.25 * col as f32;
            let lon_shift = -1.5 - 0.25 * row as f32 + 0.5 * col as f32;
            let mut rec = [0u8; 16];
            rec[..4].copy_from_slice(&lat_shift.to_le_bytes());
            rec[4..8].copy_from_slice(&lon_shift.to_le_bytes());
            rec[8..12].copy_from_slice(&0.5f32.to_le_bytes());
            rec[12..16].copy_from_slice(&0.5f32.to_le_bytes());
            out.extend(rec);
        }
    }
    out
}

// ---------------------------------------------------------------
// helpers over written files
// ---------------------------------------------------------------

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

fn header_bbox(bytes: &[u8]) -> (f64, f64, f64, f64) {
    (
        read_f64(bytes, 36),
        read_f64(bytes, 44),
        read_f64(bytes, 52),
        read_f64(bytes, 60),
    )
}

/// Coordinates of the single-part polyline/multipoint record at the
/// given record byte offset.
fn record_points(shp: &[u8], offset: usize) -> Vec<(f64, f64)> {
    let payload = &shp[offset + 8..];
    let shape_type = i32::from_le_bytes(payload[0..4].try_into().unwrap());
    let (npoints_off, pts_off) = match shape_type {
        1 => return vec![(read_f64(payload, 4), read_f64(payload, 12))],
        3 | 5 => (40, 48),
        8 => (36, 40),
        other => panic!("unexpected shape type {other}"),
    };
    let n = i32::from_le_bytes(payload[npoints_off..npoints_off + 4].try_into().unwrap()) as usize;
    (0..n)
        .map(|i| {
            (
                read_f64(payload, pts_off + 16 * i),
                read_f64(payload, pts_off + 16 * i + 8),
            )
        })
        .collect()
}

fn session(from_spec: &str, to_spec: &str) -> Session {
    let from = build_coordsys(from_spec, None, None).unwrap();
    let to = build_coordsys(to_spec, None, None).unwrap();
    Session::new(from.projection, to.projection)
}

// ---------------------------------------------------------------
// scenarios
// ---------------------------------------------------------------

#[test]
fn utm_to_mtm_point_in_place() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = DataSet::new(1);
    data.add_point(500_000.0, 5_000_000.0);
    let base = data.write(dir.path(), "point");

    let dbf_before = fs::read(base.with_extension("dbf")).unwrap();

    let mut session = session("utm20,nad83", "mtm5,nad83");
    let report = session.run_in_place(&base).unwrap();
    assert_eq!(report.records, 1);
    assert_eq!(report.points, 1);
    assert_eq!(report.record_errors, 0);

    let shp = fs::read(base.with_extension("shp")).unwrap();
    let pts = record_points(&shp, HEADER_LEN);
    assert_abs_diff_eq!(pts[0].0, 5_617_942.23489467, epsilon = 1e-4);
    assert_abs_diff_eq!(pts[0].1, 5_002_595.320063282, epsilon = 1e-4);

    // the file bounding box collapses onto the single output point
    let bbox = header_bbox(&shp);
    assert_abs_diff_eq!(bbox.0, pts[0].0, epsilon = 1e-9);
    assert_abs_diff_eq!(bbox.1, pts[0].1, epsilon = 1e-9);
    assert_abs_diff_eq!(bbox.2, pts[0].0, epsilon = 1e-9);
    assert_abs_diff_eq!(bbox.3, pts[0].1, epsilon = 1e-9);

    let shx = fs::read(base.with_extension("shx")).unwrap();
    assert_eq!(header_bbox(&shx), bbox);

    // attribute table untouched
    assert_eq!(fs::read(base.with_extension("dbf")).unwrap(), dbf_before);
}

#[test]
fn copy_mode_preserves_record_structure() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = DataSet::new(3);
    data.add_polyline(&[(500_000.0, 5_000_000.0), (520_000.0, 5_050_000.0)]);
    data.add_polyline(&[
        (480_000.0, 4_990_000.0),
        (481_000.0, 4_991_000.0),
        (482_000.0, 4_990_500.0),
    ]);
    let input = data.write(dir.path(), "in");
    let output = dir.path().join("out");

    let mut session = session("utm20,nad83", "utm19,nad83");
    let report = session.run(&input, &output).unwrap();
    assert_eq!(report.records, 2);
    assert_eq!(report.points, 5);

    let shp_in = fs::read(input.with_extension("shp")).unwrap();
    let shp_out = fs::read(output.with_extension("shp")).unwrap();
    let shx_out = fs::read(output.with_extension("shx")).unwrap();

    // header length matches the physical size
    assert_eq!(
        i32::from_be_bytes(shp_out[24..28].try_into().unwrap()) as usize * 2,
        shp_out.len()
    );
    assert_eq!(shp_in.len(), shp_out.len());

    // record headers (number, content length) and shape types are
    // byte-identical; only coordinates moved
    let mut offset = HEADER_LEN;
    let mut all_points = Vec::new();
    for _ in 0..2 {
        assert_eq!(shp_in[offset..offset + 8], shp_out[offset..offset + 8]);
        assert_eq!(
            shp_in[offset + 8..offset + 12],
            shp_out[offset + 8..offset + 12]
        );
        let content =
            i32::from_be_bytes(shp_in[offset + 4..offset + 8].try_into().unwrap()) as usize * 2;
        all_points.extend(record_points(&shp_out, offset));
        offset += 8 + content;
    }

    // the output index agrees with the output records
    for (i, entry) in shx_out[HEADER_LEN..].chunks(8).enumerate() {
        let rec_offset = i32::from_be_bytes(entry[0..4].try_into().unwrap()) as usize * 2;
        let rec_no = i32::from_be_bytes(shp_out[rec_offset..rec_offset + 4].try_into().unwrap());
        assert_eq!(rec_no as usize, i + 1);
    }

    // file bbox equals the component-wise min/max of the output
    let bbox = header_bbox(&shp_out);
    let xmin = all_points.iter().map(|p| p.0).fold(f64::INFINITY, f64::min);
    let ymax = all_points
        .iter()
        .map(|p| p.1)
        .fold(f64::NEG_INFINITY, f64::max);
    assert_abs_diff_eq!(bbox.0, xmin, epsilon = 1e-9);
    assert_abs_diff_eq!(bbox.3, ymax, epsilon = 1e-9);

    // attribute table copied verbatim
    assert_eq!(
        fs::read(input.with_extension("dbf")).unwrap(),
        fs::read(output.with_extension("dbf")).unwrap()
    );
}

#[test]
fn datum_shift_reverse_recovers_forward() {
    let dir = tempfile::tempdir().unwrap();
    let grid_path = dir.path().join("synthetic.gsb");
    fs::write(&grid_path, build_grid()).unwrap();

    // vertices inside the grid coverage (lon -2..0, lat 0..2 deg)
    let inputs = [(-0.5, 0.75), (-1.4, 1.6)];
    let mut data = DataSet::new(3);
    data.add_polyline(&inputs);
    let input = data.write(dir.path(), "line");
    let output = dir.path().join("shifted");

    // geographic NAD83 -> geographic NAD27: the NAD27 grid file is
    // applied in reverse
    let mut session = session("geo,nad83", "geo,nad27");
    let mut shift = GridShift::new();
    shift.open(&grid_path, Some("NAD27"), Some("NAD83")).unwrap();
    session.set_target_shift(shift);

    session.run(&input, &output).unwrap();

    let shp_out = fs::read(output.with_extension("shp")).unwrap();
    let mut pts = record_points(&shp_out, HEADER_LEN);

    // something actually moved, by roughly the grid's arc-seconds
    assert!((pts[0].1 - inputs[0].1).abs() * 3600. > 1.);

    // applying the forward shift to the output recovers the input
    let mut check = GridShift::new();
    check.open(&grid_path, None, None).unwrap();
    check.forward(&mut pts).unwrap();
    for (out, exp) in pts.iter().zip(inputs.iter()) {
        assert_abs_diff_eq!(out.0, exp.0, epsilon = 1e-9);
        assert_abs_diff_eq!(out.1, exp.1, epsilon = 1e-9);
    }

    // output bbox equals min/max of the shifted vertices
    let shifted = record_points(&shp_out, HEADER_LEN);
    let bbox = header_bbox(&shp_out);
    assert_abs_diff_eq!(bbox.0, shifted[0].0.min(shifted[1].0), epsilon = 1e-12);
    assert_abs_diff_eq!(bbox.1, shifted[0].1.min(shifted[1].1), epsilon = 1e-12);
    assert_abs_diff_eq!(bbox.2, shifted[0].0.max(shifted[1].0), epsilon = 1e-12);
    assert_abs_diff_eq!(bbox.3, shifted[0].1.max(shifted[1].1), epsilon = 1e-12);
}

#[test]
fn stereographic_multipoint_round_trip() {
    let dir = tempfile::tempdir().unwrap();

    // 1000 pseudo-random points in the New Brunswick area,
    // projected into NB double stereographic NAD83 coordinates
    let mut ds = DoubleStereographic::new_brunswick();
    let (a, f) = shpreproj::datums::Datum::Nad83.spheroid();
    ds.set_spheroid(a, f).unwrap();
    ds.set_false_offsets(2_500_000., 7_500_000.);

    let mut seed = 0x2545_F491_4F6C_DD1Du64;
    let mut next = move || {
        seed = seed
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (seed >> 33) as f64 / (1u64 << 31) as f64
    };
    let mut pts: Vec<(f64, f64)> = (0..1000)
        .map(|_| (-67.5 + 2.0 * next(), 45.5 + 1.5 * next()))
        .collect();
    ds.forward(&mut pts).unwrap();
    let projected = pts.clone();

    let mut data = DataSet::new(8);
    data.add_multipoint(&projected);
    let input = data.write(dir.path(), "mp");

    let unprojected = dir.path().join("geo");
    session("nbds,nad83", "geo,nad83")
        .run(&input, &unprojected)
        .unwrap();

    let reprojected = dir.path().join("back");
    session("geo,nad83", "nbds,nad83")
        .run(&unprojected, &reprojected)
        .unwrap();

    let shp_back = fs::read(reprojected.with_extension("shp")).unwrap();
    let back = record_points(&shp_back, HEADER_LEN);
    assert_eq!(back.len(), 1000);
    for (out, exp) in back.iter().zip(projected.iter()) {
        assert_abs_diff_eq!(out.0, exp.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.1, exp.1, epsilon = 1e-6);
    }

    // bytes outside the coordinate slots and header boxes survive
    // the double conversion
    let shp_in = fs::read(input.with_extension("shp")).unwrap();
    assert_eq!(shp_in.len(), shp_back.len());
    assert_eq!(shp_in[0..36], shp_back[0..36]);
    // record header, shape type and point count
    assert_eq!(
        shp_in[HEADER_LEN..HEADER_LEN + 8],
        shp_back[HEADER_LEN..HEADER_LEN + 8]
    );
    assert_eq!(
        shp_in[HEADER_LEN + 8..HEADER_LEN + 12],
        shp_back[HEADER_LEN + 8..HEADER_LEN + 12]
    );
    assert_eq!(
        shp_in[HEADER_LEN + 44..HEADER_LEN + 48],
        shp_back[HEADER_LEN + 44..HEADER_LEN + 48]
    );
    assert_eq!(
        fs::read(input.with_extension("dbf")).unwrap(),
        fs::read(reprojected.with_extension("dbf")).unwrap()
    );
}

#[test]
fn cancellation_leaves_in_place_file_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = DataSet::new(1);
    for i in 0..50 {
        data.add_point(500_000.0 + i as f64, 5_000_000.0);
    }
    let base = data.write(dir.path(), "cancel");
    let before = fs::read(base.with_extension("shp")).unwrap();

    let mut session = session("utm20,nad83", "mtm5,nad83");
    session.cancel_flag().store(true, Ordering::Relaxed);
    assert!(matches!(
        session.run_in_place(&base),
        Err(Error::Cancelled)
    ));

    // cancelled before the first record: nothing was modified
    assert_eq!(fs::read(base.with_extension("shp")).unwrap(), before);
}

#[test]
fn cancellation_removes_partial_output_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = DataSet::new(1);
    data.add_point(500_000.0, 5_000_000.0);
    let input = data.write(dir.path(), "in");
    let output = dir.path().join("out");

    let mut session = session("utm20,nad83", "mtm5,nad83");
    session.cancel_flag().store(true, Ordering::Relaxed);
    assert!(matches!(
        session.run(&input, &output),
        Err(Error::Cancelled)
    ));

    assert!(!output.with_extension("shp").exists());
    assert!(!output.with_extension("shx").exists());
    assert!(!output.with_extension("dbf").exists());
    // the input survives
    assert!(input.with_extension("shp").exists());
}

#[test]
fn existing_output_is_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let mut data = DataSet::new(1);
    data.add_point(500_000.0, 5_000_000.0);
    let input = data.write(dir.path(), "in");

    let output = dir.path().join("out");
    fs::write(output.with_extension("shp"), b"do not touch").unwrap();

    let mut session = session("utm20,nad83", "mtm5,nad83");
    assert!(matches!(
        session.run(&input, &output),
        Err(Error::OutputExists(_))
    ));
    assert_eq!(
        fs::read(output.with_extension("shp")).unwrap(),
        b"do not touch"
    );
}

#[test]
fn missing_input_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = session("utm20,nad83", "mtm5,nad83");
    assert!(matches!(
        session.run(&dir.path().join("absent"), &dir.path().join("out")),
        Err(Error::InputNotFound(_))
    ));
}

#[test]
fn truncated_grid_file_fails_at_open() {
    let dir = tempfile::tempdir().unwrap();
    let bytes = build_grid();
    let path = dir.path().join("bad.gsb");
    fs::write(&path, &bytes[..bytes.len() - 40]).unwrap();

    let mut shift = GridShift::new();
    assert!(matches!(
        shift.open(&path, None, None),
        Err(Error::InvalidGridFormat(_))
    ));
}
