//!
//! ESRI shapefile (.shp / .shx) structure
//!
//! Both files start with the same 100-byte header: a big-endian
//! magic word, the file length in 16-bit words at byte 24 (also
//! big-endian) and the little-endian x/y bounding box at bytes
//! 36..68. Record headers and index entries are big-endian, record
//! payloads little-endian.
//!
//! Coordinates inside a payload may be unaligned, so they are
//! decoded into an aligned scratch buffer and re-encoded after the
//! transform; that also keeps the byte order right on any host.
//!

use crate::errors::{Error, Result};

pub const HEADER_LEN: usize = 100;
const FILE_CODE: i32 = 9994;

/// Axis-aligned bounding box over x/y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl BBox {
    /// Componentwise min/max of the points; `None` for no points.
    pub fn from_points(pts: &[(f64, f64)]) -> Option<Self> {
        let (first, rest) = pts.split_first()?;
        let mut bbox = Self {
            xmin: first.0,
            ymin: first.1,
            xmax: first.0,
            ymax: first.1,
        };
        for p in rest {
            bbox.expand_point(*p);
        }
        Some(bbox)
    }

    pub fn expand_point(&mut self, (x, y): (f64, f64)) {
        self.xmin = self.xmin.min(x);
        self.ymin = self.ymin.min(y);
        self.xmax = self.xmax.max(x);
        self.ymax = self.ymax.max(y);
    }

    pub fn expand(&mut self, other: &BBox) {
        self.expand_point((other.xmin, other.ymin));
        self.expand_point((other.xmax, other.ymax));
    }

    pub fn to_le_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        bytes[0..8].copy_from_slice(&self.xmin.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.ymin.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.xmax.to_le_bytes());
        bytes[24..32].copy_from_slice(&self.ymax.to_le_bytes());
        bytes
    }
}

/// Validate the magic word of a 100-byte file header.
pub fn check_header(header: &[u8]) -> Result<()> {
    if header.len() < HEADER_LEN || be_i32(header, 0) != FILE_CODE {
        Err(Error::BadShapeHeader)
    } else {
        Ok(())
    }
}

/// File length in 16-bit words, big-endian at byte 24.
pub fn file_length_words(header: &[u8]) -> u32 {
    be_i32(header, 24) as u32
}

pub fn write_file_length_words(header: &mut [u8], words: u32) {
    header[24..28].copy_from_slice(&(words as i32).to_be_bytes());
}

/// Write the x/y bounding box into bytes 36..68 of a file header.
pub fn write_header_bbox(header: &mut [u8], bbox: &BBox) {
    header[36..68].copy_from_slice(&bbox.to_le_bytes());
}

/// One .shx entry: record offset and content length, both in
/// 16-bit words.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexEntry {
    pub offset_words: u32,
    pub content_words: u32,
}

impl IndexEntry {
    pub fn parse(bytes: &[u8]) -> Self {
        Self {
            offset_words: be_i32(bytes, 0) as u32,
            content_words: be_i32(bytes, 4) as u32,
        }
    }

    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0..4].copy_from_slice(&(self.offset_words as i32).to_be_bytes());
        bytes[4..8].copy_from_slice(&(self.content_words as i32).to_be_bytes());
        bytes
    }

    pub fn byte_offset(self) -> usize {
        self.offset_words as usize * 2
    }

    /// Full record length in bytes, including the 8-byte header.
    pub fn record_len(self) -> usize {
        self.content_words as usize * 2 + 8
    }
}

/// Where the x/y coordinate pairs live inside a record payload.
///
/// Z, M and measure arrays trail the x/y pairs and are never
/// touched, so the Z/M shape types share the base type's layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexLayout {
    pub num_points: usize,
    /// Byte offset of the first coordinate pair
    pub points_offset: usize,
    /// Byte offset of the record's own bounding box, when it has one
    pub bbox_offset: Option<usize>,
}

/// Decode the vertex layout of a record payload, `None` when the
/// record has no vertices to transform (null or unknown shapes).
pub fn vertex_layout(payload: &[u8]) -> Result<Option<VertexLayout>> {
    if payload.len() < 4 {
        return Err(Error::BadShapeRecord);
    }
    let shape_type = le_i32(payload, 0);

    let layout = if shape_type > 0 && shape_type < 30 {
        match shape_type % 10 {
            1 => VertexLayout {
                num_points: 1,
                points_offset: 4,
                bbox_offset: None,
            },
            3 | 5 => {
                let nparts = count_field(payload, 36)?;
                VertexLayout {
                    num_points: count_field(payload, 40)?,
                    points_offset: 44 + 4 * nparts,
                    bbox_offset: Some(4),
                }
            }
            8 => VertexLayout {
                num_points: count_field(payload, 36)?,
                points_offset: 40,
                bbox_offset: Some(4),
            },
            _ => return Ok(None),
        }
    } else if shape_type == 31 {
        // multipatch: part indices and part types precede the points
        let nparts = count_field(payload, 36)?;
        VertexLayout {
            num_points: count_field(payload, 40)?,
            points_offset: 44 + 8 * nparts,
            bbox_offset: Some(4),
        }
    } else {
        return Ok(None);
    };

    match layout
        .points_offset
        .checked_add(layout.num_points.checked_mul(16).ok_or(Error::BadShapeRecord)?)
    {
        Some(end) if end <= payload.len() => Ok(Some(layout)),
        _ => Err(Error::BadShapeRecord),
    }
}

fn count_field(payload: &[u8], offset: usize) -> Result<usize> {
    if payload.len() < offset + 4 {
        return Err(Error::BadShapeRecord);
    }
    let n = le_i32(payload, offset);
    if n < 0 {
        Err(Error::BadShapeRecord)
    } else {
        Ok(n as usize)
    }
}

/// Decode the coordinate pairs into an aligned buffer.
pub fn read_points(payload: &[u8], layout: &VertexLayout, out: &mut Vec<(f64, f64)>) {
    out.clear();
    out.reserve(layout.num_points);
    let mut off = layout.points_offset;
    for _ in 0..layout.num_points {
        out.push((le_f64(payload, off), le_f64(payload, off + 8)));
        off += 16;
    }
}

/// Encode the coordinate pairs back into the payload.
pub fn write_points(payload: &mut [u8], layout: &VertexLayout, pts: &[(f64, f64)]) {
    let mut off = layout.points_offset;
    for p in pts {
        payload[off..off + 8].copy_from_slice(&p.0.to_le_bytes());
        payload[off + 8..off + 16].copy_from_slice(&p.1.to_le_bytes());
        off += 16;
    }
}

/// Rewrite the record's own bounding box, when the shape has one.
pub fn write_record_bbox(payload: &mut [u8], layout: &VertexLayout, bbox: &BBox) {
    if let Some(off) = layout.bbox_offset {
        payload[off..off + 32].copy_from_slice(&bbox.to_le_bytes());
    }
}

fn be_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn le_i32(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn le_f64(bytes: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}
