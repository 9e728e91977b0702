//!
//! Crate errors
//!

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid or unsupported spheroid")]
    InvalidSpheroid,
    #[error("{0}")]
    InvalidParameterValue(&'static str),
    #[error("Unrecognized projection '{0}'")]
    UnrecognizedProjection(String),
    #[error("Unrecognized datum '{0}'")]
    UnrecognizedDatum(String),
    #[error("Unrecognized units '{0}'")]
    UnrecognizedUnits(String),
    #[error("Invalid UTM zone")]
    InvalidUtmZone,
    #[error("Invalid MTM zone")]
    InvalidMtmZone,
    #[error("Coordinate out of range")]
    CoordinateOutOfRange,
    #[error("Calculation failed")]
    CalculationError,
    #[error("Called out of sequence")]
    CalledOutOfSequence,
    #[error("Invalid NTv2 grid file: {0}")]
    InvalidGridFormat(&'static str),
    #[error("Grid file datum mismatch")]
    GridDatumMismatch,
    #[error("Point outside grid shift area")]
    PointOutsideShiftArea,
    #[error("No grid shift file found for {0}")]
    GridFileUnavailable(String),
    #[error("Not a shapefile (bad header)")]
    BadShapeHeader,
    #[error("Bad shapefile record")]
    BadShapeRecord,
    #[error("Input file not found: {0}")]
    InputNotFound(String),
    #[error("Output file already exists: {0}")]
    OutputExists(String),
    #[error("Could not create output file: {0}")]
    CannotCreate(String),
    #[error("Cancelled at user request")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
