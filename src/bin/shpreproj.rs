//!
//! Shapefile reprojection command line
//!
use clap::Parser;
use shpreproj::crs;
use shpreproj::datums::ShiftFamily;
use shpreproj::errors::Error;
use shpreproj::gridshift::GridShift;
use shpreproj::transform::Session;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser)]
#[command(version, about = "Reproject shapefile datasets between coordinate reference systems", long_about = None)]
struct Cli {
    /// Input shapefile (.shp)
    input: PathBuf,

    /// Output shapefile; required unless --in-place is given
    #[arg(conflicts_with = "in_place")]
    output: Option<PathBuf>,

    /// Source coordinate system: projection,datum[,units]
    #[arg(long, required = true)]
    from: String,

    /// Target coordinate system: projection,datum[,units]
    #[arg(long, required = true)]
    to: String,

    /// Overwrite the input dataset instead of creating a new one
    #[arg(long)]
    in_place: bool,

    /// Non-standard false offsets of the source data, as "x,y"
    #[arg(long, value_name = "X,Y")]
    from_offset: Option<String>,

    /// False offsets to apply on the target side, as "x,y"
    #[arg(long, value_name = "X,Y")]
    to_offset: Option<String>,

    /// Non-standard scale factor of the source data
    #[arg(long, value_name = "K")]
    from_scale: Option<String>,

    /// Scale factor to apply on the target side
    #[arg(long, value_name = "K")]
    to_scale: Option<String>,

    /// Tighter tolerance for the iterative reverse transforms
    #[arg(long)]
    precise: bool,

    /// Report non-fatal per-record transformation errors
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let is_usage = err.use_stderr();
            let _ = err.print();
            return if is_usage {
                // distinct code for incorrect usage
                ExitCode::from(1)
            } else {
                // --help and --version land here
                ExitCode::SUCCESS
            };
        }
    };

    init_logger(cli.verbose);

    if !cli.in_place && cli.output.is_none() {
        eprintln!("error: an output path is required unless --in-place is given");
        return ExitCode::from(1);
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("shpreproj error: {err}");
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    check_files(&cli.input, cli.output.as_deref())?;

    let from = crs::build_coordsys(
        &cli.from,
        cli.from_offset.as_deref(),
        cli.from_scale.as_deref(),
    )?;
    let to = crs::build_coordsys(&cli.to, cli.to_offset.as_deref(), cli.to_scale.as_deref())?;

    let mut session = Session::new(from.projection, to.projection);

    // Datum composition through NAD83: the source shifter applies
    // forward, the target one in reverse. Equal datums (or equal
    // shift families) need no grid at all.
    let src_family = from.datum.shift_family();
    let dst_family = to.datum.shift_family();
    if src_family != dst_family {
        if let Some(family) = src_family {
            session.set_source_shift(open_shift(family)?);
        }
        if let Some(family) = dst_family {
            session.set_target_shift(open_shift(family)?);
        }
    }

    session.set_high_precision(cli.precise);

    let report = match &cli.output {
        Some(output) => session.run(&cli.input, output)?,
        None => session.run_in_place(&cli.input)?,
    };

    println!(
        "{} records, {} points transformed",
        report.records, report.points
    );
    if report.record_errors > 0 {
        eprintln!(
            "warning: {} records had transformation errors",
            report.record_errors
        );
    }
    Ok(())
}

fn init_logger(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn check_files(input: &Path, output: Option<&Path>) -> Result<(), Error> {
    if let Some(out) = output {
        if input.with_extension("shp") == out.with_extension("shp") {
            return Err(Error::OutputExists(out.display().to_string()));
        }
    }
    for ext in ["shp", "shx"] {
        let path = input.with_extension(ext);
        if !path.is_file() {
            return Err(Error::InputNotFound(path.display().to_string()));
        }
        if let Some(out) = output {
            let path = out.with_extension(ext);
            if path.exists() {
                return Err(Error::OutputExists(path.display().to_string()));
            }
        }
    }
    Ok(())
}

/// Locate and open the grid-shift file for a datum family: the
/// environment variable first (full path or directory), then the
/// well-known file names next to the running binary.
fn open_shift(family: ShiftFamily) -> Result<GridShift, Error> {
    let (var, names): (&str, &[&str]) = match family {
        ShiftFamily::Ntv2 => ("SHPREPROJ_GRIDSHIFT_NTV2", &["NTV2_0.GSB", "MAY76V20.GSB"]),
        ShiftFamily::Ats77 => (
            "SHPREPROJ_GRIDSHIFT_7783",
            &[
                "NB7783V2.GSB",
                "NS7783V2.GSB",
                "NS778301.GSB",
                "PE7783V2.GSB",
                "GS7783.GSB",
            ],
        ),
    };

    let mut shift = GridShift::new();
    for path in candidate_paths(var, names) {
        if shift.open(&path, None, None).is_ok() {
            return Ok(shift);
        }
    }
    Err(Error::GridFileUnavailable(format!("${var}")))
}

fn candidate_paths(var: &str, names: &[&str]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Ok(value) = std::env::var(var) {
        let base = PathBuf::from(value);
        if base.is_dir() {
            paths.extend(names.iter().map(|n| base.join(n)));
        } else {
            paths.push(base);
        }
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            paths.extend(names.iter().map(|n| dir.join(n)));
        }
    }
    paths
}

/// Distinct exit codes per failure class. Code 9 is reserved for
/// out-of-memory conditions, which abort before reaching here.
fn exit_code(err: &Error) -> u8 {
    match err {
        Error::InvalidSpheroid
        | Error::InvalidParameterValue(_)
        | Error::UnrecognizedProjection(_)
        | Error::UnrecognizedDatum(_)
        | Error::UnrecognizedUnits(_)
        | Error::InvalidUtmZone
        | Error::InvalidMtmZone
        | Error::CoordinateOutOfRange => 2,
        Error::InvalidGridFormat(_) | Error::GridDatumMismatch | Error::GridFileUnavailable(_) => 3,
        Error::OutputExists(_) => 4,
        Error::CannotCreate(_) | Error::InputNotFound(_) => 5,
        Error::BadShapeHeader => 6,
        Error::BadShapeRecord
        | Error::CalledOutOfSequence
        | Error::CalculationError
        | Error::PointOutsideShiftArea => 7,
        Error::Io(_) => 8,
        Error::Cancelled => 10,
    }
}
