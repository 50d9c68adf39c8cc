use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while building and validating the data model. These are
/// all "BadInput" in the taxonomy of the wider system: fatal for the
/// `InputFileDetails` they describe, but never for the engine run as a
/// whole.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum Error {
    #[snafu(display("more than 3 data bands were provided ({count} found)"))]
    TooManyBands { count: usize },

    #[snafu(display("band type {band_type:?} appears more than once in the same input file set"))]
    DuplicateBandType { band_type: crate::band::BandType },

    #[snafu(display("band {band_index} in {path} has no nodata value assigned"))]
    MissingNoData { path: String, band_index: usize },

    #[snafu(display("no gridded input files were provided"))]
    NoInputFiles,

    #[snafu(display("sibling density file not found, expected {expected}"))]
    MissingDensitySibling { expected: String },

    #[snafu(display(
        "mismatch in data sizes across depth ({depth_x}x{depth_y}) and density \
         ({density_x}x{density_y}) BAG inputs"
    ))]
    BagSizeMismatch {
        depth_x: usize,
        depth_y: usize,
        density_x: usize,
        density_y: usize,
    },
}
