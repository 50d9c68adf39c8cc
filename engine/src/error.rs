use snafu::Snafu;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error taxonomy for the engine (spec §7). Variant names track the
/// taxonomy, not the call site, so callers can match on kind rather than on
/// prose.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[snafu(context(suffix(false)))]
pub enum Error {
    /// Missing file, unreadable band, mismatched BAG sizes, or a data-model
    /// validation failure. Fatal for the IFD it describes.
    #[snafu(display("bad input: {message}"))]
    BadInput { message: String },

    #[snafu(display("bad input: {source}"))]
    BadInputData { source: gridqa_datatypes::Error },

    /// I/O error during preprocessing or raster access, or an internal
    /// invariant violation. Propagated to the caller; temp dirs are still
    /// cleaned up.
    #[snafu(display("fatal: {message}"))]
    Fatal { message: String },

    #[snafu(display("fatal I/O error reading/writing {path}: {source}"))]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[snafu(display("fatal GDAL error: {source}"))]
    Gdal { source: gdal::errors::GdalError },

    #[snafu(display("fatal reprojection error: {source}"))]
    Proj { source: proj::ProjCreateError },

    #[snafu(display("fatal reprojection error: {source}"))]
    ProjTransform { source: proj::ProjError },
}

impl Error {
    pub fn bad_input(message: impl Into<String>) -> Self {
        Error::BadInput {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Error::Fatal {
            message: message.into(),
        }
    }
}
