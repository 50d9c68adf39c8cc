//! Canonical data model for the tiled grid-check execution engine.
//!
//! This crate has no I/O of its own: it defines the types `InputResolver`,
//! `RasterIO`, and the `GridCheck` framework (all in `gridqa-engine`) build
//! on top of.

pub mod band;
pub mod check;
pub mod error;
pub mod geotransform;
pub mod ifd;
pub mod tile;

pub use band::{BandRef, BandType};
pub use check::{
    get_param, CheckData, CheckExecution, CheckOutput, CheckParam, CheckParamValue,
    ExecutionStatus, GridCheckState, HistogramChart,
};
pub use error::{Error, Result};
pub use geotransform::GeoTransform;
pub use ifd::{CheckRequest, InputFileDetails};
pub use tile::Tile;
