//! The tiled grid-check execution engine: raster/vector I/O, input
//! resolution, pink-chart preprocessing, the `GridCheck` framework and its
//! three concrete checks, the `Executor`, and QA-JSON adapters.

pub mod checks;
pub mod error;
pub mod executor;
pub mod gdal_polygonize;
pub mod input_resolver;
pub mod pink_chart;
pub mod qajson;
pub mod raster_io;
pub mod tiling;

pub use checks::{construct, CheckInstance, DensityCheck, GridCheck, ResolutionCheck, TileBands, TvuCheck};
pub use error::{Error, Result};
pub use executor::{Executor, ExecutorConfig};
pub use input_resolver::{inputs_from_checks, resolve};
pub use pink_chart::process as align_to_coverage_vector;
pub use raster_io::{MaskedArray, RasterIo};
