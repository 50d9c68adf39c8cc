use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tagged variant over the kinds of co-registered raster bands the engine
/// understands. `PinkChart` is only ever added to an `InputFileDetails` by
/// the preprocessing step (`PinkChartProcessor`), never by `InputResolver`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BandType {
    Depth,
    Density,
    Uncertainty,
    PinkChart,
}

/// A single band reference: which file, which (1-based, GDAL-convention)
/// band index within it, and what it represents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandRef {
    pub path: PathBuf,
    pub band_index: usize,
    pub band_type: BandType,
}

impl BandRef {
    pub fn new(path: impl Into<PathBuf>, band_index: usize, band_type: BandType) -> Self {
        Self {
            path: path.into(),
            band_index,
            band_type,
        }
    }
}
