use serde::{Deserialize, Serialize};
use snafu::ensure;
use std::path::PathBuf;

use crate::band::{BandRef, BandType};
use crate::check::CheckParam;
use crate::error::{self, Result};
use crate::geotransform::GeoTransform;

/// A single check, identified by UUID, and the parameters to run it with.
/// `InputFileDetails::checks` carries one of these per check the caller
/// asked for against this input set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRequest {
    pub check_id: uuid::Uuid,
    pub params: Vec<CheckParam>,
}

/// The canonical, resolved description of one gridded survey product: a set
/// of co-registered bands with a shared size and geotransform, plus the
/// checks to run against it. Everything downstream (`RasterIO`, tiling,
/// `GridCheck`) is built against this type rather than against raw paths, so
/// BAG/GeoTIFF/multi-file differences are resolved exactly once, by
/// `InputResolver`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputFileDetails {
    pub size_x: usize,
    pub size_y: usize,
    pub geotransform: GeoTransform,
    pub projection: String,
    pub bands: Vec<BandRef>,
    /// Coverage polygon ("pink chart") to align and clip to, if any.
    pub coverage_vector_path: Option<PathBuf>,
    pub checks: Vec<CheckRequest>,
    /// Check ids this IFD owes an output to in the source QA-JSON document.
    /// Usually identical to the ids in `checks`, but kept distinct because
    /// `InputResolver` coalesces multiple QA-JSON check entries that share
    /// an input set into one IFD: every original entry still needs its own
    /// `outputs` written, even though `checks` only runs each check once.
    pub qajson_checks: Vec<uuid::Uuid>,
    /// Set by `PinkChartProcessor` on the aligned clone it produces, so that
    /// check-result caching and QA-JSON output routing can always resolve
    /// back to the original, pre-alignment input. `None` on every
    /// `InputFileDetails` coming straight out of `InputResolver`.
    pub source: Option<Box<InputFileDetails>>,
}

impl InputFileDetails {
    pub fn new(
        size_x: usize,
        size_y: usize,
        geotransform: GeoTransform,
        projection: impl Into<String>,
        bands: Vec<BandRef>,
    ) -> Self {
        Self {
            size_x,
            size_y,
            geotransform,
            projection: projection.into(),
            bands,
            coverage_vector_path: None,
            checks: Vec::new(),
            qajson_checks: Vec::new(),
            source: None,
        }
    }

    /// The `(src_ifd, check_id)` identity `Executor` keys its check-result
    /// cache on: the original input if this is a pink-chart-aligned clone of
    /// one, else itself.
    pub fn cache_root(&self) -> &InputFileDetails {
        match &self.source {
            Some(source) => source,
            None => self,
        }
    }

    pub fn band(&self, band_type: BandType) -> Option<&BandRef> {
        self.bands.iter().find(|b| b.band_type == band_type)
    }

    /// A clone carrying every field except `bands`, matching the reference
    /// implementation's `clone()`: the pink-chart preprocessing step
    /// rewrites the band list (new, aligned rasters) but everything else —
    /// size, geotransform, projection, requested checks — stays put, and
    /// `source` is set to point back at `self`.
    pub fn clone_for_preprocessing(&self) -> Self {
        Self {
            size_x: self.size_x,
            size_y: self.size_y,
            geotransform: self.geotransform,
            projection: self.projection.clone(),
            bands: Vec::new(),
            coverage_vector_path: None,
            checks: self.checks.clone(),
            qajson_checks: self.qajson_checks.clone(),
            source: Some(Box::new(self.clone())),
        }
    }

    /// At most 3 data bands (depth/density/uncertainty; pink chart is not a
    /// data band), no two bands of the same type, and (left to the caller,
    /// since nodata lives in `RasterIO`, not here) every band must have a
    /// nodata value assigned before a check runs.
    pub fn validate(&self) -> Result<()> {
        let data_bands: Vec<_> = self
            .bands
            .iter()
            .filter(|b| b.band_type != BandType::PinkChart)
            .collect();
        ensure!(
            data_bands.len() <= 3,
            error::TooManyBands {
                count: data_bands.len()
            }
        );

        let mut seen = Vec::new();
        for band in &self.bands {
            ensure!(
                !seen.contains(&band.band_type),
                error::DuplicateBandType {
                    band_type: band.band_type
                }
            );
            seen.push(band.band_type);
        }

        Ok(())
    }

    /// Longest common prefix of every band's file stem, used as a stable,
    /// human-meaningful label for QA-JSON output and log messages when no
    /// single file name speaks for the whole input set. Falls back to the
    /// first band's stem when the shared prefix is too short (<5 chars) to
    /// be meaningful on its own.
    pub fn common_filename(&self) -> String {
        let stems: Vec<String> = self
            .bands
            .iter()
            .filter_map(|b| b.path.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .collect();

        let Some(first) = stems.first() else {
            return String::new();
        };

        let mut prefix = first.clone();
        for stem in &stems[1..] {
            let common_len = prefix
                .chars()
                .zip(stem.chars())
                .take_while(|(a, b)| a == b)
                .count();
            prefix.truncate(prefix.char_indices().nth(common_len).map_or(prefix.len(), |(i, _)| i));
            if prefix.is_empty() {
                break;
            }
        }

        if prefix.chars().count() >= 5 {
            prefix
        } else {
            first.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn band(path: &str, band_type: BandType) -> BandRef {
        BandRef::new(PathBuf::from(path), 1, band_type)
    }

    #[test]
    fn validate_rejects_more_than_three_data_bands() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![
                band("a_depth.tif", BandType::Depth),
                band("a_density.tif", BandType::Density),
                band("a_uncertainty.tif", BandType::Uncertainty),
                band("a_extra.tif", BandType::Depth),
            ],
        );
        assert!(ifd.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_band_type() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![
                band("a_depth.tif", BandType::Depth),
                band("b_depth.tif", BandType::Depth),
            ],
        );
        assert!(ifd.validate().is_err());
    }

    #[test]
    fn validate_allows_pink_chart_alongside_three_data_bands() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![
                band("a_depth.tif", BandType::Depth),
                band("a_density.tif", BandType::Density),
                band("a_uncertainty.tif", BandType::Uncertainty),
                band("pink.shp", BandType::PinkChart),
            ],
        );
        assert!(ifd.validate().is_ok());
    }

    #[test]
    fn common_filename_uses_shared_prefix() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![
                band("survey_2021_depth.tif", BandType::Depth),
                band("survey_2021_density.tif", BandType::Density),
            ],
        );
        assert_eq!(ifd.common_filename(), "survey_2021_");
    }

    #[test]
    fn common_filename_falls_back_when_prefix_too_short() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![
                band("abc_depth.tif", BandType::Depth),
                band("xyz_density.tif", BandType::Density),
            ],
        );
        assert_eq!(ifd.common_filename(), "abc_depth");
    }

    #[test]
    fn clone_for_preprocessing_clears_bands_and_sets_source() {
        let ifd = InputFileDetails::new(
            10,
            10,
            GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            vec![band("a_depth.tif", BandType::Depth)],
        );
        let clone = ifd.clone_for_preprocessing();
        assert!(clone.bands.is_empty());
        assert_eq!(clone.cache_root().size_x, ifd.size_x);
        assert!(std::ptr::eq(clone.cache_root(), clone.source.as_deref().unwrap()));
    }
}
