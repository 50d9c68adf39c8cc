use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::Utc;
use geo::MultiPolygon;
use uuid::Uuid;

use gridqa_datatypes::{
    get_param, CheckData, CheckExecution, CheckOutput, CheckParam, ExecutionStatus, GridCheckState,
    HistogramChart, InputFileDetails, Tile,
};

use super::{export_tile, grow_pixels, polygonize, simplify, to_wgs84, GridCheck, TileBands};
use crate::error::Result;

pub const CHECK_ID: &str = "5e2afd8a-2ced-4de8-80f5-111c459a7175";
pub const CHECK_NAME: &str = "density";

const DEFAULT_MIN_SPN: i64 = 5;
const DEFAULT_MIN_SPN_PERCENTAGE: f64 = 95.0;
const PIXEL_GROWTH: usize = 5;

/// Checks that enough soundings contributed to each grid cell.
#[derive(Debug)]
pub struct DensityCheck {
    min_spn: i64,
    min_spn_percentage: f64,
    pub spatial_qajson: bool,
    pub spatial_export: bool,
    spatial_export_location: Option<PathBuf>,

    status: ExecutionStatus,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
    error: Option<String>,

    histogram: BTreeMap<i64, u64>,
    failures: MultiPolygon<f64>,
}

impl DensityCheck {
    pub fn new(
        params: &[CheckParam],
        spatial_qajson: bool,
        spatial_export: bool,
        spatial_export_location: Option<PathBuf>,
    ) -> Self {
        let min_spn = get_param(params, "Minimum Soundings per node")
            .and_then(|v| v.as_f64())
            .map(|v| v as i64)
            .unwrap_or(DEFAULT_MIN_SPN);
        let min_spn_percentage = get_param(params, "Minimum Soundings per node percentage")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_MIN_SPN_PERCENTAGE);

        Self {
            min_spn,
            min_spn_percentage,
            spatial_qajson,
            spatial_export,
            spatial_export_location,
            status: ExecutionStatus::Draft,
            start: None,
            end: None,
            error: None,
            histogram: BTreeMap::new(),
            failures: MultiPolygon::new(Vec::new()),
        }
    }

    pub fn merge(&mut self, other: DensityCheck) {
        for (k, v) in other.histogram {
            *self.histogram.entry(k).or_insert(0) += v;
        }
        self.failures.0.extend(other.failures.0);
        if let Some(other_start) = other.start {
            self.start = Some(self.start.map_or(other_start, |s| s.min(other_start)));
        }
        if self.status == ExecutionStatus::Running && other.status != ExecutionStatus::Running {
            self.status = other.status;
            self.error = self.error.take().or(other.error);
        }
    }
}

impl GridCheck for DensityCheck {
    fn check_id(&self) -> Uuid {
        Uuid::parse_str(CHECK_ID).expect("valid check id literal")
    }

    fn status(&self) -> ExecutionStatus {
        self.status
    }

    fn start(&mut self) {
        if self.start.is_none() {
            self.start = Some(Utc::now());
            self.status = ExecutionStatus::Running;
        }
    }

    fn run(&mut self, ifd: &InputFileDetails, tile: &Tile, bands: &TileBands) -> Result<()> {
        let Some(density) = bands.density.as_ref() else {
            self.status = ExecutionStatus::Aborted;
            self.error = Some("Missing density data".to_string());
            return Ok(());
        };

        for idx in 0..density.values.len() {
            if density.mask[idx] {
                continue;
            }
            let count = density.values[idx].round() as i64;
            *self.histogram.entry(count).or_insert(0) += 1;
        }

        if self.spatial_qajson || self.spatial_export {
            let pixel_size = ifd.geotransform.resolution().0;
            let failed_mask: Vec<bool> = density
                .values
                .iter()
                .zip(&density.mask)
                .map(|(v, m)| !m && (*v as i64) < self.min_spn)
                .collect();
            let grown = grow_pixels(&failed_mask, density.width, density.height, PIXEL_GROWTH);
            let tile_gt = ifd.geotransform.tile_geotransform(tile);
            let polygons = polygonize(&grown, density.width, density.height, &tile_gt)?;
            let simplified = simplify(&polygons, PIXEL_GROWTH as f64 * pixel_size);

            if self.spatial_qajson {
                to_wgs84(&simplified, &ifd.projection, &mut self.failures)?;
            }
            if self.spatial_export {
                if let Some(location) = &self.spatial_export_location {
                    export_tile(
                        &failed_mask,
                        density.width,
                        density.height,
                        &tile_gt,
                        &ifd.projection,
                        &simplified,
                        location,
                        &ifd.common_filename(),
                        CHECK_NAME,
                        tile,
                    )?;
                }
            }
        }

        Ok(())
    }

    fn end(&mut self) {
        if self.end.is_none() {
            self.end = Some(Utc::now());
            if self.status == ExecutionStatus::Running {
                self.status = ExecutionStatus::Completed;
            }
        }
    }

    fn outputs(&self) -> CheckOutput {
        let total_soundings: u64 = self.histogram.values().sum();
        let under_threshold: u64 = self
            .histogram
            .iter()
            .filter(|(k, _)| **k < self.min_spn)
            .map(|(_, v)| v)
            .sum();

        if self.status == ExecutionStatus::Aborted {
            return CheckOutput {
                execution: CheckExecution {
                    start: self.start,
                    end: self.end,
                    status: self.status,
                    error: self.error.clone(),
                },
                messages: self.error.clone().into_iter().collect(),
                data: CheckData::default(),
                state: GridCheckState::Fail,
            };
        }

        if self.histogram.is_empty() {
            return CheckOutput {
                execution: CheckExecution {
                    start: self.start,
                    end: self.end,
                    status: self.status,
                    error: self.error.clone(),
                },
                messages: vec!["No counts were extracted, was a valid raster provided".to_string()],
                data: CheckData::default(),
                state: GridCheckState::Fail,
            };
        }

        let percentage_over_threshold = (1.0 - under_threshold as f64 / total_soundings as f64) * 100.0;
        let state = if percentage_over_threshold < self.min_spn_percentage {
            GridCheckState::Fail
        } else {
            GridCheckState::Pass
        };

        let mut data = CheckData {
            chart: Some(HistogramChart::from_counts(&self.histogram)),
            summary: Some(serde_json::json!({
                "total_soundings": total_soundings,
                "percentage_over_threshold": percentage_over_threshold,
                "under_threshold_soundings": under_threshold,
            })),
            ..Default::default()
        };
        if self.spatial_qajson && !self.failures.0.is_empty() {
            data.map = Some(geojson::Geometry::from(&self.failures));
        }

        CheckOutput {
            execution: CheckExecution {
                start: self.start,
                end: self.end,
                status: self.status,
                error: self.error.clone(),
            },
            messages: Vec::new(),
            data,
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster_io::MaskedArray;

    /// The 4x5 density tile of scenario S1: mask `[[F,F,F,F],[F,F,F,F],
    /// [F,F,F,F],[F,F,F,T],[F,F,T,T]]`.
    fn density_fixture() -> MaskedArray {
        let mut m = MaskedArray::filled(4, 5, 0.0, false);
        m.values = vec![
            10.0, 1.0, 9.0, 9.0, 10.0, 2.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0, 10.0,
            10.0, 10.0,
        ];
        m.mask = vec![
            false, false, false, false, false, false, false, false, false, false, false, false, false, false, false,
            true, false, false, true, true,
        ];
        m
    }

    #[test]
    fn s1_density_threshold_scenario() {
        let density = density_fixture();
        let bands = TileBands {
            density: Some(density),
            ..Default::default()
        };
        let params = vec![
            CheckParam::new("Minimum Soundings per node", 5.0),
            CheckParam::new("Minimum Soundings per node percentage", 95.0),
        ];
        let mut check = DensityCheck::new(&params, false, false, None);
        let ifd = InputFileDetails::new(
            4,
            5,
            gridqa_datatypes::GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            Vec::new(),
        );
        let tile = Tile::new(0, 0, 4, 5);
        check.start();
        check.run(&ifd, &tile, &bands).unwrap();
        check.end();
        let outputs = check.outputs();

        assert_eq!(check.histogram.get(&1), Some(&1));
        assert_eq!(check.histogram.get(&2), Some(&1));
        assert_eq!(check.histogram.get(&9), Some(&2));
        assert_eq!(check.histogram.get(&10), Some(&13));

        let total_soundings: u64 = check.histogram.values().sum();
        assert_eq!(total_soundings, 17);
        assert_eq!(outputs.state, GridCheckState::Fail);
    }

    #[test]
    fn s2_percentage_only_scenario() {
        let mut check = DensityCheck::new(
            &[
                CheckParam::new("Minimum Soundings per node", 0.0),
                CheckParam::new("Minimum Soundings per node percentage", 95.0),
            ],
            false,
            false,
            None,
        );
        let density = density_fixture();
        let bands = TileBands {
            density: Some(density),
            ..Default::default()
        };
        let ifd = InputFileDetails::new(
            4,
            5,
            gridqa_datatypes::GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            Vec::new(),
        );
        check.run(&ifd, &Tile::new(0, 0, 4, 5), &bands).unwrap();
        let outputs = check.outputs();
        assert_eq!(outputs.state, GridCheckState::Pass);
    }

    #[test]
    fn merge_sums_histogram_buckets() {
        let mut a = DensityCheck::new(&[], false, false, None);
        a.histogram.insert(0, 3);
        a.histogram.insert(1, 5);
        a.histogram.insert(2, 7);
        a.histogram.insert(5, 8);
        a.histogram.insert(10, 1);

        let mut b = DensityCheck::new(&[], false, false, None);
        b.histogram.insert(0, 1);
        b.histogram.insert(2, 3);
        b.histogram.insert(4, 2);
        b.histogram.insert(5, 3);
        b.histogram.insert(9, 1);

        a.merge(b);

        let expected: BTreeMap<i64, u64> =
            [(0, 4), (1, 5), (2, 10), (4, 2), (5, 11), (9, 1), (10, 1)].into_iter().collect();
        assert_eq!(a.histogram, expected);
    }

    #[test]
    fn missing_density_band_aborts() {
        let mut check = DensityCheck::new(&[], false, false, None);
        let ifd = InputFileDetails::new(
            4,
            5,
            gridqa_datatypes::GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            Vec::new(),
        );
        check.run(&ifd, &Tile::new(0, 0, 4, 5), &TileBands::default()).unwrap();
        assert_eq!(check.status(), ExecutionStatus::Aborted);
        assert_eq!(check.outputs().state, GridCheckState::Fail);
    }
}
