use std::path::PathBuf;

use chrono::Utc;
use geo::MultiPolygon;
use uuid::Uuid;

use gridqa_datatypes::{
    get_param, CheckData, CheckExecution, CheckOutput, CheckParam, ExecutionStatus, GridCheckState, InputFileDetails,
    Tile,
};

use super::{export_tile, grow_pixels, polygonize, simplify, to_wgs84, GridCheck, TileBands};
use crate::error::Result;

pub const CHECK_ID: &str = "c73119ea-4f79-4001-86e3-11c4cbaaeb2d";
pub const CHECK_NAME: &str = "resolution";

const DEFAULT_FDS_MULTIPLIER: f64 = 0.5;
const DEFAULT_THRESHOLD_DEPTH: f64 = 40.0;
const DEFAULT_ABOVE_MULTIPLIER: f64 = 0.0;
const DEFAULT_ABOVE_CONSTANT: f64 = 2.0;
const DEFAULT_BELOW_MULTIPLIER: f64 = 0.05;
const DEFAULT_BELOW_CONSTANT: f64 = 0.0;
const PIXEL_GROWTH: usize = 5;

/// Checks that the grid resolution is fine enough to detect seafloor
/// features of the expected size at each cell's depth.
#[derive(Debug)]
pub struct ResolutionCheck {
    multiplier: f64,
    threshold_depth: f64,
    above_multiplier: f64,
    above_constant: f64,
    below_multiplier: f64,
    below_constant: f64,
    pub spatial_qajson: bool,
    pub spatial_export: bool,
    spatial_export_location: Option<PathBuf>,

    status: ExecutionStatus,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
    error: Option<String>,

    total_cell_count: u64,
    failed_cell_count: u64,
    grid_resolution: Option<f64>,
    failures: MultiPolygon<f64>,
}

impl ResolutionCheck {
    pub fn new(
        params: &[CheckParam],
        spatial_qajson: bool,
        spatial_export: bool,
        spatial_export_location: Option<PathBuf>,
    ) -> Self {
        let get = |name: &str, default: f64| get_param(params, name).and_then(|v| v.as_f64()).unwrap_or(default);
        Self {
            multiplier: get("Feature Detection Size Multiplier", DEFAULT_FDS_MULTIPLIER),
            threshold_depth: get("Threshold Depth", DEFAULT_THRESHOLD_DEPTH),
            above_multiplier: get("Above Threshold FDS Depth Multiplier", DEFAULT_ABOVE_MULTIPLIER),
            above_constant: get("Above Threshold FDS Depth Constant", DEFAULT_ABOVE_CONSTANT),
            below_multiplier: get("Below Threshold FDS Depth Multiplier", DEFAULT_BELOW_MULTIPLIER),
            below_constant: get("Below Threshold FDS Depth Constant", DEFAULT_BELOW_CONSTANT),
            spatial_qajson,
            spatial_export,
            spatial_export_location,
            status: ExecutionStatus::Draft,
            start: None,
            end: None,
            error: None,
            total_cell_count: 0,
            failed_cell_count: 0,
            grid_resolution: None,
            failures: MultiPolygon::new(Vec::new()),
        }
    }

    /// Piecewise feature-detection size at depth `d` (already `|depth|`).
    fn feature_detection_size(&self, d: f64) -> f64 {
        if d < self.threshold_depth.abs() {
            self.above_multiplier * d + self.above_constant
        } else {
            self.below_multiplier * d + self.below_constant
        }
    }

    pub fn merge(&mut self, other: ResolutionCheck) {
        self.total_cell_count += other.total_cell_count;
        self.failed_cell_count += other.failed_cell_count;
        self.failures.0.extend(other.failures.0);
        self.grid_resolution = self.grid_resolution.or(other.grid_resolution);
        if let Some(other_start) = other.start {
            self.start = Some(self.start.map_or(other_start, |s| s.min(other_start)));
        }
        if self.status == ExecutionStatus::Running && other.status != ExecutionStatus::Running {
            self.status = other.status;
            self.error = self.error.take().or(other.error);
        }
    }
}

impl GridCheck for ResolutionCheck {
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
        let Some(depth) = bands.depth.as_ref() else {
            self.status = ExecutionStatus::Aborted;
            self.error = Some("Missing depth data".to_string());
            return Ok(());
        };

        let grid_resolution = ifd.geotransform.pixel_width;
        self.grid_resolution = Some(grid_resolution);

        let mut failed_mask = vec![false; depth.values.len()];
        for idx in 0..depth.values.len() {
            if depth.mask[idx] {
                continue;
            }
            let d = depth.values[idx].abs();
            let fds = self.feature_detection_size(d);
            let allowable_grid_size = fds * self.multiplier;
            let failed = allowable_grid_size < grid_resolution;
            failed_mask[idx] = failed;
            self.total_cell_count += 1;
            if failed {
                self.failed_cell_count += 1;
            }
        }

        if self.spatial_qajson || self.spatial_export {
            let pixel_size = grid_resolution.abs();
            let grown = grow_pixels(&failed_mask, depth.width, depth.height, PIXEL_GROWTH);
            let tile_gt = ifd.geotransform.tile_geotransform(tile);
            let polygons = polygonize(&grown, depth.width, depth.height, &tile_gt)?;
            let simplified = simplify(&polygons, PIXEL_GROWTH as f64 * pixel_size);

            if self.spatial_qajson {
                to_wgs84(&simplified, &ifd.projection, &mut self.failures)?;
            }
            if self.spatial_export {
                if let Some(location) = &self.spatial_export_location {
                    export_tile(
                        &failed_mask,
                        depth.width,
                        depth.height,
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

        let fraction_failed = if self.total_cell_count > 0 {
            self.failed_cell_count as f64 / self.total_cell_count as f64
        } else {
            0.0
        };
        let state = if self.failed_cell_count == 0 && self.status == ExecutionStatus::Completed {
            GridCheckState::Pass
        } else {
            GridCheckState::Fail
        };

        let mut data = CheckData {
            extra: serde_json::json!({
                "failed_cell_count": self.failed_cell_count,
                "total_cell_count": self.total_cell_count,
                "fraction_failed": fraction_failed,
                "grid_resolution": self.grid_resolution,
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
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

    fn depth_fixture() -> MaskedArray {
        let mut m = MaskedArray::filled(4, 5, 0.0, false);
        m.values = vec![
            -40.0, -40.0, -40.0, -40.0, -40.0, -60.0, -80.0, -40.0, -40.0, -60.0, -70.0, -40.0, -40.0, -30.0, -70.0,
            -40.0, -40.0, -40.0, -40.0, -40.0,
        ];
        m.mask = vec![
            false, false, false, false, false, false, false, false, false, false, false, false, false, false,
            false, true, false, false, true, true,
        ];
        m
    }

    #[test]
    fn s4_resolution_scenario() {
        let mut check = ResolutionCheck::new(
            &[
                CheckParam::new("Feature Detection Size Multiplier", 1.5),
                CheckParam::new("Threshold Depth", 40.0),
                CheckParam::new("Above Threshold FDS Depth Multiplier", 0.0),
                CheckParam::new("Above Threshold FDS Depth Constant", 2.0),
                CheckParam::new("Below Threshold FDS Depth Multiplier", 0.025),
                CheckParam::new("Below Threshold FDS Depth Constant", 0.0),
            ],
            false,
            false,
            None,
        );
        let bands = TileBands {
            depth: Some(depth_fixture()),
            ..Default::default()
        };
        let ifd = InputFileDetails::new(
            4,
            5,
            gridqa_datatypes::GeoTransform::new(0.0, 2.0, 0.0, -2.0),
            "EPSG:4326",
            Vec::new(),
        );
        check.start();
        check.run(&ifd, &Tile::new(0, 0, 4, 5), &bands).unwrap();
        check.end();

        assert_eq!(check.total_cell_count, 17);
        assert_eq!(check.failed_cell_count, 11);
    }
}
