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

pub const CHECK_ID: &str = "b5c0469c-6559-4aea-bf9c-d0b337550e89";
pub const CHECK_NAME: &str = "tvu";

const DEFAULT_CONSTANT_DEPTH_ERROR: f64 = 0.5;
const DEFAULT_FACTOR_OF_DEPTH_DEPENDENT_ERRORS: f64 = 0.013;
const PIXEL_GROWTH: usize = 5;

/// Checks measured vertical uncertainty against an allowable envelope
/// derived from depth.
#[derive(Debug)]
pub struct TvuCheck {
    a: f64,
    b: f64,
    pub spatial_qajson: bool,
    pub spatial_export: bool,
    spatial_export_location: Option<PathBuf>,

    status: ExecutionStatus,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
    error: Option<String>,

    total_cell_count: u64,
    failed_cell_count: u64,
    failures: MultiPolygon<f64>,
}

impl TvuCheck {
    pub fn new(
        params: &[CheckParam],
        spatial_qajson: bool,
        spatial_export: bool,
        spatial_export_location: Option<PathBuf>,
    ) -> Self {
        let a = get_param(params, "Constant Depth Error")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_CONSTANT_DEPTH_ERROR);
        let b = get_param(params, "Factor of Depth Dependent Errors")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_FACTOR_OF_DEPTH_DEPENDENT_ERRORS);

        Self {
            a,
            b,
            spatial_qajson,
            spatial_export,
            spatial_export_location,
            status: ExecutionStatus::Draft,
            start: None,
            end: None,
            error: None,
            total_cell_count: 0,
            failed_cell_count: 0,
            failures: MultiPolygon::new(Vec::new()),
        }
    }

    pub fn merge(&mut self, other: TvuCheck) {
        self.total_cell_count += other.total_cell_count;
        self.failed_cell_count += other.failed_cell_count;
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

impl GridCheck for TvuCheck {
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
        let (Some(depth), Some(uncertainty)) = (bands.depth.as_ref(), bands.uncertainty.as_ref()) else {
            self.status = ExecutionStatus::Aborted;
            self.error = Some("Missing depth or uncertainty data".to_string());
            return Ok(());
        };

        let mut failed_mask = vec![false; uncertainty.values.len()];
        for idx in 0..uncertainty.values.len() {
            if uncertainty.mask[idx] || depth.mask[idx] {
                continue;
            }
            let u = uncertainty.values[idx].abs();
            let d = depth.values[idx];
            let allowable = (self.a.powi(2) + (self.b * d).powi(2)).sqrt();
            let failed = u > allowable;
            failed_mask[idx] = failed;
            self.total_cell_count += 1;
            if failed {
                self.failed_cell_count += 1;
            }
        }

        if self.spatial_qajson || self.spatial_export {
            let pixel_size = ifd.geotransform.resolution().0;
            let grown = grow_pixels(&failed_mask, uncertainty.width, uncertainty.height, PIXEL_GROWTH);
            let tile_gt = ifd.geotransform.tile_geotransform(tile);
            let polygons = polygonize(&grown, uncertainty.width, uncertainty.height, &tile_gt)?;
            let simplified = simplify(&polygons, PIXEL_GROWTH as f64 * pixel_size);

            if self.spatial_qajson {
                to_wgs84(&simplified, &ifd.projection, &mut self.failures)?;
            }
            if self.spatial_export {
                if let Some(location) = &self.spatial_export_location {
                    export_tile(
                        &failed_mask,
                        uncertainty.width,
                        uncertainty.height,
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

    fn s1_mask() -> Vec<bool> {
        vec![
            false, false, false, false, false, false, false, false, false, false, false, false, false, false,
            false, true, false, false, true, true,
        ]
    }

    fn depth_fixture() -> MaskedArray {
        let mut m = MaskedArray::filled(4, 5, 0.0, false);
        m.values = vec![
            -40.0, -40.0, -40.0, -40.0, -40.0, -60.0, -80.0, -40.0, -40.0, -60.0, -70.0, -40.0, -40.0, -30.0, -70.0,
            -40.0, -40.0, -40.0, -40.0, -40.0,
        ];
        m.mask = s1_mask();
        m
    }

    fn uncertainty_fixture() -> MaskedArray {
        let mut m = MaskedArray::filled(4, 5, 0.0, false);
        m.values = vec![
            0.7, 0.7, 0.2, 0.2, 0.7, 0.4, 0.2, 0.2, 0.2, 0.2, 0.2, 0.9, 0.2, 0.2, 0.9, 0.0, 0.2, 0.2, 0.2, 0.0,
        ];
        m.mask = s1_mask();
        m
    }

    #[test]
    fn s3_tvu_scenario() {
        let mut check = TvuCheck::new(
            &[
                CheckParam::new("Constant Depth Error", 0.1),
                CheckParam::new("Factor of Depth Dependent Errors", 0.007),
            ],
            false,
            false,
            None,
        );
        let bands = TileBands {
            depth: Some(depth_fixture()),
            uncertainty: Some(uncertainty_fixture()),
            ..Default::default()
        };
        let ifd = InputFileDetails::new(
            4,
            5,
            gridqa_datatypes::GeoTransform::new(0.0, 1.0, 0.0, -1.0),
            "EPSG:4326",
            Vec::new(),
        );
        check.start();
        check.run(&ifd, &Tile::new(0, 0, 4, 5), &bands).unwrap();
        check.end();

        assert_eq!(check.total_cell_count, 17);
        assert_eq!(check.failed_cell_count, 5);
    }

    #[test]
    fn merge_sums_totals_and_failures() {
        let mut a = TvuCheck::new(&[], false, false, None);
        a.total_cell_count = 10;
        a.failed_cell_count = 2;
        let mut b = TvuCheck::new(&[], false, false, None);
        b.total_cell_count = 5;
        b.failed_cell_count = 1;
        a.merge(b);
        assert_eq!(a.total_cell_count, 15);
        assert_eq!(a.failed_cell_count, 3);
    }
}
