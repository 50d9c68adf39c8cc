//! Orchestrates one run: preprocessing, tiling, per-tile/per-check dispatch
//! and cross-tile merge, progress accounting, cooperative cancellation
//! (spec §4.7).

use std::collections::HashMap;
use std::path::PathBuf;

use log::{debug, info, warn};
use snafu::ResultExt;
use uuid::Uuid;

use gridqa_datatypes::{BandType, CheckOutput, InputFileDetails, Tile};

use crate::checks::{self, CheckInstance, TileBands};
use crate::error::{self, Result};
use crate::pink_chart;
use crate::raster_io::RasterIo;
use crate::tiling;

/// Tunable knobs for one `Executor::run`. Mirrors the teacher's
/// `TilingSpecification`-style config struct: a plain value with a
/// `Default` impl rather than a global.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub tile_size_x: i64,
    pub tile_size_y: i64,
    pub spatial_qajson: bool,
    pub spatial_export: bool,
    pub spatial_export_location: Option<PathBuf>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            tile_size_x: 40_000,
            tile_size_y: 40_000,
            spatial_qajson: true,
            spatial_export: false,
            spatial_export_location: None,
        }
    }
}

/// `(fraction_complete, message)`.
pub type ProgressCb<'a> = dyn FnMut(f64, &str) + 'a;
/// Fired once per check, after every tile has finished, so the caller can
/// re-serialize its QA-JSON document with updated outputs.
pub type QaJsonUpdateCb<'a> = dyn FnMut(Uuid, &CheckOutput) + 'a;
/// Polled before preprocessing, before each tile, and before each check
/// within a tile (spec §4.7 step 5). `true` stops the run.
pub type IsStoppedFn<'a> = dyn Fn() -> bool + 'a;

/// Opened raster readers for one IFD's bands, keyed by path so a file
/// contributing more than one band (BAG depth+uncertainty) is only opened
/// once.
struct TileReaders {
    readers: HashMap<PathBuf, RasterIo>,
    bands: HashMap<BandType, (PathBuf, usize)>,
}

fn open_band_readers(ifd: &InputFileDetails) -> Result<TileReaders> {
    let mut readers: HashMap<PathBuf, RasterIo> = HashMap::new();
    let mut bands: HashMap<BandType, (PathBuf, usize)> = HashMap::new();
    for band in &ifd.bands {
        if !readers.contains_key(&band.path) {
            readers.insert(band.path.clone(), RasterIo::open(&band.path)?);
        }
        bands.insert(band.band_type, (band.path.clone(), band.band_index));
    }
    Ok(TileReaders { readers, bands })
}

fn load_tile_bands(readers: &TileReaders, tile: &Tile) -> Result<TileBands> {
    let mut out = TileBands::default();
    for (band_type, (path, band_index)) in &readers.bands {
        let io = readers
            .readers
            .get(path)
            .expect("a reader was opened for every path referenced by `bands`");
        let array = match band_type {
            BandType::Density => io.read_density_window(*band_index, tile)?,
            _ => io.read_window(*band_index, tile)?,
        };
        match band_type {
            BandType::Depth => out.depth = Some(array),
            BandType::Density => out.density = Some(array),
            BandType::Uncertainty => out.uncertainty = Some(array),
            BandType::PinkChart => out.pinkchart = Some(array),
        }
    }
    Ok(out)
}

/// Orchestrates one execution against a list of resolved [`InputFileDetails`].
#[derive(Debug, Default)]
pub struct Executor {
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    /// Runs every IFD's checks to completion (or until `is_stopped` fires).
    /// Temp directories created for pink-chart preprocessing are owned
    /// locally and released on every exit path via `Drop`, including the
    /// error and early-return paths below.
    pub fn run(
        &mut self,
        ifds: Vec<InputFileDetails>,
        mut progress_cb: Option<&mut ProgressCb<'_>>,
        mut qajson_update_cb: Option<&mut QaJsonUpdateCb<'_>>,
        is_stopped: Option<&IsStoppedFn<'_>>,
    ) -> Result<()> {
        let stopped = || is_stopped.map(|f| f()).unwrap_or(false);
        fn report(cb: &mut Option<&mut ProgressCb<'_>>, frac: f64, msg: &str) {
            if let Some(cb) = cb.as_deref_mut() {
                cb(frac, msg);
            }
        }

        report(&mut progress_cb, 0.0, "starting");
        if stopped() {
            return Ok(());
        }

        // source_input_file_details: pre-preprocessing snapshot (spec §4.7 step 1).
        let source_ifds = ifds;
        let mut temp_dirs: Vec<tempfile::TempDir> = Vec::new();
        let mut working: Vec<(usize, InputFileDetails)> = Vec::with_capacity(source_ifds.len());

        for (index, ifd) in source_ifds.iter().enumerate() {
            if ifd.coverage_vector_path.is_some() {
                let dir = tempfile::tempdir().context(error::Io {
                    path: "<pink chart temp dir>".to_string(),
                })?;
                info!("aligning {} to its coverage vector", ifd.common_filename());
                let aligned = pink_chart::process(ifd, dir.path())?;
                temp_dirs.push(dir);
                working.push((index, aligned));
            } else {
                working.push((index, ifd.clone()));
            }
        }

        if stopped() {
            return Ok(());
        }
        report(&mut progress_cb, 0.05, "pre-process complete");

        let total_tile_count: usize = working
            .iter()
            .map(|(_, ifd)| {
                if ifd.size_x == 0 || ifd.size_y == 0 {
                    0
                } else {
                    tiling::count(
                        0,
                        0,
                        ifd.size_x as i64,
                        ifd.size_y as i64,
                        self.config.tile_size_x,
                        self.config.tile_size_y,
                    )
                }
            })
            .sum();
        let per_tile_span = 0.95 / total_tile_count.max(1) as f64;
        let mut tiles_done = 0usize;

        let mut cache: HashMap<(usize, Uuid), CheckInstance> = HashMap::new();

        'ifds: for (source_index, ifd) in &working {
            if ifd.size_x == 0 || ifd.size_y == 0 {
                warn!("skipping IFD at index {source_index} with zero-size raster");
                continue;
            }
            let readers = open_band_readers(ifd)?;

            for tile in tiling::tiles(
                0,
                0,
                ifd.size_x as i64,
                ifd.size_y as i64,
                self.config.tile_size_x,
                self.config.tile_size_y,
            ) {
                if stopped() {
                    break 'ifds;
                }
                debug!("processing tile {tile} of IFD {source_index}");

                let bands = load_tile_bands(&readers, &tile)?;
                let tile_start = 0.05 + per_tile_span * tiles_done as f64;
                report(&mut progress_cb, tile_start + per_tile_span * 0.2, "tile loaded");

                let check_count = ifd.checks.len().max(1);
                for (check_index, request) in ifd.checks.iter().enumerate() {
                    if stopped() {
                        break 'ifds;
                    }

                    let Some(mut instance) = checks::construct(
                        request.check_id,
                        &request.params,
                        self.config.spatial_qajson,
                        self.config.spatial_export,
                        self.config.spatial_export_location.clone(),
                    ) else {
                        debug!("no check registered for id {}", request.check_id);
                        continue;
                    };

                    instance.start();
                    if let Err(err) = instance.run(ifd, &tile, &bands) {
                        warn!("check {} failed on tile {tile}: {err}", request.check_id);
                    }
                    instance.end();

                    let key = (*source_index, request.check_id);
                    match cache.remove(&key) {
                        Some(mut existing) => {
                            existing.merge(instance)?;
                            cache.insert(key, existing);
                        }
                        None => {
                            cache.insert(key, instance);
                        }
                    }

                    let within_tile = 0.2 + 0.8 * (check_index + 1) as f64 / check_count as f64;
                    report(&mut progress_cb, tile_start + per_tile_span * within_tile, "check complete");
                }

                tiles_done += 1;
            }
        }

        for (source_index, source_ifd) in source_ifds.iter().enumerate() {
            for check_id in &source_ifd.qajson_checks {
                let Some(instance) = cache.get(&(source_index, *check_id)) else {
                    continue;
                };
                let mut output = instance.outputs();
                if let Ok(extents) = checks::dataset_extents(source_ifd) {
                    if !extents.0.is_empty() {
                        output.data.extents = Some(geojson::Geometry::from(&extents));
                    }
                }
                if let Some(cb) = qajson_update_cb.as_deref_mut() {
                    cb(*check_id, &output);
                }
            }
        }

        report(&mut progress_cb, 1.0, "complete");
        drop(temp_dirs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridqa_datatypes::GeoTransform;

    #[test]
    fn empty_input_completes_immediately() {
        let mut executor = Executor::new(ExecutorConfig::default());
        let mut progress_events = Vec::new();
        let mut progress_cb = |frac: f64, msg: &str| progress_events.push((frac, msg.to_string()));
        executor.run(Vec::new(), Some(&mut progress_cb), None, None).unwrap();
        assert_eq!(progress_events.first().unwrap().0, 0.0);
        assert_eq!(progress_events.last().unwrap().0, 1.0);
    }

    #[test]
    fn is_stopped_short_circuits_before_preprocessing() {
        let mut executor = Executor::new(ExecutorConfig::default());
        let ifd = InputFileDetails::new(10, 10, GeoTransform::new(0.0, 1.0, 0.0, -1.0), "EPSG:4326", Vec::new());
        let always_stopped = || true;
        let result = executor.run(vec![ifd], None, None, Some(&always_stopped));
        assert!(result.is_ok());
    }
}
