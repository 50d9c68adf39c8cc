//! The `GridCheck` contract (spec §4.5) and the three concrete checks.
//!
//! The concrete checks are expressed as a closed sum type rather than a
//! trait object: the registry is fixed (three UUIDs), so there is no need
//! for dynamic dispatch, and `merge` can take `&Self` directly instead of
//! juggling `Box<dyn Any>` downcasts.

pub mod density;
pub mod resolution;
pub mod tvu;

use std::path::{Path, PathBuf};

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{Geometry, LayerAccess, LayerOptions};
use gdal::DriverManager;
use geo::{MultiPolygon, Polygon};
use proj::Proj;
use snafu::ResultExt;
use uuid::Uuid;

use gridqa_datatypes::{CheckOutput, CheckParam, ExecutionStatus, GeoTransform, InputFileDetails, Tile};

use crate::error::{self, Result};
use crate::raster_io::MaskedArray;

pub use density::DensityCheck;
pub use resolution::ResolutionCheck;
pub use tvu::TvuCheck;

/// The four bands a tile may carry, already windowed and nodata-masked.
/// Absent bands are `None` — "this band is missing" per spec §3.
#[derive(Debug, Default)]
pub struct TileBands {
    pub depth: Option<MaskedArray>,
    pub density: Option<MaskedArray>,
    pub uncertainty: Option<MaskedArray>,
    pub pinkchart: Option<MaskedArray>,
}

/// Common shape every concrete check's state machine follows. Not a trait
/// object boundary — see the module doc — but documents the contract each
/// variant of [`CheckInstance`] upholds.
pub trait GridCheck {
    fn check_id(&self) -> Uuid;
    fn status(&self) -> ExecutionStatus;

    /// Called once before the first (and only) `run` on this instance.
    /// Never fails.
    fn start(&mut self);

    /// Runs the check over one tile. Errors transition the instance to
    /// `failed` (caught by the Executor, not propagated further); a
    /// required band missing transitions to `aborted` internally and
    /// returns `Ok(())`, since that is not a `RunFailure`.
    fn run(&mut self, ifd: &InputFileDetails, tile: &gridqa_datatypes::Tile, bands: &TileBands) -> Result<()>;

    /// Called once after `run`. Never fails.
    fn end(&mut self);

    fn outputs(&self) -> CheckOutput;
}

/// Registry entry point: resolves a check id to a constructed, `draft`
/// instance ready for `run`. Unknown ids are skipped by the Executor, not
/// treated as an error (spec §4.7 step 3). `spatial_qajson`/`spatial_export`
/// and, when exporting, the export root come from `ExecutorConfig` — every
/// concrete check gates its polygonize/reproject/export path on these two
/// booleans rather than always running it.
pub fn construct(
    check_id: Uuid,
    params: &[CheckParam],
    spatial_qajson: bool,
    spatial_export: bool,
    spatial_export_location: Option<PathBuf>,
) -> Option<CheckInstance> {
    match check_id.to_string().as_str() {
        density::CHECK_ID => Some(CheckInstance::Density(DensityCheck::new(
            params,
            spatial_qajson,
            spatial_export,
            spatial_export_location,
        ))),
        tvu::CHECK_ID => Some(CheckInstance::Tvu(TvuCheck::new(
            params,
            spatial_qajson,
            spatial_export,
            spatial_export_location,
        ))),
        resolution::CHECK_ID => Some(CheckInstance::Resolution(ResolutionCheck::new(
            params,
            spatial_qajson,
            spatial_export,
            spatial_export_location,
        ))),
        _ => None,
    }
}

#[derive(Debug)]
pub enum CheckInstance {
    Density(DensityCheck),
    Tvu(TvuCheck),
    Resolution(ResolutionCheck),
}

impl CheckInstance {
    pub fn check_id(&self) -> Uuid {
        match self {
            CheckInstance::Density(c) => c.check_id(),
            CheckInstance::Tvu(c) => c.check_id(),
            CheckInstance::Resolution(c) => c.check_id(),
        }
    }

    pub fn status(&self) -> ExecutionStatus {
        match self {
            CheckInstance::Density(c) => c.status(),
            CheckInstance::Tvu(c) => c.status(),
            CheckInstance::Resolution(c) => c.status(),
        }
    }

    pub fn start(&mut self) {
        match self {
            CheckInstance::Density(c) => c.start(),
            CheckInstance::Tvu(c) => c.start(),
            CheckInstance::Resolution(c) => c.start(),
        }
    }

    pub fn run(&mut self, ifd: &InputFileDetails, tile: &gridqa_datatypes::Tile, bands: &TileBands) -> Result<()> {
        match self {
            CheckInstance::Density(c) => c.run(ifd, tile, bands),
            CheckInstance::Tvu(c) => c.run(ifd, tile, bands),
            CheckInstance::Resolution(c) => c.run(ifd, tile, bands),
        }
    }

    pub fn end(&mut self) {
        match self {
            CheckInstance::Density(c) => c.end(),
            CheckInstance::Tvu(c) => c.end(),
            CheckInstance::Resolution(c) => c.end(),
        }
    }

    pub fn outputs(&self) -> CheckOutput {
        match self {
            CheckInstance::Density(c) => c.outputs(),
            CheckInstance::Tvu(c) => c.outputs(),
            CheckInstance::Resolution(c) => c.outputs(),
        }
    }

    /// Folds `other` (a prior tile's result for the same check/IFD) into
    /// `self`. Both sides must be the same variant — the Executor only ever
    /// merges results produced by the same `check_id`, so a mismatch is an
    /// internal invariant violation.
    pub fn merge(&mut self, other: CheckInstance) -> Result<()> {
        match (self, other) {
            (CheckInstance::Density(a), CheckInstance::Density(b)) => {
                a.merge(b);
                Ok(())
            }
            (CheckInstance::Tvu(a), CheckInstance::Tvu(b)) => {
                a.merge(b);
                Ok(())
            }
            (CheckInstance::Resolution(a), CheckInstance::Resolution(b)) => {
                a.merge(b);
                Ok(())
            }
            _ => Err(error::Error::fatal("attempted to merge mismatched check variants")),
        }
    }
}

/// Morphological dilation of a row-major byte mask with an `n x n` kernel,
/// used to visually enlarge failed cells before polygonization. Dilation
/// only ever grows the failed set; it must never feed back into statistics
/// (spec §9: growth must not affect `total_cell_count`/`failed_cell_count`).
pub fn grow_pixels(mask: &[bool], width: usize, height: usize, n: usize) -> Vec<bool> {
    if n <= 1 {
        return mask.to_vec();
    }
    let radius = (n / 2) as isize;
    let mut out = vec![false; mask.len()];
    for y in 0..height {
        for x in 0..width {
            if !mask[y * width + x] {
                continue;
            }
            for dy in -radius..=radius {
                let ny = y as isize + dy;
                if ny < 0 || ny >= height as isize {
                    continue;
                }
                for dx in -radius..=radius {
                    let nx = x as isize + dx;
                    if nx < 0 || nx >= width as isize {
                        continue;
                    }
                    out[ny as usize * width + nx as usize] = true;
                }
            }
        }
    }
    out
}

/// Connected non-zero regions of a byte mask become polygon features in the
/// tile's projected coordinates; zero is background. Delegates to GDAL's
/// polygonizer (`GDALPolygonize`, via an in-memory raster/vector pair)
/// rather than reimplementing boundary tracing, matching the reference
/// implementation's own approach.
pub fn polygonize(mask: &[bool], width: usize, height: usize, tile_geotransform: &GeoTransform) -> Result<Vec<Polygon<f64>>> {
    crate::gdal_polygonize::polygonize_mask(mask, width, height, tile_geotransform)
}

/// Douglas-Peucker-style simplification at the given tolerance.
pub fn simplify(polygons: &[Polygon<f64>], distance: f64) -> Vec<Polygon<f64>> {
    use geo::Simplify;
    polygons.iter().map(|p| p.simplify(&distance)).collect()
}

/// Reprojects `polygons` (in `source_wkt`) into EPSG:4326 and appends their
/// rings to `accumulator`, swapping to `(lat, lon)` axis order as the
/// QA-JSON output requires (spec §6 — easy to get backwards, and
/// deliberately documented here rather than only in the output code).
pub fn to_wgs84(polygons: &[Polygon<f64>], source_wkt: &str, accumulator: &mut MultiPolygon<f64>) -> Result<()> {
    if polygons.is_empty() {
        return Ok(());
    }
    let transform = Proj::new_known_crs(source_wkt, "EPSG:4326", None).context(error::Proj)?;
    let reproject_ring = |ring: &geo::LineString<f64>| -> geo::LineString<f64> {
        geo::LineString(
            ring.coords()
                .map(|c| {
                    let (lon, lat) = transform.convert((c.x, c.y)).unwrap_or((c.x, c.y));
                    geo::Coordinate { x: lat, y: lon }
                })
                .collect(),
        )
    };

    for polygon in polygons {
        let exterior = reproject_ring(polygon.exterior());
        let interiors = polygon.interiors().iter().map(reproject_ring).collect();
        accumulator.0.push(Polygon::new(exterior, interiors));
    }
    Ok(())
}

/// Writes one tile's failure-mask GeoTIFF and, if any failure polygons were
/// found, a companion failure-polygon shapefile under
/// `export_root/<ifd_name>/<check_name>/tile_<x>_<y>.{tif,shp}` (spec §4.5,
/// §6 "Persisted state"). The mask written is the ungrown failure mask, not
/// the dilated one used for polygonization.
pub fn export_tile(
    mask: &[bool],
    width: usize,
    height: usize,
    tile_geotransform: &GeoTransform,
    projection: &str,
    polygons: &[Polygon<f64>],
    export_root: &Path,
    ifd_name: &str,
    check_name: &str,
    tile: &Tile,
) -> Result<()> {
    let dir = export_root.join(ifd_name).join(check_name);
    std::fs::create_dir_all(&dir).context(error::Io {
        path: dir.display().to_string(),
    })?;

    let stem = format!("tile_{}_{}", tile.min_x, tile.min_y);
    write_mask_geotiff(mask, width, height, tile_geotransform, projection, &dir.join(format!("{stem}.tif")))?;
    if !polygons.is_empty() {
        write_polygon_shapefile(polygons, projection, &dir.join(format!("{stem}.shp")))?;
    }
    Ok(())
}

fn write_mask_geotiff(
    mask: &[bool],
    width: usize,
    height: usize,
    geotransform: &GeoTransform,
    projection: &str,
    path: &Path,
) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("GTiff").context(error::Gdal)?;
    let mut dataset = driver
        .create_with_band_type::<u8, _>(path, width, height, 1)
        .context(error::Gdal)?;
    dataset.set_geo_transform(&geotransform.to_gdal()).context(error::Gdal)?;
    dataset.set_projection(projection).context(error::Gdal)?;
    {
        let mut band = dataset.rasterband(1).context(error::Gdal)?;
        let data: Vec<u8> = mask.iter().map(|&m| if m { 1 } else { 0 }).collect();
        let mut buffer = Buffer::new((width, height), data);
        band.write((0, 0), (width, height), &mut buffer).context(error::Gdal)?;
    }
    dataset.flush_cache().context(error::Gdal)?;
    Ok(())
}

fn ring_to_wkt(ring: &geo::LineString<f64>) -> String {
    let coords: Vec<String> = ring.coords().map(|c| format!("{} {}", c.x, c.y)).collect();
    format!("({})", coords.join(", "))
}

fn polygon_to_wkt(polygon: &Polygon<f64>) -> String {
    let mut rings = vec![ring_to_wkt(polygon.exterior())];
    rings.extend(polygon.interiors().iter().map(ring_to_wkt));
    format!("POLYGON ({})", rings.join(", "))
}

fn write_polygon_shapefile(polygons: &[Polygon<f64>], projection: &str, path: &Path) -> Result<()> {
    let driver = DriverManager::get_driver_by_name("ESRI Shapefile").context(error::Gdal)?;
    let mut dataset = driver.create_vector_only(path).context(error::Gdal)?;
    let srs = SpatialRef::from_wkt(projection).ok();
    let mut layer = dataset
        .create_layer(LayerOptions {
            name: "failures",
            ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
            srs: srs.as_ref(),
            ..Default::default()
        })
        .context(error::Gdal)?;

    for polygon in polygons {
        let geometry = Geometry::from_wkt(&polygon_to_wkt(polygon)).context(error::Gdal)?;
        layer.create_feature(geometry).context(error::Gdal)?;
    }
    dataset.flush_cache().context(error::Gdal)?;
    Ok(())
}

/// WGS-84 `MultiPolygon` of an IFD's full pixel-grid bounding box — the
/// `data.extents` field of every check's output (spec §3, §10; grounded on
/// `data.py`'s `get_extents_feature`).
pub fn dataset_extents(ifd: &InputFileDetails) -> Result<MultiPolygon<f64>> {
    if ifd.size_x == 0 || ifd.size_y == 0 {
        return Ok(MultiPolygon::new(Vec::new()));
    }
    let gt = &ifd.geotransform;
    let corners = [
        gt.pixel_to_coord(0.0, 0.0),
        gt.pixel_to_coord(ifd.size_x as f64, 0.0),
        gt.pixel_to_coord(ifd.size_x as f64, ifd.size_y as f64),
        gt.pixel_to_coord(0.0, ifd.size_y as f64),
        gt.pixel_to_coord(0.0, 0.0),
    ];
    let ring: Vec<geo::Coordinate<f64>> = corners.into_iter().map(|(x, y)| geo::Coordinate { x, y }).collect();
    let polygon = Polygon::new(geo::LineString(ring), Vec::new());

    let mut accumulator = MultiPolygon::new(Vec::new());
    to_wgs84(&[polygon], &ifd.projection, &mut accumulator)?;
    Ok(accumulator)
}
