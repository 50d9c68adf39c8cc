//! Aligns and clips raster inputs to a coverage polygon ("pink chart"),
//! spec §4.4.

use std::path::{Path, PathBuf};
use std::ptr;

use gdal::spatial_ref::SpatialRef;
use gdal::vector::LayerAccess;
use gdal::{Dataset, DriverManager};
use snafu::ResultExt;

use gridqa_datatypes::{BandRef, BandType, GeoTransform, InputFileDetails};

use crate::error::{self, Result};
use crate::raster_io::RasterIo;

/// A projected-coordinate bounding box, `(min_x, min_y, max_x, max_y)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extents {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extents {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self, res_x: f64) -> usize {
        ((self.max_x - self.min_x) / res_x).round() as usize
    }

    pub fn height(&self, res_y: f64) -> usize {
        ((self.max_y - self.min_y) / res_y).round() as usize
    }
}

/// Snaps `source_bound` outward just far enough to also cover
/// `target_bound`, landing on a multiple of `res` measured from
/// `source_bound` — never moves inward. `outward_is_positive` is `true` for
/// a max bound (grows toward +infinity), `false` for a min bound (grows
/// toward -infinity).
fn align_bound(source_bound: f64, target_bound: f64, res: f64, outward_is_positive: bool) -> f64 {
    let diff = target_bound - source_bound;
    let clamped = if outward_is_positive {
        diff.max(0.0)
    } else {
        diff.min(0.0)
    };
    let steps = if outward_is_positive {
        (clamped / res).ceil()
    } else {
        (clamped / res).floor()
    };
    source_bound + steps * res
}

/// Computes the aligned target extent: a superset of both `raster_extent`
/// and `vector_extent`, snapped to `raster_extent`'s grid at resolution
/// `(res_x, res_y)` (spec §4.4 step 3, scenario S6).
pub fn calc_ideal_extents(raster_extent: Extents, vector_extent: Extents, res_x: f64, res_y: f64) -> Result<Extents> {
    let aligned = Extents {
        min_x: align_bound(raster_extent.min_x, vector_extent.min_x, res_x, false),
        min_y: align_bound(raster_extent.min_y, vector_extent.min_y, res_y, false),
        max_x: align_bound(raster_extent.max_x, vector_extent.max_x, res_x, true),
        max_y: align_bound(raster_extent.max_y, vector_extent.max_y, res_y, true),
    };

    if aligned.width(res_x) == 0 || aligned.height(res_y) == 0 {
        return Err(error::Error::fatal(
            "aligned extent computation yielded a zero-size dimension",
        ));
    }

    Ok(aligned)
}

fn raster_extent(io: &RasterIo) -> Result<Extents> {
    let (size_x, size_y) = io.size();
    let gt = io.geotransform()?;
    let (x0, y0) = gt.pixel_to_coord(0.0, 0.0);
    let (x1, y1) = gt.pixel_to_coord(size_x as f64, size_y as f64);
    Ok(Extents::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)))
}

fn vector_extent(path: &Path, raster_wkt: &str) -> Result<Extents> {
    let dataset = Dataset::open(path).context(error::Gdal)?;
    let mut layer = dataset.layer(0).context(error::Gdal)?;
    let envelope = layer.get_extent().context(error::Gdal)?;
    let (min_x, max_x, min_y, max_y) = (envelope.MinX, envelope.MaxX, envelope.MinY, envelope.MaxY);

    let vector_wkt = layer
        .spatial_ref()
        .and_then(|sr| sr.to_wkt().ok())
        .unwrap_or_default();

    if vector_wkt.trim() == raster_wkt.trim() {
        return Ok(Extents::new(min_x, min_y, max_x, max_y));
    }

    let source_sr = layer.spatial_ref().context(error::Gdal)?;
    let target_sr = SpatialRef::from_wkt(raster_wkt).context(error::Gdal)?;
    let transform =
        proj::Proj::new_known_crs(&source_sr.to_proj4().unwrap_or_default(), &target_sr.to_proj4().unwrap_or_default(), None)
            .context(error::Proj)?;

    let corners = [(min_x, min_y), (min_x, max_y), (max_x, min_y), (max_x, max_y)];
    let mut tmin_x = f64::INFINITY;
    let mut tmin_y = f64::INFINITY;
    let mut tmax_x = f64::NEG_INFINITY;
    let mut tmax_y = f64::NEG_INFINITY;
    for (x, y) in corners {
        let (tx, ty) = transform.convert((x, y)).context(error::ProjTransform)?;
        tmin_x = tmin_x.min(tx);
        tmin_y = tmin_y.min(ty);
        tmax_x = tmax_x.max(tx);
        tmax_y = tmax_y.max(ty);
    }

    Ok(Extents::new(tmin_x, tmin_y, tmax_x, tmax_y))
}

/// Creates a single-band byte raster covering `extent` at `(res_x, res_y)`
/// and burns every polygon feature of `vector_path` into it with value 1
/// (background 0).
fn rasterize_mask(vector_path: &Path, extent: Extents, res_x: f64, res_y: f64, out_path: &Path, wkt: &str) -> Result<()> {
    let width = extent.width(res_x);
    let height = extent.height(res_y);

    let driver = DriverManager::get_driver_by_name("GTiff").context(error::Gdal)?;
    let mut dataset = driver
        .create_with_band_type::<u8, _>(out_path, width, height, 1)
        .context(error::Gdal)?;
    dataset
        .set_geo_transform(&GeoTransform::new(extent.min_x, res_x, extent.max_y, -res_y).to_gdal())
        .context(error::Gdal)?;
    dataset.set_projection(wkt).context(error::Gdal)?;
    {
        let mut band = dataset.rasterband(1).context(error::Gdal)?;
        band.fill(0.0, None).context(error::Gdal)?;
    }
    dataset.flush_cache().context(error::Gdal)?;
    drop(dataset);

    let vector_dataset = Dataset::open(vector_path).context(error::Gdal)?;
    let raster_dataset = Dataset::open_ex(out_path, gdal::DatasetOptions {
        open_flags: gdal::GdalOpenFlags::GDAL_OF_RASTER | gdal::GdalOpenFlags::GDAL_OF_UPDATE,
        ..Default::default()
    })
    .context(error::Gdal)?;

    unsafe {
        let mut layer = vector_dataset.layer(0).context(error::Gdal)?;
        let layer_ptr = layer.c_layer();
        let mut band_list: [i32; 1] = [1];
        let mut burn_values: [f64; 1] = [1.0];
        let mut layers: [gdal_sys::OGRLayerH; 1] = [layer_ptr];
        let rv = gdal_sys::GDALRasterizeLayers(
            raster_dataset.c_dataset(),
            1,
            band_list.as_mut_ptr(),
            1,
            layers.as_mut_ptr(),
            None,
            ptr::null_mut(),
            burn_values.as_mut_ptr(),
            ptr::null_mut(),
            None,
            ptr::null_mut(),
        );
        if rv != gdal_sys::CPLErr::CE_None {
            return Err(error::Error::fatal("GDALRasterizeLayers failed"));
        }
    }

    Ok(())
}

/// Reprojects/resamples `source` into a new dataset covering `extent` at
/// `(res_x, res_y)`, matching `source`'s band count, data types and nodata
/// values.
fn warp_to_extent(source: &Path, extent: Extents, res_x: f64, res_y: f64, out_path: &Path, wkt: &str) -> Result<()> {
    let source_dataset = Dataset::open(source).context(error::Gdal)?;
    let band_count = source_dataset.raster_count();
    let width = extent.width(res_x);
    let height = extent.height(res_y);

    let driver = DriverManager::get_driver_by_name("GTiff").context(error::Gdal)?;
    let mut out_dataset = driver
        .create_with_band_type::<f64, _>(out_path, width, height, band_count)
        .context(error::Gdal)?;
    out_dataset
        .set_geo_transform(&GeoTransform::new(extent.min_x, res_x, extent.max_y, -res_y).to_gdal())
        .context(error::Gdal)?;
    out_dataset.set_projection(wkt).context(error::Gdal)?;

    for i in 1..=band_count {
        let src_band = source_dataset.rasterband(i).context(error::Gdal)?;
        if let Some(nodata) = src_band.no_data_value() {
            let mut dst_band = out_dataset.rasterband(i).context(error::Gdal)?;
            dst_band.set_no_data_value(Some(nodata)).context(error::Gdal)?;
            dst_band.set_description(&src_band.description().unwrap_or_default()).context(error::Gdal)?;
        }
    }
    out_dataset.flush_cache().context(error::Gdal)?;

    unsafe {
        let rv = gdal_sys::GDALReprojectImage(
            source_dataset.c_dataset(),
            ptr::null(),
            out_dataset.c_dataset(),
            ptr::null(),
            gdal_sys::GDALResampleAlg::GRA_NearestNeighbour,
            0.0,
            0.0,
            None,
            ptr::null_mut(),
            ptr::null_mut(),
        );
        if rv != gdal_sys::CPLErr::CE_None {
            return Err(error::Error::fatal("GDALReprojectImage failed"));
        }
    }

    Ok(())
}

/// Overwrites, block by block, every pixel of `target` where `mask == 0`
/// with the corresponding band's nodata value — the final step that
/// guarantees bit-for-bit alignment with the mask raster rather than
/// relying on warp cutline edge behavior alone.
fn clip_to_mask(target: &Path, mask: &Path) -> Result<()> {
    let target_io = RasterIo::open(target)?;
    let mask_io = RasterIo::open(mask)?;
    let (width, height) = target_io.size();
    let (block_x, block_y) = target_io.block_size(1)?;

    for tile in crate::tiling::tiles(0, 0, width as i64, height as i64, block_x as i64, block_y as i64) {
        let mask_window = mask_io.read_window(1, &tile)?;
        for band_index in 1..=target_io.band_count() {
            let mut window = target_io.read_window(band_index, &tile)?;
            let nodata = target_io.band_nodata(band_index)?.unwrap_or(f64::NAN);
            for idx in 0..window.values.len() {
                if mask_window.values[idx] == 0.0 {
                    window.values[idx] = nodata;
                    window.mask[idx] = true;
                }
            }
            target_io.write_window(band_index, &tile, &window)?;
        }
    }

    Ok(())
}

/// Runs the full pink-chart alignment pipeline against `ifd` (which must
/// carry a `coverage_vector_path`), writing outputs under `work_dir`.
/// Returns an updated IFD: new size/geotransform, every `BandRef` rewritten
/// to point at the aligned rasters, plus one new `PinkChart` band pointing
/// at the rasterized mask.
pub fn process(ifd: &InputFileDetails, work_dir: &Path) -> Result<InputFileDetails> {
    let vector_path = ifd
        .coverage_vector_path
        .as_ref()
        .ok_or_else(|| error::Error::fatal("pink chart processing requires a coverage_vector_path"))?;

    let first_band = ifd
        .bands
        .first()
        .ok_or_else(|| error::Error::bad_input("cannot align an IFD with no bands"))?;
    let reference_io = RasterIo::open(&first_band.path)?;
    let (res_x, res_y) = reference_io.geotransform()?.resolution();
    let wkt = reference_io.projection();

    let r_extent = raster_extent(&reference_io)?;
    let v_extent = vector_extent(vector_path, &wkt)?;
    let aligned = calc_ideal_extents(r_extent, v_extent, res_x, res_y)?;

    let mask_path = work_dir.join("pink_chart_mask.tif");
    rasterize_mask(vector_path, aligned, res_x, res_y, &mask_path, &wkt)?;

    let mut new_bands = Vec::new();
    let mut distinct_paths: Vec<&PathBuf> = Vec::new();
    for band in &ifd.bands {
        if !distinct_paths.contains(&&band.path) {
            distinct_paths.push(&band.path);
        }
    }

    for (i, path) in distinct_paths.iter().enumerate() {
        let aligned_path = work_dir.join(format!("aligned_{i}.tif"));
        warp_to_extent(path, aligned, res_x, res_y, &aligned_path, &wkt)?;
        clip_to_mask(&aligned_path, &mask_path)?;

        for band in ifd.bands.iter().filter(|b| &&b.path == path) {
            new_bands.push(BandRef::new(aligned_path.clone(), band.band_index, band.band_type));
        }
    }
    new_bands.push(BandRef::new(mask_path, 1, BandType::PinkChart));

    let mut clone = ifd.clone_for_preprocessing();
    clone.size_x = aligned.width(res_x);
    clone.size_y = aligned.height(res_y);
    clone.geotransform = GeoTransform::new(aligned.min_x, res_x, aligned.max_y, -res_y);
    clone.bands = new_bands;
    Ok(clone)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_aligned_extent_scenario() {
        let raster = Extents::new(-4.0, 1.0, 1.0, 5.0);
        let vector = Extents::new(-6.3, -0.1, 2.1, 4.1);
        let aligned = calc_ideal_extents(raster, vector, 0.5, 0.5).unwrap();
        assert!((aligned.min_x - (-6.5)).abs() < 1e-9);
        assert!((aligned.min_y - (-0.5)).abs() < 1e-9);
        assert!((aligned.max_x - 2.5).abs() < 1e-9);
        assert!((aligned.max_y - 4.5).abs() < 1e-9);
    }

    #[test]
    fn aligned_extent_is_never_smaller_than_source() {
        let raster = Extents::new(0.0, 0.0, 10.0, 10.0);
        let vector = Extents::new(2.0, 2.0, 8.0, 8.0);
        let aligned = calc_ideal_extents(raster, vector, 1.0, 1.0).unwrap();
        assert_eq!(aligned, raster);
    }

    #[test]
    fn zero_size_alignment_is_fatal() {
        let raster = Extents::new(0.0, 0.0, 0.0, 10.0);
        let vector = Extents::new(0.0, 0.0, 0.0, 10.0);
        assert!(calc_ideal_extents(raster, vector, 1.0, 1.0).is_err());
    }
}
