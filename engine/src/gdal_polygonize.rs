//! `GDALPolygonize` plumbing shared by every check's spatial-output path.
//! Kept separate from `checks::mod` since it is pure GDAL/FFI glue, not
//! check logic.

use std::ptr;

use gdal::vector::LayerAccess;
use gdal::{Dataset, DriverManager};
use geo::Polygon;
use snafu::ResultExt;
use wkt::TryFromWkt;

use gridqa_datatypes::GeoTransform;

use crate::error::{self, Result};

pub fn polygonize_mask(
    mask: &[bool],
    width: usize,
    height: usize,
    geotransform: &GeoTransform,
) -> Result<Vec<Polygon<f64>>> {
    let mem_raster_driver = DriverManager::get_driver_by_name("MEM").context(error::Gdal)?;
    let mut raster = mem_raster_driver
        .create_with_band_type::<u8, _>("", width, height, 1)
        .context(error::Gdal)?;
    raster.set_geo_transform(&geotransform.to_gdal()).context(error::Gdal)?;

    {
        let mut band = raster.rasterband(1).context(error::Gdal)?;
        let data: Vec<u8> = mask.iter().map(|&m| if m { 1 } else { 0 }).collect();
        let mut buffer = gdal::raster::Buffer::new((width, height), data);
        band.write((0, 0), (width, height), &mut buffer).context(error::Gdal)?;
    }

    let memory_vector_driver = DriverManager::get_driver_by_name("Memory").context(error::Gdal)?;
    let mut vector_dataset = memory_vector_driver.create_vector_only("").context(error::Gdal)?;
    let mut layer = vector_dataset
        .create_layer(gdal::vector::LayerOptions {
            name: "polygons",
            ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
            ..Default::default()
        })
        .context(error::Gdal)?;
    layer
        .create_defn_fields(&[("DN", gdal_sys::OGRFieldType::OFTInteger)])
        .context(error::Gdal)?;

    unsafe {
        let band = raster.rasterband(1).context(error::Gdal)?;
        let rv = gdal_sys::GDALPolygonize(
            band.c_rasterband(),
            ptr::null_mut(),
            layer.c_layer(),
            0,
            ptr::null_mut(),
            None,
            ptr::null_mut(),
        );
        if rv != gdal_sys::CPLErr::CE_None {
            return Err(error::Error::fatal("GDALPolygonize failed"));
        }
    }

    let mut polygons = Vec::new();
    for feature in layer.features() {
        let dn: i64 = feature
            .field_as_integer64_by_name("DN")
            .ok()
            .flatten()
            .unwrap_or(0);
        if dn == 0 {
            continue;
        }
        let Some(geometry) = feature.geometry() else {
            continue;
        };
        let wkt_text = geometry.wkt().context(error::Gdal)?;
        if let Ok(polygon) = Polygon::<f64>::try_from_wkt_str(&wkt_text) {
            polygons.push(polygon);
        }
    }

    Ok(polygons)
}
