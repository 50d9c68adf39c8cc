//! Thin, nodata-aware wrapper around GDAL raster access.

use gdal::raster::{Buffer, GdalDataType};
use gdal::Dataset;
use snafu::ResultExt;
use std::path::Path;

use crate::error::{self, Result};
use gridqa_datatypes::{GeoTransform, Tile};

/// A row-major window of `f64` cell values paired with a same-shape mask:
/// `true` means the cell is nodata and must be excluded from every
/// computation. Kept as an explicit parallel mask rather than relying on a
/// sentinel value so downstream code (checks, polygonization) never has to
/// re-derive "is this masked" from a magic number.
#[derive(Debug, Clone)]
pub struct MaskedArray {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
    pub mask: Vec<bool>,
}

impl MaskedArray {
    pub fn filled(width: usize, height: usize, fill: f64, masked: bool) -> Self {
        Self {
            width,
            height,
            values: vec![fill; width * height],
            mask: vec![masked; width * height],
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|m| !**m).count()
    }

    pub fn get(&self, col: usize, row: usize) -> Option<f64> {
        let idx = row * self.width + col;
        if self.mask[idx] {
            None
        } else {
            Some(self.values[idx])
        }
    }
}

/// Read-only access to one GDAL raster dataset. Band indices throughout are
/// 1-based (GDAL convention), matching `BandRef::band_index`.
pub struct RasterIo {
    dataset: Dataset,
}

impl RasterIo {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset = Dataset::open(path).context(error::Gdal)?;
        Ok(Self { dataset })
    }

    pub fn size(&self) -> (usize, usize) {
        self.dataset.raster_size()
    }

    pub fn band_count(&self) -> usize {
        self.dataset.raster_count() as usize
    }

    pub fn projection(&self) -> String {
        self.dataset.projection()
    }

    pub fn geotransform(&self) -> Result<GeoTransform> {
        let gt = self.dataset.geo_transform().context(error::Gdal)?;
        Ok(GeoTransform::from_gdal(gt))
    }

    pub fn band_description(&self, band_index: usize) -> Result<String> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        Ok(band.description().unwrap_or_default())
    }

    pub fn band_data_type(&self, band_index: usize) -> Result<GdalDataType> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        Ok(band.band_type())
    }

    pub fn band_nodata(&self, band_index: usize) -> Result<Option<f64>> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        Ok(band.no_data_value())
    }

    pub fn block_size(&self, band_index: usize) -> Result<(usize, usize)> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        Ok(band.block_size())
    }

    /// Reads `tile` of `band_index` into a [`MaskedArray`] of exactly
    /// `tile.width() x tile.height()` elements. Cells equal to the band's
    /// nodata value (if any) are masked; absent a nodata value, every cell
    /// is valid.
    pub fn read_window(&self, band_index: usize, tile: &Tile) -> Result<MaskedArray> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        let nodata = band.no_data_value();
        let width = tile.width() as usize;
        let height = tile.height() as usize;

        let buffer: Buffer<f64> = band
            .read_as::<f64>(
                (tile.min_x as isize, tile.min_y as isize),
                (width, height),
                (width, height),
                None,
            )
            .context(error::Gdal)?;

        let mask = match nodata {
            Some(nodata) => buffer
                .data
                .iter()
                .map(|v| (*v - nodata).abs() < f64::EPSILON)
                .collect(),
            None => vec![false; buffer.data.len()],
        };

        Ok(MaskedArray {
            width,
            height,
            values: buffer.data,
            mask,
        })
    }

    /// Density is always treated as a whole-number count per cell; values
    /// are rounded after load (the raster may legitimately be stored as
    /// `float32`).
    pub fn read_density_window(&self, band_index: usize, tile: &Tile) -> Result<MaskedArray> {
        let mut array = self.read_window(band_index, tile)?;
        for v in &mut array.values {
            *v = v.round();
        }
        Ok(array)
    }

    pub fn write_window(&self, band_index: usize, tile: &Tile, array: &MaskedArray) -> Result<()> {
        let band = self.dataset.rasterband(band_index).context(error::Gdal)?;
        let nodata = band.no_data_value();
        let mut data = array.values.clone();
        if let Some(nodata) = nodata {
            for (v, m) in data.iter_mut().zip(&array.mask) {
                if *m {
                    *v = nodata;
                }
            }
        }
        let mut buffer = Buffer::new((array.width, array.height), data);
        band.write(
            (tile.min_x as isize, tile.min_y as isize),
            (array.width, array.height),
            &mut buffer,
        )
        .context(error::Gdal)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masked_array_valid_count_excludes_masked_cells() {
        let mut array = MaskedArray::filled(2, 2, 1.0, false);
        array.mask[0] = true;
        assert_eq!(array.valid_count(), 3);
        assert_eq!(array.get(0, 0), None);
        assert_eq!(array.get(1, 0), Some(1.0));
    }
}
