use serde::{Deserialize, Serialize};

use crate::tile::Tile;

/// The six GDAL-convention affine coefficients mapping pixel (col, row) to a
/// projected coordinate: `x = ox + col*sx + row*rx`, `y = oy + col*ry +
/// row*sy`. North-up rasters have `rx == ry == 0.0` and `sy < 0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub pixel_width: f64,
    pub row_rotation: f64,
    pub origin_y: f64,
    pub column_rotation: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn new(origin_x: f64, pixel_width: f64, origin_y: f64, pixel_height: f64) -> Self {
        Self {
            origin_x,
            pixel_width,
            row_rotation: 0.0,
            origin_y,
            column_rotation: 0.0,
            pixel_height,
        }
    }

    pub fn from_gdal(coeffs: [f64; 6]) -> Self {
        Self {
            origin_x: coeffs[0],
            pixel_width: coeffs[1],
            row_rotation: coeffs[2],
            origin_y: coeffs[3],
            column_rotation: coeffs[4],
            pixel_height: coeffs[5],
        }
    }

    pub fn to_gdal(self) -> [f64; 6] {
        [
            self.origin_x,
            self.pixel_width,
            self.row_rotation,
            self.origin_y,
            self.column_rotation,
            self.pixel_height,
        ]
    }

    /// Resolution as `(|pixel_width|, |pixel_height|)`, the `(rx, ry)` of
    /// §4.4's alignment algorithm.
    pub fn resolution(&self) -> (f64, f64) {
        (self.pixel_width.abs(), self.pixel_height.abs())
    }

    pub fn pixel_to_coord(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width + row * self.row_rotation,
            self.origin_y + col * self.column_rotation + row * self.pixel_height,
        )
    }

    /// The geotransform of a sub-tile of this raster: same pixel size, but
    /// origin translated to the tile's upper-left pixel. Mirrors the
    /// reference implementation's `Affine.from_gdal(*gt) *
    /// Affine.translation(tile.min_x, tile.min_y)`.
    pub fn tile_geotransform(&self, tile: &Tile) -> GeoTransform {
        let (ox, oy) = self.pixel_to_coord(tile.min_x as f64, tile.min_y as f64);
        GeoTransform {
            origin_x: ox,
            pixel_width: self.pixel_width,
            row_rotation: self.row_rotation,
            origin_y: oy,
            column_rotation: self.column_rotation,
            pixel_height: self.pixel_height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_to_coord_is_affine() {
        let gt = GeoTransform::new(100.0, 2.0, 200.0, -2.0);
        assert_eq!(gt.pixel_to_coord(0.0, 0.0), (100.0, 200.0));
        assert_eq!(gt.pixel_to_coord(1.0, 1.0), (102.0, 198.0));
    }

    #[test]
    fn resolution_is_absolute() {
        let gt = GeoTransform::new(0.0, 0.5, 0.0, -0.5);
        assert_eq!(gt.resolution(), (0.5, 0.5));
    }

    #[test]
    fn tile_geotransform_translates_origin() {
        let gt = GeoTransform::new(0.0, 2.0, 0.0, -2.0);
        let tile = Tile::new(5, 3, 10, 8);
        let tgt = gt.tile_geotransform(&tile);
        assert_eq!(tgt.origin_x, 10.0);
        assert_eq!(tgt.origin_y, -6.0);
        assert_eq!(tgt.pixel_width, 2.0);
        assert_eq!(tgt.pixel_height, -2.0);
    }
}
