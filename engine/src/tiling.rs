//! Deterministic decomposition of a rectangular pixel window into tiles.

use gridqa_datatypes::Tile;

/// Partitions the half-open rectangle `[min_x, max_x) x [min_y, max_y)` into
/// a row-major sequence of tiles of at most `size_x x size_y`; tiles along
/// the right and bottom edges are truncated to fit. Enumeration order is
/// outer-`y`/inner-`x`, both stepping by tile size, and is observable:
/// streaming checks must not depend on it, but tests may.
///
/// # Panics
/// If `min_x >= max_x`, `min_y >= max_y`, `size_x == 0`, or `size_y == 0`.
pub fn tiles(min_x: i64, min_y: i64, max_x: i64, max_y: i64, size_x: i64, size_y: i64) -> TileIter {
    assert!(min_x < max_x, "min_x must be < max_x");
    assert!(min_y < max_y, "min_y must be < max_y");
    assert!(size_x > 0, "size_x must be > 0");
    assert!(size_y > 0, "size_y must be > 0");
    TileIter {
        min_x,
        max_x,
        max_y,
        size_x,
        size_y,
        cur_x: min_x,
        cur_y: min_y,
    }
}

/// Lazily yields the tiles of [`tiles`] one at a time, so the Executor can
/// stream them without materializing the whole plan (only the count is
/// needed up front for progress accounting — see `tiling::count`).
pub struct TileIter {
    min_x: i64,
    max_x: i64,
    max_y: i64,
    size_x: i64,
    size_y: i64,
    cur_x: i64,
    cur_y: i64,
}

impl Iterator for TileIter {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        if self.cur_y >= self.max_y {
            return None;
        }

        let next_x = (self.cur_x + self.size_x).min(self.max_x);
        let next_y = (self.cur_y + self.size_y).min(self.max_y);
        let tile = Tile::new(self.cur_x, self.cur_y, next_x, next_y);

        self.cur_x = next_x;
        if self.cur_x >= self.max_x {
            self.cur_x = self.min_x;
            self.cur_y = next_y;
        }

        Some(tile)
    }
}

/// The number of tiles `tiles(...)` would yield, without iterating — used by
/// the Executor to compute `total_tile_count` for progress reporting.
pub fn count(min_x: i64, min_y: i64, max_x: i64, max_y: i64, size_x: i64, size_y: i64) -> usize {
    let cols = ((max_x - min_x) as f64 / size_x as f64).ceil() as usize;
    let rows = ((max_y - min_y) as f64 / size_y as f64).ceil() as usize;
    cols * rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_tiling_scenario() {
        let ts: Vec<_> = tiles(0, 0, 14, 10, 5, 3).collect();
        assert_eq!(ts.len(), 12);
        assert_eq!(ts[0], Tile::new(0, 0, 5, 3));
        assert_eq!(*ts.last().unwrap(), Tile::new(10, 9, 14, 10));
    }

    #[test]
    fn count_matches_iterator_len() {
        assert_eq!(count(0, 0, 14, 10, 5, 3), tiles(0, 0, 14, 10, 5, 3).count());
    }

    #[test]
    fn tiles_cover_window_disjointly() {
        let ts: Vec<_> = tiles(0, 0, 7, 4, 3, 3).collect();
        let mut covered = std::collections::HashSet::new();
        for t in &ts {
            for x in t.min_x..t.max_x {
                for y in t.min_y..t.max_y {
                    assert!(covered.insert((x, y)), "pixel ({x},{y}) covered twice");
                }
            }
        }
        assert_eq!(covered.len(), 7 * 4);
    }

    #[test]
    #[should_panic(expected = "min_x must be < max_x")]
    fn rejects_empty_window() {
        let _ = tiles(5, 0, 5, 10, 1, 1).next();
    }

    #[test]
    #[should_panic(expected = "size_x must be > 0")]
    fn rejects_zero_tile_size() {
        let _ = tiles(0, 0, 5, 10, 0, 1).next();
    }
}
