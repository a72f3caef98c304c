use bitflags::bitflags;
use macroquad::prelude::{vec2, Rect, Vec2};
use parking_lot::{RwLock, RwLockReadGuard};

pub const FLIP_H: u32 = 0x8000_0000; // bit 31
pub const FLIP_V: u32 = 0x4000_0000; // bit 30
pub const FLIP_D: u32 = 0x2000_0000; // bit 29
pub const GID_MASK: u32 = 0x1FFF_FFFF; // keep lower 29 bits (bit 28 is free)

bitflags! {
    /// Per-cell flip state, as stored in the top bits of a Tiled GID.
    ///
    /// Applied in a fixed order: diagonal (swap x/y) first, then horizontal,
    /// then vertical.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct FlipFlags: u8 {
        const HORIZONTAL = 1 << 0;
        const VERTICAL   = 1 << 1;
        const DIAGONAL   = 1 << 2;
    }
}

impl FlipFlags {
    /// Extracts the flip bits of a raw (flagged) Tiled GID.
    #[inline]
    pub fn from_raw_gid(raw: u32) -> Self {
        let mut flags = FlipFlags::empty();
        flags.set(FlipFlags::HORIZONTAL, raw & FLIP_H != 0);
        flags.set(FlipFlags::VERTICAL, raw & FLIP_V != 0);
        flags.set(FlipFlags::DIAGONAL, raw & FLIP_D != 0);
        flags
    }

    /// Inverse of [`FlipFlags::from_raw_gid`].
    #[inline]
    pub fn to_raw_bits(self) -> u32 {
        let mut raw = 0;
        if self.contains(FlipFlags::HORIZONTAL) {
            raw |= FLIP_H;
        }
        if self.contains(FlipFlags::VERTICAL) {
            raw |= FLIP_V;
        }
        if self.contains(FlipFlags::DIAGONAL) {
            raw |= FLIP_D;
        }
        raw
    }

    /// All eight flip states.
    pub fn combinations() -> impl Iterator<Item = FlipFlags> {
        (0..8u8).map(FlipFlags::from_bits_truncate)
    }
}

/// Global tile ID with the flip bits stripped. `Gid(0)` is the empty tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Gid(pub u32);

impl Gid {
    /// The reserved "no tile" GID.
    pub const EMPTY: Gid = Gid(0);

    /// Splits a raw Tiled GID into its ID and flip flags.
    #[inline]
    pub fn from_raw(raw: u32) -> (Gid, FlipFlags) {
        (Gid(raw & GID_MASK), FlipFlags::from_raw_gid(raw))
    }

    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketCoord {
    pub x: i32,
    pub y: i32,
}

/// Placement of a tile grid in world space. One bucket per grid cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub width: u32,
    pub height: u32,
    pub tile_w: f32,
    pub tile_h: f32,
    pub offset: Vec2,
}

impl GridSpec {
    #[inline]
    pub fn cell_origin(&self, x: u32, y: u32) -> Vec2 {
        self.offset + vec2(x as f32 * self.tile_w, y as f32 * self.tile_h)
    }

    #[inline]
    pub fn world_to_bucket(&self, p: Vec2) -> BucketCoord {
        let rel = p - self.offset;
        BucketCoord {
            x: (rel.x / self.tile_w).floor() as i32,
            y: (rel.y / self.tile_h).floor() as i32,
        }
    }

    pub fn bucket_rect(&self, c: BucketCoord) -> Rect {
        let origin = self.offset + vec2(c.x as f32 * self.tile_w, c.y as f32 * self.tile_h);
        Rect::new(origin.x, origin.y, self.tile_w, self.tile_h)
    }

    pub fn world_bounds(&self) -> Rect {
        Rect::new(
            self.offset.x,
            self.offset.y,
            self.width as f32 * self.tile_w,
            self.height as f32 * self.tile_h,
        )
    }

    #[inline]
    pub fn contains_bucket(&self, c: BucketCoord) -> bool {
        c.x >= 0 && c.y >= 0 && (c.x as u32) < self.width && (c.y as u32) < self.height
    }

    #[inline]
    pub fn bucket_slot(&self, c: BucketCoord) -> Option<usize> {
        self.contains_bucket(c)
            .then(|| c.y as usize * self.width as usize + c.x as usize)
    }

    /// Buckets whose cells intersect `[min, max]`, padded by `margin` rings
    /// and clipped to the grid, in row-major order.
    pub fn buckets_in_rect(&self, min: Vec2, max: Vec2, margin: i32) -> Vec<BucketCoord> {
        let mut lo = self.world_to_bucket(min);
        let mut hi = self.world_to_bucket(max);

        if lo.x > hi.x {
            std::mem::swap(&mut lo.x, &mut hi.x);
        }
        if lo.y > hi.y {
            std::mem::swap(&mut lo.y, &mut hi.y);
        }

        // Far-off coordinates saturate in world_to_bucket; keep the padding
        // from wrapping them around.
        let cx_min = lo.x.saturating_sub(margin).max(0);
        let cy_min = lo.y.saturating_sub(margin).max(0);
        let cx_max = hi.x.saturating_add(margin).min(self.width as i32 - 1);
        let cy_max = hi.y.saturating_add(margin).min(self.height as i32 - 1);

        let mut coords = Vec::new();
        for cy in cy_min..=cy_max {
            for cx in cx_min..=cx_max {
                coords.push(BucketCoord { x: cx, y: cy });
            }
        }
        coords
    }
}

/// Dense grid of lock-guarded buckets, one per cell.
///
/// Writers replace a whole bucket under its write lock; readers lock one
/// bucket at a time, so a reader never sees a half-rebuilt cell.
pub struct BucketIndex<T> {
    grid: GridSpec,
    buckets: Vec<RwLock<Vec<T>>>,
}

impl<T> BucketIndex<T> {
    pub fn new(grid: GridSpec) -> Self {
        let n = grid.width as usize * grid.height as usize;
        BucketIndex {
            grid,
            buckets: (0..n).map(|_| RwLock::new(Vec::new())).collect(),
        }
    }

    #[inline]
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Insert without locking; only possible while the index is still
    /// exclusively owned.
    pub fn push(&mut self, c: BucketCoord, item: T) -> bool {
        match self.grid.bucket_slot(c) {
            Some(slot) => {
                self.buckets[slot].get_mut().push(item);
                true
            }
            None => false,
        }
    }

    pub fn read(&self, c: BucketCoord) -> Option<RwLockReadGuard<'_, Vec<T>>> {
        self.grid.bucket_slot(c).map(|slot| self.buckets[slot].read())
    }

    /// Swaps in new contents for one bucket, returning the previous ones.
    pub fn replace(&self, c: BucketCoord, items: Vec<T>) -> Option<Vec<T>> {
        let slot = self.grid.bucket_slot(c)?;
        let mut guard = self.buckets[slot].write();
        Some(std::mem::replace(&mut *guard, items))
    }

    pub fn item_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    pub fn occupied_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| !b.read().is_empty()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> GridSpec {
        GridSpec {
            width: 4,
            height: 3,
            tile_w: 32.0,
            tile_h: 16.0,
            offset: vec2(10.0, 0.0),
        }
    }

    #[test]
    fn raw_gid_splits_into_id_and_flags() {
        let (gid, flip) = Gid::from_raw(7 | FLIP_H | FLIP_D);
        assert_eq!(gid, Gid(7));
        assert_eq!(flip, FlipFlags::HORIZONTAL | FlipFlags::DIAGONAL);
        assert_eq!(flip.to_raw_bits() | gid.get(), 7 | FLIP_H | FLIP_D);
    }

    #[test]
    fn there_are_eight_flip_states() {
        let all: Vec<_> = FlipFlags::combinations().collect();
        assert_eq!(all.len(), 8);
        assert!(all.contains(&FlipFlags::all()));
        assert!(all.contains(&FlipFlags::empty()));
    }

    #[test]
    fn world_to_bucket_respects_offset_and_negative_side() {
        let g = grid();
        assert_eq!(g.world_to_bucket(vec2(10.0, 0.0)), BucketCoord { x: 0, y: 0 });
        assert_eq!(g.world_to_bucket(vec2(9.9, 0.0)), BucketCoord { x: -1, y: 0 });
        assert_eq!(g.world_to_bucket(vec2(42.0, 16.0)), BucketCoord { x: 1, y: 1 });
        assert!(!g.contains_bucket(BucketCoord { x: 4, y: 0 }));
    }

    #[test]
    fn buckets_in_rect_are_clipped_and_row_major() {
        let g = grid();
        let coords = g.buckets_in_rect(vec2(50.0, 20.0), vec2(-100.0, 0.0), 0);
        assert_eq!(coords.first(), Some(&BucketCoord { x: 0, y: 0 }));
        assert_eq!(coords.last(), Some(&BucketCoord { x: 1, y: 1 }));
        assert_eq!(coords.len(), 4);
        assert!(coords
            .windows(2)
            .all(|w| (w[0].y, w[0].x) <= (w[1].y, w[1].x)));
    }

    #[test]
    fn huge_rect_clips_to_whole_grid() {
        let g = grid();
        let coords = g.buckets_in_rect(vec2(-1e30, -1e30), vec2(1e30, 1e30), 3);
        assert_eq!(coords.len(), 12);
        assert_eq!(coords.first(), Some(&BucketCoord { x: 0, y: 0 }));
        assert_eq!(coords.last(), Some(&BucketCoord { x: 3, y: 2 }));
    }

    #[test]
    fn replace_swaps_whole_bucket() {
        let mut index = BucketIndex::new(grid());
        let c = BucketCoord { x: 2, y: 1 };
        assert!(index.push(c, 1));
        assert!(index.push(c, 2));
        assert!(!index.push(BucketCoord { x: 9, y: 9 }, 3));

        let old = index.replace(c, vec![5]).expect("bucket in range");
        assert_eq!(old, vec![1, 2]);
        assert_eq!(*index.read(c).expect("bucket in range"), vec![5]);
        assert_eq!(index.item_count(), 1);
        assert_eq!(index.occupied_buckets(), 1);
    }
}
