use macroquad::prelude::{vec2, Vec2};

use crate::error::MapError;
use crate::spatial::{FlipFlags, Gid, GridSpec};

/// One grid cell: a GID plus the flips it is drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Cell {
    pub gid: Gid,
    pub flip: FlipFlags,
}

impl Cell {
    pub const EMPTY: Cell = Cell {
        gid: Gid::EMPTY,
        flip: FlipFlags::empty(),
    };

    /// Decodes a raw Tiled layer entry (GID with flip bits).
    pub fn from_raw(raw: u32) -> Self {
        let (gid, flip) = Gid::from_raw(raw);
        Cell { gid, flip }
    }

    pub fn to_raw(self) -> u32 {
        self.gid.get() | self.flip.to_raw_bits()
    }
}

/// A rectangular grid of cells, row-major, (0,0) at the top-left.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayer {
    name: String,
    width: u32,
    height: u32,
    tile_w: u32,
    tile_h: u32,
    offset: Vec2,
    cells: Vec<Cell>,
}

impl TileLayer {
    /// An all-empty layer.
    pub fn new(
        name: impl Into<String>,
        width: u32,
        height: u32,
        tile_w: u32,
        tile_h: u32,
    ) -> Result<Self, MapError> {
        let len = width as usize * height as usize;
        Self::from_cells(name, width, height, tile_w, tile_h, vec![Cell::EMPTY; len])
    }

    pub fn from_cells(
        name: impl Into<String>,
        width: u32,
        height: u32,
        tile_w: u32,
        tile_h: u32,
        cells: Vec<Cell>,
    ) -> Result<Self, MapError> {
        let name = name.into();
        if width == 0 || height == 0 || tile_w == 0 || tile_h == 0 {
            return Err(MapError::InvalidMap(format!(
                "layer '{name}' has zero size ({width}x{height} cells of {tile_w}x{tile_h})"
            )));
        }
        if cells.len() != width as usize * height as usize {
            return Err(MapError::InvalidMap(format!(
                "layer '{name}' has {} cells, expected {width}x{height}",
                cells.len()
            )));
        }
        Ok(TileLayer {
            name,
            width,
            height,
            tile_w,
            tile_h,
            offset: Vec2::ZERO,
            cells,
        })
    }

    /// Builds a layer from raw Tiled data (flip bits included).
    pub fn from_raw_gids(
        name: impl Into<String>,
        width: u32,
        height: u32,
        tile_w: u32,
        tile_h: u32,
        data: &[u32],
    ) -> Result<Self, MapError> {
        let cells = data.iter().copied().map(Cell::from_raw).collect();
        Self::from_cells(name, width, height, tile_w, tile_h, cells)
    }

    pub fn with_offset(mut self, offset: Vec2) -> Self {
        self.offset = offset;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn tile_size(&self) -> Vec2 {
        vec2(self.tile_w as f32, self.tile_h as f32)
    }

    pub fn offset(&self) -> Vec2 {
        self.offset
    }

    pub fn grid(&self) -> GridSpec {
        GridSpec {
            width: self.width,
            height: self.height,
            tile_w: self.tile_w as f32,
            tile_h: self.tile_h as f32,
            offset: self.offset,
        }
    }

    fn slot(&self, x: u32, y: u32) -> Result<usize, MapError> {
        if x >= self.width || y >= self.height {
            return Err(MapError::OutOfBounds {
                x: x.into(),
                y: y.into(),
                width: self.width,
                height: self.height,
            });
        }
        Ok(y as usize * self.width as usize + x as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> Result<Gid, MapError> {
        self.cell(x, y).map(|c| c.gid)
    }

    pub fn cell(&self, x: u32, y: u32) -> Result<Cell, MapError> {
        Ok(self.cells[self.slot(x, y)?])
    }

    /// Replaces a cell and returns what was there before.
    pub fn set(&mut self, x: u32, y: u32, gid: Gid, flip: FlipFlags) -> Result<Cell, MapError> {
        let slot = self.slot(x, y)?;
        Ok(std::mem::replace(&mut self.cells[slot], Cell { gid, flip }))
    }

    /// Non-empty cells in row-major order. Calling again starts over.
    pub fn occupied_cells(&self) -> OccupiedCells<'_> {
        OccupiedCells {
            width: self.width,
            inner: self.cells.iter().enumerate(),
        }
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| !c.gid.is_empty()).count()
    }

    /// Raw Tiled encoding of every cell, row-major.
    pub fn to_raw_gids(&self) -> Vec<u32> {
        self.cells.iter().map(|c| c.to_raw()).collect()
    }
}

/// Lazy walk over the occupied cells of a [`TileLayer`].
#[derive(Clone)]
pub struct OccupiedCells<'a> {
    width: u32,
    inner: std::iter::Enumerate<std::slice::Iter<'a, Cell>>,
}

/// An occupied cell as yielded by [`TileLayer::occupied_cells`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OccupiedCell {
    pub x: u32,
    pub y: u32,
    pub gid: Gid,
    pub flip: FlipFlags,
}

impl Iterator for OccupiedCells<'_> {
    type Item = OccupiedCell;

    fn next(&mut self) -> Option<Self::Item> {
        let width = self.width as usize;
        self.inner.find(|(_, c)| !c.gid.is_empty()).map(|(i, c)| OccupiedCell {
            x: (i % width) as u32,
            y: (i / width) as u32,
            gid: c.gid,
            flip: c.flip,
        })
    }
}
