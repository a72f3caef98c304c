//! Turns a tile layer into map-space collision geometry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use macroquad::prelude::{vec2, Rect};
use tracing::{info, trace};

use crate::config::QueryConfig;
use crate::error::MapError;
use crate::layer::{Cell, OccupiedCell, TileLayer};
use crate::query::CollisionQueryEngine;
use crate::shapes::{transform, CollisionShape, ShapeLibrary};
use crate::spatial::{BucketCoord, BucketIndex, FlipFlags, Gid, GridSpec};
use crate::tileset::{TilesetId, TilesetRegistry};

/// Stable name of a placed shape: the cell it came from and its position in
/// that tile's authored shape list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShapeRef {
    pub x: u32,
    pub y: u32,
    pub slot: u16,
}

/// A tile shape after flip and translation into map space.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedShape {
    pub id: ShapeRef,
    pub gid: Gid,
    pub tileset: TilesetId,
    pub local_id: u32,
    pub shape: CollisionShape,
    pub bounds: Rect,
}

/// Map-space shapes of one layer, bucketed by the cell that owns them.
pub struct CollisionGeometry {
    index: BucketIndex<Arc<PlacedShape>>,
    // Farthest any shape reaches past its own cell, in cells.
    overhang: AtomicU32,
}

impl CollisionGeometry {
    fn new(grid: GridSpec) -> Self {
        CollisionGeometry {
            index: BucketIndex::new(grid),
            overhang: AtomicU32::new(0),
        }
    }

    #[inline]
    pub fn grid(&self) -> &GridSpec {
        self.index.grid()
    }

    pub(crate) fn index(&self) -> &BucketIndex<Arc<PlacedShape>> {
        &self.index
    }

    pub fn overhang(&self) -> u32 {
        self.overhang.load(Ordering::Acquire)
    }

    pub fn shape_count(&self) -> usize {
        self.index.item_count()
    }

    /// Number of cells that own at least one shape.
    pub fn bucket_count(&self) -> usize {
        self.index.occupied_buckets()
    }

    /// Shapes owned by cell (x, y), in authored order.
    pub fn shapes_in_cell(&self, x: u32, y: u32) -> Result<Vec<Arc<PlacedShape>>, MapError> {
        let grid = self.grid();
        let c = BucketCoord {
            x: x as i32,
            y: y as i32,
        };
        match self.index.read(c) {
            Some(bucket) => Ok(bucket.clone()),
            None => Err(MapError::OutOfBounds {
                x: x.into(),
                y: y.into(),
                width: grid.width,
                height: grid.height,
            }),
        }
    }

    /// Every shape, ordered by [`ShapeRef`].
    pub fn all_shapes(&self) -> Vec<Arc<PlacedShape>> {
        let grid = *self.grid();
        let mut out = Vec::new();
        for y in 0..grid.height as i32 {
            for x in 0..grid.width as i32 {
                if let Some(bucket) = self.index.read(BucketCoord { x, y }) {
                    out.extend(bucket.iter().cloned());
                }
            }
        }
        out
    }

    fn note_overhang(&self, cells: u32) {
        self.overhang.fetch_max(cells, Ordering::AcqRel);
    }
}

/// Owns one layer and the collision geometry derived from it.
///
/// All mutation goes through `&mut self`, so there is a single writer.
/// Readers hold [`CollisionGeometry`] snapshots through
/// [`CollisionQueryEngine`]; an incremental rebuild swaps one bucket under
/// that bucket's write lock, a full rebuild swaps the whole snapshot.
pub struct MapCompositor {
    registry: Arc<TilesetRegistry>,
    shapes: Arc<ShapeLibrary>,
    layer: TileLayer,
    geometry: Arc<CollisionGeometry>,
}

impl MapCompositor {
    /// Composes `layer`; fails on the first cell whose GID cannot be
    /// resolved. No partial geometry is kept.
    pub fn build(
        layer: TileLayer,
        registry: Arc<TilesetRegistry>,
        shapes: Arc<ShapeLibrary>,
    ) -> Result<Self, MapError> {
        let geometry = Self::compose(&layer, &registry, &shapes)?;
        Ok(MapCompositor {
            registry,
            shapes,
            layer,
            geometry: Arc::new(geometry),
        })
    }

    /// Builds geometry for a layer without keeping it.
    pub fn compose(
        layer: &TileLayer,
        registry: &TilesetRegistry,
        shapes: &ShapeLibrary,
    ) -> Result<CollisionGeometry, MapError> {
        let grid = layer.grid();
        let mut geometry = CollisionGeometry::new(grid);
        let mut cells = 0usize;
        let mut overhang = 0;

        for cell in layer.occupied_cells() {
            let placed = place_cell(&grid, registry, shapes, cell)?;
            let c = bucket_of(cell.x, cell.y);
            for shape in placed {
                overhang = overhang.max(overhang_cells(&grid, c, &shape.bounds));
                geometry.index.push(c, shape);
            }
            cells += 1;
        }
        geometry.note_overhang(overhang);

        info!(
            layer = layer.name(),
            cells,
            shapes = geometry.shape_count(),
            buckets = geometry.bucket_count(),
            "composed collision geometry"
        );
        Ok(geometry)
    }

    /// Re-derives one cell's shapes from the current layer contents.
    ///
    /// Costs O(shapes in that cell). On error the previous shapes stay.
    pub fn rebuild_cell(&mut self, x: u32, y: u32) -> Result<(), MapError> {
        let cell = self.layer.cell(x, y)?;
        let grid = self.layer.grid();
        let placed = if cell.gid.is_empty() {
            Vec::new()
        } else {
            place_cell(
                &grid,
                &self.registry,
                &self.shapes,
                OccupiedCell {
                    x,
                    y,
                    gid: cell.gid,
                    flip: cell.flip,
                },
            )?
        };

        let c = bucket_of(x, y);
        let overhang = placed
            .iter()
            .map(|s| overhang_cells(&grid, c, &s.bounds))
            .max()
            .unwrap_or(0);
        self.geometry.note_overhang(overhang);

        let count = placed.len();
        let previous = self.geometry.index.replace(c, placed).map_or(0, |old| old.len());
        trace!(x, y, gid = cell.gid.get(), previous, count, "rebuilt cell");
        Ok(())
    }

    /// Writes a cell and rebuilds it. An unresolvable tile leaves both the
    /// layer and the geometry untouched.
    pub fn set_tile(&mut self, x: u32, y: u32, gid: Gid, flip: FlipFlags) -> Result<Cell, MapError> {
        let previous = self.layer.set(x, y, gid, flip)?;
        if let Err(err) = self.rebuild_cell(x, y) {
            self.layer.set(x, y, previous.gid, previous.flip)?;
            return Err(err);
        }
        Ok(previous)
    }

    /// Rebuilds everything into a fresh snapshot. Engines created before
    /// keep the old one.
    pub fn rebuild(&mut self) -> Result<(), MapError> {
        let geometry = Self::compose(&self.layer, &self.registry, &self.shapes)?;
        self.geometry = Arc::new(geometry);
        Ok(())
    }

    pub fn geometry(&self) -> Arc<CollisionGeometry> {
        Arc::clone(&self.geometry)
    }

    pub fn engine(&self, config: QueryConfig) -> CollisionQueryEngine {
        CollisionQueryEngine::new(self.geometry(), config)
    }

    pub fn layer(&self) -> &TileLayer {
        &self.layer
    }

    /// Direct layer access; follow edits with [`MapCompositor::rebuild_cell`].
    pub fn layer_mut(&mut self) -> &mut TileLayer {
        &mut self.layer
    }

    pub fn registry(&self) -> &Arc<TilesetRegistry> {
        &self.registry
    }
}

#[inline]
fn bucket_of(x: u32, y: u32) -> BucketCoord {
    BucketCoord {
        x: x as i32,
        y: y as i32,
    }
}

fn place_cell(
    grid: &GridSpec,
    registry: &TilesetRegistry,
    library: &ShapeLibrary,
    cell: OccupiedCell,
) -> Result<Vec<Arc<PlacedShape>>, MapError> {
    let (tileset, local_id) = registry.resolve(cell.gid).map_err(|source| {
        MapError::UnresolvedGid {
            x: cell.x,
            y: cell.y,
            source: Box::new(source),
        }
    })?;

    let authored = library.shapes_for(tileset, local_id);
    if authored.is_empty() {
        return Ok(Vec::new());
    }

    // Tiles taller than the grid hang upward from the cell's bottom edge.
    let tile_size = library
        .tile_size(tileset)
        .unwrap_or(vec2(grid.tile_w, grid.tile_h));
    let origin = grid.cell_origin(cell.x, cell.y) + vec2(0.0, grid.tile_h - tile_size.y);

    authored
        .iter()
        .enumerate()
        .map(|(slot, shape)| {
            let slot = u16::try_from(slot).map_err(|_| {
                MapError::InvalidShape(format!(
                    "tile {local_id} has more than {} shapes",
                    u16::MAX as usize + 1
                ))
            })?;
            let shape = transform(shape, tile_size, origin, cell.flip);
            Ok(Arc::new(PlacedShape {
                id: ShapeRef {
                    x: cell.x,
                    y: cell.y,
                    slot,
                },
                gid: cell.gid,
                tileset,
                local_id,
                bounds: shape.bounds(),
                shape,
            }))
        })
        .collect()
}

fn overhang_cells(grid: &GridSpec, c: BucketCoord, bounds: &Rect) -> u32 {
    let cell = grid.bucket_rect(c);
    let reach = [
        (cell.x - bounds.x) / grid.tile_w,
        (bounds.x + bounds.w - (cell.x + cell.w)) / grid.tile_w,
        (cell.y - bounds.y) / grid.tile_h,
        (bounds.y + bounds.h - (cell.y + cell.h)) / grid.tile_h,
    ];
    reach
        .iter()
        .map(|r| r.max(0.0).ceil() as u32)
        .max()
        .unwrap_or(0)
}
