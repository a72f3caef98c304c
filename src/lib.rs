//! Tile-map collision for Tiled maps: tileset registry, per-tile collision
//! shapes, layer composition and point/region/ray queries.

mod compositor;
mod config;
mod error;
mod ir_map;
mod layer;
mod loader {
    pub mod json_loader;
}
mod map;
mod query;
mod shapes;
mod spatial {
    mod index;
    pub use index::*;
}
mod tileset;

pub use compositor::{CollisionGeometry, MapCompositor, PlacedShape, ShapeRef};
pub use config::QueryConfig;
pub use error::MapError;
pub use ir_map::{IrLayer, IrLayerKind, IrMap, IrTileset};
pub use layer::{Cell, OccupiedCell, OccupiedCells, TileLayer};
pub use loader::json_loader::{decode_map_file_to_ir, decode_tileset_file};
pub use map::Map;
pub use query::{CollisionQueryEngine, RayHit};
pub use shapes::{flip_point, transform, CollisionShape, ShapeLibrary};
pub use spatial::{BucketCoord, FlipFlags, Gid, GridSpec, FLIP_D, FLIP_H, FLIP_V, GID_MASK};
pub use tileset::{
    AssetCatalog, DirCatalog, ImageRef, TileDefinition, Tileset, TilesetDef, TilesetId,
    TilesetKind, TilesetRegistry,
};
